use std::collections::VecDeque;

use tracing::error;

use common::err::TbrResult;

use binlog::events::event::Event;
use binlog::events::protocol::gtid_event::GtidEvent;
use binlog::events::protocol::incident_event::IncidentEvent;
use binlog::events::protocol::int_var_event::IntVarEvent;
use binlog::events::protocol::query_event::QueryEvent;
use binlog::events::protocol::rotate_event::RotateEvent;
use binlog::events::protocol::rows_event::RowsEvent;
use binlog::events::protocol::table_map_event::TableMapEvent;
use binlog::events::protocol::user_var_event::UserVarEvent;
use binlog::events::protocol::xid_event::XidEvent;

/// Events queued by handlers for re-injection. Drained before the next
/// wire event; injected events traverse the full pipeline from handler
/// 0 and are delivered before the next wire event.
pub type InjectionQueue = VecDeque<Event>;

/// A content handler accepts an event and returns the same event, a new
/// one, or None (the event was consumed). The default for every
/// callback is to pass the event through unchanged; `on_other` receives
/// whatever has no dedicated callback (format description, unknown).
///
/// Handlers must be re-entrant across events but each listener owns its
/// own pipeline, so they need not be thread safe. Shared state (e.g.
/// the consistency registry) is referenced through handles the handler
/// carries itself.
#[allow(unused_variables)]
pub trait ContentHandler: Send {
    fn on_query(&mut self, event: QueryEvent, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Query(event)))
    }

    fn on_rows(&mut self, event: RowsEvent, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Rows(event)))
    }

    fn on_table_map(
        &mut self,
        event: TableMapEvent,
        queue: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        Ok(Some(Event::TableMap(event)))
    }

    fn on_xid(&mut self, event: XidEvent, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Xid(event)))
    }

    fn on_user_var(
        &mut self,
        event: UserVarEvent,
        queue: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        Ok(Some(Event::UserVar(event)))
    }

    fn on_incident(
        &mut self,
        event: IncidentEvent,
        queue: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Incident(event)))
    }

    fn on_rotate(
        &mut self,
        event: RotateEvent,
        queue: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Rotate(event)))
    }

    fn on_int_var(
        &mut self,
        event: IntVarEvent,
        queue: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        Ok(Some(Event::IntVar(event)))
    }

    fn on_gtid(&mut self, event: GtidEvent, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        Ok(Some(Event::Gtid(event)))
    }

    fn on_other(&mut self, event: Event, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        Ok(Some(event))
    }
}

/// Ordered chain of content handlers.
#[derive(Default)]
pub struct HandlerPipeline {
    handlers: Vec<Box<dyn ContentHandler>>,
}

impl HandlerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handler: Box<dyn ContentHandler>) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer one event to every handler in order. Stops early when a
    /// handler consumes it. Returns the surviving event, if any.
    pub fn process(&mut self, event: Event, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        let mut current = Some(event);
        for handler in self.handlers.iter_mut() {
            let Some(event) = current.take() else { break };
            current = dispatch(handler.as_mut(), event, queue)?;
        }
        Ok(current)
    }

    /// The listener's drive loop: drain the injection queue first, else
    /// pull from the wire; walk the pipeline; repeat until an event
    /// survives or the source ends. A handler error aborts the current
    /// event only.
    pub fn next_delivered(
        &mut self,
        queue: &mut InjectionQueue,
        source: &mut dyn FnMut() -> Option<Event>,
    ) -> Option<Event> {
        loop {
            let event = match queue.pop_front() {
                Some(event) => event,
                None => source()?,
            };
            match self.process(event, queue) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => continue,
                Err(err) => {
                    error!("Handler failed, skipping event: {}", err);
                    continue;
                }
            }
        }
    }
}

fn dispatch(
    handler: &mut dyn ContentHandler,
    event: Event,
    queue: &mut InjectionQueue,
) -> TbrResult<Option<Event>> {
    match event {
        Event::Query(e) => handler.on_query(e, queue),
        Event::Rows(e) => handler.on_rows(e, queue),
        Event::TableMap(e) => handler.on_table_map(e, queue),
        Event::Xid(e) => handler.on_xid(e, queue),
        Event::UserVar(e) => handler.on_user_var(e, queue),
        Event::Incident(e) => handler.on_incident(e, queue),
        Event::Rotate(e) => handler.on_rotate(e, queue),
        Event::IntVar(e) => handler.on_int_var(e, queue),
        Event::Gtid(e) => handler.on_gtid(e, queue),
        other => handler.on_other(other, queue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use binlog::events::event_header::Header;
    use binlog::events::protocol::xid_event::XidEvent;

    use common::err::TbrError;

    fn xid_event(xid: u64) -> Event {
        Event::Xid(XidEvent {
            header: Header::new(0, 16, 1, 27, 100 + xid as u32, 0),
            xid,
        })
    }

    fn query_event(sql: &str) -> Event {
        Event::Query(binlog::events::protocol::query_event::QueryEvent {
            header: Header::new(0, 2, 1, 100, 50, 0),
            thread_id: 1,
            exec_time: 0,
            error_code: 0,
            status_vars: vec![],
            db_name: "db".to_string(),
            sql: sql.to_string(),
        })
    }

    /// Passes everything through untouched.
    struct Identity;
    impl ContentHandler for Identity {}

    /// Consumes every Xid event.
    struct XidEater {
        eaten: usize,
    }
    impl ContentHandler for XidEater {
        fn on_xid(&mut self, _: XidEvent, _: &mut InjectionQueue) -> TbrResult<Option<Event>> {
            self.eaten += 1;
            Ok(None)
        }
    }

    /// Injects a synthetic query whenever it sees an Xid.
    struct InjectOnXid;
    impl ContentHandler for InjectOnXid {
        fn on_xid(&mut self, event: XidEvent, queue: &mut InjectionQueue) -> TbrResult<Option<Event>> {
            queue.push_back(query_event("injected"));
            Ok(Some(Event::Xid(event)))
        }
    }

    /// Fails on queries.
    struct FailingHandler;
    impl ContentHandler for FailingHandler {
        fn on_query(&mut self, _: QueryEvent, _: &mut InjectionQueue) -> TbrResult<Option<Event>> {
            Err(TbrError::MalformedEvent("boom".to_string()))
        }
    }

    #[test]
    fn identity_then_eater_consumes_xids_only() {
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(Box::new(Identity));
        pipeline.add(Box::new(XidEater { eaten: 0 }));

        let mut wire = vec![query_event("a"), xid_event(1), query_event("b"), xid_event(2)];
        wire.reverse();
        let mut source = move || wire.pop();

        let mut queue = InjectionQueue::new();
        let mut delivered = Vec::new();
        while let Some(event) = pipeline.next_delivered(&mut queue, &mut source) {
            delivered.push(event);
        }

        // every non-Xid event exactly once, in order; no Xid observed
        assert_eq!(delivered.len(), 2);
        match (&delivered[0], &delivered[1]) {
            (Event::Query(a), Event::Query(b)) => {
                assert_eq!(a.sql, "a");
                assert_eq!(b.sql, "b");
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[test]
    fn injected_events_are_delivered_before_next_wire_event() {
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(Box::new(InjectOnXid));

        let mut wire = vec![xid_event(1), query_event("after")];
        wire.reverse();
        let mut source = move || wire.pop();

        let mut queue = InjectionQueue::new();
        let mut names = Vec::new();
        while let Some(event) = pipeline.next_delivered(&mut queue, &mut source) {
            names.push(match event {
                Event::Xid(_) => "xid".to_string(),
                Event::Query(q) => q.sql,
                other => other.get_type_name().to_string(),
            });
        }

        // W_k, then the injection, then W_{k+1}
        assert_eq!(names, vec!["xid", "injected", "after"]);
    }

    #[test]
    fn handler_error_skips_the_event_and_continues() {
        let mut pipeline = HandlerPipeline::new();
        pipeline.add(Box::new(FailingHandler));

        let mut wire = vec![query_event("bad"), xid_event(9)];
        wire.reverse();
        let mut source = move || wire.pop();

        let mut queue = InjectionQueue::new();
        let first = pipeline.next_delivered(&mut queue, &mut source);
        match first {
            Some(Event::Xid(x)) => assert_eq!(x.xid, 9),
            other => panic!("expected the xid to survive, got {:?}", other),
        }
        assert!(pipeline.next_delivered(&mut queue, &mut source).is_none());
    }

    #[test]
    fn replace_changes_the_event() {
        struct Replacer;
        impl ContentHandler for Replacer {
            fn on_query(
                &mut self,
                mut event: QueryEvent,
                _: &mut InjectionQueue,
            ) -> TbrResult<Option<Event>> {
                event.sql = "rewritten".to_string();
                Ok(Some(Event::Query(event)))
            }
        }

        let mut pipeline = HandlerPipeline::new();
        pipeline.add(Box::new(Replacer));
        let mut queue = InjectionQueue::new();
        match pipeline.process(query_event("original"), &mut queue).unwrap() {
            Some(Event::Query(q)) => assert_eq!(q.sql, "rewritten"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
