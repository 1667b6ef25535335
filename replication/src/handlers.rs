use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use common::err::TbrResult;

use binlog::events::event::Event;
use binlog::events::protocol::gtid_event::GtidEvent;
use binlog::events::protocol::query_event::QueryEvent;
use binlog::events::protocol::rows_event::RowsEvent;
use binlog::events::protocol::table_map_event::TableMapEvent;
use binlog::gtid::{Gtid, ServerType};
use binlog::tbr_parser::parse_table_names;

use crate::pipeline::{ContentHandler, InjectionQueue};
use crate::registry::{ConsistencyRegistry, CursorBoard};

/// The handler that keeps the consistency registry current.
///
/// Tracks the replication context that row and query events depend on:
/// the current GTID (set by GTID events until the next one) and the
/// table_id → `db.table` mapping established by TABLE_MAP events. Every
/// DML/DDL it can attribute to a table upserts that table's record.
/// All events pass through unchanged.
pub struct RegistryUpdateHandler {
    registry: Arc<ConsistencyRegistry>,
    cursors: Arc<CursorBoard>,
    server_type: ServerType,

    current_gtid: Gtid,
    gtid_known: bool,
    tid_to_table: HashMap<u64, String>,
}

impl RegistryUpdateHandler {
    pub fn new(
        registry: Arc<ConsistencyRegistry>,
        cursors: Arc<CursorBoard>,
        server_type: ServerType,
    ) -> Self {
        RegistryUpdateHandler {
            registry,
            cursors,
            server_type,
            current_gtid: Gtid::default(),
            gtid_known: false,
            tid_to_table: HashMap::new(),
        }
    }

    fn publish_gtid(&self, server_id: u32) {
        if let Some(mut cursor) = self.cursors.get(server_id) {
            cursor.gtid = self.current_gtid.clone();
            cursor.gtid_known = self.gtid_known;
            self.cursors.publish(cursor);
        }
    }
}

impl ContentHandler for RegistryUpdateHandler {
    fn on_gtid(&mut self, event: GtidEvent, _: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        // the stored dialect must match the producing server
        if event.gtid.server_type() == self.server_type {
            self.current_gtid = event.gtid.clone();
            self.gtid_known = true;
            self.publish_gtid(event.header.server_id);
            trace!("Transaction group {}", self.current_gtid);
        } else {
            warn!(
                "Ignoring {} gtid {} from a {} server",
                event.gtid.server_type().name(),
                event.gtid,
                self.server_type.name()
            );
        }
        Ok(Some(Event::Gtid(event)))
    }

    fn on_table_map(
        &mut self,
        event: TableMapEvent,
        _: &mut InjectionQueue,
    ) -> TbrResult<Option<Event>> {
        self.tid_to_table
            .insert(event.table_id, event.qualified_name());
        Ok(Some(Event::TableMap(event)))
    }

    fn on_rows(&mut self, event: RowsEvent, _: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        match self.tid_to_table.get(&event.table_id) {
            Some(db_table) => {
                self.registry
                    .update(&event.header, db_table, self.gtid_known, &self.current_gtid);
                debug!(
                    "server {} table {} at {} gtid {}",
                    event.header.server_id,
                    db_table,
                    event.header.next_position,
                    self.current_gtid
                );
            }
            None => {
                warn!(
                    "Rows event for unmapped table id {} (server {})",
                    event.table_id, event.header.server_id
                );
            }
        }
        Ok(Some(Event::Rows(event)))
    }

    fn on_query(&mut self, event: QueryEvent, _: &mut InjectionQueue) -> TbrResult<Option<Event>> {
        if let Some(tables) = parse_table_names(&event.sql) {
            for table in tables {
                // an empty database means the statement ran in the
                // QUERY event's current schema
                let db = if table.db.is_empty() {
                    event.db_name.as_str()
                } else {
                    table.db.as_str()
                };
                let db_table = format!("{}.{}", db, table.table);
                self.registry
                    .update(&event.header, &db_table, self.gtid_known, &self.current_gtid);
                debug!(
                    "server {} statement touched {} at {}",
                    event.header.server_id, db_table, event.header.next_position
                );
            }
        }
        Ok(Some(Event::Query(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use binlog::b_type::LogEventType;
    use binlog::events::event_header::Header;
    use binlog::events::protocol::rows_event::RowsKind;

    fn harness() -> (Arc<ConsistencyRegistry>, Arc<CursorBoard>, RegistryUpdateHandler) {
        let registry = Arc::new(ConsistencyRegistry::new());
        let cursors = Arc::new(CursorBoard::new());
        let handler =
            RegistryUpdateHandler::new(registry.clone(), cursors.clone(), ServerType::MariaDb);
        (registry, cursors, handler)
    }

    fn header(event_type: LogEventType, server_id: u32, next_position: u32) -> Header {
        Header::new(0, event_type as u8, server_id, 100, next_position, 0)
    }

    fn rows_event(table_id: u64, server_id: u32, next_position: u32) -> RowsEvent {
        RowsEvent {
            header: header(LogEventType::WriteRowsEventV1, server_id, next_position),
            kind: RowsKind::Write,
            table_id,
            flags: 0,
            columns_number: 1,
            used_columns: vec![1],
            used_columns_update: None,
            rows: vec![],
        }
    }

    fn table_map(table_id: u64, db: &str, table: &str) -> TableMapEvent {
        TableMapEvent {
            header: header(LogEventType::TableMapEvent, 10, 200),
            table_id,
            flags: 0,
            database_name: db.to_string(),
            table_name: table.to_string(),
            columns_number: 1,
            column_types: vec![3],
            column_metadata: vec![0],
            null_bitmap: vec![0],
        }
    }

    fn gtid_event(domain: u32, server_id: u32, sequence: u64) -> GtidEvent {
        GtidEvent {
            header: header(LogEventType::GtidMariadbEvent, server_id, 150),
            gtid: Gtid::mariadb(domain, server_id, sequence),
            commit_flag: 0,
        }
    }

    #[test]
    fn rows_after_table_map_update_the_registry() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();

        handler.on_table_map(table_map(7, "db1", "t1"), &mut queue).unwrap();
        handler.on_rows(rows_event(7, 10, 256), &mut queue).unwrap();

        let record = registry.query("db1.t1", 0).unwrap();
        assert_eq!(record.server_id, 10);
        assert_eq!(record.binlog_pos, 256);
        assert!(!record.gtid_known);
    }

    #[test]
    fn gtid_context_is_attached_to_following_rows() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();

        handler.on_gtid(gtid_event(0, 10, 43), &mut queue).unwrap();
        handler.on_table_map(table_map(9, "db2", "t2"), &mut queue).unwrap();
        handler.on_rows(rows_event(9, 10, 900), &mut queue).unwrap();

        let record = registry.query("db2.t2", 0).unwrap();
        assert_eq!(record.binlog_pos, 900);
        assert!(record.gtid_known);
        assert_eq!(record.gtid.string(), "0-10-43");
    }

    #[test]
    fn mismatched_gtid_dialect_is_ignored() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();

        let mysql_gtid = GtidEvent {
            header: header(LogEventType::GtidMysqlEvent, 10, 150),
            gtid: Gtid::mysql([1u8; 16], 5),
            commit_flag: 1,
        };
        handler.on_gtid(mysql_gtid, &mut queue).unwrap();
        handler.on_table_map(table_map(1, "d", "t"), &mut queue).unwrap();
        handler.on_rows(rows_event(1, 10, 300), &mut queue).unwrap();

        let record = registry.query("d.t", 0).unwrap();
        assert!(!record.gtid_known);
    }

    #[test]
    fn query_events_update_via_table_name_parsing() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();

        let query = QueryEvent {
            header: header(LogEventType::QueryEvent, 10, 120),
            thread_id: 1,
            exec_time: 0,
            error_code: 0,
            status_vars: vec![],
            db_name: "db0".to_string(),
            sql: "UPDATE a.t1, t3 SET x=1".to_string(),
        };
        handler.on_query(query, &mut queue).unwrap();

        assert_eq!(registry.query("a.t1", 0).unwrap().binlog_pos, 120);
        // empty database resolves to the event's current schema
        assert_eq!(registry.query("db0.t3", 0).unwrap().binlog_pos, 120);
    }

    #[test]
    fn untracked_statements_leave_the_registry_alone() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();

        let query = QueryEvent {
            header: header(LogEventType::QueryEvent, 10, 120),
            thread_id: 1,
            exec_time: 0,
            error_code: 0,
            status_vars: vec![],
            db_name: "db0".to_string(),
            sql: "BEGIN".to_string(),
        };
        handler.on_query(query, &mut queue).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn unmapped_table_id_does_not_update() {
        let (registry, _, mut handler) = harness();
        let mut queue = InjectionQueue::new();
        handler.on_rows(rows_event(99, 10, 500), &mut queue).unwrap();
        assert!(registry.is_empty());
    }
}
