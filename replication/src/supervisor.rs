use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use common::config::{ListenerSpec, ReplicationConfig};
use common::err::{TbrError, TbrResult};
use common::log::TracingFactory;

use binlog::gtid::Gtid;

use crate::listener::{ListenerController, ReplicationListener};
use crate::persister::{MetadataPersister, MetadataStore};
use crate::registry::{ConsistencyRecord, ConsistencyRegistry, CursorBoard};

struct ListenerRuntime {
    spec: ListenerSpec,
    controller: ListenerController,
    worker: JoinHandle<TbrResult<()>>,
}

/// Owns everything the replication core needs at runtime: the shared
/// consistency registry, the per-server cursors, one listener thread
/// per upstream server and the background persister. Constructed at
/// startup, dropped at shutdown; there is no global state.
pub struct ReplicationSupervisor {
    config: ReplicationConfig,
    registry: Arc<ConsistencyRegistry>,
    cursors: Arc<CursorBoard>,
    listeners: HashMap<u32, ListenerRuntime>,
    persister: Option<MetadataPersister>,
}

impl ReplicationSupervisor {
    /// Register a listener for every configured server, seed the
    /// registry from the metadata store, and start streaming.
    ///
    /// A listener that fails to spawn fails init; its spec carries the
    /// error message. A failed metadata load is non-fatal: the registry
    /// starts empty.
    pub fn init(mut config: ReplicationConfig) -> TbrResult<ReplicationSupervisor> {
        TracingFactory::init_for_trace_level(config.trace_level);

        let registry = Arc::new(ConsistencyRegistry::new());
        let cursors = Arc::new(CursorBoard::new());

        match MetadataStore::connect(&config.metadata) {
            Ok(mut store) => {
                if let Err(err) = store.ensure_schema() {
                    warn!("Metadata schema setup failed: {}", err);
                } else {
                    match store.load_consistency() {
                        Ok(records) => {
                            info!("Loaded {} consistency records from metadata", records.len());
                            registry.load(records);
                        }
                        Err(err) => warn!("Metadata consistency load failed: {}", err),
                    }
                    match store.load_server_cursors() {
                        Ok(loaded) => cursors.load(loaded),
                        Err(err) => warn!("Metadata cursor load failed: {}", err),
                    }
                }
            }
            Err(err) => warn!("Metadata store unavailable at startup: {}", err),
        }

        let persister = MetadataPersister::start(
            config.metadata.clone(),
            Duration::from_secs(config.persist_interval_secs),
            registry.clone(),
            cursors.clone(),
        );

        let mut supervisor = ReplicationSupervisor {
            registry,
            cursors,
            listeners: HashMap::new(),
            persister: Some(persister),
            config: ReplicationConfig {
                servers: Vec::new(),
                ..config.clone()
            },
        };

        for spec in config.servers.drain(..) {
            supervisor.spawn_listener(spec)?;
        }

        Ok(supervisor)
    }

    fn spawn_listener(&mut self, mut spec: ListenerSpec) -> TbrResult<()> {
        let listener_id = spec.listener_id;
        if self.listeners.contains_key(&listener_id) {
            let message = format!("Listener {} is already registered", listener_id);
            spec.error_message = Some(message.clone());
            return Err(TbrError::Config(message));
        }

        let built = ReplicationListener::new(
            spec.clone(),
            self.config.slave_server_id,
            self.registry.clone(),
            self.cursors.clone(),
        );
        let (listener, controller) = match built {
            Ok(parts) => parts,
            Err(err) => {
                spec.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        let worker = thread::Builder::new()
            .name(format!("tbr-listener-{}", listener_id))
            .spawn(move || {
                let result = listener.run();
                if let Err(err) = &result {
                    error!("Listener {} failed: {}", listener_id, err);
                }
                result
            })?;

        self.listeners.insert(
            listener_id,
            ListenerRuntime {
                spec,
                controller,
                worker,
            },
        );
        Ok(())
    }

    /// Stop the listener serving this spec's server and start a new one
    /// with the given coordinates. The stopped listener's terminal
    /// error, if any, lands in the spec's error slot.
    pub fn reconnect(&mut self, mut spec: ListenerSpec) -> TbrResult<()> {
        let existing = self
            .listeners
            .iter()
            .find(|(_, runtime)| runtime.spec.uri == spec.uri)
            .map(|(id, _)| *id);

        let Some(listener_id) = existing else {
            let message = format!("No active listener for {}", spec.uri);
            spec.error_message = Some(message.clone());
            return Err(TbrError::Config(message));
        };

        let runtime = self.listeners.remove(&listener_id).unwrap();
        runtime.controller.shutdown();
        match runtime.worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => spec.error_message = Some(err.to_string()),
            Err(_) => spec.error_message = Some("Listener thread panicked".to_string()),
        }

        self.spawn_listener(spec)
    }

    /// Reposition a running listener by file + offset. The coordinates
    /// are validated against the server before the session is touched.
    pub fn set_position(&self, listener_id: u32, file: &str, offset: u64) -> TbrResult<()> {
        self.controller(listener_id)?.set_position(file, offset)
    }

    /// Reposition a running listener by GTID.
    pub fn set_position_gtid(&self, listener_id: u32, gtid: &Gtid) -> TbrResult<()> {
        self.controller(listener_id)?.set_position_gtid(gtid)
    }

    fn controller(&self, listener_id: u32) -> TbrResult<&ListenerController> {
        self.listeners
            .get(&listener_id)
            .map(|runtime| &runtime.controller)
            .ok_or_else(|| TbrError::Config(format!("No listener with id {}", listener_id)))
    }

    /// Router-facing consistency lookup.
    pub fn query(&self, db_table: &str, server_index: u32) -> Option<ConsistencyRecord> {
        self.registry.query(db_table, server_index)
    }

    pub fn registry(&self) -> Arc<ConsistencyRegistry> {
        self.registry.clone()
    }

    /// Stop every listener, run a final metadata flush, and return the
    /// first terminal listener error, if any.
    pub fn shutdown(mut self) -> TbrResult<Option<String>> {
        info!("Supervisor shutting down {} listeners", self.listeners.len());

        for runtime in self.listeners.values() {
            runtime.controller.shutdown();
        }

        let mut first_error = None;
        for (listener_id, runtime) in self.listeners.drain() {
            let outcome = match runtime.worker.join() {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("Listener {}: {}", listener_id, err)),
                Err(_) => Some(format!("Listener {} thread panicked", listener_id)),
            };
            if let Some(message) = outcome {
                error!("{}", message);
                first_error.get_or_insert(message);
            }
        }

        if let Some(persister) = self.persister.take() {
            persister.stop();
        }

        Ok(first_error)
    }
}
