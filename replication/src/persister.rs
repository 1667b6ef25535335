use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use common::config::{MetadataConfig, ServerUri};
use common::err::{TbrError, TbrResult};

use binlog::gtid::{Gtid, ServerType};

use connection::conn::connection::Connection;
use connection::conn::connection_options::ConnectionOptions;

use crate::registry::{ConsistencyRecord, ConsistencyRegistry, CursorBoard, ServerCursor};

/// Metadata connections must not hang the flush thread forever.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Access to the two metadata tables. Rides the same wire client the
/// listeners use; the schema is created on first start when missing.
pub struct MetadataStore {
    conn: Connection,
    database: String,
}

impl MetadataStore {
    pub fn connect(config: &MetadataConfig) -> TbrResult<MetadataStore> {
        let uri = ServerUri::parse(&config.uri)?;
        let mut options = ConnectionOptions::from_uri(&uri, 0);
        options.read_timeout = Some(METADATA_TIMEOUT);

        let mut conn = Connection::new(options);
        conn.connect()?;
        Ok(MetadataStore {
            conn,
            database: config.database.clone(),
        })
    }

    /// Create the metadata database and both tables when missing.
    pub fn ensure_schema(&mut self) -> TbrResult<()> {
        let db = &self.database;
        self.conn
            .execute(
                &format!("CREATE DATABASE IF NOT EXISTS {}", db),
                "Creating metadata database",
            )
            .map_err(persistence)?;

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}.TABLE_REPLICATION_CONSISTENCY(\
                     DB_TABLE_NAME VARCHAR(255) NOT NULL,\
                     SERVER_ID INT NOT NULL,\
                     GTID VARBINARY(255),\
                     BINLOG_POS BIGINT NOT NULL,\
                     GTID_KNOWN INT,\
                     PRIMARY KEY(DB_TABLE_NAME, SERVER_ID)) ENGINE=InnoDB",
                    db
                ),
                "Creating consistency table",
            )
            .map_err(persistence)?;

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {}.TABLE_REPLICATION_SERVERS(\
                     SERVER_ID INT NOT NULL,\
                     BINLOG_POS BIGINT NOT NULL,\
                     GTID VARBINARY(255),\
                     GTID_KNOWN INT,\
                     SERVER_TYPE INT,\
                     PRIMARY KEY(SERVER_ID)) ENGINE=InnoDB",
                    db
                ),
                "Creating servers table",
            )
            .map_err(persistence)?;

        Ok(())
    }

    pub fn load_consistency(&mut self) -> TbrResult<Vec<ConsistencyRecord>> {
        let rows = self
            .conn
            .query(&format!(
                "SELECT DB_TABLE_NAME, SERVER_ID, GTID, BINLOG_POS, GTID_KNOWN \
                 FROM {}.TABLE_REPLICATION_CONSISTENCY",
                self.database
            ))
            .map_err(persistence)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let db_table = cell(&row, 0)?;
            let server_id: u32 = cell(&row, 1)?.parse()?;
            let gtid_text = row.get(2).cloned().flatten().unwrap_or_default();
            let binlog_pos: u64 = cell(&row, 3)?.parse()?;
            let gtid_known = cell(&row, 4)?.parse::<i32>()? != 0;

            records.push(ConsistencyRecord {
                db_table,
                server_id,
                binlog_pos,
                gtid_known: gtid_known && !gtid_text.is_empty(),
                gtid: parse_stored_gtid(&gtid_text),
            });
        }
        Ok(records)
    }

    pub fn load_server_cursors(&mut self) -> TbrResult<Vec<ServerCursor>> {
        let rows = self
            .conn
            .query(&format!(
                "SELECT SERVER_ID, BINLOG_POS, GTID, GTID_KNOWN, SERVER_TYPE \
                 FROM {}.TABLE_REPLICATION_SERVERS",
                self.database
            ))
            .map_err(persistence)?;

        let mut cursors = Vec::with_capacity(rows.len());
        for row in rows {
            let server_id: u32 = cell(&row, 0)?.parse()?;
            let binlog_pos: u64 = cell(&row, 1)?.parse()?;
            let gtid_text = row.get(2).cloned().flatten().unwrap_or_default();
            let gtid_known = cell(&row, 3)?.parse::<i32>()? != 0;
            let server_type = ServerType::from_code(cell(&row, 4)?.parse()?);

            cursors.push(ServerCursor {
                server_id,
                binlog_file: String::new(),
                binlog_pos,
                gtid: parse_stored_gtid(&gtid_text),
                gtid_known: gtid_known && !gtid_text.is_empty(),
                server_type,
            });
        }
        Ok(cursors)
    }

    /// Upsert every record whose position advanced since the last
    /// flush. Returns how many rows were written.
    pub fn save_consistency(
        &mut self,
        records: &[ConsistencyRecord],
        last_flushed: &mut HashMap<(String, u32), u64>,
    ) -> TbrResult<usize> {
        let mut written = 0;
        for record in records {
            let key = (record.db_table.clone(), record.server_id);
            if last_flushed.get(&key) == Some(&record.binlog_pos) {
                continue;
            }

            let sql = format!(
                "INSERT INTO {}.TABLE_REPLICATION_CONSISTENCY\
                 (DB_TABLE_NAME, SERVER_ID, GTID, BINLOG_POS, GTID_KNOWN) \
                 VALUES ('{}', {}, '{}', {}, {}) \
                 ON DUPLICATE KEY UPDATE GTID=VALUES(GTID), \
                 BINLOG_POS=VALUES(BINLOG_POS), GTID_KNOWN=VALUES(GTID_KNOWN)",
                self.database,
                sql_escape(&record.db_table),
                record.server_id,
                sql_escape(&record.gtid.string()),
                record.binlog_pos,
                i32::from(record.gtid_known),
            );
            self.conn
                .execute(&sql, "Upserting consistency record")
                .map_err(persistence)?;

            last_flushed.insert(key, record.binlog_pos);
            written += 1;
        }
        Ok(written)
    }

    pub fn save_server_cursors(&mut self, cursors: &[ServerCursor]) -> TbrResult<()> {
        for cursor in cursors {
            let sql = format!(
                "INSERT INTO {}.TABLE_REPLICATION_SERVERS\
                 (SERVER_ID, BINLOG_POS, GTID, GTID_KNOWN, SERVER_TYPE) \
                 VALUES ({}, {}, '{}', {}, {}) \
                 ON DUPLICATE KEY UPDATE BINLOG_POS=VALUES(BINLOG_POS), \
                 GTID=VALUES(GTID), GTID_KNOWN=VALUES(GTID_KNOWN), \
                 SERVER_TYPE=VALUES(SERVER_TYPE)",
                self.database,
                cursor.server_id,
                cursor.binlog_pos,
                sql_escape(&cursor.gtid.string()),
                i32::from(cursor.gtid_known),
                cursor.server_type as i32,
            );
            self.conn
                .execute(&sql, "Upserting server cursor")
                .map_err(persistence)?;
        }
        Ok(())
    }
}

/// Background flush thread. Snapshots are taken under the registry lock,
/// the database writes happen outside it. Write failures are logged and
/// retried on the next interval; they never block the listeners.
pub struct MetadataPersister {
    signal: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl MetadataPersister {
    pub fn start(
        config: MetadataConfig,
        interval: Duration,
        registry: Arc<ConsistencyRegistry>,
        cursors: Arc<CursorBoard>,
    ) -> MetadataPersister {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = signal.clone();

        let worker = thread::Builder::new()
            .name("tbr-persister".to_string())
            .spawn(move || {
                flush_loop(config, interval, registry, cursors, thread_signal);
            })
            .expect("spawning the persister thread");

        MetadataPersister {
            signal,
            worker: Some(worker),
        }
    }

    /// Stop the flush loop; a final flush runs before the thread exits.
    pub fn stop(mut self) {
        let (stop, condvar) = &*self.signal;
        *stop.lock().unwrap() = true;
        condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn flush_loop(
    config: MetadataConfig,
    interval: Duration,
    registry: Arc<ConsistencyRegistry>,
    cursors: Arc<CursorBoard>,
    signal: Arc<(Mutex<bool>, Condvar)>,
) {
    let mut store: Option<MetadataStore> = None;
    let mut last_flushed: HashMap<(String, u32), u64> = HashMap::new();

    loop {
        let stopping = {
            let (stop, condvar) = &*signal;
            let guard = stop.lock().unwrap();
            let (guard, _) = condvar.wait_timeout(guard, interval).unwrap();
            *guard
        };

        if store.is_none() {
            match MetadataStore::connect(&config) {
                Ok(mut fresh) => match fresh.ensure_schema() {
                    Ok(()) => store = Some(fresh),
                    Err(err) => warn!("Metadata schema setup failed: {}", err),
                },
                Err(err) => warn!("Metadata connection failed: {}", err),
            }
        }

        if let Some(active) = store.as_mut() {
            match flush_once(active, &registry, &cursors, &mut last_flushed) {
                Ok(written) if written > 0 => {
                    debug!("Persisted {} consistency records", written)
                }
                Ok(_) => {}
                Err(err) => {
                    // drop the connection, reconnect on the next tick
                    warn!("Metadata flush failed, will retry: {}", err);
                    store = None;
                }
            }
        }

        if stopping {
            info!("Persister stopping");
            return;
        }
    }
}

fn flush_once(
    store: &mut MetadataStore,
    registry: &ConsistencyRegistry,
    cursors: &CursorBoard,
    last_flushed: &mut HashMap<(String, u32), u64>,
) -> TbrResult<usize> {
    let written = store.save_consistency(&registry.snapshot(), last_flushed)?;
    store.save_server_cursors(&cursors.snapshot())?;
    Ok(written)
}

fn persistence(err: TbrError) -> TbrError {
    TbrError::Persistence(err.to_string())
}

fn cell(row: &[Option<String>], index: usize) -> TbrResult<String> {
    row.get(index)
        .cloned()
        .flatten()
        .ok_or_else(|| TbrError::Persistence(format!("NULL in metadata column {}", index)))
}

/// Stored GTIDs are canonical strings; the dialect is recovered from
/// their shape.
fn parse_stored_gtid(text: &str) -> Gtid {
    if text.is_empty() {
        return Gtid::default();
    }
    let parsed = if text.contains(':') {
        Gtid::parse_mysql(text)
    } else {
        Gtid::parse_mariadb(text)
    };
    parsed.unwrap_or_default()
}

fn sql_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "''")
}
