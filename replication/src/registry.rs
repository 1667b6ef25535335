use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use binlog::events::event_header::Header;
use binlog::gtid::{Gtid, ServerType};

/// Per (table, server) replication cursor: the latest binlog position
/// and GTID at which the table was observed to change on that server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyRecord {
    /// Fully qualified `db.table`, the registry key.
    pub db_table: String,
    pub server_id: u32,
    pub binlog_pos: u64,
    pub gtid_known: bool,
    pub gtid: Gtid,
}

/// Latest per-server stream cursor, persisted alongside the table
/// records so a restart can resume where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerCursor {
    pub server_id: u32,
    pub binlog_file: String,
    pub binlog_pos: u64,
    pub gtid: Gtid,
    pub gtid_known: bool,
    pub server_type: ServerType,
}

/// Thread safe map of consistency records.
///
/// Keyed on `db.table`; the same table can be tracked on several
/// servers, so each key holds one record per server in first-observed
/// order. That order is what `query`'s `server_index` addresses. Writers
/// are the listener threads, readers are request-time router lookups, so
/// one coarse lock is enough.
#[derive(Debug, Default)]
pub struct ConsistencyRegistry {
    inner: Mutex<HashMap<String, Vec<ConsistencyRecord>>>,
}

impl ConsistencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record for (db_table, header.server_id). The binlog
    /// position recorded is the header's next_position, i.e. the first
    /// offset from which the change is fully contained.
    pub fn update(&self, header: &Header, db_table: &str, gtid_known: bool, gtid: &Gtid) {
        let mut map = self.inner.lock().unwrap();
        let records = map.entry(db_table.to_string()).or_default();

        match records.iter_mut().find(|r| r.server_id == header.server_id) {
            Some(record) => {
                record.binlog_pos = header.next_position as u64;
                record.gtid = gtid.clone();
                record.gtid_known = gtid_known;
            }
            None => records.push(ConsistencyRecord {
                db_table: db_table.to_string(),
                server_id: header.server_id,
                binlog_pos: header.next_position as u64,
                gtid_known,
                gtid: gtid.clone(),
            }),
        }
    }

    /// The `server_index`-th record (in first-observed order) among the
    /// records sharing `db_table`. Out of range yields None.
    pub fn query(&self, db_table: &str, server_index: u32) -> Option<ConsistencyRecord> {
        let map = self.inner.lock().unwrap();
        map.get(db_table)
            .and_then(|records| records.get(server_index as usize))
            .cloned()
    }

    /// Copy of every record, for the persister.
    pub fn snapshot(&self) -> Vec<ConsistencyRecord> {
        let map = self.inner.lock().unwrap();
        let mut records: Vec<ConsistencyRecord> = map.values().flatten().cloned().collect();
        // stable order keeps the flush output deterministic
        records.sort_by(|a, b| (&a.db_table, a.server_id).cmp(&(&b.db_table, b.server_id)));
        records
    }

    /// Seed the registry from the metadata store at startup.
    pub fn load(&self, records: Vec<ConsistencyRecord>) {
        let mut map = self.inner.lock().unwrap();
        for record in records {
            let entry = map.entry(record.db_table.clone()).or_default();
            if !entry.iter().any(|r| r.server_id == record.server_id) {
                entry.push(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared per-server cursors, keyed by the master's server id. Listener
/// threads publish here; the persister snapshots for the servers table.
#[derive(Debug, Default)]
pub struct CursorBoard {
    inner: Mutex<HashMap<u32, ServerCursor>>,
}

impl CursorBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, cursor: ServerCursor) {
        let mut map = self.inner.lock().unwrap();
        map.insert(cursor.server_id, cursor);
    }

    pub fn get(&self, server_id: u32) -> Option<ServerCursor> {
        self.inner.lock().unwrap().get(&server_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<ServerCursor> {
        let mut cursors: Vec<ServerCursor> = self.inner.lock().unwrap().values().cloned().collect();
        cursors.sort_by_key(|c| c.server_id);
        cursors
    }

    pub fn load(&self, cursors: Vec<ServerCursor>) {
        let mut map = self.inner.lock().unwrap();
        for cursor in cursors {
            map.entry(cursor.server_id).or_insert(cursor);
        }
    }
}
