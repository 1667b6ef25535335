use num_enum::TryFromPrimitive;
use serde::Serialize;

/// Binlog event type codes.
///
/// See <https://mariadb.com/kb/en/2-binlog-event-header/> for the common
/// header and the per-type documentation linked from it. MariaDB and MySQL
/// share the numbering below 160; the MariaDB GTID event lives in the
/// MariaDB specific range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum LogEventType {
    UnknownEvent = 0,
    StartEventV3 = 1,
    /// One logged statement. Produced by both statement and row based
    /// replication (DDL is always statement based).
    QueryEvent = 2,
    StopEvent = 3,
    /// The binlog switched to a new file.
    RotateEvent = 4,
    /// auto_increment bookkeeping for statement based replication.
    IntvarEvent = 5,
    LoadEvent = 6,
    SlaveEvent = 7,
    CreateFileEvent = 8,
    AppendBlockEvent = 9,
    ExecLoadEvent = 10,
    DeleteFileEvent = 11,
    NewLoadEvent = 12,
    RandEvent = 13,
    UserVarEvent = 14,
    /// Describes the format of every event that follows in this file.
    FormatDescriptionEvent = 15,
    /// Transaction commit.
    XidEvent = 16,
    BeginLoadQueryEvent = 17,
    ExecuteLoadQueryEvent = 18,
    /// Maps a numeric table id to (database, table) for the row events
    /// that follow.
    TableMapEvent = 19,
    PreGaWriteRowsEvent = 20,
    PreGaUpdateRowsEvent = 21,
    PreGaDeleteRowsEvent = 22,
    WriteRowsEventV1 = 23,
    UpdateRowsEventV1 = 24,
    DeleteRowsEventV1 = 25,
    /// Something out of the ordinary happened on the master.
    IncidentEvent = 26,
    HeartbeatLogEvent = 27,
    IgnorableLogEvent = 28,
    RowsQueryLogEvent = 29,
    WriteRowsEvent = 30,
    UpdateRowsEvent = 31,
    DeleteRowsEvent = 32,
    GtidMysqlEvent = 33,
    AnonymousGtidEvent = 34,
    PreviousGtidsEvent = 35,

    GtidMariadbEvent = 162,
}

impl LogEventType {
    pub fn is_rows_event(&self) -> bool {
        matches!(
            self,
            LogEventType::WriteRowsEventV1
                | LogEventType::UpdateRowsEventV1
                | LogEventType::DeleteRowsEventV1
                | LogEventType::WriteRowsEvent
                | LogEventType::UpdateRowsEvent
                | LogEventType::DeleteRowsEvent
        )
    }

    /// Rows events numbered 30..=32 carry a variable length extra-data
    /// block in the post-header.
    pub fn is_rows_v2(&self) -> bool {
        matches!(
            self,
            LogEventType::WriteRowsEvent
                | LogEventType::UpdateRowsEvent
                | LogEventType::DeleteRowsEvent
        )
    }
}
