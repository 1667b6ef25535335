pub mod authenticate_command;
pub mod command;
pub mod dump_binlog_command;
pub mod dump_binlog_gtid_command;
pub mod query_command;
pub mod register_slave_command;
