pub mod b_type;
pub mod column;
pub mod events;
pub mod gtid;
pub mod tbr_parser;
pub mod utils;
