pub mod end_of_file_packet;
pub mod error_packet;
pub mod handshake_packet;
pub mod ok_packet;
pub mod response_type;
pub mod result_set_row_packet;

pub use error_packet::check_error_packet;
