pub mod tbr_error;

pub use tbr_error::{Needed, TbrError};

pub type TbrResult<T> = Result<T, TbrError>;
