pub mod driver;
pub mod handlers;
pub mod listener;
pub mod persister;
pub mod pipeline;
pub mod registry;
pub mod supervisor;

pub use registry::{ConsistencyRecord, ConsistencyRegistry, CursorBoard, ServerCursor};
pub use supervisor::ReplicationSupervisor;
