pub mod buffer_pool;
pub mod demux;
pub mod pdu_thread;

pub use buffer_pool::BufferPool;
pub use demux::{ContentionResolutionObserver, Demux, QueuedPdu};
pub use pdu_thread::{PduEvent, PduProcessor};
