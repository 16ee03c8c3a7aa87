pub mod mux;

pub use mux::{LogicalChannel, Mux, MuxAccess};
