//! Core utilities for the LTE UE MAC
//!
//! This crate provides fundamental types and utilities used across the MAC stack:
//! - Tti for subframe timing with wrap-around at 10240
//! - RNTI types and the UE identity set
//! - MacTimer, the millisecond timer stepped once per TTI
//! - ByteReader for parsing received PDUs
//! - Common macros and debug utilities

pub mod byte_reader;
pub mod debug;
pub mod pdu_parse_error;
pub mod rnti;
pub mod timer;
pub mod tti;

// Re-export commonly used items
pub use byte_reader::ByteReader;
pub use pdu_parse_error::PduParseErr;
pub use rnti::*;
pub use timer::MacTimer;
pub use tti::{Tti, tti_interval};

/// Stack version, including the git revision when built from a checkout
pub const STACK_VERSION: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"),
    "-",
    git_version::git_version!(args = ["--always", "--dirty=-modified"], fallback = "unknown")
);

/// Number of HARQ processes in FDD, both directions
pub const NOF_HARQ_PROC: usize = 8;

/// Maximum number of transport blocks per subframe
pub const MAX_TB: usize = 2;

/// Number of logical channel groups for buffer status reporting
pub const NOF_LCG: usize = 4;
