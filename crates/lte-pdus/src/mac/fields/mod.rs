pub mod bsr;
pub mod phr;
