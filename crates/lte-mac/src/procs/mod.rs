pub mod proc_bsr;
pub mod proc_phr;
pub mod proc_sr;

pub use proc_bsr::{BsrFormat, BsrProc, BsrReport, BsrTrigger};
pub use proc_phr::PhrProc;
pub use proc_sr::SrProc;
