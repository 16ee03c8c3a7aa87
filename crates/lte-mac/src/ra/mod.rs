pub mod proc_ra;
pub mod ra_fsm;

pub use proc_ra::{ContentionResolver, RaCtx, RaProc};
pub use ra_fsm::{PreambleGroup, RaState};
