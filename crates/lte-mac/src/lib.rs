//! LTE UE MAC sublayer, 36.321
//!
//! The `Mac` facade owns the HARQ entities, the random access procedure, Mux, Demux and
//! the BSR/SR/PHR procedures. `MacHandle` shares it between the PHY callback path and
//! the tick thread; received PDUs are handed to RLC from a separate PDU thread.

pub mod demux;
pub mod harq;
pub mod mac;
pub mod mac_handle;
pub mod mux;
pub mod procs;
pub mod ra;

pub use mac::Mac;
pub use mac_handle::MacHandle;
pub use ra::RaState;
