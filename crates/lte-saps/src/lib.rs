//! Service access points between the MAC and its neighbouring layers.
//!
//! The PHY, RLC and RRC are only seen through the traits defined here. Grants and
//! action structs are the primitives exchanged with the PHY on every TTI.

pub mod metrics;
pub mod phy;
pub mod rlc;
pub mod rrc;

pub use metrics::MacMetrics;
pub use phy::*;
pub use rlc::RlcInterfaceMac;
pub use rrc::RrcInterfaceMac;
