//! LTE MAC PDU codec (36.321 §6.1, §6.2)
//!
//! DL-SCH and UL-SCH PDUs share one subheader format and differ only in their LCID
//! tables. The random access response has its own layout.

pub mod mac;
pub mod pdu_build_error;

pub use mac::enums::{DlSchLcid, SchLcid, UlSchLcid};
pub use mac::fields::{bsr, phr};
pub use mac::pdus::rar_pdu::{RarPdu, RarResponse};
pub use mac::pdus::sch_pdu::{SchSubpdu, parse_sch_pdu};
pub use mac::pdus::sch_pdu_builder::{SchPduBuilder, size_header_sdu};
pub use pdu_build_error::PduBuildErr;
