use lte_core::{MAX_TB, RntiType, Tti};

/// Token referring to a payload slot in the MAC buffer pool. The generation
/// makes a handle to a released slot detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHandle {
    pub slot: u32,
    pub generation: u32,
}

/// DL assignment decoded from PDCCH
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacGrantDl {
    pub rnti: u16,
    pub rnti_type: RntiType,
    pub tti: Tti,
    /// HARQ process signalled in the DCI
    pub pid: u32,
    pub n_bytes: [u32; MAX_TB],
    pub ndi: [bool; MAX_TB],
    /// None when the DCI carries no redundancy version (SI-RNTI)
    pub rv: [Option<u32>; MAX_TB],
    pub mcs: [u32; MAX_TB],
    pub tb_en: [bool; MAX_TB],
    pub is_sps_release: bool,
}

impl MacGrantDl {
    /// Single-TB grant, the common case
    pub fn new(rnti: u16, rnti_type: RntiType, tti: Tti, pid: u32, n_bytes: u32, ndi: bool, rv: u32) -> Self {
        MacGrantDl {
            rnti,
            rnti_type,
            tti,
            pid,
            n_bytes: [n_bytes, 0],
            ndi: [ndi, false],
            rv: [Some(rv), None],
            mcs: [0, 0],
            tb_en: [true, false],
            is_sps_release: false,
        }
    }
}

/// How the PHY should produce HARQ feedback for a DL TB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Report the decode result
    #[default]
    Generate,
    /// Send nothing (broadcast, or time alignment lost)
    Suppress,
    /// Temp-RNTI PDU: ACK only once the contention resolution identity matched
    PendingContentionResolution,
}

/// MAC decision for a DL grant, returned to the PHY
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TbActionDl {
    pub rnti: u16,
    pub decode_enabled: [bool; MAX_TB],
    /// Feedback to send when decoding is disabled
    pub default_ack: [bool; MAX_TB],
    pub ack_mode: AckMode,
    pub rv: [u32; MAX_TB],
    /// Where the PHY must write the decoded bytes
    pub payload: [Option<PayloadHandle>; MAX_TB],
    pub softbuffer_reset: [bool; MAX_TB],
}

/// UL grant, from PDCCH or from a random access response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacGrantUl {
    pub rnti: u16,
    pub rnti_type: RntiType,
    pub tti: Tti,
    pub n_bytes: u32,
    pub ndi: bool,
    pub rv: u32,
    pub is_from_rar: bool,
    pub has_cqi_request: bool,
}

impl MacGrantUl {
    pub fn new(rnti: u16, rnti_type: RntiType, tti: Tti, n_bytes: u32, ndi: bool) -> Self {
        MacGrantUl {
            rnti,
            rnti_type,
            tti,
            n_bytes,
            ndi,
            rv: 0,
            is_from_rar: false,
            has_cqi_request: false,
        }
    }
}

/// MAC decision for a UL TTI, returned to the PHY
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TbActionUl {
    pub tx_enabled: bool,
    pub expect_ack: bool,
    pub rnti: u16,
    pub rv: u32,
    /// Number of earlier transmissions of this TB
    pub current_tx_nb: u32,
    pub payload: Option<Vec<u8>>,
}
