use core::fmt;

use lte_core::Tti;

/// Backoff parameter values in ms, indexed by the 4-bit backoff indicator. 36.321 Table 7.2-1
pub const BACKOFF_TABLE: [u32; 16] = [0, 10, 20, 30, 40, 60, 80, 120, 160, 240, 320, 480, 960, 960, 960, 960];

/// DELTA_PREAMBLE in dB per PRACH preamble format. 36.321 Table 7.6-1
pub const DELTA_PREAMBLE_DB: [i32; 5] = [0, 0, -3, -3, 8];

/// Largest RAR transport block the UE will decode
pub const MAX_RAR_PDU_LEN: u32 = 2048;

/// Msg3 size assumed when RA is not started for a pending CCCH message
pub const DEFAULT_MSG_LEN_BITS: u32 = 56;

/// States of the random access procedure, 36.321 §5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaState {
    Idle,

    /// Parameters are read, counters rewound and the PRACH armed
    Initialization,

    /// A preamble and its group are chosen
    ResourceSelection,

    PreambleTransmission,

    /// Waiting for the PHY to report the TTI the preamble went out in
    PdcchSetup,

    /// Searching for the RAR on the RA-RNTI within the response window
    ResponseReception {
        ra_tti: Tti,
        ra_rnti: u16,
    },

    /// The attempt failed and the preamble counter was incremented. The backoff is
    /// drawn on the next step.
    ResponseError,

    /// `start` is filled in by the first step spent in this state
    BackoffWait {
        start: Option<Tti>,
        interval: u32,
    },

    /// Msg3 scheduled, waiting for the contention to be resolved
    ContentionResolution,

    /// RA succeeded. The PHY is told the final C-RNTI on the next step.
    Completion,

    CompletionDone,

    /// Preamble transmissions exhausted, reported to RRC
    RaProblem,
}

impl RaState {
    /// States from which a new procedure may be started
    pub fn is_restartable(&self) -> bool {
        matches!(self, RaState::Idle | RaState::CompletionDone | RaState::RaProblem)
    }

    /// States that are left within the same step they are entered
    pub(super) fn is_transient(&self) -> bool {
        matches!(
            self,
            RaState::Initialization | RaState::ResourceSelection | RaState::PreambleTransmission | RaState::Completion
        )
    }
}

impl fmt::Display for RaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RaState::Idle => "IDLE",
            RaState::Initialization => "INITIALIZATION",
            RaState::ResourceSelection => "RESOURCE_SELECTION",
            RaState::PreambleTransmission => "PREAMBLE_TRANSMISSION",
            RaState::PdcchSetup => "PDCCH_SETUP",
            RaState::ResponseReception { .. } => "RESPONSE_RECEPTION",
            RaState::ResponseError => "RESPONSE_ERROR",
            RaState::BackoffWait { .. } => "BACKOFF_WAIT",
            RaState::ContentionResolution => "CONTENTION_RESOLUTION",
            RaState::Completion => "COMPLETION",
            RaState::CompletionDone => "COMPLETION_DONE",
            RaState::RaProblem => "RA_PROBLEM",
        };
        f.write_str(name)
    }
}

/// Preamble group, 36.321 §5.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreambleGroup {
    #[default]
    A,
    B,
}

/// DELTA_PREAMBLE for a PRACH configuration index. Formats 0..3 take 16 indices each.
pub fn delta_preamble_db(prach_config_index: u32) -> i32 {
    DELTA_PREAMBLE_DB[(prach_config_index / 16) as usize % DELTA_PREAMBLE_DB.len()]
}
