use std::sync::{Arc, RwLock};

use lte_core::{NOF_HARQ_PROC, NOF_LCG};

/// RACH-ConfigCommon, 36.331 §6.3.2
#[derive(Debug, Clone, PartialEq)]
pub struct CfgRach {
    pub nof_preambles: u32,
    /// Size of preamble group A. None means all preambles are in group A.
    pub nof_groupa_preambles: Option<u32>,
    /// Msg3 size threshold in bits above which group B is selected
    pub message_size_group_a: u32,
    /// dB
    pub power_ramping_step: i32,
    /// dBm
    pub preamble_initial_received_target_power: i32,
    pub preamble_trans_max: u32,
    /// Subframes
    pub response_window_size: u32,
    /// Subframes
    pub contention_resolution_timer: u32,
    pub max_harq_msg3_tx: u32,
    pub prach_config_index: u32,
}

impl Default for CfgRach {
    fn default() -> Self {
        Self {
            nof_preambles: 64,
            nof_groupa_preambles: None,
            message_size_group_a: 56,
            power_ramping_step: 2,
            preamble_initial_received_target_power: -104,
            preamble_trans_max: 10,
            response_window_size: 10,
            contention_resolution_timer: 64,
            max_harq_msg3_tx: 5,
            prach_config_index: 0,
        }
    }
}

impl CfgRach {
    /// Checked on load and again for every configuration pushed by RRC
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.nof_preambles == 0 || self.nof_preambles > 64 {
            return Err("rach nof_preambles must be in 1..=64");
        }
        if let Some(a) = self.nof_groupa_preambles {
            if a > self.nof_preambles {
                return Err("rach nof_groupa_preambles exceeds nof_preambles");
            }
        }
        if self.preamble_trans_max == 0 {
            return Err("rach preamble_trans_max must be at least 1");
        }
        if self.max_harq_msg3_tx == 0 {
            return Err("rach max_harq_msg3_tx must be at least 1");
        }
        if self.prach_config_index > 63 {
            return Err("rach prach_config_index must be in 0..=63");
        }
        Ok(())
    }
}

/// SchedulingRequestConfig
#[derive(Debug, Clone, PartialEq)]
pub struct CfgSr {
    pub dsr_trans_max: u32,
    /// Whether PUCCH resources for SR are configured
    pub pucch_sr_configured: bool,
}

impl Default for CfgSr {
    fn default() -> Self {
        Self { dsr_trans_max: 64, pucch_sr_configured: true }
    }
}

/// PHR-Config. Timers in subframes.
#[derive(Debug, Clone, PartialEq)]
pub struct CfgPhr {
    pub periodic_phr_timer: u32,
    pub prohibit_phr_timer: u32,
    /// dB
    pub dl_pathloss_change: f32,
}

impl Default for CfgPhr {
    fn default() -> Self {
        Self {
            periodic_phr_timer: 200,
            prohibit_phr_timer: 200,
            dl_pathloss_change: 3.0,
        }
    }
}

/// MAC-MainConfig. Timer values in subframes, 0 means infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct CfgMacMain {
    pub time_alignment_timer: u32,
    pub periodic_bsr_timer: u32,
    pub retx_bsr_timer: u32,
    /// PHR disabled when None
    pub phr: Option<CfgPhr>,
}

impl Default for CfgMacMain {
    fn default() -> Self {
        Self {
            time_alignment_timer: 0,
            periodic_bsr_timer: 0,
            retx_bsr_timer: 2560,
            phr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CfgHarq {
    /// maxHARQ-Tx for normal UL transmissions
    pub max_harq_tx: u32,
    /// HARQ processes per direction, excluding the DL broadcast process
    pub nof_harq_proc: usize,
    /// Subframes between an UL grant and the transmission it schedules
    pub ul_tti_offset: u32,
}

impl Default for CfgHarq {
    fn default() -> Self {
        Self {
            max_harq_tx: 5,
            nof_harq_proc: NOF_HARQ_PROC,
            ul_tti_offset: 4,
        }
    }
}

/// Payload buffer sizing
#[derive(Debug, Clone, PartialEq)]
pub struct CfgBuffers {
    /// Number of DL payload slots in the pool
    pub nof_dl_buffers: usize,
    /// Largest transport block accepted, bytes
    pub max_pdu_len: usize,
    /// Capacity of the Msg3 buffer, bytes
    pub msg3_buffer_len: usize,
}

impl Default for CfgBuffers {
    fn default() -> Self {
        Self {
            nof_dl_buffers: 64,
            max_pdu_len: 20000,
            msg3_buffer_len: 1024,
        }
    }
}

/// A logical channel set up at start, before any RRC reconfiguration
#[derive(Debug, Clone, PartialEq)]
pub struct CfgLogicalChannel {
    pub lcid: u32,
    pub lcg: u32,
    pub priority: u32,
    /// Prioritized bit rate in bytes per TTI, -1 means infinity
    pub pbr: i32,
    /// Bucket size duration in TTI
    pub bsd: u32,
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub debug_log: Option<String>,

    /// Fixed seed for preamble and backoff selection. Random when None.
    pub rng_seed: Option<u64>,

    pub mac_main: CfgMacMain,
    pub rach: CfgRach,
    pub sr: CfgSr,
    pub harq: CfgHarq,
    pub buffers: CfgBuffers,
    pub logical_channels: Vec<CfgLogicalChannel>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl StackConfig {
    pub fn new() -> Self {
        StackConfig {
            debug_log: None,
            rng_seed: None,
            mac_main: CfgMacMain::default(),
            rach: CfgRach::default(),
            sr: CfgSr::default(),
            harq: CfgHarq::default(),
            buffers: CfgBuffers::default(),
            // CCCH, always present
            logical_channels: vec![CfgLogicalChannel {
                lcid: 0,
                lcg: 0,
                priority: 1,
                pbr: -1,
                bsd: 0,
            }],
        }
    }

    /// Validate that all required configuration fields are properly set.
    pub fn validate(&self) -> Result<(), &str> {
        if let Err(e) = self.rach.validate() {
            return Err(e);
        }

        if self.harq.max_harq_tx == 0 {
            return Err("harq max_harq_tx must be at least 1");
        }
        if self.harq.nof_harq_proc == 0 || self.harq.nof_harq_proc > NOF_HARQ_PROC {
            return Err("harq nof_harq_proc must be in 1..=8");
        }
        if self.harq.ul_tti_offset == 0 {
            return Err("harq ul_tti_offset must be nonzero");
        }

        if self.buffers.nof_dl_buffers < 2 {
            return Err("buffers nof_dl_buffers must be at least 2");
        }
        if self.buffers.msg3_buffer_len == 0 || self.buffers.max_pdu_len < self.buffers.msg3_buffer_len {
            return Err("buffers max_pdu_len must hold at least a Msg3");
        }

        for (i, lc) in self.logical_channels.iter().enumerate() {
            if lc.lcid > 10 {
                return Err("logical channel lcid must be in 0..=10");
            }
            if lc.lcg as usize >= NOF_LCG {
                return Err("logical channel lcg must be in 0..=3");
            }
            if lc.pbr < -1 {
                return Err("logical channel pbr must be -1 or positive");
            }
            if self.logical_channels[..i].iter().any(|other| other.lcid == lc.lcid) {
                return Err("duplicate logical channel lcid");
            }
        }

        Ok(())
    }
}

/// Mutable, stack-editable state (lock-protected).
/// Seeded from the static configuration and overwritten on RRC reconfiguration.
#[derive(Debug, Clone, Default)]
pub struct StackState {
    pub mac_main: CfgMacMain,
    pub rach: CfgRach,
    pub sr: CfgSr,
    pub harq: CfgHarq,
}

impl StackState {
    pub fn from_config(cfg: &StackConfig) -> Self {
        Self {
            mac_main: cfg.mac_main.clone(),
            rach: cfg.rach.clone(),
            sr: cfg.sr.clone(),
            harq: cfg.harq.clone(),
        }
    }
}

/// Global shared configuration: immutable config + mutable state.
#[derive(Clone)]
pub struct SharedConfig {
    /// Read-only configuration (immutable after construction).
    cfg: Arc<StackConfig>,
    /// Mutable state guarded with RwLock (written through RRC reconfiguration, read by the procedures).
    state: Arc<RwLock<StackState>>,
}

impl SharedConfig {
    pub fn new() -> Self {
        Self::from_config(StackConfig::new())
    }

    pub fn from_config(cfg: StackConfig) -> Self {
        let state = StackState::from_config(&cfg);
        Self::from_parts(cfg, state)
    }

    pub fn from_parts(cfg: StackConfig, state: StackState) -> Self {
        // Check config for validity before returning the SharedConfig object
        match cfg.validate() {
            Ok(_) => {}
            Err(e) => panic!("Invalid stack configuration: {}", e),
        }

        Self {
            cfg: Arc::new(cfg),
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Access immutable config.
    pub fn config(&self) -> Arc<StackConfig> {
        Arc::clone(&self.cfg)
    }

    /// Read guard for mutable state.
    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, StackState> {
        self.state.read().expect("StackState RwLock blocked")
    }

    /// Write guard for mutable state.
    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, StackState> {
        self.state.write().expect("StackState RwLock blocked")
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}
