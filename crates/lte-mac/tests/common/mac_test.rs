use std::sync::Arc;

use lte_config::{SharedConfig, StackConfig};
use lte_core::{RntiType, Tti};
use lte_mac::Mac;
use lte_saps::{MacGrantDl, MacGrantUl, TbActionDl, TbActionUl};

use super::mocks::{MockPhy, MockRlc, MockRrc};

/// Creates a default config for testing. It can still be modified as needed
/// before passing it to the MacTest constructor
pub fn default_test_config() -> StackConfig {
    let mut cfg = StackConfig::new();
    // Deterministic preamble and backoff selection
    cfg.rng_seed = Some(1);
    cfg
}

/// A MAC wired to mock PHY, RLC and RRC, driven TTI by TTI from the test.
/// PDUs are processed inline, no threads are started.
pub struct MacTest {
    pub config: SharedConfig,
    pub phy: Arc<MockPhy>,
    pub rlc: Arc<MockRlc>,
    pub rrc: Arc<MockRrc>,
    pub mac: Mac,
    /// TTI the next `run_tti` runs
    pub tti: Tti,
}

impl MacTest {
    pub fn new(config: StackConfig, start_tti: Option<Tti>) -> Self {
        let config = SharedConfig::from_config(config);
        let phy = Arc::new(MockPhy::default());
        let rlc = Arc::new(MockRlc::default());
        let rrc = Arc::new(MockRrc::default());
        let mac = Mac::new(config.clone(), phy.clone(), rlc.clone(), rrc.clone());
        Self {
            config,
            phy,
            rlc,
            rrc,
            mac,
            tti: start_tti.unwrap_or_default(),
        }
    }

    /// Runs one MAC tick and advances the clock
    pub fn run_tti(&mut self) -> Tti {
        let tti = self.tti;
        self.phy.set_tti(tti);
        self.mac.run_tti(tti);
        self.tti = tti.add(1);
        tti
    }

    pub fn run_ttis(&mut self, n: u32) {
        for _ in 0..n {
            self.run_tti();
        }
    }

    /// Ticks until `cond` holds, at most `max` TTIs. Returns the number of TTIs run.
    pub fn run_until(&mut self, max: u32, mut cond: impl FnMut(&Mac) -> bool) -> Option<u32> {
        for n in 0..max {
            if cond(&self.mac) {
                return Some(n);
            }
            self.run_tti();
        }
        if cond(&self.mac) { Some(max) } else { None }
    }

    /// Delivers a DL transport block the way the PHY does: grant, decode into the
    /// handed-out buffer, report the result. Returns the action taken for the grant.
    pub fn deliver_dl(&mut self, grant: &MacGrantDl, pdu: &[u8], crc_ok: bool) -> TbActionDl {
        let action = self.mac.new_grant_dl(grant);
        if action.decode_enabled[0] {
            if let Some(h) = action.payload[0] {
                assert!(self.mac.write_payload(h, pdu));
            }
            self.mac.tb_decoded(grant, [crc_ok, false]);
        }
        action
    }

    /// Single-TB DL grant for the current TTI
    pub fn dl_grant(&self, rnti: u16, rnti_type: RntiType, pid: u32, n_bytes: u32, ndi: bool) -> MacGrantDl {
        MacGrantDl::new(rnti, rnti_type, self.tti, pid, n_bytes, ndi, 0)
    }

    /// UL grant for the transmission `ul_tti_offset` subframes after the current TTI
    pub fn ul_grant(&self, rnti: u16, rnti_type: RntiType, n_bytes: u32, ndi: bool) -> MacGrantUl {
        let offset = self.config.state_read().harq.ul_tti_offset;
        MacGrantUl::new(rnti, rnti_type, self.tti.add(offset as i32), n_bytes, ndi)
    }

    pub fn new_grant_ul(&mut self, grant: &MacGrantUl, ack: Option<bool>) -> TbActionUl {
        self.mac.new_grant_ul(grant, ack)
    }
}
