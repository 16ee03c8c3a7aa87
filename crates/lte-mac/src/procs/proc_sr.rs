//! Scheduling Request, 36.321 §5.4.4

use std::sync::Arc;

use lte_config::SharedConfig;
use lte_core::Tti;
use lte_saps::{PhyInterfaceMac, RrcInterfaceMac};

/// Minimum age in TTIs of the previous SR before another one is signalled
const SR_RETX_INTERVAL: u32 = 8;

pub struct SrProc {
    config: SharedConfig,
    phy: Arc<dyn PhyInterfaceMac>,
    rrc: Arc<dyn RrcInterfaceMac>,
    counter: u32,
    dsr_transmax: u32,
    is_pending: bool,
    do_ra: bool,
}

impl SrProc {
    pub fn new(config: SharedConfig, phy: Arc<dyn PhyInterfaceMac>, rrc: Arc<dyn RrcInterfaceMac>) -> Self {
        Self {
            config,
            phy,
            rrc,
            counter: 0,
            dsr_transmax: 0,
            is_pending: false,
            do_ra: false,
        }
    }

    pub fn reset(&mut self) {
        self.is_pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.is_pending
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn start(&mut self) {
        if self.is_pending {
            return;
        }
        self.counter = 0;
        self.is_pending = true;
        self.dsr_transmax = self.config.state_read().sr.dsr_trans_max;
        tracing::info!("SR: starting procedure, dsrTransMax={}", self.dsr_transmax);
    }

    fn need_tx(&self, tti: Tti) -> bool {
        match self.phy.sr_last_tx_tti() {
            Some(last) => tti.interval(last) > SR_RETX_INTERVAL,
            None => false,
        }
    }

    pub fn step(&mut self, tti: Tti) {
        if !self.is_pending {
            return;
        }

        let pucch_sr_configured = self.config.state_read().sr.pucch_sr_configured;
        if !pucch_sr_configured {
            tracing::info!(tti = %tti, "SR: PUCCH SR not configured, starting random access");
            self.do_ra = true;
            self.reset();
            return;
        }

        let need_tx = self.need_tx(tti);
        if self.counter < self.dsr_transmax {
            if self.counter == 0 || need_tx {
                self.counter += 1;
                tracing::info!(tti = %tti, "SR: signalling SR, counter={} dsrTransMax={}", self.counter, self.dsr_transmax);
                self.phy.sr_send();
            }
        } else if need_tx {
            tracing::info!(tti = %tti, "SR: dsrTransMax reached, releasing PUCCH/SRS and starting random access");
            self.rrc.release_pucch_srs();
            self.do_ra = true;
            self.is_pending = false;
        }
    }

    /// One-shot: true once after the procedure escalated to random access
    pub fn need_random_access(&mut self) -> bool {
        std::mem::replace(&mut self.do_ra, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use lte_config::StackConfig;
    use lte_core::{RntiType, debug};

    use super::*;

    #[derive(Default)]
    struct SrPhy {
        sent: Mutex<Vec<Tti>>,
        last: Mutex<Option<Tti>>,
        now: Mutex<Tti>,
    }

    impl PhyInterfaceMac for SrPhy {
        fn configure_prach_params(&self) {}
        fn prach_send(&self, _preamble: u32, _mask: i32, _target_power_dbm: f32) {}
        fn prach_tx_tti(&self) -> Option<Tti> {
            None
        }
        fn set_timeadv_rar(&self, _ta_cmd: u32) {}
        fn set_timeadv(&self, _ta_cmd: u32) {}
        fn set_rar_grant(&self, _tti: Tti, _grant: u32) {}
        fn pdcch_dl_search(&self, _rnti_type: RntiType, _rnti: u16, _window: Option<(Tti, Tti)>) {}
        fn pdcch_ul_search(&self, _rnti_type: RntiType, _rnti: u16) {}
        fn pdcch_dl_search_reset(&self) {}
        fn pdcch_ul_search_reset(&self) {}
        fn set_crnti(&self, _crnti: u16) {}
        fn get_current_tti(&self) -> Tti {
            *self.now.lock().unwrap()
        }
        fn sr_send(&self) {
            let now = *self.now.lock().unwrap();
            self.sent.lock().unwrap().push(now);
            *self.last.lock().unwrap() = Some(now);
        }
        fn sr_last_tx_tti(&self) -> Option<Tti> {
            *self.last.lock().unwrap()
        }
        fn get_phr(&self) -> f32 {
            0.0
        }
        fn get_pathloss_db(&self) -> f32 {
            0.0
        }
    }

    #[derive(Default)]
    struct SrRrc {
        released: Mutex<u32>,
    }

    impl RrcInterfaceMac for SrRrc {
        fn release_pucch_srs(&self) {
            *self.released.lock().unwrap() += 1;
        }
        fn ra_problem(&self) {}
        fn ho_ra_completed(&self, _ra_successful: bool) {}
    }

    fn run(sr: &mut SrProc, phy: &SrPhy, from: u32, to: u32) {
        for t in from..to {
            *phy.now.lock().unwrap() = Tti::new(t);
            sr.step(Tti::new(t));
        }
    }

    #[test]
    fn test_retransmits_until_dsr_transmax() {
        debug::setup_logging_verbose();
        let mut cfg = StackConfig::new();
        cfg.sr.dsr_trans_max = 3;
        let phy = Arc::new(SrPhy::default());
        let rrc = Arc::new(SrRrc::default());
        let mut sr = SrProc::new(SharedConfig::from_config(cfg), phy.clone(), rrc.clone());

        sr.start();
        run(&mut sr, &phy, 0, 9);
        assert_eq!(phy.sent.lock().unwrap().len(), 1);
        run(&mut sr, &phy, 9, 10);
        assert_eq!(phy.sent.lock().unwrap().len(), 2);
        run(&mut sr, &phy, 10, 20);
        assert_eq!(phy.sent.lock().unwrap().len(), 3);
        assert_eq!(sr.counter(), 3);
        assert!(!sr.need_random_access());

        // Last SR went out at tti 18, escalation once it is more than 8 TTIs old
        run(&mut sr, &phy, 20, 27);
        assert_eq!(*rrc.released.lock().unwrap(), 0);
        run(&mut sr, &phy, 27, 40);
        assert_eq!(*rrc.released.lock().unwrap(), 1);
        assert!(!sr.is_pending());
        assert!(sr.need_random_access());
        assert!(!sr.need_random_access());
    }

    #[test]
    fn test_no_pucch_goes_to_ra() {
        debug::setup_logging_verbose();
        let mut cfg = StackConfig::new();
        cfg.sr.pucch_sr_configured = false;
        let phy = Arc::new(SrPhy::default());
        let mut sr = SrProc::new(SharedConfig::from_config(cfg), phy.clone(), Arc::new(SrRrc::default()));

        sr.start();
        run(&mut sr, &phy, 0, 1);
        assert!(phy.sent.lock().unwrap().is_empty());
        assert!(sr.need_random_access());
        assert!(!sr.is_pending());
    }
}
