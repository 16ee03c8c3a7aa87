//! Power Headroom Reporting, 36.321 §5.4.6

use std::sync::Arc;

use lte_config::{CfgPhr, SharedConfig};
use lte_core::{MacTimer, Tti};
use lte_saps::PhyInterfaceMac;

pub struct PhrProc {
    config: SharedConfig,
    phy: Arc<dyn PhyInterfaceMac>,
    /// Configuration the timers were last set from
    applied: Option<CfgPhr>,
    timer_periodic: MacTimer,
    timer_prohibit: MacTimer,
    last_pathloss_db: f32,
    triggered: bool,
}

impl PhrProc {
    pub fn new(config: SharedConfig, phy: Arc<dyn PhyInterfaceMac>) -> Self {
        Self {
            config,
            phy,
            applied: None,
            timer_periodic: MacTimer::new(),
            timer_prohibit: MacTimer::new(),
            last_pathloss_db: 0.0,
            triggered: false,
        }
    }

    pub fn reset(&mut self) {
        self.timer_periodic.stop();
        self.timer_prohibit.stop();
        self.triggered = false;
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Picks up a new PHR-Config. Any change of the configured values triggers a report.
    pub fn set_config(&mut self) {
        let cfg = self.config.state_read().mac_main.phr.clone();
        if cfg == self.applied {
            return;
        }
        match &cfg {
            Some(c) => {
                self.timer_periodic.set(c.periodic_phr_timer);
                self.timer_prohibit.set(c.prohibit_phr_timer);
                self.triggered = true;
                tracing::info!(
                    "PHR: configured periodic={} prohibit={} pathloss change={} dB",
                    c.periodic_phr_timer,
                    c.prohibit_phr_timer,
                    c.dl_pathloss_change
                );
            }
            None => {
                self.reset();
                tracing::info!("PHR: released");
            }
        }
        self.applied = cfg;
    }

    /// Starts the periodic timer, done on the first UL grant
    pub fn start_timer(&mut self) {
        if self.applied.is_some() {
            self.timer_periodic.run();
        }
    }

    fn pathloss_changed(&mut self) -> bool {
        let Some(min_change) = self.applied.as_ref().map(|c| c.dl_pathloss_change) else {
            return false;
        };
        let cur = self.phy.get_pathloss_db();
        if min_change > 0.0 && (cur - self.last_pathloss_db).abs() > min_change {
            tracing::debug!("PHR: pathloss changed from {} to {} dB", self.last_pathloss_db, cur);
            self.last_pathloss_db = cur;
            return true;
        }
        false
    }

    pub fn step(&mut self, tti: Tti) {
        self.set_config();
        if self.applied.is_none() {
            return;
        }

        if self.timer_periodic.step() {
            tracing::info!(tti = %tti, "PHR: periodic timer expired, triggering PHR");
            self.triggered = true;
        }
        self.timer_prohibit.step();
        if self.timer_prohibit.is_expired() && self.pathloss_changed() {
            tracing::info!(tti = %tti, "PHR: pathloss changed with prohibit timer expired, triggering PHR");
            self.triggered = true;
        }
    }

    /// Consumes a pending trigger, returning the power headroom to report in dB
    pub fn generate_phr_on_ul_grant(&mut self) -> Option<f32> {
        if !self.triggered || self.applied.is_none() {
            return None;
        }
        let phr = self.phy.get_phr();
        tracing::debug!("PHR: reporting {} dB", phr);

        let (periodic, prohibit) = (self.timer_periodic.timeout(), self.timer_prohibit.timeout());
        self.timer_periodic.set(periodic);
        self.timer_periodic.run();
        self.timer_prohibit.set(prohibit);
        self.timer_prohibit.run();
        self.triggered = false;
        Some(phr)
    }
}
