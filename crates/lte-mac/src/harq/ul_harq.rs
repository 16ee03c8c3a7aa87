//! UL HARQ entity, 36.321 §5.4.2. Synchronous: the process is fixed by the TTI.

use lte_config::SharedConfig;
use lte_core::{RntiType, Tti, UeRnti, unimplemented_log};
use lte_saps::{MacGrantUl, TbActionUl};

/// Redundancy version for each position of the RV cycle
const RV_OF_IRV: [u32; 4] = [0, 2, 3, 1];
/// Position in the RV cycle for a signalled RV
const IRV_OF_RV: [u32; 4] = [0, 3, 1, 2];

/// Where new UL transport blocks come from
pub trait UlPduSource {
    fn pdu_get(&mut self, pdu_len: usize, tti: Tti, pid: usize) -> Option<Vec<u8>>;
    fn msg3_get(&mut self, pdu_len: usize) -> Option<Vec<u8>>;
    fn msg3_is_pending(&self) -> bool;
}

struct UlHarqProcess {
    pid: usize,
    cur_grant: Option<MacGrantUl>,
    payload: Option<Vec<u8>>,
    /// Last feedback, true for ACK
    harq_feedback: bool,
    is_msg3: bool,
    current_tx_nb: u32,
    current_irv: u32,
}

impl UlHarqProcess {
    fn new(pid: usize) -> Self {
        Self {
            pid,
            cur_grant: None,
            payload: None,
            harq_feedback: false,
            is_msg3: false,
            current_tx_nb: 0,
            current_irv: 0,
        }
    }

    fn reset(&mut self) {
        self.current_tx_nb = 0;
        self.current_irv = 0;
        self.cur_grant = None;
        self.payload = None;
        self.is_msg3 = false;
    }

    fn has_grant(&self) -> bool {
        self.cur_grant.is_some()
    }

    fn get_ndi(&self) -> bool {
        self.cur_grant.is_some_and(|g| g.ndi)
    }

    fn reset_ndi(&mut self) {
        if let Some(g) = self.cur_grant.as_mut() {
            g.ndi = false;
        }
    }

    fn generate_tx(&mut self, rntis: &UeRnti, action: &mut TbActionUl) {
        let Some(grant) = self.cur_grant else {
            return;
        };
        action.current_tx_nb = self.current_tx_nb;
        self.current_tx_nb += 1;
        action.expect_ack = true;
        action.tx_enabled = true;
        action.rnti = if self.is_msg3 { rntis.temp_rnti } else { grant.rnti };
        action.rv = if grant.rv > 0 { grant.rv } else { RV_OF_IRV[self.current_irv as usize] };
        action.payload = self.payload.clone();
        self.current_irv = (self.current_irv + 1) % 4;

        tracing::debug!(
            tti = %grant.tti,
            "UL pid={}: {} tbs={} rv={} tx_nb={}{}",
            self.pid,
            if action.current_tx_nb == 0 { "newTX" } else { "reTX" },
            grant.n_bytes,
            action.rv,
            self.current_tx_nb,
            if self.is_msg3 { " (Msg3)" } else { "" }
        );
    }
}

pub struct UlHarqEntity {
    config: SharedConfig,
    procs: Vec<UlHarqProcess>,
    average_retx: f32,
    nof_pkts: u64,
    msg3_retx: bool,
    msg3_max_retx: bool,
}

impl UlHarqEntity {
    pub fn new(config: SharedConfig) -> Self {
        let nof_proc = config.state_read().harq.nof_harq_proc;
        Self {
            config,
            procs: (0..nof_proc).map(UlHarqProcess::new).collect(),
            average_retx: 0.0,
            nof_pkts: 0,
            msg3_retx: false,
            msg3_max_retx: false,
        }
    }

    pub fn pidof(&self, tti: Tti) -> usize {
        tti.value() as usize % self.procs.len()
    }

    pub fn reset(&mut self) {
        for p in self.procs.iter_mut() {
            p.reset();
        }
    }

    /// NDI of every process back to 0, so the next grant is a new transmission
    pub fn reset_ndi(&mut self) {
        for p in self.procs.iter_mut() {
            p.reset_ndi();
        }
    }

    pub fn get_average_retx(&self) -> f32 {
        self.average_retx
    }

    /// TBS in bytes of the process transmitting in `tti`, 0 if idle
    pub fn get_current_tbs(&self, tti: Tti) -> u32 {
        self.procs[self.pidof(tti)].cur_grant.map(|g| g.n_bytes).unwrap_or(0)
    }

    /// Transmissions so far of the TB in the process for `tti`
    pub fn get_tx_nb(&self, tti: Tti) -> u32 {
        self.procs[self.pidof(tti)].current_tx_nb
    }

    /// One-shot: a Msg3 was retransmitted since the last call
    pub fn msg3_retransmitted(&mut self) -> bool {
        std::mem::replace(&mut self.msg3_retx, false)
    }

    /// One-shot: a Msg3 was dropped after `max_harq_msg3_tx` transmissions
    pub fn msg3_max_retx_reached(&mut self) -> bool {
        std::mem::replace(&mut self.msg3_max_retx, false)
    }

    /// UL grant for the transmission in `grant.tti`, with the PHICH result when one was received
    pub fn new_grant_ul(&mut self, grant: &MacGrantUl, ack: Option<bool>, rntis: &UeRnti, source: &mut dyn UlPduSource) -> TbActionUl {
        match grant.rnti_type {
            RntiType::User | RntiType::Temp | RntiType::Rar => self.run_tti(grant.tti, Some(grant), ack, rntis, source),
            RntiType::Sps => {
                unimplemented_log!("UL semi-persistent scheduling");
                TbActionUl::default()
            }
            other => {
                tracing::warn!("UL grant for unexpected RNTI type {:?}", other);
                TbActionUl::default()
            }
        }
    }

    /// PHICH feedback without a grant, for the transmission opportunity in `tti`
    pub fn harq_recv(&mut self, tti: Tti, ack: bool, rntis: &UeRnti, source: &mut dyn UlPduSource) -> TbActionUl {
        self.run_tti(tti, None, Some(ack), rntis, source)
    }

    fn run_tti(
        &mut self,
        tti: Tti,
        grant: Option<&MacGrantUl>,
        ack: Option<bool>,
        rntis: &UeRnti,
        source: &mut dyn UlPduSource,
    ) -> TbActionUl {
        let mut action = TbActionUl::default();
        let pid = self.pidof(tti);
        let (max_harq_tx, max_harq_msg3_tx) = {
            let state = self.config.state_read();
            (state.harq.max_harq_tx, state.rach.max_harq_msg3_tx)
        };
        let p = &mut self.procs[pid];

        if let Some(mut ack) = ack {
            // An ACK is overridden by a grant asking for a retransmission
            if let Some(g) = grant {
                if g.ndi == p.get_ndi() && g.n_bytes != 0 {
                    ack = false;
                }
            }
            p.harq_feedback = ack;
        }

        if let (true, Some(g), Some(cur)) = (p.harq_feedback, grant, p.cur_grant) {
            if g.n_bytes != cur.n_bytes && cur.n_bytes > 0 && g.n_bytes > 0 {
                tracing::debug!("UL pid={}: reset due to change of grant size {} -> {}", pid, cur.n_bytes, g.n_bytes);
                p.reset();
            }
        }

        let mut retx = false;
        match grant {
            Some(g) if g.has_cqi_request && g.n_bytes == 0 => {
                action.tx_enabled = true;
                action.rnti = g.rnti;
                tracing::debug!(tti = %tti, "UL pid={}: CQI-only grant", pid);
            }
            Some(g) => {
                let is_new_tx = (g.rnti_type != RntiType::Temp && g.ndi != p.get_ndi())
                    || (g.rnti_type == RntiType::User && !p.has_grant())
                    || g.is_from_rar;
                if is_new_tx {
                    let prev_tx_nb = if p.has_grant() { Some(p.current_tx_nb) } else { None };
                    p.reset();

                    let mut new_grant = *g;
                    let payload = if g.is_from_rar && source.msg3_is_pending() {
                        p.is_msg3 = true;
                        source.msg3_get(g.n_bytes as usize)
                    } else {
                        if g.is_from_rar {
                            new_grant.rnti = rntis.crnti;
                        }
                        source.pdu_get(g.n_bytes as usize, tti, pid)
                    };

                    match payload {
                        Some(pdu) => {
                            if let Some(n) = prev_tx_nb {
                                self.average_retx = super::cma(self.average_retx, n.saturating_sub(1) as f32, self.nof_pkts);
                                self.nof_pkts += 1;
                            }
                            p.payload = Some(pdu);
                            p.cur_grant = Some(new_grant);
                            p.harq_feedback = false;
                            p.current_tx_nb = 0;
                            p.current_irv = 0;
                            p.generate_tx(rntis, &mut action);
                        }
                        None => {
                            tracing::warn!(tti = %tti, "UL pid={}: no PDU available for grant of {} bytes", pid, g.n_bytes);
                            p.is_msg3 = false;
                        }
                    }
                } else if p.has_grant() {
                    // Adaptive retransmission
                    retx = true;
                } else {
                    tracing::warn!(tti = %tti, "UL pid={}: retransmission grant for a process without data", pid);
                }
            }
            None if p.has_grant() => {
                // Non-adaptive retransmission, on NACK only
                retx = !p.harq_feedback;
            }
            None => {}
        }

        if retx {
            let max = if p.is_msg3 { max_harq_msg3_tx } else { max_harq_tx };
            if p.current_tx_nb >= max {
                tracing::info!(tti = %tti, "UL pid={}: maximum number of retransmissions reached ({}), discarding TB", pid, max);
                let n = p.current_tx_nb;
                if p.is_msg3 {
                    self.msg3_max_retx = true;
                }
                p.reset();
                self.average_retx = super::cma(self.average_retx, n.saturating_sub(1) as f32, self.nof_pkts);
                self.nof_pkts += 1;
                action.expect_ack = false;
                return action;
            }
            if let Some(g) = grant {
                if g.rv > 0 {
                    p.current_irv = IRV_OF_RV[(g.rv % 4) as usize];
                }
                let n_bytes = p.cur_grant.map(|c| c.n_bytes).unwrap_or(g.n_bytes);
                p.cur_grant = Some(MacGrantUl { n_bytes, ..*g });
                p.harq_feedback = false;
            }
            p.generate_tx(rntis, &mut action);
            if p.is_msg3 {
                self.msg3_retx = true;
            }
        }

        action
    }
}
