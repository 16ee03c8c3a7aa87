//! DL HARQ entity, 36.321 §5.3.2

use lte_core::{MAX_TB, RntiType, Tti, unimplemented_log};
use lte_saps::{AckMode, MacGrantDl, PayloadHandle, TbActionDl};

use crate::demux::{ContentionResolutionObserver, Demux};

/// A duplicate TB arriving more often than this resets the soft buffer
const RESET_DUPLICATE_TIMEOUT: u32 = 48;

/// MCS indices reserved for retransmissions (29..=31)
const MCS_RETX_ONLY: u32 = 29;

/// Soft-combining state of a TB. The combining itself happens in the PHY; the MAC
/// only decides when the accumulated soft bits must be discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftBuffer {
    pub tbs: u32,
    pub nof_resets: u32,
}

impl SoftBuffer {
    pub fn reset(&mut self, tbs: u32) {
        self.tbs = tbs;
        self.nof_resets += 1;
    }
}

/// Grant parameters of the transmission a TB process is combining
#[derive(Debug, Clone, Copy, PartialEq)]
struct TbGrant {
    tbs: u32,
    ndi: bool,
    rv: u32,
}

struct DlTbProcess {
    tid: usize,
    is_first_tb: bool,
    ack: bool,
    /// Retransmissions of the current TB, 0 on its first transmission
    n_retx: u32,
    cur_grant: Option<TbGrant>,
    /// Buffer the PHY decodes into, owned until `tb_decoded`
    pending_payload: Option<PayloadHandle>,
    /// Set between a grant and its decode result
    pending_decode: bool,
    softbuffer: SoftBuffer,
}

impl DlTbProcess {
    fn new(tid: usize) -> Self {
        Self {
            tid,
            is_first_tb: true,
            ack: false,
            n_retx: 0,
            cur_grant: None,
            pending_payload: None,
            pending_decode: false,
            softbuffer: SoftBuffer::default(),
        }
    }

    fn reset(&mut self, demux: &mut Demux) {
        if let Some(h) = self.pending_payload.take() {
            demux.deallocate(h);
        }
        self.is_first_tb = true;
        self.ack = false;
        self.n_retx = 0;
        self.cur_grant = None;
        self.pending_decode = false;
        self.softbuffer.reset(0);
    }

    fn new_grant_dl(&mut self, pid: usize, is_bcch: bool, grant: &MacGrantDl, si_window_start: Tti, demux: &mut Demux, action: &mut TbActionDl) {
        let tid = self.tid;

        if let Some(h) = self.pending_payload.take() {
            tracing::warn!("DL pid={} tb={}: buffer still allocated from a previous grant, releasing", pid, tid);
            demux.deallocate(h);
        }
        self.pending_decode = false;

        let rv = match grant.rv[tid] {
            Some(rv) => rv,
            None if is_bcch => {
                // 36.321 §5.3.1, redundancy version of SI when the DCI carries none
                let k = if grant.tti.is_sib1() {
                    (grant.tti.value() / 20) % 4
                } else {
                    grant.tti.interval(si_window_start) % 4
                };
                (1.5 * k as f32).ceil() as u32 % 4
            }
            None => 0,
        };
        let tbs = grant.n_bytes[tid];
        let ndi = grant.ndi[tid];

        let ndi_toggled = self.cur_grant.is_none_or(|c| c.ndi != ndi);
        let is_new_tx = grant.mcs[tid] < MCS_RETX_ONLY && ((ndi_toggled && !is_bcch) || (is_bcch && rv == 0) || self.is_first_tb);
        self.is_first_tb = false;

        let tbs_changed = self.cur_grant.is_some_and(|c| c.tbs != tbs);
        if is_new_tx || tbs_changed {
            if !is_new_tx {
                tracing::warn!("DL pid={} tb={}: TBS changed during retransmission {} -> {}", pid, tid, self.cur_grant.map(|c| c.tbs).unwrap_or(0), tbs);
            }
            self.ack = false;
            self.softbuffer.reset(tbs);
            action.softbuffer_reset[tid] = true;
            self.n_retx = 0;
        }

        self.cur_grant = Some(TbGrant {
            tbs,
            ndi,
            rv,
        });
        action.rv[tid] = rv;

        if !self.ack {
            if !is_new_tx && !tbs_changed {
                self.n_retx += 1;
            }
            match demux.request_buffer(tbs as usize) {
                Some(h) => {
                    self.pending_payload = Some(h);
                    self.pending_decode = true;
                    action.payload[tid] = Some(h);
                    action.decode_enabled[tid] = true;
                }
                None => {
                    tracing::error!("DL pid={} tb={}: can't get a buffer for TBS={}", pid, tid, tbs);
                    action.decode_enabled[tid] = false;
                }
            }
        } else {
            self.n_retx += 1;
            let reset = self.n_retx > RESET_DUPLICATE_TIMEOUT;
            tracing::warn!(
                "DL pid={} tb={}: duplicate TB, discarding and resending ACK (n_retx={}, reset={})",
                pid,
                tid,
                self.n_retx,
                reset
            );
            action.decode_enabled[tid] = false;
            action.default_ack[tid] = true;
            if reset {
                self.reset(demux);
                action.softbuffer_reset[tid] = true;
            }
        }

        tracing::debug!(
            tti = %grant.tti,
            "DL pid={} tb={}: {} tbs={} rv={} ndi={} n_retx={}",
            pid,
            tid,
            if is_new_tx { "newTX" } else { "reTX" },
            tbs,
            rv,
            ndi,
            self.n_retx
        );
    }
}

struct DlHarqProcess {
    pid: usize,
    tbs: [DlTbProcess; MAX_TB],
    /// RNTI the last grant on this process was addressed to
    last_rnti: Option<(RntiType, u16)>,
}

impl DlHarqProcess {
    fn new(pid: usize) -> Self {
        Self {
            pid,
            tbs: [DlTbProcess::new(0), DlTbProcess::new(1)],
            last_rnti: None,
        }
    }

    /// Records the RNTI of a new grant. Returns true when it differs from the one the
    /// process served before, the HARQ state then belongs to another identity.
    fn switch_rnti(&mut self, rnti_type: RntiType, rnti: u16) -> bool {
        let prev = self.last_rnti.replace((rnti_type, rnti));
        prev.is_some_and(|p| p != (rnti_type, rnti))
    }
}

/// N processes for unicast plus one dedicated to broadcast (SI-RNTI)
pub struct DlHarqEntity {
    procs: Vec<DlHarqProcess>,
    nof_proc: usize,
    si_window_start: Tti,
    last_temporal_crnti: u16,
    average_retx: f32,
    nof_pkts: u64,
}

impl DlHarqEntity {
    pub fn new(nof_proc: usize) -> Self {
        Self {
            procs: (0..=nof_proc).map(DlHarqProcess::new).collect(),
            nof_proc,
            si_window_start: Tti::default(),
            last_temporal_crnti: 0,
            average_retx: 0.0,
            nof_pkts: 0,
        }
    }

    /// pid of the broadcast process
    pub fn bcch_pid(&self) -> usize {
        self.nof_proc
    }

    fn pid_of(&self, grant: &MacGrantDl) -> usize {
        match grant.rnti_type {
            RntiType::Si => self.bcch_pid(),
            _ => grant.pid as usize % self.nof_proc,
        }
    }

    pub fn reset(&mut self, demux: &mut Demux) {
        for p in self.procs.iter_mut() {
            for tb in p.tbs.iter_mut() {
                tb.reset(demux);
            }
        }
    }

    pub fn set_si_window_start(&mut self, tti: Tti) {
        self.si_window_start = tti;
    }

    pub fn get_average_retx(&self) -> f32 {
        self.average_retx
    }

    pub fn get_current_tbs(&self, pid: usize, tb: usize) -> u32 {
        self.procs
            .get(pid)
            .and_then(|p| p.tbs.get(tb))
            .and_then(|t| t.cur_grant)
            .map(|g| g.tbs)
            .unwrap_or(0)
    }

    /// Retransmissions counted so far for the TB, for diagnostics and tests
    pub fn get_n_retx(&self, pid: usize, tb: usize) -> u32 {
        self.procs.get(pid).and_then(|p| p.tbs.get(tb)).map(|t| t.n_retx).unwrap_or(0)
    }

    /// True while the PHY holds a buffer of this TB and no decode result arrived yet
    pub fn is_decode_pending(&self, pid: usize, tb: usize) -> bool {
        self.procs.get(pid).and_then(|p| p.tbs.get(tb)).is_some_and(|t| t.pending_decode)
    }

    pub fn is_acked(&self, pid: usize, tb: usize) -> bool {
        self.procs.get(pid).and_then(|p| p.tbs.get(tb)).is_some_and(|t| t.ack)
    }

    pub fn softbuffer(&self, pid: usize, tb: usize) -> Option<SoftBuffer> {
        self.procs.get(pid).and_then(|p| p.tbs.get(tb)).map(|t| t.softbuffer)
    }

    /// Decides decoding and feedback for a DL assignment. `ta_expired` suppresses
    /// HARQ feedback while the UE is not time aligned.
    pub fn new_grant_dl(&mut self, grant: &MacGrantDl, demux: &mut Demux, ta_expired: bool) -> TbActionDl {
        let mut action = TbActionDl {
            rnti: grant.rnti,
            ..Default::default()
        };

        if grant.rnti_type == RntiType::Sps {
            if grant.is_sps_release {
                tracing::info!("DL SPS release received, no SPS assignment active");
            } else {
                unimplemented_log!("DL semi-persistent scheduling");
            }
            return action;
        }

        let mut grant = *grant;
        if grant.rnti_type == RntiType::Temp && self.last_temporal_crnti != grant.rnti {
            grant.ndi = [true; MAX_TB];
            tracing::info!("Set NDI=1 for Temp-RNTI DL grant");
            self.last_temporal_crnti = grant.rnti;
        }

        let pid = self.pid_of(&grant);
        let is_bcch = pid == self.bcch_pid();
        let si_window_start = self.si_window_start;
        let proc = &mut self.procs[pid];
        if !is_bcch && proc.switch_rnti(grant.rnti_type, grant.rnti) {
            // First use of the process since the identity changed, e.g. Temp C-RNTI promoted
            tracing::info!("DL pid={}: first grant for {:?} rnti=0x{:x}, set NDI=1", pid, grant.rnti_type, grant.rnti);
            grant.ndi = [true; MAX_TB];
            for tb in proc.tbs.iter_mut() {
                tb.is_first_tb = true;
            }
        }
        for tid in 0..MAX_TB {
            if grant.tb_en[tid] {
                proc.tbs[tid].new_grant_dl(proc.pid, is_bcch, &grant, si_window_start, demux, &mut action);
            }
        }

        action.ack_mode = if is_bcch || ta_expired {
            AckMode::Suppress
        } else if grant.rnti_type == RntiType::Temp && !proc.tbs[0].ack {
            AckMode::PendingContentionResolution
        } else {
            AckMode::Generate
        };
        action
    }

    /// Decode result for one TB of `grant`. Successful PDUs go to the Demux path that
    /// matches the RNTI type; failed ones give their buffer back.
    pub fn tb_decoded(
        &mut self,
        grant: &MacGrantDl,
        tb_idx: usize,
        ack: bool,
        demux: &mut Demux,
        observer: &mut dyn ContentionResolutionObserver,
    ) {
        if tb_idx >= MAX_TB {
            tracing::warn!("tb_decoded for invalid tb={}", tb_idx);
            return;
        }
        let pid = self.pid_of(grant);
        let is_bcch = pid == self.bcch_pid();
        let tb = &mut self.procs[pid].tbs[tb_idx];
        let Some(payload) = tb.pending_payload.take() else {
            tracing::warn!("DL pid={} tb={}: decode result without pending buffer", pid, tb_idx);
            return;
        };
        tb.pending_decode = false;
        tb.ack = ack;
        if let Some(g) = tb.cur_grant {
            tracing::debug!(tti = %grant.tti, "DL pid={} tb={}: tbs={} rv={} ndi={} ack={}", pid, tb_idx, g.tbs, g.rv, g.ndi, ack);
        }

        if ack {
            if is_bcch {
                demux.push_pdu_bcch(payload);
            } else if grant.rnti_type == RntiType::Temp {
                demux.push_pdu_temp_crnti(payload, grant.tti, observer);
            } else {
                demux.push_pdu(payload, grant.tti);
                let n_retx = tb.n_retx;
                self.average_retx = super::cma(self.average_retx, n_retx as f32, self.nof_pkts);
                self.nof_pkts += 1;
            }
        } else {
            demux.deallocate(payload);
        }
    }
}
