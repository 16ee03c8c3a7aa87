//! MAC facade. Composes HARQ, RA, Mux, Demux and the BSR/SR/PHR procedures and is the
//! single entry point for the PHY callbacks and the tick thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, unbounded};
use lte_config::{CfgHarq, CfgMacMain, CfgRach, CfgSr, SharedConfig};
use lte_core::{MAX_TB, MacTimer, P_RNTI, RntiType, SI_RNTI, Tti, UeRnti};
use lte_saps::{
    AckMode, MacGrantDl, MacGrantUl, MacMetrics, PayloadHandle, PhyInterfaceMac, RlcInterfaceMac, RrcInterfaceMac,
    TbActionDl, TbActionUl,
};

use crate::demux::{BufferPool, Demux, PduEvent, PduProcessor};
use crate::harq::{DlHarqEntity, UlHarqEntity};
use crate::mux::{Mux, MuxAccess};
use crate::procs::{BsrProc, PhrProc, SrProc};
use crate::ra::ra_fsm::DEFAULT_MSG_LEN_BITS;
use crate::ra::{ContentionResolver, RaCtx, RaProc, RaState};

/// Subframes past the end of a reception window during which it is still recognised as
/// the window just closed
const WINDOW_GRACE: u32 = 5;

pub struct Mac {
    config: SharedConfig,
    phy: Arc<dyn PhyInterfaceMac>,
    rlc: Arc<dyn RlcInterfaceMac>,
    rrc: Arc<dyn RrcInterfaceMac>,

    dl_harq: DlHarqEntity,
    ul_harq: UlHarqEntity,
    ra: RaProc,
    mux: Mux,
    demux: Demux,
    bsr: BsrProc,
    sr: SrProc,
    phr: PhrProc,

    rntis: UeRnti,
    ta_timer: MacTimer,
    metrics: MacMetrics,

    /// Present until handed to a thread of its own. While here, PDUs are processed inline.
    pdu_processor: Option<PduProcessor>,
    pdu_events: Receiver<PduEvent>,

    pch_payload: Option<PayloadHandle>,
    /// SI window start and length in subframes
    si_window: Option<(Tti, u32)>,
    pcch_active: bool,
    is_first_ul_grant: bool,
}

impl Mac {
    pub fn new(
        config: SharedConfig,
        phy: Arc<dyn PhyInterfaceMac>,
        rlc: Arc<dyn RlcInterfaceMac>,
        rrc: Arc<dyn RrcInterfaceMac>,
    ) -> Self {
        let cfg = config.config();
        let (queue_tx, queue_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let pool = BufferPool::new(cfg.buffers.nof_dl_buffers, cfg.buffers.max_pdu_len);
        let nof_proc = config.state_read().harq.nof_harq_proc;

        let mut mac = Self {
            dl_harq: DlHarqEntity::new(nof_proc),
            ul_harq: UlHarqEntity::new(config.clone()),
            ra: RaProc::new(config.clone(), phy.clone(), rrc.clone()),
            mux: Mux::new(rlc.clone(), cfg.buffers.msg3_buffer_len),
            demux: Demux::new(pool, queue_tx, rlc.clone()),
            bsr: BsrProc::new(config.clone(), rlc.clone()),
            sr: SrProc::new(config.clone(), phy.clone(), rrc.clone()),
            phr: PhrProc::new(config.clone(), phy.clone()),
            rntis: UeRnti::new(),
            ta_timer: MacTimer::new(),
            metrics: MacMetrics::default(),
            pdu_processor: Some(PduProcessor::new(queue_rx, event_tx, rlc.clone(), phy.clone())),
            pdu_events: event_rx,
            pch_payload: None,
            si_window: None,
            pcch_active: false,
            is_first_ul_grant: true,
            config,
            phy,
            rlc,
            rrc,
        };
        mac.setup_timers();
        mac.reset();
        mac
    }

    /// Hands out the PDU processor so it can run on its own thread. Afterwards
    /// `process_pdus` no longer does anything.
    pub fn take_pdu_processor(&mut self) -> Option<PduProcessor> {
        self.pdu_processor.take()
    }

    /// Drains the PDU queue inline when no PDU thread was started
    pub fn process_pdus(&mut self) -> usize {
        match &self.pdu_processor {
            Some(p) => p.drain(),
            None => 0,
        }
    }

    /// MAC reset, 36.321 §5.9
    pub fn reset(&mut self) {
        tracing::info!("Resetting MAC");
        self.metrics = MacMetrics::default();

        self.ta_timer.stop();
        // Releases UL resources and resets the HARQ processes
        self.timer_alignment_expire();
        self.ul_harq.reset_ndi();

        self.mux.msg3_flush();
        self.mux.reset();

        self.ra.reset(&mut self.demux);
        self.sr.reset();
        self.bsr.reset();
        self.phr.reset();

        let channels = self.config.config().logical_channels.clone();
        for lc in channels.iter() {
            self.setup_lcid(lc.lcid, lc.lcg, lc.priority, lc.pbr, lc.bsd);
        }

        self.phy.pdcch_dl_search_reset();
        self.phy.pdcch_ul_search_reset();
        self.is_first_ul_grant = true;
        self.clear_rntis();
    }

    fn clear_rntis(&mut self) {
        self.si_window = None;
        self.pcch_active = false;
        if let Some(h) = self.pch_payload.take() {
            self.demux.deallocate(h);
        }
        self.rntis = UeRnti::new();
    }

    /// A new timeout does not stop a running time alignment timer
    fn setup_timers(&mut self) {
        let tat = self.config.state_read().mac_main.time_alignment_timer;
        self.ta_timer.set(tat);
    }

    fn timer_alignment_expire(&mut self) {
        self.rrc.release_pucch_srs();
        self.dl_harq.reset(&mut self.demux);
        self.ul_harq.reset();
    }

    fn ra_ctx(&mut self) -> (&mut RaProc, RaCtx<'_>) {
        (
            &mut self.ra,
            RaCtx {
                mux: &mut self.mux,
                rntis: &mut self.rntis,
                ta_timer: &mut self.ta_timer,
            },
        )
    }

    /// One TTI of the periodic procedures. The order of the steps matters.
    pub fn run_tti(&mut self, tti: Tti) {
        tracing::trace!(tti = %tti, "Running MAC tti");

        if self.ta_timer.step() {
            tracing::info!(tti = %tti, "Time Alignment Timer expired");
            self.timer_alignment_expire();
        }

        self.process_pdus();
        while let Ok(event) = self.pdu_events.try_recv() {
            match event {
                PduEvent::TimeAdvanceCmd(ta) => {
                    tracing::debug!(tti = %tti, "TA command {} applied, restarting time alignment timer", ta);
                    self.ta_timer.reset();
                    self.ta_timer.run();
                }
            }
        }

        self.bsr.step(tti);
        self.phr.step(tti);

        if self.bsr.need_to_send_sr(tti) {
            self.sr.start();
        }
        if self.bsr.need_to_reset_sr() {
            self.sr.reset();
        }
        self.sr.step(tti);

        if self.sr.need_random_access() {
            if self.ra.state().is_restartable() {
                let msg_len_bits = self.ra_msg_len_bits();
                self.ra.start_mac_order(msg_len_bits, false);
            } else {
                tracing::debug!(tti = %tti, "SR asks for random access, already in progress ({})", self.ra.state());
            }
        }

        let (ra, mut ctx) = self.ra_ctx();
        ra.step(tti, &mut ctx);

        self.rrc.run_tti(tti);
    }

    /// Msg3 size used for the preamble group decision: the pending CCCH SDU with its
    /// subheader, or the default size when nothing waits on CCCH
    fn ra_msg_len_bits(&self) -> u32 {
        match self.mux.pending_ccch_len() {
            0 => DEFAULT_MSG_LEN_BITS,
            n => (n + 1) * 8,
        }
    }

    pub fn new_grant_dl(&mut self, grant: &MacGrantDl) -> TbActionDl {
        match grant.rnti_type {
            RntiType::Rar => self.ra.new_grant_dl(grant, &mut self.demux),
            RntiType::Pch => self.new_grant_pch(grant),
            _ => {
                if grant.rnti_type == RntiType::User && grant.rnti == self.rntis.crnti && self.ra.is_contention_resolution() {
                    let (ra, mut ctx) = self.ra_ctx();
                    ra.pdcch_to_crnti(false, &mut ctx);
                }
                let ta_expired = self.ta_timer.is_expired();
                self.dl_harq.new_grant_dl(grant, &mut self.demux, ta_expired)
            }
        }
    }

    fn new_grant_pch(&mut self, grant: &MacGrantDl) -> TbActionDl {
        let mut action = TbActionDl {
            rnti: grant.rnti,
            ack_mode: AckMode::Suppress,
            ..Default::default()
        };
        if let Some(old) = self.pch_payload.take() {
            self.demux.deallocate(old);
        }
        let tbs = grant.n_bytes[0] as usize;
        match self.demux.request_buffer(tbs) {
            Some(h) => {
                self.pch_payload = Some(h);
                action.decode_enabled[0] = true;
                action.payload[0] = Some(h);
                action.rv[0] = grant.rv[0].unwrap_or(0);
                action.softbuffer_reset[0] = true;
            }
            None => tracing::error!(tti = %grant.tti, "Received dci for PCH ({} bytes) but no buffer is available", tbs),
        }
        action
    }

    /// Decode result for the TBs of `grant`
    pub fn tb_decoded(&mut self, grant: &MacGrantDl, ack: [bool; MAX_TB]) {
        match grant.rnti_type {
            RntiType::Rar => {
                let mut ctx = RaCtx {
                    mux: &mut self.mux,
                    rntis: &mut self.rntis,
                    ta_timer: &mut self.ta_timer,
                };
                self.ra.tb_decoded(grant, ack[0], &mut self.demux, &mut ctx);
            }
            RntiType::Pch => {
                if let Some(h) = self.pch_payload.take() {
                    if ack[0] {
                        if let Some(data) = self.demux.payload(h) {
                            tracing::debug!(tti = %grant.tti, "<- PCH len={}", data.len());
                            self.rlc.write_pdu_pcch(data);
                        }
                    }
                    self.demux.deallocate(h);
                }
            }
            _ => {
                for tb in 0..MAX_TB {
                    if !grant.tb_en[tb] {
                        continue;
                    }
                    let mut resolver = ContentionResolver {
                        ra: &mut self.ra,
                        ctx: RaCtx {
                            mux: &mut self.mux,
                            rntis: &mut self.rntis,
                            ta_timer: &mut self.ta_timer,
                        },
                    };
                    self.dl_harq.tb_decoded(grant, tb, ack[tb], &mut self.demux, &mut resolver);

                    if grant.n_bytes[tb] > 0 {
                        if ack[tb] {
                            self.metrics.rx_brate += grant.n_bytes[tb] as u64 * 8;
                        } else {
                            self.metrics.rx_errors += 1;
                        }
                        self.metrics.rx_pkts += 1;
                    }
                }
                self.process_pdus();
            }
        }
    }

    /// Copies decoded bytes into the buffer handed out with a `TbActionDl`. Returns false
    /// for a stale handle.
    pub fn write_payload(&mut self, h: PayloadHandle, data: &[u8]) -> bool {
        match self.demux.payload_mut(h) {
            Some(buf) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                true
            }
            None => false,
        }
    }

    /// True when the last Temp C-RNTI PDU carried the contention resolution identity
    /// sent in Msg3. Resolves feedback for `AckMode::PendingContentionResolution`.
    pub fn get_uecrid_successful(&self) -> bool {
        self.demux.get_uecrid_successful()
    }

    /// UL grant for the transmission in `grant.tti`, with the PHICH result when one was received
    pub fn new_grant_ul(&mut self, grant: &MacGrantUl, ack: Option<bool>) -> TbActionUl {
        // Periodic PHR timer starts on the first UL grant, 36.321 §5.4.6
        if self.is_first_ul_grant {
            self.is_first_ul_grant = false;
            self.phr.start_timer();
        }

        let prev_tbs = self.ul_harq.get_current_tbs(grant.tti);
        let action = {
            let mut source = MuxAccess {
                mux: &mut self.mux,
                bsr: &mut self.bsr,
                phr: &mut self.phr,
            };
            self.ul_harq.new_grant_ul(grant, ack, &self.rntis, &mut source)
        };

        let is_new_tx = action.tx_enabled && action.current_tx_nb == 0 && action.payload.is_some();
        if grant.rnti_type == RntiType::User && grant.rnti == self.rntis.crnti && self.ra.is_contention_resolution() {
            let (ra, mut ctx) = self.ra_ctx();
            ra.pdcch_to_crnti(is_new_tx, &mut ctx);
        }

        self.after_ul_harq();
        self.metrics.tx_pkts += 1;
        if let Some(ack) = ack {
            self.account_ul_feedback(prev_tbs, ack);
        }
        action
    }

    /// PHICH feedback without a new grant, for the transmission opportunity in `tti`
    pub fn harq_recv(&mut self, tti: Tti, ack: bool) -> TbActionUl {
        let prev_tbs = self.ul_harq.get_current_tbs(tti);
        let action = {
            let mut source = MuxAccess {
                mux: &mut self.mux,
                bsr: &mut self.bsr,
                phr: &mut self.phr,
            };
            self.ul_harq.harq_recv(tti, ack, &self.rntis, &mut source)
        };
        self.after_ul_harq();
        self.account_ul_feedback(prev_tbs, ack);
        action
    }

    fn after_ul_harq(&mut self) {
        if self.ul_harq.msg3_retransmitted() {
            self.ra.harq_retx();
        }
        if self.ul_harq.msg3_max_retx_reached() {
            let (ra, mut ctx) = self.ra_ctx();
            ra.harq_max_retx(&mut ctx);
        }
    }

    fn account_ul_feedback(&mut self, tbs: u32, ack: bool) {
        if tbs == 0 {
            return;
        }
        if ack {
            self.metrics.tx_brate += tbs as u64 * 8;
        } else {
            self.metrics.tx_errors += 1;
        }
    }

    pub fn bch_decoded_ok(&mut self, payload: &[u8]) {
        tracing::debug!("<- BCCH-BCH len={}", payload.len());
        self.rlc.write_pdu_bcch_bch(payload);
    }

    /// Starts SI reception in a window of `window_len` subframes
    pub fn bcch_start_rx(&mut self, si_window_start: Tti, window_len: u32) {
        self.dl_harq.set_si_window_start(si_window_start);
        self.si_window = Some((si_window_start, window_len));
        tracing::info!("SCHED: Searching for DL dci for SI-RNTI window_st={} window_len={}", si_window_start, window_len);
    }

    pub fn bcch_stop_rx(&mut self) {
        self.si_window = None;
    }

    pub fn pcch_start_rx(&mut self) {
        self.pcch_active = true;
    }

    pub fn pcch_stop_rx(&mut self) {
        self.pcch_active = false;
    }

    /// RNTI the PHY should search DL assignments for in `tti`.
    /// Priority is SI-RNTI, RA-RNTI, Temp C-RNTI, C-RNTI, P-RNTI.
    pub fn get_dl_sched_rnti(&mut self, tti: Tti) -> Option<(RntiType, u16)> {
        if let Some((start, len)) = self.si_window {
            let since_start = tti.interval(start);
            if since_start <= len {
                // Subframe 5 of even frames carries SIB1 only
                if len > 1 && tti.is_sib1() {
                    return None;
                }
                return Some((RntiType::Si, SI_RNTI));
            }
            if since_start < len + WINDOW_GRACE {
                self.si_window = None;
            }
        }
        if let Some(ra_rnti) = self.ra.rar_rnti() {
            return Some((RntiType::Rar, ra_rnti));
        }
        if self.rntis.has_temp_rnti() && !self.rntis.has_crnti() {
            return Some((RntiType::Temp, self.rntis.temp_rnti));
        }
        if self.rntis.has_crnti() {
            return Some((RntiType::User, self.rntis.crnti));
        }
        if self.pcch_active {
            return Some((RntiType::Pch, P_RNTI));
        }
        None
    }

    pub fn get_ul_sched_rnti(&self) -> Option<(RntiType, u16)> {
        if self.rntis.has_temp_rnti() && !self.rntis.has_crnti() {
            return Some((RntiType::Temp, self.rntis.temp_rnti));
        }
        if self.rntis.has_crnti() {
            return Some((RntiType::User, self.rntis.crnti));
        }
        None
    }

    pub fn setup_lcid(&mut self, lcid: u32, lcg: u32, priority: u32, pbr: i32, bsd: u32) {
        tracing::info!(
            "Logical Channel Setup: LCID={}, LCG={}, priority={}, PBR={}, BSD={}ms, bucket_size={}",
            lcid,
            lcg,
            priority,
            pbr,
            bsd,
            pbr as i64 * bsd as i64
        );
        self.mux.setup_lcid(lcid, lcg, priority, pbr, bsd);
        self.bsr.setup_lcid(lcid, lcg, priority);
    }

    pub fn set_config_mac_main(&mut self, cfg: CfgMacMain) {
        tracing::info!("Setting MAC main configuration");
        self.config.state_write().mac_main = cfg;
        self.bsr.set_config();
        self.phr.set_config();
        self.setup_timers();
    }

    /// Takes effect with the next random access procedure. An invalid configuration is
    /// rejected and the previous one kept.
    pub fn set_config_rach(&mut self, cfg: CfgRach) -> Result<(), &'static str> {
        if let Err(e) = cfg.validate() {
            tracing::error!("Rejecting RACH configuration: {}", e);
            return Err(e);
        }
        tracing::info!("Setting RACH configuration");
        self.config.state_write().rach = cfg;
        Ok(())
    }

    pub fn set_config_sr(&mut self, cfg: CfgSr) {
        tracing::info!("Setting SR configuration");
        self.config.state_write().sr = cfg;
    }

    /// maxHARQ-Tx takes effect on the next TTI. The number of processes is fixed at start.
    pub fn set_config_harq(&mut self, cfg: CfgHarq) {
        let mut state = self.config.state_write();
        if cfg.nof_harq_proc != state.harq.nof_harq_proc {
            tracing::warn!(
                "Ignoring change of HARQ process count {} -> {}",
                state.harq.nof_harq_proc,
                cfg.nof_harq_proc
            );
        }
        state.harq.max_harq_tx = cfg.max_harq_tx;
        state.harq.ul_tti_offset = cfg.ul_tti_offset;
    }

    pub fn set_contention_id(&mut self, uecri: u64) {
        self.rntis.contention_id = uecri;
    }

    pub fn set_ho_rnti(&mut self, crnti: u16, target_pci: u16) {
        tracing::info!("Handover to pci={}, c-rnti=0x{:x}", target_pci, crnti);
        self.rntis.crnti = crnti;
    }

    pub fn start_noncont_ho(&mut self, preamble_index: u32, prach_mask: u32) {
        self.ra.start_noncont(preamble_index, prach_mask);
    }

    pub fn start_cont_ho(&mut self) {
        self.ra.start_mac_order(DEFAULT_MSG_LEN_BITS, true);
    }

    pub fn start_pdcch_order(&mut self) {
        self.ra.start_pdcch_order();
    }

    /// RA on MAC order outside of SR escalation, e.g. for the initial access
    pub fn start_mac_order(&mut self) {
        let msg_len_bits = self.ra_msg_len_bits();
        self.ra.start_mac_order(msg_len_bits, false);
    }

    pub fn get_rntis(&self) -> UeRnti {
        self.rntis
    }

    pub fn ra_state(&self) -> RaState {
        self.ra.state()
    }

    pub fn ra(&self) -> &RaProc {
        &self.ra
    }

    pub fn dl_harq(&self) -> &DlHarqEntity {
        &self.dl_harq
    }

    pub fn ul_harq(&self) -> &UlHarqEntity {
        &self.ul_harq
    }

    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    pub fn ta_timer(&self) -> &MacTimer {
        &self.ta_timer
    }

    pub fn sr_is_pending(&self) -> bool {
        self.sr.is_pending()
    }

    pub fn nof_free_buffers(&self) -> usize {
        self.demux.nof_free_buffers()
    }

    /// Counters since the previous call. Reading resets them.
    pub fn get_metrics(&mut self) -> MacMetrics {
        let mut m = std::mem::take(&mut self.metrics);
        m.ul_buffer = self.bsr.get_buffer_state();
        m.dl_retx_avg = self.dl_harq.get_average_retx();
        m.ul_retx_avg = self.ul_harq.get_average_retx();

        tracing::info!(
            "DL retx: {:.2} %, perpkt: {:.2}, UL retx: {:.2} % perpkt: {:.2}",
            if m.rx_pkts > 0 { 100.0 * m.rx_errors as f32 / m.rx_pkts as f32 } else { 0.0 },
            m.dl_retx_avg,
            if m.tx_pkts > 0 { 100.0 * m.tx_errors as f32 / m.tx_pkts as f32 } else { 0.0 },
            m.ul_retx_avg
        );
        m
    }
}
