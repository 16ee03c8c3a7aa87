//! Random access procedure, 36.321 §5.1

use std::sync::Arc;

use lte_config::{CfgRach, SharedConfig};
use lte_core::{MacTimer, RntiType, Tti, UeRnti};
use lte_pdus::RarPdu;
use lte_saps::{AckMode, MacGrantDl, PayloadHandle, PhyInterfaceMac, RrcInterfaceMac, TbActionDl};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ra_fsm::{BACKOFF_TABLE, DEFAULT_MSG_LEN_BITS, MAX_RAR_PDU_LEN, PreambleGroup, RaState, delta_preamble_db};
use crate::demux::{ContentionResolutionObserver, Demux};
use crate::mux::Mux;

/// MAC state the procedure reads and writes besides its own
pub struct RaCtx<'a> {
    pub mux: &'a mut Mux,
    pub rntis: &'a mut UeRnti,
    pub ta_timer: &'a mut MacTimer,
}

pub struct RaProc {
    config: SharedConfig,
    phy: Arc<dyn PhyInterfaceMac>,
    rrc: Arc<dyn RrcInterfaceMac>,
    rng: StdRng,

    state: RaState,
    /// RACH parameters latched at initialization
    params: CfgRach,

    /// ra-PreambleIndex, 0 when the UE selects the preamble
    preamble_index: u32,
    mask_index: u32,
    noncontention_enabled: bool,
    next_preamble_idx: u32,
    next_prach_mask: u32,

    sel_preamble: u32,
    sel_mask_index: u32,
    last_group: PreambleGroup,
    msg_len_bits: u32,

    preamble_counter: u32,
    backoff_param_ms: u32,
    rar_received: bool,
    current_ta: u32,
    rar_payload: Option<PayloadHandle>,

    transmitted_contention_id: u64,
    transmitted_crnti: u16,
    contention_timer: MacTimer,

    started_by_pdcch: bool,
    is_ho: bool,
}

impl RaProc {
    pub fn new(config: SharedConfig, phy: Arc<dyn PhyInterfaceMac>, rrc: Arc<dyn RrcInterfaceMac>) -> Self {
        let rng = match config.config().rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let params = config.state_read().rach.clone();
        Self {
            config,
            phy,
            rrc,
            rng,
            state: RaState::Idle,
            params,
            preamble_index: 0,
            mask_index: 0,
            noncontention_enabled: false,
            next_preamble_idx: 0,
            next_prach_mask: 0,
            sel_preamble: 0,
            sel_mask_index: 0,
            last_group: PreambleGroup::A,
            msg_len_bits: DEFAULT_MSG_LEN_BITS,
            preamble_counter: 0,
            backoff_param_ms: 0,
            rar_received: false,
            current_ta: 0,
            rar_payload: None,
            transmitted_contention_id: 0,
            transmitted_crnti: 0,
            contention_timer: MacTimer::new(),
            started_by_pdcch: false,
            is_ho: false,
        }
    }

    pub fn reset(&mut self, demux: &mut Demux) {
        self.state = RaState::Idle;
        self.started_by_pdcch = false;
        self.contention_timer.stop();
        if let Some(h) = self.rar_payload.take() {
            demux.deallocate(h);
        }
    }

    pub fn state(&self) -> RaState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RaState::Idle
    }

    pub fn is_contention_resolution(&self) -> bool {
        self.state == RaState::ContentionResolution
    }

    /// RA-RNTI the RAR is searched on, while in the response window
    pub fn rar_rnti(&self) -> Option<u16> {
        match self.state {
            RaState::ResponseReception { ra_rnti, .. } => Some(ra_rnti),
            _ => None,
        }
    }

    pub fn current_ta(&self) -> u32 {
        self.current_ta
    }

    pub fn preamble_counter(&self) -> u32 {
        self.preamble_counter
    }

    pub fn sel_preamble(&self) -> u32 {
        self.sel_preamble
    }

    pub fn backoff_param_ms(&self) -> u32 {
        self.backoff_param_ms
    }

    /// RA ordered by the MAC itself: SR exhausted, UL data without PUCCH, or RRC
    pub fn start_mac_order(&mut self, msg_len_bits: u32, is_ho: bool) {
        if !self.state.is_restartable() {
            tracing::warn!("Trying to start PRACH by MAC order in invalid state ({})", self.state);
            return;
        }
        self.started_by_pdcch = false;
        self.msg_len_bits = msg_len_bits;
        self.is_ho = is_ho;
        tracing::info!("Starting PRACH by MAC order, msg_len={} bits{}", msg_len_bits, if is_ho { ", handover" } else { "" });
        self.state = RaState::Initialization;
    }

    pub fn start_pdcch_order(&mut self) {
        if !self.state.is_restartable() {
            tracing::warn!("Trying to start PRACH by PDCCH order in invalid state ({})", self.state);
            return;
        }
        self.started_by_pdcch = true;
        self.msg_len_bits = DEFAULT_MSG_LEN_BITS;
        self.is_ho = false;
        tracing::info!("Starting PRACH by PDCCH order");
        self.state = RaState::Initialization;
    }

    /// Contention-free RA for handover with a dedicated preamble
    pub fn start_noncont(&mut self, preamble_index: u32, prach_mask: u32) {
        self.next_preamble_idx = preamble_index;
        self.next_prach_mask = prach_mask;
        self.noncontention_enabled = true;
        self.start_mac_order(DEFAULT_MSG_LEN_BITS, true);
    }

    /// Runs the state machine for `tti`. Transient states are chained within the same call.
    pub fn step(&mut self, tti: Tti, ctx: &mut RaCtx) {
        if self.contention_timer.step() && self.state == RaState::ContentionResolution {
            tracing::warn!(tti = %tti, "Contention resolution timer expired after {} ms", self.contention_timer.timeout());
            self.phy.pdcch_dl_search_reset();
            self.phy.pdcch_ul_search_reset();
            self.response_error(ctx);
        }

        loop {
            self.run_state(tti, ctx);
            if !self.state.is_transient() {
                break;
            }
        }
    }

    fn run_state(&mut self, tti: Tti, ctx: &mut RaCtx) {
        match self.state {
            RaState::Idle | RaState::CompletionDone | RaState::RaProblem => {}
            RaState::Initialization => self.initialization(ctx),
            RaState::ResourceSelection => self.resource_selection(ctx),
            RaState::PreambleTransmission => self.preamble_transmission(tti),
            RaState::PdcchSetup => {
                if let Some(ra_tti) = self.phy.prach_tx_tti() {
                    let ra_rnti = 1 + ra_tti.subframe() as u16;
                    let start = ra_tti.add(3);
                    let end = start.add(self.params.response_window_size as i32);
                    tracing::debug!(tti = %tti, "PRACH sent in {:?}, searching RAR on ra-rnti=0x{:x} until {:?}", ra_tti, ra_rnti, end);
                    self.phy.pdcch_dl_search(RntiType::Rar, ra_rnti, Some((start, end)));
                    self.state = RaState::ResponseReception { ra_tti, ra_rnti };
                }
            }
            RaState::ResponseReception { ra_tti, .. } => {
                if !self.rar_received {
                    let window_end = ra_tti.add(3 + self.params.response_window_size as i32 - 1);
                    let since_end = tti.interval(window_end);
                    if since_end > 0 && since_end < 100 {
                        tracing::info!(tti = %tti, "RAR window expired without response for preamble {}", self.sel_preamble);
                        self.response_error(ctx);
                    }
                }
            }
            RaState::ResponseError => {
                let interval = if self.backoff_param_ms > 0 { self.rng.random_range(0..=self.backoff_param_ms) } else { 0 };
                if interval > 0 {
                    tracing::debug!(tti = %tti, "Backoff of {} ms before next preamble", interval);
                    self.state = RaState::BackoffWait { start: None, interval };
                } else {
                    self.state = RaState::ResourceSelection;
                }
            }
            RaState::BackoffWait { start, interval } => {
                let start = start.unwrap_or(tti);
                self.state = if tti.interval(start) >= interval {
                    RaState::ResourceSelection
                } else {
                    RaState::BackoffWait { start: Some(start), interval }
                };
            }
            RaState::ContentionResolution => {
                // Runs from the first Msg3 transmission until resolved
                if ctx.mux.msg3_is_transmitted() && !self.contention_timer.is_running() {
                    tracing::debug!(tti = %tti, "Msg3 transmitted, starting contention resolution timer of {} ms", self.params.contention_resolution_timer);
                    self.contention_timer.set(self.params.contention_resolution_timer);
                    self.contention_timer.run();
                }
            }
            RaState::Completion => {
                let crnti = ctx.rntis.crnti;
                self.phy.set_crnti(crnti);
                self.phy.pdcch_dl_search(RntiType::User, crnti, None);
                self.phy.pdcch_ul_search(RntiType::User, crnti);
                self.state = RaState::CompletionDone;
            }
        }
    }

    fn read_params(&mut self) {
        self.params = self.config.state_read().rach.clone();
        if self.noncontention_enabled {
            self.preamble_index = self.next_preamble_idx;
            self.mask_index = self.next_prach_mask;
            self.noncontention_enabled = false;
        } else {
            self.preamble_index = 0;
            self.mask_index = 0;
        }
        self.contention_timer.set(self.params.contention_resolution_timer);
    }

    fn initialization(&mut self, ctx: &mut RaCtx) {
        self.read_params();
        self.transmitted_contention_id = 0;
        self.transmitted_crnti = 0;
        self.preamble_counter = 1;
        self.backoff_param_ms = 0;
        ctx.mux.msg3_flush();
        self.phy.configure_prach_params();
        self.state = RaState::ResourceSelection;
    }

    fn resource_selection(&mut self, ctx: &mut RaCtx) {
        let p = &self.params;
        let nof_group_a = p.nof_groupa_preambles.unwrap_or(p.nof_preambles).min(p.nof_preambles);
        let nof_group_b = p.nof_preambles - nof_group_a;

        if self.preamble_index > 0 {
            self.sel_preamble = self.preamble_index;
            self.sel_mask_index = self.mask_index;
        } else {
            // The group only changes before the first Msg3 of this procedure went out
            if !ctx.mux.msg3_is_transmitted() {
                self.last_group = if nof_group_b > 0 && self.msg_len_bits > p.message_size_group_a {
                    PreambleGroup::B
                } else {
                    PreambleGroup::A
                };
            }
            let (base, count) = match self.last_group {
                PreambleGroup::A if nof_group_a > 0 => (0, nof_group_a),
                PreambleGroup::B if nof_group_b > 0 => (nof_group_a, nof_group_b),
                group => {
                    tracing::warn!("Preamble group {:?} is empty, selecting from all preambles", group);
                    (0, p.nof_preambles)
                }
            };
            self.sel_preamble = base + self.rng.random_range(0..count);
            self.sel_mask_index = 0;
            tracing::debug!("Selected preamble {} from group {:?} ({} preambles)", self.sel_preamble, self.last_group, count);
        }
        self.state = RaState::PreambleTransmission;
    }

    fn preamble_transmission(&mut self, tti: Tti) {
        let p = &self.params;
        let target_power = p.preamble_initial_received_target_power
            + delta_preamble_db(p.prach_config_index)
            + (self.preamble_counter as i32 - 1) * p.power_ramping_step;

        tracing::info!(
            tti = %tti,
            "-> PRACH preamble={} mask={} attempt={} target_power={} dBm",
            self.sel_preamble,
            self.sel_mask_index,
            self.preamble_counter,
            target_power
        );
        self.phy.prach_send(self.sel_preamble, self.sel_mask_index as i32 - 1, target_power as f32);
        self.rar_received = false;
        self.state = RaState::PdcchSetup;
    }

    /// DL assignment on the RA-RNTI. The RAR is decoded into a pool buffer and never
    /// acknowledged.
    pub fn new_grant_dl(&mut self, grant: &MacGrantDl, demux: &mut Demux) -> TbActionDl {
        let mut action = TbActionDl {
            rnti: grant.rnti,
            ack_mode: AckMode::Suppress,
            ..Default::default()
        };

        if self.rar_rnti().is_none() {
            tracing::warn!(tti = %grant.tti, "RAR grant received outside of the response window ({})", self.state);
            return action;
        }
        let tbs = grant.n_bytes[0];
        if tbs == 0 || tbs >= MAX_RAR_PDU_LEN {
            tracing::error!(tti = %grant.tti, "Received RAR grant exceeds buffer length ({}>={})", tbs, MAX_RAR_PDU_LEN);
            return action;
        }

        if let Some(old) = self.rar_payload.take() {
            demux.deallocate(old);
        }
        match demux.request_buffer(tbs as usize) {
            Some(h) => {
                let rv = grant.rv[0].unwrap_or(0);
                self.rar_payload = Some(h);
                action.decode_enabled[0] = true;
                action.payload[0] = Some(h);
                action.rv[0] = rv;
                action.softbuffer_reset[0] = rv == 0;
            }
            None => tracing::error!(tti = %grant.tti, "No buffer available for RAR of {} bytes", tbs),
        }
        action
    }

    /// Decode result of the RAR transport block
    pub fn tb_decoded(&mut self, grant: &MacGrantDl, ack: bool, demux: &mut Demux, ctx: &mut RaCtx) {
        let Some(h) = self.rar_payload.take() else {
            tracing::warn!(tti = %grant.tti, "RAR decode result without pending buffer");
            return;
        };
        let data = if ack { demux.payload(h).map(|d| d.to_vec()) } else { None };
        demux.deallocate(h);
        if let Some(data) = data {
            self.tb_decoded_ok(grant.tti, &data, ctx);
        }
    }

    /// Processes a received RAR PDU
    pub fn tb_decoded_ok(&mut self, tti: Tti, data: &[u8], ctx: &mut RaCtx) {
        if self.rar_rnti().is_none() {
            tracing::debug!(tti = %tti, "Ignoring RAR received in state {}", self.state);
            return;
        }
        let rar = match RarPdu::from_bytes(data) {
            Ok(rar) => rar,
            Err(e) => {
                tracing::warn!(tti = %tti, "Discarding malformed RAR: {}", e);
                return;
            }
        };
        tracing::debug!(tti = %tti, "<- RAR {:?}", rar);

        self.backoff_param_ms = rar.backoff_indicator.map(|bi| BACKOFF_TABLE[(bi % 16) as usize]).unwrap_or(0);
        self.current_ta = 0;

        let Some(resp) = rar.find(self.sel_preamble as u8).copied() else {
            tracing::debug!(tti = %tti, "RAR carries no response for preamble {}", self.sel_preamble);
            return;
        };

        self.rar_received = true;
        self.process_timeadv_cmd(resp.ta_cmd, ctx);
        self.phy.set_rar_grant(tti, resp.grant);
        self.current_ta = resp.ta_cmd;

        if self.preamble_index > 0 {
            tracing::info!(tti = %tti, "RAR received for dedicated preamble {}, ta={}", self.sel_preamble, resp.ta_cmd);
            self.complete(ctx);
            return;
        }

        ctx.mux.msg3_prepare();
        ctx.rntis.temp_rnti = resp.temp_crnti;

        // A UE that already holds a C-RNTI identifies itself with it in Msg3
        if ctx.mux.msg3_is_empty() {
            self.transmitted_crnti = ctx.rntis.crnti;
            if self.transmitted_crnti != 0 {
                tracing::info!("Appending C-RNTI CE 0x{:x} to Msg3", self.transmitted_crnti);
                ctx.mux.append_crnti_ce_next_tx(self.transmitted_crnti);
            }
        }
        self.transmitted_contention_id = ctx.rntis.contention_id;

        tracing::info!(
            tti = %tti,
            "RAR received for preamble {}: temp_rnti=0x{:x} ta={} grant=0x{:05x}",
            self.sel_preamble,
            resp.temp_crnti,
            resp.ta_cmd,
            resp.grant
        );
        self.phy.pdcch_ul_search(RntiType::Temp, resp.temp_crnti);
        self.phy.pdcch_dl_search(RntiType::Temp, resp.temp_crnti, None);
        self.state = RaState::ContentionResolution;
    }

    fn process_timeadv_cmd(&mut self, ta_cmd: u32, ctx: &mut RaCtx) {
        if self.preamble_index > 0 {
            // Dedicated preamble: always applied
            self.phy.set_timeadv_rar(ta_cmd);
            ctx.ta_timer.reset();
            ctx.ta_timer.run();
            tracing::debug!("Applied RAR TA command {} for dedicated preamble", ta_cmd);
        } else if !ctx.ta_timer.is_running() {
            self.phy.set_timeadv_rar(ta_cmd);
            ctx.ta_timer.reset();
            ctx.ta_timer.run();
            tracing::debug!("Applied RAR TA command {}, time alignment timer started", ta_cmd);
        } else {
            tracing::warn!("Ignoring RAR TA command {}, time alignment timer already running", ta_cmd);
        }
    }

    fn response_error(&mut self, ctx: &mut RaCtx) {
        ctx.rntis.temp_rnti = 0;
        self.contention_timer.stop();
        self.preamble_counter += 1;

        if self.preamble_counter >= self.params.preamble_trans_max + 1 {
            tracing::error!("Maximum number of preamble transmissions reached ({})", self.params.preamble_trans_max);
            self.rrc.ra_problem();
            if self.is_ho {
                self.rrc.ho_ra_completed(false);
            }
            self.state = RaState::RaProblem;
        } else {
            tracing::debug!("Random access attempt failed, preamble counter={}", self.preamble_counter);
            self.state = RaState::ResponseError;
        }
    }

    fn complete(&mut self, ctx: &mut RaCtx) {
        if self.transmitted_crnti == 0 && ctx.rntis.temp_rnti != 0 {
            ctx.rntis.crnti = ctx.rntis.temp_rnti;
        }
        ctx.rntis.temp_rnti = 0;
        ctx.mux.msg3_flush();

        if self.is_ho {
            self.rrc.ho_ra_completed(true);
        }
        tracing::info!("Random Access Complete. c-rnti=0x{:x}, ta={}", ctx.rntis.crnti, self.current_ta);
        self.state = RaState::Completion;
    }

    /// Contention resolution identity from a Temp C-RNTI PDU. Returns true on a match.
    pub fn contention_resolution_id_received(&mut self, id: u64, ctx: &mut RaCtx) -> bool {
        if self.state != RaState::ContentionResolution {
            tracing::warn!("Ignoring contention resolution id 0x{:012x} received in state {}", id, self.state);
            return false;
        }
        self.contention_timer.stop();

        if id == self.transmitted_contention_id {
            tracing::debug!("Contention resolution id 0x{:012x} matches, RA successful", id);
            self.complete(ctx);
            true
        } else {
            tracing::warn!(
                "Contention resolution id 0x{:012x} does not match transmitted 0x{:012x}",
                id,
                self.transmitted_contention_id
            );
            self.response_error(ctx);
            false
        }
    }

    /// PDCCH addressed to the C-RNTI during contention resolution. `is_ul_new_tx` is true
    /// for an UL grant carrying a new transmission.
    pub fn pdcch_to_crnti(&mut self, is_ul_new_tx: bool, ctx: &mut RaCtx) {
        if self.state != RaState::ContentionResolution {
            return;
        }
        if (!self.started_by_pdcch && is_ul_new_tx) || self.started_by_pdcch {
            tracing::debug!("PDCCH for C-RNTI received during contention resolution");
            self.contention_timer.stop();
            self.complete(ctx);
        }
    }

    /// Msg3 retransmitted: the contention resolution timer starts over
    pub fn harq_retx(&mut self) {
        if self.state == RaState::ContentionResolution && self.contention_timer.is_running() {
            self.contention_timer.reset();
        }
    }

    /// Msg3 dropped after its last HARQ transmission
    pub fn harq_max_retx(&mut self, ctx: &mut RaCtx) {
        if self.state == RaState::ContentionResolution {
            tracing::warn!("Msg3 reached maximum number of HARQ transmissions");
            self.response_error(ctx);
        }
    }
}

/// Feeds contention resolution identities found by the Demux into the RA procedure
pub struct ContentionResolver<'a> {
    pub ra: &'a mut RaProc,
    pub ctx: RaCtx<'a>,
}

impl ContentionResolutionObserver for ContentionResolver<'_> {
    fn contention_resolution_id_received(&mut self, id: u64) -> bool {
        self.ra.contention_resolution_id_received(id, &mut self.ctx)
    }
}
