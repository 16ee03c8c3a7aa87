//! Loopback PHY, RLC and RRC plus a minimal eNB scheduler. Takes the UE through
//! contention based initial access and then exchanges dummy traffic on the C-RNTI.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use lte_core::{NOF_HARQ_PROC, RntiType, Tti};
use lte_mac::MacHandle;
use lte_pdus::{RarPdu, RarResponse, UlSchLcid, parse_sch_pdu};
use lte_saps::{MacGrantDl, MacGrantUl, PhyInterfaceMac, RlcInterfaceMac, RrcInterfaceMac};

/// RRCConnectionRequest stand-in. Its first 48 bits are the contention resolution identity.
pub const RRC_CONN_REQUEST: [u8; 6] = [0x50, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e];
const RRC_CONN_SETUP: [u8; 8] = [0x68, 0x12, 0x98, 0x0b, 0xfd, 0xd2, 0x04, 0xfa];

const TEMP_CRNTI: u16 = 0x4601;
const MSG3_LEN: u32 = 11;
const UL_GRANT_LEN: u32 = 64;
const DL_DATA_LEN: u32 = 40;
const DL_DATA_PERIOD: u32 = 20;
const UL_DATA_PERIOD: u32 = 40;
const DATA_LCID: u32 = 3;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn contention_id(ccch: &[u8]) -> u64 {
    ccch.iter().take(6).fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

#[derive(Default)]
struct PhyState {
    tti: Tti,
    prach: Option<(u32, Tti)>,
    prach_tti: Option<Tti>,
    sr_pending: bool,
    sr_last: Option<Tti>,
    crnti: u16,
}

#[derive(Default)]
pub struct LoopbackPhy {
    state: Mutex<PhyState>,
}

impl LoopbackPhy {
    pub fn set_tti(&self, tti: Tti) {
        lock(&self.state).tti = tti;
    }

    /// Preamble sent since the last call, with the TTI it went out in
    pub fn take_prach(&self) -> Option<(u32, Tti)> {
        lock(&self.state).prach.take()
    }

    pub fn take_sr(&self) -> bool {
        std::mem::replace(&mut lock(&self.state).sr_pending, false)
    }
}

impl PhyInterfaceMac for LoopbackPhy {
    fn configure_prach_params(&self) {
        tracing::debug!("PHY: PRACH configured");
    }

    fn prach_send(&self, preamble: u32, mask: i32, target_power_dbm: f32) {
        let mut s = lock(&self.state);
        tracing::info!(tti = %s.tti, "PHY: PRACH preamble={} mask={} power={} dBm", preamble, mask, target_power_dbm);
        s.prach = Some((preamble, s.tti));
        s.prach_tti = Some(s.tti);
    }

    fn prach_tx_tti(&self) -> Option<Tti> {
        lock(&self.state).prach_tti
    }

    fn set_timeadv_rar(&self, ta_cmd: u32) {
        tracing::debug!("PHY: RAR timing advance {}", ta_cmd);
    }

    fn set_timeadv(&self, ta_cmd: u32) {
        tracing::debug!("PHY: timing advance {}", ta_cmd);
    }

    fn set_rar_grant(&self, tti: Tti, grant: u32) {
        tracing::debug!(tti = %tti, "PHY: RAR grant 0x{:05x}", grant);
    }

    fn pdcch_dl_search(&self, rnti_type: RntiType, rnti: u16, window: Option<(Tti, Tti)>) {
        tracing::debug!("PHY: DL search {:?} rnti=0x{:x} window={:?}", rnti_type, rnti, window);
    }

    fn pdcch_ul_search(&self, rnti_type: RntiType, rnti: u16) {
        tracing::debug!("PHY: UL search {:?} rnti=0x{:x}", rnti_type, rnti);
    }

    fn pdcch_dl_search_reset(&self) {}

    fn pdcch_ul_search_reset(&self) {}

    fn set_crnti(&self, crnti: u16) {
        tracing::info!("PHY: c-rnti=0x{:x}", crnti);
        lock(&self.state).crnti = crnti;
    }

    fn get_current_tti(&self) -> Tti {
        lock(&self.state).tti
    }

    fn sr_send(&self) {
        let mut s = lock(&self.state);
        s.sr_pending = true;
        s.sr_last = Some(s.tti);
    }

    fn sr_last_tx_tti(&self) -> Option<Tti> {
        lock(&self.state).sr_last
    }

    fn get_phr(&self) -> f32 {
        20.0
    }

    fn get_pathloss_db(&self) -> f32 {
        90.0
    }
}

/// UL queues per logical channel, DL bytes are counted and dropped
pub struct LoopbackRlc {
    tx: Mutex<HashMap<u32, Vec<u8>>>,
    rx_bytes: Mutex<HashMap<u32, u64>>,
}

impl LoopbackRlc {
    pub fn new() -> Self {
        let mut tx = HashMap::new();
        tx.insert(0, RRC_CONN_REQUEST.to_vec());
        Self {
            tx: Mutex::new(tx),
            rx_bytes: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_tx(&self, lcid: u32, data: &[u8]) {
        lock(&self.tx).entry(lcid).or_default().extend_from_slice(data);
    }

    pub fn rx_bytes(&self, lcid: u32) -> u64 {
        lock(&self.rx_bytes).get(&lcid).copied().unwrap_or(0)
    }
}

impl Default for LoopbackRlc {
    fn default() -> Self {
        Self::new()
    }
}

impl RlcInterfaceMac for LoopbackRlc {
    fn get_buffer_state(&self, lcid: u32) -> u32 {
        lock(&self.tx).get(&lcid).map(|q| q.len() as u32).unwrap_or(0)
    }

    fn read_pdu(&self, lcid: u32, max_bytes: usize) -> Vec<u8> {
        let mut tx = lock(&self.tx);
        match tx.get_mut(&lcid) {
            Some(q) => {
                let n = q.len().min(max_bytes);
                q.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    fn write_pdu(&self, lcid: u32, payload: &[u8]) {
        tracing::debug!("RLC: <- lcid={} len={}", lcid, payload.len());
        *lock(&self.rx_bytes).entry(lcid).or_default() += payload.len() as u64;
    }

    fn write_pdu_bcch_bch(&self, payload: &[u8]) {
        tracing::debug!("RLC: <- BCCH-BCH len={}", payload.len());
    }

    fn write_pdu_bcch_dlsch(&self, payload: &[u8]) {
        tracing::debug!("RLC: <- BCCH-DLSCH len={}", payload.len());
    }

    fn write_pdu_pcch(&self, payload: &[u8]) {
        tracing::debug!("RLC: <- PCCH len={}", payload.len());
    }
}

#[derive(Default)]
pub struct LoopbackRrc;

impl RrcInterfaceMac for LoopbackRrc {
    fn release_pucch_srs(&self) {
        tracing::info!("RRC: releasing PUCCH and SRS");
    }

    fn ra_problem(&self) {
        tracing::error!("RRC: random access problem");
    }

    fn ho_ra_completed(&self, ra_successful: bool) {
        tracing::info!("RRC: handover random access completed, success={}", ra_successful);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnbState {
    /// Listening for a preamble
    Idle,
    RarDue { preamble: u32, prach_tti: Tti },
    Msg3Due { due: Tti },
    Msg4Due { due: Tti, contention_id: u64 },
    Connected { crnti: u16 },
}

/// Schedules the UE the way an eNB would, one TTI at a time
pub struct Enb {
    state: EnbState,
    response_window: u32,
    dl_ndi: [bool; NOF_HARQ_PROC],
    ul_ndi: [bool; NOF_HARQ_PROC],
}

impl Enb {
    pub fn new(response_window: u32) -> Self {
        Self {
            state: EnbState::Idle,
            response_window,
            dl_ndi: [false; NOF_HARQ_PROC],
            ul_ndi: [false; NOF_HARQ_PROC],
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, EnbState::Connected { .. })
    }

    pub fn run_tti(&mut self, tti: Tti, mac: &MacHandle, phy: &LoopbackPhy, rlc: &LoopbackRlc) {
        let state = self.state;
        self.state = match state {
            EnbState::Idle => match phy.take_prach() {
                Some((preamble, prach_tti)) => EnbState::RarDue { preamble, prach_tti },
                None => EnbState::Idle,
            },
            EnbState::RarDue { preamble, prach_tti } => self.send_rar(tti, preamble, prach_tti, mac),
            EnbState::Msg3Due { due } if tti == due => self.receive_msg3(tti, mac),
            EnbState::Msg4Due { due, contention_id } if tti == due => self.send_msg4(tti, contention_id, mac),
            EnbState::Connected { crnti } => {
                self.schedule_connected(tti, crnti, mac, phy, rlc);
                state
            }
            state => state,
        };
    }

    fn send_rar(&mut self, tti: Tti, preamble: u32, prach_tti: Tti, mac: &MacHandle) -> EnbState {
        let since_prach = tti.interval(prach_tti);
        if since_prach > 3 + self.response_window {
            tracing::warn!(tti = %tti, "eNB: RAR not taken within the window, waiting for a new preamble");
            return EnbState::Idle;
        }
        if since_prach < 4 {
            return EnbState::RarDue { preamble, prach_tti };
        }

        let rar = RarPdu {
            backoff_indicator: Some(1),
            responses: vec![RarResponse {
                rapid: preamble as u8,
                ta_cmd: 0,
                grant: MSG3_LEN,
                temp_crnti: TEMP_CRNTI,
            }],
        }
        .to_bytes();
        let ra_rnti = 1 + prach_tti.subframe() as u16;
        let grant = MacGrantDl::new(ra_rnti, RntiType::Rar, tti, 0, rar.len() as u32, false, 0);
        if deliver_dl(mac, &grant, &rar) {
            tracing::info!(tti = %tti, "eNB: RAR for preamble {} on ra-rnti=0x{:x}", preamble, ra_rnti);
            EnbState::Msg3Due { due: tti.add(6) }
        } else {
            // UE not listening yet, retry within the window
            EnbState::RarDue { preamble, prach_tti }
        }
    }

    fn receive_msg3(&mut self, tti: Tti, mac: &MacHandle) -> EnbState {
        let mut grant = MacGrantUl::new(TEMP_CRNTI, RntiType::Temp, tti, MSG3_LEN, false);
        grant.is_from_rar = true;
        let action = mac.new_grant_ul(&grant, None);
        let Some(pdu) = action.payload else {
            tracing::warn!(tti = %tti, "eNB: no Msg3 received");
            return EnbState::Idle;
        };

        let ccch = parse_sch_pdu::<UlSchLcid>(&pdu)
            .ok()
            .and_then(|subpdus| subpdus.iter().find(|sp| sp.lcid == UlSchLcid::Sdu(0)).map(|sp| sp.payload.to_vec()));
        match ccch {
            Some(sdu) if sdu.len() >= 6 => {
                let contention_id = contention_id(&sdu);
                tracing::info!(tti = %tti, "eNB: Msg3 with CCCH len={}, contention id 0x{:012x}", sdu.len(), contention_id);
                EnbState::Msg4Due { due: tti.add(4), contention_id }
            }
            _ => {
                tracing::warn!(tti = %tti, "eNB: Msg3 without CCCH SDU, dropping");
                EnbState::Idle
            }
        }
    }

    fn send_msg4(&mut self, tti: Tti, contention_id: u64, mac: &MacHandle) -> EnbState {
        // Contention resolution identity CE followed by the CCCH SDU taking the rest
        let mut pdu = vec![0x3c, 0x00];
        pdu.extend_from_slice(&contention_id.to_be_bytes()[2..]);
        pdu.extend_from_slice(&RRC_CONN_SETUP);

        let grant = MacGrantDl::new(TEMP_CRNTI, RntiType::Temp, tti, 0, pdu.len() as u32, true, 0);
        deliver_dl(mac, &grant, &pdu);
        if mac.with(|m| m.get_uecrid_successful()) {
            tracing::info!(tti = %tti, "eNB: contention resolved, UE connected with c-rnti=0x{:x}", TEMP_CRNTI);
            EnbState::Connected { crnti: TEMP_CRNTI }
        } else {
            tracing::warn!(tti = %tti, "eNB: contention resolution failed");
            EnbState::Idle
        }
    }

    fn schedule_connected(&mut self, tti: Tti, crnti: u16, mac: &MacHandle, phy: &LoopbackPhy, rlc: &LoopbackRlc) {
        let pid = tti.value() as usize % NOF_HARQ_PROC;

        if tti.value() % DL_DATA_PERIOD == 0 {
            self.dl_ndi[pid] = !self.dl_ndi[pid];
            let mut pdu = vec![DATA_LCID as u8];
            pdu.extend((0..DL_DATA_LEN - 1).map(|i| i as u8));
            let grant = MacGrantDl::new(crnti, RntiType::User, tti, pid as u32, DL_DATA_LEN, self.dl_ndi[pid], 0);
            deliver_dl(mac, &grant, &pdu);
        }

        // UE side traffic, announced through BSR and SR
        if tti.value() % UL_DATA_PERIOD == 0 {
            rlc.push_tx(DATA_LCID, &[0x5a; 100]);
        }

        if phy.take_sr() {
            let ul_tti = tti.add(4);
            let ul_pid = ul_tti.value() as usize % NOF_HARQ_PROC;
            self.ul_ndi[ul_pid] = !self.ul_ndi[ul_pid];
            let grant = MacGrantUl::new(crnti, RntiType::User, ul_tti, UL_GRANT_LEN, self.ul_ndi[ul_pid]);
            let action = mac.new_grant_ul(&grant, Some(true));
            tracing::debug!(tti = %tti, "eNB: UL grant on SR, {} bytes", action.payload.map(|p| p.len()).unwrap_or(0));
        }
    }
}

/// Grant, decode and report one DL transport block. Returns false when the UE did not
/// take the grant.
fn deliver_dl(mac: &MacHandle, grant: &MacGrantDl, pdu: &[u8]) -> bool {
    let action = mac.new_grant_dl(grant);
    if !action.decode_enabled[0] {
        return false;
    }
    if let Some(h) = action.payload[0] {
        mac.write_payload(h, pdu);
    }
    mac.tb_decoded(grant, [true, false]);
    true
}
