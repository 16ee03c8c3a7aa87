use std::collections::HashMap;
use std::sync::Mutex;

use lte_core::{RntiType, Tti};
use lte_saps::{PhyInterfaceMac, RlcInterfaceMac, RrcInterfaceMac};

/// Everything the MAC asked of the PHY, for later inspection
#[derive(Debug, Default)]
pub struct PhyLog {
    pub current_tti: Tti,
    pub prach_configured: u32,
    /// (preamble, mask, target power)
    pub prach_sent: Vec<(u32, i32, f32)>,
    pub prach_tti: Option<Tti>,
    pub timeadv_rar: Vec<u32>,
    pub timeadv: Vec<u32>,
    pub rar_grants: Vec<(Tti, u32)>,
    pub dl_searches: Vec<(RntiType, u16, Option<(Tti, Tti)>)>,
    pub ul_searches: Vec<(RntiType, u16)>,
    pub dl_search_resets: u32,
    pub ul_search_resets: u32,
    pub crnti: u16,
    pub sr_sent: u32,
    pub sr_last: Option<Tti>,
    pub phr_db: f32,
    pub pathloss_db: f32,
}

/// PHY stand-in. A preamble counts as sent in the TTI `prach_send` was called in.
#[derive(Default)]
pub struct MockPhy {
    pub log: Mutex<PhyLog>,
}

impl MockPhy {
    pub fn set_tti(&self, tti: Tti) {
        self.log.lock().unwrap().current_tti = tti;
    }

    pub fn prach_sent(&self) -> Vec<(u32, i32, f32)> {
        self.log.lock().unwrap().prach_sent.clone()
    }

    pub fn crnti(&self) -> u16 {
        self.log.lock().unwrap().crnti
    }
}

impl PhyInterfaceMac for MockPhy {
    fn configure_prach_params(&self) {
        self.log.lock().unwrap().prach_configured += 1;
    }

    fn prach_send(&self, preamble: u32, mask: i32, target_power_dbm: f32) {
        let mut log = self.log.lock().unwrap();
        log.prach_sent.push((preamble, mask, target_power_dbm));
        log.prach_tti = Some(log.current_tti);
    }

    fn prach_tx_tti(&self) -> Option<Tti> {
        self.log.lock().unwrap().prach_tti
    }

    fn set_timeadv_rar(&self, ta_cmd: u32) {
        self.log.lock().unwrap().timeadv_rar.push(ta_cmd);
    }

    fn set_timeadv(&self, ta_cmd: u32) {
        self.log.lock().unwrap().timeadv.push(ta_cmd);
    }

    fn set_rar_grant(&self, tti: Tti, grant: u32) {
        self.log.lock().unwrap().rar_grants.push((tti, grant));
    }

    fn pdcch_dl_search(&self, rnti_type: RntiType, rnti: u16, window: Option<(Tti, Tti)>) {
        self.log.lock().unwrap().dl_searches.push((rnti_type, rnti, window));
    }

    fn pdcch_ul_search(&self, rnti_type: RntiType, rnti: u16) {
        self.log.lock().unwrap().ul_searches.push((rnti_type, rnti));
    }

    fn pdcch_dl_search_reset(&self) {
        self.log.lock().unwrap().dl_search_resets += 1;
    }

    fn pdcch_ul_search_reset(&self) {
        self.log.lock().unwrap().ul_search_resets += 1;
    }

    fn set_crnti(&self, crnti: u16) {
        self.log.lock().unwrap().crnti = crnti;
    }

    fn get_current_tti(&self) -> Tti {
        self.log.lock().unwrap().current_tti
    }

    fn sr_send(&self) {
        let mut log = self.log.lock().unwrap();
        log.sr_sent += 1;
        log.sr_last = Some(log.current_tti);
    }

    fn sr_last_tx_tti(&self) -> Option<Tti> {
        self.log.lock().unwrap().sr_last
    }

    fn get_phr(&self) -> f32 {
        self.log.lock().unwrap().phr_db
    }

    fn get_pathloss_db(&self) -> f32 {
        self.log.lock().unwrap().pathloss_db
    }
}

/// RLC stand-in with per-channel transmit queues and a record of everything delivered
#[derive(Default)]
pub struct MockRlc {
    pub tx: Mutex<HashMap<u32, Vec<u8>>>,
    pub rx: Mutex<Vec<(u32, Vec<u8>)>>,
    pub bcch_bch: Mutex<Vec<Vec<u8>>>,
    pub bcch_dlsch: Mutex<Vec<Vec<u8>>>,
    pub pcch: Mutex<Vec<Vec<u8>>>,
}

impl MockRlc {
    /// Queues bytes for transmission on `lcid`
    pub fn push_tx(&self, lcid: u32, data: &[u8]) {
        self.tx.lock().unwrap().entry(lcid).or_default().extend_from_slice(data);
    }

    pub fn take_rx(&self) -> Vec<(u32, Vec<u8>)> {
        std::mem::take(&mut *self.rx.lock().unwrap())
    }
}

impl RlcInterfaceMac for MockRlc {
    fn get_buffer_state(&self, lcid: u32) -> u32 {
        self.tx.lock().unwrap().get(&lcid).map(|q| q.len() as u32).unwrap_or(0)
    }

    fn read_pdu(&self, lcid: u32, max_bytes: usize) -> Vec<u8> {
        let mut tx = self.tx.lock().unwrap();
        let Some(q) = tx.get_mut(&lcid) else {
            return Vec::new();
        };
        let n = q.len().min(max_bytes);
        q.drain(..n).collect()
    }

    fn write_pdu(&self, lcid: u32, payload: &[u8]) {
        self.rx.lock().unwrap().push((lcid, payload.to_vec()));
    }

    fn write_pdu_bcch_bch(&self, payload: &[u8]) {
        self.bcch_bch.lock().unwrap().push(payload.to_vec());
    }

    fn write_pdu_bcch_dlsch(&self, payload: &[u8]) {
        self.bcch_dlsch.lock().unwrap().push(payload.to_vec());
    }

    fn write_pdu_pcch(&self, payload: &[u8]) {
        self.pcch.lock().unwrap().push(payload.to_vec());
    }
}

#[derive(Debug, Default)]
pub struct RrcLog {
    pub release_pucch_srs: u32,
    pub ra_problem: u32,
    pub ho_ra_completed: Vec<bool>,
    pub ttis: u32,
}

#[derive(Default)]
pub struct MockRrc {
    pub log: Mutex<RrcLog>,
}

impl MockRrc {
    pub fn ra_problems(&self) -> u32 {
        self.log.lock().unwrap().ra_problem
    }
}

impl RrcInterfaceMac for MockRrc {
    fn release_pucch_srs(&self) {
        self.log.lock().unwrap().release_pucch_srs += 1;
    }

    fn ra_problem(&self) {
        self.log.lock().unwrap().ra_problem += 1;
    }

    fn ho_ra_completed(&self, ra_successful: bool) {
        self.log.lock().unwrap().ho_ra_completed.push(ra_successful);
    }

    fn run_tti(&self, _tti: Tti) {
        self.log.lock().unwrap().ttis += 1;
    }
}
