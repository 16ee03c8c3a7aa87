//! Buffer Status Reporting, 36.321 §5.4.5

use std::collections::BTreeMap;
use std::sync::Arc;

use lte_config::SharedConfig;
use lte_core::{MacTimer, NOF_LCG, Tti};
use lte_pdus::bsr::{buff_size_table, encode_long_bsr, encode_short_bsr};
use lte_pdus::{UlSchLcid, size_header_sdu};
use lte_saps::RlcInterfaceMac;

/// What caused the pending BSR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsrTrigger {
    /// Nothing pending
    None,
    /// New data arrived, or the reTX timer expired with data waiting
    Regular,
    /// periodicBSR-Timer expired
    Periodic,
    /// Spare room in a PDU
    Padding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsrFormat {
    Short,
    Long,
    /// Short format used for padding when more than one LCG has data
    Truncated,
}

impl core::fmt::Display for BsrFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BsrFormat::Short => write!(f, "Short"),
            BsrFormat::Long => write!(f, "Long"),
            BsrFormat::Truncated => write!(f, "Truncated"),
        }
    }
}

/// A generated report. Buffer sizes are in bytes per LCG; `lcg` is the group carried
/// by a short or truncated report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsrReport {
    pub format: BsrFormat,
    pub buff_size: [u32; NOF_LCG],
    pub lcg: u32,
}

impl BsrReport {
    /// Size of the CE without its subheader
    pub fn ce_len(&self) -> usize {
        match self.format {
            BsrFormat::Long => 3,
            BsrFormat::Short | BsrFormat::Truncated => 1,
        }
    }

    pub fn encode(&self) -> (UlSchLcid, Vec<u8>) {
        match self.format {
            BsrFormat::Long => {
                let mut idx = [0u8; NOF_LCG];
                for (i, b) in self.buff_size.iter().enumerate() {
                    idx[i] = buff_size_table(*b);
                }
                (UlSchLcid::LongBsr, encode_long_bsr(&idx).to_vec())
            }
            BsrFormat::Short | BsrFormat::Truncated => {
                let idx = buff_size_table(self.buff_size[self.lcg as usize]);
                let lcid = if self.format == BsrFormat::Short { UlSchLcid::ShortBsr } else { UlSchLcid::TruncBsr };
                (lcid, vec![encode_short_bsr(self.lcg, idx)])
            }
        }
    }

    /// Same report with `sent` bytes per LCG taken off, for a BSR that travels in the
    /// PDU carrying that data
    pub fn after_tx(&self, sent: &[u32; NOF_LCG]) -> BsrReport {
        let mut r = *self;
        for i in 0..NOF_LCG {
            r.buff_size[i] = r.buff_size[i].saturating_sub(sent[i]);
        }
        r
    }
}

#[derive(Debug, Clone, Copy)]
struct LcInfo {
    priority: u32,
    old_buffer: u32,
    new_buffer: u32,
}

pub struct BsrProc {
    config: SharedConfig,
    rlc: Arc<dyn RlcInterfaceMac>,
    lcgs: [BTreeMap<u32, LcInfo>; NOF_LCG],
    trigger: BsrTrigger,
    trigger_tti: Tti,
    current_tti: Tti,
    reset_sr: bool,
    sr_is_sent: bool,
    timer_periodic: MacTimer,
    timer_retx: MacTimer,
}

impl BsrProc {
    pub fn new(config: SharedConfig, rlc: Arc<dyn RlcInterfaceMac>) -> Self {
        let mut proc = Self {
            config,
            rlc,
            lcgs: Default::default(),
            trigger: BsrTrigger::None,
            trigger_tti: Tti::default(),
            current_tti: Tti::default(),
            reset_sr: false,
            sr_is_sent: false,
            timer_periodic: MacTimer::new(),
            timer_retx: MacTimer::new(),
        };
        proc.set_config();
        proc
    }

    /// Reloads periodicBSR-Timer and retxBSR-Timer from the MAC main configuration
    pub fn set_config(&mut self) {
        let (periodic, retx) = {
            let state = self.config.state_read();
            (state.mac_main.periodic_bsr_timer, state.mac_main.retx_bsr_timer)
        };
        if periodic > 0 {
            self.timer_periodic.set(periodic);
            tracing::info!("BSR: configured periodic timer {} ms", periodic);
        }
        if retx > 0 {
            self.timer_retx.set(retx);
            tracing::info!("BSR: configured reTX timer {} ms", retx);
        }
    }

    pub fn reset(&mut self) {
        self.timer_periodic.stop();
        self.timer_retx.stop();
        self.reset_sr = false;
        self.sr_is_sent = false;
        self.trigger = BsrTrigger::None;
        self.trigger_tti = Tti::default();
    }

    pub fn trigger(&self) -> BsrTrigger {
        self.trigger
    }

    fn set_trigger(&mut self, trigger: BsrTrigger) {
        self.trigger = trigger;
        self.trigger_tti = self.current_tti;
        if trigger == BsrTrigger::Regular {
            self.sr_is_sent = false;
        }
    }

    /// Maps `lcid` into `lcg`, replacing any earlier mapping
    pub fn setup_lcid(&mut self, lcid: u32, lcg: u32, priority: u32) {
        if lcg as usize >= NOF_LCG {
            tracing::error!("BSR: invalid lcg={} for lcid={}", lcg, lcid);
            return;
        }
        for group in self.lcgs.iter_mut() {
            group.remove(&lcid);
        }
        self.lcgs[lcg as usize].insert(
            lcid,
            LcInfo {
                priority,
                old_buffer: 0,
                new_buffer: 0,
            },
        );
    }

    pub fn lcg_of(&self, lcid: u32) -> Option<u32> {
        self.lcgs.iter().position(|g| g.contains_key(&lcid)).map(|i| i as u32)
    }

    fn buffer_state_lcg(&self, lcg: usize) -> u32 {
        self.lcgs[lcg].values().map(|lc| lc.old_buffer).sum()
    }

    /// Total bytes pending over all groups
    pub fn get_buffer_state(&self) -> u32 {
        (0..NOF_LCG).map(|i| self.buffer_state_lcg(i)).sum()
    }

    fn check_any_channel(&self) -> bool {
        (0..NOF_LCG).any(|i| self.buffer_state_lcg(i) > 0)
    }

    /// Data arrived while nothing at all was buffered
    fn check_new_data(&self) -> bool {
        let all_empty = self.lcgs.iter().flat_map(|g| g.values()).all(|lc| lc.old_buffer == 0);
        all_empty && self.lcgs.iter().flat_map(|g| g.values()).any(|lc| lc.new_buffer > 0)
    }

    /// Data arrived for a channel with higher priority than every channel already holding data
    fn check_highest_channel(&self) -> bool {
        let all = || self.lcgs.iter().flat_map(|g| g.iter());
        for (lcid, lc) in all() {
            if lc.new_buffer <= lc.old_buffer {
                continue;
            }
            let outranked = all().any(|(other, o)| other != lcid && o.priority < lc.priority && o.old_buffer > 0);
            if !outranked {
                tracing::debug!("BSR: new data for lcid={} with highest priority", lcid);
                return true;
            }
        }
        false
    }

    fn max_priority_lcg_with_data(&self) -> u32 {
        let mut best: Option<(u32, u32)> = None;
        for (i, group) in self.lcgs.iter().enumerate() {
            for lc in group.values() {
                if lc.old_buffer > 0 && best.is_none_or(|(prio, _)| lc.priority < prio) {
                    best = Some((lc.priority, i as u32));
                }
            }
        }
        best.map(|(_, lcg)| lcg).unwrap_or(0)
    }

    /// Called once per TTI by the tick thread
    pub fn step(&mut self, tti: Tti) {
        self.current_tti = tti;

        if self.timer_periodic.step() && self.trigger == BsrTrigger::None {
            tracing::debug!("BSR: periodic timer expired, triggering periodic BSR");
            self.set_trigger(BsrTrigger::Periodic);
        }
        if self.timer_retx.step() {
            // retxBSR-Timer only re-arms SR while periodic reporting is configured
            if self.timer_periodic.timeout() > 0 && self.check_any_channel() {
                tracing::debug!("BSR: reTX timer expired with data pending, triggering regular BSR");
                self.set_trigger(BsrTrigger::Regular);
            }
        }

        for group in self.lcgs.iter_mut() {
            for (lcid, lc) in group.iter_mut() {
                lc.new_buffer = self.rlc.get_buffer_state(*lcid);
            }
        }

        if self.check_new_data() || self.check_highest_channel() {
            self.set_trigger(BsrTrigger::Regular);
        }

        for group in self.lcgs.iter_mut() {
            for lc in group.values_mut() {
                lc.old_buffer = lc.new_buffer;
            }
        }
    }

    fn generate_bsr(&mut self, nof_padding_bytes: usize) -> BsrReport {
        let mut buff_size = [0u32; NOF_LCG];
        let mut nof_lcg = 0;
        let mut lcg = 0;
        for (i, b) in buff_size.iter_mut().enumerate() {
            *b = self.buffer_state_lcg(i);
            if *b > 0 {
                nof_lcg += 1;
                lcg = i as u32;
            }
        }

        let format = if self.trigger == BsrTrigger::Padding {
            if nof_padding_bytes < 4 {
                if nof_lcg > 1 { BsrFormat::Truncated } else { BsrFormat::Short }
            } else {
                BsrFormat::Long
            }
        } else if nof_lcg > 1 {
            BsrFormat::Long
        } else {
            BsrFormat::Short
        };

        if format == BsrFormat::Truncated {
            lcg = self.max_priority_lcg_with_data();
            for (i, b) in buff_size.iter_mut().enumerate() {
                if i as u32 != lcg {
                    *b = 0;
                }
            }
        }

        tracing::info!(
            "BSR: trigger {:?}, format {}, value={},{},{},{}",
            self.trigger,
            format,
            buff_size[0],
            buff_size[1],
            buff_size[2],
            buff_size[3]
        );

        if self.timer_periodic.timeout() > 0 && format != BsrFormat::Truncated {
            self.timer_periodic.set(self.timer_periodic.timeout());
            self.timer_periodic.run();
            tracing::debug!("BSR: started periodicBSR-Timer");
        }

        BsrReport { format, buff_size, lcg }
    }

    /// Decides whether a Regular or Periodic BSR goes into a grant of `grant_size` bytes.
    /// The trigger is cancelled either way. A BSR is left out when the grant would carry
    /// all pending data but not the BSR and its subheader on top.
    pub fn need_to_send_bsr_on_ul_grant(&mut self, grant_size: usize) -> Option<BsrReport> {
        let mut included = None;

        if matches!(self.trigger, BsrTrigger::Regular | BsrTrigger::Periodic) {
            let total: i64 = self
                .lcgs
                .iter()
                .flat_map(|g| g.values())
                .filter(|lc| lc.new_buffer > 0)
                .map(|lc| (size_header_sdu(lc.new_buffer as usize) + lc.new_buffer as usize) as i64)
                .sum::<i64>()
                - 1;

            let report = self.generate_bsr(0);
            let bsr_sz = report.ce_len() as i64;
            let grant = grant_size as i64;

            if total <= grant && total + 1 + bsr_sz > grant {
                tracing::debug!("BSR: grant of {} fits all {} pending bytes, BSR cancelled", grant_size, total);
            } else if bsr_sz + 1 > grant {
                tracing::debug!("BSR: grant of {} too small for the BSR CE", grant_size);
            } else {
                tracing::debug!("BSR: including {} BSR in grant of {} bytes", report.format, grant_size);
                included = Some(report);
            }
            self.set_trigger(BsrTrigger::None);
        }

        // Any UL grant cancels a pending SR
        self.reset_sr = true;

        if self.timer_retx.timeout() > 0 {
            self.timer_retx.set(self.timer_retx.timeout());
            self.timer_retx.run();
            tracing::debug!("BSR: started retxBSR-Timer");
        }
        included
    }

    /// Padding BSR, only generated when no Regular or Periodic BSR made it into the PDU
    pub fn generate_padding_bsr(&mut self, nof_padding_bytes: usize) -> Option<BsrReport> {
        if nof_padding_bytes < 2 {
            return None;
        }
        self.set_trigger(BsrTrigger::Padding);
        let report = self.generate_bsr(nof_padding_bytes);
        self.set_trigger(BsrTrigger::None);
        Some(report)
    }

    /// True once per pending Regular BSR that has not yet requested resources
    pub fn need_to_send_sr(&mut self, tti: Tti) -> bool {
        if !self.sr_is_sent && self.trigger == BsrTrigger::Regular {
            self.reset_sr = false;
            self.sr_is_sent = true;
            tracing::debug!(tti = %tti, "BSR: need to send SR, trigger at {}", self.trigger_tti);
            return true;
        }
        false
    }

    pub fn need_to_reset_sr(&mut self) -> bool {
        if self.reset_sr {
            self.reset_sr = false;
            self.sr_is_sent = false;
            tracing::debug!("BSR: SR reset");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use lte_config::StackConfig;
    use lte_core::debug;

    use super::*;

    #[derive(Default)]
    struct Buffers(Mutex<HashMap<u32, u32>>);

    impl Buffers {
        fn set(&self, lcid: u32, n: u32) {
            self.0.lock().unwrap().insert(lcid, n);
        }
    }

    impl RlcInterfaceMac for Buffers {
        fn get_buffer_state(&self, lcid: u32) -> u32 {
            self.0.lock().unwrap().get(&lcid).copied().unwrap_or(0)
        }
        fn read_pdu(&self, _lcid: u32, _max_bytes: usize) -> Vec<u8> {
            Vec::new()
        }
        fn write_pdu(&self, _lcid: u32, _payload: &[u8]) {}
        fn write_pdu_bcch_bch(&self, _payload: &[u8]) {}
        fn write_pdu_bcch_dlsch(&self, _payload: &[u8]) {}
        fn write_pdu_pcch(&self, _payload: &[u8]) {}
    }

    fn make(periodic: u32, retx: u32) -> (BsrProc, Arc<Buffers>) {
        let mut cfg = StackConfig::new();
        cfg.mac_main.periodic_bsr_timer = periodic;
        cfg.mac_main.retx_bsr_timer = retx;
        let rlc = Arc::new(Buffers::default());
        let mut bsr = BsrProc::new(SharedConfig::from_config(cfg), rlc.clone());
        bsr.setup_lcid(1, 1, 1);
        bsr.setup_lcid(3, 2, 3);
        bsr.setup_lcid(4, 2, 4);
        (bsr, rlc)
    }

    #[test]
    fn test_regular_trigger_on_new_data() {
        debug::setup_logging_verbose();
        let (mut bsr, rlc) = make(0, 0);
        bsr.step(Tti::new(0));
        assert_eq!(bsr.trigger(), BsrTrigger::None);

        rlc.set(3, 100);
        bsr.step(Tti::new(1));
        assert_eq!(bsr.trigger(), BsrTrigger::Regular);
        assert!(bsr.need_to_send_sr(Tti::new(1)));
        assert!(!bsr.need_to_send_sr(Tti::new(2)));

        let report = bsr.need_to_send_bsr_on_ul_grant(50).unwrap();
        assert_eq!(report.format, BsrFormat::Short);
        assert_eq!(report.lcg, 2);
        assert_eq!(report.buff_size, [0, 0, 100, 0]);
        assert_eq!(bsr.trigger(), BsrTrigger::None);
        assert!(bsr.need_to_reset_sr());
    }

    #[test]
    fn test_lower_priority_data_does_not_retrigger() {
        debug::setup_logging_verbose();
        let (mut bsr, rlc) = make(0, 0);
        rlc.set(3, 100);
        bsr.step(Tti::new(0));
        bsr.need_to_send_bsr_on_ul_grant(50);

        // lcid 4 has lower priority than lcid 3, which already holds data
        rlc.set(4, 10);
        bsr.step(Tti::new(1));
        assert_eq!(bsr.trigger(), BsrTrigger::None);

        // lcid 1 outranks everything
        rlc.set(1, 10);
        bsr.step(Tti::new(2));
        assert_eq!(bsr.trigger(), BsrTrigger::Regular);

        let report = bsr.need_to_send_bsr_on_ul_grant(100).unwrap();
        assert_eq!(report.format, BsrFormat::Long);
        assert_eq!(report.buff_size, [0, 10, 110, 0]);
    }

    #[test]
    fn test_cancel_when_grant_fits_data_but_not_bsr() {
        debug::setup_logging_verbose();
        let (mut bsr, rlc) = make(0, 0);
        rlc.set(1, 10);
        bsr.step(Tti::new(0));
        // 10 bytes of data need 11 bytes as the last SDU; a short BSR would need 2 more
        assert!(bsr.need_to_send_bsr_on_ul_grant(12).is_none());
        assert_eq!(bsr.trigger(), BsrTrigger::None);
    }

    #[test]
    fn test_periodic_and_retx_timers() {
        debug::setup_logging_verbose();
        let (mut bsr, rlc) = make(5, 10);
        rlc.set(1, 10);
        bsr.step(Tti::new(0));
        // Regular BSR starts the periodic timer when generated
        bsr.need_to_send_bsr_on_ul_grant(100).unwrap();
        for t in 1..5 {
            bsr.step(Tti::new(t));
            assert_eq!(bsr.trigger(), BsrTrigger::None);
        }
        bsr.step(Tti::new(5));
        assert_eq!(bsr.trigger(), BsrTrigger::Periodic);
        // Periodic BSR does not request SR
        assert!(!bsr.need_to_send_sr(Tti::new(5)));
        bsr.need_to_send_bsr_on_ul_grant(100).unwrap();

        // reTX timer was restarted by the grant at tti 5, expires 10 TTIs later
        for t in 6..15 {
            bsr.step(Tti::new(t));
        }
        assert_ne!(bsr.trigger(), BsrTrigger::Regular);
        bsr.step(Tti::new(15));
        assert_eq!(bsr.trigger(), BsrTrigger::Regular);
    }

    #[test]
    fn test_padding_formats() {
        debug::setup_logging_verbose();
        let (mut bsr, rlc) = make(0, 0);
        assert!(bsr.generate_padding_bsr(1).is_none());
        let empty = bsr.generate_padding_bsr(2).unwrap();
        assert_eq!(empty.format, BsrFormat::Short);
        assert_eq!(empty.encode(), (UlSchLcid::ShortBsr, vec![0x00]));

        rlc.set(1, 10);
        rlc.set(3, 200);
        bsr.step(Tti::new(0));
        let trunc = bsr.generate_padding_bsr(3).unwrap();
        assert_eq!(trunc.format, BsrFormat::Truncated);
        assert_eq!(trunc.lcg, 1);
        assert_eq!(trunc.buff_size, [0, 10, 0, 0]);

        let long = bsr.generate_padding_bsr(4).unwrap();
        assert_eq!(long.format, BsrFormat::Long);
        assert_eq!(long.encode().1.len(), 3);
        assert_eq!(bsr.trigger(), BsrTrigger::None);
    }

    #[test]
    fn test_setup_lcid_moves_group() {
        let (mut bsr, _) = make(0, 0);
        assert_eq!(bsr.lcg_of(3), Some(2));
        bsr.setup_lcid(3, 0, 3);
        assert_eq!(bsr.lcg_of(3), Some(0));
        bsr.setup_lcid(5, 4, 1);
        assert_eq!(bsr.lcg_of(5), None);
    }
}
