//! Multiplexing and logical channel prioritization, 36.321 §5.4.3

use std::sync::Arc;

use lte_core::Tti;
use lte_pdus::phr::encode_phr;
use lte_pdus::{PduBuildErr, SchPduBuilder, UlSchLcid, size_header_sdu};
use lte_saps::RlcInterfaceMac;

use crate::harq::ul_harq::UlPduSource;
use crate::procs::{BsrProc, PhrProc};

/// Transmit-side state of a logical channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannel {
    pub lcid: u32,
    pub lcg: u32,
    /// Lower value is served first
    pub priority: u32,
    /// Bytes per TTI, -1 for infinity
    pub pbr: i32,
    /// Bucket size duration, TTIs
    pub bsd: u32,
    /// Token bucket level, may go negative after a large grant
    pub bj: i64,
    /// RLC backlog sampled at the start of the current PDU
    pub buffer_len: u32,
    /// Bytes scheduled for the current PDU
    pub sched_len: u32,
}

impl LogicalChannel {
    fn bucket_size(&self) -> i64 {
        self.bsd as i64 * self.pbr as i64
    }
}

/// Bytes a scheduled SDU takes in the PDU, subheader included
fn sdu_cost(len: u32, is_last: bool) -> usize {
    match (len, is_last) {
        (0, _) => 0,
        (l, true) => 1 + l as usize,
        (l, false) => size_header_sdu(l as usize) + l as usize,
    }
}

/// Largest SDU that fits in `space` bytes together with its own subheader
fn fit_sdu(space: usize, is_last: bool) -> u32 {
    let len = if is_last {
        space.saturating_sub(1)
    } else if space >= 3 + 128 {
        space - 3
    } else {
        space.saturating_sub(2).min(127)
    };
    len.min(u32::MAX as usize) as u32
}

pub struct Mux {
    rlc: Arc<dyn RlcInterfaceMac>,
    lch: Vec<LogicalChannel>,
    pending_crnti_ce: u16,

    msg3_capacity: usize,
    msg3_pdu: Option<Vec<u8>>,
    msg3_pending: bool,
    msg3_transmitted: bool,
}

impl Mux {
    pub fn new(rlc: Arc<dyn RlcInterfaceMac>, msg3_capacity: usize) -> Self {
        Self {
            rlc,
            lch: Vec::new(),
            pending_crnti_ce: 0,
            msg3_capacity,
            msg3_pdu: None,
            msg3_pending: false,
            msg3_transmitted: false,
        }
    }

    pub fn reset(&mut self) {
        for ch in self.lch.iter_mut() {
            ch.bj = 0;
        }
        self.msg3_pending = false;
        self.pending_crnti_ce = 0;
    }

    /// Adds or reconfigures a logical channel. Channels stay sorted by priority.
    pub fn setup_lcid(&mut self, lcid: u32, lcg: u32, priority: u32, pbr: i32, bsd: u32) {
        match self.lch.iter_mut().find(|ch| ch.lcid == lcid) {
            Some(ch) => {
                ch.lcg = lcg;
                ch.priority = priority;
                ch.pbr = pbr;
                ch.bsd = bsd;
            }
            None => self.lch.push(LogicalChannel {
                lcid,
                lcg,
                priority,
                pbr,
                bsd,
                bj: 0,
                buffer_len: 0,
                sched_len: 0,
            }),
        }
        for ch in self.lch.iter().filter(|ch| ch.priority == priority && ch.lcid != lcid) {
            tracing::warn!("lcid {} and {} have the same priority {}", ch.lcid, lcid, priority);
        }
        self.lch.sort_by_key(|ch| ch.priority);
        tracing::debug!("Mux: configured lcid={} lcg={} prio={} pbr={} bsd={}", lcid, lcg, priority, pbr, bsd);
    }

    pub fn clear_lcid(&mut self, lcid: u32) {
        self.lch.retain(|ch| ch.lcid != lcid);
    }

    pub fn logical_channels(&self) -> &[LogicalChannel] {
        &self.lch
    }

    /// A C-RNTI CE goes into the next PDU unless that PDU carries CCCH
    pub fn append_crnti_ce_next_tx(&mut self, crnti: u16) {
        self.pending_crnti_ce = crnti;
    }

    /// Bytes waiting on CCCH, the candidate Msg3 content
    pub fn pending_ccch_len(&self) -> u32 {
        self.rlc.get_buffer_state(0)
    }

    fn update_bj(&mut self) {
        for ch in self.lch.iter_mut() {
            if ch.pbr >= 0 {
                ch.bj = (ch.bj + ch.pbr as i64).min(ch.bucket_size());
            }
        }
    }

    /// PDU bytes taken by all scheduled SDUs except the one at `skip`. `skip_is_last`
    /// tells whether that channel would be the last SDU in the PDU.
    fn sched_cost_without(&self, skip: usize, skip_is_last: bool) -> usize {
        let last_other = (0..self.lch.len()).rev().find(|j| *j != skip && self.lch[*j].sched_len > 0);
        self.lch
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != skip)
            .map(|(j, ch)| sdu_cost(ch.sched_len, !skip_is_last && Some(j) == last_other))
            .sum()
    }

    /// Grows the allocation of channel `i` by up to `max_add` bytes within `budget`.
    /// Returns the number of bytes added.
    fn sched_sdu(&mut self, i: usize, budget: usize, max_add: u32) -> u32 {
        let ch = &self.lch[i];
        let want = (ch.buffer_len - ch.sched_len).min(max_add);
        if want == 0 {
            return 0;
        }
        let is_last = !self.lch[i + 1..].iter().any(|c| c.sched_len > 0);
        let others = self.sched_cost_without(i, is_last);
        let space = budget.saturating_sub(others);
        let ch = &mut self.lch[i];
        let new_len = (ch.sched_len + want).min(fit_sdu(space, is_last));
        if new_len <= ch.sched_len {
            return 0;
        }
        let added = new_len - ch.sched_len;
        ch.sched_len = new_len;
        tracing::trace!("Mux: scheduled lcid={} buffer={} allocated={}", ch.lcid, ch.buffer_len, ch.sched_len);
        added
    }

    fn log_channel_state(&self, round: &str) {
        for ch in self.lch.iter() {
            tracing::trace!(
                "{}: lcid={} lcg={} prio={} bj={} pbr={} bsd={} buffer_len={} sched_len={}",
                round,
                ch.lcid,
                ch.lcg,
                ch.priority,
                ch.bj,
                ch.pbr,
                ch.bsd,
                ch.buffer_len,
                ch.sched_len
            );
        }
    }

    /// Assembles an UL-SCH PDU of exactly `pdu_len` bytes
    pub fn pdu_get(
        &mut self,
        pdu_len: usize,
        tti: Tti,
        pid: usize,
        bsr: &mut BsrProc,
        phr: &mut PhrProc,
    ) -> Result<Vec<u8>, PduBuildErr> {
        self.update_bj();
        let mut pdu = SchPduBuilder::<UlSchLcid>::new(pdu_len);

        // UL-CCCH is exclusive, else the C-RNTI CE
        let ccch_len = self.rlc.get_buffer_state(0);
        let mut has_ccch = false;
        if ccch_len > 0 && pdu.rem_space() > 1 {
            let max = (ccch_len as usize).min(pdu.rem_space() - 1);
            let sdu = self.rlc.read_pdu(0, max);
            if !sdu.is_empty() {
                let len = sdu.len();
                match pdu.add_sdu(UlSchLcid::Sdu(0), sdu) {
                    Ok(()) => {
                        has_ccch = true;
                        tracing::debug!(tti = %tti, "Mux: CCCH SDU len={}", len);
                    }
                    Err(e) => tracing::warn!(tti = %tti, "Mux: CCCH SDU not added: {}", e),
                }
            }
        }
        if self.pending_crnti_ce != 0 {
            if has_ccch {
                tracing::warn!("Pending C-RNTI CE was not inserted because message was for CCCH");
            } else if let Err(e) = pdu.add_ce(UlSchLcid::Crnti, &self.pending_crnti_ce.to_be_bytes()) {
                tracing::warn!("Pending C-RNTI CE could not be inserted in MAC PDU: {}", e);
            }
        }
        self.pending_crnti_ce = 0;

        for ch in self.lch.iter_mut() {
            ch.sched_len = 0;
            ch.buffer_len = if ch.lcid == 0 { 0 } else { self.rlc.get_buffer_state(ch.lcid) };
        }

        let mut regular_bsr = None;
        if let Some(report) = bsr.need_to_send_bsr_on_ul_grant(pdu.rem_space()) {
            let (lcid, payload) = report.encode();
            match pdu.add_ce(lcid, &payload) {
                Ok(idx) => regular_bsr = Some((idx, report)),
                Err(e) => tracing::debug!("Mux: BSR CE does not fit: {}", e),
            }
        }

        if let Some(phr_db) = phr.generate_phr_on_ul_grant() {
            if let Err(e) = pdu.add_ce(UlSchLcid::Phr, &[encode_phr(phr_db)]) {
                tracing::debug!("Mux: PHR CE does not fit: {}", e);
            }
        }

        if !has_ccch {
            let budget = pdu.rem_space();

            // Channels with tokens left, up to their bucket level
            for i in 0..self.lch.len() {
                let ch = &self.lch[i];
                if ch.lcid == 0 {
                    continue;
                }
                let max = if ch.pbr < 0 { u32::MAX } else { ch.bj.clamp(0, u32::MAX as i64) as u32 };
                if max == 0 {
                    continue;
                }
                let added = self.sched_sdu(i, budget, max);
                self.lch[i].bj -= added as i64;
            }
            self.log_channel_state("First round of allocation");

            // Whatever space is left goes by priority regardless of tokens
            for i in 0..self.lch.len() {
                if self.lch[i].lcid != 0 {
                    self.sched_sdu(i, budget, u32::MAX);
                }
            }
            self.log_channel_state("Second round of allocation");

            // Leftover room extends the last scheduled channel
            if let Some(last) = self.lch.iter().rposition(|ch| ch.sched_len > 0) {
                self.sched_sdu(last, budget, u32::MAX);
            }
        }

        let mut sent = [0u32; lte_core::NOF_LCG];
        for ch in self.lch.iter() {
            if ch.sched_len == 0 {
                continue;
            }
            let mut sdu = self.rlc.read_pdu(ch.lcid, ch.sched_len as usize);
            if sdu.is_empty() {
                continue;
            }
            if sdu.len() > ch.sched_len as usize {
                tracing::warn!("RLC returned {} bytes for lcid={}, {} requested", sdu.len(), ch.lcid, ch.sched_len);
                sdu.truncate(ch.sched_len as usize);
            }
            let len = sdu.len() as u32;
            match pdu.add_sdu(UlSchLcid::Sdu(ch.lcid as u8), sdu) {
                Ok(()) => {
                    if let Some(s) = sent.get_mut(ch.lcg as usize) {
                        *s += len;
                    }
                    tracing::debug!(tti = %tti, "Mux: SDU lcid={} len={}", ch.lcid, len);
                }
                Err(e) => tracing::warn!("Mux: SDU lcid={} len={} not added: {}", ch.lcid, len, e),
            }
        }

        match regular_bsr {
            Some((idx, report)) => {
                let (lcid, payload) = report.after_tx(&sent).encode();
                pdu.update_ce(idx, lcid, &payload)?;
            }
            None => {
                if let Some(report) = bsr.generate_padding_bsr(pdu.rem_space()) {
                    let (lcid, payload) = report.after_tx(&sent).encode();
                    if let Err(e) = pdu.add_ce(lcid, &payload) {
                        tracing::debug!("Mux: padding BSR does not fit: {}", e);
                    }
                }
            }
        }

        let used = pdu.used();
        let out = pdu.build()?;
        tracing::debug!(tti = %tti, "Mux: assembled PDU for pid={} with {}/{} bytes", pid, used, pdu_len);
        Ok(out)
    }

    pub fn msg3_flush(&mut self) {
        tracing::debug!("Msg3 buffer flushed");
        self.msg3_pdu = None;
        self.msg3_transmitted = false;
        self.msg3_pending = false;
    }

    pub fn msg3_prepare(&mut self) {
        self.msg3_transmitted = false;
        self.msg3_pending = true;
    }

    pub fn msg3_is_pending(&self) -> bool {
        self.msg3_pending
    }

    pub fn msg3_is_transmitted(&self) -> bool {
        self.msg3_transmitted
    }

    pub fn msg3_is_empty(&self) -> bool {
        self.msg3_pdu.is_none()
    }

    /// Msg3 is assembled once per random access attempt, later calls return the same bytes
    pub fn msg3_get(&mut self, pdu_len: usize, bsr: &mut BsrProc, phr: &mut PhrProc) -> Option<Vec<u8>> {
        if pdu_len > self.msg3_capacity {
            tracing::error!("Msg3 size {} exceeds buffer of {} bytes", pdu_len, self.msg3_capacity);
            return None;
        }
        if self.msg3_pdu.is_none() {
            match self.pdu_get(pdu_len, Tti::default(), 0, bsr, phr) {
                Ok(pdu) => {
                    self.msg3_pdu = Some(pdu);
                    self.msg3_pending = false;
                }
                Err(e) => {
                    tracing::error!("Moving PDU from Mux unit to Msg3 buffer: {}", e);
                    return None;
                }
            }
        }
        self.msg3_transmitted = true;
        self.msg3_pdu.clone()
    }
}

/// Mux together with the procedures that contribute control elements
pub struct MuxAccess<'a> {
    pub mux: &'a mut Mux,
    pub bsr: &'a mut BsrProc,
    pub phr: &'a mut PhrProc,
}

impl UlPduSource for MuxAccess<'_> {
    fn pdu_get(&mut self, pdu_len: usize, tti: Tti, pid: usize) -> Option<Vec<u8>> {
        match self.mux.pdu_get(pdu_len, tti, pid, self.bsr, self.phr) {
            Ok(pdu) => Some(pdu),
            Err(e) => {
                tracing::error!(tti = %tti, "Failed to assemble UL PDU of {} bytes: {}", pdu_len, e);
                None
            }
        }
    }

    fn msg3_get(&mut self, pdu_len: usize) -> Option<Vec<u8>> {
        self.mux.msg3_get(pdu_len, self.bsr, self.phr)
    }

    fn msg3_is_pending(&self) -> bool {
        self.mux.msg3_is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sdu() {
        assert_eq!(fit_sdu(0, true), 0);
        assert_eq!(fit_sdu(11, true), 10);
        assert_eq!(fit_sdu(12, false), 10);
        assert_eq!(fit_sdu(200, false), 197);
        assert_eq!(fit_sdu(130, false), 127);
        assert_eq!(fit_sdu(131, false), 128);
    }

    #[test]
    fn test_sdu_cost() {
        assert_eq!(sdu_cost(0, false), 0);
        assert_eq!(sdu_cost(10, true), 11);
        assert_eq!(sdu_cost(10, false), 12);
        assert_eq!(sdu_cost(200, false), 203);
    }
}
