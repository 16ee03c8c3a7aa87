use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use lte_core::unimplemented_log;
use lte_pdus::{DlSchLcid, parse_sch_pdu};
use lte_saps::{PhyInterfaceMac, RlcInterfaceMac};

use super::demux::QueuedPdu;

/// Notifications from the PDU thread back to the tick thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduEvent {
    /// A Timing Advance Command was applied, the time alignment timer must restart
    TimeAdvanceCmd(u32),
}

/// Unpacks queued DL-SCH PDUs, hands SDUs to RLC and applies control elements.
/// Runs on its own thread so RLC processing never stalls the PHY callbacks.
pub struct PduProcessor {
    queue_rx: Receiver<QueuedPdu>,
    event_tx: Sender<PduEvent>,
    rlc: Arc<dyn RlcInterfaceMac>,
    phy: Arc<dyn PhyInterfaceMac>,
}

impl PduProcessor {
    pub fn new(
        queue_rx: Receiver<QueuedPdu>,
        event_tx: Sender<PduEvent>,
        rlc: Arc<dyn RlcInterfaceMac>,
        phy: Arc<dyn PhyInterfaceMac>,
    ) -> Self {
        Self { queue_rx, event_tx, rlc, phy }
    }

    /// Processes whatever is queued without blocking. Returns the number of PDUs handled.
    pub fn drain(&self) -> usize {
        let mut n = 0;
        while let Ok(pdu) = self.queue_rx.try_recv() {
            self.process_pdu(&pdu);
            n += 1;
        }
        n
    }

    /// Blocks on the queue until every sender is gone
    pub fn run(self) {
        tracing::debug!("PDU thread started");
        while let Ok(pdu) = self.queue_rx.recv() {
            self.process_pdu(&pdu);
        }
        tracing::debug!("PDU queue closed, PDU thread exiting");
    }

    pub fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name("mac-pdu".to_string()).spawn(move || self.run())
    }

    pub fn process_pdu(&self, pdu: &QueuedPdu) {
        let subpdus = match parse_sch_pdu::<DlSchLcid>(&pdu.data) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(tti = %pdu.tti, "Dropping malformed DL-SCH PDU len={}: {}", pdu.data.len(), e);
                return;
            }
        };

        for sp in subpdus.iter() {
            match sp.lcid {
                DlSchLcid::Sdu(lcid) => {
                    // All-zero SRB0 payloads come from decoding garbage on a Temp C-RNTI
                    if lcid == 0 && sp.payload.iter().all(|b| *b == 0) {
                        tracing::warn!(tti = %pdu.tti, "Skipping all-zero CCCH SDU len={}", sp.payload.len());
                        continue;
                    }
                    tracing::debug!(tti = %pdu.tti, "<- SDU lcid={} len={}", lcid, sp.payload.len());
                    self.rlc.write_pdu(lcid as u32, sp.payload);
                }
                DlSchLcid::TaCmd => {
                    if let Some(ta) = sp.ta_cmd() {
                        tracing::debug!(tti = %pdu.tti, "<- MAC CE TA command {}", ta);
                        self.phy.set_timeadv(ta);
                        if self.event_tx.send(PduEvent::TimeAdvanceCmd(ta)).is_err() {
                            tracing::warn!("Event channel closed, TA timer not restarted");
                        }
                    }
                }
                DlSchLcid::ConResId | DlSchLcid::Padding => {}
                DlSchLcid::DrxCmd => unimplemented_log!("DRX command"),
            }
        }
    }
}
