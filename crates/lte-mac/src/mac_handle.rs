use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use lte_core::{MAX_TB, Tti};
use lte_saps::{MacGrantDl, MacGrantUl, MacMetrics, PayloadHandle, TbActionDl, TbActionUl};

use crate::mac::Mac;

/// Runs a `Mac` with its tick thread and PDU-processing thread. The PHY callbacks go
/// through the handle and are serialized with the tick by the MAC lock.
pub struct MacHandle {
    mac: Arc<Mutex<Mac>>,
    tti_tx: Option<Sender<Tti>>,
    tick_thread: Option<JoinHandle<()>>,
    pdu_thread: Option<JoinHandle<()>>,
}

impl MacHandle {
    pub fn start(mut mac: Mac) -> io::Result<Self> {
        let pdu_thread = match mac.take_pdu_processor() {
            Some(processor) => Some(processor.spawn()?),
            None => None,
        };

        let mac = Arc::new(Mutex::new(mac));
        let (tti_tx, tti_rx) = unbounded::<Tti>();
        let tick_mac = Arc::clone(&mac);
        let tick_thread = thread::Builder::new().name("mac-tick".to_string()).spawn(move || {
            tracing::debug!("MAC tick thread started");
            while let Ok(tti) = tti_rx.recv() {
                lock_mac(&tick_mac).run_tti(tti);
            }
            tracing::debug!("TTI clock stopped, MAC tick thread exiting");
        })?;

        Ok(Self {
            mac,
            tti_tx: Some(tti_tx),
            tick_thread: Some(tick_thread),
            pdu_thread,
        })
    }

    /// Signals the start of `tti` to the tick thread
    pub fn tti_clock(&self, tti: Tti) {
        if let Some(tx) = &self.tti_tx {
            if tx.send(tti).is_err() {
                tracing::error!(tti = %tti, "MAC tick thread is gone, TTI dropped");
            }
        }
    }

    /// Runs `f` with exclusive access to the MAC
    pub fn with<R>(&self, f: impl FnOnce(&mut Mac) -> R) -> R {
        f(&mut lock_mac(&self.mac))
    }

    pub fn new_grant_dl(&self, grant: &MacGrantDl) -> TbActionDl {
        self.with(|mac| mac.new_grant_dl(grant))
    }

    pub fn write_payload(&self, h: PayloadHandle, data: &[u8]) -> bool {
        self.with(|mac| mac.write_payload(h, data))
    }

    pub fn tb_decoded(&self, grant: &MacGrantDl, ack: [bool; MAX_TB]) {
        self.with(|mac| mac.tb_decoded(grant, ack))
    }

    pub fn new_grant_ul(&self, grant: &MacGrantUl, ack: Option<bool>) -> TbActionUl {
        self.with(|mac| mac.new_grant_ul(grant, ack))
    }

    pub fn harq_recv(&self, tti: Tti, ack: bool) -> TbActionUl {
        self.with(|mac| mac.harq_recv(tti, ack))
    }

    pub fn get_metrics(&self) -> MacMetrics {
        self.with(|mac| mac.get_metrics())
    }

    /// Stops the tick thread after the queued TTIs were processed, then releases the MAC
    /// so the PDU thread sees its queue close
    pub fn stop(mut self) {
        self.tti_tx = None;
        if let Some(t) = self.tick_thread.take() {
            if t.join().is_err() {
                tracing::error!("MAC tick thread panicked");
            }
        }
        let pdu_thread = self.pdu_thread.take();
        if Arc::strong_count(&self.mac) > 1 {
            tracing::warn!("MAC still referenced elsewhere, not waiting for the PDU thread");
            return;
        }
        drop(self);
        if let Some(t) = pdu_thread {
            if t.join().is_err() {
                tracing::error!("MAC PDU thread panicked");
            }
        }
    }
}

/// A panic on another thread leaves the MAC usable; the poison flag is ignored
fn lock_mac(mac: &Mutex<Mac>) -> MutexGuard<'_, Mac> {
    mac.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
