use std::sync::Arc;

use crossbeam_channel::Sender;
use lte_core::Tti;
use lte_pdus::{DlSchLcid, parse_sch_pdu};
use lte_saps::{PayloadHandle, RlcInterfaceMac};

use super::buffer_pool::BufferPool;

/// A received DL-SCH PDU waiting for the PDU thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPdu {
    pub tti: Tti,
    pub data: Vec<u8>,
}

/// Receives the contention resolution identity found in a Temp C-RNTI PDU.
/// Returns true when it matches the identity the UE sent in Msg3.
pub trait ContentionResolutionObserver {
    fn contention_resolution_id_received(&mut self, id: u64) -> bool;
}

/// Owns the DL payload buffers and routes decoded PDUs. Unicast PDUs are queued for
/// the PDU thread, broadcast goes straight to RLC and Temp C-RNTI PDUs are inspected
/// for contention resolution before anything else happens to them.
pub struct Demux {
    pool: BufferPool,
    queue_tx: Sender<QueuedPdu>,
    rlc: Arc<dyn RlcInterfaceMac>,
    uecrid_successful: bool,
}

impl Demux {
    pub fn new(pool: BufferPool, queue_tx: Sender<QueuedPdu>, rlc: Arc<dyn RlcInterfaceMac>) -> Self {
        Self {
            pool,
            queue_tx,
            rlc,
            uecrid_successful: false,
        }
    }

    pub fn request_buffer(&mut self, len: usize) -> Option<PayloadHandle> {
        self.pool.request(len)
    }

    pub fn payload(&self, h: PayloadHandle) -> Option<&[u8]> {
        self.pool.get(h)
    }

    pub fn payload_mut(&mut self, h: PayloadHandle) -> Option<&mut [u8]> {
        self.pool.get_mut(h)
    }

    pub fn deallocate(&mut self, h: PayloadHandle) {
        self.pool.release(h);
    }

    pub fn nof_free_buffers(&self) -> usize {
        self.pool.nof_available()
    }

    /// Copies the PDU out of its slot and queues it for the PDU thread
    pub fn push_pdu(&mut self, h: PayloadHandle, tti: Tti) {
        let Some(data) = self.pool.get(h).map(|d| d.to_vec()) else {
            tracing::warn!("push_pdu with unknown payload handle {:?}", h);
            return;
        };
        self.pool.release(h);
        self.enqueue(QueuedPdu { tti, data });
    }

    /// SI messages bypass the queue
    pub fn push_pdu_bcch(&mut self, h: PayloadHandle) {
        match self.pool.get(h) {
            Some(data) => {
                tracing::debug!("<- BCCH-DLSCH len={}", data.len());
                self.rlc.write_pdu_bcch_dlsch(data);
            }
            None => tracing::warn!("push_pdu_bcch with unknown payload handle {:?}", h),
        }
        self.pool.release(h);
    }

    /// Handles a PDU received on the Temporary C-RNTI. The contention resolution
    /// identity, if present, is handed to `observer`; the PDU is only forwarded when
    /// the identity matched.
    pub fn push_pdu_temp_crnti(&mut self, h: PayloadHandle, tti: Tti, observer: &mut dyn ContentionResolutionObserver) {
        self.uecrid_successful = false;
        let Some(data) = self.pool.get(h).map(|d| d.to_vec()) else {
            tracing::warn!("push_pdu_temp_crnti with unknown payload handle {:?}", h);
            return;
        };
        self.pool.release(h);

        match parse_sch_pdu::<DlSchLcid>(&data) {
            Ok(subpdus) => {
                for sp in subpdus.iter() {
                    if let Some(id) = sp.con_res_id() {
                        tracing::debug!(tti = %tti, "<- MAC CE ConResId 0x{:012x}", id);
                        self.uecrid_successful = observer.contention_resolution_id_received(id);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(tti = %tti, "Discarding Temp C-RNTI PDU: {}", e);
                return;
            }
        }

        if self.uecrid_successful {
            self.enqueue(QueuedPdu { tti, data });
        } else {
            tracing::debug!(tti = %tti, "Discarding Temp C-RNTI PDU without matching contention resolution id");
        }
    }

    pub fn get_uecrid_successful(&self) -> bool {
        self.uecrid_successful
    }

    fn enqueue(&self, pdu: QueuedPdu) {
        if self.queue_tx.send(pdu).is_err() {
            tracing::error!("PDU queue disconnected, dropping PDU");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crossbeam_channel::unbounded;
    use lte_core::debug;

    use super::*;

    #[derive(Default)]
    struct BcchSink {
        bcch: Mutex<Vec<Vec<u8>>>,
    }

    impl RlcInterfaceMac for BcchSink {
        fn get_buffer_state(&self, _lcid: u32) -> u32 {
            0
        }
        fn read_pdu(&self, _lcid: u32, _max_bytes: usize) -> Vec<u8> {
            Vec::new()
        }
        fn write_pdu(&self, _lcid: u32, _payload: &[u8]) {}
        fn write_pdu_bcch_bch(&self, _payload: &[u8]) {}
        fn write_pdu_bcch_dlsch(&self, payload: &[u8]) {
            self.bcch.lock().unwrap().push(payload.to_vec());
        }
        fn write_pdu_pcch(&self, _payload: &[u8]) {}
    }

    struct FixedId(u64);

    impl ContentionResolutionObserver for FixedId {
        fn contention_resolution_id_received(&mut self, id: u64) -> bool {
            id == self.0
        }
    }

    fn write(demux: &mut Demux, bytes: &[u8]) -> PayloadHandle {
        let h = demux.request_buffer(bytes.len()).unwrap();
        demux.payload_mut(h).unwrap().copy_from_slice(bytes);
        h
    }

    #[test]
    fn test_push_and_bcch() {
        debug::setup_logging_verbose();
        let rlc = Arc::new(BcchSink::default());
        let (tx, rx) = unbounded();
        let mut demux = Demux::new(BufferPool::new(4, 100), tx, rlc.clone());

        let h = write(&mut demux, &[0x01, 0xaa]);
        demux.push_pdu(h, Tti::new(7));
        assert_eq!(rx.try_recv().unwrap(), QueuedPdu { tti: Tti::new(7), data: vec![0x01, 0xaa] });

        let h = write(&mut demux, &[0x11, 0x22]);
        demux.push_pdu_bcch(h);
        assert_eq!(rlc.bcch.lock().unwrap().as_slice(), &[vec![0x11, 0x22]]);
        assert!(rx.try_recv().is_err());
        assert_eq!(demux.nof_free_buffers(), 4);
    }

    #[test]
    fn test_temp_crnti_contention_resolution() {
        debug::setup_logging_verbose();
        let (tx, rx) = unbounded();
        let mut demux = Demux::new(BufferPool::new(4, 100), tx, Arc::new(BcchSink::default()));
        // ConResId CE followed by padding
        let pdu = [0x3c, 0x1f, 1, 2, 3, 4, 5, 6];

        let h = write(&mut demux, &pdu);
        demux.push_pdu_temp_crnti(h, Tti::new(1), &mut FixedId(0x0102_0304_0506));
        assert!(demux.get_uecrid_successful());
        assert_eq!(rx.try_recv().unwrap().data, pdu.to_vec());

        let h = write(&mut demux, &pdu);
        demux.push_pdu_temp_crnti(h, Tti::new(2), &mut FixedId(0x0102_0304_0507));
        assert!(!demux.get_uecrid_successful());
        assert!(rx.try_recv().is_err());
        assert_eq!(demux.nof_free_buffers(), 4);
    }
}
