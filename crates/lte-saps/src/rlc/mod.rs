/// What the MAC needs from the RLC. Implementations are shared with the
/// PDU-processing thread, so calls arrive from more than one thread.
pub trait RlcInterfaceMac: Send + Sync {
    /// Bytes waiting for transmission on `lcid`, including RLC headers
    fn get_buffer_state(&self, lcid: u32) -> u32;

    /// Pulls at most `max_bytes` for `lcid`. May return fewer bytes, or none.
    fn read_pdu(&self, lcid: u32, max_bytes: usize) -> Vec<u8>;

    fn write_pdu(&self, lcid: u32, payload: &[u8]);
    fn write_pdu_bcch_bch(&self, payload: &[u8]);
    fn write_pdu_bcch_dlsch(&self, payload: &[u8]);
    fn write_pdu_pcch(&self, payload: &[u8]);
}
