/// Counters exposed upward. Reset every time they are read through the MAC.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacMetrics {
    pub tx_pkts: u32,
    pub tx_errors: u32,
    /// Transmitted bits since the last read
    pub tx_brate: u64,
    pub rx_pkts: u32,
    pub rx_errors: u32,
    /// Received bits since the last read
    pub rx_brate: u64,
    /// Pending uplink bytes over all logical channels
    pub ul_buffer: u32,
    /// Cumulative moving average of retransmissions per DL packet
    pub dl_retx_avg: f32,
    /// Cumulative moving average of transmissions per UL packet
    pub ul_retx_avg: f32,
}
