pub mod dl_harq;
pub mod ul_harq;

pub use dl_harq::{DlHarqEntity, SoftBuffer};
pub use ul_harq::{UlHarqEntity, UlPduSource};

/// Cumulative moving average update with the `n`-th sample
pub(crate) fn cma(avg: f32, sample: f32, n: u64) -> f32 {
    avg + (sample - avg) / (n as f32 + 1.0)
}
