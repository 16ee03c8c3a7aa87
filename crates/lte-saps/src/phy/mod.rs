mod grants;

pub use grants::*;

use lte_core::{RntiType, Tti};

/// What the MAC needs from the PHY. All calls take `&self` as the PHY is shared
/// between the tick thread, the PDU thread and the PHY workers.
pub trait PhyInterfaceMac: Send + Sync {
    /// Arms PRACH with the current RACH configuration
    fn configure_prach_params(&self);

    /// `mask` is -1 when no PRACH mask index applies
    fn prach_send(&self, preamble: u32, mask: i32, target_power_dbm: f32);

    /// TTI in which the last preamble went out, None while still pending
    fn prach_tx_tti(&self) -> Option<Tti>;

    /// Timing advance from a random access response
    fn set_timeadv_rar(&self, ta_cmd: u32);

    /// Timing advance from a TA command control element
    fn set_timeadv(&self, ta_cmd: u32);

    /// 20-bit UL grant carried in the random access response
    fn set_rar_grant(&self, tti: Tti, grant: u32);

    /// Starts a DL PDCCH search. `window` bounds it in time, None means until reset.
    fn pdcch_dl_search(&self, rnti_type: RntiType, rnti: u16, window: Option<(Tti, Tti)>);
    fn pdcch_ul_search(&self, rnti_type: RntiType, rnti: u16);
    fn pdcch_dl_search_reset(&self);
    fn pdcch_ul_search_reset(&self);

    fn set_crnti(&self, crnti: u16);
    fn get_current_tti(&self) -> Tti;

    /// Signals a scheduling request on the next PUCCH opportunity
    fn sr_send(&self);

    /// TTI of the last transmitted SR, None if no SR has gone out yet
    fn sr_last_tx_tti(&self) -> Option<Tti>;

    /// Current power headroom in dB
    fn get_phr(&self) -> f32;

    /// Current downlink pathloss in dB
    fn get_pathloss_db(&self) -> f32;
}
