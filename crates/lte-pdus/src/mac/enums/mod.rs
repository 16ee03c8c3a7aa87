pub mod dl_sch_lcid;
pub mod ul_sch_lcid;

pub use dl_sch_lcid::DlSchLcid;
pub use ul_sch_lcid::UlSchLcid;

/// Common view on the DL and UL LCID tables, used by the shared subheader codec
pub trait SchLcid: Copy + core::fmt::Debug {
    fn from_raw(x: u8) -> Option<Self>;
    fn into_raw(self) -> u8;

    /// Size of a fixed-length control element, None for SDUs that carry an L field
    fn fixed_len(self) -> Option<usize>;

    fn is_padding(self) -> bool;

    fn padding() -> Self;

    /// Logical channel id when this is an SDU
    fn sdu_lcid(self) -> Option<u8> {
        match self.fixed_len() {
            None => Some(self.into_raw()),
            Some(_) => None,
        }
    }
}
