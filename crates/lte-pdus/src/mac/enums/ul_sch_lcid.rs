use super::SchLcid;

/// 36.321 Table 6.2.1-2, LCID values for UL-SCH
/// Bits: 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlSchLcid {
    /// CCCH (0) or a logical channel 1..=10
    Sdu(u8),
    /// Power Headroom Report, 1 byte
    Phr,
    /// C-RNTI, 2 bytes
    Crnti,
    /// Truncated BSR, 1 byte
    TruncBsr,
    /// Short BSR, 1 byte
    ShortBsr,
    /// Long BSR, 3 bytes
    LongBsr,
    Padding,
}

impl std::convert::TryFrom<u8> for UlSchLcid {
    type Error = ();
    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0..=10 => Ok(UlSchLcid::Sdu(x)),
            26 => Ok(UlSchLcid::Phr),
            27 => Ok(UlSchLcid::Crnti),
            28 => Ok(UlSchLcid::TruncBsr),
            29 => Ok(UlSchLcid::ShortBsr),
            30 => Ok(UlSchLcid::LongBsr),
            31 => Ok(UlSchLcid::Padding),
            _ => Err(()),
        }
    }
}

impl From<UlSchLcid> for u8 {
    fn from(e: UlSchLcid) -> Self {
        e.into_raw()
    }
}

impl SchLcid for UlSchLcid {
    fn from_raw(x: u8) -> Option<Self> {
        UlSchLcid::try_from(x).ok()
    }

    fn into_raw(self) -> u8 {
        match self {
            UlSchLcid::Sdu(lcid) => lcid,
            UlSchLcid::Phr => 26,
            UlSchLcid::Crnti => 27,
            UlSchLcid::TruncBsr => 28,
            UlSchLcid::ShortBsr => 29,
            UlSchLcid::LongBsr => 30,
            UlSchLcid::Padding => 31,
        }
    }

    fn fixed_len(self) -> Option<usize> {
        match self {
            UlSchLcid::Sdu(_) => None,
            UlSchLcid::Phr => Some(1),
            UlSchLcid::Crnti => Some(2),
            UlSchLcid::TruncBsr | UlSchLcid::ShortBsr => Some(1),
            UlSchLcid::LongBsr => Some(3),
            UlSchLcid::Padding => Some(0),
        }
    }

    fn is_padding(self) -> bool {
        self == UlSchLcid::Padding
    }

    fn padding() -> Self {
        UlSchLcid::Padding
    }
}

impl core::fmt::Display for UlSchLcid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UlSchLcid::Sdu(0) => write!(f, "CCCH"),
            UlSchLcid::Sdu(lcid) => write!(f, "LCID{}", lcid),
            UlSchLcid::Phr => write!(f, "PHR"),
            UlSchLcid::Crnti => write!(f, "CRNTI"),
            UlSchLcid::TruncBsr => write!(f, "TRUNC_BSR"),
            UlSchLcid::ShortBsr => write!(f, "SHORT_BSR"),
            UlSchLcid::LongBsr => write!(f, "LONG_BSR"),
            UlSchLcid::Padding => write!(f, "PADDING"),
        }
    }
}
