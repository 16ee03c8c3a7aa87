use super::SchLcid;

/// 36.321 Table 6.2.1-1, LCID values for DL-SCH
/// Bits: 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlSchLcid {
    /// CCCH (0) or a logical channel 1..=10
    Sdu(u8),
    /// UE Contention Resolution Identity, 6 bytes
    ConResId,
    /// Timing Advance Command, 1 byte
    TaCmd,
    /// DRX Command, no payload
    DrxCmd,
    Padding,
}

pub const DL_CON_RES_ID_LEN: usize = 6;
pub const DL_TA_CMD_LEN: usize = 1;

impl std::convert::TryFrom<u8> for DlSchLcid {
    type Error = ();
    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0..=10 => Ok(DlSchLcid::Sdu(x)),
            28 => Ok(DlSchLcid::ConResId),
            29 => Ok(DlSchLcid::TaCmd),
            30 => Ok(DlSchLcid::DrxCmd),
            31 => Ok(DlSchLcid::Padding),
            _ => Err(()),
        }
    }
}

impl From<DlSchLcid> for u8 {
    fn from(e: DlSchLcid) -> Self {
        e.into_raw()
    }
}

impl SchLcid for DlSchLcid {
    fn from_raw(x: u8) -> Option<Self> {
        DlSchLcid::try_from(x).ok()
    }

    fn into_raw(self) -> u8 {
        match self {
            DlSchLcid::Sdu(lcid) => lcid,
            DlSchLcid::ConResId => 28,
            DlSchLcid::TaCmd => 29,
            DlSchLcid::DrxCmd => 30,
            DlSchLcid::Padding => 31,
        }
    }

    fn fixed_len(self) -> Option<usize> {
        match self {
            DlSchLcid::Sdu(_) => None,
            DlSchLcid::ConResId => Some(DL_CON_RES_ID_LEN),
            DlSchLcid::TaCmd => Some(DL_TA_CMD_LEN),
            DlSchLcid::DrxCmd => Some(0),
            DlSchLcid::Padding => Some(0),
        }
    }

    fn is_padding(self) -> bool {
        self == DlSchLcid::Padding
    }

    fn padding() -> Self {
        DlSchLcid::Padding
    }
}

impl core::fmt::Display for DlSchLcid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DlSchLcid::Sdu(0) => write!(f, "CCCH"),
            DlSchLcid::Sdu(lcid) => write!(f, "LCID{}", lcid),
            DlSchLcid::ConResId => write!(f, "CON_RES_ID"),
            DlSchLcid::TaCmd => write!(f, "TA_CMD"),
            DlSchLcid::DrxCmd => write!(f, "DRX_CMD"),
            DlSchLcid::Padding => write!(f, "PADDING"),
        }
    }
}
