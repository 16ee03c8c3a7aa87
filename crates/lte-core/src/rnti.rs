/// System Information RNTI
pub const SI_RNTI: u16 = 0xFFFF;

/// Paging RNTI
pub const P_RNTI: u16 = 0xFFFE;

/// Kind of RNTI a PDCCH grant was scrambled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RntiType {
    /// C-RNTI, dedicated user traffic
    User,
    /// Temporary C-RNTI handed out in the random access response
    Temp,
    /// RA-RNTI, random access responses
    Rar,
    /// SI-RNTI, broadcast system information
    Si,
    /// P-RNTI, paging
    Pch,
    /// Semi-persistent scheduling C-RNTI
    Sps,
}

impl RntiType {
    /// Grants addressed to the UE itself, as opposed to broadcast or RA traffic
    pub fn is_dedicated(self) -> bool {
        matches!(self, RntiType::User | RntiType::Temp | RntiType::Sps)
    }
}

/// Identities the MAC holds for the UE.
/// Written by the random access procedure, the demux and the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UeRnti {
    /// C-RNTI, 0 while none has been assigned
    pub crnti: u16,
    /// Temporary C-RNTI from the last random access response, 0 when unset
    pub temp_rnti: u16,
    /// 48-bit UE contention resolution identity (first bytes of the CCCH SDU)
    pub contention_id: u64,
}

impl UeRnti {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_crnti(&self) -> bool {
        self.crnti != 0
    }

    pub fn has_temp_rnti(&self) -> bool {
        self.temp_rnti != 0
    }
}
