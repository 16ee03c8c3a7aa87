#[derive(Debug, PartialEq, Eq)]
pub enum PduBuildErr {
    /// Element does not fit in the remaining PDU space
    NoSpace { needed: usize, available: usize },
    /// Target buffer cannot hold the PDU
    BufferTooSmall { needed: usize, capacity: usize },
}

impl core::fmt::Display for PduBuildErr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PduBuildErr::NoSpace { needed, available } => {
                write!(f, "no space in PDU: need {} bytes, {} available", needed, available)
            }
            PduBuildErr::BufferTooSmall { needed, capacity } => {
                write!(f, "buffer too small: need {} bytes, capacity {}", needed, capacity)
            }
        }
    }
}

impl std::error::Error for PduBuildErr {}
