use lte_core::{ByteReader, PduParseErr};

use crate::mac::enums::{DlSchLcid, SchLcid, UlSchLcid};

/// One subheader of a received SCH PDU together with the bytes it describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchSubpdu<'a, L> {
    pub lcid: L,
    pub payload: &'a [u8],
}

/// Parses the R/R/E/LCID[/F/L] subheaders and slices out the payloads.
/// The last subheader carries no length and takes whatever is left.
pub fn parse_sch_pdu<'a, L: SchLcid>(data: &'a [u8]) -> Result<Vec<SchSubpdu<'a, L>>, PduParseErr> {
    let mut buf = ByteReader::new(data);
    let mut headers: Vec<(L, Option<usize>)> = Vec::new();

    loop {
        let b = buf.read_u8("subheader")?;
        let ext = b & 0x20 != 0;
        let raw = b & 0x1f;
        let Some(lcid) = L::from_raw(raw) else {
            return Err(PduParseErr::InvalidLcid { found: raw });
        };

        let len = match lcid.fixed_len() {
            Some(_) if lcid.is_padding() && !ext => None,
            Some(n) => Some(n),
            None if ext => {
                let l0 = buf.read_u8("length")?;
                if l0 & 0x80 != 0 {
                    let l1 = buf.read_u8("length")?;
                    Some((((l0 & 0x7f) as usize) << 8) | l1 as usize)
                } else {
                    Some(l0 as usize)
                }
            }
            None => None,
        };
        headers.push((lcid, len));

        if !ext {
            break;
        }
    }

    let header_len = buf.pos();
    let known: usize = headers.iter().filter_map(|(_, len)| *len).sum();
    if header_len + known > data.len() {
        return Err(PduParseErr::InconsistentLength { expected: header_len + known, found: data.len() });
    }
    let remainder = data.len() - header_len - known;

    let mut subpdus = Vec::with_capacity(headers.len());
    for (lcid, len) in headers {
        let len = len.unwrap_or(remainder);
        let payload = buf.read_slice(len, "payload")?;
        subpdus.push(SchSubpdu { lcid, payload });
    }
    Ok(subpdus)
}

impl<L: SchLcid> SchSubpdu<'_, L> {
    pub fn is_sdu(&self) -> bool {
        self.lcid.sdu_lcid().is_some()
    }

    fn payload_be(&self) -> u64 {
        self.payload.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }
}

impl SchSubpdu<'_, DlSchLcid> {
    /// 48-bit UE contention resolution identity
    pub fn con_res_id(&self) -> Option<u64> {
        match self.lcid {
            DlSchLcid::ConResId if self.payload.len() == 6 => Some(self.payload_be()),
            _ => None,
        }
    }

    pub fn ta_cmd(&self) -> Option<u32> {
        match self.lcid {
            DlSchLcid::TaCmd => self.payload.first().map(|b| (b & 0x3f) as u32),
            _ => None,
        }
    }
}

impl SchSubpdu<'_, UlSchLcid> {
    pub fn crnti(&self) -> Option<u16> {
        match self.lcid {
            UlSchLcid::Crnti if self.payload.len() == 2 => Some(self.payload_be() as u16),
            _ => None,
        }
    }

    /// (lcg, buffer size index) of a short or truncated BSR
    pub fn short_bsr(&self) -> Option<(u8, u8)> {
        match self.lcid {
            UlSchLcid::ShortBsr | UlSchLcid::TruncBsr => self.payload.first().map(|b| (b >> 6, b & 0x3f)),
            _ => None,
        }
    }

    /// Buffer size indices of all four LCGs of a long BSR
    pub fn long_bsr(&self) -> Option<[u8; 4]> {
        match self.lcid {
            UlSchLcid::LongBsr if self.payload.len() == 3 => {
                let p = self.payload;
                Some([
                    p[0] >> 2,
                    ((p[0] & 0x03) << 4) | (p[1] >> 4),
                    ((p[1] & 0x0f) << 2) | (p[2] >> 6),
                    p[2] & 0x3f,
                ])
            }
            _ => None,
        }
    }

    pub fn phr(&self) -> Option<u8> {
        match self.lcid {
            UlSchLcid::Phr => self.payload.first().map(|b| b & 0x3f),
            _ => None,
        }
    }
}
