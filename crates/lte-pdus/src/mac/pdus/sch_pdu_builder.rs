use crate::mac::enums::SchLcid;
use crate::pdu_build_error::PduBuildErr;

/// Largest SDU an L field can describe
const MAX_SDU_LEN: usize = 0x7fff;

/// Subheader size of an SDU that is not the last element of the PDU
pub fn size_header_sdu(len: usize) -> usize {
    if len < 128 { 2 } else { 3 }
}

/// Assembles an SCH PDU of a fixed size. Control elements are written before SDUs and
/// the remaining space is filled with padding.
pub struct SchPduBuilder<L: SchLcid> {
    pdu_len: usize,
    ces: Vec<(L, Vec<u8>)>,
    sdus: Vec<(L, Vec<u8>)>,
}

impl<L: SchLcid> SchPduBuilder<L> {
    pub fn new(pdu_len: usize) -> Self {
        SchPduBuilder {
            pdu_len,
            ces: Vec::new(),
            sdus: Vec::new(),
        }
    }

    pub fn pdu_len(&self) -> usize {
        self.pdu_len
    }

    /// Bytes taken by subheaders and payloads so far, with the last SDU header-less
    pub fn used(&self) -> usize {
        let ce_bytes: usize = self.ces.iter().map(|(_, p)| 1 + p.len()).sum();
        let n = self.sdus.len();
        let sdu_bytes: usize = self
            .sdus
            .iter()
            .enumerate()
            .map(|(i, (_, p))| if i + 1 == n { 1 + p.len() } else { size_header_sdu(p.len()) + p.len() })
            .sum();
        ce_bytes + sdu_bytes
    }

    pub fn rem_space(&self) -> usize {
        self.pdu_len.saturating_sub(self.used())
    }

    pub fn nof_subheaders(&self) -> usize {
        self.ces.len() + self.sdus.len()
    }

    /// Appends a control element, returning its index for a later `update_ce`
    pub fn add_ce(&mut self, lcid: L, payload: &[u8]) -> Result<usize, PduBuildErr> {
        let needed = 1 + payload.len();
        if needed > self.rem_space() {
            return Err(PduBuildErr::NoSpace { needed, available: self.rem_space() });
        }
        self.ces.push((lcid, payload.to_vec()));
        Ok(self.ces.len() - 1)
    }

    /// Overwrites the content of a control element reserved earlier. The size must not change.
    pub fn update_ce(&mut self, idx: usize, lcid: L, payload: &[u8]) -> Result<(), PduBuildErr> {
        let Some(ce) = self.ces.get_mut(idx) else {
            return Err(PduBuildErr::NoSpace { needed: 1 + payload.len(), available: 0 });
        };
        if ce.1.len() != payload.len() {
            return Err(PduBuildErr::NoSpace { needed: 1 + payload.len(), available: 1 + ce.1.len() });
        }
        *ce = (lcid, payload.to_vec());
        Ok(())
    }

    pub fn nof_ces(&self) -> usize {
        self.ces.len()
    }

    /// Adds an SDU as the new last element. The previous last SDU gains its L field.
    pub fn add_sdu(&mut self, lcid: L, payload: Vec<u8>) -> Result<(), PduBuildErr> {
        let prev_last_hdr = self.sdus.last().map(|(_, p)| size_header_sdu(p.len()) - 1).unwrap_or(0);
        let needed = prev_last_hdr + 1 + payload.len();
        if payload.len() > MAX_SDU_LEN || needed > self.rem_space() {
            return Err(PduBuildErr::NoSpace { needed, available: self.rem_space() });
        }
        self.sdus.push((lcid, payload));
        Ok(())
    }

    /// Writes the PDU. 1 or 2 spare bytes become leading padding subheaders, anything
    /// larger a trailing padding subheader followed by zeroes.
    pub fn build(self) -> Result<Vec<u8>, PduBuildErr> {
        let used = self.used();
        if used > self.pdu_len {
            return Err(PduBuildErr::NoSpace { needed: used, available: self.pdu_len });
        }
        let mut out = Vec::with_capacity(self.pdu_len);

        if self.ces.is_empty() && self.sdus.is_empty() {
            if self.pdu_len > 0 {
                out.push(L::padding().into_raw());
                out.resize(self.pdu_len, 0);
            }
            return Ok(out);
        }

        let padding = self.pdu_len - used;
        let n_lead = if padding <= 2 { padding } else { 0 };
        let trailing = padding > 2;

        // (raw lcid, L field)
        let mut subheaders: Vec<(u8, Option<usize>)> = Vec::with_capacity(self.nof_subheaders() + 3);
        for _ in 0..n_lead {
            subheaders.push((L::padding().into_raw(), None));
        }
        for (lcid, _) in self.ces.iter() {
            subheaders.push((lcid.into_raw(), None));
        }
        let n_sdus = self.sdus.len();
        for (i, (lcid, p)) in self.sdus.iter().enumerate() {
            let is_last = i + 1 == n_sdus && !trailing;
            subheaders.push((lcid.into_raw(), if is_last { None } else { Some(p.len()) }));
        }
        if trailing {
            subheaders.push((L::padding().into_raw(), None));
        }

        let n_sub = subheaders.len();
        for (i, (raw, len)) in subheaders.into_iter().enumerate() {
            let ext = if i + 1 < n_sub { 0x20 } else { 0 };
            out.push(ext | raw);
            match len {
                Some(l) if l < 128 => out.push(l as u8),
                Some(l) => {
                    out.push(0x80 | ((l >> 8) & 0x7f) as u8);
                    out.push((l & 0xff) as u8);
                }
                None => {}
            }
        }
        for (_, p) in self.ces.iter() {
            out.extend_from_slice(p);
        }
        for (_, p) in self.sdus.iter() {
            out.extend_from_slice(p);
        }

        if out.len() > self.pdu_len {
            return Err(PduBuildErr::NoSpace { needed: out.len(), available: self.pdu_len });
        }
        out.resize(self.pdu_len, 0);
        Ok(out)
    }
}
