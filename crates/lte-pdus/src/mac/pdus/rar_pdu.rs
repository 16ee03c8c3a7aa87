use lte_core::{ByteReader, PduParseErr, let_byte};

/// Size of one MAC RAR payload
pub const RAR_PAYLOAD_LEN: usize = 6;

/// One MAC RAR, 36.321 §6.1.5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RarResponse {
    /// 6 bits
    pub rapid: u8,
    /// 11 bits
    pub ta_cmd: u32,
    /// 20 bits
    pub grant: u32,
    pub temp_crnti: u16,
}

/// MAC PDU on the RA-RNTI: an optional backoff indicator and a list of responses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RarPdu {
    /// 4 bits
    pub backoff_indicator: Option<u8>,
    pub responses: Vec<RarResponse>,
}

impl RarPdu {
    pub fn from_bytes(data: &[u8]) -> Result<Self, PduParseErr> {
        let mut buf = ByteReader::new(data);
        let mut s = RarPdu::default();
        let mut rapids = Vec::new();

        loop {
            let_byte!(buf, subheader);
            let ext = subheader & 0x80 != 0;
            if subheader & 0x40 != 0 {
                rapids.push(subheader & 0x3f);
            } else {
                s.backoff_indicator = Some(subheader & 0x0f);
            }
            if !ext {
                break;
            }
        }

        for rapid in rapids {
            let p = buf.read_slice(RAR_PAYLOAD_LEN, "rar_payload")?;
            s.responses.push(RarResponse {
                rapid,
                ta_cmd: (((p[0] & 0x7f) as u32) << 4) | (p[1] >> 4) as u32,
                grant: (((p[1] & 0x0f) as u32) << 16) | ((p[2] as u32) << 8) | p[3] as u32,
                temp_crnti: ((p[4] as u16) << 8) | p[5] as u16,
            });
        }

        // Anything after the last payload is padding
        Ok(s)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.responses.len() * (1 + RAR_PAYLOAD_LEN));
        if let Some(bi) = self.backoff_indicator {
            let ext = if self.responses.is_empty() { 0 } else { 0x80 };
            out.push(ext | (bi & 0x0f));
        }
        let n = self.responses.len();
        for (i, r) in self.responses.iter().enumerate() {
            let ext = if i + 1 < n { 0x80 } else { 0 };
            out.push(ext | 0x40 | (r.rapid & 0x3f));
        }
        for r in self.responses.iter() {
            out.push(((r.ta_cmd >> 4) & 0x7f) as u8);
            out.push((((r.ta_cmd & 0x0f) << 4) as u8) | ((r.grant >> 16) & 0x0f) as u8);
            out.push((r.grant >> 8) as u8);
            out.push(r.grant as u8);
            out.push((r.temp_crnti >> 8) as u8);
            out.push(r.temp_crnti as u8);
        }
        out
    }

    pub fn find(&self, rapid: u8) -> Option<&RarResponse> {
        self.responses.iter().find(|r| r.rapid == rapid)
    }
}

#[cfg(test)]
mod tests {
    use lte_core::debug;

    use super::*;

    #[test]
    fn test_parse_rar() {
        debug::setup_logging_verbose();

        // BI=3, then RAPID 5 with TA 10, grant 0xABCDE, temp C-RNTI 0x4601
        let data = [0x83, 0x45, 0x00, 0xaa, 0xbc, 0xde, 0x46, 0x01];
        let pdu = RarPdu::from_bytes(&data).unwrap();
        assert_eq!(pdu.backoff_indicator, Some(3));
        assert_eq!(pdu.responses.len(), 1);
        let r = pdu.find(5).unwrap();
        assert_eq!(r.ta_cmd, 10);
        assert_eq!(r.grant, 0xabcde);
        assert_eq!(r.temp_crnti, 0x4601);
        assert_eq!(pdu.to_bytes(), data.to_vec());
    }

    #[test]
    fn test_truncated_rar() {
        let data = [0x45, 0x00, 0xaa];
        assert_eq!(
            RarPdu::from_bytes(&data),
            Err(PduParseErr::BufferEnded { field: Some("rar_payload") })
        );
    }
}
