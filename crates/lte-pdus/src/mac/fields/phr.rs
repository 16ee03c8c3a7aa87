//! Power Headroom Report control element, 36.321 §6.1.3.6

/// Encodes a headroom in dB to the 6-bit PH level
pub fn encode_phr(phr_db: f32) -> u8 {
    let clamped = phr_db.clamp(-23.0, 40.0);
    ((clamped + 23.0).floor() as u8) & 0x3f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_phr() {
        assert_eq!(encode_phr(-30.0), 0);
        assert_eq!(encode_phr(0.5), 23);
        assert_eq!(encode_phr(40.0), 63);
        assert_eq!(encode_phr(99.0), 63);
    }
}
