//! Buffer Status Report control elements, 36.321 §6.1.3.1

use lte_core::NOF_LCG;

/// Upper bounds of the 64 buffer size levels, Table 6.1.3.1-1
pub const BUFFER_SIZE_LEVELS: [u32; 64] = [
    0, 1, 10, 12, 14, 17, 19, 22, 26, 31, 36, 42, 49, 57, 67, 78, 91, 107, 125, 146, 171, 200, 234, 274, 321, 376, 440,
    515, 603, 706, 826, 967, 1132, 1326, 1552, 1817, 2127, 2490, 2915, 3413, 3995, 4667, 5476, 6411, 7505, 8787,
    10287, 12043, 14099, 16507, 19325, 22624, 26487, 31009, 36304, 42502, 49759, 58255, 68201, 79846, 93479, 109439,
    128125, 150000,
];

/// Maps a buffer occupancy in bytes to its 6-bit index
pub fn buff_size_table(buffer_size: u32) -> u8 {
    if buffer_size == 0 {
        return 0;
    }
    if buffer_size > 150000 {
        return 63;
    }
    for i in 0..61 {
        if buffer_size < BUFFER_SIZE_LEVELS[i + 2] {
            return 1 + i as u8;
        }
    }
    62
}

/// Largest occupancy an index can stand for
pub fn buff_size_bytes(idx: u8) -> u32 {
    BUFFER_SIZE_LEVELS[(idx & 0x3f) as usize]
}

pub fn encode_short_bsr(lcg: u32, idx: u8) -> u8 {
    (((lcg & 0x03) as u8) << 6) | (idx & 0x3f)
}

pub fn encode_long_bsr(idx: &[u8; NOF_LCG]) -> [u8; 3] {
    [
        (idx[0] << 2) | (idx[1] >> 4),
        ((idx[1] & 0x0f) << 4) | (idx[2] >> 2),
        ((idx[2] & 0x03) << 6) | idx[3],
    ]
}
