//! Table-driven CRC16 used by every CRC-protected frame.
//!
//! The table is built once on first use. Input is folded in most-significant-byte
//! first starting from [`CRC_SEED`].

use std::sync::OnceLock;

use crate::constants::CRC_SEED;

const POLY: u16 = 0x1002;

static TABLE: OnceLock<[u16; 256]> = OnceLock::new();

fn table() -> &'static [u16; 256] {
    TABLE.get_or_init(|| {
        let mut table = [0u16; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = (i as u16) << 8;
            for _ in 0..8 {
                let carry = crc & 0x8000 != 0;
                crc <<= 1;
                if carry {
                    crc ^= POLY;
                }
            }
            *slot = crc;
        }
        table
    })
}

/// CRC16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let table = table();
    data.iter().fold(CRC_SEED, |crc, &byte| {
        (crc << 8) ^ table[usize::from((crc >> 8) as u8 ^ byte)]
    })
}
