//! CRC validation utilities for NUT packets and frame headers.
//!
//! NUT protects every packet (and optionally frame headers) with a CRC-32
//! using the generator polynomial `0x04C11DB7`, a starting value of zero,
//! MSB-first bit order and no final xor.

/// CRC parameters: generator polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm used by packet footers, header checksums and frame checksums.
pub const CRC_NUT_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04C1_1DB7,
    init: 0x0000_0000,
};

/// Shared table-driven instance of [`CRC_NUT_ALG`].
pub const NUT_CRC: Crc32 = Crc32::new(&CRC_NUT_ALG);

/// Computes CRC-32 checksum of a single byte-aligned value using specified polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, mut value: u32, len: usize) -> u32 {
    let mut i = 0;
    while i < len {
        value = (value << 1) ^ (((value >> 31) & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, (i as u32) << 24, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 24) ^ bytes[i] as u32);
            i += 1;
        }

        crc
    }

    /// Checksum of `bytes` starting from the algorithm's initial value.
    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.update(self.init, bytes)
    }
}

#[test]
fn crc32_check_value() {
    assert_eq!(NUT_CRC.checksum(b"123456789"), 0x89A1_897F);
    assert_eq!(NUT_CRC.checksum(&[]), 0);
}

#[test]
fn crc32_incremental_matches_oneshot() {
    let data = b"nut/multimedia container\0";
    let split = NUT_CRC.update(NUT_CRC.checksum(&data[..7]), &data[7..]);
    assert_eq!(split, NUT_CRC.checksum(data));
}
