//! CRC32 used to verify audio file transfers
//!
//! The device firmware checks incoming files with the standard IEEE 802.3
//! CRC32 (the same value `zlib.crc32` produces):
//! 1. Polynomial 0x04C11DB7, reflected (0xEDB88320)
//! 2. Initial value 0xFFFFFFFF
//! 3. Final XOR 0xFFFFFFFF
//!
//! The value travels as an unsigned 32-bit integer in the `crc32` field of
//! `download_file` and in the device's completion message.

use std::fmt;

use tracing::trace;

/// Calculate the CRC32 of a complete file
///
/// # Examples
///
/// ```
/// use autotq_core::checksum;
///
/// let crc = checksum::calculate(b"123456789");
/// assert_eq!(crc, 0xCBF4_3926);
/// ```
pub fn calculate(data: &[u8]) -> u32 {
    let crc = crc32fast::hash(data);

    trace!(
        len = data.len(),
        crc = format!("0x{:08X}", crc),
        "Calculated CRC32"
    );

    crc
}

/// Verify a CRC reported by the device
pub fn verify(data: &[u8], expected: u32) -> bool {
    calculate(data) == expected
}

/// Incremental CRC32 for data that arrives in pieces
///
/// Produces the same value as [`calculate`] over the concatenated input.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current CRC value
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32")
            .field("len", &self.len)
            .field("value", &format!("0x{:08X}", self.value()))
            .finish()
    }
}
