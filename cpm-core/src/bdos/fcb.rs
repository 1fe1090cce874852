//! File Control Block (FCB) implementation.
//!
//! The FCB is CP/M's file descriptor structure, stored in the program's
//! memory space and passed to BDOS functions.
//!
//! Layout (36 bytes), bit-exact, no padding, multi-byte fields little-endian:
//! - Byte 0x00: DR drive selector (0=default, 1-16=A-P)
//! - Bytes 0x01-0x08: F[8] filename, space-padded, high bits carry attributes
//! - Bytes 0x09-0x0B: T[3] extension, space-padded, high bits carry attributes
//! - Byte 0x0C: EX extent number
//! - Bytes 0x0D-0x0E: S1, S2 reserved
//! - Byte 0x0F: RC record count within extent
//! - Bytes 0x10-0x1F: AL[16] allocation map
//! - Byte 0x20: CR current record within extent
//! - Bytes 0x21-0x23: R[3] random record number, little-endian

/// Size of an FCB in bytes.
pub const FCB_SIZE: usize = 36;

/// File Control Block - a view into guest memory for file operations.
pub struct Fcb<'a> {
    mem: &'a [u8],
}

impl<'a> Fcb<'a> {
    /// Create an FCB view from a 36-byte buffer.
    pub fn new(memory: &'a [u8]) -> Self {
        debug_assert!(memory.len() >= FCB_SIZE);
        Self { mem: memory }
    }

    /// Drive selector: 0 = current, 1 = A:, 2 = B:, etc. Ignored by this
    /// single-drive implementation - retained for FCB round-trip fidelity.
    pub fn drive(&self) -> u8 {
        self.mem[0x00]
    }

    fn raw_name(&self) -> &[u8] {
        &self.mem[0x01..0x09]
    }

    fn raw_ext(&self) -> &[u8] {
        &self.mem[0x09..0x0C]
    }

    /// Canonical host filename: strip the high (attribute) bit of each
    /// name/extension byte, trim trailing spaces from each part
    /// independently, and join as `NAME.EXT` - the dot is always
    /// present, even when the extension is empty (producing `NAME.`).
    pub fn canonical_filename(&self) -> String {
        let name = trim_field(self.raw_name());
        let ext = trim_field(self.raw_ext());
        format!("{}.{}", name, ext)
    }

    /// True if either the name or extension field contains a literal
    /// `?` wildcard character.
    pub fn has_wildcard(&self) -> bool {
        self.raw_name()
            .iter()
            .chain(self.raw_ext().iter())
            .any(|&b| (b & 0x7F) == b'?')
    }

    /// Random record number: the three `R` bytes read as a 24-bit
    /// little-endian unsigned integer.
    pub fn random_record(&self) -> u32 {
        (self.mem[0x21] as u32) | ((self.mem[0x22] as u32) << 8) | ((self.mem[0x23] as u32) << 16)
    }
}

fn trim_field(field: &[u8]) -> String {
    let stripped: Vec<u8> = field.iter().map(|&b| b & 0x7F).collect();
    let end = stripped
        .iter()
        .rposition(|&b| b != b' ')
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&stripped[..end]).into_owned()
}
