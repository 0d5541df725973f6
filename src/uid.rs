//! `CardUid` — the identity of a contactless card (§3 Data Model).
//!
//! Fixed-capacity byte sequence of at most 10 bytes with an explicit valid
//! length (typically 4 or 7 for MIFARE/NTAG families). Equality compares
//! only the valid prefix, so two `CardUid`s built from buffers with
//! trailing garbage beyond `len` still compare equal.

use core::fmt;

/// Maximum UID length this core supports (§3: "4-10 bytes").
pub const MAX_UID_LEN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct CardUid {
    bytes: [u8; MAX_UID_LEN],
    len: u8,
}

impl CardUid {
    /// Build from a byte slice, truncating anything past `MAX_UID_LEN`.
    pub fn new(raw: &[u8]) -> Self {
        let len = raw.len().min(MAX_UID_LEN);
        let mut bytes = [0u8; MAX_UID_LEN];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Uppercase hex, no separators — the wire format §6 requires.
    pub fn to_hex(&self) -> heapless::String<20> {
        const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
        let mut s = heapless::String::new();
        for &b in self.as_slice() {
            let _ = s.push(DIGITS[(b >> 4) as usize] as char);
            let _ = s.push(DIGITS[(b & 0x0F) as usize] as char);
        }
        s
    }
}

impl PartialEq for CardUid {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}
impl Eq for CardUid {}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for CardUid {
    fn default() -> Self {
        Self {
            bytes: [0u8; MAX_UID_LEN],
            len: 0,
        }
    }
}
