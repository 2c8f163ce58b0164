//! COIL file header
//!
//! The header is a fixed 108-byte record at offset 0:
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | magic `0x434F494C`                     |
//! | 4      | 2    | major version                          |
//! | 6      | 2    | minor version                          |
//! | 8      | 4    | flags                                  |
//! | 12     | 8    | timestamp (UNIX seconds)               |
//! | 20     | 56   | 7 x `{offset u32, size u32}` sections  |
//! | 76     | 32   | SHA-256 content hash                   |

use bitflags::bitflags;
use coil_common::{CoilError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use crate::reader::Reader;
use crate::writer::Writer;

pub const MAGIC: u32 = 0x434F_494C;
pub const FORMAT_MAJOR: u16 = 1;
pub const FORMAT_MINOR: u16 = 1;

pub const HEADER_SIZE: usize = 108;
pub const HASH_OFFSET: usize = 76;
pub const HASH_SIZE: usize = 32;

/// Every section starts on this boundary
pub const SECTION_ALIGN: usize = 4;

/// Absent string or register reference
pub const NONE: u32 = 0xFFFF_FFFF;

bitflags! {
    /// Header flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u32 {
        const COMPRESSED = 0x001;
        const ENCRYPTED = 0x002;
        const SIGNED = 0x004;
        const EXECUTABLE = 0x008;
        const LIBRARY = 0x010;
        const DEBUG_INFO = 0x020;
        const RELOCATABLE = 0x040;
        const BOOTABLE = 0x080;
        const FIRMWARE = 0x100;
        const STREAMING = 0x200;
        const EXTENDED_TYPES = 0x400;
    }
}

impl HeaderFlags {
    /// Payload transforms this implementation cannot undo
    pub const UNSUPPORTED: HeaderFlags = HeaderFlags::COMPRESSED.union(HeaderFlags::ENCRYPTED);

    /// Bits that name no defined flag
    pub fn unknown_bits(self) -> u32 {
        self.bits() & !HeaderFlags::all().bits()
    }
}

/// Sections in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Strings = 0,
    Types = 1,
    ConstantPool = 2,
    Functions = 3,
    Code = 4,
    Relocations = 5,
    Metadata = 6,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Strings,
        SectionKind::Types,
        SectionKind::ConstantPool,
        SectionKind::Functions,
        SectionKind::Code,
        SectionKind::Relocations,
        SectionKind::Metadata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Strings => "string table",
            SectionKind::Types => "type table",
            SectionKind::ConstantPool => "constant pool",
            SectionKind::Functions => "function table",
            SectionKind::Code => "code",
            SectionKind::Relocations => "relocation table",
            SectionKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionEntry {
    pub offset: u32,
    pub size: u32,
}

impl SectionEntry {
    pub fn is_present(&self) -> bool {
        self.size != 0
    }

    /// Byte range, or `None` when it overflows
    pub fn range(&self) -> Option<std::ops::Range<usize>> {
        let start = self.offset as usize;
        let end = start.checked_add(self.size as usize)?;
        Some(start..end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub major: u16,
    pub minor: u16,
    pub flags: HeaderFlags,
    pub timestamp: u64,
    pub sections: [SectionEntry; 7],
    pub hash: [u8; HASH_SIZE],
}

impl Header {
    pub fn new(flags: HeaderFlags, timestamp: u64) -> Self {
        Self {
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            flags,
            timestamp,
            sections: [SectionEntry::default(); 7],
            hash: [0; HASH_SIZE],
        }
    }

    pub fn section(&self, kind: SectionKind) -> SectionEntry {
        self.sections[kind as usize]
    }

    /// Parse the fixed header. Only the first four bytes are inspected
    /// before the magic is known to match.
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        let mut reader = Reader::new(bytes, "header");
        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(CoilError::BinaryFormatError { found: magic });
        }
        if bytes.len() < HEADER_SIZE {
            return Err(CoilError::corrupt(
                "header",
                format!("need {} bytes, file has {}", HEADER_SIZE, bytes.len()),
            ));
        }

        let major = reader.u16()?;
        let minor = reader.u16()?;
        let flags = HeaderFlags::from_bits_retain(reader.u32()?);
        let timestamp = reader.u64()?;
        let mut sections = [SectionEntry::default(); 7];
        for entry in &mut sections {
            entry.offset = reader.u32()?;
            entry.size = reader.u32()?;
        }
        let mut hash = [0; HASH_SIZE];
        hash.copy_from_slice(reader.bytes(HASH_SIZE)?);

        Ok(Header { major, minor, flags, timestamp, sections, hash })
    }

    pub fn write(&self, out: &mut Writer) {
        out.u32(MAGIC);
        out.u16(self.major);
        out.u16(self.minor);
        out.u32(self.flags.bits());
        out.u64(self.timestamp);
        for entry in &self.sections {
            out.u32(entry.offset);
            out.u32(entry.size);
        }
        out.bytes(&self.hash);
    }
}

/// SHA-256 over the whole file with the hash field read as zeros
pub fn content_hash(bytes: &[u8]) -> Result<[u8; HASH_SIZE]> {
    if bytes.len() < HEADER_SIZE {
        return Err(CoilError::corrupt("header", "file is shorter than its header"));
    }
    let mut hasher = Sha256::new();
    hasher.update(&bytes[..HASH_OFFSET]);
    hasher.update([0u8; HASH_SIZE]);
    hasher.update(&bytes[HEADER_SIZE..]);
    Ok(hasher.finalize().into())
}

/// Recompute and store the content hash of an encoded file, e.g. after
/// patching header fields in place
pub fn seal(bytes: &mut [u8]) -> Result<()> {
    let hash = content_hash(bytes)?;
    bytes[HASH_OFFSET..HEADER_SIZE].copy_from_slice(&hash);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_header_layout() {
        let mut header = Header::new(HeaderFlags::EXECUTABLE | HeaderFlags::DEBUG_INFO, 0x1122_3344);
        header.sections[SectionKind::Code as usize] = SectionEntry { offset: 0x200, size: 0x40 };

        let mut out = Writer::new();
        header.write(&mut out);
        let bytes = out.into_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0x4C, 0x49, 0x4F, 0x43]);
        assert_eq!(&bytes[4..8], &[1, 0, 1, 0]);
        assert_eq!(&bytes[8..12], &[0x28, 0, 0, 0]);
        assert_eq!(&bytes[52..60], &[0x00, 0x02, 0, 0, 0x40, 0, 0, 0]);

        assert_eq!(Header::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_bad_magic_reads_four_bytes() {
        let err = Header::parse(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap_err();
        assert_eq!(err, CoilError::BinaryFormatError { found: 0xEFBE_ADDE });
    }

    #[test]
    fn test_short_header() {
        let err = Header::parse(&MAGIC.to_le_bytes()).unwrap_err();
        assert_eq!(err.kind(), coil_common::ErrorKind::CorruptData);
        let err = Header::parse(&[0x4C, 0x49]).unwrap_err();
        assert_eq!(err.kind(), coil_common::ErrorKind::CorruptData);
    }

    #[test]
    fn test_seal_ignores_previous_hash() {
        let mut out = Writer::new();
        Header::new(HeaderFlags::empty(), 7).write(&mut out);
        let mut bytes = out.into_bytes();
        seal(&mut bytes).unwrap();
        let first = bytes[HASH_OFFSET..].to_vec();
        seal(&mut bytes).unwrap();
        assert_eq!(&bytes[HASH_OFFSET..], &first[..]);
        assert_eq!(content_hash(&bytes).unwrap().to_vec(), first);
    }

    #[test]
    fn test_unknown_flag_bits() {
        let flags = HeaderFlags::from_bits_retain(0x8000_0008);
        assert_eq!(flags.unknown_bits(), 0x8000_0000);
        assert!(flags.contains(HeaderFlags::EXECUTABLE));
        assert_eq!(HeaderFlags::from_name("RELOCATABLE"), Some(HeaderFlags::RELOCATABLE));
    }
}
