//! Bounds-checked little-endian reader
//!
//! Every read checks the remaining length first and reports a truncated
//! record as `CorruptData` tagged with the section being read. Nothing in
//! the decoder indexes the input buffer directly.

use coil_common::{CoilError, Result};

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], section: &'static str) -> Self {
        Self { data, pos: 0, section }
    }

    pub fn section(&self) -> &'static str {
        self.section
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Error for a malformed value in the current section
    pub fn corrupt(&self, message: impl Into<String>) -> CoilError {
        CoilError::corrupt(self.section, message)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.corrupt(format!(
                "truncated at offset {}: need {} bytes, {} left",
                self.pos,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Element count that must fit in what is left, `min_size` bytes each
    pub fn count(&mut self, min_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_size) > self.remaining() {
            return Err(self.corrupt(format!(
                "count {} exceeds the {} bytes left",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Skip zero padding up to the next `align` boundary
    pub fn skip_padding(&mut self, align: usize) -> Result<()> {
        let pad = (align - self.pos % align) % align;
        let pad = pad.min(self.remaining());
        if self.bytes(pad)?.iter().any(|&b| b != 0) {
            return Err(self.corrupt("non-zero padding"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coil_common::ErrorKind;

    #[test]
    fn test_little_endian_reads() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = Reader::new(&data, "test");
        assert_eq!(reader.u8().unwrap(), 1);
        assert_eq!(reader.u16().unwrap(), 0x1234);
        assert_eq!(reader.u32().unwrap(), 0x1234_5678);
        assert_eq!(reader.i32().unwrap(), -1);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncation_is_corrupt_data() {
        let mut reader = Reader::new(&[1, 2, 3], "code");
        let err = reader.u32().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert_eq!(err.to_string(), "Corrupt data in code: truncated at offset 0: need 4 bytes, 3 left");
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_count_is_bounded() {
        let mut reader = Reader::new(&[0xFF, 0xFF, 0xFF, 0x0F, 0, 0], "types");
        assert!(reader.count(4).is_err());
    }

    #[test]
    fn test_padding() {
        let mut reader = Reader::new(&[7, 0, 0, 0, 9], "code");
        reader.u8().unwrap();
        reader.skip_padding(4).unwrap();
        assert_eq!(reader.position(), 4);

        let mut reader = Reader::new(&[7, 0, 1, 0], "code");
        reader.u8().unwrap();
        assert!(reader.skip_padding(4).is_err());
    }
}
