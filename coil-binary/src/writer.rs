//! Little-endian output buffer

use coil_common::{CoilError, Result};

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Length as a `u32` count or offset field
    pub fn len_u32(len: usize, what: &str) -> Result<u32> {
        u32::try_from(len).map_err(|_| CoilError::invalid_argument(format!("{what} too large: {len}")))
    }

    /// Pad with zeros to the next `align` boundary
    pub fn align(&mut self, align: usize) {
        let pad = (align - self.buf.len() % align) % align;
        self.buf.resize(self.buf.len() + pad, 0);
    }

    /// Overwrite a previously written `u32`
    pub fn patch_u32(&mut self, pos: usize, value: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_and_patch() {
        let mut out = Writer::new();
        out.u8(1);
        out.align(4);
        assert_eq!(out.len(), 4);
        out.align(4);
        assert_eq!(out.len(), 4);

        out.u32(0);
        out.patch_u32(4, 0xAABB_CCDD);
        assert_eq!(out.into_bytes(), vec![1, 0, 0, 0, 0xDD, 0xCC, 0xBB, 0xAA]);
    }
}
