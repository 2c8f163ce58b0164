//! String table
//!
//! Every name in a module is written once and referenced by index.
//! `StringTable` is the deduplicating builder used by the encoder,
//! `StringPool` the validated table the decoder resolves references in.

use coil_common::{CoilError, Result, StringId};
use std::collections::HashMap;
use crate::header::NONE;
use crate::reader::Reader;
use crate::writer::Writer;

#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, StringId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Index of `s`, adding it on first use
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as StringId;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    /// Index of a string collected earlier
    pub fn get(&self, s: &str) -> Result<StringId> {
        self.index
            .get(s)
            .copied()
            .ok_or_else(|| CoilError::invalid_argument(format!("string '{s}' was not collected")))
    }

    pub fn get_optional(&self, s: Option<&str>) -> Result<StringId> {
        s.map_or(Ok(NONE), |s| self.get(s))
    }

    pub fn write(&self, out: &mut Writer) -> Result<()> {
        out.u32(Writer::len_u32(self.strings.len(), "string count")?);
        for s in &self.strings {
            out.u32(Writer::len_u32(s.len(), "string")?);
            out.bytes(s.as_bytes());
        }
        Ok(())
    }
}

/// Decoded string table
#[derive(Debug, Default)]
pub struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.count(4)?;
        let mut strings = Vec::new();
        strings.try_reserve(count)?;
        for i in 0..count {
            let len = reader.u32()? as usize;
            let bytes = reader.bytes(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| reader.corrupt(format!("string {i} is not UTF-8: {e}")))?;
            strings.push(s.to_string());
        }
        Ok(Self { strings })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Resolve a reference found in `section`
    pub fn get(&self, id: StringId, section: &str) -> Result<&str> {
        self.strings
            .get(id as usize)
            .map(String::as_str)
            .ok_or_else(|| CoilError::corrupt(section, format!("string index {id} out of range")))
    }

    /// Resolve a reference that may be [`NONE`]
    pub fn get_optional(&self, id: StringId, section: &str) -> Result<Option<&str>> {
        if id == NONE {
            Ok(None)
        } else {
            self.get(id, section).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_strings_are_deduplicated() {
        let mut table = StringTable::new();
        let a = table.intern("entry");
        let b = table.intern("add");
        assert_eq!(table.intern("entry"), a);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("add").unwrap(), b);
        assert!(table.get("missing").is_err());
        assert_eq!(table.get_optional(None).unwrap(), NONE);
    }

    #[test]
    fn test_pool_reads_table() {
        let mut table = StringTable::new();
        table.intern("entry");
        table.intern("");
        let mut out = Writer::new();
        table.write(&mut out).unwrap();
        let bytes = out.into_bytes();

        let pool = StringPool::read(&mut Reader::new(&bytes, "string table")).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(0, "code").unwrap(), "entry");
        assert_eq!(pool.get(1, "code").unwrap(), "");
        assert_eq!(pool.get_optional(NONE, "code").unwrap(), None);
        assert_eq!(
            pool.get(2, "code").unwrap_err().to_string(),
            "Corrupt data in code: string index 2 out of range"
        );
    }

    #[test]
    fn test_pool_rejects_bad_utf8() {
        let bytes = [1, 0, 0, 0, 2, 0, 0, 0, 0xC3, 0x28];
        assert!(StringPool::read(&mut Reader::new(&bytes, "string table")).is_err());
    }
}
