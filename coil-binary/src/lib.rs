//! COIL - Binary Module Format
//!
//! Encodes a [`coil_ir::Module`] into the sectioned COIL binary layout and
//! decodes it back. See [`header`] for the fixed header; sections follow it
//! in the order string table, type table, constant pool, function table,
//! code, relocation table, metadata.

pub mod header;
pub mod reader;
pub mod writer;
pub mod strings;
pub mod encoder;
pub mod decoder;
mod format;

pub use header::{content_hash, seal, Header, HeaderFlags, SectionEntry, SectionKind, FORMAT_MAJOR, FORMAT_MINOR, HEADER_SIZE, MAGIC};
pub use encoder::{encode, encode_into, encode_with, EncoderOptions};
pub use decoder::{decode, decode_with, read_header, DecoderOptions};
