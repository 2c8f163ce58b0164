//! Flag bits and record sizes shared by the encoder and decoder

/// Type table entry flags
pub const TYPE_COMPOSITE: u8 = 0x01;
pub const TYPE_NAMED: u8 = 0x02;
pub const TYPE_VARIADIC: u8 = 0x04;

/// Constant pool entry flags, linkage in bits 8..16
pub const GLOBAL_CONSTANT: u32 = 0x01;
pub const GLOBAL_EXTERNAL: u32 = 0x02;
pub const GLOBAL_INITIALIZED: u32 = 0x04;

/// Function table entry flags, linkage in bits 8..16
pub const FUNCTION_VARIADIC: u32 = 0x01;
pub const FUNCTION_EXTERNAL: u32 = 0x02;

pub const LINKAGE_SHIFT: u32 = 8;
pub const LINKAGE_MASK: u32 = 0xFF << LINKAGE_SHIFT;

/// Instruction record attribute bits
pub const INSTR_HAS_DEST: u8 = 0x01;
pub const INSTR_HAS_NAME: u8 = 0x02;

/// Fixed part of a type table entry
pub const TYPE_ENTRY_SIZE: usize = 20;
/// One constant pool entry
pub const GLOBAL_ENTRY_SIZE: usize = 24;
/// Fixed part of a function table entry
pub const FUNCTION_ENTRY_SIZE: usize = 28;
/// One relocation table entry
pub const RELOC_ENTRY_SIZE: usize = 20;
/// Fixed part of an instruction record
pub const INSTR_HEADER_SIZE: usize = 12;
/// Block header in the code section
pub const BLOCK_HEADER_SIZE: usize = 8;
