//! Binary Encoder
//!
//! Serializes a Module into the sectioned COIL layout. Strings are collected
//! in one walk first, so every later stage only reads the finished table and
//! function bodies can be encoded independently (in parallel when
//! [`EncoderOptions::parallel`] is set) before being concatenated.

use coil_common::{CoilError, Result};
use coil_ir::{CompositeType, Function, Instruction, Module, Operand, RelocSection, Type};
use log::{debug, trace};
use rayon::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};
use crate::format::*;
use crate::header::{seal, Header, HeaderFlags, SectionEntry, SectionKind, HEADER_SIZE, NONE, SECTION_ALIGN};
use crate::strings::StringTable;
use crate::writer::Writer;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub flags: HeaderFlags,
    /// `None` writes the current UNIX time
    pub timestamp: Option<u64>,
    /// Encode function bodies on the rayon pool
    pub parallel: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            flags: HeaderFlags::empty(),
            timestamp: None,
            parallel: true,
        }
    }
}

pub fn encode(module: &Module) -> Result<Vec<u8>> {
    encode_with(module, &EncoderOptions::default())
}

pub fn encode_with(module: &Module, options: &EncoderOptions) -> Result<Vec<u8>> {
    Encoder::new(module, options)?.finish()
}

/// Encode into a caller-provided buffer, returning the number of bytes
/// written. Nothing is written when the buffer is too small.
pub fn encode_into(module: &Module, options: &EncoderOptions, out: &mut [u8]) -> Result<usize> {
    let bytes = encode_with(module, options)?;
    if out.len() < bytes.len() {
        return Err(CoilError::BufferTooSmall {
            needed: bytes.len(),
            available: out.len(),
        });
    }
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

struct Encoder<'m> {
    module: &'m Module,
    options: &'m EncoderOptions,
    strings: StringTable,
}

impl<'m> Encoder<'m> {
    fn new(module: &'m Module, options: &'m EncoderOptions) -> Result<Self> {
        let flags = options.flags;
        if flags.intersects(HeaderFlags::UNSUPPORTED) {
            return Err(CoilError::UnsupportedFeature {
                flags: (flags & HeaderFlags::UNSUPPORTED).bits(),
            });
        }
        if flags.unknown_bits() != 0 {
            return Err(CoilError::invalid_argument(format!(
                "unknown header flag bits 0x{:08X}",
                flags.unknown_bits()
            )));
        }
        if flags.intersects(HeaderFlags::EXECUTABLE | HeaderFlags::LIBRARY) && module.functions().is_empty() {
            return Err(CoilError::invalid_argument(
                "executable or library module has no functions",
            ));
        }
        if flags.contains(HeaderFlags::RELOCATABLE) && module.relocations().is_empty() {
            return Err(CoilError::invalid_argument("relocatable module has no relocations"));
        }

        Ok(Self {
            module,
            options,
            strings: collect_strings(module),
        })
    }

    fn finish(self) -> Result<Vec<u8>> {
        let code_chunks: Vec<Vec<u8>> = if self.options.parallel {
            self.module
                .functions()
                .par_iter()
                .map(|func| self.encode_function(func))
                .collect::<Result<_>>()?
        } else {
            self.module
                .functions()
                .iter()
                .map(|func| self.encode_function(func))
                .collect::<Result<_>>()?
        };

        let mut strings = Writer::new();
        self.strings.write(&mut strings)?;

        let mut types = Writer::new();
        self.write_types(&mut types)?;

        let (constant_pool, data_size) = self.write_constant_pool()?;

        let mut functions = Writer::new();
        let mut code = Writer::new();
        if !self.module.functions().is_empty() {
            functions.u32(Writer::len_u32(self.module.functions().len(), "function count")?);
            for (func, chunk) in self.module.functions().iter().zip(&code_chunks) {
                let offset = Writer::len_u32(code.len(), "code section")?;
                self.write_function_entry(&mut functions, func, offset, chunk.len())?;
                code.bytes(chunk);
            }
        }

        let relocations = self.write_relocations(code.len(), data_size)?;

        let mut metadata = Writer::new();
        self.write_metadata(&mut metadata)?;

        let sections = [
            strings.into_bytes(),
            types.into_bytes(),
            constant_pool,
            functions.into_bytes(),
            code.into_bytes(),
            relocations,
            metadata.into_bytes(),
        ];

        let timestamp = self.options.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs())
        });
        let mut header = Header::new(self.options.flags, timestamp);
        let mut offset = HEADER_SIZE;
        for (kind, bytes) in SectionKind::ALL.iter().zip(&sections) {
            if bytes.is_empty() {
                continue;
            }
            offset = offset.next_multiple_of(SECTION_ALIGN);
            header.sections[*kind as usize] = SectionEntry {
                offset: Writer::len_u32(offset, "file")?,
                size: Writer::len_u32(bytes.len(), kind.name())?,
            };
            debug!("{}: offset {} size {}", kind, offset, bytes.len());
            offset += bytes.len();
        }

        let mut out = Writer::new();
        header.write(&mut out);
        for bytes in &sections {
            if !bytes.is_empty() {
                out.align(SECTION_ALIGN);
                out.bytes(bytes);
            }
        }

        let mut bytes = out.into_bytes();
        seal(&mut bytes)?;
        debug!("encoded module '{}': {} bytes", self.module.name(), bytes.len());
        Ok(bytes)
    }

    fn write_types(&self, out: &mut Writer) -> Result<()> {
        let registry = self.module.types();
        out.u32(Writer::len_u32(registry.primitives().len() + registry.len(), "type count")?);

        for &ty in registry.primitives() {
            self.write_type_header(out, ty, 0, NONE)?;
        }

        for (ty, entry) in registry.composites() {
            let mut flags = TYPE_COMPOSITE;
            if entry.name().is_some() {
                flags |= TYPE_NAMED;
            }
            if matches!(entry, CompositeType::Function { variadic: true, .. }) {
                flags |= TYPE_VARIADIC;
            }
            self.write_type_header(out, ty, flags, self.strings.get_optional(entry.name())?)?;

            match entry {
                CompositeType::Pointer { pointee } => out.u32(pointee.bits()),
                CompositeType::Array { element, count } => {
                    out.u32(element.bits());
                    out.u64(*count);
                }
                CompositeType::Vector { element, lanes } => {
                    out.u32(element.bits());
                    out.u32(*lanes);
                }
                CompositeType::Struct { fields, .. } | CompositeType::Union { fields, .. } => {
                    out.u32(Writer::len_u32(fields.len(), "field count")?);
                    for field in fields {
                        out.u32(self.strings.get_optional(field.name.as_deref())?);
                        out.u32(field.ty.bits());
                    }
                }
                CompositeType::Function { return_type, params, .. } => {
                    out.u32(return_type.bits());
                    out.u32(Writer::len_u32(params.len(), "parameter count")?);
                    for param in params {
                        out.u32(param.bits());
                    }
                }
            }
        }
        Ok(())
    }

    fn write_type_header(&self, out: &mut Writer, ty: Type, flags: u8, name_ref: u32) -> Result<()> {
        let (size, align) = self.module.types().layout(ty)?;
        out.u8(ty.category().map_or(0xFF, |c| c as u8));
        out.u8(flags);
        out.u16(0);
        out.u32(ty.bits());
        out.u32(u32::try_from(size).unwrap_or(u32::MAX));
        out.u32(u32::try_from(align).unwrap_or(u32::MAX));
        out.u32(name_ref);
        Ok(())
    }

    /// Constant pool bytes and the size of its initializer blob
    fn write_constant_pool(&self) -> Result<(Vec<u8>, usize)> {
        let globals = self.module.globals();
        if globals.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut blob: Vec<u8> = Vec::new();
        let mut out = Writer::new();
        out.u32(Writer::len_u32(globals.len(), "global count")?);
        for global in globals {
            let mut flags = (global.linkage as u32) << LINKAGE_SHIFT;
            if global.is_constant {
                flags |= GLOBAL_CONSTANT;
            }
            if global.is_external {
                flags |= GLOBAL_EXTERNAL;
            }

            let (data_offset, data_size) = match &global.initializer {
                Some(bytes) => {
                    flags |= GLOBAL_INITIALIZED;
                    let start = blob.len().next_multiple_of(global.alignment.max(1) as usize);
                    blob.resize(start, 0);
                    blob.extend_from_slice(bytes);
                    (start, bytes.len())
                }
                None => (0, 0),
            };

            out.u32(self.strings.get(&global.name)?);
            out.u32(global.ty.bits());
            out.u32(flags);
            out.u32(global.alignment);
            out.u32(Writer::len_u32(data_offset, "constant data")?);
            out.u32(Writer::len_u32(data_size, "initializer")?);
        }
        out.bytes(&blob);
        Ok((out.into_bytes(), blob.len()))
    }

    fn write_function_entry(&self, out: &mut Writer, func: &Function, code_offset: u32, code_size: usize) -> Result<()> {
        let mut flags = (func.linkage() as u32) << LINKAGE_SHIFT;
        if func.is_variadic() {
            flags |= FUNCTION_VARIADIC;
        }
        if func.is_external() {
            flags |= FUNCTION_EXTERNAL;
        }

        out.u32(self.strings.get(func.name())?);
        out.u32(func.signature().bits());
        out.u32(flags);
        out.u32(func.register_count());
        out.u32(code_offset);
        out.u32(Writer::len_u32(code_size, "function code")?);
        out.u32(Writer::len_u32(func.params().len(), "parameter count")?);
        for param in func.params() {
            out.u32(self.strings.get(&param.name)?);
        }
        Ok(())
    }

    /// Code bytes of one function, padded to the section alignment
    fn encode_function(&self, func: &Function) -> Result<Vec<u8>> {
        if func.is_external() {
            return Ok(Vec::new());
        }

        let mut out = Writer::new();
        out.u32(Writer::len_u32(func.blocks().len(), "block count")?);
        for block in func.blocks() {
            out.u32(self.strings.get(&block.name)?);
            out.u32(Writer::len_u32(block.instructions.len(), "instruction count")?);
            for instr in &block.instructions {
                self.write_instruction(&mut out, instr)?;
            }
        }
        out.align(SECTION_ALIGN);
        trace!("function '{}': {} code bytes", func.name(), out.len());
        Ok(out.into_bytes())
    }

    fn write_instruction(&self, out: &mut Writer, instr: &Instruction) -> Result<()> {
        let source_count = u8::try_from(instr.sources().len()).map_err(|_| {
            CoilError::invalid_argument(format!(
                "{} has {} source operands, at most 255 can be encoded",
                instr.opcode(),
                instr.sources().len()
            ))
        })?;

        let mut attrs = 0;
        if instr.destination().is_some() {
            attrs |= INSTR_HAS_DEST;
        }
        if instr.result_name().is_some() {
            attrs |= INSTR_HAS_NAME;
        }

        out.u8(instr.opcode() as u8);
        out.u8(source_count);
        out.u8(attrs);
        out.u8(0);
        out.u32(instr.flags().bits());
        out.u32(instr.result_type().bits());
        if let Some(name) = instr.result_name() {
            out.u32(self.strings.get(name)?);
        }
        if let Some(dest) = instr.destination() {
            write_operand(out, dest);
        }
        for source in instr.sources() {
            write_operand(out, source);
        }
        Ok(())
    }

    fn write_relocations(&self, code_size: usize, data_size: usize) -> Result<Vec<u8>> {
        let relocations = self.module.relocations();
        if relocations.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Writer::new();
        out.u32(Writer::len_u32(relocations.len(), "relocation count")?);
        for reloc in relocations {
            let section_size = match reloc.section {
                RelocSection::Code => code_size,
                RelocSection::Data => data_size,
            };
            let end = reloc.offset as usize + reloc.kind.width() as usize;
            if end > section_size {
                return Err(CoilError::invalid_argument(format!(
                    "relocation of '{}' at {}+{} overruns the {}-byte {} section",
                    reloc.symbol,
                    reloc.section.to_str(),
                    reloc.offset,
                    section_size,
                    reloc.section.to_str()
                )));
            }

            out.u32(self.strings.get(&reloc.symbol)?);
            out.u8(reloc.section as u8);
            out.u8(reloc.kind as u8);
            out.u16(0);
            out.u32(reloc.offset);
            out.i64(reloc.addend);
        }
        Ok(out.into_bytes())
    }

    fn write_metadata(&self, out: &mut Writer) -> Result<()> {
        let target = self.module.target_requirements();
        out.u32(self.strings.get(self.module.name())?);
        out.u32(self.strings.get_optional(target.device_class.as_deref())?);
        for features in [&target.required_features, &target.preferred_features] {
            out.u32(Writer::len_u32(features.len(), "feature count")?);
            for feature in features {
                out.u32(self.strings.get(feature)?);
            }
        }
        out.u32(Writer::len_u32(self.module.metadata().len(), "metadata count")?);
        for (key, value) in self.module.metadata() {
            out.u32(self.strings.get(key)?);
            out.u32(self.strings.get(value)?);
        }
        Ok(())
    }
}

fn write_operand(out: &mut Writer, operand: &Operand) {
    out.u8(operand.kind() as u8);
    match operand {
        Operand::Register { id, ty } => {
            out.u32(ty.bits());
            out.u32(*id);
        }
        Operand::Immediate { value, ty } => {
            out.u32(ty.bits());
            out.i64(*value);
        }
        Operand::Block(id) => out.u32(id.0),
        Operand::Function { id, ty } => {
            out.u32(ty.bits());
            out.u32(id.0);
        }
        Operand::Global { id, ty } => {
            out.u32(ty.bits());
            out.u32(id.0);
        }
        Operand::Memory(mem) => {
            out.u32(mem.ty.bits());
            out.u32(mem.base);
            out.i32(mem.offset);
            out.u32(mem.index.unwrap_or(NONE));
            out.u8(mem.scale);
        }
    }
}

/// Every string the module references, module name first
fn collect_strings(module: &Module) -> StringTable {
    let mut strings = StringTable::new();
    strings.intern(module.name());

    let target = module.target_requirements();
    if let Some(device) = &target.device_class {
        strings.intern(device);
    }
    for feature in target.required_features.iter().chain(&target.preferred_features) {
        strings.intern(feature);
    }
    for (key, value) in module.metadata() {
        strings.intern(key);
        strings.intern(value);
    }

    for (_, entry) in module.types().composites() {
        if let Some(name) = entry.name() {
            strings.intern(name);
        }
        if let CompositeType::Struct { fields, .. } | CompositeType::Union { fields, .. } = entry {
            for name in fields.iter().filter_map(|f| f.name.as_deref()) {
                strings.intern(name);
            }
        }
    }

    for global in module.globals() {
        strings.intern(&global.name);
    }
    for func in module.functions() {
        strings.intern(func.name());
        for param in func.params() {
            strings.intern(&param.name);
        }
        for block in func.blocks() {
            strings.intern(&block.name);
            for name in block.instructions.iter().filter_map(Instruction::result_name) {
                strings.intern(name);
            }
        }
    }
    for reloc in module.relocations() {
        strings.intern(&reloc.symbol);
    }
    strings
}
