//! Binary Decoder
//!
//! Validates a COIL file and rebuilds the Module it encodes. The header is
//! checked in a fixed order (magic, length, version, flags, section bounds,
//! flag-implied sections, content hash) before any table is read. Every
//! table read goes through a bounds-checked [`Reader`], and every rebuilt
//! entity passes through the same Module operations a front-end would use,
//! so a decoded Module satisfies the same invariants as a hand-built one.
//!
//! A failure anywhere aborts the decode; no partial Module is returned.

use coil_common::{BlockId, CoilError, Diagnostics, ErrorKind, FunctionId, GlobalId, Result};
use coil_ir::{
    Category, Field, GlobalVariable, Instruction, InstructionFlags, Linkage, Module, Opcode, Operand,
    OperandKind, Qualifiers, RelocKind, RelocSection, Relocation, TargetRequirements, Type,
};
use log::{debug, warn};
use rayon::prelude::*;
use crate::format::*;
use crate::header::{
    content_hash, Header, HeaderFlags, SectionKind, FORMAT_MAJOR, FORMAT_MINOR, HEADER_SIZE, NONE, SECTION_ALIGN,
};
use crate::reader::Reader;
use crate::strings::StringPool;

/// Decoder configuration
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Reject files whose content hash does not match
    pub verify_hash: bool,
    /// Parse function bodies on the rayon pool
    pub parallel: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            verify_hash: true,
            parallel: true,
        }
    }
}

/// Parse the fixed header without validating version or sections
pub fn read_header(bytes: &[u8]) -> Result<Header> {
    Header::parse(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Module> {
    let mut diagnostics = Diagnostics::new();
    decode_with(bytes, &DecoderOptions::default(), &mut diagnostics)
}

pub fn decode_with(bytes: &[u8], options: &DecoderOptions, diagnostics: &mut Diagnostics) -> Result<Module> {
    let header = validate_header(bytes, options, diagnostics)?;
    let decoder = Decoder { bytes, header, options, diagnostics };
    decoder.run()
}

fn validate_header(bytes: &[u8], options: &DecoderOptions, diagnostics: &mut Diagnostics) -> Result<Header> {
    let header = Header::parse(bytes)?;

    if header.major != FORMAT_MAJOR || header.minor > FORMAT_MINOR {
        return Err(CoilError::UnsupportedVersion {
            major: header.major,
            minor: header.minor,
            supported_major: FORMAT_MAJOR,
            supported_minor: FORMAT_MINOR,
        });
    }
    if header.minor < FORMAT_MINOR {
        diagnostics.note(
            "header",
            format!("format {}.{} is older than {}.{}", header.major, header.minor, FORMAT_MAJOR, FORMAT_MINOR),
        );
    }

    if header.flags.intersects(HeaderFlags::UNSUPPORTED) {
        return Err(CoilError::UnsupportedFeature {
            flags: (header.flags & HeaderFlags::UNSUPPORTED).bits(),
        });
    }
    if header.flags.unknown_bits() != 0 {
        warn!("unknown header flag bits 0x{:08X}", header.flags.unknown_bits());
        diagnostics.warning("header", format!("unknown flag bits 0x{:08X}", header.flags.unknown_bits()));
    }

    for kind in SectionKind::ALL {
        let entry = header.section(kind);
        if !entry.is_present() {
            continue;
        }
        let in_bounds = entry.range().is_some_and(|range| range.end <= bytes.len());
        if !in_bounds {
            return Err(CoilError::corrupt(
                kind.name(),
                format!("{} bytes at offset {} exceed the {}-byte file", entry.size, entry.offset, bytes.len()),
            ));
        }
        if (entry.offset as usize) < HEADER_SIZE {
            return Err(CoilError::corrupt(kind.name(), "section overlaps the header"));
        }
        if entry.offset as usize % SECTION_ALIGN != 0 {
            return Err(CoilError::corrupt(kind.name(), format!("offset {} is not aligned", entry.offset)));
        }
    }

    if header.flags.intersects(HeaderFlags::EXECUTABLE | HeaderFlags::LIBRARY)
        && !header.section(SectionKind::Functions).is_present()
    {
        return Err(CoilError::missing_section(SectionKind::Functions.name()));
    }
    if header.section(SectionKind::Code).is_present() && !header.section(SectionKind::Functions).is_present() {
        return Err(CoilError::corrupt(SectionKind::Code.name(), "code section without a function table"));
    }
    if header.flags.contains(HeaderFlags::RELOCATABLE) && !header.section(SectionKind::Relocations).is_present() {
        return Err(CoilError::missing_section(SectionKind::Relocations.name()));
    }

    if options.verify_hash && content_hash(bytes)? != header.hash {
        return Err(CoilError::corrupt("header", "content hash mismatch"));
    }
    Ok(header)
}

/// Map a rejected container operation onto the section that fed it
fn rebuild_error(section: &'static str) -> impl Fn(CoilError) -> CoilError {
    move |err| match err.kind() {
        ErrorKind::InvalidArgument => CoilError::corrupt(section, err.to_string()),
        _ => err,
    }
}

struct FunctionEntry {
    name_ref: u32,
    signature: Type,
    flags: u32,
    register_count: u32,
    code_offset: u32,
    code_size: u32,
    param_refs: Vec<u32>,
}

struct DecodedBlock {
    name: String,
    instructions: Vec<Instruction>,
}

struct Decoder<'a> {
    bytes: &'a [u8],
    header: Header,
    options: &'a DecoderOptions,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Decoder<'a> {
    fn run(mut self) -> Result<Module> {
        let strings = match self.reader(SectionKind::Strings) {
            Some(mut reader) => {
                let pool = StringPool::read(&mut reader)?;
                self.check_consumed(&reader);
                pool
            }
            None => StringPool::default(),
        };
        debug!("string table: {} strings", strings.len());

        let (name, target, entries) = self.read_metadata(&strings)?;
        let mut module = Module::new(name);

        self.read_types(&mut module, &strings)?;
        let data_size = self.read_globals(&mut module, &strings)?;
        let code_size = self.read_functions(&mut module, &strings)?;
        self.read_relocations(&mut module, &strings, code_size, data_size)?;

        module.set_target_requirements(target);
        for (key, value) in entries {
            module.add_metadata(key, value).map_err(rebuild_error("metadata"))?;
        }

        debug!(
            "decoded module '{}': {} globals, {} functions, {} relocations",
            module.name(),
            module.globals().len(),
            module.functions().len(),
            module.relocations().len()
        );
        Ok(module)
    }

    fn section_bytes(&self, kind: SectionKind) -> &'a [u8] {
        let bytes: &'a [u8] = self.bytes;
        match self.header.section(kind).range() {
            Some(range) if !range.is_empty() => bytes.get(range).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn reader(&self, kind: SectionKind) -> Option<Reader<'a>> {
        if self.header.section(kind).is_present() {
            Some(Reader::new(self.section_bytes(kind), kind.name()))
        } else {
            None
        }
    }

    fn check_consumed(&mut self, reader: &Reader<'_>) {
        if !reader.is_empty() {
            self.diagnostics
                .warning(reader.section(), format!("{} trailing bytes ignored", reader.remaining()));
        }
    }

    fn read_metadata(&mut self, strings: &StringPool) -> Result<(String, TargetRequirements, Vec<(String, String)>)> {
        let Some(mut r) = self.reader(SectionKind::Metadata) else {
            self.diagnostics.warning("metadata", "no metadata section, module is unnamed");
            return Ok((String::new(), TargetRequirements::default(), Vec::new()));
        };
        let section = r.section();

        let name = strings.get(r.u32()?, section)?.to_string();
        let device_class = strings.get_optional(r.u32()?, section)?.map(str::to_string);
        let mut lists = [Vec::new(), Vec::new()];
        for list in &mut lists {
            let count = r.count(4)?;
            for _ in 0..count {
                list.push(strings.get(r.u32()?, section)?.to_string());
            }
        }
        let [required_features, preferred_features] = lists;

        let count = r.count(8)?;
        let mut entries = Vec::new();
        entries.try_reserve(count)?;
        for _ in 0..count {
            let key = strings.get(r.u32()?, section)?.to_string();
            let value = strings.get(r.u32()?, section)?.to_string();
            entries.push((key, value));
        }
        self.check_consumed(&r);

        let target = TargetRequirements { required_features, preferred_features, device_class };
        Ok((name, target, entries))
    }

    fn read_types(&mut self, module: &mut Module, strings: &StringPool) -> Result<()> {
        let Some(mut r) = self.reader(SectionKind::Types) else {
            return Ok(());
        };
        let section = r.section();
        let count = r.count(TYPE_ENTRY_SIZE)?;

        for i in 0..count {
            let class = r.u8()?;
            let flags = r.u8()?;
            let _reserved = r.u16()?;
            let handle = Type::from_bits(r.u32()?);
            let size = r.u32()?;
            let align = r.u32()?;
            let name = strings.get_optional(r.u32()?, section)?;

            let category = handle.category().ok_or(CoilError::UnknownType { handle: handle.bits() })?;
            if category as u8 != class {
                return Err(r.corrupt(format!("entry {i}: class {class} disagrees with handle {handle:?}")));
            }
            let composite = flags & TYPE_COMPOSITE != 0;
            if composite != category.is_composite() {
                return Err(r.corrupt(format!("entry {i}: composite flag disagrees with handle {handle:?}")));
            }

            let registry = module.types_mut();
            if !composite {
                registry.track(handle)?;
            } else {
                if handle.attributes() as usize != registry.len() {
                    return Err(r.corrupt(format!(
                        "entry {i}: composite index {} out of sequence, expected {}",
                        handle.attributes(),
                        registry.len()
                    )));
                }
                let rebuilt = match category {
                    Category::Pointer => {
                        let pointee = Type::from_bits(r.u32()?);
                        registry.intern_pointer(pointee, Qualifiers::empty())
                    }
                    Category::Array => {
                        let element = Type::from_bits(r.u32()?);
                        let count = r.u64()?;
                        registry.intern_array(element, count)
                    }
                    Category::Vector => {
                        let element = Type::from_bits(r.u32()?);
                        let lanes = r.u32()?;
                        registry.intern_vector(element, lanes)
                    }
                    Category::Struct | Category::Union => {
                        let field_count = r.count(8)?;
                        let mut fields = Vec::new();
                        fields.try_reserve(field_count)?;
                        for _ in 0..field_count {
                            let field_name = strings.get_optional(r.u32()?, section)?;
                            let ty = Type::from_bits(r.u32()?);
                            fields.push(Field { name: field_name.map(str::to_string), ty });
                        }
                        if category == Category::Struct {
                            registry.intern_struct(name, fields)
                        } else {
                            registry.intern_union(name, fields)
                        }
                    }
                    Category::Function => {
                        let return_type = Type::from_bits(r.u32()?);
                        let param_count = r.count(4)?;
                        let mut params = Vec::new();
                        params.try_reserve(param_count)?;
                        for _ in 0..param_count {
                            params.push(Type::from_bits(r.u32()?));
                        }
                        registry.intern_function(return_type, &params, flags & TYPE_VARIADIC != 0)
                    }
                    _ => return Err(r.corrupt(format!("entry {i}: {} is not composite", category.to_str()))),
                }
                .map_err(rebuild_error(section))?;

                if rebuilt != handle {
                    return Err(r.corrupt(format!("entry {i}: rebuilt as {rebuilt:?}, recorded {handle:?}")));
                }
            }

            let (real_size, real_align) = module.types().layout(handle)?;
            let clamp = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
            if (size, align) != (clamp(real_size), clamp(real_align)) {
                self.diagnostics.warning(
                    section,
                    format!(
                        "entry {i}: recorded size/align {size}/{align}, computed {real_size}/{real_align}"
                    ),
                );
            }
        }
        self.check_consumed(&r);
        debug!("type table: {} entries", count);
        Ok(())
    }

    /// Returns the size of the initializer blob
    fn read_globals(&mut self, module: &mut Module, strings: &StringPool) -> Result<usize> {
        let Some(mut r) = self.reader(SectionKind::ConstantPool) else {
            return Ok(0);
        };
        let section = r.section();
        let count = r.count(GLOBAL_ENTRY_SIZE)?;

        let mut entries = Vec::new();
        entries.try_reserve(count)?;
        for _ in 0..count {
            entries.push([r.u32()?, r.u32()?, r.u32()?, r.u32()?, r.u32()?, r.u32()?]);
        }
        let blob = r.bytes(r.remaining())?;

        for [name_ref, ty, flags, alignment, data_offset, data_size] in entries {
            let name = strings.get(name_ref, section)?;
            let linkage = decode_linkage(flags, section)?;
            let initializer = if flags & GLOBAL_INITIALIZED != 0 {
                let start = data_offset as usize;
                let data = start
                    .checked_add(data_size as usize)
                    .and_then(|end| blob.get(start..end))
                    .ok_or_else(|| {
                        CoilError::corrupt(section, format!("initializer of '{name}' lies outside the pool"))
                    })?;
                Some(data.to_vec())
            } else {
                None
            };

            let global = GlobalVariable {
                name: name.to_string(),
                ty: Type::from_bits(ty),
                is_constant: flags & GLOBAL_CONSTANT != 0,
                is_external: flags & GLOBAL_EXTERNAL != 0,
                initializer,
                alignment,
                linkage,
            };
            module.add_global(global).map_err(rebuild_error(section))?;
        }
        debug!("constant pool: {} globals, {} data bytes", count, blob.len());
        Ok(blob.len())
    }

    /// Returns the size of the code section
    fn read_functions(&mut self, module: &mut Module, strings: &StringPool) -> Result<usize> {
        let code = self.section_bytes(SectionKind::Code);
        let Some(mut r) = self.reader(SectionKind::Functions) else {
            return Ok(code.len());
        };
        let section = r.section();
        let count = r.count(FUNCTION_ENTRY_SIZE)?;

        let mut entries = Vec::new();
        entries.try_reserve(count)?;
        for _ in 0..count {
            let name_ref = r.u32()?;
            let signature = Type::from_bits(r.u32()?);
            let flags = r.u32()?;
            let register_count = r.u32()?;
            let code_offset = r.u32()?;
            let code_size = r.u32()?;
            let param_count = r.count(4)?;
            let mut param_refs = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                param_refs.push(r.u32()?);
            }
            entries.push(FunctionEntry { name_ref, signature, flags, register_count, code_offset, code_size, param_refs });
        }
        self.check_consumed(&r);

        let mut ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let name = strings.get(entry.name_ref, section)?;
            let param_names = entry
                .param_refs
                .iter()
                .map(|&id| strings.get(id, section).map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            let is_external = entry.flags & FUNCTION_EXTERNAL != 0;

            if is_external && entry.code_size != 0 {
                return Err(CoilError::corrupt(section, format!("external function '{name}' has code")));
            }
            let in_bounds = (entry.code_offset as usize)
                .checked_add(entry.code_size as usize)
                .is_some_and(|end| end <= code.len());
            if !in_bounds {
                return Err(CoilError::corrupt(
                    section,
                    format!("code of '{name}' lies outside the {}-byte code section", code.len()),
                ));
            }

            let id = module
                .declare_function(name, entry.signature, param_names, is_external, decode_linkage(entry.flags, section)?)
                .map_err(rebuild_error(section))?;
            let declared = module.function(id).map_or(0, |f| f.register_count());
            let extra = entry.register_count.checked_sub(declared).ok_or_else(|| {
                CoilError::corrupt(section, format!("'{name}' has fewer registers than parameters"))
            })?;
            module.reserve_registers(id, extra).map_err(rebuild_error(section))?;
            ids.push(id);
        }

        // Collect every result in table order so the reported error is the
        // lowest-index one whichever thread hit it first.
        let parsed: Vec<Result<Vec<DecodedBlock>>> = if self.options.parallel {
            entries.par_iter().map(|entry| parse_body(code, entry, strings)).collect()
        } else {
            entries.iter().map(|entry| parse_body(code, entry, strings)).collect()
        };
        let bodies = parsed.into_iter().collect::<Result<Vec<_>>>()?;

        for (id, blocks) in ids.into_iter().zip(bodies) {
            self.rebuild_body(module, id, blocks)?;
        }
        debug!("function table: {} functions, {} code bytes", count, code.len());
        Ok(code.len())
    }

    /// Create every block first so forward branches resolve
    fn rebuild_body(&mut self, module: &mut Module, id: FunctionId, blocks: Vec<DecodedBlock>) -> Result<()> {
        let section = SectionKind::Code.name();
        for block in &blocks {
            module.create_basic_block(id, block.name.as_str()).map_err(rebuild_error(section))?;
        }
        for (index, block) in blocks.into_iter().enumerate() {
            for instr in block.instructions {
                module
                    .add_instruction(id, BlockId::new(index), instr)
                    .map_err(rebuild_error(section))?;
            }
        }
        Ok(())
    }

    fn read_relocations(
        &mut self,
        module: &mut Module,
        strings: &StringPool,
        code_size: usize,
        data_size: usize,
    ) -> Result<()> {
        let Some(mut r) = self.reader(SectionKind::Relocations) else {
            return Ok(());
        };
        let section = r.section();
        let count = r.count(RELOC_ENTRY_SIZE)?;

        for i in 0..count {
            let symbol = strings.get(r.u32()?, section)?.to_string();
            let target = r.u8()?;
            let kind = r.u8()?;
            let _reserved = r.u16()?;
            let offset = r.u32()?;
            let addend = r.i64()?;

            let target = RelocSection::from_u8(target)
                .ok_or_else(|| r.corrupt(format!("entry {i}: unknown section {target}")))?;
            let kind = RelocKind::from_u8(kind).ok_or_else(|| r.corrupt(format!("entry {i}: unknown kind {kind}")))?;
            let section_size = match target {
                RelocSection::Code => code_size,
                RelocSection::Data => data_size,
            };
            if offset as usize + kind.width() as usize > section_size {
                return Err(r.corrupt(format!(
                    "entry {i}: {} at offset {} overruns the {}-byte {} section",
                    kind.to_str(),
                    offset,
                    section_size,
                    target.to_str()
                )));
            }

            module
                .add_relocation(Relocation { symbol, section: target, offset, kind, addend })
                .map_err(rebuild_error(section))?;
        }
        self.check_consumed(&r);
        Ok(())
    }
}

fn decode_linkage(flags: u32, section: &str) -> Result<Linkage> {
    let raw = ((flags & LINKAGE_MASK) >> LINKAGE_SHIFT) as u8;
    Linkage::from_u8(raw).ok_or_else(|| CoilError::corrupt(section, format!("unknown linkage {raw}")))
}

fn parse_body(code: &[u8], entry: &FunctionEntry, strings: &StringPool) -> Result<Vec<DecodedBlock>> {
    if entry.code_size == 0 {
        return Ok(Vec::new());
    }
    let start = entry.code_offset as usize;
    let body = code
        .get(start..start + entry.code_size as usize)
        .ok_or_else(|| CoilError::corrupt("code", "function body out of range"))?;
    let mut r = Reader::new(body, SectionKind::Code.name());

    let block_count = r.count(BLOCK_HEADER_SIZE)?;
    let mut blocks = Vec::new();
    blocks.try_reserve(block_count)?;
    for _ in 0..block_count {
        let name = strings.get(r.u32()?, r.section())?.to_string();
        let instr_count = r.count(INSTR_HEADER_SIZE)?;
        let mut instructions = Vec::new();
        instructions.try_reserve(instr_count)?;
        for _ in 0..instr_count {
            instructions.push(read_instruction(&mut r, strings)?);
        }
        blocks.push(DecodedBlock { name, instructions });
    }

    r.skip_padding(SECTION_ALIGN)?;
    if !r.is_empty() {
        return Err(r.corrupt(format!("{} bytes after the last block", r.remaining())));
    }
    Ok(blocks)
}

fn read_instruction(r: &mut Reader<'_>, strings: &StringPool) -> Result<Instruction> {
    let at = r.position();
    let opcode_byte = r.u8()?;
    let opcode = Opcode::from_u8(opcode_byte)
        .ok_or_else(|| r.corrupt(format!("unknown opcode 0x{opcode_byte:02X} at offset {at}")))?;
    let source_count = r.u8()?;
    let attrs = r.u8()?;
    let _reserved = r.u8()?;
    if attrs & !(INSTR_HAS_DEST | INSTR_HAS_NAME) != 0 {
        return Err(r.corrupt(format!("unknown attribute bits 0x{attrs:02X} at offset {at}")));
    }
    let raw_flags = r.u32()?;
    let flags = InstructionFlags::from_bits(raw_flags)
        .ok_or_else(|| r.corrupt(format!("unknown instruction flags 0x{raw_flags:08X} at offset {at}")))?;
    let result_type = Type::from_bits(r.u32()?);

    let name = if attrs & INSTR_HAS_NAME != 0 {
        Some(strings.get(r.u32()?, r.section())?.to_string())
    } else {
        None
    };
    let destination = if attrs & INSTR_HAS_DEST != 0 {
        Some(read_operand(r)?)
    } else {
        None
    };
    let mut sources = Vec::with_capacity(source_count as usize);
    for _ in 0..source_count {
        sources.push(read_operand(r)?);
    }

    let instr = Instruction::new(opcode, flags, destination, sources, result_type)
        .map_err(|e| r.corrupt(format!("instruction at offset {at}: {e}")))?;
    Ok(match name {
        Some(name) => instr.with_name(name),
        None => instr,
    })
}

fn read_operand(r: &mut Reader<'_>) -> Result<Operand> {
    let tag = r.u8()?;
    let kind = OperandKind::from_u8(tag).ok_or_else(|| r.corrupt(format!("unknown operand tag {tag}")))?;
    let operand = match kind {
        OperandKind::Register => {
            let ty = Type::from_bits(r.u32()?);
            Operand::register(r.u32()?, ty)
        }
        OperandKind::Immediate => {
            let ty = Type::from_bits(r.u32()?);
            Operand::imm(r.i64()?, ty)
        }
        OperandKind::Block => Operand::block(BlockId(r.u32()?)),
        OperandKind::Function => {
            let ty = Type::from_bits(r.u32()?);
            Operand::function(FunctionId(r.u32()?), ty)
        }
        OperandKind::Global => {
            let ty = Type::from_bits(r.u32()?);
            Operand::global(GlobalId(r.u32()?), ty)
        }
        OperandKind::Memory => {
            let ty = Type::from_bits(r.u32()?);
            let base = r.u32()?;
            let offset = r.i32()?;
            let index = r.u32()?;
            let scale = r.u8()?;
            Operand::memory(base, offset, (index != NONE).then_some(index), scale, ty)
        }
    };
    Ok(operand)
}
