//! Module and Global Variables
//!
//! Defines the top-level container: it owns the type registry, globals,
//! functions (which own their blocks and instructions), relocations and
//! target requirements.
//!
//! Every add/create operation validates its input before touching any
//! collection and reserves space with `try_reserve`, so a failed call leaves
//! the Module exactly as it was. Duplicate names are accepted; the find
//! operations return the first match.

use coil_common::{BlockId, CoilError, FunctionId, GlobalId, RegisterId, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::blocks::BasicBlock;
use crate::function::{Function, Parameter};
use crate::instructions::Instruction;
use crate::operand::Operand;
use crate::registry::{CompositeType, TypeRegistry};
use crate::types::Type;

/// Initial capacity of the global and function collections
pub const INITIAL_CAPACITY: usize = 16;

/// Linkage types for global symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Linkage {
    /// Visible to other modules
    #[default]
    External = 0,
    /// Only visible within this module
    Internal = 1,
    /// Not visible outside its defining unit
    Private = 2,
}

impl Linkage {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Linkage::External),
            1 => Some(Linkage::Internal),
            2 => Some(Linkage::Private),
            _ => None,
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            Linkage::External => "external",
            Linkage::Internal => "internal",
            Linkage::Private => "private",
        }
    }
}

/// Global variable definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: Type,
    pub is_constant: bool,
    pub is_external: bool,
    pub initializer: Option<Vec<u8>>,
    /// Zero means "natural alignment of `ty`", filled in by [`Module::add_global`]
    pub alignment: u32,
    pub linkage: Linkage,
}

impl GlobalVariable {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            is_constant: false,
            is_external: false,
            initializer: None,
            alignment: 0,
            linkage: Linkage::External,
        }
    }

    pub fn constant(mut self) -> Self {
        self.is_constant = true;
        self
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn with_initializer(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.initializer = Some(bytes.into());
        self
    }

    pub fn aligned(mut self, alignment: u32) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }
}

/// Section a relocation patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelocSection {
    /// Function code
    Code = 0,
    /// Global initializer data
    Data = 1,
}

impl RelocSection {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RelocSection::Code),
            1 => Some(RelocSection::Data),
            _ => None,
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            RelocSection::Code => "code",
            RelocSection::Data => "data",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelocKind {
    Abs32 = 0,
    Abs64 = 1,
    Rel32 = 2,
    Rel64 = 3,
}

impl RelocKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RelocKind::Abs32),
            1 => Some(RelocKind::Abs64),
            2 => Some(RelocKind::Rel32),
            3 => Some(RelocKind::Rel64),
            _ => None,
        }
    }

    /// Bytes patched at the relocation offset
    pub fn width(self) -> u32 {
        match self {
            RelocKind::Abs32 | RelocKind::Rel32 => 4,
            RelocKind::Abs64 | RelocKind::Rel64 => 8,
        }
    }

    pub fn to_str(self) -> &'static str {
        match self {
            RelocKind::Abs32 => "abs32",
            RelocKind::Abs64 => "abs64",
            RelocKind::Rel32 => "rel32",
            RelocKind::Rel64 => "rel64",
        }
    }
}

/// Deferred address fixup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub symbol: String,
    pub section: RelocSection,
    pub offset: u32,
    pub kind: RelocKind,
    pub addend: i64,
}

/// Features and device class a consumer must (or should) provide
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRequirements {
    pub required_features: Vec<String>,
    pub preferred_features: Vec<String>,
    pub device_class: Option<String>,
}

/// Everything needed to create a function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: Type,
    pub params: Vec<(String, Type)>,
    pub is_variadic: bool,
    pub is_external: bool,
    pub linkage: Linkage,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            return_type,
            params: Vec::new(),
            is_variadic: false,
            is_external: false,
            linkage: Linkage::External,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.params.push((name.into(), ty));
        self
    }

    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }
}

/// IR Module - represents a complete compilation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    name: String,
    types: TypeRegistry,
    globals: Vec<GlobalVariable>,
    functions: Vec<Function>,
    relocations: Vec<Relocation>,
    target: TargetRequirements,
    metadata: Vec<(String, String)>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: TypeRegistry::new(),
            globals: Vec::with_capacity(INITIAL_CAPACITY),
            functions: Vec::with_capacity(INITIAL_CAPACITY),
            relocations: Vec::new(),
            target: TargetRequirements::default(),
            metadata: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Registry access for interning composite types before use
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn add_global(&mut self, mut global: GlobalVariable) -> Result<GlobalId> {
        if global.name.is_empty() {
            return Err(CoilError::invalid_argument("global name is empty"));
        }
        if global.ty.is_void() {
            return Err(CoilError::invalid_argument(format!("global '{}' has type void", global.name)));
        }
        let (_, natural_align) = self.types.layout(global.ty)?;
        if global.alignment == 0 {
            global.alignment = natural_align.max(1) as u32;
        }
        if !global.alignment.is_power_of_two() {
            return Err(CoilError::invalid_argument(format!(
                "global '{}' alignment {} is not a power of two",
                global.name, global.alignment
            )));
        }
        if global.is_external && global.initializer.is_some() {
            return Err(CoilError::invalid_argument(format!(
                "external global '{}' cannot have an initializer",
                global.name
            )));
        }

        self.globals.try_reserve(1)?;
        self.types.track(global.ty)?;

        let id = GlobalId::new(self.globals.len());
        trace!("global {} '{}': {}", id, global.name, global.ty);
        self.globals.push(global);
        Ok(id)
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals.iter().position(|g| g.name == name).map(GlobalId::new)
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalVariable> {
        self.globals.get(id.index())
    }

    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    /// Create a function, interning its signature into this module's registry
    pub fn create_function(&mut self, decl: FunctionDecl) -> Result<FunctionId> {
        if decl.name.is_empty() {
            return Err(CoilError::invalid_argument("function name is empty"));
        }
        self.types.resolve(decl.return_type)?;
        for (_, ty) in &decl.params {
            self.types.resolve(*ty)?;
        }
        self.functions.try_reserve(1)?;

        let param_types: Vec<Type> = decl.params.iter().map(|(_, ty)| *ty).collect();
        let signature = self.types.intern_function(decl.return_type, &param_types, decl.is_variadic)?;
        let names = decl.params.into_iter().map(|(name, _)| name).collect();
        self.declare_function(decl.name, signature, names, decl.is_external, decl.linkage)
    }

    /// Create a function from an already interned signature
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        signature: Type,
        param_names: Vec<String>,
        is_external: bool,
        linkage: Linkage,
    ) -> Result<FunctionId> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoilError::invalid_argument("function name is empty"));
        }
        let (return_type, param_types, variadic) = match self.types.composite(signature)? {
            CompositeType::Function { return_type, params, variadic } => (*return_type, params.clone(), *variadic),
            _ => {
                return Err(CoilError::invalid_argument(format!(
                    "signature of '{}' is not a function type",
                    name
                )))
            }
        };
        if param_names.len() != param_types.len() {
            return Err(CoilError::invalid_argument(format!(
                "'{}' takes {} parameters but {} names were given",
                name,
                param_types.len(),
                param_names.len()
            )));
        }
        self.functions.try_reserve(1)?;

        let params = param_names
            .into_iter()
            .zip(param_types)
            .enumerate()
            .map(|(i, (name, ty))| Parameter { name, ty, register: i as RegisterId })
            .collect();

        let id = FunctionId::new(self.functions.len());
        trace!("function {} '{}': {}", id, name, self.types.describe(signature));
        self.functions
            .push(Function::new(name, signature, return_type, params, variadic, is_external, linkage));
        Ok(id)
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().position(|f| f.name() == name).map(FunctionId::new)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn create_basic_block(&mut self, function: FunctionId, name: impl Into<String>) -> Result<BlockId> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoilError::invalid_argument("block name is empty"));
        }
        let func = self.function_entry(function)?;
        if func.is_external() {
            return Err(CoilError::invalid_argument(format!(
                "external function '{}' cannot own blocks",
                func.name()
            )));
        }
        func.blocks.try_reserve(1)?;

        let id = BlockId::new(func.blocks.len());
        trace!("block {} '{}' in '{}'", id, name, func.name());
        func.blocks.push(BasicBlock::new(name));
        Ok(id)
    }

    pub fn find_basic_block(&self, function: FunctionId, name: &str) -> Option<BlockId> {
        self.function(function)?.find_block(name)
    }

    pub fn block(&self, function: FunctionId, block: BlockId) -> Option<&BasicBlock> {
        self.function(function)?.block(block)
    }

    /// Allocate one fresh register in `function`
    pub fn new_register(&mut self, function: FunctionId) -> Result<RegisterId> {
        self.reserve_registers(function, 1)
    }

    /// Allocate `count` consecutive registers, returning the first
    pub fn reserve_registers(&mut self, function: FunctionId, count: u32) -> Result<RegisterId> {
        let func = self.function_entry(function)?;
        let first = func.next_register;
        let Some(next) = first.checked_add(count) else {
            return Err(CoilError::invalid_argument(format!(
                "register space of '{}' exhausted",
                func.name()
            )));
        };
        func.next_register = next;
        Ok(first)
    }

    /// Append `instr` to a block after checking every reference it makes
    pub fn add_instruction(&mut self, function: FunctionId, block: BlockId, instr: Instruction) -> Result<()> {
        let func = self.function(function).ok_or_else(|| {
            CoilError::invalid_argument(format!("no function {function}"))
        })?;
        if func.block(block).is_none() {
            return Err(CoilError::invalid_argument(format!(
                "no block {} in '{}'",
                block,
                func.name()
            )));
        }
        self.types.resolve(instr.result_type())?;
        for operand in instr.operands() {
            self.check_operand(func, operand)?;
        }

        let mut types: Vec<Type> = instr.operands().map(Operand::ty).collect();
        types.push(instr.result_type());

        let target = &mut self.functions[function.index()].blocks[block.index()];
        target.instructions.try_reserve(1)?;
        self.types.track_all(&types)?;
        trace!("{}:{}: {}", function, block, instr);
        self.functions[function.index()].blocks[block.index()].add_instruction(instr);
        Ok(())
    }

    pub fn set_target_requirements(&mut self, requirements: TargetRequirements) {
        self.target = requirements;
    }

    pub fn target_requirements(&self) -> &TargetRequirements {
        &self.target
    }

    pub fn add_relocation(&mut self, relocation: Relocation) -> Result<()> {
        if relocation.symbol.is_empty() {
            return Err(CoilError::invalid_argument("relocation symbol is empty"));
        }
        if relocation.offset.checked_add(relocation.kind.width()).is_none() {
            return Err(CoilError::invalid_argument(format!(
                "relocation offset {} overflows",
                relocation.offset
            )));
        }
        self.relocations.try_reserve(1)?;
        self.relocations.push(relocation);
        Ok(())
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(CoilError::invalid_argument("metadata key is empty"));
        }
        self.metadata.try_reserve(1)?;
        self.metadata.push((key, value.into()));
        Ok(())
    }

    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    fn function_entry(&mut self, id: FunctionId) -> Result<&mut Function> {
        self.functions
            .get_mut(id.index())
            .ok_or_else(|| CoilError::invalid_argument(format!("no function {id}")))
    }

    fn check_operand(&self, func: &Function, operand: &Operand) -> Result<()> {
        self.types.resolve(operand.ty())?;
        for register in operand.registers() {
            if register >= func.register_count() {
                return Err(CoilError::invalid_argument(format!(
                    "register %{} not allocated in '{}'",
                    register,
                    func.name()
                )));
            }
        }
        match operand {
            Operand::Block(id) if func.block(*id).is_none() => Err(CoilError::invalid_argument(format!(
                "no block {} in '{}'",
                id,
                func.name()
            ))),
            Operand::Function { id, .. } if self.function(*id).is_none() => {
                Err(CoilError::invalid_argument(format!("no function {id}")))
            }
            Operand::Global { id, .. } if self.global(*id).is_none() => {
                Err(CoilError::invalid_argument(format!("no global {id}")))
            }
            _ => Ok(()),
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, func: &Function, operand: &Operand) -> fmt::Result {
        match operand {
            Operand::Register { id, .. } => match func.parameter_for(*id) {
                Some(param) => write!(f, "%{}", param.name),
                None => write!(f, "%{id}"),
            },
            Operand::Block(id) => match func.block(*id) {
                Some(block) => write!(f, "%{}", block.name),
                None => write!(f, "%{id}"),
            },
            Operand::Function { id, .. } => match self.function(*id) {
                Some(callee) => write!(f, "@{}", callee.name()),
                None => write!(f, "@{id}"),
            },
            Operand::Global { id, .. } => match self.global(*id) {
                Some(global) => write!(f, "@{}", global.name),
                None => write!(f, "@{id}"),
            },
            other => write!(f, "{other}"),
        }
    }

    fn write_instruction(&self, f: &mut fmt::Formatter<'_>, func: &Function, instr: &Instruction) -> fmt::Result {
        write!(f, "  ")?;
        if let Some(dest) = instr.destination() {
            self.write_operand(f, func, dest)?;
            write!(f, " = ")?;
        }
        write!(f, "{}", instr.opcode().to_str().to_lowercase())?;
        if !instr.result_type().is_void() {
            write!(f, " {}", self.types.describe(instr.result_type()))?;
        }
        for (i, source) in instr.sources().iter().enumerate() {
            write!(f, "{}", if i == 0 { " " } else { ", " })?;
            self.write_operand(f, func, source)?;
        }
        if let Some(name) = instr.result_name() {
            write!(f, " ; {name}")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        if let Some(device) = &self.target.device_class {
            writeln!(f, "; device {device}")?;
        }
        if !self.target.required_features.is_empty() {
            writeln!(f, "; requires {}", self.target.required_features.join(", "))?;
        }
        if !self.target.preferred_features.is_empty() {
            writeln!(f, "; prefers {}", self.target.preferred_features.join(", "))?;
        }
        for (key, value) in &self.metadata {
            writeln!(f, "; {key} = {value}")?;
        }

        for global in &self.globals {
            write!(
                f,
                "@{} = {}{} {}",
                global.name,
                if global.is_external { "external " } else { "" },
                if global.is_constant { "constant" } else { "global" },
                self.types.describe(global.ty)
            )?;
            if let Some(bytes) = &global.initializer {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, " [{}]", hex.join(" "))?;
            }
            writeln!(f, ", align {}", global.alignment)?;
        }

        for func in &self.functions {
            let params: Vec<String> = func
                .params()
                .iter()
                .map(|p| format!("{} %{}", self.types.describe(p.ty), p.name))
                .chain(func.is_variadic().then(|| "...".to_string()))
                .collect();
            let header = format!(
                "{} {} @{}({})",
                func.linkage().to_str(),
                self.types.describe(func.return_type()),
                func.name(),
                params.join(", ")
            );
            if func.is_external() {
                writeln!(f, "\ndeclare {header}")?;
                continue;
            }
            writeln!(f, "\ndefine {header} {{")?;
            for block in func.blocks() {
                writeln!(f, "{}:", block.name)?;
                for instr in &block.instructions {
                    self.write_instruction(f, func, instr)?;
                }
            }
            writeln!(f, "}}")?;
        }

        for reloc in &self.relocations {
            writeln!(
                f,
                "; reloc {} {}+{} {} {:+}",
                reloc.kind.to_str(),
                reloc.section.to_str(),
                reloc.offset,
                reloc.symbol,
                reloc.addend
            )?;
        }
        Ok(())
    }
}
