//! IR Instructions
//!
//! An [`Instruction`] can only be built through [`Instruction::new`] or one
//! of the `create_*` factories, all of which check the operand shape the
//! opcode's group demands. Fields are read through accessors so a built
//! instruction cannot drift out of shape.

use bitflags::bitflags;
use coil_common::{BlockId, CoilError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::ops::{Opcode, OpcodeGroup};
use crate::operand::Operand;
use crate::types::Type;

bitflags! {
    /// Per-instruction modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct InstructionFlags: u32 {
        const VOLATILE = 0x01;
        const ATOMIC = 0x02;
        const SIGNED = 0x04;
        const TAIL_CALL = 0x08;
        const NO_OVERFLOW = 0x10;
    }
}

/// IR Instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    opcode: Opcode,
    flags: InstructionFlags,
    destination: Option<Operand>,
    sources: Vec<Operand>,
    result_type: Type,
    result_name: Option<String>,
}

impl Instruction {
    /// Build an instruction, checking operand count and kinds against the opcode
    pub fn new(
        opcode: Opcode,
        flags: InstructionFlags,
        destination: Option<Operand>,
        sources: Vec<Operand>,
        result_type: Type,
    ) -> Result<Self> {
        check_shape(opcode, destination.as_ref(), &sources, result_type)?;
        Ok(Self {
            opcode,
            flags,
            destination,
            sources,
            result_type,
            result_name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.result_name = Some(name.into());
        self
    }

    pub fn with_flags(mut self, flags: InstructionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn flags(&self) -> InstructionFlags {
        self.flags
    }

    pub fn destination(&self) -> Option<&Operand> {
        self.destination.as_ref()
    }

    pub fn sources(&self) -> &[Operand] {
        &self.sources
    }

    pub fn result_type(&self) -> Type {
        self.result_type
    }

    pub fn result_name(&self) -> Option<&str> {
        self.result_name.as_deref()
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    /// Destination followed by sources
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.destination.iter().chain(self.sources.iter())
    }

    /// Blocks this instruction may transfer control to
    pub fn successors(&self) -> Vec<BlockId> {
        if !self.is_terminator() {
            return Vec::new();
        }
        self.sources
            .iter()
            .filter_map(|op| match op {
                Operand::Block(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

fn shape_error(opcode: Opcode, message: impl fmt::Display) -> CoilError {
    CoilError::invalid_argument(format!("{opcode}: {message}"))
}

fn expect_count(opcode: Opcode, sources: &[Operand], count: usize) -> Result<()> {
    if sources.len() != count {
        return Err(shape_error(
            opcode,
            format!("expects {} source operand{}, got {}", count, if count == 1 { "" } else { "s" }, sources.len()),
        ));
    }
    Ok(())
}

fn expect_value(opcode: Opcode, operand: &Operand, position: usize) -> Result<()> {
    if !operand.is_value() {
        return Err(shape_error(opcode, format!("source {position} must be a value, got {operand}")));
    }
    Ok(())
}

fn expect_block(opcode: Opcode, operand: &Operand, position: usize) -> Result<()> {
    if !matches!(operand, Operand::Block(_)) {
        return Err(shape_error(opcode, format!("source {position} must be a block, got {operand}")));
    }
    Ok(())
}

fn expect_register_dest(opcode: Opcode, destination: Option<&Operand>, result_type: Type) -> Result<()> {
    match destination {
        Some(Operand::Register { ty, .. }) if *ty == result_type => Ok(()),
        Some(Operand::Register { ty, .. }) => Err(shape_error(
            opcode,
            format!("destination type {ty} does not match result type {result_type}"),
        )),
        Some(other) => Err(shape_error(opcode, format!("destination must be a register, got {other}"))),
        None => Err(shape_error(opcode, "missing destination")),
    }
}

fn expect_no_dest(opcode: Opcode, destination: Option<&Operand>) -> Result<()> {
    match destination {
        None => Ok(()),
        Some(_) => Err(shape_error(opcode, "takes no destination")),
    }
}

fn check_shape(opcode: Opcode, destination: Option<&Operand>, sources: &[Operand], result_type: Type) -> Result<()> {
    for operand in destination.into_iter().chain(sources) {
        if let Operand::Memory(mem) = operand {
            if !matches!(mem.scale, 1 | 2 | 4 | 8) {
                return Err(shape_error(opcode, format!("memory scale {} must be 1, 2, 4 or 8", mem.scale)));
            }
        }
    }

    match opcode.group() {
        OpcodeGroup::Binary => {
            expect_count(opcode, sources, 2)?;
            expect_value(opcode, &sources[0], 0)?;
            expect_value(opcode, &sources[1], 1)?;
            expect_register_dest(opcode, destination, result_type)
        }
        OpcodeGroup::Unary => {
            expect_count(opcode, sources, 1)?;
            expect_value(opcode, &sources[0], 0)?;
            expect_register_dest(opcode, destination, result_type)
        }
        OpcodeGroup::Load => {
            expect_count(opcode, sources, 1)?;
            if !sources[0].is_address() {
                return Err(shape_error(opcode, format!("source 0 must be an address, got {}", sources[0])));
            }
            expect_register_dest(opcode, destination, result_type)
        }
        OpcodeGroup::Store => {
            expect_count(opcode, sources, 2)?;
            expect_value(opcode, &sources[0], 0)?;
            if !sources[1].is_address() {
                return Err(shape_error(opcode, format!("source 1 must be an address, got {}", sources[1])));
            }
            expect_no_dest(opcode, destination)
        }
        OpcodeGroup::Branch => {
            expect_count(opcode, sources, 1)?;
            expect_block(opcode, &sources[0], 0)?;
            expect_no_dest(opcode, destination)
        }
        OpcodeGroup::CondBranch => {
            expect_count(opcode, sources, 3)?;
            expect_value(opcode, &sources[0], 0)?;
            expect_block(opcode, &sources[1], 1)?;
            expect_block(opcode, &sources[2], 2)?;
            expect_no_dest(opcode, destination)
        }
        OpcodeGroup::Call => {
            let Some((callee, args)) = sources.split_first() else {
                return Err(shape_error(opcode, "missing callee"));
            };
            if !matches!(callee, Operand::Function { .. }) {
                return Err(shape_error(opcode, format!("callee must be a function, got {callee}")));
            }
            for (position, arg) in args.iter().enumerate() {
                expect_value(opcode, arg, position + 1)?;
            }
            if result_type.is_void() {
                expect_no_dest(opcode, destination)
            } else {
                expect_register_dest(opcode, destination, result_type)
            }
        }
        OpcodeGroup::Return => {
            if sources.len() > 1 {
                return Err(shape_error(opcode, format!("expects at most 1 source operand, got {}", sources.len())));
            }
            if let Some(value) = sources.first() {
                expect_value(opcode, value, 0)?;
            }
            expect_no_dest(opcode, destination)
        }
        OpcodeGroup::Nop => {
            expect_count(opcode, sources, 0)?;
            expect_no_dest(opcode, destination)
        }
    }
}

/// `dest = opcode lhs, rhs`
pub fn create_binary_op(opcode: Opcode, dest: Operand, lhs: Operand, rhs: Operand, result_type: Type) -> Result<Instruction> {
    if opcode.group() != OpcodeGroup::Binary {
        return Err(shape_error(opcode, "is not a binary operation"));
    }
    Instruction::new(opcode, InstructionFlags::empty(), Some(dest), vec![lhs, rhs], result_type)
}

/// `dest = opcode src`
pub fn create_unary_op(opcode: Opcode, dest: Operand, src: Operand, result_type: Type) -> Result<Instruction> {
    if opcode.group() != OpcodeGroup::Unary {
        return Err(shape_error(opcode, "is not a unary operation"));
    }
    Instruction::new(opcode, InstructionFlags::empty(), Some(dest), vec![src], result_type)
}

/// `dest = load address`
pub fn create_load(dest: Operand, address: Operand, result_type: Type) -> Result<Instruction> {
    Instruction::new(Opcode::Load, InstructionFlags::empty(), Some(dest), vec![address], result_type)
}

/// `store value, address`
pub fn create_store(value: Operand, address: Operand) -> Result<Instruction> {
    Instruction::new(Opcode::Store, InstructionFlags::empty(), None, vec![value, address], Type::VOID)
}

/// `br target`
pub fn create_branch(target: BlockId) -> Result<Instruction> {
    Instruction::new(Opcode::Br, InstructionFlags::empty(), None, vec![Operand::Block(target)], Type::VOID)
}

/// `br_cond condition, if_true, if_false`
pub fn create_cond_branch(condition: Operand, if_true: BlockId, if_false: BlockId) -> Result<Instruction> {
    Instruction::new(
        Opcode::BrCond,
        InstructionFlags::empty(),
        None,
        vec![condition, Operand::Block(if_true), Operand::Block(if_false)],
        Type::VOID,
    )
}

/// `dest = call callee(args...)`, no destination for void calls
pub fn create_call(dest: Option<Operand>, callee: Operand, args: Vec<Operand>, result_type: Type) -> Result<Instruction> {
    let mut sources = Vec::with_capacity(args.len() + 1);
    sources.push(callee);
    sources.extend(args);
    Instruction::new(Opcode::Call, InstructionFlags::empty(), dest, sources, result_type)
}

/// `ret` or `ret value`
pub fn create_return(value: Option<Operand>) -> Result<Instruction> {
    let result_type = value.as_ref().map_or(Type::VOID, Operand::ty);
    Instruction::new(Opcode::Ret, InstructionFlags::empty(), None, value.into_iter().collect(), result_type)
}

pub fn create_nop() -> Instruction {
    Instruction {
        opcode: Opcode::Nop,
        flags: InstructionFlags::empty(),
        destination: None,
        sources: Vec::new(),
        result_type: Type::VOID,
        result_name: None,
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = &self.destination {
            write!(f, "{dest} = ")?;
        }
        write!(f, "{}", self.opcode.to_str().to_lowercase())?;
        if !self.result_type.is_void() {
            write!(f, " {}", self.result_type)?;
        }
        for (i, source) in self.sources.iter().enumerate() {
            write!(f, "{}{source}", if i == 0 { " " } else { ", " })?;
        }
        if let Some(name) = &self.result_name {
            write!(f, " ; {name}")?;
        }
        Ok(())
    }
}
