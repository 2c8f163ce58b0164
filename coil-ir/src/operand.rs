//! IR Operands
//!
//! Defines the values and references an instruction consumes or produces.
//! References to blocks, functions and globals are indices into the owning
//! Function or Module, never names or pointers.

use coil_common::{BlockId, FunctionId, GlobalId, RegisterId};
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::types::Type;

/// `base + index * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOperand {
    pub base: RegisterId,
    pub offset: i32,
    pub index: Option<RegisterId>,
    pub scale: u8,
    pub ty: Type,
}

/// IR Operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Virtual register
    Register { id: RegisterId, ty: Type },

    /// Constant integer
    Immediate { value: i64, ty: Type },

    /// Basic block in the same function
    Block(BlockId),

    /// Function in the same module
    Function { id: FunctionId, ty: Type },

    /// Global variable in the same module
    Global { id: GlobalId, ty: Type },

    /// Memory reference through registers
    Memory(MemoryOperand),
}

/// Wire tag of each operand kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperandKind {
    Register = 1,
    Immediate = 2,
    Block = 3,
    Function = 4,
    Global = 5,
    Memory = 6,
}

impl OperandKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(OperandKind::Register),
            2 => Some(OperandKind::Immediate),
            3 => Some(OperandKind::Block),
            4 => Some(OperandKind::Function),
            5 => Some(OperandKind::Global),
            6 => Some(OperandKind::Memory),
            _ => None,
        }
    }
}

impl Operand {
    pub fn register(id: RegisterId, ty: Type) -> Self {
        Operand::Register { id, ty }
    }

    pub fn imm(value: i64, ty: Type) -> Self {
        Operand::Immediate { value, ty }
    }

    pub fn block(id: BlockId) -> Self {
        Operand::Block(id)
    }

    pub fn function(id: FunctionId, ty: Type) -> Self {
        Operand::Function { id, ty }
    }

    pub fn global(id: GlobalId, ty: Type) -> Self {
        Operand::Global { id, ty }
    }

    pub fn memory(base: RegisterId, offset: i32, index: Option<RegisterId>, scale: u8, ty: Type) -> Self {
        Operand::Memory(MemoryOperand { base, offset, index, scale, ty })
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register { .. } => OperandKind::Register,
            Operand::Immediate { .. } => OperandKind::Immediate,
            Operand::Block(_) => OperandKind::Block,
            Operand::Function { .. } => OperandKind::Function,
            Operand::Global { .. } => OperandKind::Global,
            Operand::Memory(_) => OperandKind::Memory,
        }
    }

    /// Block references are untyped and report `void`
    pub fn ty(&self) -> Type {
        match self {
            Operand::Register { ty, .. }
            | Operand::Immediate { ty, .. }
            | Operand::Function { ty, .. }
            | Operand::Global { ty, .. } => *ty,
            Operand::Memory(mem) => mem.ty,
            Operand::Block(_) => Type::VOID,
        }
    }

    /// Can be read as a value
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            Operand::Register { .. } | Operand::Immediate { .. } | Operand::Global { .. } | Operand::Memory(_)
        )
    }

    /// Can name a memory location
    pub fn is_address(&self) -> bool {
        matches!(self, Operand::Register { .. } | Operand::Global { .. } | Operand::Memory(_))
    }

    /// Registers read by this operand
    pub fn registers(&self) -> impl Iterator<Item = RegisterId> {
        let (first, second) = match self {
            Operand::Register { id, .. } => (Some(*id), None),
            Operand::Memory(mem) => (Some(mem.base), mem.index),
            _ => (None, None),
        };
        first.into_iter().chain(second)
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[%{}", self.base)?;
        if let Some(index) = self.index {
            write!(f, " + %{}*{}", index, self.scale)?;
        }
        if self.offset != 0 {
            write!(f, " {} {}", if self.offset < 0 { '-' } else { '+' }, self.offset.unsigned_abs())?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register { id, .. } => write!(f, "%{id}"),
            Operand::Immediate { value, .. } => write!(f, "{value}"),
            Operand::Block(id) => write!(f, "%{id}"),
            Operand::Function { id, .. } => write!(f, "@{id}"),
            Operand::Global { id, .. } => write!(f, "@{id}"),
            Operand::Memory(mem) => write!(f, "{mem}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::register(5, Type::I32).to_string(), "%5");
        assert_eq!(Operand::imm(-42, Type::I64).to_string(), "-42");
        assert_eq!(Operand::block(BlockId(1)).to_string(), "%bb1");
        assert_eq!(Operand::function(FunctionId(0), Type::VOID).to_string(), "@fn0");
        assert_eq!(Operand::global(GlobalId(2), Type::I8).to_string(), "@g2");
        assert_eq!(
            Operand::memory(1, -8, Some(2), 4, Type::I32).to_string(),
            "[%1 + %2*4 - 8]"
        );
    }

    #[test]
    fn test_operand_classes() {
        let block = Operand::block(BlockId(0));
        assert!(!block.is_value());
        assert_eq!(block.ty(), Type::VOID);

        let imm = Operand::imm(1, Type::I32);
        assert!(imm.is_value());
        assert!(!imm.is_address());

        let mem = Operand::memory(3, 0, Some(4), 8, Type::I64);
        assert!(mem.is_address());
        assert_eq!(mem.registers().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(mem.kind(), OperandKind::Memory);
    }
}
