//! COIL - Intermediate Representation
//!
//! The in-memory program container carried between a front-end and a
//! target assembler.
//!
//! ## Architecture
//!
//! - `types` - packed 32-bit type handles
//! - `registry` - side tables behind composite handles
//! - `ops` - opcodes and their operand shapes
//! - `operand` - register, immediate, memory and index references
//! - `instructions` - validated instructions and their factories
//! - `blocks` - basic blocks
//! - `function` - functions, parameters and registers
//! - `module` - the owning container, globals and relocations

pub use self::types::{Category, Qualifiers, Type, MAX_COMPOSITES};
pub use self::registry::{CompositeType, Field, PrimitiveType, TypeDescriptor, TypeRegistry};
pub use self::ops::{Opcode, OpcodeGroup};
pub use self::operand::{MemoryOperand, Operand, OperandKind};
pub use self::instructions::{
    create_binary_op, create_branch, create_call, create_cond_branch, create_load, create_nop,
    create_return, create_store, create_unary_op, Instruction, InstructionFlags,
};
pub use self::blocks::BasicBlock;
pub use self::function::{Function, Parameter};
pub use self::module::{
    FunctionDecl, GlobalVariable, Linkage, Module, RelocKind, RelocSection, Relocation,
    TargetRequirements, INITIAL_CAPACITY,
};

mod types;
mod registry;
mod ops;
mod operand;
mod instructions;
mod blocks;
mod function;
mod module;

#[cfg(test)]
mod tests;
