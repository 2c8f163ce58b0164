//! IR Opcodes
//!
//! Every opcode belongs to a group, and the group fixes the operand shape
//! an instruction with that opcode must have.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,

    // Binary arithmetic and comparison
    Add = 0x01,
    Sub = 0x02,
    Mul = 0x03,
    Div = 0x04,
    Rem = 0x05,
    And = 0x06,
    Or = 0x07,
    Xor = 0x08,
    Shl = 0x09,
    Shr = 0x0A,
    CmpEq = 0x0B,
    CmpNe = 0x0C,
    CmpLt = 0x0D,
    CmpLe = 0x0E,
    CmpGt = 0x0F,
    CmpGe = 0x10,

    // Unary
    Neg = 0x20,
    Not = 0x21,
    Mov = 0x22,
    Convert = 0x23,

    // Memory
    Load = 0x30,
    Store = 0x31,

    // Control flow
    Br = 0x40,
    BrCond = 0x41,
    Call = 0x42,
    Ret = 0x43,
}

/// Operand shape class of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeGroup {
    /// Two value sources, register destination
    Binary,
    /// One value source, register destination
    Unary,
    /// One address source, register destination
    Load,
    /// Value and address sources, no destination
    Store,
    /// One block source
    Branch,
    /// Condition value and two block sources
    CondBranch,
    /// Function reference followed by arguments, register destination iff non-void
    Call,
    /// Zero or one value source
    Return,
    /// No operands at all
    Nop,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Nop),
            0x01 => Some(Opcode::Add),
            0x02 => Some(Opcode::Sub),
            0x03 => Some(Opcode::Mul),
            0x04 => Some(Opcode::Div),
            0x05 => Some(Opcode::Rem),
            0x06 => Some(Opcode::And),
            0x07 => Some(Opcode::Or),
            0x08 => Some(Opcode::Xor),
            0x09 => Some(Opcode::Shl),
            0x0A => Some(Opcode::Shr),
            0x0B => Some(Opcode::CmpEq),
            0x0C => Some(Opcode::CmpNe),
            0x0D => Some(Opcode::CmpLt),
            0x0E => Some(Opcode::CmpLe),
            0x0F => Some(Opcode::CmpGt),
            0x10 => Some(Opcode::CmpGe),
            0x20 => Some(Opcode::Neg),
            0x21 => Some(Opcode::Not),
            0x22 => Some(Opcode::Mov),
            0x23 => Some(Opcode::Convert),
            0x30 => Some(Opcode::Load),
            0x31 => Some(Opcode::Store),
            0x40 => Some(Opcode::Br),
            0x41 => Some(Opcode::BrCond),
            0x42 => Some(Opcode::Call),
            0x43 => Some(Opcode::Ret),
            _ => None,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NOP" => Some(Opcode::Nop),
            "ADD" => Some(Opcode::Add),
            "SUB" => Some(Opcode::Sub),
            "MUL" => Some(Opcode::Mul),
            "DIV" => Some(Opcode::Div),
            "REM" => Some(Opcode::Rem),
            "AND" => Some(Opcode::And),
            "OR" => Some(Opcode::Or),
            "XOR" => Some(Opcode::Xor),
            "SHL" => Some(Opcode::Shl),
            "SHR" => Some(Opcode::Shr),
            "CMP_EQ" => Some(Opcode::CmpEq),
            "CMP_NE" => Some(Opcode::CmpNe),
            "CMP_LT" => Some(Opcode::CmpLt),
            "CMP_LE" => Some(Opcode::CmpLe),
            "CMP_GT" => Some(Opcode::CmpGt),
            "CMP_GE" => Some(Opcode::CmpGe),
            "NEG" => Some(Opcode::Neg),
            "NOT" => Some(Opcode::Not),
            "MOV" => Some(Opcode::Mov),
            "CONVERT" => Some(Opcode::Convert),
            "LOAD" => Some(Opcode::Load),
            "STORE" => Some(Opcode::Store),
            "BR" => Some(Opcode::Br),
            "BR_COND" => Some(Opcode::BrCond),
            "CALL" => Some(Opcode::Call),
            "RET" => Some(Opcode::Ret),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Rem => "REM",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Xor => "XOR",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::CmpEq => "CMP_EQ",
            Opcode::CmpNe => "CMP_NE",
            Opcode::CmpLt => "CMP_LT",
            Opcode::CmpLe => "CMP_LE",
            Opcode::CmpGt => "CMP_GT",
            Opcode::CmpGe => "CMP_GE",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::Mov => "MOV",
            Opcode::Convert => "CONVERT",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Br => "BR",
            Opcode::BrCond => "BR_COND",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
        }
    }

    pub fn group(&self) -> OpcodeGroup {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem |
            Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr |
            Opcode::CmpEq | Opcode::CmpNe | Opcode::CmpLt | Opcode::CmpLe |
            Opcode::CmpGt | Opcode::CmpGe => OpcodeGroup::Binary,

            Opcode::Neg | Opcode::Not | Opcode::Mov | Opcode::Convert => OpcodeGroup::Unary,

            Opcode::Load => OpcodeGroup::Load,
            Opcode::Store => OpcodeGroup::Store,
            Opcode::Br => OpcodeGroup::Branch,
            Opcode::BrCond => OpcodeGroup::CondBranch,
            Opcode::Call => OpcodeGroup::Call,
            Opcode::Ret => OpcodeGroup::Return,
            Opcode::Nop => OpcodeGroup::Nop,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.group(), OpcodeGroup::Branch | OpcodeGroup::CondBranch | OpcodeGroup::Return)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_and_mnemonic_agree() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = Opcode::from_u8(byte) {
                assert_eq!(opcode as u8, byte);
                assert_eq!(Opcode::from_str(opcode.to_str()), Some(opcode));
            }
        }
    }

    #[test]
    fn test_groups() {
        assert_eq!(Opcode::Add.group(), OpcodeGroup::Binary);
        assert_eq!(Opcode::CmpGe.group(), OpcodeGroup::Binary);
        assert_eq!(Opcode::Convert.group(), OpcodeGroup::Unary);
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::BrCond.is_terminator());
        assert!(!Opcode::Call.is_terminator());
        assert_eq!(Opcode::from_str("br_cond"), Some(Opcode::BrCond));
        assert_eq!(Opcode::from_u8(0x50), None);
    }
}
