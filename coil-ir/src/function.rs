//! Function Definitions
//!
//! Defines IR functions with their parameters, blocks, and register counter.
//! Parameters occupy registers `0..n` so instruction operands can name them
//! without a separate value kind.

use coil_common::{BlockId, RegisterId};
use serde::{Deserialize, Serialize};
use crate::blocks::BasicBlock;
use crate::module::Linkage;
use crate::types::Type;

/// Named function parameter bound to its register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub ty: Type,
    pub register: RegisterId,
}

/// Function in IR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    name: String,
    signature: Type,
    return_type: Type,
    params: Vec<Parameter>,
    is_variadic: bool,
    is_external: bool,
    linkage: Linkage,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) next_register: RegisterId,
}

impl Function {
    pub(crate) fn new(
        name: String,
        signature: Type,
        return_type: Type,
        params: Vec<Parameter>,
        is_variadic: bool,
        is_external: bool,
        linkage: Linkage,
    ) -> Self {
        let next_register = params.len() as RegisterId;
        Self {
            name,
            signature,
            return_type,
            params,
            is_variadic,
            is_external,
            linkage,
            blocks: Vec::new(),
            next_register,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function type handle in the owning module's registry
    pub fn signature(&self) -> Type {
        self.signature
    }

    pub fn return_type(&self) -> Type {
        self.return_type
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.is_variadic
    }

    /// Declaration only, owns no blocks
    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    /// First block with this name
    pub fn find_block(&self, name: &str) -> Option<BlockId> {
        self.blocks.iter().position(|b| b.name == name).map(BlockId::new)
    }

    /// Registers allocated so far, parameters included
    pub fn register_count(&self) -> RegisterId {
        self.next_register
    }

    /// Parameter living in `register`, if any
    pub fn parameter_for(&self, register: RegisterId) -> Option<&Parameter> {
        self.params.get(register as usize)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Function {
        Function::new(
            "max".to_string(),
            Type::VOID,
            Type::I32,
            vec![
                Parameter { name: "a".to_string(), ty: Type::I32, register: 0 },
                Parameter { name: "b".to_string(), ty: Type::I32, register: 1 },
            ],
            false,
            false,
            Linkage::External,
        )
    }

    #[test]
    fn test_parameters_take_first_registers() {
        let func = sample();
        assert_eq!(func.register_count(), 2);
        assert_eq!(func.parameter_for(1).map(|p| p.name.as_str()), Some("b"));
        assert!(func.parameter_for(2).is_none());
    }

    #[test]
    fn test_find_block() {
        let mut func = sample();
        func.blocks.push(BasicBlock::new("entry"));
        func.blocks.push(BasicBlock::new("done"));
        assert_eq!(func.find_block("done"), Some(BlockId(1)));
        assert_eq!(func.find_block("missing"), None);
        assert_eq!(func.entry_block().map(|b| b.name.as_str()), Some("entry"));
        assert_eq!(func.instruction_count(), 0);
    }
}
