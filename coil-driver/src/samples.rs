//! Built-in sample modules
//!
//! Small hand-built programs used to exercise the encoder from the command
//! line without a front-end.

use coil_common::Result;
use coil_ir::*;

pub const SAMPLES: [&str; 2] = ["add", "hello"];

pub fn create_sample(name: &str) -> Option<Result<Module>> {
    match name {
        "add" => Some(create_add_module()),
        "hello" => Some(create_hello_world_module()),
        _ => None,
    }
}

/// `i32 add(i32 a, i32 b) { return a + b; }`
pub fn create_add_module() -> Result<Module> {
    let mut module = Module::new("add");
    let add = module.create_function(
        FunctionDecl::new("add", Type::I32)
            .param("a", Type::I32)
            .param("b", Type::I32)
            .linkage(Linkage::External),
    )?;
    let entry = module.create_basic_block(add, "entry")?;
    let sum = Operand::register(module.new_register(add)?, Type::I32);
    let a = Operand::register(0, Type::I32);
    let b = Operand::register(1, Type::I32);

    module.add_instruction(add, entry, create_binary_op(Opcode::Add, sum, a, b, Type::I32)?)?;
    module.add_instruction(add, entry, create_return(Some(sum))?)?;
    Ok(module)
}

/// `int main() { puts("hello"); return 0; }` with the call site relocated
/// against `puts`
pub fn create_hello_world_module() -> Result<Module> {
    let mut module = Module::new("hello");
    let cstr = module.types_mut().intern_pointer(Type::I8, Qualifiers::CONST)?;
    let text = module.types_mut().intern_array(Type::I8, 6)?;

    let message = module.add_global(
        GlobalVariable::new(".str.0", text)
            .constant()
            .with_initializer(*b"hello\0")
            .linkage(Linkage::Private),
    )?;
    let puts_sig = module.types_mut().intern_function(Type::I32, &[cstr], false)?;
    let puts = module.declare_function("puts", puts_sig, vec!["s".to_string()], true, Linkage::External)?;

    let main = module.create_function(FunctionDecl::new("main", Type::I32))?;
    let entry = module.create_basic_block(main, "entry")?;
    let status = Operand::register(module.new_register(main)?, Type::I32);
    let call = create_call(
        Some(status),
        Operand::function(puts, puts_sig),
        vec![Operand::global(message, text)],
        Type::I32,
    )?;
    module.add_instruction(main, entry, call)?;
    module.add_instruction(main, entry, create_return(Some(Operand::imm(0, Type::I32)))?)?;

    module.add_relocation(Relocation {
        symbol: "puts".to_string(),
        section: RelocSection::Code,
        offset: 0,
        kind: RelocKind::Rel32,
        addend: -4,
    })?;
    module.add_metadata("producer", "coil sample")?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_samples_build() {
        for name in SAMPLES {
            let module = create_sample(name).unwrap().unwrap();
            assert_eq!(module.name(), name);
        }
        assert!(create_sample("missing").is_none());
    }

    #[test]
    fn test_hello_calls_declared_puts() {
        let module = create_hello_world_module().unwrap();
        let puts = module.find_function("puts").unwrap();
        let decl = module.function(puts).unwrap();
        assert!(decl.is_external());
        assert_eq!(module.types().describe(decl.signature()), "i32 (i8*)");

        let call = &module.functions()[1].blocks()[0].instructions[0];
        assert_eq!(call.sources()[0], Operand::function(puts, decl.signature()));
    }
}
