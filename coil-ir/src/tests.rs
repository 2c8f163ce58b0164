//! Unit tests for the module container

use super::*;
use coil_common::{BlockId, ErrorKind, FunctionId, GlobalId};
use pretty_assertions::assert_eq;

/// `i32 add(i32 a, i32 b) { entry: %2 = ADD a, b; RET %2 }`
fn add_module() -> (Module, FunctionId, BlockId) {
    let mut module = Module::new("test");
    let add = module
        .create_function(
            FunctionDecl::new("add", Type::I32)
                .param("a", Type::I32)
                .param("b", Type::I32)
                .linkage(Linkage::External),
        )
        .unwrap();
    let entry = module.create_basic_block(add, "entry").unwrap();
    let sum = module.new_register(add).unwrap();

    let a = Operand::register(0, Type::I32);
    let b = Operand::register(1, Type::I32);
    let dest = Operand::register(sum, Type::I32);
    module
        .add_instruction(add, entry, create_binary_op(Opcode::Add, dest, a, b, Type::I32).unwrap())
        .unwrap();
    module.add_instruction(add, entry, create_return(Some(dest)).unwrap()).unwrap();
    (module, add, entry)
}

#[test]
fn test_add_function() {
    let (module, add, entry) = add_module();
    let func = module.function(add).unwrap();

    assert_eq!(func.name(), "add");
    assert_eq!(func.return_type(), Type::I32);
    assert_eq!(func.params().len(), 2);
    assert_eq!(func.register_count(), 3);
    assert_eq!(module.find_basic_block(add, "entry"), Some(entry));

    let block = module.block(add, entry).unwrap();
    assert!(block.has_terminator());
    let opcodes: Vec<Opcode> = block.instructions.iter().map(|i| i.opcode()).collect();
    assert_eq!(opcodes, vec![Opcode::Add, Opcode::Ret]);

    let names: Vec<&str> = block.instructions[0]
        .sources()
        .iter()
        .filter_map(|op| match op {
            Operand::Register { id, .. } => func.parameter_for(*id).map(|p| p.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_signature_is_interned() {
    let (module, add, _) = add_module();
    let signature = module.function(add).unwrap().signature();
    assert_eq!(module.types().describe(signature), "i32 (i32, i32)");
    assert_eq!(module.types().primitives(), &[Type::I32]);
}

#[test]
fn test_listing() {
    let (module, _, _) = add_module();
    assert_eq!(
        module.to_string(),
        "; module test\n\
         \n\
         define external i32 @add(i32 %a, i32 %b) {\n\
         entry:\n  \
         %2 = add i32 %a, %b\n  \
         ret i32 %2\n\
         }\n"
    );
}

#[test]
fn test_growth_past_initial_capacity() {
    let mut module = Module::new("grow");
    let count = INITIAL_CAPACITY + 1;
    for i in 0..count {
        let id = module.add_global(GlobalVariable::new(format!("g{i}"), Type::I32)).unwrap();
        assert_eq!(id, GlobalId::new(i));
        module.create_function(FunctionDecl::new(format!("f{i}"), Type::VOID)).unwrap();
    }

    let globals: Vec<String> = module.globals().iter().map(|g| g.name.clone()).collect();
    let expected: Vec<String> = (0..count).map(|i| format!("g{i}")).collect();
    assert_eq!(globals, expected);

    let functions: Vec<&str> = module.functions().iter().map(|f| f.name()).collect();
    assert_eq!(functions.len(), count);
    assert_eq!(functions[0], "f0");
    assert_eq!(functions[INITIAL_CAPACITY], "f16");
    assert_eq!(module.find_global("g16"), Some(GlobalId(16)));
}

#[test]
fn test_instruction_growth_past_initial_capacity() {
    let (mut module, add, entry) = add_module();
    let count = INITIAL_CAPACITY as u32 + 1;
    let first = module.reserve_registers(add, count).unwrap();
    for i in 0..count {
        let dest = Operand::register(first + i, Type::I32);
        let mov = create_unary_op(Opcode::Mov, dest, Operand::imm(i64::from(i), Type::I32), Type::I32).unwrap();
        module.add_instruction(add, entry, mov).unwrap();
    }

    let block = module.block(add, entry).unwrap();
    assert_eq!(block.instructions.len(), 2 + count as usize);
    let values: Vec<i64> = block.instructions[2..]
        .iter()
        .map(|instr| match instr.sources() {
            [Operand::Immediate { value, .. }] => *value,
            other => panic!("unexpected sources {other:?}"),
        })
        .collect();
    assert_eq!(values, (0..i64::from(count)).collect::<Vec<_>>());
}

#[test]
fn test_failed_declaration_leaves_types_unchanged() {
    let (mut module, _, _) = add_module();
    let before = module.clone();

    let err = module
        .create_function(FunctionDecl::new("f", Type::I64).param("x", Type::VOID))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let fields = vec![Field::new("a", Type::I16), Field::new("b", Type::VOID)];
    assert!(module.types_mut().intern_struct(None, fields).is_err());

    assert_eq!(module, before);
    assert_eq!(module.types().primitives(), &[Type::I32]);
}

#[test]
fn test_duplicate_names_are_accepted() {
    let mut module = Module::new("dup");
    let first = module.add_global(GlobalVariable::new("x", Type::I32)).unwrap();
    let second = module.add_global(GlobalVariable::new("x", Type::I64)).unwrap();
    assert_ne!(first, second);
    assert_eq!(module.find_global("x"), Some(first));
    assert_eq!(module.find_global("y"), None);
}

#[test]
fn test_global_alignment() {
    let mut module = Module::new("align");
    let natural = module.add_global(GlobalVariable::new("n", Type::I64)).unwrap();
    assert_eq!(module.global(natural).unwrap().alignment, 8);

    let explicit = module.add_global(GlobalVariable::new("e", Type::I8).aligned(16)).unwrap();
    assert_eq!(module.global(explicit).unwrap().alignment, 16);

    let err = module.add_global(GlobalVariable::new("bad", Type::I8).aligned(3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(module.globals().len(), 2);
}

#[test]
fn test_external_global_has_no_initializer() {
    let mut module = Module::new("ext");
    let err = module
        .add_global(GlobalVariable::new("x", Type::I32).external().with_initializer(vec![0, 0, 0, 0]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(module.globals().is_empty());
}

#[test]
fn test_unknown_type_is_rejected() {
    let mut module = Module::new("types");
    let bogus = Type::from_bits(0x7000_0005);
    let err = module.add_global(GlobalVariable::new("s", bogus)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownType);

    let err = module.create_function(FunctionDecl::new("f", bogus)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownType);
    assert!(module.functions().is_empty());
    assert!(module.types().is_empty());
}

#[test]
fn test_external_function_owns_no_blocks() {
    let mut module = Module::new("decl");
    let puts = module
        .create_function(FunctionDecl::new("puts", Type::I32).param("s", Type::I64).external())
        .unwrap();
    let err = module.create_basic_block(puts, "entry").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(module.function(puts).unwrap().blocks().is_empty());
}

#[test]
fn test_failed_instruction_leaves_module_unchanged() {
    let (mut module, add, entry) = add_module();
    let before = module.clone();

    let unallocated = Operand::register(9, Type::I32);
    let instr = create_unary_op(Opcode::Neg, unallocated, Operand::register(0, Type::I32), Type::I32).unwrap();
    let err = module.add_instruction(add, entry, instr).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = module.add_instruction(add, entry, create_branch(BlockId(4)).unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let call = create_call(None, Operand::function(FunctionId(7), Type::VOID), vec![], Type::VOID).unwrap();
    assert!(module.add_instruction(add, entry, call).is_err());

    let load = create_load(
        Operand::register(2, Type::I32),
        Operand::global(GlobalId(0), Type::I32),
        Type::I32,
    )
    .unwrap();
    assert!(module.add_instruction(add, entry, load).is_err());

    let wide = Operand::register(2, Type::F64);
    let mov = create_unary_op(Opcode::Mov, wide, Operand::imm(1, Type::F64), Type::F64).unwrap();
    module.add_instruction(add, BlockId(1), mov).unwrap_err();

    assert_eq!(module, before);
}

#[test]
fn test_forward_branch_and_call() {
    let mut module = Module::new("flow");
    let callee = module.create_function(FunctionDecl::new("tick", Type::VOID)).unwrap();
    let main = module.create_function(FunctionDecl::new("main", Type::I32).param("n", Type::I32)).unwrap();
    let entry = module.create_basic_block(main, "entry").unwrap();
    let done = module.create_basic_block(main, "done").unwrap();

    let cond = module.new_register(main).unwrap();
    let flag = Operand::register(cond, Type::BOOL);
    module
        .add_instruction(
            main,
            entry,
            create_binary_op(Opcode::CmpGt, flag, Operand::register(0, Type::I32), Operand::imm(0, Type::I32), Type::BOOL)
                .unwrap()
                .with_name("positive"),
        )
        .unwrap();
    module
        .add_instruction(main, entry, create_call(None, Operand::function(callee, Type::VOID), vec![], Type::VOID).unwrap())
        .unwrap();
    module.add_instruction(main, entry, create_cond_branch(flag, done, done).unwrap()).unwrap();
    module.add_instruction(main, done, create_return(Some(Operand::imm(0, Type::I32))).unwrap()).unwrap();

    let listing = module.to_string();
    assert!(listing.contains("  %1 = cmp_gt bool %n, 0 ; positive\n"));
    assert!(listing.contains("  call @tick\n"));
    assert!(listing.contains("  br_cond %1, %done, %done\n"));
    assert_eq!(module.types().primitives(), &[Type::VOID, Type::I32, Type::BOOL]);
}

#[test]
fn test_relocations_and_metadata() {
    let mut module = Module::new("meta");
    module
        .add_relocation(Relocation {
            symbol: "printf".to_string(),
            section: RelocSection::Code,
            offset: 12,
            kind: RelocKind::Rel32,
            addend: -4,
        })
        .unwrap();
    let err = module
        .add_relocation(Relocation {
            symbol: String::new(),
            section: RelocSection::Data,
            offset: 0,
            kind: RelocKind::Abs64,
            addend: 0,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(module.relocations().len(), 1);

    module.add_metadata("producer", "hoilc").unwrap();
    module.set_target_requirements(TargetRequirements {
        required_features: vec!["simd".to_string()],
        preferred_features: vec![],
        device_class: Some("gpu".to_string()),
    });
    assert_eq!(module.metadata(), &[("producer".to_string(), "hoilc".to_string())]);
    assert_eq!(module.target_requirements().device_class.as_deref(), Some("gpu"));
    assert_eq!(
        module.to_string(),
        "; module meta\n; device gpu\n; requires simd\n; producer = hoilc\n; reloc rel32 code+12 printf -4\n"
    );
}

#[test]
fn test_json_roundtrip() {
    let (module, _, _) = add_module();
    let json = serde_json::to_string(&module).unwrap();
    let back: Module = serde_json::from_str(&json).unwrap();
    assert_eq!(back, module);
}
