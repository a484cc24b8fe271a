//! Module validation.
//!
//! Validation runs in two passes. The first pass checks structural rules:
//! index bounds, the single-memory restriction, export-name uniqueness,
//! constant-expression typing, and the feature gates that depend on whole-
//! module shape. The second pass abstractly interprets each function body as
//! a type-indexed stack machine; see [func] and [stacks].
//!
//! [Spec]: https://webassembly.github.io/spec/core/valid/index.html

use {
    crate::{
        features::{self, FeatureError, Features},
        module::{
            types::{GlobalType, RefType, ValueType, FUNCREF, I32},
            ConstExpr, ElementMode, ExportDesc, ImportDesc, Module,
        },
    },
    std::{collections::HashSet, fmt},
    thiserror::Error,
};

mod func;
mod stacks;

pub use {
    func::FuncValidator,
    stacks::{CtrlFrame, FrameKind, Stacks},
};

/// A type as known during validation: a concrete value type, or unknown when
/// the stack is polymorphic after unreachable code.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ValidationType {
    #[default]
    Unknown,
    Value(ValueType),
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationType::Unknown => f.write_str("unknown"),
            ValidationType::Value(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("value stack underflow")]
    ValStackUnderflow,
    #[error("control stack underflow")]
    CtrlStackUnderflow,
    #[error("type mismatch: expected {expect}, got {actual}")]
    TypeMismatch {
        actual: ValidationType,
        expect: ValidationType,
    },
    #[error("expected a reference type, got {actual}")]
    ExpectedRef { actual: ValidationType },
    #[error("values remaining on stack at end of block")]
    UnusedValues,
    #[error("unknown local {0}")]
    UnknownLocal(u32),
    #[error("unknown label {0}")]
    UnknownLabel(u32),
    #[error("unknown function {0}")]
    UnknownFunc(u32),
    #[error("unknown global {0}")]
    UnknownGlobal(u32),
    #[error("unknown type {0}")]
    UnknownType(u32),
    #[error("unknown table {0}")]
    UnknownTable(u32),
    #[error("unknown memory")]
    UnknownMemory,
    #[error("unknown data segment {0}")]
    UnknownDataSegment(u32),
    #[error("unknown element segment {0}")]
    UnknownElemSegment(u32),
    #[error("multiple memories")]
    MultipleMemories,
    #[error("multiple tables")]
    MultipleTables,
    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),
    #[error("size minimum must not be greater than maximum")]
    InvertedLimits,
    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,
    #[error("alignment 2^{0} is larger than the natural alignment")]
    AlignmentTooLarge(u32),
    #[error("else found outside of an if block")]
    UnexpectedElse,
    #[error("br_table target arity differs from default target")]
    BreakTypeMismatch,
    #[error("call_indirect requires a table of funcref elements")]
    WrongTableType,
    #[error("start function must have an empty signature")]
    InvalidStartFunction,
    #[error("duplicate export name {0:?}")]
    DuplicateExport(String),
    #[error("function and code section lengths differ")]
    FuncSizeMismatch,
    #[error("data count section required")]
    DataCountRequired,
    #[error("data count and data section lengths differ")]
    DataCountMismatch,
    #[error("constant expression global {0} must be imported")]
    ConstExprImportedGlobal(u32),
    #[error("constant expression global {0} must be immutable")]
    ConstExprMutableGlobal(u32),
    #[error("undeclared function reference {0}")]
    UndeclaredFunctionRef(u32),
    #[error("function body ends without an end opcode")]
    UnterminatedBody,
    #[error("instructions after the final end of a function body")]
    TrailingInstructions,
    #[error("instruction operands do not match its opcode")]
    OperandsMismatch,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),
    #[error("if without else requires identical parameter and result types")]
    MissingElse,
    #[error("{0}")]
    Feature(#[from] FeatureError),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate a decoded module against the enabled feature set. On success the
/// module is safe to lower and instantiate; the IR lowerer assumes every rule
/// checked here.
pub fn validate_module(module: &Module, features: Features) -> Result<()> {
    // Type section: multiple results gate on multi-value.
    if !features.is_enabled(features::MULTI_VALUE) {
        for ty in &module.types {
            if ty.results.len() > 1 {
                features.require(features::MULTI_VALUE, "multiple result types")?;
            }
        }
    }

    for import in &module.imports {
        match &import.desc {
            ImportDesc::Func(ti) => {
                check_type_index(module, *ti)?;
            }
            ImportDesc::Table(tt) => {
                check_limits(&tt.limits, None)?;
                if tt.ref_type == RefType::Extern {
                    features.require(features::REFERENCE_TYPES, "externref table")?;
                }
            }
            ImportDesc::Memory(mt) => check_limits(&mt.limits, Some(65536))?,
            ImportDesc::Global(gt) => {
                check_global_type(gt, features)?;
                if gt.mutable {
                    features.require(features::MUTABLE_GLOBAL, "imported mutable global")?;
                }
            }
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(ValidationError::FuncSizeMismatch);
    }
    for ti in &module.functions {
        check_type_index(module, *ti)?;
    }

    if module.table_count() > 1 {
        features.require(features::REFERENCE_TYPES, "multiple tables")?;
    }
    for tt in &module.tables {
        check_limits(&tt.limits, None)?;
        if tt.ref_type == RefType::Extern {
            features.require(features::REFERENCE_TYPES, "externref table")?;
        }
    }

    if module.memory_count() > 1 {
        return Err(ValidationError::MultipleMemories);
    }
    if let Some(mt) = &module.memory {
        check_limits(&mt.limits, Some(65536))?;
    }

    let imported_globals = module.imported_global_count();
    for global in &module.globals {
        check_global_type(&global.global_type, features)?;
        validate_const_expr(
            module,
            features,
            &global.init,
            global.global_type.value_type,
            imported_globals,
        )?;
    }

    let mut export_names: HashSet<&str> = HashSet::new();
    for export in &module.exports {
        if !export_names.insert(&export.name) {
            return Err(ValidationError::DuplicateExport(export.name.clone()));
        }
        match export.desc {
            ExportDesc::Func(i) => {
                if module.function_type(i).is_none() {
                    return Err(ValidationError::UnknownFunc(i));
                }
            }
            ExportDesc::Table(i) => {
                if module.table_type(i).is_none() {
                    return Err(ValidationError::UnknownTable(i));
                }
            }
            ExportDesc::Memory(i) => {
                if i != 0 || module.memory_type().is_none() {
                    return Err(ValidationError::UnknownMemory);
                }
            }
            ExportDesc::Global(i) => {
                let gt = module
                    .global_type(i)
                    .ok_or(ValidationError::UnknownGlobal(i))?;
                if gt.mutable {
                    features.require(features::MUTABLE_GLOBAL, "exported mutable global")?;
                }
            }
        }
    }

    if let Some(start) = module.start {
        let ty = module
            .function_type(start)
            .ok_or(ValidationError::UnknownFunc(start))?;
        if !ty.params.is_empty() || !ty.results.is_empty() {
            return Err(ValidationError::InvalidStartFunction);
        }
    }

    for elem in &module.elements {
        if elem.ref_type == RefType::Extern {
            features.require(features::REFERENCE_TYPES, "externref element segment")?;
        }
        if let ElementMode::Active {
            table_index,
            offset,
        } = &elem.mode
        {
            let tt = module
                .table_type(*table_index)
                .ok_or(ValidationError::UnknownTable(*table_index))?;
            if tt.ref_type != elem.ref_type {
                return Err(ValidationError::WrongTableType);
            }
            validate_const_expr(module, features, offset, I32, imported_globals)?;
        }
        for init in &elem.init {
            validate_const_expr(
                module,
                features,
                init,
                ValueType::Ref(elem.ref_type),
                imported_globals,
            )?;
        }
    }

    if let Some(count) = module.data_count {
        if count as usize != module.data.len() {
            return Err(ValidationError::DataCountMismatch);
        }
    }
    for data in &module.data {
        if let crate::module::DataMode::Active {
            memory_index,
            offset,
        } = &data.mode
        {
            if *memory_index != 0 || module.memory_type().is_none() {
                return Err(ValidationError::UnknownMemory);
            }
            validate_const_expr(module, features, offset, I32, imported_globals)?;
        }
    }

    // Second pass: abstract interpretation of each function body.
    let declared_funcs = declared_function_refs(module);
    let imported = module.imported_function_count();
    for (i, body) in module.code.iter().enumerate() {
        let index = imported + i as u32;
        FuncValidator::new(module, index, body, &declared_funcs)?.validate()?;
    }

    Ok(())
}

fn check_type_index(module: &Module, index: u32) -> Result<()> {
    module
        .types
        .get(index as usize)
        .map(|_| ())
        .ok_or(ValidationError::UnknownType(index))
}

fn check_limits(limits: &crate::module::types::Limits, ceiling: Option<u32>) -> Result<()> {
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(ValidationError::InvertedLimits);
        }
    }
    if let Some(ceiling) = ceiling {
        if limits.min > ceiling || limits.max.is_some_and(|m| m > ceiling) {
            return Err(ValidationError::MemoryTooLarge);
        }
    }
    Ok(())
}

fn check_global_type(gt: &GlobalType, features: Features) -> Result<()> {
    if let ValueType::Ref(_) = gt.value_type {
        features.require(features::REFERENCE_TYPES, "reference-typed global")?;
    }
    Ok(())
}

/// Validate a constant expression in a context expecting `expected`.
/// `global.get` may only reference an imported immutable global, per the
/// specification's note on constant expressions.
pub fn validate_const_expr(
    module: &Module,
    features: Features,
    expr: &ConstExpr,
    expected: ValueType,
    imported_globals: u32,
) -> Result<()> {
    let actual = match expr {
        ConstExpr::I32(_) => I32,
        ConstExpr::I64(_) => crate::module::types::I64,
        ConstExpr::F32(_) => crate::module::types::F32,
        ConstExpr::F64(_) => crate::module::types::F64,
        ConstExpr::GlobalGet(idx) => {
            if *idx >= imported_globals {
                return Err(ValidationError::ConstExprImportedGlobal(*idx));
            }
            let gt = module
                .global_type(*idx)
                .ok_or(ValidationError::UnknownGlobal(*idx))?;
            if gt.mutable {
                return Err(ValidationError::ConstExprMutableGlobal(*idx));
            }
            gt.value_type
        }
        ConstExpr::RefNull(rt) => {
            features.require(features::REFERENCE_TYPES, "ref.null")?;
            ValueType::Ref(*rt)
        }
        ConstExpr::RefFunc(idx) => {
            if module.function_type(*idx).is_none() {
                return Err(ValidationError::UnknownFunc(*idx));
            }
            FUNCREF
        }
    };
    if actual != expected {
        return Err(ValidationError::TypeMismatch {
            actual: ValidationType::Value(actual),
            expect: ValidationType::Value(expected),
        });
    }
    Ok(())
}

/// The set of function indices that may be referenced by `ref.func` inside
/// function bodies: those mentioned in element segments, exports, or global
/// initializers.
pub fn declared_function_refs(module: &Module) -> HashSet<u32> {
    let mut declared = HashSet::new();
    for elem in &module.elements {
        for init in &elem.init {
            if let ConstExpr::RefFunc(idx) = init {
                declared.insert(*idx);
            }
        }
    }
    for global in &module.globals {
        if let ConstExpr::RefFunc(idx) = global.init {
            declared.insert(idx);
        }
    }
    for export in &module.exports {
        if let ExportDesc::Func(idx) = export.desc {
            declared.insert(idx);
        }
    }
    declared
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            features::{FEATURES_CORE_1, FEATURES_CORE_2},
            module::{
                instr::{opcodes, BlockType, Operands},
                types::{FunctionType, Limits, MemoryType, TableType},
                DataMode, DataSegment, FuncBody, Global, Instr, Opcode,
            },
        },
    };

    fn instr(opcode: u8, operands: Operands) -> Instr {
        Instr {
            opcode: Opcode::Normal(opcode),
            operands,
        }
    }

    fn func_module(ty: FunctionType, body: Vec<Instr>) -> Module {
        Module {
            types: vec![ty],
            functions: vec![0],
            code: vec![FuncBody {
                locals: Vec::new(),
                body,
            }],
            ..Module::default()
        }
    }

    #[test]
    fn well_typed_body_passes() {
        let m = func_module(
            FunctionType::new(vec![I32, I32], vec![I32]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(0)),
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(1)),
                instr(opcodes::I32_ADD, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        validate_module(&m, FEATURES_CORE_1).unwrap();
    }

    #[test]
    fn type_mismatch_is_caught() {
        let m = func_module(
            FunctionType::new(vec![], vec![I32]),
            vec![
                instr(opcodes::I64_CONST, Operands::I64(1)),
                instr(opcodes::END, Operands::None),
            ],
        );
        assert!(matches!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn unknown_local_is_caught() {
        let m = func_module(
            FunctionType::new(vec![I32], vec![]),
            vec![
                instr(opcodes::LOCAL_GET, Operands::LocalIndex(3)),
                instr(opcodes::DROP, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::UnknownLocal(3)
        );
    }

    #[test]
    fn unreachable_makes_the_stack_polymorphic() {
        // (func (result i32) unreachable i32.add) is valid: the operands of
        // i32.add come from the polymorphic stack.
        let m = func_module(
            FunctionType::new(vec![], vec![I32]),
            vec![
                instr(opcodes::UNREACHABLE, Operands::None),
                instr(opcodes::I32_ADD, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        validate_module(&m, FEATURES_CORE_1).unwrap();
    }

    #[test]
    fn memory_ops_require_a_memory() {
        let m = func_module(
            FunctionType::new(vec![], vec![I32]),
            vec![
                instr(opcodes::MEMORY_SIZE, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::UnknownMemory
        );
    }

    #[test]
    fn multiple_memories_are_rejected() {
        let m = Module {
            imports: vec![crate::module::Import {
                module: "a".into(),
                name:   "m".into(),
                desc:   ImportDesc::Memory(MemoryType {
                    limits: Limits { min: 1, max: None },
                }),
            }],
            memory: Some(MemoryType {
                limits: Limits { min: 1, max: None },
            }),
            ..Module::default()
        };
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::MultipleMemories
        );
    }

    #[test]
    fn multi_result_types_gate_on_multi_value() {
        let m = Module {
            types: vec![FunctionType::new(vec![], vec![I32, I32])],
            ..Module::default()
        };
        let err = validate_module(&m, FEATURES_CORE_1).unwrap_err();
        assert!(err.to_string().contains("multi-value"));
        validate_module(&m, FEATURES_CORE_2).unwrap();
    }

    #[test]
    fn duplicate_export_names_are_rejected() {
        let m = Module {
            types: vec![FunctionType::default()],
            functions: vec![0, 0],
            code: vec![
                FuncBody {
                    locals: Vec::new(),
                    body:   vec![instr(opcodes::END, Operands::None)],
                },
                FuncBody {
                    locals: Vec::new(),
                    body:   vec![instr(opcodes::END, Operands::None)],
                },
            ],
            exports: vec![
                crate::module::Export {
                    name: "f".into(),
                    desc: ExportDesc::Func(0),
                },
                crate::module::Export {
                    name: "f".into(),
                    desc: ExportDesc::Func(1),
                },
            ],
            ..Module::default()
        };
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::DuplicateExport("f".into())
        );
    }

    #[test]
    fn const_expr_global_get_must_reference_imported_immutable() {
        let m = Module {
            globals: vec![Global {
                global_type: GlobalType {
                    value_type: I32,
                    mutable:    false,
                },
                init:        ConstExpr::GlobalGet(0),
            }],
            ..Module::default()
        };
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::ConstExprImportedGlobal(0)
        );
    }

    #[test]
    fn call_indirect_requires_a_funcref_table() {
        let m = Module {
            types: vec![FunctionType::default()],
            functions: vec![0],
            tables: vec![TableType {
                ref_type: RefType::Extern,
                limits:   Limits { min: 1, max: None },
            }],
            code: vec![FuncBody {
                locals: Vec::new(),
                body:   vec![
                    instr(opcodes::I32_CONST, Operands::I32(0)),
                    instr(
                        opcodes::CALL_INDIRECT,
                        Operands::CallIndirect {
                            type_index:  0,
                            table_index: 0,
                        },
                    ),
                    instr(opcodes::END, Operands::None),
                ],
            }],
            ..Module::default()
        };
        assert_eq!(
            validate_module(&m, FEATURES_CORE_2).unwrap_err(),
            ValidationError::WrongTableType
        );
    }

    #[test]
    fn data_count_is_required_for_memory_init() {
        let m = Module {
            types: vec![FunctionType::default()],
            functions: vec![0],
            memory: Some(MemoryType {
                limits: Limits { min: 1, max: None },
            }),
            data: vec![DataSegment {
                mode: DataMode::Passive,
                init: Box::new([1, 2, 3]),
            }],
            code: vec![FuncBody {
                locals: Vec::new(),
                body:   vec![
                    instr(opcodes::I32_CONST, Operands::I32(0)),
                    instr(opcodes::I32_CONST, Operands::I32(0)),
                    instr(opcodes::I32_CONST, Operands::I32(3)),
                    Instr {
                        opcode:   Opcode::Misc(crate::module::instr::misc::MEMORY_INIT),
                        operands: Operands::DataIndex(0),
                    },
                    instr(opcodes::END, Operands::None),
                ],
            }],
            ..Module::default()
        };
        assert_eq!(
            validate_module(&m, FEATURES_CORE_2).unwrap_err(),
            ValidationError::DataCountRequired
        );
    }

    #[test]
    fn dead_code_after_the_function_end_is_rejected() {
        let m = func_module(
            FunctionType::default(),
            vec![
                instr(opcodes::END, Operands::None),
                instr(opcodes::NOP, Operands::None),
            ],
        );
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::TrailingInstructions
        );
    }

    #[test]
    fn branch_depths_are_checked() {
        let m = func_module(
            FunctionType::default(),
            vec![
                instr(opcodes::BR, Operands::LabelIndex(2)),
                instr(opcodes::END, Operands::None),
            ],
        );
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::UnknownLabel(2)
        );
    }

    #[test]
    fn if_blocks_balance_their_types() {
        // An if without else whose results differ from its params.
        let m = func_module(
            FunctionType::new(vec![], vec![I32]),
            vec![
                instr(opcodes::I32_CONST, Operands::I32(1)),
                instr(opcodes::IF, Operands::Block(BlockType::Value(I32))),
                instr(opcodes::I32_CONST, Operands::I32(2)),
                instr(opcodes::END, Operands::None),
                instr(opcodes::END, Operands::None),
            ],
        );
        assert_eq!(
            validate_module(&m, FEATURES_CORE_1).unwrap_err(),
            ValidationError::MissingElse
        );
    }
}
