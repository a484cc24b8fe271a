//! The decoded, typed representation of a WebAssembly binary module.
//!
//! A [Module] is produced by the binary decoder, checked by the
//! [validator][crate::validation], and consumed by
//! [instantiation][crate::store::Store::instantiate]. It is immutable after
//! validation.

use {
    self::types::{FunctionType, GlobalType, MemoryType, RefType, TableType, ValueType},
    std::{
        collections::HashMap,
        sync::atomic::{AtomicU64, Ordering},
    },
};

pub mod instr;
pub mod types;

pub use instr::{BlockType, Instr, MemArg, Opcode, Operands};

/// Identifies one decoded [Module] for the lifetime of the process. Engines
/// key their compiled-code caches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

impl ModuleId {
    pub fn fresh() -> ModuleId {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ModuleId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An import required by a module, resolved against another module's exports
/// during instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name:   String,
    pub desc:   ImportDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportDesc {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

/// A constant expression: exactly one producing opcode, used for global,
/// element, and data initializers.
///
/// `global.get` may only name an imported immutable global; `ref.null` and
/// `ref.func` require the reference-types feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
    RefNull(RefType),
    RefFunc(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub global_type: GlobalType,
    pub init:        ConstExpr,
}

/// An element segment. Active segments are applied to a table at
/// instantiation; passive segments feed `table.init`; declarative segments
/// only forward-declare functions for `ref.func`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub ref_type: RefType,
    pub mode:     ElementMode,
    pub init:     Vec<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table_index: u32, offset: ConstExpr },
    Passive,
    Declarative,
}

/// A data segment. Active segments are copied into memory at instantiation;
/// passive segments feed `memory.init`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub init: Box<[u8]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory_index: u32, offset: ConstExpr },
    Passive,
}

impl DataSegment {
    pub fn is_passive(&self) -> bool {
        matches!(self.mode, DataMode::Passive)
    }
}

/// The decoded body of one locally defined function: its local declarations
/// (parameters not included) followed by a flat instruction sequence ending
/// with `end`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncBody {
    pub locals: Vec<ValueType>,
    pub body:   Vec<Instr>,
}

/// Contents of the custom name section, when present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameSection {
    pub module_name:    Option<String>,
    pub function_names: HashMap<u32, String>,
}

/// A decoded module. Section vectors are index-correlated the way the binary
/// format correlates them: `functions[i]` is the type index of the function
/// whose body is `code[i]`.
#[derive(Debug)]
pub struct Module {
    pub id:         ModuleId,
    pub types:      Vec<FunctionType>,
    pub imports:    Vec<Import>,
    pub functions:  Vec<u32>,
    pub tables:     Vec<TableType>,
    pub memory:     Option<MemoryType>,
    pub globals:    Vec<Global>,
    pub exports:    Vec<Export>,
    pub start:      Option<u32>,
    pub elements:   Vec<ElementSegment>,
    pub code:       Vec<FuncBody>,
    pub data:       Vec<DataSegment>,
    pub data_count: Option<u32>,
    pub names:      NameSection,
}

impl Default for Module {
    fn default() -> Module {
        Module {
            id:         ModuleId::fresh(),
            types:      Vec::new(),
            imports:    Vec::new(),
            functions:  Vec::new(),
            tables:     Vec::new(),
            memory:     None,
            globals:    Vec::new(),
            exports:    Vec::new(),
            start:      None,
            elements:   Vec::new(),
            code:       Vec::new(),
            data:       Vec::new(),
            data_count: None,
            names:      NameSection::default(),
        }
    }
}

impl Module {
    pub fn imported_function_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Func(_)))
            .count() as u32
    }

    pub fn imported_table_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Table(_)))
            .count() as u32
    }

    pub fn imported_memory_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Memory(_)))
            .count() as u32
    }

    pub fn imported_global_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Global(_)))
            .count() as u32
    }

    /// The number of functions in the module's function index space,
    /// imports included.
    pub fn function_count(&self) -> u32 {
        self.imported_function_count() + self.functions.len() as u32
    }

    pub fn table_count(&self) -> u32 {
        self.imported_table_count() + self.tables.len() as u32
    }

    pub fn memory_count(&self) -> u32 {
        self.imported_memory_count() + self.memory.iter().count() as u32
    }

    pub fn global_count(&self) -> u32 {
        self.imported_global_count() + self.globals.len() as u32
    }

    /// The type index of the function at `index` in the function index space,
    /// or None if the index is out of range.
    pub fn function_type_index(&self, index: u32) -> Option<u32> {
        let mut imported = 0u32;
        for import in &self.imports {
            if let ImportDesc::Func(ti) = import.desc {
                if imported == index {
                    return Some(ti);
                }
                imported += 1;
            }
        }
        self.functions.get((index - imported) as usize).copied()
    }

    /// The signature of the function at `index` in the function index space.
    pub fn function_type(&self, index: u32) -> Option<&FunctionType> {
        self.types.get(self.function_type_index(index)? as usize)
    }

    /// The table type at `index` in the table index space, imports first.
    pub fn table_type(&self, index: u32) -> Option<&TableType> {
        let mut imported = 0u32;
        for import in &self.imports {
            if let ImportDesc::Table(ref tt) = import.desc {
                if imported == index {
                    return Some(tt);
                }
                imported += 1;
            }
        }
        self.tables.get((index - imported) as usize)
    }

    /// The global type at `index` in the global index space, imports first.
    pub fn global_type(&self, index: u32) -> Option<&GlobalType> {
        let mut imported = 0u32;
        for import in &self.imports {
            if let ImportDesc::Global(ref gt) = import.desc {
                if imported == index {
                    return Some(gt);
                }
                imported += 1;
            }
        }
        self.globals
            .get((index - imported) as usize)
            .map(|g| &g.global_type)
    }

    /// The memory type, local or imported.
    pub fn memory_type(&self) -> Option<&MemoryType> {
        for import in &self.imports {
            if let ImportDesc::Memory(ref mt) = import.desc {
                return Some(mt);
            }
        }
        self.memory.as_ref()
    }

    /// A human-readable description of a function for error messages, using
    /// the name section when it has an entry.
    pub fn func_desc(&self, index: u32) -> String {
        match self.names.function_names.get(&index) {
            Some(name) => format!("function[{index}] {name}"),
            None => format!("function[{index}]"),
        }
    }
}
