//! Module instances.

use {
    super::{
        DataInstance, ElementInstance, ExportInstance, FunctionInstance, GlobalInstance,
        MemoryInstance, TableInstance,
    },
    crate::{
        engine::ModuleEngine,
        error::{Result, RuntimeError},
        impl_bug,
        module::{types::ExternKind, ModuleId},
        store::{FunctionTypeId, Store},
    },
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, OnceLock, Weak,
        },
    },
};

/// A module bound to concrete imports and mutable state.
///
/// Created atomically by the instantiator: either every step succeeds and
/// the instance is published in the store, or the name reservation is rolled
/// back and nothing of the instance survives.
///
/// [Spec]: https://webassembly.github.io/spec/core/exec/runtime.html#module-instances
pub struct ModuleInstance {
    pub name:      String,
    pub module_id: ModuleId,
    /// The module's type section, index-correlated with `type_ids`.
    pub types:     Vec<crate::module::types::FunctionType>,
    /// Interned ids for `types`, resolved against the store.
    pub type_ids:  Vec<FunctionTypeId>,
    pub functions: Vec<Arc<FunctionInstance>>,
    pub tables:    Vec<Arc<TableInstance>>,
    pub memory:    Option<Arc<MemoryInstance>>,
    pub globals:   Vec<Arc<GlobalInstance>>,
    pub exports:   HashMap<String, ExportInstance>,
    pub data:      Vec<Arc<DataInstance>>,
    pub store:     Weak<Store>,

    // Set by the instantiator after assembly: the engine at step 8, passive
    // element instances at step 9.
    engine:   OnceLock<Arc<dyn ModuleEngine>>,
    elements: OnceLock<Vec<Arc<ElementInstance>>>,
    /// Raised when the owning call context closes. Importers that still
    /// share this instance's functions observe errors, never dangling state.
    closed:   AtomicBool,
}

impl ModuleInstance {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        module_id: ModuleId,
        types: Vec<crate::module::types::FunctionType>,
        type_ids: Vec<FunctionTypeId>,
        functions: Vec<Arc<FunctionInstance>>,
        tables: Vec<Arc<TableInstance>>,
        memory: Option<Arc<MemoryInstance>>,
        globals: Vec<Arc<GlobalInstance>>,
        exports: HashMap<String, ExportInstance>,
        data: Vec<Arc<DataInstance>>,
        store: Weak<Store>,
    ) -> ModuleInstance {
        ModuleInstance {
            name,
            module_id,
            types,
            type_ids,
            functions,
            tables,
            memory,
            globals,
            exports,
            data,
            store,
            engine: OnceLock::new(),
            elements: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_engine(&self, engine: Arc<dyn ModuleEngine>) {
        let _ = self.engine.set(engine);
    }

    pub(crate) fn set_element_instances(&self, elements: Vec<Arc<ElementInstance>>) {
        let _ = self.elements.set(elements);
    }

    pub fn engine(&self) -> Result<&Arc<dyn ModuleEngine>> {
        if self.is_closed() {
            return Err(RuntimeError::ModuleClosed(self.name.clone()));
        }
        self.engine
            .get()
            .ok_or_else(|| impl_bug!("module {} has no engine", self.name))
    }

    pub fn func(&self, index: u32) -> Result<Arc<FunctionInstance>> {
        self.functions
            .get(index as usize)
            .cloned()
            .ok_or_else(|| impl_bug!("no function at index {}", index))
    }

    pub fn table(&self, index: u32) -> Result<Arc<TableInstance>> {
        self.tables
            .get(index as usize)
            .cloned()
            .ok_or_else(|| impl_bug!("no table at index {}", index))
    }

    pub fn global(&self, index: u32) -> Result<Arc<GlobalInstance>> {
        self.globals
            .get(index as usize)
            .cloned()
            .ok_or_else(|| impl_bug!("no global at index {}", index))
    }

    pub fn memory(&self) -> Result<&Arc<MemoryInstance>> {
        self.memory
            .as_ref()
            .ok_or_else(|| impl_bug!("module {} has no memory", self.name))
    }

    pub fn data_instance(&self, index: u32) -> Result<&Arc<DataInstance>> {
        self.data
            .get(index as usize)
            .ok_or_else(|| impl_bug!("no data segment at index {}", index))
    }

    pub fn element_instance(&self, index: u32) -> Result<Arc<ElementInstance>> {
        self.elements
            .get()
            .and_then(|e| e.get(index as usize))
            .cloned()
            .ok_or_else(|| impl_bug!("no element segment at index {}", index))
    }

    /// Look up an export by name, or err with the name-not-found shape the
    /// import resolver reports.
    pub fn resolve(&self, name: &str) -> Option<ExportInstance> {
        self.exports.get(name).copied()
    }

    /// Look up an export of a specific kind.
    pub fn get_export(&self, name: &str, kind: ExternKind) -> Result<ExportInstance> {
        let export = self
            .resolve(name)
            .ok_or_else(|| RuntimeError::ExportNotFound {
                module: self.name.clone(),
                name:   name.to_string(),
            })?;
        if export.kind != kind {
            return Err(RuntimeError::ExportKindMismatch {
                module:   self.name.clone(),
                name:     name.to_string(),
                expected: kind.name(),
                actual:   export.kind.name(),
            });
        }
        Ok(export)
    }

    /// The exported function named `name`.
    pub fn exported_func(&self, name: &str) -> Result<Arc<FunctionInstance>> {
        let export = self.get_export(name, ExternKind::Func)?;
        self.func(export.index)
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("functions", &self.functions.len())
            .field("tables", &self.tables.len())
            .field("memory", &self.memory.is_some())
            .field("globals", &self.globals.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}
