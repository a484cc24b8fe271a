//! The store: the registry of instantiated modules and the function-type
//! interner shared by everything in one runtime.
//!
//! One readers-writer lock guards the reserved names, the module map, and
//! the intern map: readers (import resolution, lookup) take shared access,
//! mutators (name reservation, intern creation, deletion) take exclusive
//! access. A second registry assigns store-wide addresses to function
//! instances so funcref values fit the 64-bit slot.
//!
//! [Spec]: https://www.w3.org/TR/2019/REC-wasm-core-1-20191205/#store%E2%91%A0

use {
    crate::{
        call_ctx::CallCtx,
        config::{MemoryCapacityFn, RuntimeConfig},
        engine::Engine,
        error::{LinkError, Result, RuntimeError},
        features::Features,
        instance::{ExpectPoisoned, FunctionInstance, ModuleInstance},
        module::{types::FunctionType, Module},
        validation,
    },
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, RwLock, Weak},
    },
    tracing::debug,
};

/// A dense integer assigned to each distinct function signature; equal iff
/// the signatures are structurally equal. Used for the `call_indirect` type
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionTypeId(pub u32);

/// A store-wide function address; funcref slots encode `addr + 1`.
pub type FuncAddr = u32;

/// The cap on distinct interned signatures.
pub const MAX_FUNCTION_TYPES: u32 = 1 << 27;

#[derive(Default)]
struct StoreInner {
    /// Names reserved by in-flight or completed instantiations.
    module_names: HashSet<String>,
    /// Instantiated modules by name.
    modules:      HashMap<String, Arc<CallCtx>>,
    /// Canonical signature text to interned id.
    type_ids:     HashMap<String, FunctionTypeId>,
}

pub struct Store {
    pub features:          Features,
    pub(crate) engine:     Arc<dyn Engine>,
    pub(crate) limit_pages: u32,
    pub(crate) memory_capacity: MemoryCapacityFn,
    inner: RwLock<StoreInner>,
    funcs: RwLock<Vec<Weak<FunctionInstance>>>,
}

/// A decoded, validated module bound to the engine that compiled it, ready
/// to instantiate any number of times.
pub struct CompiledModule {
    module: Arc<Module>,
    engine: Arc<dyn Engine>,
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl CompiledModule {
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Release the engine's compiled code for this module. Safe to call
    /// while instances created from it are still running: they keep their
    /// module engines until closed themselves.
    pub fn close(&self) {
        self.engine.delete_compiled_module(self.module.id);
    }
}

impl Store {
    pub fn new(config: RuntimeConfig) -> Arc<Store> {
        Arc::new(Store {
            features:        config.features,
            engine:          config.build_engine(),
            limit_pages:     config.memory_limit_pages,
            memory_capacity: config.memory_capacity_pages,
            inner:           RwLock::new(StoreInner::default()),
            funcs:           RwLock::new(Vec::new()),
        })
    }

    /// Validate `module` against this store's features, check the
    /// configured memory sizing, and hand the module to the engine.
    pub fn compile(self: &Arc<Store>, module: Module) -> Result<CompiledModule> {
        validation::validate_module(&module, self.features)?;
        if let Some(mt) = module.memory_type() {
            self.memory_capacity_for(mt)?;
        }
        self.engine.compile_module(&module)?;
        debug!(target: "wasmite::store", id = ?module.id, "compiled module");
        Ok(CompiledModule {
            module: Arc::new(module),
            engine: self.engine.clone(),
        })
    }

    /// The capacity, in pages, to reserve for a memory of type `mt`:
    /// the configured sizing function clamped into `[min, limit]`, with a
    /// result below `min` rejected as a hard error.
    pub(crate) fn memory_capacity_for(
        &self,
        mt: &crate::module::types::MemoryType,
    ) -> Result<u32> {
        use crate::error::InstantiationError;
        let min = mt.limits.min;
        if min > self.limit_pages {
            return Err(InstantiationError::MemoryTooLarge {
                min,
                limit: self.limit_pages,
            }
            .into());
        }
        let capacity = (self.memory_capacity)(min, mt.limits.max);
        if capacity < min {
            return Err(InstantiationError::MemoryCapacityTooSmall { capacity, min }.into());
        }
        Ok(capacity.min(self.limit_pages))
    }

    /// The call context of the named module, when instantiated.
    pub fn module(&self, name: &str) -> Option<Arc<CallCtx>> {
        self.inner
            .read()
            .expect_poisoned()
            .modules
            .get(name)
            .cloned()
    }

    pub(crate) fn module_instance(&self, name: &str) -> Option<Arc<ModuleInstance>> {
        self.module(name).map(|ctx| ctx.instance().clone())
    }

    /// Reserve `name` ahead of instantiation; reverted by
    /// [Store::release_name] if any later step fails.
    pub(crate) fn reserve_name(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().expect_poisoned();
        if !inner.module_names.insert(name.to_string()) {
            return Err(LinkError::DuplicateModuleName(name.to_string()).into());
        }
        Ok(())
    }

    /// Make `name` available for instantiation again.
    pub(crate) fn release_name(&self, name: &str) {
        let mut inner = self.inner.write().expect_poisoned();
        inner.module_names.remove(name);
        inner.modules.remove(name);
    }

    /// Publish a fully built instance, making it visible for import.
    pub(crate) fn publish(&self, ctx: Arc<CallCtx>) {
        let mut inner = self.inner.write().expect_poisoned();
        inner.modules.insert(ctx.instance().name.clone(), ctx);
    }

    /// Intern every signature in `types`, assigning ids sequentially from
    /// zero, failing once the store holds [MAX_FUNCTION_TYPES] distinct
    /// signatures.
    pub(crate) fn intern_types(&self, types: &[FunctionType]) -> Result<Vec<FunctionTypeId>> {
        let mut inner = self.inner.write().expect_poisoned();
        types.iter().map(|t| Self::intern(&mut inner, t)).collect()
    }

    fn intern(inner: &mut StoreInner, ty: &FunctionType) -> Result<FunctionTypeId> {
        let key = ty.canonical_key();
        if let Some(id) = inner.type_ids.get(&key) {
            return Ok(*id);
        }
        let next = inner.type_ids.len() as u32;
        if next >= MAX_FUNCTION_TYPES {
            return Err(LinkError::TooManyFunctionTypes.into());
        }
        let id = FunctionTypeId(next);
        inner.type_ids.insert(key, id);
        Ok(id)
    }

    /// Reserve a contiguous block of function addresses, filled in by
    /// [Store::register_func] once the instances exist.
    pub(crate) fn reserve_func_addrs(&self, count: usize) -> FuncAddr {
        let mut funcs = self.funcs.write().expect_poisoned();
        let base = funcs.len() as u32;
        let new_len = funcs.len() + count;
        funcs.resize(new_len, Weak::new());
        base
    }

    pub(crate) fn register_func(&self, addr: FuncAddr, func: &Arc<FunctionInstance>) {
        let mut funcs = self.funcs.write().expect_poisoned();
        if let Some(slot) = funcs.get_mut(addr as usize) {
            *slot = Arc::downgrade(func);
        }
    }

    /// Resolve a funcref address back to its function. A dead entry means
    /// the owning module was closed; callers observe an error, never
    /// dangling state.
    pub fn func_by_addr(&self, addr: FuncAddr) -> Result<Arc<FunctionInstance>> {
        let funcs = self.funcs.read().expect_poisoned();
        funcs
            .get(addr as usize)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RuntimeError::ModuleClosed(format!("function address {addr}")))
    }

    /// Remove a closed module's registration. Its name becomes reusable.
    pub(crate) fn remove_module(&self, name: &str) {
        self.release_name(name);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect_poisoned();
        f.debug_struct("Store")
            .field("modules", &inner.modules.len())
            .field("types", &inner.type_ids.len())
            .finish()
    }
}
