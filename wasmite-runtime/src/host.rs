//! Host-provided functions.
//!
//! Hosts register functions with an explicit [FunctionType] descriptor and a
//! wrapper closure over typed values; the engine's trampoline does the
//! 64-bit slot packing on either side. A [HostModuleBuilder] assembles a set
//! of host functions into a module that can be instantiated and imported
//! like any other.

use {
    crate::{
        call_ctx::CallCtx,
        error::Result,
        instance::ModuleInstance,
        module::types::FunctionType,
        values::Value,
    },
    std::{collections::BTreeMap, fmt, sync::Arc},
};

/// What a host function returns: up to one Wasm-typed value, or an arbitrary
/// error that the runtime propagates verbatim as
/// [RuntimeError::Host][crate::error::RuntimeError::Host].
pub type HostFuncResult = std::result::Result<Option<Value>, Box<dyn std::error::Error + Send + Sync>>;

/// The per-invocation context handed to a host function: the call context of
/// the calling instance (cancellation, stdio conduits) and the calling
/// module handle (memory read/write primitives).
pub struct HostCall<'a> {
    pub ctx:    &'a CallCtx,
    pub module: &'a Arc<ModuleInstance>,
}

impl<'a> HostCall<'a> {
    /// The calling module's memory, when it has one.
    pub fn memory(&self) -> Option<&Arc<crate::instance::MemoryInstance>> {
        self.module.memory.as_ref()
    }
}

type HostFn = Arc<dyn Fn(&HostCall<'_>, &[Value]) -> HostFuncResult + Send + Sync>;

/// A host function: its signature plus the callable. Parameters arrive in
/// declaration order, already decoded from the engine's value slots (floats
/// bit-reinterpreted from the 64-bit slot).
#[derive(Clone)]
pub struct HostFunc {
    pub ty: FunctionType,
    func:   HostFn,
}

impl HostFunc {
    pub fn new(
        ty: FunctionType,
        func: impl Fn(&HostCall<'_>, &[Value]) -> HostFuncResult + Send + Sync + 'static,
    ) -> HostFunc {
        HostFunc {
            ty,
            func: Arc::new(func),
        }
    }

    pub fn invoke(&self, call: &HostCall<'_>, params: &[Value]) -> HostFuncResult {
        (self.func)(call, params)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish()
    }
}

/// Collects named host functions for instantiation as one module.
///
/// The map is ordered by name so repeated builds of the same module assign
/// stable function indices.
#[derive(Debug, Default)]
pub struct HostModuleBuilder {
    funcs: BTreeMap<String, HostFunc>,
}

impl HostModuleBuilder {
    pub fn new() -> HostModuleBuilder {
        HostModuleBuilder::default()
    }

    /// Register `func` under `name`, replacing any previous entry.
    pub fn with_func(mut self, name: impl Into<String>, func: HostFunc) -> HostModuleBuilder {
        self.funcs.insert(name.into(), func);
        self
    }

    pub(crate) fn into_funcs(self) -> Vec<(String, HostFunc)> {
        self.funcs.into_iter().collect()
    }

    /// Instantiate the collected functions as a module named `name` in
    /// `store`, making them importable.
    pub fn instantiate(
        self,
        store: &Arc<crate::store::Store>,
        name: impl Into<String>,
    ) -> Result<Arc<CallCtx>> {
        store.instantiate_host_module(name.into(), self)
    }
}
