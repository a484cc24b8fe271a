//! The pluggable compile-and-call back-end contract.
//!
//! A back-end compiles validated modules and executes their functions. The
//! in-tree implementation is the [interpreter]; an alternate back-end (for
//! example a code generator) plugs into the same seams without touching the
//! store or the instantiator.

use {
    crate::{
        call_ctx::CallCtx,
        error::{Result, RuntimeError},
        host::{HostCall, HostFunc},
        instance::{ElementInstance, FunctionInstance, ModuleInstance, TableInstance},
        module::{Module, ModuleId},
        values::Value,
    },
    std::sync::Arc,
};

pub mod interpreter;

/// A staged active element-segment write, resolved to encoded references and
/// applied by the back-end when the module engine is created.
#[derive(Debug)]
pub struct TableInit {
    pub table:  Arc<TableInstance>,
    pub offset: u32,
    pub refs:   Vec<u64>,
}

/// A compile-and-call back-end. Compiled modules live in an engine-side
/// cache keyed by [ModuleId]; `compile_module` is idempotent and
/// `delete_compiled_module` removes the entry.
pub trait Engine: Send + Sync {
    fn compile_module(&self, module: &Module) -> Result<()>;

    fn delete_compiled_module(&self, module_id: ModuleId);

    /// Create the per-instance engine for `instance` and apply the staged
    /// table initialization. With `precheck_table_init` (1.0 semantics) all
    /// segment bounds are verified before any write; otherwise segments
    /// apply in order and trap at the first out-of-bounds one.
    fn new_module_engine(
        &self,
        name: &str,
        module: &Module,
        instance: &Arc<ModuleInstance>,
        table_init: &[TableInit],
        precheck_table_init: bool,
    ) -> Result<Arc<dyn ModuleEngine>>;

    /// Build a passive element instance from resolved references.
    fn create_func_element_instance(&self, refs: Box<[u64]>) -> Arc<ElementInstance>;
}

/// The per-instance execution interface.
pub trait ModuleEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke `f` with `args`, which the caller has already checked against
    /// the function's signature.
    fn call(
        &self,
        ctx: &CallCtx,
        f: &Arc<FunctionInstance>,
        args: &[Value],
    ) -> Result<Vec<Value>> {
        self.call_with_depth(ctx, f, args, 0)
    }

    /// Like [ModuleEngine::call] but at a given call depth, used for
    /// cross-module calls so the stack-exhaustion limit spans module
    /// boundaries.
    fn call_with_depth(
        &self,
        ctx: &CallCtx,
        f: &Arc<FunctionInstance>,
        args: &[Value],
        depth: usize,
    ) -> Result<Vec<Value>>;
}

/// Invoke a host function with typed values: the host boundary counterpart
/// of the interpreter's slot-level trampoline.
pub fn call_host(
    ctx: &CallCtx,
    caller: &Arc<ModuleInstance>,
    host: &HostFunc,
    args: &[Value],
) -> Result<Vec<Value>> {
    let call = HostCall {
        ctx,
        module: caller,
    };
    let result = host.invoke(&call, args).map_err(RuntimeError::Host)?;
    Ok(result.into_iter().collect())
}
