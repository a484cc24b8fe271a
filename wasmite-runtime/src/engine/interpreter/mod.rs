//! The tree-walk interpreter back-end.
//!
//! `compile_module` lowers every local function body to the stack IR and
//! resolves branch labels to operation positions, skipping labels nothing
//! branches to. The per-instance [ModuleEngine] then executes the resolved
//! code with a per-call value stack of 64-bit slots.

use {
    super::{Engine, ModuleEngine, TableInit},
    crate::{
        call_ctx::CallCtx,
        engine::call_host,
        error::{InstantiationError, Result, RuntimeError, TrapKind},
        impl_bug,
        instance::{ElementInstance, ExpectPoisoned, FuncKind, FunctionInstance, ModuleInstance},
        ir::{self, Label, Operation},
        module::{Module, ModuleId},
        values::Value,
    },
    std::{
        collections::HashMap,
        sync::{Arc, RwLock, Weak},
    },
    tracing::debug,
};

mod exec;

/// The recursion bound enforced at every function entry, spanning module
/// boundaries.
pub const CALL_STACK_LIMIT: usize = 2048;

/// One function's executable form: its operations plus the resolved label
/// positions.
#[derive(Debug)]
pub(crate) struct InterpFunc {
    ops:    Vec<Operation>,
    labels: HashMap<Label, usize>,
    /// Number of zero-initialized locals pushed after the parameters.
    locals: usize,
}

#[derive(Debug)]
struct CompiledCode {
    funcs: Vec<Arc<InterpFunc>>,
}

/// The interpreter engine: a compiled-code cache keyed by [ModuleId].
#[derive(Default)]
pub struct InterpreterEngine {
    cache: RwLock<HashMap<ModuleId, Arc<CompiledCode>>>,
}

impl InterpreterEngine {
    pub fn new() -> InterpreterEngine {
        InterpreterEngine::default()
    }

    fn compile(&self, module: &Module) -> Result<Arc<CompiledCode>> {
        if let Some(code) = self.cache.read().expect_poisoned().get(&module.id) {
            return Ok(code.clone());
        }
        let imported = module.imported_function_count();
        let mut funcs = Vec::with_capacity(module.code.len());
        for (i, body) in module.code.iter().enumerate() {
            let index = imported + i as u32;
            let compiled = ir::compile_function(module, index, body)?;
            funcs.push(Arc::new(resolve(compiled, body.locals.len())));
        }
        let code = Arc::new(CompiledCode { funcs });
        self.cache
            .write()
            .expect_poisoned()
            .insert(module.id, code.clone());
        debug!(target: "wasmite::engine", id = ?module.id, "compiled module for the interpreter");
        Ok(code)
    }
}

/// Resolve label positions for one function. Only labels with at least one
/// caller get an entry; the rest are left unresolved and their `Label`
/// operations are plain no-ops at execution time.
fn resolve(compiled: ir::CompiledFunc, locals: usize) -> InterpFunc {
    let mut labels = HashMap::new();
    for (pc, op) in compiled.operations.iter().enumerate() {
        if let Operation::Label(label) = op {
            if compiled.label_callers.get(label).copied().unwrap_or(0) > 0 {
                labels.insert(*label, pc);
            }
        }
    }
    InterpFunc {
        ops: compiled.operations,
        labels,
        locals,
    }
}

impl Engine for InterpreterEngine {
    fn compile_module(&self, module: &Module) -> Result<()> {
        self.compile(module).map(|_| ())
    }

    fn delete_compiled_module(&self, module_id: ModuleId) {
        self.cache.write().expect_poisoned().remove(&module_id);
    }

    fn new_module_engine(
        &self,
        name: &str,
        module: &Module,
        instance: &Arc<ModuleInstance>,
        table_init: &[TableInit],
        precheck_table_init: bool,
    ) -> Result<Arc<dyn ModuleEngine>> {
        // Recompiles if the cache entry was deleted in the meantime;
        // compilation is idempotent.
        let code = self.compile(module)?;

        if precheck_table_init {
            for init in table_init {
                let end = init.offset as u64 + init.refs.len() as u64;
                if end > init.table.size() as u64 {
                    return Err(InstantiationError::ElementSegmentOutOfBounds.into());
                }
            }
        }
        for init in table_init {
            init.table
                .init(init.offset, &init.refs, 0, init.refs.len() as u32)
                .map_err(|_| InstantiationError::ElementSegmentOutOfBounds)?;
        }

        Ok(Arc::new(InterpModuleEngine {
            name: name.to_string(),
            code,
            instance: Arc::downgrade(instance),
            imported_funcs: module.imported_function_count(),
        }))
    }

    fn create_func_element_instance(&self, refs: Box<[u64]>) -> Arc<ElementInstance> {
        Arc::new(ElementInstance::new(refs))
    }
}

/// The per-instance interpreter: resolved code plus the instance binding.
struct InterpModuleEngine {
    name:           String,
    code:           Arc<CompiledCode>,
    instance:       Weak<ModuleInstance>,
    imported_funcs: u32,
}

impl InterpModuleEngine {
    fn local_func(&self, index: u32) -> Result<&Arc<InterpFunc>> {
        self.code
            .funcs
            .get((index - self.imported_funcs) as usize)
            .ok_or_else(|| impl_bug!("no compiled function at index {}", index))
    }
}

impl ModuleEngine for InterpModuleEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn call_with_depth(
        &self,
        ctx: &CallCtx,
        f: &Arc<FunctionInstance>,
        args: &[Value],
        depth: usize,
    ) -> Result<Vec<Value>> {
        if depth >= CALL_STACK_LIMIT {
            return Err(TrapKind::CallStackExhausted.into());
        }
        match &f.kind {
            FuncKind::Host(host) => {
                let me = self
                    .instance
                    .upgrade()
                    .ok_or_else(|| RuntimeError::ModuleClosed(self.name.clone()))?;
                call_host(ctx, &me, host, args)
            }
            FuncKind::Wasm { module, index } => {
                let owner = module
                    .upgrade()
                    .ok_or_else(|| RuntimeError::ModuleClosed(f.debug_name.clone()))?;
                let me = self
                    .instance
                    .upgrade()
                    .ok_or_else(|| RuntimeError::ModuleClosed(self.name.clone()))?;
                if !Arc::ptr_eq(&owner, &me) {
                    // An imported function: its own module's engine executes
                    // it, at the same depth so the recursion bound is global.
                    return owner.engine()?.call_with_depth(ctx, f, args, depth);
                }
                let ifunc = self.local_func(*index)?.clone();
                let raw_args: Vec<u64> = args.iter().map(|v| v.to_raw()).collect();
                let raw = exec::exec_function(ctx, self, &owner, &ifunc, raw_args, depth)?;
                Ok(raw
                    .iter()
                    .zip(f.ty.results.iter())
                    .map(|(r, t)| Value::from_raw(*r, *t))
                    .collect())
            }
        }
    }
}
