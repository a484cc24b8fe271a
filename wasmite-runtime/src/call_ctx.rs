//! The per-instance handle host code uses to invoke exports.

use {
    crate::{
        engine,
        error::{Result, RuntimeError},
        instance::{FuncKind, FunctionInstance, MemoryInstance, ModuleInstance},
        store::Store,
        sys::SysContext,
        values::Value,
    },
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    tracing::debug,
};

/// A cancellation signal shared between the host and in-flight calls. The
/// interpreter polls it at function entry and backward branches; a fired
/// token unwinds the call with [RuntimeError::Cancelled]. Side effects
/// already performed are not rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The handle bound to one [ModuleInstance]: export calls, memory access,
/// the system context, and cancellation. Closing it removes the instance
/// from the store and releases the engine's compiled code.
pub struct CallCtx {
    store:    Weak<Store>,
    instance: Arc<ModuleInstance>,
    sys:      SysContext,
    cancel:   CancelToken,
    closed:   AtomicBool,
}

impl CallCtx {
    pub(crate) fn new(store: Weak<Store>, instance: Arc<ModuleInstance>, sys: SysContext) -> Arc<CallCtx> {
        Arc::new(CallCtx {
            store,
            instance,
            sys,
            cancel: CancelToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn instance(&self) -> &Arc<ModuleInstance> {
        &self.instance
    }

    pub fn sys(&self) -> &SysContext {
        &self.sys
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> Result<Arc<Store>> {
        self.store
            .upgrade()
            .ok_or_else(|| RuntimeError::ModuleClosed("store dropped".to_string()))
    }

    /// The instance's memory, when it has one.
    pub fn memory(&self) -> Option<&Arc<MemoryInstance>> {
        self.instance.memory.as_ref()
    }

    /// Invoke the exported function named `name`.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let f = self.instance.exported_func(name)?;
        self.call_func(&f, args)
    }

    /// Invoke a function instance after checking `args` against its
    /// signature.
    pub fn call_func(&self, f: &Arc<FunctionInstance>, args: &[Value]) -> Result<Vec<Value>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::ModuleClosed(self.instance.name.clone()));
        }
        if args.len() != f.ty.params.len() {
            return Err(RuntimeError::ArgumentCount {
                expected: f.ty.params.len(),
                got:      args.len(),
            });
        }
        for (i, (arg, expected)) in args.iter().zip(f.ty.params.iter()).enumerate() {
            if arg.value_type() != *expected {
                return Err(RuntimeError::ArgumentType {
                    index:    i,
                    expected: expected.to_string(),
                    got:      arg.value_type().to_string(),
                });
            }
        }
        match &f.kind {
            FuncKind::Host(host) => engine::call_host(self, &self.instance, host, args),
            FuncKind::Wasm { module, .. } => {
                let owner = module
                    .upgrade()
                    .ok_or_else(|| RuntimeError::ModuleClosed(f.debug_name.clone()))?;
                owner.engine()?.call(self, f, args)
            }
        }
    }

    /// Close the instance: deregister it from the store and drop its
    /// compiled code. Idempotent. In-flight imports of this instance
    /// observe errors on their next use, never dangling state.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "wasmite::store", name = %self.instance.name, "closing module");
        self.instance.mark_closed();
        if let Some(store) = self.store.upgrade() {
            store.remove_module(&self.instance.name);
            store.engine.delete_compiled_module(self.instance.module_id);
        }
    }
}

impl std::fmt::Debug for CallCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCtx")
            .field("module", &self.instance.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
