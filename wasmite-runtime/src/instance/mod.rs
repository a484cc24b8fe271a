//! Runtime instances: the mutable state a module binds to at instantiation.

pub mod data_instance;
pub mod elem_instance;
pub mod export_instance;
pub mod function_instance;
pub mod global_instance;
pub mod mem_instance;
pub mod module_instance;
pub mod table_instance;

pub use {
    data_instance::DataInstance,
    elem_instance::ElementInstance,
    export_instance::ExportInstance,
    function_instance::{FuncKind, FunctionInstance},
    global_instance::GlobalInstance,
    mem_instance::{MemoryInstance, MEMORY_LIMIT_PAGES, PAGE_SIZE},
    module_instance::ModuleInstance,
    table_instance::TableInstance,
};

/// Lock poisoning means another call panicked mid-operation. The guarded
/// state is still structurally valid (bytes, slots), so recover the guard;
/// WebAssembly gives no cross-call consistency promises to preserve.
pub(crate) trait ExpectPoisoned<T> {
    fn expect_poisoned(self) -> T;
}

impl<'a, T: ?Sized> ExpectPoisoned<std::sync::RwLockReadGuard<'a, T>>
    for std::sync::LockResult<std::sync::RwLockReadGuard<'a, T>>
{
    fn expect_poisoned(self) -> std::sync::RwLockReadGuard<'a, T> {
        self.unwrap_or_else(|e| e.into_inner())
    }
}

impl<'a, T: ?Sized> ExpectPoisoned<std::sync::RwLockWriteGuard<'a, T>>
    for std::sync::LockResult<std::sync::RwLockWriteGuard<'a, T>>
{
    fn expect_poisoned(self) -> std::sync::RwLockWriteGuard<'a, T> {
        self.unwrap_or_else(|e| e.into_inner())
    }
}

impl<'a, T: ?Sized> ExpectPoisoned<std::sync::MutexGuard<'a, T>>
    for std::sync::LockResult<std::sync::MutexGuard<'a, T>>
{
    fn expect_poisoned(self) -> std::sync::MutexGuard<'a, T> {
        self.unwrap_or_else(|e| e.into_inner())
    }
}
