//! Shared helpers for the end-to-end tests: building stores and turning
//! WebAssembly text into instantiated modules.

use {
    std::sync::Arc,
    wasmite_format::loader::Loader,
    wasmite_runtime::{
        call_ctx::CallCtx, store::CompiledModule, ModuleConfig, RuntimeConfig, Store,
    },
};

pub type Result<T> = anyhow::Result<T>;

/// A store with WebAssembly Core 1.0 features.
pub fn core1_store() -> Arc<Store> {
    Store::new(RuntimeConfig::interpreter())
}

/// A store with every supported proposal enabled.
pub fn core2_store() -> Arc<Store> {
    Store::new(RuntimeConfig::interpreter().wasm_core_2())
}

/// Compile WebAssembly text through the whole front end: encode, decode,
/// validate, lower.
pub fn compile_wat(store: &Arc<Store>, source: &str) -> Result<CompiledModule> {
    let bytes = wat::parse_str(source)?;
    Ok(store.compile_wasm_data(&mut bytes.as_slice())?)
}

/// Compile and instantiate WebAssembly text under `name`.
pub fn instantiate_wat(store: &Arc<Store>, name: &str, source: &str) -> Result<Arc<CallCtx>> {
    let compiled = compile_wat(store, source)?;
    Ok(store.instantiate(&compiled, &ModuleConfig::new().with_name(name))?)
}
