//! The wasmite runtime: store, validator, stack IR, interpreter, and host
//! integration for WebAssembly Core 1.0 modules, with opt-in post-1.0
//! proposals.
//!
//! The binary decoder lives in the companion `wasmite-format` crate; this
//! crate consumes its output. A typical embedding:
//!
//! ```ignore
//! let store = Store::new(RuntimeConfig::interpreter().wasm_core_2());
//! let module = wasmite_format::binary::parse_wasm_data(&mut bytes, store.features)?;
//! let compiled = store.compile(module)?;
//! let ctx = store.instantiate(&compiled, &ModuleConfig::new().with_name("calc"))?;
//! let results = ctx.call("add", &[Value::I32(2), Value::I32(3)])?;
//! ```

pub mod call_ctx;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod host;
pub mod instance;
mod instantiate;
pub mod ir;
pub mod module;
pub mod store;
pub mod sys;
pub mod validation;
pub mod values;

pub use {
    call_ctx::{CallCtx, CancelToken},
    config::{ModuleConfig, RuntimeConfig},
    error::{Result, RuntimeError, TrapKind},
    features::Features,
    store::{CompiledModule, Store},
    values::Value,
};
