//! The bridge between the format decoding code and the runtime, for
//! embedders that start from a byte stream and want a running instance.

use {
    crate::binary::{error::BinaryError, parse_wasm_data},
    std::{io::Read, sync::Arc},
    thiserror::Error,
    wasmite_runtime::{
        call_ctx::CallCtx,
        error::RuntimeError,
        store::{CompiledModule, Store},
        ModuleConfig,
    },
};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] BinaryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Decode-and-compile and decode-and-instantiate conveniences on [Store].
pub trait Loader {
    /// Decode a binary module from `read` and compile it.
    fn compile_wasm_data(&self, read: &mut impl Read) -> Result<CompiledModule>;

    /// Decode, compile, and instantiate in one step.
    fn load_wasm_data(
        &self,
        read: &mut impl Read,
        config: &ModuleConfig,
    ) -> Result<Arc<CallCtx>>;

    /// [Loader::load_wasm_data] over an in-memory byte slice.
    fn load_wasm_bytes(&self, bytes: &[u8], config: &ModuleConfig) -> Result<Arc<CallCtx>> {
        self.load_wasm_data(&mut &bytes[..], config)
    }
}

impl Loader for Arc<Store> {
    fn compile_wasm_data(&self, read: &mut impl Read) -> Result<CompiledModule> {
        let module = parse_wasm_data(read, self.features)?;
        Ok(self.compile(module)?)
    }

    fn load_wasm_data(
        &self,
        read: &mut impl Read,
        config: &ModuleConfig,
    ) -> Result<Arc<CallCtx>> {
        let compiled = self.compile_wasm_data(read)?;
        Ok(self.instantiate(&compiled, config)?)
    }
}
