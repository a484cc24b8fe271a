//! The WebAssembly binary format front end for the wasmite runtime.
//!
//! [binary] decodes a binary module into the runtime's typed
//! [Module][wasmite_runtime::module::Module]; [loader] bridges decoding to
//! compilation and instantiation for embedders that start from bytes.

pub mod binary;
pub mod loader;
