//! The WebAssembly binary format decoder.
//!
//! [parse_wasm_data] interprets a byte stream as a binary module and returns
//! the typed [Module] the runtime validates and instantiates. The decode is
//! organized as per-section readers implemented in submodules as `impl`
//! blocks on [BinaryParser], which wraps any [std::io::Read] and tracks the
//! byte offset for error reporting.
//!
//! Constructs from post-1.0 proposals are gated here, at decode time: an
//! opcode or section flavor whose feature bit is clear fails with the
//! feature-gate error rather than decoding into something the validator
//! would have to reject.

pub mod error;
pub mod leb128;

mod code;
mod const_expr;
mod custom;
mod data;
mod elems;
mod exports;
mod funcs;
mod globals;
mod imports;
mod mems;
mod section;
mod start;
mod tables;
mod types;
mod values;

use {
    self::{
        error::{BinaryError, BinaryErrorKind, Result},
        leb128::Leb128Error,
    },
    std::io::Read,
    wasmite_runtime::{features::Features, module::Module},
};

pub use section::SectionId;

pub struct BinaryParser<R: Read> {
    reader:   R,
    features: Features,
    consumed: u64,
}

impl<R: Read> Read for BinaryParser<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R: Read> BinaryParser<R> {
    pub fn new(reader: R, features: Features) -> BinaryParser<R> {
        BinaryParser {
            reader,
            features,
            consumed: 0,
        }
    }

    pub(crate) fn features(&self) -> Features {
        self.features
    }

    /// The number of bytes consumed so far, used for section and body size
    /// accounting and error offsets.
    pub(crate) fn position(&self) -> u64 {
        self.consumed
    }

    pub(crate) fn err(&self, kind: BinaryErrorKind) -> BinaryError {
        BinaryError {
            kind,
            offset: self.consumed,
        }
    }

    pub(crate) fn leb_err(&self, e: Leb128Error) -> BinaryError {
        self.err(match e {
            Leb128Error::Eof => BinaryErrorKind::UnexpectedEnd,
            Leb128Error::Unterminated => BinaryErrorKind::BadLeb128("unterminated"),
            Leb128Error::Overflow => BinaryErrorKind::BadLeb128("overflow"),
        })
    }

    fn parse(&mut self) -> Result<Module> {
        self.read_magic()?;
        self.read_version()?;

        let mut module = Module::default();
        let mut last_order = 0u8;
        while self.read_section(&mut module, &mut last_order)? {}

        if module.functions.len() != module.code.len() {
            return Err(self.err(BinaryErrorKind::FuncSizeMismatch));
        }
        if let Some(count) = module.data_count {
            if count as usize != module.data.len() {
                return Err(self.err(BinaryErrorKind::DataCountMismatch));
            }
        }
        Ok(module)
    }
}

/// Attempt to interpret the data in the provided [std::io::Read] as a
/// WebAssembly binary module, gating post-1.0 constructs on `features`.
pub fn parse_wasm_data(src: &mut impl Read, features: Features) -> Result<Module> {
    let mut parser = BinaryParser::new(src, features);
    parser.parse()
}

/// [parse_wasm_data] over an in-memory byte slice.
pub fn parse_wasm_bytes(bytes: &[u8], features: Features) -> Result<Module> {
    let mut src = bytes;
    parse_wasm_data(&mut src, features)
}
