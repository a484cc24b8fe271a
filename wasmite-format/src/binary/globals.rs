//! Global section: a global type plus its constant initializer.

use {
    super::{error::Result, BinaryParser},
    std::io::Read,
    wasmite_runtime::module::Global,
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_globals_section(&mut self) -> Result<Vec<Global>> {
        self.read_vec(|s| {
            let global_type = s.read_global_type()?;
            let init = s.read_const_expr()?;
            Ok(Global { global_type, init })
        })
    }
}
