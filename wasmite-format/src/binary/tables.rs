//! Table section.

use {
    super::{error::Result, BinaryParser},
    std::io::Read,
    wasmite_runtime::module::types::TableType,
};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_tables_section(&mut self) -> Result<Vec<TableType>> {
        self.read_vec(|s| s.read_table_type())
    }
}
