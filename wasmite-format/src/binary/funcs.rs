//! Function section: the type index of each locally defined function, in
//! body order.

use {super::error::Result, super::BinaryParser, std::io::Read};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_funcs_section(&mut self) -> Result<Vec<u32>> {
        self.read_vec(|s| s.read_u32())
    }
}
