//! Start section: the index of the function run at the end of
//! instantiation.

use {super::error::Result, super::BinaryParser, std::io::Read};

impl<R: Read> BinaryParser<R> {
    pub(crate) fn read_start_section(&mut self) -> Result<u32> {
        self.read_u32()
    }
}
