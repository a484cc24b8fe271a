//! Passive data segment instances.

use {super::ExpectPoisoned, std::sync::RwLock};

/// The runtime copy of a passive data segment's bytes, readable by
/// `memory.init` until dropped.
///
/// `data.drop` shrinks the segment to empty, which is idempotent and makes
/// any later nonempty `memory.init` from it trap out-of-bounds, as the bulk
/// memory semantics require.
#[derive(Debug)]
pub struct DataInstance {
    bytes: RwLock<Box<[u8]>>,
}

impl DataInstance {
    pub fn new(bytes: Box<[u8]>) -> DataInstance {
        DataInstance {
            bytes: RwLock::new(bytes),
        }
    }

    pub fn drop_bytes(&self) {
        *self.bytes.write().expect_poisoned() = Box::new([]);
    }

    /// Run `f` over the current bytes under the segment's lock.
    pub fn with_bytes<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        f(&self.bytes.read().expect_poisoned())
    }
}
