//! Passive element segment instances.

use {super::ExpectPoisoned, std::sync::RwLock};

/// The runtime copy of a passive element segment: a vector of encoded
/// references, readable by `table.init` until dropped. `elem.drop` empties
/// the vector and is idempotent.
#[derive(Debug, Default)]
pub struct ElementInstance {
    refs: RwLock<Box<[u64]>>,
}

impl ElementInstance {
    pub fn new(refs: Box<[u64]>) -> ElementInstance {
        ElementInstance {
            refs: RwLock::new(refs),
        }
    }

    pub fn drop_elems(&self) {
        *self.refs.write().expect_poisoned() = Box::new([]);
    }

    pub fn with_refs<T>(&self, f: impl FnOnce(&[u64]) -> T) -> T {
        f(&self.refs.read().expect_poisoned())
    }
}
