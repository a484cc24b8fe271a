//! Global instances.

use {
    crate::{module::types::GlobalType, values::Value},
    std::sync::atomic::{AtomicU64, Ordering},
};

/// A global instance: its type and a 64-bit value slot. The slot is atomic so
/// concurrent calls may race on a mutable global without tearing; WebAssembly
/// itself imposes no ordering between such calls, and neither does the
/// runtime.
#[derive(Debug)]
pub struct GlobalInstance {
    pub global_type: GlobalType,
    val:             AtomicU64,
}

impl GlobalInstance {
    pub fn new(global_type: GlobalType, value: Value) -> GlobalInstance {
        GlobalInstance {
            global_type,
            val: AtomicU64::new(value.to_raw()),
        }
    }

    pub fn raw(&self) -> u64 {
        self.val.load(Ordering::Relaxed)
    }

    pub fn set_raw(&self, raw: u64) {
        self.val.store(raw, Ordering::Relaxed);
    }

    pub fn value(&self) -> Value {
        Value::from_raw(self.raw(), self.global_type.value_type)
    }

    pub fn set_value(&self, value: Value) {
        self.set_raw(value.to_raw());
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::module::types::{GlobalType, I32},
    };

    #[test]
    fn value_round_trips_through_the_slot() {
        let g = GlobalInstance::new(
            GlobalType {
                value_type: I32,
                mutable:    true,
            },
            Value::I32(-5),
        );
        assert_eq!(g.value(), Value::I32(-5));
        g.set_value(Value::I32(41));
        assert_eq!(g.value(), Value::I32(41));
    }
}
