//! Runtime values and their 64-bit slot representation.
//!
//! The engine carries every value in a `u64` slot: integers zero-extended,
//! floats by their IEEE-754 bit pattern, references by store address. Signed
//! versus unsigned is an interpretation of the bit pattern, never a separate
//! type.

use crate::module::types::{NumType, RefType, ValueType};

/// A typed value crossing the host boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A function reference: the store address of a function instance, or
    /// null.
    FuncRef(Option<u32>),
    /// An opaque host reference, or null.
    ExternRef(Option<u64>),
}

/// The reserved slot pattern for a null reference. Non-null function
/// references are stored as `addr + 1`.
pub const NULL_REF: u64 = 0;

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::Num(NumType::I32),
            Value::I64(_) => ValueType::Num(NumType::I64),
            Value::F32(_) => ValueType::Num(NumType::F32),
            Value::F64(_) => ValueType::Num(NumType::F64),
            Value::FuncRef(_) => ValueType::Ref(RefType::Func),
            Value::ExternRef(_) => ValueType::Ref(RefType::Extern),
        }
    }

    /// Encode into the engine's 64-bit slot representation.
    pub fn to_raw(self) -> u64 {
        match self {
            Value::I32(v) => v as u32 as u64,
            Value::I64(v) => v as u64,
            Value::F32(v) => v.to_bits() as u64,
            Value::F64(v) => v.to_bits(),
            Value::FuncRef(r) => encode_ref(r.map(|addr| addr as u64)),
            Value::ExternRef(r) => encode_ref(r),
        }
    }

    /// Decode a 64-bit slot as the given type.
    pub fn from_raw(raw: u64, value_type: ValueType) -> Value {
        match value_type {
            ValueType::Num(NumType::I32) => Value::I32(raw as u32 as i32),
            ValueType::Num(NumType::I64) => Value::I64(raw as i64),
            ValueType::Num(NumType::F32) => Value::F32(f32::from_bits(raw as u32)),
            ValueType::Num(NumType::F64) => Value::F64(f64::from_bits(raw)),
            ValueType::Ref(RefType::Func) => {
                Value::FuncRef(decode_ref(raw).map(|addr| addr as u32))
            }
            ValueType::Ref(RefType::Extern) => Value::ExternRef(decode_ref(raw)),
        }
    }

    /// The default (zero) value of a type, used for locals and table fill.
    pub fn default_of(value_type: ValueType) -> Value {
        match value_type {
            ValueType::Num(NumType::I32) => Value::I32(0),
            ValueType::Num(NumType::I64) => Value::I64(0),
            ValueType::Num(NumType::F32) => Value::F32(0.0),
            ValueType::Num(NumType::F64) => Value::F64(0.0),
            ValueType::Ref(RefType::Func) => Value::FuncRef(None),
            ValueType::Ref(RefType::Extern) => Value::ExternRef(None),
        }
    }
}

fn encode_ref(r: Option<u64>) -> u64 {
    match r {
        None => NULL_REF,
        Some(addr) => addr + 1,
    }
}

fn decode_ref(raw: u64) -> Option<u64> {
    if raw == NULL_REF {
        None
    } else {
        Some(raw - 1)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::I32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::I32(v as i32)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::I64(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::F64(v)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::module::types::{F32, FUNCREF, I32, I64},
    };

    #[test]
    fn numeric_slot_round_trip() {
        for v in [
            Value::I32(-1),
            Value::I32(i32::MIN),
            Value::I64(i64::MIN),
            Value::F32(-0.0),
            Value::F64(f64::INFINITY),
        ] {
            assert_eq!(Value::from_raw(v.to_raw(), v.value_type()), v);
        }
    }

    #[test]
    fn nan_bits_survive_the_slot() {
        let bits = 0x7fc0_dead_u32;
        let v = Value::F32(f32::from_bits(bits));
        match Value::from_raw(v.to_raw(), F32) {
            Value::F32(f) => assert_eq!(f.to_bits(), bits),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ref_encoding_distinguishes_null_from_addr_zero() {
        assert_eq!(Value::FuncRef(None).to_raw(), NULL_REF);
        assert_eq!(Value::FuncRef(Some(0)).to_raw(), 1);
        assert_eq!(
            Value::from_raw(Value::FuncRef(Some(0)).to_raw(), FUNCREF),
            Value::FuncRef(Some(0))
        );
    }

    #[test]
    fn i32_slots_are_zero_extended() {
        assert_eq!(Value::I32(-1).to_raw(), 0xFFFF_FFFF);
        assert_eq!(Value::from_raw(0xFFFF_FFFF, I32), Value::I32(-1));
        assert_eq!(Value::from_raw(u64::MAX, I64), Value::I64(-1));
    }
}
