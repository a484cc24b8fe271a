//! Property tests for the §8-style invariants: determinism, bit
//! preservation, interning soundness, and feature coupling.

use {
    proptest::prelude::*,
    wasmite_format::binary::parse_wasm_bytes,
    wasmite_runtime::{
        features::{self, FEATURES_CORE_2},
        Value,
    },
    wasmite_tests::{core2_store, instantiate_wat},
};

proptest! {
    /// Decoding is a pure function of the input bytes: two runs agree on
    /// the result, successful or not.
    #[test]
    fn decode_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let first = parse_wasm_bytes(&bytes, FEATURES_CORE_2);
        let second = parse_wasm_bytes(&bytes, FEATURES_CORE_2);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert!(modules_equal(&a, &b)),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "one run succeeded, the other failed"),
        }
    }

    /// f32 constants keep their exact bit pattern through decode and
    /// execution, NaN payloads included.
    #[test]
    fn f32_const_bits_survive(bits in any::<u32>()) {
        // A module returning the constant; the immediate is the little-endian
        // bit pattern.
        let mut bytes = wat::parse_str("(module (func (export \"c\") (result f32) (f32.const 0)))").unwrap();
        // Patch the 4 immediate bytes of f32.const 0 (the only 43 opcode).
        let pos = bytes.windows(1).rposition(|w| w[0] == 0x43).unwrap();
        bytes[pos + 1..pos + 5].copy_from_slice(&bits.to_le_bytes());

        let module = parse_wasm_bytes(&bytes, FEATURES_CORE_2).unwrap();
        let found = module_const_f32_bits(&module);
        prop_assert_eq!(found, Some(bits));
    }

    /// Within one store, two functions share a type id iff their signatures
    /// are structurally equal.
    #[test]
    fn interning_is_sound(params_a in 0u8..4, params_b in 0u8..4) {
        let store = core2_store();
        let sig = |n: u8| {
            let params = (0..n).map(|_| "i32").collect::<Vec<_>>().join(" ");
            if params.is_empty() {
                String::new()
            } else {
                format!(" (param {params})")
            }
        };
        let a = instantiate_wat(&store, "a",
            &format!("(module (func (export \"f\"){}))", sig(params_a))).unwrap();
        let b = instantiate_wat(&store, "b",
            &format!("(module (func (export \"f\"){}))", sig(params_b))).unwrap();
        let fa = a.instance().exported_func("f").unwrap();
        let fb = b.instance().exported_func("f").unwrap();
        prop_assert_eq!(fa.ty == fb.ty, fa.type_id == fb.type_id);
    }

    /// `memory.grow` either grows or returns −1 leaving the size unchanged.
    #[test]
    fn grow_never_partially_applies(delta in 0u32..12) {
        let store = core2_store();
        let ctx = instantiate_wat(&store, "g",
            r#"(module (memory 1 6)
                 (func (export "grow") (param i32) (result i32)
                   (memory.grow (local.get 0))))"#).unwrap();
        let before = ctx.memory().unwrap().size();
        let result = ctx.call("grow", &[Value::I32(delta as i32)]).unwrap();
        let after = ctx.memory().unwrap().size();
        match result[0] {
            Value::I32(-1) => prop_assert_eq!(before, after),
            Value::I32(old) => {
                prop_assert_eq!(old as u32, before);
                prop_assert_eq!(after, before + delta);
            }
            ref other => prop_assert!(false, "unexpected {:?}", other),
        }
    }
}

/// Structural equality over everything but the per-decode module identity.
fn modules_equal(a: &wasmite_runtime::module::Module, b: &wasmite_runtime::module::Module) -> bool {
    a.types == b.types
        && a.imports == b.imports
        && a.functions == b.functions
        && a.tables == b.tables
        && a.memory == b.memory
        && a.globals == b.globals
        && a.exports == b.exports
        && a.start == b.start
        && a.elements == b.elements
        && a.code == b.code
        && a.data == b.data
        && a.data_count == b.data_count
        && a.names == b.names
}

fn module_const_f32_bits(module: &wasmite_runtime::module::Module) -> Option<u32> {
    use wasmite_runtime::module::{Opcode, Operands};
    module.code.first()?.body.iter().find_map(|i| match i {
        wasmite_runtime::module::Instr {
            opcode: Opcode::Normal(0x43),
            operands: Operands::F32(bits),
        } => Some(*bits),
        _ => None,
    })
}

#[test]
fn bulk_memory_and_reference_types_are_mutually_implied() {
    use wasmite_runtime::RuntimeConfig;
    let on = RuntimeConfig::interpreter().with_bulk_memory_operations(true);
    assert!(on.features.is_enabled(features::BULK_MEMORY_OPERATIONS));
    assert!(on.features.is_enabled(features::REFERENCE_TYPES));

    let off = RuntimeConfig::interpreter()
        .wasm_core_2()
        .with_reference_types(false);
    assert!(!off.features.is_enabled(features::BULK_MEMORY_OPERATIONS));
    assert!(!off.features.is_enabled(features::REFERENCE_TYPES));
}
