//! End-to-end execution of decoded, validated, lowered modules.

use {
    wasmite_runtime::{error::TrapKind, Value},
    wasmite_tests::{core1_store, instantiate_wat, Result},
};

#[test]
fn factorial() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "fac",
        r#"(module
          (func $fac (export "fac") (param i32) (result i32)
            (if (result i32) (i32.eqz (local.get 0))
              (then (i32.const 1))
              (else
                (i32.mul
                  (local.get 0)
                  (call $fac (i32.sub (local.get 0) (i32.const 1))))))))"#,
    )?;
    assert_eq!(ctx.call("fac", &[Value::I32(10)])?, vec![Value::I32(3628800)]);
    assert_eq!(ctx.call("fac", &[Value::I32(0)])?, vec![Value::I32(1)]);
    Ok(())
}

#[test]
fn blocks_loops_and_branches() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "sum",
        r#"(module
          (func (export "sum_to") (param i32) (result i32)
            (local $acc i32)
            (block $done
              (loop $again
                (br_if $done (i32.eqz (local.get 0)))
                (local.set $acc (i32.add (local.get $acc) (local.get 0)))
                (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                (br $again)))
            (local.get $acc)))"#,
    )?;
    assert_eq!(ctx.call("sum_to", &[Value::I32(100)])?, vec![Value::I32(5050)]);
    assert_eq!(ctx.call("sum_to", &[Value::I32(0)])?, vec![Value::I32(0)]);
    Ok(())
}

#[test]
fn indirect_calls_check_types_and_bounds() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "dispatch",
        r#"(module
          (type $binop (func (param i32 i32) (result i32)))
          (type $other (func (param i64) (result i64)))
          (table 3 funcref)
          (elem (i32.const 0) $add $sub $mul)
          (func $add (type $binop) (i32.add (local.get 0) (local.get 1)))
          (func $sub (type $binop) (i32.sub (local.get 0) (local.get 1)))
          (func $mul (type $binop) (i32.mul (local.get 0) (local.get 1)))
          (func (export "call") (param $i i32) (param $x i32) (param $y i32) (result i32)
            (call_indirect (type $binop) (local.get $x) (local.get $y) (local.get $i)))
          (func (export "call_wrong_type") (param $i i32) (param $x i64) (result i64)
            (call_indirect (type $other) (local.get $x) (local.get $i))))"#,
    )?;

    assert_eq!(
        ctx.call("call", &[Value::I32(2), Value::I32(6), Value::I32(7)])?,
        vec![Value::I32(42)]
    );
    assert_eq!(
        ctx.call("call", &[Value::I32(1), Value::I32(6), Value::I32(7)])?,
        vec![Value::I32(-1)]
    );

    let err = ctx
        .call("call", &[Value::I32(3), Value::I32(0), Value::I32(0)])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::OutOfBoundsTableAccess));

    let err = ctx
        .call("call_wrong_type", &[Value::I32(0), Value::I64(0)])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::IndirectCallTypeMismatch));
    Ok(())
}

#[test]
fn division_traps() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "div",
        r#"(module
          (func (export "div_s") (param i32 i32) (result i32)
            (i32.div_s (local.get 0) (local.get 1))))"#,
    )?;
    assert_eq!(
        ctx.call("div_s", &[Value::I32(-7), Value::I32(2)])?,
        vec![Value::I32(-3)]
    );
    let err = ctx
        .call("div_s", &[Value::I32(1), Value::I32(0)])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::IntegerDivideByZero));
    let err = ctx
        .call("div_s", &[Value::I32(i32::MIN), Value::I32(-1)])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::IntegerOverflow));
    Ok(())
}

#[test]
fn unreachable_traps() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "boom",
        r#"(module (func (export "boom") unreachable))"#,
    )?;
    let err = ctx.call("boom", &[]).unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::Unreachable));
    Ok(())
}

#[test]
fn memory_loads_and_stores() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "mem",
        r#"(module
          (memory 1)
          (func (export "poke") (param i32 i32) (i32.store (local.get 0) (local.get 1)))
          (func (export "peek") (param i32) (result i32) (i32.load (local.get 0)))
          (func (export "peek8_s") (param i32) (result i32) (i32.load8_s (local.get 0))))"#,
    )?;
    ctx.call("poke", &[Value::I32(64), Value::I32(-2)])?;
    assert_eq!(ctx.call("peek", &[Value::I32(64)])?, vec![Value::I32(-2)]);
    assert_eq!(ctx.call("peek8_s", &[Value::I32(64)])?, vec![Value::I32(-2)]);

    let err = ctx.call("peek", &[Value::I32(65536)]).unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::OutOfBoundsMemoryAccess));
    Ok(())
}

#[test]
fn floats_follow_ieee_semantics() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "float",
        r#"(module
          (func (export "min") (param f64 f64) (result f64)
            (f64.min (local.get 0) (local.get 1)))
          (func (export "nearest") (param f64) (result f64)
            (f64.nearest (local.get 0)))
          (func (export "trunc_s") (param f64) (result i32)
            (i32.trunc_f64_s (local.get 0))))"#,
    )?;
    match ctx.call("min", &[Value::F64(f64::NAN), Value::F64(1.0)])?[0] {
        Value::F64(v) => assert!(v.is_nan()),
        ref other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        ctx.call("nearest", &[Value::F64(2.5)])?,
        vec![Value::F64(2.0)]
    );
    assert_eq!(
        ctx.call("nearest", &[Value::F64(3.5)])?,
        vec![Value::F64(4.0)]
    );
    let err = ctx.call("trunc_s", &[Value::F64(f64::NAN)]).unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::InvalidConversionToInteger));
    let err = ctx.call("trunc_s", &[Value::F64(1e10)]).unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::IntegerOverflow));
    Ok(())
}

#[test]
fn deep_recursion_exhausts_the_call_stack() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "deep",
        r#"(module
          (func $down (export "down") (param i32)
            (if (i32.eqz (local.get 0))
              (then (return)))
            (call $down (i32.sub (local.get 0) (i32.const 1)))))"#,
    )?;
    ctx.call("down", &[Value::I32(100)])?;
    let err = ctx.call("down", &[Value::I32(1_000_000)]).unwrap_err();
    assert_eq!(err.as_trap(), Some(TrapKind::CallStackExhausted));
    Ok(())
}

#[test]
fn multi_value_blocks() -> Result<()> {
    let store = wasmite_tests::core2_store();
    let ctx = instantiate_wat(
        &store,
        "pair",
        r#"(module
          (func (export "swap") (param i32 i32) (result i32 i32)
            (local.get 1) (local.get 0)))"#,
    )?;
    assert_eq!(
        ctx.call("swap", &[Value::I32(1), Value::I32(2)])?,
        vec![Value::I32(2), Value::I32(1)]
    );
    Ok(())
}
