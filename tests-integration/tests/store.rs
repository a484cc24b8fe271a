//! Store-level behavior: naming, interning, imports, and transactional
//! instantiation.

use {
    std::{sync::Arc, thread},
    wasmite_runtime::{
        error::{LinkError, RuntimeError},
        ModuleConfig, Value,
    },
    wasmite_tests::{compile_wat, core1_store, instantiate_wat, Result},
};

#[test]
fn concurrent_instantiation_of_one_name_admits_exactly_one() -> Result<()> {
    let store = core1_store();
    let compiled = Arc::new(compile_wat(&store, "(module)")?);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let compiled = compiled.clone();
        handles.push(thread::spawn(move || {
            store.instantiate(&compiled, &ModuleConfig::new().with_name("singleton"))
        }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    for failed in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            failed.as_ref().unwrap_err(),
            RuntimeError::Link(LinkError::DuplicateModuleName(name)) if name == "singleton"
        ));
    }
    Ok(())
}

#[test]
fn failed_start_leaves_no_trace() -> Result<()> {
    let store = core1_store();
    let compiled = compile_wat(
        &store,
        r#"(module (func $boom unreachable) (start $boom))"#,
    )?;
    let err = store
        .instantiate(&compiled, &ModuleConfig::new().with_name("doomed"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Instantiation(_)));
    assert!(err.to_string().contains("start"));

    // The reservation rolled back: the name is free, the module invisible.
    assert!(store.module("doomed").is_none());
    instantiate_wat(&store, "doomed", "(module)")?;
    Ok(())
}

#[test]
fn type_ids_are_shared_iff_signatures_match() -> Result<()> {
    let store = core1_store();
    let a = instantiate_wat(
        &store,
        "a",
        r#"(module
          (func (export "f") (param i32 i64) (result f32) (f32.const 0))
          (func (export "g") (param i32) (i32.const 0) (drop)))"#,
    )?;
    let b = instantiate_wat(
        &store,
        "b",
        r#"(module
          (func (export "f") (param i32 i64) (result f32) (f32.const 1))
          (func (export "h") (result i64) (i64.const 2)))"#,
    )?;

    let af = a.instance().exported_func("f")?;
    let ag = a.instance().exported_func("g")?;
    let bf = b.instance().exported_func("f")?;
    let bh = b.instance().exported_func("h")?;
    assert_eq!(af.type_id, bf.type_id);
    assert_ne!(af.type_id, ag.type_id);
    assert_ne!(bf.type_id, bh.type_id);
    Ok(())
}

#[test]
fn imports_resolve_against_registered_modules() -> Result<()> {
    let store = core1_store();
    instantiate_wat(
        &store,
        "math",
        r#"(module
          (func (export "double") (param i32) (result i32)
            (i32.mul (local.get 0) (i32.const 2)))
          (global (export "base") i32 (i32.const 8))
          (memory (export "mem") 2 8))"#,
    )?;

    let ctx = instantiate_wat(
        &store,
        "user",
        r#"(module
          (import "math" "double" (func $double (param i32) (result i32)))
          (import "math" "base" (global $base i32))
          (import "math" "mem" (memory 1))
          (func (export "calc") (result i32)
            (call $double (global.get $base))))"#,
    )?;
    assert_eq!(ctx.call("calc", &[])?, vec![Value::I32(16)]);
    Ok(())
}

#[test]
fn import_limit_variance_is_monotone() -> Result<()> {
    // The exporter offers (memory 2 8); any requirement it satisfies keeps
    // succeeding as the requirement loosens.
    let store = core1_store();
    instantiate_wat(&store, "exp", r#"(module (memory (export "m") 2 8))"#)?;

    for (i, decl) in ["(memory 1)", "(memory 2)", "(memory 2 8)", "(memory 1 9)"]
        .iter()
        .enumerate()
    {
        let src = format!(r#"(module (import "exp" "m" {decl}))"#);
        instantiate_wat(&store, &format!("imp{i}"), &src)?;
    }

    // And requirements it does not satisfy fail with the limit errors.
    let err = instantiate_wat(
        &store,
        "too-big",
        r#"(module (import "exp" "m" (memory 3)))"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("minimum size mismatch"));
    let err = instantiate_wat(
        &store,
        "too-small",
        r#"(module (import "exp" "m" (memory 2 7)))"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("maximum size mismatch"));
    Ok(())
}

#[test]
fn signature_mismatch_is_a_link_error() -> Result<()> {
    let store = core1_store();
    instantiate_wat(
        &store,
        "lib",
        r#"(module (func (export "f") (param i32) (result i32) (local.get 0)))"#,
    )?;
    let err = instantiate_wat(
        &store,
        "cli",
        r#"(module (import "lib" "f" (func (param i64) (result i64))))"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("signature mismatch"));
    Ok(())
}

#[test]
fn mutable_global_races_are_permitted() -> Result<()> {
    let store = core1_store();
    let ctx = instantiate_wat(
        &store,
        "counter",
        r#"(module
          (global $n (export "n") (mut i32) (i32.const 0))
          (func (export "bump")
            (global.set $n (i32.add (global.get $n) (i32.const 1))))
          (func (export "read") (result i32) (global.get $n)))"#,
    )?;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ctx = ctx.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                ctx.call("bump", &[]).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    // Increments may race each other away; the value is still a sane i32
    // between one thread's worth and the total.
    match ctx.call("read", &[])?[0] {
        Value::I32(n) => assert!((100..=400).contains(&n)),
        ref other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[test]
fn closing_a_module_frees_its_name_and_fails_importers() -> Result<()> {
    let store = core1_store();
    let lib = instantiate_wat(
        &store,
        "lib",
        r#"(module (func (export "f") (result i32) (i32.const 7)))"#,
    )?;
    let user = instantiate_wat(
        &store,
        "user",
        r#"(module
          (import "lib" "f" (func $f (result i32)))
          (func (export "go") (result i32) (call $f)))"#,
    )?;
    assert_eq!(user.call("go", &[])?, vec![Value::I32(7)]);

    lib.close();
    assert!(store.module("lib").is_none());
    // The importer observes an error on its next use, not dangling state.
    let err = user.call("go", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::ModuleClosed(_)));
    // The name is reusable.
    instantiate_wat(&store, "lib", "(module)")?;
    Ok(())
}

#[test]
fn compiled_module_close_keeps_existing_instances_running() -> Result<()> {
    let store = core1_store();
    let compiled = compile_wat(
        &store,
        r#"(module (func (export "f") (result i32) (i32.const 3)))"#,
    )?;
    let ctx = store.instantiate(&compiled, &ModuleConfig::new().with_name("keep"))?;
    compiled.close();
    // Calls through the existing instance keep succeeding.
    assert_eq!(ctx.call("f", &[])?, vec![Value::I32(3)]);
    // And the same compiled module can be instantiated again; compilation
    // is idempotent.
    store.instantiate(&compiled, &ModuleConfig::new().with_name("again"))?;
    Ok(())
}
