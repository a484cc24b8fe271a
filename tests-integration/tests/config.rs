//! Runtime and module configuration, end to end.

use {
    std::sync::Arc,
    wasmite_runtime::{
        host::{HostFunc, HostModuleBuilder},
        module::types::{FunctionType, I32},
        sys::writer,
        ModuleConfig, RuntimeConfig, Store, Value,
    },
    wasmite_tests::{compile_wat, instantiate_wat, Result},
};

#[test]
fn memory_growth_respects_the_configured_limit() -> Result<()> {
    let store = Store::new(RuntimeConfig::interpreter().with_memory_limit_pages(4));
    // The module asks for up to 8 pages, but the runtime caps at 4... the
    // declared minimum of 2 still fits.
    let ctx = instantiate_wat(
        &store,
        "mem",
        r#"(module
          (memory 2 8)
          (func (export "grow") (param i32) (result i32)
            (memory.grow (local.get 0)))
          (func (export "size") (result i32) (memory.size)))"#,
    )?;
    assert_eq!(ctx.call("grow", &[Value::I32(3)])?, vec![Value::I32(2)]);
    assert_eq!(ctx.call("grow", &[Value::I32(1)])?, vec![Value::I32(-1)]);
    assert_eq!(ctx.call("size", &[])?, vec![Value::I32(5)]);
    Ok(())
}

#[test]
fn memory_minimum_above_the_limit_fails_to_compile() {
    let store = Store::new(RuntimeConfig::interpreter().with_memory_limit_pages(4));
    let err = compile_wat(&store, "(module (memory 5))").unwrap_err();
    assert!(err.to_string().contains("exceeds the limit"));
}

#[test]
fn memory_capacity_below_min_is_a_hard_error() {
    let store = Store::new(
        RuntimeConfig::interpreter().with_memory_capacity_pages(|_min, _max| 0),
    );
    let err = compile_wat(&store, "(module (memory 2))").unwrap_err();
    assert!(err.to_string().contains("less than the declared minimum"));
}

#[test]
fn memory_capacity_may_reserve_up_to_max() -> Result<()> {
    let store = Store::new(
        RuntimeConfig::interpreter().with_memory_capacity_pages(|min, max| max.unwrap_or(min)),
    );
    let ctx = instantiate_wat(&store, "m", "(module (memory 2 6))")?;
    // Capacity is a reservation hint: the reported size is still the min.
    let memory = ctx.memory().expect("memory");
    assert_eq!(memory.size(), 2);
    Ok(())
}

#[test]
fn start_functions_default_to_underscore_start() -> Result<()> {
    let store = wasmite_tests::core1_store();
    let compiled = compile_wat(
        &store,
        r#"(module
          (global $ran (export "ran") (mut i32) (i32.const 0))
          (func (export "_start") (global.set $ran (i32.const 1))))"#,
    )?;
    let ctx = store.instantiate(&compiled, &ModuleConfig::new().with_name("starts"))?;
    let ran = ctx.instance().exported_func("_start").is_ok();
    assert!(ran);
    let g = ctx.instance().global(0)?;
    assert_eq!(g.value(), Value::I32(1));
    Ok(())
}

#[test]
fn missing_start_functions_are_skipped() -> Result<()> {
    let store = wasmite_tests::core1_store();
    let compiled = compile_wat(&store, "(module)")?;
    store.instantiate(
        &compiled,
        &ModuleConfig::new()
            .with_name("quiet")
            .with_start_functions(["boot", "main"]),
    )?;
    Ok(())
}

#[test]
fn import_rewrites_redirect_resolution() -> Result<()> {
    let store = wasmite_tests::core1_store();
    HostModuleBuilder::new()
        .with_func(
            "seven",
            HostFunc::new(FunctionType::new(vec![], vec![I32]), |_call, _args| {
                Ok(Some(Value::I32(7)))
            }),
        )
        .instantiate(&store, "sys")?;

    let compiled = compile_wat(
        &store,
        r#"(module
          (import "env" "seven" (func $seven (result i32)))
          (func (export "get") (result i32) (call $seven)))"#,
    )?;
    // Without the rewrite there is no "env" module.
    assert!(store
        .instantiate(&compiled, &ModuleConfig::new().with_name("plain"))
        .is_err());

    let ctx = store.instantiate(
        &compiled,
        &ModuleConfig::new()
            .with_name("rewired")
            .with_import_module("env", "sys"),
    )?;
    assert_eq!(ctx.call("get", &[])?, vec![Value::I32(7)]);
    Ok(())
}

#[test]
fn env_validation_rejects_bad_keys() {
    let store = wasmite_tests::core1_store();
    let compiled = compile_wat(&store, "(module)").unwrap();
    let err = store
        .instantiate(
            &compiled,
            &ModuleConfig::new().with_name("bad-env").with_env("A=B", "x"),
        )
        .unwrap_err();
    assert!(err.to_string().contains("key contains '='"));
    // The failure happened before the name was reserved.
    store
        .instantiate(&compiled, &ModuleConfig::new().with_name("bad-env"))
        .unwrap();
}

#[test]
fn sys_context_carries_args_env_and_stdio() -> Result<()> {
    let store = wasmite_tests::core1_store();
    let out: Arc<std::sync::Mutex<Vec<u8>>> = Arc::default();
    let sink = out.clone();

    let compiled = compile_wat(&store, "(module)")?;
    let ctx = store.instantiate(
        &compiled,
        &ModuleConfig::new()
            .with_name("sysed")
            .with_args(["prog", "arg1"])
            .with_env("HOME", "/wasm")
            .with_stdout(writer(WriteTo(sink))),
    )?;
    assert_eq!(ctx.sys().args(), ["prog", "arg1"]);
    assert_eq!(ctx.sys().environ(), ["HOME=/wasm"]);
    ctx.sys().write_stdout(b"ping")?;
    assert_eq!(out.lock().unwrap().as_slice(), b"ping");
    Ok(())
}

struct WriteTo(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for WriteTo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
