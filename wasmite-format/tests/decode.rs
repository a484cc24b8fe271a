//! Whole-module decoding against binaries produced from the text format.

use {
    anyhow::Result,
    wasmite_format::binary::{error::BinaryErrorKind, parse_wasm_bytes},
    wasmite_runtime::{
        features::{FEATURES_CORE_1, FEATURES_CORE_2},
        module::{types::I32, ConstExpr, ExportDesc},
    },
};

fn wat_bytes(source: &str) -> Result<Vec<u8>> {
    Ok(wat::parse_str(source)?)
}

#[test]
fn decodes_a_representative_module() -> Result<()> {
    let bytes = wat_bytes(
        r#"(module
          (import "env" "log" (func $log (param i32)))
          (memory 1 2)
          (table 3 funcref)
          (global $g (mut i32) (i32.const 41))
          (elem (i32.const 0) $f)
          (data (i32.const 8) "hi")
          (func $f (export "f") (param i32) (result i32)
            (local i64)
            (i32.add (local.get 0) (global.get $g)))
          (start $f2)
          (func $f2))"#,
    )?;
    let module = parse_wasm_bytes(&bytes, FEATURES_CORE_1)?;

    assert_eq!(module.types.len(), 3);
    assert_eq!(module.imports.len(), 1);
    assert_eq!(module.functions.len(), 2);
    assert_eq!(module.function_count(), 3);
    assert_eq!(module.tables.len(), 1);
    assert!(module.memory.is_some());
    assert_eq!(module.globals.len(), 1);
    assert_eq!(module.globals[0].init, ConstExpr::I32(41));
    assert_eq!(module.elements.len(), 1);
    assert_eq!(module.data.len(), 1);
    assert_eq!(&*module.data[0].init, b"hi");
    assert!(module.start.is_some());
    assert_eq!(module.code[0].locals, vec![wasmite_runtime::module::types::I64]);
    assert!(module
        .exports
        .iter()
        .any(|e| e.name == "f" && matches!(e.desc, ExportDesc::Func(1))));
    assert_eq!(module.function_type(1).map(|t| t.params.as_ref()), Some(&[I32][..]));
    Ok(())
}

#[test]
fn truncated_binaries_fail_cleanly() -> Result<()> {
    // A prefix that cuts the header or any byte of the final (code) section
    // must error; a cut at a section boundary is simply a shorter module.
    let bytes = wat_bytes(r#"(module (func (export "f")))"#)?;
    for cut in 1..8 {
        assert!(parse_wasm_bytes(&bytes[..cut], FEATURES_CORE_2).is_err());
    }
    let code = bytes.iter().rposition(|b| *b == 10).expect("code section");
    for cut in code + 1..bytes.len() {
        let err = parse_wasm_bytes(&bytes[..cut], FEATURES_CORE_2);
        assert!(err.is_err(), "prefix of {cut} bytes decoded successfully");
    }
    Ok(())
}

#[test]
fn rejects_bad_magic_and_version() {
    assert!(matches!(
        parse_wasm_bytes(b"\x00msa\x01\x00\x00\x00", FEATURES_CORE_1)
            .unwrap_err()
            .kind,
        BinaryErrorKind::BadMagic
    ));
    assert!(matches!(
        parse_wasm_bytes(b"\x00asm\x02\x00\x00\x00", FEATURES_CORE_1)
            .unwrap_err()
            .kind,
        BinaryErrorKind::BadVersion
    ));
}

#[test]
fn rejects_out_of_order_sections() -> Result<()> {
    // A valid module: type section (id 1) then function+code. Splice a
    // second type section after the function section.
    let bytes = wat_bytes(r#"(module (func))"#)?;
    // Find the function section (id 3) and duplicate the type section
    // after... simpler: append a type section at the end.
    let mut tampered = bytes.clone();
    tampered.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
    let err = parse_wasm_bytes(&tampered, FEATURES_CORE_2).unwrap_err();
    assert!(matches!(err.kind, BinaryErrorKind::SectionOutOfOrder(1)));
    Ok(())
}

#[test]
fn section_size_mismatch_is_a_hard_error() -> Result<()> {
    let bytes = wat_bytes(r#"(module (memory 1))"#)?;
    // Find the memory section (id 5) and inflate its declared size.
    let pos = bytes.iter().position(|b| *b == 5).expect("memory section");
    let mut tampered = bytes.clone();
    tampered[pos + 1] += 1;
    let err = parse_wasm_bytes(&tampered, FEATURES_CORE_2).unwrap_err();
    assert!(matches!(
        err.kind,
        BinaryErrorKind::SectionSizeMismatch { .. } | BinaryErrorKind::UnexpectedEnd
    ));
    Ok(())
}

#[test]
fn name_section_is_decoded() -> Result<()> {
    let bytes = wat_bytes(r#"(module $calculator (func $addone))"#)?;
    let module = parse_wasm_bytes(&bytes, FEATURES_CORE_1)?;
    assert_eq!(module.names.module_name.as_deref(), Some("calculator"));
    assert_eq!(
        module.names.function_names.get(&0).map(String::as_str),
        Some("addone")
    );
    Ok(())
}

#[test]
fn function_and_code_counts_must_agree() -> Result<()> {
    let bytes = wat_bytes(r#"(module (func))"#)?;
    // Drop the code section entirely (it is the last section).
    let pos = bytes.iter().rposition(|b| *b == 10).expect("code section");
    let err = parse_wasm_bytes(&bytes[..pos], FEATURES_CORE_2).unwrap_err();
    assert!(matches!(err.kind, BinaryErrorKind::FuncSizeMismatch));
    Ok(())
}
