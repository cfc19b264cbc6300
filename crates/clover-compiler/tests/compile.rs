//! End-to-end compiler tests: emitted bytes and error behavior.

use clover_compiler::{compile, CompileError};

fn compile_err(source: &str) -> CompileError {
    compile(source).unwrap_err().error
}

/// Code bytes of the image (everything after the command-table terminator).
fn code_of(executable: &[u8]) -> &[u8] {
    let pool_words = u16::from_le_bytes([executable[4], executable[5]]) as usize;
    let mut pos = 10 + pool_words * 4;
    while executable[pos] != 0 {
        pos += 12;
    }
    &executable[pos + 1..]
}

#[test]
fn minimal_command_image_bytes() {
    let out = compile(
        "command hello 0 init loop;
         function init() { }
         function int loop() { return 100; }",
    )
    .unwrap();

    let expected = [
        b'a', b'r', b'l', b'y', // magic
        0, 0, // no constants
        0, 0, // no globals
        64, 0, // stack = high water 0 + overhead
        b'h', b'e', b'l', b'l', b'o', 0, 0, // name
        0,    // param count
        0, 0, // init offset
        4, 0, // loop offset
        0,    // terminator
        0xc0, 0x00, // init: SetFrame 0 0
        0xa0, // PushIntConstS 0
        0x0b, // Return
        0xc0, 0x00, // loop: SetFrame 0 0
        0x01, 100,  // PushIntConst 100
        0x0b, // Return
    ];
    assert_eq!(out.executable, expected);
}

#[test]
fn arithmetic_statement_bytes() {
    let out = compile("function int f() { int a; a = 2 + 3 * 4; return a; }").unwrap();
    let expected = [
        0xc0, 0x01, // SetFrame 0 1
        0x40, 0xc0, // PushRef a
        0xa2, // PushIntConstS 2
        0xa3, // PushIntConstS 3
        0xa4, // PushIntConstS 4
        0x27, // MulInt
        0x23, // AddInt
        0x03, // PopDeref
        0x50, 0xc0, // Push a
        0x0b, // Return
    ];
    assert_eq!(code_of(&out.executable), expected);
}

#[test]
fn compound_assignment_bytes() {
    let out = compile("function f() { int x; x += 1; }").unwrap();
    let expected = [
        0xc0, 0x01, // SetFrame 0 1
        0x40, 0xc0, // PushRef x
        0x04, // Dup
        0x02, // PushDeref
        0xa1, // PushIntConstS 1
        0x23, // AddInt
        0x03, // PopDeref
        0xa0, // PushIntConstS 0 (implicit return)
        0x0b, // Return
    ];
    assert_eq!(code_of(&out.executable), expected);
}

#[test]
fn literal_sizes_pick_encodings() {
    // 15 fits the short form, 200 the byte form, 70000 goes to the pool.
    let out = compile("function f() { int a; a = 15; a = 200; a = 70000; }").unwrap();
    let code = code_of(&out.executable).to_vec();
    assert!(code.windows(1).any(|w| w == [0xaf])); // PushIntConstS 15
    assert!(code.windows(2).any(|w| w == [0x01, 200])); // PushIntConst 200
    assert!(code.windows(2).any(|w| w == [0x50, 0x00])); // Push const 0
    let pool = &out.executable[10..14];
    assert_eq!(u32::from_le_bytes(pool.try_into().unwrap()), 70000);
}

#[test]
fn int_literals_dedupe_in_pool() {
    let out = compile("function f() { int a; a = 70000; a = 70000; }").unwrap();
    let pool_words = u16::from_le_bytes([out.executable[4], out.executable[5]]);
    assert_eq!(pool_words, 1);
}

#[test]
fn negative_literal_goes_to_pool() {
    let out = compile("function f() { int a; a = -1; }").unwrap();
    let pool = &out.executable[10..14];
    assert_eq!(u32::from_le_bytes(pool.try_into().unwrap()), 0xffff_ffff);
}

#[test]
fn float_literal_promotion() {
    let out = compile("function f() { float x; x = 1; }").unwrap();
    let pool = &out.executable[10..14];
    assert_eq!(
        u32::from_le_bytes(pool.try_into().unwrap()),
        1.0f32.to_bits()
    );
}

#[test]
fn if_else_patching() {
    let out = compile("function int f() { if (1) { return 2; } else { return 3; } return 0; }")
        .unwrap();
    let code = code_of(&out.executable);
    // SetFrame(2) + PushIntConstS(1) = 3 bytes, then If.
    assert_eq!(code[3] & 0xf0, 0xe0);
    // If target skips the 2-byte then-branch plus the 2-byte else Jump.
    let if_rel = ((u16::from(code[3] & 0x0f)) << 8) | u16::from(code[4]);
    assert_eq!(if_rel, 4);
}

#[test]
fn log_emits_format_string() {
    let out = compile(r#"function f() { log("v=%i", 42); }"#).unwrap();
    let code = code_of(&out.executable).to_vec();
    // PushIntConst 42, then Log with 1 arg and a 4-byte string.
    let pos = code.windows(2).position(|w| w == [0xb1, 4]).unwrap();
    assert_eq!(&code[pos + 2..pos + 6], b"v=%i");
}

#[test]
fn command_names_truncate_to_seven_bytes() {
    let out = compile(
        "command abcdefghij 0 f f;
         function f() { }",
    )
    .unwrap();
    assert_eq!(&out.executable[10..17], b"abcdefg");
}

#[test]
fn annotations_map_lines_to_offsets() {
    let out = compile("function int f() {\nreturn 1;\n}").unwrap();
    // Line 1 emits SetFrame at offset 0; line 2 starts at offset 2.
    assert_eq!(out.annotations[0].first_offset, 0);
    assert_eq!(out.annotations[1].first_offset, 2);
    assert!(out.annotations[1].text.contains("return 1;"));
}

// ---------------------------------------------------------------------
// Error behavior
// ---------------------------------------------------------------------

#[test]
fn duplicate_command_fails() {
    assert_eq!(
        compile_err(
            "command go 0 f f;
             command go 1 f f;
             function f() { }"
        ),
        CompileError::DuplicateCmd
    );
}

#[test]
fn command_param_count_limit() {
    assert_eq!(
        compile_err("command go 16 f f; function f() { }"),
        CompileError::InvalidParamCount
    );
    assert!(compile("command go 15 f f; function f() { }").is_ok());
}

#[test]
fn command_requires_known_function() {
    assert_eq!(
        compile_err("command go 0 nope nope;"),
        CompileError::UndefinedIdentifier
    );
}

#[test]
fn command_rejects_native_function() {
    assert_eq!(
        compile_err("command go 0 MinInt MinInt;"),
        CompileError::ExpectedFunction
    );
}

#[test]
fn undefined_identifier() {
    assert_eq!(
        compile_err("function f() { int a; a = nope; }"),
        CompileError::UndefinedIdentifier
    );
}

#[test]
fn duplicate_local_fails() {
    assert_eq!(
        compile_err("function f() { int a; int a; }"),
        CompileError::DuplicateIdentifier
    );
}

#[test]
fn duplicate_global_fails() {
    assert_eq!(
        compile_err("int g; int g;"),
        CompileError::DuplicateIdentifier
    );
}

#[test]
fn mismatched_types_fail() {
    assert_eq!(
        compile_err("function f() { int a; float x; x = 1.0; a = a + x; }"),
        CompileError::MismatchedType
    );
}

#[test]
fn logical_ops_reject_floats() {
    assert_eq!(
        compile_err("function f() { float x; x = 1.0; x = x && x; }"),
        CompileError::WrongType
    );
}

#[test]
fn assignment_not_allowed_in_condition() {
    assert_eq!(
        compile_err("function f() { int a; if (a = 1) { } }"),
        CompileError::AssignmentNotAllowedHere
    );
}

#[test]
fn break_outside_loop_fails() {
    assert_eq!(
        compile_err("function f() { break; }"),
        CompileError::OnlyAllowedInLoop
    );
}

#[test]
fn def_out_of_range() {
    assert_eq!(compile_err("def big 256;"), CompileError::DefOutOfRange);
    assert!(compile("def ok 255;").is_ok());
}

#[test]
fn defs_inline_as_literals() {
    let out = compile("def N 5; function int f() { return N; }").unwrap();
    let code = code_of(&out.executable).to_vec();
    assert!(code.contains(&0xa5)); // PushIntConstS 5
}

#[test]
fn string_too_long() {
    let ok = format!(r#"function f() {{ log("{}"); }}"#, "x".repeat(255));
    assert!(compile(&ok).is_ok());
    let too_long = format!(r#"function f() {{ log("{}"); }}"#, "x".repeat(256));
    assert_eq!(compile_err(&too_long), CompileError::StringTooLong);
}

#[test]
fn constant_pool_limit() {
    let values: Vec<String> = (0..128).map(|i| (i + 1000).to_string()).collect();
    let ok = format!("table int t {{ {} }}", values.join(" "));
    assert!(compile(&ok).is_ok());

    let values: Vec<String> = (0..129).map(|i| (i + 1000).to_string()).collect();
    let too_many = format!("table int t {{ {} }}", values.join(" "));
    assert_eq!(compile_err(&too_many), CompileError::TooManyConstants);
}

#[test]
fn global_capacity_limit() {
    assert!(compile("int a[64];").is_ok());
    assert_eq!(compile_err("int a[65];"), CompileError::TooManyVars);
}

#[test]
fn formal_param_limit() {
    let params: Vec<String> = (0..16).map(|i| format!("int p{i}")).collect();
    let src = format!("function f({}) {{ }}", params.join(", "));
    assert_eq!(compile_err(&src), CompileError::ParamOutOfRange);
}

#[test]
fn struct_member_limit() {
    let members: Vec<String> = (0..16).map(|i| format!("int m{i};")).collect();
    let src = format!("struct S {{ {} }}", members.join(" "));
    assert_eq!(compile_err(&src), CompileError::TooManyVars);
}

#[test]
fn unknown_struct_member_fails() {
    assert_eq!(
        compile_err("struct P { int x; } function f() { P p; p.z = 1; }"),
        CompileError::InvalidStructId
    );
}

#[test]
fn global_initializer_rejected() {
    // Code at global scope would never execute.
    assert_eq!(
        compile_err("int g = 5;"),
        CompileError::AssignmentNotAllowedHere
    );
}

#[test]
fn backward_jump_size_boundary() {
    // The back jump's displacement is -(body + 5); the field bottoms out
    // at -2048, so a 2043-byte body fits and one more byte does not.
    let body_that_fits = format!(
        "{}log(\"{}\");",
        format!("log(\"{}\");", "x".repeat(253)).repeat(8),
        "x"
    );
    let ok = format!("function f() {{ while (1) {{ {body_that_fits} }} }}");
    assert!(compile(&ok).is_ok());

    let body_too_big = format!(
        "{}log(\"{}\");",
        format!("log(\"{}\");", "x".repeat(253)).repeat(8),
        "xx"
    );
    let err = format!("function f() {{ while (1) {{ {body_too_big} }} }}");
    assert_eq!(compile_err(&err), CompileError::JumpTooBig);
}

#[test]
fn forward_if_size_boundary() {
    // A false condition skips the whole body: max displacement 2047.
    let body_that_fits = format!(
        "{}log(\"{}\");",
        format!("log(\"{}\");", "x".repeat(253)).repeat(8),
        "xxxxx"
    );
    let ok = format!("function f() {{ if (1) {{ {body_that_fits} }} }}");
    assert!(compile(&ok).is_ok());

    let body_too_big = format!(
        "{}log(\"{}\");",
        format!("log(\"{}\");", "x".repeat(253)).repeat(8),
        "xxxxxx"
    );
    let err = format!("function f() {{ if (1) {{ {body_too_big} }} }}");
    assert_eq!(compile_err(&err), CompileError::IfTooBig);
}

#[test]
fn diagnostic_carries_position() {
    let diag = compile("function f() {\n  int a;\n  a = nope;\n}").unwrap_err();
    assert_eq!(diag.error, CompileError::UndefinedIdentifier);
    assert_eq!(diag.line, 3);
    let rendered = diag.to_string();
    assert!(rendered.contains("on line 3:"));
}
