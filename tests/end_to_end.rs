//! End-to-end scenarios compiled through the public API.
//!
//! There's no simulator for the emitted assembly, so these assert on its
//! *structure* (mnemonics, label pairs, call sites) rather than on the
//! values a real run would print.

use toyc::{CompilerConfig, Severity};

fn compile_ok(src: &str) -> toyc::CompileResult {
    let result = toyc::compile_source(src);
    assert!(result.succeeded(), "expected success, got:\n{}", result.diagnostics.render());
    result
}

#[test]
fn arithmetic_and_write_emits_four_calls_with_mixed_operators() {
    let src = "main {\n\
        write(10 + (-2) * 0);\n\
        write(10);\n\
        write(10 + 2 * 4);\n\
        write(-2);\n\
    }\n";
    let result = compile_ok(src);
    let asm = result.assembly;

    assert_eq!(asm.matches("jl r15, putint").count(), 4);
    assert!(asm.contains("add "));
    assert!(asm.contains("mul "));
    // unary minus is folded through a dedicated Sign case, not spliced
    // into the literal's lexeme.
    assert!(asm.contains("sub r"));
}

#[test]
fn relational_operators_each_emit_their_own_compare_mnemonic() {
    let src = "main {\n\
        local a: integer;\n\
        local b: integer;\n\
        a = 3;\n\
        b = 3;\n\
        write(a == b);\n\
        write(a <> b);\n\
        write(a < b);\n\
        write(a > b);\n\
        write(a <= b);\n\
        write(a >= b);\n\
    }\n";
    let result = compile_ok(src);
    let asm = result.assembly;

    for mnemonic in ["ceq ", "cne ", "clt ", "cgt ", "cle ", "cge "] {
        assert!(asm.contains(mnemonic), "missing {mnemonic:?} in:\n{asm}");
    }
}

#[test]
fn sequential_while_loops_each_get_their_own_label_pair() {
    let src = "main {\n\
        local i: integer;\n\
        i = 0;\n\
        while (i < 10) {\n\
            write(i);\n\
            i = i + 1;\n\
        }\n\
        i = 10;\n\
        while (i > 1) {\n\
            write(i);\n\
            i = i - 1;\n\
        }\n\
        i = -5;\n\
        while (i < -1) {\n\
            write(i);\n\
            i = i + 1;\n\
        }\n\
    }\n";
    let result = compile_ok(src);
    let asm = result.assembly;

    for n in 1..=3 {
        assert!(asm.contains(&format!("gowhile{n}")), "missing gowhile{n}");
        assert!(asm.contains(&format!("endwhile{n}")), "missing endwhile{n}");
    }
    assert_eq!(asm.matches("jl r15, putint").count(), 3);
}

#[test]
fn recursive_factorial_saves_and_restores_the_return_address_at_offset_minus_four() {
    let src = "factorial(n: integer): integer {\n\
        if (n <= 1) then\n\
            return(1)\n\
        else\n\
            return(n * factorial(n - 1))\n\
        ;\n\
    }\n\
    main {\n\
        write(factorial(8));\n\
    }\n";
    let result = compile_ok(src);
    let asm = result.assembly;

    // header stashes r15 at -4(r14) (ret_size for `integer` is 4 bytes)
    // and the footer reloads it from the same offset before returning.
    assert!(asm.contains("sw -4(r14), r15"));
    assert!(asm.contains("lw r15, -4(r14)"));
    assert!(asm.contains("jr r15"));

    // the function calls itself: at least one `jl` targets its own tag.
    let header_line = asm.lines().find(|l| l.contains("sw -4(r14), r15")).unwrap();
    let tag = header_line.split_whitespace().next().unwrap();
    assert!(asm.contains(&format!("jl r15, {tag}")), "no recursive call to {tag} found");
}

#[test]
fn two_dimensional_array_indexing_uses_row_major_strides() {
    let src = "main {\n\
        local a: integer[3][5];\n\
        local i: integer;\n\
        local j: integer;\n\
        i = 1;\n\
        j = 2;\n\
        a[i][j] = 7;\n\
        write(a[i][j]);\n\
    }\n";
    let result = compile_ok(src);
    let asm = result.assembly;

    // first index stride: size of one row (5 elements * 4 bytes) = 20.
    assert!(asm.contains("muli r2, r1, 20"));
    // second index stride: size of one element = 4.
    assert!(asm.contains("muli r2, r1, 4"));
}

#[test]
fn shadowed_inherited_member_warns_once_with_no_errors() {
    let src = "class A {\n\
        public z: integer;\n\
    };\n\
    class B inherits A {\n\
        public z: integer;\n\
    };\n\
    main {\n\
    }\n";
    let result = compile_ok(src);

    let warnings: Vec<_> = result.diagnostics.iter().filter(|d| d.severity == Severity::Warning).collect();
    assert_eq!(warnings.len(), 1, "expected exactly one warning, got: {warnings:?}");
    assert!(warnings[0].message.contains("shadows an inherited member"));
    assert!(!result.diagnostics.has_errors());
}

#[test]
fn keep_ast_dump_reflects_control_flow_and_calls() {
    let src = "main {\n\
        local x: integer;\n\
        x = 1;\n\
        if (x == 1) then\n\
            write(x);\n\
        else\n\
            write(0);\n\
        ;\n\
    }\n";
    let result = compile_ok(src);
    let dump = result.ast_dump();
    assert!(dump.contains("IfStat"));
    assert!(dump.contains("Write"));
}

#[test]
fn stop_on_error_config_short_circuits_before_codegen() {
    let src = "main {\n x = 1;\n}\n";
    let config = CompilerConfig::new().with_stop_on_error(true);
    let result = toyc::compile_source_with_config(src, &config);
    assert!(!result.succeeded());
    assert!(result.assembly.is_empty());
}
