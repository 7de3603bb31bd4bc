//! Whole-program compiler core for a small class-based imperative language,
//! targeting a stack-and-register assembly.
//!
//! [`compile_source`] and [`compile_file`] drive the four-pass pipeline
//! (symbol tables, type-checking, memory layout, code generation) end to
//! end and return the emitted assembly text alongside whatever diagnostics
//! were accumulated along the way. Each call builds its own [`Diagnostics`]
//! sink and its own [`symtab::SymTabs`] arena, so running the compiler
//! repeatedly in one process (a test binary compiling many fixtures, or a
//! long-lived service) never leaks state between runs.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod grammar;
pub mod lexer;
pub mod memsize;
pub mod parser;
pub mod parser_gen;
pub mod symtab;
pub mod symtab_visitor;
pub mod token;
pub mod typecheck;
pub mod types;

pub use ast::{Ast, NodeId};
pub use config::{CompilerConfig, RegisterPoolPolicy};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use symtab::SymTabs;

use std::fs;
use std::path::Path;

use lexer::Lexer;
use token::TokenType;

/// Everything a single compilation produced: the emitted assembly (empty if
/// any pass reported an error and `config.stop_on_error` cut the pipeline
/// short before code generation), the diagnostics accumulated along the way,
/// and the symbol tables built for it (kept around so a caller, e.g. a
/// future language server, can inspect resolved types without recompiling).
pub struct CompileResult {
    pub assembly: String,
    pub diagnostics: Diagnostics,
    pub tabs: SymTabs,
    pub ast: Ast,
    /// The AST root, if parsing got far enough to produce one.
    pub root: Option<NodeId>,
}

impl CompileResult {
    pub fn succeeded(&self) -> bool {
        !self.diagnostics.has_errors()
    }

    /// A textual dump of the parsed tree, for `--keep-ast`. Empty if parsing
    /// never produced a root node.
    pub fn ast_dump(&self) -> String {
        match self.root {
            Some(root) => self.ast.dump(root),
            None => String::new(),
        }
    }
}

/// Compiles `source` with default configuration.
pub fn compile_source(source: &str) -> CompileResult {
    compile_source_with_config(source, &CompilerConfig::default())
}

/// Compiles `source`, running every pass through code generation unless
/// `config.stop_on_error` is set and an earlier pass already recorded an
/// error.
pub fn compile_source_with_config(source: &str, config: &CompilerConfig) -> CompileResult {
    let span = tracing::info_span!("compile");
    let _enter = span.enter();

    let mut diags = Diagnostics::new();
    let mut tokens = Vec::new();
    let mut lexer = Lexer::new(source);
    let lex_start = diags.len();
    loop {
        let tk = lexer.next_token();
        let done = tk.ty == TokenType::Eos;
        match tk.ty {
            TokenType::InvalidId => diags.error(format!("invalid identifier '{}'", tk.lexeme), tk.line),
            TokenType::InvalidChar => diags.error(format!("invalid character '{}'", tk.lexeme), tk.line),
            TokenType::InvalidNum => diags.error(format!("invalid number '{}'", tk.lexeme), tk.line),
            TokenType::UnterminatedCmt => diags.error("unterminated comment", tk.line),
            _ if !tk.is_comment() => tokens.push(tk),
            _ => {}
        }
        if done {
            break;
        }
    }
    diags.tag_phase(lex_start, "lexer");
    tracing::debug!(token_count = tokens.len(), "lexed");

    let grammar_table = grammar::Grammar::parse(grammar::embedded_grammar());
    let (mut ast, root) = match parser::parse_tokens(&grammar_table, tokens) {
        Ok(parsed) => parsed,
        Err(errors) => {
            for e in errors {
                diags.error(e.message, e.line);
            }
            tracing::warn!(error_count = diags.len(), "parse failed");
            return CompileResult {
                assembly: String::new(),
                diagnostics: diags,
                tabs: SymTabs::new(),
                ast: Ast::new(),
                root: None,
            };
        }
    };
    tracing::debug!("parsed");

    if config.stop_on_error && diags.has_errors() {
        return CompileResult { assembly: String::new(), diagnostics: diags, tabs: SymTabs::new(), ast, root: Some(root) };
    }

    let before = diags.len();
    let mut result = symtab_visitor::build(&mut ast, root, &mut diags);
    diags.tag_phase(before, "symtab");
    tracing::debug!(class_count = result.classes.len(), "symbols built");

    if config.stop_on_error && diags.has_errors() {
        return CompileResult { assembly: String::new(), diagnostics: diags, tabs: result.tabs, ast, root: Some(root) };
    }

    let before = diags.len();
    typecheck::check(&mut ast, root, &result, &mut diags);
    diags.tag_phase(before, "typecheck");
    tracing::debug!("type-checked");

    if config.stop_on_error && diags.has_errors() {
        return CompileResult { assembly: String::new(), diagnostics: diags, tabs: result.tabs, ast, root: Some(root) };
    }

    let before = diags.len();
    memsize::assign(&mut ast, root, &mut result, &mut diags);
    diags.tag_phase(before, "memsize");
    tracing::debug!("memory laid out");

    if diags.has_errors() {
        tracing::warn!(error_count = diags.len(), "compilation failed, skipping codegen");
        return CompileResult { assembly: String::new(), diagnostics: diags, tabs: result.tabs, ast, root: Some(root) };
    }

    let global = result.global;
    let assembly = codegen::generate(&mut ast, root, &mut result.tabs, global, config);
    tracing::debug!(bytes = assembly.len(), "code generated");

    CompileResult { assembly, diagnostics: diags, tabs: result.tabs, ast, root: Some(root) }
}

/// Runs the pipeline through type-checking and memory layout only, skipping
/// code generation. Used by the CLI's `check` subcommand, where only the
/// diagnostics matter.
pub fn check_source(source: &str) -> Diagnostics {
    compile_source(source).diagnostics
}

/// Reads `source_path` and compiles it.
pub fn compile_file(source_path: &Path) -> Result<CompileResult, String> {
    compile_file_with_config(source_path, &CompilerConfig::default())
}

pub fn compile_file_with_config(source_path: &Path, config: &CompilerConfig) -> Result<CompileResult, String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("failed to read '{}': {e}", source_path.display()))?;
    Ok(compile_source_with_config(&source, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_main_to_nonempty_assembly() {
        let result = compile_source("main {\n write(1);\n}\n");
        assert!(result.succeeded(), "{}", result.diagnostics.render());
        assert!(result.assembly.contains("entry"));
    }

    #[test]
    fn undeclared_variable_is_reported_and_skips_codegen() {
        let result = compile_source("main {\n x = 1;\n}\n");
        assert!(!result.succeeded());
        assert!(result.assembly.is_empty());
    }

    #[test]
    fn stop_on_error_skips_typecheck_after_a_symtab_error() {
        let src = "main {\n local x: integer;\n local x: float;\n x = 1.5;\n}\n";
        let stopped = compile_source_with_config(src, &CompilerConfig::new().with_stop_on_error(true));
        assert!(!stopped.succeeded());
        assert!(!stopped.diagnostics.iter().any(|d| d.phase == "typecheck"));

        let full_run = compile_source_with_config(src, &CompilerConfig::new().with_stop_on_error(false));
        assert!(!full_run.succeeded());
        assert!(full_run.diagnostics.iter().any(|d| d.phase == "typecheck"));
    }

    #[test]
    fn diagnostics_are_tagged_with_their_originating_phase() {
        let result = compile_source("main {\n x = 1;\n}\n");
        assert!(result.diagnostics.iter().any(|d| d.phase == "typecheck"));
    }

    #[test]
    fn ast_dump_reflects_parsed_structure() {
        let result = compile_source("main {\n write(1);\n}\n");
        assert!(result.ast_dump().contains("Write"));
    }
}
