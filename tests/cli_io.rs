//! File-based entry points: `compile_file` and `CompilerConfig::from_toml`
//! loaded from an actual file on disk, as the CLI's `build`/`check`/`--config`
//! flags use them.

use std::io::Write;

use toyc::CompilerConfig;

#[test]
fn compile_file_reads_and_compiles_a_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "main {{\n write(1);\n}}\n").unwrap();

    let result = toyc::compile_file(file.path()).expect("file should be readable");
    assert!(result.succeeded(), "{}", result.diagnostics.render());
    assert!(!result.assembly.is_empty());
}

#[test]
fn compile_file_with_config_honors_a_toml_config_file() {
    let mut source = tempfile::NamedTempFile::new().unwrap();
    writeln!(source, "main {{\n local x: integer;\n local x: float;\n x = 1.5;\n}}\n").unwrap();

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(config_file, "stop_on_error = true\n").unwrap();
    let config_text = std::fs::read_to_string(config_file.path()).unwrap();
    let config = CompilerConfig::from_toml(&config_text).unwrap();

    let result = toyc::compile_file_with_config(source.path(), &config).unwrap();
    assert!(!result.succeeded());
    assert!(!result.diagnostics.iter().any(|d| d.phase == "typecheck"));
}

#[test]
fn compile_file_reports_an_error_for_a_missing_path() {
    let missing = std::path::Path::new("/nonexistent/does-not-exist.toy");
    assert!(toyc::compile_file(missing).is_err());
}
