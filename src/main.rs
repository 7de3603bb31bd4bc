//! toyc - whole-program compiler CLI
//!
//! Compiles a `.toy` source file to target assembly, or runs the checker
//! alone and reports diagnostics.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use toyc::{CompileResult, CompilerConfig};

#[derive(ClapParser)]
#[command(name = "toyc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiles a small class-based imperative language to stack-machine assembly", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv). `RUST_LOG` takes precedence if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to assembly.
    Build {
        /// Input source file.
        input: PathBuf,

        /// Output assembly path (defaults to the input filename with `.s`).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a textual AST dump next to the output (`.ast.txt`).
        #[arg(long)]
        keep_ast: bool,

        /// TOML config file (register pool policy, stop-on-error, comments).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Diagnostics report format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Type-check a source file without generating assembly.
    Check {
        /// Input source file.
        input: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match cli.command {
        Commands::Build { input, output, keep_ast, config, format } => {
            let output = output.unwrap_or_else(|| input.with_extension("s"));
            run_build(&input, &output, keep_ast, config.as_deref(), format)
        }
        Commands::Check { input, config, format } => run_check(&input, config.as_deref(), format),
        Commands::Completions { shell } => {
            run_completions(shell);
            0
        }
    };
    process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("toyc={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "toyc", &mut io::stdout());
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig, String> {
    match path {
        None => Ok(CompilerConfig::default()),
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
            CompilerConfig::from_toml(&text)
        }
    }
}

fn run_build(input: &Path, output: &Path, keep_ast: bool, config_path: Option<&Path>, format: OutputFormat) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let source = match fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", input.display());
            return 1;
        }
    };

    let result = toyc::compile_source_with_config(&source, &config);
    report_diagnostics(&result, format);

    if !result.succeeded() {
        return 1;
    }

    if let Err(e) = fs::write(output, &result.assembly) {
        eprintln!("Error writing '{}': {e}", output.display());
        return 1;
    }
    println!("Compiled {} -> {}", input.display(), output.display());

    if keep_ast {
        let ast_path = output.with_extension("ast.txt");
        if let Err(e) = fs::write(&ast_path, result.ast_dump()) {
            eprintln!("Error writing '{}': {e}", ast_path.display());
            return 1;
        }
        println!("AST dump saved to {}", ast_path.display());
    }

    0
}

fn run_check(input: &Path, config_path: Option<&Path>, format: OutputFormat) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return 1;
        }
    };

    let source = match fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {e}", input.display());
            return 1;
        }
    };

    let result = toyc::compile_source_with_config(&source, &config);
    report_diagnostics(&result, format);

    if result.succeeded() {
        println!("No errors");
        0
    } else {
        1
    }
}

fn report_diagnostics(result: &CompileResult, format: OutputFormat) {
    if result.diagnostics.is_empty() {
        return;
    }
    match format {
        OutputFormat::Text => eprintln!("{}", result.diagnostics.render()),
        OutputFormat::Json => {
            let items = result.diagnostics.sorted();
            match serde_json::to_string_pretty(&items) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Error rendering diagnostics as JSON: {e}"),
            }
        }
    }
}
