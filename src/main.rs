//! LeakGuard - checks that every acquired handle is released on every path
//!
//! # Usage
//!
//! ```bash
//! # Check a directory of .lg files with leakguard.toml from the working directory
//! leakguard check src/
//!
//! # Another paired resource, JSON output
//! leakguard check --acquire Mutex.lock --handle-type Guard --release unlock --format json src/
//!
//! # List the codes findings and errors are printed with
//! leakguard codes
//! ```
//!
//! Exit status: 0 when clean, 1 when a handle is not released on every path,
//! 2 on configuration, usage or parse errors.

use std::path::{Path, PathBuf};
use std::process;

use checker::compilation::SOURCE_EXTENSION;
use checker::config::CONFIG_FILE_NAME;
use checker::error_codes::{error_registry, format_error_code};
use checker::report::{to_diagnostics, to_json};
use checker::{
    AnalysisEngine, CommentSuppressions, CompilationUnit, ConfigOverrides, ConfigurationError,
    LeakGuardConfig, Reporter,
};
use clap::{Parser, Subcommand, ValueEnum};
use diagnostics::ErrorFormatter;
use log::{debug, info, warn};
use walkdir::WalkDir;

const EXIT_CLEAN: i32 = 0;
const EXIT_FINDINGS: i32 = 1;
const EXIT_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "leakguard")]
#[command(version = "0.1.0")]
#[command(about = "LeakGuard - checks that acquired handles are released on every path", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check source files and directories
    Check {
        /// Files or directories; directories are searched for .lg files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Configuration file (defaults to ./leakguard.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Worker threads (0 = one per core)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Analyze every file, even those that never mention the handle
        #[arg(long)]
        all_files: bool,

        /// Acquire call pattern, `Type.method` or a bare name
        #[arg(long)]
        acquire: Option<String>,

        /// Handle type name
        #[arg(long)]
        handle_type: Option<String>,

        /// Module declaring the handle type
        #[arg(long)]
        handle_module: Option<String>,

        /// Release method name
        #[arg(long)]
        release: Option<String>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// List error codes
    Codes,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

struct CheckOptions {
    paths: Vec<PathBuf>,
    config: Option<PathBuf>,
    format: OutputFormat,
    overrides: ConfigOverrides,
    no_color: bool,
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Check {
            paths,
            config,
            format,
            jobs,
            all_files,
            acquire,
            handle_type,
            handle_module,
            release,
            no_color,
            verbose,
        } => {
            if verbose {
                checker::logging::init_with_level(log::LevelFilter::Debug);
            } else {
                checker::logging::init();
            }
            let overrides = ConfigOverrides {
                acquire,
                handle_type,
                handle_module,
                release,
                jobs,
                skip_unrelated_files: all_files.then_some(false),
            };
            check(CheckOptions {
                paths,
                config,
                format,
                overrides,
                no_color,
            })
        }
        Commands::Codes => {
            list_codes();
            EXIT_CLEAN
        }
    };

    process::exit(code);
}

fn check(options: CheckOptions) -> i32 {
    let config = match load_config(options.config.as_deref(), &options.overrides) {
        Ok(config) => config,
        Err(e) => return configuration_failure(&e),
    };
    debug!(
        "Checking `{}` handles acquired by `{}` and released by `{}`",
        config.capability.handle_type, config.capability.acquire, config.capability.release_method
    );

    let files = match discover_files(&options.paths) {
        Ok(files) => files,
        Err(message) => {
            eprintln!("error: {}", message);
            return EXIT_ERROR;
        }
    };
    if files.is_empty() {
        eprintln!("error: no .{} files found", SOURCE_EXTENSION);
        return EXIT_ERROR;
    }
    info!("Checking {} files", files.len());

    let mut unit = CompilationUnit::new();
    for file in &files {
        if let Err(e) = unit.add_file_from_path(file) {
            // Parse failures are rendered with the other diagnostics below
            if let checker::FrontendError::Io { .. } = e {
                eprintln!("error: {}", e);
            }
        }
    }
    let output = unit.lower();
    let frontend_failed = output.has_errors();
    let program = output.program;

    let formatter = if options.no_color {
        ErrorFormatter::new()
    } else {
        ErrorFormatter::with_colors()
    };
    if !output.diagnostics.is_empty() {
        eprintln!("{}", formatter.format_diagnostics(&output.diagnostics, &program.source_map));
    }

    let engine = match AnalysisEngine::new(config.capability.clone(), &program, config.analysis.clone()) {
        Ok(engine) => engine,
        Err(e) => return configuration_failure(&e),
    };
    let results = engine.run();

    let suppressions = CommentSuppressions::from_source_map(&program.source_map);
    let reporter = Reporter::new(config.checker_name.as_str(), &suppressions);
    let findings = reporter.finalize(results.findings);

    match options.format {
        OutputFormat::Text => {
            if !findings.is_empty() {
                println!(
                    "{}",
                    formatter.format_diagnostics(&to_diagnostics(&findings), &program.source_map)
                );
            }
            let correctness = findings.iter().filter(|f| f.kind.is_correctness()).count();
            println!(
                "{}: {} functions checked, {} unreleased handles, {} notices",
                reporter.checker_name(),
                results.metrics.functions_analyzed,
                correctness,
                findings.len() - correctness
            );
        }
        OutputFormat::Json => match to_json(&findings, &program.source_map) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: failed to serialize findings: {}", e);
                return EXIT_ERROR;
            }
        },
    }

    if frontend_failed {
        EXIT_ERROR
    } else if findings.iter().any(|f| f.kind.is_correctness()) {
        EXIT_FINDINGS
    } else {
        EXIT_CLEAN
    }
}

/// `--config`, else `leakguard.toml` in the working directory, else defaults
fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<LeakGuardConfig, ConfigurationError> {
    let default_path = Path::new(CONFIG_FILE_NAME);
    let path = match path {
        Some(path) => Some(path),
        None if default_path.is_file() => Some(default_path),
        None => None,
    };
    if let Some(path) = path {
        debug!("Loading configuration from {}", path.display());
    }
    LeakGuardConfig::load(path, overrides)
}

fn configuration_failure(error: &ConfigurationError) -> i32 {
    eprintln!("error[{}]: {}", format_error_code(error.code()), error);
    EXIT_ERROR
}

/// Explicit files as given, directories searched for source files in name order
fn discover_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(format!("path not found: {}", path.display()));
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let is_source = entry.file_type().is_file()
                && entry.path().extension().and_then(|ext| ext.to_str()) == Some(SOURCE_EXTENSION);
            if is_source {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn list_codes() {
    for code in error_registry().get_range(0, 9999) {
        println!("{}", code);
        if let Some(help) = code.help {
            println!("    help: {}", help);
        }
    }
}
