//! Finch CLI - Command line interface
//!
//! Runs a single script, or a project described by `finch.json`.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info};

mod config;
mod logging;
mod platform;

use crate::config::{parse_log_level, LogConfig, ProjectFile};
use crate::logging::LogFormat;
use crate::platform::print_error;
use finch_api::{init_config, run_file, FinchError, RunConfig};

/// Exit status for compile errors (EX_DATAERR)
const EXIT_COMPILE_ERROR: i32 = 65;
/// Exit status for runtime errors (EX_SOFTWARE)
const EXIT_RUNTIME_ERROR: i32 = 70;
/// Exit status for unreadable input (EX_NOINPUT)
const EXIT_NO_INPUT: i32 = 66;

#[derive(Parser)]
#[command(name = "finch", about = "Finch scripting language", version)]
struct Cli {
    /// Script file, or project file (default: ./finch.json)
    #[arg(value_name = "PATH", default_value = "finch.json")]
    path: PathBuf,

    /// Extra directory to search for imported modules (repeatable)
    #[arg(short = 'I', long = "module-path", value_name = "DIR")]
    module_paths: Vec<PathBuf>,

    /// Log level: silent, error, warn, info, debug, trace
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Print errors as one-line JSON reports
    #[arg(long)]
    json_errors: bool,

    /// Collect garbage before every allocation
    #[arg(long)]
    stress_gc: bool,
}

fn main() {
    let cli = Cli::parse();

    let (entry, mut run_config, mut log_config) = match load_invocation(&cli.path) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Some(level) = &cli.log_level {
        match parse_log_level(level) {
            Some(level) => log_config.global = level,
            None => {
                eprintln!("Error: unknown log level '{level}'");
                process::exit(1);
            }
        }
    }
    logging::init(&log_config, cli.log_format);

    run_config.module_paths.extend(cli.module_paths);
    run_config.heap.stress |= cli.stress_gc;

    // Initialize API config (global singleton for convenience)
    if init_config(run_config.clone()).is_err() {
        debug!(target: "finch::cli", "global config already initialized");
    }

    info!(target: "finch::cli", entry = %entry.display(), "running");
    if let Err(e) = run_file(&entry, &run_config) {
        let source = std::fs::read_to_string(&entry).unwrap_or_default();
        print_error(&e, &source, cli.json_errors);
        process::exit(exit_code(&e));
    }
}

/// 脚本路径直接运行；`.json` 按项目文件解析
fn load_invocation(path: &Path) -> Result<(PathBuf, RunConfig, LogConfig), String> {
    let is_project = path.extension().is_some_and(|ext| ext == "json");
    if !is_project {
        return Ok((path.to_path_buf(), RunConfig::default(), LogConfig::default()));
    }

    let project = ProjectFile::read(path)?;
    Ok((project.entry_path(path), project.run_config(path), project.log_config()?))
}

fn exit_code(e: &FinchError) -> i32 {
    match e {
        FinchError::Compile(_) => EXIT_COMPILE_ERROR,
        FinchError::Runtime(_) | FinchError::Host(_) => EXIT_RUNTIME_ERROR,
        FinchError::Io { .. } => EXIT_NO_INPUT,
        FinchError::Embed(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_core::{CompileError, RuntimeError};

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CompileError::new("main", 1, "x").into()), 65);
        let runtime = RuntimeError {
            message: "x".to_string(),
            stack_trace: Vec::new(),
        };
        assert_eq!(exit_code(&runtime.into()), 70);
    }

    #[test]
    fn test_script_path_runs_directly() {
        let (entry, run, log) = load_invocation(Path::new("scripts/hello.finch")).unwrap();
        assert_eq!(entry, PathBuf::from("scripts/hello.finch"));
        assert!(run.module_paths.is_empty());
        assert_eq!(log.global, tracing::level_filters::LevelFilter::WARN);
    }

    #[test]
    fn test_missing_project_file() {
        let err = load_invocation(Path::new("/no/such/finch.json")).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["finch", "main.finch", "-I", "lib", "--log-format", "json", "--json-errors"]);
        assert_eq!(cli.path, PathBuf::from("main.finch"));
        assert_eq!(cli.module_paths, vec![PathBuf::from("lib")]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.json_errors);
        assert!(!cli.stress_gc);
    }
}
