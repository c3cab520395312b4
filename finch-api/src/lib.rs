//! Finch API - Execution orchestration layer
//!
//! Provides unified execution interface, including:
//! - Execution flow orchestration (`run`, `run_file`)
//! - Configuration abstraction (RunConfig) with a filesystem module loader
//! - Unified error handling (FinchError, ErrorReport)
//! - The single-VM embedding guard (`embed`)
//!
//! For CLI convenience, this crate provides a global config singleton.
//! For library use, prefer the explicit `run(source, &config)` API.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use finch_core::Vm;

pub mod config;
pub use config::{config as get_config, init as init_config, is_initialized, RunConfig};

pub mod embed;
pub use embed::{free_vm, interpret, new_vm, with_vm};

pub mod error;
pub use error::{EmbedError, ErrorReport, FinchError, ReportFrame};

pub mod loader;
pub use loader::ModuleLoader;

pub mod types;
pub use types::ExecuteOutput;

// Re-export core types
pub use finch_config;
pub use finch_core::{CompileError, Configuration, InterpretError, Phase, RuntimeError, Value};

/// Name of the entry module for `run` and `run_file`
pub const MAIN_MODULE: &str = "main";

/// Execute with explicit configuration
///
/// This is the recommended API for library users.
pub fn run(source: &str, config: &RunConfig) -> Result<ExecuteOutput, FinchError> {
    info!(target: "finch::vm", "Starting execution");

    let sink = config.capture_output.then(|| Arc::new(Mutex::new(String::new())));
    let mut vm = Vm::new(config.to_configuration(sink.clone()));
    let result = vm.interpret(MAIN_MODULE, source);

    let modules = vm.module_names();
    debug!(target: "finch::vm", modules = modules.len(), "execution finished");
    result?;

    let mut stdout = String::new();
    if let Some(buffer) = &sink {
        if let Ok(text) = buffer.lock() {
            stdout.push_str(&text);
        }
    }
    info!(target: "finch::vm", "Execution completed");
    Ok(ExecuteOutput { stdout, modules })
}

/// Read a script file and run it
///
/// The file's directory is searched for imports before `config.module_paths`.
pub fn run_file(path: &Path, config: &RunConfig) -> Result<ExecuteOutput, FinchError> {
    let source = std::fs::read_to_string(path).map_err(|err| FinchError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;

    let mut config = config.clone();
    if let Some(dir) = path.parent() {
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        config.module_paths.insert(0, dir.to_path_buf());
    }
    run(&source, &config)
}

/// Compile and run (uses global config)
pub fn compile_and_run(source: &str) -> Result<ExecuteOutput, FinchError> {
    run(source, get_config())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn captured() -> RunConfig {
        RunConfig {
            capture_output: true,
            ..RunConfig::default()
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("finch-api-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_run_captures_output() {
        let output = run("System.print(1 + 2)", &captured()).unwrap();
        assert_eq!(output.stdout, "3\n");
        assert_eq!(output.modules, vec!["main".to_string()]);
    }

    #[test]
    fn test_run_reports_compile_error() {
        let err = run("var x = (", &captured()).unwrap_err();
        assert_eq!(err.phase(), "compile");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_run_reports_runtime_error_with_trace() {
        let err = run("class A {\n  static go() { Fiber.abort(\"nope\") }\n}\nA.go()", &captured()).unwrap_err();
        let report = err.to_report();
        assert_eq!(report.phase, "runtime");
        assert_eq!(report.message, "nope");
        assert_eq!(report.line, Some(2));
        assert_eq!(report.stack_trace[0].function, "A.go()");
    }

    #[test]
    fn test_run_file_imports_siblings() {
        let dir = temp_dir("siblings");
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/greet.finch"), "import \"./names\" for Who\nvar Greeting = \"hello \" + Who").unwrap();
        fs::write(dir.join("lib/names.wren"), "var Who = \"world\"").unwrap();
        fs::write(dir.join("main.finch"), "import \"lib/greet\" for Greeting\nSystem.print(Greeting)").unwrap();

        let output = run_file(&dir.join("main.finch"), &captured()).unwrap();
        assert_eq!(output.stdout, "hello world\n");
        assert_eq!(output.modules, vec!["lib/greet".to_string(), "lib/names".to_string(), "main".to_string()]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_run_file_missing_is_io_error() {
        let err = run_file(Path::new("/definitely/not/here.finch"), &captured()).unwrap_err();
        assert!(matches!(err, FinchError::Io { .. }));
        assert_eq!(err.phase(), "io");
    }

    #[test]
    fn test_missing_import_is_compile_error() {
        let err = run("import \"nowhere\"", &captured()).unwrap_err();
        assert_eq!(err.phase(), "compile");
        assert!(err.to_string().contains("nowhere"));
    }
}
