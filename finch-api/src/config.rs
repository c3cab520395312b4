//! API 层配置
//!
//! 包含执行配置 RunConfig 和全局单例（供 CLI 使用）

use crate::loader::ModuleLoader;
use finch_config::{CompilerConfig, HeapConfig, LimitConfig};
use finch_core::Configuration;
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Execution configuration
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Garbage collector sizing
    pub heap: HeapConfig,
    /// Execution limits
    pub limits: LimitConfig,
    /// Compiler configuration
    pub compiler: CompilerConfig,
    /// Directories searched for imported modules, in order
    pub module_paths: Vec<PathBuf>,
    /// Collect script output into `ExecuteOutput::stdout` instead of printing it
    pub capture_output: bool,
}

impl RunConfig {
    /// Build a core `Configuration` wired to the filesystem loader
    ///
    /// Script output goes to `sink` when given, otherwise to stdout.
    pub fn to_configuration(&self, sink: Option<Arc<Mutex<String>>>) -> Configuration {
        let loader = ModuleLoader::new(self.module_paths.clone());
        let config = Configuration {
            heap: self.heap.clone(),
            limits: self.limits.clone(),
            compiler: self.compiler.clone(),
            ..Configuration::default()
        };
        let config = match sink {
            Some(sink) => config.with_write_fn(move |text| {
                if let Ok(mut buffer) = sink.lock() {
                    buffer.push_str(text);
                }
            }),
            None => config.with_write_fn(|text| {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }),
        };
        // 错误以 FinchError 返回给调用方，诊断只记调试日志
        let config = config.with_error_fn(|diagnostic| {
            debug!(
                target: "finch::vm",
                kind = ?diagnostic.kind,
                module = %diagnostic.module,
                line = diagnostic.line,
                "{}",
                diagnostic.message
            )
        });
        loader.install(config)
    }
}

// Global config singleton for CLI convenience
static GLOBAL_CONFIG: OnceCell<RunConfig> = OnceCell::new();

/// Initialize global configuration
///
/// Returns the rejected config if one was already installed.
pub fn init(config: RunConfig) -> Result<(), RunConfig> {
    GLOBAL_CONFIG.set(config)
}

/// Get global config reference, installing the default on first use
pub fn config() -> &'static RunConfig {
    GLOBAL_CONFIG.get_or_init(RunConfig::default)
}

/// Check if config is initialized
pub fn is_initialized() -> bool {
    GLOBAL_CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_run_config() {
        let cfg = RunConfig::default();
        assert!(!cfg.capture_output);
        assert!(cfg.module_paths.is_empty());
        assert_eq!(cfg.limits.max_recursion_depth, 1024);
        assert!(!cfg.heap.stress);
    }

    #[test]
    fn test_to_configuration_carries_sizing() {
        let cfg = RunConfig {
            heap: HeapConfig {
                initial_heap_size: 2048,
                ..HeapConfig::default()
            },
            ..RunConfig::default()
        };
        let core = cfg.to_configuration(None);
        assert_eq!(core.heap.initial_heap_size, 2048);
        assert!(core.write_fn.is_some());
        assert!(core.load_module_fn.is_some());
        assert!(core.resolve_module_fn.is_some());
        assert!(core.error_fn.is_some());
    }

    #[test]
    fn test_global_config_defaults_on_first_use() {
        // 全局状态：只检查读取后一定已初始化
        let _ = config();
        assert!(is_initialized());
        assert!(init(RunConfig::default()).is_err());
    }
}
