//! Finch Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It serves as the shared configuration vocabulary across all Finch crates.

use serde::Deserialize;

/// Configuration for compiler behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Whether to emit debug information (line tables, disassembly logs)
    pub emit_debug_info: bool,
}

/// Configuration for execution limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Maximum value stack size per fiber
    pub max_stack_size: usize,
    /// Maximum call depth per fiber
    pub max_recursion_depth: usize,
}

/// Garbage collector sizing policy
///
/// The first collection happens once `initial_heap_size` bytes are live.
/// After each collection the next threshold is
/// `max(min_heap_size, live * (100 + heap_growth_percent) / 100)`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    /// 0 means "grow just enough for the allocation that triggered the collection"
    pub heap_growth_percent: usize,
    /// Collect before every allocation (debugging aid)
    pub stress: bool,
}

/// Execution phase enum for phase-specific configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lexer,
    Parser,
    Compiler,
    Vm,
    Gc,
    Module,
    Foreign,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Lexer,
        Phase::Parser,
        Phase::Compiler,
        Phase::Vm,
        Phase::Gc,
        Phase::Module,
        Phase::Foreign,
    ];

    /// Get the string name of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Compiler => "compiler",
            Phase::Vm => "vm",
            Phase::Gc => "gc",
            Phase::Module => "module",
            Phase::Foreign => "foreign",
        }
    }

    /// Get the log target name for this phase
    pub fn target(&self) -> String {
        format!("finch::{}", self.as_str())
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            emit_debug_info: true,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_stack_size: 1024 * 64,
            max_recursion_depth: 1024,
        }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_heap_size: 10 * 1024 * 1024,
            min_heap_size: 1024 * 1024,
            heap_growth_percent: 50,
            stress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_compiler_config() {
        let cfg = CompilerConfig::default();
        assert!(cfg.emit_debug_info);
    }

    #[test]
    fn test_default_limit_config() {
        let cfg = LimitConfig::default();
        assert_eq!(cfg.max_stack_size, 65536);
        assert_eq!(cfg.max_recursion_depth, 1024);
    }

    #[test]
    fn test_default_heap_config() {
        let cfg = HeapConfig::default();
        assert_eq!(cfg.initial_heap_size, 10 * 1024 * 1024);
        assert_eq!(cfg.min_heap_size, 1024 * 1024);
        assert_eq!(cfg.heap_growth_percent, 50);
        assert!(!cfg.stress);
    }

    #[test]
    fn test_phase_as_str() {
        assert_eq!(Phase::Lexer.as_str(), "lexer");
        assert_eq!(Phase::Vm.target(), "finch::vm");
        assert_eq!(Phase::Gc.target(), "finch::gc");
    }

    #[test]
    fn test_heap_config_partial_json() {
        let cfg: HeapConfig =
            serde_json::from_str(r#"{"heap_growth_percent": 0}"#).unwrap();
        assert_eq!(cfg.heap_growth_percent, 0);
        assert_eq!(cfg.min_heap_size, 1024 * 1024);
    }

    #[test]
    fn test_phase_deserialize() {
        let phase: Phase = serde_json::from_str(r#""module""#).unwrap();
        assert_eq!(phase, Phase::Module);
    }
}
