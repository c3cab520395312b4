//! CLI 配置
//!
//! `finch.json` 项目文件与日志级别

use finch_api::RunConfig;
use finch_config::{HeapConfig, LimitConfig, Phase};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

/// finch.json 结构
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProjectFile {
    /// 入口文件路径（相对于 finch.json 所在目录）
    pub entry: String,
    pub heap: Option<HeapConfig>,
    pub limits: Option<LimitConfig>,
    /// 额外的模块搜索目录（相对于 finch.json 所在目录）
    pub module_paths: Vec<String>,
    /// 全局日志级别: "silent", "error", "warn", "info", "debug", "trace"
    pub log_level: Option<String>,
    /// 按阶段覆盖日志级别，例如 `{"gc": "debug"}`
    pub log: HashMap<String, String>,
}

impl ProjectFile {
    /// Read and parse finch.json
    pub fn read(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Err(format!(
                "'{}' not found\n\nThe current directory is not a Finch project.\nHint: create '{}' with an 'entry' field, or pass a script path",
                path.display(),
                path.display()
            ));
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Cannot read '{}': {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("Failed to parse '{}': {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let project: ProjectFile = serde_json::from_str(content).map_err(|e| e.to_string())?;
        if project.entry.is_empty() {
            return Err("the 'entry' field must not be empty".to_string());
        }
        Ok(project)
    }

    /// Resolve entry file path relative to the project directory
    pub fn entry_path(&self, project_path: &Path) -> PathBuf {
        project_dir(project_path).join(&self.entry)
    }

    pub fn run_config(&self, project_path: &Path) -> RunConfig {
        let base = project_dir(project_path);
        RunConfig {
            heap: self.heap.clone().unwrap_or_default(),
            limits: self.limits.clone().unwrap_or_default(),
            module_paths: self.module_paths.iter().map(|p| base.join(p)).collect(),
            ..RunConfig::default()
        }
    }

    pub fn log_config(&self) -> Result<LogConfig, String> {
        let mut config = LogConfig::default();
        if let Some(level) = &self.log_level {
            config.global = parse_log_level(level).ok_or_else(|| format!("unknown log level '{level}'"))?;
        }
        for (phase, level) in &self.log {
            let phase = Phase::ALL
                .into_iter()
                .find(|p| p.as_str() == phase)
                .ok_or_else(|| format!("unknown log phase '{phase}'"))?;
            let level = parse_log_level(level).ok_or_else(|| format!("unknown log level '{level}'"))?;
            config.phases.push((phase, level));
        }
        Ok(config)
    }
}

fn project_dir(project_path: &Path) -> &Path {
    project_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// CLI 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: LevelFilter,
    /// 按阶段覆盖，后出现的优先
    pub phases: Vec<(Phase, LevelFilter)>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: LevelFilter::WARN,
            phases: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Get log level for a specific phase
    pub fn level_for(&self, phase: Phase) -> LevelFilter {
        self.phases
            .iter()
            .rev()
            .find(|(p, _)| *p == phase)
            .map(|(_, level)| *level)
            .unwrap_or(self.global)
    }
}

/// Parse log level string
pub fn parse_log_level(s: &str) -> Option<LevelFilter> {
    match s.to_lowercase().as_str() {
        "silent" | "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}
