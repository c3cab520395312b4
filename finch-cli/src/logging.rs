//! CLI 日志系统初始化
//!
//! 基于 `tracing-subscriber` 实现分阶段日志控制。日志写到 stderr，
//! stdout 留给脚本输出。

use crate::config::LogConfig;
use finch_config::Phase;
use std::io;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// 日志输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// 彩色格式化（开发使用）
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式（工具集成）
    Json,
}

/// 每个阶段一个 target
pub fn targets(log_config: &LogConfig) -> Targets {
    Phase::ALL
        .into_iter()
        .fold(Targets::new().with_default(log_config.global), |targets, phase| {
            targets.with_target(phase.target(), log_config.level_for(phase))
        })
        .with_target("finch::cli", log_config.global)
}

/// 使用指定格式和日志配置初始化日志系统
pub fn init(log_config: &LogConfig, format: LogFormat) {
    let layer = create_format_layer(format, io::stderr).with_filter(targets(log_config));
    // 测试或重复调用时可能已经装过全局 subscriber
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// Create formatter layer based on format
fn create_format_layer<W, F>(format: LogFormat, make_writer: F) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: io::Write + 'static,
    F: Fn() -> W + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(make_writer)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;
    use tracing::Level;

    #[test]
    fn test_targets_follow_phase_overrides() {
        let config = LogConfig {
            global: LevelFilter::WARN,
            phases: vec![(Phase::Gc, LevelFilter::TRACE)],
        };
        let targets = targets(&config);
        assert!(targets.would_enable("finch::gc", &Level::TRACE));
        assert!(!targets.would_enable("finch::vm", &Level::INFO));
        assert!(targets.would_enable("finch::vm", &Level::WARN));
        assert!(!targets.would_enable("finch::module", &Level::DEBUG));
    }

    #[test]
    fn test_silent_disables_everything() {
        let config = LogConfig {
            global: LevelFilter::OFF,
            phases: Vec::new(),
        };
        let targets = targets(&config);
        assert!(!targets.would_enable("finch::compiler", &Level::ERROR));
        assert!(!targets.would_enable("other", &Level::ERROR));
    }
}
