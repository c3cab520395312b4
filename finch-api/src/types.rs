//! API 类型定义

/// 执行输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOutput {
    /// 捕获的脚本输出（仅在 `capture_output` 时填充）
    pub stdout: String,
    /// 执行结束时加载过的模块，按字母序
    pub modules: Vec<String>,
}
