//! API 错误类型
//!
//! 提供统一的错误类型和结构化错误报告。

use finch_core::{CompileError, HostContractViolation, InterpretError, RuntimeError, TraceFrame};
use serde::Serialize;
use thiserror::Error;

/// 嵌入守卫的误用
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    #[error("VM already created")]
    VmAlreadyCreated,
    #[error("No VM has been created")]
    NoVm,
}

/// Finch 错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinchError {
    /// 编译错误（语法、导入解析或加载）
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// 未处理的运行时错误
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// 嵌入 API 误用
    #[error("Host contract violation: {0}")]
    Host(#[from] HostContractViolation),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// 读取脚本文件失败
    #[error("Could not read '{path}': {message}")]
    Io { path: String, message: String },
}

impl From<InterpretError> for FinchError {
    fn from(err: InterpretError) -> Self {
        match err {
            InterpretError::Compile(e) => FinchError::Compile(e),
            InterpretError::Runtime(e) => FinchError::Runtime(e),
            InterpretError::Host(e) => FinchError::Host(e),
        }
    }
}

impl FinchError {
    /// 获取错误行号（如果有）
    ///
    /// 运行时错误取最内层帧的行号。
    pub fn line(&self) -> Option<usize> {
        match self {
            FinchError::Compile(e) => Some(e.line),
            FinchError::Runtime(e) => e.stack_trace.first().map(|frame| frame.line),
            _ => None,
        }
    }

    /// 出错的模块（如果有）
    pub fn module(&self) -> Option<&str> {
        match self {
            FinchError::Compile(e) => Some(&e.module),
            FinchError::Runtime(e) => e.stack_trace.first().map(|frame| frame.module.as_str()),
            _ => None,
        }
    }

    /// 获取错误阶段名称
    pub fn phase(&self) -> &'static str {
        match self {
            FinchError::Compile(_) => "compile",
            FinchError::Runtime(_) => "runtime",
            FinchError::Host(_) => "host",
            FinchError::Embed(_) => "embed",
            FinchError::Io { .. } => "io",
        }
    }

    /// 转换为结构化错误报告
    ///
    /// CLI 可以直接打印，上层应用可以序列化为 JSON。
    pub fn to_report(&self) -> ErrorReport {
        let (error_kind, message, stack_trace) = match self {
            FinchError::Compile(e) => ("CompileError".to_string(), e.message.clone(), Vec::new()),
            FinchError::Runtime(e) => (
                "RuntimeError".to_string(),
                e.message.clone(),
                e.stack_trace.iter().map(ReportFrame::from).collect(),
            ),
            FinchError::Host(e) => (variant_name(e), e.to_string(), Vec::new()),
            FinchError::Embed(e) => (format!("{e:?}"), e.to_string(), Vec::new()),
            FinchError::Io { message, .. } => ("IoError".to_string(), message.clone(), Vec::new()),
        };
        ErrorReport {
            phase: self.phase(),
            module: self.module().map(str::to_string),
            line: self.line(),
            error_kind,
            message,
            stack_trace,
        }
    }
}

/// `TypeMismatch { .. }` -> `TypeMismatch`
fn variant_name(err: &HostContractViolation) -> String {
    let debug = format!("{err:?}");
    debug
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_string()
}

/// 结构化错误报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// 错误阶段: compile, runtime, host, embed, io
    pub phase: &'static str,
    pub module: Option<String>,
    /// 1-based
    pub line: Option<usize>,
    /// 错误类型（可用于程序化处理）
    pub error_kind: String,
    /// 人类可读的错误消息
    pub message: String,
    /// 最内层帧在前
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<ReportFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFrame {
    pub module: String,
    pub line: usize,
    pub function: String,
}

impl From<&TraceFrame> for ReportFrame {
    fn from(frame: &TraceFrame) -> Self {
        Self {
            module: frame.module.clone(),
            line: frame.line,
            function: frame.function.clone(),
        }
    }
}

impl std::fmt::Display for ErrorReport {
    /// 默认的 CLI 友好格式
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.module, self.line) {
            (Some(module), Some(line)) => {
                write!(f, "[{} line {}] {} error: {}", module, line, self.phase, self.message)?
            }
            _ => write!(f, "{} error: {}", self.phase, self.message)?,
        }
        for frame in &self.stack_trace {
            write!(f, "\n  [{} line {}] in {}", frame.module, frame.line, frame.function)?;
        }
        Ok(())
    }
}

impl ErrorReport {
    /// 转换为 JSON 格式（Web API 使用）
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// 简洁格式（适合终端）
    pub fn to_short(&self) -> String {
        format!("{}: {}", self.phase, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime_error() -> FinchError {
        FinchError::Runtime(RuntimeError {
            message: "bad".to_string(),
            stack_trace: vec![
                TraceFrame {
                    module: "main".to_string(),
                    line: 3,
                    function: "A.boom()".to_string(),
                },
                TraceFrame {
                    module: "main".to_string(),
                    line: 6,
                    function: "(script)".to_string(),
                },
            ],
        })
    }

    #[test]
    fn test_compile_error_location() {
        let err = FinchError::from(CompileError::new("main", 2, "Expected expression."));
        assert_eq!(err.phase(), "compile");
        assert_eq!(err.line(), Some(2));
        assert_eq!(err.module(), Some("main"));
    }

    #[test]
    fn test_runtime_error_uses_innermost_frame() {
        let err = runtime_error();
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_interpret_error_conversion() {
        let err: FinchError = InterpretError::Host(HostContractViolation::NotACallHandle).into();
        assert!(matches!(err, FinchError::Host(HostContractViolation::NotACallHandle)));
        assert_eq!(err.line(), None);
    }

    #[test]
    fn test_embed_error_display() {
        let err = FinchError::from(EmbedError::VmAlreadyCreated);
        assert_eq!(err.to_string(), "VM already created");
        assert_eq!(err.to_report().error_kind, "VmAlreadyCreated");
    }

    #[test]
    fn test_host_error_kind_is_variant_name() {
        let err = FinchError::Host(HostContractViolation::TypeMismatch {
            index: 0,
            expected: "String",
            found: "Num",
        });
        let report = err.to_report();
        assert_eq!(report.error_kind, "TypeMismatch");
        assert_eq!(report.phase, "host");
    }

    #[test]
    fn test_error_report_display_with_trace() {
        let report = runtime_error().to_report();
        assert_eq!(
            report.to_string(),
            "[main line 3] runtime error: bad\n  [main line 3] in A.boom()\n  [main line 6] in (script)"
        );
    }

    #[test]
    fn test_error_report_display_without_location() {
        let report = FinchError::from(EmbedError::NoVm).to_report();
        assert_eq!(report.to_string(), "embed error: No VM has been created");
        assert_eq!(report.to_short(), "embed: No VM has been created");
    }

    #[test]
    fn test_error_report_to_json() {
        let report = runtime_error().to_report();
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["phase"], "runtime");
        assert_eq!(value["line"], 3);
        assert_eq!(value["error_kind"], "RuntimeError");
        assert_eq!(value["stack_trace"][0]["function"], "A.boom()");
    }

    #[test]
    fn test_error_report_to_json_null_values() {
        let report = FinchError::from(EmbedError::NoVm).to_report();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"line\":null"));
        assert!(json.contains("\"module\":null"));
        assert!(!json.contains("stack_trace"));
    }

    #[test]
    fn test_json_escapes_special_chars() {
        let err = FinchError::from(CompileError::new("main", 1, "Unexpected \"\n\"."));
        let json = err.to_report().to_json().unwrap();
        assert!(json.contains(r#"Unexpected \"\n\"."#));
    }
}
