//! 错误类型
//!
//! 编译错误与运行时错误通过 `InterpretError` 返回给宿主；
//! 嵌入 API 的误用统一为 `HostContractViolation`。

use thiserror::Error;

/// 编译失败（语法错误、导入解析或加载失败）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{module} line {line}] [Error] {message}")]
pub struct CompileError {
    pub module: String,
    pub line: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(module: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            line,
            message: message.into(),
        }
    }
}

/// 栈追踪中的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub module: String,
    pub line: usize,
    pub function: String,
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} line {}] in {}", self.module, self.line, self.function)
    }
}

/// 未被处理的运行时错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// 最内层帧在前
    pub stack_trace: Vec<TraceFrame>,
}

/// `interpret` / `call` 的失败结果
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// 宿主误用 API（例如对无效句柄调用 `call`）
    #[error(transparent)]
    Host(#[from] HostContractViolation),
}

/// 嵌入 API 的误用
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostContractViolation {
    #[error("No slot window is active.")]
    NoSlotWindow,
    #[error("Slot {index} is out of range (window has {count} slots).")]
    SlotOutOfRange { index: usize, count: usize },
    #[error("Slot {index} holds {found}, expected {expected}.")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Handle is invalid or has been released.")]
    InvalidHandle,
    #[error("Handle is not a call handle.")]
    NotACallHandle,
    #[error("Invalid method signature '{0}'.")]
    InvalidSignature(String),
    #[error("Module '{0}' is not loaded.")]
    UnknownModule(String),
    #[error("Module '{module}' has no variable named '{name}'.")]
    UnknownVariable { module: String, name: String },
    #[error("Index {index} is out of bounds for a list of {count} elements.")]
    IndexOutOfBounds { index: i64, count: usize },
    #[error("Slot {index} is not a class.")]
    NotAClass { index: usize },
    #[error("Class '{0}' is not a foreign class.")]
    NotForeignClass(String),
    #[error("Foreign object in slot {index} does not hold the requested type.")]
    ForeignTypeMismatch { index: usize },
    #[error("Map key in slot {index} is not hashable.")]
    UnhashableKey { index: usize },
    #[error("Bytes are not valid UTF-8.")]
    InvalidUtf8,
}

/// 外部方法返回的失败，按运行时错误处理
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ForeignError(pub String);

impl From<&str> for ForeignError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ForeignError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<HostContractViolation> for ForeignError {
    fn from(err: HostContractViolation) -> Self {
        Self(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::new("main", 3, "Expected expression.");
        assert_eq!(err.to_string(), "[main line 3] [Error] Expected expression.");
    }

    #[test]
    fn test_trace_frame_display() {
        let frame = TraceFrame {
            module: "main".into(),
            line: 2,
            function: "Foo.bar(_)".into(),
        };
        assert_eq!(frame.to_string(), "[main line 2] in Foo.bar(_)");
    }

    #[test]
    fn test_interpret_error_from() {
        let err: InterpretError = CompileError::new("m", 1, "x").into();
        assert!(matches!(err, InterpretError::Compile(_)));
    }

    #[test]
    fn test_foreign_error_from_violation() {
        let err: ForeignError = HostContractViolation::NoSlotWindow.into();
        assert_eq!(err.0, "No slot window is active.");
    }
}
