//! Finch 运行时
//!
//! 字节码、堆、对象模型、虚拟机与核心库。

// ==================== 数据层 ====================

/// 字节码与指令
pub mod bytecode;

/// 宿主配置与回调
pub mod config;

/// 错误类型
pub mod error;

/// 分代索引堆与垃圾回收
pub mod heap;

/// 堆对象
pub mod object;

/// 方法签名符号表
pub mod symbol;

/// 运行时值
pub mod value;

// ==================== 执行层 ====================

/// 核心库（内建类与原生方法）
mod corelib;

/// 虚拟机
pub mod vm;

pub use config::{Configuration, Diagnostic, DiagnosticKind, LoadedModule};
pub use error::{CompileError, ForeignError, HostContractViolation, InterpretError, RuntimeError, TraceFrame};
pub use value::{ObjRef, Value};
pub use vm::{Handle, SlotType, Vm};
