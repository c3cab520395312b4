//! VM 配置：宿主回调与资源限制

use crate::runtime::heap::ReallocateFn;
use crate::runtime::object::{ForeignClassMethods, ForeignMethodFn};
use finch_config::{CompilerConfig, HeapConfig, LimitConfig};
use std::fmt;

/// 错误输出的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Compile,
    Runtime,
    StackTrace,
}

/// 交给错误回调的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub module: String,
    pub line: usize,
    pub message: String,
}

/// 模块加载结果
pub struct LoadedModule {
    pub source: String,
    /// 该模块编译结束后调用一次（无论成功与否）
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl LoadedModule {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            on_complete: None,
        }
    }

    pub fn with_on_complete(mut self, on_complete: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(on_complete));
        self
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("source_len", &self.source.len())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

pub type WriteFn = Box<dyn FnMut(&str) + Send>;
pub type ErrorFn = Box<dyn FnMut(&Diagnostic) + Send>;
/// (导入者, 名字) -> 规范名
pub type ResolveModuleFn = Box<dyn FnMut(&str, &str) -> Option<String> + Send>;
pub type LoadModuleFn = Box<dyn FnMut(&str) -> Option<LoadedModule> + Send>;
/// (模块, 类, 是否静态, 签名)
pub type BindForeignMethodFn = Box<dyn FnMut(&str, &str, bool, &str) -> Option<ForeignMethodFn> + Send>;
/// (模块, 类)
pub type BindForeignClassFn = Box<dyn FnMut(&str, &str) -> Option<ForeignClassMethods> + Send>;

/// 创建 VM 时的配置
///
/// 所有回调都是可选的；缺省行为见各字段说明。
pub struct Configuration {
    pub heap: HeapConfig,
    pub limits: LimitConfig,
    pub compiler: CompilerConfig,
    /// 缺省丢弃输出
    pub write_fn: Option<WriteFn>,
    /// 缺省以 tracing 事件记录
    pub error_fn: Option<ErrorFn>,
    /// 缺省原样返回名字
    pub resolve_module_fn: Option<ResolveModuleFn>,
    /// 缺省找不到任何模块
    pub load_module_fn: Option<LoadModuleFn>,
    pub bind_foreign_method_fn: Option<BindForeignMethodFn>,
    pub bind_foreign_class_fn: Option<BindForeignClassFn>,
    pub reallocate_fn: Option<ReallocateFn>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            heap: HeapConfig::default(),
            limits: LimitConfig::default(),
            compiler: CompilerConfig {
                emit_debug_info: false,
            },
            write_fn: None,
            error_fn: None,
            resolve_module_fn: None,
            load_module_fn: None,
            bind_foreign_method_fn: None,
            bind_foreign_class_fn: None,
            reallocate_fn: None,
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("heap", &self.heap)
            .field("limits", &self.limits)
            .field("compiler", &self.compiler)
            .field("write_fn", &self.write_fn.is_some())
            .field("error_fn", &self.error_fn.is_some())
            .field("resolve_module_fn", &self.resolve_module_fn.is_some())
            .field("load_module_fn", &self.load_module_fn.is_some())
            .field("bind_foreign_method_fn", &self.bind_foreign_method_fn.is_some())
            .field("bind_foreign_class_fn", &self.bind_foreign_class_fn.is_some())
            .field("reallocate_fn", &self.reallocate_fn.is_some())
            .finish()
    }
}

impl Configuration {
    pub fn with_write_fn(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.write_fn = Some(Box::new(f));
        self
    }

    pub fn with_error_fn(mut self, f: impl FnMut(&Diagnostic) + Send + 'static) -> Self {
        self.error_fn = Some(Box::new(f));
        self
    }

    pub fn with_resolve_module_fn(
        mut self,
        f: impl FnMut(&str, &str) -> Option<String> + Send + 'static,
    ) -> Self {
        self.resolve_module_fn = Some(Box::new(f));
        self
    }

    pub fn with_load_module_fn(mut self, f: impl FnMut(&str) -> Option<LoadedModule> + Send + 'static) -> Self {
        self.load_module_fn = Some(Box::new(f));
        self
    }

    pub fn with_bind_foreign_method_fn(
        mut self,
        f: impl FnMut(&str, &str, bool, &str) -> Option<ForeignMethodFn> + Send + 'static,
    ) -> Self {
        self.bind_foreign_method_fn = Some(Box::new(f));
        self
    }

    pub fn with_bind_foreign_class_fn(
        mut self,
        f: impl FnMut(&str, &str) -> Option<ForeignClassMethods> + Send + 'static,
    ) -> Self {
        self.bind_foreign_class_fn = Some(Box::new(f));
        self
    }

    pub fn with_reallocate_fn(mut self, f: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.reallocate_fn = Some(Box::new(f));
        self
    }
}

/// 缺省的错误回调：转成 tracing 事件
pub(crate) fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic.kind {
        DiagnosticKind::Compile => tracing::error!(
            target: "finch::compiler",
            module = %diagnostic.module,
            line = diagnostic.line,
            "{}",
            diagnostic.message
        ),
        DiagnosticKind::Runtime => tracing::error!(target: "finch::vm", "{}", diagnostic.message),
        DiagnosticKind::StackTrace => tracing::error!(
            target: "finch::vm",
            module = %diagnostic.module,
            line = diagnostic.line,
            "in {}",
            diagnostic.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_has_no_callbacks() {
        let config = Configuration::default();
        assert!(config.write_fn.is_none());
        assert!(config.load_module_fn.is_none());
        assert_eq!(config.limits.max_recursion_depth, 1024);
    }

    #[test]
    fn test_builder_sets_callbacks() {
        let config = Configuration::default()
            .with_write_fn(|_| {})
            .with_load_module_fn(|_| None);
        assert!(config.write_fn.is_some());
        assert!(config.load_module_fn.is_some());
    }

    #[test]
    fn test_loaded_module_on_complete() {
        let module = LoadedModule::new("var x = 1").with_on_complete(|| {});
        assert!(module.on_complete.is_some());
        assert_eq!(module.source, "var x = 1");
    }
}
