//! 测试辅助工具
//!
//! 提供端到端测试的辅助函数：捕获输出与诊断、内存模块加载、外部方法注册

#![allow(dead_code)]

use finch_core::{
    Configuration, Diagnostic, DiagnosticKind, ForeignClassMethods, ForeignMethodFn, HeapConfig,
    InterpretError, LoadedModule, Vm,
};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

/// 脚本运行期间收集到的宿主侧信息
#[derive(Debug, Default)]
pub struct Captured {
    pub output: String,
    pub diagnostics: Vec<Diagnostic>,
    /// 加载过的模块名（按请求顺序）
    pub loads: Vec<String>,
    /// 完成回调被调用的模块名
    pub released: Vec<String>,
    /// (module, class, is_static, signature)
    pub method_binds: Vec<(String, String, bool, String)>,
}

pub type Shared = Arc<Mutex<Captured>>;

/// 测试用 VM 构造器
#[derive(Default)]
pub struct Harness {
    modules: HashMap<String, String>,
    methods: HashMap<String, ForeignMethodFn>,
    classes: HashMap<String, ForeignClassMethods>,
    heap: Option<HeapConfig>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个可被 import 的模块
    pub fn module(mut self, name: &str, source: &str) -> Self {
        self.modules.insert(name.to_string(), source.to_string());
        self
    }

    /// 注册外部方法，键为 `Class.signature` 或 `static Class.signature`
    pub fn method(
        mut self,
        key: &str,
        f: impl Fn(&mut Vm) -> Result<(), finch_core::ForeignError> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(key.to_string(), Arc::new(f));
        self
    }

    pub fn class(mut self, name: &str, methods: ForeignClassMethods) -> Self {
        self.classes.insert(name.to_string(), methods);
        self
    }

    pub fn heap(mut self, heap: HeapConfig) -> Self {
        self.heap = Some(heap);
        self
    }

    pub fn build(self) -> (Vm, Shared) {
        let shared: Shared = Arc::default();
        let Harness {
            modules,
            methods,
            classes,
            heap,
        } = self;

        let out = shared.clone();
        let errors = shared.clone();
        let loads = shared.clone();
        let binds = shared.clone();

        let mut config = Configuration::default()
            .with_write_fn(move |text| out.lock().unwrap().output.push_str(text))
            .with_error_fn(move |diagnostic| errors.lock().unwrap().diagnostics.push(diagnostic.clone()))
            .with_load_module_fn(move |name| {
                loads.lock().unwrap().loads.push(name.to_string());
                let source = modules.get(name)?.clone();
                let released = loads.clone();
                let name = name.to_string();
                Some(LoadedModule::new(source).with_on_complete(move || {
                    released.lock().unwrap().released.push(name);
                }))
            })
            .with_bind_foreign_method_fn(move |module, class, is_static, signature| {
                binds.lock().unwrap().method_binds.push((
                    module.to_string(),
                    class.to_string(),
                    is_static,
                    signature.to_string(),
                ));
                let key = if is_static {
                    format!("static {class}.{signature}")
                } else {
                    format!("{class}.{signature}")
                };
                methods.get(&key).cloned()
            })
            .with_bind_foreign_class_fn(move |_module, class| classes.get(class).cloned());
        if let Some(heap) = heap {
            config.heap = heap;
        }
        (Vm::new(config), shared)
    }
}

/// 运行脚本，返回输出；失败时 panic 并带上已有输出
pub fn run_ok(source: &str) -> String {
    let (mut vm, shared) = Harness::new().build();
    if let Err(err) = vm.interpret("main", source) {
        panic!("script failed: {err}\n--- output ---\n{}", shared.lock().unwrap().output);
    }
    let output = shared.lock().unwrap().output.clone();
    output
}

/// 运行脚本，期望运行时错误并返回错误消息
pub fn run_err(source: &str) -> String {
    let (mut vm, _) = Harness::new().build();
    match vm.interpret("main", source) {
        Err(InterpretError::Runtime(err)) => err.message,
        other => panic!("expected runtime error, got {other:?}"),
    }
}

/// 按类型筛选诊断
pub fn diagnostics_of(shared: &Shared, kind: DiagnosticKind) -> Vec<Diagnostic> {
    shared
        .lock()
        .unwrap()
        .diagnostics
        .iter()
        .filter(|d| d.kind == kind)
        .cloned()
        .collect()
}

/// 在线程局部 subscriber 下运行 `f`，返回结果和期间产生的日志文本
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::default();
    let sink = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(true)
        .without_time()
        .with_writer(move || LogBuffer(sink.clone()))
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let text = String::from_utf8_lossy(&buffer.lock().unwrap()).into_owned();
    (result, text)
}

struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
