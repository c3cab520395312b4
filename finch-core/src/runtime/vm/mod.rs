//! 虚拟机实现
//!
//! `Vm` 拥有堆、模块表、方法符号表和宿主回调。各子模块以
//! `impl Vm` 的形式分别实现解释循环、调用、纤程、模块、槽位 API 等。

mod call;
mod class;
mod execution;
mod fiber;
mod foreign;
mod gc;
mod handle;
mod module;
mod slots;

pub(crate) use fiber::Resume;
pub use handle::Handle;
pub use slots::{FromSlot, IntoSlot, SlotType};

use crate::runtime::config::{Configuration, Diagnostic};
use crate::runtime::heap::Heap;
use crate::runtime::object::{ClassObj, MapKey, ObjKind};
use crate::runtime::symbol::SymbolTable;
use crate::runtime::value::{format_num, ObjRef, Value};
use finch_config::{CompilerConfig, LimitConfig};
use handle::HandleEntry;
use slots::SlotWindow;
use std::collections::HashMap;

/// 内建类（核心模块执行后填充）
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoreClasses {
    pub object: ObjRef,
    pub class: ObjRef,
    pub bool: ObjRef,
    pub null: ObjRef,
    pub num: ObjRef,
    pub string: ObjRef,
    pub list: ObjRef,
    pub map: ObjRef,
    pub range: ObjRef,
    pub fn_class: ObjRef,
    pub fiber: ObjRef,
}

impl CoreClasses {
    /// 引导阶段所有内建类先指向 Object
    fn placeholder(object: ObjRef, class: ObjRef) -> Self {
        Self {
            object,
            class,
            bool: object,
            null: object,
            num: object,
            string: object,
            list: object,
            map: object,
            range: object,
            fn_class: object,
            fiber: object,
        }
    }

    fn all(&self) -> [ObjRef; 11] {
        [
            self.object,
            self.class,
            self.bool,
            self.null,
            self.num,
            self.string,
            self.list,
            self.map,
            self.range,
            self.fn_class,
            self.fiber,
        ]
    }

    /// 脚本不能继承的内建类
    fn sealed(&self) -> [ObjRef; 10] {
        [
            self.class,
            self.bool,
            self.null,
            self.num,
            self.string,
            self.list,
            self.map,
            self.range,
            self.fn_class,
            self.fiber,
        ]
    }
}

/// 宿主回调
struct Callbacks {
    write: Option<crate::runtime::config::WriteFn>,
    error: Option<crate::runtime::config::ErrorFn>,
    resolve_module: Option<crate::runtime::config::ResolveModuleFn>,
    load_module: Option<crate::runtime::config::LoadModuleFn>,
    bind_foreign_method: Option<crate::runtime::config::BindForeignMethodFn>,
    bind_foreign_class: Option<crate::runtime::config::BindForeignClassFn>,
}

/// 一个独立的虚拟机实例
///
/// 多个实例之间没有共享的可变状态；`Vm` 是 `Send` 的，
/// 但同一个实例不能被并发进入（所有操作都需要 `&mut Vm`）。
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    /// 规范名 -> 模块对象（不含 core）
    pub(crate) modules: HashMap<String, ObjRef>,
    pub(crate) core_module: ObjRef,
    pub(crate) core: CoreClasses,
    /// 正在运行的纤程
    pub(crate) fiber: Option<ObjRef>,
    /// 嵌套进入解释器时被挂起的外层纤程
    pub(crate) suspended: Vec<Option<ObjRef>>,
    pub(crate) windows: Vec<SlotWindow>,
    pub(crate) api_fiber: Option<ObjRef>,
    pub(crate) handles: HashMap<u64, HandleEntry>,
    pub(crate) next_handle: u64,
    /// 原生代码持有、尚未挂到任何根上的值
    pub(crate) temp_roots: Vec<Value>,
    /// `abort_fiber` 设置，外部调用返回后转为运行时错误
    pub(crate) pending_abort: Option<Value>,
    pub(crate) limits: LimitConfig,
    pub(crate) compiler: CompilerConfig,
    callbacks: Callbacks,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("heap", &self.heap)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("symbols", &self.symbols.len())
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

/// 版本号编码：major * 1_000_000 + minor * 1_000 + patch
pub fn version_number() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 1_000_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 1_000
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}

impl Vm {
    /// 创建虚拟机并加载核心库
    pub fn new(config: Configuration) -> Self {
        let Configuration {
            heap,
            limits,
            compiler,
            write_fn,
            error_fn,
            resolve_module_fn,
            load_module_fn,
            bind_foreign_method_fn,
            bind_foreign_class_fn,
            reallocate_fn,
        } = config;

        let mut heap = Heap::new(heap, reallocate_fn);
        let object = heap.alloc(ObjKind::Class(ClassObj::new("Object", None, 0)));
        let core_module = heap.alloc(ObjKind::Module(crate::runtime::object::ModuleObj::new("core")));

        let mut vm = Self {
            heap,
            symbols: SymbolTable::new(),
            modules: HashMap::new(),
            core_module,
            core: CoreClasses::placeholder(object, object),
            fiber: None,
            suspended: Vec::new(),
            windows: Vec::new(),
            api_fiber: None,
            handles: HashMap::new(),
            next_handle: 1,
            temp_roots: Vec::new(),
            pending_abort: None,
            limits,
            compiler,
            callbacks: Callbacks {
                write: write_fn,
                error: error_fn,
                resolve_module: resolve_module_fn,
                load_module: load_module_fn,
                bind_foreign_method: bind_foreign_method_fn,
                bind_foreign_class: bind_foreign_class_fn,
            },
        };
        crate::runtime::corelib::bootstrap(&mut vm);
        tracing::debug!(
            target: "finch::vm",
            symbols = vm.symbols.len(),
            objects = vm.heap.live_objects(),
            "vm created"
        );
        vm
    }

    // ==================== 宿主回调 ====================

    pub(crate) fn write(&mut self, text: &str) {
        if let Some(write) = self.callbacks.write.as_mut() {
            write(text);
        }
    }

    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        match self.callbacks.error.as_mut() {
            Some(error) => error(&diagnostic),
            None => crate::runtime::config::log_diagnostic(&diagnostic),
        }
    }

    // ==================== 值辅助 ====================

    pub(crate) fn new_string(&mut self, text: impl Into<String>) -> Value {
        Value::Obj(self.alloc(ObjKind::String(text.into())))
    }

    pub(crate) fn new_list(&mut self, items: Vec<Value>) -> Value {
        Value::Obj(self.alloc(ObjKind::List(items)))
    }

    pub(crate) fn new_range(&mut self, from: f64, to: f64, inclusive: bool) -> Value {
        Value::Obj(self.alloc(ObjKind::Range { from, to, inclusive }))
    }

    /// 字符串内容（非字符串返回 None）
    pub(crate) fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Obj(r) => match &self.heap[r] {
                ObjKind::String(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn class_obj(&self, class: ObjRef) -> Option<&ClassObj> {
        match &self.heap[class] {
            ObjKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn class_obj_mut(&mut self, class: ObjRef) -> Option<&mut ClassObj> {
        match &mut self.heap[class] {
            ObjKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn class_name(&self, class: ObjRef) -> &str {
        self.class_obj(class).map_or("?", |c| c.name.as_str())
    }

    /// 值的类
    pub(crate) fn class_of(&self, value: Value) -> ObjRef {
        match value {
            Value::Null => self.core.null,
            Value::Bool(_) => self.core.bool,
            Value::Num(_) => self.core.num,
            Value::Obj(r) => match &self.heap[r] {
                ObjKind::String(_) => self.core.string,
                ObjKind::List(_) => self.core.list,
                ObjKind::Map(_) => self.core.map,
                ObjKind::Range { .. } => self.core.range,
                ObjKind::Closure(_) => self.core.fn_class,
                ObjKind::Fiber(_) => self.core.fiber,
                ObjKind::Class(class) => class.metaclass.unwrap_or(self.core.class),
                ObjKind::Instance { class, .. } => *class,
                ObjKind::Foreign(foreign) => foreign.class,
                ObjKind::Function(_) | ObjKind::Upvalue(_) | ObjKind::Module(_) => self.core.object,
            },
        }
    }

    /// 值相等：同一个值，或内容相同的字符串/范围
    pub(crate) fn values_equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        let (Value::Obj(x), Value::Obj(y)) = (a, b) else {
            return false;
        };
        match (&self.heap[x], &self.heap[y]) {
            (ObjKind::String(s), ObjKind::String(t)) => s.as_bytes() == t.as_bytes(),
            (
                ObjKind::Range { from, to, inclusive },
                ObjKind::Range {
                    from: from2,
                    to: to2,
                    inclusive: inclusive2,
                },
            ) => from == from2 && to == to2 && inclusive == inclusive2,
            _ => false,
        }
    }

    /// Map 键；不可散列的值返回 None
    pub(crate) fn map_key(&self, value: Value) -> Option<MapKey> {
        match value {
            Value::Null => Some(MapKey::Null),
            Value::Bool(b) => Some(MapKey::Bool(b)),
            Value::Num(n) => Some(MapKey::num(n)),
            Value::Obj(r) => match &self.heap[r] {
                ObjKind::String(s) => Some(MapKey::Str(s.clone())),
                ObjKind::Range { from, to, inclusive } => {
                    Some(MapKey::Range(from.to_bits(), to.to_bits(), *inclusive))
                }
                ObjKind::Class(_) => Some(MapKey::Class(r)),
                _ => None,
            },
        }
    }

    /// 不调用脚本方法的简单字符串表示（错误消息和调试用）
    pub(crate) fn display(&self, value: Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_num(n),
            Value::Obj(r) => match &self.heap[r] {
                ObjKind::String(s) => s.clone(),
                ObjKind::Class(class) => class.name.clone(),
                ObjKind::Range { from, to, inclusive } => {
                    let dots = if *inclusive { ".." } else { "..." };
                    format!("{}{}{}", format_num(*from), dots, format_num(*to))
                }
                _ => format!("instance of {}", self.class_name(self.class_of(value))),
            },
        }
    }

    /// 运行时错误值
    pub(crate) fn error_value(&mut self, message: impl Into<String>) -> Value {
        self.new_string(message)
    }

    // ==================== 公开查询 ====================

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// 已加载的模块名（不含 core），按字母序
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }
}
