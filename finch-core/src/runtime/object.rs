//! 堆对象定义

use crate::runtime::bytecode::Chunk;
use crate::runtime::error::ForeignError;
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ==================== 方法 ====================

/// 原生方法：`args[0]` 是接收者
pub type Primitive = fn(&mut Vm, &[Value]) -> PrimResult;

/// 宿主提供的外部方法，通过槽位读写参数和返回值
pub type ForeignMethodFn = Arc<dyn Fn(&mut Vm) -> Result<(), ForeignError> + Send + Sync>;

/// 外部对象的终结器，只能看到私有数据
pub type Finalizer = Arc<dyn Fn(&mut (dyn Any + Send)) + Send + Sync>;

/// 外部类的分配器与终结器
#[derive(Clone)]
pub struct ForeignClassMethods {
    pub allocate: ForeignMethodFn,
    pub finalize: Option<Finalizer>,
}

impl fmt::Debug for ForeignClassMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignClassMethods")
            .field("finalize", &self.finalize.is_some())
            .finish_non_exhaustive()
    }
}

/// 原生方法的执行结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimResult {
    /// 写回接收者槽位
    Value(Value),
    /// 抛出运行时错误
    Error(Value),
    /// 以参数区为帧调用闭包（`Fn.call`）
    Call(ObjRef),
    /// 原生方法已切换了当前纤程
    FiberSwitch,
}

#[derive(Clone)]
pub enum Method {
    Primitive(Primitive),
    Foreign(ForeignMethodFn),
    /// 脚本方法（闭包）
    Block(ObjRef),
    /// 外部方法声明了但宿主没有提供实现（记录声明所在模块）
    Unbound { module: String },
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Primitive(_) => write!(f, "Primitive"),
            Method::Foreign(_) => write!(f, "Foreign"),
            Method::Block(closure) => write!(f, "Block({closure:?})"),
            Method::Unbound { module } => write!(f, "Unbound({module})"),
        }
    }
}

// ==================== 函数与闭包 ====================

#[derive(Debug)]
pub struct FunctionObj {
    pub name: String,
    pub arity: usize,
    pub upvalue_count: usize,
    /// 常量池已物化到 `constants`，这里只保留代码和行号
    pub chunk: Arc<Chunk>,
    pub constants: Arc<[Value]>,
    pub module: ObjRef,
    /// 父类字段数，方法绑定到类时设置
    pub field_offset: usize,
    /// 定义该方法的类（`super` 调用从它的父类查找）
    pub owner_class: Option<ObjRef>,
}

#[derive(Debug)]
pub struct ClosureObj {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueObj {
    /// 仍指向某个纤程栈上的槽位
    Open { fiber: ObjRef, slot: usize },
    Closed(Value),
}

// ==================== 纤程 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    New,
    Running,
    SuspendedOnCall,
    SuspendedOnYield,
    Returned,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub ip: usize,
    /// 槽位 0 在纤程栈上的位置
    pub base: usize,
}

#[derive(Debug)]
pub struct FiberObj {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// 按槽位升序
    pub open_upvalues: Vec<(usize, ObjRef)>,
    pub caller: Option<ObjRef>,
    /// 失败时的错误值，正常为 null
    pub error: Value,
    pub state: FiberState,
    /// 由调用者通过 `try` 启动
    pub caller_is_trying: bool,
}

impl FiberObj {
    /// 入口闭包放在槽位 0
    pub fn new(closure: ObjRef) -> Self {
        Self {
            stack: vec![Value::Obj(closure)],
            frames: vec![CallFrame {
                closure,
                ip: 0,
                base: 0,
            }],
            open_upvalues: Vec::new(),
            caller: None,
            error: Value::Null,
            state: FiberState::New,
            caller_is_trying: false,
        }
    }

    /// 供宿主调用使用的空纤程
    pub fn empty() -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            caller: None,
            error: Value::Null,
            state: FiberState::Running,
            caller_is_trying: false,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, FiberState::Returned | FiberState::Failed)
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_null()
    }
}

// ==================== 类与实例 ====================

#[derive(Debug)]
pub struct ClassObj {
    pub name: String,
    pub superclass: Option<ObjRef>,
    /// 类对象自身的类（元类，或 `Class`）
    pub metaclass: Option<ObjRef>,
    /// 包含继承字段
    pub num_fields: usize,
    /// 以方法符号为下标
    pub methods: Vec<Option<Method>>,
    pub foreign: Option<ForeignClassMethods>,
}

impl ClassObj {
    pub fn new(name: impl Into<String>, superclass: Option<ObjRef>, num_fields: usize) -> Self {
        Self {
            name: name.into(),
            superclass,
            metaclass: None,
            num_fields,
            methods: Vec::new(),
            foreign: None,
        }
    }

    pub fn method(&self, symbol: usize) -> Option<&Method> {
        self.methods.get(symbol).and_then(Option::as_ref)
    }

    pub fn bind(&mut self, symbol: usize, method: Method) {
        if self.methods.len() <= symbol {
            self.methods.resize(symbol + 1, None);
        }
        self.methods[symbol] = Some(method);
    }
}

pub struct ForeignObj {
    pub class: ObjRef,
    /// 回收时取出交给终结器
    pub data: Option<Box<dyn Any + Send>>,
    /// 分配器成功返回后才置位；未完成构造的对象不会被终结
    pub constructed: bool,
}

impl fmt::Debug for ForeignObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObj")
            .field("class", &self.class)
            .field("constructed", &self.constructed)
            .finish_non_exhaustive()
    }
}

// ==================== Map ====================

/// 可作为 Map 键的值（值语义）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Num(u64),
    Str(String),
    Range(u64, u64, bool),
    Class(ObjRef),
}

impl MapKey {
    /// 0 与 -0 视为同一个键
    pub fn num(n: f64) -> Self {
        let n = if n == 0.0 { 0.0 } else { n };
        MapKey::Num(n.to_bits())
    }
}

/// 保持插入顺序的散列表
#[derive(Debug, Default)]
pub struct MapObj {
    pub entries: Vec<(Value, Value)>,
    /// 与 `entries` 一一对应
    keys: Vec<MapKey>,
    index: HashMap<MapKey, usize>,
}

impl MapObj {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &MapKey) -> Option<Value> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, key: &MapKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: MapKey, key_value: Value, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.keys.push(key);
                self.entries.push((key_value, value));
            }
        }
    }

    /// 删除键，返回旧值；最后一个条目移到被删除的位置
    pub fn remove(&mut self, key: &MapKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.swap_remove(i);
        self.keys.swap_remove(i);
        if let Some(moved) = self.keys.get(i) {
            self.index.insert(moved.clone(), i);
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
        self.index.clear();
    }
}

// ==================== 模块 ====================

#[derive(Debug)]
pub struct ModuleObj {
    pub name: String,
    pub variable_names: Vec<String>,
    pub variables: Vec<Value>,
    /// 尚未执行的顶层闭包
    pub body: Option<ObjRef>,
    pub executed: bool,
}

impl ModuleObj {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variable_names: Vec::new(),
            variables: Vec::new(),
            body: None,
            executed: false,
        }
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.variable_names.iter().position(|n| n == name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.find(name).map(|i| self.variables[i])
    }

    /// 定义或覆盖变量
    pub fn set(&mut self, name: &str, value: Value) {
        match self.find(name) {
            Some(i) => self.variables[i] = value,
            None => {
                self.variable_names.push(name.to_string());
                self.variables.push(value);
            }
        }
    }
}

// ==================== 对象 ====================

#[derive(Debug)]
pub enum ObjKind {
    String(String),
    List(Vec<Value>),
    Map(MapObj),
    Range { from: f64, to: f64, inclusive: bool },
    Function(FunctionObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    Fiber(Box<FiberObj>),
    Class(ClassObj),
    Instance { class: ObjRef, fields: Vec<Value> },
    Foreign(ForeignObj),
    Module(ModuleObj),
}

impl ObjKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::String(_) => "String",
            ObjKind::List(_) => "List",
            ObjKind::Map(_) => "Map",
            ObjKind::Range { .. } => "Range",
            ObjKind::Function(_) => "Function",
            ObjKind::Closure(_) => "Fn",
            ObjKind::Upvalue(_) => "Upvalue",
            ObjKind::Fiber(_) => "Fiber",
            ObjKind::Class(_) => "Class",
            ObjKind::Instance { .. } => "Instance",
            ObjKind::Foreign(_) => "Foreign",
            ObjKind::Module(_) => "Module",
        }
    }

    /// 收集直接引用的对象
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        fn value(v: &Value, out: &mut Vec<ObjRef>) {
            if let Value::Obj(r) = v {
                out.push(*r);
            }
        }

        match self {
            ObjKind::String(_) | ObjKind::Range { .. } => {}
            ObjKind::List(items) => items.iter().for_each(|v| value(v, out)),
            ObjKind::Map(map) => {
                for (k, v) in &map.entries {
                    value(k, out);
                    value(v, out);
                }
            }
            ObjKind::Function(f) => {
                out.push(f.module);
                out.extend(f.owner_class);
                f.constants.iter().for_each(|v| value(v, out));
            }
            ObjKind::Closure(c) => {
                out.push(c.function);
                out.extend(c.upvalues.iter().copied());
            }
            ObjKind::Upvalue(UpvalueObj::Open { fiber, .. }) => out.push(*fiber),
            ObjKind::Upvalue(UpvalueObj::Closed(v)) => value(v, out),
            ObjKind::Fiber(fiber) => {
                fiber.stack.iter().for_each(|v| value(v, out));
                out.extend(fiber.frames.iter().map(|f| f.closure));
                out.extend(fiber.open_upvalues.iter().map(|(_, u)| *u));
                out.extend(fiber.caller);
                value(&fiber.error, out);
            }
            ObjKind::Class(class) => {
                out.extend(class.superclass);
                out.extend(class.metaclass);
                for method in class.methods.iter().flatten() {
                    if let Method::Block(closure) = method {
                        out.push(*closure);
                    }
                }
            }
            ObjKind::Instance { class, fields } => {
                out.push(*class);
                fields.iter().for_each(|v| value(v, out));
            }
            ObjKind::Foreign(foreign) => out.push(foreign.class),
            ObjKind::Module(module) => {
                module.variables.iter().for_each(|v| value(v, out));
                out.extend(module.body);
            }
        }
    }

    /// 估算占用的字节数（用于触发回收）
    pub fn memory_size(&self) -> usize {
        let value = std::mem::size_of::<Value>();
        let base = std::mem::size_of::<HeapObject>();
        base + match self {
            ObjKind::String(s) => s.len(),
            ObjKind::List(items) => items.capacity() * value,
            ObjKind::Map(map) => map.entries.capacity() * value * 4,
            ObjKind::Range { .. } | ObjKind::Upvalue(_) => 0,
            ObjKind::Function(f) => f.chunk.code.len() + f.chunk.lines.len() * 8 + f.constants.len() * value,
            ObjKind::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
            ObjKind::Fiber(fiber) => {
                fiber.stack.capacity() * value
                    + fiber.frames.capacity() * std::mem::size_of::<CallFrame>()
            }
            ObjKind::Class(class) => class.methods.len() * std::mem::size_of::<Option<Method>>(),
            ObjKind::Instance { fields, .. } => fields.len() * value,
            ObjKind::Foreign(_) => 0,
            ObjKind::Module(module) => module.variables.len() * (value + 24),
        }
    }
}

/// 堆上的对象
#[derive(Debug)]
pub struct HeapObject {
    pub marked: bool,
    pub kind: ObjKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_insert_and_overwrite() {
        let mut map = MapObj::default();
        map.insert(MapKey::num(1.0), Value::num(1.0), Value::TRUE);
        map.insert(MapKey::num(1.0), Value::num(1.0), Value::FALSE);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&MapKey::num(1.0)), Some(Value::FALSE));
    }

    #[test]
    fn test_map_remove_reindexes_moved_entry() {
        let mut map = MapObj::default();
        for i in 0..3 {
            map.insert(MapKey::num(i as f64), Value::num(i as f64), Value::num(i as f64 * 10.0));
        }
        assert_eq!(map.remove(&MapKey::num(0.0)), Some(Value::num(0.0)));
        assert_eq!(map.get(&MapKey::num(2.0)), Some(Value::num(20.0)));
        assert_eq!(map.get(&MapKey::num(1.0)), Some(Value::num(10.0)));
        assert!(!map.contains(&MapKey::num(0.0)));
    }

    #[test]
    fn test_negative_zero_key() {
        assert_eq!(MapKey::num(-0.0), MapKey::num(0.0));
    }

    #[test]
    fn test_class_method_table_grows() {
        let mut class = ClassObj::new("A", None, 0);
        class.bind(5, Method::Unbound { module: "m".into() });
        assert!(class.method(4).is_none());
        assert!(matches!(class.method(5), Some(Method::Unbound { .. })));
    }

    #[test]
    fn test_fiber_starts_with_closure_in_slot_zero() {
        let closure = ObjRef::new(3, 0);
        let fiber = FiberObj::new(closure);
        assert_eq!(fiber.stack, vec![Value::Obj(closure)]);
        assert_eq!(fiber.state, FiberState::New);
        assert!(!fiber.is_done());
    }
}
