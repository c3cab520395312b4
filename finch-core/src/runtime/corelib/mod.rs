//! 核心库
//!
//! 内建类分两部分：能用脚本写的方法放在 [`CORE_SOURCE`] 中，
//! 在 `core` 模块里编译执行；其余方法是绑定到类上的原生函数。
//!
//! 引导顺序：
//! 1. Object、Class 和 Object 的元类由原生代码直接创建
//! 2. 运行核心源码，声明其余内建类
//! 3. 从 `core` 模块取回这些类，绑定原生方法

mod fiber;
mod func;
mod list;
mod map;
mod num;
mod object;
mod range;
mod string;
mod system;

use crate::compiler;
use crate::runtime::object::{ClassObj, FiberObj, Method, ObjKind, PrimResult, Primitive};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

/// 核心模块的脚本部分
pub(crate) const CORE_SOURCE: &str = r#"
class Bool {}
class Null {}
class Num {}

class Sequence {
  all(f) {
    var result = true
    for (element in this) {
      result = f.call(element)
      if (!result) return result
    }
    return result
  }

  any(f) {
    var result = false
    for (element in this) {
      result = f.call(element)
      if (result) return result
    }
    return result
  }

  contains(element) {
    for (item in this) {
      if (element == item) return true
    }
    return false
  }

  count {
    var result = 0
    for (element in this) {
      result = result + 1
    }
    return result
  }

  count(f) {
    var result = 0
    for (element in this) {
      if (f.call(element)) result = result + 1
    }
    return result
  }

  each(f) {
    for (element in this) {
      f.call(element)
    }
  }

  isEmpty { iterate(null) ? false : true }

  map(transformation) { MapSequence.new(this, transformation) }

  where(predicate) { WhereSequence.new(this, predicate) }

  reduce(acc, f) {
    for (element in this) {
      acc = f.call(acc, element)
    }
    return acc
  }

  reduce(f) {
    var iter = iterate(null)
    if (!iter) Fiber.abort("Can't reduce an empty sequence.")
    var result = iteratorValue(iter)
    iter = iterate(iter)
    while (iter) {
      result = f.call(result, iteratorValue(iter))
      iter = iterate(iter)
    }
    return result
  }

  join() { join("") }

  join(separator) {
    var first = true
    var result = ""
    for (element in this) {
      if (!first) result = result + separator
      first = false
      result = result + element.toString
    }
    return result
  }

  toList {
    var result = List.new()
    for (element in this) {
      result.add(element)
    }
    return result
  }
}

class MapSequence is Sequence {
  construct new(sequence, fn) {
    _sequence = sequence
    _fn = fn
  }

  iterate(iterator) { _sequence.iterate(iterator) }
  iteratorValue(iterator) { _fn.call(_sequence.iteratorValue(iterator)) }
}

class WhereSequence is Sequence {
  construct new(sequence, fn) {
    _sequence = sequence
    _fn = fn
  }

  iterate(iterator) {
    iterator = _sequence.iterate(iterator)
    while (iterator) {
      if (_fn.call(_sequence.iteratorValue(iterator))) return iterator
      iterator = _sequence.iterate(iterator)
    }
    return false
  }

  iteratorValue(iterator) { _sequence.iteratorValue(iterator) }
}

class String is Sequence {}

class List is Sequence {
  addAll(other) {
    for (element in other) {
      add(element)
    }
    return other
  }

  toString { "[" + join(", ") + "]" }
}

class Map is Sequence {
  keys { MapKeySequence.new(this) }
  values { MapValueSequence.new(this) }

  iteratorValue(iterator) {
    return MapEntry.new(keyIteratorValue_(iterator), valueIteratorValue_(iterator))
  }

  toString {
    var first = true
    var result = "{"
    for (key in keys) {
      if (!first) result = result + ", "
      first = false
      result = result + key.toString + ": " + this[key].toString
    }
    return result + "}"
  }
}

class MapEntry {
  construct new(key, value) {
    _key = key
    _value = value
  }

  key { _key }
  value { _value }

  toString { _key.toString + ":" + _value.toString }
}

class MapKeySequence is Sequence {
  construct new(map) {
    _map = map
  }

  iterate(n) { _map.iterate(n) }
  iteratorValue(iterator) { _map.keyIteratorValue_(iterator) }
}

class MapValueSequence is Sequence {
  construct new(map) {
    _map = map
  }

  iterate(n) { _map.iterate(n) }
  iteratorValue(iterator) { _map.valueIteratorValue_(iterator) }
}

class Range is Sequence {}

class Fn {}

class Fiber {}

class System {
  static print() {
    writeString_("\n")
  }

  static print(obj) {
    writeObject_(obj)
    writeString_("\n")
    return obj
  }

  static printAll(sequence) {
    for (object in sequence) writeObject_(object)
    writeString_("\n")
  }

  static write(obj) {
    writeObject_(obj)
    return obj
  }

  static writeAll(sequence) {
    for (object in sequence) writeObject_(object)
  }

  static writeObject_(obj) {
    var string = obj.toString
    if (string is String) {
      writeString_(string)
    } else {
      writeString_("[invalid toString]")
    }
  }
}
"#;

// ==================== 原生方法辅助 ====================

/// 原生方法参数检查：失败时直接返回错误结果
macro_rules! prim_try {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(error) => return error,
        }
    };
}
pub(crate) use prim_try;

/// 单个列表的元素数、单个字符串的字节数上限
pub(crate) const MAX_SEQUENCE_LEN: usize = 1 << 28;

pub(crate) fn error(vm: &mut Vm, message: impl Into<String>) -> PrimResult {
    PrimResult::Error(vm.error_value(message))
}

pub(crate) fn num_arg(vm: &mut Vm, value: Value, name: &str) -> Result<f64, PrimResult> {
    match value {
        Value::Num(n) => Ok(n),
        _ => Err(error(vm, format!("{name} must be a number."))),
    }
}

pub(crate) fn int_arg(vm: &mut Vm, value: Value, name: &str) -> Result<f64, PrimResult> {
    let n = num_arg(vm, value, name)?;
    if n.trunc() != n {
        return Err(error(vm, format!("{name} must be an integer.")));
    }
    Ok(n)
}

/// 下标检查；负数从末尾计数
pub(crate) fn index_arg(vm: &mut Vm, value: Value, count: usize, name: &str) -> Result<usize, PrimResult> {
    let n = int_arg(vm, value, name)?;
    let index = if n < 0.0 { n + count as f64 } else { n };
    if index < 0.0 || index >= count as f64 {
        return Err(error(vm, format!("{name} out of bounds.")));
    }
    Ok(index as usize)
}

pub(crate) fn string_arg(vm: &mut Vm, value: Value, name: &str) -> Result<String, PrimResult> {
    match vm.as_str(value) {
        Some(s) => Ok(s.to_string()),
        None => Err(error(vm, format!("{name} must be a string."))),
    }
}

/// 把范围换算为 (起点, 长度, 是否递减)；不是范围时返回 None
pub(crate) fn range_arg(vm: &mut Vm, value: Value, count: usize) -> Result<Option<(usize, usize, bool)>, PrimResult> {
    let Value::Obj(r) = value else {
        return Ok(None);
    };
    let (from, to, inclusive) = match &vm.heap[r] {
        ObjKind::Range { from, to, inclusive } => (*from, *to, *inclusive),
        _ => return Ok(None),
    };
    let count_f = count as f64;

    // 末尾的空范围是允许的
    let empty_end = if inclusive { -1.0 } else { count_f };
    if from == count_f && to == empty_end {
        return Ok(Some((count, 0, false)));
    }
    let start = index_arg(vm, Value::Num(from), count, "Range start")?;
    let mut end = int_arg(vm, Value::Num(to), "Range end")?;
    if end < 0.0 {
        end += count_f;
    }
    if !inclusive {
        if end == start as f64 {
            return Ok(Some((start, 0, false)));
        }
        end += if end >= start as f64 { -1.0 } else { 1.0 };
    }
    if end < 0.0 || end >= count_f {
        return Err(error(vm, "Range end out of bounds."));
    }
    let end = end as usize;
    Ok(Some((start, start.abs_diff(end) + 1, end < start)))
}

fn bind(vm: &mut Vm, class: ObjRef, signature: &str, primitive: Primitive) {
    let symbol = vm.symbols.ensure(signature);
    if let Some(class) = vm.class_obj_mut(class) {
        class.bind(symbol, Method::Primitive(primitive));
    }
}

fn bind_static(vm: &mut Vm, class: ObjRef, signature: &str, primitive: Primitive) {
    let metaclass = vm.class_obj(class).and_then(|c| c.metaclass).unwrap_or(class);
    bind(vm, metaclass, signature, primitive);
}

fn core_class(vm: &Vm, name: &str) -> ObjRef {
    let value = match &vm.heap[vm.core_module] {
        ObjKind::Module(module) => module.get(name),
        _ => None,
    };
    match value {
        Some(Value::Obj(class)) if vm.class_obj(class).is_some() => class,
        _ => panic!("core library did not define class {name}"),
    }
}

fn set_core_variable(vm: &mut Vm, name: &str, value: Value) {
    let core = vm.core_module;
    if let ObjKind::Module(module) = &mut vm.heap[core] {
        module.set(name, value);
    }
}

// ==================== 引导 ====================

/// 创建内建类并加载核心库
pub(crate) fn bootstrap(vm: &mut Vm) {
    let object_class = vm.core.object;
    object::bind_object(vm, object_class);

    // Class 继承 Object，先复制 Object 的方法
    let mut class = ClassObj::new("Class", Some(object_class), 0);
    if let Some(object) = vm.class_obj(object_class) {
        class.methods = object.methods.clone();
    }
    let class_class = vm.alloc(ObjKind::Class(class));
    vm.core.class = class_class;
    object::bind_class(vm, class_class);

    // Object 的元类继承 Class；Class 的元类是它自己
    let mut metaclass = ClassObj::new("Object metaclass", Some(class_class), 0);
    metaclass.metaclass = Some(class_class);
    if let Some(class) = vm.class_obj(class_class) {
        metaclass.methods = class.methods.clone();
    }
    let object_metaclass = vm.alloc(ObjKind::Class(metaclass));
    if let Some(object) = vm.class_obj_mut(object_class) {
        object.metaclass = Some(object_metaclass);
    }
    if let Some(class) = vm.class_obj_mut(class_class) {
        class.metaclass = Some(class_class);
    }
    object::bind_object_static(vm, object_class);

    set_core_variable(vm, "Object", Value::Obj(object_class));
    set_core_variable(vm, "Class", Value::Obj(class_class));

    run_core_source(vm);

    vm.core.bool = core_class(vm, "Bool");
    vm.core.null = core_class(vm, "Null");
    vm.core.num = core_class(vm, "Num");
    vm.core.string = core_class(vm, "String");
    vm.core.list = core_class(vm, "List");
    vm.core.map = core_class(vm, "Map");
    vm.core.range = core_class(vm, "Range");
    vm.core.fn_class = core_class(vm, "Fn");
    vm.core.fiber = core_class(vm, "Fiber");
    let system = core_class(vm, "System");

    let core = vm.core;
    object::bind_bool(vm, core.bool);
    object::bind_null(vm, core.null);
    num::register(vm, core.num);
    string::register(vm, core.string);
    list::register(vm, core.list);
    map::register(vm, core.map);
    range::register(vm, core.range);
    func::register(vm, core.fn_class);
    fiber::register(vm, core.fiber);
    system::register(vm, system);

    tracing::trace!(target: "finch::vm", symbols = vm.symbols.len(), "core library loaded");
}

fn run_core_source(vm: &mut Vm) {
    let result = compiler::parse("core", CORE_SOURCE).and_then(|statements| {
        let core = vm.core_module;
        vm.compile_statements(core, "core", &statements)
    });
    let closure = match result {
        Ok(closure) => closure,
        Err(err) => panic!("core library failed to compile: {err}"),
    };

    vm.temp_roots.push(Value::Obj(closure));
    let fiber = vm.alloc(ObjKind::Fiber(Box::new(FiberObj::new(closure))));
    vm.temp_roots.pop();

    if let Err(err) = vm.run_nested(fiber) {
        panic!("core library failed to run: {err}");
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::config::Configuration;
    use crate::runtime::error::InterpretError;
    use crate::runtime::vm::Vm;
    use std::sync::{Arc, Mutex};

    pub(crate) fn run(source: &str) -> (Result<(), InterpretError>, String) {
        let out = Arc::new(Mutex::new(String::new()));
        let sink = out.clone();
        let config = Configuration::default()
            .with_write_fn(move |text| {
                if let Ok(mut out) = sink.lock() {
                    out.push_str(text);
                }
            })
            .with_error_fn(|_| {});
        let mut vm = Vm::new(config);
        let result = vm.interpret("main", source);
        let text = out.lock().map(|s| s.clone()).unwrap_or_default();
        (result, text)
    }

    pub(crate) fn output(source: &str) -> String {
        let (result, out) = run(source);
        if let Err(err) = result {
            panic!("script failed: {err}\n--- output ---\n{out}");
        }
        out
    }

    pub(crate) fn runtime_error(source: &str) -> String {
        match run(source).0 {
            Err(InterpretError::Runtime(err)) => err.message,
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_sequence_methods() {
        let out = output(
            "var l = [1, 2, 3, 4]\n\
             System.print(l.map {|x| x * 10 }.toList)\n\
             System.print(l.where {|x| x % 2 == 0 }.toList)\n\
             System.print(l.reduce {|a, b| a + b })\n\
             System.print(l.reduce(10) {|a, b| a + b })\n\
             System.print(l.all {|x| x > 0 })\n\
             System.print(l.any {|x| x > 3 })\n\
             System.print(l.count {|x| x > 1 })\n\
             System.print(l.join(\"-\"))\n\
             System.print([].isEmpty)",
        );
        assert_eq!(out, "[10, 20, 30, 40]\n[2, 4]\n10\n20\ntrue\ntrue\n3\n1-2-3-4\ntrue\n");
    }

    #[test]
    fn test_reduce_empty_sequence() {
        assert_eq!(
            runtime_error("[].reduce {|a, b| a }"),
            "Can't reduce an empty sequence."
        );
    }

    #[test]
    fn test_print_variants() {
        let out = output("System.print()\nSystem.write(\"a\")\nSystem.writeAll([1, 2])\nSystem.printAll([\"x\", 3])");
        assert_eq!(out, "\na12x3\n");
    }

    #[test]
    fn test_print_uses_to_string() {
        let out = output(
            "class P {\n  construct new() {}\n  toString { \"P!\" }\n}\nSystem.print(P.new())\nclass Q {\n  construct new() {}\n  toString { 1 }\n}\nSystem.print(Q.new())",
        );
        assert_eq!(out, "P!\n[invalid toString]\n");
    }

    #[test]
    fn test_map_sequence_and_entries() {
        let out = output(
            "var m = {\"a\": 1}\nfor (e in m) System.print(e.key + \"=\" + e.value.toString)\nSystem.print(m.keys.toList)\nSystem.print(m.values.toList)\nSystem.print(m)",
        );
        assert_eq!(out, "a=1\n[a]\n[1]\n{a: 1}\n");
    }
}
