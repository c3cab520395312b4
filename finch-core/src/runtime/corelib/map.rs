//! Map

use super::{bind, bind_static, error, index_arg, int_arg, prim_try};
use crate::runtime::object::{MapKey, MapObj, ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "new()", map_new);

    bind(vm, class, "addCore_(_,_)", map_add_core);
    bind(vm, class, "[_]", map_subscript);
    bind(vm, class, "[_]=(_)", map_subscript_set);
    bind(vm, class, "clear()", map_clear);
    bind(vm, class, "containsKey(_)", map_contains_key);
    bind(vm, class, "count", map_count);
    bind(vm, class, "remove(_)", map_remove);
    bind(vm, class, "iterate(_)", map_iterate);
    bind(vm, class, "keyIteratorValue_(_)", map_key_iterator_value);
    bind(vm, class, "valueIteratorValue_(_)", map_value_iterator_value);
}

fn map(vm: &Vm, value: Value) -> Option<&MapObj> {
    match value {
        Value::Obj(r) => match &vm.heap[r] {
            ObjKind::Map(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn map_mut(vm: &mut Vm, value: Value) -> Option<&mut MapObj> {
    match value {
        Value::Obj(r) => match &mut vm.heap[r] {
            ObjKind::Map(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn len(vm: &Vm, value: Value) -> usize {
    map(vm, value).map_or(0, MapObj::len)
}

/// 只有值类型可以作键
fn key_arg(vm: &mut Vm, key: Value) -> Result<MapKey, PrimResult> {
    match vm.map_key(key) {
        Some(key) => Ok(key),
        None => Err(error(vm, "Key must be a value type.")),
    }
}

fn insert(vm: &mut Vm, args: &[Value]) -> Result<(), PrimResult> {
    let key = key_arg(vm, args[1])?;
    if let Some(map) = map_mut(vm, args[0]) {
        map.insert(key, args[1], args[2]);
    }
    Ok(())
}

fn map_new(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Obj(vm.alloc(ObjKind::Map(MapObj::default()))))
}

fn map_add_core(vm: &mut Vm, args: &[Value]) -> PrimResult {
    prim_try!(insert(vm, args));
    PrimResult::Value(args[0])
}

fn map_subscript(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let key = prim_try!(key_arg(vm, args[1]));
    let value = map(vm, args[0]).and_then(|map| map.get(&key));
    PrimResult::Value(value.unwrap_or_default())
}

fn map_subscript_set(vm: &mut Vm, args: &[Value]) -> PrimResult {
    prim_try!(insert(vm, args));
    PrimResult::Value(args[2])
}

fn map_clear(vm: &mut Vm, args: &[Value]) -> PrimResult {
    if let Some(map) = map_mut(vm, args[0]) {
        map.clear();
    }
    PrimResult::Value(Value::Null)
}

fn map_contains_key(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let key = prim_try!(key_arg(vm, args[1]));
    let found = map(vm, args[0]).is_some_and(|map| map.contains(&key));
    PrimResult::Value(Value::bool(found))
}

fn map_count(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Num(len(vm, args[0]) as f64))
}

fn map_remove(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let key = prim_try!(key_arg(vm, args[1]));
    let removed = map_mut(vm, args[0]).and_then(|map| map.remove(&key));
    PrimResult::Value(removed.unwrap_or_default())
}

// ==================== 迭代 ====================

// 迭代器是条目下标；迭代途中删除条目会打乱顺序

fn map_iterate(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let count = len(vm, args[0]);
    if args[1].is_null() {
        return PrimResult::Value(if count == 0 { Value::FALSE } else { Value::Num(0.0) });
    }
    let index = prim_try!(int_arg(vm, args[1], "Iterator"));
    if index < 0.0 || index + 1.0 >= count as f64 {
        return PrimResult::Value(Value::FALSE);
    }
    PrimResult::Value(Value::Num(index + 1.0))
}

fn entry(vm: &mut Vm, args: &[Value]) -> Result<(Value, Value), PrimResult> {
    let count = len(vm, args[0]);
    let index = index_arg(vm, args[1], count, "Iterator")?;
    Ok(map(vm, args[0]).map_or((Value::Null, Value::Null), |map| map.entries[index]))
}

fn map_key_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let (key, _) = prim_try!(entry(vm, args));
    PrimResult::Value(key)
}

fn map_value_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let (_, value) = prim_try!(entry(vm, args));
    PrimResult::Value(value)
}
