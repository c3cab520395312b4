//! List

use super::{bind, bind_static, error, index_arg, int_arg, prim_try, range_arg, MAX_SEQUENCE_LEN};
use crate::runtime::object::{ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "new()", list_new);
    bind_static(vm, class, "filled(_,_)", list_filled);

    bind(vm, class, "addCore_(_)", list_add_core);
    bind(vm, class, "add(_)", list_add);
    bind(vm, class, "clear()", list_clear);
    bind(vm, class, "count", list_count);
    bind(vm, class, "insert(_,_)", list_insert);
    bind(vm, class, "iterate(_)", list_iterate);
    bind(vm, class, "iteratorValue(_)", list_iterator_value);
    bind(vm, class, "removeAt(_)", list_remove_at);
    bind(vm, class, "remove(_)", list_remove);
    bind(vm, class, "indexOf(_)", list_index_of);
    bind(vm, class, "swap(_,_)", list_swap);
    bind(vm, class, "[_]", list_subscript);
    bind(vm, class, "[_]=(_)", list_subscript_set);
}

fn items(vm: &Vm, list: Value) -> &[Value] {
    match list {
        Value::Obj(r) => match &vm.heap[r] {
            ObjKind::List(items) => items,
            _ => &[],
        },
        _ => &[],
    }
}

fn items_mut(vm: &mut Vm, list: Value) -> Option<&mut Vec<Value>> {
    match list {
        Value::Obj(r) => match &mut vm.heap[r] {
            ObjKind::List(items) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn count(vm: &Vm, list: Value) -> usize {
    items(vm, list).len()
}

// ==================== 构造 ====================

fn list_new(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(vm.new_list(Vec::new()))
}

fn list_filled(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let size = match args[1] {
        Value::Num(n) if n >= 0.0 && n.trunc() == n => n as usize,
        _ => return error(vm, "Size must be a non-negative integer."),
    };
    if size > MAX_SEQUENCE_LEN {
        return error(vm, "List size is too large.");
    }
    PrimResult::Value(vm.new_list(vec![args[2]; size]))
}

// ==================== 修改 ====================

fn list_add_core(vm: &mut Vm, args: &[Value]) -> PrimResult {
    if let Some(items) = items_mut(vm, args[0]) {
        items.push(args[1]);
    }
    PrimResult::Value(args[0])
}

fn list_add(vm: &mut Vm, args: &[Value]) -> PrimResult {
    if let Some(items) = items_mut(vm, args[0]) {
        items.push(args[1]);
    }
    PrimResult::Value(args[1])
}

fn list_clear(vm: &mut Vm, args: &[Value]) -> PrimResult {
    if let Some(items) = items_mut(vm, args[0]) {
        items.clear();
    }
    PrimResult::Value(Value::Null)
}

/// 下标可以等于长度（追加）；负数时 -1 表示末尾之后
fn list_insert(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    let index = prim_try!(int_arg(vm, args[1], "Index"));
    let position = if index < 0.0 { index + len as f64 + 1.0 } else { index };
    if position < 0.0 || position > len as f64 {
        return error(vm, "Index out of bounds.");
    }
    if let Some(items) = items_mut(vm, args[0]) {
        items.insert(position as usize, args[2]);
    }
    PrimResult::Value(args[2])
}

fn list_remove_at(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    let index = prim_try!(index_arg(vm, args[1], len, "Index"));
    let removed = items_mut(vm, args[0]).map_or(Value::Null, |items| items.remove(index));
    PrimResult::Value(removed)
}

fn position(vm: &Vm, list: Value, value: Value) -> Option<usize> {
    items(vm, list).iter().position(|&item| vm.values_equal(item, value))
}

fn list_remove(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let Some(index) = position(vm, args[0], args[1]) else {
        return PrimResult::Value(Value::Null);
    };
    let removed = items_mut(vm, args[0]).map_or(Value::Null, |items| items.remove(index));
    PrimResult::Value(removed)
}

fn list_index_of(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let index = position(vm, args[0], args[1]).map_or(-1.0, |i| i as f64);
    PrimResult::Value(Value::Num(index))
}

fn list_swap(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    let a = prim_try!(index_arg(vm, args[1], len, "Index 0"));
    let b = prim_try!(index_arg(vm, args[2], len, "Index 1"));
    if let Some(items) = items_mut(vm, args[0]) {
        items.swap(a, b);
    }
    PrimResult::Value(Value::Null)
}

// ==================== 访问 ====================

fn list_count(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Num(count(vm, args[0]) as f64))
}

fn list_subscript(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    if let Value::Num(_) = args[1] {
        let index = prim_try!(index_arg(vm, args[1], len, "Subscript"));
        return PrimResult::Value(items(vm, args[0])[index]);
    }

    let Some((start, len, descending)) = prim_try!(range_arg(vm, args[1], len)) else {
        return error(vm, "Subscript must be a number or a range.");
    };
    let source = items(vm, args[0]);
    let slice: Vec<Value> = if descending {
        (0..len).map(|i| source[start - i]).collect()
    } else {
        source[start..start + len].to_vec()
    };
    PrimResult::Value(vm.new_list(slice))
}

fn list_subscript_set(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    let index = prim_try!(index_arg(vm, args[1], len, "Subscript"));
    if let Some(items) = items_mut(vm, args[0]) {
        items[index] = args[2];
    }
    PrimResult::Value(args[2])
}

// ==================== 迭代 ====================

fn list_iterate(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    if args[1].is_null() {
        return PrimResult::Value(if len == 0 { Value::FALSE } else { Value::Num(0.0) });
    }
    let index = prim_try!(int_arg(vm, args[1], "Iterator"));
    if index < 0.0 || index + 1.0 >= len as f64 {
        return PrimResult::Value(Value::FALSE);
    }
    PrimResult::Value(Value::Num(index + 1.0))
}

fn list_iterator_value(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let len = count(vm, args[0]);
    let index = prim_try!(index_arg(vm, args[1], len, "Iterator"));
    PrimResult::Value(items(vm, args[0])[index])
}

#[cfg(test)]
mod tests {
    use super::super::tests::{output, runtime_error};

    #[test]
    fn test_literal_and_subscript() {
        let out = output("var l = [1, \"two\", null]\nSystem.print(l)\nSystem.print(l[1])\nSystem.print(l[-1])\nl[0] = 9\nSystem.print(l[0..1])\nSystem.print(l[2..0])");
        assert_eq!(out, "[1, two, null]\ntwo\nnull\n[9, two]\n[null, two, 9]\n");
    }

    #[test]
    fn test_mutation() {
        let out = output("var l = [1, 2]\nl.add(3)\nl.insert(0, 0)\nl.insert(-1, 4)\nSystem.print(l)\nSystem.print(l.removeAt(1))\nSystem.print(l.remove(3))\nSystem.print(l.indexOf(4))\nl.swap(0, 1)\nSystem.print(l)\nl.clear()\nSystem.print(l.count)");
        assert_eq!(out, "[0, 1, 2, 3, 4]\n1\n3\n2\n[2, 0, 4]\n0\n");
    }

    #[test]
    fn test_filled_and_add_all() {
        let out = output("var l = List.filled(2, \"x\")\nl.addAll([1, 2])\nSystem.print(l)\nSystem.print(l.contains(2))");
        assert_eq!(out, "[x, x, 1, 2]\ntrue\n");
    }

    #[test]
    fn test_for_loop_sums() {
        let out = output("var sum = 0\nfor (n in [1, 2, 3]) sum = sum + n\nSystem.print(sum)");
        assert_eq!(out, "6\n");
    }

    #[test]
    fn test_index_errors() {
        assert_eq!(runtime_error("[1, 2][2]"), "Subscript out of bounds.");
        assert_eq!(runtime_error("[1].insert(3, 0)"), "Index out of bounds.");
        assert_eq!(runtime_error("List.filled(-1, 0)"), "Size must be a non-negative integer.");
        assert_eq!(runtime_error("List.filled(1e18, 0)"), "List size is too large.");
    }
}
