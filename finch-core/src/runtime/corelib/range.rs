//! Range

use super::{bind, error, num_arg, prim_try};
use crate::runtime::object::{ObjKind, PrimResult};
use crate::runtime::value::{format_num, ObjRef, Value};
use crate::runtime::vm::Vm;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind(vm, class, "from", range_from);
    bind(vm, class, "to", range_to);
    bind(vm, class, "min", range_min);
    bind(vm, class, "max", range_max);
    bind(vm, class, "isInclusive", range_is_inclusive);
    bind(vm, class, "iterate(_)", range_iterate);
    bind(vm, class, "iteratorValue(_)", range_iterator_value);
    bind(vm, class, "toString", range_to_string);
}

fn bounds(vm: &Vm, value: Value) -> (f64, f64, bool) {
    match value {
        Value::Obj(r) => match &vm.heap[r] {
            ObjKind::Range { from, to, inclusive } => (*from, *to, *inclusive),
            _ => (0.0, 0.0, false),
        },
        _ => (0.0, 0.0, false),
    }
}

fn range_from(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Num(bounds(vm, args[0]).0))
}

fn range_to(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Num(bounds(vm, args[0]).1))
}

fn range_min(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let (from, to, _) = bounds(vm, args[0]);
    PrimResult::Value(Value::Num(from.min(to)))
}

fn range_max(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let (from, to, _) = bounds(vm, args[0]);
    PrimResult::Value(Value::Num(from.max(to)))
}

fn range_is_inclusive(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::bool(bounds(vm, args[0]).2))
}

/// 按 from 到 to 的方向逐个步进 1
fn range_iterate(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let (from, to, inclusive) = bounds(vm, args[0]);
    if from == to && !inclusive {
        return PrimResult::Value(Value::FALSE);
    }
    if args[1].is_null() {
        return PrimResult::Value(Value::Num(from));
    }

    let mut iterator = prim_try!(num_arg(vm, args[1], "Iterator"));
    if from < to {
        iterator += 1.0;
        if iterator > to {
            return PrimResult::Value(Value::FALSE);
        }
    } else {
        iterator -= 1.0;
        if iterator < to {
            return PrimResult::Value(Value::FALSE);
        }
    }
    if !inclusive && iterator == to {
        return PrimResult::Value(Value::FALSE);
    }
    PrimResult::Value(Value::Num(iterator))
}

fn range_iterator_value(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(args[1])
}

fn range_to_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    if !matches!(args[0], Value::Obj(r) if matches!(vm.heap[r], ObjKind::Range { .. })) {
        return error(vm, "Receiver must be a range.");
    }
    let (from, to, inclusive) = bounds(vm, args[0]);
    let op = if inclusive { ".." } else { "..." };
    let text = format!("{}{}{}", format_num(from), op, format_num(to));
    PrimResult::Value(vm.new_string(text))
}
