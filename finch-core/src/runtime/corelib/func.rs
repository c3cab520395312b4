//! Fn

use super::{bind, bind_static, error};
use crate::runtime::object::{ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

/// `call` 最多接受的参数个数
const MAX_CALL_ARGS: usize = 16;

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "new(_)", fn_new);

    bind(vm, class, "arity", fn_arity);
    bind(vm, class, "toString", fn_to_string);
    for argc in 0..=MAX_CALL_ARGS {
        let params = vec!["_"; argc].join(",");
        bind(vm, class, &format!("call({params})"), fn_call);
    }
}

fn closure_arg(vm: &Vm, value: Value) -> Option<ObjRef> {
    match value {
        Value::Obj(r) if matches!(vm.heap[r], ObjKind::Closure(_)) => Some(r),
        _ => None,
    }
}

fn fn_new(vm: &mut Vm, args: &[Value]) -> PrimResult {
    // 块参数本身就是函数
    match closure_arg(vm, args[1]) {
        Some(_) => PrimResult::Value(args[1]),
        None => error(vm, "Argument must be a function."),
    }
}

fn fn_arity(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let arity = closure_arg(vm, args[0]).map_or(0, |closure| match &vm.heap[closure] {
        ObjKind::Closure(c) => match &vm.heap[c.function] {
            ObjKind::Function(f) => f.arity,
            _ => 0,
        },
        _ => 0,
    });
    PrimResult::Value(Value::Num(arity as f64))
}

fn fn_to_string(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(vm.new_string("<fn>"))
}

fn fn_call(vm: &mut Vm, args: &[Value]) -> PrimResult {
    match closure_arg(vm, args[0]) {
        Some(closure) => PrimResult::Call(closure),
        None => error(vm, "Receiver must be a function."),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{output, runtime_error};

    #[test]
    fn test_call_and_arity() {
        let out = output("var add = Fn.new {|a, b| a + b }\nSystem.print(add.call(1, 2))\nSystem.print(add.arity)\nSystem.print(Fn.new { 3 }.call())\nSystem.print(add)");
        assert_eq!(out, "3\n2\n3\n<fn>\n");
    }

    #[test]
    fn test_extra_arguments_are_dropped() {
        let out = output("var f = Fn.new {|a| a }\nSystem.print(f.call(1, 2, 3))");
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_closures_capture_variables() {
        let out = output("var counter = Fn.new {\n  var n = 0\n  return Fn.new { n = n + 1 }\n}.call()\ncounter.call()\nSystem.print(counter.call())");
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_errors() {
        assert_eq!(runtime_error("Fn.new(1)"), "Argument must be a function.");
        assert_eq!(runtime_error("Fn.new {|a, b| a }.call(1)"), "Function expects more arguments.");
    }
}
