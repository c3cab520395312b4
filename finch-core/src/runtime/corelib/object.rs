//! Object、Class、Bool、Null

use super::{bind, bind_static, error};
use crate::runtime::object::PrimResult;
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;

// ==================== Object ====================

pub(super) fn bind_object(vm: &mut Vm, class: ObjRef) {
    bind(vm, class, "!", object_not);
    bind(vm, class, "==(_)", object_eq);
    bind(vm, class, "!=(_)", object_ne);
    bind(vm, class, "is(_)", object_is);
    bind(vm, class, "toString", object_to_string);
    bind(vm, class, "type", object_type);
}

pub(super) fn bind_object_static(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "same(_,_)", object_same);
}

fn object_not(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::FALSE)
}

fn object_eq(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::bool(vm.values_equal(args[0], args[1])))
}

fn object_ne(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::bool(!vm.values_equal(args[0], args[1])))
}

fn object_is(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let ancestor = match args[1] {
        Value::Obj(r) if vm.class_obj(r).is_some() => r,
        _ => return error(vm, "Right operand must be a class."),
    };
    let class = vm.class_of(args[0]);
    PrimResult::Value(Value::bool(vm.is_subclass(class, ancestor)))
}

fn object_to_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let class = vm.class_of(args[0]);
    let text = format!("instance of {}", vm.class_name(class));
    PrimResult::Value(vm.new_string(text))
}

fn object_type(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Obj(vm.class_of(args[0])))
}

fn object_same(vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::bool(vm.values_equal(args[1], args[2])))
}

// ==================== Class ====================

pub(super) fn bind_class(vm: &mut Vm, class: ObjRef) {
    bind(vm, class, "name", class_name);
    bind(vm, class, "supertype", class_supertype);
    bind(vm, class, "toString", class_name);
}

fn class_name(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let name = match args[0] {
        Value::Obj(r) => vm.class_obj(r).map(|c| c.name.clone()),
        _ => None,
    };
    match name {
        Some(name) => PrimResult::Value(vm.new_string(name)),
        None => error(vm, "Receiver must be a class."),
    }
}

fn class_supertype(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let superclass = match args[0] {
        Value::Obj(r) => vm.class_obj(r).and_then(|c| c.superclass),
        _ => None,
    };
    PrimResult::Value(superclass.map_or(Value::Null, Value::Obj))
}

// ==================== Bool / Null ====================

pub(super) fn bind_bool(vm: &mut Vm, class: ObjRef) {
    bind(vm, class, "!", bool_not);
    bind(vm, class, "toString", bool_to_string);
}

pub(super) fn bind_null(vm: &mut Vm, class: ObjRef) {
    bind(vm, class, "!", null_not);
    bind(vm, class, "toString", null_to_string);
}

fn bool_not(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::bool(args[0] == Value::FALSE))
}

fn bool_to_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = if args[0] == Value::TRUE { "true" } else { "false" };
    PrimResult::Value(vm.new_string(text))
}

fn null_not(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::TRUE)
}

fn null_to_string(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(vm.new_string("null"))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{output, runtime_error};

    #[test]
    fn test_equality_and_identity() {
        let out = output(
            "class A {\n  construct new() {}\n}\nvar a = A.new()\nSystem.print(a == a)\nSystem.print(a == A.new())\nSystem.print(\"x\" == \"x\")\nSystem.print(Object.same(1, 1))\nSystem.print(1 != 2)",
        );
        assert_eq!(out, "true\nfalse\ntrue\ntrue\ntrue\n");
    }

    #[test]
    fn test_class_reflection() {
        let out = output(
            "class A {}\nclass B is A {}\nSystem.print(B.name)\nSystem.print(B.supertype)\nSystem.print(Object.supertype)\nSystem.print(1.type)\nSystem.print(B)\nSystem.print(B.type)",
        );
        assert_eq!(out, "B\nA\nnull\nNum\nB\nB metaclass\n");
    }

    #[test]
    fn test_not_and_to_string() {
        let out = output("System.print(!true)\nSystem.print(!null)\nSystem.print(!0)\nSystem.print(null)\nSystem.print(false)");
        assert_eq!(out, "false\ntrue\nfalse\nnull\nfalse\n");
    }

    #[test]
    fn test_is_requires_class() {
        assert_eq!(runtime_error("1 is 2"), "Right operand must be a class.");
    }

    #[test]
    fn test_default_to_string() {
        let out = output("class A {\n  construct new() {}\n}\nSystem.print(A.new())");
        assert_eq!(out, "instance of A\n");
    }
}
