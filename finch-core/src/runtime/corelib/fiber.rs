//! Fiber

use super::{bind, bind_static, error};
use crate::runtime::object::{FiberObj, ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::{Resume, Vm};

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    bind_static(vm, class, "new(_)", fiber_new);
    bind_static(vm, class, "abort(_)", fiber_abort);
    bind_static(vm, class, "current", fiber_current);
    bind_static(vm, class, "suspend()", fiber_suspend);
    bind_static(vm, class, "yield()", fiber_yield);
    bind_static(vm, class, "yield(_)", fiber_yield1);

    bind(vm, class, "call()", fiber_call);
    bind(vm, class, "call(_)", fiber_call1);
    bind(vm, class, "try()", fiber_try);
    bind(vm, class, "try(_)", fiber_try1);
    bind(vm, class, "transfer()", fiber_transfer);
    bind(vm, class, "transfer(_)", fiber_transfer1);
    bind(vm, class, "transferError(_)", fiber_transfer_error);
    bind(vm, class, "error", fiber_error);
    bind(vm, class, "isDone", fiber_is_done);
}

fn receiver(vm: &Vm, value: Value) -> Option<ObjRef> {
    match value {
        Value::Obj(r) if matches!(vm.heap[r], ObjKind::Fiber(_)) => Some(r),
        _ => None,
    }
}

// ==================== 静态 ====================

fn fiber_new(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let closure = match args[1] {
        Value::Obj(r) => match &vm.heap[r] {
            ObjKind::Closure(c) => Some((r, c.function)),
            _ => None,
        },
        _ => None,
    };
    let Some((closure, function)) = closure else {
        return error(vm, "Argument must be a function.");
    };
    let arity = match &vm.heap[function] {
        ObjKind::Function(f) => f.arity,
        _ => 0,
    };
    if arity > 1 {
        return error(vm, "Function cannot take more than one parameter.");
    }
    // 参数槽位里的闭包在分配期间仍是根
    let fiber = vm.alloc(ObjKind::Fiber(Box::new(FiberObj::new(closure))));
    PrimResult::Value(Value::Obj(fiber))
}

fn fiber_abort(_vm: &mut Vm, args: &[Value]) -> PrimResult {
    if args[1].is_null() {
        return PrimResult::Value(Value::Null);
    }
    PrimResult::Error(args[1])
}

fn fiber_current(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(vm.fiber.map_or(Value::Null, Value::Obj))
}

fn fiber_suspend(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    vm.suspend_fiber()
}

fn fiber_yield(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    vm.yield_fiber(Value::Null)
}

fn fiber_yield1(vm: &mut Vm, args: &[Value]) -> PrimResult {
    vm.yield_fiber(args[1])
}

// ==================== 实例 ====================

fn resume(vm: &mut Vm, args: &[Value], mode: Resume) -> PrimResult {
    let Some(target) = receiver(vm, args[0]) else {
        return error(vm, "Receiver must be a fiber.");
    };
    vm.resume_fiber(target, args.get(1).copied(), mode)
}

fn fiber_call(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Call)
}

fn fiber_call1(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Call)
}

fn fiber_try(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Try)
}

fn fiber_try1(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Try)
}

fn fiber_transfer(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Transfer)
}

fn fiber_transfer1(vm: &mut Vm, args: &[Value]) -> PrimResult {
    resume(vm, args, Resume::Transfer)
}

/// 切换到目标纤程后立即在其中抛出错误
fn fiber_transfer_error(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let Some(target) = receiver(vm, args[0]) else {
        return error(vm, "Receiver must be a fiber.");
    };
    match vm.resume_fiber(target, None, Resume::Transfer) {
        PrimResult::FiberSwitch => PrimResult::Error(args[1]),
        other => other,
    }
}

fn fiber_error(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let error = receiver(vm, args[0]).map_or(Value::Null, |fiber| vm.fiber_ref(fiber).error);
    PrimResult::Value(error)
}

fn fiber_is_done(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let done = receiver(vm, args[0]).is_some_and(|fiber| vm.fiber_ref(fiber).is_done());
    PrimResult::Value(Value::bool(done))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{output, run, runtime_error};
    use crate::runtime::error::InterpretError;

    #[test]
    fn test_generator_pattern() {
        let out = output("var gen = Fiber.new {\n  for (i in 1..3) Fiber.yield(i)\n}\nwhile (true) {\n  var v = gen.call()\n  if (gen.isDone) break\n  System.print(v)\n}");
        assert_eq!(out, "1\n2\n3\n");
    }

    #[test]
    fn test_current_and_try_with_value() {
        let out = output("var main = Fiber.current\nSystem.print(main is Fiber)\nvar f = Fiber.new {|x| Fiber.abort(x) }\nSystem.print(f.try(\"bad\"))\nSystem.print(f.error)");
        assert_eq!(out, "true\nbad\nbad\n");
    }

    #[test]
    fn test_abort_null_is_no_op() {
        let out = output("Fiber.abort(null)\nSystem.print(\"still here\")");
        assert_eq!(out, "still here\n");
    }

    #[test]
    fn test_transfer_switches_without_caller() {
        let out = output("var main = Fiber.current\nvar other = Fiber.new {\n  System.print(\"in other\")\n  main.transfer(\"back\")\n}\nSystem.print(other.transfer())");
        assert_eq!(out, "in other\nback\n");
    }

    #[test]
    fn test_transfer_error_fails_target() {
        let (result, _) = run("var f = Fiber.new {\n  Fiber.yield()\n}\nf.call()\nf.transferError(\"oops\")");
        let Err(InterpretError::Runtime(err)) = result else {
            panic!("expected runtime error");
        };
        assert_eq!(err.message, "oops");
    }

    #[test]
    fn test_suspend_stops_interpreter() {
        let out = output("System.print(\"before\")\nFiber.suspend()\nSystem.print(\"after\")");
        assert_eq!(out, "before\n");
    }

    #[test]
    fn test_constructor_checks() {
        assert_eq!(runtime_error("Fiber.new(1)"), "Argument must be a function.");
        assert_eq!(
            runtime_error("Fiber.new {|a, b| a }"),
            "Function cannot take more than one parameter."
        );
    }
}
