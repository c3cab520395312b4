//! System

use super::{bind_static, prim_try, string_arg};
use crate::runtime::object::PrimResult;
use crate::runtime::value::{ObjRef, Value};
use crate::runtime::vm::Vm;
use once_cell::sync::Lazy;
use std::time::Instant;

/// 进程内第一次访问时开始计时
static START: Lazy<Instant> = Lazy::new(Instant::now);

pub(super) fn register(vm: &mut Vm, class: ObjRef) {
    Lazy::force(&START);
    bind_static(vm, class, "clock", system_clock);
    bind_static(vm, class, "gc()", system_gc);
    bind_static(vm, class, "writeString_(_)", system_write_string);
}

fn system_clock(_vm: &mut Vm, _args: &[Value]) -> PrimResult {
    PrimResult::Value(Value::Num(START.elapsed().as_secs_f64()))
}

fn system_gc(vm: &mut Vm, _args: &[Value]) -> PrimResult {
    vm.collect_garbage();
    PrimResult::Value(Value::Null)
}

fn system_write_string(vm: &mut Vm, args: &[Value]) -> PrimResult {
    let text = prim_try!(string_arg(vm, args[1], "Argument"));
    vm.write(&text);
    PrimResult::Value(args[1])
}
