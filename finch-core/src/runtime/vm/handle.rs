//! 句柄
//!
//! 句柄让宿主在槽位之外长期持有一个值（作为 GC 根），
//! 调用句柄则封装了一个方法签名，用于从宿主调用脚本方法。

use super::Vm;
use crate::runtime::bytecode::{Chunk, OpCode};
use crate::runtime::error::{HostContractViolation, InterpretError};
use crate::runtime::object::{CallFrame, ClosureObj, FiberObj, FunctionObj, ObjKind};
use crate::runtime::value::{ObjRef, Value};
use std::sync::Arc;

/// 宿主持有的值的引用
///
/// 不可复制；用 [`Vm::release_handle`] 释放后值才可能被回收。
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum HandleEntry {
    Value(Value),
    Call {
        closure: ObjRef,
        arity: usize,
        signature: String,
    },
}

/// 签名的参数个数；格式无效时返回 None
///
/// 接受 `name`、`name(_,_)`、`name=(_)`、`[_]`、`[_]=(_)` 以及运算符签名。
fn signature_arity(signature: &str) -> Option<usize> {
    let head = signature.find(|c| c == '(' || c == '[').unwrap_or(signature.len());
    let (name, mut rest) = signature.split_at(head);
    if name.is_empty() && !rest.starts_with('[') {
        return None;
    }
    if name.chars().any(|c| c.is_whitespace() || matches!(c, ')' | ']' | ',')) {
        return None;
    }

    let mut arity = 0;
    while let Some(open) = rest.chars().next() {
        let close = match open {
            '(' => ')',
            '[' => ']',
            '=' => {
                rest = &rest[1..];
                if !rest.starts_with('(') {
                    return None;
                }
                continue;
            }
            _ => return None,
        };
        let end = rest.find(close)?;
        let inner = &rest[1..end];
        if inner.is_empty() {
            if close == ']' {
                return None;
            }
        } else {
            for part in inner.split(',') {
                if part != "_" {
                    return None;
                }
                arity += 1;
            }
        }
        rest = &rest[end + 1..];
    }
    Some(arity)
}

impl Vm {
    fn insert_handle(&mut self, entry: HandleEntry) -> Handle {
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, entry);
        Handle { id }
    }

    /// 为槽位中的值创建句柄
    pub fn get_slot_handle(&mut self, slot: usize) -> Result<Handle, HostContractViolation> {
        let value = self.slot_value(slot)?;
        Ok(self.insert_handle(HandleEntry::Value(value)))
    }

    /// 把句柄引用的值放入槽位
    pub fn set_slot_handle(&mut self, slot: usize, handle: &Handle) -> Result<(), HostContractViolation> {
        let value = match self.handles.get(&handle.id) {
            Some(HandleEntry::Value(value)) => *value,
            Some(HandleEntry::Call { closure, .. }) => Value::Obj(*closure),
            None => return Err(HostContractViolation::InvalidHandle),
        };
        self.set_slot_value(slot, value)
    }

    pub fn release_handle(&mut self, handle: Handle) {
        if self.handles.remove(&handle.id).is_none() {
            tracing::warn!(target: "finch::vm", id = handle.id, "released unknown handle");
        }
    }

    /// 为方法签名创建调用句柄
    ///
    /// 句柄内部是一个只做一次方法调用的函数：接收者在槽位 0，参数依次在后。
    pub fn make_call_handle(&mut self, signature: &str) -> Result<Handle, HostContractViolation> {
        let arity = signature_arity(signature)
            .filter(|&arity| arity <= 16)
            .ok_or_else(|| HostContractViolation::InvalidSignature(signature.to_string()))?;
        // 调用指令的符号操作数只有 16 位
        let symbol = u16::try_from(self.symbols.ensure(signature))
            .map_err(|_| HostContractViolation::InvalidSignature(signature.to_string()))?;

        let mut chunk = Chunk::new();
        chunk.write_op_u8(OpCode::Call, arity as u8, 0);
        chunk.write_u16(symbol, 0);
        chunk.write_op(OpCode::Return, 0);

        let function = self.alloc(ObjKind::Function(FunctionObj {
            name: signature.to_string(),
            arity,
            upvalue_count: 0,
            chunk: Arc::new(chunk),
            constants: Arc::from(Vec::new()),
            module: self.core_module,
            field_offset: 0,
            owner_class: None,
        }));
        self.temp_roots.push(Value::Obj(function));
        let closure = self.alloc(ObjKind::Closure(ClosureObj {
            function,
            upvalues: Vec::new(),
        }));
        self.temp_roots.pop();

        Ok(self.insert_handle(HandleEntry::Call {
            closure,
            arity,
            signature: signature.to_string(),
        }))
    }

    /// 用调用句柄调用方法
    ///
    /// 接收者和参数取自当前窗口的槽位 0..=arity，返回值写回槽位 0。
    pub fn call(&mut self, handle: &Handle) -> Result<(), InterpretError> {
        let (closure, arity, signature) = match self.handles.get(&handle.id) {
            Some(HandleEntry::Call {
                closure,
                arity,
                signature,
            }) => (*closure, *arity, signature.clone()),
            Some(HandleEntry::Value(_)) => return Err(HostContractViolation::NotACallHandle.into()),
            None => return Err(HostContractViolation::InvalidHandle.into()),
        };

        let args = (0..=arity)
            .map(|slot| self.slot_value(slot))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(target: "finch::vm", signature = %signature, "host call");

        let mut fiber = FiberObj::new(closure);
        fiber.stack = args;
        fiber.frames = vec![CallFrame {
            closure,
            ip: 0,
            base: 0,
        }];
        let fiber = self.alloc(ObjKind::Fiber(Box::new(fiber)));

        let result = self.run_nested(fiber)?;
        self.set_slot_value(0, result)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::Configuration;

    #[test]
    fn test_signature_arity() {
        assert_eq!(signature_arity("update()"), Some(0));
        assert_eq!(signature_arity("name"), Some(0));
        assert_eq!(signature_arity("add(_,_)"), Some(2));
        assert_eq!(signature_arity("name=(_)"), Some(1));
        assert_eq!(signature_arity("[_]"), Some(1));
        assert_eq!(signature_arity("[_,_]=(_)"), Some(3));
        assert_eq!(signature_arity("+(_)"), Some(1));
        assert_eq!(signature_arity("-"), Some(0));

        assert_eq!(signature_arity(""), None);
        assert_eq!(signature_arity("f(x)"), None);
        assert_eq!(signature_arity("f(_"), None);
        assert_eq!(signature_arity("[]"), None);
        assert_eq!(signature_arity("f(_)x"), None);
    }

    #[test]
    fn test_call_static_method() {
        let mut vm = Vm::new(Configuration::default());
        vm.interpret("main", "class Calc {\n  static add(a, b) { a + b }\n}").unwrap();
        let add = vm.make_call_handle("add(_,_)").unwrap();

        vm.ensure_slots(3);
        vm.get_variable("main", "Calc", 0).unwrap();
        vm.set_slot_double(1, 2.0).unwrap();
        vm.set_slot_double(2, 40.0).unwrap();
        vm.call(&add).unwrap();
        assert_eq!(vm.get_slot_double(0).unwrap(), 42.0);
        vm.release_handle(add);
    }

    #[test]
    fn test_call_surfaces_runtime_error() {
        let mut vm = Vm::new(Configuration::default().with_error_fn(|_| {}));
        vm.interpret("main", "class Bad {\n  static go() { Fiber.abort(\"nope\") }\n}").unwrap();
        let go = vm.make_call_handle("go()").unwrap();
        vm.ensure_slots(1);
        vm.get_variable("main", "Bad", 0).unwrap();
        let err = vm.call(&go).unwrap_err();
        assert!(matches!(err, InterpretError::Runtime(ref e) if e.message == "nope"));

        // 失败后虚拟机仍可使用
        vm.interpret("main", "var ok = 1").unwrap();
    }

    #[test]
    fn test_value_handle_keeps_object_alive() {
        let mut vm = Vm::new(Configuration::default());
        vm.ensure_slots(1);
        vm.set_slot_string(0, "held").unwrap();
        let handle = vm.get_slot_handle(0).unwrap();
        vm.set_slot_null(0).unwrap();
        vm.collect_garbage();

        vm.set_slot_handle(0, &handle).unwrap();
        assert_eq!(vm.get_slot_string(0).unwrap(), "held");
        assert_eq!(
            vm.call(&handle),
            Err(InterpretError::Host(HostContractViolation::NotACallHandle))
        );
        vm.release_handle(handle);
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let mut vm = Vm::new(Configuration::default());
        assert_eq!(
            vm.make_call_handle("bad sig"),
            Err(HostContractViolation::InvalidSignature("bad sig".to_string()))
        );
    }

    #[test]
    fn test_symbol_past_operand_range_rejected() {
        let mut vm = Vm::new(Configuration::default());
        while vm.symbols.len() <= u16::MAX as usize {
            let name = format!("m{}()", vm.symbols.len());
            vm.symbols.ensure(&name);
        }
        assert_eq!(
            vm.make_call_handle("late(_)"),
            Err(HostContractViolation::InvalidSignature("late(_)".to_string()))
        );
        // 已有的小符号照常可用
        assert!(vm.make_call_handle("toString").is_ok());
    }

    #[test]
    fn test_call_requires_enough_slots() {
        let mut vm = Vm::new(Configuration::default());
        let handle = vm.make_call_handle("f(_)").unwrap();
        assert_eq!(
            vm.call(&handle),
            Err(InterpretError::Host(HostContractViolation::NoSlotWindow))
        );
        vm.ensure_slots(1);
        assert_eq!(
            vm.call(&handle),
            Err(InterpretError::Host(HostContractViolation::SlotOutOfRange { index: 1, count: 1 }))
        );
    }
}
