//! 方法分派

use super::execution::Flow;
use super::Vm;
use crate::runtime::object::{Method, PrimResult};
use crate::runtime::value::{ObjRef, Value};

/// 接收者 + 最多 16 个参数
const MAX_ARGS: usize = 17;

impl Vm {
    /// 在 `class` 的方法表中查找 `symbol` 并调用
    ///
    /// 接收者位于 `args_start`，其后是 `argc` 个参数；结果写回接收者槽位。
    pub(crate) fn call_method(
        &mut self,
        fiber: ObjRef,
        class: ObjRef,
        symbol: usize,
        args_start: usize,
        argc: usize,
    ) -> Result<Flow, Value> {
        let method = self.class_obj(class).and_then(|c| c.method(symbol)).cloned();
        let Some(method) = method else {
            let message = format!(
                "{} does not implement '{}'.",
                self.class_name(class),
                self.symbols.name(symbol)
            );
            return Err(self.error_value(message));
        };

        match method {
            Method::Primitive(primitive) => {
                let mut args = [Value::Null; MAX_ARGS];
                let count = (argc + 1).min(MAX_ARGS);
                args[..count].copy_from_slice(&self.fiber_ref(fiber).stack[args_start..args_start + count]);

                match primitive(self, &args[..count]) {
                    PrimResult::Value(value) => {
                        let stack = &mut self.fiber_mut(fiber).stack;
                        stack.truncate(args_start + 1);
                        stack[args_start] = value;
                        Ok(Flow::Next)
                    }
                    PrimResult::Error(error) => {
                        if self.fiber != Some(fiber) {
                            self.fiber_mut(fiber).stack.truncate(args_start + 1);
                        }
                        Err(error)
                    }
                    PrimResult::Call(closure) => self.call_closure(fiber, closure, args_start, argc),
                    PrimResult::FiberSwitch => {
                        // 接收者槽位留作恢复时接收结果
                        let stack = &mut self.fiber_mut(fiber).stack;
                        stack.truncate(args_start + 1);
                        stack[args_start] = Value::Null;
                        Ok(Flow::Reload)
                    }
                }
            }
            Method::Foreign(function) => {
                self.call_foreign(fiber, &function, args_start, argc)?;
                Ok(Flow::Next)
            }
            Method::Block(closure) => self.call_closure(fiber, closure, args_start, argc),
            Method::Unbound { module } => {
                let class_name = self.class_name(class);
                let class_name = class_name.strip_suffix(" metaclass").unwrap_or(class_name);
                let message = format!(
                    "Could not find foreign method '{}' for class {} in module '{}'.",
                    self.symbols.name(symbol),
                    class_name,
                    module
                );
                Err(self.error_value(message))
            }
        }
    }
}
