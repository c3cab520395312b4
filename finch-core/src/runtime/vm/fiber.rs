//! 纤程切换与错误传播
//!
//! 纤程之间是协作式的：`call`/`try` 记录调用者并挂起当前纤程，
//! `yield` 把值交还给调用者，`transfer` 不记录调用者。
//! 运行时错误沿调用者链向上传递，直到遇到通过 `try` 启动的纤程。

use super::Vm;
use crate::runtime::config::{Diagnostic, DiagnosticKind};
use crate::runtime::error::{RuntimeError, TraceFrame};
use crate::runtime::object::{FiberObj, FiberState, ObjKind, PrimResult};
use crate::runtime::value::{ObjRef, Value};

/// 纤程被恢复的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    Call,
    Try,
    Transfer,
}

impl Resume {
    fn verb(self) -> &'static str {
        match self {
            Resume::Call | Resume::Try => "call",
            Resume::Transfer => "transfer to",
        }
    }
}

impl Vm {
    pub(crate) fn fiber_ref(&self, fiber: ObjRef) -> &FiberObj {
        match &self.heap[fiber] {
            ObjKind::Fiber(f) => f,
            other => panic!("heap invariant violated: expected fiber, found {}", other.type_name()),
        }
    }

    pub(crate) fn fiber_mut(&mut self, fiber: ObjRef) -> &mut FiberObj {
        match &mut self.heap[fiber] {
            ObjKind::Fiber(f) => f,
            other => panic!("heap invariant violated: expected fiber, found {}", other.type_name()),
        }
    }

    /// 把值放入纤程栈顶（调用结果槽位）
    fn set_top(&mut self, fiber: ObjRef, value: Value) {
        let stack = &mut self.fiber_mut(fiber).stack;
        match stack.last_mut() {
            Some(top) => *top = value,
            None => stack.push(value),
        }
    }

    // ==================== 切换 ====================

    /// 恢复另一个纤程（`call` / `try` / `transfer`）
    pub(crate) fn resume_fiber(&mut self, target: ObjRef, value: Option<Value>, mode: Resume) -> PrimResult {
        let (state, has_error, has_caller) = {
            let fiber = self.fiber_ref(target);
            (fiber.state, fiber.has_error(), fiber.caller.is_some())
        };
        if has_error || state == FiberState::Failed {
            let message = format!("Cannot {} an aborted fiber.", mode.verb());
            return PrimResult::Error(self.error_value(message));
        }
        if state == FiberState::Returned {
            let message = format!("Cannot {} a finished fiber.", mode.verb());
            return PrimResult::Error(self.error_value(message));
        }
        if has_caller || matches!(state, FiberState::Running | FiberState::SuspendedOnCall) {
            return PrimResult::Error(self.error_value("Fiber has already been called."));
        }

        if let Some(current) = self.fiber {
            let suspended = if mode == Resume::Transfer {
                FiberState::SuspendedOnYield
            } else {
                FiberState::SuspendedOnCall
            };
            self.fiber_mut(current).state = suspended;
            if mode != Resume::Transfer {
                self.fiber_mut(target).caller = Some(current);
            }
        }

        if state == FiberState::New {
            // 入口函数有一个参数时传入值
            let arity = self.fiber_entry_arity(target);
            if arity == 1 {
                self.push(target, value.unwrap_or_default());
            }
        } else {
            self.set_top(target, value.unwrap_or_default());
        }

        let fiber = self.fiber_mut(target);
        fiber.state = FiberState::Running;
        fiber.caller_is_trying = mode == Resume::Try;
        self.fiber = Some(target);
        PrimResult::FiberSwitch
    }

    fn fiber_entry_arity(&self, fiber: ObjRef) -> usize {
        let Some(frame) = self.fiber_ref(fiber).frames.first() else {
            return 0;
        };
        match &self.heap[frame.closure] {
            ObjKind::Closure(closure) => match &self.heap[closure.function] {
                ObjKind::Function(function) => function.arity,
                _ => 0,
            },
            _ => 0,
        }
    }

    /// 挂起当前纤程，把值交还给调用者；没有调用者时解释器停止
    pub(crate) fn yield_fiber(&mut self, value: Value) -> PrimResult {
        let Some(current) = self.fiber else {
            return PrimResult::Value(Value::Null);
        };
        let caller = {
            let fiber = self.fiber_mut(current);
            fiber.state = FiberState::SuspendedOnYield;
            fiber.caller_is_trying = false;
            fiber.caller.take()
        };
        match caller {
            Some(caller) => {
                self.set_top(caller, value);
                self.fiber_mut(caller).state = FiberState::Running;
                self.fiber = Some(caller);
            }
            None => self.fiber = None,
        }
        PrimResult::FiberSwitch
    }

    /// 挂起整个解释器
    pub(crate) fn suspend_fiber(&mut self) -> PrimResult {
        if let Some(current) = self.fiber.take() {
            self.fiber_mut(current).state = FiberState::SuspendedOnYield;
        }
        PrimResult::FiberSwitch
    }

    /// 根帧返回：纤程结束，结果交给调用者
    pub(crate) fn finish_fiber(&mut self, fiber: ObjRef, result: Value) {
        self.close_upvalues(fiber, 0);
        let caller = {
            let state = self.fiber_mut(fiber);
            state.state = FiberState::Returned;
            state.caller_is_trying = false;
            state.stack.clear();
            state.stack.push(result);
            state.caller.take()
        };
        match caller {
            Some(caller) => {
                self.set_top(caller, result);
                self.fiber_mut(caller).state = FiberState::Running;
                self.fiber = Some(caller);
            }
            None => self.fiber = None,
        }
    }

    // ==================== 错误 ====================

    /// 在当前纤程上抛出运行时错误
    ///
    /// 被 `try` 捕获时返回 `Ok`，解释器继续运行调用者；
    /// 否则整条调用链失败，错误交给错误回调并返回给宿主。
    pub(crate) fn throw(&mut self, error: Value) -> Result<(), RuntimeError> {
        let Some(origin) = self.fiber else {
            return Err(RuntimeError {
                message: self.display(error),
                stack_trace: Vec::new(),
            });
        };
        let stack_trace = self.stack_trace(origin);

        let mut current = origin;
        loop {
            let (caller, trying) = {
                let fiber = self.fiber_mut(current);
                fiber.error = error;
                fiber.state = FiberState::Failed;
                let trying = fiber.caller_is_trying;
                fiber.caller_is_trying = false;
                (fiber.caller.take(), trying)
            };
            match caller {
                Some(caller) if trying => {
                    self.set_top(caller, error);
                    self.fiber_mut(caller).state = FiberState::Running;
                    self.fiber = Some(caller);
                    tracing::debug!(target: "finch::vm", "error caught by try");
                    return Ok(());
                }
                Some(caller) => current = caller,
                None => break,
            }
        }

        self.fiber = None;
        let message = self.display(error);
        self.report(Diagnostic {
            kind: DiagnosticKind::Runtime,
            module: String::new(),
            line: 0,
            message: message.clone(),
        });
        for frame in &stack_trace {
            self.report(Diagnostic {
                kind: DiagnosticKind::StackTrace,
                module: frame.module.clone(),
                line: frame.line,
                message: frame.function.clone(),
            });
        }
        Err(RuntimeError { message, stack_trace })
    }

    /// 最内层帧在前；核心模块中的帧不出现在栈追踪里
    pub(crate) fn stack_trace(&self, fiber: ObjRef) -> Vec<TraceFrame> {
        let mut trace = Vec::new();
        for frame in self.fiber_ref(fiber).frames.iter().rev() {
            let ObjKind::Closure(closure) = &self.heap[frame.closure] else {
                continue;
            };
            let ObjKind::Function(function) = &self.heap[closure.function] else {
                continue;
            };
            if function.module == self.core_module {
                continue;
            }
            let module = match &self.heap[function.module] {
                ObjKind::Module(module) => module.name.clone(),
                _ => continue,
            };
            trace.push(TraceFrame {
                module,
                line: function.chunk.line_at(frame.ip.saturating_sub(1)),
                function: function.name.clone(),
            });
        }
        trace
    }

    // ==================== 嵌套执行 ====================

    /// 挂起当前纤程，把 `fiber` 运行到结束，然后恢复
    ///
    /// 返回纤程槽位 0 中的结果。
    pub(crate) fn run_nested(&mut self, fiber: ObjRef) -> Result<Value, RuntimeError> {
        self.suspended.push(self.fiber.take());
        self.fiber_mut(fiber).state = FiberState::Running;
        self.fiber = Some(fiber);

        let result = self.run();
        self.fiber = self.suspended.pop().flatten();
        result?;
        Ok(self.fiber_ref(fiber).stack.first().copied().unwrap_or_default())
    }
}
