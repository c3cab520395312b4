//! run() 主执行循环
//!
//! 当前帧的常用字段缓存在 [`FrameCtx`] 中；调用、返回或切换纤程后
//! 由 `Flow::Reload` 通知循环重新从纤程栈顶帧加载。

use super::Vm;
use crate::runtime::bytecode::{Chunk, OpCode};
use crate::runtime::error::RuntimeError;
use crate::runtime::object::{CallFrame, ClosureObj, ObjKind, UpvalueObj};
use crate::runtime::value::{ObjRef, Value};
use std::sync::Arc;

/// 正在执行的帧
pub(crate) struct FrameCtx {
    pub fiber: ObjRef,
    pub closure: ObjRef,
    pub chunk: Arc<Chunk>,
    pub constants: Arc<[Value]>,
    pub module: ObjRef,
    pub base: usize,
    pub ip: usize,
    pub field_offset: usize,
    pub owner_class: Option<ObjRef>,
}

pub(crate) enum Flow {
    Next,
    /// 帧或纤程已改变
    Reload,
}

impl Vm {
    /// 执行当前纤程，直到没有可运行的纤程
    pub(crate) fn run(&mut self) -> Result<(), RuntimeError> {
        while let Some(fiber) = self.fiber {
            let Some(mut ctx) = self.load_frame(fiber) else {
                self.fiber = None;
                break;
            };
            loop {
                match self.step(&mut ctx) {
                    Ok(Flow::Next) => {}
                    Ok(Flow::Reload) => break,
                    Err(error) => {
                        self.store_ip(&ctx);
                        self.throw(error)?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn load_frame(&self, fiber: ObjRef) -> Option<FrameCtx> {
        let frame = *self.fiber_ref(fiber).frames.last()?;
        let ObjKind::Closure(closure) = &self.heap[frame.closure] else {
            return None;
        };
        let ObjKind::Function(function) = &self.heap[closure.function] else {
            return None;
        };
        Some(FrameCtx {
            fiber,
            closure: frame.closure,
            chunk: function.chunk.clone(),
            constants: function.constants.clone(),
            module: function.module,
            base: frame.base,
            ip: frame.ip,
            field_offset: function.field_offset,
            owner_class: function.owner_class,
        })
    }

    /// 把缓存的 ip 写回纤程栈顶帧
    pub(crate) fn store_ip(&mut self, ctx: &FrameCtx) {
        if let Some(frame) = self.fiber_mut(ctx.fiber).frames.last_mut() {
            frame.ip = ctx.ip;
        }
    }

    // ==================== 栈操作 ====================

    #[inline]
    pub(crate) fn push(&mut self, fiber: ObjRef, value: Value) {
        self.fiber_mut(fiber).stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self, fiber: ObjRef) -> Value {
        self.fiber_mut(fiber).stack.pop().unwrap_or_default()
    }

    #[inline]
    pub(crate) fn peek(&self, fiber: ObjRef, distance: usize) -> Value {
        let stack = &self.fiber_ref(fiber).stack;
        stack
            .len()
            .checked_sub(distance + 1)
            .map_or(Value::Null, |i| stack[i])
    }

    #[inline]
    fn slot(&self, ctx: &FrameCtx, index: usize) -> Value {
        self.fiber_ref(ctx.fiber)
            .stack
            .get(ctx.base + index)
            .copied()
            .unwrap_or_default()
    }

    // ==================== 指令读取 ====================

    #[inline]
    fn read_u8(ctx: &mut FrameCtx) -> u8 {
        let byte = ctx.chunk.code[ctx.ip];
        ctx.ip += 1;
        byte
    }

    #[inline]
    fn read_u16(ctx: &mut FrameCtx) -> u16 {
        let value = ctx.chunk.read_u16(ctx.ip);
        ctx.ip += 2;
        value
    }

    #[inline]
    fn read_i16(ctx: &mut FrameCtx) -> i16 {
        let value = ctx.chunk.read_i16(ctx.ip);
        ctx.ip += 2;
        value
    }

    #[inline]
    fn jump(ctx: &mut FrameCtx, offset: i16) {
        ctx.ip = (ctx.ip as isize + offset as isize) as usize;
    }

    fn constant(&self, ctx: &FrameCtx, index: u16) -> Value {
        ctx.constants.get(index as usize).copied().unwrap_or_default()
    }

    fn constant_str(&self, ctx: &FrameCtx, index: u16) -> String {
        let value = self.constant(ctx, index);
        self.as_str(value).unwrap_or_default().to_string()
    }

    // ==================== 单步执行 ====================

    fn step(&mut self, ctx: &mut FrameCtx) -> Result<Flow, Value> {
        let byte = Self::read_u8(ctx);
        let Some(op) = OpCode::from_u8(byte) else {
            return Err(self.error_value(format!("Invalid opcode {byte}.")));
        };

        #[cfg(feature = "trace_execution")]
        tracing::trace!(
            target: "finch::vm",
            ip = ctx.ip - 1,
            op = op.name(),
            depth = self.fiber_ref(ctx.fiber).stack.len(),
        );

        let fiber = ctx.fiber;
        match op {
            // ===== 常量 =====
            OpCode::Constant => {
                let index = Self::read_u16(ctx);
                let value = self.constant(ctx, index);
                self.push(fiber, value);
            }
            OpCode::Null => self.push(fiber, Value::Null),
            OpCode::True => self.push(fiber, Value::TRUE),
            OpCode::False => self.push(fiber, Value::FALSE),

            // ===== 变量 =====
            OpCode::LoadLocal => {
                let slot = Self::read_u8(ctx) as usize;
                let value = self.slot(ctx, slot);
                self.push(fiber, value);
            }
            OpCode::StoreLocal => {
                let slot = Self::read_u8(ctx) as usize;
                let value = self.peek(fiber, 0);
                let index = ctx.base + slot;
                if let Some(target) = self.fiber_mut(fiber).stack.get_mut(index) {
                    *target = value;
                }
            }
            OpCode::LoadUpvalue => {
                let index = Self::read_u8(ctx) as usize;
                let upvalue = self.closure_upvalue(ctx.closure, index);
                let value = self.read_upvalue(upvalue);
                self.push(fiber, value);
            }
            OpCode::StoreUpvalue => {
                let index = Self::read_u8(ctx) as usize;
                let upvalue = self.closure_upvalue(ctx.closure, index);
                let value = self.peek(fiber, 0);
                self.write_upvalue(upvalue, value);
            }
            OpCode::LoadModuleVar => {
                let index = Self::read_u16(ctx) as usize;
                let value = match &self.heap[ctx.module] {
                    ObjKind::Module(module) => module.variables.get(index).copied().unwrap_or_default(),
                    _ => Value::Null,
                };
                self.push(fiber, value);
            }
            OpCode::StoreModuleVar => {
                let index = Self::read_u16(ctx) as usize;
                let value = self.peek(fiber, 0);
                if let ObjKind::Module(module) = &mut self.heap[ctx.module] {
                    if let Some(target) = module.variables.get_mut(index) {
                        *target = value;
                    }
                }
            }
            OpCode::LoadFieldThis => {
                let index = Self::read_u8(ctx) as usize + ctx.field_offset;
                let receiver = self.slot(ctx, 0);
                let value = self.load_field(receiver, index)?;
                self.push(fiber, value);
            }
            OpCode::StoreFieldThis => {
                let index = Self::read_u8(ctx) as usize + ctx.field_offset;
                let receiver = self.slot(ctx, 0);
                let value = self.peek(fiber, 0);
                self.store_field(receiver, index, value)?;
            }
            OpCode::LoadField => {
                let index = Self::read_u8(ctx) as usize + ctx.field_offset;
                let receiver = self.pop(fiber);
                let value = self.load_field(receiver, index)?;
                self.push(fiber, value);
            }
            OpCode::StoreField => {
                let index = Self::read_u8(ctx) as usize + ctx.field_offset;
                let value = self.pop(fiber);
                let receiver = self.pop(fiber);
                self.store_field(receiver, index, value)?;
                self.push(fiber, value);
            }

            OpCode::Pop => {
                self.pop(fiber);
            }

            // ===== 调用 =====
            OpCode::Call | OpCode::Super => {
                let argc = Self::read_u8(ctx) as usize;
                let symbol = Self::read_u16(ctx) as usize;
                self.store_ip(ctx);
                let args_start = self.fiber_ref(fiber).stack.len() - argc - 1;
                let class = if op == OpCode::Super {
                    let owner = ctx.owner_class.and_then(|c| self.class_obj(c)?.superclass);
                    match owner {
                        Some(superclass) => superclass,
                        None => return Err(self.error_value("Cannot use 'super' outside of a method.")),
                    }
                } else {
                    let receiver = self.fiber_ref(fiber).stack[args_start];
                    self.class_of(receiver)
                };
                return self.call_method(fiber, class, symbol, args_start, argc);
            }

            // ===== 控制流 =====
            OpCode::Jump => {
                let offset = Self::read_i16(ctx);
                Self::jump(ctx, offset);
            }
            OpCode::Loop => {
                let offset = Self::read_i16(ctx);
                Self::jump(ctx, offset);
            }
            OpCode::JumpIfFalse => {
                let offset = Self::read_i16(ctx);
                if self.pop(fiber).is_falsy() {
                    Self::jump(ctx, offset);
                }
            }
            OpCode::And => {
                let offset = Self::read_i16(ctx);
                if self.peek(fiber, 0).is_falsy() {
                    Self::jump(ctx, offset);
                } else {
                    self.pop(fiber);
                }
            }
            OpCode::Or => {
                let offset = Self::read_i16(ctx);
                if self.peek(fiber, 0).is_falsy() {
                    self.pop(fiber);
                } else {
                    Self::jump(ctx, offset);
                }
            }
            OpCode::CloseUpvalue => {
                let top = self.fiber_ref(fiber).stack.len().saturating_sub(1);
                self.close_upvalues(fiber, top);
                self.pop(fiber);
            }
            OpCode::Return => {
                let result = self.pop(fiber);
                self.close_upvalues(fiber, ctx.base);
                let frames_left = {
                    let state = self.fiber_mut(fiber);
                    state.frames.pop();
                    state.frames.len()
                };
                if frames_left == 0 {
                    self.finish_fiber(fiber, result);
                } else {
                    let state = self.fiber_mut(fiber);
                    state.stack.truncate(ctx.base);
                    state.stack.push(result);
                }
                return Ok(Flow::Reload);
            }

            // ===== 闭包与类 =====
            OpCode::Closure => {
                let index = Self::read_u16(ctx);
                let function = self.constant(ctx, index);
                let Value::Obj(function) = function else {
                    return Err(self.error_value("Closure constant is not a function."));
                };
                let count = match &self.heap[function] {
                    ObjKind::Function(f) => f.upvalue_count,
                    _ => 0,
                };
                let mut upvalues = Vec::with_capacity(count);
                for _ in 0..count {
                    let is_local = Self::read_u8(ctx) != 0;
                    let index = Self::read_u8(ctx) as usize;
                    let upvalue = if is_local {
                        self.capture_upvalue(fiber, ctx.base + index)
                    } else {
                        self.closure_upvalue(ctx.closure, index)
                    };
                    upvalues.push(upvalue);
                }
                let closure = self.alloc(ObjKind::Closure(ClosureObj { function, upvalues }));
                self.push(fiber, Value::Obj(closure));
            }
            OpCode::Construct => {
                let class = self.slot(ctx, 0);
                let instance = self.construct_instance(class)?;
                self.fiber_mut(fiber).stack[ctx.base] = instance;
            }
            OpCode::ForeignConstruct => {
                self.store_ip(ctx);
                self.construct_foreign(fiber, ctx.base)?;
            }
            OpCode::Class => {
                let num_fields = Self::read_u8(ctx) as usize;
                self.declare_class(ctx, Some(num_fields))?;
            }
            OpCode::ForeignClass => {
                self.declare_class(ctx, None)?;
            }
            OpCode::MethodInstance | OpCode::MethodStatic => {
                let symbol = Self::read_u16(ctx) as usize;
                let method = self.peek(fiber, 0);
                let class = self.peek(fiber, 1);
                self.bind_method(class, symbol, method, op == OpCode::MethodStatic)?;
                self.pop(fiber);
                self.pop(fiber);
            }
            OpCode::ForeignMethod => {
                let symbol = Self::read_u16(ctx) as usize;
                let is_static = Self::read_u8(ctx) != 0;
                let class = self.pop(fiber);
                self.bind_foreign_method(ctx.module, class, symbol, is_static)?;
            }

            // ===== 模块 =====
            OpCode::ImportModule => {
                let index = Self::read_u16(ctx);
                let name = self.constant_str(ctx, index);
                self.store_ip(ctx);
                return self.import_module(fiber, &name);
            }
            OpCode::ImportVariable => {
                let module = Self::read_u16(ctx);
                let variable = Self::read_u16(ctx);
                let module = self.constant_str(ctx, module);
                let variable = self.constant_str(ctx, variable);
                let value = self.import_variable(&module, &variable)?;
                self.push(fiber, value);
            }
        }
        Ok(Flow::Next)
    }

    // ==================== 字段 ====================

    fn load_field(&mut self, receiver: Value, index: usize) -> Result<Value, Value> {
        if let Value::Obj(r) = receiver {
            if let ObjKind::Instance { fields, .. } = &self.heap[r] {
                return Ok(fields.get(index).copied().unwrap_or_default());
            }
        }
        Err(self.error_value("Only instances have fields."))
    }

    fn store_field(&mut self, receiver: Value, index: usize, value: Value) -> Result<(), Value> {
        if let Value::Obj(r) = receiver {
            if let ObjKind::Instance { fields, .. } = &mut self.heap[r] {
                if let Some(field) = fields.get_mut(index) {
                    *field = value;
                }
                return Ok(());
            }
        }
        Err(self.error_value("Only instances have fields."))
    }

    // ==================== Upvalue ====================

    fn closure_upvalue(&self, closure: ObjRef, index: usize) -> ObjRef {
        match &self.heap[closure] {
            ObjKind::Closure(c) => c.upvalues[index],
            other => panic!("heap invariant violated: expected closure, found {}", other.type_name()),
        }
    }

    fn read_upvalue(&self, upvalue: ObjRef) -> Value {
        match &self.heap[upvalue] {
            ObjKind::Upvalue(UpvalueObj::Open { fiber, slot }) => {
                self.fiber_ref(*fiber).stack.get(*slot).copied().unwrap_or_default()
            }
            ObjKind::Upvalue(UpvalueObj::Closed(value)) => *value,
            _ => Value::Null,
        }
    }

    fn write_upvalue(&mut self, upvalue: ObjRef, value: Value) {
        let open = match &self.heap[upvalue] {
            ObjKind::Upvalue(UpvalueObj::Open { fiber, slot }) => Some((*fiber, *slot)),
            _ => None,
        };
        match open {
            Some((fiber, slot)) => {
                if let Some(target) = self.fiber_mut(fiber).stack.get_mut(slot) {
                    *target = value;
                }
            }
            None => self.heap[upvalue] = ObjKind::Upvalue(UpvalueObj::Closed(value)),
        }
    }

    /// 同一个槽位只创建一个 upvalue
    fn capture_upvalue(&mut self, fiber: ObjRef, slot: usize) -> ObjRef {
        let open = &self.fiber_ref(fiber).open_upvalues;
        if let Some((_, upvalue)) = open.iter().find(|(s, _)| *s == slot) {
            return *upvalue;
        }
        let upvalue = self.alloc(ObjKind::Upvalue(UpvalueObj::Open { fiber, slot }));
        let open = &mut self.fiber_mut(fiber).open_upvalues;
        let position = open.partition_point(|(s, _)| *s < slot);
        open.insert(position, (slot, upvalue));
        upvalue
    }

    /// 关闭所有指向 `from` 及以上槽位的 upvalue
    pub(crate) fn close_upvalues(&mut self, fiber: ObjRef, from: usize) {
        let state = self.fiber_mut(fiber);
        let position = state.open_upvalues.partition_point(|(s, _)| *s < from);
        let closing: Vec<(usize, ObjRef)> = state.open_upvalues.drain(position..).collect();
        for (slot, upvalue) in closing {
            let value = self.fiber_ref(fiber).stack.get(slot).copied().unwrap_or_default();
            self.heap[upvalue] = ObjKind::Upvalue(UpvalueObj::Closed(value));
        }
    }

    // ==================== 帧 ====================

    /// 以 `args_start` 处的参数区为新帧调用闭包
    pub(crate) fn call_closure(
        &mut self,
        fiber: ObjRef,
        closure: ObjRef,
        args_start: usize,
        argc: usize,
    ) -> Result<Flow, Value> {
        let arity = match &self.heap[closure] {
            ObjKind::Closure(c) => match &self.heap[c.function] {
                ObjKind::Function(f) => f.arity,
                _ => 0,
            },
            _ => return Err(self.error_value("Value is not a function.")),
        };
        if argc < arity {
            return Err(self.error_value("Function expects more arguments."));
        }

        let state = self.fiber_ref(fiber);
        if state.frames.len() >= self.limits.max_recursion_depth
            || state.stack.len() >= self.limits.max_stack_size
        {
            return Err(self.error_value("Stack overflow."));
        }
        let state = self.fiber_mut(fiber);
        // 多余的参数丢弃
        state.stack.truncate(args_start + arity + 1);
        state.frames.push(CallFrame {
            closure,
            ip: 0,
            base: args_start,
        });
        Ok(Flow::Reload)
    }
}
