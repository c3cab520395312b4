//! 代码生成：AST -> 字节码
//!
//! 每个模块编译成一个顶层函数原型。方法调用一律按签名编码成全局符号，
//! 模块变量按下标访问，局部变量和 upvalue 按槽位访问。

mod class;
pub mod scope;

use crate::compiler::parser::{Body, Call, Expr, ExprKind, FnDecl, ImportDecl, Stmt, StmtKind, SuperCall};
use crate::compiler::parser::expr::call_signature;
use crate::runtime::bytecode::{Constant, FnProto, OpCode};
use crate::runtime::error::CompileError;
use crate::runtime::symbol::SymbolTable;
use class::ClassInfo;
use scope::{FnKind, FnState, Local, LoopState, ModuleVars, MAX_LOCALS, MAX_PARAMETERS};

pub type CgResult<T> = Result<T, CompileError>;

/// 模块编译结果
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub function: FnProto,
    /// 编译后模块的完整变量名表（包含原有变量）
    pub variable_names: Vec<String>,
}

/// 变量的存储位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarRef {
    Local(u8),
    Upvalue(u8),
    Module(u16),
}

/// 小写开头的名字在类内会被当作对 this 的方法调用
fn is_local_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
}

pub struct Codegen<'a> {
    module: String,
    vars: ModuleVars,
    symbols: &'a mut SymbolTable,
    fns: Vec<FnState>,
    classes: Vec<ClassInfo>,
}

/// 编译一个模块的语句列表
pub fn compile_module(
    module: &str,
    statements: &[Stmt],
    existing_vars: &[String],
    symbols: &mut SymbolTable,
) -> CgResult<CompiledModule> {
    let mut codegen = Codegen {
        module: module.to_string(),
        vars: ModuleVars::new(existing_vars),
        symbols,
        fns: vec![FnState::new("(script)".to_string(), FnKind::Script)],
        classes: Vec::new(),
    };

    for stmt in statements {
        codegen.statement(stmt)?;
    }
    let end_line = statements.last().map_or(1, |s| s.line);
    codegen.emit(OpCode::Null, end_line);
    codegen.emit(OpCode::Return, end_line);

    if let Some((name, line)) = codegen.vars.first_undefined() {
        return Err(codegen.error(line, format!("Variable '{name}' is used but not defined.")));
    }

    let state = codegen.fns.pop().ok_or_else(|| {
        CompileError::new(module, end_line, "Function stack underflow.")
    })?;
    let (function, _) = state.into_proto(module);
    Ok(CompiledModule {
        function,
        variable_names: codegen.vars.names,
    })
}

impl<'a> Codegen<'a> {
    // ==================== 基础设施 ====================

    fn error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::new(self.module.clone(), line, message)
    }

    fn current(&mut self) -> &mut FnState {
        let top = self.fns.len() - 1;
        &mut self.fns[top]
    }

    fn current_kind(&self) -> FnKind {
        self.fns[self.fns.len() - 1].kind
    }

    fn emit(&mut self, op: OpCode, line: usize) {
        self.current().chunk.write_op(op, line);
    }

    fn emit_u8(&mut self, op: OpCode, operand: u8, line: usize) {
        self.current().chunk.write_op_u8(op, operand, line);
    }

    fn emit_u16(&mut self, op: OpCode, operand: u16, line: usize) {
        self.current().chunk.write_op_u16(op, operand, line);
    }

    fn make_constant(&mut self, constant: Constant, line: usize) -> CgResult<u16> {
        let result = self.current().chunk.add_constant(constant);
        result.map_err(|message| self.error(line, message))
    }

    fn emit_constant(&mut self, constant: Constant, line: usize) -> CgResult<()> {
        let index = self.make_constant(constant, line)?;
        self.emit_u16(OpCode::Constant, index, line);
        Ok(())
    }

    fn emit_jump(&mut self, op: OpCode, line: usize) -> usize {
        self.current().chunk.write_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize, line: usize) -> CgResult<()> {
        let result = self.current().chunk.patch_jump(offset);
        result.map_err(|message| self.error(line, message))
    }

    fn emit_loop(&mut self, start: usize, line: usize) -> CgResult<()> {
        let result = self.current().chunk.write_loop(start, line);
        result.map_err(|message| self.error(line, message))
    }

    fn method_symbol(&mut self, signature: &str, line: usize) -> CgResult<u16> {
        let symbol = self.symbols.ensure(signature);
        u16::try_from(symbol).map_err(|_| self.error(line, "Too many method names."))
    }

    fn emit_call(&mut self, argc: usize, signature: &str, line: usize) -> CgResult<()> {
        if argc > MAX_PARAMETERS {
            return Err(self.error(
                line,
                format!("Methods cannot have more than {MAX_PARAMETERS} parameters."),
            ));
        }
        let symbol = self.method_symbol(signature, line)?;
        self.emit_u8(OpCode::Call, argc as u8, line);
        self.current().chunk.write_u16(symbol, line);
        Ok(())
    }

    // ==================== 变量 ====================

    fn module_var(&mut self, name: &str, line: usize) -> CgResult<u16> {
        let index = self.vars.declare_implicit(name, line);
        u16::try_from(index).map_err(|_| self.error(line, "Too many module variables."))
    }

    fn declare_local(&mut self, name: &str, line: usize) -> CgResult<u8> {
        let state = self.current();
        let depth = state.scope_depth;
        let duplicate = state
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth == depth)
            .any(|local| local.name == name);
        if duplicate {
            return Err(self.error(
                line,
                format!("Variable '{name}' is already declared in this scope."),
            ));
        }
        if self.current().locals.len() >= MAX_LOCALS {
            return Err(self.error(line, "Too many local variables in function."));
        }
        let state = self.current();
        state.locals.push(Local {
            name: name.to_string(),
            depth,
            captured: false,
        });
        Ok((state.locals.len() - 1) as u8)
    }

    fn at_module_scope(&self) -> bool {
        let state = &self.fns[self.fns.len() - 1];
        state.kind == FnKind::Script && state.scope_depth == 0
    }

    /// 栈顶的值成为新变量的值
    fn define_variable(&mut self, name: &str, line: usize) -> CgResult<VarRef> {
        if self.at_module_scope() {
            let index = self.vars.define(name).map_err(|message| self.error(line, message))?;
            let index = u16::try_from(index).map_err(|_| self.error(line, "Too many module variables."))?;
            self.emit_u16(OpCode::StoreModuleVar, index, line);
            self.emit(OpCode::Pop, line);
            Ok(VarRef::Module(index))
        } else {
            Ok(VarRef::Local(self.declare_local(name, line)?))
        }
    }

    fn load_var(&mut self, var: VarRef, line: usize) {
        match var {
            VarRef::Local(slot) => self.emit_u8(OpCode::LoadLocal, slot, line),
            VarRef::Upvalue(index) => self.emit_u8(OpCode::LoadUpvalue, index, line),
            VarRef::Module(index) => self.emit_u16(OpCode::LoadModuleVar, index, line),
        }
    }

    /// 局部变量或 upvalue（不查模块变量）
    fn resolve_nonmodule(&mut self, name: &str, line: usize) -> CgResult<Option<VarRef>> {
        let top = self.fns.len() - 1;
        if let Some(slot) = self.fns[top].resolve_local(name) {
            return Ok(Some(VarRef::Local(slot as u8)));
        }
        Ok(self.resolve_upvalue(top, name, line)?.map(VarRef::Upvalue))
    }

    fn resolve_upvalue(&mut self, fn_index: usize, name: &str, line: usize) -> CgResult<Option<u8>> {
        if fn_index == 0 {
            return Ok(None);
        }
        let parent = fn_index - 1;
        if let Some(slot) = self.fns[parent].resolve_local(name) {
            self.fns[parent].locals[slot].captured = true;
            let index = self.fns[fn_index]
                .add_upvalue(true, slot as u8)
                .map_err(|message| self.error(line, message))?;
            return Ok(Some(index as u8));
        }
        if let Some(upvalue) = self.resolve_upvalue(parent, name, line)? {
            let index = self.fns[fn_index]
                .add_upvalue(false, upvalue)
                .map_err(|message| self.error(line, message))?;
            return Ok(Some(index as u8));
        }
        Ok(None)
    }

    fn load_this(&mut self, line: usize) -> CgResult<()> {
        match self.resolve_nonmodule("this", line)? {
            Some(var) => {
                self.load_var(var, line);
                Ok(())
            }
            None => Err(self.error(line, "Cannot use 'this' outside of a method.")),
        }
    }

    // ==================== 作用域 ====================

    fn begin_scope(&mut self) {
        self.current().scope_depth += 1;
    }

    fn end_scope(&mut self, line: usize) {
        let state = self.current();
        state.scope_depth -= 1;
        let depth = state.scope_depth;
        while let Some(local) = self.current().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.captured;
            self.current().locals.pop();
            let op = if captured { OpCode::CloseUpvalue } else { OpCode::Pop };
            self.emit(op, line);
        }
    }

    /// 跳出循环时丢弃比 `depth` 更深的局部变量（不修改编译期的局部变量表）
    fn discard_locals(&mut self, depth: usize, line: usize) {
        let ops: Vec<OpCode> = self
            .current()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > depth)
            .map(|local| if local.captured { OpCode::CloseUpvalue } else { OpCode::Pop })
            .collect();
        for op in ops {
            self.emit(op, line);
        }
    }

    // ==================== 语句 ====================

    fn statement(&mut self, stmt: &Stmt) -> CgResult<()> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expression(expr)?;
                self.emit(OpCode::Pop, line);
            }
            StmtKind::Var { name, initializer } => {
                match initializer {
                    Some(expr) => self.expression(expr)?,
                    None => self.emit(OpCode::Null, line),
                }
                self.define_variable(name, line)?;
            }
            StmtKind::Block(statements) => {
                self.begin_scope();
                for stmt in statements {
                    self.statement(stmt)?;
                }
                self.end_scope(line);
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end_jump = self.emit_jump(OpCode::Jump, line);
                        self.patch_jump(else_jump, line)?;
                        self.statement(else_branch)?;
                        self.patch_jump(end_jump, line)?;
                    }
                    None => self.patch_jump(else_jump, line)?,
                }
            }
            StmtKind::While { condition, body } => {
                let start = self.current().chunk.current_offset();
                self.expression(condition)?;
                let exit = self.emit_jump(OpCode::JumpIfFalse, line);
                self.loop_body(start, body)?;
                self.emit_loop(start, line)?;
                self.patch_jump(exit, line)?;
                self.finish_loop(line)?;
            }
            StmtKind::For {
                variable,
                sequence,
                body,
            } => self.for_statement(variable, sequence, body, line)?,
            StmtKind::Break => {
                let Some(depth) = self.current().loops.last().map(|l| l.scope_depth) else {
                    return Err(self.error(line, "Cannot use 'break' outside of a loop."));
                };
                self.discard_locals(depth, line);
                let jump = self.emit_jump(OpCode::Jump, line);
                if let Some(state) = self.current().loops.last_mut() {
                    state.exit_jumps.push(jump);
                }
            }
            StmtKind::Continue => {
                let Some((depth, start)) = self
                    .current()
                    .loops
                    .last()
                    .map(|l| (l.scope_depth, l.start))
                else {
                    return Err(self.error(line, "Cannot use 'continue' outside of a loop."));
                };
                self.discard_locals(depth, line);
                self.emit_loop(start, line)?;
            }
            StmtKind::Return(value) => {
                if self.current_kind() == FnKind::Initializer {
                    if value.is_some() {
                        return Err(self.error(line, "A constructor cannot return a value."));
                    }
                    self.emit_u8(OpCode::LoadLocal, 0, line);
                } else {
                    match value {
                        Some(expr) => self.expression(expr)?,
                        None => self.emit(OpCode::Null, line),
                    }
                }
                self.emit(OpCode::Return, line);
            }
            StmtKind::Class(decl) => self.class_declaration(decl, line)?,
            StmtKind::Import(decl) => self.import(decl, line)?,
        }
        Ok(())
    }

    fn loop_body(&mut self, start: usize, body: &Stmt) -> CgResult<()> {
        let scope_depth = self.current().scope_depth;
        self.current().loops.push(LoopState {
            start,
            scope_depth,
            exit_jumps: Vec::new(),
        });
        self.statement(body)
    }

    fn finish_loop(&mut self, line: usize) -> CgResult<()> {
        if let Some(state) = self.current().loops.pop() {
            for jump in state.exit_jumps {
                self.patch_jump(jump, line)?;
            }
        }
        Ok(())
    }

    /// `for (x in seq) body` 展开为 iterate / iteratorValue 协议
    fn for_statement(&mut self, variable: &str, sequence: &Expr, body: &Stmt, line: usize) -> CgResult<()> {
        self.begin_scope();
        self.expression(sequence)?;
        let seq_slot = self.declare_local("seq ", line)?;
        self.emit(OpCode::Null, line);
        let iter_slot = self.declare_local("iter ", line)?;

        let start = self.current().chunk.current_offset();
        self.emit_u8(OpCode::LoadLocal, seq_slot, line);
        self.emit_u8(OpCode::LoadLocal, iter_slot, line);
        self.emit_call(1, "iterate(_)", line)?;
        self.emit_u8(OpCode::StoreLocal, iter_slot, line);
        let exit = self.emit_jump(OpCode::JumpIfFalse, line);

        self.emit_u8(OpCode::LoadLocal, seq_slot, line);
        self.emit_u8(OpCode::LoadLocal, iter_slot, line);
        self.emit_call(1, "iteratorValue(_)", line)?;

        let scope_depth = self.current().scope_depth;
        self.current().loops.push(LoopState {
            start,
            scope_depth,
            exit_jumps: Vec::new(),
        });
        self.begin_scope();
        self.declare_local(variable, line)?;
        self.statement(body)?;
        self.end_scope(line);

        self.emit_loop(start, line)?;
        self.patch_jump(exit, line)?;
        self.finish_loop(line)?;
        self.end_scope(line);
        Ok(())
    }

    fn import(&mut self, decl: &ImportDecl, line: usize) -> CgResult<()> {
        let module = decl.resolved.clone().unwrap_or_else(|| decl.module.clone());
        let module_const = self.make_constant(Constant::Str(module), line)?;
        self.emit_u16(OpCode::ImportModule, module_const, line);
        self.emit(OpCode::Pop, line);

        for (name, alias) in &decl.variables {
            let name_const = self.make_constant(Constant::Str(name.clone()), line)?;
            self.emit_u16(OpCode::ImportVariable, module_const, line);
            self.current().chunk.write_u16(name_const, line);
            self.define_variable(alias, line)?;
        }
        Ok(())
    }

    // ==================== 表达式 ====================

    fn expression(&mut self, expr: &Expr) -> CgResult<()> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Null => self.emit(OpCode::Null, line),
            ExprKind::Bool(true) => self.emit(OpCode::True, line),
            ExprKind::Bool(false) => self.emit(OpCode::False, line),
            ExprKind::Num(n) => self.emit_constant(Constant::Num(*n), line)?,
            ExprKind::Str(s) => self.emit_constant(Constant::Str(s.clone()), line)?,
            ExprKind::List(items) => {
                let list = self.module_var("List", line)?;
                self.emit_u16(OpCode::LoadModuleVar, list, line);
                self.emit_call(0, "new()", line)?;
                for item in items {
                    self.expression(item)?;
                    self.emit_call(1, "addCore_(_)", line)?;
                }
            }
            ExprKind::Map(entries) => {
                let map = self.module_var("Map", line)?;
                self.emit_u16(OpCode::LoadModuleVar, map, line);
                self.emit_call(0, "new()", line)?;
                for (key, value) in entries {
                    self.expression(key)?;
                    self.expression(value)?;
                    self.emit_call(2, "addCore_(_,_)", line)?;
                }
            }
            ExprKind::This => self.load_this(line)?,
            ExprKind::Name(name) => self.name(name, line)?,
            ExprKind::Field(name) => {
                let index = self.field_index(name, line)?;
                if self.current_kind().is_method() {
                    self.emit_u8(OpCode::LoadFieldThis, index, line);
                } else {
                    self.load_this(line)?;
                    self.emit_u8(OpCode::LoadField, index, line);
                }
            }
            ExprKind::StaticField(name) => {
                let index = self.static_field(name, line)?;
                self.emit_u16(OpCode::LoadModuleVar, index, line);
            }
            ExprKind::Call(call) => self.call(call, line)?,
            ExprKind::Subscript { receiver, args } => {
                self.expression(receiver)?;
                for arg in args {
                    self.expression(arg)?;
                }
                let signature = format!("[{}]", vec!["_"; args.len()].join(","));
                self.emit_call(args.len(), &signature, line)?;
            }
            ExprKind::Super(call) => self.super_call(call, line)?,
            ExprKind::Unary { op, operand } => {
                self.expression(operand)?;
                self.emit_call(0, op, line)?;
            }
            ExprKind::Binary { op, left, right } => {
                self.expression(left)?;
                self.expression(right)?;
                self.emit_call(1, &format!("{op}(_)"), line)?;
            }
            ExprKind::And(left, right) => {
                self.expression(left)?;
                let jump = self.emit_jump(OpCode::And, line);
                self.expression(right)?;
                self.patch_jump(jump, line)?;
            }
            ExprKind::Or(left, right) => {
                self.expression(left)?;
                let jump = self.emit_jump(OpCode::Or, line);
                self.expression(right)?;
                self.patch_jump(jump, line)?;
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);
                self.expression(then_branch)?;
                let end_jump = self.emit_jump(OpCode::Jump, line);
                self.patch_jump(else_jump, line)?;
                self.expression(else_branch)?;
                self.patch_jump(end_jump, line)?;
            }
            ExprKind::Assign { target, value } => self.assignment(target, value, line)?,
        }
        Ok(())
    }

    fn in_class(&self) -> bool {
        !self.classes.is_empty()
    }

    fn name(&mut self, name: &str, line: usize) -> CgResult<()> {
        if let Some(var) = self.resolve_nonmodule(name, line)? {
            self.load_var(var, line);
            return Ok(());
        }
        if is_local_name(name) && self.in_class() {
            self.load_this(line)?;
            return self.emit_call(0, name, line);
        }
        let index = self.module_var(name, line)?;
        self.emit_u16(OpCode::LoadModuleVar, index, line);
        Ok(())
    }

    fn call(&mut self, call: &Call, line: usize) -> CgResult<()> {
        match &call.receiver {
            Some(receiver) => self.expression(receiver)?,
            None => {
                if !self.in_class() {
                    return Err(self.error(
                        line,
                        format!("Cannot call '{}' without a receiver outside of a class.", call.name),
                    ));
                }
                self.load_this(line)?;
            }
        }
        let signature = call.signature();
        self.arguments(call.args.as_deref(), call.block.as_deref(), &signature)?;
        self.emit_call(call.arg_count(), &signature, line)
    }

    fn arguments(&mut self, args: Option<&[Expr]>, block: Option<&FnDecl>, signature: &str) -> CgResult<()> {
        for arg in args.unwrap_or_default() {
            self.expression(arg)?;
        }
        if let Some(block) = block {
            self.function_literal(block, format!("{signature} block argument"))?;
        }
        Ok(())
    }

    fn super_call(&mut self, call: &SuperCall, line: usize) -> CgResult<()> {
        let Some(class) = self.classes.last() else {
            return Err(self.error(line, "Cannot use 'super' outside of a method."));
        };
        if class.in_static {
            return Err(self.error(line, "Cannot use 'super' in a static method."));
        }
        let arity = match (&call.args, &call.block) {
            (None, None) => None,
            (args, block) => Some(args.as_ref().map_or(0, Vec::len) + usize::from(block.is_some())),
        };
        let signature = match &call.name {
            Some(name) => call_signature(name, arity),
            None if class.is_constructor => call_signature(&format!("init {}", class.method_name), arity),
            None => call_signature(&class.method_name, arity),
        };

        self.load_this(line)?;
        self.arguments(call.args.as_deref(), call.block.as_deref(), &signature)?;
        let argc = arity.unwrap_or(0);
        let symbol = self.method_symbol(&signature, line)?;
        self.emit_u8(OpCode::Super, argc as u8, line);
        self.current().chunk.write_u16(symbol, line);
        Ok(())
    }

    fn assignment(&mut self, target: &Expr, value: &Expr, line: usize) -> CgResult<()> {
        match &target.kind {
            ExprKind::Name(name) => match self.resolve_nonmodule(name, line)? {
                Some(VarRef::Local(slot)) => {
                    self.expression(value)?;
                    self.emit_u8(OpCode::StoreLocal, slot, line);
                }
                Some(VarRef::Upvalue(index)) => {
                    self.expression(value)?;
                    self.emit_u8(OpCode::StoreUpvalue, index, line);
                }
                Some(VarRef::Module(_)) | None => {
                    if is_local_name(name) && self.in_class() {
                        self.load_this(line)?;
                        self.expression(value)?;
                        self.emit_call(1, &format!("{name}=(_)"), line)?;
                    } else {
                        self.expression(value)?;
                        let index = self.module_var(name, line)?;
                        self.emit_u16(OpCode::StoreModuleVar, index, line);
                    }
                }
            },
            ExprKind::Field(name) => {
                let index = self.field_index(name, line)?;
                if self.current_kind().is_method() {
                    self.expression(value)?;
                    self.emit_u8(OpCode::StoreFieldThis, index, line);
                } else {
                    self.load_this(line)?;
                    self.expression(value)?;
                    self.emit_u8(OpCode::StoreField, index, line);
                }
            }
            ExprKind::StaticField(name) => {
                let index = self.static_field(name, line)?;
                self.expression(value)?;
                self.emit_u16(OpCode::StoreModuleVar, index, line);
            }
            ExprKind::Call(call) => {
                match &call.receiver {
                    Some(receiver) => self.expression(receiver)?,
                    None => self.load_this(line)?,
                }
                self.expression(value)?;
                self.emit_call(1, &format!("{}=(_)", call.name), line)?;
            }
            ExprKind::Subscript { receiver, args } => {
                self.expression(receiver)?;
                for arg in args {
                    self.expression(arg)?;
                }
                self.expression(value)?;
                let signature = format!("[{}]=(_)", vec!["_"; args.len()].join(","));
                self.emit_call(args.len() + 1, &signature, line)?;
            }
            _ => return Err(self.error(line, "Invalid assignment target.")),
        }
        Ok(())
    }

    /// 块参数，编译为闭包压栈
    fn function_literal(&mut self, decl: &FnDecl, name: String) -> CgResult<()> {
        if decl.params.len() > MAX_PARAMETERS {
            return Err(self.error(
                decl.line,
                format!("Functions cannot have more than {MAX_PARAMETERS} parameters."),
            ));
        }
        self.fns.push(FnState::new(name, FnKind::Block));
        self.current().arity = decl.params.len();
        for param in &decl.params {
            self.declare_local(param, decl.line)?;
        }
        self.function_body(&decl.body, decl.line)?;
        self.finish_function(decl.line)
    }

    /// 编译函数体并追加隐式返回
    fn function_body(&mut self, body: &Body, line: usize) -> CgResult<()> {
        let initializer = self.current_kind() == FnKind::Initializer;
        match body {
            Body::Expr(expr) => {
                self.expression(expr)?;
                if initializer {
                    self.emit(OpCode::Pop, expr.line);
                    self.emit_u8(OpCode::LoadLocal, 0, expr.line);
                }
            }
            Body::Stmts(statements) => {
                for stmt in statements {
                    self.statement(stmt)?;
                }
                let end = statements.last().map_or(line, |s| s.line);
                if initializer {
                    self.emit_u8(OpCode::LoadLocal, 0, end);
                } else {
                    self.emit(OpCode::Null, end);
                }
            }
        }
        self.emit(OpCode::Return, line);
        Ok(())
    }

    /// 弹出当前函数，在外层函数中发出 Closure 指令
    fn finish_function(&mut self, line: usize) -> CgResult<()> {
        let Some(state) = self.fns.pop() else {
            return Err(self.error(line, "Function stack underflow."));
        };
        let (proto, upvalues) = state.into_proto(&self.module);
        let index = self.make_constant(Constant::Fn(Box::new(proto)), line)?;
        self.emit_u16(OpCode::Closure, index, line);
        for upvalue in upvalues {
            let chunk = &mut self.current().chunk;
            chunk.write_u8(u8::from(upvalue.is_local), line);
            chunk.write_u8(upvalue.index, line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;

    fn compile(source: &str) -> CgResult<CompiledModule> {
        let statements = Parser::new(source).parse().expect("parse");
        let mut symbols = SymbolTable::new();
        compile_module(
            "test",
            &statements,
            &["Object".to_string(), "List".to_string(), "Map".to_string()],
            &mut symbols,
        )
    }

    #[test]
    fn test_module_vars_are_appended() {
        let module = compile("var a = 1\nvar b = a").unwrap();
        assert_eq!(module.variable_names, vec!["Object", "List", "Map", "a", "b"]);
    }

    #[test]
    fn test_undefined_variable_is_reported_at_use() {
        let err = compile("var a = 1\nSystem.print(a)").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "Variable 'System' is used but not defined.");
    }

    #[test]
    fn test_forward_reference_in_function() {
        assert!(compile("var f = Fn\nclass Fn {}").is_ok());
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile("break").unwrap_err();
        assert_eq!(err.message, "Cannot use 'break' outside of a loop.");
    }

    #[test]
    fn test_this_outside_method() {
        let err = compile("var x = this").unwrap_err();
        assert_eq!(err.message, "Cannot use 'this' outside of a method.");
    }

    #[test]
    fn test_field_in_static_method() {
        let err = compile("class A {\n  static f { _x }\n}").unwrap_err();
        assert_eq!(err.message, "Cannot use an instance field in a static method.");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_constructor_return_value() {
        let err = compile("class A {\n  construct new() {\n    return 1\n  }\n}").unwrap_err();
        assert_eq!(err.message, "A constructor cannot return a value.");
    }

    #[test]
    fn test_duplicate_module_variable() {
        let err = compile("var a = 1\nvar a = 2").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_closure_captures_local() {
        let module = compile("{\n  var a = 1\n  var f = Fn.new { a }\n}\nclass Fn {}").unwrap();
        let has_closure = module.function.chunk.constants.iter().any(|c| match c {
            Constant::Fn(proto) => proto.upvalue_count == 1,
            _ => false,
        });
        assert!(has_closure);
    }
}
