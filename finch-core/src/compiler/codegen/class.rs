//! 类声明的代码生成

use super::scope::{FnKind, FnState, MAX_FIELDS, MAX_PARAMETERS};
use super::{CgResult, Codegen, VarRef};
use crate::compiler::parser::{ClassDecl, MethodDecl, MethodKind};
use crate::runtime::bytecode::{Constant, OpCode};

/// 正在编译的类
#[derive(Debug, Clone)]
pub(super) struct ClassInfo {
    pub name: String,
    /// 本类声明的字段（不含父类字段，运行时按父类字段数偏移）
    pub fields: Vec<String>,
    pub is_foreign: bool,
    /// 以下描述当前正在编译的方法
    pub in_static: bool,
    pub is_constructor: bool,
    pub method_name: String,
}

impl<'a> Codegen<'a> {
    pub(super) fn class_declaration(&mut self, decl: &ClassDecl, line: usize) -> CgResult<()> {
        self.emit_constant(Constant::Str(decl.name.clone()), line)?;
        match &decl.superclass {
            Some(superclass) => self.expression(superclass)?,
            None => {
                let object = self.module_var("Object", line)?;
                self.emit_u16(OpCode::LoadModuleVar, object, line);
            }
        }

        // 字段数在类体编译完之后回填
        let field_count_at = if decl.is_foreign {
            self.emit(OpCode::ForeignClass, line);
            None
        } else {
            self.emit_u8(OpCode::Class, 0, line);
            Some(self.current().chunk.current_offset() - 1)
        };

        let class_var = self.define_class_variable(&decl.name, line)?;

        self.classes.push(ClassInfo {
            name: decl.name.clone(),
            fields: Vec::new(),
            is_foreign: decl.is_foreign,
            in_static: false,
            is_constructor: false,
            method_name: String::new(),
        });
        let result = decl
            .methods
            .iter()
            .try_for_each(|method| self.method(method, class_var));
        let info = self.classes.pop();
        result?;

        if let (Some(offset), Some(info)) = (field_count_at, info) {
            self.current().chunk.code[offset] = info.fields.len() as u8;
        }
        Ok(())
    }

    /// 类对象在栈顶：绑定到模块变量或局部变量（局部变量仍留在栈上）
    fn define_class_variable(&mut self, name: &str, line: usize) -> CgResult<VarRef> {
        self.define_variable(name, line)
    }

    fn method(&mut self, method: &MethodDecl, class_var: VarRef) -> CgResult<()> {
        let line = method.line;
        let signature = method.signature();
        if method.params.len() > MAX_PARAMETERS {
            return Err(self.error(
                line,
                format!("Methods cannot have more than {MAX_PARAMETERS} parameters."),
            ));
        }

        if method.is_foreign {
            if method.kind == MethodKind::Constructor {
                return Err(self.error(line, "A constructor cannot be foreign."));
            }
            let symbol = self.method_symbol(&signature, line)?;
            self.load_var(class_var, line);
            self.emit_u16(OpCode::ForeignMethod, symbol, line);
            self.current().chunk.write_u8(u8::from(method.is_static), line);
            return Ok(());
        }

        let class_name = match self.classes.last_mut() {
            Some(info) => {
                info.in_static = method.is_static;
                info.is_constructor = method.kind == MethodKind::Constructor;
                info.method_name = method.name.clone();
                info.name.clone()
            }
            None => return Err(self.error(line, "Method outside of a class.")),
        };
        let debug_name = format!("{class_name}.{signature}");

        if method.kind == MethodKind::Constructor {
            let init_signature = format!("init {signature}");
            let init_symbol = self.method_symbol(&init_signature, line)?;
            self.load_var(class_var, line);
            self.method_function(method, FnKind::Initializer, debug_name.clone())?;
            self.emit_u16(OpCode::MethodInstance, init_symbol, line);

            self.load_var(class_var, line);
            self.constructor_stub(method, init_symbol, debug_name)?;
            let symbol = self.method_symbol(&signature, line)?;
            self.emit_u16(OpCode::MethodStatic, symbol, line);
            return Ok(());
        }

        let (kind, op) = if method.is_static {
            (FnKind::StaticMethod, OpCode::MethodStatic)
        } else {
            (FnKind::Method, OpCode::MethodInstance)
        };
        let symbol = self.method_symbol(&signature, line)?;
        self.load_var(class_var, line);
        self.method_function(method, kind, debug_name)?;
        self.emit_u16(op, symbol, line);
        Ok(())
    }

    fn method_function(&mut self, method: &MethodDecl, kind: FnKind, name: String) -> CgResult<()> {
        let Some(body) = &method.body else {
            return Err(self.error(method.line, "Expected method body."));
        };
        self.fns.push(FnState::new(name, kind));
        self.current().arity = method.params.len();
        for param in &method.params {
            self.declare_local(param, method.line)?;
        }
        self.function_body(&body.body, method.line)?;
        self.finish_function(method.line)
    }

    /// 构造器的静态入口：创建实例，再调用实例初始化方法
    fn constructor_stub(&mut self, method: &MethodDecl, init_symbol: u16, name: String) -> CgResult<()> {
        let line = method.line;
        let is_foreign = self.classes.last().is_some_and(|info| info.is_foreign);
        let arity = method.params.len();

        self.fns.push(FnState::new(name, FnKind::StaticMethod));
        self.current().arity = arity;
        let construct = if is_foreign {
            OpCode::ForeignConstruct
        } else {
            OpCode::Construct
        };
        self.emit(construct, line);
        for slot in 0..=arity {
            self.emit_u8(OpCode::LoadLocal, slot as u8, line);
        }
        self.emit_u8(OpCode::Call, arity as u8, line);
        self.current().chunk.write_u16(init_symbol, line);
        self.emit(OpCode::Return, line);
        self.finish_function(line)
    }

    pub(super) fn field_index(&mut self, name: &str, line: usize) -> CgResult<u8> {
        let Some(class) = self.classes.last() else {
            return Err(self.error(line, "Cannot reference a field outside of a class definition."));
        };
        if class.is_foreign {
            return Err(self.error(line, "Cannot define fields in a foreign class."));
        }
        if class.in_static {
            return Err(self.error(line, "Cannot use an instance field in a static method."));
        }
        if let Some(index) = class.fields.iter().position(|field| field == name) {
            return Ok(index as u8);
        }
        if class.fields.len() >= MAX_FIELDS {
            return Err(self.error(line, format!("A class can only have {MAX_FIELDS} fields.")));
        }
        match self.classes.last_mut() {
            Some(class) => {
                class.fields.push(name.to_string());
                Ok((class.fields.len() - 1) as u8)
            }
            None => Err(self.error(line, "Cannot reference a field outside of a class definition.")),
        }
    }

    /// 静态字段保存在名为 "类名 字段名" 的隐藏模块变量里
    pub(super) fn static_field(&mut self, name: &str, line: usize) -> CgResult<u16> {
        let Some(class) = self.classes.last() else {
            return Err(self.error(line, "Cannot use a static field outside of a class definition."));
        };
        let hidden = format!("{} {}", class.name, name);
        let index = self.vars.hidden(&hidden);
        u16::try_from(index).map_err(|_| self.error(line, "Too many module variables."))
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::codegen::compile_module;
    use crate::compiler::parser::Parser;
    use crate::runtime::bytecode::{Constant, OpCode};
    use crate::runtime::symbol::SymbolTable;

    fn compile(source: &str) -> Result<crate::compiler::codegen::CompiledModule, crate::runtime::error::CompileError> {
        let statements = Parser::new(source).parse().expect("parse");
        let mut symbols = SymbolTable::new();
        compile_module("test", &statements, &["Object".to_string()], &mut symbols)
    }

    #[test]
    fn test_field_count_is_patched() {
        let module = compile("class P {\n  construct new(x, y) {\n    _x = x\n    _y = y\n  }\n  x { _x }\n}").unwrap();
        let code = &module.function.chunk.code;
        let class_at = code
            .iter()
            .position(|b| *b == OpCode::Class as u8)
            .expect("class op");
        assert_eq!(code[class_at + 1], 2);
    }

    #[test]
    fn test_constructor_emits_stub() {
        let module = compile("class P {\n  construct new() {}\n}").unwrap();
        let names: Vec<&str> = module
            .function
            .chunk
            .constants
            .iter()
            .filter_map(|c| match c {
                Constant::Fn(proto) => Some(proto.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["P.new()", "P.new()"]);
    }

    #[test]
    fn test_static_field_is_hidden_variable() {
        let module = compile("class C {\n  static inc() { __n = 1 }\n}").unwrap();
        assert!(module.variable_names.iter().any(|n| n == "C __n"));
    }

    #[test]
    fn test_foreign_class_rejects_fields() {
        let err = compile("foreign class F {\n  x { _x }\n}").unwrap_err();
        assert_eq!(err.message, "Cannot define fields in a foreign class.");
    }

    #[test]
    fn test_foreign_constructor_rejected() {
        let err = compile("class F {\n  foreign construct new()\n}").unwrap_err();
        assert_eq!(err.message, "A constructor cannot be foreign.");
    }
}
