//! 编译器：源码 -> AST -> 函数原型
//!
//! 编译分为两步，中间留给 VM 预取被导入的模块：
//! 1. [`parse`] 产出语句列表
//! 2. VM 通过 [`imports_mut`] 解析并加载导入，回填规范模块名
//! 3. [`compile`] 生成字节码

pub mod codegen;
pub mod lexer;
pub mod parser;

pub use codegen::CompiledModule;

use crate::runtime::error::CompileError;
use crate::runtime::symbol::SymbolTable;
use parser::{Body, ImportDecl, Parser, Stmt, StmtKind};

/// 语法分析，错误转为带模块名的编译错误
pub fn parse(module: &str, source: &str) -> Result<Vec<Stmt>, CompileError> {
    Parser::new(source).parse().map_err(|err| {
        tracing::debug!(target: "finch::parser", module, line = err.line(), "parse failed");
        CompileError::new(module, err.line(), err.kind.to_string())
    })
}

/// 生成字节码
///
/// `existing_vars` 是模块已有的变量名；成功时返回的变量表以它为前缀。
pub fn compile(
    module: &str,
    statements: &[Stmt],
    existing_vars: &[String],
    symbols: &mut SymbolTable,
    emit_debug_info: bool,
) -> Result<CompiledModule, CompileError> {
    let compiled = codegen::compile_module(module, statements, existing_vars, symbols)?;
    if emit_debug_info {
        compiled.function.chunk.disassemble(&format!("{module} {}", compiled.function.name));
    }
    tracing::debug!(
        target: "finch::compiler",
        module,
        variables = compiled.variable_names.len(),
        bytes = compiled.function.chunk.code.len(),
        "module compiled"
    );
    Ok(compiled)
}

/// 收集所有 import 语句（按出现顺序），附带行号
pub fn imports_mut(statements: &mut [Stmt]) -> Vec<(&mut ImportDecl, usize)> {
    let mut out = Vec::new();
    collect_imports(statements, &mut out);
    out
}

fn collect_imports<'a>(statements: &'a mut [Stmt], out: &mut Vec<(&'a mut ImportDecl, usize)>) {
    for stmt in statements.iter_mut() {
        let line = stmt.line;
        match &mut stmt.kind {
            StmtKind::Import(decl) => out.push((decl, line)),
            StmtKind::Block(inner) => collect_imports(inner, out),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_imports(std::slice::from_mut(then_branch.as_mut()), out);
                if let Some(else_branch) = else_branch {
                    collect_imports(std::slice::from_mut(else_branch.as_mut()), out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                collect_imports(std::slice::from_mut(body.as_mut()), out)
            }
            StmtKind::Class(class) => {
                for method in &mut class.methods {
                    if let Some(decl) = &mut method.body {
                        if let Body::Stmts(inner) = &mut decl.body {
                            collect_imports(inner, out);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
