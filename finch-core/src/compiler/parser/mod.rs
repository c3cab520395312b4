//! 语法分析：token 流 -> AST

pub mod error;
pub mod expr;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod stmt;

pub use error::{ErrorLocation, ParseResult, ParserError, ParserErrorKind};
pub use expr::{Body, Call, Expr, ExprKind, FnDecl, SuperCall};
pub use parser::Parser;
pub use stmt::{ClassDecl, ImportDecl, MethodDecl, MethodKind, Stmt, StmtKind};
