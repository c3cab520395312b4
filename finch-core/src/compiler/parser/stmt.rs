//! 语句 AST

use super::expr::{Expr, FnDecl};

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Var {
        name: String,
        initializer: Option<Expr>,
    },
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    For {
        variable: String,
        sequence: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Class(ClassDecl),
    Import(ImportDecl),
}

/// 类声明
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<Expr>,
    pub is_foreign: bool,
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Method,
    Getter,
    Setter,
    Subscript,
    SubscriptSetter,
    /// 前缀运算符 `-` `!` `~`
    Prefix,
    /// 中缀运算符 `+(_)` 等
    Infix,
    Constructor,
}

/// 方法声明
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub kind: MethodKind,
    pub name: String,
    pub is_static: bool,
    pub is_foreign: bool,
    pub params: Vec<String>,
    /// foreign 方法没有方法体
    pub body: Option<FnDecl>,
    pub line: usize,
}

impl MethodDecl {
    /// 方法签名（方法符号表的键）
    pub fn signature(&self) -> String {
        let placeholders = vec!["_"; self.params.len()].join(",");
        match self.kind {
            MethodKind::Getter | MethodKind::Prefix => self.name.clone(),
            MethodKind::Method | MethodKind::Infix | MethodKind::Constructor => {
                format!("{}({})", self.name, placeholders)
            }
            MethodKind::Setter => format!("{}=(_)", self.name),
            MethodKind::Subscript => format!("[{placeholders}]"),
            MethodKind::SubscriptSetter => {
                let index = vec!["_"; self.params.len().saturating_sub(1)].join(",");
                format!("[{index}]=(_)")
            }
        }
    }
}

/// `import "module" for A, B as C`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module: String,
    /// (源模块中的名字, 本模块中的名字)
    pub variables: Vec<(String, String)>,
    /// 预取阶段解析出的规范模块名
    pub resolved: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(kind: MethodKind, name: &str, params: usize) -> MethodDecl {
        MethodDecl {
            kind,
            name: name.to_string(),
            is_static: false,
            is_foreign: false,
            params: (0..params).map(|i| format!("p{i}")).collect(),
            body: None,
            line: 1,
        }
    }

    #[test]
    fn test_method_signatures() {
        assert_eq!(method(MethodKind::Getter, "count", 0).signature(), "count");
        assert_eq!(method(MethodKind::Method, "call", 2).signature(), "call(_,_)");
        assert_eq!(method(MethodKind::Setter, "x", 1).signature(), "x=(_)");
        assert_eq!(method(MethodKind::Subscript, "", 1).signature(), "[_]");
        assert_eq!(method(MethodKind::SubscriptSetter, "", 2).signature(), "[_]=(_)");
        assert_eq!(method(MethodKind::Infix, "+", 1).signature(), "+(_)");
        assert_eq!(method(MethodKind::Prefix, "-", 0).signature(), "-");
        assert_eq!(method(MethodKind::Constructor, "new", 1).signature(), "new(_)");
    }
}
