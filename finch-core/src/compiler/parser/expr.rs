//! 表达式 AST

use super::stmt::Stmt;

/// 表达式节点（带行号）
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    This,
    /// 变量引用；类内的小写未声明名字会被编译成 `this.name`
    Name(String),
    /// `_field`
    Field(String),
    /// `__field`
    StaticField(String),
    /// 方法调用（含 getter / 显式方法 / 带块参数的调用）
    Call(Call),
    /// `receiver[args]`
    Subscript {
        receiver: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `super.name(args)` 或构造器内的 `super(args)`
    Super(SuperCall),
    /// 前缀运算符，编译为无参方法调用
    Unary {
        op: &'static str,
        operand: Box<Expr>,
    },
    /// 中缀运算符，编译为单参方法调用
    Binary {
        op: &'static str,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

/// 方法调用
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// None 表示隐式 `this`
    pub receiver: Option<Box<Expr>>,
    pub name: String,
    /// None 表示 getter 形式（没有括号）
    pub args: Option<Vec<Expr>>,
    pub block: Option<Box<FnDecl>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuperCall {
    /// None 表示调用与当前方法同名的父类方法
    pub name: Option<String>,
    pub args: Option<Vec<Expr>>,
    pub block: Option<Box<FnDecl>>,
}

/// 函数体：单行表达式（隐式返回）或语句列表
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Expr(Expr),
    Stmts(Vec<Stmt>),
}

/// 块参数 / 方法体
#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub params: Vec<String>,
    pub body: Body,
    pub line: usize,
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn boxed(kind: ExprKind, line: usize) -> Box<Self> {
        Box::new(Self::new(kind, line))
    }
}

/// 根据名字和参数个数构造方法签名，例如 `call(_,_)`
pub fn call_signature(name: &str, args: Option<usize>) -> String {
    match args {
        None => name.to_string(),
        Some(count) => format!("{}({})", name, vec!["_"; count].join(",")),
    }
}

impl Call {
    pub fn signature(&self) -> String {
        let arity = match (&self.args, &self.block) {
            (None, None) => None,
            (args, block) => Some(args.as_ref().map_or(0, Vec::len) + usize::from(block.is_some())),
        };
        call_signature(&self.name, arity)
    }

    pub fn arg_count(&self) -> usize {
        self.args.as_ref().map_or(0, Vec::len) + usize::from(self.block.is_some())
    }
}
