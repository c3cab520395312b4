use crate::compiler::lexer::Coordinate;

/// 语法错误，包含位置信息
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    /// 错误类型
    pub kind: ParserErrorKind,
    /// 错误发生的位置
    pub location: ErrorLocation,
}

/// 错误位置信息
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorLocation {
    /// 特定位置
    At(Coordinate),
    /// 文件末尾
    Eof(Coordinate),
}

/// 语法错误类型
#[derive(Debug, Clone, PartialEq)]
pub enum ParserErrorKind {
    /// 词法错误（来自扫描器）
    Lexical(String),
    /// 意外的 token
    UnexpectedToken { found: String, expected: String },
    /// 需要表达式
    ExpectedExpression,
    /// 赋值左侧不是可赋值的目标
    InvalidAssignmentTarget,
    /// 表达式或代码块嵌套过深（参数为 "Expression" / "Block"）
    NestingTooDeep(&'static str),
    /// 自定义错误消息
    Custom(String),
}

pub type ParseResult<T> = Result<T, ParserError>;

impl ParserError {
    pub fn here(kind: ParserErrorKind, coordinate: Coordinate) -> Self {
        Self {
            kind,
            location: ErrorLocation::At(coordinate),
        }
    }

    pub fn at_eof(kind: ParserErrorKind, coordinate: Coordinate) -> Self {
        Self {
            kind,
            location: ErrorLocation::Eof(coordinate),
        }
    }

    /// 获取行号
    pub fn line(&self) -> usize {
        match &self.location {
            ErrorLocation::At(coord) | ErrorLocation::Eof(coord) => coord.line,
        }
    }

    /// 获取列号
    pub fn column(&self) -> usize {
        match &self.location {
            ErrorLocation::At(coord) | ErrorLocation::Eof(coord) => coord.column,
        }
    }
}

impl std::fmt::Display for ParserErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParserErrorKind::Lexical(message) => write!(f, "{message}"),
            ParserErrorKind::UnexpectedToken { found, expected } => {
                write!(f, "Expected {expected} but found {found}.")
            }
            ParserErrorKind::ExpectedExpression => write!(f, "Expected expression."),
            ParserErrorKind::InvalidAssignmentTarget => write!(f, "Invalid assignment target."),
            ParserErrorKind::NestingTooDeep(what) => write!(f, "{what} nesting too deep."),
            ParserErrorKind::Custom(message) => write!(f, "{message}"),
        }
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for ParserError {}
