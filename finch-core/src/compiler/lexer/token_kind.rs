//! Finch Token 类型定义

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // ==================== 符号 ====================
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Colon,
    Dot,
    DotDot,
    DotDotDot,
    Comma,
    Star,
    Slash,
    Percent,
    Plus,
    Minus,
    LtLt,
    GtGt,
    Pipe,
    PipePipe,
    Caret,
    Amp,
    AmpAmp,
    Bang,
    Tilde,
    Question,
    Eq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    BangEq,

    // ==================== 关键字 ====================
    As,
    Break,
    Class,
    Construct,
    Continue,
    Else,
    False,
    For,
    Foreign,
    If,
    Import,
    In,
    Is,
    Null,
    Return,
    Static,
    Super,
    This,
    True,
    Var,
    While,

    // ==================== 字面量 / 标识符 ====================
    /// `_name`
    Field,
    /// `__name`
    StaticField,
    Name,
    Number,
    String,

    /// 换行（语句分隔符）
    Line,
    /// 词法错误，错误信息存放在 token 文本中
    Error,
    Eof,
}

impl TokenKind {
    /// 关键字查表
    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "as" => TokenKind::As,
            "break" => TokenKind::Break,
            "class" => TokenKind::Class,
            "construct" => TokenKind::Construct,
            "continue" => TokenKind::Continue,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "foreign" => TokenKind::Foreign,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "in" => TokenKind::In,
            "is" => TokenKind::Is,
            "null" => TokenKind::Null,
            "return" => TokenKind::Return,
            "static" => TokenKind::Static,
            "super" => TokenKind::Super,
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "var" => TokenKind::Var,
            "while" => TokenKind::While,
            _ => return None,
        };
        Some(kind)
    }

    /// 运算符方法名（用于构造方法签名）
    pub fn operator_name(&self) -> Option<&'static str> {
        let name = match self {
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::LtLt => "<<",
            TokenKind::GtGt => ">>",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Amp => "&",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::DotDot => "..",
            TokenKind::DotDotDot => "...",
            TokenKind::Is => "is",
            _ => return None,
        };
        Some(name)
    }

    /// 在错误信息中展示的名字
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Line => "newline",
            TokenKind::Eof => "end of file",
            TokenKind::Name => "name",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Field => "field",
            TokenKind::StaticField => "static field",
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::LeftBracket => "'['",
            TokenKind::RightBracket => "']'",
            TokenKind::LeftBrace => "'{'",
            TokenKind::RightBrace => "'}'",
            _ => self.operator_name().unwrap_or("token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::keyword("class"), Some(TokenKind::Class));
        assert_eq!(TokenKind::keyword("foreign"), Some(TokenKind::Foreign));
        assert_eq!(TokenKind::keyword("classy"), None);
    }

    #[test]
    fn test_operator_name() {
        assert_eq!(TokenKind::DotDotDot.operator_name(), Some("..."));
        assert_eq!(TokenKind::Name.operator_name(), None);
    }
}
