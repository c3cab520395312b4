use super::error::{ErrorLocation, ParseResult, ParserError, ParserErrorKind};
use super::expr::{Body, Call, Expr, ExprKind, FnDecl, SuperCall};
use super::stmt::{ClassDecl, ImportDecl, MethodDecl, MethodKind, Stmt, StmtKind};
use crate::compiler::lexer::{Coordinate, Scanner, Token, TokenKind};

/// 递归下降语法分析器
///
/// 先用扫描器把整个源文件切成 token，再按优先级爬升解析表达式。
/// 遇到第一个错误立即返回。
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// 当前嵌套层数（表达式与代码块共用）
    depth: usize,
}

/// 最大嵌套层数，超过后报编译错误而不是耗尽栈
const MAX_NESTING: usize = 128;

/// 中缀运算符优先级（数值越大结合越紧）
fn infix_precedence(kind: TokenKind) -> Option<u8> {
    let prec = match kind {
        TokenKind::PipePipe => 1,
        TokenKind::AmpAmp => 2,
        TokenKind::EqEq | TokenKind::BangEq => 3,
        TokenKind::Is => 4,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => 5,
        TokenKind::Pipe => 6,
        TokenKind::Caret => 7,
        TokenKind::Amp => 8,
        TokenKind::LtLt | TokenKind::GtGt => 9,
        TokenKind::DotDot | TokenKind::DotDotDot => 10,
        TokenKind::Plus | TokenKind::Minus => 11,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 12,
        _ => return None,
    };
    Some(prec)
}

impl Parser {
    pub fn new(source: &str) -> Self {
        Self {
            tokens: Scanner::new(source).scan_all(),
            pos: 0,
            depth: 0,
        }
    }

    /// 解析整个模块
    pub fn parse(&mut self) -> ParseResult<Vec<Stmt>> {
        if let Some(token) = self.tokens.iter().find(|t| t.kind == TokenKind::Error) {
            return Err(ParserError::here(
                ParserErrorKind::Lexical(token.text.clone()),
                token.span.start,
            ));
        }

        let mut statements = Vec::new();
        self.skip_lines();
        while !self.check(TokenKind::Eof) {
            statements.push(self.definition()?);
            self.statement_end()?;
            self.skip_lines();
        }
        Ok(statements)
    }

    // ==================== token 流 ====================

    fn current(&self) -> &Token {
        // scan_all 保证最后一个 token 是 Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn line(&self) -> usize {
        self.current().line()
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_lines(&mut self) {
        while self.check(TokenKind::Line) {
            self.advance();
        }
    }

    /// 下一个非换行 token 的类型
    fn next_non_line_kind(&self) -> TokenKind {
        let mut offset = 0;
        while self.peek_kind_at(offset) == TokenKind::Line {
            offset += 1;
        }
        self.peek_kind_at(offset)
    }

    fn current_coordinate(&self) -> Coordinate {
        self.current().span.start
    }

    fn error_here(&self, kind: ParserErrorKind) -> ParserError {
        let coordinate = self.current_coordinate();
        if self.check(TokenKind::Eof) {
            ParserError {
                kind,
                location: ErrorLocation::Eof(coordinate),
            }
        } else {
            ParserError::here(kind, coordinate)
        }
    }

    /// 进入一层嵌套解析
    fn nested<T>(&mut self, what: &'static str, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(ParserErrorKind::NestingTooDeep(what)));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(ParserErrorKind::UnexpectedToken {
                found: self.peek_kind().describe().to_string(),
                expected: kind.describe().to_string(),
            }))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        Ok(self.expect(TokenKind::Name)?.text)
    }

    /// 语句必须以换行、文件结束或 `}` 结尾
    fn statement_end(&mut self) -> ParseResult<()> {
        match self.peek_kind() {
            TokenKind::Line => {
                self.skip_lines();
                Ok(())
            }
            TokenKind::Eof | TokenKind::RightBrace => Ok(()),
            other => Err(self.error_here(ParserErrorKind::UnexpectedToken {
                found: other.describe().to_string(),
                expected: "newline".to_string(),
            })),
        }
    }

    // ==================== 语句 ====================

    fn definition(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        match self.peek_kind() {
            TokenKind::Class => {
                self.advance();
                self.class_declaration(false, line)
            }
            TokenKind::Foreign if self.peek_kind_at(1) == TokenKind::Class => {
                self.advance();
                self.advance();
                self.class_declaration(true, line)
            }
            TokenKind::Import => {
                self.advance();
                self.import_declaration(line)
            }
            TokenKind::Var => {
                self.advance();
                let name = self.expect_name()?;
                let initializer = if self.match_token(TokenKind::Eq) {
                    self.skip_lines();
                    Some(self.expression()?)
                } else {
                    None
                };
                Ok(Stmt {
                    kind: StmtKind::Var { name, initializer },
                    line,
                })
            }
            _ => self.statement(),
        }
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let line = self.line();
        let kind = match self.peek_kind() {
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if matches!(
                    self.peek_kind(),
                    TokenKind::Line | TokenKind::RightBrace | TokenKind::Eof
                ) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            TokenKind::If => {
                self.advance();
                let condition = self.parenthesized()?;
                let then_branch = Box::new(self.statement()?);
                let else_branch = if self.next_non_line_kind() == TokenKind::Else {
                    self.skip_lines();
                    self.advance();
                    self.skip_lines();
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }
            TokenKind::While => {
                self.advance();
                let condition = self.parenthesized()?;
                let body = Box::new(self.statement()?);
                StmtKind::While { condition, body }
            }
            TokenKind::For => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                self.skip_lines();
                let variable = self.expect_name()?;
                self.expect(TokenKind::In)?;
                self.skip_lines();
                let sequence = self.expression()?;
                self.skip_lines();
                self.expect(TokenKind::RightParen)?;
                let body = Box::new(self.statement()?);
                StmtKind::For {
                    variable,
                    sequence,
                    body,
                }
            }
            TokenKind::LeftBrace => {
                self.advance();
                StmtKind::Block(self.block_statements()?)
            }
            _ => StmtKind::Expr(self.expression()?),
        };
        Ok(Stmt { kind, line })
    }

    fn parenthesized(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::LeftParen)?;
        self.skip_lines();
        let expr = self.expression()?;
        self.skip_lines();
        self.expect(TokenKind::RightParen)?;
        Ok(expr)
    }

    /// `{` 已被消费，解析到匹配的 `}`
    fn block_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        self.nested("Block", Self::block_body)
    }

    fn block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        self.skip_lines();
        while !self.match_token(TokenKind::RightBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.error_here(ParserErrorKind::UnexpectedToken {
                    found: "end of file".to_string(),
                    expected: "'}'".to_string(),
                }));
            }
            statements.push(self.definition()?);
            self.statement_end()?;
            self.skip_lines();
        }
        Ok(statements)
    }

    fn import_declaration(&mut self, line: usize) -> ParseResult<Stmt> {
        let module = self.expect(TokenKind::String)?.text;
        let mut variables = Vec::new();
        if self.match_token(TokenKind::For) {
            loop {
                self.skip_lines();
                let name = self.expect_name()?;
                let alias = if self.match_token(TokenKind::As) {
                    self.expect_name()?
                } else {
                    name.clone()
                };
                variables.push((name, alias));
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(Stmt {
            kind: StmtKind::Import(ImportDecl {
                module,
                variables,
                resolved: None,
            }),
            line,
        })
    }

    // ==================== 类声明 ====================

    fn class_declaration(&mut self, is_foreign: bool, line: usize) -> ParseResult<Stmt> {
        let name = self.expect_name()?;
        let superclass = if self.match_token(TokenKind::Is) {
            Some(self.call_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::LeftBrace)?;
        self.skip_lines();

        let mut methods = Vec::new();
        while !self.match_token(TokenKind::RightBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.error_here(ParserErrorKind::UnexpectedToken {
                    found: "end of file".to_string(),
                    expected: "'}'".to_string(),
                }));
            }
            methods.push(self.method_declaration()?);
            self.statement_end()?;
            self.skip_lines();
        }

        Ok(Stmt {
            kind: StmtKind::Class(ClassDecl {
                name,
                superclass,
                is_foreign,
                methods,
            }),
            line,
        })
    }

    fn method_declaration(&mut self) -> ParseResult<MethodDecl> {
        let line = self.line();
        let mut is_foreign = false;
        let mut is_static = false;
        loop {
            if self.match_token(TokenKind::Foreign) {
                is_foreign = true;
            } else if self.match_token(TokenKind::Static) {
                is_static = true;
            } else {
                break;
            }
        }

        let (kind, name, params) = match self.peek_kind() {
            TokenKind::Construct => {
                self.advance();
                let name = self.expect_name()?;
                let params = self.parameter_list()?;
                (MethodKind::Constructor, name, params)
            }
            TokenKind::Name => {
                let name = self.advance().text;
                if self.match_token(TokenKind::Eq) {
                    let params = self.parameter_list()?;
                    if params.len() != 1 {
                        return Err(self.error_here(ParserErrorKind::Custom(
                            "A setter takes exactly one parameter.".to_string(),
                        )));
                    }
                    (MethodKind::Setter, name, params)
                } else if self.check(TokenKind::LeftParen) {
                    let params = self.parameter_list()?;
                    (MethodKind::Method, name, params)
                } else {
                    (MethodKind::Getter, name, Vec::new())
                }
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut params = self.names_until(TokenKind::RightBracket)?;
                if self.match_token(TokenKind::Eq) {
                    let value = self.parameter_list()?;
                    if value.len() != 1 {
                        return Err(self.error_here(ParserErrorKind::Custom(
                            "A subscript setter takes exactly one value.".to_string(),
                        )));
                    }
                    params.extend(value);
                    (MethodKind::SubscriptSetter, String::new(), params)
                } else {
                    (MethodKind::Subscript, String::new(), params)
                }
            }
            kind => match kind.operator_name() {
                Some(op) => {
                    self.advance();
                    if self.check(TokenKind::LeftParen) {
                        let params = self.parameter_list()?;
                        if params.len() != 1 {
                            return Err(self.error_here(ParserErrorKind::Custom(
                                "An infix operator takes exactly one parameter.".to_string(),
                            )));
                        }
                        (MethodKind::Infix, op.to_string(), params)
                    } else if matches!(op, "-" | "!" | "~") {
                        (MethodKind::Prefix, op.to_string(), Vec::new())
                    } else {
                        return Err(self.error_here(ParserErrorKind::Custom(format!(
                            "Operator '{op}' requires a parameter."
                        ))));
                    }
                }
                None => {
                    return Err(self.error_here(ParserErrorKind::Custom(
                        "Expected method definition.".to_string(),
                    )))
                }
            },
        };

        if is_static && kind == MethodKind::Constructor {
            return Err(self.error_here(ParserErrorKind::Custom(
                "A constructor cannot be static.".to_string(),
            )));
        }

        let body = if is_foreign {
            None
        } else {
            let body_line = self.line();
            self.expect(TokenKind::LeftBrace)?;
            Some(FnDecl {
                params: params.clone(),
                body: self.function_body()?,
                line: body_line,
            })
        };

        Ok(MethodDecl {
            kind,
            name,
            is_static,
            is_foreign,
            params,
            body,
            line,
        })
    }

    fn parameter_list(&mut self) -> ParseResult<Vec<String>> {
        self.expect(TokenKind::LeftParen)?;
        self.names_until(TokenKind::RightParen)
    }

    /// 逗号分隔的名字列表，消费结尾的 `close`
    fn names_until(&mut self, close: TokenKind) -> ParseResult<Vec<String>> {
        let mut names = Vec::new();
        self.skip_lines();
        if self.match_token(close) {
            return Ok(names);
        }
        loop {
            self.skip_lines();
            names.push(self.expect_name()?);
            self.skip_lines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(names)
    }

    /// `{` 已被消费。单行表达式体隐式返回该表达式的值。
    fn function_body(&mut self) -> ParseResult<Body> {
        if self.match_token(TokenKind::RightBrace) {
            return Ok(Body::Stmts(Vec::new()));
        }
        if self.check(TokenKind::Line) {
            return Ok(Body::Stmts(self.block_statements()?));
        }

        let is_statement = matches!(
            self.peek_kind(),
            TokenKind::Return
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Class
                | TokenKind::Import
                | TokenKind::LeftBrace
        );
        if is_statement {
            return Ok(Body::Stmts(self.block_statements()?));
        }

        let line = self.line();
        let expr = self.expression()?;
        if self.match_token(TokenKind::RightBrace) {
            return Ok(Body::Expr(expr));
        }

        self.statement_end()?;
        let mut statements = vec![Stmt {
            kind: StmtKind::Expr(expr),
            line,
        }];
        statements.extend(self.block_statements()?);
        Ok(Body::Stmts(statements))
    }

    /// `{ |a, b| ... }`，`{` 已被消费
    fn block_argument(&mut self, line: usize) -> ParseResult<FnDecl> {
        let params = if self.match_token(TokenKind::Pipe) {
            self.names_until(TokenKind::Pipe)?
        } else {
            Vec::new()
        };
        Ok(FnDecl {
            params,
            body: self.function_body()?,
            line,
        })
    }

    // ==================== 表达式 ====================

    pub fn expression(&mut self) -> ParseResult<Expr> {
        self.nested("Expression", Self::assignment)
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let target = self.conditional()?;
        if !self.check(TokenKind::Eq) {
            return Ok(target);
        }
        let line = self.advance().line();
        self.skip_lines();
        let value = self.expression()?;

        let assignable = match &target.kind {
            ExprKind::Name(_) | ExprKind::Field(_) | ExprKind::StaticField(_) => true,
            ExprKind::Subscript { .. } => true,
            ExprKind::Call(call) => call.args.is_none() && call.block.is_none(),
            _ => false,
        };
        if !assignable {
            return Err(ParserError::here(
                ParserErrorKind::InvalidAssignmentTarget,
                Coordinate { line, column: 1 },
            ));
        }

        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            line,
        ))
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let condition = self.binary(1)?;
        if !self.check(TokenKind::Question) {
            return Ok(condition);
        }
        let line = self.advance().line();
        self.skip_lines();
        let then_branch = self.nested("Expression", Self::conditional)?;
        self.skip_lines();
        self.expect(TokenKind::Colon)?;
        self.skip_lines();
        let else_branch = self.nested("Expression", Self::conditional)?;
        Ok(Expr::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            line,
        ))
    }

    fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let kind = self.peek_kind();
            let Some(prec) = infix_precedence(kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let line = self.advance().line();
            self.skip_lines();
            let right = self.binary(prec + 1)?;
            let expr_kind = match kind {
                TokenKind::PipePipe => ExprKind::Or(Box::new(left), Box::new(right)),
                TokenKind::AmpAmp => ExprKind::And(Box::new(left), Box::new(right)),
                _ => ExprKind::Binary {
                    op: kind.operator_name().unwrap_or("?"),
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
            left = Expr::new(expr_kind, line);
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let op = match self.peek_kind() {
            TokenKind::Minus => "-",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            _ => return self.call_expression(),
        };
        self.advance();
        let operand = self.nested("Expression", Self::unary)?;
        if let (ExprKind::Num(n), "-") = (&operand.kind, op) {
            return Ok(Expr::new(ExprKind::Num(-n), line));
        }
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        ))
    }

    /// 主表达式加上 `.name(...)` / `[...]` 后缀
    fn call_expression(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.check(TokenKind::Line) && self.next_non_line_kind() == TokenKind::Dot {
                self.skip_lines();
            }
            if self.match_token(TokenKind::Dot) {
                self.skip_lines();
                let token = self.advance();
                if token.kind != TokenKind::Name {
                    return Err(ParserError::here(
                        ParserErrorKind::UnexpectedToken {
                            found: token.kind.describe().to_string(),
                            expected: "method name after '.'".to_string(),
                        },
                        token.span.start,
                    ));
                }
                let line = token.line();
                let (args, block) = self.call_arguments()?;
                expr = Expr::new(
                    ExprKind::Call(Call {
                        receiver: Some(Box::new(expr)),
                        name: token.text,
                        args,
                        block,
                    }),
                    line,
                );
            } else if self.check(TokenKind::LeftBracket) {
                let line = self.advance().line();
                let args = self.expression_list(TokenKind::RightBracket)?;
                if args.is_empty() {
                    return Err(self.error_here(ParserErrorKind::ExpectedExpression));
                }
                expr = Expr::new(
                    ExprKind::Subscript {
                        receiver: Box::new(expr),
                        args,
                    },
                    line,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// 可选的 `(args)` 和块参数
    #[allow(clippy::type_complexity)]
    fn call_arguments(&mut self) -> ParseResult<(Option<Vec<Expr>>, Option<Box<FnDecl>>)> {
        let args = if self.match_token(TokenKind::LeftParen) {
            Some(self.expression_list(TokenKind::RightParen)?)
        } else {
            None
        };
        let block = if self.check(TokenKind::LeftBrace) {
            let line = self.advance().line();
            Some(Box::new(self.block_argument(line)?))
        } else {
            None
        };
        Ok((args, block))
    }

    /// 逗号分隔的表达式，消费结尾的 `close`，允许尾随逗号
    fn expression_list(&mut self, close: TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        self.skip_lines();
        while !self.check(close) {
            items.push(self.expression()?);
            self.skip_lines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
            self.skip_lines();
        }
        self.skip_lines();
        self.expect(close)?;
        Ok(items)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let line = self.line();
        let kind = match self.peek_kind() {
            TokenKind::Number => ExprKind::Num(self.advance().number),
            TokenKind::String => ExprKind::Str(self.advance().text),
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::This => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Field => ExprKind::Field(self.advance().text),
            TokenKind::StaticField => ExprKind::StaticField(self.advance().text),
            TokenKind::Name => {
                let name = self.advance().text;
                if self.check(TokenKind::LeftParen) {
                    let (args, block) = self.call_arguments()?;
                    ExprKind::Call(Call {
                        receiver: None,
                        name,
                        args,
                        block,
                    })
                } else {
                    ExprKind::Name(name)
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                self.skip_lines();
                let expr = self.expression()?;
                self.skip_lines();
                self.expect(TokenKind::RightParen)?;
                return Ok(expr);
            }
            TokenKind::LeftBracket => {
                self.advance();
                ExprKind::List(self.expression_list(TokenKind::RightBracket)?)
            }
            TokenKind::LeftBrace => {
                self.advance();
                ExprKind::Map(self.map_entries()?)
            }
            TokenKind::Super => {
                self.advance();
                let name = if self.match_token(TokenKind::Dot) {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                let (args, block) = self.call_arguments()?;
                ExprKind::Super(SuperCall {
                    name,
                    args,
                    block,
                })
            }
            _ => return Err(self.error_here(ParserErrorKind::ExpectedExpression)),
        };
        Ok(Expr::new(kind, line))
    }

    fn map_entries(&mut self) -> ParseResult<Vec<(Expr, Expr)>> {
        let mut entries = Vec::new();
        self.skip_lines();
        while !self.check(TokenKind::RightBrace) {
            let key = self.binary(1)?;
            self.skip_lines();
            self.expect(TokenKind::Colon)?;
            self.skip_lines();
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_lines();
            if !self.match_token(TokenKind::Comma) {
                break;
            }
            self.skip_lines();
        }
        self.skip_lines();
        self.expect(TokenKind::RightBrace)?;
        Ok(entries)
    }
}
