//! Tolerant parser for interpolated text.
//!
//! Malformed constructs never abort parsing: the offending source is kept as
//! literal text and a [`ParseDiagnostic`] is recorded.

use super::ast::{
    Ast, Expr, Formatter, Node, Operator, ParseDiagnostic, ParseErrorKind, ParseResult, Span,
    VarRef,
};
use super::lexer::{
    Lexed, Token, is_ident_char, scan_formatters, scan_ident, scan_path, scan_string, skip_ws,
    tokenize,
};

pub(crate) fn parse_template(src: &str) -> ParseResult {
    let mut parser = Parser { src, pos: 0, errors: Vec::new() };
    let (nodes, _) = parser.parse_sequence(false, false);
    ParseResult { ast: Ast { nodes }, errors: parser.errors }
}

/// Why a sequence of nodes ended.
enum Terminator {
    Eof,
    Else(Span),
    EndIf,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    errors: Vec<ParseDiagnostic>,
}

impl<'a> Parser<'a> {
    fn error(&mut self, kind: ParseErrorKind, message: impl Into<String>, span: Span) {
        self.errors.push(ParseDiagnostic { kind, message: message.into(), span });
    }

    fn parse_sequence(&mut self, in_conditional: bool, allow_else: bool) -> (Vec<Node>, Terminator) {
        let mut nodes = Vec::new();
        let src = self.src;
        let bytes = src.as_bytes();

        loop {
            let Some(offset) = self.src[self.pos..].find(['@', '{']) else {
                push_literal(&mut nodes, &self.src[self.pos..]);
                self.pos = self.src.len();
                return (nodes, Terminator::Eof);
            };
            let at = self.pos + offset;
            push_literal(&mut nodes, &self.src[self.pos..at]);
            self.pos = at;

            if bytes[at] == b'{' {
                if bytes.get(at + 1) != Some(&b'{') {
                    push_literal(&mut nodes, "{");
                    self.pos = at + 1;
                    continue;
                }
                if let Some(term) = self.parse_tag(&mut nodes, in_conditional, allow_else) {
                    return (nodes, term);
                }
                continue;
            }

            self.parse_reference(&mut nodes);
        }
    }

    /// Handle `@` at the current position.
    fn parse_reference(&mut self, nodes: &mut Vec<Node>) {
        let at = self.pos;
        let src = self.src;
        let bytes = src.as_bytes();

        if bytes.get(at + 1) == Some(&b'@') {
            push_literal(nodes, "@");
            self.pos = at + 2;
            return;
        }
        // `user@example.com` is text, not a reference
        if at > 0 && is_ident_char(bytes[at - 1]) {
            push_literal(nodes, "@");
            self.pos = at + 1;
            return;
        }
        let Some((name, name_end)) = scan_ident(self.src, at + 1) else {
            push_literal(nodes, "@");
            self.pos = at + 1;
            return;
        };

        let path = match scan_path(self.src, name_end) {
            Ok((path, end)) => {
                self.pos = end;
                path
            }
            Err(message) => {
                self.malformed_reference(nodes, at, name_end, message);
                return;
            }
        };
        let formatters = match scan_formatters(self.src, self.pos, false) {
            Ok((formatters, end)) => {
                self.pos = end;
                formatters
            }
            Err(message) => {
                self.malformed_reference(nodes, at, name_end, message);
                return;
            }
        };

        nodes.push(Node::VariableRef(VarRef { name, path, formatters }));
    }

    fn malformed_reference(&mut self, nodes: &mut Vec<Node>, at: usize, name_end: usize, message: String) {
        self.error(ParseErrorKind::MalformedReference, message, Span::new(at, name_end));
        push_literal(nodes, &self.src[at..name_end]);
        self.pos = name_end;
    }

    /// Handle `{{` at the current position. Returns a terminator when the tag
    /// closes the enclosing conditional branch.
    fn parse_tag(&mut self, nodes: &mut Vec<Node>, in_conditional: bool, allow_else: bool) -> Option<Terminator> {
        let src = self.src;
        let start = self.pos;
        let Some(close) = find_block_end(src, start + 2) else {
            self.error(
                ParseErrorKind::UnterminatedBlock,
                "'{{' without matching '}}'",
                Span::new(start, src.len()),
            );
            push_literal(nodes, "{{");
            self.pos = start + 2;
            return None;
        };
        let end = close + 2;
        let span = Span::new(start, end);
        let tag = &src[start..end];
        let inner = src[start + 2..close].trim();
        self.pos = end;

        match inner {
            "else" if in_conditional && allow_else => return Some(Terminator::Else(span)),
            "/if" if in_conditional => return Some(Terminator::EndIf),
            "else" => {
                self.error(ParseErrorKind::StrayElse, "'{{else}}' outside a conditional", span);
                push_literal(nodes, tag);
            }
            "/if" => {
                self.error(ParseErrorKind::StrayEndIf, "'{{/if}}' without matching '{{#if}}'", span);
                push_literal(nodes, tag);
            }
            "" => {
                self.error(ParseErrorKind::EmptyExpression, "empty expression block", span);
                push_literal(nodes, tag);
            }
            _ => {
                if let Some(cond_src) = inner.strip_prefix("#if")
                    && (cond_src.is_empty() || cond_src.starts_with(char::is_whitespace))
                {
                    self.parse_conditional(nodes, cond_src, span);
                } else {
                    match parse_expression(inner, true) {
                        Ok((expr, formatters)) => nodes.push(Node::Expression { expr, formatters }),
                        Err(message) => {
                            self.error(ParseErrorKind::InvalidExpression, message, span);
                            push_literal(nodes, tag);
                        }
                    }
                }
            }
        }
        None
    }

    fn parse_conditional(&mut self, nodes: &mut Vec<Node>, cond_src: &str, open: Span) {
        let src = self.src;
        let open_text = &src[open.start..open.end];
        let cond = match parse_expression(cond_src, false) {
            Ok((cond, _)) => cond,
            Err(message) => {
                self.error(ParseErrorKind::InvalidExpression, format!("bad condition: {message}"), open);
                push_literal(nodes, open_text);
                return;
            }
        };

        let (then_branch, term) = self.parse_sequence(true, true);
        let (else_branch, else_span, closed) = match term {
            Terminator::EndIf => (Vec::new(), None, true),
            Terminator::Else(else_span) => {
                let (else_branch, term) = self.parse_sequence(true, false);
                let closed = matches!(term, Terminator::EndIf);
                (else_branch, Some(else_span), closed)
            }
            Terminator::Eof => (Vec::new(), None, false),
        };

        if closed {
            nodes.push(Node::Conditional { cond, then_branch, else_branch });
            return;
        }

        self.error(ParseErrorKind::UnclosedConditional, "'{{#if}}' without matching '{{/if}}'", open);
        push_literal(nodes, open_text);
        extend_nodes(nodes, then_branch);
        if let Some(span) = else_span {
            push_literal(nodes, &src[span.start..span.end]);
        }
        extend_nodes(nodes, else_branch);
    }
}

/// Find the `}}` closing a block opened before `from`, skipping quoted strings.
fn find_block_end(src: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut pos = from;
    while pos + 1 < bytes.len() {
        match bytes[pos] {
            b'"' | b'\'' => match scan_string(src, pos) {
                Ok((_, end)) => pos = end,
                Err(_) => pos += 1,
            },
            b'}' if bytes[pos + 1] == b'}' => return Some(pos),
            _ => pos += 1,
        }
    }
    None
}

fn push_literal(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Literal { text: last }) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::literal(text));
    }
}

fn extend_nodes(nodes: &mut Vec<Node>, more: Vec<Node>) {
    for node in more {
        match node {
            Node::Literal { text } => push_literal(nodes, &text),
            other => nodes.push(other),
        }
    }
}

/// Parse the inside of a block: an expression and, when allowed, a trailing
/// formatter chain.
pub(crate) fn parse_expression(src: &str, allow_formatters: bool) -> Result<(Expr, Vec<Formatter>), String> {
    let mut tokens = tokenize(src).map_err(|(message, _)| message)?;

    let mut formatters = Vec::new();
    if let Some(Lexed { token: Token::Pipe, span }) = tokens.last().cloned() {
        if !allow_formatters {
            return Err("formatters are not allowed in conditions".to_string());
        }
        tokens.pop();
        let (chain, end) = scan_formatters(src, span.start, true)?;
        if skip_ws(src, end) != src.len() {
            return Err(format!("unexpected text after formatters: '{}'", src[end..].trim()));
        }
        formatters = chain;
    }

    if tokens.is_empty() {
        return Err("missing expression".to_string());
    }

    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(format!("unexpected token at offset {}", extra.span.start));
    }
    Ok((expr, formatters))
}

/// Precedence-climbing parser over expression tokens.
struct ExprParser {
    tokens: Vec<Lexed>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|l| l.token.clone());
        self.pos += 1;
        token
    }

    fn binary(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, String>,
        table: &[(Token, Operator)],
    ) -> Result<Expr, String> {
        let mut left = operand(self)?;
        while let Some(op) = self
            .peek()
            .and_then(|t| table.iter().find(|(tok, _)| tok == t).map(|(_, op)| *op))
        {
            self.pos += 1;
            let right = operand(self)?;
            left = Expr::op(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        self.binary(Self::parse_and, &[(Token::OrOr, Operator::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        self.binary(Self::parse_equality, &[(Token::AndAnd, Operator::And)])
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::parse_comparison,
            &[(Token::EqEq, Operator::Eq), (Token::NotEq, Operator::Ne)],
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::parse_additive,
            &[
                (Token::Lt, Operator::Lt),
                (Token::Le, Operator::Le),
                (Token::Gt, Operator::Gt),
                (Token::Ge, Operator::Ge),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::parse_multiplicative,
            &[(Token::Plus, Operator::Add), (Token::Minus, Operator::Sub)],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        self.binary(
            Self::parse_unary,
            &[
                (Token::Star, Operator::Mul),
                (Token::Slash, Operator::Div),
                (Token::Percent, Operator::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::op(Operator::Not, vec![self.parse_unary()?]))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::op(Operator::Neg, vec![self.parse_unary()?]))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Literal { value }),
            Some(Token::Str(s)) => Ok(Expr::Literal { value: s.into() }),
            Some(Token::True) => Ok(Expr::Literal { value: true.into() }),
            Some(Token::False) => Ok(Expr::Literal { value: false.into() }),
            Some(Token::Null) => Ok(Expr::Literal { value: serde_json::Value::Null }),
            Some(Token::Var { name, path }) => Ok(Expr::Var { name, path }),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
