//! Recursive-descent parser producing an [`Expr`] tree.

use regex::Regex;
use serde_json::Value;

use super::lexer::{Token, TokenKind};
use super::{ExpressionError, MAX_DEPTH};
use crate::template::RefPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Right-hand side of `matches`. Literal patterns are compiled once.
#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Ref(RefPath),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Matches {
        subject: Box<Expr>,
        pattern: Pattern,
    },
}

impl Expr {
    /// Visit every reference path in the tree.
    pub(crate) fn collect_refs<'a>(&'a self, out: &mut Vec<&'a RefPath>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(path) => out.push(path),
            Expr::List(items) => items.iter().for_each(|e| e.collect_refs(out)),
            Expr::Not(e) | Expr::Neg(e) => e.collect_refs(out),
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_refs(out);
                r.collect_refs(out);
            }
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            Expr::Matches { subject, pattern } => {
                subject.collect_refs(out);
                if let Pattern::Dynamic(e) = pattern {
                    e.collect_refs(out);
                }
            }
        }
    }
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            source_len,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty expression"));
        }
        let expr = self.or()?;
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let kind = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if kind.is_some() {
            self.pos += 1;
        }
        kind
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.position)
            .unwrap_or(self.source_len)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&TokenKind::Or) {
            self.advance();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.not()?;
        while self.peek() == Some(&TokenKind::And) {
            self.advance();
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&TokenKind::Not) {
            self.advance();
            self.enter()?;
            let inner = self.not();
            self.leave();
            return Ok(Expr::Not(Box::new(inner?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.additive()?;

        let op = match self.peek() {
            Some(TokenKind::Eq) => CmpOp::Eq,
            Some(TokenKind::Ne) => CmpOp::Ne,
            Some(TokenKind::Lt) => CmpOp::Lt,
            Some(TokenKind::Le) => CmpOp::Le,
            Some(TokenKind::Gt) => CmpOp::Gt,
            Some(TokenKind::Ge) => CmpOp::Ge,
            Some(TokenKind::Contains) => CmpOp::Contains,
            Some(TokenKind::In) => CmpOp::In,
            Some(TokenKind::Not) if self.peek_at(1) == Some(&TokenKind::In) => {
                self.advance();
                CmpOp::NotIn
            }
            Some(TokenKind::Matches) => {
                self.advance();
                let right = self.additive()?;
                let pattern = match right {
                    Expr::Literal(Value::String(p)) => Pattern::Compiled(
                        Regex::new(&p).map_err(|e| ExpressionError::Regex(e.to_string()))?,
                    ),
                    other => Pattern::Dynamic(Box::new(other)),
                };
                return Ok(Expr::Matches {
                    subject: Box::new(left),
                    pattern,
                });
            }
            _ => return Ok(left),
        };
        self.advance();

        let right = self.additive()?;
        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                Some(TokenKind::Percent) => ArithOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&TokenKind::Minus) {
            self.advance();
            self.enter()?;
            let inner = self.unary();
            self.leave();
            return Ok(Expr::Neg(Box::new(inner?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        let token = self
            .advance()
            .ok_or_else(|| self.error("unexpected end of expression"))?;

        match token {
            TokenKind::Int(n) => Ok(Expr::Literal(Value::from(n))),
            TokenKind::Float(n) => serde_json::Number::from_f64(n)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or(ExpressionError::Syntax {
                    position,
                    message: "number out of range".to_string(),
                }),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Value::Null)),
            TokenKind::Path(p) | TokenKind::Placeholder(p) => Ok(Expr::Ref(RefPath::parse(&p)?)),
            TokenKind::LParen => {
                self.enter()?;
                let inner = self.or();
                self.leave();
                let inner = inner?;
                match self.advance() {
                    Some(TokenKind::RParen) => Ok(inner),
                    _ => Err(ExpressionError::Syntax {
                        position,
                        message: "unclosed '('".to_string(),
                    }),
                }
            }
            TokenKind::LBracket => {
                self.enter()?;
                let items = self.list_items(position);
                self.leave();
                items.map(Expr::List)
            }
            other => Err(ExpressionError::Syntax {
                position,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }

    fn list_items(&mut self, open: usize) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.peek() == Some(&TokenKind::RBracket) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.or()?);
            match self.advance() {
                Some(TokenKind::Comma) => continue,
                Some(TokenKind::RBracket) => return Ok(items),
                _ => {
                    return Err(ExpressionError::Syntax {
                        position: open,
                        message: "unclosed '['".to_string(),
                    })
                }
            }
        }
    }
}

fn describe(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::RParen => "')'",
        TokenKind::RBracket => "']'",
        TokenKind::Comma => "','",
        TokenKind::And | TokenKind::Or => "logical operator",
        TokenKind::Not => "'not'",
        TokenKind::In | TokenKind::Contains | TokenKind::Matches => "keyword operator",
        TokenKind::Eq
        | TokenKind::Ne
        | TokenKind::Lt
        | TokenKind::Le
        | TokenKind::Gt
        | TokenKind::Ge => "comparison operator",
        _ => "operator",
    }
}
