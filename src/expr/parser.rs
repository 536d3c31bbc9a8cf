// src/expr/parser.rs

use crate::model::Value;

use super::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    /// Binding power; higher binds tighter.
    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Value),
    Str(String),
    Ident(String),
    Bool(bool),
    Op(BinaryOp),
    Minus,
    Not,
    LParen,
    RParen,
}

pub(super) fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse {
            pos: 0,
            message: "empty expression".to_string(),
        });
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    if let Some((pos, tok)) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Parse {
            pos: *pos,
            message: format!("unexpected trailing token {tok:?}"),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn expression(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.prefix()?;

        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(prec)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        let pos = self.offset();
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            // Negation binds tighter than any binary operator; NOT covers a
            // whole comparison.
            Some(Token::Minus) => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary_operand()?))),
            Some(Token::Not) => {
                let operand = self.expression(BinaryOp::And.precedence())?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Parse {
                        pos: self.offset(),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            Some(tok) => Err(ExprError::Parse {
                pos,
                message: format!("unexpected token {tok:?}"),
            }),
            None => Err(ExprError::Parse {
                pos,
                message: "unexpected end of expression".to_string(),
            }),
        }
    }

    fn unary_operand(&mut self) -> Result<Expr, ExprError> {
        self.expression(BinaryOp::Mul.precedence())
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let peek = chars.get(i + 1).map(|(_, c)| *c);

        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                tokens.push((pos, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((pos, Token::RParen));
                i += 1;
            }
            '+' => {
                tokens.push((pos, Token::Op(BinaryOp::Add)));
                i += 1;
            }
            '-' => {
                tokens.push((pos, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((pos, Token::Op(BinaryOp::Mul)));
                i += 1;
            }
            '/' => {
                tokens.push((pos, Token::Op(BinaryOp::Div)));
                i += 1;
            }
            '%' => {
                tokens.push((pos, Token::Op(BinaryOp::Mod)));
                i += 1;
            }
            '<' => {
                let (op, len) = match peek {
                    Some('=') => (BinaryOp::LtEq, 2),
                    Some('>') => (BinaryOp::NotEq, 2),
                    _ => (BinaryOp::Lt, 1),
                };
                tokens.push((pos, Token::Op(op)));
                i += len;
            }
            '>' => {
                let (op, len) = match peek {
                    Some('=') => (BinaryOp::GtEq, 2),
                    _ => (BinaryOp::Gt, 1),
                };
                tokens.push((pos, Token::Op(op)));
                i += len;
            }
            '=' => {
                let len = if peek == Some('=') { 2 } else { 1 };
                tokens.push((pos, Token::Op(BinaryOp::Eq)));
                i += len;
            }
            '!' => {
                if peek == Some('=') {
                    tokens.push((pos, Token::Op(BinaryOp::NotEq)));
                    i += 2;
                } else {
                    tokens.push((pos, Token::Not));
                    i += 1;
                }
            }
            '&' | '|' => {
                if peek != Some(c) {
                    return Err(ExprError::Parse {
                        pos,
                        message: format!("expected '{c}{c}'"),
                    });
                }
                let op = if c == '&' { BinaryOp::And } else { BinaryOp::Or };
                tokens.push((pos, Token::Op(op)));
                i += 2;
            }
            '\'' | '"' => {
                let (text, next) = read_quoted(&chars, i, c)?;
                let tok = if c == '\'' {
                    Token::Str(text)
                } else {
                    Token::Ident(text)
                };
                tokens.push((pos, tok));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push((pos, Token::Number(parse_number(&text, pos)?)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let tok = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::Op(BinaryOp::And),
                    "OR" => Token::Op(BinaryOp::Or),
                    "NOT" => Token::Not,
                    "TRUE" => Token::Bool(true),
                    "FALSE" => Token::Bool(false),
                    _ => Token::Ident(word),
                };
                tokens.push((pos, tok));
            }
            other => {
                return Err(ExprError::Parse {
                    pos,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

fn read_quoted(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExprError> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '\\' {
            if let Some((_, escaped)) = chars.get(i + 1) {
                out.push(*escaped);
                i += 2;
                continue;
            }
        }
        if c == quote {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(ExprError::Parse {
        pos: chars[start].0,
        message: "unterminated quoted text".to_string(),
    })
}

fn parse_number(text: &str, pos: usize) -> Result<Value, ExprError> {
    let bad = || ExprError::Parse {
        pos,
        message: format!("invalid number '{text}'"),
    };
    if text.contains('.') {
        text.parse::<f64>().map(Value::Float).map_err(|_| bad())
    } else {
        text.parse::<i64>().map(Value::Int).map_err(|_| bad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn comparison_binds_looser_than_arithmetic() {
        let expr = parse("a + 1 < 30").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Lt,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    ident("a"),
                    Box::new(Expr::Literal(Value::Int(1)))
                )),
                Box::new(Expr::Literal(Value::Int(30)))
            )
        );
    }

    #[test]
    fn dotted_and_quoted_identifiers() {
        assert_eq!(
            parse(r#""errors.count" / views.count"#).unwrap(),
            Expr::Binary(BinaryOp::Div, ident("errors.count"), ident("views.count"))
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let expr = parse("not a and b OR c").unwrap();
        let Expr::Binary(BinaryOp::Or, lhs, _) = expr else {
            panic!("expected OR at the root");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::And, _, _)));
    }

    #[test]
    fn reports_unbalanced_parens() {
        assert!(matches!(parse("(a < 1"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse("a < 1)"), Err(ExprError::Parse { .. })));
        assert!(matches!(parse(""), Err(ExprError::Parse { .. })));
    }
}
