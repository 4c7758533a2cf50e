//! `#if` expression language.
//!
//! A small, side-effect-free evaluator over the per-query parameter
//! environment: identifiers, numeric/string/bool/null literals, comparisons,
//! boolean operators, parentheses. Unknown identifiers evaluate to `null`
//! (falsey), so `#if debug` works whether or not the caller set `debug`.
//!
//! `and`/`or` keep value semantics (`a or b` yields `a` when `a` is truthy),
//! which only matters for nesting; the preprocessor consumes truthiness.

use crate::error::{PrepError, PrepResult};
use crate::value::{Params, SqlValue};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(f64),
    Str(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> PrepResult<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                toks.push(Tok::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ne);
                } else {
                    toks.push(Tok::Not);
                }
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        toks.push(Tok::Le);
                    }
                    Some('>') => {
                        chars.next();
                        toks.push(Tok::Ne);
                    }
                    _ => toks.push(Tok::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    toks.push(Tok::Ge);
                } else {
                    toks.push(Tok::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.next() != Some('&') {
                    return Err(PrepError::template("#if: expected '&&'"));
                }
                toks.push(Tok::And);
            }
            '|' => {
                chars.next();
                if chars.next() != Some('|') {
                    return Err(PrepError::template("#if: expected '||'"));
                }
                toks.push(Tok::Or);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => s.push(c),
                        None => return Err(PrepError::template("#if: unclosed string literal")),
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '+' || c == '-'
                    {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num = s
                    .parse::<f64>()
                    .map_err(|_| PrepError::template(format!("#if: bad number '{s}'")))?;
                toks.push(Tok::Num(num));
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match s.as_str() {
                    "and" => toks.push(Tok::And),
                    "or" => toks.push(Tok::Or),
                    "not" => toks.push(Tok::Not),
                    _ => toks.push(Tok::Ident(s)),
                }
            }
            other => {
                return Err(PrepError::template(format!(
                    "#if: unexpected character '{other}'"
                )));
            }
        }
    }
    Ok(toks)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    params: &'a Params,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn or_expr(&mut self) -> PrepResult<SqlValue> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Tok::Or) {
            self.next();
            let rhs = self.and_expr()?;
            if !lhs.truthy() {
                lhs = rhs;
            }
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> PrepResult<SqlValue> {
        let mut lhs = self.not_expr()?;
        while self.peek() == Some(&Tok::And) {
            self.next();
            let rhs = self.not_expr()?;
            if lhs.truthy() {
                lhs = rhs;
            }
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> PrepResult<SqlValue> {
        if self.peek() == Some(&Tok::Not) {
            self.next();
            let v = self.not_expr()?;
            return Ok(SqlValue::Bool(!v.truthy()));
        }
        self.cmp_expr()
    }

    fn cmp_expr(&mut self) -> PrepResult<SqlValue> {
        let lhs = self.primary()?;
        let op = match self.peek() {
            Some(Tok::Eq) => Tok::Eq,
            Some(Tok::Ne) => Tok::Ne,
            Some(Tok::Lt) => Tok::Lt,
            Some(Tok::Le) => Tok::Le,
            Some(Tok::Gt) => Tok::Gt,
            Some(Tok::Ge) => Tok::Ge,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.primary()?;
        compare(&op, &lhs, &rhs)
    }

    fn primary(&mut self) -> PrepResult<SqlValue> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(SqlValue::Float(n)),
            Some(Tok::Str(s)) => Ok(SqlValue::Text(s)),
            Some(Tok::Ident(name)) => Ok(match name.as_str() {
                "true" => SqlValue::Bool(true),
                "false" => SqlValue::Bool(false),
                "null" => SqlValue::Null,
                _ => self.params.get(&name).cloned().unwrap_or(SqlValue::Null),
            }),
            Some(Tok::LParen) => {
                let v = self.or_expr()?;
                if self.next() != Some(Tok::RParen) {
                    return Err(PrepError::template("#if: expected ')'"));
                }
                Ok(v)
            }
            other => Err(PrepError::template(format!(
                "#if: expected a value, got {other:?}"
            ))),
        }
    }
}

fn compare(op: &Tok, lhs: &SqlValue, rhs: &SqlValue) -> PrepResult<SqlValue> {
    // Numeric comparison when both sides have a numeric view, else string
    // comparison. Equality across mismatched kinds is simply false.
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        let r = match op {
            Tok::Eq => a == b,
            Tok::Ne => a != b,
            Tok::Lt => a < b,
            Tok::Le => a <= b,
            Tok::Gt => a > b,
            Tok::Ge => a >= b,
            _ => unreachable!(),
        };
        return Ok(SqlValue::Bool(r));
    }
    if let (SqlValue::Text(a), SqlValue::Text(b)) = (lhs, rhs) {
        let r = match op {
            Tok::Eq => a == b,
            Tok::Ne => a != b,
            Tok::Lt => a < b,
            Tok::Le => a <= b,
            Tok::Gt => a > b,
            Tok::Ge => a >= b,
            _ => unreachable!(),
        };
        return Ok(SqlValue::Bool(r));
    }
    match op {
        Tok::Eq => Ok(SqlValue::Bool(lhs == rhs)),
        Tok::Ne => Ok(SqlValue::Bool(lhs != rhs)),
        _ => Err(PrepError::template(
            "#if: ordering comparison between incompatible values",
        )),
    }
}

/// Evaluate an `#if` expression against the parameter environment.
pub fn eval(expr: &str, params: &Params) -> PrepResult<SqlValue> {
    let toks = lex(expr)?;
    if toks.is_empty() {
        return Err(PrepError::template("#if: empty expression"));
    }
    let mut parser = Parser {
        toks,
        pos: 0,
        params,
    };
    let value = parser.or_expr()?;
    if parser.pos != parser.toks.len() {
        return Err(PrepError::template(format!(
            "#if: trailing tokens in expression '{expr}'"
        )));
    }
    Ok(value)
}

/// Evaluate an `#if` expression to a branch decision.
pub fn eval_truthy(expr: &str, params: &Params) -> PrepResult<bool> {
    Ok(eval(expr, params)?.truthy())
}
