//! Arithmetic formulas over `{field}` references.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := '-' factor | '(' expr ')' | number | '{' name '}'
//! ```

use crate::error::RuleFailure;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn parse(formula: &str) -> Result<Self, String> {
        let mut parser = Parser {
            chars: formula.chars().peekable(),
        };
        let expr = parser.expr()?;
        parser.skip_ws();
        match parser.chars.next() {
            None => Ok(expr),
            Some(c) => Err(format!("unexpected '{c}'")),
        }
    }

    /// Field names referenced by the formula, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
        }
    }

    /// Evaluate, resolving field references through `resolve`.
    pub fn eval(
        &self,
        resolve: &mut dyn FnMut(&str) -> Result<f64, RuleFailure>,
    ) -> Result<f64, RuleFailure> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Field(name) => resolve(name),
            Expr::Neg(inner) => Ok(-inner.eval(resolve)?),
            Expr::Binary { op, left, right } => {
                let l = left.eval(resolve)?;
                let r = right.eval(resolve)?;
                match op {
                    BinOp::Add => Ok(l + r),
                    BinOp::Sub => Ok(l - r),
                    BinOp::Mul => Ok(l * r),
                    BinOp::Div if r == 0.0 => Err(RuleFailure::arithmetic("division by zero")),
                    BinOp::Div => Ok(l / r),
                }
            }
        }
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().copied()
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        while let Some(c @ ('+' | '-')) = self.peek() {
            self.chars.next();
            let right = self.term()?;
            let op = if c == '+' { BinOp::Add } else { BinOp::Sub };
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.factor()?;
        while let Some(c @ ('*' | '/')) = self.peek() {
            self.chars.next();
            let right = self.factor()?;
            let op = if c == '*' { BinOp::Mul } else { BinOp::Div };
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some('-') => {
                self.chars.next();
                Ok(Expr::Neg(Box::new(self.factor()?)))
            }
            Some('(') => {
                self.chars.next();
                let inner = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(inner)
                    }
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some('{') => {
                self.chars.next();
                let mut name = String::new();
                loop {
                    match self.chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err("unterminated field reference".to_string()),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err("empty field reference".to_string());
                }
                Ok(Expr::Field(name.to_string()))
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                literal
                    .parse::<f64>()
                    .map(Expr::Number)
                    .map_err(|_| format!("invalid number '{literal}'"))
            }
            Some(c) => Err(format!("unexpected '{c}'")),
            None => Err("unexpected end of formula".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with(formula: &str, values: &[(&str, f64)]) -> Result<f64, RuleFailure> {
        let expr = Expr::parse(formula).unwrap();
        let mut resolve = |name: &str| {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
                .ok_or(RuleFailure::MissingSource {
                    field: name.to_string(),
                })
        };
        expr.eval(&mut resolve)
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval_with("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_with("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_with("-2 * -3", &[]).unwrap(), 6.0);
        assert_eq!(eval_with("10 - 4 - 3", &[]).unwrap(), 3.0);
    }

    #[test]
    fn test_field_references() {
        let value = eval_with("{price} * {qty} - {discount}", &[
            ("price", 2.5),
            ("qty", 4.0),
            ("discount", 1.0),
        ])
        .unwrap();
        assert_eq!(value, 9.0);

        let expr = Expr::parse("{a} + {b} * {a}").unwrap();
        assert_eq!(expr.fields(), vec!["a", "b"]);
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_with("{a} / 0", &[("a", 1.0)]).unwrap_err();
        assert!(matches!(err, RuleFailure::Arithmetic { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("{}").is_err());
        assert!(Expr::parse("{a").is_err());
        assert!(Expr::parse("1 2").is_err());
        assert!(Expr::parse("1..2").is_err());
    }
}
