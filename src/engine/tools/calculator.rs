//! Arithmetic evaluator for the `calculator` tool.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/' | '//') unary)*
//! unary  := ('+' | '-') unary | power
//! power  := atom ('**' unary)?
//! atom   := number | '(' expr ')'
//! ```

use thiserror::Error;

const ALLOWED: &str = "0123456789+-*/.() ";
/// Bound on nested parentheses, signs and exponents combined.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum CalcError {
    #[error("Expression contains invalid characters")]
    InvalidCharacters,
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid syntax at position {0}")]
    Syntax(usize),
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression nests too deeply")]
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Pow,
    LParen,
    RParen,
}

pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if !expression.chars().all(|c| ALLOWED.contains(c) || c.is_ascii_whitespace()) {
        return Err(CalcError::InvalidCharacters);
    }

    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(CalcError::Syntax(parser.pos));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let value = input[start..i]
                    .parse::<f64>()
                    .map_err(|_| CalcError::Syntax(tokens.len()))?;
                tokens.push(Token::Num(value));
            }
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'*' if bytes.get(i + 1) == Some(&b'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                tokens.push(Token::FloorDiv);
                i += 2;
            }
            b'/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ => return Err(CalcError::InvalidCharacters),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::FloorDiv)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                Token::Slash => value / rhs,
                _ => (value / rhs).floor(),
            };
        }
        Ok(value)
    }

    /// Every recursive path of the grammar passes through here, so the depth
    /// check bounds stack use for any input.
    fn unary(&mut self) -> Result<f64, CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            if base == 0.0 && exponent < 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        let at = self.pos;
        match self.bump() {
            Some(Token::Num(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(CalcError::Syntax(self.pos.saturating_sub(1))),
                }
            }
            _ => Err(CalcError::Syntax(at)),
        }
    }
}
