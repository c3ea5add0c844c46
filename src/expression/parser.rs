// Copyright 2024 Mikael Lund
//
// Licensed under the Apache license, version 2.0 (the "license");
// you may not use this file except in compliance with the license.
// You may obtain a copy of the license at
//
//     http://www.apache.org/licenses/license-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the license is distributed on an "as is" basis,
// without warranties or conditions of any kind, either express or implied.
// See the license for the specific language governing permissions and
// limitations under the license.

//! Tokenizer and recursive descent parser for energy expressions.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! input      := expression (';' name '=' expression)*
//! expression := term (('+' | '-') term)*
//! term       := unary (('*' | '/') unary)*
//! unary      := '-' unary | power
//! power      := atom ('^' unary)?
//! atom       := number | name | name '(' arguments ')' | '(' expression ')'
//! ```
//!
//! Definitions after a `;` may be used by the main expression and by
//! definitions listed before them.

use super::{Expr, Function, Operator};
use crate::geometry::GeometryTerm;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;

/// Resolves names to slots while parsing
pub(crate) trait Resolver {
    /// Slot of a plain variable (coordinate or parameter)
    fn variable(&self, name: &str) -> Option<usize>;
    /// Zero-based bond role of a particle label such as `p2`
    fn particle(&self, name: &str) -> Option<usize>;
    /// Index of a tabulated function
    fn function(&self, name: &str) -> Option<usize>;
    /// Slot holding the value of a geometry term, registering it if new
    fn geometry(&mut self, term: GeometryTerm) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Name(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LeftParen,
    RightParen,
    Comma,
    Equals,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    /// Byte offset in the full input
    offset: usize,
}

fn tokenize(input: &str, start: usize, end: usize) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = start;
    while i < end {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let offset = i;
        let kind = match b {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'^' => TokenKind::Caret,
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b',' => TokenKind::Comma,
            b'=' => TokenKind::Equals,
            _ if b.is_ascii_digit() || b == b'.' => {
                i += 1;
                while i < end {
                    let c = bytes[i];
                    let exponent_sign =
                        (c == b'+' || c == b'-') && matches!(bytes[i - 1], b'e' | b'E');
                    if c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E') || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text = &input[offset..i];
                let value = text
                    .parse()
                    .map_err(|_| error(input, offset, format!("invalid number '{text}'")))?;
                tokens.push(Token {
                    kind: TokenKind::Number(value),
                    offset,
                });
                continue;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                i += 1;
                while i < end && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Name(input[offset..i].to_string()),
                    offset,
                });
                continue;
            }
            _ => {
                let c = input[offset..].chars().next().unwrap_or('?');
                return Err(error(input, offset, format!("unexpected character '{c}'")));
            }
        };
        tokens.push(Token { kind, offset });
        i += 1;
    }
    Ok(tokens)
}

fn error(input: &str, offset: usize, message: String) -> anyhow::Error {
    anyhow!("in expression '{input}' at column {}: {message}", offset + 1)
}

/// Names of built-in functions, which cannot be redefined
pub(crate) fn is_builtin(name: &str) -> bool {
    Function::from_name(name).is_some()
        || matches!(name, "min" | "max" | "distance" | "angle" | "dihedral")
}

/// Parse `input` into an expression tree, resolving names through `resolver`.
pub(crate) fn parse(input: &str, resolver: &mut impl Resolver) -> Result<Expr> {
    if !input.is_ascii() {
        bail!("expression '{input}' contains non-ASCII characters");
    }
    // (start, end) byte ranges of the ';'-separated parts
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, _) in input.match_indices(';') {
        parts.push((start, i));
        start = i + 1;
    }
    parts.push((start, input.len()));

    // Definitions are parsed last to first so each sees the ones after it
    let mut definitions: HashMap<String, Expr> = HashMap::new();
    for &(start, end) in parts.iter().skip(1).rev() {
        let tokens = tokenize(input, start, end)?;
        let (name, offset) = match tokens.as_slice() {
            [Token {
                kind: TokenKind::Name(name),
                offset,
            }, Token {
                kind: TokenKind::Equals,
                ..
            }, ..] => (name.clone(), *offset),
            [] => bail!("in expression '{input}': empty definition after ';'"),
            [first, ..] => {
                return Err(error(
                    input,
                    first.offset,
                    "expected a definition of the form 'name = expression'".to_string(),
                ))
            }
        };
        if definitions.contains_key(&name)
            || is_builtin(&name)
            || resolver.variable(&name).is_some()
            || resolver.particle(&name).is_some()
            || resolver.function(&name).is_some()
        {
            return Err(error(input, offset, format!("'{name}' cannot be redefined")));
        }
        let mut parser = Parser::new(input, &tokens[2..], end, &definitions, resolver);
        let expr = parser.parse_all()?;
        definitions.insert(name, expr);
    }

    let (start, end) = parts[0];
    let tokens = tokenize(input, start, end)?;
    Parser::new(input, &tokens, end, &definitions, resolver).parse_all()
}

struct Parser<'a, R: Resolver> {
    input: &'a str,
    tokens: &'a [Token],
    /// Offset reported when running out of tokens
    end: usize,
    pos: usize,
    definitions: &'a HashMap<String, Expr>,
    resolver: &'a mut R,
}

impl<'a, R: Resolver> Parser<'a, R> {
    fn new(
        input: &'a str,
        tokens: &'a [Token],
        end: usize,
        definitions: &'a HashMap<String, Expr>,
        resolver: &'a mut R,
    ) -> Self {
        Self {
            input,
            tokens,
            end,
            pos: 0,
            definitions,
            resolver,
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> anyhow::Error {
        let offset = self.tokens.get(self.pos).map_or(self.end, |t| t.offset);
        error(self.input, offset, message.into())
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    /// Parse a complete expression; trailing tokens are an error
    fn parse_all(&mut self) -> Result<Expr> {
        let expr = self.parse_expression()?;
        match self.peek() {
            None => Ok(expr),
            Some(TokenKind::RightParen) => Err(self.error_here("unbalanced ')'")),
            Some(kind) => {
                let message = format!("unexpected {kind:?} after end of expression");
                Err(self.error_here(message))
            }
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let operator = match self.peek() {
                Some(TokenKind::Plus) => Operator::Add,
                Some(TokenKind::Minus) => Operator::Subtract,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::binary(operator, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let operator = match self.peek() {
                Some(TokenKind::Star) => Operator::Multiply,
                Some(TokenKind::Slash) => Operator::Divide,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::binary(operator, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&TokenKind::Minus) {
            self.advance();
            return Ok(Expr::neg(self.parse_unary()?));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_atom()?;
        if self.peek() == Some(&TokenKind::Caret) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Constant(value)),
            TokenKind::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Name(name) if self.peek() == Some(&TokenKind::LeftParen) => {
                self.advance();
                self.parse_call(&name, token.offset)
            }
            TokenKind::Name(name) => self.resolve_name(&name, token.offset),
            kind => Err(error(
                self.input,
                token.offset,
                format!("expected a number, name or '(', got {kind:?}"),
            )),
        }
    }

    fn resolve_name(&self, name: &str, offset: usize) -> Result<Expr> {
        if let Some(expr) = self.definitions.get(name) {
            return Ok(expr.clone());
        }
        if let Some(slot) = self.resolver.variable(name) {
            return Ok(Expr::Variable(slot));
        }
        let message = if self.resolver.particle(name).is_some() {
            format!("particle '{name}' may only appear as an argument of distance, angle or dihedral")
        } else if is_builtin(name) || self.resolver.function(name).is_some() {
            format!("function '{name}' must be called with arguments")
        } else {
            format!("unknown variable '{name}'")
        };
        Err(error(self.input, offset, message))
    }

    /// Parse call arguments after the opening parenthesis, consuming the closing one
    fn parse_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut arguments = vec![self.parse_expression()?];
        while self.peek() == Some(&TokenKind::Comma) {
            self.advance();
            arguments.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RightParen, "',' or ')'")?;
        Ok(arguments)
    }

    /// Geometry arguments must be bare particle labels
    fn parse_particles(&mut self) -> Result<Vec<usize>> {
        let mut roles = Vec::new();
        loop {
            let Some(TokenKind::Name(name)) = self.peek() else {
                return Err(self.error_here("expected a particle label"));
            };
            let role = self.resolver.particle(name).ok_or_else(|| {
                self.error_here(format!("'{name}' is not a particle label"))
            })?;
            roles.push(role);
            self.pos += 1;
            match self.peek() {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::RightParen) => {
                    self.pos += 1;
                    return Ok(roles);
                }
                _ => return Err(self.error_here("expected ',' or ')'")),
            }
        }
    }

    fn parse_call(&mut self, name: &str, offset: usize) -> Result<Expr> {
        let input = self.input;
        let arity_error = |expected: usize, got: usize| {
            error(
                input,
                offset,
                format!("function '{name}' takes {expected} argument(s), got {got}"),
            )
        };
        if matches!(name, "distance" | "angle" | "dihedral") {
            let roles = self.parse_particles()?;
            let term = match (name, roles.as_slice()) {
                ("distance", &[i, j]) => GeometryTerm::Distance([i, j]),
                ("angle", &[i, j, k]) => GeometryTerm::Angle([i, j, k]),
                ("dihedral", &[i, j, k, l]) => GeometryTerm::Dihedral([i, j, k, l]),
                ("distance", _) => return Err(arity_error(2, roles.len())),
                ("angle", _) => return Err(arity_error(3, roles.len())),
                _ => return Err(arity_error(4, roles.len())),
            };
            return Ok(Expr::Variable(self.resolver.geometry(term)));
        }

        let mut arguments = self.parse_arguments()?;
        let count = arguments.len();
        if let Some(function) = Function::from_name(name) {
            return match arguments.pop() {
                Some(arg) if count == 1 => Ok(Expr::unary(function, arg)),
                _ => Err(arity_error(1, count)),
            };
        }
        let operator = match name {
            "min" => Some(Operator::Min),
            "max" => Some(Operator::Max),
            _ => None,
        };
        if let Some(operator) = operator {
            return match (arguments.pop(), arguments.pop()) {
                (Some(b), Some(a)) if count == 2 => Ok(Expr::binary(operator, a, b)),
                _ => Err(arity_error(2, count)),
            };
        }
        if let Some(function) = self.resolver.function(name) {
            return match arguments.pop() {
                Some(argument) if count == 1 => Ok(Expr::Tabulated {
                    function,
                    order: 0,
                    argument: Box::new(argument),
                }),
                _ => Err(arity_error(1, count)),
            };
        }
        Err(error(self.input, offset, format!("unknown function '{name}'")))
    }
}
