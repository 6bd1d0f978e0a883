//! Tokenizer: expression text → token stream
//!
//! Scans left to right over characters. Identifiers are classified against
//! the built-in function and constant tables (case-insensitive), plus any
//! extra function names supplied by the caller; everything else is a
//! variable. Implicit multiplication is made explicit here so the parser
//! never has to guess: `2x` → `2 * x`, `3(4)` → `3 * (4)`.
//!
//! Characters that fit no token class are skipped without error.

use crate::builtins::{Builtin, Constant};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Token classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Number,
    Operator,
    Function,
    Variable,
    Constant,
    LParen,
    RParen,
    Comma,
}

/// A single token
///
/// `position` is the character index of the token's first character. An
/// inserted implicit `*` takes the position of the token that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub value: String,
    pub position: usize,
    /// True for operators inserted by implicit multiplication
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub implicit: bool,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, position: usize) -> Self {
        Token {
            kind,
            value: value.into(),
            position,
            implicit: false,
        }
    }

    /// Character index one past the token's last character
    pub fn end(&self) -> usize {
        if self.implicit {
            self.position
        } else {
            self.position + self.value.chars().count()
        }
    }

    pub fn is_operator(&self, op: char) -> bool {
        self.kind == TokenKind::Operator && self.value.len() == 1 && self.value.starts_with(op)
    }

    /// Whether an implicit `*` goes between this token and a following operand
    fn ends_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number | TokenKind::RParen | TokenKind::Variable | TokenKind::Constant
        )
    }
}

const OPERATORS: &str = "+-*/%^!";

/// Expression tokenizer
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    /// Extra names to classify as functions (user-defined functions)
    functions: HashSet<String>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer::default()
    }

    /// Tokenizer that also recognises the given user-defined function names
    pub fn with_functions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tokenizer {
            functions: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Split an expression into tokens
    pub fn tokenize(&self, expr: &str) -> Vec<Token> {
        let chars: Vec<char> = expr.chars().collect();
        let mut tokens: Vec<Token> = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c.is_whitespace() {
                i += 1;
                continue;
            }

            if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
                let start = i;
                i = scan_number(&chars, i);
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::new(TokenKind::Number, raw, start));
                continue;
            }

            if c.is_ascii_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let token = self.classify_identifier(name, start);
                push_operand(&mut tokens, token);
                continue;
            }

            match c {
                '(' => push_operand(&mut tokens, Token::new(TokenKind::LParen, "(", i)),
                ')' => tokens.push(Token::new(TokenKind::RParen, ")", i)),
                ',' => tokens.push(Token::new(TokenKind::Comma, ",", i)),
                _ if OPERATORS.contains(c) => {
                    tokens.push(Token::new(TokenKind::Operator, c.to_string(), i))
                }
                // Anything else is dropped
                _ => {}
            }
            i += 1;
        }

        tokens
    }

    fn classify_identifier(&self, name: String, position: usize) -> Token {
        if let Some(builtin) = Builtin::from_name(&name) {
            return Token::new(TokenKind::Function, builtin.name(), position);
        }
        if self.functions.contains(&name) {
            return Token::new(TokenKind::Function, name, position);
        }
        if let Some(constant) = Constant::from_name(&name) {
            return Token::new(TokenKind::Constant, constant.name(), position);
        }
        Token::new(TokenKind::Variable, name, position)
    }
}

/// Tokenize with the built-in tables only
pub fn tokenize(expr: &str) -> Vec<Token> {
    Tokenizer::new().tokenize(expr)
}

/// Push an operand-starting token, inserting `*` after a finished operand
fn push_operand(tokens: &mut Vec<Token>, token: Token) {
    if tokens.last().is_some_and(Token::ends_operand) {
        tokens.push(Token {
            kind: TokenKind::Operator,
            value: "*".to_string(),
            position: token.position,
            implicit: true,
        });
    }
    tokens.push(token);
}

/// Scan digits, one decimal point and an optional exponent; returns the end index
fn scan_number(chars: &[char], mut i: usize) -> usize {
    let mut seen_dot = false;
    while i < chars.len() {
        match chars[i] {
            d if d.is_ascii_digit() => i += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }

    // Exponent only counts when digits follow, otherwise `e` is the constant
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    fn values(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.value.as_str()).collect()
    }

    #[test]
    fn test_simple_expression() {
        let tokens = tokenize("2 + 3.5");
        assert_eq!(values(&tokens), vec!["2", "+", "3.5"]);
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Number, TokenKind::Operator, TokenKind::Number]
        );
        assert_eq!(tokens[2].position, 4);
        assert_eq!(tokens[2].end(), 7);
    }

    #[test]
    fn test_scientific_notation() {
        assert_eq!(values(&tokenize("1.5e-3")), vec!["1.5e-3"]);
        assert_eq!(values(&tokenize("2E10")), vec!["2E10"]);
        // No digits after `e`: the constant, multiplied in
        assert_eq!(values(&tokenize("2e")), vec!["2", "*", "e"]);
    }

    #[test]
    fn test_identifier_classification() {
        let tokens = tokenize("SIN(Pi) + myVar");
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(tokens[0].value, "sin");
        assert_eq!(tokens[2].kind, TokenKind::Constant);
        assert_eq!(tokens[2].value, "pi");
        assert_eq!(tokens[5].kind, TokenKind::Variable);
        assert_eq!(tokens[5].value, "myVar");
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(values(&tokenize("2x")), vec!["2", "*", "x"]);
        assert_eq!(values(&tokenize("3(4)")), vec!["3", "*", "(", "4", ")"]);
        assert_eq!(values(&tokenize("(1)(2)")), vec!["(", "1", ")", "*", "(", "2", ")"]);
        assert_eq!(values(&tokenize("2sin(x)")), vec!["2", "*", "sin", "(", "x", ")"]);
        assert_eq!(values(&tokenize("pi r")), vec!["pi", "*", "r"]);

        let tokens = tokenize("2x");
        assert!(tokens[1].implicit);
        assert_eq!(tokens[1].position, 1);
    }

    #[test]
    fn test_no_implicit_multiplication_after_function() {
        assert_eq!(values(&tokenize("sqrt(4)")), vec!["sqrt", "(", "4", ")"]);
        assert_eq!(values(&tokenize("2 + (3)")), vec!["2", "+", "(", "3", ")"]);
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        assert_eq!(values(&tokenize("2 # 3 @")), vec!["2", "3"]);
        assert_eq!(values(&tokenize("1 $+ 1")), vec!["1", "+", "1"]);
    }

    #[test]
    fn test_second_decimal_point_ends_number() {
        assert_eq!(values(&tokenize("1.2.3")), vec!["1.2", ".3"]);
    }

    #[test]
    fn test_user_function_names() {
        let tokenizer = Tokenizer::with_functions(["f"]);
        let tokens = tokenizer.tokenize("f(2)");
        assert_eq!(tokens[0].kind, TokenKind::Function);
        assert_eq!(values(&tokens), vec!["f", "(", "2", ")"]);

        // Without the name, `f` is a variable times a group
        assert_eq!(values(&tokenize("f(2)")), vec!["f", "*", "(", "2", ")"]);
    }

    #[test]
    fn test_factorial_operator() {
        let tokens = tokenize("5!");
        assert_eq!(values(&tokens), vec!["5", "!"]);
        assert!(tokens[1].is_operator('!'));
    }
}
