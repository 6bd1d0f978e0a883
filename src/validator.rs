//! Expression validation
//!
//! A cheap parenthesis-balance scan runs first; only a balanced expression
//! is handed to the parser, whose error (if any) becomes a single
//! whole-expression validation error.

use crate::parser::parse;
use serde::{Deserialize, Serialize};

/// One validation problem; `position` is a `[start, end]` character range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub position: [usize; 2],
}

/// Validation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn ok() -> Self {
        ValidationResult {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(errors: Vec<ValidationError>) -> Self {
        ValidationResult {
            valid: false,
            errors,
        }
    }
}

/// Check an expression without evaluating it
pub fn validate(expr: &str) -> ValidationResult {
    if expr.trim().is_empty() {
        return ValidationResult::fail(vec![ValidationError {
            message: "Expression is empty".to_string(),
            position: [0, 0],
        }]);
    }

    let errors = check_parentheses(expr);
    if !errors.is_empty() {
        return ValidationResult::fail(errors);
    }

    match parse(expr) {
        Ok(_) => ValidationResult::ok(),
        Err(e) => ValidationResult::fail(vec![ValidationError {
            message: e.message,
            position: [0, expr.chars().count()],
        }]),
    }
}

/// First unmatched `)` and, if any `(` stay open, the last unmatched `(`
fn check_parentheses(expr: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut reported_close = false;

    for (i, c) in expr.chars().enumerate() {
        match c {
            '(' => open.push(i),
            ')' => {
                if open.pop().is_none() && !reported_close {
                    errors.push(ValidationError {
                        message: "Unmatched closing parenthesis".to_string(),
                        position: [i, i + 1],
                    });
                    reported_close = true;
                }
            }
            _ => {}
        }
    }

    if let Some(&last) = open.last() {
        errors.push(ValidationError {
            message: "Unmatched opening parenthesis".to_string(),
            position: [last, last + 1],
        });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_expression() {
        let result = validate("sin(x) + 2*(3 - 1)");
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_empty_input() {
        for input in ["", "   \t"] {
            let result = validate(input);
            assert!(!result.valid);
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.errors[0].message, "Expression is empty");
        }
    }

    #[test]
    fn test_unmatched_closing() {
        let result = validate("1 + 2) + (3))");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].position, [5, 6]);
    }

    #[test]
    fn test_unmatched_opening_reports_last() {
        let result = validate("((1 + (2)");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "Unmatched opening parenthesis");
        assert_eq!(result.errors[0].position, [1, 2]);
    }

    #[test]
    fn test_both_kinds() {
        let result = validate(")(");
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].position, [0, 1]);
        assert_eq!(result.errors[1].position, [1, 2]);
    }

    #[test]
    fn test_parse_error_spans_expression() {
        let result = validate("2 + * 3");
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].position, [0, 7]);
    }
}
