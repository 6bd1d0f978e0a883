//! Pretty-printer: [`Ast`] → expression text
//!
//! Output is parenthesized minimally against the same precedence table the
//! parser uses, so `parse(pretty_print(ast))` rebuilds an equivalent tree.
//! Numbers print their source literal.

use crate::ast::{Ast, BinaryOperator, NodeId, NodeKind, UnaryOperator};

/// Render an AST back to text
pub fn pretty_print(ast: &Ast) -> String {
    let mut out = String::new();
    print_node(ast, ast.root(), &mut out);
    out
}

fn print_node(ast: &Ast, id: NodeId, out: &mut String) {
    match &ast.node(id).kind {
        NodeKind::Number { raw, .. } => out.push_str(raw),

        NodeKind::Constant(c) => out.push_str(c.name()),

        NodeKind::Variable(name) => out.push_str(name),

        NodeKind::UnaryOp { operator, operand } => {
            let wrap = needs_unary_parens(ast, *operator, *operand);
            if !operator.is_postfix() {
                out.push_str(operator.symbol());
            }
            print_wrapped(ast, *operand, wrap, out);
            if operator.is_postfix() {
                out.push_str(operator.symbol());
            }
        }

        NodeKind::BinaryOp {
            operator,
            left,
            right,
        } => {
            let wrap_left = needs_parens(ast, *left, *operator, false);
            print_wrapped(ast, *left, wrap_left, out);
            out.push(' ');
            out.push_str(operator.symbol());
            out.push(' ');
            let wrap_right = needs_parens(ast, *right, *operator, true);
            print_wrapped(ast, *right, wrap_right, out);
        }

        NodeKind::FunctionCall { name, args } => {
            out.push_str(name);
            out.push('(');
            print_list(ast, args, out);
            out.push(')');
        }

        NodeKind::Matrix { rows } => {
            out.push('[');
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('[');
                print_list(ast, row, out);
                out.push(']');
            }
            out.push(']');
        }

        NodeKind::Complex { real, imaginary } => {
            out.push_str("complex(");
            print_list(ast, &[*real, *imaginary], out);
            out.push(')');
        }
    }
}

fn print_list(ast: &Ast, ids: &[NodeId], out: &mut String) {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_node(ast, *id, out);
    }
}

fn print_wrapped(ast: &Ast, id: NodeId, wrap: bool, out: &mut String) {
    if wrap {
        out.push('(');
    }
    print_node(ast, id, out);
    if wrap {
        out.push(')');
    }
}

/// Whether a binary operand needs parentheses under `parent`
///
/// Lower precedence always wraps. Equal precedence wraps on the side the
/// parent does not associate toward: the right of `+ - * / %`, the left of `^`.
fn needs_parens(ast: &Ast, child: NodeId, parent: BinaryOperator, is_right: bool) -> bool {
    let NodeKind::BinaryOp { operator, .. } = &ast.node(child).kind else {
        return false;
    };
    let (child_prec, parent_prec) = (operator.precedence(), parent.precedence());
    if child_prec != parent_prec {
        return child_prec < parent_prec;
    }
    is_right != parent.is_right_associative()
}

/// Prefix operators wrap binary operands; postfix `!` also wraps prefix unaries
fn needs_unary_parens(ast: &Ast, operator: UnaryOperator, operand: NodeId) -> bool {
    match &ast.node(operand).kind {
        NodeKind::BinaryOp { .. } => true,
        NodeKind::UnaryOp { operator: inner, .. } => operator.is_postfix() && !inner.is_postfix(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

    fn print(expr: &str) -> String {
        pretty_print(&parse(expr).unwrap())
    }

    fn assert_round_trip(expr: &str) {
        let ast = parse(expr).unwrap();
        let printed = pretty_print(&ast);
        let reparsed = parse(&printed).unwrap_or_else(|e| panic!("'{}' -> '{}': {}", expr, printed, e));
        assert!(
            ast.equivalent(&reparsed, 1e-10),
            "round trip changed structure: '{}' -> '{}'",
            expr,
            printed
        );
    }

    #[test]
    fn test_minimal_parentheses() {
        assert_eq!(print("2+3*4"), "2 + 3 * 4");
        assert_eq!(print("(2+3)*4"), "(2 + 3) * 4");
        assert_eq!(print("a-(b-c)"), "a - (b - c)");
        assert_eq!(print("(a-b)-c"), "a - b - c");
        assert_eq!(print("a/(b*c)"), "a / (b * c)");
        assert_eq!(print("2^3^2"), "2 ^ 3 ^ 2");
        assert_eq!(print("(2^3)^2"), "(2 ^ 3) ^ 2");
    }

    #[test]
    fn test_unary_printing() {
        assert_eq!(print("-x"), "-x");
        assert_eq!(print("-(x+1)"), "-(x + 1)");
        assert_eq!(print("-2^2"), "-2 ^ 2");
        assert_eq!(print("5!"), "5!");
        assert_eq!(print("(2+3)!"), "(2 + 3)!");
        assert_eq!(print("(-3)!"), "(-3)!");
    }

    #[test]
    fn test_literals_keep_source_text() {
        assert_eq!(print("1.50e2 + 0.10"), "1.50e2 + 0.10");
        assert_eq!(print("PI*r"), "pi * r");
        assert_eq!(print("max(1,2 , 3)"), "max(1, 2, 3)");
        assert_eq!(print("2x"), "2 * x");
    }

    #[test]
    fn test_round_trip_examples() {
        for expr in [
            "2+3*4",
            "a*(b/c)",
            "a+(b+c)",
            "a%(b%c)",
            "(2^3)^2",
            "-2^2",
            "-(2^2)",
            "2^-3",
            "--x",
            "sin(x)^2 + cos(x)^2",
            "root(27, 3) * (1 - e)",
            "(-3)!!",
            "3!^2",
            "1e-5 / (x - 2)",
        ] {
            assert_round_trip(expr);
        }
    }

    /// Random, always-parseable expression text
    #[derive(Debug, Clone)]
    struct ExprText(String);

    impl Arbitrary for ExprText {
        fn arbitrary(g: &mut Gen) -> Self {
            let depth = g.size().min(4);
            ExprText(gen_expr(g, depth))
        }
    }

    fn gen_expr(g: &mut Gen, depth: usize) -> String {
        if depth == 0 {
            return match u8::arbitrary(g) % 5 {
                0 => format!("{}", u16::arbitrary(g)),
                1 => format!("{}.{}", u8::arbitrary(g), u8::arbitrary(g)),
                2 => "x".to_string(),
                3 => "pi".to_string(),
                _ => "2.5e-3".to_string(),
            };
        }
        match u8::arbitrary(g) % 8 {
            0..=3 => {
                let ops = ["+", "-", "*", "/", "%", "^"];
                let op = ops[usize::arbitrary(g) % ops.len()];
                let left = gen_expr(g, depth - 1);
                let right = gen_expr(g, depth - 1);
                if bool::arbitrary(g) {
                    format!("({}) {} ({})", left, op, right)
                } else {
                    format!("{} {} {}", left, op, right)
                }
            }
            4 => format!("-{}", gen_expr(g, depth - 1)),
            5 => format!("({})!", gen_expr(g, depth - 1)),
            6 => {
                let fns = ["sin", "ln", "sqrt", "abs"];
                let f = fns[usize::arbitrary(g) % fns.len()];
                format!("{}({})", f, gen_expr(g, depth - 1))
            }
            _ => format!("max({}, {})", gen_expr(g, depth - 1), gen_expr(g, depth - 1)),
        }
    }

    #[test]
    fn test_round_trip_property() {
        fn prop(expr: ExprText) -> TestResult {
            let Ok(ast) = parse(&expr.0) else {
                return TestResult::discard();
            };
            match parse(&pretty_print(&ast)) {
                Ok(reparsed) => TestResult::from_bool(ast.equivalent(&reparsed, 1e-10)),
                Err(_) => TestResult::failed(),
            }
        }
        QuickCheck::new()
            .tests(300)
            .quickcheck(prop as fn(ExprText) -> TestResult);
    }
}
