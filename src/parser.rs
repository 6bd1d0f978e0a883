//! Recursive-descent parser: tokens → [`Ast`]
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expression := term (('+'|'-') term)*
//! term       := factor (('*'|'/'|'%') factor)*
//! factor     := unary ('^' factor)?
//! unary      := ('+'|'-') unary | postfix
//! postfix    := primary '!'*
//! primary    := number | constant | variable
//!             | function '(' (expression (',' expression)*)? ')'
//!             | '(' expression ')'
//! ```
//!
//! The exponent applies to the whole `unary`, so `-2^2` is `(-2)^2`.

use crate::ast::{Ast, AstBuilder, BinaryOperator, NodeId, NodeKind, Position, UnaryOperator};
use crate::builtins::Constant;
use crate::error::ParseError;
use crate::token::{Token, TokenKind, Tokenizer};

type ParseResult<T> = Result<T, ParseError>;

/// Deepest accepted nesting, for both parser recursion and tree height
pub const MAX_NESTING_DEPTH: usize = 500;

/// Parse an expression using the built-in function table
pub fn parse(expr: &str) -> Result<Ast, ParseError> {
    parse_tokens(Tokenizer::new().tokenize(expr))
}

/// Parse an expression where `functions` are also callable names
pub fn parse_with_functions<I, S>(expr: &str, functions: I) -> Result<Ast, ParseError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parse_tokens(Tokenizer::with_functions(functions).tokenize(expr))
}

/// Parse an already tokenized expression
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Ast, ParseError> {
    Parser::new(tokens).parse()
}

/// Single-use parser over a token vector
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    builder: AstBuilder,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
            builder: AstBuilder::new(),
        }
    }

    fn too_deep() -> ParseError {
        ParseError::new("Expression nested too deeply")
    }

    /// Run a recursive rule one level deeper
    fn descend(&mut self, rule: fn(&mut Self) -> ParseResult<NodeId>) -> ParseResult<NodeId> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(Self::too_deep());
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    /// Reject nodes whose subtree is taller than the evaluators will walk
    fn bounded(&self, id: NodeId) -> ParseResult<NodeId> {
        if self.builder.height(id) > MAX_NESTING_DEPTH {
            return Err(Self::too_deep());
        }
        Ok(id)
    }

    pub fn parse(mut self) -> Result<Ast, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression"));
        }

        let root = self.expression()?;

        if let Some(token) = self.peek() {
            return Err(ParseError::new(format!(
                "Unexpected token '{}' at position {}",
                token.value, token.position
            )));
        }

        Ok(self.builder.finish(root))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> ParseResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::new("Unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    /// The next token as one of `allowed` binary operators
    fn peek_binary(&self, allowed: &[BinaryOperator]) -> Option<BinaryOperator> {
        let token = self.peek()?;
        if token.kind != TokenKind::Operator {
            return None;
        }
        BinaryOperator::from_symbol(&token.value).filter(|op| allowed.contains(op))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        match self.peek() {
            Some(token) if token.kind == kind => self.advance(),
            Some(token) => Err(ParseError::new(format!(
                "Expected '{}' at position {}, found '{}'",
                what, token.position, token.value
            ))),
            None => Err(ParseError::new(format!(
                "Expected '{}' but reached end of expression",
                what
            ))),
        }
    }

    fn expression(&mut self) -> ParseResult<NodeId> {
        let mut left = self.term()?;
        while let Some(op) = self.peek_binary(&[BinaryOperator::Add, BinaryOperator::Sub]) {
            self.pos += 1;
            let right = self.term()?;
            let node = self.builder.binary(op, left, right);
            left = self.bounded(node)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> ParseResult<NodeId> {
        let mut left = self.factor()?;
        while let Some(op) =
            self.peek_binary(&[BinaryOperator::Mul, BinaryOperator::Div, BinaryOperator::Mod])
        {
            self.pos += 1;
            let right = self.factor()?;
            let node = self.builder.binary(op, left, right);
            left = self.bounded(node)?;
        }
        Ok(left)
    }

    fn factor(&mut self) -> ParseResult<NodeId> {
        let base = self.unary()?;
        if self.peek_binary(&[BinaryOperator::Pow]).is_some() {
            self.pos += 1;
            let exponent = self.descend(Self::factor)?;
            let node = self.builder.binary(BinaryOperator::Pow, base, exponent);
            return self.bounded(node);
        }
        Ok(base)
    }

    fn unary(&mut self) -> ParseResult<NodeId> {
        let operator = match self.peek() {
            Some(t) if t.is_operator('-') => Some(UnaryOperator::Minus),
            Some(t) if t.is_operator('+') => Some(UnaryOperator::Plus),
            _ => None,
        };

        match operator {
            Some(operator) => {
                let token = self.advance()?;
                let operand = self.descend(Self::unary)?;
                let end = self.builder.position(operand).end;
                let node = self
                    .builder
                    .unary(operator, operand, Position::new(token.position, end));
                self.bounded(node)
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ParseResult<NodeId> {
        let mut node = self.primary()?;
        while self.peek().is_some_and(|t| t.is_operator('!')) {
            let bang = self.advance()?;
            let start = self.builder.position(node).start;
            let factorial = self
                .builder
                .unary(UnaryOperator::Factorial, node, Position::new(start, bang.end()));
            node = self.bounded(factorial)?;
        }
        Ok(node)
    }

    fn primary(&mut self) -> ParseResult<NodeId> {
        let token = self.advance()?;
        let span = Position::new(token.position, token.end());

        match token.kind {
            TokenKind::Number => {
                let value: f64 = token
                    .value
                    .parse()
                    .map_err(|_| ParseError::new(format!("Invalid number '{}'", token.value)))?;
                Ok(self.builder.number(value, token.value, span))
            }

            TokenKind::Constant => {
                let constant = Constant::from_name(&token.value)
                    .ok_or_else(|| ParseError::new(format!("Unknown constant '{}'", token.value)))?;
                Ok(self.builder.push(NodeKind::Constant(constant), span))
            }

            TokenKind::Variable => Ok(self.builder.push(NodeKind::Variable(token.value), span)),

            TokenKind::Function => self.function_call(token),

            TokenKind::LParen => {
                let inner = self.descend(Self::expression)?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(inner)
            }

            _ => Err(ParseError::new(format!(
                "Unexpected token '{}' at position {}",
                token.value, token.position
            ))),
        }
    }

    fn function_call(&mut self, name: Token) -> ParseResult<NodeId> {
        if self.peek().map(|t| t.kind) != Some(TokenKind::LParen) {
            return Err(ParseError::new(format!(
                "Expected '(' after function '{}'",
                name.value
            )));
        }
        self.pos += 1;

        let mut args = Vec::new();
        if self.peek().map(|t| t.kind) != Some(TokenKind::RParen) {
            args.push(self.descend(Self::expression)?);
            while self.peek().map(|t| t.kind) == Some(TokenKind::Comma) {
                self.pos += 1;
                args.push(self.descend(Self::expression)?);
            }
        }
        let close = self.expect(TokenKind::RParen, ")")?;

        let node = self.builder.push(
            NodeKind::FunctionCall {
                name: name.value,
                args,
            },
            Position::new(name.position, close.end()),
        );
        self.bounded(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_kind(expr: &str) -> NodeKind {
        parse(expr).unwrap().root_node().kind.clone()
    }

    fn assert_spans_nest(ast: &Ast, id: NodeId) {
        let parent = ast.node(id).position;
        for child in ast.children(id) {
            assert!(
                parent.contains(&ast.node(child).position),
                "{:?} does not contain {:?}",
                parent,
                ast.node(child).position
            );
            assert_spans_nest(ast, child);
        }
    }

    #[test]
    fn test_empty_expression() {
        assert_eq!(parse("").unwrap_err().message, "Empty expression");
        assert_eq!(parse("   ").unwrap_err().message, "Empty expression");
    }

    #[test]
    fn test_precedence() {
        let ast = parse("2+3*4").unwrap();
        match &ast.root_node().kind {
            NodeKind::BinaryOp { operator, right, .. } => {
                assert_eq!(*operator, BinaryOperator::Add);
                assert!(matches!(
                    ast.node(*right).kind,
                    NodeKind::BinaryOp { operator: BinaryOperator::Mul, .. }
                ));
            }
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_left_associativity() {
        let ast = parse("8-3-2").unwrap();
        match &ast.root_node().kind {
            NodeKind::BinaryOp { left, .. } => assert!(matches!(
                ast.node(*left).kind,
                NodeKind::BinaryOp { operator: BinaryOperator::Sub, .. }
            )),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_power_is_right_associative() {
        let ast = parse("2^3^2").unwrap();
        match &ast.root_node().kind {
            NodeKind::BinaryOp { left, right, .. } => {
                assert!(matches!(ast.node(*left).kind, NodeKind::Number { .. }));
                assert!(matches!(
                    ast.node(*right).kind,
                    NodeKind::BinaryOp { operator: BinaryOperator::Pow, .. }
                ));
            }
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_negative_base_binds_before_power() {
        let ast = parse("-2^2").unwrap();
        match &ast.root_node().kind {
            NodeKind::BinaryOp { operator, left, .. } => {
                assert_eq!(*operator, BinaryOperator::Pow);
                assert!(matches!(
                    ast.node(*left).kind,
                    NodeKind::UnaryOp { operator: UnaryOperator::Minus, .. }
                ));
            }
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_function_calls() {
        match root_kind("max(1, 2, 3)") {
            NodeKind::FunctionCall { name, args } => {
                assert_eq!(name, "max");
                assert_eq!(args.len(), 3);
            }
            other => panic!("unexpected root {:?}", other),
        }
        match root_kind("max()") {
            NodeKind::FunctionCall { args, .. } => assert!(args.is_empty()),
            other => panic!("unexpected root {:?}", other),
        }
        assert!(parse("sin 2").is_err());
    }

    #[test]
    fn test_postfix_factorial() {
        match root_kind("5!") {
            NodeKind::UnaryOp { operator, .. } => assert_eq!(operator, UnaryOperator::Factorial),
            other => panic!("unexpected root {:?}", other),
        }
        // Prefix minus applies to the factorial
        let ast = parse("-3!").unwrap();
        match &ast.root_node().kind {
            NodeKind::UnaryOp { operator, operand } => {
                assert_eq!(*operator, UnaryOperator::Minus);
                assert!(matches!(
                    ast.node(*operand).kind,
                    NodeKind::UnaryOp { operator: UnaryOperator::Factorial, .. }
                ));
            }
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_errors() {
        assert!(parse("2 +").is_err());
        assert!(parse("(2 + 3").is_err());
        assert!(parse("2 3").unwrap_err().message.contains("Unexpected token '3'"));
        assert!(parse("2 )").is_err());
        assert!(parse("*2").is_err());
        assert!(parse("max(1,)").is_err());
    }

    #[test]
    fn test_implicit_multiplication_parses() {
        match root_kind("2x") {
            NodeKind::BinaryOp { operator, .. } => assert_eq!(operator, BinaryOperator::Mul),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_spans_nest() {
        for expr in ["2 + 3 * 4", "-(1 + 2)^3", "sin(x) + max(1, 2 * y)", "(2+3)*4!", "2x(1+y)"] {
            let ast = parse(expr).unwrap();
            assert_spans_nest(&ast, ast.root());
        }
        let ast = parse("sin(x)").unwrap();
        assert_eq!(ast.root_node().position, Position::new(0, 6));
    }

    #[test]
    fn test_user_functions() {
        let ast = parse_with_functions("f(1, 2)", ["f"]).unwrap();
        assert!(matches!(ast.root_node().kind, NodeKind::FunctionCall { .. }));
    }

    #[test]
    fn test_number_raw_is_kept() {
        match root_kind("1.50e2") {
            NodeKind::Number { value, raw } => {
                assert_eq!(value, 150.0);
                assert_eq!(raw, "1.50e2");
            }
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}1{}", "(".repeat(n), ")".repeat(n));
        assert!(parse(&nested(MAX_NESTING_DEPTH - 1)).is_ok());
        assert_eq!(
            parse(&nested(20_000)).unwrap_err().message,
            "Expression nested too deeply"
        );
        assert!(parse(&format!("{}1", "-".repeat(20_000))).is_err());
        assert!(parse(&format!("2{}", "^2".repeat(20_000))).is_err());
        assert!(parse(&format!("{}1{}", "sin(".repeat(20_000), ")".repeat(20_000))).is_err());
    }

    #[test]
    fn test_long_flat_chains_are_bounded() {
        let chain = |n: usize| vec!["1"; n].join("+");
        assert!(parse(&chain(400)).is_ok());
        assert!(parse(&chain(100_000)).is_err());
        assert!(parse(&format!("3{}", "!".repeat(20_000))).is_err());
    }
}
