//! AST construction: recursive-descent parser and post-parse tree
//! optimization.
//!
//! AST nodes carry their originating token and ordered children; the
//! token kind discriminates the node (a call node carries the `(`
//! token, a subscript node the `[`, a member access the `.`). The
//! optimization pass folds literal tokens into cached values, hoists a
//! cached value through single-child `return`/compound nodes, and
//! pre-resolves call-position identifiers to function signatures —
//! unknown names fail fast unless the name is a known zero-generation
//! function that resolves late.

use std::rc::Rc;

use crate::error::{ErrorKind, ScriptError, ScriptResult};
use crate::functions::{BuiltinFunction, FunctionRegistry};
use crate::token::{self, Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct AstNode {
    pub token: Token,
    pub children: Vec<AstNode>,
    /// Filled by optimization for literal (and literal-forwarding)
    /// nodes; treated as immutable once the pass has run.
    pub cached_value: Option<Value>,
    /// Pre-resolved callee for call nodes with a statically known name.
    pub cached_function: Option<Rc<BuiltinFunction>>,
}

impl AstNode {
    fn new(token: Token, children: Vec<AstNode>) -> Self {
        Self {
            token,
            children,
            cached_value: None,
            cached_function: None,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.token.kind
    }

    pub fn position(&self) -> usize {
        self.token.pos
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind) -> ScriptResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let t = self.peek();
        ScriptError::at(
            ErrorKind::Parse,
            format!("unexpected {}; expected {expected}", t.kind.describe()),
            t.pos,
        )
    }

    /// Parse a full interpreter block: statements up to end of input.
    /// The returned root is a synthetic compound node.
    pub fn parse_interpreter_block(&mut self) -> ScriptResult<AstNode> {
        let root_token = Token::new(TokenKind::LBrace, "", self.peek().pos);
        let mut statements = Vec::new();
        while self.peek_kind() != TokenKind::Eof {
            statements.push(self.statement()?);
        }
        Ok(AstNode::new(root_token, statements))
    }

    // -- statements -----------------------------------------------------

    fn statement(&mut self) -> ScriptResult<AstNode> {
        match self.peek_kind() {
            TokenKind::LBrace => self.compound_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::Do => self.do_while_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Next => {
                let tok = self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(AstNode::new(tok, Vec::new()))
            }
            TokenKind::Break => {
                let tok = self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(AstNode::new(tok, Vec::new()))
            }
            TokenKind::Return => {
                let tok = self.advance();
                let mut children = Vec::new();
                if self.peek_kind() != TokenKind::Semicolon {
                    children.push(self.expression()?);
                }
                self.expect(TokenKind::Semicolon)?;
                Ok(AstNode::new(tok, children))
            }
            TokenKind::Semicolon => {
                let tok = self.advance();
                Ok(AstNode::new(tok, Vec::new()))
            }
            _ => {
                let expr = self.expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(expr)
            }
        }
    }

    fn compound_statement(&mut self) -> ScriptResult<AstNode> {
        let open = self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while self.peek_kind() != TokenKind::RBrace {
            if self.peek_kind() == TokenKind::Eof {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(AstNode::new(open, statements))
    }

    fn if_statement(&mut self) -> ScriptResult<AstNode> {
        let tok = self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.statement()?;
        let mut children = vec![condition, then_branch];
        if self.peek_kind() == TokenKind::Else {
            self.advance();
            children.push(self.statement()?);
        }
        Ok(AstNode::new(tok, children))
    }

    fn do_while_statement(&mut self) -> ScriptResult<AstNode> {
        let tok = self.expect(TokenKind::Do)?;
        let body = self.statement()?;
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.expression()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(AstNode::new(tok, vec![body, condition]))
    }

    fn while_statement(&mut self) -> ScriptResult<AstNode> {
        let tok = self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.statement()?;
        Ok(AstNode::new(tok, vec![condition, body]))
    }

    fn for_statement(&mut self) -> ScriptResult<AstNode> {
        let tok = self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        let ident = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::In)?;
        let range = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.statement()?;
        Ok(AstNode::new(
            tok,
            vec![AstNode::new(ident, Vec::new()), range, body],
        ))
    }

    // -- expressions, lowest to highest precedence ----------------------

    pub fn expression(&mut self) -> ScriptResult<AstNode> {
        self.assignment()
    }

    fn assignment(&mut self) -> ScriptResult<AstNode> {
        let lhs = self.logical_or()?;
        if self.peek_kind() == TokenKind::Assign {
            let tok = self.advance();
            // right-associative
            let rhs = self.assignment()?;
            return Ok(AstNode::new(tok, vec![lhs, rhs]));
        }
        Ok(lhs)
    }

    fn logical_or(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.logical_and()?;
        while self.peek_kind() == TokenKind::Or {
            let tok = self.advance();
            let rhs = self.logical_and()?;
            node = AstNode::new(tok, vec![node, rhs]);
        }
        Ok(node)
    }

    fn logical_and(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.comparison()?;
        while self.peek_kind() == TokenKind::And {
            let tok = self.advance();
            let rhs = self.comparison()?;
            node = AstNode::new(tok, vec![node, rhs]);
        }
        Ok(node)
    }

    fn comparison(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.range_expr()?;
        while matches!(
            self.peek_kind(),
            TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::LtEq
                | TokenKind::Gt
                | TokenKind::GtEq
        ) {
            let tok = self.advance();
            let rhs = self.range_expr()?;
            node = AstNode::new(tok, vec![node, rhs]);
        }
        Ok(node)
    }

    fn range_expr(&mut self) -> ScriptResult<AstNode> {
        let lhs = self.additive()?;
        if self.peek_kind() == TokenKind::Colon {
            let tok = self.advance();
            let rhs = self.additive()?;
            return Ok(AstNode::new(tok, vec![lhs, rhs]));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.multiplicative()?;
        while matches!(self.peek_kind(), TokenKind::Plus | TokenKind::Minus) {
            let tok = self.advance();
            let rhs = self.multiplicative()?;
            node = AstNode::new(tok, vec![node, rhs]);
        }
        Ok(node)
    }

    fn multiplicative(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.exponent()?;
        while matches!(
            self.peek_kind(),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent
        ) {
            let tok = self.advance();
            let rhs = self.exponent()?;
            node = AstNode::new(tok, vec![node, rhs]);
        }
        Ok(node)
    }

    fn exponent(&mut self) -> ScriptResult<AstNode> {
        let base = self.unary()?;
        if self.peek_kind() == TokenKind::Caret {
            let tok = self.advance();
            // right-associative
            let exp = self.exponent()?;
            return Ok(AstNode::new(tok, vec![base, exp]));
        }
        Ok(base)
    }

    fn unary(&mut self) -> ScriptResult<AstNode> {
        if matches!(
            self.peek_kind(),
            TokenKind::Plus | TokenKind::Minus | TokenKind::Not
        ) {
            let tok = self.advance();
            let operand = self.unary()?;
            return Ok(AstNode::new(tok, vec![operand]));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> ScriptResult<AstNode> {
        let mut node = self.primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let tok = self.advance();
                    let mut children = vec![node];
                    if self.peek_kind() != TokenKind::RParen {
                        children.push(self.expression()?);
                        while self.peek_kind() == TokenKind::Comma {
                            self.advance();
                            children.push(self.expression()?);
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    node = AstNode::new(tok, children);
                }
                TokenKind::LBracket => {
                    let tok = self.advance();
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket)?;
                    node = AstNode::new(tok, vec![node, index]);
                }
                TokenKind::Dot => {
                    let tok = self.advance();
                    let member = self.expect(TokenKind::Identifier)?;
                    node = AstNode::new(tok, vec![node, AstNode::new(member, Vec::new())]);
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn primary(&mut self) -> ScriptResult<AstNode> {
        match self.peek_kind() {
            TokenKind::Identifier
            | TokenKind::IntLiteral
            | TokenKind::FloatLiteral
            | TokenKind::StringLiteral => {
                let tok = self.advance();
                Ok(AstNode::new(tok, Vec::new()))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

/// Tokenize and parse a source string into an interpreter block.
pub fn parse_string(source: &str) -> ScriptResult<AstNode> {
    let tokens = token::tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse_interpreter_block()
}

/// Tokenize, parse, and run the optimization pass.
pub fn parse_and_optimize(source: &str, registry: &FunctionRegistry) -> ScriptResult<AstNode> {
    let mut root = parse_string(source)?;
    optimize(&mut root, registry)?;
    Ok(root)
}

/// The post-parse optimization pass. Runs once; the caches it writes
/// are read-only afterwards.
pub fn optimize(node: &mut AstNode, registry: &FunctionRegistry) -> ScriptResult<()> {
    for child in &mut node.children {
        optimize(child, registry)?;
    }

    match node.kind() {
        TokenKind::IntLiteral => {
            let v = token::int_literal_value(&node.token.text).ok_or_else(|| {
                ScriptError::at(
                    ErrorKind::Tokenize,
                    format!("integer literal '{}' out of range", node.token.text),
                    node.position(),
                )
            })?;
            node.cached_value = Some(Value::int(v));
        }
        TokenKind::FloatLiteral => {
            node.cached_value = Some(Value::float(token::float_literal_value(&node.token.text)));
        }
        TokenKind::StringLiteral => {
            node.cached_value = Some(Value::string(node.token.text.clone()));
        }
        TokenKind::Return | TokenKind::LBrace => {
            // a single cached child makes the whole statement constant
            if node.children.len() == 1 {
                node.cached_value = node.children[0].cached_value.clone();
            }
        }
        TokenKind::LParen => {
            // call node: pre-resolve a statically named callee
            if let Some(callee) = node.children.first() {
                if callee.kind() == TokenKind::Identifier {
                    let name = callee.token.text.as_str();
                    match registry.lookup(name) {
                        Some(f) => node.cached_function = Some(f),
                        None if registry.is_zero_generation_name(name) => {}
                        None => {
                            return Err(ScriptError::at(
                                ErrorKind::Name,
                                format!("unrecognized function name {name}"),
                                callee.position(),
                            ));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_tree() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let root = parse_string("1 + 2 * 3;").unwrap();
        let plus = &root.children[0];
        assert_eq!(plus.kind(), TokenKind::Plus);
        assert_eq!(plus.children[1].kind(), TokenKind::Star);
    }

    #[test]
    fn test_unary_binds_tighter_than_exponent() {
        // -2^2 parses as (-2)^2
        let root = parse_string("-2^2;").unwrap();
        let caret = &root.children[0];
        assert_eq!(caret.kind(), TokenKind::Caret);
        assert_eq!(caret.children[0].kind(), TokenKind::Minus);
    }

    #[test]
    fn test_exponent_right_associative() {
        // 2^3^2 parses as 2^(3^2)
        let root = parse_string("2^3^2;").unwrap();
        let outer = &root.children[0];
        assert_eq!(outer.kind(), TokenKind::Caret);
        assert_eq!(outer.children[1].kind(), TokenKind::Caret);
    }

    #[test]
    fn test_assignment_right_associative() {
        let root = parse_string("a = b = 1;").unwrap();
        let outer = &root.children[0];
        assert_eq!(outer.kind(), TokenKind::Assign);
        assert_eq!(outer.children[1].kind(), TokenKind::Assign);
    }

    #[test]
    fn test_range_precedence() {
        // 1:3 + 1 parses as 1:(3 + 1): additive binds tighter than range
        let root = parse_string("1:3 + 1;").unwrap();
        let colon = &root.children[0];
        assert_eq!(colon.kind(), TokenKind::Colon);
        assert_eq!(colon.children[1].kind(), TokenKind::Plus);
    }

    #[test]
    fn test_postfix_chain() {
        let root = parse_string("x[0].prop;").unwrap();
        let dot = &root.children[0];
        assert_eq!(dot.kind(), TokenKind::Dot);
        assert_eq!(dot.children[0].kind(), TokenKind::LBracket);
    }

    #[test]
    fn test_statement_forms() {
        let src = "if (x) 1; else 2; do x = x + 1; while (x < 3); while (T) break; for (i in 1:3) next; ;";
        let root = parse_string(src).unwrap();
        let kinds: Vec<TokenKind> = root.children.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::If,
                TokenKind::Do,
                TokenKind::While,
                TokenKind::For,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_string("x = 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.message.contains("expected ';'"));
    }

    #[test]
    fn test_missing_paren_position() {
        let err = parse_string("if (x 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.position, Some(6));
    }

    #[test]
    fn test_unterminated_compound() {
        let err = parse_string("{ x = 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_optimize_folds_literals() {
        let registry = FunctionRegistry::standard();
        let root = parse_and_optimize("42; 1.5; 'hi';", &registry).unwrap();
        assert_eq!(root.children[0].cached_value, Some(Value::int(42)));
        assert_eq!(root.children[1].cached_value, Some(Value::float(1.5)));
        assert_eq!(root.children[2].cached_value, Some(Value::string("hi")));
    }

    #[test]
    fn test_optimize_hoists_through_return() {
        let registry = FunctionRegistry::standard();
        let root = parse_and_optimize("{ return 7; }", &registry).unwrap();
        let compound = &root.children[0];
        assert_eq!(compound.children[0].cached_value, Some(Value::int(7)));
        assert_eq!(compound.children[0].cached_value, compound.cached_value);
    }

    #[test]
    fn test_optimize_resolves_functions() {
        let registry = FunctionRegistry::standard();
        let root = parse_and_optimize("sum(1:10);", &registry).unwrap();
        let call = &root.children[0];
        assert!(call.cached_function.is_some());
    }

    #[test]
    fn test_unknown_function_fails_fast() {
        let registry = FunctionRegistry::standard();
        let err = parse_and_optimize("noSuchFunction(1);", &registry).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.position, Some(0));
    }

    #[test]
    fn test_zero_generation_name_resolves_late() {
        let registry = FunctionRegistry::standard();
        // not in the registry, but a known zero-generation name
        let root = parse_and_optimize("initializeMutationRate(1e-7);", &registry).unwrap();
        assert!(root.children[0].cached_function.is_none());
    }

    #[test]
    fn test_method_call_callee_not_resolved() {
        let registry = FunctionRegistry::standard();
        // the callee is a member expression, not a bare name
        let root = parse_and_optimize("x.foo(1);", &registry).unwrap();
        assert!(root.children[0].cached_function.is_none());
    }
}
