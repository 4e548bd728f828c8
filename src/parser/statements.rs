//! Statement parsing.

use crate::ast::{Node, NodeKind};
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser<'_> {
    pub(crate) fn statement(&mut self) -> ParseResult<Node> {
        match self.current.kind {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Foreach => self.foreach_statement(),
            TokenKind::Var => self.var_statement(),
            TokenKind::Sub => self.sub_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::LeftBrace => self.block(),
            TokenKind::Semicolon => {
                let line = self.line();
                self.bump()?;
                Ok(Node::new(NodeKind::NoOp, line))
            }
            _ => self.expression_statement(),
        }
    }

    fn if_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        let mut node = Node::new(NodeKind::If, line)
            .add(condition)
            .add(self.statement()?);
        if self.eat(&TokenKind::Else)? {
            node.children.push(self.statement()?);
        }
        Ok(node)
    }

    fn while_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.statement()?;
        Ok(Node::new(NodeKind::While, line).add(condition).add(body))
    }

    /// `foreach (k, v in e) stmt` binds the key/value pair per iteration;
    /// `foreach (v in e) stmt` binds the value only.
    fn foreach_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        self.expect(&TokenKind::LeftParen)?;
        let mut node = Node::new(NodeKind::Foreach, line);
        node.names.push(self.expect_ident()?);
        if self.eat(&TokenKind::Comma)? {
            node.names.push(self.expect_ident()?);
        }
        self.expect(&TokenKind::In)?;
        let container = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.statement()?;
        node.children.push(container);
        node.children.push(body);
        Ok(node)
    }

    /// `var a, b, c;` or `var a, b = e;`. The initializer is evaluated
    /// once and bound to every declared name; names without one default
    /// to null.
    fn var_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        let mut node = Node::new(NodeKind::VarDecl, line);
        loop {
            node.names.push(self.expect_ident()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        if self.eat(&TokenKind::Assign)? {
            node.children.push(self.expression()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(node)
    }

    /// `sub name(a, b) { ... }`. The name may be a dotted path, each
    /// segment after the first a bare identifier. A `sub` not followed by
    /// a name is an inline subroutine literal in statement position.
    fn sub_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        if !matches!(self.current.kind, TokenKind::Ident(_)) {
            let literal = self.sub_tail(line)?;
            self.expect(&TokenKind::Semicolon)?;
            return Ok(Node::new(NodeKind::ExprStmt, line).add(literal));
        }

        let mut path = self.expect_ident()?;
        while self.eat(&TokenKind::Dot)? {
            path.push('.');
            path.push_str(&self.member_segment()?);
        }
        let tail = self.sub_tail(line)?;
        let mut node = Node::with_text(NodeKind::SubDef, path, line);
        node.names = tail.names;
        node.children = tail.children;
        Ok(node)
    }

    fn return_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.bump()?;
        let mut node = Node::new(NodeKind::Return, line);
        if !self.check(&TokenKind::Semicolon) {
            node.children.push(self.expression()?);
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(node)
    }

    pub(crate) fn block(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.expect(&TokenKind::LeftBrace)?;
        let mut node = Node::new(NodeKind::Block, line);
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            node.children.push(self.statement()?);
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(node)
    }

    fn expression_statement(&mut self) -> ParseResult<Node> {
        let line = self.line();
        let expr = self.expression()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Node::new(NodeKind::ExprStmt, line).add(expr))
    }
}
