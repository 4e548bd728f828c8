//! Expression parsing: precedence climbing keyed on the `NodeKind`
//! ordinal table.
//!
//! `parse_expr(ceiling)` parses a term, then repeatedly consumes any
//! binary or postfix operator whose rank is strictly below the ceiling,
//! recursing on the right-hand side with that operator's own rank.
//! Subscript and call are special postfix forms that re-wrap the receiver;
//! the implicit `Load` read wrapper is suppressed exactly when the next
//! token shows the expression is an assignment or increment target.

use crate::ast::{Node, NodeKind};
use crate::error::ParseError;
use crate::lexer::TokenKind;
use crate::value::format_number;

use super::core::{ParseResult, Parser};

/// Wrap an addressable node in the implicit read wrapper.
fn load(node: Node) -> Node {
    let line = node.line;
    Node::new(NodeKind::Load, line).add(node)
}

/// Value-position view of a node: addressables get the read wrapper.
fn as_value(node: Node) -> Node {
    if node.kind.is_addressable() {
        load(node)
    } else {
        node
    }
}

/// Strip the read wrapper, for prefix increment/decrement targets.
fn as_target(node: Node) -> Node {
    if node.kind == NodeKind::Load {
        node.children.into_iter().next().unwrap()
    } else {
        node
    }
}

impl Parser<'_> {
    pub(crate) fn expression(&mut self) -> ParseResult<Node> {
        self.parse_expr(NodeKind::TOP_RANK)
    }

    pub(crate) fn parse_expr(&mut self, ceiling: u32) -> ParseResult<Node> {
        let mut node = self.parse_term()?;

        loop {
            let Some((kind, rank)) = self.peek_operator() else {
                break;
            };
            if rank >= ceiling {
                break;
            }
            let line = self.line();

            match kind {
                NodeKind::Index => {
                    self.bump()?;
                    let key = self.expression()?;
                    self.expect(&TokenKind::RightBracket)?;
                    node = Node::new(NodeKind::Index, line).add(as_value(node)).add(key);
                }
                NodeKind::Call => {
                    self.bump()?;
                    let mut call = Node::new(NodeKind::Call, line).add(as_value(node));
                    if !self.check(&TokenKind::RightParen) {
                        loop {
                            call.children.push(self.expression()?);
                            if !self.eat(&TokenKind::Comma)? {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RightParen)?;
                    node = call;
                }
                NodeKind::Member => {
                    self.bump()?;
                    let name = self.member_segment()?;
                    let mut member = Node::with_text(NodeKind::Member, name, line);
                    member.children.push(as_value(node));
                    node = member;
                }
                NodeKind::PostInc | NodeKind::PostDec => {
                    self.bump()?;
                    node = Node::new(kind, line).add(node);
                }
                NodeKind::Assign
                | NodeKind::AddAssign
                | NodeKind::SubAssign
                | NodeKind::MulAssign
                | NodeKind::DivAssign
                | NodeKind::ModAssign => {
                    self.bump()?;
                    // Assignment groups to the right: a = b = c.
                    let value = self.parse_expr(NodeKind::TOP_RANK)?;
                    node = Node::new(kind, line).add(node).add(value);
                }
                _ => {
                    self.bump()?;
                    let lhs = as_value(node);
                    let rhs = self.parse_expr(rank)?;
                    node = Node::new(kind, line).add(lhs).add(rhs);
                }
            }
        }

        if node.kind.is_addressable() && !self.peek_is_assignment_like() {
            node = load(node);
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> ParseResult<Node> {
        let line = self.line();
        match self.current.kind.clone() {
            TokenKind::Bang => {
                self.bump()?;
                let operand = self.parse_expr(NodeKind::Not.rank().unwrap())?;
                Ok(Node::new(NodeKind::Not, line).add(operand))
            }
            TokenKind::Minus => {
                self.bump()?;
                let operand = self.parse_expr(NodeKind::Neg.rank().unwrap())?;
                Ok(Node::new(NodeKind::Neg, line).add(operand))
            }
            TokenKind::PlusPlus => {
                self.bump()?;
                let target = as_target(self.parse_expr(NodeKind::PreInc.rank().unwrap())?);
                Ok(Node::new(NodeKind::PreInc, line).add(target))
            }
            TokenKind::MinusMinus => {
                self.bump()?;
                let target = as_target(self.parse_expr(NodeKind::PreDec.rank().unwrap())?);
                Ok(Node::new(NodeKind::PreDec, line).add(target))
            }
            TokenKind::This => {
                self.bump()?;
                Ok(Node::new(NodeKind::This, line))
            }
            TokenKind::Null => {
                self.bump()?;
                Ok(Node::new(NodeKind::Null, line))
            }
            TokenKind::Number(n) => {
                self.bump()?;
                Ok(Node::with_text(NodeKind::NumLit, format_number(n), line))
            }
            TokenKind::Str(s) => {
                self.bump()?;
                Ok(Node::with_text(NodeKind::StrLit, s, line))
            }
            TokenKind::Ident(name) => {
                self.bump()?;
                Ok(Node::with_text(NodeKind::Ident, name, line))
            }
            TokenKind::LeftParen => {
                self.bump()?;
                let inner = self.expression()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(inner)
            }
            TokenKind::LeftBracket => self.array_literal(),
            TokenKind::LeftBrace => self.hash_literal(),
            TokenKind::Sub => {
                self.bump()?;
                self.sub_tail(line)
            }
            TokenKind::Spawn => {
                self.bump()?;
                let target = self.parse_expr(NodeKind::Assign.rank().unwrap())?;
                Ok(Node::new(NodeKind::Spawn, line).add(target))
            }
            other => Err(ParseError::unexpected_token(
                "expression",
                format!("{}", other),
                self.current_span(),
            )),
        }
    }

    /// `[e, e, ...]`
    fn array_literal(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.expect(&TokenKind::LeftBracket)?;
        let mut node = Node::new(NodeKind::ArrayLit, line);
        if !self.check(&TokenKind::RightBracket) {
            loop {
                node.children.push(self.expression()?);
                if !self.eat(&TokenKind::Comma)? || self.check(&TokenKind::RightBracket) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightBracket)?;
        Ok(node)
    }

    /// `{k: v, ...}`; bare identifier keys read as string-literal keys.
    fn hash_literal(&mut self) -> ParseResult<Node> {
        let line = self.line();
        self.expect(&TokenKind::LeftBrace)?;
        let mut node = Node::new(NodeKind::HashLit, line);
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let key_line = self.line();
                let key = match self.current.kind.clone() {
                    TokenKind::Ident(name) => {
                        self.bump()?;
                        Node::with_text(NodeKind::StrLit, name, key_line)
                    }
                    TokenKind::Str(s) => {
                        self.bump()?;
                        Node::with_text(NodeKind::StrLit, s, key_line)
                    }
                    TokenKind::Number(n) => {
                        self.bump()?;
                        Node::with_text(NodeKind::StrLit, format_number(n), key_line)
                    }
                    other => {
                        return Err(ParseError::unexpected_token(
                            "hash key",
                            format!("{}", other),
                            self.current_span(),
                        ));
                    }
                };
                self.expect(&TokenKind::Colon)?;
                let value = self.expression()?;
                node.children.push(key);
                node.children.push(value);
                if !self.eat(&TokenKind::Comma)? || self.check(&TokenKind::RightBrace) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(node)
    }

    /// The parameter list and body of a subroutine, after `sub` (and any
    /// name) has been consumed.
    pub(crate) fn sub_tail(&mut self, line: usize) -> ParseResult<Node> {
        let mut node = Node::new(NodeKind::SubLit, line);
        if self.eat(&TokenKind::LeftParen)? {
            if !self.check(&TokenKind::RightParen) {
                loop {
                    node.names.push(self.expect_ident()?);
                    if !self.eat(&TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RightParen)?;
        }
        let body = self.block()?;
        node.children.push(body);
        Ok(node)
    }

    /// A member-path segment must be a bare identifier.
    pub(crate) fn member_segment(&mut self) -> ParseResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump()?;
                Ok(name)
            }
            _ => Err(ParseError::bad_member_path(self.current_span())),
        }
    }

    fn peek_is_assignment_like(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
                | TokenKind::PercentAssign
                | TokenKind::PlusPlus
                | TokenKind::MinusMinus
        )
    }

    /// The binary/postfix operator the current token starts, if any,
    /// together with its precedence rank.
    fn peek_operator(&self) -> Option<(NodeKind, u32)> {
        let kind = match self.current.kind {
            TokenKind::Dot => NodeKind::Member,
            TokenKind::LeftBracket => NodeKind::Index,
            // Call binds like subscript.
            TokenKind::LeftParen => return Some((NodeKind::Call, NodeKind::Index.rank().unwrap())),
            TokenKind::PlusPlus => NodeKind::PostInc,
            TokenKind::MinusMinus => NodeKind::PostDec,
            TokenKind::Star => NodeKind::Mul,
            TokenKind::Slash => NodeKind::Div,
            TokenKind::Percent => NodeKind::Mod,
            TokenKind::Plus => NodeKind::Add,
            TokenKind::Minus => NodeKind::Sub,
            TokenKind::Less => NodeKind::Lt,
            TokenKind::LessEq => NodeKind::Le,
            TokenKind::Greater => NodeKind::Gt,
            TokenKind::GreaterEq => NodeKind::Ge,
            TokenKind::EqEq => NodeKind::Eq,
            TokenKind::BangEq => NodeKind::Ne,
            TokenKind::AndAnd => NodeKind::And,
            TokenKind::OrOr => NodeKind::Or,
            TokenKind::Assign => NodeKind::Assign,
            TokenKind::PlusAssign => NodeKind::AddAssign,
            TokenKind::MinusAssign => NodeKind::SubAssign,
            TokenKind::StarAssign => NodeKind::MulAssign,
            TokenKind::SlashAssign => NodeKind::DivAssign,
            TokenKind::PercentAssign => NodeKind::ModAssign,
            _ => return None,
        };
        Some((kind, kind.rank().unwrap()))
    }
}
