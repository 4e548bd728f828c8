//! Core parser struct and helper methods.
//!
//! The parser pulls tokens from the scanner on demand and keeps exactly one
//! token of lookahead.

use crate::ast::{Node, NodeKind};
use crate::error::ParseError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, ParseError>;

/// The parser for Rill.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    pub(crate) current: Token,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            scanner: Scanner::new(source),
            current: Token::eof(0, 1, 1),
        }
    }

    /// Parse a complete program.
    pub fn parse(mut self) -> ParseResult<Node> {
        self.bump()?; // prime the lookahead
        let mut root = Node::new(NodeKind::Program, 1);
        while !self.check(&TokenKind::Eof) {
            root.children.push(self.statement()?);
        }
        Ok(root)
    }

    // ===== Token manipulation =====

    /// Consume the current token and pull the next one from the scanner.
    pub(crate) fn bump(&mut self) -> ParseResult<Token> {
        let next = match self.scanner.scan_token() {
            Ok(token) => token,
            Err(err) => {
                // Leave an Error token in the lookahead slot, then report.
                self.current = Token::new(TokenKind::Error, err.span());
                return Err(err.into());
            }
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    /// Consume the current token if it matches.
    pub(crate) fn eat(&mut self, kind: &TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            self.bump()
        } else {
            Err(ParseError::unexpected_token(
                format!("'{}'", kind),
                format!("{}", self.current.kind),
                self.current_span(),
            ))
        }
    }

    pub(crate) fn expect_ident(&mut self) -> ParseResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump()?;
                Ok(name)
            }
            _ => Err(ParseError::unexpected_token(
                "identifier",
                format!("{}", self.current.kind),
                self.current_span(),
            )),
        }
    }

    pub(crate) fn current_span(&self) -> Span {
        self.current.span
    }

    /// Source line of the current token, used to tag statement nodes.
    pub(crate) fn line(&self) -> usize {
        self.current.span.line
    }
}
