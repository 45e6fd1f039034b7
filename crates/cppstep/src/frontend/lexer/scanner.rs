//! Lexer implementation using logos

use super::token::{Token, TokenKind};
use crate::common::Span;
use logos::Logos;

/// A lexical error: an unrecognized character sequence. Reported by the
/// parser as a syntax note on the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub type LexResult<T> = Result<T, LexError>;

/// Lexer for subset-C++ source code
pub struct Lexer<'a> {
    inner: logos::Lexer<'a, TokenKind>,
    peeked: Option<Token>,
    at_eof: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given (preprocessed) source text
    pub fn new(source: &'a str) -> Self {
        Self {
            inner: TokenKind::lexer(source),
            peeked: None,
            at_eof: false,
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> LexResult<Token> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }

        if self.at_eof {
            let len = self.inner.source().len();
            return Ok(Token::new(TokenKind::Eof, Span::new(len, len)));
        }

        match self.inner.next() {
            Some(Ok(kind)) => {
                let span = self.inner.span();
                Ok(Token::new(kind, Span::new(span.start, span.end)))
            }
            Some(Err(())) => {
                let span = self.inner.span();
                Err(LexError {
                    message: format!("unexpected character '{}'", self.inner.slice()),
                    span: Span::new(span.start, span.end),
                })
            }
            None => {
                self.at_eof = true;
                let len = self.inner.source().len();
                Ok(Token::new(TokenKind::Eof, Span::new(len, len)))
            }
        }
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> LexResult<&Token> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_token()?);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    /// Check if the next token matches the expected kind (by discriminant)
    pub fn check(&mut self, expected: &TokenKind) -> LexResult<bool> {
        Ok(std::mem::discriminant(&self.peek()?.kind) == std::mem::discriminant(expected))
    }

    /// Consume the next token if it matches, return true if consumed
    pub fn match_token(&mut self, expected: &TokenKind) -> LexResult<bool> {
        if self.check(expected)? {
            self.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Get the source being lexed
    pub fn source(&self) -> &'a str {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_and_identifiers() {
        let mut lexer = Lexer::new("int void class x1");
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Int));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Void));
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Class));
        assert!(
            matches!(lexer.next_token().unwrap().kind, TokenKind::Identifier(name) if name == "x1")
        );
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Eof));
    }

    #[test]
    fn test_literals() {
        let mut lexer = Lexer::new(r#"42 3.5 'a' '\n' "hi\n""#);
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::IntLiteral(42)
        ));
        assert!(
            matches!(lexer.next_token().unwrap().kind, TokenKind::DoubleLiteral(v) if (v - 3.5).abs() < 1e-9)
        );
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::CharLiteral('a')
        ));
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::CharLiteral('\n')
        ));
        assert!(
            matches!(lexer.next_token().unwrap().kind, TokenKind::StringLiteral(s) if s == "hi\n")
        );
    }

    #[test]
    fn test_stream_operators() {
        let mut lexer = Lexer::new("cout << x >> y");
        lexer.next_token().unwrap();
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Shl));
        lexer.next_token().unwrap();
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Shr));
    }

    #[test]
    fn test_opaque_marker() {
        let mut lexer = Lexer::new("@ostream_insert_int;");
        assert!(
            matches!(lexer.next_token().unwrap().kind, TokenKind::OpaqueMarker(m) if m == "ostream_insert_int")
        );
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::Semicolon
        ));
    }

    #[test]
    fn test_unexpected_character_is_error() {
        let mut lexer = Lexer::new("int $x;");
        lexer.next_token().unwrap();
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_comments_skipped() {
        let mut lexer = Lexer::new("// line\nint /* block */ x;");
        assert!(matches!(lexer.next_token().unwrap().kind, TokenKind::Int));
        assert!(matches!(
            lexer.next_token().unwrap().kind,
            TokenKind::Identifier(_)
        ));
    }
}
