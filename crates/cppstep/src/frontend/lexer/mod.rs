//! Lexer for the C++ subset

mod scanner;
mod token;

pub use scanner::{LexError, LexResult, Lexer};
pub use token::{Token, TokenKind};
