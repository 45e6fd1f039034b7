//! Source handling, preprocessing, lexing, and parsing

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod source;
