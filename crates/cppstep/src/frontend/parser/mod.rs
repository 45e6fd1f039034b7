//! Recursive-descent parser for the C++ subset

mod parser;

pub use parser::{Parser, SyntaxError, parse_translation_unit};
