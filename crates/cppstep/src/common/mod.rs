//! Common infrastructure shared across the compiler and the simulator

mod error;
mod span;

pub use error::{InternalError, InternalResult};
pub use span::Span;
