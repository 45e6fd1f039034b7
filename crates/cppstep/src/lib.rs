//! cppstep - semantic compiler and steppable runtime for a C++ teaching subset
//!
//! The crate compiles a small single-inheritance subset of C++ the way a
//! teaching tool needs to: errors are first-class data attached to the
//! constructs that caused them, and execution is a simulation that advances
//! one visible step at a time instead of running to completion.
//!
//! ## Architecture
//!
//! - **Frontend** (`frontend/`): preprocessor, lexer, parser, raw syntax
//! - **Sema** (`sema/`): elaboration of syntax into typed constructs and
//!   entities; tolerant of language errors
//! - **Program** (`program/`): translation units and cross-unit linking
//! - **Runtime** (`runtime/`): simulated memory and the stepping engine
//! - **Library** (`library/`): bundled headers and their native bodies
//! - **Diagnostics** (`diagnostics/`): notes and terminal rendering
//! - **Common / Types** (`common/`, `types/`): spans, errors, the type system

pub mod common;
pub mod diagnostics;
pub mod frontend;
pub mod library;
pub mod program;
pub mod runtime;
pub mod sema;
pub mod types;

// Re-exports for convenience
pub use diagnostics::{Note, NoteKind, NoteRecorder, NoteReporter, Severity};
pub use frontend::source::SourceFile;
pub use program::Program;
pub use runtime::{SimEvent, Simulation, Status};
