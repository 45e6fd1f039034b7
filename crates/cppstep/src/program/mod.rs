//! Programs: compiled units plus linking

mod linker;
mod translation_unit;

pub use linker::Program;
pub use translation_unit::TranslationUnit;
