//! One independently compiled translation unit

use crate::diagnostics::NoteRecorder;
use crate::sema::{ConstructId, EntityId, ScopeId};

/// The result of elaborating one unit. Constructs, entities, and scopes live
/// in the program's shared arenas; the unit keeps only its roots and its
/// notes. A unit that failed to parse has no roots and a recorder holding
/// the one syntax note.
#[derive(Debug)]
pub struct TranslationUnit {
    pub name: String,
    /// Top-level constructs in source order
    pub top_level: Vec<ConstructId>,
    pub global_scope: ScopeId,
    pub recorder: NoteRecorder,
    /// Global objects this unit declares, for link folding
    pub global_objects: Vec<EntityId>,
    /// Free functions (definitions and prototypes) this unit declares
    pub functions: Vec<EntityId>,
    /// Classes this unit defines
    pub classes: Vec<EntityId>,
    /// Files textually included while preprocessing this unit
    pub included_files: Vec<String>,
}

impl TranslationUnit {
    pub fn parse_failed(&self) -> bool {
        self.recorder.has_syntax_errors()
    }
}
