//! Notes: severity-tagged diagnostics keyed to source spans
//!
//! Everything the compiler, linker, and preprocessor have to say to the user
//! flows through [`Note`]s collected in [`NoteRecorder`]s. Notes are recorded
//! at the construct that detects the problem and aggregated upward by copying
//! into the unit recorder and then the program recorder. They are never used
//! as control flow.

mod reporter;

pub use reporter::NoteReporter;

use crate::frontend::source::SourceRef;

/// Which phase produced a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Preprocessor,
    Syntax,
    Compiler,
    Linker,
}

/// Shared severity axis across all note kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Style,
    Other,
}

/// One diagnostic: kind, severity, a stable dotted id, a human-readable
/// message, and the source span(s) it concerns.
#[derive(Debug, Clone)]
pub struct Note {
    pub kind: NoteKind,
    pub severity: Severity,
    pub id: String,
    pub message: String,
    pub refs: Vec<SourceRef>,
}

impl Note {
    pub fn new(
        kind: NoteKind,
        severity: Severity,
        id: impl Into<String>,
        message: impl Into<String>,
        refs: Vec<SourceRef>,
    ) -> Self {
        Self {
            kind,
            severity,
            id: id.into(),
            message: message.into(),
            refs,
        }
    }

    pub fn error(
        kind: NoteKind,
        id: impl Into<String>,
        message: impl Into<String>,
        sref: SourceRef,
    ) -> Self {
        Self::new(kind, Severity::Error, id, message, vec![sref])
    }

    pub fn warning(
        kind: NoteKind,
        id: impl Into<String>,
        message: impl Into<String>,
        sref: SourceRef,
    ) -> Self {
        Self::new(kind, Severity::Warning, id, message, vec![sref])
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Accumulates notes in the order they were produced.
///
/// One recorder per translation unit; the program recorder receives copies of
/// every unit note, so ordering within a unit is stable and cross-unit
/// ordering follows unit processing order.
#[derive(Debug, Default)]
pub struct NoteRecorder {
    notes: Vec<Note>,
    syntax_errors: usize,
    errors: usize,
    warnings: usize,
}

impl NoteRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, note: Note) {
        if note.is_error() {
            self.errors += 1;
            if note.kind == NoteKind::Syntax {
                self.syntax_errors += 1;
            }
        } else if note.severity == Severity::Warning {
            self.warnings += 1;
        }
        self.notes.push(note);
    }

    /// Copy all notes from another recorder (aggregation is by copying,
    /// never by shared mutable state).
    pub fn add_all(&mut self, other: &NoteRecorder) {
        for note in &other.notes {
            self.add(note.clone());
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn has_syntax_errors(&self) -> bool {
        self.syntax_errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// Notes of a single kind, in recording order
    pub fn notes_of_kind(&self, kind: NoteKind) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.kind == kind)
    }

    /// Notes whose id matches exactly
    pub fn notes_with_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Note> {
        self.notes.iter().filter(move |n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sref() -> SourceRef {
        SourceRef::new("main.cpp", 1, 0, 3)
    }

    #[test]
    fn test_recorder_partitions() {
        let mut rec = NoteRecorder::new();
        rec.add(Note::error(NoteKind::Syntax, "syntax", "bad token", sref()));
        rec.add(Note::warning(
            NoteKind::Compiler,
            "declaration.init.uninitialized",
            "x is not initialized",
            sref(),
        ));
        assert!(rec.has_syntax_errors());
        assert!(rec.has_errors());
        assert_eq!(rec.error_count(), 1);
        assert_eq!(rec.warning_count(), 1);
    }

    #[test]
    fn test_aggregation_copies() {
        let mut unit = NoteRecorder::new();
        unit.add(Note::error(
            NoteKind::Compiler,
            "declaration.void_prohibited",
            "void variable",
            sref(),
        ));
        let mut program = NoteRecorder::new();
        program.add_all(&unit);
        assert_eq!(program.error_count(), 1);
        assert!(!program.has_syntax_errors());
        // The unit recorder is untouched by later program-level notes.
        program.add(Note::error(NoteKind::Linker, "link.def_not_found", "no def", sref()));
        assert_eq!(unit.notes().len(), 1);
    }
}
