//! Terminal note rendering via codespan

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use std::collections::HashMap;

use super::{Note, NoteKind, Severity};
use crate::frontend::source::SourceSet;

/// Renders notes against the original source files.
///
/// Note refs point into the files the user wrote (never into preprocessed
/// text), so the reporter only needs the raw [`SourceSet`].
pub struct NoteReporter {
    files: SimpleFiles<String, String>,
    ids: HashMap<String, usize>,
    writer: StandardStream,
    config: term::Config,
}

impl NoteReporter {
    pub fn new() -> Self {
        Self {
            files: SimpleFiles::new(),
            ids: HashMap::new(),
            writer: StandardStream::stderr(ColorChoice::Auto),
            config: term::Config::default(),
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        let id = self.files.add(name.clone(), source.into());
        self.ids.insert(name, id);
    }

    pub fn add_sources(&mut self, sources: &SourceSet) {
        for file in sources.files() {
            self.add_file(file.name.clone(), file.text.clone());
        }
    }

    pub fn report(&self, note: &Note) {
        let mut diagnostic = match note.severity {
            Severity::Error => Diagnostic::error(),
            Severity::Warning => Diagnostic::warning(),
            Severity::Style | Severity::Other => Diagnostic::note(),
        };

        let heading = match note.kind {
            NoteKind::Preprocessor => "Preprocessor",
            NoteKind::Syntax => "Syntax",
            NoteKind::Compiler => "Compile",
            NoteKind::Linker => "Link",
        };
        diagnostic = diagnostic
            .with_message(note.message.clone())
            .with_code(format!("{heading}: {}", note.id));

        let mut labels = Vec::new();
        let mut extra = Vec::new();
        for (i, sref) in note.refs.iter().enumerate() {
            if let Some(&file_id) = self.ids.get(&sref.file) {
                let label = if i == 0 {
                    Label::primary(file_id, sref.span.start..sref.span.end)
                } else {
                    Label::secondary(file_id, sref.span.start..sref.span.end)
                };
                labels.push(label);
            }
            for frame in &sref.includes {
                extra.push(format!("included from {}:{}", frame.file, frame.line));
            }
        }
        diagnostic = diagnostic.with_labels(labels);
        if !extra.is_empty() {
            diagnostic = diagnostic.with_notes(extra);
        }

        let _ = term::emit(&mut self.writer.lock(), &self.config, &self.files, &diagnostic);
    }

    pub fn report_all<'a>(&self, notes: impl IntoIterator<Item = &'a Note>) {
        for note in notes {
            self.report(note);
        }
    }
}

impl Default for NoteReporter {
    fn default() -> Self {
        Self::new()
    }
}
