//! Source files, preprocessed text, and span mapping
//!
//! A [`PreprocessedSource`] is the text a translation unit is actually lexed
//! from: the primary file with every `#include` expanded in place. Because
//! constructs and notes carry spans into that expanded text, the segment map
//! built during expansion lets any preprocessed span be mapped back to a
//! [`SourceRef`] in the file the user wrote, with the inclusion chain
//! preserved.

use std::collections::HashMap;

use crate::common::Span;

/// A named, immutable source text. Changing a file means building a new
/// `SourceFile` (and recompiling anything that used it).
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// The set of files available to a program: translation units plus anything
/// reachable only via textual inclusion.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    files: Vec<SourceFile>,
}

impl SourceSet {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self { files }
    }

    pub fn get(&self, name: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }
}

/// One hop of an inclusion chain: the file that did the including and the
/// line of the `#include` directive within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeFrame {
    pub file: String,
    pub line: u32,
}

/// A span in the file the user wrote, plus the chain of `#include`s through
/// which that file entered the translation unit (innermost first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub file: String,
    /// 1-based line of `span.start` within `file`
    pub line: u32,
    /// Byte span within `file`
    pub span: Span,
    pub includes: Vec<IncludeFrame>,
}

impl SourceRef {
    pub fn new(file: impl Into<String>, line: u32, start: usize, end: usize) -> Self {
        Self {
            file: file.into(),
            line,
            span: Span::new(start, end),
            includes: Vec::new(),
        }
    }

    pub fn is_included(&self) -> bool {
        !self.includes.is_empty()
    }
}

/// Maps a contiguous run of preprocessed text back to its originating file.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub pp_start: usize,
    pub len: usize,
    pub file: String,
    /// Offset within `file` where this segment begins
    pub orig_start: usize,
    pub chain: Vec<IncludeFrame>,
}

/// The fully expanded text of one translation unit plus the bookkeeping to
/// map spans back through the inclusion chain.
#[derive(Debug, Clone)]
pub struct PreprocessedSource {
    pub name: String,
    pub text: String,
    pub(crate) segments: Vec<Segment>,
    /// Texts of every file that contributed a segment, for line counting
    pub(crate) file_texts: HashMap<String, String>,
    pub included_files: Vec<String>,
}

impl PreprocessedSource {
    /// Map a span in the preprocessed text back to the file it came from.
    ///
    /// Spans that straddle a segment boundary (possible only for constructs
    /// synthesized around an include site) are clamped to the segment
    /// containing their start.
    pub fn source_ref(&self, span: Span) -> SourceRef {
        let seg = self
            .segments
            .iter()
            .rev()
            .find(|s| s.pp_start <= span.start)
            .unwrap_or(&self.segments[0]);

        let offset = span.start - seg.pp_start;
        let orig_start = seg.orig_start + offset;
        let orig_end = seg.orig_start + (span.end - seg.pp_start).min(seg.len);
        let line = self.line_of(&seg.file, orig_start);

        SourceRef {
            file: seg.file.clone(),
            line,
            span: Span::new(orig_start, orig_end.max(orig_start)),
            includes: seg.chain.clone(),
        }
    }

    fn line_of(&self, file: &str, offset: usize) -> u32 {
        let Some(text) = self.file_texts.get(file) else {
            return 1;
        };
        let upto = offset.min(text.len());
        1 + text.as_bytes()[..upto].iter().filter(|&&b| b == b'\n').count() as u32
    }
}
