//! Textual-inclusion preprocessor
//!
//! Handles exactly two forms:
//! - `#include "file"` — resolved against the program's source set
//! - `#include <file>` — resolved against the bundled library headers
//!
//! Every other directive (`#define`, `#ifndef`, ...) and `using` declaration
//! is outside the subset and is blanked with an equal run of spaces so byte
//! offsets into the surrounding text survive. Inclusion is include-once: a
//! file already present in the current chain expands to nothing and records
//! a note instead of recursing.

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{Note, NoteKind, NoteRecorder};
use crate::frontend::source::{
    IncludeFrame, PreprocessedSource, Segment, SourceFile, SourceRef, SourceSet,
};
use crate::library;

pub struct Preprocessor<'a> {
    sources: &'a SourceSet,
}

struct Expansion {
    text: String,
    segments: Vec<Segment>,
    file_texts: HashMap<String, String>,
    included: Vec<String>,
}

impl<'a> Preprocessor<'a> {
    pub fn new(sources: &'a SourceSet) -> Self {
        Self { sources }
    }

    /// Expand all includes of `primary`, recording preprocessor notes into
    /// `notes`.
    pub fn preprocess(&self, primary: &SourceFile, notes: &mut NoteRecorder) -> PreprocessedSource {
        let mut seen = HashSet::new();
        seen.insert(primary.name.clone());
        let exp = self.expand(primary, &[], &mut seen, notes);

        PreprocessedSource {
            name: primary.name.clone(),
            text: exp.text,
            segments: exp.segments,
            file_texts: exp.file_texts,
            included_files: exp.included,
        }
    }

    fn expand(
        &self,
        file: &SourceFile,
        chain: &[IncludeFrame],
        seen: &mut HashSet<String>,
        notes: &mut NoteRecorder,
    ) -> Expansion {
        let filtered = filter_unsupported(&file.text);

        let mut out = Expansion {
            text: String::with_capacity(filtered.len()),
            segments: Vec::new(),
            file_texts: HashMap::new(),
            included: vec![file.name.clone()],
        };
        out.file_texts.insert(file.name.clone(), file.text.clone());

        // Start of the current segment, in original-file offsets.
        let mut seg_start = 0usize;
        let mut line_no = 0u32;
        let mut offset = 0usize;

        for line in split_lines(&filtered) {
            line_no += 1;
            let line_len = line.len();
            let trimmed = line.trim();

            let directive = trimmed
                .strip_prefix("#include")
                .and_then(|rest| parse_include_target(rest.trim()));

            if let Some(target) = directive {
                // Close the current segment (text before the include line).
                push_segment(&mut out, file, chain, seg_start, offset);

                let site = SourceRef {
                    file: file.name.clone(),
                    line: line_no,
                    span: crate::common::Span::new(offset, offset + line_len),
                    includes: chain.to_vec(),
                };

                match self.resolve(&target) {
                    Resolved::NotFound(name) => {
                        notes.add(Note::error(
                            NoteKind::Preprocessor,
                            "preprocess.file_not_found",
                            format!("cannot find anything to include with the name \"{name}\""),
                            site,
                        ));
                    }
                    Resolved::Found(included) => {
                        let in_chain = included.name == file.name
                            || chain.iter().any(|f| f.file == included.name);
                        if in_chain {
                            notes.add(Note::error(
                                NoteKind::Preprocessor,
                                "preprocess.recursive_include",
                                format!(
                                    "including \"{}\" here would include it into itself",
                                    included.name
                                ),
                                site,
                            ));
                        } else if seen.contains(&included.name) {
                            // Include-once: silently expands to nothing.
                        } else {
                            seen.insert(included.name.clone());
                            let mut inner_chain = vec![IncludeFrame {
                                file: file.name.clone(),
                                line: line_no,
                            }];
                            inner_chain.extend_from_slice(chain);

                            let inner = self.expand(&included, &inner_chain, seen, notes);
                            let base = out.text.len();
                            for mut seg in inner.segments {
                                seg.pp_start += base;
                                out.segments.push(seg);
                            }
                            out.text.push_str(&inner.text);
                            out.file_texts.extend(inner.file_texts);
                            out.included.extend(inner.included);
                        }
                    }
                }

                // Resume a fresh segment after the include line.
                offset += line_len;
                seg_start = offset;
                continue;
            }

            out.text.push_str(line);
            offset += line_len;
        }

        push_segment(&mut out, file, chain, seg_start, offset);
        out
    }

    fn resolve(&self, target: &IncludeTarget) -> Resolved {
        match target {
            IncludeTarget::Quoted(name) => match self.sources.get(name) {
                Some(f) => Resolved::Found(f.clone()),
                None => match library::header(name) {
                    Some(f) => Resolved::Found(f),
                    None => Resolved::NotFound(name.clone()),
                },
            },
            IncludeTarget::Angled(name) => match library::header(name) {
                Some(f) => Resolved::Found(f),
                None => Resolved::NotFound(name.clone()),
            },
        }
    }
}

enum IncludeTarget {
    Quoted(String),
    Angled(String),
}

enum Resolved {
    Found(SourceFile),
    NotFound(String),
}

fn parse_include_target(rest: &str) -> Option<IncludeTarget> {
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(IncludeTarget::Quoted(stripped[..end].to_string()));
    }
    if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        return Some(IncludeTarget::Angled(stripped[..end].to_string()));
    }
    None
}

fn push_segment(
    out: &mut Expansion,
    file: &SourceFile,
    chain: &[IncludeFrame],
    seg_start: usize,
    seg_end: usize,
) {
    if seg_end > seg_start {
        let pp_start = out.text.len() - (seg_end - seg_start);
        out.segments.push(Segment {
            pp_start,
            len: seg_end - seg_start,
            file: file.name.clone(),
            orig_start: seg_start,
            chain: chain.to_vec(),
        });
    }
}

/// Split text into lines, each retaining its trailing newline, so that
/// summed lengths equal the input length.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let split = rest.find('\n').map_or(rest.len(), |i| i + 1);
        let (line, tail) = rest.split_at(split);
        rest = tail;
        Some(line)
    })
}

/// Blank out-of-subset directives with equal-length runs of spaces so that
/// byte offsets are unchanged. Carriage returns become spaces for the same
/// reason.
fn filter_unsupported(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in split_lines(text) {
        let trimmed = line.trim_start();
        let blank = (trimmed.starts_with('#') && !trimmed.starts_with("#include"))
            || trimmed.starts_with("using namespace")
            || trimmed.starts_with("using std::");
        if blank {
            for b in line.bytes() {
                result.push(if b == b'\n' { '\n' } else { ' ' });
            }
        } else {
            for c in line.chars() {
                result.push(if c == '\r' { ' ' } else { c });
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn preprocess(files: Vec<SourceFile>, primary: &str) -> (PreprocessedSource, NoteRecorder) {
        let set = SourceSet::new(files);
        let mut notes = NoteRecorder::new();
        let pp = Preprocessor::new(&set).preprocess(set.get(primary).unwrap(), &mut notes);
        (pp, notes)
    }

    #[test]
    fn test_no_includes_text_unchanged() {
        let (pp, notes) = preprocess(
            vec![SourceFile::new("main.cpp", "int main() {\n  return 0;\n}\n")],
            "main.cpp",
        );
        assert_eq!(pp.text, "int main() {\n  return 0;\n}\n");
        assert!(!notes.has_errors());
    }

    #[test]
    fn test_quoted_include_expands() {
        let (pp, notes) = preprocess(
            vec![
                SourceFile::new("main.cpp", "#include \"lib.h\"\nint main() {}\n"),
                SourceFile::new("lib.h", "int helper();\n"),
            ],
            "main.cpp",
        );
        assert!(!notes.has_errors());
        assert!(pp.text.contains("int helper();"));
        assert!(pp.text.contains("int main()"));
    }

    #[test]
    fn test_span_maps_back_through_include() {
        let (pp, _) = preprocess(
            vec![
                SourceFile::new("main.cpp", "#include \"lib.h\"\nint main() {}\n"),
                SourceFile::new("lib.h", "int helper();\n"),
            ],
            "main.cpp",
        );
        // "helper" begins at offset 4 of the expanded text and of lib.h.
        let sref = pp.source_ref(crate::common::Span::new(4, 10));
        assert_eq!(sref.file, "lib.h");
        assert_eq!(sref.span.start, 4);
        assert_eq!(sref.includes.len(), 1);
        assert_eq!(sref.includes[0].file, "main.cpp");
        assert_eq!(sref.includes[0].line, 1);

        // "main" sits after the expanded header but maps to main.cpp line 2.
        let main_at = pp.text.find("main").unwrap();
        let sref = pp.source_ref(crate::common::Span::new(main_at, main_at + 4));
        assert_eq!(sref.file, "main.cpp");
        assert_eq!(sref.line, 2);
        assert!(sref.includes.is_empty());
    }

    #[test]
    fn test_missing_include_is_note_not_panic() {
        let (_, notes) = preprocess(
            vec![SourceFile::new("main.cpp", "#include \"nope.h\"\nint main() {}\n")],
            "main.cpp",
        );
        assert_eq!(notes.notes_with_id("preprocess.file_not_found").count(), 1);
    }

    #[test]
    fn test_unsupported_directives_blanked_in_place() {
        let (pp, notes) = preprocess(
            vec![SourceFile::new("main.cpp", "#define X 1\nint main() {}\n")],
            "main.cpp",
        );
        assert!(!notes.has_errors());
        assert_eq!(pp.text.len(), "#define X 1\nint main() {}\n".len());
        assert!(!pp.text.contains("#define"));
    }
}
