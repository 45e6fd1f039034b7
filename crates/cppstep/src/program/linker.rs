//! Program construction and linking
//!
//! A [`Program`] owns everything compile time produces: sources, units, the
//! shared arenas, and the linked tables. Construction never fails; whether
//! the result can run is a query ([`Program::is_runnable`]), not an error.
//!
//! Linking folds per-unit definitions into program-wide tables keyed by
//! qualified name. The tables are pure name/signature maps, so the order
//! units are processed in affects only note ordering, never which definition
//! wins or whether linking succeeds.

use std::collections::HashMap;

use crate::diagnostics::{Note, NoteKind, NoteRecorder};
use crate::frontend::parser::parse_translation_unit;
use crate::frontend::preprocessor::Preprocessor;
use crate::frontend::source::{SourceFile, SourceSet};
use crate::library;
use crate::program::TranslationUnit;
use crate::sema::{
    CompileContext, ConstructId, ConstructKind, EntityId, FunctionBodyKind, UnitCompiler,
};
use crate::types::Type;

pub struct Program {
    pub sources: SourceSet,
    pub units: Vec<TranslationUnit>,
    pub context: CompileContext,
    /// Every note from every phase, in processing order
    pub notes: NoteRecorder,
    main: Option<EntityId>,
    linked_objects: HashMap<String, EntityId>,
    /// Function definition groups by qualified name
    linked_functions: HashMap<String, Vec<EntityId>>,
    linked_classes: HashMap<String, EntityId>,
}

impl Program {
    /// Compile and link the named units out of `files`. Always produces a
    /// program; inspect the notes and [`Program::is_runnable`] afterwards.
    pub fn new(files: Vec<SourceFile>, unit_names: &[String]) -> Self {
        let sources = SourceSet::new(files);
        let mut context = CompileContext::new();
        let mut notes = NoteRecorder::new();
        let mut units = Vec::new();

        for name in unit_names {
            let mut recorder = NoteRecorder::new();
            let Some(primary) = sources.get(name) else {
                notes.add(Note::new(
                    NoteKind::Preprocessor,
                    crate::diagnostics::Severity::Error,
                    "preprocess.file_not_found",
                    format!("no source file named \"{name}\""),
                    Vec::new(),
                ));
                continue;
            };
            let pp = Preprocessor::new(&sources).preprocess(primary, &mut recorder);

            let unit = match parse_translation_unit(&pp.text) {
                Ok(ast) => {
                    let mut unit = {
                        let compiler = UnitCompiler::new(&mut context, &pp);
                        compiler.compile(&ast, name)
                    };
                    // Preprocessor notes come before compile notes.
                    let mut merged = recorder;
                    merged.add_all(&unit.recorder);
                    unit.recorder = merged;
                    unit.included_files = pp.included_files.clone();
                    unit
                }
                Err(err) => {
                    let sref = pp.source_ref(err.span);
                    recorder.add(Note::error(NoteKind::Syntax, "syntax", err.message, sref));
                    let global_scope = context
                        .scopes
                        .new_scope(crate::sema::ScopeKind::Global, None);
                    TranslationUnit {
                        name: name.clone(),
                        top_level: Vec::new(),
                        global_scope,
                        recorder,
                        global_objects: Vec::new(),
                        functions: Vec::new(),
                        classes: Vec::new(),
                        included_files: pp.included_files.clone(),
                    }
                }
            };
            notes.add_all(&unit.recorder);
            units.push(unit);
        }

        let mut program = Self {
            sources,
            units,
            context,
            notes,
            main: None,
            linked_objects: HashMap::new(),
            linked_functions: HashMap::new(),
            linked_classes: HashMap::new(),
        };

        // A syntax error anywhere skips linking entirely.
        if !program.has_syntax_errors() {
            program.link();
        }
        program
    }

    /// Convenience constructor for a single source treated as one unit
    pub fn from_source(name: &str, text: &str) -> Self {
        Self::new(
            vec![SourceFile::new(name, text)],
            &[name.to_string()],
        )
    }

    // ==================== linking ====================

    fn link(&mut self) {
        self.link_classes();
        self.link_objects();
        self.link_functions();
        self.find_main();
    }

    fn link_note(&mut self, id: &str, message: String, entity: EntityId) {
        let sref = match self.context.entities.get(entity) {
            crate::sema::Entity::Variable(v) => v.declared_at.clone(),
            crate::sema::Entity::Function(f) => f.declared_at.clone(),
            crate::sema::Entity::Class(c) => c.declared_at.clone(),
        };
        let refs = sref.into_iter().collect();
        self.notes.add(Note::new(
            NoteKind::Linker,
            crate::diagnostics::Severity::Error,
            id,
            message,
            refs,
        ));
    }

    /// Classes defined in more than one unit must agree structurally;
    /// divergent same-named classes cannot be folded.
    fn link_classes(&mut self) {
        let unit_classes: Vec<Vec<EntityId>> =
            self.units.iter().map(|u| u.classes.clone()).collect();
        for class_ids in unit_classes {
            for class_id in class_ids {
                let Some(class) = self.context.entities.class(class_id) else {
                    continue;
                };
                let name = class.name.clone();
                match self.linked_classes.get(&name) {
                    None => {
                        self.linked_classes.insert(name, class_id);
                    }
                    Some(&existing) => {
                        let same = self
                            .context
                            .entities
                            .class(existing)
                            .is_some_and(|prev| classes_equivalent(prev, class));
                        if !same {
                            self.link_note(
                                "link.class_same_tokens",
                                format!(
                                    "class '{name}' is defined differently in another translation unit"
                                ),
                                class_id,
                            );
                        }
                    }
                }
            }
        }
    }

    fn link_objects(&mut self) {
        let unit_objects: Vec<Vec<EntityId>> =
            self.units.iter().map(|u| u.global_objects.clone()).collect();
        for object_ids in unit_objects {
            for object_id in object_ids {
                let Some(var) = self.context.entities.variable(object_id) else {
                    continue;
                };
                let name = format!("::{}", var.name);
                let ty = var.ty.clone();
                match self.linked_objects.get(&name) {
                    None => {
                        self.linked_objects.insert(name, object_id);
                        if let Some(v) = self.context.entities.variable_mut(object_id) {
                            v.resolved = true;
                        }
                    }
                    Some(&existing) => {
                        let existing_ty = self
                            .context
                            .entities
                            .variable(existing)
                            .map(|v| v.ty.clone());
                        if existing_ty.as_ref() == Some(&ty) {
                            // The same header pulled into several units
                            // contributes one object, not a redefinition.
                            if self.same_declaring_file(existing, object_id) {
                                continue;
                            }
                            self.link_note(
                                "link.multiple_def",
                                format!("'{name}' is defined in more than one translation unit"),
                                object_id,
                            );
                        } else {
                            self.link_note(
                                "link.type_mismatch",
                                format!(
                                    "'{name}' is declared with a different type in another translation unit"
                                ),
                                object_id,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Fold function definitions into per-name overload groups and resolve
    /// every prototype against them.
    fn link_functions(&mut self) {
        let unit_functions: Vec<Vec<EntityId>> =
            self.units.iter().map(|u| u.functions.clone()).collect();

        // Definitions first.
        for function_ids in &unit_functions {
            for &fid in function_ids {
                let Some(func) = self.context.entities.function(fid) else {
                    continue;
                };
                if func.definition.is_none() {
                    continue;
                }
                let qname = func.qualified_name.clone();
                let ty = func.ty.clone();
                let group: Vec<EntityId> = self
                    .linked_functions
                    .get(&qname)
                    .cloned()
                    .unwrap_or_default();
                let duplicate = group.iter().copied().find(|&other| {
                    self.context
                        .entities
                        .function(other)
                        .is_some_and(|f| f.ty.same_signature(&ty))
                });
                match duplicate {
                    // Bodies arriving from one header included in several
                    // units are the same definition.
                    Some(other) if self.same_declaring_file(other, fid) => {}
                    Some(_) => {
                        self.link_note(
                            "link.multiple_def",
                            format!("'{qname}' with this signature is defined more than once"),
                            fid,
                        );
                    }
                    None => {
                        self.linked_functions.entry(qname).or_default().push(fid);
                    }
                }
            }
        }

        // Then prototypes: each either resolves to a definition with the
        // same signature or is reported.
        for function_ids in &unit_functions {
            for &fid in function_ids {
                let Some(func) = self.context.entities.function(fid) else {
                    continue;
                };
                if func.definition.is_some() {
                    continue;
                }
                let qname = func.qualified_name.clone();
                let ty = func.ty.clone();
                let name = func.name.clone();
                let resolved: Option<ConstructId> = self
                    .linked_functions
                    .get(&qname)
                    .and_then(|group| {
                        group.iter().find_map(|&other| {
                            let f = self.context.entities.function(other)?;
                            f.ty.same_signature(&ty).then_some(f.definition)?
                        })
                    });
                match resolved {
                    Some(definition) => {
                        if let Some(f) = self.context.entities.function_mut(fid) {
                            f.definition = Some(definition);
                            f.body_kind = FunctionBodyKind::Block;
                        }
                    }
                    None => {
                        self.link_note(
                            "link.def_not_found",
                            format!("definition of '{name}' was not found"),
                            fid,
                        );
                    }
                }
            }
        }

        // Opaque bodies must have a native implementation registered.
        let all: Vec<EntityId> = self
            .context
            .entities
            .iter()
            .filter_map(|(id, e)| match e {
                crate::sema::Entity::Function(f)
                    if f.body_kind == FunctionBodyKind::Opaque =>
                {
                    Some(id)
                }
                _ => None,
            })
            .collect();
        for fid in all {
            let marker = self
                .context
                .entities
                .function(fid)
                .and_then(|f| f.definition)
                .and_then(|def| self.opaque_marker(def));
            let Some(marker) = marker else {
                continue;
            };
            if !library::native::is_registered(&marker) {
                let name = self
                    .context
                    .entities
                    .function(fid)
                    .map(|f| f.qualified_name.clone())
                    .unwrap_or_default();
                self.link_note(
                    "link.library_unsupported",
                    format!("the library function '{name}' is not supported"),
                    fid,
                );
            }
        }
    }

    /// Whether two entities were declared in the same source file
    fn same_declaring_file(&self, a: EntityId, b: EntityId) -> bool {
        let file_of = |id: EntityId| match self.context.entities.get(id) {
            crate::sema::Entity::Variable(v) => v.declared_at.as_ref().map(|s| &s.file),
            crate::sema::Entity::Function(f) => f.declared_at.as_ref().map(|s| &s.file),
            crate::sema::Entity::Class(c) => c.declared_at.as_ref().map(|s| &s.file),
        };
        match (file_of(a), file_of(b)) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => false,
        }
    }

    fn opaque_marker(&self, definition: ConstructId) -> Option<String> {
        let ConstructKind::FunctionDefinition { body, .. } =
            &self.context.constructs.get(definition).kind
        else {
            return None;
        };
        match &self.context.constructs.get(*body).kind {
            ConstructKind::OpaqueBody { marker } => Some(marker.clone()),
            _ => None,
        }
    }

    fn find_main(&mut self) {
        let group = self.linked_functions.get("::main").cloned();
        match group.as_deref() {
            None | Some([]) => {
                self.notes.add(Note::new(
                    NoteKind::Linker,
                    crate::diagnostics::Severity::Error,
                    "link.main_not_found",
                    "no definition of 'main' was found",
                    Vec::new(),
                ));
            }
            Some(&[single]) => {
                let ok_signature = self
                    .context
                    .entities
                    .function(single)
                    .is_some_and(|f| f.ty.params.is_empty() && f.ty.return_type == Type::int());
                if ok_signature {
                    self.main = Some(single);
                } else {
                    self.link_note(
                        "declaration.func.main_params",
                        "'main' must be declared as 'int main()'".to_string(),
                        single,
                    );
                }
            }
            Some(group) => {
                for &fid in group {
                    self.link_note(
                        "link.main_multiple_def",
                        "'main' is defined more than once".to_string(),
                        fid,
                    );
                }
            }
        }
    }

    // ==================== queries ====================

    pub fn has_syntax_errors(&self) -> bool {
        self.notes.has_syntax_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.notes.has_errors() || !self.all_constructs_ok()
    }

    fn all_constructs_ok(&self) -> bool {
        self.units.iter().all(|unit| {
            unit.top_level
                .iter()
                .all(|&c| self.context.constructs.subtree_ok(c))
        })
    }

    /// A program runs only when it parsed, compiled, and linked without a
    /// single error note.
    pub fn is_runnable(&self) -> bool {
        !self.has_errors() && self.main.is_some()
    }

    pub fn main_function(&self) -> Option<EntityId> {
        self.main
    }

    pub fn notes(&self) -> &NoteRecorder {
        &self.notes
    }

    pub fn linked_object(&self, qualified: &str) -> Option<EntityId> {
        self.linked_objects.get(qualified).copied()
    }

    pub fn linked_function_group(&self, qualified: &str) -> Option<&[EntityId]> {
        self.linked_functions.get(qualified).map(Vec::as_slice)
    }

    pub fn linked_class(&self, name: &str) -> Option<EntityId> {
        self.linked_classes.get(name).copied()
    }

    /// Global objects with static storage, in link order
    pub fn global_objects(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.units
            .iter()
            .flat_map(|u| u.global_objects.iter().copied())
    }
}

/// Structural agreement between two definitions of the same class name
fn classes_equivalent(a: &crate::sema::ClassInfo, b: &crate::sema::ClassInfo) -> bool {
    a.base == b.base
        && a.size == b.size
        && a.fields.len() == b.fields.len()
        && a.fields
            .iter()
            .zip(&b.fields)
            .all(|(fa, fb)| fa.name == fb.name && fa.ty == fb.ty && fa.offset == fb.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn program_of(files: &[(&str, &str)], units: &[&str]) -> Program {
        let sources = files
            .iter()
            .map(|&(name, text)| SourceFile::new(name, text))
            .collect();
        let unit_names: Vec<String> = units.iter().map(|&u| u.to_string()).collect();
        Program::new(sources, &unit_names)
    }

    fn count_id(program: &Program, id: &str) -> usize {
        program.notes().notes_with_id(id).count()
    }

    #[test]
    fn test_clean_program_has_no_notes() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int x = 2; int y = 3; int z = 10 * x + y; }",
        );
        assert_eq!(program.notes().notes().len(), 0);
        assert!(program.is_runnable());
    }

    #[test]
    fn test_syntax_error_in_included_file_empties_link_tables() {
        let program = program_of(
            &[
                ("main.cpp", "#include \"bad.h\"\nint main() { return 0; }\n"),
                ("bad.h", "int broken(;\n"),
            ],
            &["main.cpp"],
        );
        assert!(program.has_syntax_errors());
        assert!(!program.is_runnable());
        assert!(program.linked_function_group("::main").is_none());
        assert!(program.linked_object("::broken").is_none());
    }

    #[test]
    fn test_incompatible_redeclaration_is_one_note() {
        let program = Program::from_source(
            "main.cpp",
            "int main() { int x = 1; double x; return 0; }",
        );
        assert_eq!(count_id(&program, "declaration.type_mismatch"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_variable_clashing_function_is_one_note() {
        let program = Program::from_source("main.cpp", "void f();\nint f;\nint main() { return 0; }\n");
        assert_eq!(count_id(&program, "declaration.symbol_mismatch"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_void_variable_is_one_note_at_its_declaration() {
        let program = Program::from_source("main.cpp", "int main() { void v; }");
        let notes: Vec<_> = program
            .notes()
            .notes_with_id("declaration.void_prohibited")
            .collect();
        assert_eq!(notes.len(), 1);
        let sref = &notes[0].refs[0];
        assert_eq!(sref.file, "main.cpp");
        assert!(sref.span.start < sref.span.end);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_prototype_links_against_other_unit() {
        let program = program_of(
            &[
                ("a.cpp", "int helper();\nint main() { return helper(); }\n"),
                ("b.cpp", "int helper() { return 5; }\n"),
            ],
            &["a.cpp", "b.cpp"],
        );
        assert_eq!(program.notes().notes().len(), 0);
        assert!(program.is_runnable());
        assert_eq!(
            program.linked_function_group("::helper").map(<[_]>::len),
            Some(1)
        );
    }

    #[test]
    fn test_undefined_function_is_reported() {
        let program = Program::from_source(
            "a.cpp",
            "int helper();\nint main() { return helper(); }\n",
        );
        assert_eq!(count_id(&program, "link.def_not_found"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_function_defined_twice_is_reported() {
        let program = program_of(
            &[
                ("a.cpp", "int helper() { return 1; }\nint main() { return helper(); }\n"),
                ("b.cpp", "int helper() { return 2; }\n"),
            ],
            &["a.cpp", "b.cpp"],
        );
        assert_eq!(count_id(&program, "link.multiple_def"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_missing_main_is_reported() {
        let program = Program::from_source("a.cpp", "int helper() { return 1; }\n");
        assert_eq!(count_id(&program, "link.main_not_found"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_global_defined_in_two_units_is_reported() {
        let program = program_of(
            &[
                ("a.cpp", "int shared = 1;\nint main() { return shared; }\n"),
                ("b.cpp", "int shared = 2;\n"),
            ],
            &["a.cpp", "b.cpp"],
        );
        assert_eq!(count_id(&program, "link.multiple_def"), 1);
        assert!(!program.is_runnable());
    }

    #[test]
    fn test_shared_header_folds_instead_of_redefining() {
        let program = program_of(
            &[
                (
                    "a.cpp",
                    "#include <iostream>\nint main() { cout << 1; return 0; }\n",
                ),
                (
                    "b.cpp",
                    "#include <iostream>\nvoid show(int v) { cout << v; }\n",
                ),
            ],
            &["a.cpp", "b.cpp"],
        );
        let errors: Vec<_> = program
            .notes()
            .notes()
            .iter()
            .filter(|n| n.is_error())
            .collect();
        assert_eq!(errors.len(), 0, "{errors:#?}");
        assert!(program.is_runnable());
    }

    #[test]
    fn test_divergent_class_definitions_are_reported() {
        let program = program_of(
            &[
                (
                    "a.cpp",
                    "class P { public: int x; };\nint main() { P p; return 0; }\n",
                ),
                ("b.cpp", "class P { public: double x; };\n"),
            ],
            &["a.cpp", "b.cpp"],
        );
        assert_eq!(count_id(&program, "link.class_same_tokens"), 1);
        assert!(!program.is_runnable());
    }
}
