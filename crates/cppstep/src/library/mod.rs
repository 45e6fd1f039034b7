//! Bundled standard-library headers
//!
//! Library headers are ordinary subset-C++ source. Every function or operator
//! that needs behavior the simulator cannot express has a body consisting of
//! a single opaque marker (`@name;`); the native registry in [`native`] maps
//! each marker to a host implementation that runs in place of a simulated
//! body. Nothing else in the engine knows about specific library functions.

pub mod native;

use crate::frontend::source::SourceFile;

const IOSTREAM: &str = r#"
class ostream {
public:
    ostream& operator<<(int value) { @ostream_insert_int; }
    ostream& operator<<(double value) { @ostream_insert_double; }
    ostream& operator<<(char value) { @ostream_insert_char; }
    ostream& operator<<(bool value) { @ostream_insert_bool; }
    ostream& operator<<(const char* value) { @ostream_insert_cstring; }
};

ostream cout;

const char endl = '\n';

class istream {
public:
    istream& operator>>(int& target) { @istream_extract_int; }
    istream& operator>>(double& target) { @istream_extract_double; }
    istream& operator>>(char& target) { @istream_extract_char; }
};

istream cin;
"#;

const CSTDLIB: &str = r#"
int rand() {
    @rand;
}

void srand(int seed) {
    @srand;
}

int abs(int value) {
    @abs;
}
"#;

/// Look up a bundled header by include name (without angle brackets).
pub fn header(name: &str) -> Option<SourceFile> {
    let text = match name {
        "iostream" | "iostream.h" => IOSTREAM,
        "cstdlib" | "cstdlib.h" => CSTDLIB,
        _ => return None,
    };
    Some(SourceFile::new(name, text))
}

/// Names accepted by [`header`], for "did you mean" style notes.
pub fn header_names() -> &'static [&'static str] {
    &["iostream", "cstdlib"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_translation_unit;

    #[test]
    fn test_headers_parse() {
        for name in header_names() {
            let file = header(name).unwrap();
            parse_translation_unit(&file.text)
                .unwrap_or_else(|e| panic!("{name} failed to parse: {}", e.message));
        }
    }

    #[test]
    fn test_unknown_header() {
        assert!(header("vector").is_none());
    }
}
