//! Cluster-key derivation.
//!
//! Two diagnostics that differ only in the offending symbol, the file they
//! point at, or the numbers they quote must collapse to the same key.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::models::DiagnosticKind;

/// Placeholder for quoted identifiers.
pub const QUOTED: &str = "<q>";
/// Placeholder for file paths.
pub const PATH: &str = "<path>";
/// Placeholder for line/column and other numbers.
pub const NUMBER: &str = "<n>";

struct Patterns {
    backtick: Regex,
    double_quoted: Regex,
    single_quoted: Regex,
    path: Regex,
    bare_file: Regex,
    number: Regex,
    whitespace: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        backtick: Regex::new(r"`[^`]*`").expect("valid backtick pattern"),
        double_quoted: Regex::new(r#""[^"\n]*""#).expect("valid double-quote pattern"),
        // A quote opening a literal, not an apostrophe inside a word.
        single_quoted: Regex::new(r"(^|[^\w])['‘][^'’\n]*['’]").expect("valid single-quote pattern"),
        path: Regex::new(r"(?:[A-Za-z]:)?(?:\.{1,2})?/?(?:[\w.\-]+/)+[\w.\-]+(?::\d+){0,2}")
            .expect("valid path pattern"),
        bare_file: Regex::new(
            r"\b[\w\-]+\.(?:c|h|cc|cpp|cxx|hpp|rs|py|go|js|ts|java|rb|ml|zig|swift|kt)(?::\d+){0,2}\b",
        )
        .expect("valid file pattern"),
        number: Regex::new(r"\b\d+\b").expect("valid number pattern"),
        whitespace: Regex::new(r"\s+").expect("valid whitespace pattern"),
    })
}

/// Strip quoted identifiers, paths and numbers from a diagnostic message.
pub fn normalize_message(message: &str) -> String {
    let p = patterns();
    let text = p.backtick.replace_all(message, QUOTED);
    let text = p.double_quoted.replace_all(&text, QUOTED);
    let text = p.single_quoted.replace_all(&text, format!("${{1}}{QUOTED}").as_str());
    let text = p.path.replace_all(&text, PATH);
    let text = p.bare_file.replace_all(&text, PATH);
    let text = p.number.replace_all(&text, NUMBER);
    p.whitespace.replace_all(text.trim(), " ").into_owned()
}

/// `"<kind>|<code-or-dash>|<normalized message>"`.
pub fn cluster_key(kind: DiagnosticKind, code: Option<&str>, message: &str) -> String {
    format!(
        "{}|{}|{}",
        kind.as_str(),
        code.unwrap_or("-"),
        normalize_message(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_identifiers_collapse() {
        assert_eq!(
            normalize_message("cannot borrow `x` as mutable more than once at a time"),
            "cannot borrow <q> as mutable more than once at a time"
        );
        assert_eq!(
            normalize_message("cannot borrow `items` as mutable more than once at a time"),
            normalize_message("cannot borrow `x` as mutable more than once at a time"),
        );
        assert_eq!(normalize_message("expected ';'"), "expected <q>");
        assert_eq!(normalize_message("unknown type name \"foo_t\""), "unknown type name <q>");
    }

    #[test]
    fn apostrophes_inside_words_survive() {
        assert_eq!(normalize_message("can't find 'x'"), "can't find <q>");
    }

    #[test]
    fn paths_and_numbers_collapse() {
        assert_eq!(
            normalize_message("undefined reference in tmp/build/main.c:12:4 after 3 tries"),
            "undefined reference in <path> after <n> tries"
        );
        assert_eq!(normalize_message("bad thing in test.c"), "bad thing in <path>");
    }

    #[test]
    fn key_format() {
        assert_eq!(
            cluster_key(DiagnosticKind::CompileError, Some("E0499"), "cannot borrow `v`"),
            "compile_error|E0499|cannot borrow <q>"
        );
        assert_eq!(
            cluster_key(DiagnosticKind::RuntimeError, None, "segfault  at   0"),
            "runtime_error|-|segfault at <n>"
        );
    }
}
