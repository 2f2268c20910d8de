//! Diagnostic extraction from failed-test text.
//!
//! Matchers run in priority order over line groups of the combined
//! `message` / `stderr_tail` text:
//!
//! 1. gcc/clang style `file:line:col: error: text`
//! 2. rustc style `error[CODE]: text` with a `--> file:line:col` pointer
//! 3. fallback: one unlocated diagnostic classified by keyword markers
//!
//! Extraction never fails. Text that matches nothing yields the fallback
//! diagnostic, and empty text yields none.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use super::normalize::cluster_key;
use crate::domain::models::{Diagnostic, DiagnosticKind, Location, TestOutcome};

/// Lines kept in a fallback rendering.
const FALLBACK_RENDER_LINES: usize = 12;
/// How far below a rustc header the `-->` pointer may appear.
const POINTER_LOOKAHEAD: usize = 3;

struct Patterns {
    gcc: Regex,
    rustc_header: Regex,
    pointer: Regex,
    gutter_line: Regex,
    caret_line: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        gcc: Regex::new(
            r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?:fatal\s+)?error:\s*(?P<msg>.*)$",
        )
        .expect("valid gcc pattern"),
        rustc_header: Regex::new(r"^error(?:\[(?P<code>[A-Z]+\d+)\])?:\s*(?P<msg>.+)$")
            .expect("valid rustc header pattern"),
        pointer: Regex::new(r"^\s*-->\s*(?P<file>.+?):(?P<line>\d+):(?P<col>\d+)\s*$")
            .expect("valid pointer pattern"),
        gutter_line: Regex::new(r"^\s*(?P<num>\d+)\s*\|\s?(?P<src>.*)$").expect("valid gutter pattern"),
        caret_line: Regex::new(r"^\s*\|\s?(?P<lead>[\s\-|]*?)(?P<carets>\^+)\s*(?P<label>.*)$")
            .expect("valid caret pattern"),
    })
}

/// Classifies an unlocated message as compile or runtime error.
///
/// A message containing any marker (case-insensitive) is a compile error;
/// everything else is a runtime error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackClassifier {
    compile_markers: Vec<String>,
}

impl FallbackClassifier {
    pub fn new(compile_markers: Vec<String>) -> Self {
        Self {
            compile_markers: compile_markers.into_iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn classify(&self, text: &str) -> DiagnosticKind {
        let lowered = text.to_lowercase();
        if self.compile_markers.iter().any(|m| lowered.contains(m.as_str())) {
            DiagnosticKind::CompileError
        } else {
            DiagnosticKind::RuntimeError
        }
    }
}

impl Default for FallbackClassifier {
    fn default() -> Self {
        Self::new(crate::domain::models::config::default_compile_markers())
    }
}

/// Turns failed-test text into structured [`Diagnostic`]s.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticExtractor {
    classifier: FallbackClassifier,
}

impl DiagnosticExtractor {
    pub fn new(classifier: FallbackClassifier) -> Self {
        Self { classifier }
    }

    pub fn extract(&self, test: &TestOutcome) -> Vec<Diagnostic> {
        self.extract_text(&test.message, &test.stderr_tail, test.source.as_deref())
    }

    /// Extract from raw fields; used where the record is not a well-formed
    /// [`TestOutcome`].
    pub fn extract_text(&self, message: &str, stderr_tail: &str, source: Option<&str>) -> Vec<Diagnostic> {
        let text = combine(message, stderr_tail);
        let lines: Vec<&str> = text.lines().collect();
        let p = patterns();

        let mut diagnostics = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let trimmed = lines[i].trim();
            if is_noise(trimmed) {
                i += 1;
                continue;
            }

            if let Some(caps) = p.gcc.captures(trimmed) {
                let end = block_end(&lines, i + 1);
                diagnostics.push(gcc_diagnostic(&caps, trimmed, &lines[i + 1..end], source));
                i = end;
                continue;
            }

            if let Some(caps) = p.rustc_header.captures(trimmed) {
                let pointer = lines
                    .iter()
                    .skip(i + 1)
                    .take(POINTER_LOOKAHEAD)
                    .find_map(|l| p.pointer.captures(l));
                let code = caps.name("code").map(|m| m.as_str().to_string());

                if pointer.is_some() || code.is_some() {
                    let end = block_end(&lines, i + 1);
                    diagnostics.push(rustc_diagnostic(
                        &caps,
                        code,
                        pointer,
                        &lines[i + 1..end],
                        source,
                    ));
                    i = end;
                    continue;
                }
            }

            i += 1;
        }

        if diagnostics.is_empty() {
            diagnostics.extend(self.fallback(&lines));
        }
        diagnostics
    }

    fn fallback(&self, lines: &[&str]) -> Option<Diagnostic> {
        let meaningful: Vec<&str> = lines
            .iter()
            .map(|l| l.trim_end())
            .filter(|l| !l.trim().is_empty() && !is_noise(l.trim()))
            .collect();
        let first = meaningful.first()?.trim();

        let kind = self.classifier.classify(&meaningful.join("\n"));
        let rendered = meaningful
            .iter()
            .take(FALLBACK_RENDER_LINES)
            .copied()
            .collect::<Vec<_>>()
            .join("\n");

        Some(Diagnostic {
            kind,
            code: None,
            primary: None,
            message: first.to_string(),
            rendered,
            cluster_key: cluster_key(kind, None, first),
        })
    }
}

/// Extract with the default classifier.
pub fn extract_test_diagnostics(test: &TestOutcome) -> Vec<Diagnostic> {
    DiagnosticExtractor::default().extract(test)
}

fn combine(message: &str, stderr_tail: &str) -> String {
    let message = message.trim_end();
    let stderr_tail = stderr_tail.trim_end();
    if message.is_empty() || stderr_tail.contains(message) {
        stderr_tail.to_string()
    } else if stderr_tail.is_empty() {
        message.to_string()
    } else {
        format!("{message}\n{stderr_tail}")
    }
}

/// rustc summary lines that restate other diagnostics.
fn is_noise(trimmed: &str) -> bool {
    trimmed.starts_with("error: aborting due to")
        || trimmed.starts_with("error: could not compile")
        || trimmed.starts_with("For more information about this error")
        || trimmed.starts_with("Some errors have detailed explanations")
}

fn is_header(trimmed: &str) -> bool {
    trimmed.starts_with("error") || trimmed.starts_with("warning") || patterns().gcc.is_match(trimmed)
}

/// Index one past the last line of the block starting at `start`.
fn block_end(lines: &[&str], start: usize) -> usize {
    lines[start..]
        .iter()
        .position(|l| l.trim().is_empty() || is_header(l.trim()))
        .map_or(lines.len(), |offset| start + offset)
}

fn parse_u32(caps: &Captures<'_>, name: &str) -> u32 {
    caps.name(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn source_line(source: Option<&str>, line: u32) -> Option<String> {
    let index = usize::try_from(line).ok()?.checked_sub(1)?;
    source?.lines().nth(index).map(|l| l.trim_end().to_string())
}

/// Source text for `line` from the test source, or from a `N | text`
/// excerpt line in the block.
fn referenced_line(block: &[&str], source: Option<&str>, line: u32) -> Option<String> {
    source_line(source, line).or_else(|| {
        block.iter().find_map(|l| {
            let caps = patterns().gutter_line.captures(l)?;
            (caps["num"].parse::<u32>().ok()? == line).then(|| caps["src"].trim_end().to_string())
        })
    })
}

/// Width and label of the first caret annotation in the block.
fn caret_annotation(block: &[&str]) -> Option<(usize, String)> {
    block.iter().find_map(|l| {
        let caps = patterns().caret_line.captures(l)?;
        Some((caps["carets"].len(), caps["label"].trim().to_string()))
    })
}

/// Gutter, source line and caret rows in rustc layout.
///
/// `None` when `col` points past the end of `src`; the caller keeps the
/// original block instead.
fn render_excerpt(line: u32, col: u32, src: &str, carets: usize, label: &str) -> Option<Vec<String>> {
    let offset = usize::try_from(col.saturating_sub(1)).ok()?;
    if offset > src.chars().count() {
        return None;
    }
    let number = line.to_string();
    let pad = " ".repeat(number.len());
    let indent = " ".repeat(offset);
    let marker = "^".repeat(carets.max(1));
    let caret_row = if label.is_empty() {
        format!("{pad} | {indent}{marker}")
    } else {
        format!("{pad} | {indent}{marker} {label}")
    };
    Some(vec![
        format!("{pad} |"),
        format!("{number} | {src}"),
        caret_row,
    ])
}

fn gcc_diagnostic(caps: &Captures<'_>, header: &str, block: &[&str], source: Option<&str>) -> Diagnostic {
    let location = Location {
        file: caps["file"].to_string(),
        line: parse_u32(caps, "line"),
        col: parse_u32(caps, "col"),
    };
    let message = caps["msg"].trim().to_string();

    let mut rendered = vec![header.to_string()];
    let excerpt = referenced_line(block, source, location.line)
        .filter(|_| location.col > 0)
        .and_then(|src| {
            let (carets, label) = caret_annotation(block).unwrap_or((1, String::new()));
            render_excerpt(location.line, location.col, &src, carets, &label)
        });
    match excerpt {
        Some(rows) => rendered.extend(rows),
        None => rendered.extend(block.iter().map(|l| l.trim_end().to_string())),
    }

    let kind = DiagnosticKind::CompileError;
    Diagnostic {
        kind,
        code: None,
        primary: Some(location),
        cluster_key: cluster_key(kind, None, &message),
        message,
        rendered: rendered.join("\n"),
    }
}

fn rustc_diagnostic(
    caps: &Captures<'_>,
    code: Option<String>,
    pointer: Option<Captures<'_>>,
    block: &[&str],
    source: Option<&str>,
) -> Diagnostic {
    let message = caps["msg"].trim().to_string();
    let header = match &code {
        Some(code) => format!("error[{code}]: {message}"),
        None => format!("error: {message}"),
    };

    let primary = pointer.as_ref().map(|c| Location {
        file: c["file"].trim().to_string(),
        line: parse_u32(c, "line"),
        col: parse_u32(c, "col"),
    });

    let mut rendered = vec![header];
    if let Some(location) = &primary {
        let pad = " ".repeat(location.line.to_string().len());
        rendered.push(format!(
            "{pad}--> {}:{}:{}",
            location.file, location.line, location.col
        ));
        let excerpt = referenced_line(block, source, location.line).and_then(|src| {
            let (carets, label) = caret_annotation(block).unwrap_or((1, String::new()));
            render_excerpt(location.line, location.col, &src, carets, &label)
        });
        match excerpt {
            Some(rows) => rendered.extend(rows),
            None => rendered.extend(
                block
                    .iter()
                    .filter(|l| !patterns().pointer.is_match(l))
                    .map(|l| l.trim_end().to_string()),
            ),
        }
    } else {
        rendered.extend(block.iter().map(|l| l.trim_end().to_string()));
    }

    let kind = DiagnosticKind::CompileError;
    Diagnostic {
        kind,
        cluster_key: cluster_key(kind, code.as_deref(), &message),
        code,
        primary,
        message,
        rendered: rendered.join("\n"),
    }
}
