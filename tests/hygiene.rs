//! Production source checks for the `painter` and `envelope` crates.
//!
//! Library and binary code propagates errors instead of panicking and never
//! drops a `Result` unlooked-at. Sibling `_test.rs` files and the shared test
//! doubles are exempt. Comment lines are not scanned.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Source roots, relative to the package root.
const ROOTS: &[&str] = &["src", "envelope/src"];

/// Patterns with no place in production code, and what to do instead.
const FORBIDDEN: &[(&str, &str)] = &[
    (".unwrap()", "propagate with `?` or recover explicitly"),
    (".expect(", "propagate with `?` or recover explicitly"),
    ("panic!(", "return an error"),
    ("unreachable!(", "make the state unrepresentable or return an error"),
    ("todo!(", "finish the code path"),
    ("unimplemented!(", "finish the code path"),
    ("let _ =", "log or handle the discarded value"),
    ("#[allow(dead_code)]", "delete the unused item"),
];

/// Every file allowed to turn a `Result` into an `Option`, how many times,
/// and why absence is the right answer there.
const OK_SITES: &[(&str, usize, &str)] = &[
    ("src/board/grid.rs", 2, "negative coordinates are off the board"),
    ("src/board/api.rs", 1, "a paint reply that is not JSON falls back to the HTTP status"),
    ("src/config.rs", 3, "unset or unparsable env vars fall back to defaults"),
];

struct SourceFile {
    path: String,
    content: String,
}

fn production_sources() -> Vec<SourceFile> {
    let mut files = Vec::new();
    for root in ROOTS {
        collect(Path::new(root), &mut files);
    }
    assert!(
        files.iter().any(|file| file.path == "envelope/src/lib.rs"),
        "envelope sources were not scanned"
    );
    files
}

fn collect(dir: &Path, out: &mut Vec<SourceFile>) {
    let entries = fs::read_dir(dir).unwrap_or_else(|err| panic!("read {}: {err}", dir.display()));
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
            continue;
        }
        let name = path.to_string_lossy().replace('\\', "/");
        let exempt = name.ends_with("_test.rs") || name.ends_with("test_helpers.rs");
        if exempt || path.extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let content = fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {name}: {err}"));
        out.push(SourceFile { path: name, content });
    }
}

/// `(line number, line)` for every code line containing `pattern`.
fn hits<'a>(file: &'a SourceFile, pattern: &'a str) -> impl Iterator<Item = (usize, &'a str)> {
    file.content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim_start().starts_with("//"))
        .filter(move |(_, line)| line.contains(pattern))
        .map(|(index, line)| (index + 1, line.trim()))
}

#[test]
fn no_panicking_shortcuts_or_silent_discards() {
    let files = production_sources();
    let mut violations = Vec::new();
    for (pattern, instead) in FORBIDDEN {
        for file in &files {
            for (line, text) in hits(file, pattern) {
                violations.push(format!("  {}:{line}: `{pattern}` ({instead})\n    {text}", file.path));
            }
        }
    }
    assert!(violations.is_empty(), "forbidden patterns in production code:\n{}", violations.join("\n"));
}

#[test]
fn result_to_option_only_at_known_sites() {
    let files = production_sources();
    let mut found: BTreeMap<&str, usize> = BTreeMap::new();
    for file in &files {
        let count: usize = hits(file, ".ok()").map(|(_, text)| text.matches(".ok()").count()).sum();
        if count > 0 {
            found.insert(file.path.as_str(), count);
        }
    }
    let expected: BTreeMap<&str, usize> = OK_SITES.iter().map(|(path, count, _)| (*path, *count)).collect();
    assert_eq!(
        found, expected,
        "`.ok()` sites changed; update OK_SITES with a reason, or handle the error"
    );
}
