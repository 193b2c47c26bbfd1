//! Extract failing tests from build tool output.
//!
//! A failure block starts at a line carrying a `<<< FAILURE!` or `<<< ERROR!`
//! marker, whose first token names the test, and runs until a blank line or
//! the `Results` summary header.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maven prefixes most lines with a level tag such as `[ERROR] `.
static LEVEL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?:ERROR|WARNING|WARN|INFO|DEBUG)\] ?").unwrap());

const MARKERS: [&str; 2] = ["<<< FAILURE!", "<<< ERROR!"];

/// Test name used for failures that are not tied to a single test.
pub const BUILD_FAILURE: &str = "build";
pub const TIMEOUT_FAILURE: &str = "timeout";
pub const REJECTED_FAILURE: &str = "rejected";

/// Lines of output kept when a failure has no test blocks to point at.
const TAIL_LINES: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    pub message: String,
}

impl TestFailure {
    pub fn new(test_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            message: message.into(),
        }
    }
}

fn strip_level(line: &str) -> &str {
    match LEVEL_TAG.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

fn is_block_start(line: &str) -> bool {
    MARKERS.iter().any(|m| line.contains(m)) && !line.trim_start().starts_with("Tests run:")
}

fn is_block_end(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with("Results")
}

/// Ordered `(test, error text)` pairs found in `output`.
pub fn parse_failures(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for raw in output.lines() {
        let line = strip_level(raw);
        if is_block_start(line) {
            if let Some((name, lines)) = current.take() {
                failures.push(TestFailure::new(name, lines.join("\n")));
            }
            let name = line.split_whitespace().next().unwrap_or_default().to_string();
            current = Some((name, vec![line]));
        } else if is_block_end(line) {
            if let Some((name, lines)) = current.take() {
                failures.push(TestFailure::new(name, lines.join("\n")));
            }
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((name, lines)) = current {
        failures.push(TestFailure::new(name, lines.join("\n")));
    }
    failures
}

/// Failures for a finished test run. A run that did not succeed but left no
/// failure blocks (compilation errors, plugin failures) yields a single
/// synthetic `build` failure carrying the tail of the output.
pub fn failures_for_run(output: &str, success: bool) -> Vec<TestFailure> {
    let failures = parse_failures(output);
    if failures.is_empty() && !success {
        return vec![TestFailure::new(BUILD_FAILURE, tail(output, TAIL_LINES))];
    }
    failures
}

/// Last `n` lines of `text`.
pub fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Render failures as feedback for the next generation attempt.
pub fn render_feedback(failures: &[TestFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}:\n{}", f.test_name, f.message))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_surefire_output() {
        let output = include_str!("../tests/fixtures/surefire_failures.txt");
        let failures = parse_failures(output);

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].test_name, "com.example.FooTest.testDoStuffNegative");
        assert!(failures[0].message.contains("expected: <0> but was: <-1>"));
        assert!(failures[0].message.ends_with("(FooTest.java:21)"));
        assert_eq!(failures[1].test_name, "com.example.FooTest.testUnused");
        assert!(failures[1].message.starts_with("com.example.FooTest.testUnused"));
        assert!(failures[1].message.contains("NullPointerException"));
        assert!(!failures[1].message.contains("Results"));
    }

    #[test]
    fn test_legacy_format_and_results_terminator() {
        let output = "Running FooTest\n\
                      testA(com.example.FooTest)  Time elapsed: 0.01 sec  <<< FAILURE!\n\
                      java.lang.AssertionError\n\
                      Results :\n\
                      Failed tests:   testA(com.example.FooTest)\n";
        let failures = parse_failures(output);
        assert_eq!(
            failures,
            vec![TestFailure::new(
                "testA(com.example.FooTest)",
                "testA(com.example.FooTest)  Time elapsed: 0.01 sec  <<< FAILURE!\njava.lang.AssertionError"
            )]
        );
    }

    #[test]
    fn test_adjacent_blocks_are_both_kept() {
        let output = "a.T.one <<< FAILURE!\nboom\na.T.two <<< ERROR!\nbang";
        let failures = parse_failures(output);
        let names: Vec<_> = failures.iter().map(|f| f.test_name.as_str()).collect();
        assert_eq!(names, vec!["a.T.one", "a.T.two"]);
        assert_eq!(failures[1].message, "a.T.two <<< ERROR!\nbang");
    }

    #[test]
    fn test_passing_output() {
        let output = "[INFO] Tests run: 4, Failures: 0, Errors: 0, Skipped: 0\n[INFO] BUILD SUCCESS\n";
        assert!(parse_failures(output).is_empty());
        assert!(failures_for_run(output, true).is_empty());
    }

    #[test]
    fn test_compile_error_becomes_build_failure() {
        let output = include_str!("../tests/fixtures/compile_error.txt");
        let failures = failures_for_run(output, false);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_name, BUILD_FAILURE);
        assert!(failures[0].message.contains("cannot find symbol"));
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 3), "");
    }

    #[test]
    fn test_render_feedback() {
        let text = render_feedback(&[
            TestFailure::new("t1", "boom"),
            TestFailure::new("t2", "bang"),
        ]);
        assert_eq!(text, "t1:\nboom\n\nt2:\nbang");
    }
}
