//! Place a generated test method into a test source file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z]*\s*$").unwrap());
static TEST_METHOD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"void\s+([a-zA-Z0-9_]+)\s*\(").unwrap());

/// What to write and where.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub test_code: &'a str,
    pub target_path: &'a Path,
    /// Used only when the file has to be created.
    pub test_class_name: &'a str,
    /// Dotted package for a new file; `None` for the default package.
    pub package: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { method_name: String, replaced: bool },
    Skipped { reason: String },
}

pub trait TestWriter {
    fn write(&self, request: &WriteRequest<'_>) -> Result<WriteOutcome>;
}

/// Strip markdown fences and anything before the first `@Test`.
pub fn clean_generated_code(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().filter(|l| !FENCE.is_match(l)).collect();
    match lines.iter().position(|l| l.trim_start().starts_with("@Test")) {
        Some(start) => lines[start..].join("\n").trim().to_string(),
        None => String::new(),
    }
}

pub fn test_method_name(code: &str) -> Option<String> {
    TEST_METHOD_NAME
        .captures(code)
        .map(|c| c[1].to_string())
}

/// Skeleton of a new JUnit 5 test class.
pub fn scaffold_test_class(package: Option<&str>, class_name: &str) -> String {
    let mut out = String::new();
    if let Some(pkg) = package.filter(|p| !p.is_empty()) {
        out.push_str(&format!("package {pkg};\n\n"));
    }
    out.push_str("import org.junit.jupiter.api.Test;\n");
    out.push_str("import static org.junit.jupiter.api.Assertions.*;\n\n");
    out.push_str(&format!("class {class_name} {{\n}}\n"));
    out
}

/// Byte range of an existing method named `name`, from its `@Test`
/// annotation through its matching closing brace.
fn existing_method_span(content: &str, name: &str) -> Option<(usize, usize)> {
    let pattern = Regex::new(&format!(r"void\s+{}\s*\(", regex::escape(name))).ok()?;
    let found = pattern.find(content)?;

    let line_start = content[..found.start()].rfind('\n').map_or(0, |i| i + 1);
    let start = content[..found.start()]
        .rfind("@Test")
        .filter(|&at| !content[at..found.start()].contains('}'))
        .unwrap_or(line_start);

    let open = found.end() + content[found.end()..].find('{')?;
    let mut depth = 0usize;
    for (offset, c) in content[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, open + offset + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Insert `method` into `content`, replacing a same-named method or
/// appending before the class's final closing brace.
pub fn merge_test_method(content: &str, method: &str, name: &str) -> Option<(String, bool)> {
    if let Some((start, end)) = existing_method_span(content, name) {
        let mut merged = String::with_capacity(content.len() + method.len());
        merged.push_str(&content[..start]);
        merged.push_str(method);
        merged.push_str(&content[end..]);
        return Some((merged, true));
    }

    let close = content.rfind('}')?;
    let indented = method.replace('\n', "\n    ");
    let mut merged = String::with_capacity(content.len() + indented.len() + 8);
    merged.push_str(&content[..close]);
    merged.push_str("    ");
    merged.push_str(&indented);
    merged.push_str("\n\n");
    merged.push_str(&content[close..]);
    Some((merged, false))
}

/// Writes into the file system, creating the test file when needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTestWriter;

impl TestWriter for FileTestWriter {
    fn write(&self, request: &WriteRequest<'_>) -> Result<WriteOutcome> {
        let code = clean_generated_code(request.test_code);
        if code.is_empty() {
            warn!("generated code has no @Test method; skipping write");
            return Ok(WriteOutcome::Skipped {
                reason: "generated code contained no @Test method".to_string(),
            });
        }
        let Some(method_name) = test_method_name(&code) else {
            warn!("could not find a test method name; skipping write");
            return Ok(WriteOutcome::Skipped {
                reason: "could not determine the test method name".to_string(),
            });
        };

        let path = request.target_path;
        let content = if path.is_file() {
            std::fs::read_to_string(path)?
        } else {
            debug!(path = %path.display(), "creating new test class");
            scaffold_test_class(request.package, request.test_class_name)
        };

        let Some((merged, replaced)) = merge_test_method(&content, &code, &method_name) else {
            warn!(path = %path.display(), "no closing brace to append before; skipping write");
            return Ok(WriteOutcome::Skipped {
                reason: format!("{} has no class body to append to", path.display()),
            });
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, merged)?;
        info!(
            path = %path.display(),
            method = %method_name,
            replaced,
            "wrote test method"
        );
        Ok(WriteOutcome::Written {
            method_name,
            replaced,
        })
    }
}

/// A test file's contents before candidates were written into it. `None`
/// when the file did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFileBackup {
    pub path: PathBuf,
    pub contents: Option<String>,
}

impl TestFileBackup {
    pub fn capture(path: &Path) -> Result<Self> {
        let contents = if path.is_file() {
            Some(std::fs::read_to_string(path)?)
        } else {
            None
        };
        Ok(Self {
            path: path.to_path_buf(),
            contents,
        })
    }

    /// Put the file back as captured, removing it if it did not exist.
    pub fn restore(&self) -> Result<()> {
        match &self.contents {
            Some(contents) => std::fs::write(&self.path, contents)?,
            None if self.path.exists() => std::fs::remove_file(&self.path)?,
            None => {}
        }
        debug!(path = %self.path.display(), "restored test file");
        Ok(())
    }
}
