//! Deterministic choice of the next class and method to write tests for.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::layout::SourceStore;
use crate::model::{ClassCoverage, CoverageSnapshot, MethodCoverage};
use crate::structure::{StructuralAnalyzer, StructuralFinding};

/// Uncovered lines at or after `declared_line - window`.
pub fn window_uncovered_lines(lines: &BTreeSet<u32>, declared_line: u32, window: u32) -> BTreeSet<u32> {
    lines
        .range(declared_line.saturating_sub(window)..)
        .copied()
        .collect()
}

/// A class picked for work, with the files it needs resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetClass {
    pub class: ClassCoverage,
    pub source_text: Option<String>,
    /// Structural findings for methods touching uncovered lines.
    pub findings: BTreeMap<String, StructuralFinding>,
}

impl TargetClass {
    /// Needy methods in declaration order, constructors excluded.
    pub fn candidate_methods(&self) -> impl Iterator<Item = &MethodCoverage> {
        self.class.needy_methods().filter(|m| !m.is_constructor())
    }
}

/// The unit of work handed to test generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMethod {
    pub class_name: String,
    pub source_file: String,
    pub method: MethodCoverage,
    /// Full source of the class.
    pub source_text: String,
    /// Just the method's lines, when they could be located.
    pub method_source: Option<String>,
    pub existing_tests: String,
    pub uncovered_lines: BTreeSet<u32>,
    pub structural_hints: Option<StructuralFinding>,
}

#[derive(Debug)]
pub struct TargetSelector {
    line_window: u32,
    analyzer: StructuralAnalyzer,
    structural_hints: bool,
}

impl TargetSelector {
    pub fn new(line_window: u32) -> Self {
        Self {
            line_window,
            analyzer: StructuralAnalyzer::new(),
            structural_hints: true,
        }
    }

    pub fn structural_hints(mut self, enabled: bool) -> Self {
        self.structural_hints = enabled;
        self
    }

    /// The first class needing coverage, in report order, that is not in
    /// `visited`; its name is added to `visited`. `None` once every needy
    /// class has been handed out.
    pub fn select_next_class(
        &self,
        snapshot: &CoverageSnapshot,
        visited: &mut BTreeSet<String>,
        store: &dyn SourceStore,
    ) -> Result<Option<TargetClass>> {
        let Some(class) = snapshot
            .classes_needing_coverage()
            .find(|c| !visited.contains(&c.name))
        else {
            debug!(visited = visited.len(), "no more classes need coverage");
            return Ok(None);
        };
        visited.insert(class.name.clone());
        info!(class = %class.name, uncovered = class.uncovered_lines.len(), "selected target class");

        let source_text = store.read_source(&class.name)?;
        if source_text.is_none() {
            warn!(class = %class.name, "source file not found; continuing with report data only");
        }

        let findings = match (&source_text, self.structural_hints) {
            (Some(source), true) => match self.analyzer.analyze_file(source, &class.uncovered_lines) {
                Ok(analysis) => analysis.findings_by_method(),
                Err(e) => {
                    warn!(class = %class.name, error = %e, "structural analysis failed; no hints for this class");
                    BTreeMap::new()
                }
            },
            _ => BTreeMap::new(),
        };

        Ok(Some(TargetClass {
            class: class.clone(),
            source_text,
            findings,
        }))
    }

    /// The first needy non-constructor method of the class whose key is not
    /// in `visited`; its key is added to `visited`. `None` once the class is
    /// exhausted. Needs and uncovered lines come from `target.class`, so a
    /// refreshed class drops methods that have since been covered.
    pub fn select_next_method(
        &self,
        target: &TargetClass,
        visited: &mut BTreeSet<String>,
        store: &dyn SourceStore,
    ) -> Result<Option<TargetMethod>> {
        let Some(method) = target
            .candidate_methods()
            .find(|m| !visited.contains(&m.key()))
        else {
            debug!(class = %target.class.name, "all methods processed");
            return Ok(None);
        };
        visited.insert(method.key());

        let uncovered_lines =
            window_uncovered_lines(&target.class.uncovered_lines, method.line, self.line_window);
        let source_text = target.source_text.clone().unwrap_or_default();
        let method_source = if source_text.is_empty() {
            None
        } else {
            self.analyzer.method_source(&source_text, &method.name)
        };
        let existing_tests = store.read_tests(&target.class.name)?.unwrap_or_default();

        info!(
            class = %target.class.name,
            method = %method.name,
            line = method.line,
            uncovered = ?uncovered_lines,
            "selected target method"
        );

        Ok(Some(TargetMethod {
            class_name: target.class.name.clone(),
            source_file: target.class.source_file.clone(),
            method: method.clone(),
            source_text,
            method_source,
            existing_tests,
            uncovered_lines,
            structural_hints: target.findings.get(&method.name).cloned(),
        }))
    }
}
