//! Command handler functions for the covboost CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use rusqlite::Connection;

use crate::config::Config;
use crate::error::Result as CovboostResult;
use crate::failures::parse_failures;
use crate::layout::{FsSourceStore, SourceLayout, SourceStore};
use crate::report::{
    format_line_ranges, format_summary, CoverageComparison, MarkdownFormatter, ReportFormatter,
    TextFormatter,
};
use crate::selector::TargetSelector;
use crate::structure::StructuralAnalyzer;
use crate::workflow::{checkpoint, RunState, WorkflowEngine};
use crate::{ingest, model::CounterKind};

/// Output style for `status`.
#[derive(Clone, Copy, ValueEnum)]
pub enum Style {
    Text,
    Markdown,
}

impl Style {
    fn formatter(self) -> &'static dyn ReportFormatter {
        match self {
            Style::Text => &TextFormatter,
            Style::Markdown => &MarkdownFormatter,
        }
    }
}

/// Source store for when no project checkout is available.
struct NoSources;

impl SourceStore for NoSources {
    fn read_source(&self, _class_name: &str) -> CovboostResult<Option<String>> {
        Ok(None)
    }

    fn read_tests(&self, _class_name: &str) -> CovboostResult<Option<String>> {
        Ok(None)
    }
}

fn lines_of(lines: &BTreeSet<u32>) -> String {
    let v: Vec<u32> = lines.iter().copied().collect();
    if v.is_empty() {
        "-".to_string()
    } else {
        format_line_ranges(&v)
    }
}

/// Parse `"6-8,20"` into a set of line numbers.
pub fn parse_line_spec(spec: &str) -> Result<BTreeSet<u32>> {
    let mut lines = BTreeSet::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().with_context(|| format!("bad line range '{part}'"))?;
                let end: u32 = end.trim().parse().with_context(|| format!("bad line range '{part}'"))?;
                if start > end {
                    bail!("bad line range '{part}': start is after end");
                }
                lines.extend(start..=end);
            }
            None => {
                lines.insert(part.parse().with_context(|| format!("bad line number '{part}'"))?);
            }
        }
    }
    Ok(lines)
}

pub fn cmd_summary(report: &Path) -> Result<String> {
    let snapshot = ingest::load_snapshot(report)?;
    let mut out = String::new();
    writeln!(
        out,
        "Classes:     {} ({} need coverage)",
        snapshot.classes.len(),
        snapshot.classes_needing_coverage().count()
    )
    .unwrap();
    out.push_str(&format_summary(snapshot.summary()));
    Ok(out)
}

/// What the selector would hand out, class by class, without running
/// anything.
pub fn cmd_targets(config: &Config, report: &Path, project: Option<&Path>) -> Result<String> {
    let snapshot = ingest::load_snapshot(report)?;
    let selector = TargetSelector::new(config.workflow.line_window)
        .structural_hints(config.workflow.structural_hints && project.is_some());
    let store: Box<dyn SourceStore> = match project {
        Some(root) => Box::new(FsSourceStore::new(SourceLayout::new(root, &config.project))),
        None => Box::new(NoSources),
    };

    let mut out = String::new();
    let mut visited_classes = BTreeSet::new();
    while let Some(class) = selector.select_next_class(&snapshot, &mut visited_classes, store.as_ref())? {
        writeln!(
            out,
            "{} ({})  instructions {:.1}%  uncovered: {}",
            class.class.name,
            class.class.source_file,
            class.class.instruction.ratio(CounterKind::Instruction),
            lines_of(&class.class.uncovered_lines)
        )
        .unwrap();

        let mut visited_methods = BTreeSet::new();
        while let Some(target) = selector.select_next_method(&class, &mut visited_methods, store.as_ref())? {
            let method = &target.method;
            write!(
                out,
                "  {}{} (line {})  missed instructions {}, missed branches {}  lines: {}",
                method.name,
                method.descriptor.as_deref().unwrap_or(""),
                method.line,
                method.instruction.missed,
                method.branches_missed(),
                lines_of(&target.uncovered_lines)
            )
            .unwrap();
            if let Some(hints) = &target.structural_hints {
                write!(
                    out,
                    "  complexity {}, {} test(s) suggested",
                    hints.complexity, hints.recommended_test_count
                )
                .unwrap();
            }
            out.push('\n');
        }
    }

    if out.is_empty() {
        out.push_str("No classes need coverage.\n");
    }
    Ok(out)
}

pub fn cmd_analyze(source: &str, method: Option<&str>, lines: Option<&str>) -> Result<String> {
    let analyzer = StructuralAnalyzer::new();
    let methods = match method {
        Some(name) => vec![analyzer.analyze_method(source, name)?],
        None => {
            let uncovered = match lines {
                Some(spec) => parse_line_spec(spec)?,
                None => (1..=source.lines().count() as u32).collect(),
            };
            analyzer.analyze_file(source, &uncovered)?.methods
        }
    };

    if methods.is_empty() {
        return Ok("No methods touch the given lines.\n".to_string());
    }

    let mut out = String::new();
    for analysis in &methods {
        writeln!(
            out,
            "{} {}({}) lines {}-{}",
            analysis.return_type,
            analysis.name,
            analysis.parameters.join(", "),
            analysis.start_line,
            analysis.end_line
        )
        .unwrap();
        if !analysis.throws.is_empty() {
            writeln!(out, "  throws {}", analysis.throws.join(", ")).unwrap();
        }
        for branch in &analysis.branches {
            writeln!(
                out,
                "  {} at lines {}-{}",
                branch.kind.label(),
                branch.start_line,
                branch.end_line
            )
            .unwrap();
        }
        for line in analyzer.suggest(analysis).render().lines() {
            writeln!(out, "  {line}").unwrap();
        }
    }
    Ok(out)
}

pub fn cmd_failures(output: &str) -> String {
    let failures = parse_failures(output);
    if failures.is_empty() {
        return "No test failures found.\n".to_string();
    }
    let mut out = String::new();
    for failure in &failures {
        writeln!(out, "{}", failure.test_name).unwrap();
        for line in failure.message.lines().skip(1) {
            writeln!(out, "    {line}").unwrap();
        }
    }
    writeln!(out, "({} failures)", failures.len()).unwrap();
    out
}

/// Progress of a run and its coverage so far.
pub fn format_run(state: &RunState, style: Style) -> String {
    let mut out = String::new();
    writeln!(out, "Run:          {}", state.run_id).unwrap();
    writeln!(out, "Next step:    {}", state.step).unwrap();
    writeln!(out, "Transitions:  {}", state.transitions).unwrap();
    writeln!(out, "Classes seen: {}", state.visited_classes.len()).unwrap();
    if let Some(class) = &state.current_class {
        writeln!(
            out,
            "Class:        {} ({} methods seen)",
            class.class.name,
            state.visited_methods.len()
        )
        .unwrap();
    }
    if let Some(target) = &state.current_target {
        writeln!(out, "Method:       {} (attempt {})", target.method.name, state.attempts).unwrap();
    }
    if let Some(branch) = &state.branch_name {
        writeln!(out, "Branch:       {branch}").unwrap();
    }
    for pr in &state.pull_requests {
        writeln!(out, "Pull request: #{} {}", pr.number, pr.url).unwrap();
    }
    if let Some(error) = &state.error_message {
        writeln!(out, "Last error:   {error}").unwrap();
    }

    let latest = state.final_coverage.as_ref().or(state.current_coverage.as_ref());
    if let (Some(initial), Some(latest)) = (&state.initial_coverage, latest) {
        out.push('\n');
        out.push_str(&CoverageComparison::between(initial, latest).format(style.formatter()));
    }
    out
}

pub fn cmd_status(conn: &Connection, run_id: &str, style: Style) -> Result<String> {
    let state = checkpoint::load_latest(conn, run_id)?
        .with_context(|| format!("no run named '{run_id}'"))?;
    Ok(format_run(&state, style))
}

pub fn cmd_runs(conn: &Connection) -> Result<String> {
    let runs = checkpoint::list_runs(conn)?;
    if runs.is_empty() {
        return Ok("No runs in database.\n".to_string());
    }
    let mut out = String::new();
    writeln!(out, "{:<24} {:<18} {:<40} UPDATED", "RUN", "STEP", "REPOSITORY").unwrap();
    writeln!(out, "{}", "-".repeat(110)).unwrap();
    for run in &runs {
        writeln!(
            out,
            "{:<24} {:<18} {:<40} {}",
            run.name, run.step, run.repo, run.updated_at
        )
        .unwrap();
    }
    Ok(out)
}

/// Register and drive a new run to completion.
pub fn cmd_run(engine: &mut WorkflowEngine, state: RunState) -> Result<String> {
    let state = engine.start(state)?;
    let state = engine.run(state)?;
    Ok(format_run(&state, Style::Text))
}

pub fn cmd_resume(engine: &mut WorkflowEngine, run_id: &str) -> Result<String> {
    let state = engine.load(run_id)?;
    let state = engine.run(state)?;
    Ok(format_run(&state, Style::Text))
}
