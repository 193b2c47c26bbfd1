//! Output formatting for coverage summaries and initial-vs-final comparisons.

use std::fmt::Write;

use crate::model::{CounterKind, CoverageCounter, CoverageSnapshot, CoverageSummary};

/// One metric before and after a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub kind: CounterKind,
    pub initial: CoverageCounter,
    pub current: CoverageCounter,
}

impl ComparisonRow {
    pub fn initial_pct(&self) -> f64 {
        self.initial.ratio(self.kind)
    }

    pub fn current_pct(&self) -> f64 {
        self.current.ratio(self.kind)
    }

    pub fn delta(&self) -> f64 {
        self.current_pct() - self.initial_pct()
    }
}

/// Root-level coverage at the start of a run next to the latest figures.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageComparison {
    /// Class the comparison is reported for, e.g. in a pull request body.
    pub target: Option<String>,
    pub rows: Vec<ComparisonRow>,
    /// Classes still needing coverage in the latest snapshot.
    pub classes_remaining: usize,
}

impl CoverageComparison {
    pub fn between(initial: &CoverageSnapshot, current: &CoverageSnapshot) -> Self {
        Self::from_summaries(initial.summary(), current.summary())
            .remaining(current.classes_needing_coverage().count())
    }

    /// Rows for every metric either summary reports, in a fixed order.
    pub fn from_summaries(initial: &CoverageSummary, current: &CoverageSummary) -> Self {
        let rows = CounterKind::ALL
            .into_iter()
            .filter(|k| initial.counters.contains_key(k) || current.counters.contains_key(k))
            .map(|kind| ComparisonRow {
                kind,
                initial: initial.get(kind),
                current: current.get(kind),
            })
            .collect();
        Self {
            target: None,
            rows,
            classes_remaining: 0,
        }
    }

    pub fn for_target(mut self, class_name: impl Into<String>) -> Self {
        self.target = Some(class_name.into());
        self
    }

    fn remaining(mut self, classes: usize) -> Self {
        self.classes_remaining = classes;
        self
    }

    pub fn row(&self, kind: CounterKind) -> Option<&ComparisonRow> {
        self.rows.iter().find(|r| r.kind == kind)
    }

    /// Format using a specific formatter.
    #[must_use]
    pub fn format(&self, formatter: &dyn ReportFormatter) -> String {
        formatter.format(self)
    }
}

/// Trait for formatting coverage comparisons.
pub trait ReportFormatter {
    fn format(&self, report: &CoverageComparison) -> String;
}

fn cell(counter: &CoverageCounter, kind: CounterKind) -> String {
    format!(
        "{:.1}% ({}/{})",
        counter.ratio(kind),
        counter.covered,
        counter.total()
    )
}

fn signed(delta: f64) -> String {
    if delta.abs() < 0.05 {
        "0.0".to_string()
    } else {
        format!("{delta:+.1}")
    }
}

/// Plain text formatter.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &CoverageComparison) -> String {
        let mut out = String::new();
        if let Some(ref target) = report.target {
            writeln!(out, "Coverage after tests for {target}").unwrap();
        }
        if report.rows.is_empty() {
            out.push_str("No coverage data.\n");
            return out;
        }

        writeln!(out, "{:<12} {:>22} {:>22} {:>8}", "Metric", "Initial", "Final", "Change").unwrap();
        for row in &report.rows {
            writeln!(
                out,
                "{:<12} {:>22} {:>22} {:>8}",
                row.kind.label(),
                cell(&row.initial, row.kind),
                cell(&row.current, row.kind),
                signed(row.delta())
            )
            .unwrap();
        }
        writeln!(out, "\nClasses still needing coverage: {}", report.classes_remaining).unwrap();
        out
    }
}

/// Markdown formatter, used for pull request bodies.
pub struct MarkdownFormatter;

impl ReportFormatter for MarkdownFormatter {
    fn format(&self, report: &CoverageComparison) -> String {
        let mut md = String::new();

        match report.row(CounterKind::Instruction) {
            Some(row) => writeln!(
                md,
                "### Instruction coverage: {:.1}% → {:.1}% ({})\n",
                row.initial_pct(),
                row.current_pct(),
                signed(row.delta())
            )
            .unwrap(),
            None => md.push_str("### Coverage report\n\n"),
        }

        if let Some(ref target) = report.target {
            writeln!(md, "Adds generated unit tests for `{target}`.\n").unwrap();
        }

        md.push_str("| Metric | Initial | Final | Change |\n");
        md.push_str("|:-------|--------:|------:|-------:|\n");
        for row in &report.rows {
            writeln!(
                md,
                "| {} | {} | {} | {} |",
                row.kind.label(),
                cell(&row.initial, row.kind),
                cell(&row.current, row.kind),
                signed(row.delta())
            )
            .unwrap();
        }

        md.push('\n');
        writeln!(
            md,
            "<sub>Classes still needing coverage: **{}**</sub>",
            report.classes_remaining
        )
        .unwrap();
        md.push_str("<sub>Generated by covboost</sub>\n");
        md
    }
}

/// Root-level counters of a single report.
pub fn format_summary(summary: &CoverageSummary) -> String {
    let mut out = String::new();
    if summary.is_empty() {
        out.push_str("No coverage data.\n");
        return out;
    }
    for kind in CounterKind::ALL {
        if let Some(counter) = summary.counters.get(&kind) {
            writeln!(
                out,
                "{:<12} {:>6.1}%  ({}/{} covered, {} missed)",
                kind.label(),
                counter.ratio(kind),
                counter.covered,
                counter.total(),
                counter.missed
            )
            .unwrap();
        }
    }
    out
}

/// Coalesce sorted, deduplicated line numbers into `(start, end)` ranges of
/// consecutive lines.
#[must_use]
pub fn coalesce_ranges(lines: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    debug_assert!(
        lines.windows(2).all(|w| w[0] < w[1]),
        "coalesce_ranges requires sorted, deduplicated input"
    );

    let mut ranges = Vec::new();
    let (mut start, mut end) = (first, first);
    for &line in rest {
        if line == end + 1 {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Format line numbers into compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32]) -> String {
    coalesce_ranges(lines)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pairs: &[(CounterKind, u64, u64)]) -> CoverageSummary {
        let mut s = CoverageSummary::default();
        for &(kind, missed, covered) in pairs {
            s.counters.insert(kind, CoverageCounter::new(missed, covered));
        }
        s
    }

    // -- coalesce_ranges / format_line_ranges --------------------------------

    #[test]
    fn test_coalesce_ranges_empty() {
        assert_eq!(coalesce_ranges(&[]), Vec::<(u32, u32)>::new());
    }

    #[test]
    fn test_coalesce_ranges_mixed() {
        assert_eq!(
            coalesce_ranges(&[1, 2, 3, 5, 8, 9]),
            vec![(1, 3), (5, 5), (8, 9)]
        );
    }

    #[test]
    fn test_format_line_ranges() {
        assert_eq!(format_line_ranges(&[]), "");
        assert_eq!(format_line_ranges(&[5]), "5");
        assert_eq!(format_line_ranges(&[1, 3, 4, 5, 10]), "1, 3-5, 10");
    }

    // -- comparison -----------------------------------------------------------

    #[test]
    fn test_comparison_rows_follow_metric_order() {
        let initial = summary(&[(CounterKind::Line, 5, 5), (CounterKind::Instruction, 50, 50)]);
        let current = summary(&[(CounterKind::Instruction, 20, 80), (CounterKind::Line, 2, 8)]);
        let cmp = CoverageComparison::from_summaries(&initial, &current);
        let kinds: Vec<_> = cmp.rows.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![CounterKind::Instruction, CounterKind::Line]);
        let row = cmp.row(CounterKind::Instruction).unwrap();
        assert_eq!(row.initial_pct(), 50.0);
        assert_eq!(row.current_pct(), 80.0);
        assert!((row.delta() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_branch_counter_reads_as_full() {
        let initial = summary(&[(CounterKind::Branch, 0, 0)]);
        let cmp = CoverageComparison::from_summaries(&initial, &initial);
        assert_eq!(cmp.row(CounterKind::Branch).unwrap().initial_pct(), 100.0);
    }

    #[test]
    fn test_format_text() {
        let initial = summary(&[(CounterKind::Instruction, 10, 10)]);
        let current = summary(&[(CounterKind::Instruction, 5, 15)]);
        let text = CoverageComparison::from_summaries(&initial, &current).format(&TextFormatter);
        assert!(text.contains("Instruction"));
        assert!(text.contains("50.0% (10/20)"));
        assert!(text.contains("75.0% (15/20)"));
        assert!(text.contains("+25.0"));
    }

    #[test]
    fn test_format_text_without_data() {
        let empty = CoverageSummary::default();
        let text = CoverageComparison::from_summaries(&empty, &empty).format(&TextFormatter);
        assert_eq!(text, "No coverage data.\n");
    }

    #[test]
    fn test_format_markdown() {
        let initial = summary(&[(CounterKind::Instruction, 10, 10), (CounterKind::Branch, 2, 2)]);
        let current = summary(&[(CounterKind::Instruction, 0, 20), (CounterKind::Branch, 2, 2)]);
        let md = CoverageComparison::from_summaries(&initial, &current)
            .for_target("com/example/Foo")
            .format(&MarkdownFormatter);
        assert!(md.starts_with("### Instruction coverage: 50.0% → 100.0% (+50.0)"));
        assert!(md.contains("`com/example/Foo`"));
        assert!(md.contains("| Branch | 50.0% (2/4) | 50.0% (2/4) | 0.0 |"));
        assert!(md.contains("Generated by covboost"));
    }

    #[test]
    fn test_format_summary() {
        let s = summary(&[(CounterKind::Instruction, 9, 9), (CounterKind::Branch, 0, 0)]);
        let text = format_summary(&s);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Instruction"));
        assert!(lines[0].contains("50.0%"));
        assert!(lines[1].contains("100.0%"));
        assert_eq!(format_summary(&CoverageSummary::default()), "No coverage data.\n");
    }
}
