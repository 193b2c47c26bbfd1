//! Typed coverage facts, independent of the report format they came from.
//! Parsers produce a `CoverageSnapshot`, which is immutable once built; a
//! fresh analysis always yields a new snapshot instead of updating an old one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Method names the JVM uses for instance and static initializers.
pub const CONSTRUCTOR_NAMES: [&str; 2] = ["<init>", "<clinit>"];

/// Compute a percentage, returning 0.0 when the total is zero.
#[must_use]
pub fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

/// The metric a counter measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Instruction,
    Branch,
    Line,
    Complexity,
    Method,
    Class,
}

impl CounterKind {
    pub const ALL: [CounterKind; 6] = [
        CounterKind::Instruction,
        CounterKind::Branch,
        CounterKind::Line,
        CounterKind::Complexity,
        CounterKind::Method,
        CounterKind::Class,
    ];

    /// The `type` attribute value used in the report.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Instruction => "INSTRUCTION",
            CounterKind::Branch => "BRANCH",
            CounterKind::Line => "LINE",
            CounterKind::Complexity => "COMPLEXITY",
            CounterKind::Method => "METHOD",
            CounterKind::Class => "CLASS",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CounterKind::Instruction => "Instruction",
            CounterKind::Branch => "Branch",
            CounterKind::Line => "Line",
            CounterKind::Complexity => "Complexity",
            CounterKind::Method => "Method",
            CounterKind::Class => "Class",
        }
    }

    pub fn from_attr(value: &str) -> Option<Self> {
        CounterKind::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{missed, covered}` pair for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCounter {
    pub missed: u64,
    pub covered: u64,
}

impl CoverageCounter {
    pub fn new(missed: u64, covered: u64) -> Self {
        Self { missed, covered }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.missed + self.covered
    }

    /// Coverage percentage for this counter. An empty branch counter is
    /// vacuously fully covered; every other empty counter reports 0.
    #[must_use]
    pub fn ratio(&self, kind: CounterKind) -> f64 {
        if self.total() == 0 && kind == CounterKind::Branch {
            100.0
        } else {
            percent(self.covered, self.total())
        }
    }
}

/// Coverage facts for one method, in report declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCoverage {
    pub name: String,
    /// JVM descriptor, e.g. `(Ljava/lang/String;)Z`.
    pub descriptor: Option<String>,
    pub line: u32,
    pub instruction: CoverageCounter,
    /// Absent for methods without branches.
    pub branch: Option<CoverageCounter>,
    pub lines: CoverageCounter,
    pub complexity: CoverageCounter,
}

impl MethodCoverage {
    pub fn new(name: impl Into<String>, line: u32) -> Self {
        Self {
            name: name.into(),
            descriptor: None,
            line,
            instruction: CoverageCounter::default(),
            branch: None,
            lines: CoverageCounter::default(),
            complexity: CoverageCounter::default(),
        }
    }

    /// Name plus descriptor, e.g. `parse(Ljava/lang/String;)I`. Tells
    /// overloads apart and stays stable across reports of the same build.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{}", self.name, self.descriptor.as_deref().unwrap_or_default())
    }

    #[must_use]
    pub fn branches_missed(&self) -> u64 {
        self.branch.map_or(0, |b| b.missed)
    }

    /// A method needs attention when any instruction or branch is missed.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        self.instruction.missed > 0 || self.branches_missed() > 0
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        CONSTRUCTOR_NAMES.contains(&self.name.as_str())
    }

    #[must_use]
    pub fn instruction_ratio(&self) -> f64 {
        self.instruction.ratio(CounterKind::Instruction)
    }

    #[must_use]
    pub fn branch_ratio(&self) -> f64 {
        self.branch
            .unwrap_or_default()
            .ratio(CounterKind::Branch)
    }
}

/// Coverage facts for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCoverage {
    /// Slash-separated qualified name, e.g. `com/example/Foo`.
    pub name: String,
    pub source_file: String,
    pub methods: Vec<MethodCoverage>,
    /// Lines of the paired source file with at least one missed instruction.
    pub uncovered_lines: BTreeSet<u32>,
    pub instruction: CoverageCounter,
    pub branch: Option<CoverageCounter>,
    pub lines: CoverageCounter,
}

impl ClassCoverage {
    pub fn new(name: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_file: source_file.into(),
            methods: Vec::new(),
            uncovered_lines: BTreeSet::new(),
            instruction: CoverageCounter::default(),
            branch: None,
            lines: CoverageCounter::default(),
        }
    }

    /// Methods with missed instructions or branches, in declaration order.
    pub fn needy_methods(&self) -> impl Iterator<Item = &MethodCoverage> {
        self.methods.iter().filter(|m| m.needs_attention())
    }

    #[must_use]
    pub fn needs_coverage(&self) -> bool {
        self.needy_methods().next().is_some() || !self.uncovered_lines.is_empty()
    }

    /// `Foo` for `com/example/Foo`.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// `com.example` for `com/example/Foo`, `None` for the default package.
    #[must_use]
    pub fn package(&self) -> Option<String> {
        self.name
            .rsplit_once('/')
            .map(|(pkg, _)| pkg.replace('/', "."))
    }
}

/// Report-wide totals, one counter per metric kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub counters: BTreeMap<CounterKind, CoverageCounter>,
}

impl CoverageSummary {
    /// Counter for `kind`, zeroed when the report did not provide one.
    #[must_use]
    pub fn get(&self, kind: CounterKind) -> CoverageCounter {
        self.counters.get(&kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn ratio(&self, kind: CounterKind) -> f64 {
        self.get(kind).ratio(kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// The complete result of parsing one coverage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub classes: Vec<ClassCoverage>,
    pub summary: CoverageSummary,
}

impl CoverageSnapshot {
    /// Root-level totals exactly as the report states them.
    pub fn summary(&self) -> &CoverageSummary {
        &self.summary
    }

    /// Classes needing coverage, in report order.
    pub fn classes_needing_coverage(&self) -> impl Iterator<Item = &ClassCoverage> {
        self.classes.iter().filter(|c| c.needs_coverage())
    }

    pub fn class(&self, name: &str) -> Option<&ClassCoverage> {
        self.classes.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_empty_counters() {
        let empty = CoverageCounter::default();
        assert_eq!(empty.ratio(CounterKind::Instruction), 0.0);
        assert_eq!(empty.ratio(CounterKind::Line), 0.0);
        assert_eq!(empty.ratio(CounterKind::Branch), 100.0);
    }

    #[test]
    fn test_ratio() {
        let c = CoverageCounter::new(1, 3);
        assert_eq!(c.total(), 4);
        assert_eq!(c.ratio(CounterKind::Line), 75.0);
        assert_eq!(c.ratio(CounterKind::Branch), 75.0);
    }

    #[test]
    fn test_method_key_separates_overloads() {
        let mut a = MethodCoverage::new("parse", 10);
        a.descriptor = Some("(Ljava/lang/String;)I".into());
        let mut b = MethodCoverage::new("parse", 20);
        b.descriptor = Some("([B)I".into());
        assert_eq!(a.key(), "parse(Ljava/lang/String;)I");
        assert_ne!(a.key(), b.key());
        assert_eq!(MethodCoverage::new("run", 3).key(), "run");
    }

    #[test]
    fn test_method_needs_attention() {
        let mut m = MethodCoverage::new("foo", 10);
        m.instruction = CoverageCounter::new(0, 5);
        assert!(!m.needs_attention());
        assert_eq!(m.branch_ratio(), 100.0);

        m.branch = Some(CoverageCounter::new(1, 1));
        assert!(m.needs_attention());

        m.branch = None;
        m.instruction = CoverageCounter::new(2, 3);
        assert!(m.needs_attention());
    }

    #[test]
    fn test_constructor_names() {
        assert!(MethodCoverage::new("<init>", 1).is_constructor());
        assert!(MethodCoverage::new("<clinit>", 1).is_constructor());
        assert!(!MethodCoverage::new("init", 1).is_constructor());
    }

    #[test]
    fn test_class_names() {
        let class = ClassCoverage::new("com/example/Foo", "Foo.java");
        assert_eq!(class.simple_name(), "Foo");
        assert_eq!(class.package().as_deref(), Some("com.example"));

        let class = ClassCoverage::new("App", "App.java");
        assert_eq!(class.simple_name(), "App");
        assert_eq!(class.package(), None);
    }

    #[test]
    fn test_class_needs_coverage() {
        let mut class = ClassCoverage::new("a/B", "B.java");
        assert!(!class.needs_coverage());

        class.uncovered_lines.insert(4);
        assert!(class.needs_coverage());

        class.uncovered_lines.clear();
        let mut m = MethodCoverage::new("m", 3);
        m.instruction = CoverageCounter::new(1, 0);
        class.methods.push(m);
        assert!(class.needs_coverage());
    }

    #[test]
    fn test_summary_missing_kind_is_zero() {
        let summary = CoverageSummary::default();
        assert_eq!(summary.get(CounterKind::Method), CoverageCounter::default());
        assert_eq!(summary.ratio(CounterKind::Method), 0.0);
        assert_eq!(summary.ratio(CounterKind::Branch), 100.0);
    }

    #[test]
    fn test_counter_kind_attr() {
        for kind in CounterKind::ALL {
            assert_eq!(CounterKind::from_attr(kind.as_str()), Some(kind));
        }
        assert_eq!(CounterKind::from_attr("bogus"), None);
    }
}
