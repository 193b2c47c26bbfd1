//! Syntax-tree facts about Java methods: branch constructs, conditions and a
//! coarse cyclomatic complexity, narrowed to the methods that contain
//! uncovered lines.

pub mod fallback;
pub mod rules;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{CovboostError, Result};
use rules::VariantRules;

const METHOD_KIND: &str = "method_declaration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    If,
    Switch,
    For,
    While,
}

impl BranchKind {
    fn from_node_kind(kind: &str) -> Option<Self> {
        match kind {
            "if_statement" => Some(BranchKind::If),
            "switch_expression" | "switch_statement" => Some(BranchKind::Switch),
            "for_statement" | "enhanced_for_statement" => Some(BranchKind::For),
            "while_statement" => Some(BranchKind::While),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BranchKind::If => "If",
            BranchKind::Switch => "Switch",
            BranchKind::For => "For",
            BranchKind::While => "While",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConstruct {
    pub kind: BranchKind,
    pub start_line: u32,
    pub end_line: u32,
    /// Text of the construct's condition slot, when it has one.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionExpr {
    pub text: String,
    pub line: u32,
}

/// Everything the analyzer knows about one method declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAnalysis {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parameters: Vec<String>,
    pub return_type: String,
    pub throws: Vec<String>,
    pub branches: Vec<BranchConstruct>,
    pub conditions: Vec<ConditionExpr>,
    pub complexity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioFocus {
    BranchCoverage,
    EdgeCase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScenario {
    pub name: String,
    pub focus: ScenarioFocus,
    pub line: u32,
    pub condition: Option<String>,
    pub variants: Vec<String>,
}

/// Suggested tests for one analyzed method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralFinding {
    pub method: String,
    pub branches: Vec<BranchConstruct>,
    pub conditions: Vec<ConditionExpr>,
    pub complexity: u32,
    pub recommended_test_count: u32,
    pub scenarios: Vec<TestScenario>,
}

impl StructuralFinding {
    /// Short plain-text rendering for inclusion in a generation request.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Method {}: complexity {}, {} branch(es), aim for {} test(s)\n",
            self.method,
            self.complexity,
            self.branches.len(),
            self.recommended_test_count
        );
        for scenario in &self.scenarios {
            out.push_str(&format!("- {} (line {})", scenario.name, scenario.line));
            if let Some(cond) = &scenario.condition {
                out.push_str(&format!(" on `{cond}`"));
            }
            if !scenario.variants.is_empty() {
                out.push_str(&format!(": {}", scenario.variants.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub methods: Vec<MethodAnalysis>,
    pub suggestions: Vec<StructuralFinding>,
}

impl FileAnalysis {
    /// Findings keyed by method name. When two findings share a name the
    /// first one is kept.
    pub fn findings_by_method(&self) -> BTreeMap<String, StructuralFinding> {
        let mut map = BTreeMap::new();
        for finding in &self.suggestions {
            map.entry(finding.method.clone())
                .or_insert_with(|| finding.clone());
        }
        map
    }
}

/// Java structural analyzer. Stateless apart from its variant rule table;
/// each call parses the source it is given.
#[derive(Debug, Default)]
pub struct StructuralAnalyzer {
    rules: VariantRules,
}

impl StructuralAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(&self, source: &str) -> Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_java::LANGUAGE.into())
            .map_err(|e| CovboostError::Parse(format!("cannot load Java grammar: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| CovboostError::Parse("parser produced no tree".to_string()))?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(0);
            return Err(CovboostError::Parse(format!("syntax error near line {line}")));
        }
        Ok(tree)
    }

    /// Analyze the first method named `method_name` in document order.
    pub fn analyze_method(&self, source: &str, method_name: &str) -> Result<MethodAnalysis> {
        let tree = self.parse(source)?;
        let node = find_method(tree.root_node(), source, method_name)
            .ok_or_else(|| CovboostError::MethodNotFound(method_name.to_string()))?;
        Ok(describe_method(node, source))
    }

    /// Analyze every method whose line range intersects `uncovered_lines`.
    pub fn analyze_file(&self, source: &str, uncovered_lines: &BTreeSet<u32>) -> Result<FileAnalysis> {
        let tree = self.parse(source)?;
        let root = tree.root_node();

        let mut declarations = Vec::new();
        collect_methods(root, &mut declarations);

        let mut seen = HashSet::new();
        let mut analysis = FileAnalysis::default();
        for decl in declarations {
            let Some(name) = method_name(decl, source) else {
                continue;
            };
            let (start, end) = line_span(decl);
            if uncovered_lines.range(start..=end).next().is_none() || !seen.insert(name) {
                continue;
            }
            // Overloads are not told apart; the first declaration wins.
            let Some(first) = find_method(root, source, name) else {
                continue;
            };
            let method = describe_method(first, source);
            debug!(
                method = %method.name,
                branches = method.branches.len(),
                complexity = method.complexity,
                "analyzed method"
            );
            analysis.suggestions.push(self.suggest(&method));
            analysis.methods.push(method);
        }
        Ok(analysis)
    }

    /// Derive suggested test scenarios for an analyzed method.
    pub fn suggest(&self, method: &MethodAnalysis) -> StructuralFinding {
        let mut scenarios = Vec::new();
        for branch in &method.branches {
            scenarios.push(TestScenario {
                name: format!("test{}Condition_Line{}", branch.kind.label(), branch.start_line),
                focus: ScenarioFocus::BranchCoverage,
                line: branch.start_line,
                condition: branch.condition.clone(),
                variants: branch
                    .condition
                    .as_deref()
                    .map(|c| self.rules.variants_for(c))
                    .unwrap_or_default(),
            });
        }
        for cond in &method.conditions {
            scenarios.push(TestScenario {
                name: format!("testEdgeCases_Line{}", cond.line),
                focus: ScenarioFocus::EdgeCase,
                line: cond.line,
                condition: Some(cond.text.clone()),
                variants: self.rules.variants_for(&cond.text),
            });
        }

        let branch_count = u32::try_from(method.branches.len()).unwrap_or(u32::MAX);
        StructuralFinding {
            method: method.name.clone(),
            branches: method.branches.clone(),
            conditions: method.conditions.clone(),
            complexity: method.complexity,
            recommended_test_count: method.complexity.max(branch_count.saturating_mul(2)),
            scenarios,
        }
    }

    /// Source text of a method, from its first to its last line. Falls back
    /// to brace counting when the file does not parse.
    pub fn method_source(&self, source: &str, method_name: &str) -> Option<String> {
        match self.analyze_method(source, method_name) {
            Ok(method) => {
                let start = method.start_line.saturating_sub(1) as usize;
                let len = (method.end_line + 1 - method.start_line) as usize;
                Some(source.lines().skip(start).take(len).collect::<Vec<_>>().join("\n"))
            }
            Err(e) => {
                warn!(method = method_name, error = %e, "falling back to brace-counting extraction");
                fallback::extract_method(source, method_name)
            }
        }
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn line_span(node: Node<'_>) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

fn method_name<'a>(node: Node<'_>, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name("name").map(|n| node_text(n, source))
}

fn first_error_line(node: Node<'_>) -> Option<u32> {
    if node.is_error() || node.is_missing() {
        return Some(line_span(node).0);
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .filter(|child| child.has_error())
        .find_map(first_error_line);
    found
}

/// Depth-first search for the first method declaration with this name.
fn find_method<'t>(node: Node<'t>, source: &str, name: &str) -> Option<Node<'t>> {
    if node.kind() == METHOD_KIND && method_name(node, source) == Some(name) {
        return Some(node);
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find_map(|child| find_method(child, source, name));
    found
}

fn collect_methods<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if node.kind() == METHOD_KIND {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_methods(child, out);
    }
}

fn describe_method(node: Node<'_>, source: &str) -> MethodAnalysis {
    let (start_line, end_line) = line_span(node);

    let parameters = node
        .child_by_field_name("parameters")
        .map(|params| {
            let mut cursor = params.walk();
            params
                .named_children(&mut cursor)
                .filter(|p| matches!(p.kind(), "formal_parameter" | "spread_parameter"))
                .map(|p| node_text(p, source).to_string())
                .collect()
        })
        .unwrap_or_default();

    let return_type = node
        .child_by_field_name("type")
        .map(|t| node_text(t, source).to_string())
        .unwrap_or_else(|| "void".to_string());

    let mut throws = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor).filter(|c| c.kind() == "throws") {
        let mut inner = child.walk();
        throws.extend(
            child
                .named_children(&mut inner)
                .map(|t| node_text(t, source).to_string()),
        );
    }

    let mut branches = Vec::new();
    let mut conditions = Vec::new();
    let mut complexity = 1;
    if let Some(body) = node.child_by_field_name("body") {
        collect_branches(body, source, &mut branches);
        collect_conditions(body, source, &mut conditions);
        complexity += decision_points(body);
    }

    MethodAnalysis {
        name: method_name(node, source).unwrap_or_default().to_string(),
        start_line,
        end_line,
        parameters,
        return_type,
        throws,
        branches,
        conditions,
        complexity,
    }
}

fn collect_branches(node: Node<'_>, source: &str, out: &mut Vec<BranchConstruct>) {
    if let Some(kind) = BranchKind::from_node_kind(node.kind()) {
        let (start_line, end_line) = line_span(node);
        out.push(BranchConstruct {
            kind,
            start_line,
            end_line,
            condition: node
                .child_by_field_name("condition")
                .map(|c| node_text(c, source).to_string()),
        });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_branches(child, source, out);
    }
}

/// Binary or parenthesized expressions sitting directly in a branch
/// construct's condition slot.
fn collect_conditions(node: Node<'_>, source: &str, out: &mut Vec<ConditionExpr>) {
    if matches!(node.kind(), "binary_expression" | "parenthesized_expression") {
        let in_condition_slot = node.parent().is_some_and(|parent| {
            BranchKind::from_node_kind(parent.kind()).is_some()
                && parent.child_by_field_name("condition") == Some(node)
        });
        if in_condition_slot {
            out.push(ConditionExpr {
                text: node_text(node, source).to_string(),
                line: line_span(node).0,
            });
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_conditions(child, source, out);
    }
}

/// Branch constructs, catch clauses and binary expressions under `node`.
fn decision_points(node: Node<'_>) -> u32 {
    let own = u32::from(
        BranchKind::from_node_kind(node.kind()).is_some()
            || matches!(node.kind(), "catch_clause" | "binary_expression"),
    );
    let mut cursor = node.walk();
    let nested: u32 = node.children(&mut cursor).map(decision_points).sum();
    own + nested
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALC: &str = r#"package com.example;

public class Calc {
    public Calc() {}

    public int clamp(int value, int max) throws IllegalArgumentException {
        if (value > max) {
            return max;
        }
        for (int i = 0; i < 3; i++) {
            value += i;
        }
        return value;
    }

    public String describe(String s) {
        if (s == null || s.length() == 0) {
            return "empty";
        }
        try {
            return s.trim();
        } catch (RuntimeException e) {
            return "?";
        }
    }
}
"#;

    #[test]
    fn test_analyze_method_signature() {
        let m = StructuralAnalyzer::new().analyze_method(CALC, "clamp").unwrap();
        assert_eq!(m.name, "clamp");
        assert_eq!((m.start_line, m.end_line), (6, 14));
        assert_eq!(m.parameters, vec!["int value", "int max"]);
        assert_eq!(m.return_type, "int");
        assert_eq!(m.throws, vec!["IllegalArgumentException"]);
    }

    #[test]
    fn test_analyze_method_branches_and_complexity() {
        let m = StructuralAnalyzer::new().analyze_method(CALC, "clamp").unwrap();
        let kinds: Vec<_> = m.branches.iter().map(|b| b.kind).collect();
        assert_eq!(kinds, vec![BranchKind::If, BranchKind::For]);
        assert_eq!((m.branches[0].start_line, m.branches[0].end_line), (7, 9));
        assert_eq!(m.branches[0].condition.as_deref(), Some("(value > max)"));
        assert_eq!(
            m.conditions[0],
            ConditionExpr { text: "(value > max)".to_string(), line: 7 }
        );
        // 1 + if + for + two binary expressions
        assert_eq!(m.complexity, 5);
    }

    #[test]
    fn test_complexity_counts_catch_clauses() {
        let m = StructuralAnalyzer::new().analyze_method(CALC, "describe").unwrap();
        // 1 + if + catch + `||` + two `==`
        assert_eq!(m.complexity, 6);
        assert_eq!(m.conditions.len(), 1);
        assert_eq!(m.conditions[0].text, "(s == null || s.length() == 0)");
    }

    #[test]
    fn test_method_not_found() {
        let err = StructuralAnalyzer::new().analyze_method(CALC, "missing").unwrap_err();
        assert!(matches!(err, CovboostError::MethodNotFound(ref n) if n == "missing"));
    }

    #[test]
    fn test_constructor_is_not_a_method() {
        let err = StructuralAnalyzer::new().analyze_method(CALC, "Calc").unwrap_err();
        assert!(matches!(err, CovboostError::MethodNotFound(_)));
    }

    #[test]
    fn test_overloads_first_match_wins() {
        let source = "class O {\n    void f(int a) { if (a > 0) { a--; } }\n    void f(String s) { }\n}\n";
        let m = StructuralAnalyzer::new().analyze_method(source, "f").unwrap();
        assert_eq!(m.parameters, vec!["int a"]);
        assert_eq!(m.start_line, 2);
    }

    #[test]
    fn test_parse_error() {
        let source = "public class X {\n    public void broken( {\n        int x = 1;\n    }\n}\n";
        let err = StructuralAnalyzer::new().analyze_method(source, "broken").unwrap_err();
        assert!(matches!(err, CovboostError::Parse(_)), "{err}");
    }

    #[test]
    fn test_analyze_file_scopes_to_uncovered_lines() {
        let analyzer = StructuralAnalyzer::new();

        let analysis = analyzer.analyze_file(CALC, &BTreeSet::from([8, 18])).unwrap();
        let names: Vec<_> = analysis.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["clamp", "describe"]);
        assert_eq!(analysis.suggestions.len(), 2);

        let analysis = analyzer.analyze_file(CALC, &BTreeSet::from([17])).unwrap();
        assert_eq!(analysis.methods.len(), 1);
        assert_eq!(analysis.methods[0].name, "describe");

        // Constructor lines and lines outside any method select nothing.
        let analysis = analyzer.analyze_file(CALC, &BTreeSet::from([1, 4, 40])).unwrap();
        assert!(analysis.methods.is_empty());
    }

    #[test]
    fn test_suggestions() {
        let analyzer = StructuralAnalyzer::new();
        let m = analyzer.analyze_method(CALC, "describe").unwrap();
        let finding = analyzer.suggest(&m);

        assert_eq!(finding.method, "describe");
        assert_eq!(finding.recommended_test_count, 6);
        assert_eq!(finding.scenarios.len(), 2);

        let branch = &finding.scenarios[0];
        assert_eq!(branch.name, "testIfCondition_Line17");
        assert_eq!(branch.focus, ScenarioFocus::BranchCoverage);

        let edge = &finding.scenarios[1];
        assert_eq!(edge.focus, ScenarioFocus::EdgeCase);
        assert_eq!(
            edge.variants,
            vec![
                "equal case",
                "non-equal case",
                "null case",
                "empty",
                "single element",
                "multiple elements"
            ]
        );

        let rendered = finding.render();
        assert!(rendered.contains("complexity 6"));
        assert!(rendered.contains("testIfCondition_Line17"));
    }

    #[test]
    fn test_recommended_count_prefers_branch_pairs() {
        let analyzer = StructuralAnalyzer::new();
        let method = MethodAnalysis {
            name: "loop".into(),
            start_line: 1,
            end_line: 9,
            parameters: vec![],
            return_type: "void".into(),
            throws: vec![],
            branches: vec![
                BranchConstruct { kind: BranchKind::While, start_line: 2, end_line: 3, condition: None },
                BranchConstruct { kind: BranchKind::While, start_line: 4, end_line: 5, condition: None },
            ],
            conditions: vec![],
            complexity: 3,
        };
        assert_eq!(analyzer.suggest(&method).recommended_test_count, 4);
    }

    #[test]
    fn test_findings_by_method() {
        let analysis = StructuralAnalyzer::new()
            .analyze_file(CALC, &BTreeSet::from([8, 18]))
            .unwrap();
        let map = analysis.findings_by_method();
        assert_eq!(map.len(), 2);
        assert_eq!(map["clamp"].complexity, 5);
        assert!(!map.contains_key("Calc"));
    }

    #[test]
    fn test_method_source() {
        let analyzer = StructuralAnalyzer::new();
        let text = analyzer.method_source(CALC, "clamp").unwrap();
        assert!(text.starts_with("    public int clamp("));
        assert!(text.ends_with("        return value;\n    }"));

        let broken = "public class X {\n    public void broken( {\n        int x = 1;\n    }\n}\n";
        let text = analyzer.method_source(broken, "broken").unwrap();
        assert_eq!(text, "    public void broken( {\n        int x = 1;\n    }");
    }
}
