//! Lexical rules that turn a condition's text into suggested test variants.
//!
//! The table is deliberately shallow: each rule looks at the raw condition
//! text and contributes a fixed list of labels. Rules run in order and their
//! labels are concatenated.

use std::fmt;

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// One `{predicate over condition text -> variant labels}` entry.
pub struct VariantRule {
    name: String,
    predicate: Predicate,
    variants: Vec<String>,
}

impl VariantRule {
    pub fn new<F>(name: impl Into<String>, predicate: F, variants: &[&str]) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn matches(&self, condition: &str) -> bool {
        (self.predicate)(condition)
    }
}

impl fmt::Debug for VariantRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantRule")
            .field("name", &self.name)
            .field("variants", &self.variants)
            .finish_non_exhaustive()
    }
}

/// Ordered rule table.
#[derive(Debug)]
pub struct VariantRules {
    rules: Vec<VariantRule>,
}

impl VariantRules {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Equality, relational comparison, null checks and length checks.
    pub fn builtin() -> Self {
        let mut rules = Self::empty();
        rules.push(VariantRule::new(
            "equality",
            |c| c.contains("=="),
            &["equal case", "non-equal case"],
        ));
        rules.push(VariantRule::new(
            "comparison",
            |c| c.contains('>') || c.contains('<'),
            &["boundary case", "extreme value"],
        ));
        rules.push(VariantRule::new(
            "null",
            |c| c.to_lowercase().contains("null"),
            &["null case"],
        ));
        rules.push(VariantRule::new(
            "length",
            |c| c.to_lowercase().contains("length"),
            &["empty", "single element", "multiple elements"],
        ));
        rules
    }

    pub fn push(&mut self, rule: VariantRule) {
        self.rules.push(rule);
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Labels from every matching rule, in table order.
    pub fn variants_for(&self, condition: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(condition))
            .flat_map(|rule| rule.variants.iter().cloned())
            .collect()
    }
}

impl Default for VariantRules {
    fn default() -> Self {
        Self::builtin()
    }
}
