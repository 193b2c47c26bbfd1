//! Narrow contracts for the external services the workflow drives, with
//! default implementations backed by Maven, git, GitHub and user-supplied
//! commands.

pub mod command;
pub mod git;
pub mod github;
pub mod maven;
pub mod process;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::selector::TargetMethod;

/// Substituted when the generator returns nothing, so the attempt still
/// flows through the run/retry path as a failing candidate.
pub const PLACEHOLDER_TEST_CODE: &str =
    "// Error: the generation service returned no test code for this method.";

pub trait Vcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
    fn create_branch(&self, repo: &Path, branch: &str) -> Result<()>;
    fn commit_all(&self, repo: &Path, message: &str) -> Result<()>;
    fn push(&self, repo: &Path, branch: &str) -> Result<()>;
}

/// Produces a fresh coverage report for a project and returns its path.
pub trait ReportGenerator {
    fn generate(&self, project_root: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub output: String,
    pub success: bool,
}

pub trait TestRunner {
    fn run_tests(&self, project_root: &Path, test_class: Option<&str>) -> Result<TestRun>;
}

/// Everything a generator is told about the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub class_name: String,
    pub method_name: String,
    pub source_code: String,
    pub method_source: Option<String>,
    pub existing_tests: String,
    pub uncovered_lines: Vec<u32>,
    pub structural_hints: Option<String>,
    pub rejection_reason: Option<String>,
}

impl GenerationRequest {
    pub fn for_target(target: &TargetMethod, rejection_reason: Option<String>) -> Self {
        Self {
            class_name: target.class_name.clone(),
            method_name: target.method.name.clone(),
            source_code: target.source_text.clone(),
            method_source: target.method_source.clone(),
            existing_tests: target.existing_tests.clone(),
            uncovered_lines: target.uncovered_lines.iter().copied().collect(),
            structural_hints: target.structural_hints.as_ref().map(|f| f.render()),
            rejection_reason,
        }
    }
}

pub trait TestGenerator {
    /// Raw candidate test code. May be empty; the caller substitutes
    /// `PLACEHOLDER_TEST_CODE`.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: String,
}

impl QualityVerdict {
    pub fn approved(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Approved,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Rejected,
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Approved
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub class_name: String,
    pub method_name: String,
    pub source_code: String,
    pub existing_tests: String,
    pub uncovered_lines: Vec<u32>,
    pub test_code: String,
}

pub trait TestReviewer {
    fn review(&self, request: &ReviewRequest) -> Result<QualityVerdict>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

pub trait PullRequests {
    fn open_pull_request(&self, title: &str, body: &str, head_branch: &str) -> Result<PullRequest>;
}
