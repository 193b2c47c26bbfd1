//! Per-run progress, mutated only by workflow transitions and persisted
//! after each one.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::failures::TestFailure;
use crate::model::CoverageSnapshot;
use crate::selector::{TargetClass, TargetMethod};
use crate::tools::{PullRequest, QualityVerdict};
use crate::writer::TestFileBackup;

/// The next transition to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Clone,
    AnalyzeCoverage,
    SelectClass,
    CreateBranch,
    SelectMethod,
    GenerateTest,
    WriteTest,
    RunTest,
    HandleFailure,
    CreatePr,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Clone => "CLONE",
            Step::AnalyzeCoverage => "ANALYZE_COVERAGE",
            Step::SelectClass => "SELECT_CLASS",
            Step::CreateBranch => "CREATE_BRANCH",
            Step::SelectMethod => "SELECT_METHOD",
            Step::GenerateTest => "GENERATE_TEST",
            Step::WriteTest => "WRITE_TEST",
            Step::RunTest => "RUN_TEST",
            Step::HandleFailure => "HANDLE_FAILURE",
            Step::CreatePr => "CREATE_PR",
            Step::Done => "DONE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        const ALL: [Step; 11] = [
            Step::Clone,
            Step::AnalyzeCoverage,
            Step::SelectClass,
            Step::CreateBranch,
            Step::SelectMethod,
            Step::GenerateTest,
            Step::WriteTest,
            Step::RunTest,
            Step::HandleFailure,
            Step::CreatePr,
            Step::Done,
        ];
        ALL.into_iter().find(|s| s.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    /// `None` when working on an existing checkout.
    pub repo_url: Option<String>,
    pub repo_path: PathBuf,
    pub step: Step,

    /// First snapshot of the run. Set once.
    pub initial_coverage: Option<CoverageSnapshot>,
    pub current_coverage: Option<CoverageSnapshot>,
    pub final_coverage: Option<CoverageSnapshot>,

    /// Classes already handed out, by name.
    pub visited_classes: BTreeSet<String>,
    /// Methods of the current class already handed out, by `MethodCoverage::key`.
    pub visited_methods: BTreeSet<String>,
    pub current_class: Option<TargetClass>,
    pub current_target: Option<TargetMethod>,

    /// Latest generated test code for the current target.
    pub candidate: Option<String>,
    /// Generation attempts for the current method.
    pub attempts: u32,
    pub failures: Vec<TestFailure>,
    pub quality_verdict: Option<QualityVerdict>,
    /// Feedback for the next generation, or why the current candidate was
    /// not placed.
    pub rejection_reason: Option<String>,
    /// Tests accepted for the current class.
    pub accepted_tests: u32,
    /// The test file as it was before the current method's first candidate.
    pub test_backup: Option<TestFileBackup>,

    pub branch_name: Option<String>,
    pub pull_requests: Vec<PullRequest>,
    pub error_message: Option<String>,
    pub transitions: u64,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, repo_url: Option<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            repo_url,
            repo_path: repo_path.into(),
            step: Step::Clone,
            initial_coverage: None,
            current_coverage: None,
            final_coverage: None,
            visited_classes: BTreeSet::new(),
            visited_methods: BTreeSet::new(),
            current_class: None,
            current_target: None,
            candidate: None,
            attempts: 0,
            failures: Vec::new(),
            quality_verdict: None,
            rejection_reason: None,
            accepted_tests: 0,
            test_backup: None,
            branch_name: None,
            pull_requests: Vec::new(),
            error_message: None,
            transitions: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.step == Step::Done
    }

    /// Make `snapshot` current; the first one recorded also becomes the
    /// initial coverage.
    pub fn record_snapshot(&mut self, snapshot: CoverageSnapshot) {
        if self.initial_coverage.is_none() {
            self.initial_coverage = Some(snapshot.clone());
        }
        self.current_coverage = Some(snapshot);
    }

    /// Point the class in progress at its entry in the current snapshot, so
    /// method selection sees which methods are still needy and which lines
    /// are still uncovered.
    pub fn refresh_current_class(&mut self) {
        let (Some(target), Some(snapshot)) = (self.current_class.as_mut(), self.current_coverage.as_ref())
        else {
            return;
        };
        match snapshot.class(&target.class.name) {
            Some(fresh) => target.class = fresh.clone(),
            None => warn!(class = %target.class.name, "class missing from the new report; keeping its old coverage"),
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(run = %self.run_id, step = %self.step, error = %message, "recorded error");
        self.error_message = Some(message);
    }

    /// Forget everything tied to the current method.
    pub fn clear_target(&mut self) {
        self.current_target = None;
        self.candidate = None;
        self.attempts = 0;
        self.failures.clear();
        self.quality_verdict = None;
        self.rejection_reason = None;
        self.test_backup = None;
    }
}
