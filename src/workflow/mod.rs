//! The improvement loop: a state machine that picks targets, drives test
//! generation and execution through the collaborators in `tools`, and
//! checkpoints its `RunState` after every transition.

pub mod checkpoint;
pub mod state;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

pub use state::{RunState, Step};

use crate::config::{Config, ProjectSection, WorkflowSection};
use crate::error::{CovboostError, Result};
use crate::failures::{
    failures_for_run, render_feedback, TestFailure, BUILD_FAILURE, REJECTED_FAILURE,
    TIMEOUT_FAILURE,
};
use crate::ingest;
use crate::layout::{FsSourceStore, SourceLayout};
use crate::report::{CoverageComparison, MarkdownFormatter};
use crate::selector::{TargetMethod, TargetSelector};
use crate::tools::command::{CommandGenerator, CommandReviewer};
use crate::tools::git::GitCli;
use crate::tools::github::GithubClient;
use crate::tools::maven::Maven;
use crate::tools::{
    GenerationRequest, PullRequests, QualityVerdict, ReportGenerator, ReviewRequest,
    TestGenerator, TestReviewer, TestRunner, Vcs, PLACEHOLDER_TEST_CODE,
};
use crate::writer::{FileTestWriter, TestFileBackup, TestWriter, WriteOutcome, WriteRequest};

/// `feature/test-coverage-for-a-b-C-20240131-235959`
pub fn branch_name(class_name: &str, at: NaiveDateTime) -> String {
    format!(
        "feature/test-coverage-for-{}-{}",
        class_name.replace('/', "-"),
        at.format("%Y%m%d-%H%M%S")
    )
}

/// Title of the pull request, also used as the commit message.
pub fn pr_title(class_name: &str) -> String {
    format!("feat(tests): Improve test coverage for {class_name}")
}

/// The external collaborators a run depends on.
pub struct Toolbox {
    pub vcs: Box<dyn Vcs>,
    pub reports: Box<dyn ReportGenerator>,
    pub runner: Box<dyn TestRunner>,
    pub generator: Box<dyn TestGenerator>,
    pub reviewer: Option<Box<dyn TestReviewer>>,
    pub writer: Box<dyn TestWriter>,
    /// Without one, branches are pushed but no pull request is opened.
    pub pull_requests: Option<Box<dyn PullRequests>>,
}

impl Toolbox {
    /// Maven, git, GitHub and the configured generator/reviewer commands.
    pub fn from_config(config: &Config, repo_url: Option<&str>) -> Result<Self> {
        let maven = Maven::new(
            config.tools.maven.clone(),
            Duration::from_secs(config.workflow.test_timeout_secs),
        );
        let command_timeout = Duration::from_secs(config.tools.command_timeout_secs);
        let reviewer: Option<Box<dyn TestReviewer>> = match &config.tools.reviewer {
            Some(argv) => Some(Box::new(
                CommandReviewer::new(argv.clone())?.with_timeout(command_timeout),
            )),
            None => None,
        };
        let pull_requests: Option<Box<dyn PullRequests>> =
            match GithubClient::from_config(&config.github, repo_url) {
                Ok(client) => Some(Box::new(client)),
                Err(e) => {
                    warn!(error = %e, "pull requests disabled");
                    None
                }
            };

        Ok(Self {
            vcs: Box::new(GitCli::new(config.tools.git.clone())),
            reports: Box::new(maven.clone()),
            runner: Box::new(maven),
            generator: Box::new(
                CommandGenerator::new(config.tools.generator.clone())?.with_timeout(command_timeout),
            ),
            reviewer,
            writer: Box::new(FileTestWriter),
            pull_requests,
        })
    }
}

pub struct WorkflowEngine {
    settings: WorkflowSection,
    project: ProjectSection,
    tools: Toolbox,
    selector: TargetSelector,
    conn: Connection,
}

impl WorkflowEngine {
    /// `conn` is the checkpoint database; its schema is created if needed.
    pub fn new(config: &Config, tools: Toolbox, conn: Connection) -> Result<Self> {
        checkpoint::init_schema(&conn)?;
        let selector = TargetSelector::new(config.workflow.line_window)
            .structural_hints(config.workflow.structural_hints);
        Ok(Self {
            settings: config.workflow.clone(),
            project: config.project.clone(),
            tools,
            selector,
            conn,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Register a new run. Fails with `RunConflict` if the id is taken.
    pub fn start(&mut self, state: RunState) -> Result<RunState> {
        checkpoint::start_run(&mut self.conn, &state)?;
        Ok(state)
    }

    /// The latest checkpoint of an unfinished run.
    pub fn load(&self, run_id: &str) -> Result<RunState> {
        let state = checkpoint::load_latest(&self.conn, run_id)?
            .ok_or_else(|| CovboostError::Other(format!("no checkpoint for run '{run_id}'")))?;
        if state.is_finished() {
            return Err(CovboostError::RunConflict(format!(
                "run '{run_id}' has already finished"
            )));
        }
        info!(run = %run_id, step = %state.step, transitions = state.transitions, "resuming run");
        Ok(state)
    }

    /// Step until the terminal state. A fatal error is recorded in the last
    /// checkpoint before it is returned, so the run can be resumed.
    pub fn run(&mut self, mut state: RunState) -> Result<RunState> {
        while !state.is_finished() {
            if let Err(e) = self.step(&mut state) {
                error!(run = %state.run_id, step = %state.step, error = %e, "run aborted");
                state.error_message = Some(e.to_string());
                if let Err(save_err) = checkpoint::save(&mut self.conn, &state) {
                    warn!(error = %save_err, "could not record the failure in the checkpoint");
                }
                return Err(e);
            }
        }
        info!(
            run = %state.run_id,
            transitions = state.transitions,
            pull_requests = state.pull_requests.len(),
            "run finished"
        );
        Ok(state)
    }

    /// Execute the transition named by `state.step` and checkpoint the
    /// result. Returns the new step.
    pub fn step(&mut self, state: &mut RunState) -> Result<Step> {
        let from = state.step;
        let next = match from {
            Step::Clone => self.clone_repo(state)?,
            Step::AnalyzeCoverage => self.analyze_coverage(state)?,
            Step::SelectClass => self.select_class(state)?,
            Step::CreateBranch => self.create_branch(state),
            Step::SelectMethod => self.select_method(state)?,
            Step::GenerateTest => self.generate_test(state),
            Step::WriteTest => self.write_test(state),
            Step::RunTest => self.run_test(state),
            Step::HandleFailure => self.handle_failure(state),
            Step::CreatePr => self.create_pr(state)?,
            Step::Done => return Ok(Step::Done),
        };

        state.step = next;
        state.transitions += 1;
        checkpoint::save(&mut self.conn, state)?;
        info!(
            run = %state.run_id,
            transition = state.transitions,
            from = %from,
            to = %next,
            "transition"
        );
        Ok(next)
    }

    fn layout(&self, repo: &Path) -> SourceLayout {
        SourceLayout::new(repo, &self.project)
    }

    fn clone_repo(&mut self, state: &mut RunState) -> Result<Step> {
        let Some(url) = state.repo_url.clone() else {
            info!(path = %state.repo_path.display(), "using existing checkout");
            return Ok(Step::AnalyzeCoverage);
        };

        let attempts = self.settings.clone_attempts.max(1);
        let delay = Duration::from_secs(self.settings.clone_retry_delay_secs);
        let mut attempt = 1;
        loop {
            match self.tools.vcs.clone_repo(&url, &state.repo_path) {
                Ok(()) => return Ok(Step::AnalyzeCoverage),
                Err(e) if attempt < attempts => {
                    warn!(attempt, attempts, error = %e, "clone failed; retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(url = %url, attempts, "clone failed after all attempts");
                    return Err(e);
                }
            }
        }
    }

    /// Replace the current snapshot with one built from a fresh report. Only
    /// a missing checkout is fatal; any other failure keeps the previous
    /// snapshot and is recorded on the run.
    fn refresh_snapshot(&self, state: &mut RunState) -> Result<()> {
        if !state.repo_path.is_dir() {
            return Err(CovboostError::Other(format!(
                "repository path {} does not exist",
                state.repo_path.display()
            )));
        }

        let result = self
            .tools
            .reports
            .generate(&state.repo_path)
            .and_then(|report| ingest::load_snapshot(&report));
        match result {
            Ok(snapshot) => {
                info!(
                    classes = snapshot.classes.len(),
                    needing_coverage = snapshot.classes_needing_coverage().count(),
                    "coverage analyzed"
                );
                state.record_snapshot(snapshot);
            }
            Err(e) => state.record_error(format!("coverage analysis failed: {e}")),
        }
        Ok(())
    }

    fn analyze_coverage(&mut self, state: &mut RunState) -> Result<Step> {
        self.refresh_snapshot(state)?;
        state.refresh_current_class();
        if state.current_coverage.is_none() {
            error!(run = %state.run_id, "no coverage data available; ending run");
            return Ok(Step::Done);
        }
        // A passing test sends the run back here; the class it belongs to
        // still has methods to work through.
        Ok(if state.current_class.is_some() {
            Step::SelectMethod
        } else {
            Step::SelectClass
        })
    }

    fn select_class(&mut self, state: &mut RunState) -> Result<Step> {
        let store = FsSourceStore::new(self.layout(&state.repo_path));
        let Some(snapshot) = state.current_coverage.as_ref() else {
            return Ok(Step::Done);
        };

        match self
            .selector
            .select_next_class(snapshot, &mut state.visited_classes, &store)?
        {
            Some(class) => {
                state.current_class = Some(class);
                state.visited_methods.clear();
                state.accepted_tests = 0;
                state.branch_name = None;
                state.clear_target();
                Ok(Step::CreateBranch)
            }
            None => {
                state.final_coverage = state.current_coverage.clone();
                info!(run = %state.run_id, "no more classes need coverage");
                Ok(Step::Done)
            }
        }
    }

    fn create_branch(&mut self, state: &mut RunState) -> Step {
        let Some(class) = state.current_class.as_ref() else {
            return Step::SelectClass;
        };
        let name = branch_name(&class.class.name, Local::now().naive_local());
        match self.tools.vcs.create_branch(&state.repo_path, &name) {
            Ok(()) => state.branch_name = Some(name),
            Err(e) => {
                state.branch_name = None;
                state.record_error(format!("failed to create branch {name}: {e}"));
            }
        }
        Step::SelectMethod
    }

    fn select_method(&mut self, state: &mut RunState) -> Result<Step> {
        let store = FsSourceStore::new(self.layout(&state.repo_path));
        let Some(class) = state.current_class.as_ref() else {
            return Ok(Step::SelectClass);
        };

        let next = self
            .selector
            .select_next_method(class, &mut state.visited_methods, &store)?;
        state.clear_target();
        match next {
            Some(target) => {
                state.current_target = Some(target);
                Ok(Step::GenerateTest)
            }
            None => Ok(Step::CreatePr),
        }
    }

    fn generate_test(&mut self, state: &mut RunState) -> Step {
        let Some(target) = state.current_target.as_ref() else {
            return Step::SelectMethod;
        };
        let request = GenerationRequest::for_target(target, state.rejection_reason.clone());

        let generated = self.tools.generator.generate(&request).and_then(|code| {
            if code.trim().is_empty() {
                Err(CovboostError::EmptyGenerationResult)
            } else {
                Ok(code)
            }
        });
        let code = match generated {
            Ok(code) => code,
            Err(e) => {
                warn!(method = %request.method_name, error = %e, "no usable test code; using placeholder");
                PLACEHOLDER_TEST_CODE.to_string()
            }
        };
        debug!(method = %request.method_name, code = %code, "generated candidate");

        state.candidate = Some(code);
        state.quality_verdict = None;
        Step::WriteTest
    }

    fn review(&self, target: &TargetMethod, code: &str) -> Option<QualityVerdict> {
        let reviewer = self.tools.reviewer.as_ref()?;
        let request = ReviewRequest {
            class_name: target.class_name.clone(),
            method_name: target.method.name.clone(),
            source_code: target.source_text.clone(),
            existing_tests: target.existing_tests.clone(),
            uncovered_lines: target.uncovered_lines.iter().copied().collect(),
            test_code: code.to_string(),
        };
        let verdict = reviewer.review(&request).unwrap_or_else(|e| {
            warn!(error = %e, "review failed; rejecting candidate");
            QualityVerdict::rejected(format!("review failed: {e}"))
        });
        info!(method = %target.method.name, approved = verdict.is_approved(), reason = %verdict.reason, "candidate reviewed");
        Some(verdict)
    }

    /// Existing test file for the class, or where a new one goes.
    fn test_file_path(&self, repo: &Path, class_name: &str) -> PathBuf {
        let layout = self.layout(repo);
        layout
            .find_test_file(class_name)
            .unwrap_or_else(|| layout.test_path(class_name))
    }

    /// Write the candidate into the class's test file. Returns why it could
    /// not be placed, if it wasn't.
    fn place(&self, repo: &Path, target: &TargetMethod, code: &str) -> Option<String> {
        let layout = self.layout(repo);
        let path = self.test_file_path(repo, &target.class_name);
        let test_class_name = layout.test_class_name(&target.class_name);
        let package = target
            .class_name
            .rsplit_once('/')
            .map(|(pkg, _)| pkg.replace('/', "."));

        let request = WriteRequest {
            test_code: code,
            target_path: &path,
            test_class_name: &test_class_name,
            package: package.as_deref(),
        };
        match self.tools.writer.write(&request) {
            Ok(WriteOutcome::Written { .. }) => None,
            Ok(WriteOutcome::Skipped { reason }) => Some(reason),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not write test file");
                Some(format!("could not write {}: {e}", path.display()))
            }
        }
    }

    /// Remember the test file before the method's first candidate; put it
    /// back before every later one.
    fn prepare_test_file(&self, state: &mut RunState, class_name: &str) -> Result<()> {
        match &state.test_backup {
            Some(backup) => backup.restore(),
            None => {
                let path = self.test_file_path(&state.repo_path, class_name);
                state.test_backup = Some(TestFileBackup::capture(&path)?);
                Ok(())
            }
        }
    }

    fn write_test(&mut self, state: &mut RunState) -> Step {
        let (Some(target), Some(code)) = (state.current_target.clone(), state.candidate.clone()) else {
            return Step::SelectMethod;
        };
        if let Err(e) = self.prepare_test_file(state, &target.class_name) {
            state.record_error(format!("could not reset the test file for {}: {e}", target.class_name));
        }

        let verdict = self.review(&target, &code);
        let rejection = match &verdict {
            Some(v) if !v.is_approved() => Some(if v.reason.is_empty() {
                "rejected by reviewer".to_string()
            } else {
                v.reason.clone()
            }),
            _ => self.place(&state.repo_path, &target, &code),
        };
        state.quality_verdict = verdict;
        state.rejection_reason = rejection;
        Step::RunTest
    }

    fn run_test(&mut self, state: &mut RunState) -> Step {
        state.attempts += 1;

        let failures = if let Some(reason) = state.rejection_reason.take() {
            info!(attempt = state.attempts, reason = %reason, "candidate was not placed; counting as a failure");
            vec![TestFailure::new(REJECTED_FAILURE, reason)]
        } else {
            let test_class = state
                .current_target
                .as_ref()
                .map(|t| self.layout(&state.repo_path).test_class_name(&t.class_name));
            match self.tools.runner.run_tests(&state.repo_path, test_class.as_deref()) {
                Ok(run) => failures_for_run(&run.output, run.success),
                Err(e @ CovboostError::Timeout { .. }) => {
                    vec![TestFailure::new(TIMEOUT_FAILURE, e.to_string())]
                }
                Err(e) => vec![TestFailure::new(BUILD_FAILURE, e.to_string())],
            }
        };

        info!(attempt = state.attempts, failures = failures.len(), "tests executed");
        state.failures = failures;
        if state.failures.is_empty() {
            state.accepted_tests += 1;
            state.test_backup = None;
            Step::AnalyzeCoverage
        } else {
            Step::HandleFailure
        }
    }

    fn handle_failure(&mut self, state: &mut RunState) -> Step {
        if state.attempts < self.settings.max_attempts {
            state.rejection_reason = Some(render_feedback(&state.failures));
            info!(
                attempt = state.attempts,
                max_attempts = self.settings.max_attempts,
                "retrying generation with failure feedback"
            );
            return Step::GenerateTest;
        }

        if let Some(target) = &state.current_target {
            warn!(
                class = %target.class_name,
                method = %target.method.name,
                attempts = state.attempts,
                "abandoning method"
            );
        }
        if let Some(backup) = state.test_backup.take() {
            if let Err(e) = backup.restore() {
                state.record_error(format!("could not remove the abandoned test: {e}"));
            }
        }
        state.attempts = 0;
        state.current_target = None;
        Step::SelectMethod
    }

    fn create_pr(&mut self, state: &mut RunState) -> Result<Step> {
        self.refresh_snapshot(state)?;

        if let Some(class_name) = state.current_class.as_ref().map(|c| c.class.name.clone()) {
            if state.accepted_tests == 0 {
                info!(class = %class_name, "no accepted tests; nothing to publish");
            } else if let Some(branch) = state.branch_name.clone() {
                if let Err(e) = self.publish(state, &class_name, &branch) {
                    state.record_error(format!("publishing {class_name} failed: {e}"));
                }
            } else {
                state.record_error(format!("no branch for {class_name}; skipping pull request"));
            }
        }

        state.current_class = None;
        state.branch_name = None;
        state.accepted_tests = 0;
        state.clear_target();
        Ok(Step::SelectClass)
    }

    fn publish(&self, state: &mut RunState, class_name: &str, branch: &str) -> Result<()> {
        let title = pr_title(class_name);
        self.tools.vcs.commit_all(&state.repo_path, &title)?;
        self.tools.vcs.push(&state.repo_path, branch)?;

        let Some(client) = self.tools.pull_requests.as_ref() else {
            info!(branch, "no pull request client configured; branch pushed");
            return Ok(());
        };
        let body = match (&state.initial_coverage, &state.current_coverage) {
            (Some(initial), Some(current)) => CoverageComparison::between(initial, current)
                .for_target(class_name)
                .format(&MarkdownFormatter),
            _ => String::new(),
        };
        let pr = client.open_pull_request(&title, &body, branch)?;
        state.pull_requests.push(pr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_branch_name() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(23, 59, 5)
            .unwrap();
        assert_eq!(
            branch_name("com/example/Foo", at),
            "feature/test-coverage-for-com-example-Foo-20240131-235905"
        );
    }

    #[test]
    fn test_pr_title() {
        assert_eq!(pr_title("a/B"), "feat(tests): Improve test coverage for a/B");
    }
}
