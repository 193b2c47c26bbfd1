#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use covboost::config::Config;
use covboost::error::{CovboostError, Result};
use covboost::ingest::REPORT_PATH;
use covboost::tools::{
    GenerationRequest, PullRequest, PullRequests, QualityVerdict, ReportGenerator, ReviewRequest,
    TestGenerator, TestReviewer, TestRun, TestRunner, Vcs,
};
use covboost::workflow::{Toolbox, WorkflowEngine};
use covboost::writer::FileTestWriter;
use rusqlite::Connection;
use tempfile::TempDir;

pub const REPORT_BEFORE: &str = include_str!("../fixtures/e2e/jacoco_before.xml");
pub const REPORT_AFTER: &str = include_str!("../fixtures/e2e/jacoco_after.xml");
pub const SOURCE_B: &str = include_str!("../fixtures/e2e/B.java");
pub const SUREFIRE_FAILURES: &str = include_str!("../fixtures/surefire_failures.txt");

pub const TEST_FILE: &str = "src/test/java/a/BTest.java";

pub const GENERATED_TEST: &str = "```java\n@Test\nvoid testM() {\n    assertEquals(12, new B().m(6));\n}\n```\n";

/// A project checkout containing `a/B`. The caller must hold onto `TempDir`.
pub fn setup_repo() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    write_sources(&repo);
    (dir, repo)
}

pub fn write_sources(repo: &Path) {
    let src = repo.join("src/main/java/a");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("B.java"), SOURCE_B).unwrap();
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.workflow.clone_retry_delay_secs = 0;
    config.tools.generator = vec!["unused".into()];
    config
}

/// Everything the fakes were asked to do, in order.
#[derive(Default)]
pub struct Calls {
    pub vcs: Vec<String>,
    pub reports: usize,
    pub test_runs: Vec<Option<String>>,
    pub generations: Vec<GenerationRequest>,
    pub reviews: usize,
    pub pull_requests: Vec<(String, String, String)>,
}

pub type Shared = Rc<RefCell<Calls>>;

pub struct FakeVcs {
    pub calls: Shared,
    /// Clone attempts that fail before one succeeds.
    pub clone_failures: RefCell<u32>,
    pub fail_branch: bool,
}

impl Vcs for FakeVcs {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        self.calls.borrow_mut().vcs.push(format!("clone {url}"));
        let mut remaining = self.clone_failures.borrow_mut();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(CovboostError::tool("git", "connection reset"));
        }
        write_sources(dest);
        Ok(())
    }

    fn create_branch(&self, _repo: &Path, branch: &str) -> Result<()> {
        self.calls.borrow_mut().vcs.push(format!("branch {branch}"));
        if self.fail_branch {
            return Err(CovboostError::tool("git", "branch already exists"));
        }
        Ok(())
    }

    fn commit_all(&self, _repo: &Path, message: &str) -> Result<()> {
        self.calls.borrow_mut().vcs.push(format!("commit {message}"));
        Ok(())
    }

    fn push(&self, _repo: &Path, branch: &str) -> Result<()> {
        self.calls.borrow_mut().vcs.push(format!("push {branch}"));
        Ok(())
    }
}

/// Writes the queued reports in order, repeating the last one.
pub struct FakeReports {
    pub calls: Shared,
    pub queue: RefCell<VecDeque<String>>,
    pub last: RefCell<Option<String>>,
}

impl ReportGenerator for FakeReports {
    fn generate(&self, project_root: &Path) -> Result<PathBuf> {
        self.calls.borrow_mut().reports += 1;
        let next = self.queue.borrow_mut().pop_front();
        if let Some(xml) = next {
            *self.last.borrow_mut() = Some(xml);
        }
        let xml = self.last.borrow().clone().ok_or_else(|| {
            CovboostError::ReportNotFound("build produced no report".to_string())
        })?;
        let path = project_root.join(REPORT_PATH);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, xml)?;
        Ok(path)
    }
}

/// Returns queued outcomes in order, then passes unless `a/BTest.java`
/// contains `fail_marker`.
pub struct FakeRunner {
    pub calls: Shared,
    pub queue: RefCell<VecDeque<Result<TestRun>>>,
    pub fail_marker: Option<&'static str>,
}

impl TestRunner for FakeRunner {
    fn run_tests(&self, project_root: &Path, test_class: Option<&str>) -> Result<TestRun> {
        self.calls.borrow_mut().test_runs.push(test_class.map(str::to_string));
        if let Some(next) = self.queue.borrow_mut().pop_front() {
            return next;
        }
        if let Some(marker) = self.fail_marker {
            let tests = std::fs::read_to_string(project_root.join(TEST_FILE)).unwrap_or_default();
            if tests.contains(marker) {
                return failing_run();
            }
        }
        Ok(TestRun {
            output: "Tests run: 1, Failures: 0, Errors: 0, Skipped: 0\nBUILD SUCCESS".into(),
            success: true,
        })
    }
}

/// Answers with the code registered for the requested method, or `code`.
pub struct FakeGenerator {
    pub calls: Shared,
    pub code: &'static str,
    pub by_method: BTreeMap<&'static str, &'static str>,
}

impl TestGenerator for FakeGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.borrow_mut().generations.push(request.clone());
        let code = self
            .by_method
            .get(request.method_name.as_str())
            .copied()
            .unwrap_or(self.code);
        Ok(code.to_string())
    }
}

pub struct FakeReviewer {
    pub calls: Shared,
    pub verdict: QualityVerdict,
}

impl TestReviewer for FakeReviewer {
    fn review(&self, _request: &ReviewRequest) -> Result<QualityVerdict> {
        self.calls.borrow_mut().reviews += 1;
        Ok(self.verdict.clone())
    }
}

pub struct FakePulls {
    pub calls: Shared,
}

impl PullRequests for FakePulls {
    fn open_pull_request(&self, title: &str, body: &str, head_branch: &str) -> Result<PullRequest> {
        let mut calls = self.calls.borrow_mut();
        calls
            .pull_requests
            .push((title.to_string(), body.to_string(), head_branch.to_string()));
        let number = calls.pull_requests.len() as u64;
        Ok(PullRequest {
            number,
            url: format!("https://github.com/acme/widgets/pull/{number}"),
        })
    }
}

/// Knobs for a fake toolbox.
pub struct Fakes {
    pub reports: Vec<String>,
    pub runs: Vec<Result<TestRun>>,
    pub code: &'static str,
    pub code_by_method: BTreeMap<&'static str, &'static str>,
    /// Test runs fail while the test file contains this text.
    pub fail_marker: Option<&'static str>,
    pub verdict: Option<QualityVerdict>,
    pub clone_failures: u32,
    pub fail_branch: bool,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            reports: vec![REPORT_BEFORE.to_string(), REPORT_AFTER.to_string()],
            runs: Vec::new(),
            code: GENERATED_TEST,
            code_by_method: BTreeMap::new(),
            fail_marker: None,
            verdict: None,
            clone_failures: 0,
            fail_branch: false,
        }
    }
}

impl Fakes {
    pub fn toolbox(self) -> (Toolbox, Shared) {
        let calls: Shared = Rc::new(RefCell::new(Calls::default()));
        let reviewer: Option<Box<dyn TestReviewer>> = match self.verdict {
            Some(verdict) => Some(Box::new(FakeReviewer {
                calls: calls.clone(),
                verdict,
            })),
            None => None,
        };
        let toolbox = Toolbox {
            vcs: Box::new(FakeVcs {
                calls: calls.clone(),
                clone_failures: RefCell::new(self.clone_failures),
                fail_branch: self.fail_branch,
            }),
            reports: Box::new(FakeReports {
                calls: calls.clone(),
                queue: RefCell::new(self.reports.into_iter().collect()),
                last: RefCell::new(None),
            }),
            runner: Box::new(FakeRunner {
                calls: calls.clone(),
                queue: RefCell::new(self.runs.into_iter().collect()),
                fail_marker: self.fail_marker,
            }),
            generator: Box::new(FakeGenerator {
                calls: calls.clone(),
                code: self.code,
                by_method: self.code_by_method,
            }),
            reviewer,
            writer: Box::new(FileTestWriter),
            pull_requests: Some(Box::new(FakePulls {
                calls: calls.clone(),
            })),
        };
        (toolbox, calls)
    }

    /// An engine over an in-memory checkpoint database.
    pub fn engine(self, config: &Config) -> (WorkflowEngine, Shared) {
        let (toolbox, calls) = self.toolbox();
        let conn = Connection::open_in_memory().unwrap();
        (WorkflowEngine::new(config, toolbox, conn).unwrap(), calls)
    }
}

pub fn failing_run() -> Result<TestRun> {
    Ok(TestRun {
        output: SUREFIRE_FAILURES.to_string(),
        success: false,
    })
}

/// A report for package `a`. Each class lists `(method, first line, missed
/// instructions)`; a method's missed instructions all sit on its first line.
pub fn report_xml(classes: &[(&str, &[(&str, u32, u64)])]) -> String {
    let mut body = String::new();
    let mut sources = String::new();
    let (mut all_missed, mut all_covered) = (0, 0);
    for (class, methods) in classes {
        let (mut missed, mut covered) = (0, 0);
        let mut lines = String::new();
        body.push_str(&format!(
            "<class name=\"a/{class}\" sourcefilename=\"{class}.java\">"
        ));
        for (method, line, method_missed) in *methods {
            let method_covered = 4u64.saturating_sub(*method_missed);
            missed += method_missed;
            covered += method_covered;
            let line_missed = u64::from(*method_missed > 0);
            body.push_str(&format!(
                "<method name=\"{method}\" desc=\"()I\" line=\"{line}\">\
                 <counter type=\"INSTRUCTION\" missed=\"{method_missed}\" covered=\"{method_covered}\"/>\
                 <counter type=\"LINE\" missed=\"{line_missed}\" covered=\"{}\"/>\
                 </method>",
                1 - line_missed
            ));
            lines.push_str(&format!(
                "<line nr=\"{line}\" mi=\"{method_missed}\" ci=\"{method_covered}\" mb=\"0\" cb=\"0\"/>"
            ));
        }
        body.push_str(&format!(
            "<counter type=\"INSTRUCTION\" missed=\"{missed}\" covered=\"{covered}\"/></class>"
        ));
        sources.push_str(&format!("<sourcefile name=\"{class}.java\">{lines}</sourcefile>"));
        all_missed += missed;
        all_covered += covered;
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <report name=\"fake\"><package name=\"a\">{body}{sources}</package>\
         <counter type=\"INSTRUCTION\" missed=\"{all_missed}\" covered=\"{all_covered}\"/>\
         </report>"
    )
}
