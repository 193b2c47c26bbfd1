//! Maven + JaCoCo: report generation and test execution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::process::Invocation;
use super::{ReportGenerator, TestRun, TestRunner};
use crate::error::{CovboostError, Result};
use crate::ingest::REPORT_PATH;

/// Execution data left by a previous run; removed so the next report is
/// built from this run only.
pub const EXEC_FILE: &str = "target/jacoco.exec";

#[derive(Debug, Clone)]
pub struct Maven {
    program: String,
    test_timeout: Duration,
}

impl Maven {
    pub fn new(program: impl Into<String>, test_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            test_timeout,
        }
    }
}

impl ReportGenerator for Maven {
    fn generate(&self, project_root: &Path) -> Result<PathBuf> {
        if !project_root.is_dir() {
            return Err(CovboostError::tool(
                &self.program,
                format!("project directory {} does not exist", project_root.display()),
            ));
        }

        let exec = project_root.join(EXEC_FILE);
        if exec.exists() {
            std::fs::remove_file(&exec)?;
            info!(path = %exec.display(), "deleted stale execution data");
        }

        // Failing tests must not stop the report from being written.
        let output = Invocation::new(&self.program)
            .args(["clean", "test", "jacoco:report", "-Dmaven.test.failure.ignore=true"])
            .current_dir(project_root)
            .run()?;
        if !output.success() {
            warn!(status = %output.status, "report build exited unsuccessfully");
        }

        let report = project_root.join(REPORT_PATH);
        if !report.is_file() {
            return Err(CovboostError::ReportNotFound(format!(
                "{} (build output tail: {})",
                report.display(),
                crate::failures::tail(&output.combined(), 5)
            )));
        }
        Ok(report)
    }
}

impl TestRunner for Maven {
    fn run_tests(&self, project_root: &Path, test_class: Option<&str>) -> Result<TestRun> {
        let mut invocation = Invocation::new(&self.program)
            .arg("test")
            .current_dir(project_root)
            .timeout(self.test_timeout);
        if let Some(class) = test_class {
            invocation = invocation
                .arg(format!("-Dtest={class}"))
                .arg("-Dsurefire.failIfNoSpecifiedTests=false");
        }

        let output = invocation.run()?;
        info!(
            test_class = test_class.unwrap_or("<all>"),
            success = output.success(),
            "test run finished"
        );
        Ok(TestRun {
            success: output.success(),
            output: output.combined(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A fake `mvn` that records its arguments and writes a report.
    fn fake_maven(dir: &Path, script: &str) -> String {
        let path = dir.join("fake-mvn");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_generate_removes_stale_exec_and_finds_report() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        std::fs::create_dir_all(project.join("target")).unwrap();
        std::fs::write(project.join(EXEC_FILE), b"stale").unwrap();

        let program = fake_maven(
            dir.path(),
            "echo \"$@\" > args.txt\nmkdir -p target/site/jacoco\necho '<report/>' > target/site/jacoco/jacoco.xml",
        );
        let report = Maven::new(program, Duration::from_secs(30))
            .generate(&project)
            .unwrap();

        assert_eq!(report, project.join(REPORT_PATH));
        assert!(!project.join(EXEC_FILE).exists());
        let args = std::fs::read_to_string(project.join("args.txt")).unwrap();
        assert!(args.starts_with("clean test jacoco:report"));
    }

    #[test]
    fn test_generate_without_report() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_maven(dir.path(), "echo 'BUILD FAILURE'; exit 1");
        let err = Maven::new(program, Duration::from_secs(30))
            .generate(dir.path())
            .unwrap_err();
        assert!(matches!(err, CovboostError::ReportNotFound(_)));
        assert!(err.to_string().contains("BUILD FAILURE"));
    }

    #[test]
    fn test_run_single_test_class() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_maven(dir.path(), "echo \"$@\"; exit 1");
        let run = Maven::new(program, Duration::from_secs(30))
            .run_tests(dir.path(), Some("FooTest"))
            .unwrap();
        assert!(!run.success);
        assert!(run.output.contains("test -Dtest=FooTest"));
    }
}
