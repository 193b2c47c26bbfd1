//! Generator and reviewer backed by external commands. The request is
//! written to the command's stdin as JSON; the generator prints test code,
//! the reviewer prints a `{"verdict": "APPROVED"|"REJECTED", "reason": ...}`
//! object.

use std::time::Duration;

use tracing::{debug, warn};

use super::process::Invocation;
use super::{GenerationRequest, QualityVerdict, ReviewRequest, TestGenerator, TestReviewer};
use crate::error::{CovboostError, Result};

#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(CovboostError::Config("generator command is empty".to_string()));
        }
        Ok(Self { argv, timeout: None })
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

fn invoke(argv: &[String], input: String, timeout: Option<Duration>) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CovboostError::Config("command is empty".to_string()))?;
    let mut invocation = Invocation::new(program).args(args.iter().cloned()).stdin(input);
    if let Some(limit) = timeout {
        invocation = invocation.timeout(limit);
    }
    Ok(invocation.run()?.check(program)?.stdout)
}

impl TestGenerator for CommandGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let input = serde_json::to_string(request)?;
        let code = invoke(&self.argv, input, self.timeout)?;
        debug!(method = %request.method_name, bytes = code.len(), "generator returned");
        Ok(code)
    }
}

#[derive(Debug, Clone)]
pub struct CommandReviewer {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandReviewer {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(CovboostError::Config("reviewer command is empty".to_string()));
        }
        Ok(Self { argv, timeout: None })
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

/// Parse a reviewer's reply. Anything that is not a verdict object is a
/// rejection.
pub fn parse_verdict(text: &str) -> QualityVerdict {
    let trimmed = text.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    match serde_json::from_str::<QualityVerdict>(json) {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(error = %e, "reviewer reply is not a verdict; rejecting");
            QualityVerdict::rejected("Failed to get a valid JSON review.")
        }
    }
}

impl TestReviewer for CommandReviewer {
    fn review(&self, request: &ReviewRequest) -> Result<QualityVerdict> {
        let input = serde_json::to_string(request)?;
        let reply = invoke(&self.argv, input, self.timeout)?;
        Ok(parse_verdict(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Verdict;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict(r#"{"verdict": "APPROVED", "reason": "covers the branch"}"#);
        assert!(v.is_approved());
        assert_eq!(v.reason, "covers the branch");

        let v = parse_verdict("Sure!\n```json\n{\"verdict\": \"REJECTED\", \"reason\": \"duplicate\"}\n```");
        assert_eq!(v.verdict, Verdict::Rejected);
        assert_eq!(v.reason, "duplicate");

        let v = parse_verdict("looks fine to me");
        assert_eq!(v, QualityVerdict::rejected("Failed to get a valid JSON review."));
    }

    #[test]
    fn test_empty_commands_rejected() {
        assert!(CommandGenerator::new(vec![]).is_err());
        assert!(CommandReviewer::new(vec![" ".into()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_generator_reads_request_from_stdin() {
        let generator = CommandGenerator::new(vec![
            "sh".into(),
            "-c".into(),
            "grep -o '\"method_name\":\"[a-z]*\"'".into(),
        ])
        .unwrap();
        let request = GenerationRequest {
            class_name: "a/B".into(),
            method_name: "m".into(),
            source_code: String::new(),
            method_source: None,
            existing_tests: String::new(),
            uncovered_lines: vec![6, 7],
            structural_hints: None,
            rejection_reason: None,
        };
        let out = generator.generate(&request).unwrap();
        assert_eq!(out.trim(), "\"method_name\":\"m\"");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_generator_is_tool_error() {
        let generator =
            CommandGenerator::new(vec!["sh".into(), "-c".into(), "exit 2".into()]).unwrap();
        let request = GenerationRequest {
            class_name: "a/B".into(),
            method_name: "m".into(),
            source_code: String::new(),
            method_source: None,
            existing_tests: String::new(),
            uncovered_lines: vec![],
            structural_hints: None,
            rejection_reason: None,
        };
        let err = generator.generate(&request).unwrap_err();
        assert!(matches!(err, CovboostError::ToolInvocationFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_reviewer_times_out() {
        let reviewer = CommandReviewer::new(vec!["sh".into(), "-c".into(), "sleep 5".into()])
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let request = ReviewRequest {
            class_name: "a/B".into(),
            method_name: "m".into(),
            source_code: String::new(),
            existing_tests: String::new(),
            uncovered_lines: vec![6],
            test_code: "@Test void testM() {}".into(),
        };
        let err = reviewer.review(&request).unwrap_err();
        assert!(matches!(err, CovboostError::Timeout { .. }), "{err}");
    }
}
