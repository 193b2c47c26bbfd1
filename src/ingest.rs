use std::path::Path;

use tracing::{debug, info};

use crate::error::{CovboostError, Result};
use crate::model::{CounterKind, CoverageSnapshot};
use crate::parsers::jacoco::JacocoParser;
use crate::parsers::ReportParser;

/// Default location of the JaCoCo XML report inside a Maven project.
pub const REPORT_PATH: &str = "target/site/jacoco/jacoco.xml";

/// Read a coverage report from disk and parse it into a fresh snapshot.
pub fn load_snapshot(file_path: &Path) -> Result<CoverageSnapshot> {
    if !file_path.is_file() {
        return Err(CovboostError::ReportNotFound(
            file_path.display().to_string(),
        ));
    }
    let content = std::fs::read(file_path)?;
    parse_report(&content)
}

/// Parse report bytes, sniffing the format first so that a file of the wrong
/// kind fails with a clear message instead of an XML position.
pub fn parse_report(content: &[u8]) -> Result<CoverageSnapshot> {
    let parser = JacocoParser;
    if !parser.can_parse(content) {
        return Err(CovboostError::MalformedReport(format!(
            "input does not look like a {} report",
            parser.format()
        )));
    }
    debug!(bytes = content.len(), format = parser.format(), "parsing coverage report");

    let snapshot = parser.parse(content)?;
    info!(
        classes = snapshot.classes.len(),
        needy = snapshot.classes_needing_coverage().count(),
        instruction_pct = %format!("{:.2}", snapshot.summary().ratio(CounterKind::Instruction)),
        "coverage snapshot loaded"
    );
    Ok(snapshot)
}

/// Load the report produced by the build tool for the project at `root`.
pub fn load_project_snapshot(root: &Path) -> Result<CoverageSnapshot> {
    load_snapshot(&root.join(REPORT_PATH))
}
