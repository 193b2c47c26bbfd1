use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovboostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Malformed coverage report: {0}")]
    MalformedReport(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{tool} failed: {message}")]
    ToolInvocationFailed { tool: String, message: String },

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Generation service returned no test code")]
    EmptyGenerationResult,

    #[error("Run conflict: {0}")]
    RunConflict(String),

    #[error("{0}")]
    Other(String),
}

impl CovboostError {
    /// Shorthand for a failed external tool call.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        CovboostError::ToolInvocationFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CovboostError>;
