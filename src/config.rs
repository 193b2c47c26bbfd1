use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CovboostError, Result};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "covboost.toml";

/// Top-level configuration, matching `covboost.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_checkpoint_db")]
    pub checkpoint_db: PathBuf,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub github: GithubSection,
}

fn default_checkpoint_db() -> PathBuf {
    PathBuf::from(".covboost.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            checkpoint_db: default_checkpoint_db(),
            workflow: WorkflowSection::default(),
            project: ProjectSection::default(),
            tools: ToolsSection::default(),
            github: GithubSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    /// Generation attempts per method before it is abandoned.
    pub max_attempts: u32,
    /// Lines before a method's declared line still attributed to it.
    pub line_window: u32,
    pub clone_attempts: u32,
    pub clone_retry_delay_secs: u64,
    pub test_timeout_secs: u64,
    /// Attach syntax-tree findings to each target.
    pub structural_hints: bool,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            line_window: 2,
            clone_attempts: 5,
            clone_retry_delay_secs: 2,
            test_timeout_secs: 300,
            structural_hints: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    /// Where remote repositories are cloned to.
    pub workdir: PathBuf,
    pub language_dir: String,
    pub extension: String,
    pub test_suffix: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("cloned_repo"),
            language_dir: "java".to_string(),
            extension: "java".to_string(),
            test_suffix: "Test".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub maven: String,
    pub git: String,
    /// Command that reads a generation request as JSON on stdin and prints
    /// test code on stdout.
    pub generator: Vec<String>,
    /// Optional command that reviews a candidate and prints a JSON verdict.
    pub reviewer: Option<Vec<String>>,
    /// Limit for a single generator or reviewer invocation.
    pub command_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            maven: "mvn".to_string(),
            git: "git".to_string(),
            generator: Vec::new(),
            reviewer: None,
            command_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSection {
    /// `owner/name`; derived from the clone URL when unset.
    pub repository: Option<String>,
    pub base_branch: String,
    pub api_url: String,
    pub token_env: String,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            repository: None,
            base_branch: "main".to_string(),
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or from `covboost.toml` in the working
    /// directory when present. A missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CovboostError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| CovboostError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CovboostError::Config(e.to_string()))
    }

    /// Checks that only matter once a run is about to start.
    pub fn validate_for_run(&self) -> Result<()> {
        if self.workflow.max_attempts == 0 {
            return Err(CovboostError::Config(
                "workflow.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.tools.generator.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(CovboostError::Config(
                "tools.generator must name a command".to_string(),
            ));
        }
        if self.workflow.clone_attempts == 0 {
            return Err(CovboostError::Config(
                "workflow.clone_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
