//! Version control through the `git` command line.

use std::path::Path;

use tracing::info;

use super::process::{Invocation, ProcessOutput};
use super::Vcs;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn git<'a>(&'a self, repo: &'a Path, args: &[&str]) -> Result<ProcessOutput> {
        Invocation::new(&self.program)
            .args(args.iter().copied())
            .current_dir(repo)
            .run()?
            .check(&self.program)
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Vcs for GitCli {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Invocation::new(&self.program)
            .arg("clone")
            .arg(url)
            .arg(dest.to_string_lossy())
            .run()?
            .check(&self.program)?;
        info!(dest = %dest.display(), "repository cloned");
        Ok(())
    }

    fn create_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.git(repo, &["checkout", "-b", branch])?;
        info!(branch, "branch created");
        Ok(())
    }

    fn commit_all(&self, repo: &Path, message: &str) -> Result<()> {
        self.git(repo, &["add", "-A"])?;
        self.git(repo, &["commit", "-m", message])?;
        Ok(())
    }

    fn push(&self, repo: &Path, branch: &str) -> Result<()> {
        self.git(repo, &["push", "--set-upstream", "origin", branch])?;
        info!(branch, "branch pushed");
        Ok(())
    }
}

/// `owner/name` from an HTTPS or SSH GitHub remote URL.
pub fn github_slug(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
        .or_else(|| url.strip_prefix("git@github.com:"))
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))?;
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
            Some(format!("{owner}/{name}"))
        }
        _ => None,
    }
}
