//! Blocking subprocess execution with an optional wall-clock limit.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CovboostError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into a tool error carrying stderr.
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let detail = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(CovboostError::tool(
                tool,
                format!("exited with {}: {}", self.status, detail),
            ))
        }
    }
}

/// A command line to run. Built up like `std::process::Command` but kept as
/// plain data so it can be logged and retried.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    program: &'a str,
    args: Vec<String>,
    cwd: Option<&'a Path>,
    stdin: Option<String>,
    timeout: Option<Duration>,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a str) -> Self {
        Self {
            program,
            args: Vec::new(),
            cwd: None,
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: &'a Path) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Run to completion. Exceeding the timeout kills the child and returns
    /// `CovboostError::Timeout`.
    pub fn run(self) -> Result<ProcessOutput> {
        debug!(program = self.program, args = ?self.args, cwd = ?self.cwd, "spawning");

        let mut cmd = Command::new(self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CovboostError::tool(self.program, format!("failed to start: {e}")))?;

        let writer = match (child.stdin.take(), self.stdin) {
            (Some(mut pipe), Some(input)) => Some(thread::spawn(move || {
                // A child that exits without reading stdin closes the pipe.
                let _ = pipe.write_all(input.as_bytes());
            })),
            _ => None,
        };
        let stdout = child.stdout.take().map(read_to_string_thread);
        let stderr = child.stderr.take().map(read_to_string_thread);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    warn!(program = self.program, seconds = limit.as_secs(), "timed out; killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CovboostError::Timeout {
                        tool: self.program.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(handle) = writer {
            let _ = handle.join();
        }
        let output = ProcessOutput {
            status,
            stdout: join_output(stdout),
            stderr: join_output(stderr),
        };
        debug!(
            program = self.program,
            status = %output.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "process finished"
        );
        Ok(output)
    }
}

fn read_to_string_thread<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).ok();
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
