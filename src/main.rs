use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use covboost::cli::{self, Style};
use covboost::config::Config;
use covboost::workflow::{checkpoint, RunState, Toolbox, WorkflowEngine};

/// covboost: coverage-driven unit test generation for Maven/JaCoCo projects.
#[derive(Parser)]
#[command(name = "covboost", version, about)]
struct Cli {
    /// Configuration file (default: ./covboost.toml when present)
    #[arg(long, global = true, env = "COVBOOST_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the checkpoint database (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run against a repository.
    Run {
        /// Repository to clone.
        #[arg(long, conflicts_with = "path", required_unless_present = "path")]
        repo_url: Option<String>,

        /// Existing checkout to work in instead of cloning.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Identifier for the run (default: derived from the current time).
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Continue a run from its latest checkpoint.
    Resume {
        #[arg(long)]
        run_id: String,
    },

    /// Show the progress and coverage of a run.
    Status {
        #[arg(long)]
        run_id: String,

        /// Output style.
        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },

    /// List checkpointed runs.
    Runs,

    /// Show the root-level counters of a JaCoCo XML report.
    Summary {
        /// Path to the report.
        report: PathBuf,
    },

    /// List the classes and methods a run would target.
    Targets {
        /// Path to the report.
        report: PathBuf,

        /// Project checkout, used to read sources for structural hints.
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Analyze the structure of a Java source file.
    Analyze {
        /// Java source file.
        source: PathBuf,

        /// Analyze only this method.
        #[arg(long)]
        method: Option<String>,

        /// Restrict to methods touching these lines, e.g. "6-8,20".
        #[arg(long, conflicts_with = "method")]
        lines: Option<String>,
    },

    /// Extract failing tests from build output.
    Failures {
        /// File with the output. If omitted, reads from stdin.
        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.checkpoint_db = db;
    }

    let output = match cli.command {
        Commands::Run {
            repo_url,
            path,
            run_id,
        } => {
            config.validate_for_run()?;
            let run_id = run_id
                .unwrap_or_else(|| format!("run-{}", chrono::Local::now().format("%Y%m%d-%H%M%S")));
            let repo_path = path.unwrap_or_else(|| config.project.workdir.clone());
            let state = RunState::new(run_id, repo_url.clone(), repo_path);
            let mut engine = open_engine(&config, repo_url.as_deref())?;
            cli::cmd_run(&mut engine, state)?
        }
        Commands::Resume { run_id } => {
            config.validate_for_run()?;
            let conn = open_db(&config)?;
            let repo_url = checkpoint::load_latest(&conn, &run_id)?.and_then(|s| s.repo_url);
            drop(conn);
            let mut engine = open_engine(&config, repo_url.as_deref())?;
            cli::cmd_resume(&mut engine, &run_id)?
        }
        Commands::Status { run_id, style } => cli::cmd_status(&open_db(&config)?, &run_id, style)?,
        Commands::Runs => cli::cmd_runs(&open_db(&config)?)?,
        Commands::Summary { report } => cli::cmd_summary(&report)?,
        Commands::Targets { report, project } => {
            cli::cmd_targets(&config, &report, project.as_deref())?
        }
        Commands::Analyze {
            source,
            method,
            lines,
        } => {
            let text = std::fs::read_to_string(&source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            cli::cmd_analyze(&text, method.as_deref(), lines.as_deref())?
        }
        Commands::Failures { file } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            cli::cmd_failures(&text)
        }
    };

    print!("{output}");
    Ok(())
}

fn open_db(config: &Config) -> Result<rusqlite::Connection> {
    let conn = checkpoint::open(&config.checkpoint_db).context("Failed to open checkpoint database")?;
    checkpoint::init_schema(&conn).context("Failed to initialize schema")?;
    Ok(conn)
}

fn open_engine(config: &Config, repo_url: Option<&str>) -> Result<WorkflowEngine> {
    let tools = Toolbox::from_config(config, repo_url).context("Failed to set up tools")?;
    let conn = open_db(config)?;
    Ok(WorkflowEngine::new(config, tools, conn)?)
}
