//! CloudSleuth: resumable cloud storage auditor.
//!
//! Thin binary entry point. All logic lives in the `cloudsleuth-core` crate.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use cloudsleuth_core::checkpoint::RootSummary;
use cloudsleuth_core::config::CrawlConfig;
use cloudsleuth_core::crawler::Scope;
use cloudsleuth_core::error::CrawlError;
use cloudsleuth_core::job::{FixedAnswer, Job, ResumePrompt};
use cloudsleuth_core::model::size::{format_count, format_duration, format_size};
use cloudsleuth_core::remote::{LocalStore, MemoryStore, RemoteStore, Session};
use cloudsleuth_core::report::ReportKind;

#[derive(Parser, Debug)]
#[command(name = "cloudsleuth", version, about = "Crawl a cloud storage tenant and report sizes, ownership and sharing")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve the tenant from a JSON fixture.
    #[arg(long, global = true, conflicts_with = "local")]
    fixture: Option<PathBuf>,

    /// Serve the tenant from a local directory tree.
    #[arg(long, global = true)]
    local: Option<PathBuf>,

    /// Run name; artifacts are `<output_dir>/<name>.csv` and `<session_dir>/<name>.json`.
    #[arg(short = 'n', long, global = true)]
    name: Option<String>,

    /// Resume an interrupted run without asking.
    #[arg(long, global = true, conflicts_with = "fresh")]
    yes: bool,

    /// Discard an interrupted run without asking.
    #[arg(long, global = true)]
    fresh: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Target {
    /// Folder to start from.
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Walk this member's personal space (name or email).
    #[arg(short, long, conflicts_with = "team_folder")]
    member: Option<String>,

    /// Walk this team folder.
    #[arg(short, long)]
    team_folder: Option<String>,
}

impl Target {
    fn scope(&self) -> Scope {
        let path = self.path.clone();
        match (&self.member, &self.team_folder) {
            (Some(identity), _) => Scope::Member {
                identity: identity.clone(),
                path,
            },
            (None, Some(name)) => Scope::TeamFolder {
                name: name.clone(),
                path,
            },
            (None, None) => Scope::Account { path },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One row per folder down to a depth limit.
    Folders {
        #[command(flatten)]
        target: Target,
        /// Deepest folder level to report.
        #[arg(short = 'l', long)]
        level: Option<u32>,
    },
    /// One row per file, with duplicate, embedding and link detail.
    Files {
        #[command(flatten)]
        target: Target,
        /// Maximum concurrent inspection workers.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Skip content inspection.
        #[arg(long)]
        no_inspect: bool,
    },
    /// One summary row per member space and namespace.
    Members,
    /// Folder report across the whole tenant, grouped by namespace.
    Owner {
        /// Deepest folder level to report.
        #[arg(short = 'l', long)]
        level: Option<u32>,
        #[arg(long)]
        member_spaces: bool,
        #[arg(long)]
        team_spaces: bool,
        #[arg(long)]
        other_spaces: bool,
    },
}

struct StdinPrompt;

impl ResumePrompt for StdinPrompt {
    fn confirm_resume(&mut self, path: &Path, summary: &RootSummary) -> bool {
        eprintln!(
            "Found an interrupted run at {} ({} containers, {} files, {}; last updated {}).",
            path.display(),
            format_count(summary.records as u64),
            format_count(summary.files),
            format_size(summary.size),
            summary.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        eprint!("Resume it? [Y/n] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<Arc<dyn RemoteStore>> {
    if let Some(path) = &cli.fixture {
        let store = MemoryStore::from_fixture_file(path)
            .with_context(|| format!("loading fixture {}", path.display()))?;
        return Ok(Arc::new(store));
    }
    if let Some(dir) = &cli.local {
        if !dir.is_dir() {
            bail!("{} is not a directory", dir.display());
        }
        return Ok(Arc::new(LocalStore::new(dir)));
    }
    bail!("no tenant source given; pass --fixture <file> or --local <dir>")
}

fn build_job(cli: &Cli, mut config: CrawlConfig) -> Job {
    let (scope, report) = match &cli.command {
        Command::Folders { target, level } => {
            if let Some(level) = level {
                config.max_level = *level;
            }
            (target.scope(), ReportKind::Folders)
        }
        Command::Files {
            target,
            concurrency,
            no_inspect,
        } => {
            if let Some(n) = concurrency {
                config.inspect.concurrency = *n;
            }
            if *no_inspect {
                config.inspect.enabled = false;
            }
            (target.scope(), ReportKind::Files)
        }
        Command::Members => (
            Scope::Tenant {
                members: true,
                team: true,
                other: true,
            },
            ReportKind::Members,
        ),
        Command::Owner {
            level,
            member_spaces,
            team_spaces,
            other_spaces,
        } => {
            if let Some(level) = level {
                config.max_level = *level;
            }
            let all = !(*member_spaces || *team_spaces || *other_spaces);
            (
                Scope::Tenant {
                    members: all || *member_spaces,
                    team: all || *team_spaces,
                    other: all || *other_spaces,
                },
                ReportKind::Folders,
            )
        }
    };
    let name = cli
        .name
        .clone()
        .unwrap_or_else(|| format!("report_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")));
    Job::new(name, scope, report, config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    info!("CloudSleuth starting");

    let config = match &cli.config {
        Some(path) => CrawlConfig::load(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => CrawlConfig::default(),
    };
    let job = build_job(&cli, config);
    job.config.validate()?;
    let session = Session::without_refresh(open_store(&cli)?);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let mut prompt: Box<dyn ResumePrompt> = if cli.yes {
        Box::new(FixedAnswer(true))
    } else if cli.fresh {
        Box::new(FixedAnswer(false))
    } else {
        Box::new(StdinPrompt)
    };

    let result = job.run(session, prompt.as_mut(), cancel, |snapshot, recent| {
        info!("{}", snapshot.summary_line());
        if let Some(last) = recent.last() {
            debug!(
                "Last completed: {} ({}, {:.1}s)",
                last.path,
                format_size(last.size),
                last.elapsed_secs
            );
        }
    });

    match result {
        Ok(summary) => {
            info!(
                "Done: {} folders, {} files, {} in {}{}",
                format_count(summary.root.folders),
                format_count(summary.root.files),
                format_size(summary.root.size),
                format_duration(summary.stats.elapsed),
                if summary.resumed { " (resumed)" } else { "" }
            );
            println!("{}", summary.report.display());
            Ok(())
        }
        Err(CrawlError::Interrupted) => {
            info!(
                "Interrupted. Run again with `-n {}` to resume.",
                job.name
            );
            std::process::exit(130);
        }
        Err(e) => Err(e).with_context(|| format!("run {:?} failed", job.name)),
    }
}
