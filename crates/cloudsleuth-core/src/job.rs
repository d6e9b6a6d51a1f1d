//! A complete run: resume decision, crawl, and finalisation of artifacts.
//!
//! A run is identified by its name. The checkpoint lives at
//! `<session_dir>/<name>.json` and the report at `<output_dir>/<name>.csv`.
//! Both must be present to resume; a lone artifact from an earlier run is
//! discarded. Any artifact that cannot be restored is discarded as well and
//! the run starts fresh.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, Restored, RootSummary};
use crate::config::CrawlConfig;
use crate::crawler::{self, CrawlOptions, Crawler, Plan, Scope};
use crate::error::CrawlError;
use crate::inspect::DuplicateIndex;
use crate::model::{Aggregate, ContainerTree};
use crate::progress::{ActivityEntry, ProgressReporter, StatsSnapshot};
use crate::remote::Session;
use crate::report::{self, Recorder, ReportKind};

/// Asks the operator whether to continue an interrupted run.
pub trait ResumePrompt {
    /// `true` resumes from the existing artifacts, `false` discards them.
    fn confirm_resume(&mut self, path: &Path, summary: &RootSummary) -> bool;
}

/// A prompt with a fixed answer (`--yes` / `--fresh`).
#[derive(Clone, Copy, Debug)]
pub struct FixedAnswer(pub bool);

impl ResumePrompt for FixedAnswer {
    fn confirm_resume(&mut self, _path: &Path, _summary: &RootSummary) -> bool {
        self.0
    }
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub report: PathBuf,
    pub resumed: bool,
    pub containers: usize,
    pub root: Aggregate,
    pub stats: StatsSnapshot,
}

/// A named run of one report over one scope.
#[derive(Clone, Debug)]
pub struct Job {
    pub name: String,
    pub scope: Scope,
    pub report: ReportKind,
    pub config: CrawlConfig,
}

struct Artifacts {
    tree: ContainerTree,
    checkpoint: Checkpoint,
    recorder: Recorder,
    resumed: bool,
}

impl Job {
    pub fn new(name: impl Into<String>, scope: Scope, report: ReportKind, config: CrawlConfig) -> Self {
        Self {
            name: name.into(),
            scope,
            report,
            config,
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        Checkpoint::path_for(&self.config.session_dir, &self.name)
    }

    pub fn report_path(&self) -> PathBuf {
        Recorder::path_for(&self.config.output_dir, &self.name)
    }

    /// Plan, crawl and finalise.
    ///
    /// `render` receives progress snapshots on the reporter thread. On
    /// success the checkpoint is deleted and then the report is reversed
    /// into root-first order, so a report is reversed at most once. On any
    /// failure, interruption included, both artifacts are left in place for
    /// a later resume.
    pub fn run<F>(
        &self,
        session: Session,
        prompt: &mut dyn ResumePrompt,
        cancel: Arc<AtomicBool>,
        render: F,
    ) -> Result<RunSummary, CrawlError>
    where
        F: FnMut(&StatsSnapshot, &[ActivityEntry]) + Send + 'static,
    {
        self.config.validate()?;
        let plan = crawler::plan(&session, &self.scope)?;
        let artifacts = match self.restore(&plan, prompt)? {
            Some(artifacts) => artifacts,
            None => self.fresh(&plan)?,
        };
        let resumed = artifacts.resumed;

        let duplicates = if resumed && self.report == ReportKind::Files {
            let seen = report::existing_fingerprints(artifacts.recorder.path())?;
            info!("Seeded {} known fingerprints from the report", seen.len());
            DuplicateIndex::seeded(seen)
        } else {
            DuplicateIndex::new()
        };

        let mut crawler = Crawler::new(
            session,
            artifacts.tree,
            artifacts.checkpoint,
            artifacts.recorder,
            CrawlOptions::new(self.report, &self.config),
        )
        .with_cancel(cancel)
        .with_duplicates(duplicates)
        .with_recent_window(self.config.recent_window);
        crawler.enable_inspection(&self.config.inspect)?;

        info!(
            "{} run {:?} ({:?} report)",
            if resumed { "Resuming" } else { "Starting" },
            self.name,
            self.report
        );
        let stats = crawler.stats();
        let reporter = ProgressReporter::spawn(
            stats.clone(),
            crawler.activity(),
            self.config.progress_interval(),
            render,
        );
        let result = crawler.run(&plan);
        stats.stop();
        reporter.stop();

        let parts = crawler.into_parts();
        match result {
            Ok(_) => {
                let root = parts.tree.node(parts.tree.root()).agg;
                let containers = parts.tree.len();
                // A surviving checkpoint always sits beside an unreversed report.
                if let Err(e) = parts.checkpoint.remove() {
                    parts.recorder.close()?;
                    return Err(e.into());
                }
                let report = parts.recorder.finish()?;
                Ok(RunSummary {
                    report,
                    resumed,
                    containers,
                    root,
                    stats: stats.snapshot(),
                })
            }
            Err(e) => {
                let path = parts.recorder.close()?;
                warn!(
                    "Run {:?} stopped: {e}. Partial report kept at {}",
                    self.name,
                    path.display()
                );
                Err(e)
            }
        }
    }

    fn fresh(&self, plan: &Plan) -> Result<Artifacts, CrawlError> {
        let recorder = Recorder::create(self.report_path(), self.report)?;
        Ok(Artifacts {
            tree: ContainerTree::new(plan.root.clone()),
            checkpoint: Checkpoint::new(self.checkpoint_path()),
            recorder,
            resumed: false,
        })
    }

    /// Restore both artifacts, or discard whatever exists and return `None`.
    fn restore(
        &self,
        plan: &Plan,
        prompt: &mut dyn ResumePrompt,
    ) -> Result<Option<Artifacts>, CrawlError> {
        let cp_path = self.checkpoint_path();
        let report_path = self.report_path();
        match (cp_path.exists(), report_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) | (false, true) => {
                warn!("Found only one artifact of run {:?}; discarding it", self.name);
                self.discard()?;
                return Ok(None);
            }
            (true, true) => {}
        }

        let summary = match Checkpoint::peek(&cp_path) {
            Ok(Some(summary)) => summary,
            Ok(None) => return Ok(None),
            Err(e) => return self.give_up(&e),
        };
        if !prompt.confirm_resume(&cp_path, &summary) {
            info!("Discarding previous state of run {:?}", self.name);
            self.discard()?;
            return Ok(None);
        }

        let Restored { checkpoint, tree } = match Checkpoint::load(&cp_path) {
            Ok(restored) => restored,
            Err(e) => return self.give_up(&e),
        };
        if let Some(reason) = scope_mismatch(&tree, plan) {
            return self.give_up(&reason);
        }
        let recorder =
            match Recorder::resume(&report_path, self.report, checkpoint.rows_recorded()) {
                Ok(recorder) => recorder,
                Err(e) => return self.give_up(&e),
            };
        Ok(Some(Artifacts {
            tree,
            checkpoint,
            recorder,
            resumed: true,
        }))
    }

    fn give_up(&self, reason: &dyn std::fmt::Display) -> Result<Option<Artifacts>, CrawlError> {
        warn!("Cannot resume run {:?} ({reason}); starting fresh", self.name);
        self.discard()?;
        Ok(None)
    }

    /// Delete both artifacts if present.
    pub fn discard(&self) -> Result<(), CrawlError> {
        Checkpoint::discard(&self.checkpoint_path())?;
        let report = self.report_path();
        match fs::remove_file(&report) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CrawlError::io(report, e)),
        }
    }
}

/// Why a restored tree cannot continue `plan`, if it cannot.
///
/// The roots must agree on kind, listing root, namespace and path. Under a
/// tenant root every restored namespace root must still be planned; planned
/// namespaces the checkpoint has not reached yet are fine.
fn scope_mismatch(tree: &ContainerTree, plan: &Plan) -> Option<String> {
    let restored = tree.node(tree.root());
    let planned = &plan.root;
    if restored.kind != planned.kind
        || restored.root != planned.root
        || restored.namespace != planned.namespace
        || restored.path_lower != planned.path_lower
    {
        return Some(format!(
            "checkpoint covers {} {:?}, this run covers {} {:?}",
            restored.namespace, restored.path_display, planned.namespace, planned.path_display
        ));
    }
    if !plan.is_tenant() {
        return None;
    }
    let ids: HashSet<&str> = plan
        .namespaces
        .iter()
        .map(|p| p.container.id.as_str())
        .collect();
    tree.children(tree.root())
        .into_iter()
        .map(|idx| tree.node(idx))
        .find(|node| !ids.contains(node.id.as_str()))
        .map(|node| format!("namespace {} is no longer planned", node.namespace))
}
