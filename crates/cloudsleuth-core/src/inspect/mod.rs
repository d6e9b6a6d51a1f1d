//! Bounded-concurrency deep inspection of document-like leaves.
//!
//! The engine submits a leaf through [`Inspector::submit`], which blocks
//! until a [`WorkerBudget`] slot is free and then spawns a named worker
//! thread. Workers never touch the crawl tree: each result travels back
//! over the owning container's [`InspectionBatch`] channel and is applied
//! on the engine thread when that container completes.

pub mod budget;
pub mod document;
pub mod duplicates;
pub mod links;

use std::collections::HashSet;
use std::io::{Seek, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::config::InspectConfig;
use crate::error::{CrawlError, InspectError};
use crate::model::{Leaf, LinkRecord, ListingRoot};
use crate::progress::CrawlStats;
use crate::remote::Session;

pub use budget::{SlotGuard, WorkerBudget};
pub use document::{DocumentContent, DocumentParser};
pub use duplicates::DuplicateIndex;
pub use links::LinkMatcher;

/// Result of inspecting one leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inspection {
    pub embedded: Vec<String>,
    pub links: Vec<LinkRecord>,
    /// Download or parse failed; `embedded` and `links` are empty.
    pub failed: bool,
}

impl Inspection {
    fn failure() -> Self {
        Self {
            failed: true,
            ..Default::default()
        }
    }
}

type Outcome = (usize, Inspection);

/// Pending inspections for one container.
pub struct InspectionBatch {
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
    submitted: usize,
}

impl InspectionBatch {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            submitted: 0,
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }
}

impl Default for InspectionBatch {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerContext {
    session: Session,
    parser: DocumentParser,
    matcher: LinkMatcher,
    scratch_dir: Option<PathBuf>,
    stats: Arc<CrawlStats>,
}

/// Dispatches inspection work within a fixed worker budget.
pub struct Inspector {
    ctx: Arc<WorkerContext>,
    budget: Arc<WorkerBudget>,
    extensions: HashSet<String>,
    spawned: AtomicUsize,
}

impl Inspector {
    pub fn new(
        session: Session,
        config: &InspectConfig,
        stats: Arc<CrawlStats>,
    ) -> Result<Self, CrawlError> {
        let matcher = LinkMatcher::new(&config.link_pattern).map_err(|e| {
            CrawlError::InvalidConfig {
                message: format!("link pattern: {e}"),
            }
        })?;
        let parser = DocumentParser::new(config.max_inspect_bytes).map_err(|e| CrawlError::InvalidConfig {
            message: e.to_string(),
        })?;
        Ok(Self {
            ctx: Arc::new(WorkerContext {
                session,
                parser,
                matcher,
                scratch_dir: config.scratch_dir.clone(),
                stats,
            }),
            budget: WorkerBudget::new(config.concurrency),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            spawned: AtomicUsize::new(0),
        })
    }

    pub fn budget(&self) -> &Arc<WorkerBudget> {
        &self.budget
    }

    /// `true` if the leaf's extension is in the configured set.
    pub fn wants(&self, leaf: &Leaf) -> bool {
        leaf.extension()
            .is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Queue `leaf` for inspection; `slot` identifies it within `batch`.
    ///
    /// Blocks while every worker slot is busy.
    pub fn submit(&self, batch: &mut InspectionBatch, slot: usize, root: &ListingRoot, leaf: &Leaf) {
        let Some(ext) = leaf.extension() else {
            return;
        };
        batch.submitted += 1;
        let guard = self.budget.acquire();
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::clone(&self.ctx);
        let tx = batch.tx.clone();
        let root = root.clone();
        let path = leaf.path_lower.clone();

        let spawned = thread::Builder::new()
            .name(format!("cloudsleuth-inspect-{n}"))
            .spawn(move || {
                let _guard = guard;
                let outcome = match inspect_one(&ctx, &root, &path, &ext) {
                    Ok(found) => {
                        ctx.stats.add_inspected();
                        found
                    }
                    Err(e) => {
                        warn!("Inspection of {path} failed: {e}");
                        ctx.stats.add_inspect_failed();
                        Inspection::failure()
                    }
                };
                let _ = tx.send((slot, outcome));
            });
        if let Err(e) = spawned {
            warn!("Could not start inspection worker for {}: {e}", leaf.path_display);
            self.ctx.stats.add_inspect_failed();
            let _ = batch.tx.send((slot, Inspection::failure()));
        }
    }

    /// Wait for every inspection in `batch`.
    ///
    /// A worker that died without reporting counts as a failure and its
    /// slot is simply absent from the result.
    pub fn collect(&self, batch: InspectionBatch) -> Vec<(usize, Inspection)> {
        let InspectionBatch { tx, rx, submitted } = batch;
        drop(tx);
        let results: Vec<Outcome> = rx.iter().collect();
        if results.len() < submitted {
            let lost = submitted - results.len();
            warn!("{lost} inspection worker(s) exited without a result");
            for _ in 0..lost {
                self.ctx.stats.add_inspect_failed();
            }
        }
        results
    }
}

/// Download to a scratch file, extract, match and resolve links. The
/// scratch file is removed when it goes out of scope on every path.
fn inspect_one(
    ctx: &WorkerContext,
    root: &ListingRoot,
    path: &str,
    ext: &str,
) -> Result<Inspection, InspectError> {
    let suffix = format!(".{ext}");
    let mut builder = tempfile::Builder::new();
    builder.prefix("cloudsleuth-").suffix(&suffix);
    let mut scratch = match &ctx.scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    let bytes = ctx.session.call("download", |s| {
        let file = scratch.as_file_mut();
        file.set_len(0)?;
        file.rewind()?;
        s.download(root, path, file)
    })?;
    scratch.as_file_mut().flush()?;
    debug!("Downloaded {bytes} bytes of {path} for inspection");

    let content = ctx.parser.extract(scratch.path(), ext)?;
    let links = ctx
        .matcher
        .find(&content)
        .iter()
        .map(|url| links::resolve(&ctx.session, url))
        .collect();
    Ok(Inspection {
        embedded: content.embedded,
        links,
        failed: false,
    })
}
