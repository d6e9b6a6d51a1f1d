//! Crawler module: depth-first, checkpointed traversal of a remote tenant.
//!
//! The engine runs on a single thread and is synchronous with the listing
//! calls. Each container moves `PROCESSING → DONE` exactly once: it is
//! checkpointed as soon as it is discovered and again when it completes,
//! after its report rows have been flushed. A restored DONE container is
//! never listed again; a restored PROCESSING container is walked from
//! scratch with its partial aggregate already reset by
//! [`Checkpoint::load`].
//!
//! Only [`Inspector`] workers run concurrently. They never touch the tree:
//! the engine collects their results when the owning container completes.

pub mod ownership;
pub mod pages;
pub mod scope;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::config::{CrawlConfig, InspectConfig};
use crate::error::{CrawlError, RemoteError};
use crate::inspect::{DuplicateIndex, InspectionBatch, Inspector};
use crate::model::{
    Container, ContainerId, ContainerTree, Leaf, LeafMeta, ListingRoot, NodeIndex,
};
use crate::progress::{ActivityEntry, CrawlStats, RecentActivity};
use crate::remote::{Cursor, Entry, EntryKind, Session};
use crate::report::rows::completion_rows;
use crate::report::{Recorder, ReportKind};

pub use ownership::{classify_container, OwnerIdentity, Ownership, Verdict};
pub use pages::Pages;
pub use scope::{plan, Plan, PlannedRoot, Scope, WalkContext};

/// How a walk of one container ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Listed, folded into its parent and recorded during this run.
    Completed(NodeIndex),
    /// Already DONE in the restored checkpoint; its parent accounts for it.
    AlreadyRecorded(NodeIndex),
}

impl WalkOutcome {
    pub fn index(self) -> NodeIndex {
        match self {
            Self::Completed(idx) | Self::AlreadyRecorded(idx) => idx,
        }
    }
}

/// Per-run traversal settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrawlOptions {
    pub report: ReportKind,
    /// Deepest container level given a row in a folders report.
    pub max_level: u32,
    /// Resolve each leaf's revision history for its creation time.
    pub resolve_revisions: bool,
}

impl CrawlOptions {
    pub fn new(report: ReportKind, config: &CrawlConfig) -> Self {
        Self {
            report,
            max_level: config.max_level,
            resolve_revisions: config.resolve_revisions,
        }
    }
}

/// The artifacts a crawl hands back when it stops.
pub struct CrawlParts {
    pub tree: ContainerTree,
    pub checkpoint: Checkpoint,
    pub recorder: Recorder,
}

/// Walks a [`ContainerTree`], keeping the checkpoint and report in step.
pub struct Crawler {
    session: Session,
    tree: ContainerTree,
    checkpoint: Checkpoint,
    recorder: Recorder,
    inspector: Option<Inspector>,
    duplicates: DuplicateIndex,
    stats: Arc<CrawlStats>,
    activity: Arc<RecentActivity>,
    cancel: Arc<AtomicBool>,
    options: CrawlOptions,
}

impl Crawler {
    /// `tree` is either a fresh tree holding the planned root or the tree
    /// restored from `checkpoint`.
    pub fn new(
        session: Session,
        tree: ContainerTree,
        checkpoint: Checkpoint,
        recorder: Recorder,
        options: CrawlOptions,
    ) -> Self {
        let stats = Arc::new(CrawlStats::seeded(&tree.node(tree.root()).agg));
        Self {
            session,
            tree,
            checkpoint,
            recorder,
            inspector: None,
            duplicates: DuplicateIndex::new(),
            stats,
            activity: Arc::new(RecentActivity::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    /// Share an interrupt flag with the caller (signal handler, test).
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicateIndex) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn with_recent_window(mut self, capacity: usize) -> Self {
        self.activity = Arc::new(RecentActivity::new(capacity));
        self
    }

    /// Turn on content inspection. Only a files report carries inspection
    /// results, so other report kinds leave it off.
    pub fn enable_inspection(&mut self, config: &InspectConfig) -> Result<(), CrawlError> {
        if !config.enabled || self.options.report != ReportKind::Files {
            return Ok(());
        }
        let inspector = Inspector::new(self.session.clone(), config, self.stats.clone())?;
        info!(
            "Content inspection enabled with {} workers",
            inspector.budget().limit()
        );
        self.inspector = Some(inspector);
        Ok(())
    }

    pub fn stats(&self) -> Arc<CrawlStats> {
        self.stats.clone()
    }

    pub fn activity(&self) -> Arc<RecentActivity> {
        self.activity.clone()
    }

    pub fn tree(&self) -> &ContainerTree {
        &self.tree
    }

    pub fn inspector(&self) -> Option<&Inspector> {
        self.inspector.as_ref()
    }

    pub fn into_parts(self) -> CrawlParts {
        CrawlParts {
            tree: self.tree,
            checkpoint: self.checkpoint,
            recorder: self.recorder,
        }
    }

    /// Walk the planned root to completion.
    ///
    /// For a tenant plan every planned namespace root is attached under the
    /// synthetic root (or reused from the checkpoint) and walked in plan
    /// order before the root itself completes.
    pub fn run(&mut self, plan: &Plan) -> Result<WalkOutcome, CrawlError> {
        let root = self.tree.root();
        if self.tree.node(root).is_done() {
            info!("Checkpoint root is already complete; nothing to walk");
            return Ok(WalkOutcome::AlreadyRecorded(root));
        }
        self.checkpoint.record(&self.tree, root)?;

        if !plan.is_tenant() {
            return self.walk(root, &plan.context);
        }

        for planned in &plan.namespaces {
            self.check_cancel()?;
            let idx = match self.tree.index_of(planned.container.id.as_str()) {
                Some(idx) => idx,
                None => {
                    let idx = self.tree.add_container(root, planned.container.clone());
                    self.checkpoint.record(&self.tree, idx)?;
                    idx
                }
            };
            self.walk(idx, &planned.context)?;
        }
        self.complete(root, Vec::new(), InspectionBatch::new())?;
        Ok(WalkOutcome::Completed(root))
    }

    /// Walk one container: list every page, recurse into sub-containers
    /// depth-first, fold leaves, then complete the container.
    pub fn walk(&mut self, index: NodeIndex, ctx: &WalkContext) -> Result<WalkOutcome, CrawlError> {
        if self.tree.node(index).is_done() {
            debug!("{} already recorded", self.tree.full_path(index));
            return Ok(WalkOutcome::AlreadyRecorded(index));
        }

        let (root, path) = {
            let node = self.tree.node(index);
            (node.root.clone(), node.path_lower.clone())
        };
        debug!("Listing {}", self.tree.full_path(index));

        let session = self.session.clone();
        let mut pages = Pages::new(|cursor: Option<&Cursor>| match cursor {
            None => session.call("list folder", |s| s.list_folder(&root, &path)),
            Some(c) => session.call("continue folder listing", |s| s.list_folder_continue(c)),
        });

        let mut leaves = Vec::new();
        let mut batch = InspectionBatch::new();
        loop {
            self.check_cancel()?;
            let Some(page) = pages.next() else {
                break;
            };
            for entry in page? {
                self.check_cancel()?;
                if entry.is_folder() {
                    self.visit_container(index, entry, ctx)?;
                } else {
                    self.visit_leaf(index, &root, entry, &mut leaves, &mut batch)?;
                }
            }
        }

        self.complete(index, leaves, batch)?;
        Ok(WalkOutcome::Completed(index))
    }

    fn check_cancel(&self) -> Result<(), CrawlError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(CrawlError::Interrupted);
        }
        Ok(())
    }

    fn visit_container(
        &mut self,
        parent: NodeIndex,
        entry: Entry,
        ctx: &WalkContext,
    ) -> Result<(), CrawlError> {
        if let Some(existing) = self.tree.index_of(&entry.id) {
            self.walk(existing, ctx)?;
            return Ok(());
        }

        let verdict = classify_container(
            &self.session,
            self.tree.node(parent),
            entry.shared_id(),
            ctx.verify_owner.as_ref(),
        )?;
        let ownership = match verdict {
            Verdict::Owned(ownership) => ownership,
            Verdict::NotOwned => {
                debug!(
                    "Skipping {}: not owned by the walking identity",
                    entry.path_display
                );
                self.stats.add_skipped();
                return Ok(());
            }
        };

        let mut child = Container::child_of(
            self.tree.node(parent),
            ContainerId::new(entry.id.as_str()),
            entry.path_display,
            entry.path_lower,
        );
        ownership.apply(&mut child);
        let idx = self.tree.add_container(parent, child);
        self.checkpoint.record(&self.tree, idx)?;
        self.walk(idx, ctx)?;
        Ok(())
    }

    fn visit_leaf(
        &mut self,
        parent: NodeIndex,
        root: &ListingRoot,
        entry: Entry,
        leaves: &mut Vec<Leaf>,
        batch: &mut InspectionBatch,
    ) -> Result<(), CrawlError> {
        let Entry {
            id,
            name,
            path_display,
            path_lower,
            kind,
        } = entry;
        let EntryKind::File {
            size,
            content_hash,
            modified,
            shared_id,
        } = kind
        else {
            return Ok(());
        };

        let (created, modified) = self.leaf_times(root, &path_lower, modified)?;
        let mut leaf = Leaf::new(LeafMeta {
            id: id.into(),
            name: name.into(),
            path_display,
            path_lower,
            size,
            content_hash,
            created,
            modified,
        });

        self.tree.fold_leaf(parent, &leaf);
        self.stats.add_file(leaf.size);

        if self.options.report != ReportKind::Files {
            return Ok(());
        }

        match shared_id
            .as_deref()
            .map(|id| ownership::fetch_grants(&self.session, id))
            .transpose()?
            .flatten()
        {
            Some(grants) => {
                let (members, groups) = ownership::grant_labels(&grants);
                leaf.members = members;
                leaf.groups = groups;
            }
            None => {
                let node = self.tree.node(parent);
                leaf.members = node.members.clone();
                leaf.groups = node.groups.clone();
            }
        }
        if let Some(hash) = &leaf.content_hash {
            leaf.duplicate = self.duplicates.observe(hash);
        }
        if let Some(inspector) = &self.inspector {
            if inspector.wants(&leaf) {
                inspector.submit(batch, leaves.len(), root, &leaf);
            }
        }
        leaves.push(leaf);
        Ok(())
    }

    /// Oldest and newest revision times, falling back to the listed
    /// modification time.
    fn leaf_times(
        &self,
        root: &ListingRoot,
        path: &str,
        listed: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), CrawlError> {
        if !self.options.resolve_revisions {
            return Ok((listed, listed));
        }
        match self
            .session
            .call("list revisions", |s| s.list_revisions(root, path))
        {
            Ok(revisions) => {
                let times = revisions.iter().map(|r| r.modified);
                let created = times.clone().min().unwrap_or(listed);
                let modified = times.max().unwrap_or(listed);
                Ok((created, modified))
            }
            Err(RemoteError::NotFound { .. }) => Ok((listed, listed)),
            Err(e) => Err(e.into()),
        }
    }

    /// Finish a container: apply its inspections, freeze it, fold it into
    /// its parent, flush its rows and checkpoint it. The rows are durable
    /// before the checkpoint that accounts for them.
    fn complete(
        &mut self,
        index: NodeIndex,
        mut leaves: Vec<Leaf>,
        batch: InspectionBatch,
    ) -> Result<(), CrawlError> {
        if let Some(inspector) = &self.inspector {
            if batch.submitted() > 0 {
                for (slot, found) in inspector.collect(batch) {
                    if let Some(leaf) = leaves.get_mut(slot) {
                        leaf.apply_inspection(found.embedded, found.links);
                    }
                }
            }
        }

        self.tree.mark_done(index, Utc::now());
        if let Some(parent) = self.tree.node(index).parent {
            self.tree.fold_container(parent, index);
            self.stats.add_folder();
        }

        let rows = completion_rows(
            self.options.report,
            &self.tree,
            index,
            self.options.max_level,
            &leaves,
        );
        self.tree.node_mut(index).rows = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        self.recorder.append(&rows)?;
        self.checkpoint.record(&self.tree, index)?;

        let node = self.tree.node(index);
        debug!(
            "Completed {} ({} files, {} bytes)",
            self.tree.full_path(index),
            node.agg.files,
            node.agg.size
        );
        self.activity.push(ActivityEntry {
            path: self.tree.full_path(index),
            size: node.agg.size,
            files: node.agg.files,
            elapsed_secs: node.elapsed_secs,
        });
        Ok(())
    }
}
