//! Durable snapshot of every container touched by a crawl.
//!
//! The artifact is a JSON object mapping container id to its latest
//! [`CheckpointRecord`]. It is rewritten wholesale on every
//! [`Checkpoint::record`] through a temp file in the same directory followed
//! by a rename, so a crash mid-write leaves the previous snapshot intact.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CheckpointError;
use crate::model::{
    Aggregate, Classification, Container, ContainerId, ContainerKind, ContainerTree, ListingRoot,
    NodeIndex, Status,
};

/// Serialisable projection of a [`Container`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub parent: Option<ContainerId>,
    pub kind: ContainerKind,
    pub name: CompactString,
    pub path_display: String,
    pub path_lower: String,
    pub namespace: CompactString,
    pub classification: Classification,
    pub depth: u32,
    pub root: ListingRoot,
    pub owner: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub agg: Aggregate,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    /// When this projection was taken.
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    #[serde(default)]
    pub rows: u32,
}

impl CheckpointRecord {
    fn project(tree: &ContainerTree, node: &Container, now: DateTime<Utc>) -> Self {
        Self {
            parent: node.parent.map(|p| tree.node(p).id.clone()),
            kind: node.kind,
            name: node.name.clone(),
            path_display: node.path_display.clone(),
            path_lower: node.path_lower.clone(),
            namespace: node.namespace.clone(),
            classification: node.classification,
            depth: node.depth,
            root: node.root.clone(),
            owner: node.owner.clone(),
            members: node.members.clone(),
            groups: node.groups.clone(),
            agg: node.agg,
            status: node.status,
            started_at: node.started_at,
            updated_at: now,
            finished_at: node.finished_at,
            elapsed_secs: node.elapsed_secs,
            rows: node.rows,
        }
    }

    /// Rebuild the container. PROCESSING containers get their start time
    /// shifted to `now` minus the time already accumulated.
    fn restore(&self, id: ContainerId, now: DateTime<Utc>) -> Container {
        let started_at = match self.status {
            Status::Processing => now - (self.updated_at - self.started_at),
            Status::Done => self.started_at,
        };
        Container {
            id,
            kind: self.kind,
            name: self.name.clone(),
            path_display: self.path_display.clone(),
            path_lower: self.path_lower.clone(),
            namespace: self.namespace.clone(),
            classification: self.classification,
            depth: self.depth,
            root: self.root.clone(),
            parent: None,
            first_child: None,
            next_sibling: None,
            owner: self.owner.clone(),
            members: self.members.clone(),
            groups: self.groups.clone(),
            agg: self.agg,
            status: self.status,
            started_at,
            finished_at: self.finished_at,
            elapsed_secs: self.elapsed_secs,
            rows: self.rows,
        }
    }

    /// Never-listed container: nothing would be lost by re-discovering it.
    fn is_untouched(&self) -> bool {
        self.status == Status::Processing && self.agg.is_empty()
    }
}

/// Summary of the root record, shown when asking whether to resume.
#[derive(Clone, Debug, PartialEq)]
pub struct RootSummary {
    pub records: usize,
    pub files: u64,
    pub folders: u64,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
}

/// A checkpoint restored from disk.
pub struct Restored {
    pub checkpoint: Checkpoint,
    pub tree: ContainerTree,
}

/// The in-memory mapping plus the artifact path it persists to.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    records: BTreeMap<ContainerId, CheckpointRecord>,
}

impl Checkpoint {
    /// `<session_dir>/<name>.json`
    pub fn path_for(session_dir: &Path, name: &str) -> PathBuf {
        session_dir.join(format!("{name}.json"))
    }

    /// An empty checkpoint that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CheckpointRecord> {
        self.records.get(id)
    }

    /// Report rows accounted for by DONE records.
    pub fn rows_recorded(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.status == Status::Done)
            .map(|r| u64::from(r.rows))
            .sum()
    }

    /// Project `index` and every ancestor, then persist the whole mapping.
    ///
    /// A DONE record is never replaced by a PROCESSING projection.
    pub fn record(&mut self, tree: &ContainerTree, index: NodeIndex) -> Result<(), CheckpointError> {
        let now = Utc::now();
        for idx in std::iter::once(index).chain(tree.ancestors(index)) {
            let node = tree.node(idx);
            if node.status == Status::Processing
                && self
                    .records
                    .get(&node.id)
                    .is_some_and(|r| r.status == Status::Done)
            {
                continue;
            }
            self.records
                .insert(node.id.clone(), CheckpointRecord::project(tree, node, now));
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), CheckpointError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir, e))?;

        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CheckpointError::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &self.records).map_err(|e| {
                CheckpointError::Malformed {
                    path: self.path.clone(),
                    source: e,
                }
            })?;
            writer
                .flush()
                .map_err(|e| CheckpointError::io(&self.path, e))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| CheckpointError::io(&self.path, e.error))?;
        Ok(())
    }

    fn read(path: &Path) -> Result<BTreeMap<ContainerId, CheckpointRecord>, CheckpointError> {
        let data = fs::read_to_string(path).map_err(|e| CheckpointError::io(path, e))?;
        serde_json::from_str(&data).map_err(|e| CheckpointError::Malformed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Root record summary, or `None` when no checkpoint exists.
    pub fn peek(path: &Path) -> Result<Option<RootSummary>, CheckpointError> {
        if !path.exists() {
            return Ok(None);
        }
        let records = Self::read(path)?;
        let root = records
            .get(ContainerId::ROOT)
            .ok_or_else(|| CheckpointError::MissingRoot {
                path: path.to_path_buf(),
            })?;
        Ok(Some(RootSummary {
            records: records.len(),
            files: root.agg.files,
            folders: root.agg.folders,
            size: root.agg.size,
            updated_at: root.updated_at,
        }))
    }

    /// Load the checkpoint at `path` and rebuild the partial tree.
    ///
    /// Untouched PROCESSING leaves of the record graph are dropped. The
    /// partial aggregates of the remaining PROCESSING containers are reset
    /// and every DONE subtree hanging off them is replayed once, so the
    /// re-walk recomputes exactly what the interrupted walk had not yet
    /// finalised.
    pub fn load(path: &Path) -> Result<Restored, CheckpointError> {
        let mut records = Self::read(path)?;
        let now = Utc::now();

        let referenced: std::collections::HashSet<ContainerId> =
            records.values().filter_map(|r| r.parent.clone()).collect();
        let before = records.len();
        records.retain(|id, r| {
            id.as_str() == ContainerId::ROOT || referenced.contains(id) || !r.is_untouched()
        });
        if records.len() != before {
            debug!("Dropped {} untouched checkpoint records", before - records.len());
        }

        let root_id = ContainerId::root();
        let root = records
            .get(&root_id)
            .ok_or_else(|| CheckpointError::MissingRoot {
                path: path.to_path_buf(),
            })?;
        let mut tree = ContainerTree::new(root.restore(root_id.clone(), now));

        let mut children: HashMap<&ContainerId, Vec<&ContainerId>> = HashMap::new();
        for (id, record) in &records {
            if let Some(parent) = &record.parent {
                children.entry(parent).or_default().push(id);
            }
        }

        // Breadth-first from the root: every parent is placed before its children.
        let mut queue = VecDeque::from([(&root_id, tree.root())]);
        while let Some((id, idx)) = queue.pop_front() {
            for child_id in children.get(id).into_iter().flatten() {
                let record = &records[*child_id];
                let child = tree.add_container(idx, record.restore((*child_id).clone(), now));
                queue.push_back((*child_id, child));
            }
        }

        if tree.len() != records.len() {
            let (id, record) = records
                .iter()
                .find(|(id, _)| tree.index_of(id.as_str()).is_none())
                .ok_or_else(|| CheckpointError::MissingRoot {
                    path: path.to_path_buf(),
                })?;
            return Err(CheckpointError::Orphan {
                id: id.to_string(),
                parent: record
                    .parent
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            });
        }

        let partial: Vec<NodeIndex> = tree
            .iter()
            .filter(|(_, n)| n.status == Status::Processing)
            .map(|(i, _)| i)
            .collect();
        for &idx in &partial {
            tree.reset_partial(idx);
        }
        let frontier: Vec<NodeIndex> = tree
            .iter()
            .filter(|(_, n)| {
                n.is_done()
                    && n.parent
                        .is_some_and(|p| tree.node(p).status == Status::Processing)
            })
            .map(|(i, _)| i)
            .collect();
        for &idx in &frontier {
            tree.replay_done(idx);
        }

        info!(
            "Restored checkpoint {}: {} containers ({} in progress, {} completed subtrees)",
            path.display(),
            tree.len(),
            partial.len(),
            frontier.len()
        );

        Ok(Restored {
            checkpoint: Checkpoint {
                path: path.to_path_buf(),
                records,
            },
            tree,
        })
    }

    /// Delete the artifact.
    pub fn remove(self) -> Result<(), CheckpointError> {
        Self::discard(&self.path)
    }

    /// Delete the artifact at `path` if it exists.
    pub fn discard(path: &Path) -> Result<(), CheckpointError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(path, e)),
        }
    }
}
