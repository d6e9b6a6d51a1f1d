//! A leaf (file) discovered by a listing.
//!
//! Leaves are not stored in the arena. They are folded into their parent
//! container as soon as they are listed and then either emitted as a report
//! row or handed to the inspector.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Listing metadata needed to build a [`Leaf`].
#[derive(Clone, Debug)]
pub struct LeafMeta {
    pub id: CompactString,
    pub name: CompactString,
    pub path_display: String,
    pub path_lower: String,
    pub size: u64,
    pub content_hash: Option<String>,
    /// Oldest revision timestamp.
    pub created: DateTime<Utc>,
    /// Latest revision timestamp.
    pub modified: DateTime<Utc>,
}

/// What a resolved link points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    File,
    Folder,
}

/// An outbound link found inside a leaf's content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRecord {
    Resolved {
        url: String,
        target: TargetKind,
        name: String,
        size: u64,
    },
    /// The link could not be resolved (revoked, private, malformed).
    Inaccessible { url: String },
}

impl LinkRecord {
    pub fn url(&self) -> &str {
        match self {
            Self::Resolved { url, .. } | Self::Inaccessible { url } => url,
        }
    }
}

/// A single file.
#[derive(Clone, Debug)]
pub struct Leaf {
    pub id: CompactString,
    pub name: CompactString,
    pub path_display: String,
    pub path_lower: String,
    pub size: u64,
    pub content_hash: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Granted user labels; the leaf's own grants if shared, else the parent's.
    pub members: Vec<String>,
    pub groups: Vec<String>,
    /// Another leaf with the same fingerprint was seen first.
    pub duplicate: bool,
    /// Names of sub-objects embedded in the document.
    pub embedded: Vec<String>,
    pub links: Vec<LinkRecord>,
    inspected: bool,
}

impl Leaf {
    pub fn new(meta: LeafMeta) -> Self {
        Self {
            id: meta.id,
            name: meta.name,
            path_display: meta.path_display,
            path_lower: meta.path_lower,
            size: meta.size,
            content_hash: meta.content_hash,
            created: meta.created,
            modified: meta.modified,
            members: Vec::new(),
            groups: Vec::new(),
            duplicate: false,
            embedded: Vec::new(),
            links: Vec::new(),
            inspected: false,
        }
    }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Attach inspection results. Only the first call has an effect.
    pub fn apply_inspection(&mut self, embedded: Vec<String>, links: Vec<LinkRecord>) -> bool {
        if self.inspected {
            return false;
        }
        self.embedded = embedded;
        self.links = links;
        self.inspected = true;
        true
    }

    pub fn is_inspected(&self) -> bool {
        self.inspected
    }
}
