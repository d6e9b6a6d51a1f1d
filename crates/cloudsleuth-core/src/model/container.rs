//! A single container (folder) in the arena-allocated crawl tree.
//!
//! Containers are stored in a flat `Vec<Container>` owned by
//! [`ContainerTree`](super::ContainerTree). Parent-child relationships use
//! indices rather than pointers, so ancestor folds are an explicit walk up
//! the arena and checkpoint projection needs no pointer fix-ups.

use std::fmt;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Lightweight index into the arena `Vec<Container>`.
///
/// Uses `u32` to keep nodes small. A tenant with more than ~4 billion
/// folders is not a realistic target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// Create a new `NodeIndex` from a `usize`.
    #[inline]
    pub fn new(index: usize) -> Self {
        debug_assert!(index <= u32::MAX as usize, "NodeIndex overflow");
        Self(index as u32)
    }

    /// Return the index as a `usize` for Vec indexing.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Provider-assigned or synthetic container identity.
///
/// Synthetic ids are used for virtual roots: `root` for the walk root,
/// `namespace:<id>` for team folders and other namespaces, and
/// `member:<id>` for a member's personal space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub CompactString);

impl ContainerId {
    /// The id of the traversal's synthetic root.
    pub const ROOT: &'static str = "root";

    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self::new(Self::ROOT)
    }

    pub fn namespace(namespace_id: &str) -> Self {
        Self(compact_str::format_compact!("namespace:{namespace_id}"))
    }

    pub fn member(member_id: &str) -> Self {
        Self(compact_str::format_compact!("member:{member_id}"))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::borrow::Borrow<str> for ContainerId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which namespace a listing call is issued against.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ListingRoot {
    /// The authenticated account's own space.
    Home,
    /// A shared namespace (team folder, shared folder, app folder).
    Namespace(String),
    /// A team member's personal space, listed on the member's behalf.
    Member(String),
}

/// Ownership / sharing classification of a container.
///
/// Inherited from the parent unless the crawler overrides it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    TeamOwned,
    Private,
    Shared,
    Sandboxed,
    Other,
}

impl Classification {
    /// Human-readable label for reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::TeamOwned => "Team",
            Self::Private => "Private",
            Self::Shared => "Shared",
            Self::Sandboxed => "Sandboxed",
            Self::Other => "Other",
        }
    }
}

/// Structural role of a container in the crawl tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Synthetic root above several namespace roots.
    TenantRoot,
    /// Root of one namespace (personal space, team folder, ...). Depth 0.
    NamespaceRoot,
    /// A folder discovered through a listing.
    Folder,
}

/// Processing status. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Processing,
    Done,
}

/// Running totals folded into a container from its descendants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Total bytes of every leaf in the subtree.
    pub size: u64,
    /// Number of leaves in the subtree.
    pub files: u64,
    /// Number of leaves directly inside this container.
    pub direct_files: u64,
    /// Number of completed sub-containers in the subtree.
    pub folders: u64,
    /// Number of completed direct sub-containers.
    pub direct_folders: u64,
    /// Direct sub-containers classified private.
    pub private_folders: u64,
    /// Direct sub-containers classified shared.
    pub shared_folders: u64,
    /// Oldest leaf creation (first revision) time in the subtree.
    pub created: Option<DateTime<Utc>>,
    /// Newest leaf modification (latest revision) time in the subtree.
    pub modified: Option<DateTime<Utc>>,
}

impl Aggregate {
    /// `true` when nothing at all has been folded in.
    pub fn is_empty(&self) -> bool {
        self.size == 0 && self.files == 0 && self.folders == 0
    }

    pub(crate) fn absorb_times(
        &mut self,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) {
        if let Some(c) = created {
            if self.created.map_or(true, |cur| c < cur) {
                self.created = Some(c);
            }
        }
        if let Some(m) = modified {
            if self.modified.map_or(true, |cur| m > cur) {
                self.modified = Some(m);
            }
        }
    }
}

/// A single container in the crawl tree.
#[derive(Clone, Debug)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,

    /// Last path segment (empty for roots).
    pub name: CompactString,

    /// Canonical path as displayed by the provider. `/` for a namespace root.
    pub path_display: String,

    /// Lower-cased path used for listing calls. Empty for a namespace root.
    pub path_lower: String,

    /// Namespace tag: member email, team folder name, or empty.
    pub namespace: CompactString,

    pub classification: Classification,

    /// Depth within the namespace; namespace and walk roots are 0.
    pub depth: u32,

    /// Namespace the container is listed against.
    pub root: ListingRoot,

    /// Index of the parent node. `None` only for the walk root.
    pub parent: Option<NodeIndex>,

    /// First child container. Children form a singly-linked list via
    /// [`next_sibling`](Self::next_sibling).
    pub first_child: Option<NodeIndex>,

    /// Next sibling under the same parent.
    pub next_sibling: Option<NodeIndex>,

    /// Owning principal, resolved from sharing grants or inherited.
    pub owner: Option<String>,

    /// Granted users, formatted `(O)alice@example.com`.
    pub members: Vec<String>,

    /// Granted groups, formatted like [`members`](Self::members).
    pub groups: Vec<String>,

    pub agg: Aggregate,
    pub status: Status,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,

    /// Report rows emitted when this container completed.
    pub rows: u32,
}

impl Container {
    /// Create a PROCESSING container with empty aggregates.
    pub fn new(
        id: ContainerId,
        kind: ContainerKind,
        path_display: impl Into<String>,
        root: ListingRoot,
        namespace: impl Into<CompactString>,
        classification: Classification,
    ) -> Self {
        let path_display = normalise_display(path_display.into());
        let path_lower = listing_path(&path_display);
        let name = path_display
            .rsplit('/')
            .next()
            .map(CompactString::new)
            .unwrap_or_default();
        Self {
            id,
            kind,
            name,
            path_display,
            path_lower,
            namespace: namespace.into(),
            classification,
            depth: 0,
            root,
            parent: None,
            first_child: None,
            next_sibling: None,
            owner: None,
            members: Vec::new(),
            groups: Vec::new(),
            agg: Aggregate::default(),
            status: Status::Processing,
            started_at: Utc::now(),
            finished_at: None,
            elapsed_secs: 0.0,
            rows: 0,
        }
    }

    /// Create a folder discovered under `parent`, inheriting its namespace,
    /// listing root, classification and owner.
    pub fn child_of(
        parent: &Container,
        id: ContainerId,
        path_display: impl Into<String>,
        path_lower: impl Into<String>,
    ) -> Self {
        let mut child = Self::new(
            id,
            ContainerKind::Folder,
            path_display,
            parent.root.clone(),
            parent.namespace.clone(),
            parent.classification,
        );
        child.path_lower = path_lower.into();
        child.depth = if parent.kind == ContainerKind::TenantRoot {
            0
        } else {
            parent.depth + 1
        };
        child.owner = parent.owner.clone();
        child
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// `true` for the root of a member's personal space.
    pub fn is_personal_space_root(&self) -> bool {
        self.kind == ContainerKind::NamespaceRoot && self.classification == Classification::Private
    }
}

/// Display paths always start with `/`; the empty path is the namespace root.
fn normalise_display(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Listing paths are lower-cased and the namespace root is the empty string.
fn listing_path(display: &str) -> String {
    if display == "/" {
        String::new()
    } else {
        display.to_lowercase()
    }
}
