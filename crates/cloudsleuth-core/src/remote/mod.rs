//! The remote paged-listing interface and its concrete stores.
//!
//! Every [`RemoteStore`] call is blocking and idempotent. The only failure
//! the crawler recovers from is [`RemoteError::AuthExpired`], which
//! [`Session`] handles by refreshing the token and retrying once.

pub mod local;
pub mod memory;
pub mod session;

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
pub use crate::model::ListingRoot;

pub use local::LocalStore;
pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use session::{NoopRefresher, Session, TokenRefresher};

/// Opaque continuation token returned with every page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

/// One page of a paged enumeration.
#[derive(Clone, Debug)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub cursor: Cursor,
    pub has_more: bool,
}

pub type Page = Paged<Entry>;
pub type MemberPage = Paged<Member>;
pub type NamespacePage = Paged<Namespace>;

/// An immediate child returned by a folder listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub path_display: String,
    pub path_lower: String,
    pub kind: EntryKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Folder {
        /// Present when the folder carries sharing metadata.
        shared_id: Option<String>,
    },
    File {
        size: u64,
        content_hash: Option<String>,
        modified: DateTime<Utc>,
        shared_id: Option<String>,
    },
}

impl Entry {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, EntryKind::Folder { .. })
    }

    /// Sharing identifier, if the entry carries sharing metadata.
    pub fn shared_id(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Folder { shared_id } | EntryKind::File { shared_id, .. } => {
                shared_id.as_deref()
            }
        }
    }
}

/// Access level of a grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Owner,
    Editor,
    Viewer,
    ViewerNoComment,
    Traverse,
}

impl AccessLevel {
    /// Single-letter tag used in member labels: `(O)`, `(E)`, `(V)`, ...
    pub fn initial(self) -> char {
        match self {
            Self::Owner => 'O',
            Self::Editor => 'E',
            Self::Viewer | Self::ViewerNoComment => 'V',
            Self::Traverse => 'T',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrant {
    pub email: String,
    pub account_id: String,
    pub access: AccessLevel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupGrant {
    pub name: String,
    pub access: AccessLevel,
}

/// Principals granted access to a shared item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    #[serde(default)]
    pub users: Vec<UserGrant>,
    #[serde(default)]
    pub groups: Vec<GroupGrant>,
}

impl Grants {
    pub fn owner(&self) -> Option<&UserGrant> {
        self.owners().next()
    }

    /// Every user grant at owner level, in listing order.
    pub fn owners(&self) -> impl Iterator<Item = &UserGrant> {
        self.users.iter().filter(|u| u.access == AccessLevel::Owner)
    }
}

/// One stored revision of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub modified: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl Member {
    /// Case-insensitive match on display name or email.
    pub fn matches(&self, identity: &str) -> bool {
        self.email.eq_ignore_ascii_case(identity) || self.name.eq_ignore_ascii_case(identity)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    TeamFolder,
    SharedFolder,
    AppFolder,
    TeamMemberFolder,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub kind: NamespaceKind,
    /// Member owning a `TeamMemberFolder` or `AppFolder` namespace.
    #[serde(default)]
    pub team_member_id: Option<String>,
}

/// What a shared link resolves to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkTarget {
    File { name: String, size: u64 },
    Folder { name: String },
}

/// The paged listing API of a remote tenant.
pub trait RemoteStore: Send + Sync {
    /// First page of the immediate children of `path` (`""` is the root).
    fn list_folder(&self, root: &ListingRoot, path: &str) -> Result<Page, RemoteError>;

    /// Next page of a folder listing, including shared-link listings.
    fn list_folder_continue(&self, cursor: &Cursor) -> Result<Page, RemoteError>;

    /// Principals granted access to the item with sharing id `shared_id`.
    fn list_grants(&self, shared_id: &str) -> Result<Grants, RemoteError>;

    /// Stored revisions of the file at `path`.
    fn list_revisions(&self, root: &ListingRoot, path: &str) -> Result<Vec<Revision>, RemoteError>;

    /// One page of tenant members. `None` requests the first page.
    fn list_members(&self, cursor: Option<&Cursor>) -> Result<MemberPage, RemoteError>;

    /// One page of tenant namespaces. `None` requests the first page.
    fn list_namespaces(&self, cursor: Option<&Cursor>) -> Result<NamespacePage, RemoteError>;

    fn resolve_shared_link(&self, url: &str) -> Result<LinkTarget, RemoteError>;

    /// First page of a folder reached through a shared link. `path` is
    /// relative to the link target (`""` for the target itself).
    fn list_shared_link_folder(&self, url: &str, path: &str) -> Result<Page, RemoteError>;

    /// Stream the content of the file at `path` into `sink`; returns the
    /// number of bytes written.
    fn download(
        &self,
        root: &ListingRoot,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, RemoteError>;
}

/// Parent of a lower-cased listing path; the namespace root is `""`.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "",
        Some(i) => &path[..i],
    }
}

/// Join a listing path and a child name.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}
