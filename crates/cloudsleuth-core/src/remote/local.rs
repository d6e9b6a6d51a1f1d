//! Filesystem-backed store: audits a local mirror or sync folder.
//!
//! Layout under the base directory:
//! - the base itself is the account's own space ([`ListingRoot::Home`]);
//! - `members/<id>/` is a member's personal space;
//! - `namespaces/<id>/` is a team folder.
//!
//! Paths are case-preserving, so `path_lower` equals `path_display` here.
//! Sharing grants and shared links do not exist locally.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    join_path, Cursor, Entry, EntryKind, Grants, LinkTarget, ListingRoot, Member, MemberPage,
    Namespace, NamespaceKind, NamespacePage, Page, Paged, RemoteStore, Revision,
};
use crate::error::RemoteError;

const MEMBERS_DIR: &str = "members";
const NAMESPACES_DIR: &str = "namespaces";

#[derive(Serialize, Deserialize)]
struct LocalCursor {
    root: ListingRoot,
    path: String,
    offset: usize,
}

/// A [`RemoteStore`] over a local directory tree.
pub struct LocalStore {
    base: PathBuf,
    page_size: usize,
}

impl LocalStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            page_size: 500,
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    fn root_dir(&self, root: &ListingRoot) -> PathBuf {
        match root {
            ListingRoot::Home => self.base.clone(),
            ListingRoot::Member(id) => self.base.join(MEMBERS_DIR).join(id),
            ListingRoot::Namespace(id) => self.base.join(NAMESPACES_DIR).join(id),
        }
    }

    fn resolve(&self, root: &ListingRoot, path: &str) -> PathBuf {
        let mut full = self.root_dir(root);
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != "..") {
            full.push(segment);
        }
        full
    }

    fn sorted_children(&self, root: &ListingRoot, path: &str) -> Result<Vec<Entry>, RemoteError> {
        let dir = self.resolve(root, path);
        let read = fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RemoteError::not_found(dir.display().to_string()),
            _ => RemoteError::Io(e),
        })?;

        let mut entries = Vec::new();
        for dent in read {
            let dent = dent?;
            let name = dent.file_name().to_string_lossy().into_owned();
            // The namespace and member trees are not part of the home listing.
            if *root == ListingRoot::Home
                && path.is_empty()
                && (name == MEMBERS_DIR || name == NAMESPACES_DIR)
            {
                continue;
            }
            let meta = match dent.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!("Skipping {}: {e}", dent.path().display());
                    continue;
                }
            };
            let display = join_path(path, &name);
            let kind = if meta.is_dir() {
                EntryKind::Folder { shared_id: None }
            } else {
                EntryKind::File {
                    size: meta.len(),
                    content_hash: Some(fingerprint(&dent.path())?),
                    modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_default(),
                    shared_id: None,
                }
            };
            entries.push(Entry {
                id: format!("local:{}", self.resolve(root, &display).display()),
                name,
                path_lower: display.clone(),
                path_display: display,
                kind,
            });
        }
        entries.sort_unstable_by(|a, b| a.path_lower.cmp(&b.path_lower));
        Ok(entries)
    }

    fn page(&self, root: &ListingRoot, path: &str, offset: usize) -> Result<Page, RemoteError> {
        let entries = self.sorted_children(root, path)?;
        let start = offset.min(entries.len());
        let end = (start + self.page_size).min(entries.len());
        let cursor = serde_json::to_string(&LocalCursor {
            root: root.clone(),
            path: path.to_string(),
            offset: end,
        })
        .map_err(|e| RemoteError::Api {
            message: e.to_string(),
        })?;
        Ok(Paged {
            items: entries[start..end].to_vec(),
            cursor: Cursor(cursor),
            has_more: end < entries.len(),
        })
    }

    fn subdirs(&self, dir: &str) -> Result<Vec<String>, RemoteError> {
        let path = self.base.join(dir);
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for dent in fs::read_dir(&path)? {
            let dent = dent?;
            if dent.file_type()?.is_dir() {
                names.push(dent.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

/// blake3 fingerprint of a file's content.
fn fingerprint(path: &Path) -> Result<String, RemoteError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

impl RemoteStore for LocalStore {
    fn list_folder(&self, root: &ListingRoot, path: &str) -> Result<Page, RemoteError> {
        self.page(root, path, 0)
    }

    fn list_folder_continue(&self, cursor: &Cursor) -> Result<Page, RemoteError> {
        let state: LocalCursor =
            serde_json::from_str(&cursor.0).map_err(|_| RemoteError::not_found("cursor"))?;
        self.page(&state.root, &state.path, state.offset)
    }

    fn list_grants(&self, shared_id: &str) -> Result<Grants, RemoteError> {
        Err(RemoteError::not_found(shared_id))
    }

    fn list_revisions(&self, root: &ListingRoot, path: &str) -> Result<Vec<Revision>, RemoteError> {
        let meta = fs::metadata(self.resolve(root, path))?;
        let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_default();
        Ok(vec![Revision { modified }])
    }

    fn list_members(&self, _cursor: Option<&Cursor>) -> Result<MemberPage, RemoteError> {
        let members = self
            .subdirs(MEMBERS_DIR)?
            .into_iter()
            .map(|id| Member {
                email: id.clone(),
                name: id.clone(),
                id,
            })
            .collect();
        Ok(Paged {
            items: members,
            cursor: Cursor(String::new()),
            has_more: false,
        })
    }

    fn list_namespaces(&self, _cursor: Option<&Cursor>) -> Result<NamespacePage, RemoteError> {
        let namespaces = self
            .subdirs(NAMESPACES_DIR)?
            .into_iter()
            .map(|id| Namespace {
                name: id.clone(),
                id,
                kind: NamespaceKind::TeamFolder,
                team_member_id: None,
            })
            .collect();
        Ok(Paged {
            items: namespaces,
            cursor: Cursor(String::new()),
            has_more: false,
        })
    }

    fn resolve_shared_link(&self, url: &str) -> Result<LinkTarget, RemoteError> {
        Err(RemoteError::not_found(url))
    }

    fn list_shared_link_folder(&self, url: &str, _path: &str) -> Result<Page, RemoteError> {
        Err(RemoteError::not_found(url))
    }

    fn download(
        &self,
        root: &ListingRoot,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, RemoteError> {
        let mut file = fs::File::open(self.resolve(root, path))?;
        Ok(std::io::copy(&mut file, sink)?)
    }
}
