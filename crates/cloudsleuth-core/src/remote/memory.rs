//! In-memory tenant used for fixtures and tests.
//!
//! Built either through [`MemoryStoreBuilder`] or from a JSON fixture file.
//! Cursors are self-describing JSON so paging needs no server-side state.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    join_path, parent_path, Cursor, Entry, EntryKind, Grants, LinkTarget, ListingRoot, Member,
    MemberPage, Namespace, NamespacePage, Page, Paged, RemoteStore, Revision,
};
use crate::error::RemoteError;

/// Default page size, small enough that fixtures exercise pagination.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug)]
struct StoredItem {
    entry: Entry,
    content: Option<Vec<u8>>,
    /// Revision timestamps, newest first.
    revisions: Vec<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
struct LinkBinding {
    root: ListingRoot,
    path: String,
}

#[derive(Serialize, Deserialize)]
enum CursorTarget {
    Space { root: ListingRoot, path: String },
    Members,
    Namespaces,
}

#[derive(Serialize, Deserialize)]
struct CursorState {
    target: CursorTarget,
    offset: usize,
}

/// A remote tenant held entirely in memory.
pub struct MemoryStore {
    spaces: HashMap<ListingRoot, BTreeMap<String, StoredItem>>,
    grants: HashMap<String, Grants>,
    members: Vec<Member>,
    namespaces: Vec<Namespace>,
    links: HashMap<String, LinkBinding>,
    page_size: usize,
    download_delay: Option<Duration>,
    fail_auth: AtomicBool,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    list_calls: AtomicUsize,
    grant_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Parse a JSON fixture (see [`Fixture`]).
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Ok(fixture.into_builder().build())
    }

    /// Load a JSON fixture from disk.
    pub fn from_fixture_file(path: &Path) -> Result<Self, RemoteError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| RemoteError::Api {
            message: format!("invalid fixture {}: {e}", path.display()),
        })
    }

    /// Number of `list_folder` / `list_folder_continue` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn grant_calls(&self) -> usize {
        self.grant_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn check_auth(&self) -> Result<(), RemoteError> {
        if self.fail_auth.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::AuthExpired);
        }
        Ok(())
    }

    fn count_list_call(&self) {
        let n = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if n >= *limit {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    fn item(&self, root: &ListingRoot, path: &str) -> Option<&StoredItem> {
        self.spaces.get(root)?.get(&path.to_lowercase())
    }

    fn children(&self, root: &ListingRoot, path: &str) -> Result<Vec<Entry>, RemoteError> {
        let path = normalise(path);
        let Some(space) = self.spaces.get(root) else {
            return if path.is_empty() {
                Ok(Vec::new())
            } else {
                Err(RemoteError::not_found(path))
            };
        };
        if !path.is_empty() {
            match space.get(&path) {
                Some(item) if item.entry.is_folder() => {}
                _ => return Err(RemoteError::not_found(path)),
            }
        }
        Ok(space
            .iter()
            .filter(|(key, _)| parent_path(key) == path)
            .map(|(_, item)| item.entry.clone())
            .collect())
    }

    fn page<T: Clone>(
        &self,
        items: &[T],
        target: CursorTarget,
        offset: usize,
    ) -> Result<Paged<T>, RemoteError> {
        let start = offset.min(items.len());
        let end = (start + self.page_size).min(items.len());
        let state = CursorState {
            target,
            offset: end,
        };
        let cursor = serde_json::to_string(&state).map_err(|e| RemoteError::Api {
            message: e.to_string(),
        })?;
        Ok(Paged {
            items: items[start..end].to_vec(),
            cursor: Cursor(cursor),
            has_more: end < items.len(),
        })
    }

    fn decode(cursor: &Cursor) -> Result<CursorState, RemoteError> {
        serde_json::from_str(&cursor.0).map_err(|_| RemoteError::not_found("cursor"))
    }
}

impl RemoteStore for MemoryStore {
    fn list_folder(&self, root: &ListingRoot, path: &str) -> Result<Page, RemoteError> {
        self.count_list_call();
        self.check_auth()?;
        let entries = self.children(root, path)?;
        let target = CursorTarget::Space {
            root: root.clone(),
            path: normalise(path),
        };
        self.page(&entries, target, 0)
    }

    fn list_folder_continue(&self, cursor: &Cursor) -> Result<Page, RemoteError> {
        self.count_list_call();
        self.check_auth()?;
        let state = Self::decode(cursor)?;
        let CursorTarget::Space { root, path } = state.target else {
            return Err(RemoteError::not_found("cursor"));
        };
        let entries = self.children(&root, &path)?;
        self.page(&entries, CursorTarget::Space { root, path }, state.offset)
    }

    fn list_grants(&self, shared_id: &str) -> Result<Grants, RemoteError> {
        self.grant_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        self.grants
            .get(shared_id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(shared_id))
    }

    fn list_revisions(&self, root: &ListingRoot, path: &str) -> Result<Vec<Revision>, RemoteError> {
        self.check_auth()?;
        let item = self
            .item(root, path)
            .filter(|i| !i.entry.is_folder())
            .ok_or_else(|| RemoteError::not_found(path))?;
        Ok(item
            .revisions
            .iter()
            .map(|&modified| Revision { modified })
            .collect())
    }

    fn list_members(&self, cursor: Option<&Cursor>) -> Result<MemberPage, RemoteError> {
        self.check_auth()?;
        let offset = match cursor {
            Some(c) => Self::decode(c)?.offset,
            None => 0,
        };
        self.page(&self.members, CursorTarget::Members, offset)
    }

    fn list_namespaces(&self, cursor: Option<&Cursor>) -> Result<NamespacePage, RemoteError> {
        self.check_auth()?;
        let offset = match cursor {
            Some(c) => Self::decode(c)?.offset,
            None => 0,
        };
        self.page(&self.namespaces, CursorTarget::Namespaces, offset)
    }

    fn resolve_shared_link(&self, url: &str) -> Result<LinkTarget, RemoteError> {
        self.check_auth()?;
        let binding = self
            .links
            .get(url)
            .ok_or_else(|| RemoteError::not_found(url))?;
        let item = self
            .item(&binding.root, &binding.path)
            .ok_or_else(|| RemoteError::not_found(url))?;
        Ok(match &item.entry.kind {
            EntryKind::Folder { .. } => LinkTarget::Folder {
                name: item.entry.name.clone(),
            },
            EntryKind::File { size, .. } => LinkTarget::File {
                name: item.entry.name.clone(),
                size: *size,
            },
        })
    }

    fn list_shared_link_folder(&self, url: &str, path: &str) -> Result<Page, RemoteError> {
        self.count_list_call();
        self.check_auth()?;
        let binding = self
            .links
            .get(url)
            .ok_or_else(|| RemoteError::not_found(url))?;
        let full = if path.is_empty() {
            binding.path.clone()
        } else {
            join_path(&binding.path, path).to_lowercase()
        };
        let entries = self.children(&binding.root, &full)?;
        let target = CursorTarget::Space {
            root: binding.root.clone(),
            path: full,
        };
        self.page(&entries, target, 0)
    }

    fn download(
        &self,
        root: &ListingRoot,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, RemoteError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        if let Some(delay) = self.download_delay {
            std::thread::sleep(delay);
        }
        let item = self
            .item(root, path)
            .filter(|i| !i.entry.is_folder())
            .ok_or_else(|| RemoteError::not_found(path))?;
        let content = item.content.as_deref().unwrap_or_default();
        sink.write_all(content)?;
        Ok(content.len() as u64)
    }
}

fn normalise(path: &str) -> String {
    let lower = path.trim_end_matches('/').to_lowercase();
    if lower.is_empty() || lower.starts_with('/') {
        lower
    } else {
        format!("/{lower}")
    }
}

fn root_tag(root: &ListingRoot) -> String {
    match root {
        ListingRoot::Home => String::new(),
        ListingRoot::Namespace(id) => format!("ns{id}:"),
        ListingRoot::Member(id) => format!("{id}:"),
    }
}

/// Timestamp given to fixture files that carry none.
pub fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(1_609_459_200, 0).unwrap_or_default()
}

/// Fluent construction of a [`MemoryStore`]. Parent folders are created
/// implicitly.
pub struct MemoryStoreBuilder {
    spaces: HashMap<ListingRoot, BTreeMap<String, StoredItem>>,
    grants: HashMap<String, Grants>,
    members: Vec<Member>,
    namespaces: Vec<Namespace>,
    links: HashMap<String, LinkBinding>,
    page_size: usize,
    download_delay: Option<Duration>,
    fail_auth: bool,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            spaces: HashMap::new(),
            grants: HashMap::new(),
            members: Vec::new(),
            namespaces: Vec::new(),
            links: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            download_delay: None,
            fail_auth: false,
            cancel_after: None,
        }
    }
}

impl MemoryStoreBuilder {
    pub fn folder(mut self, root: ListingRoot, path: &str) -> Self {
        self.insert_folder(&root, path, None);
        self
    }

    pub fn shared_folder(mut self, root: ListingRoot, path: &str, shared_id: &str) -> Self {
        self.insert_folder(&root, path, Some(shared_id.to_string()));
        self
    }

    /// A file of `size` bytes with no downloadable content or hash.
    pub fn file(mut self, root: ListingRoot, path: &str, size: u64) -> Self {
        self.insert_file(&root, path, size, None, None, None);
        self
    }

    /// A file whose content (and blake3 fingerprint) is `content`.
    pub fn file_with_content(
        mut self,
        root: ListingRoot,
        path: &str,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        let content = content.into();
        let hash = blake3::hash(&content).to_hex().to_string();
        self.insert_file(&root, path, content.len() as u64, Some(hash), Some(content), None);
        self
    }

    pub fn shared_file(mut self, root: ListingRoot, path: &str, size: u64, shared_id: &str) -> Self {
        self.insert_file(&root, path, size, None, None, Some(shared_id.to_string()));
        self
    }

    /// Replace a file's revision history (any order).
    pub fn revisions(mut self, root: ListingRoot, path: &str, mut times: Vec<DateTime<Utc>>) -> Self {
        times.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(item) = self
            .spaces
            .get_mut(&root)
            .and_then(|s| s.get_mut(&path.to_lowercase()))
        {
            if let (EntryKind::File { modified, .. }, Some(newest)) =
                (&mut item.entry.kind, times.first())
            {
                *modified = *newest;
            }
            item.revisions = times;
        }
        self
    }

    pub fn grants(mut self, shared_id: &str, grants: Grants) -> Self {
        self.grants.insert(shared_id.to_string(), grants);
        self
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    /// Bind a shared link URL to an item in the tenant.
    pub fn link(mut self, url: &str, root: ListingRoot, path: &str) -> Self {
        self.links.insert(
            url.to_string(),
            LinkBinding {
                root,
                path: normalise(path),
            },
        );
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    /// The next call of any kind fails with [`RemoteError::AuthExpired`].
    pub fn fail_auth_once(mut self) -> Self {
        self.fail_auth = true;
        self
    }

    /// Raise `flag` once `calls` folder listings have been served.
    pub fn cancel_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    pub fn build(self) -> MemoryStore {
        MemoryStore {
            spaces: self.spaces,
            grants: self.grants,
            members: self.members,
            namespaces: self.namespaces,
            links: self.links,
            page_size: self.page_size,
            download_delay: self.download_delay,
            fail_auth: AtomicBool::new(self.fail_auth),
            cancel_after: self.cancel_after,
            list_calls: AtomicUsize::new(0),
            grant_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    fn ensure_parents(&mut self, root: &ListingRoot, display: &str) {
        let mut prefix = String::new();
        let segments: Vec<&str> = display.split('/').filter(|s| !s.is_empty()).collect();
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            prefix = join_path(&prefix, segment);
            self.insert_folder(root, &prefix, None);
        }
    }

    fn insert_folder(&mut self, root: &ListingRoot, path: &str, shared_id: Option<String>) {
        let display = display_path(path);
        self.ensure_parents(root, &display);
        let key = display.to_lowercase();
        let entry = Entry {
            id: format!("id:{}{key}", root_tag(root)),
            name: leaf_name(&display),
            path_display: display,
            path_lower: key.clone(),
            kind: EntryKind::Folder { shared_id },
        };
        let space = self.spaces.entry(root.clone()).or_default();
        match space.get_mut(&key) {
            Some(existing) => {
                if let (EntryKind::Folder { shared_id: old }, EntryKind::Folder { shared_id: new }) =
                    (&mut existing.entry.kind, entry.kind)
                {
                    if new.is_some() {
                        *old = new;
                    }
                }
            }
            None => {
                space.insert(
                    key,
                    StoredItem {
                        entry,
                        content: None,
                        revisions: Vec::new(),
                    },
                );
            }
        }
    }

    fn insert_file(
        &mut self,
        root: &ListingRoot,
        path: &str,
        size: u64,
        content_hash: Option<String>,
        content: Option<Vec<u8>>,
        shared_id: Option<String>,
    ) {
        let display = display_path(path);
        self.ensure_parents(root, &display);
        let key = display.to_lowercase();
        let modified = default_timestamp();
        let entry = Entry {
            id: format!("id:{}{key}", root_tag(root)),
            name: leaf_name(&display),
            path_display: display,
            path_lower: key.clone(),
            kind: EntryKind::File {
                size,
                content_hash,
                modified,
                shared_id,
            },
        };
        self.spaces.entry(root.clone()).or_default().insert(
            key,
            StoredItem {
                entry,
                content,
                revisions: vec![modified],
            },
        );
    }
}

fn display_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn leaf_name(display: &str) -> String {
    display.rsplit('/').next().unwrap_or_default().to_string()
}

// ── Fixture format ──────────────────────────────────────────────────────────

/// JSON fixture describing a whole tenant.
///
/// ```json
/// {
///   "page_size": 2,
///   "members": [{"id": "dbmid:1", "email": "a@x.com", "name": "Alice"}],
///   "spaces": [{"root": {"kind": "member", "id": "dbmid:1"},
///               "items": [{"path": "/Docs/a.txt", "content": "hello"}]}]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub page_size: Option<usize>,
    pub members: Vec<Member>,
    pub namespaces: Vec<Namespace>,
    pub spaces: Vec<FixtureSpace>,
    pub grants: HashMap<String, Grants>,
    pub links: Vec<FixtureLink>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureSpace {
    pub root: ListingRoot,
    #[serde(default)]
    pub items: Vec<FixtureItem>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureItem {
    pub path: String,
    #[serde(default)]
    pub folder: bool,
    #[serde(default)]
    pub size: u64,
    pub content: Option<String>,
    pub hash: Option<String>,
    pub shared_id: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct FixtureLink {
    pub url: String,
    pub root: ListingRoot,
    pub path: String,
}

impl Fixture {
    fn into_builder(self) -> MemoryStoreBuilder {
        let mut b = MemoryStore::builder();
        if let Some(size) = self.page_size {
            b = b.page_size(size);
        }
        for space in self.spaces {
            for item in space.items {
                if item.folder {
                    b.insert_folder(&space.root, &item.path, item.shared_id);
                    continue;
                }
                let content = item.content.map(String::into_bytes);
                let size = content.as_ref().map_or(item.size, |c| c.len() as u64);
                let hash = item.hash.or_else(|| {
                    content
                        .as_ref()
                        .map(|c| blake3::hash(c).to_hex().to_string())
                });
                b.insert_file(&space.root, &item.path, size, hash, content, item.shared_id);
                let times: Vec<_> = [item.created, item.modified].into_iter().flatten().collect();
                if !times.is_empty() {
                    b = b.revisions(space.root.clone(), &item.path, times);
                }
            }
        }
        for (id, grants) in self.grants {
            b = b.grants(&id, grants);
        }
        for m in self.members {
            b = b.member(m);
        }
        for ns in self.namespaces {
            b = b.namespace(ns);
        }
        for link in self.links {
            b = b.link(&link.url, link.root, &link.path);
        }
        b
    }
}
