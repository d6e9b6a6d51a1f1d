//! Finding and resolving links back into the storage system.

use regex::Regex;
use tracing::debug;

use super::document::DocumentContent;
use crate::crawler::pages::Pages;
use crate::error::RemoteError;
use crate::model::{LinkRecord, TargetKind};
use crate::remote::{Cursor, EntryKind, LinkTarget, Session};

/// Default pattern for shared links into the same storage system.
pub const DEFAULT_LINK_PATTERN: &str = r#"https?://(?:www\.)?dropbox\.com/[^\s"'<>)\]]+"#;

/// Matches storage links in extracted text and hyperlink fields.
#[derive(Debug, Clone)]
pub struct LinkMatcher {
    pattern: Regex,
}

impl LinkMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Distinct matching links, hyperlink fields first, in discovery order.
    pub fn find(&self, content: &DocumentContent) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let candidates = content
            .hyperlinks
            .iter()
            .filter_map(|h| self.pattern.find(h).map(|m| m.as_str()))
            .chain(self.pattern.find_iter(&content.text).map(|m| m.as_str()));
        for raw in candidates {
            let url = raw.trim_end_matches(['.', ',', ';', ':']);
            if !found.iter().any(|f| f == url) {
                found.push(url.to_string());
            }
        }
        found
    }
}

/// Resolve one link. Any failure yields [`LinkRecord::Inaccessible`].
pub fn resolve(session: &Session, url: &str) -> LinkRecord {
    let target = match session.call("resolve shared link", |s| s.resolve_shared_link(url)) {
        Ok(target) => target,
        Err(e) => {
            debug!("Link {url} is inaccessible: {e}");
            return LinkRecord::Inaccessible {
                url: url.to_string(),
            };
        }
    };
    match target {
        LinkTarget::File { name, size } => LinkRecord::Resolved {
            url: url.to_string(),
            target: TargetKind::File,
            name,
            size,
        },
        LinkTarget::Folder { name } => match folder_size(session, url) {
            Ok(size) => LinkRecord::Resolved {
                url: url.to_string(),
                target: TargetKind::Folder,
                name,
                size,
            },
            Err(e) => {
                debug!("Could not size linked folder {url}: {e}");
                LinkRecord::Inaccessible {
                    url: url.to_string(),
                }
            }
        },
    }
}

/// Sum of every leaf under a linked folder, walked with an explicit stack.
fn folder_size(session: &Session, url: &str) -> Result<u64, RemoteError> {
    let mut total = 0u64;
    let mut stack = vec![String::new()];
    while let Some(rel) = stack.pop() {
        let pages = Pages::new(|cursor: Option<&Cursor>| match cursor {
            None => session.call("list shared link folder", |s| {
                s.list_shared_link_folder(url, &rel)
            }),
            Some(c) => session.call("continue shared link folder", |s| s.list_folder_continue(c)),
        });
        for page in pages {
            for entry in page? {
                match entry.kind {
                    EntryKind::File { size, .. } => total += size,
                    EntryKind::Folder { .. } => stack.push(if rel.is_empty() {
                        entry.name
                    } else {
                        format!("{rel}/{}", entry.name)
                    }),
                }
            }
        }
    }
    Ok(total)
}
