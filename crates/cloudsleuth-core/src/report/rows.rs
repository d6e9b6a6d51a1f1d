//! Column layouts and row builders for each report variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::size::format_size;
use crate::model::{ContainerKind, ContainerTree, Leaf, LinkRecord, NodeIndex, TargetKind};

/// Which report a run produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// One row per container down to a depth limit.
    Folders,
    /// One row per leaf with embedding and link detail.
    Files,
    /// One summary row per namespace root.
    Members,
}

pub const FOLDER_HEADER: &[&str] = &[
    "Namespace",
    "Path",
    "Type",
    "Owner",
    "Size (byte)",
    "Size",
    "subFolder (Non-Recursive)",
    "subFolder (Recursive)",
    "Created Date",
    "Last Modified",
    "Files",
    "Members",
    "Groups",
];

pub const FILE_HEADER: &[&str] = &[
    "Namespace",
    "Path",
    "Name",
    "Size (byte)",
    "Content Hash",
    "Created Date",
    "Last Modified",
    "Members",
    "Groups",
    "Duplicate",
    "Embedded Objects",
    "Links",
];

/// Position of the content fingerprint in [`FILE_HEADER`].
pub const FILE_HASH_COLUMN: usize = 4;

pub const MEMBER_HEADER: &[&str] = &[
    "Namespace",
    "Owner",
    "Type",
    "Private Folders",
    "Shared Folders",
    "Total Folders",
    "Files",
    "Size (byte)",
    "Size",
];

impl ReportKind {
    pub fn header(self) -> &'static [&'static str] {
        match self {
            Self::Folders => FOLDER_HEADER,
            Self::Files => FILE_HEADER,
            Self::Members => MEMBER_HEADER,
        }
    }
}

pub(crate) fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn labels(values: &[String]) -> String {
    values.join("; ")
}

pub fn folder_row(tree: &ContainerTree, index: NodeIndex) -> Vec<String> {
    let node = tree.node(index);
    let agg = &node.agg;
    vec![
        node.namespace.to_string(),
        node.path_display.clone(),
        node.classification.label().to_string(),
        node.owner.clone().unwrap_or_default(),
        agg.size.to_string(),
        format_size(agg.size),
        agg.direct_folders.to_string(),
        agg.folders.to_string(),
        timestamp(agg.created),
        timestamp(agg.modified),
        agg.files.to_string(),
        labels(&node.members),
        labels(&node.groups),
    ]
}

fn link_label(link: &LinkRecord) -> String {
    match link {
        LinkRecord::Resolved {
            url,
            target,
            name,
            size,
        } => {
            let kind = match target {
                TargetKind::File => "File",
                TargetKind::Folder => "Folder",
            };
            format!("{url} -> {kind} {name} ({size} bytes)")
        }
        LinkRecord::Inaccessible { url } => format!("{url} -> Inaccessible"),
    }
}

pub fn leaf_row(tree: &ContainerTree, parent: NodeIndex, leaf: &Leaf) -> Vec<String> {
    let node = tree.node(parent);
    vec![
        node.namespace.to_string(),
        leaf.path_display.clone(),
        leaf.name.to_string(),
        leaf.size.to_string(),
        leaf.content_hash.clone().unwrap_or_default(),
        timestamp(Some(leaf.created)),
        timestamp(Some(leaf.modified)),
        labels(&leaf.members),
        labels(&leaf.groups),
        if leaf.duplicate { "Y" } else { "" }.to_string(),
        labels(&leaf.embedded),
        leaf.links.iter().map(link_label).collect::<Vec<_>>().join("; "),
    ]
}

pub fn member_row(tree: &ContainerTree, index: NodeIndex) -> Vec<String> {
    let node = tree.node(index);
    let agg = &node.agg;
    vec![
        node.namespace.to_string(),
        node.owner.clone().unwrap_or_default(),
        node.classification.label().to_string(),
        agg.private_folders.to_string(),
        agg.shared_folders.to_string(),
        agg.folders.to_string(),
        agg.files.to_string(),
        agg.size.to_string(),
        format_size(agg.size),
    ]
}

/// Rows a container emits when it completes, in write order.
///
/// `leaves` are the container's own leaves in listing order. They are
/// written last-first so that the final reversal restores listing order.
pub fn completion_rows(
    kind: ReportKind,
    tree: &ContainerTree,
    index: NodeIndex,
    max_level: u32,
    leaves: &[Leaf],
) -> Vec<Vec<String>> {
    let node = tree.node(index);
    match kind {
        ReportKind::Folders => {
            if node.kind == ContainerKind::TenantRoot
                || index == tree.root()
                || node.depth <= max_level
            {
                vec![folder_row(tree, index)]
            } else {
                Vec::new()
            }
        }
        ReportKind::Files => leaves
            .iter()
            .rev()
            .map(|leaf| leaf_row(tree, index, leaf))
            .collect(),
        ReportKind::Members => match node.kind {
            ContainerKind::TenantRoot | ContainerKind::NamespaceRoot => {
                vec![member_row(tree, index)]
            }
            ContainerKind::Folder => Vec::new(),
        },
    }
}
