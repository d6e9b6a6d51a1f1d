//! Arena-backed container tree with incremental bottom-up aggregation.
//!
//! All containers live in a single `Vec<Container>`. Relationships between
//! nodes use [`NodeIndex`] rather than heap pointers. Unlike a post-scan
//! aggregation pass, folds here are applied as the crawl returns from each
//! listing, walking the arena upward from the affected container.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::container::{Classification, Container, ContainerId, NodeIndex, Status};
use super::leaf::Leaf;

/// The partial or complete tree produced by a crawl.
#[derive(Debug, Clone)]
pub struct ContainerTree {
    nodes: Vec<Container>,
    by_id: HashMap<ContainerId, NodeIndex>,
    root: NodeIndex,
}

impl ContainerTree {
    /// Create a tree holding only the walk root.
    pub fn new(mut root: Container) -> Self {
        root.parent = None;
        root.first_child = None;
        root.next_sibling = None;
        let idx = NodeIndex::new(0);
        let mut by_id = HashMap::new();
        by_id.insert(root.id.clone(), idx);
        Self {
            nodes: vec![root],
            by_id,
            root: idx,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Allocate `container` in the arena as a child of `parent`.
    ///
    /// New children are prepended to the parent's sibling list in O(1).
    pub fn add_container(&mut self, parent: NodeIndex, mut container: Container) -> NodeIndex {
        let idx = NodeIndex::new(self.nodes.len());
        container.parent = Some(parent);
        container.first_child = None;
        container.next_sibling = self.nodes[parent.idx()].first_child;
        self.nodes[parent.idx()].first_child = Some(idx);
        self.by_id.insert(container.id.clone(), idx);
        self.nodes.push(container);
        idx
    }

    /// Look up a container by id.
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    #[inline]
    pub fn node(&self, index: NodeIndex) -> &Container {
        &self.nodes[index.idx()]
    }

    #[inline]
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Container {
        &mut self.nodes[index.idx()]
    }

    /// Fold a leaf into `container` and every ancestor.
    ///
    /// Size, leaf count and timestamps propagate to the root; the direct-leaf
    /// counter moves only at `container`.
    pub fn fold_leaf(&mut self, container: NodeIndex, leaf: &Leaf) {
        self.nodes[container.idx()].agg.direct_files += 1;
        let mut current = Some(container);
        while let Some(idx) = current {
            let node = &mut self.nodes[idx.idx()];
            node.agg.size += leaf.size;
            node.agg.files += 1;
            node.agg.absorb_times(Some(leaf.created), Some(leaf.modified));
            current = node.parent;
        }
    }

    /// Count a completed `child` container in `parent` and its ancestors.
    ///
    /// The direct counter and the private/shared counters move only at
    /// `parent`; the transitive counter moves along the whole chain. Size and
    /// leaf counts are not touched because [`fold_leaf`](Self::fold_leaf)
    /// already propagated them.
    pub fn fold_container(&mut self, parent: NodeIndex, child: NodeIndex) {
        let class = self.nodes[child.idx()].classification;
        self.count_direct_child(parent, class);
        let mut current = Some(parent);
        while let Some(idx) = current {
            let node = &mut self.nodes[idx.idx()];
            node.agg.folders += 1;
            current = node.parent;
        }
    }

    /// Fold a restored DONE subtree's final aggregate into its ancestors.
    ///
    /// Used on resume after the ancestors' partial aggregates were reset:
    /// the DONE child is never re-walked, so everything it contributed must
    /// be applied again in one step.
    pub fn replay_done(&mut self, child: NodeIndex) {
        let (agg, class, parent) = {
            let c = &self.nodes[child.idx()];
            (c.agg, c.classification, c.parent)
        };
        let Some(parent) = parent else {
            return;
        };
        self.count_direct_child(parent, class);
        let mut current = Some(parent);
        while let Some(idx) = current {
            let node = &mut self.nodes[idx.idx()];
            node.agg.size += agg.size;
            node.agg.files += agg.files;
            node.agg.folders += 1 + agg.folders;
            node.agg.absorb_times(agg.created, agg.modified);
            current = node.parent;
        }
    }

    fn count_direct_child(&mut self, parent: NodeIndex, class: Classification) {
        let agg = &mut self.nodes[parent.idx()].agg;
        agg.direct_folders += 1;
        match class {
            Classification::Private => agg.private_folders += 1,
            Classification::Shared => agg.shared_folders += 1,
            _ => {}
        }
    }

    /// Zero the aggregate of a PROCESSING container so its re-walk can
    /// recompute it. DONE containers are left untouched.
    pub fn reset_partial(&mut self, index: NodeIndex) {
        let node = &mut self.nodes[index.idx()];
        if node.status == Status::Processing {
            node.agg = Default::default();
        }
    }

    /// Freeze a container: stamp completion time and elapsed duration.
    pub fn mark_done(&mut self, index: NodeIndex, now: DateTime<Utc>) {
        let node = &mut self.nodes[index.idx()];
        debug_assert!(node.status == Status::Processing, "container completed twice");
        node.status = Status::Done;
        node.finished_at = Some(now);
        node.elapsed_secs = (now - node.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
    }

    /// Iterator over the strict ancestors of `index`, nearest first.
    pub fn ancestors(&self, index: NodeIndex) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.nodes[index.idx()].parent,
        }
    }

    /// Display path of a container, prefixed by its namespace when the walk
    /// spans several namespaces.
    pub fn full_path(&self, index: NodeIndex) -> String {
        let node = &self.nodes[index.idx()];
        if node.namespace.is_empty() || self.nodes[self.root.idx()].namespace == node.namespace {
            node.path_display.clone()
        } else {
            format!("{}:{}", node.namespace, node.path_display)
        }
    }

    /// Direct children of a container (most recently added first).
    pub fn children(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        let mut children = Vec::new();
        let mut child = self.nodes[parent.idx()].first_child;
        while let Some(idx) = child {
            children.push(idx);
            child = self.nodes[idx.idx()].next_sibling;
        }
        children
    }

    /// Iterate over every node with its index, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Container)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIndex::new(i), n))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// See [`ContainerTree::ancestors`].
pub struct Ancestors<'a> {
    tree: &'a ContainerTree,
    next: Option<NodeIndex>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let current = self.next?;
        self.next = self.tree.nodes[current.idx()].parent;
        Some(current)
    }
}
