//! Parent-child index built from a flat edge list.
//!
//! The tracker's tree query answers with `(source, target, rel)` link rows.
//! Only rows whose relation is the configured hierarchy kind (by default
//! `System.LinkTypes.Hierarchy-Forward`) describe containment; everything
//! else (`Related`, `Dependency-*`, ...) is dropped here and never reaches
//! the rollup engine.
//!
//! # Ordering
//!
//! Parents iterate in ascending id order. Children keep the order in which
//! their edges were supplied, which is the order the engine sums them in.
//!
//! # Cycles
//!
//! The index does not check for cycles. A cyclic hierarchy makes the
//! recursive rollup overflow its stack.

#![allow(clippy::module_name_repetitions)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::WorkItemId;

/// Relation reference name for parent → child containment.
pub const HIERARCHY_FORWARD: &str = "System.LinkTypes.Hierarchy-Forward";

/// One link row from the hierarchy query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub parent: WorkItemId,
    pub child: WorkItemId,
    pub relation: String,
}

impl HierarchyEdge {
    /// A parent → child edge of the default hierarchy kind.
    #[must_use]
    pub fn forward(parent: impl Into<WorkItemId>, child: impl Into<WorkItemId>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            relation: HIERARCHY_FORWARD.to_string(),
        }
    }
}

/// Direct children of every parent in the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyIndex {
    children: BTreeMap<WorkItemId, Vec<WorkItemId>>,
}

impl HierarchyIndex {
    /// Direct children of `id`, or an empty slice for a leaf.
    #[must_use]
    pub fn children(&self, id: WorkItemId) -> &[WorkItemId] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// `true` when `id` has no children in the index.
    #[must_use]
    pub fn is_leaf(&self, id: WorkItemId) -> bool {
        !self.children.contains_key(&id)
    }

    /// Every parent id, ascending.
    pub fn parents(&self) -> impl Iterator<Item = WorkItemId> + '_ {
        self.children.keys().copied()
    }

    /// Number of parents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Total number of parent → child links.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.children.values().map(Vec::len).sum()
    }
}

/// Build a [`HierarchyIndex`] from raw edges, keeping only `relation_kind`.
///
/// A repeated `(parent, child)` pair is recorded once, at its first position.
#[must_use]
pub fn build_hierarchy_index<'a>(
    edges: impl IntoIterator<Item = &'a HierarchyEdge>,
    relation_kind: &str,
) -> HierarchyIndex {
    let mut children: BTreeMap<WorkItemId, Vec<WorkItemId>> = BTreeMap::new();

    for edge in edges {
        if edge.relation != relation_kind {
            continue;
        }
        let siblings = children.entry(edge.parent).or_default();
        if !siblings.contains(&edge.child) {
            siblings.push(edge.child);
        }
    }

    HierarchyIndex { children }
}
