//! Read side of the tracker: hierarchy query and field fetch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hierarchy::HierarchyEdge;
use crate::model::{FieldSnapshot, WorkItemId};

/// Result of the tree query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyQuery {
    /// Link rows between items, every relation kind included.
    pub edges: Vec<HierarchyEdge>,
    /// Every item the query matched, roots included, first-seen order.
    pub item_ids: Vec<WorkItemId>,
}

/// Supplies the hierarchy and current field values for one run.
pub trait WorkItemSource {
    /// Run the configured tree query.
    ///
    /// # Errors
    ///
    /// Returns an error when the query cannot be executed or decoded.
    fn query_hierarchy(&self) -> anyhow::Result<HierarchyQuery>;

    /// Fetch `fields` for every id in `ids`. Pagination is internal.
    ///
    /// Items the tracker does not return are simply absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error when any page fails.
    fn fetch_fields(
        &self,
        ids: &[WorkItemId],
        fields: &[String],
    ) -> anyhow::Result<BTreeMap<WorkItemId, FieldSnapshot>>;
}
