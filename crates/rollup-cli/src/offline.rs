//! File-backed work-item source for offline planning.
//!
//! Input shape:
//! ```json
//! {
//!   "edges": [{ "parent": 1, "child": 2, "relation": "System.LinkTypes.Hierarchy-Forward" }],
//!   "items": { "1": { "System.Title": "Checkout", "Microsoft.VSTS.Scheduling.RemainingWork": 0 } }
//! }
//! ```
//! `relation` defaults to the hierarchy-forward link type.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use rollup_core::hierarchy::{HIERARCHY_FORWARD, HierarchyEdge};
use rollup_core::model::snapshot_from_json;
use rollup_core::source::{HierarchyQuery, WorkItemSource};
use rollup_core::{FieldSnapshot, WorkItemId};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct OfflineFile {
    #[serde(default)]
    edges: Vec<OfflineEdge>,
    #[serde(default)]
    items: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct OfflineEdge {
    parent: u64,
    child: u64,
    #[serde(default = "default_relation")]
    relation: String,
}

fn default_relation() -> String {
    HIERARCHY_FORWARD.to_string()
}

/// In-memory source loaded from a JSON export.
#[derive(Debug, Clone)]
pub struct JsonSource {
    query: HierarchyQuery,
    items: BTreeMap<WorkItemId, FieldSnapshot>,
}

impl JsonSource {
    /// Read and parse `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid export.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid input file {}", path.display()))
    }

    /// Parse an export from JSON text.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or a non-integer item key.
    pub fn parse(content: &str) -> Result<Self> {
        let file: OfflineFile = serde_json::from_str(content).context("malformed JSON")?;

        let mut items = BTreeMap::new();
        for (key, fields) in &file.items {
            let raw: u64 = key
                .trim()
                .parse()
                .with_context(|| format!("item key {key:?} is not a work item id"))?;
            items.insert(WorkItemId(raw), snapshot_from_json(fields));
        }

        let edges: Vec<HierarchyEdge> = file
            .edges
            .into_iter()
            .map(|edge| HierarchyEdge {
                parent: WorkItemId(edge.parent),
                child: WorkItemId(edge.child),
                relation: edge.relation,
            })
            .collect();

        let mut item_ids: Vec<WorkItemId> = Vec::new();
        for id in edges
            .iter()
            .flat_map(|e| [e.parent, e.child])
            .chain(items.keys().copied())
        {
            if !item_ids.contains(&id) {
                item_ids.push(id);
            }
        }

        Ok(Self {
            query: HierarchyQuery { edges, item_ids },
            items,
        })
    }
}

impl WorkItemSource for JsonSource {
    fn query_hierarchy(&self) -> Result<HierarchyQuery> {
        Ok(self.query.clone())
    }

    fn fetch_fields(
        &self,
        ids: &[WorkItemId],
        fields: &[String],
    ) -> Result<BTreeMap<WorkItemId, FieldSnapshot>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.items.get(id).map(|snap| {
                    let projected: FieldSnapshot = snap
                        .iter()
                        .filter(|(name, _)| fields.contains(name))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect();
                    (*id, projected)
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_core::FieldValue;

    const EXPORT: &str = r#"{
        "edges": [
            { "parent": 1, "child": 3 },
            { "parent": 1, "child": 2 },
            { "parent": 1, "child": 9, "relation": "System.LinkTypes.Related" }
        ],
        "items": {
            "1": { "System.Title": "Checkout", "RemainingWork": 0, "Custom.Noise": "x" },
            "2": { "RemainingWork": "3" },
            "3": { "RemainingWork": 4, "OriginalEstimate": null },
            "4": {}
        }
    }"#;

    #[test]
    fn ids_follow_edges_then_items() {
        let source = JsonSource::parse(EXPORT).expect("export");
        let query = source.query_hierarchy().expect("query");

        let ids: Vec<u64> = query.item_ids.iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![1, 3, 2, 9, 4]);
        assert_eq!(query.edges[0].relation, HIERARCHY_FORWARD);
        assert_eq!(query.edges[2].relation, "System.LinkTypes.Related");
    }

    #[test]
    fn fetch_projects_requested_fields_and_skips_unknown_ids() {
        let source = JsonSource::parse(EXPORT).expect("export");
        let fields = vec!["System.Title".to_string(), "RemainingWork".to_string()];
        let snaps = source
            .fetch_fields(&[WorkItemId(1), WorkItemId(3), WorkItemId(9)], &fields)
            .expect("fetch");

        assert_eq!(snaps.len(), 2);
        let one = &snaps[&WorkItemId(1)];
        assert_eq!(one.len(), 2);
        assert!(!one.contains_key("Custom.Noise"));
        assert!(!snaps[&WorkItemId(3)].contains_key("OriginalEstimate"));
        assert_eq!(
            snaps[&WorkItemId(3)].get("RemainingWork"),
            Some(&FieldValue::Number(4.0))
        );
    }

    #[test]
    fn non_numeric_item_key_is_rejected() {
        let err = JsonSource::parse(r#"{ "items": { "abc": {} } }"#).expect_err("bad key");
        assert!(format!("{err:#}").contains("abc"));
    }

    #[test]
    fn empty_object_is_an_empty_source() {
        let source = JsonSource::parse("{}").expect("export");
        let query = source.query_hierarchy().expect("query");
        assert!(query.edges.is_empty());
        assert!(query.item_ids.is_empty());
    }
}
