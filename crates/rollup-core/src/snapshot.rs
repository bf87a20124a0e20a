//! Per-item field snapshots and rollup computation state.

use std::collections::BTreeMap;

use crate::model::{FIELD_STATE, FIELD_TITLE, FIELD_TYPE, FieldSnapshot, FieldValue, WorkItemId};

/// Mutable per-item state written by the rollup engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputationState {
    /// Computed total per rollup field. Empty until the item is processed.
    pub rollup_info: BTreeMap<String, f64>,
    /// The item's subtree has been fully aggregated.
    pub is_processed: bool,
    /// The write-back policy wants this item persisted.
    pub is_update_required: bool,
}

impl ComputationState {
    #[must_use]
    pub fn rollup(&self, field: &str) -> Option<f64> {
        self.rollup_info.get(field).copied()
    }
}

/// Fetched fields plus computation state for one work item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRecord {
    pub fields: FieldSnapshot,
    pub state: ComputationState,
}

impl ItemRecord {
    #[must_use]
    pub fn new(fields: FieldSnapshot) -> Self {
        Self {
            fields,
            state: ComputationState::default(),
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn title(&self) -> &str {
        self.text_field(FIELD_TITLE)
    }

    #[must_use]
    pub fn work_item_type(&self) -> &str {
        self.text_field(FIELD_TYPE)
    }

    #[must_use]
    pub fn workflow_state(&self) -> &str {
        self.text_field(FIELD_STATE)
    }

    fn text_field(&self, name: &str) -> &str {
        self.fields
            .get(name)
            .and_then(FieldValue::as_text)
            .unwrap_or_default()
    }
}

/// All items known to one run, ordered by ascending id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotStore {
    items: BTreeMap<WorkItemId, ItemRecord>,
}

impl SnapshotStore {
    /// Wrap fetched snapshots with fresh computation state.
    #[must_use]
    pub fn from_snapshots(snapshots: BTreeMap<WorkItemId, FieldSnapshot>) -> Self {
        Self {
            items: snapshots
                .into_iter()
                .map(|(id, fields)| (id, ItemRecord::new(fields)))
                .collect(),
        }
    }

    pub fn insert(&mut self, id: WorkItemId, fields: FieldSnapshot) {
        self.items.insert(id, ItemRecord::new(fields));
    }

    #[must_use]
    pub fn get(&self, id: WorkItemId) -> Option<&ItemRecord> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: WorkItemId) -> Option<&mut ItemRecord> {
        self.items.get_mut(&id)
    }

    /// Computation state of `id`, if the item is known.
    #[must_use]
    pub fn state(&self, id: WorkItemId) -> Option<&ComputationState> {
        self.items.get(&id).map(|r| &r.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkItemId, &ItemRecord)> + '_ {
        self.items.iter().map(|(id, r)| (*id, r))
    }

    pub fn ids(&self) -> impl Iterator<Item = WorkItemId> + '_ {
        self.items.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<(WorkItemId, FieldSnapshot)> for SnapshotStore {
    fn from_iter<T: IntoIterator<Item = (WorkItemId, FieldSnapshot)>>(iter: T) -> Self {
        Self::from_snapshots(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, FieldValue)]) -> FieldSnapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn fresh_state_is_unprocessed() {
        let store: SnapshotStore = [(WorkItemId(1), FieldSnapshot::new())].into_iter().collect();
        let state = store.state(WorkItemId(1)).expect("known item");
        assert!(!state.is_processed);
        assert!(!state.is_update_required);
        assert!(state.rollup_info.is_empty());
    }

    #[test]
    fn metadata_accessors_read_text_fields() {
        let record = ItemRecord::new(snap(&[
            (FIELD_TITLE, FieldValue::Text("Checkout flow".into())),
            (FIELD_TYPE, FieldValue::Text("Feature".into())),
            (FIELD_STATE, FieldValue::Text("Active".into())),
        ]));
        assert_eq!(record.title(), "Checkout flow");
        assert_eq!(record.work_item_type(), "Feature");
        assert_eq!(record.workflow_state(), "Active");
    }

    #[test]
    fn missing_metadata_reads_empty() {
        let record = ItemRecord::new(FieldSnapshot::new());
        assert_eq!(record.title(), "");
    }

    #[test]
    fn iteration_is_ascending_by_id() {
        let store: SnapshotStore = [
            (WorkItemId(9), FieldSnapshot::new()),
            (WorkItemId(2), FieldSnapshot::new()),
            (WorkItemId(5), FieldSnapshot::new()),
        ]
        .into_iter()
        .collect();
        let ids: Vec<_> = store.ids().collect();
        assert_eq!(ids, vec![WorkItemId(2), WorkItemId(5), WorkItemId(9)]);
    }
}
