//! Bottom-up rollup of cost fields through the hierarchy.
//!
//! For a hierarchy like:
//! ```text
//! Epic 1
//!   ├── Feature 2
//!   │   ├── Task 4 (RemainingWork 3)
//!   │   └── Task 5 (RemainingWork 2.5)
//!   └── Task 3 (RemainingWork 4)
//! ```
//!
//! Feature 2 totals 5.5 and Epic 1 totals 9.5. Leaves copy their current
//! value through (absent reads as 0); every parent is the sum of its direct
//! children, rounded to cents after each addition. Stored parent values are
//! never trusted as inputs.
//!
//! Traversal is depth-first post-order. `is_processed` memoizes each item,
//! so entering the same subtree again (shared children, repeated entry
//! points, a second call) does no work.

#![allow(clippy::module_name_repetitions)]

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::error::RollupError;
use crate::hierarchy::HierarchyIndex;
use crate::model::{FieldSnapshot, FieldValue, WorkItemId};
use crate::policy::needs_update;
use crate::snapshot::SnapshotStore;

/// Round to 2 decimal places, halves away from zero.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute rollup totals and update flags for every item in `store`.
///
/// Entry points are every parent of `index` (ascending), then every
/// remaining item of `store` so free-standing items are evaluated too.
///
/// # Errors
///
/// Returns [`RollupError::MissingSnapshot`] when the hierarchy names an
/// item that has no snapshot in `store`.
#[instrument(skip_all, fields(items = store.len(), parents = index.len(), rollup_fields = rollup_fields.len()))]
pub fn compute_rollups(
    index: &HierarchyIndex,
    store: &mut SnapshotStore,
    rollup_fields: &[String],
) -> Result<(), RollupError> {
    for parent in index.parents() {
        visit(parent, None, index, store, rollup_fields)?;
    }

    let remaining: Vec<WorkItemId> = store
        .iter()
        .filter(|(_, record)| !record.state.is_processed)
        .map(|(id, _)| id)
        .collect();
    for id in remaining {
        visit(id, None, index, store, rollup_fields)?;
    }

    Ok(())
}

/// Ensure `id` and its whole subtree are processed.
fn visit(
    id: WorkItemId,
    parent: Option<WorkItemId>,
    index: &HierarchyIndex,
    store: &mut SnapshotStore,
    rollup_fields: &[String],
) -> Result<(), RollupError> {
    let record = store
        .get(id)
        .ok_or(RollupError::MissingSnapshot { item: id, parent })?;
    if record.state.is_processed {
        return Ok(());
    }

    let children = index.children(id);
    let totals = if children.is_empty() {
        leaf_totals(&record.fields, rollup_fields)
    } else {
        let mut totals: BTreeMap<String, f64> =
            rollup_fields.iter().map(|f| (f.clone(), 0.0)).collect();

        for &child in children {
            visit(child, Some(id), index, store, rollup_fields)?;
            let child_state = store
                .state(child)
                .ok_or(RollupError::MissingSnapshot {
                    item: child,
                    parent: Some(id),
                })?;
            for field in rollup_fields {
                let child_value = child_state.rollup(field).unwrap_or(0.0);
                if let Some(total) = totals.get_mut(field) {
                    *total = round2(*total + child_value);
                }
            }
        }

        debug!(item = %id, children = children.len(), ?totals, "rolled up parent");
        totals
    };

    let record = store
        .get_mut(id)
        .ok_or(RollupError::MissingSnapshot { item: id, parent })?;
    record.state.rollup_info = totals;
    record.state.is_processed = true;
    record.state.is_update_required =
        needs_update(&record.fields, &record.state.rollup_info, rollup_fields);

    Ok(())
}

fn leaf_totals(fields: &FieldSnapshot, rollup_fields: &[String]) -> BTreeMap<String, f64> {
    rollup_fields
        .iter()
        .map(|f| {
            let value = fields.get(f).and_then(FieldValue::as_number).unwrap_or(0.0);
            (f.clone(), value)
        })
        .collect()
}
