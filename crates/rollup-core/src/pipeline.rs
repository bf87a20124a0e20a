//! One full rollup run: query, fetch, compute, then (optionally) write.
//!
//! [`prepare_run`] does everything up to and including the rollup
//! computation. The returned [`RollupRun`] can be reported before anything
//! is written, and stays reportable when the write phase fails.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, instrument};

use crate::config::RollupConfig;
use crate::engine::compute_rollups;
use crate::error::RollupError;
use crate::hierarchy::{HierarchyIndex, build_hierarchy_index};
use crate::model::{FieldValue, METADATA_FIELDS, WorkItemId};
use crate::snapshot::SnapshotStore;
use crate::source::WorkItemSource;
use crate::writer::{
    BatchWriter, UpdateSelection, WriteLimits, WriteSummary, select_updates, write_updates,
};

/// Current and computed value of one rollup field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub current: Option<FieldValue>,
    pub rollup: f64,
}

/// A work item the policy wants written, with report metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUpdate {
    pub id: WorkItemId,
    pub work_item_type: String,
    pub state: String,
    pub title: String,
    pub changes: Vec<FieldChange>,
}

/// A computed run, ready to be reported or written.
#[derive(Debug, Clone)]
pub struct RollupRun {
    index: HierarchyIndex,
    store: SnapshotStore,
    rollup_fields: Vec<String>,
}

impl RollupRun {
    /// Build and compute a run from already-fetched data.
    ///
    /// # Errors
    ///
    /// Returns [`RollupError::MissingSnapshot`] when the hierarchy names an
    /// item absent from `store`.
    pub fn compute(
        index: HierarchyIndex,
        mut store: SnapshotStore,
        rollup_fields: Vec<String>,
    ) -> Result<Self, RollupError> {
        compute_rollups(&index, &mut store, &rollup_fields)?;
        Ok(Self {
            index,
            store,
            rollup_fields,
        })
    }

    #[must_use]
    pub const fn index(&self) -> &HierarchyIndex {
        &self.index
    }

    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    #[must_use]
    pub fn rollup_fields(&self) -> &[String] {
        &self.rollup_fields
    }

    /// Every item needing an update, in store order.
    #[must_use]
    pub fn planned_updates(&self) -> Vec<PlannedUpdate> {
        self.store
            .iter()
            .filter(|(_, record)| record.state.is_update_required)
            .map(|(id, record)| PlannedUpdate {
                id,
                work_item_type: record.work_item_type().to_string(),
                state: record.workflow_state().to_string(),
                title: record.title().to_string(),
                changes: self
                    .rollup_fields
                    .iter()
                    .map(|field| FieldChange {
                        field: field.clone(),
                        current: record.field(field).cloned(),
                        rollup: record.state.rollup(field).unwrap_or(0.0),
                    })
                    .collect(),
            })
            .collect()
    }

    /// The capped selection the write phase would apply.
    #[must_use]
    pub fn selection(&self, max_updates: usize) -> UpdateSelection {
        select_updates(&self.store, max_updates)
    }

    /// Persist the capped, batched updates through `writer`.
    ///
    /// # Errors
    ///
    /// See [`write_updates`].
    pub fn write<W: BatchWriter + ?Sized>(
        &self,
        writer: &W,
        limits: WriteLimits,
    ) -> Result<WriteSummary, RollupError> {
        write_updates(&self.store, &self.rollup_fields, limits, writer)
    }
}

/// Field list requested from the source: metadata first, then rollup fields.
#[must_use]
pub fn fetch_field_list(rollup_fields: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = METADATA_FIELDS.iter().map(ToString::to_string).collect();
    for field in rollup_fields {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    fields
}

/// Query, fetch and compute one run.
///
/// # Errors
///
/// Returns [`RollupError::Source`] when the query or fetch fails, or
/// [`RollupError::MissingSnapshot`] when the fetch misses a hierarchy item.
#[instrument(skip_all)]
pub fn prepare_run<S: WorkItemSource + ?Sized>(
    source: &S,
    config: &RollupConfig,
) -> Result<RollupRun, RollupError> {
    let query = source
        .query_hierarchy()
        .map_err(|source| RollupError::Source {
            operation: "hierarchy query",
            source,
        })?;

    let index = build_hierarchy_index(&query.edges, &config.rollup.relation);
    info!(
        items = query.item_ids.len(),
        edges = query.edges.len(),
        parents = index.len(),
        "hierarchy loaded"
    );

    let fields = fetch_field_list(&config.rollup.fields);
    let snapshots = if query.item_ids.is_empty() {
        BTreeMap::new()
    } else {
        source
            .fetch_fields(&query.item_ids, &fields)
            .map_err(|source| RollupError::Source {
                operation: "field fetch",
                source,
            })?
    };
    info!(fetched = snapshots.len(), "field snapshots loaded");

    let run = RollupRun::compute(
        index,
        SnapshotStore::from_snapshots(snapshots),
        config.rollup.fields.clone(),
    )?;

    let pending = run
        .store()
        .iter()
        .filter(|(_, r)| r.state.is_update_required)
        .count();
    info!(items = run.store().len(), pending, "rollup computed");

    Ok(run)
}
