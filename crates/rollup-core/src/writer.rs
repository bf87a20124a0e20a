//! Capped, batched write-back of computed rollups.
//!
//! # Pipeline
//!
//! 1. Select items whose `is_update_required` flag is set, in store order.
//! 2. Cap the selection at `max_updates`, keeping the first items. Dropping
//!    items is a warning, not an error.
//! 3. Split the capped list into batches of `batch_size`.
//! 4. Submit every batch concurrently, one scoped thread per batch.
//! 5. Join all submissions. Any failed batch fails the whole call.
//!
//! # Partial effects
//!
//! Batches are independent requests. When one fails, others may already be
//! committed on the tracker; nothing is rolled back. The next full run
//! recomputes everything and re-detects whatever still differs.

#![allow(clippy::module_name_repetitions)]

use std::thread;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::RollupError;
use crate::model::WorkItemId;
use crate::snapshot::SnapshotStore;

/// Largest batch the tracker's batch endpoint accepts.
pub const MAX_BATCH_SIZE: usize = 200;

/// Set one field to a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPatch {
    pub field: String,
    /// String form of the computed value (`7`, `7.5`).
    pub value: String,
}

/// All field patches for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemPatch {
    pub id: WorkItemId,
    pub ops: Vec<FieldPatch>,
}

/// One request's worth of item patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteBatch {
    pub items: Vec<ItemPatch>,
}

impl WriteBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = WorkItemId> + '_ {
        self.items.iter().map(|i| i.id)
    }
}

/// Applies a batch of patches on the tracker.
///
/// Implementations are shared across the writer threads of one call.
pub trait BatchWriter: Sync {
    /// Apply every patch in `batch`.
    ///
    /// # Errors
    ///
    /// Returns an error when the tracker rejects the batch or any item in it.
    fn write_batch(&self, batch: &WriteBatch) -> anyhow::Result<()>;
}

/// Ceiling and chunking for one write phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteLimits {
    pub max_updates: usize,
    pub batch_size: usize,
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self {
            max_updates: 500,
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// Items selected for writing after the cap is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSelection {
    /// Items whose update flag is set.
    pub selected: usize,
    /// The first `max_updates` of those, in store order.
    pub applied: Vec<WorkItemId>,
    /// `selected - applied.len()`.
    pub truncated: usize,
}

/// Outcome of a successful write phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub selected: usize,
    pub applied: usize,
    pub truncated: usize,
    pub batches: usize,
    /// Items submitted across all accepted batches.
    pub written: usize,
}

/// Pick the items to write, capped at `max_updates`, in store order.
#[must_use]
pub fn select_updates(store: &SnapshotStore, max_updates: usize) -> UpdateSelection {
    let pending: Vec<WorkItemId> = store
        .iter()
        .filter(|(_, record)| record.state.is_update_required)
        .map(|(id, _)| id)
        .collect();

    let selected = pending.len();
    let applied: Vec<WorkItemId> = pending.into_iter().take(max_updates).collect();
    let truncated = selected - applied.len();

    if truncated > 0 {
        warn!(
            selected,
            applied = applied.len(),
            truncated,
            "update cap reached; remaining items are left for the next run"
        );
    }

    UpdateSelection {
        selected,
        applied,
        truncated,
    }
}

/// String form written to the tracker for a computed value.
///
/// Negative zero is written as `0`.
#[must_use]
pub fn format_value(value: f64) -> String {
    #[allow(clippy::float_cmp)]
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value}")
}

/// Build the write batches for `ids`, one patch per rollup field per item.
///
/// # Errors
///
/// Returns [`RollupError::InvalidBatchSize`] for a batch size of zero, or
/// [`RollupError::MissingSnapshot`] when an id is not in `store`.
pub fn build_batches(
    store: &SnapshotStore,
    ids: &[WorkItemId],
    rollup_fields: &[String],
    batch_size: usize,
) -> Result<Vec<WriteBatch>, RollupError> {
    if batch_size == 0 {
        return Err(RollupError::InvalidBatchSize);
    }

    ids.chunks(batch_size)
        .map(|chunk| {
            let items = chunk
                .iter()
                .map(|&id| {
                    let state = store
                        .state(id)
                        .ok_or(RollupError::MissingSnapshot { item: id, parent: None })?;
                    let ops = rollup_fields
                        .iter()
                        .map(|field| FieldPatch {
                            field: field.clone(),
                            value: format_value(state.rollup(field).unwrap_or(0.0)),
                        })
                        .collect();
                    Ok(ItemPatch { id, ops })
                })
                .collect::<Result<Vec<_>, RollupError>>()?;
            Ok(WriteBatch { items })
        })
        .collect()
}

/// Write every item flagged for update, capped and batched.
///
/// # Errors
///
/// Returns [`RollupError::InvalidBatchSize`] for a zero batch size, or
/// [`RollupError::BatchWrite`] naming the first failed batch. Other batches
/// may have committed when this is returned.
#[instrument(skip_all, fields(max_updates = limits.max_updates, batch_size = limits.batch_size))]
pub fn write_updates<W: BatchWriter + ?Sized>(
    store: &SnapshotStore,
    rollup_fields: &[String],
    limits: WriteLimits,
    writer: &W,
) -> Result<WriteSummary, RollupError> {
    let selection = select_updates(store, limits.max_updates);
    let batches = build_batches(store, &selection.applied, rollup_fields, limits.batch_size)?;

    let mut summary = WriteSummary {
        selected: selection.selected,
        applied: selection.applied.len(),
        truncated: selection.truncated,
        batches: batches.len(),
        written: 0,
    };

    if batches.is_empty() {
        if selection.selected > 0 {
            info!(
                selected = selection.selected,
                "update cap is 0; nothing written this run"
            );
        } else {
            info!("no work items need updating");
        }
        return Ok(summary);
    }

    let results: Vec<anyhow::Result<()>> = thread::scope(|scope| {
        let handles: Vec<_> = batches
            .iter()
            .enumerate()
            .map(|(i, batch)| {
                scope.spawn(move || {
                    debug!(batch = i + 1, items = batch.len(), "submitting batch");
                    writer.write_batch(batch)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("batch writer thread panicked")))
            })
            .collect()
    });

    let total = batches.len();
    let mut first_failure = None;
    for (i, (batch, result)) in batches.iter().zip(results).enumerate() {
        match result {
            Ok(()) => summary.written += batch.len(),
            Err(source) => {
                warn!(batch = i + 1, items = batch.len(), error = %source, "write batch failed");
                if first_failure.is_none() {
                    first_failure = Some(RollupError::BatchWrite {
                        batch: i + 1,
                        batches: total,
                        items: batch.len(),
                        source,
                    });
                }
            }
        }
    }

    if let Some(err) = first_failure {
        return Err(err);
    }

    info!(
        written = summary.written,
        batches = summary.batches,
        truncated = summary.truncated,
        "write phase complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::round2;
    use crate::model::FieldSnapshot;
    use std::sync::{Barrier, Mutex};

    const REMAINING: &str = "RemainingWork";
    const ESTIMATE: &str = "OriginalEstimate";

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    /// Store with items `1..=n`; those in `flagged` need an update and
    /// carry rollup `id * 1.5` for each field.
    #[allow(clippy::cast_precision_loss)]
    fn flagged_store(n: u64, flagged: &[u64], fields: &[String]) -> SnapshotStore {
        let mut store: SnapshotStore = (1..=n)
            .map(|i| (WorkItemId(i), FieldSnapshot::new()))
            .collect();
        for &i in flagged {
            let record = store.get_mut(WorkItemId(i)).expect("item exists");
            for f in fields {
                record.state.rollup_info.insert(f.clone(), i as f64 * 1.5);
            }
            record.state.is_processed = true;
            record.state.is_update_required = true;
        }
        store
    }

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<WriteBatch>>,
        fail_containing: Option<WorkItemId>,
    }

    impl BatchWriter for Recorder {
        fn write_batch(&self, batch: &WriteBatch) -> anyhow::Result<()> {
            if let Some(bad) = self.fail_containing.filter(|bad| batch.ids().any(|id| id == *bad)) {
                anyhow::bail!("HTTP 400 for item {bad}");
            }
            self.batches
                .lock()
                .expect("recorder lock")
                .push(batch.clone());
            Ok(())
        }
    }

    #[test]
    fn selection_preserves_store_order() {
        let fields = names(&[REMAINING]);
        let store = flagged_store(6, &[5, 2, 4], &fields);
        let sel = select_updates(&store, 10);
        assert_eq!(sel.selected, 3);
        assert_eq!(sel.applied, vec![WorkItemId(2), WorkItemId(4), WorkItemId(5)]);
        assert_eq!(sel.truncated, 0);
    }

    #[test]
    fn cap_keeps_first_k_and_reports_truncation() {
        let fields = names(&[REMAINING]);
        let store = flagged_store(10, &[1, 3, 5, 7, 9], &fields);
        let sel = select_updates(&store, 2);
        assert_eq!(sel.applied, vec![WorkItemId(1), WorkItemId(3)]);
        assert_eq!(sel.selected, 5);
        assert_eq!(sel.truncated, 3);
    }

    #[test]
    fn batches_cover_selection_with_ceil_count() {
        let fields = names(&[REMAINING]);
        let ids: Vec<u64> = (1..=7).collect();
        let store = flagged_store(7, &ids, &fields);
        let sel = select_updates(&store, 100);
        let batches = build_batches(&store, &sel.applied, &fields, 3).expect("batches");

        assert_eq!(batches.len(), 3);
        assert_eq!(batches.iter().map(WriteBatch::len).collect::<Vec<_>>(), vec![3, 3, 1]);
        let all: Vec<_> = batches.iter().flat_map(WriteBatch::ids).collect();
        assert_eq!(all, sel.applied);
    }

    #[test]
    fn one_patch_per_field_with_string_values() {
        let fields = names(&[REMAINING, ESTIMATE]);
        let store = flagged_store(2, &[2], &fields);
        let batches = build_batches(&store, &[WorkItemId(2)], &fields, 10).expect("batches");
        let item = &batches[0].items[0];
        assert_eq!(item.id, WorkItemId(2));
        assert_eq!(
            item.ops,
            vec![
                FieldPatch {
                    field: REMAINING.to_string(),
                    value: "3".to_string()
                },
                FieldPatch {
                    field: ESTIMATE.to_string(),
                    value: "3".to_string()
                },
            ]
        );
    }

    #[test]
    fn format_value_matches_tracker_strings() {
        assert_eq!(format_value(7.0), "7");
        assert_eq!(format_value(7.5), "7.5");
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(12.25), "12.25");
    }

    #[test]
    fn negative_zero_is_written_as_zero() {
        assert_eq!(format_value(-0.0), "0");
        assert_eq!(format_value(round2(-0.001)), "0");
        assert_eq!(format_value(-1.5), "-1.5");
    }

    /// Blocks every batch until all of them are in flight.
    struct BarrierWriter {
        barrier: Barrier,
        calls: Mutex<usize>,
    }

    impl BatchWriter for BarrierWriter {
        fn write_batch(&self, _batch: &WriteBatch) -> anyhow::Result<()> {
            self.barrier.wait();
            *self.calls.lock().expect("calls lock") += 1;
            Ok(())
        }
    }

    #[test]
    fn batches_are_submitted_concurrently() {
        let fields = names(&[REMAINING]);
        let ids: Vec<u64> = (1..=6).collect();
        let store = flagged_store(6, &ids, &fields);
        // Three batches of two; a sequential submitter would block forever
        // on the first wait.
        let writer = BarrierWriter {
            barrier: Barrier::new(3),
            calls: Mutex::new(0),
        };
        let summary = write_updates(
            &store,
            &fields,
            WriteLimits {
                max_updates: 10,
                batch_size: 2,
            },
            &writer,
        )
        .expect("write");

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.written, 6);
        assert_eq!(*writer.calls.lock().expect("calls lock"), 3);
    }

    #[test]
    fn zero_cap_writes_nothing_and_reports_truncation() {
        let fields = names(&[REMAINING]);
        let store = flagged_store(3, &[1, 2], &fields);
        let writer = Recorder::default();
        let summary = write_updates(
            &store,
            &fields,
            WriteLimits {
                max_updates: 0,
                batch_size: 2,
            },
            &writer,
        )
        .expect("write");

        assert_eq!(summary.selected, 2);
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.truncated, 2);
        assert_eq!(summary.batches, 0);
        assert!(writer.batches.lock().expect("lock").is_empty());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let fields = names(&[REMAINING]);
        let store = flagged_store(1, &[1], &fields);
        let writer = Recorder::default();
        let err = write_updates(
            &store,
            &fields,
            WriteLimits {
                max_updates: 10,
                batch_size: 0,
            },
            &writer,
        )
        .expect_err("should fail");
        assert!(matches!(err, RollupError::InvalidBatchSize));
    }

    #[test]
    fn write_submits_every_batch_and_counts_items() {
        let fields = names(&[REMAINING]);
        let ids: Vec<u64> = (1..=5).collect();
        let store = flagged_store(5, &ids, &fields);
        let writer = Recorder::default();
        let summary = write_updates(
            &store,
            &fields,
            WriteLimits {
                max_updates: 4,
                batch_size: 2,
            },
            &writer,
        )
        .expect("write");

        assert_eq!(summary.selected, 5);
        assert_eq!(summary.applied, 4);
        assert_eq!(summary.truncated, 1);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.written, 4);

        let mut written: Vec<_> = writer
            .batches
            .lock()
            .expect("lock")
            .iter()
            .flat_map(|b| b.ids().collect::<Vec<_>>())
            .collect();
        written.sort();
        assert_eq!(written, (1..=4).map(WorkItemId).collect::<Vec<_>>());
    }

    #[test]
    fn nothing_to_write_makes_no_calls() {
        let fields = names(&[REMAINING]);
        let store = flagged_store(3, &[], &fields);
        let writer = Recorder::default();
        let summary = write_updates(&store, &fields, WriteLimits::default(), &writer).expect("ok");
        assert_eq!(summary, WriteSummary::default());
        assert!(writer.batches.lock().expect("lock").is_empty());
    }

    #[test]
    fn failed_batch_fails_whole_call_after_others_commit() {
        let fields = names(&[REMAINING]);
        let ids: Vec<u64> = (1..=6).collect();
        let store = flagged_store(6, &ids, &fields);
        let writer = Recorder {
            fail_containing: Some(WorkItemId(3)),
            ..Recorder::default()
        };
        let err = write_updates(
            &store,
            &fields,
            WriteLimits {
                max_updates: 10,
                batch_size: 2,
            },
            &writer,
        )
        .expect_err("should fail");

        match err {
            RollupError::BatchWrite {
                batch,
                batches,
                items,
                ..
            } => {
                assert_eq!(batch, 2);
                assert_eq!(batches, 3);
                assert_eq!(items, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(writer.batches.lock().expect("lock").len(), 2, "partial effect");
    }
}
