//! Decide whether a computed rollup should be written back.
//!
//! An item is written when at least one rollup field differs from its
//! current value **and** the sum of computed plus current values over all
//! rollup fields is positive. The second condition keeps never-costed items
//! (every field absent, every total 0) from producing a write of zeros.
//!
//! The guard is one-sided: an item going from "all absent" to "computed 0"
//! is skipped, while an item that previously held non-zero values and now
//! totals 0 is still written because its current values keep the sum
//! positive.

use std::collections::BTreeMap;

use crate::model::{FieldSnapshot, FieldValue};

/// `true` when the computed `rollup_info` should replace `fields`.
///
/// An absent or non-numeric current value differs from any computed value.
#[must_use]
pub fn needs_update(
    fields: &FieldSnapshot,
    rollup_info: &BTreeMap<String, f64>,
    rollup_fields: &[String],
) -> bool {
    let mut net_sum = 0.0_f64;
    let mut any_changed = false;

    for field in rollup_fields {
        let current = fields.get(field).and_then(FieldValue::as_number);
        let rollup = rollup_info.get(field).copied();

        net_sum += rollup.unwrap_or(0.0) + current.unwrap_or(0.0);

        if let Some(value) = rollup {
            #[allow(clippy::float_cmp)]
            let differs = current != Some(value);
            if differs {
                any_changed = true;
            }
        }
    }

    net_sum > 0.0 && any_changed
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMAINING: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
    const ESTIMATE: &str = "Microsoft.VSTS.Scheduling.OriginalEstimate";

    fn fields(pairs: &[(&str, f64)]) -> FieldSnapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), FieldValue::Number(*v)))
            .collect()
    }

    fn rollups(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn changed_value_is_detected() {
        let f = fields(&[(REMAINING, 5.0)]);
        let r = rollups(&[(REMAINING, 7.0)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn unchanged_value_is_skipped() {
        let f = fields(&[(REMAINING, 7.0)]);
        let r = rollups(&[(REMAINING, 7.0)]);
        assert!(!needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn all_absent_and_zero_total_is_suppressed() {
        let f = FieldSnapshot::new();
        let r = rollups(&[(REMAINING, 0.0), (ESTIMATE, 0.0)]);
        assert!(!needs_update(&f, &r, &names(&[REMAINING, ESTIMATE])));
    }

    #[test]
    fn absent_current_with_positive_total_is_written() {
        let f = FieldSnapshot::new();
        let r = rollups(&[(REMAINING, 3.5)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn previously_costed_item_dropping_to_zero_is_written() {
        let f = fields(&[(REMAINING, 4.0)]);
        let r = rollups(&[(REMAINING, 0.0)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn explicit_zero_to_zero_is_skipped() {
        let f = fields(&[(REMAINING, 0.0)]);
        let r = rollups(&[(REMAINING, 0.0)]);
        assert!(!needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn any_single_changed_field_triggers() {
        let f = fields(&[(REMAINING, 2.0), (ESTIMATE, 8.0)]);
        let r = rollups(&[(REMAINING, 2.0), (ESTIMATE, 10.0)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING, ESTIMATE])));
    }

    #[test]
    fn field_without_rollup_cannot_mark_change() {
        let f = fields(&[(REMAINING, 2.0), (ESTIMATE, 8.0)]);
        let r = rollups(&[(REMAINING, 2.0)]);
        assert!(!needs_update(&f, &r, &names(&[REMAINING, ESTIMATE])));
    }

    #[test]
    fn numeric_string_equal_to_rollup_is_unchanged() {
        let mut f = FieldSnapshot::new();
        f.insert(REMAINING.to_string(), FieldValue::Text("7".into()));
        let r = rollups(&[(REMAINING, 7.0)]);
        assert!(!needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn non_numeric_current_counts_as_changed() {
        let mut f = FieldSnapshot::new();
        f.insert(REMAINING.to_string(), FieldValue::Text("tbd".into()));
        let r = rollups(&[(REMAINING, 1.0)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING])));
    }

    #[test]
    fn leaf_with_one_missing_field_fills_it_with_zero() {
        // Leaf totals copy current values through; the absent estimate
        // becomes 0, which differs from "absent" while the remaining work
        // keeps the sum positive.
        let f = fields(&[(REMAINING, 5.0)]);
        let r = rollups(&[(REMAINING, 5.0), (ESTIMATE, 0.0)]);
        assert!(needs_update(&f, &r, &names(&[REMAINING, ESTIMATE])));
    }
}
