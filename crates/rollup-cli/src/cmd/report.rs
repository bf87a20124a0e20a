//! Plan/summary report shared by `rollup run` and `rollup plan`.

use std::io::{self, Write};

use rollup_core::pipeline::{FieldChange, PlannedUpdate, RollupRun};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};

/// Stable JSON payload for a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub items: Vec<PlannedUpdate>,
    pub selected: usize,
    pub applied: usize,
    pub truncated: usize,
    /// Items accepted by the tracker; `None` when the write phase failed.
    pub written: Option<usize>,
    pub dry_run: bool,
}

impl RunReport {
    /// Report for a computed run before anything is written.
    pub fn planned(run: &RollupRun, max_updates: usize, dry_run: bool) -> Self {
        let selection = run.selection(max_updates);
        Self {
            items: run.planned_updates(),
            selected: selection.selected,
            applied: selection.applied.len(),
            truncated: selection.truncated,
            written: Some(0),
            dry_run,
        }
    }
}

pub fn render_report(output: OutputMode, report: &RunReport) -> anyhow::Result<()> {
    render_mode(output, report, render_text, render_pretty)
}

/// Last dotted segment, e.g. `RemainingWork` for the scheduling field.
fn short_field(field: &str) -> &str {
    field.rsplit('.').next().unwrap_or(field)
}

fn format_current(change: &FieldChange) -> String {
    change
        .current
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string)
}

fn written_label(report: &RunReport) -> String {
    match (report.written, report.dry_run) {
        (_, true) => "0 (dry run)".to_string(),
        (Some(n), false) => n.to_string(),
        (None, false) => "failed".to_string(),
    }
}

fn render_text(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "id\ttype\tstate\ttitle\tchanges")?;
    for update in &report.items {
        let changes: Vec<String> = update
            .changes
            .iter()
            .map(|c| format!("{}={}->{}", c.field, format_current(c), c.rollup))
            .collect();
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            update.id,
            update.work_item_type,
            update.state,
            update.title,
            changes.join(";")
        )?;
    }
    writeln!(
        w,
        "selected={} applied={} truncated={} written={} dry_run={}",
        report.selected,
        report.applied,
        report.truncated,
        report
            .written
            .map_or_else(|| "failed".to_string(), |n| n.to_string()),
        report.dry_run
    )
}

fn render_pretty(report: &RunReport, w: &mut dyn Write) -> io::Result<()> {
    if report.items.is_empty() {
        writeln!(w, "Nothing to update: every rollup matches its stored value.")?;
    } else {
        pretty_section(
            w,
            &format!("Rollup plan ({} items need updating)", report.items.len()),
        )?;
        writeln!(w, "{:<8} {:<14} {:<12} TITLE", "ID", "TYPE", "STATE")?;
        for update in &report.items {
            writeln!(
                w,
                "{:<8} {:<14} {:<12} {}",
                update.id, update.work_item_type, update.state, update.title
            )?;
            for change in &update.changes {
                writeln!(
                    w,
                    "{:<8} {}: {} -> {}",
                    "",
                    short_field(&change.field),
                    format_current(change),
                    change.rollup
                )?;
            }
        }
        pretty_rule(w)?;
    }

    pretty_kv(w, "selected", report.selected.to_string())?;
    pretty_kv(w, "applied", report.applied.to_string())?;
    pretty_kv(w, "truncated", report.truncated.to_string())?;
    pretty_kv(w, "written", written_label(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollup_core::{FieldValue, WorkItemId};

    fn report() -> RunReport {
        RunReport {
            items: vec![PlannedUpdate {
                id: WorkItemId(1),
                work_item_type: "Feature".into(),
                state: "Active".into(),
                title: "Checkout".into(),
                changes: vec![
                    FieldChange {
                        field: "Microsoft.VSTS.Scheduling.RemainingWork".into(),
                        current: Some(FieldValue::Number(0.0)),
                        rollup: 7.0,
                    },
                    FieldChange {
                        field: "Microsoft.VSTS.Scheduling.OriginalEstimate".into(),
                        current: None,
                        rollup: 2.5,
                    },
                ],
            }],
            selected: 1,
            applied: 1,
            truncated: 0,
            written: Some(1),
            dry_run: false,
        }
    }

    fn capture(render: fn(&RunReport, &mut dyn Write) -> io::Result<()>, report: &RunReport) -> String {
        let mut buf = Vec::new();
        render(report, &mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn text_rows_are_tab_separated() {
        let text = capture(render_text, &report());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id\ttype\tstate\ttitle\tchanges");
        assert_eq!(
            lines[1],
            "1\tFeature\tActive\tCheckout\t\
             Microsoft.VSTS.Scheduling.RemainingWork=0->7;\
             Microsoft.VSTS.Scheduling.OriginalEstimate=-->2.5"
        );
        assert_eq!(
            lines[2],
            "selected=1 applied=1 truncated=0 written=1 dry_run=false"
        );
    }

    #[test]
    fn pretty_shows_short_field_names_and_summary() {
        let text = capture(render_pretty, &report());
        assert!(text.contains("Rollup plan (1 items need updating)"));
        assert!(text.contains("RemainingWork: 0 -> 7"));
        assert!(text.contains("OriginalEstimate: - -> 2.5"));
        assert!(text.contains("written:     1"));
    }

    #[test]
    fn pretty_empty_plan_says_nothing_to_update() {
        let mut empty = report();
        empty.items.clear();
        empty.dry_run = true;
        let text = capture(render_pretty, &empty);
        assert!(text.starts_with("Nothing to update"));
        assert!(text.contains("0 (dry run)"));
    }

    #[test]
    fn json_shape_is_stable() {
        let value = serde_json::to_value(report()).expect("json");
        for key in ["items", "selected", "applied", "truncated", "written", "dry_run"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["items"][0]["id"], 1);
        assert_eq!(value["items"][0]["changes"][0]["rollup"], 7.0);
    }
}
