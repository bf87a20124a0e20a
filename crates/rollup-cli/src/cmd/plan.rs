//! `rollup plan`: compute rollups from an exported JSON file, no network.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Args;
use rollup_core::pipeline::prepare_run;

use super::load_effective_config;
use super::report::{RunReport, render_report};
use crate::offline::JsonSource;
use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// JSON export with `edges` and `items`.
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Cap applied when counting what a run would write.
    #[arg(long, value_name = "N")]
    pub max_updates: Option<usize>,

    /// Rollup field to compute (repeatable). Overrides `rollup.fields`.
    #[arg(long = "field", value_name = "NAME")]
    pub fields: Vec<String>,
}

/// Execute `rollup plan`.
pub fn run_plan(
    args: &PlanArgs,
    config_override: Option<&Path>,
    output: OutputMode,
    cwd: &Path,
) -> anyhow::Result<()> {
    let mut config = load_effective_config(config_override, cwd)?.config;
    if let Some(n) = args.max_updates {
        config.write.max_updates = n;
    }
    if !args.fields.is_empty() {
        config.rollup.fields.clone_from(&args.fields);
    }
    config.validate()?;

    let input = if args.input.is_absolute() {
        args.input.clone()
    } else {
        cwd.join(&args.input)
    };
    let source = JsonSource::from_path(&input)?;
    let run = prepare_run(&source, &config).context("rollup plan failed")?;

    let report = RunReport::planned(&run, config.write.max_updates, true);
    render_report(output, &report)
}
