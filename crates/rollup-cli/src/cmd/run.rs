//! `rollup run`: fetch from Azure DevOps, compute, and write back.

use std::path::Path;

use anyhow::Context as _;
use clap::Args;
use rollup_core::config::RollupConfig;
use rollup_core::pipeline::prepare_run;
use tracing::{info, warn};

use super::load_effective_config;
use super::report::{RunReport, render_report};
use crate::client::AzureDevOpsClient;
use crate::output::OutputMode;

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Compute and print the plan without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of work items to update in this run.
    #[arg(long, value_name = "N")]
    pub max_updates: Option<usize>,

    /// Work items per batch request (1-200).
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Azure DevOps organization. Overrides ROLLUP_ORG and the config file.
    #[arg(long)]
    pub org: Option<String>,

    /// Azure DevOps project. Overrides ROLLUP_PROJECT and the config file.
    #[arg(long)]
    pub project: Option<String>,

    /// Personal access token. Prefer ROLLUP_PAT over passing it here.
    #[arg(long)]
    pub token: Option<String>,

    /// WIQL tree query selecting the hierarchy.
    #[arg(long)]
    pub query: Option<String>,
}

impl RunArgs {
    fn apply_to(&self, config: &mut RollupConfig) {
        if let Some(n) = self.max_updates {
            config.write.max_updates = n;
        }
        if let Some(n) = self.batch_size {
            config.write.batch_size = n;
        }
        if let Some(org) = &self.org {
            config.connection.organization = Some(org.clone());
        }
        if let Some(project) = &self.project {
            config.connection.project = Some(project.clone());
        }
        if let Some(token) = &self.token {
            config.connection.token = Some(token.clone());
        }
        if let Some(query) = &self.query {
            config.rollup.query.clone_from(query);
        }
    }
}

/// Execute `rollup run`.
pub fn run_run(
    args: &RunArgs,
    config_override: Option<&Path>,
    output: OutputMode,
    cwd: &Path,
) -> anyhow::Result<()> {
    let mut config = load_effective_config(config_override, cwd)?.config;
    args.apply_to(&mut config);
    config.validate_for_server()?;

    let client = AzureDevOpsClient::from_config(&config)?;
    let run = prepare_run(&client, &config).context("rollup run aborted before writing")?;

    let limits = config.write_limits();
    let mut report = RunReport::planned(&run, limits.max_updates, args.dry_run);

    if args.dry_run {
        info!(planned = report.items.len(), "dry run: nothing written");
        return render_report(output, &report);
    }

    match run.write(&client, limits) {
        Ok(summary) => {
            report.written = Some(summary.written);
            render_report(output, &report)
        }
        Err(err) => {
            warn!(error = %err, "write phase failed");
            report.written = None;
            render_report(output, &report)?;
            Err(anyhow::Error::new(err).context("write phase failed"))
        }
    }
}
