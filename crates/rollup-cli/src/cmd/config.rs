//! `rollup config`: show the effective configuration.

use std::path::Path;

use anyhow::Context as _;
use clap::Args;
use rollup_core::config::RollupConfig;
use serde::Serialize;

use super::load_effective_config;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {}

#[derive(Debug, Serialize)]
struct ConfigReport {
    /// Config file consulted, or `None` when running on defaults.
    source: Option<String>,
    /// Whether a token was resolved. The token itself is never printed.
    token_set: bool,
    #[serde(flatten)]
    config: RollupConfig,
}

/// Execute `rollup config`.
pub fn run_config(
    _args: &ConfigArgs,
    config_override: Option<&Path>,
    output: OutputMode,
    cwd: &Path,
) -> anyhow::Result<()> {
    let loaded = load_effective_config(config_override, cwd)?;
    let report = ConfigReport {
        source: loaded
            .from_file
            .then(|| loaded.path.display().to_string()),
        token_set: loaded.config.connection.token.is_some(),
        config: loaded.config,
    };

    let body = toml::to_string_pretty(&report.config).context("failed to encode config as TOML")?;

    render_mode(
        output,
        &report,
        |r, w| {
            write!(w, "{body}")?;
            writeln!(w, "# token: {}", token_label(r.token_set))
        },
        |r, w| {
            pretty_section(w, "Effective configuration")?;
            pretty_kv(w, "source", r.source.as_deref().unwrap_or("(defaults)"))?;
            pretty_kv(w, "token", token_label(r.token_set))?;
            writeln!(w)?;
            write!(w, "{body}")
        },
    )
}

const fn token_label(set: bool) -> &'static str {
    if set { "set (redacted)" } else { "not set" }
}
