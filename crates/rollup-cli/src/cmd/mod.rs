pub mod config;
pub mod plan;
pub mod report;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Result;
use rollup_core::config::{RollupConfig, config_path, load_config};

/// Config file location plus the resolved settings (file, then env).
pub struct LoadedConfig {
    pub path: PathBuf,
    pub from_file: bool,
    pub config: RollupConfig,
}

/// Load `--config` (or `rollup.toml` in `cwd`) and overlay the environment.
pub fn load_effective_config(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig> {
    let path = config_path(explicit, cwd);
    let from_file = explicit.is_some() || path.exists();
    let mut config = load_config(&path, explicit.is_some())?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(LoadedConfig {
        path,
        from_file,
        config,
    })
}
