use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hierarchy::HIERARCHY_FORWARD;
use crate::writer::{MAX_BATCH_SIZE, WriteLimits};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "rollup.toml";

/// Largest id list the work-items endpoint accepts per call.
pub const MAX_IDS_PER_CALL: usize = 200;

/// Environment variables consulted for the access token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["ROLLUP_PAT", "AZURE_DEVOPS_EXT_PAT"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub rollup: RollupSection,
    #[serde(default)]
    pub write: WriteSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Personal access token. Prefer the environment over the file.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            organization: None,
            project: None,
            api_version: default_api_version(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupSection {
    /// Cost fields summed from children to parents, in write order.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    /// Link type that means "parent contains child".
    #[serde(default = "default_relation")]
    pub relation: String,
    /// Tree query returning the hierarchy to roll up.
    #[serde(default = "default_query")]
    pub query: String,
}

impl Default for RollupSection {
    fn default() -> Self {
        Self {
            fields: default_fields(),
            relation: default_relation(),
            query: default_query(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_updates")]
    pub max_updates: usize,
}

impl Default for WriteSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_updates: default_max_updates(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_max_ids_per_call")]
    pub max_ids_per_call: usize,
    /// Pages requested at the same time.
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_ids_per_call: default_max_ids_per_call(),
            concurrency: default_fetch_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RollupConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Overlay values from the environment, looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = TOKEN_ENV_VARS
            .iter()
            .find_map(|key| lookup(key).filter(|v| !v.trim().is_empty()))
        {
            self.connection.token = Some(token);
        }
        if let Some(org) = lookup("ROLLUP_ORG").filter(|v| !v.is_empty()) {
            self.connection.organization = Some(org);
        }
        if let Some(project) = lookup("ROLLUP_PROJECT").filter(|v| !v.is_empty()) {
            self.connection.project = Some(project);
        }
    }

    #[must_use]
    pub const fn write_limits(&self) -> WriteLimits {
        WriteLimits {
            max_updates: self.write.max_updates,
            batch_size: self.write.batch_size,
        }
    }

    /// Check settings every run needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollup.fields.is_empty() {
            return Err(ConfigError::Invalid(
                "rollup.fields must name at least one field".to_string(),
            ));
        }
        if self.rollup.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "rollup.fields contains an empty field name".to_string(),
            ));
        }
        if self.write.batch_size == 0 || self.write.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "write.batch_size must be between 1 and {MAX_BATCH_SIZE} (got {})",
                self.write.batch_size
            )));
        }
        if self.fetch.max_ids_per_call == 0 || self.fetch.max_ids_per_call > MAX_IDS_PER_CALL {
            return Err(ConfigError::Invalid(format!(
                "fetch.max_ids_per_call must be between 1 and {MAX_IDS_PER_CALL} (got {})",
                self.fetch.max_ids_per_call
            )));
        }
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the settings needed to talk to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when organization, project or token
    /// is missing, or when [`Self::validate`] fails.
    pub fn validate_for_server(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.connection.organization.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(
                "connection.organization is required (or --org / ROLLUP_ORG)".to_string(),
            ));
        }
        if self.connection.project.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(
                "connection.project is required (or --project / ROLLUP_PROJECT)".to_string(),
            ));
        }
        if self.connection.token.is_none() {
            return Err(ConfigError::Invalid(format!(
                "an access token is required (--token or {})",
                TOKEN_ENV_VARS.join(" / ")
            )));
        }
        Ok(())
    }
}

/// Resolve which config file to read: explicit path, else `rollup.toml`.
#[must_use]
pub fn config_path(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    explicit.map_or_else(|| cwd.join(DEFAULT_CONFIG_FILE), Path::to_path_buf)
}

/// Load configuration from `path`.
///
/// A missing default file yields defaults; a missing explicit file is an
/// error.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_config(path: &Path, explicit: bool) -> Result<RollupConfig, ConfigError> {
    if !explicit && !path.exists() {
        return Ok(RollupConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    RollupConfig::from_toml(&content, path)
}

fn default_base_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_api_version() -> String {
    "7.1".to_string()
}

fn default_fields() -> Vec<String> {
    vec![
        "Microsoft.VSTS.Scheduling.RemainingWork".to_string(),
        "Microsoft.VSTS.Scheduling.OriginalEstimate".to_string(),
        "Microsoft.VSTS.Scheduling.CompletedWork".to_string(),
    ]
}

fn default_relation() -> String {
    HIERARCHY_FORWARD.to_string()
}

fn default_query() -> String {
    "SELECT [System.Id] FROM WorkItemLinks \
     WHERE [Source].[System.TeamProject] = @project \
     AND [System.Links.LinkType] = 'System.LinkTypes.Hierarchy-Forward' \
     AND [Target].[System.State] <> 'Removed' \
     MODE (Recursive)"
        .to_string()
}

const fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

const fn default_max_updates() -> usize {
    500
}

const fn default_max_ids_per_call() -> usize {
    MAX_IDS_PER_CALL
}

const fn default_fetch_concurrency() -> usize {
    8
}

const fn default_timeout_secs() -> u64 {
    30
}
