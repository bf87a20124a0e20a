//! Azure DevOps REST collaborator.
//!
//! Implements both sides of a run against one organization/project:
//! - [`WorkItemSource`]: WIQL link query for the hierarchy, then the
//!   work-items endpoint for field values, paged and fetched concurrently
//!   (at most `fetch.concurrency` pages in flight).
//! - [`BatchWriter`]: the `$batch` endpoint, one JSON-patch request per item.
//!
//! All calls are blocking `ureq` requests sharing one [`ureq::Agent`].

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rollup_core::config::RollupConfig;
use rollup_core::hierarchy::HierarchyEdge;
use rollup_core::model::snapshot_from_json;
use rollup_core::source::{HierarchyQuery, WorkItemSource};
use rollup_core::writer::{BatchWriter, WriteBatch};
use rollup_core::{FieldSnapshot, WorkItemId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Blocking client for one Azure DevOps project.
pub struct AzureDevOpsClient {
    agent: ureq::Agent,
    org_url: String,
    project: String,
    api_version: String,
    authorization: String,
    query: String,
    max_ids_per_call: usize,
    fetch_concurrency: usize,
}

impl AzureDevOpsClient {
    /// Build a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails when organization, project or token is missing.
    pub fn from_config(config: &RollupConfig) -> Result<Self> {
        let conn = &config.connection;
        let organization = conn
            .organization
            .as_deref()
            .ok_or_else(|| anyhow!("connection.organization is not set"))?;
        let project = conn
            .project
            .as_deref()
            .ok_or_else(|| anyhow!("connection.project is not set"))?;
        let token = conn
            .token
            .as_deref()
            .ok_or_else(|| anyhow!("no access token configured"))?;

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .user_agent(concat!("rollup/", env!("CARGO_PKG_VERSION")))
            .build();

        Ok(Self {
            agent,
            org_url: format!(
                "{}/{}",
                conn.base_url.trim_end_matches('/'),
                encode_segment(organization)
            ),
            project: encode_segment(project),
            api_version: conn.api_version.clone(),
            authorization: basic_auth(token),
            query: config.rollup.query.clone(),
            max_ids_per_call: config.fetch.max_ids_per_call.max(1),
            fetch_concurrency: config.fetch.concurrency.max(1),
        })
    }

    fn wiql_url(&self) -> String {
        format!(
            "{}/{}/_apis/wit/wiql?api-version={}",
            self.org_url, self.project, self.api_version
        )
    }

    fn work_items_url(&self, ids: &[WorkItemId], fields: &[String]) -> String {
        let ids = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/_apis/wit/workitems?ids={ids}&fields={}&errorPolicy=omit&api-version={}",
            self.org_url,
            fields.join(","),
            self.api_version
        )
    }

    fn batch_url(&self) -> String {
        format!("{}/_apis/wit/$batch?api-version={}", self.org_url, self.api_version)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .agent
            .get(url)
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
            .call()
            .map_err(|err| describe_error(url, err))?;

        response
            .into_json::<T>()
            .context("failed to decode Azure DevOps JSON response")
    }

    fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let response = self
            .agent
            .post(url)
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
            .send_json(body)
            .map_err(|err| describe_error(url, err))?;

        response
            .into_json::<T>()
            .context("failed to decode Azure DevOps JSON response")
    }

    fn fetch_page(
        &self,
        ids: &[WorkItemId],
        fields: &[String],
    ) -> Result<Vec<(WorkItemId, FieldSnapshot)>> {
        let page: WorkItemsResponse = self.get_json(&self.work_items_url(ids, fields))?;
        Ok(page
            .value
            .into_iter()
            .flatten()
            .map(|row| (WorkItemId(row.id), snapshot_from_json(&row.fields)))
            .collect())
    }
}

impl WorkItemSource for AzureDevOpsClient {
    #[instrument(skip_all)]
    fn query_hierarchy(&self) -> Result<HierarchyQuery> {
        let response: WiqlResponse = self
            .post_json(&self.wiql_url(), &json!({ "query": self.query }))
            .context("WIQL hierarchy query failed")?;
        let query = hierarchy_from_wiql(response);
        debug!(
            edges = query.edges.len(),
            items = query.item_ids.len(),
            "WIQL query answered"
        );
        Ok(query)
    }

    #[instrument(skip_all, fields(ids = ids.len(), field_count = fields.len()))]
    fn fetch_fields(
        &self,
        ids: &[WorkItemId],
        fields: &[String],
    ) -> Result<BTreeMap<WorkItemId, FieldSnapshot>> {
        let pages: Vec<&[WorkItemId]> = ids.chunks(self.max_ids_per_call).collect();
        let total = pages.len();

        let results = fetch_in_waves(&pages, self.fetch_concurrency, |page| {
            self.fetch_page(page, fields)
        });

        let mut snapshots = BTreeMap::new();
        for (i, result) in results.into_iter().enumerate() {
            let rows = result.with_context(|| format!("field fetch page {} of {total}", i + 1))?;
            snapshots.extend(rows);
        }
        debug!(pages = total, fetched = snapshots.len(), "field pages joined");
        Ok(snapshots)
    }
}

impl BatchWriter for AzureDevOpsClient {
    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let body = batch_request_body(batch, &self.api_version);
        let response: BatchResponse = self.post_json(&self.batch_url(), &body)?;
        check_batch_response(batch, &response)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_item_relations: Vec<WiqlRelation>,
    #[serde(default)]
    work_items: Vec<WiqlRef>,
}

#[derive(Debug, Deserialize)]
struct WiqlRelation {
    #[serde(default)]
    rel: Option<String>,
    #[serde(default)]
    source: Option<WiqlRef>,
    #[serde(default)]
    target: Option<WiqlRef>,
}

#[derive(Debug, Deserialize)]
struct WiqlRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkItemsResponse {
    #[serde(default)]
    value: Vec<Option<WorkItemRow>>,
}

#[derive(Debug, Deserialize)]
struct WorkItemRow {
    id: u64,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    value: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    code: u16,
    #[serde(default)]
    body: Option<Value>,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{token}")))
}

fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// Run `fetch` over every page with at most `limit` pages in flight.
///
/// Results come back in page order.
fn fetch_in_waves<T: Send>(
    pages: &[&[WorkItemId]],
    limit: usize,
    fetch: impl Fn(&[WorkItemId]) -> Result<T> + Sync,
) -> Vec<Result<T>> {
    let fetch = &fetch;
    let mut results = Vec::with_capacity(pages.len());
    for wave in pages.chunks(limit.max(1)) {
        thread::scope(|scope| {
            let handles: Vec<_> = wave
                .iter()
                .map(|page| scope.spawn(move || fetch(page)))
                .collect();
            results.extend(handles.into_iter().map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("field fetch thread panicked")))
            }));
        });
    }
    results
}

fn describe_error(url: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("Azure DevOps returned HTTP {code} for {url}: {}", body.trim())
        }
        other => anyhow!("Azure DevOps request to {url} failed: {other}"),
    }
}

/// Turn WIQL link rows into edges plus first-seen item ids.
///
/// Rows without a source are query roots; they contribute ids only.
fn hierarchy_from_wiql(response: WiqlResponse) -> HierarchyQuery {
    fn push_id(ids: &mut Vec<WorkItemId>, raw: u64) {
        let id = WorkItemId(raw);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let mut query = HierarchyQuery::default();

    for relation in response.work_item_relations {
        if let Some(source) = &relation.source {
            push_id(&mut query.item_ids, source.id);
        }
        if let Some(target) = &relation.target {
            push_id(&mut query.item_ids, target.id);
        }
        if let (Some(source), Some(target), Some(rel)) =
            (relation.source, relation.target, relation.rel)
        {
            query.edges.push(HierarchyEdge {
                parent: WorkItemId(source.id),
                child: WorkItemId(target.id),
                relation: rel,
            });
        }
    }
    for item in response.work_items {
        push_id(&mut query.item_ids, item.id);
    }

    query
}

/// `$batch` request body: one PATCH sub-request per item.
fn batch_request_body(batch: &WriteBatch, api_version: &str) -> Value {
    let requests: Vec<Value> = batch
        .items
        .iter()
        .map(|item| {
            let ops: Vec<Value> = item
                .ops
                .iter()
                .map(|op| {
                    json!({
                        "op": "add",
                        "path": format!("/fields/{}", op.field),
                        "value": op.value,
                    })
                })
                .collect();
            json!({
                "method": "PATCH",
                "uri": format!("/_apis/wit/workitems/{}?api-version={api_version}", item.id),
                "headers": { "Content-Type": "application/json-patch+json" },
                "body": ops,
            })
        })
        .collect();
    Value::Array(requests)
}

/// Fail when any sub-response carries an error status.
fn check_batch_response(batch: &WriteBatch, response: &BatchResponse) -> Result<()> {
    let failures: Vec<String> = response
        .value
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.code >= 400)
        .map(|(i, entry)| {
            let item = batch
                .items
                .get(i)
                .map_or_else(|| "?".to_string(), |item| item.id.to_string());
            let detail = entry.body.as_ref().map(error_detail).unwrap_or_default();
            format!("item {item}: HTTP {}{detail}", entry.code)
        })
        .collect();

    if failures.is_empty() {
        return Ok(());
    }
    bail!(
        "{} of {} updates rejected: {}",
        failures.len(),
        batch.len(),
        failures.join("; ")
    )
}

/// Pull the `message` out of an error body, which arrives either as an
/// object or as a JSON-encoded string.
fn error_detail(body: &Value) -> String {
    let parsed;
    let body = match body {
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => return format!(" ({raw})"),
        },
        other => other,
    };
    body.get("value")
        .and_then(|v| v.get("Message"))
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(|message| format!(" ({message})"))
        .unwrap_or_default()
}
