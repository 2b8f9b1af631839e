//! Elasticsearch search backend.
use std::time::Duration;

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{Field, Filter, SearchQuery},
    IndexerError,
};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::backend::{Document, Hit, SearchBackend, SearchResponse};

pub const DEFAULT_INDEX_NAME: &str = "ethereum";

const PATCH_SCRIPT: &str =
    "for (entry in params.patch.entrySet()) { ctx._source[entry.getKey()] = entry.getValue(); }";

/// When written documents become visible to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Don't wait for a refresh.
    None,
    /// Wait for the next scheduled refresh.
    #[default]
    WaitFor,
    /// Force a refresh after every write.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchOptions {
    /// Base url of the cluster.
    pub url: Url,
    /// Name of the index storing all entities.
    pub index: String,
    /// Request timeout.
    pub timeout: Duration,
    pub refresh: RefreshPolicy,
}

#[derive(Clone)]
pub struct ElasticsearchBackend {
    client: Client,
    options: ElasticsearchOptions,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    hits: HitsBody,
    #[serde(default)]
    aggregations: Map<String, Value>,
}

#[derive(Deserialize)]
struct HitsBody {
    hits: Vec<HitBody>,
}

#[derive(Deserialize)]
struct HitBody {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Value,
    #[serde(default)]
    sort: Vec<Value>,
}

#[derive(Deserialize)]
struct BulkResponseBody {
    errors: bool,
    items: Vec<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ByQueryResponseBody {
    #[serde(default)]
    updated: u64,
    #[serde(default)]
    deleted: u64,
    #[serde(default)]
    version_conflicts: u64,
    #[serde(default)]
    failures: Vec<Value>,
}

impl ElasticsearchBackend {
    pub fn new(mut options: ElasticsearchOptions) -> Result<Self, IndexerError> {
        if options.index.is_empty() {
            return Err(IndexerError::Configuration).attach_printable("index name is empty");
        }

        // Url::join replaces the last segment unless the path ends with a slash.
        if !options.url.path().ends_with('/') {
            let path = format!("{}/", options.url.path());
            options.url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to build http client")?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &ElasticsearchOptions {
        &self.options
    }

    fn endpoint(&self, path: &str) -> Result<Url, IndexerError> {
        self.options
            .url
            .join(path)
            .change_context(IndexerError::Configuration)
            .attach_printable("failed to build elasticsearch url")
            .attach_printable_lazy(|| format!("path: {path}"))
    }

    fn index_endpoint(&self, action: &str) -> Result<Url, IndexerError> {
        let path = if action.is_empty() {
            self.options.index.clone()
        } else {
            format!("{}/{}", self.options.index, action)
        };
        self.endpoint(&path)
    }

    /// Makes pending bulk writes searchable.
    ///
    /// The by-query endpoints only see searchable documents, so without a refresh
    /// they miss documents written with [RefreshPolicy::None].
    async fn refresh_before_by_query(&self) -> Result<(), IndexerError> {
        if self.options.refresh != RefreshPolicy::None {
            return Ok(());
        }

        let url = self.index_endpoint("_refresh")?;
        self.send(self.client.post(url))
            .await
            .attach_printable("failed to refresh index")?;

        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, IndexerError> {
        let Ok(response) = tokio::time::timeout(self.options.timeout, request.send()).await else {
            return Err(IndexerError::BackendUnavailable)
                .attach_printable("elasticsearch request timed out");
        };

        let response = response
            .change_context(IndexerError::BackendUnavailable)
            .attach_printable("failed to send elasticsearch request")?;

        read_response(response).await
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    #[instrument(skip_all, err(Debug))]
    async fn ensure_index(&self) -> Result<(), IndexerError> {
        let url = self.index_endpoint("")?;
        let request = self.client.put(url).json(&index_mappings());

        match self.send(request).await {
            Ok(_) => {
                info!(index = %self.options.index, "created index");
                Ok(())
            }
            Err(err) if is_already_exists(&err) => {
                debug!(index = %self.options.index, "index already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, err(Debug))]
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, IndexerError> {
        let url = self.index_endpoint("_search")?;
        let body = self.send(self.client.post(url).json(&query.to_json())).await?;

        let body: SearchResponseBody = serde_json::from_value(body)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("unexpected search response")?;

        let hits = body
            .hits
            .hits
            .into_iter()
            .map(|hit| Hit {
                id: hit.id,
                source: hit.source,
                sort: hit.sort,
            })
            .collect();

        Ok(SearchResponse {
            hits,
            aggregations: body.aggregations,
        })
    }

    #[instrument(skip_all, fields(documents = documents.len()), err(Debug))]
    async fn upsert(&self, documents: Vec<Document>) -> Result<u64, IndexerError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut url = self.endpoint("_bulk")?;
        url.query_pairs_mut()
            .append_pair("refresh", self.options.refresh.as_str());

        let mut body = String::new();
        for document in &documents {
            let action = json!({ "index": { "_index": self.options.index, "_id": document.id } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&document.body.to_string());
            body.push('\n');
        }

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = self.send(request).await?;

        let response: BulkResponseBody = serde_json::from_value(response)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("unexpected bulk response")?;

        if response.errors {
            return Err(bulk_error(&response.items));
        }

        Ok(response.items.len() as u64)
    }

    #[instrument(skip_all, err(Debug))]
    async fn update_by_query(
        &self,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, IndexerError> {
        self.refresh_before_by_query().await?;

        let mut url = self.index_endpoint("_update_by_query")?;
        url.query_pairs_mut()
            .append_pair("conflicts", "proceed")
            .append_pair("refresh", self.options.refresh.by_query_str());

        let body = json!({
            "query": filter.to_json(),
            "script": {
                "source": PATCH_SCRIPT,
                "lang": "painless",
                "params": { "patch": patch },
            },
        });

        let response = self.send(self.client.post(url).json(&body)).await?;
        let response: ByQueryResponseBody = serde_json::from_value(response)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("unexpected update by query response")?;
        response.check_complete("update by query")?;

        Ok(response.updated)
    }

    #[instrument(skip_all, err(Debug))]
    async fn delete_by_query(&self, filter: &Filter) -> Result<u64, IndexerError> {
        self.refresh_before_by_query().await?;

        let mut url = self.index_endpoint("_delete_by_query")?;
        url.query_pairs_mut()
            .append_pair("conflicts", "proceed")
            .append_pair("refresh", self.options.refresh.by_query_str());

        let body = json!({ "query": filter.to_json() });

        let response = self.send(self.client.post(url).json(&body)).await?;
        let response: ByQueryResponseBody = serde_json::from_value(response)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("unexpected delete by query response")?;
        response.check_complete("delete by query")?;

        Ok(response.deleted)
    }
}

impl ByQueryResponseBody {
    /// By-query requests run with `conflicts=proceed` and report what they skipped
    /// in the response body. A partial run is retried as a whole.
    fn check_complete(&self, what: &str) -> Result<(), IndexerError> {
        if self.failures.is_empty() && self.version_conflicts == 0 {
            return Ok(());
        }

        warn!(
            failures = self.failures.len(),
            version_conflicts = self.version_conflicts,
            "{what} did not complete"
        );

        let mut report = error_stack::report!(IndexerError::BackendUnavailable)
            .attach_printable(format!("{what} did not complete"))
            .attach_printable(format!("failures: {}", self.failures.len()))
            .attach_printable(format!("version conflicts: {}", self.version_conflicts));
        if let Some(first) = self.failures.first() {
            report = report.attach_printable(format!("first failure: {first}"));
        }
        Err(report)
    }
}

impl RefreshPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshPolicy::None => "false",
            RefreshPolicy::WaitFor => "wait_for",
            RefreshPolicy::Immediate => "true",
        }
    }

    /// The by-query endpoints only accept a boolean refresh.
    fn by_query_str(&self) -> &'static str {
        match self {
            RefreshPolicy::None => "false",
            RefreshPolicy::WaitFor | RefreshPolicy::Immediate => "true",
        }
    }
}

impl std::str::FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "false" | "none" => Ok(RefreshPolicy::None),
            "wait_for" | "wait-for" => Ok(RefreshPolicy::WaitFor),
            "true" | "immediate" => Ok(RefreshPolicy::Immediate),
            other => Err(format!("unknown refresh policy: {other}")),
        }
    }
}

impl ElasticsearchOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            index: DEFAULT_INDEX_NAME.to_string(),
            timeout: Duration::from_secs(20),
            refresh: RefreshPolicy::default(),
        }
    }
}

/// Mappings for every field the indexer filters or sorts on.
pub fn index_mappings() -> Value {
    let mut properties = Map::new();
    for field in Field::keywords() {
        properties.insert(field.as_str().to_string(), json!({ "type": "keyword" }));
    }
    for field in Field::numbers() {
        properties.insert(field.as_str().to_string(), json!({ "type": "long" }));
    }
    for field in Field::decimals() {
        properties.insert(
            field.as_str().to_string(),
            json!({ "type": "keyword", "fields": { "num": { "type": "double" } } }),
        );
    }
    properties.insert(
        Field::Canonical.as_str().to_string(),
        json!({ "type": "boolean" }),
    );

    json!({ "mappings": { "properties": properties } })
}

async fn read_response(response: Response) -> Result<Value, IndexerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .change_context(IndexerError::BackendUnavailable)
        .attach_printable("failed to read elasticsearch response")?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .change_context(IndexerError::SchemaConflict)
            .attach_printable("elasticsearch response is not json");
    }

    let error_type = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|body| body["error"]["type"].as_str().map(str::to_string))
        .unwrap_or_default();

    warn!(status = %status, error_type = %error_type, "elasticsearch request failed");

    let kind = error_for_status(status);
    Err(kind)
        .attach_printable_lazy(|| format!("status: {status}"))
        .attach_printable(ErrorType(error_type))
        .attach_printable_lazy(|| format!("body: {body}"))
}

fn error_for_status(status: StatusCode) -> IndexerError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        IndexerError::BackendUnavailable
    } else {
        IndexerError::SchemaConflict
    }
}

/// Elasticsearch error type, used to recognize tolerated errors.
#[derive(Debug, Clone)]
struct ErrorType(String);

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error type: {}", self.0)
    }
}

fn is_already_exists(err: &error_stack::Report<IndexerError>) -> bool {
    err.downcast_ref::<ErrorType>()
        .map(|error_type| error_type.0 == "resource_already_exists_exception")
        .unwrap_or(false)
}

fn bulk_error(items: &[Map<String, Value>]) -> error_stack::Report<IndexerError> {
    let failed = items
        .iter()
        .filter_map(|item| item.values().next())
        .filter(|item| item.get("error").is_some())
        .collect::<Vec<_>>();

    let retryable = failed.iter().any(|item| {
        item["status"]
            .as_u64()
            .and_then(|status| StatusCode::from_u16(status as u16).ok())
            .map(|status| error_for_status(status) == IndexerError::BackendUnavailable)
            .unwrap_or(false)
    });

    let kind = if retryable {
        IndexerError::BackendUnavailable
    } else {
        IndexerError::SchemaConflict
    };

    let mut report = error_stack::report!(kind)
        .attach_printable(format!("bulk request failed for {} documents", failed.len()));
    if let Some(first) = failed.first() {
        report = report.attach_printable(format!("first error: {}", first["error"]));
    }
    report
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{error_for_status, index_mappings, RefreshPolicy};
    use ethevents_common::IndexerError;

    #[test]
    fn test_error_for_status() {
        assert_eq!(
            error_for_status(StatusCode::SERVICE_UNAVAILABLE),
            IndexerError::BackendUnavailable
        );
        assert_eq!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS),
            IndexerError::BackendUnavailable
        );
        assert_eq!(
            error_for_status(StatusCode::BAD_REQUEST),
            IndexerError::SchemaConflict
        );
    }

    #[test]
    fn test_mappings_use_keywords_for_identifiers() {
        let mappings = index_mappings();
        let properties = &mappings["mappings"]["properties"];
        assert_eq!(properties["from"]["type"], "keyword");
        assert_eq!(properties["blockHash"]["type"], "keyword");
        assert_eq!(properties["height"]["type"], "long");
        assert_eq!(properties["canonical"]["type"], "boolean");
        assert_eq!(properties["topics"]["type"], "keyword");
        assert_eq!(properties["gasPrice"]["fields"]["num"]["type"], "double");
    }

    #[test]
    fn test_refresh_policy() {
        assert_eq!("wait_for".parse::<RefreshPolicy>().unwrap(), RefreshPolicy::WaitFor);
        assert_eq!(RefreshPolicy::WaitFor.by_query_str(), "true");
        assert_eq!(RefreshPolicy::None.as_str(), "false");
        assert!("sometimes".parse::<RefreshPolicy>().is_err());
    }
}
