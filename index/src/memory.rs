//! In-memory search backend.
//!
//! Evaluates query expressions directly over JSON documents with the same
//! semantics as Elasticsearch for the subset of queries the indexer uses.
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethevents_common::{
    query::{Aggregation, Aggregations, Field, Filter, SearchQuery, Sort, SortOrder},
    IndexerError,
};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{Document, Hit, SearchBackend, SearchResponse};

/// Number of hits returned when the query doesn't specify a size.
pub const DEFAULT_SEARCH_SIZE: usize = 10;

/// A write applied to the backend, with the ids of the documents it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Upsert { ids: Vec<String> },
    Update { ids: Vec<String> },
    Delete { ids: Vec<String> },
}

#[derive(Default)]
pub struct InMemoryBackend {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, Value>,
    journal: Option<Vec<Operation>>,
}

impl InMemoryBackend {
    /// Creates an empty backend that doesn't record its writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend that records every write in a journal.
    pub fn with_journal() -> Self {
        Self {
            inner: RwLock::new(Inner {
                documents: BTreeMap::new(),
                journal: Some(Vec::new()),
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every request fail with [IndexerError::BackendUnavailable].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Returns the stored document with the given id.
    pub async fn get(&self, id: &str) -> Option<Value> {
        self.inner.read().await.documents.get(id).cloned()
    }

    /// Returns all stored documents, ordered by id.
    pub async fn documents(&self) -> Vec<(String, Value)> {
        let inner = self.inner.read().await;
        inner
            .documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }

    /// Returns the writes applied so far, in order.
    ///
    /// Always empty unless the backend was created with [InMemoryBackend::with_journal].
    pub async fn journal(&self) -> Vec<Operation> {
        self.inner.read().await.journal.clone().unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), IndexerError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(IndexerError::BackendUnavailable)
                .attach_printable("in-memory backend is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn ensure_index(&self) -> Result<(), IndexerError> {
        self.check_available()
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, IndexerError> {
        self.check_available()?;

        let inner = self.inner.read().await;
        let matched = inner
            .documents
            .iter()
            .filter(|(id, doc)| matches(&query.filter, id, doc))
            .map(|(id, doc)| (id.as_str(), doc))
            .collect::<Vec<_>>();

        let aggregations = aggregate(&query.aggregations, &matched);

        let mut hits = matched
            .iter()
            .map(|(id, doc)| Hit {
                id: id.to_string(),
                source: (*doc).clone(),
                sort: sort_values(&query.sort, id, doc),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|a, b| compare_sort_values(&query.sort, &a.sort, &b.sort));

        if let Some(after) = &query.search_after {
            hits.retain(|hit| compare_sort_values(&query.sort, &hit.sort, after).is_gt());
        }

        hits.truncate(query.size.unwrap_or(DEFAULT_SEARCH_SIZE));

        debug!(hits = hits.len(), "in-memory search");

        Ok(SearchResponse { hits, aggregations })
    }

    async fn upsert(&self, documents: Vec<Document>) -> Result<u64, IndexerError> {
        self.check_available()?;

        let mut inner = self.inner.write().await;
        let ids = documents.iter().map(|doc| doc.id.clone()).collect::<Vec<_>>();
        let count = documents.len() as u64;
        for document in documents {
            inner.documents.insert(document.id, document.body);
        }
        inner.record(Operation::Upsert { ids });

        Ok(count)
    }

    async fn update_by_query(
        &self,
        filter: &Filter,
        patch: &Map<String, Value>,
    ) -> Result<u64, IndexerError> {
        self.check_available()?;

        let mut inner = self.inner.write().await;
        let mut ids = Vec::new();
        for (id, doc) in inner.documents.iter_mut() {
            if !matches(filter, id, doc) {
                continue;
            }

            if let Some(fields) = doc.as_object_mut() {
                for (key, value) in patch {
                    fields.insert(key.clone(), value.clone());
                }
            }
            ids.push(id.clone());
        }

        let count = ids.len() as u64;
        inner.record(Operation::Update { ids });

        Ok(count)
    }

    async fn delete_by_query(&self, filter: &Filter) -> Result<u64, IndexerError> {
        self.check_available()?;

        let mut inner = self.inner.write().await;
        let ids = inner
            .documents
            .iter()
            .filter(|(id, doc)| matches(filter, id, doc))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        for id in &ids {
            inner.documents.remove(id);
        }

        let count = ids.len() as u64;
        inner.record(Operation::Delete { ids });

        Ok(count)
    }
}

impl Inner {
    fn record(&mut self, operation: Operation) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(operation);
        }
    }
}

fn field_value(field: Field, id: &str, doc: &Value) -> Option<Value> {
    match field {
        Field::Id => Some(Value::String(id.to_string())),
        field => doc.get(field.as_str()).filter(|v| !v.is_null()).cloned(),
    }
}

fn matches(filter: &Filter, id: &str, doc: &Value) -> bool {
    match filter {
        Filter::MatchAll => true,
        Filter::Term { field, value } => match field_value(*field, id, doc) {
            Some(Value::Array(stored)) => stored.contains(value),
            Some(stored) => &stored == value,
            None => false,
        },
        Filter::Ids { values } => values.iter().any(|value| value == id),
        Filter::Range { field, gte, lt } => {
            let Some(stored) = field_value(*field, id, doc) else {
                return false;
            };
            let above = gte
                .as_ref()
                .map(|gte| compare_values(&stored, gte).is_ge())
                .unwrap_or(true);
            let below = lt
                .as_ref()
                .map(|lt| compare_values(&stored, lt).is_lt())
                .unwrap_or(true);
            above && below
        }
        Filter::Exists { field } => field_value(*field, id, doc).is_some(),
        Filter::Bool(inner) => {
            inner.must.iter().all(|f| matches(f, id, doc))
                && inner.filter.iter().all(|f| matches(f, id, doc))
                && !inner.must_not.iter().any(|f| matches(f, id, doc))
                && (inner.should.is_empty() || inner.should.iter().any(|f| matches(f, id, doc)))
        }
    }
}

fn sort_values(sort: &[Sort], id: &str, doc: &Value) -> Vec<Value> {
    sort.iter()
        .map(|s| field_value(s.field, id, doc).unwrap_or(Value::Null))
        .collect()
}

/// Compares two lists of sort values. Missing values sort last in both orders.
fn compare_sort_values(sort: &[Sort], a: &[Value], b: &[Value]) -> Ordering {
    for (index, s) in sort.iter().enumerate() {
        let a = a.get(index).unwrap_or(&Value::Null);
        let b = b.get(index).unwrap_or(&Value::Null);

        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match s.order {
                SortOrder::Asc => compare_values(a, b),
                SortOrder::Desc => compare_values(b, a),
            },
        };

        if ordering.is_ne() {
            return ordering;
        }
    }

    Ordering::Equal
}

fn aggregate(aggregations: &Aggregations, docs: &[(&str, &Value)]) -> Map<String, Value> {
    aggregations
        .iter()
        .map(|(name, aggregation)| (name.clone(), evaluate(aggregation, docs)))
        .collect()
}

fn evaluate(aggregation: &Aggregation, docs: &[(&str, &Value)]) -> Value {
    match aggregation {
        Aggregation::Terms {
            field,
            size,
            aggregations,
        } => terms(*field, *size, aggregations, docs),
        Aggregation::Stats { field } => stats(&numbers(*field, docs), false),
        Aggregation::ExtendedStats { field } => stats(&numbers(*field, docs), true),
        Aggregation::Histogram { field, interval } => histogram(&numbers(*field, docs), *interval),
    }
}

/// Buckets ordered by document count, then by key.
fn terms(
    field: Field,
    size: usize,
    aggregations: &Aggregations,
    docs: &[(&str, &Value)],
) -> Value {
    let mut buckets: BTreeMap<String, (Value, Vec<(&str, &Value)>)> = BTreeMap::new();

    for (id, doc) in docs {
        let values = match field_value(field, id, doc) {
            Some(Value::Array(values)) => values,
            Some(value) => vec![value],
            None => continue,
        };

        let mut seen = BTreeSet::new();
        for value in values.into_iter().filter(|value| !value.is_null()) {
            let key = value.to_string();
            if !seen.insert(key.clone()) {
                continue;
            }
            buckets
                .entry(key)
                .or_insert_with(|| (value, Vec::new()))
                .1
                .push((*id, *doc));
        }
    }

    let mut buckets = buckets.into_values().collect::<Vec<_>>();
    buckets.sort_by(|(a_key, a_docs), (b_key, b_docs)| {
        b_docs
            .len()
            .cmp(&a_docs.len())
            .then_with(|| compare_values(a_key, b_key))
    });
    buckets.truncate(size);

    let buckets = buckets
        .into_iter()
        .map(|(key, docs)| {
            let mut bucket = aggregate(aggregations, &docs);
            bucket.insert("key".to_string(), key);
            bucket.insert("doc_count".to_string(), json!(docs.len()));
            Value::Object(bucket)
        })
        .collect::<Vec<_>>();

    json!({ "buckets": buckets })
}

/// Numeric values of the field. Decimal strings are parsed, other values are skipped.
fn numbers(field: Field, docs: &[(&str, &Value)]) -> Vec<f64> {
    docs.iter()
        .filter_map(|(id, doc)| match field_value(field, id, doc)? {
            Value::Number(number) => number.as_f64(),
            Value::String(value) => value.parse::<f64>().ok(),
            _ => None,
        })
        .collect()
}

fn stats(values: &[f64], extended: bool) -> Value {
    let count = values.len();
    let sum = values.iter().sum::<f64>();

    let mut body = Map::new();
    body.insert("count".to_string(), json!(count));
    body.insert("sum".to_string(), json!(sum));

    if count == 0 {
        for name in ["min", "max", "avg"] {
            body.insert(name.to_string(), Value::Null);
        }
        if extended {
            body.insert("sum_of_squares".to_string(), Value::Null);
            body.insert("variance".to_string(), Value::Null);
            body.insert("std_deviation".to_string(), Value::Null);
        }
        return Value::Object(body);
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = sum / count as f64;
    body.insert("min".to_string(), json!(min));
    body.insert("max".to_string(), json!(max));
    body.insert("avg".to_string(), json!(avg));

    if extended {
        let sum_of_squares = values.iter().map(|value| value * value).sum::<f64>();
        let variance = (sum_of_squares / count as f64 - avg * avg).max(0.0);
        body.insert("sum_of_squares".to_string(), json!(sum_of_squares));
        body.insert("variance".to_string(), json!(variance));
        body.insert("std_deviation".to_string(), json!(variance.sqrt()));
    }

    Value::Object(body)
}

/// Non empty buckets in ascending key order.
fn histogram(values: &[f64], interval: u64) -> Value {
    let interval = interval.max(1) as f64;
    let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
    for value in values {
        *counts.entry((value / interval).floor() as i64).or_default() += 1;
    }

    let buckets = counts
        .into_iter()
        .map(|(index, count)| {
            let key = index as f64 * interval;
            json!({ "key": key, "doc_count": count })
        })
        .collect::<Vec<_>>();

    json!({ "buckets": buckets })
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_u64(), b.as_u64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(0.0);
                let b = b.as_f64().unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ethevents_common::{
        query::{Aggregation, BoolFilter, Field, Filter, SearchQuery, Sort},
        IndexerError,
    };
    use serde_json::{json, Map};

    use super::{InMemoryBackend, Operation};
    use crate::backend::{Document, SearchBackend};

    fn doc(id: &str, body: serde_json::Value) -> Document {
        Document {
            id: id.to_string(),
            body,
        }
    }

    async fn new_backend() -> InMemoryBackend {
        let backend = InMemoryBackend::with_journal();
        backend
            .upsert(vec![
                doc("a", json!({ "type": "block", "height": 1, "canonical": true })),
                doc("b", json!({ "type": "block", "height": 3, "canonical": true })),
                doc("c", json!({ "type": "block", "height": 2, "canonical": false })),
                doc("d", json!({ "type": "tx", "from": "0x1" })),
            ])
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_should_requires_one_match() {
        let backend = new_backend().await;
        let filter = BoolFilter::new()
            .should(Filter::ids(["a"]))
            .should(Filter::term(Field::From, "0x1"));

        let response = backend.search(&SearchQuery::new(filter)).await.unwrap();
        let ids = response.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_update_by_query_patches_fields() {
        let backend = new_backend().await;
        let query = SearchQuery::new(Filter::term(Field::Canonical, false));
        assert_eq!(backend.search(&query).await.unwrap().hits.len(), 1);

        let mut patch = Map::new();
        patch.insert("canonical".to_string(), json!(false));
        let updated = backend
            .update_by_query(&Filter::term(Field::Type, "block"), &patch)
            .await
            .unwrap();
        assert_eq!(updated, 3);

        assert_eq!(backend.search(&query).await.unwrap().hits.len(), 3);
        assert_eq!(backend.get("a").await.unwrap()["height"], json!(1));
    }

    #[tokio::test]
    async fn test_sort_missing_last_and_search_after() {
        let backend = new_backend().await;
        let query = SearchQuery::new(Filter::MatchAll).sort_by(Sort::desc(Field::Height));

        let response = backend.search(&query).await.unwrap();
        let ids = response.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c", "a", "d"]);

        let after = response.hits[1].sort.clone();
        let response = backend.search(&query.after(after)).await.unwrap();
        let ids = response.hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_range_and_size() {
        let backend = new_backend().await;
        let query = SearchQuery::new(Filter::range(Field::Height, Some(json!(2)), None))
            .sort_by(Sort::asc(Field::Height))
            .with_size(1)
            .unwrap();

        let response = backend.search(&query).await.unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_delete_by_query_is_journaled() {
        let backend = new_backend().await;
        let deleted = backend
            .delete_by_query(&Filter::term(Field::Canonical, false))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(backend.get("c").await.is_none());

        let journal = backend.journal().await;
        assert_matches!(journal.last(), Some(Operation::Delete { ids }) if ids == &["c".to_string()]);
    }

    async fn new_log_backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend
            .upsert(vec![
                doc("l1", json!({ "type": "log", "address": "0xc1", "topics": ["0xaa", "0x01"] })),
                doc("l2", json!({ "type": "log", "address": "0xc1", "topics": ["0xaa", "0x01"] })),
                doc("l3", json!({ "type": "log", "address": "0xc2", "topics": ["0xaa"] })),
                doc("l4", json!({ "type": "log", "address": "0xc2", "topics": ["0xbb", "0xbb"] })),
                doc("t1", json!({ "type": "tx", "gasPrice": "1000" })),
                doc("t2", json!({ "type": "tx", "gasPrice": "3000" })),
                doc("t3", json!({ "type": "tx", "gasPrice": "3500" })),
                doc("t4", json!({ "type": "tx" })),
            ])
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_terms_aggregation() {
        let backend = new_log_backend().await;
        let query = SearchQuery::new(Filter::term(Field::Type, "log"))
            .aggregate(
                "topic",
                Aggregation::terms(Field::Topics, 2)
                    .nest("contract", Aggregation::terms(Field::Address, 1)),
            )
            .without_hits();

        let response = backend.search(&query).await.unwrap();
        assert!(response.hits.is_empty());

        let buckets = &response.aggregations["topic"]["buckets"];
        assert_eq!(
            buckets,
            &json!([
                {
                    "key": "0xaa",
                    "doc_count": 3,
                    "contract": { "buckets": [{ "key": "0xc1", "doc_count": 2 }] },
                },
                {
                    "key": "0x01",
                    "doc_count": 2,
                    "contract": { "buckets": [{ "key": "0xc1", "doc_count": 2 }] },
                },
            ])
        );
    }

    #[tokio::test]
    async fn test_term_filter_matches_array_element() {
        let backend = new_log_backend().await;
        let query = SearchQuery::new(Filter::term(Field::Topics, "0xbb"));
        let response = backend.search(&query).await.unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id, "l4");
    }

    #[tokio::test]
    async fn test_numeric_aggregations_parse_decimal_strings() {
        let backend = new_log_backend().await;
        let query = SearchQuery::new(Filter::term(Field::Type, "tx"))
            .aggregate(
                "stats",
                Aggregation::ExtendedStats {
                    field: Field::GasPrice,
                },
            )
            .aggregate(
                "histogram",
                Aggregation::Histogram {
                    field: Field::GasPrice,
                    interval: 1000,
                },
            );

        let response = backend.search(&query).await.unwrap();
        assert_eq!(response.hits.len(), 4);

        let stats = &response.aggregations["stats"];
        assert_eq!(stats["count"], json!(3));
        assert_eq!(stats["min"], json!(1000.0));
        assert_eq!(stats["max"], json!(3500.0));
        assert_eq!(stats["sum"], json!(7500.0));
        assert_eq!(stats["avg"], json!(2500.0));
        assert!(stats["std_deviation"].as_f64().unwrap() > 0.0);

        assert_eq!(
            response.aggregations["histogram"]["buckets"],
            json!([
                { "key": 1000.0, "doc_count": 1 },
                { "key": 3000.0, "doc_count": 2 },
            ])
        );
    }

    #[tokio::test]
    async fn test_stats_without_values() {
        let backend = new_log_backend().await;
        let query = SearchQuery::new(Filter::term(Field::Type, "log")).aggregate(
            "stats",
            Aggregation::Stats {
                field: Field::GasPrice,
            },
        );

        let response = backend.search(&query).await.unwrap();
        let stats = &response.aggregations["stats"];
        assert_eq!(stats["count"], json!(0));
        assert!(stats["min"].is_null());
        assert!(stats["avg"].is_null());
    }

    #[tokio::test]
    async fn test_journal_is_off_by_default() {
        let backend = InMemoryBackend::new();
        backend
            .upsert(vec![doc("a", json!({ "type": "block", "height": 1 }))])
            .await
            .unwrap();
        backend
            .delete_by_query(&Filter::ids(["a"]))
            .await
            .unwrap();

        assert!(backend.journal().await.is_empty());
        assert!(backend.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = new_backend().await;
        backend.set_unavailable(true);

        let err = backend
            .search(&SearchQuery::new(Filter::MatchAll))
            .await
            .unwrap_err();
        assert_matches!(err.current_context(), IndexerError::BackendUnavailable);

        backend.set_unavailable(false);
        assert!(backend.search(&SearchQuery::new(Filter::MatchAll)).await.is_ok());
    }
}
