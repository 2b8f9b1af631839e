//! Backend query expressions.
use error_stack::{Result, ResultExt};
use serde_json::{json, Map, Value};

use crate::error::IndexerError;

use super::{
    aggregation::{aggregations_to_json, Aggregation, Aggregations},
    field::Field,
};

/// Largest page a single query can request.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// A filter over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MatchAll,
    /// Exact match on a field.
    Term { field: Field, value: Value },
    /// Match on the document id.
    Ids { values: Vec<String> },
    /// Half-open range `[gte, lt)`. Either bound can be missing.
    Range {
        field: Field,
        gte: Option<Value>,
        lt: Option<Value>,
    },
    /// The field is present and not null.
    Exists { field: Field },
    Bool(BoolFilter),
}

/// Boolean composition of filters.
///
/// When `should` is not empty, at least one of its clauses must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolFilter {
    pub must: Vec<Filter>,
    pub filter: Vec<Filter>,
    pub should: Vec<Filter>,
    pub must_not: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: Field,
    pub order: SortOrder,
}

/// A complete search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub filter: Filter,
    pub sort: Vec<Sort>,
    /// Number of hits to return. The backend default applies when missing.
    pub size: Option<usize>,
    /// Sort values of the last hit of the previous page.
    pub search_after: Option<Vec<Value>>,
    /// Computed over every matching document, not only the returned page.
    pub aggregations: Aggregations,
}

impl Filter {
    pub fn term(field: Field, value: impl Into<Value>) -> Self {
        Filter::Term {
            field,
            value: value.into(),
        }
    }

    pub fn ids<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Filter::Ids {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: Field, gte: Option<Value>, lt: Option<Value>) -> Self {
        Filter::Range { field, gte, lt }
    }

    pub fn exists(field: Field) -> Self {
        Filter::Exists { field }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::MatchAll => json!({ "match_all": {} }),
            Filter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Filter::Ids { values } => json!({ "ids": { "values": values } }),
            Filter::Range { field, gte, lt } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), gte.clone());
                }
                if let Some(lt) = lt {
                    bounds.insert("lt".to_string(), lt.clone());
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Filter::Exists { field } => json!({ "exists": { "field": field.as_str() } }),
            Filter::Bool(inner) => inner.to_json(),
        }
    }
}

impl BoolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, filter: Filter) -> Self {
        self.must.push(filter);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.push(filter);
        self
    }

    pub fn should(mut self, filter: Filter) -> Self {
        self.should.push(filter);
        self
    }

    pub fn must_not(mut self, filter: Filter) -> Self {
        self.must_not.push(filter);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        for (name, clauses) in [
            ("must", &self.must),
            ("filter", &self.filter),
            ("should", &self.should),
            ("must_not", &self.must_not),
        ] {
            if !clauses.is_empty() {
                let clauses = clauses.iter().map(Filter::to_json).collect::<Vec<_>>();
                body.insert(name.to_string(), Value::Array(clauses));
            }
        }

        if !self.should.is_empty() {
            body.insert("minimum_should_match".to_string(), json!(1));
        }

        json!({ "bool": body })
    }
}

impl From<BoolFilter> for Filter {
    fn from(value: BoolFilter) -> Self {
        Filter::Bool(value)
    }
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl Sort {
    pub fn asc(field: Field) -> Self {
        Sort {
            field,
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: Field) -> Self {
        Sort {
            field,
            order: SortOrder::Desc,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ self.field.as_str(): { "order": self.order.as_str() } })
    }
}

impl SearchQuery {
    pub fn new(filter: impl Into<Filter>) -> Self {
        SearchQuery {
            filter: filter.into(),
            sort: Vec::new(),
            size: None,
            search_after: None,
            aggregations: Aggregations::new(),
        }
    }

    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    /// Limits the number of hits.
    ///
    /// Returns [IndexerError::InvalidQueryArgument] if the size is zero or above [MAX_PAGE_SIZE].
    pub fn with_size(mut self, size: usize) -> Result<Self, IndexerError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(IndexerError::InvalidQueryArgument)
                .attach_printable("page size must be between 1 and 10000")
                .attach_printable_lazy(|| format!("size: {size}"));
        }
        self.size = Some(size);
        Ok(self)
    }

    pub fn aggregate(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregations.insert(name.into(), aggregation);
        self
    }

    /// Only return aggregations.
    pub fn without_hits(mut self) -> Self {
        self.size = Some(0);
        self
    }

    /// Continue after the hit with the given sort values.
    pub fn after(mut self, sort_values: Vec<Value>) -> Self {
        self.search_after = Some(sort_values);
        self
    }

    /// Returns the query as a backend-ready request body.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.filter.to_json());

        if !self.sort.is_empty() {
            let sort = self.sort.iter().map(Sort::to_json).collect::<Vec<_>>();
            body.insert("sort".to_string(), Value::Array(sort));
        }

        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }

        if let Some(search_after) = &self.search_after {
            body.insert("search_after".to_string(), Value::Array(search_after.clone()));
        }

        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_to_json(&self.aggregations));
        }

        Value::Object(body)
    }
}
