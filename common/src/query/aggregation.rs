//! Aggregations computed over the documents matching a query.
use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::field::Field;

/// Named aggregations, rendered in name order.
pub type Aggregations = BTreeMap<String, Aggregation>;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// The `size` most frequent values of a field, with nested aggregations per bucket.
    ///
    /// Array fields contribute one value per element.
    Terms {
        field: Field,
        size: usize,
        aggregations: Aggregations,
    },
    /// Count, min, max, average and sum of a numeric field.
    Stats { field: Field },
    /// [Aggregation::Stats] plus sum of squares, variance and standard deviation.
    ExtendedStats { field: Field },
    /// Number of documents per `interval` wide bucket of a numeric field.
    ///
    /// Empty buckets are omitted.
    Histogram { field: Field, interval: u64 },
}

impl Aggregation {
    pub fn terms(field: Field, size: usize) -> Self {
        Aggregation::Terms {
            field,
            size,
            aggregations: Aggregations::new(),
        }
    }

    /// Adds a nested aggregation. Only terms buckets can nest, other aggregations are returned as is.
    pub fn nest(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        if let Aggregation::Terms { aggregations, .. } = &mut self {
            aggregations.insert(name.into(), aggregation);
        }
        self
    }

    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms {
                field,
                size,
                aggregations,
            } => {
                let mut body = Map::new();
                body.insert(
                    "terms".to_string(),
                    json!({ "field": field.as_str(), "size": size }),
                );
                if !aggregations.is_empty() {
                    body.insert("aggs".to_string(), aggregations_to_json(aggregations));
                }
                Value::Object(body)
            }
            Aggregation::Stats { field } => {
                json!({ "stats": { "field": field.numeric_name() } })
            }
            Aggregation::ExtendedStats { field } => {
                json!({ "extended_stats": { "field": field.numeric_name() } })
            }
            Aggregation::Histogram { field, interval } => json!({
                "histogram": {
                    "field": field.numeric_name(),
                    "interval": interval,
                    "min_doc_count": 1,
                }
            }),
        }
    }
}

pub fn aggregations_to_json(aggregations: &Aggregations) -> Value {
    let body = aggregations
        .iter()
        .map(|(name, aggregation)| (name.clone(), aggregation.to_json()))
        .collect::<Map<_, _>>();
    Value::Object(body)
}
