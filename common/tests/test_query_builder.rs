use assert_matches::assert_matches;
use serde_json::json;

use ethevents_common::{
    query::{self, Field, Filter, SortOrder},
    schema::EntityKind,
    IndexerError,
};

#[test]
fn test_by_hash_or_address_expression() {
    let query = query::by_hash_or_address("0xABC").unwrap();

    assert_eq!(
        query.to_json(),
        json!({
            "query": {
                "bool": {
                    "filter": [{ "term": { "canonical": true } }],
                    "should": [
                        { "ids": { "values": ["0xABC"] } },
                        { "term": { "from": "0xABC" } },
                        { "term": { "to": "0xABC" } },
                    ],
                    "minimum_should_match": 1,
                }
            },
            "sort": [
                { "timestamp": { "order": "desc" } },
                { "height": { "order": "desc" } },
                { "blockHeight": { "order": "desc" } },
                { "transactionIndex": { "order": "desc" } },
                { "logIndex": { "order": "desc" } },
            ],
        })
    );
}

#[test]
fn test_by_hash_or_address_accepts_any_value() {
    assert!(query::by_hash_or_address("not-a-hash").is_ok());

    let err = query::by_hash_or_address("").unwrap_err();
    assert_matches!(err.current_context(), IndexerError::InvalidQueryArgument);

    // Whitespace is an opaque value like any other.
    let query = query::by_hash_or_address("   ").unwrap();
    assert_eq!(
        query.to_json()["query"]["bool"]["should"][1],
        json!({ "term": { "from": "   " } })
    );
}

#[test]
fn test_transactions_by_block_hash_expression() {
    let query = query::transactions_by_block_hash("0xb1").unwrap();
    let body = query.to_json();

    assert_eq!(
        body["query"],
        json!({
            "bool": {
                "filter": [
                    { "term": { "type": "tx" } },
                    { "term": { "blockHash": "0xb1" } },
                ]
            }
        })
    );
    assert_eq!(body["sort"], json!([{ "transactionIndex": { "order": "asc" } }]));
}

#[test]
fn test_latest_block_expression() {
    let query = query::latest_block();

    assert_eq!(query.size, Some(1));
    assert_eq!(query.sort.len(), 2);
    assert_eq!(query.sort[0].field, Field::Height);
    assert_eq!(query.sort[0].order, SortOrder::Desc);
    assert_eq!(query.sort[1].field, Field::Timestamp);
    assert_eq!(query.sort[1].order, SortOrder::Desc);

    assert_eq!(
        query.to_json()["query"],
        json!({
            "bool": {
                "filter": [
                    { "term": { "type": "block" } },
                    { "term": { "canonical": true } },
                ]
            }
        })
    );
}

#[test]
fn test_builders_are_deterministic() {
    assert_eq!(
        query::by_hash_or_address("0x1").unwrap(),
        query::by_hash_or_address("0x1").unwrap()
    );
    assert_eq!(query::latest_block(), query::latest_block());
    assert_eq!(
        query::logs_with_signature("0xddf2").unwrap().to_json(),
        query::logs_with_signature("0xddf2").unwrap().to_json()
    );
}

#[test]
fn test_transactions_from_or_to_requires_one_match() {
    let query = query::transactions_from_or_to("0xabc").unwrap();
    assert_eq!(
        query.to_json()["query"]["bool"]["minimum_should_match"],
        json!(1)
    );

    let Filter::Bool(filter) = query.filter else {
        panic!("expected bool filter");
    };
    assert_eq!(filter.should.len(), 2);
    assert_eq!(filter.filter.len(), 2);
}

#[test]
fn test_canonical_blocks_since_expression() {
    let body = query::canonical_blocks_since(42).to_json();

    assert_eq!(
        body["query"]["bool"]["filter"][2],
        json!({ "range": { "height": { "gte": 42 } } })
    );
    assert_eq!(body["sort"], json!([{ "height": { "order": "asc" } }]));
}

#[test]
fn test_by_id_ignores_canonical_flag() {
    let query = query::by_id(&["0xt1", "0xt2"]).unwrap();
    assert_eq!(
        query.to_json(),
        json!({
            "query": { "ids": { "values": ["0xt1", "0xt2"] } },
            "size": 2,
        })
    );

    let empty: [&str; 0] = [];
    let err = query::by_id(&empty).unwrap_err();
    assert_matches!(err.current_context(), IndexerError::InvalidQueryArgument);
}

#[test]
fn test_in_time_range() {
    let body = query::in_time_range(EntityKind::Log, 10, 20)
        .unwrap()
        .to_json();
    assert_eq!(
        body["query"]["bool"]["filter"][2],
        json!({ "range": { "timestamp": { "gte": 10, "lt": 20 } } })
    );

    assert_eq!(
        body["sort"],
        json!([
            { "timestamp": { "order": "desc" } },
            { "blockHeight": { "order": "desc" } },
            { "logIndex": { "order": "desc" } },
        ])
    );

    let body = query::in_time_range(EntityKind::Block, 10, 20)
        .unwrap()
        .to_json();
    assert_eq!(
        body["sort"],
        json!([
            { "timestamp": { "order": "desc" } },
            { "height": { "order": "desc" } },
        ])
    );

    let err = query::in_time_range(EntityKind::Log, 20, 10).unwrap_err();
    assert_matches!(err.current_context(), IndexerError::InvalidQueryArgument);
}

#[test]
fn test_paging() {
    let query = query::transactions_to("0xabc")
        .unwrap()
        .with_size(25)
        .unwrap()
        .after(vec![json!(100), json!(3)]);

    let body = query.to_json();
    assert_eq!(body["size"], json!(25));
    assert_eq!(body["search_after"], json!([100, 3]));
}

#[test]
fn test_gas_prices_expression() {
    let body = query::gas_prices(100, 200, 1_000_000_000).unwrap().to_json();

    assert_eq!(body["size"], json!(0));
    assert_eq!(
        body["query"]["bool"]["filter"][2],
        json!({ "range": { "timestamp": { "gte": 100, "lt": 200 } } })
    );
    assert_eq!(
        body["aggs"],
        json!({
            "gasPriceHistogram": {
                "histogram": {
                    "field": "gasPrice.num",
                    "interval": 1_000_000_000u64,
                    "min_doc_count": 1,
                }
            },
            "gasPriceStats": { "extended_stats": { "field": "gasPrice.num" } },
        })
    );

    let err = query::gas_prices(100, 200, 0).unwrap_err();
    assert_matches!(err.current_context(), IndexerError::InvalidQueryArgument);
}

#[test]
fn test_common_event_topics_expression() {
    let body = query::common_event_topics(5, 3, false).unwrap().to_json();
    assert_eq!(body["size"], json!(0));
    assert_eq!(
        body["aggs"]["topic"],
        json!({
            "terms": { "field": "topics", "size": 5 },
            "aggs": { "contract": { "terms": { "field": "address", "size": 3 } } },
        })
    );

    let body = query::common_event_topics(5, 3, true).unwrap().to_json();
    assert_eq!(body["aggs"]["topic"]["terms"]["field"], json!("signature"));

    let err = query::common_event_topics(0, 3, true).unwrap_err();
    assert_matches!(err.current_context(), IndexerError::InvalidQueryArgument);
}

#[test]
fn test_callers_of_transactions_expression() {
    let body = query::callers_of_transactions(&["0xt1", "0xt2"], 10)
        .unwrap()
        .to_json();

    assert_eq!(
        body["query"]["bool"]["filter"][2],
        json!({ "ids": { "values": ["0xt1", "0xt2"] } })
    );
    assert_eq!(
        body["aggs"]["caller"],
        json!({
            "terms": { "field": "from", "size": 10 },
            "aggs": { "gasPriceStats": { "stats": { "field": "gasPrice.num" } } },
        })
    );

    let none: [&str; 0] = [];
    assert!(query::callers_of_transactions(&none, 10).is_ok());
}

#[test]
fn test_blocks_by_hash_expression() {
    let query = query::blocks_by_hash(&["0xb2", "0xb1"]).unwrap();

    assert_eq!(query.size, Some(2));
    assert_eq!(query.sort[0].field, Field::Height);
    assert_eq!(query.sort[0].order, SortOrder::Desc);
    assert_eq!(
        query.to_json()["query"]["bool"]["filter"],
        json!([
            { "term": { "type": "block" } },
            { "term": { "canonical": true } },
            { "ids": { "values": ["0xb2", "0xb1"] } },
        ])
    );
}
