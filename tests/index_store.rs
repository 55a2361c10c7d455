//! Index Store

use std::collections::HashMap;

use dwn_core::store::index::{self, Filter, FilterVal, IndexValue, QueryOptions};
use dwn_core::store::{Cursor, CursorValue};
use dwn_core::{Lower, Range, Upper};
use serde_json::json;
use test_node::ProviderImpl;
use test_node::key_store::ALICE_DID;

fn digit_indexes(digit: i64) -> HashMap<String, serde_json::Value> {
    HashMap::from([
        ("digit".to_string(), json!(digit)),
        ("kind".to_string(), json!("digit")),
    ])
}

// A numeric range query should page through results in value order, the
// cursor partitioning the result without gaps or duplicates.
#[tokio::test]
async fn range_query_with_cursor() {
    let provider = ProviderImpl::new().await.expect("should create provider");

    // --------------------------------------------------
    // Index items with digits -5 through 5.
    // --------------------------------------------------
    for digit in -5..=5_i64 {
        let item_id = format!("item_{}", digit + 5);
        index::insert(ALICE_DID, &item_id, &digit_indexes(digit), &provider)
            .await
            .expect("should insert");
    }

    let filter: Filter = HashMap::from([(
        "digit".to_string(),
        FilterVal::Range(Range {
            lower: Some(Lower::Inclusive(IndexValue::Number(-2))),
            upper: Some(Upper::Inclusive(IndexValue::Number(3))),
        }),
    )]);

    // --------------------------------------------------
    // First page: digits -2 through 1.
    // --------------------------------------------------
    let options = QueryOptions {
        sort_index: "digit".to_string(),
        descending: false,
        limit: Some(4),
        cursor: None,
    };
    let items =
        index::query(ALICE_DID, &[filter.clone()], &options, &provider).await.expect("should query");

    let digits: Vec<i64> =
        items.iter().map(|item| item.indexes["digit"].as_i64().unwrap()).collect();
    assert_eq!(digits, vec![-2, -1, 0, 1]);

    // --------------------------------------------------
    // Second page, from a cursor on the last item: digits 2 and 3.
    // --------------------------------------------------
    let last = items.last().expect("should have items");
    let options = QueryOptions {
        sort_index: "digit".to_string(),
        descending: false,
        limit: Some(4),
        cursor: Some(Cursor {
            message_cid: last.item_id.clone(),
            value: CursorValue::Number(1),
        }),
    };
    let items = index::query(ALICE_DID, &[filter], &options, &provider).await.expect("should query");

    let digits: Vec<i64> =
        items.iter().map(|item| item.indexes["digit"].as_i64().unwrap()).collect();
    assert_eq!(digits, vec![2, 3]);
}

// Deleting an item should remove it from every index; deleting an unknown
// item is a no-op.
#[tokio::test]
async fn delete_removes_indexes() {
    let provider = ProviderImpl::new().await.expect("should create provider");

    index::insert(ALICE_DID, "item_a", &digit_indexes(1), &provider).await.expect("should insert");
    index::insert(ALICE_DID, "item_b", &digit_indexes(2), &provider).await.expect("should insert");

    index::delete(ALICE_DID, "item_a", &provider).await.expect("should delete");
    index::delete(ALICE_DID, "missing", &provider).await.expect("missing item is a no-op");

    let filter: Filter = HashMap::from([(
        "kind".to_string(),
        FilterVal::Equal(IndexValue::from("digit")),
    )]);
    let options = QueryOptions {
        sort_index: "digit".to_string(),
        descending: false,
        limit: None,
        cursor: None,
    };
    let items = index::query(ALICE_DID, &[filter], &options, &provider).await.expect("should query");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "item_b");
}

// OR-composed filters should union without duplicates, sorted on the sort
// property.
#[tokio::test]
async fn filter_union() {
    let provider = ProviderImpl::new().await.expect("should create provider");

    for digit in 0..4_i64 {
        let item_id = format!("item_{digit}");
        index::insert(ALICE_DID, &item_id, &digit_indexes(digit), &provider)
            .await
            .expect("should insert");
    }

    // {digit <= 1} OR {digit >= 1}: every item, item 1 only once
    let below: Filter = HashMap::from([(
        "digit".to_string(),
        FilterVal::Range(Range {
            lower: None,
            upper: Some(Upper::Inclusive(IndexValue::Number(1))),
        }),
    )]);
    let above: Filter = HashMap::from([(
        "digit".to_string(),
        FilterVal::Range(Range {
            lower: Some(Lower::Inclusive(IndexValue::Number(1))),
            upper: None,
        }),
    )]);

    let options = QueryOptions {
        sort_index: "digit".to_string(),
        descending: false,
        limit: None,
        cursor: None,
    };
    let items =
        index::query(ALICE_DID, &[below, above], &options, &provider).await.expect("should query");

    let digits: Vec<i64> =
        items.iter().map(|item| item.indexes["digit"].as_i64().unwrap()).collect();
    assert_eq!(digits, vec![0, 1, 2, 3]);
}
