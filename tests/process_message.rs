//! Process Message

use dwn_core::records::{Data, RecordsFilter, WriteBuilder};
use dwn_core::endpoint;
use http::StatusCode;
use serde_json::json;
use test_node::ProviderImpl;
use test_node::key_store::ALICE_DID;

// The raw dispatcher should route by interface/method and reply in kind.
#[tokio::test]
async fn routes_raw_messages() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // --------------------------------------------------
    // A write, submitted as raw JSON.
    // --------------------------------------------------
    let write = WriteBuilder::new()
        .data(Data::from(b"dispatched".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let raw = serde_json::to_value(&write).expect("should serialize");

    let reply = endpoint::process_message(ALICE_DID, raw, &provider).await;
    assert_eq!(reply.status.code, StatusCode::ACCEPTED.as_u16());

    // --------------------------------------------------
    // A query, submitted as raw JSON, finds it.
    // --------------------------------------------------
    let query = dwn_core::records::QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let raw = serde_json::to_value(&query).expect("should serialize");

    let reply = endpoint::process_message(ALICE_DID, raw, &provider).await;
    assert_eq!(reply.status.code, StatusCode::OK.as_u16());
    let body = reply.body.expect("should have body");
    assert_eq!(body["entries"].as_array().expect("should have entries").len(), 1);
}

// Classified errors should surface as reply statuses, not bubbled errors.
#[tokio::test]
async fn translates_errors() {
    let provider = ProviderImpl::new().await.expect("should create provider");

    // unknown route
    let reply = endpoint::process_message(
        ALICE_DID,
        json!({"descriptor": {"interface": "Records", "method": "Prune"}}),
        &provider,
    )
    .await;
    assert_eq!(reply.status.code, StatusCode::BAD_REQUEST.as_u16());

    // malformed message
    let reply = endpoint::process_message(ALICE_DID, json!({"hello": "world"}), &provider).await;
    assert_eq!(reply.status.code, StatusCode::BAD_REQUEST.as_u16());
}
