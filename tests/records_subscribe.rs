//! Records Subscribe

use futures::StreamExt;
use dwn_core::records::{Data, RecordsFilter, SubscribeBuilder, WriteBuilder};
use dwn_core::{Message, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::ALICE_DID;

const NOTE_SCHEMA: &str = "http://example.com/note";

// A subscription filtered by schema should deliver matching writes only.
#[tokio::test]
async fn schema_filtered_events() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // --------------------------------------------------
    // Alice subscribes to note records.
    // --------------------------------------------------
    let subscribe = SubscribeBuilder::new()
        .filter(RecordsFilter::new().schema(NOTE_SCHEMA))
        .build(&alice_keyring)
        .await
        .expect("should build subscribe");
    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.expect("should subscribe");
    assert_eq!(reply.status.code, StatusCode::OK);
    let mut body = reply.body.expect("should have body");

    // --------------------------------------------------
    // An unrelated write is not delivered; a note is.
    // --------------------------------------------------
    let unrelated = WriteBuilder::new()
        .data(Data::from(b"unrelated".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, unrelated, &provider).await.expect("should write");

    let note = WriteBuilder::new()
        .data(Data::from(b"a note".to_vec()))
        .schema(NOTE_SCHEMA)
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let note_cid = note.cid().expect("should compute CID");
    endpoint::handle(ALICE_DID, note, &provider).await.expect("should write");

    let event = body.subscription.next().await.expect("should receive event");
    assert_eq!(event.cid().expect("should compute CID"), note_cid);
}

// Dropping the subscriber should end delivery without disturbing writes.
#[tokio::test]
async fn drop_cancels_subscription() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let subscribe = SubscribeBuilder::new()
        .filter(RecordsFilter::new().schema(NOTE_SCHEMA))
        .build(&alice_keyring)
        .await
        .expect("should build subscribe");
    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.expect("should subscribe");
    drop(reply.body);

    let note = WriteBuilder::new()
        .data(Data::from(b"a note".to_vec()))
        .schema(NOTE_SCHEMA)
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let reply = endpoint::handle(ALICE_DID, note, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);
}
