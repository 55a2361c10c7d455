//! Records Write

use base64ct::{Base64UrlUnpadded, Encoding};
use dwn_core::records::{Data, QueryBuilder, RecordsFilter, WriteBuilder};
use dwn_core::{Error, Message, endpoint};
use http::StatusCode;
use rand::RngCore;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID};

// Should update an existing record when the update has a later timestamp.
#[tokio::test]
async fn update_older() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // --------------------------------------------------
    // Write a record.
    // --------------------------------------------------
    let data = b"a new write record";

    let initial = WriteBuilder::new()
        .data(Data::from(data.to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let reply =
        endpoint::handle(ALICE_DID, initial.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Verify the record was created.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&initial.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].encoded_data, Some(Base64UrlUnpadded::encode_string(data)));

    // --------------------------------------------------
    // Update the existing record.
    // --------------------------------------------------
    let data = b"updated write record";

    let update = WriteBuilder::from(initial.clone())
        .data(Data::from(data.to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let reply = endpoint::handle(ALICE_DID, update.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Verify the update overwrote the original.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&update.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].encoded_data, Some(Base64UrlUnpadded::encode_string(data)));

    // --------------------------------------------------
    // Attempt to overwrite the latest record with an older version.
    // --------------------------------------------------
    let Err(Error::Conflict(e)) = endpoint::handle(ALICE_DID, initial, &provider).await else {
        panic!("should be Conflict");
    };
    assert_eq!(e, "a more recent update exists");
}

// Should only update a record with an identical timestamp when the update's
// CID is larger than the existing one.
#[tokio::test]
async fn update_smaller_cid() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // --------------------------------------------------
    // Write a record.
    // --------------------------------------------------
    let initial = WriteBuilder::new()
        .data(Data::from(b"a new write record".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let reply =
        endpoint::handle(ALICE_DID, initial.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Create 2 updates with the same timestamp.
    // --------------------------------------------------
    let message_timestamp =
        initial.descriptor.base.message_timestamp + chrono::Duration::seconds(1);

    let write_1 = WriteBuilder::from(initial.clone())
        .data(Data::from(b"message 1".to_vec()))
        .message_timestamp(message_timestamp)
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let write_2 = WriteBuilder::from(initial.clone())
        .data(Data::from(b"message 2".to_vec()))
        .message_timestamp(message_timestamp)
        .build(&alice_keyring)
        .await
        .expect("should create write");

    // order the updates by CID size
    let mut sorted = vec![write_1, write_2];
    sorted.sort_by_key(|write| write.cid().unwrap());

    // --------------------------------------------------
    // Apply the smaller-CID update, then the larger one.
    // --------------------------------------------------
    let reply =
        endpoint::handle(ALICE_DID, sorted[0].clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let reply =
        endpoint::handle(ALICE_DID, sorted[1].clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // verify the larger CID won
    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&initial.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].descriptor.data_cid, sorted[1].descriptor.data_cid);

    // --------------------------------------------------
    // Attempt to re-apply the smaller-CID update and fail.
    // --------------------------------------------------
    let Err(Error::Conflict(e)) = endpoint::handle(ALICE_DID, sorted[0].clone(), &provider).await
    else {
        panic!("should be Conflict");
    };
    assert_eq!(e, "an update with a larger CID already exists");
}

// Should reject a message whose descriptor was altered after signing.
#[tokio::test]
async fn tampered_descriptor() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let initial = WriteBuilder::new()
        .data(Data::from(b"original".to_vec()))
        .schema("http://example.com/note")
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let reply =
        endpoint::handle(ALICE_DID, initial.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // swap the schema without re-signing
    let mut update = WriteBuilder::from(initial)
        .data(Data::from(b"updated".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    update.descriptor.schema = Some("http://example.com/other".to_string());

    let Err(Error::BadRequest(e)) = endpoint::handle(ALICE_DID, update, &provider).await else {
        panic!("should be BadRequest");
    };
    assert!(e.contains("descriptor CID"), "unexpected error: {e}");
}

// Should store data exceeding the inline threshold through the blob store
// and return it on read.
#[tokio::test]
async fn large_data_stream() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let mut data = vec![0u8; dwn_core::data::MAX_ENCODED_SIZE + 10];
    rand::thread_rng().fill_bytes(&mut data);

    let write = WriteBuilder::new()
        .data(Data::from(data.clone()))
        .data_format("application/octet-stream")
        .build(&alice_keyring)
        .await
        .expect("should create write");
    assert!(write.encoded_data.is_none(), "large data should not be inlined");

    let reply = endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // read the record back with its data
    let read = dwn_core::records::ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let stream = body.entry.data.expect("should have data");
    assert_eq!(stream.to_bytes(), data);
}

// Should reject an unauthorized write from a non-owner.
#[tokio::test]
async fn foreign_author_rejected() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"from bob".to_vec()))
        .build(&bob_keyring)
        .await
        .expect("should create write");

    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, write, &provider).await else {
        panic!("should be Forbidden");
    };
}

// Re-putting an identical message should be idempotent.
#[tokio::test]
async fn idempotent_replay() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"same message".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");

    let reply = endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);
    let reply = endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    let body = reply.body.expect("should have body");
    assert_eq!(body.entries.expect("should have entries").len(), 1);
}
