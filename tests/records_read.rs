//! Records Read

use dwn_core::records::{Data, ReadBuilder, RecordsFilter, WriteBuilder};
use dwn_core::{Error, Message, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID, CAROL_DID};

// The tenant should be able to read their own unpublished record.
#[tokio::test]
async fn owner_reads_own() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"private note".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let entry_write = body.entry.records_write.expect("should have write");
    assert_eq!(entry_write.record_id, write.record_id);
    assert_eq!(body.entry.data.expect("should have data").to_bytes(), b"private note".to_vec());
}

// The record's recipient should be able to read it; a third party should not.
#[tokio::test]
async fn recipient_reads() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let carol_keyring = test_node::key_store::keyring(CAROL_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"for bob".to_vec()))
        .recipient(BOB_DID)
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");

    // --------------------------------------------------
    // Bob reads the record addressed to him.
    // --------------------------------------------------
    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&bob_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read");
    assert_eq!(reply.status.code, StatusCode::OK);

    // --------------------------------------------------
    // Carol is neither author nor recipient.
    // --------------------------------------------------
    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&carol_keyring)
        .await
        .expect("should create read");
    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, read, &provider).await else {
        panic!("should be Forbidden");
    };
}

// Published records should be readable without authorization.
#[tokio::test]
async fn anonymous_reads_published() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"public note".to_vec()))
        .published(true)
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .authorize(false)
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read");
    assert_eq!(reply.status.code, StatusCode::OK);
}

// Reading an updated record should attach its initial write.
#[tokio::test]
async fn attaches_initial_write() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let initial = WriteBuilder::new()
        .data(Data::from(b"first".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, initial.clone(), &provider).await.expect("should write");

    let update = WriteBuilder::from(initial.clone())
        .data(Data::from(b"second".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, update.clone(), &provider).await.expect("should write");

    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&initial.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read");

    let body = reply.body.expect("should have body");
    let entry_write = body.entry.records_write.expect("should have write");
    assert_eq!(entry_write.cid().unwrap(), update.cid().unwrap());

    let attached = body.entry.initial_write.expect("should attach initial write");
    assert_eq!(attached.cid().unwrap(), initial.cid().unwrap());
}
