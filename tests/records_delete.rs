//! Records Delete

use dwn_core::records::{Data, DeleteBuilder, QueryBuilder, ReadBuilder, RecordsFilter, WriteBuilder};
use dwn_core::{Error, endpoint};
use http::StatusCode;
use rand::RngCore;
use test_node::ProviderImpl;
use test_node::key_store::ALICE_DID;

// Deleting a record should tombstone it and empty latest-state queries.
#[tokio::test]
async fn tombstones_record() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let write = WriteBuilder::new()
        .data(Data::from(b"to be deleted".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");

    let delete = DeleteBuilder::new()
        .record_id(&write.record_id)
        .build(&alice_keyring)
        .await
        .expect("should create delete");
    let reply = endpoint::handle(ALICE_DID, delete, &provider).await.expect("should delete");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // The record is gone from latest-state queries.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);
    assert!(reply.body.is_none(), "deleted record should not be queryable");

    // --------------------------------------------------
    // A read reports the record as deleted.
    // --------------------------------------------------
    let read = ReadBuilder::new()
        .filter(RecordsFilter::new().record_id(&write.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let Err(Error::NotFound(_)) = endpoint::handle(ALICE_DID, read, &provider).await else {
        panic!("should be NotFound");
    };
}

// Deleting a record should reclaim its blob: a fresh write referencing the
// same data CID must arrive with a data stream.
#[tokio::test]
async fn reclaims_blob() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let mut data = vec![0u8; dwn_core::data::MAX_ENCODED_SIZE + 10];
    rand::thread_rng().fill_bytes(&mut data);

    // --------------------------------------------------
    // Write, then delete, a record with streamed data.
    // --------------------------------------------------
    let write = WriteBuilder::new()
        .data(Data::from(data.clone()))
        .data_format("application/octet-stream")
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write.clone(), &provider).await.expect("should write");

    let delete = DeleteBuilder::new()
        .record_id(&write.record_id)
        .build(&alice_keyring)
        .await
        .expect("should create delete");
    endpoint::handle(ALICE_DID, delete, &provider).await.expect("should delete");

    // --------------------------------------------------
    // A fresh record referencing the reclaimed data CID without a stream
    // must fail.
    // --------------------------------------------------
    let missing_data = WriteBuilder::new()
        .data(Data::Cid {
            data_cid: write.descriptor.data_cid.clone(),
            data_size: write.descriptor.data_size,
        })
        .data_format("application/octet-stream")
        .build(&alice_keyring)
        .await
        .expect("should create write");

    let Err(Error::BadRequest(_)) = endpoint::handle(ALICE_DID, missing_data, &provider).await
    else {
        panic!("should be BadRequest");
    };
}

// The initial write should be retained after an update is deleted, while
// newer-version conflicts are rejected.
#[tokio::test]
async fn retains_initial_write() {
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
    endpoint::handle(ALICE_DID, update, &provider).await.expect("should write");

    let delete = DeleteBuilder::new()
        .record_id(&initial.record_id)
        .build(&alice_keyring)
        .await
        .expect("should create delete");
    endpoint::handle(ALICE_DID, delete, &provider).await.expect("should delete");

    // --------------------------------------------------
    // The initial write is still retrievable by its CID.
    // --------------------------------------------------
    use dwn_core::Message;
    let read = dwn_core::messages::ReadBuilder::new()
        .message_cid(initial.cid().expect("should compute CID"))
        .build(&alice_keyring)
        .await
        .expect("should create read");
    let reply = endpoint::handle(ALICE_DID, read, &provider).await.expect("should read message");
    assert_eq!(reply.status.code, StatusCode::OK);

    // --------------------------------------------------
    // A write attempting to resurrect the record fails.
    // --------------------------------------------------
    let resurrect = WriteBuilder::from(initial.clone())
        .data(Data::from(b"again".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let Err(Error::BadRequest(e)) = endpoint::handle(ALICE_DID, resurrect, &provider).await else {
        panic!("should be BadRequest");
    };
    assert!(e.contains("deleted"), "unexpected error: {e}");
}

// Pruning should purge descendant records.
#[tokio::test]
async fn prunes_descendants() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // a two-level protocol: list with entries
    let definition = dwn_core::protocols::Definition::new("http://example.com/list-protocol")
        .published(true)
        .add_type("list", dwn_core::protocols::ProtocolType::default())
        .add_type("item", dwn_core::protocols::ProtocolType::default())
        .add_rule("list", dwn_core::protocols::RuleSet {
            structure: std::collections::BTreeMap::from([(
                "item".to_string(),
                dwn_core::protocols::RuleSet::default(),
            )]),
            ..dwn_core::protocols::RuleSet::default()
        });
    let configure = dwn_core::protocols::ConfigureBuilder::new()
        .definition(definition)
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");

    let list = WriteBuilder::new()
        .protocol(dwn_core::records::WriteProtocol {
            protocol: "http://example.com/list-protocol".to_string(),
            protocol_path: "list".to_string(),
        })
        .data(Data::from(b"the list".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, list.clone(), &provider).await.expect("should write");

    let item = WriteBuilder::new()
        .protocol(dwn_core::records::WriteProtocol {
            protocol: "http://example.com/list-protocol".to_string(),
            protocol_path: "list/item".to_string(),
        })
        .parent_context_id(list.context_id.clone().expect("should have context"))
        .data(Data::from(b"an item".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, item.clone(), &provider).await.expect("should write");

    // --------------------------------------------------
    // Prune the list; the item disappears with it.
    // --------------------------------------------------
    let delete = DeleteBuilder::new()
        .record_id(&list.record_id)
        .prune(true)
        .build(&alice_keyring)
        .await
        .expect("should create delete");
    let reply = endpoint::handle(ALICE_DID, delete, &provider).await.expect("should delete");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&item.record_id))
        .build(&alice_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert!(reply.body.is_none(), "pruned descendant should be gone");
}
