//! Messages Subscribe

use futures::StreamExt;
use dwn_core::messages::{MessagesFilter, SubscribeBuilder};
use dwn_core::records::{Data, WriteBuilder};
use dwn_core::{Interface, Message, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::ALICE_DID;

// The tenant should receive their own events over a subscription.
#[tokio::test]
async fn owner_events() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // --------------------------------------------------
    // Alice subscribes to her own event stream.
    // --------------------------------------------------
    let subscribe = SubscribeBuilder::new()
        .add_filter(MessagesFilter::new().interface(Interface::Records))
        .build(&alice_keyring)
        .await
        .expect("should build subscribe");
    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.expect("should subscribe");
    assert_eq!(reply.status.code, StatusCode::OK);

    let mut body = reply.body.expect("should have body");

    // --------------------------------------------------
    // Alice writes a record.
    // --------------------------------------------------
    let write = WriteBuilder::new()
        .data(Data::from(b"a write to observe".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    let message_cid = write.cid().expect("should compute CID");

    let reply = endpoint::handle(ALICE_DID, write, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // The subscriber receives the matching event.
    // --------------------------------------------------
    let event = body.subscription.next().await.expect("should receive event");
    assert_eq!(event.cid().expect("should compute CID"), message_cid);
}

// Events not matching the subscription's filters should not be delivered.
#[tokio::test]
async fn filters_apply() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // subscribe to protocol configurations only
    let subscribe = SubscribeBuilder::new()
        .add_filter(MessagesFilter::new().interface(Interface::Protocols))
        .build(&alice_keyring)
        .await
        .expect("should build subscribe");
    let reply = endpoint::handle(ALICE_DID, subscribe, &provider).await.expect("should subscribe");
    let mut body = reply.body.expect("should have body");

    // a record write is not delivered
    let write = WriteBuilder::new()
        .data(Data::from(b"unrelated".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create write");
    endpoint::handle(ALICE_DID, write, &provider).await.expect("should write");

    // a configure is delivered
    let definition = dwn_core::protocols::Definition::new("http://example.com/observed-protocol")
        .published(true)
        .add_type("entry", dwn_core::protocols::ProtocolType::default())
        .add_rule("entry", dwn_core::protocols::RuleSet::default());
    let configure = dwn_core::protocols::ConfigureBuilder::new()
        .definition(definition)
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    let configure_cid = configure.cid().expect("should compute CID");
    endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");

    let event = body.subscription.next().await.expect("should receive event");
    assert_eq!(event.cid().expect("should compute CID"), configure_cid);
}
