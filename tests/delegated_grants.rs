//! Delegated Grants

use dwn_core::grants::{GrantBuilder, Scope};
use dwn_core::protocols::{
    Action, ActionRule, Actor, ConfigureBuilder, Definition, ProtocolType, RuleSet,
};
use dwn_core::records::{Data, QueryBuilder, RecordsFilter, WriteBuilder, WriteProtocol};
use dwn_core::{Error, Method, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID, CAROL_DID};

const FEED_PROTOCOL: &str = "http://example.com/feed-protocol";

// device DID used as Alice's delegate
const DEVICE_DID: &str = "did:key:z6MktDevice9w3bZHkyQ2m1ZAYcHpLF1Wprkf4Mkpcxi92p8N";

fn feed_definition() -> Definition {
    Definition::new(FEED_PROTOCOL)
        .published(true)
        .add_type("post", ProtocolType::default())
        .add_rule("post", RuleSet {
            actions: Some(vec![ActionRule {
                who: Some(Actor::Anyone),
                of: None,
                role: None,
                can: vec![Action::Create],
            }]),
            ..RuleSet::default()
        })
}

// A device holding Alice's delegated grant should write on her behalf to
// another tenant's web node, with Alice as the logical author.
#[tokio::test]
async fn device_writes_as_grantor() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let device_keyring = test_node::key_store::keyring(DEVICE_DID);

    // --------------------------------------------------
    // Bob installs the feed protocol on his web node.
    // --------------------------------------------------
    let configure = ConfigureBuilder::new()
        .definition(feed_definition())
        .build(&bob_keyring)
        .await
        .expect("should build configure");
    let reply = endpoint::handle(BOB_DID, configure, &provider).await.expect("should configure");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Alice conveys a delegated grant to her device, scoped to writing
    // feed posts.
    // --------------------------------------------------
    let grant = GrantBuilder::new()
        .granted_to(DEVICE_DID)
        .delegated(true)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: FEED_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    let delegated_grant = (&grant).try_into().expect("should convert grant");

    // --------------------------------------------------
    // The device writes a post to Bob's web node on Alice's behalf.
    // --------------------------------------------------
    let post = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: FEED_PROTOCOL.to_string(),
            protocol_path: "post".to_string(),
        })
        .delegated_grant(delegated_grant)
        .data(Data::from(b"posted by alice's device".to_vec()))
        .build(&device_keyring)
        .await
        .expect("should create write");
    let reply = endpoint::handle(BOB_DID, post.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // The stored record's author is Alice, not the device.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(RecordsFilter::new().record_id(&post.record_id).add_author(ALICE_DID))
        .build(&bob_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(BOB_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    assert_eq!(body.entries.expect("should have entries").len(), 1);
}

// A third party reusing someone else's delegated grant should be rejected.
#[tokio::test]
async fn grant_not_transferable() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let carol_keyring = test_node::key_store::keyring(CAROL_DID);

    let configure = ConfigureBuilder::new()
        .definition(feed_definition())
        .build(&bob_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(BOB_DID, configure, &provider).await.expect("should configure");

    let grant = GrantBuilder::new()
        .granted_to(DEVICE_DID)
        .delegated(true)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: FEED_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    let delegated_grant = (&grant).try_into().expect("should convert grant");

    // --------------------------------------------------
    // Carol signs with the device's grant and is rejected.
    // --------------------------------------------------
    let post = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: FEED_PROTOCOL.to_string(),
            protocol_path: "post".to_string(),
        })
        .delegated_grant(delegated_grant)
        .data(Data::from(b"posted by carol".to_vec()))
        .build(&carol_keyring)
        .await
        .expect("should create write");
    let Err(Error::Forbidden(e)) = endpoint::handle(BOB_DID, post, &provider).await else {
        panic!("should be Forbidden");
    };
    assert!(e.contains("not granted to signer"), "unexpected error: {e}");
}

// A non-delegated grant must not confer delegated authority.
#[tokio::test]
async fn grant_must_be_delegated() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let device_keyring = test_node::key_store::keyring(DEVICE_DID);

    let configure = ConfigureBuilder::new()
        .definition(feed_definition())
        .build(&bob_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(BOB_DID, configure, &provider).await.expect("should configure");

    let grant = GrantBuilder::new()
        .granted_to(DEVICE_DID)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: FEED_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    let delegated_grant = (&grant).try_into().expect("should convert grant");

    let post = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: FEED_PROTOCOL.to_string(),
            protocol_path: "post".to_string(),
        })
        .delegated_grant(delegated_grant)
        .data(Data::from(b"posted by device".to_vec()))
        .build(&device_keyring)
        .await
        .expect("should create write");
    let Err(Error::Forbidden(e)) = endpoint::handle(BOB_DID, post, &provider).await else {
        panic!("should be Forbidden");
    };
    assert!(e.contains("not a delegated grant"), "unexpected error: {e}");
}
