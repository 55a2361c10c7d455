//! Protocols Query

use dwn_core::protocols::{ConfigureBuilder, Definition, ProtocolType, QueryBuilder, RuleSet};
use dwn_core::endpoint;
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID};

// Unpublished definitions should be invisible to anonymous and non-tenant
// queriers.
#[tokio::test]
async fn published_visibility() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    // one published, one unpublished protocol
    for (protocol, published) in [
        ("http://example.com/open-protocol", true),
        ("http://example.com/closed-protocol", false),
    ] {
        let definition = Definition::new(protocol)
            .published(published)
            .add_type("entry", ProtocolType::default())
            .add_rule("entry", RuleSet::default());
        let configure = ConfigureBuilder::new()
            .definition(definition)
            .build(&alice_keyring)
            .await
            .expect("should build configure");
        endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");
    }

    // --------------------------------------------------
    // Anonymous queriers see the published protocol only.
    // --------------------------------------------------
    let query =
        QueryBuilder::new().authorize(false).build(&alice_keyring).await.expect("should build");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].descriptor.definition.protocol, "http://example.com/open-protocol");

    // --------------------------------------------------
    // Bob, without a grant, sees the same.
    // --------------------------------------------------
    let query = QueryBuilder::new().build(&bob_keyring).await.expect("should build");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    let body = reply.body.expect("should have body");
    assert_eq!(body.entries.expect("should have entries").len(), 1);

    // --------------------------------------------------
    // Alice sees both.
    // --------------------------------------------------
    let query = QueryBuilder::new().build(&alice_keyring).await.expect("should build");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    let body = reply.body.expect("should have body");
    assert_eq!(body.entries.expect("should have entries").len(), 2);
}
