//! Protocols Configure

use dwn_core::grants::{GrantBuilder, Scope};
use dwn_core::protocols::{
    Action, ActionRule, Actor, ConfigureBuilder, Definition, ProtocolType, QueryBuilder, RuleSet,
};
use dwn_core::{Error, Method, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID};

const CHAT_PROTOCOL: &str = "http://example.com/chat-protocol";

fn chat_definition() -> Definition {
    Definition::new(CHAT_PROTOCOL)
        .published(true)
        .add_type("message", ProtocolType::default())
        .add_rule("message", RuleSet {
            actions: Some(vec![ActionRule {
                who: Some(Actor::Anyone),
                of: None,
                role: None,
                can: vec![Action::Create],
            }]),
            ..RuleSet::default()
        })
}

// The tenant should be able to install a protocol and query it back.
#[tokio::test]
async fn configure_and_query() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let configure = ConfigureBuilder::new()
        .definition(chat_definition())
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    let reply = endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let query = QueryBuilder::new()
        .filter(CHAT_PROTOCOL)
        .build(&alice_keyring)
        .await
        .expect("should build query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].descriptor.definition.protocol, CHAT_PROTOCOL);
}

// Overwriting a protocol should leave exactly one (the newest) configuration
// queryable, and reject older replays.
#[tokio::test]
async fn overwrite_newest_wins() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    let first = ConfigureBuilder::new()
        .definition(chat_definition())
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(ALICE_DID, first.clone(), &provider).await.expect("should configure");

    // an updated definition, a moment later
    let mut updated = chat_definition();
    updated.published = false;
    let second = ConfigureBuilder::new()
        .definition(updated)
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    let reply =
        endpoint::handle(ALICE_DID, second.clone(), &provider).await.expect("should configure");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Exactly one configuration remains.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(CHAT_PROTOCOL)
        .build(&alice_keyring)
        .await
        .expect("should build query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    let body = reply.body.expect("should have body");
    let entries = body.entries.expect("should have entries");
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].descriptor.definition.published);

    // --------------------------------------------------
    // Replaying the older configuration conflicts.
    // --------------------------------------------------
    let Err(Error::Conflict(_)) = endpoint::handle(ALICE_DID, first, &provider).await else {
        panic!("should be Conflict");
    };
}

// Structurally invalid definitions should be rejected at build time.
#[tokio::test]
async fn invalid_definition() {
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);

    // `update` without `create`
    let definition = Definition::new(CHAT_PROTOCOL)
        .published(true)
        .add_type("message", ProtocolType::default())
        .add_rule("message", RuleSet {
            actions: Some(vec![ActionRule {
                who: Some(Actor::Anyone),
                of: None,
                role: None,
                can: vec![Action::Update],
            }]),
            ..RuleSet::default()
        });
    let result = ConfigureBuilder::new().definition(definition).build(&alice_keyring).await;
    assert!(result.is_err(), "update without create should be rejected");

    // duplicate actor rules
    let rule = ActionRule {
        who: Some(Actor::Anyone),
        of: None,
        role: None,
        can: vec![Action::Create],
    };
    let definition = Definition::new(CHAT_PROTOCOL)
        .published(true)
        .add_type("message", ProtocolType::default())
        .add_rule("message", RuleSet {
            actions: Some(vec![rule.clone(), rule]),
            ..RuleSet::default()
        });
    let result = ConfigureBuilder::new().definition(definition).build(&alice_keyring).await;
    assert!(result.is_err(), "duplicate actor rules should be rejected");

    // rule set not declared as a type
    let definition = Definition::new(CHAT_PROTOCOL)
        .published(true)
        .add_rule("message", RuleSet::default());
    let result = ConfigureBuilder::new().definition(definition).build(&alice_keyring).await;
    assert!(result.is_err(), "undeclared rule set should be rejected");
}

// A non-tenant author should need a matching grant to configure.
#[tokio::test]
async fn grant_authorized_configure() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    // --------------------------------------------------
    // Without a grant, Bob cannot configure Alice's web node.
    // --------------------------------------------------
    let configure = ConfigureBuilder::new()
        .definition(chat_definition())
        .build(&bob_keyring)
        .await
        .expect("should build configure");
    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, configure, &provider).await else {
        panic!("should be Forbidden");
    };

    // --------------------------------------------------
    // Alice conveys a protocol-scoped configure grant to Bob.
    // --------------------------------------------------
    let grant = GrantBuilder::new()
        .granted_to(BOB_DID)
        .scope(Scope::Protocols {
            method: Method::Configure,
            protocol: Some(CHAT_PROTOCOL.to_string()),
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    endpoint::handle(ALICE_DID, grant.clone(), &provider).await.expect("should write");

    let configure = ConfigureBuilder::new()
        .definition(chat_definition())
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should build configure");
    let reply = endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);
}
