//! Protocol Roles

use std::collections::BTreeMap;

use dwn_core::protocols::{
    Action, ActionRule, ConfigureBuilder, Definition, ProtocolType, RuleSet,
};
use dwn_core::records::{Data, QueryBuilder, RecordsFilter, WriteBuilder, WriteProtocol};
use dwn_core::{Error, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID, CAROL_DID};

const THREAD_PROTOCOL: &str = "http://example.com/thread-protocol";

// A thread protocol: participants are a context role allowed to write chat
// records within their thread.
fn thread_definition() -> Definition {
    Definition::new(THREAD_PROTOCOL)
        .published(true)
        .add_type("thread", ProtocolType::default())
        .add_type("participant", ProtocolType::default())
        .add_type("chat", ProtocolType::default())
        .add_rule("thread", RuleSet {
            structure: BTreeMap::from([
                ("participant".to_string(), RuleSet {
                    context_role: Some(true),
                    ..RuleSet::default()
                }),
                ("chat".to_string(), RuleSet {
                    actions: Some(vec![ActionRule {
                        who: None,
                        of: None,
                        role: Some("thread/participant".to_string()),
                        can: vec![Action::Create, Action::Query, Action::Read],
                    }]),
                    ..RuleSet::default()
                }),
            ]),
            ..RuleSet::default()
        })
}

// A participant should be able to create chat records in their thread;
// outsiders should not.
#[tokio::test]
async fn context_role_gates_writes() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let carol_keyring = test_node::key_store::keyring(CAROL_DID);

    // --------------------------------------------------
    // Alice configures the thread protocol and starts a thread.
    // --------------------------------------------------
    let configure = ConfigureBuilder::new()
        .definition(thread_definition())
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    let reply = endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let thread = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread".to_string(),
        })
        .data(Data::from(b"a new thread".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create thread");
    let reply =
        endpoint::handle(ALICE_DID, thread.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    let thread_context = thread.context_id.clone().expect("should have context");

    // --------------------------------------------------
    // Alice adds Bob as a participant.
    // --------------------------------------------------
    let participant = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread/participant".to_string(),
        })
        .parent_context_id(&thread_context)
        .recipient(BOB_DID)
        .data(Data::from(b"bob joins".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create participant");
    let reply = endpoint::handle(ALICE_DID, participant, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Bob writes a chat record invoking his participant role.
    // --------------------------------------------------
    let chat = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread/chat".to_string(),
        })
        .parent_context_id(&thread_context)
        .protocol_role("thread/participant")
        .data(Data::from(b"hi from bob".to_vec()))
        .build(&bob_keyring)
        .await
        .expect("should create chat");
    let reply = endpoint::handle(ALICE_DID, chat, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Carol, not a participant, is rejected.
    // --------------------------------------------------
    let chat = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread/chat".to_string(),
        })
        .parent_context_id(&thread_context)
        .protocol_role("thread/participant")
        .data(Data::from(b"hi from carol".to_vec()))
        .build(&carol_keyring)
        .await
        .expect("should create chat");
    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, chat, &provider).await else {
        panic!("should be Forbidden");
    };
}

// A role-invoking query should be limited to roles the author actually
// holds.
#[tokio::test]
async fn role_gated_query() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);
    let carol_keyring = test_node::key_store::keyring(CAROL_DID);

    let configure = ConfigureBuilder::new()
        .definition(thread_definition())
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(ALICE_DID, configure, &provider).await.expect("should configure");

    let thread = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread".to_string(),
        })
        .data(Data::from(b"a new thread".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create thread");
    endpoint::handle(ALICE_DID, thread.clone(), &provider).await.expect("should write");
    let thread_context = thread.context_id.clone().expect("should have context");

    let participant = WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: THREAD_PROTOCOL.to_string(),
            protocol_path: "thread/participant".to_string(),
        })
        .parent_context_id(&thread_context)
        .recipient(BOB_DID)
        .data(Data::from(b"bob joins".to_vec()))
        .build(&alice_keyring)
        .await
        .expect("should create participant");
    endpoint::handle(ALICE_DID, participant, &provider).await.expect("should write");

    // --------------------------------------------------
    // Bob queries chat records through his role.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(
            RecordsFilter::new()
                .protocol(THREAD_PROTOCOL)
                .protocol_path("thread/chat")
                .context_id(&thread_context),
        )
        .protocol_role("thread/participant")
        .build(&bob_keyring)
        .await
        .expect("should create query");
    let reply = endpoint::handle(ALICE_DID, query, &provider).await.expect("should query");
    assert_eq!(reply.status.code, StatusCode::OK);

    // --------------------------------------------------
    // Carol's role invocation fails.
    // --------------------------------------------------
    let query = QueryBuilder::new()
        .filter(
            RecordsFilter::new()
                .protocol(THREAD_PROTOCOL)
                .protocol_path("thread/chat")
                .context_id(&thread_context),
        )
        .protocol_role("thread/participant")
        .build(&carol_keyring)
        .await
        .expect("should create query");
    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, query, &provider).await else {
        panic!("should be Forbidden");
    };
}
