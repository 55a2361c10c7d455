//! Permissions

use dwn_core::grants::{GrantBuilder, RevocationBuilder, Scope};
use dwn_core::protocols::{ConfigureBuilder, Definition, ProtocolType, RuleSet};
use dwn_core::records::{Data, WriteBuilder, WriteProtocol};
use dwn_core::{Error, Method, endpoint};
use http::StatusCode;
use test_node::ProviderImpl;
use test_node::key_store::{ALICE_DID, BOB_DID};

const ALBUM_PROTOCOL: &str = "http://example.com/album-protocol";

fn album_definition() -> Definition {
    // no action rules: only the tenant (or a grant) may write
    Definition::new(ALBUM_PROTOCOL)
        .published(true)
        .add_type("photo", ProtocolType::default())
        .add_rule("photo", RuleSet::default())
}

async fn install_album(provider: &ProviderImpl) {
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let configure = ConfigureBuilder::new()
        .definition(album_definition())
        .build(&alice_keyring)
        .await
        .expect("should build configure");
    endpoint::handle(ALICE_DID, configure, provider).await.expect("should configure");
}

fn photo_write_builder() -> WriteBuilder {
    WriteBuilder::new()
        .protocol(WriteProtocol {
            protocol: ALBUM_PROTOCOL.to_string(),
            protocol_path: "photo".to_string(),
        })
        .data(Data::from(b"a photo".to_vec()))
}

// Anyone should be able to file a permission request with a tenant.
#[tokio::test]
async fn anyone_requests_permission() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    let request = dwn_core::grants::RequestBuilder::new()
        .description("write to the album")
        .scope(Scope::Records {
            method: Method::Write,
            protocol: ALBUM_PROTOCOL.to_string(),
            options: None,
        })
        .build(&bob_keyring)
        .await
        .expect("should build request");
    let reply = endpoint::handle(ALICE_DID, request, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);
}

// A grant should allow its grantee to write in-scope records.
#[tokio::test]
async fn grant_allows_write() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    install_album(&provider).await;

    // --------------------------------------------------
    // Without a grant, Bob's write is rejected.
    // --------------------------------------------------
    let write = photo_write_builder().build(&bob_keyring).await.expect("should create write");
    let Err(Error::Forbidden(_)) = endpoint::handle(ALICE_DID, write, &provider).await else {
        panic!("should be Forbidden");
    };

    // --------------------------------------------------
    // Alice conveys a grant to Bob and stores it on her web node.
    // --------------------------------------------------
    let grant = GrantBuilder::new()
        .granted_to(BOB_DID)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: ALBUM_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    let reply = endpoint::handle(ALICE_DID, grant.clone(), &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Bob's write invoking the grant is accepted.
    // --------------------------------------------------
    let write = photo_write_builder()
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should create write");
    let reply = endpoint::handle(ALICE_DID, write, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);
}

// A grant must not authorize operations outside its scope.
#[tokio::test]
async fn grant_scope_mismatch() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    install_album(&provider).await;

    // scoped to a different protocol
    let grant = GrantBuilder::new()
        .granted_to(BOB_DID)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: "http://example.com/other-protocol".to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    endpoint::handle(ALICE_DID, grant.clone(), &provider).await.expect("should write");

    let write = photo_write_builder()
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should create write");
    let Err(Error::Forbidden(e)) = endpoint::handle(ALICE_DID, write, &provider).await else {
        panic!("should be Forbidden");
    };
    assert!(e.contains("protocol"), "unexpected error: {e}");
}

// An expired grant should fail authorization.
#[tokio::test]
async fn grant_expired() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    install_album(&provider).await;

    let grant = GrantBuilder::new()
        .granted_to(BOB_DID)
        .date_expires(chrono::Utc::now() - chrono::Duration::hours(1))
        .scope(Scope::Records {
            method: Method::Write,
            protocol: ALBUM_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    endpoint::handle(ALICE_DID, grant.clone(), &provider).await.expect("should write");

    let write = photo_write_builder()
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should create write");
    let Err(Error::Forbidden(e)) = endpoint::handle(ALICE_DID, write, &provider).await else {
        panic!("should be Forbidden");
    };
    assert!(e.contains("expired"), "unexpected error: {e}");
}

// A revoked grant should fail authorization for messages at or after the
// revocation.
#[tokio::test]
async fn grant_revoked() {
    let provider = ProviderImpl::new().await.expect("should create provider");
    let alice_keyring = test_node::key_store::keyring(ALICE_DID);
    let bob_keyring = test_node::key_store::keyring(BOB_DID);

    install_album(&provider).await;

    let grant = GrantBuilder::new()
        .granted_to(BOB_DID)
        .scope(Scope::Records {
            method: Method::Write,
            protocol: ALBUM_PROTOCOL.to_string(),
            options: None,
        })
        .build(&alice_keyring)
        .await
        .expect("should build grant");
    endpoint::handle(ALICE_DID, grant.clone(), &provider).await.expect("should write");

    // --------------------------------------------------
    // Bob can write while the grant is active.
    // --------------------------------------------------
    let write = photo_write_builder()
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should create write");
    let reply = endpoint::handle(ALICE_DID, write, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Alice revokes the grant.
    // --------------------------------------------------
    let revocation = RevocationBuilder::new()
        .grant(grant.clone())
        .build(&alice_keyring)
        .await
        .expect("should build revocation");
    let reply = endpoint::handle(ALICE_DID, revocation, &provider).await.expect("should write");
    assert_eq!(reply.status.code, StatusCode::ACCEPTED);

    // --------------------------------------------------
    // Bob's next write is rejected.
    // --------------------------------------------------
    let write = photo_write_builder()
        .permission_grant_id(&grant.record_id)
        .build(&bob_keyring)
        .await
        .expect("should create write");
    let Err(Error::Forbidden(e)) = endpoint::handle(ALICE_DID, write, &provider).await else {
        panic!("should be Forbidden");
    };
    assert!(e.contains("revoked"), "unexpected error: {e}");
}
