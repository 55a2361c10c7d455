//! Deterministic key material for test identities.
//!
//! Signing keys are derived by hashing the DID string, so the key store and
//! DID resolver stay consistent without shared state.

use anyhow::Result;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use dwn_core::jws::{Algorithm, Signer};
use dwn_core::provider::{Document, Keyring, PublicKeyJwk, VerificationMethod};
use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest, Sha256};

/// Alice's DID.
pub const ALICE_DID: &str = "did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

/// Bob's DID.
pub const BOB_DID: &str = "did:key:z6MkqRYqQiSgvZQdnBytw86Qbs2ZWUkGv22od935YF4s8M7V";

/// Carol's DID.
pub const CAROL_DID: &str = "did:key:z6MkgWJfVmi95ECGuvCcF7HXVQZcbxcWhCBoqvhmVQ6iLp62";

fn signing_key(did: &str) -> SigningKey {
    let seed: [u8; 32] = Sha256::digest(did.as_bytes()).into();
    SigningKey::from_bytes(&seed)
}

/// A keyring for the given DID.
#[must_use]
pub fn keyring(did: &str) -> KeyringImpl {
    KeyringImpl {
        did: did.to_string(),
        key: signing_key(did),
    }
}

/// The DID document matching [`keyring`]'s key material.
#[must_use]
pub fn document(did: &str) -> Document {
    let verifying_key = signing_key(did).verifying_key();

    Document {
        id: did.to_string(),
        verification_method: vec![VerificationMethod {
            id: format!("{did}#key-0"),
            controller: did.to_string(),
            method_type: "JsonWebKey2020".to_string(),
            public_key_jwk: PublicKeyJwk {
                kty: "OKP".to_string(),
                crv: "Ed25519".to_string(),
                x: Base64UrlUnpadded::encode_string(verifying_key.as_bytes()),
            },
        }],
    }
}

/// A signing handle over a derived test key.
pub struct KeyringImpl {
    did: String,
    key: SigningKey,
}

impl Keyring for KeyringImpl {}

#[async_trait]
impl Signer for KeyringImpl {
    async fn try_sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(msg).to_bytes().to_vec())
    }

    async fn public_key(&self) -> Result<Vec<u8>> {
        Ok(self.key.verifying_key().as_bytes().to_vec())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }

    async fn verification_method(&self) -> Result<String> {
        Ok(format!("{}#key-0", self.did))
    }
}
