//! # JWS
//!
//! JSON Web Signatures in general serialization, as used by message
//! authorization envelopes. Signing is delegated to a [`Signer`]; verification
//! resolves the signer's key through the [`DidResolver`] seam.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature as EdSignature, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::provider::DidResolver;
use crate::{Error, Result, unexpected};

/// Signing algorithms used by web node messages.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Algorithm {
    /// Edwards-curve digital signature (Ed25519).
    #[default]
    EdDSA,
}

impl Algorithm {
    /// The expected JWK curve for the algorithm.
    #[must_use]
    pub const fn curve(self) -> &'static str {
        match self {
            Self::EdDSA => "Ed25519",
        }
    }
}

/// The `Signer` trait provides the digital signing function used when
/// building messages.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign the message bytes.
    async fn try_sign(&self, msg: &[u8]) -> AnyResult<Vec<u8>>;

    /// The signer's public key bytes.
    async fn public_key(&self) -> AnyResult<Vec<u8>>;

    /// The signing algorithm.
    fn algorithm(&self) -> Algorithm;

    /// The verification method (key id) to record in the JWS header,
    /// e.g. `did:example:alice#key-0`.
    async fn verification_method(&self) -> AnyResult<String>;
}

/// A JWS in general serialization.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Jws {
    /// The stringified, base64url-encoded signed payload.
    pub payload: String,

    /// One signer block per signature over the payload.
    pub signatures: Vec<SignatureEntry>,
}

/// A single signer block.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SignatureEntry {
    /// The base64url-encoded protected header.
    pub protected: String,

    /// The base64url-encoded signature.
    pub signature: String,
}

/// The protected header of a signer block.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Protected {
    /// The signing algorithm.
    pub alg: Algorithm,

    /// The key id used to sign — a DID URL whose fragment names a
    /// verification method.
    pub kid: String,
}

impl Jws {
    /// Create a JWS over the serialized payload using the given signer.
    ///
    /// # Errors
    ///
    /// Fails when the payload cannot be serialized or the signer errors.
    pub async fn create<T: Serialize + Send>(payload: &T, signer: &impl Signer) -> Result<Self> {
        let kid = signer
            .verification_method()
            .await
            .map_err(|e| unexpected!("issue getting verification method: {e}"))?;
        let protected = Protected {
            alg: signer.algorithm(),
            kid,
        };

        let protected_enc = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&protected)?);
        let payload_enc = Base64UrlUnpadded::encode_string(&serde_json::to_vec(payload)?);
        let signing_input = format!("{protected_enc}.{payload_enc}");

        let signature = signer
            .try_sign(signing_input.as_bytes())
            .await
            .map_err(|e| unexpected!("issue signing: {e}"))?;

        Ok(Self {
            payload: payload_enc,
            signatures: vec![SignatureEntry {
                protected: protected_enc,
                signature: Base64UrlUnpadded::encode_string(&signature),
            }],
        })
    }

    /// Deserialize the signed payload.
    ///
    /// # Errors
    ///
    /// Fails when the payload is not base64url or not the expected shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = Base64UrlUnpadded::decode_vec(&self.payload)
            .map_err(|e| unexpected!("issue decoding payload: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| unexpected!("issue deserializing payload: {e}"))
    }

    /// The DID of the first (and only expected) signer, taken from the
    /// protected header's key id.
    ///
    /// # Errors
    ///
    /// Fails when there are no signatures or the key id has no DID part.
    pub fn signer_did(&self) -> Result<String> {
        let Some(entry) = self.signatures.first() else {
            return Err(Error::Unauthorized("message has no signatures".to_string()));
        };
        let protected = entry.protected()?;
        let Some((did, _)) = protected.kid.split_once('#') else {
            return Err(Error::Unauthorized("invalid key id".to_string()));
        };
        Ok(did.to_string())
    }

    /// Verify each signer block: exactly one signer is expected, its key is
    /// resolved via the DID resolver, the key type must match the declared
    /// algorithm, and the signature must verify over the signing input.
    ///
    /// # Errors
    ///
    /// Fails with `Unauthorized` when verification fails at any step.
    pub async fn verify(&self, resolver: &impl DidResolver) -> Result<()> {
        if self.signatures.is_empty() {
            return Err(Error::Unauthorized("message has no signatures".to_string()));
        }
        if self.signatures.len() > 1 {
            return Err(Error::Unauthorized(
                "more than one signature is not supported".to_string(),
            ));
        }

        let entry = &self.signatures[0];
        let protected = entry.protected()?;
        let Some((did, _)) = protected.kid.split_once('#') else {
            return Err(Error::Unauthorized("invalid key id".to_string()));
        };

        let document = resolver
            .resolve(did)
            .await
            .map_err(|e| Error::Unauthorized(format!("unable to resolve signer DID: {e}")))?;
        let Some(vm) = document.verification_method(&protected.kid) else {
            return Err(Error::Unauthorized(format!(
                "no verification method {} in DID document",
                protected.kid
            )));
        };
        if vm.public_key_jwk.crv != protected.alg.curve() {
            return Err(Error::Unauthorized("key type does not match algorithm".to_string()));
        }

        let key_bytes = Base64UrlUnpadded::decode_vec(&vm.public_key_jwk.x)
            .map_err(|e| Error::Unauthorized(format!("invalid public key: {e}")))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::Unauthorized("invalid public key length".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| Error::Unauthorized(format!("invalid public key: {e}")))?;

        let sig_bytes = Base64UrlUnpadded::decode_vec(&entry.signature)
            .map_err(|e| Error::Unauthorized(format!("invalid signature encoding: {e}")))?;
        let signature = EdSignature::from_slice(&sig_bytes)
            .map_err(|e| Error::Unauthorized(format!("invalid signature: {e}")))?;

        let signing_input = format!("{}.{}", entry.protected, self.payload);
        verifying_key
            .verify_strict(signing_input.as_bytes(), &signature)
            .map_err(|_| Error::Unauthorized("signature verification failed".to_string()))
    }
}

impl SignatureEntry {
    /// Decode the protected header.
    ///
    /// # Errors
    ///
    /// Fails when the header is not base64url-encoded JSON.
    pub fn protected(&self) -> Result<Protected> {
        let bytes = Base64UrlUnpadded::decode_vec(&self.protected)
            .map_err(|e| unexpected!("issue decoding protected header: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| unexpected!("invalid protected header: {e}"))
    }
}
