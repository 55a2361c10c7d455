//! # Provider
//!
//! The traits a web node host implements to supply the node's environment:
//! an ordered key-value engine, DID resolution, signing keys, and an event
//! stream. Message, blob, index, event-log, and task storage are implemented
//! by this crate on top of [`KvStore`] — implementers supply the engine only.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{Event, SubscribeFilter, Subscriber};
pub use crate::jws::{Algorithm, Signer};
pub use crate::store::{Cursor, Entry, Query};
pub use crate::tasks::ResumableTask;

/// Web node provider: the full set of environment seams.
pub trait Provider: KvStore + DidResolver + EventStream + KeyStore + Send + Sync + Clone {}

/// A single write operation in an atomic batch.
#[derive(Clone, Debug)]
pub enum WriteOp {
    /// Insert or replace the value at `key`.
    Put {
        /// The key to write.
        key: String,
        /// The value to write.
        value: Vec<u8>,
    },

    /// Remove the value at `key`, if any.
    Delete {
        /// The key to remove.
        key: String,
    },
}

/// Bounds for a range scan over a partition. All keys are UTF-8 strings and
/// order is lexicographic by byte.
#[derive(Clone, Debug, Default)]
pub struct RangeOpts {
    /// Exclusive lower bound.
    pub gt: Option<String>,

    /// Inclusive lower bound.
    pub gte: Option<String>,

    /// Exclusive upper bound.
    pub lt: Option<String>,

    /// Inclusive upper bound.
    pub lte: Option<String>,

    /// Iterate from the upper bound down.
    pub reverse: bool,

    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

/// The `KvStore` trait is implemented by the host's key-value engine: an
/// ordered, byte-keyed store with named partitions, atomic batches, and
/// range iterators.
///
/// Each partition holds one tenant's state; a batch is atomic within its
/// partition. Cancellation is by future drop — a dropped call either
/// committed its batch or had no effect.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value at `key`, or `None`.
    async fn get(&self, partition: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace the value at `key`.
    async fn put(&self, partition: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Remove the value at `key`. Removing an absent key is a no-op.
    async fn delete(&self, partition: &str, key: &str) -> Result<()>;

    /// Apply a set of writes atomically within the partition.
    async fn batch(&self, partition: &str, ops: Vec<WriteOp>) -> Result<()>;

    /// Scan the partition in key order within the given bounds.
    async fn range(&self, partition: &str, opts: RangeOpts) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove all keys in the partition.
    async fn purge(&self, partition: &str) -> Result<()>;
}

/// The `EventStream` trait is implemented to provide in-process pub/sub of
/// message lifecycle events. [`crate::event::EventBroker`] is the provided
/// implementation; hosts typically embed it.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Subscribe to a tenant's event stream, filtered.
    async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> Result<Subscriber>;

    /// Emit an event to a tenant's subscribers.
    async fn emit(&self, owner: &str, event: &Event) -> Result<()>;
}

/// The `DidResolver` trait is implemented to resolve a DID to its document,
/// from which signature verification keys are taken.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolve the DID document for `did`.
    async fn resolve(&self, did: &str) -> Result<Document>;
}

/// A resolved DID document, reduced to the material used for signature
/// verification.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The document's DID.
    pub id: String,

    /// Verification methods (public keys) the DID controller asserts.
    pub verification_method: Vec<VerificationMethod>,
}

impl Document {
    /// Find a verification method by its id (typically a JWS `kid`).
    #[must_use]
    pub fn verification_method(&self, id: &str) -> Option<&VerificationMethod> {
        self.verification_method.iter().find(|vm| vm.id == id)
    }
}

/// A single verification method from a DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// The method id, e.g. `did:example:alice#key-0`.
    pub id: String,

    /// The controlling DID.
    pub controller: String,

    /// The method type, e.g. `JsonWebKey2020`.
    #[serde(rename = "type")]
    pub method_type: String,

    /// The public key as a JWK.
    pub public_key_jwk: PublicKeyJwk,
}

/// A public key in JWK form.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyJwk {
    /// Key type, e.g. `OKP`.
    pub kty: String,

    /// Curve, e.g. `Ed25519`.
    pub crv: String,

    /// The public key bytes, base64url (unpadded).
    pub x: String,
}

/// The `KeyStore` trait provides signing keys for locally controlled
/// identifiers. It is used by message builders (and tests), never by
/// handlers.
pub trait KeyStore: Send + Sync {
    /// A keyring scoped to the controller of the signing key.
    ///
    /// # Errors
    ///
    /// Returns an error when no key material exists for `controller`.
    fn keyring(&self, controller: &str) -> Result<impl Keyring>;
}

/// The `Keyring` trait is a signing-capable handle returned by [`KeyStore`].
pub trait Keyring: Signer + Send + Sync {}
