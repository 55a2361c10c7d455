//! # Authorization
//!
//! The signature envelope attached to messages: the author's JWS over the
//! descriptor CID, an optional tenant endorsement (`ownerSignature`), and
//! optional embedded delegated grants conveying authority to sign on another
//! identity's behalf.

use serde::{Deserialize, Serialize};

use crate::jws::{Jws, Signer};
use crate::provider::DidResolver;
use crate::records::DelegatedGrant;
use crate::utils::cid;
use crate::{Result, unexpected};

/// The authorization envelope carried by all messages other than anonymous
/// reads/queries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// The author's (or their delegate's) signature over the message.
    pub signature: Jws,

    /// The tenant's endorsement, allowing a foreign author's write to be
    /// stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_signature: Option<Jws>,

    /// A grant embedded in full, conveying the author's authority to act for
    /// the grantor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_delegated_grant: Option<DelegatedGrant>,

    /// The owner-attributed mirror of `authorDelegatedGrant`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_delegated_grant: Option<DelegatedGrant>,
}

/// The payload common to message signatures.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwsPayload {
    /// The CID of the message's descriptor.
    pub descriptor_cid: String,

    /// The id of the permission grant invoked as authority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_grant_id: Option<String>,

    /// The CID of the embedded delegated grant invoked as authority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_grant_id: Option<String>,

    /// The protocol role invoked for authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_role: Option<String>,
}

impl Authorization {
    /// Deserialize the common signature payload.
    ///
    /// # Errors
    ///
    /// Fails when the payload is not the expected shape.
    pub fn payload(&self) -> Result<JwsPayload> {
        self.signature.payload()
    }

    /// The message signer's DID.
    ///
    /// # Errors
    ///
    /// Fails when the message carries no usable signature.
    pub fn signer(&self) -> Result<String> {
        self.signature.signer_did()
    }

    /// The message's logical author: the delegated grantor when an
    /// author-delegated grant is invoked, the signer otherwise.
    ///
    /// # Errors
    ///
    /// Fails when the message carries no usable signature.
    pub fn author(&self) -> Result<String> {
        self.author_delegated_grant.as_ref().map_or_else(
            || self.signature.signer_did(),
            |grant| grant.authorization.signature.signer_did(),
        )
    }

    /// The owner attributed by `ownerSignature` or `ownerDelegatedGrant`,
    /// if either is present.
    ///
    /// # Errors
    ///
    /// Fails when the present envelope carries no usable signature.
    pub fn owner(&self) -> Result<Option<String>> {
        if let Some(grant) = &self.owner_delegated_grant {
            return Ok(Some(grant.authorization.signature.signer_did()?));
        }
        let Some(signature) = &self.owner_signature else {
            return Ok(None);
        };
        Ok(Some(signature.signer_did()?))
    }

    /// Authenticate the envelope: verify the signature chain and check the
    /// signed `descriptorCid` against the recomputed descriptor CID. Embedded
    /// delegated grants have their own signature chain verified here but are
    /// never persisted.
    ///
    /// # Errors
    ///
    /// Fails with `Unauthorized` on any verification failure and
    /// `BadRequest` on a descriptor CID mismatch.
    pub async fn authenticate<T: Serialize>(
        &self, message: &T, resolver: &impl DidResolver,
    ) -> Result<()> {
        // the source of truth for the descriptor CID
        let value = serde_json::to_value(message)?;
        let Some(descriptor) = value.get("descriptor") else {
            return Err(unexpected!("message has no descriptor"));
        };
        let descriptor_cid = cid::from_value(descriptor)?;

        self.signature.verify(resolver).await?;
        let payload: JwsPayload = self.signature.payload()?;
        if payload.descriptor_cid != descriptor_cid {
            return Err(unexpected!("descriptor CID does not match signed payload"));
        }

        if let Some(owner_signature) = &self.owner_signature {
            owner_signature.verify(resolver).await?;
            let owner_payload: JwsPayload = owner_signature.payload()?;
            if owner_payload.descriptor_cid != descriptor_cid {
                return Err(unexpected!("descriptor CID does not match owner signature"));
            }
        }

        if self.author_delegated_grant.is_some() && self.owner_delegated_grant.is_some() {
            return Err(unexpected!(
                "message carries both author- and owner-delegated grants"
            ));
        }
        if let Some(grant) = &self.author_delegated_grant {
            grant.authenticate(resolver).await?;
        }
        if let Some(grant) = &self.owner_delegated_grant {
            grant.authenticate(resolver).await?;
        }

        Ok(())
    }
}

/// Builds an [`Authorization`] for messages using the common signature
/// payload.
#[derive(Debug, Default)]
pub struct AuthorizationBuilder {
    descriptor_cid: Option<String>,
    permission_grant_id: Option<String>,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
}

impl AuthorizationBuilder {
    /// Returns a new [`AuthorizationBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CID of the descriptor being signed.
    #[must_use]
    pub fn descriptor_cid(mut self, descriptor_cid: impl Into<String>) -> Self {
        self.descriptor_cid = Some(descriptor_cid.into());
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Invoke a protocol role.
    #[must_use]
    pub fn protocol_role(mut self, protocol_role: impl Into<String>) -> Self {
        self.protocol_role = Some(protocol_role.into());
        self
    }

    /// Embed a delegated grant as signing authority.
    #[must_use]
    pub fn delegated_grant(mut self, delegated_grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(delegated_grant);
        self
    }

    /// Sign and assemble the authorization.
    ///
    /// # Errors
    ///
    /// Fails when no descriptor CID has been set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Authorization> {
        let descriptor_cid =
            self.descriptor_cid.ok_or_else(|| unexpected!("descriptor CID not set"))?;
        let delegated_grant_id = match &self.delegated_grant {
            Some(grant) => Some(grant.cid()?),
            None => None,
        };

        let payload = JwsPayload {
            descriptor_cid,
            permission_grant_id: self.permission_grant_id,
            delegated_grant_id,
            protocol_role: self.protocol_role,
        };
        let signature = Jws::create(&payload, signer).await?;

        Ok(Authorization {
            signature,
            owner_signature: None,
            author_delegated_grant: self.delegated_grant,
            owner_delegated_grant: None,
        })
    }
}