//! # Grants
//!
//! Permission grants: scoped capabilities conveyed from a grantor to a
//! grantee as records under the built-in permissions protocol. A grant is
//! referenced by its record id; revocation is a child record of the grant.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authorization::JwsPayload;
use crate::endpoint::Message;
use crate::jws::Signer;
use crate::protocols::PROTOCOL_URI;
use crate::records::{
    Data, DelegatedGrant, RecordsFilter, Write, WriteBuilder, WriteProtocol,
};
use crate::store::{MessageStore, RecordsQueryBuilder};
use crate::{Descriptor, Interface, Method, Result, forbidden, unexpected};

/// A permission grant, unpacked from its grant record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Grant {
    /// The grant record's id, used to reference the grant.
    pub id: String,

    /// The CID of the grant message, as recorded by delegated signature
    /// payloads.
    pub message_cid: String,

    /// The DID that conveyed the grant.
    pub grantor: String,

    /// The DID the grant was conveyed to.
    pub grantee: String,

    /// When the grant became active.
    pub date_granted: DateTime<Utc>,

    /// The grant's data payload.
    pub data: GrantData,
}

/// The data payload of a grant record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantData {
    /// When the grant stops being active.
    pub date_expires: DateTime<Utc>,

    /// The permission request being granted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// A human-readable description of the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the grantee may act *as* the grantor for in-scope operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated: Option<bool>,

    /// The operations the grant covers.
    pub scope: Scope,

    /// Conditions the grantee must meet when using the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// The data payload of a permission request record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// A human-readable description of the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether a delegated grant is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated: Option<bool>,

    /// The scope requested.
    pub scope: Scope,

    /// Conditions the requester is prepared to meet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// The data payload of a revocation record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationData {
    /// A human-readable reason for the revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The scope of a permission grant, tagged by interface.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "interface")]
pub enum Scope {
    /// The grant covers `Records` operations.
    Records {
        /// The method granted.
        method: Method,

        /// The protocol the grant is restricted to.
        protocol: String,

        /// Optional narrowing to a context or protocol path.
        #[serde(flatten)]
        #[serde(skip_serializing_if = "Option::is_none")]
        options: Option<RecordsScope>,
    },

    /// The grant covers `Messages` operations.
    Messages {
        /// The method granted.
        method: Method,

        /// The protocol the grant is restricted to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },

    /// The grant covers `Protocols` operations.
    Protocols {
        /// The method granted.
        method: Method,

        /// The protocol the grant is restricted to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
    },
}

impl Default for Scope {
    fn default() -> Self {
        Self::Records {
            method: Method::default(),
            protocol: String::new(),
            options: None,
        }
    }
}

impl Scope {
    /// The interface the scope covers.
    #[must_use]
    pub const fn interface(&self) -> Interface {
        match self {
            Self::Records { .. } => Interface::Records,
            Self::Messages { .. } => Interface::Messages,
            Self::Protocols { .. } => Interface::Protocols,
        }
    }

    /// The method the scope covers.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Records { method, .. }
            | Self::Messages { method, .. }
            | Self::Protocols { method, .. } => method.clone(),
        }
    }

    /// The protocol the scope is restricted to, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        match self {
            Self::Records { protocol, .. } => Some(protocol),
            Self::Messages { protocol, .. } | Self::Protocols { protocol, .. } => {
                protocol.as_deref()
            }
        }
    }
}

/// Narrowing options for a `Records` scope.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum RecordsScope {
    /// Restrict to a context and its descendants.
    ContextId(String),

    /// Restrict to one protocol path.
    ProtocolPath(String),
}

/// Conditions that must be met when a grant is used.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    /// Whether messages written under the grant must, or must not, be
    /// published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<Publication>,
}

/// Publication requirement named by grant conditions.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Publication {
    /// The written message must be published.
    #[default]
    Required,

    /// The written message must not be published.
    Prohibited,
}

/// Fetch the grant referenced by `grant_id` from the tenant's store.
///
/// # Errors
///
/// Fails with `Forbidden` when no such grant record exists.
pub async fn fetch_grant(owner: &str, grant_id: &str, store: &impl MessageStore) -> Result<Grant> {
    let query = RecordsQueryBuilder::new()
        .add_filter(RecordsFilter::new().record_id(grant_id))
        .build();
    let (entries, _) = store.query(owner, &query).await?;

    let Some(write) = entries.first().and_then(|entry| entry.as_write()) else {
        return Err(forbidden!("no grant found for {grant_id}"));
    };
    Grant::from_write(write)
}

/// Extract the permission scope carried by a record under the permissions
/// protocol (request, grant, or the revoked grant's scope).
///
/// # Errors
///
/// Fails when the record carries no scoped payload.
pub fn fetch_scope(write: &Write) -> Result<Scope> {
    #[derive(Deserialize)]
    struct Scoped {
        scope: Scope,
    }

    let Some(encoded) = &write.encoded_data else {
        return Err(forbidden!("permission record has no data"));
    };
    let bytes = Base64UrlUnpadded::decode_vec(encoded)?;
    let scoped: Scoped = serde_json::from_slice(&bytes)
        .map_err(|e| forbidden!("permission record carries no scope: {e}"))?;
    Ok(scoped.scope)
}

impl TryFrom<&DelegatedGrant> for Grant {
    type Error = crate::Error;

    fn try_from(delegated: &DelegatedGrant) -> Result<Self> {
        Self::from_write(&Write::from(delegated))
    }
}

impl Grant {
    /// Unpack a grant from its grant record.
    ///
    /// # Errors
    ///
    /// Fails when the record is not a well-formed grant.
    pub fn from_write(write: &Write) -> Result<Self> {
        if write.descriptor.protocol.as_deref() != Some(PROTOCOL_URI)
            || write.descriptor.protocol_path.as_deref() != Some("grant")
        {
            return Err(forbidden!("record is not a permission grant"));
        }
        let Some(encoded) = &write.encoded_data else {
            return Err(forbidden!("grant record has no data"));
        };
        let bytes = Base64UrlUnpadded::decode_vec(encoded)?;
        let data: GrantData = serde_json::from_slice(&bytes)
            .map_err(|e| forbidden!("invalid grant data: {e}"))?;

        Ok(Self {
            id: write.record_id.clone(),
            message_cid: Message::cid(write)?,
            grantor: write.authorization.signer()?,
            grantee: write.descriptor.recipient.clone().unwrap_or_default(),
            date_granted: write.descriptor.base.message_timestamp,
            data,
        })
    }

    /// Base grant validation: parties, active window, revocation, and the
    /// incoming message's interface/method against the scope.
    ///
    /// `owner` names the tenant whose store revocations are looked up in.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when any check does not hold.
    pub async fn verify(
        &self, owner: &str, grantor: &str, grantee: &str, descriptor: &Descriptor,
        store: &impl MessageStore,
    ) -> Result<()> {
        if self.grantee != grantee {
            return Err(forbidden!("grant not granted to grantee"));
        }
        if self.grantor != grantor {
            return Err(forbidden!("grant not granted by grantor"));
        }

        if descriptor.message_timestamp < self.date_granted {
            return Err(forbidden!("grant is not yet active"));
        }
        if descriptor.message_timestamp >= self.data.date_expires {
            return Err(forbidden!("grant has expired"));
        }

        self.verify_active(owner, descriptor.message_timestamp, store).await?;

        if self.data.scope.interface() != descriptor.interface {
            return Err(forbidden!("grant scope interface does not match message"));
        }
        if self.data.scope.method() != descriptor.method {
            return Err(forbidden!("grant scope method does not match message"));
        }

        Ok(())
    }

    /// Delegated-grant validation: the embedded grant must be delegated,
    /// referenced by the signature payload, and granted to the signer; the
    /// logical author must be the grantor.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when any check does not hold.
    pub async fn verify_delegation(
        &self, owner: &str, author: &str, signer: &str, payload: &JwsPayload,
        descriptor: &Descriptor, store: &impl MessageStore,
    ) -> Result<()> {
        if !self.data.delegated.unwrap_or_default() {
            return Err(forbidden!("grant is not a delegated grant"));
        }
        if self.grantee != signer {
            return Err(forbidden!("delegated grant not granted to signer"));
        }
        if payload.delegated_grant_id.as_deref() != Some(self.message_cid.as_str()) {
            return Err(forbidden!("grant CID does not match signed `delegatedGrantId`"));
        }

        self.verify(owner, author, signer, descriptor, store).await
    }

    /// Records-specific scope check: the target write must lie within the
    /// grant's protocol (and context/path narrowing, when present).
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when the write is out of scope.
    pub fn verify_records_scope(&self, write: &Write) -> Result<()> {
        let Scope::Records { protocol, options, .. } = &self.data.scope else {
            return Err(forbidden!("grant scope does not cover records"));
        };

        if Some(protocol.as_str()) != write.descriptor.protocol.as_deref() {
            return Err(forbidden!("grant scope protocol does not match record"));
        }

        match options {
            Some(RecordsScope::ContextId(scope_context)) => {
                let context_id = write.context_id.clone().unwrap_or_default();
                if !context_id.starts_with(scope_context.as_str()) {
                    return Err(forbidden!("grant scope context does not match record"));
                }
            }
            Some(RecordsScope::ProtocolPath(scope_path)) => {
                if Some(scope_path.as_str()) != write.descriptor.protocol_path.as_deref() {
                    return Err(forbidden!("grant scope protocol path does not match record"));
                }
            }
            None => {}
        }

        Ok(())
    }

    /// Verify grant conditions against the written record.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when a condition is not met.
    pub fn verify_conditions(&self, write: &Write) -> Result<()> {
        let Some(conditions) = &self.data.conditions else {
            return Ok(());
        };
        let published = write.descriptor.published.unwrap_or_default();

        match conditions.publication {
            Some(Publication::Required) if !published => {
                Err(forbidden!("grant requires the record to be published"))
            }
            Some(Publication::Prohibited) if published => {
                Err(forbidden!("grant prohibits publishing the record"))
            }
            _ => Ok(()),
        }
    }

    // A revocation record with a timestamp at or before the incoming
    // message's invalidates the grant.
    async fn verify_active(
        &self, owner: &str, timestamp: DateTime<Utc>, store: &impl MessageStore,
    ) -> Result<()> {
        let query = RecordsQueryBuilder::new()
            .add_filter(
                RecordsFilter::new()
                    .parent_id(&self.id)
                    .protocol(PROTOCOL_URI)
                    .protocol_path("grant/revocation"),
            )
            .build();
        let (entries, _) = store.query(owner, &query).await?;

        for entry in entries {
            if entry.descriptor().message_timestamp <= timestamp {
                return Err(forbidden!("grant has been revoked"));
            }
        }

        Ok(())
    }
}

/// Builds the grant record conveying a permission from signer to grantee.
#[derive(Clone, Debug, Default)]
pub struct GrantBuilder {
    granted_to: Option<String>,
    date_expires: Option<DateTime<Utc>>,
    request_id: Option<String>,
    description: Option<String>,
    delegated: Option<bool>,
    scope: Option<Scope>,
    conditions: Option<Conditions>,
}

impl GrantBuilder {
    /// Returns a new [`GrantBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The DID the grant is conveyed to.
    #[must_use]
    pub fn granted_to(mut self, granted_to: impl Into<String>) -> Self {
        self.granted_to = Some(granted_to.into());
        self
    }

    /// When the grant expires. Defaults to 24 hours from now.
    #[must_use]
    pub const fn date_expires(mut self, date_expires: DateTime<Utc>) -> Self {
        self.date_expires = Some(date_expires);
        self
    }

    /// The permission request being granted.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// A human-readable description of the grant.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Convey the grant as delegated: the grantee may act as the grantor.
    #[must_use]
    pub const fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = Some(delegated);
        self
    }

    /// The operations the grant covers.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Conditions the grantee must meet.
    #[must_use]
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Build and sign the grant record.
    ///
    /// # Errors
    ///
    /// Fails when required properties are missing or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Write> {
        let Some(granted_to) = self.granted_to else {
            return Err(unexpected!("`granted_to` is not set"));
        };
        let Some(scope) = self.scope else {
            return Err(unexpected!("grant scope is not set"));
        };

        let data = GrantData {
            date_expires: self
                .date_expires
                .unwrap_or_else(|| crate::utils::now_micros() + chrono::Duration::hours(24)),
            request_id: self.request_id,
            description: self.description,
            delegated: self.delegated,
            scope,
            conditions: self.conditions,
        };

        WriteBuilder::new()
            .protocol(WriteProtocol {
                protocol: PROTOCOL_URI.to_string(),
                protocol_path: "grant".to_string(),
            })
            .recipient(granted_to)
            .data(Data::from(serde_json::to_vec(&data)?))
            .build(signer)
            .await
    }
}

/// Builds a permission request record.
#[derive(Clone, Debug, Default)]
pub struct RequestBuilder {
    description: Option<String>,
    delegated: Option<bool>,
    scope: Option<Scope>,
    conditions: Option<Conditions>,
}

impl RequestBuilder {
    /// Returns a new [`RequestBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A human-readable description of the request.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Request a delegated grant.
    #[must_use]
    pub const fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = Some(delegated);
        self
    }

    /// The scope requested.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Conditions the requester is prepared to meet.
    #[must_use]
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Build and sign the request record.
    ///
    /// # Errors
    ///
    /// Fails when the scope is missing or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Write> {
        let Some(scope) = self.scope else {
            return Err(unexpected!("request scope is not set"));
        };

        let data = RequestData {
            description: self.description,
            delegated: self.delegated,
            scope,
            conditions: self.conditions,
        };

        WriteBuilder::new()
            .protocol(WriteProtocol {
                protocol: PROTOCOL_URI.to_string(),
                protocol_path: "request".to_string(),
            })
            .data(Data::from(serde_json::to_vec(&data)?))
            .build(signer)
            .await
    }
}

/// Builds the revocation record for a previously conveyed grant.
#[derive(Clone, Debug, Default)]
pub struct RevocationBuilder {
    grant: Option<Write>,
    description: Option<String>,
}

impl RevocationBuilder {
    /// Returns a new [`RevocationBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The grant record being revoked.
    #[must_use]
    pub fn grant(mut self, grant: Write) -> Self {
        self.grant = Some(grant);
        self
    }

    /// A human-readable reason for the revocation.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Build and sign the revocation record.
    ///
    /// # Errors
    ///
    /// Fails when no grant is set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Write> {
        let Some(grant) = self.grant else {
            return Err(unexpected!("grant record is not set"));
        };
        let Some(context_id) = &grant.context_id else {
            return Err(unexpected!("grant record has no `contextId`"));
        };

        let data = RevocationData {
            description: self.description,
        };

        WriteBuilder::new()
            .protocol(WriteProtocol {
                protocol: PROTOCOL_URI.to_string(),
                protocol_path: "grant/revocation".to_string(),
            })
            .parent_context_id(context_id)
            .data(Data::from(serde_json::to_vec(&data)?))
            .build(signer)
            .await
    }
}
