//! # Records Write
//!
//! The records write endpoint handles `RecordsWrite` messages — requests to
//! create or update a record. Ingestion authenticates the envelope,
//! authorizes against owner/grant/protocol authority, resolves conflicts
//! against the record's existing messages, persists data and message, then
//! logs and emits the event.

use std::collections::HashMap;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authorization::{Authorization, JwsPayload};
use crate::data::{DataStream, MAX_ENCODED_SIZE};
use crate::endpoint::{Message, Reply, Status};
use crate::grants::{self, Grant};
use crate::jws::{Jws, Signer};
use crate::provider::{EventStream, Provider};
use crate::records::{RecordsFilter, protocol};
use crate::store::{
    DataStore, Entry, EventLog, MessageStore, RecordsQueryBuilder,
};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, sync, unexpected, utils};

/// Handle — or process — a [`Write`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails, an
/// integrity check fails, or the write loses conflict resolution against the
/// record's current state.
pub async fn handle(
    owner: &str, write: Write, provider: &impl Provider,
) -> Result<Reply<WriteReply>> {
    let mut write = write;
    write.validate_integrity()?;

    // writes to the same record serialize through conflict resolution
    let _guard = sync::lock(owner, &write.record_id).await;

    // fetch every existing message for the record, tombstone included
    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(true)
        .add_filter(RecordsFilter::new().record_id(&write.record_id))
        .build();
    let (existing, _) = MessageStore::query(provider, owner, &query).await?;

    let initial = initial_entry(&existing)?;
    if let Some(initial) = &initial {
        write.verify_immutable(initial)?;
    } else if !write.is_initial()? {
        return Err(unexpected!("initial write not found"));
    }

    write.authorize(owner, provider).await?;

    if write.descriptor.protocol.is_some() {
        protocol::verify_integrity(owner, &write, provider).await?;
    }

    // conflict resolution against the current newest message
    let incoming_cid = write.cid()?;
    let incoming_key = (write.descriptor.base.message_timestamp, incoming_cid.clone());
    let mut newest: Option<(DateTime<Utc>, String)> = None;
    for entry in &existing {
        let key = (entry.descriptor().message_timestamp, entry.cid()?);
        if newest.as_ref().is_none_or(|n| key > *n) {
            newest = Some(key);
        }
    }
    if let Some(newest) = &newest {
        // same message replayed: idempotent accept
        if *newest == incoming_key {
            return Ok(accepted());
        }
        if *newest > incoming_key {
            if incoming_key.0 < newest.0 {
                return Err(Error::Conflict("a more recent update exists".to_string()));
            }
            return Err(Error::Conflict("an update with a larger CID already exists".to_string()));
        }
    }

    // a tombstoned record cannot be resurrected by a newer write
    if existing.iter().any(|entry| entry.as_delete().is_some()) {
        return Err(unexpected!("record has been deleted"));
    }

    // an update without data inherits the inline data it references
    if write.data_stream.is_none() && write.encoded_data.is_none() {
        write.encoded_data = existing
            .iter()
            .filter_map(Entry::as_write)
            .find(|prior| {
                prior.descriptor.data_cid == write.descriptor.data_cid
                    && prior.encoded_data.is_some()
            })
            .and_then(|prior| prior.encoded_data.clone());
    }

    write.store_data(owner, &existing, provider).await?;

    // persist as the record's latest base state
    let mut entry = Entry::from(&write);
    entry.add_index("latestBase", true);
    MessageStore::put(provider, owner, &entry).await?;
    EventLog::append(provider, owner, &entry).await?;

    // retire predecessors: the initial write is retained (re-indexed out of
    // latest state); all other older messages are removed outright
    for prior in &existing {
        let prior_cid = prior.cid()?;
        if prior_cid == incoming_cid {
            continue;
        }

        if let Some(prior_write) = prior.as_write() {
            if prior_write.descriptor.data_cid != write.descriptor.data_cid {
                DataStore::delete(
                    provider,
                    owner,
                    &prior_write.record_id,
                    &prior_write.descriptor.data_cid,
                )
                .await?;
            }

            if prior_write.is_initial()? {
                let mut archived = Entry::from(prior_write);
                archived.add_index("latestBase", false);
                MessageStore::put(provider, owner, &archived).await?;
                continue;
            }
        }

        MessageStore::delete(provider, owner, &prior_cid).await?;
        EventLog::delete(provider, owner, &prior_cid).await?;
    }

    EventStream::emit(provider, owner, &entry).await?;

    Ok(accepted())
}

fn accepted() -> Reply<WriteReply> {
    Reply {
        status: Status {
            code: StatusCode::ACCEPTED.as_u16(),
            detail: None,
        },
        body: None,
    }
}

// The initial write among a record's existing messages, if any.
fn initial_entry(existing: &[Entry]) -> Result<Option<Write>> {
    for entry in existing {
        if let Some(write) = entry.as_write() {
            if write.is_initial()? {
                return Ok(Some(write.clone()));
            }
        }
    }
    Ok(None)
}

/// Fetch a record's initial write from the store.
///
/// # Errors
///
/// Surfaces store failures.
pub(crate) async fn initial_write(
    owner: &str, record_id: &str, store: &impl MessageStore,
) -> Result<Option<Write>> {
    let query = RecordsQueryBuilder::new()
        .include_archived(true)
        .add_filter(RecordsFilter::new().record_id(record_id))
        .build();
    let (entries, _) = store.query(owner, &query).await?;
    initial_entry(&entries)
}

/// The [`Write`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    /// The record's deterministic id.
    pub record_id: String,

    /// The record's context, for protocol records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// The write descriptor.
    pub descriptor: WriteDescriptor,

    /// The message authorization.
    pub authorization: Authorization,

    /// An attester's signature over the descriptor CID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Jws>,

    /// Encryption settings for the record data, carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<Value>,

    /// Record data inlined when it fits under [`MAX_ENCODED_SIZE`],
    /// base64url (unpadded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<String>,

    /// The data stream accompanying the message, never serialized.
    #[serde(skip)]
    pub data_stream: Option<DataStream>,
}

/// The [`Write`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The record's intended recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// The protocol the record belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// The record's path within the protocol's structure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_path: Option<String>,

    /// The record's schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// The id of the record's parent, for nested protocol records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// The CID of the record data.
    pub data_cid: String,

    /// The size of the record data in bytes.
    pub data_size: u64,

    /// The MIME type of the record data.
    pub data_format: String,

    /// When the record was created; immutable across updates.
    pub date_created: DateTime<Utc>,

    /// Whether the record is published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,

    /// When the record was published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateTime<Utc>>,
}

/// The payload signed by a `RecordsWrite` author.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePayload {
    /// The common signature payload.
    #[serde(flatten)]
    pub base: JwsPayload,

    /// The record id being signed over.
    pub record_id: String,

    /// The context id being signed over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// The CID of the attestation property, when attested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_cid: Option<String>,

    /// The CID of the encryption property, when encrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_cid: Option<String>,
}

/// The payload signed by an attester.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    /// The CID of the descriptor being attested.
    pub descriptor_cid: String,
}

/// A permission grant embedded in full within a message's authorization.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedGrant {
    /// The grant record's id.
    pub record_id: String,

    /// The grant record's context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// The grant record's descriptor.
    pub descriptor: Box<WriteDescriptor>,

    /// The grantor's authorization of the grant.
    pub authorization: Box<Authorization>,

    /// The grant's data payload, base64url (unpadded).
    pub encoded_data: String,
}

impl DelegatedGrant {
    /// Compute the CID of the grant message.
    ///
    /// # Errors
    ///
    /// Fails when the grant cannot be canonically encoded.
    pub fn cid(&self) -> Result<String> {
        Write::from(self).cid()
    }

    /// Unpack the embedded grant.
    ///
    /// # Errors
    ///
    /// Fails when the grant's data payload is malformed.
    pub fn to_grant(&self) -> Result<Grant> {
        self.try_into()
    }

    /// Verify the embedded grant's own signature chain.
    pub(crate) async fn authenticate(
        &self, resolver: &impl crate::provider::DidResolver,
    ) -> Result<()> {
        Box::pin(self.authorization.authenticate(&Write::from(self), resolver)).await
    }
}

impl From<&DelegatedGrant> for Write {
    fn from(grant: &DelegatedGrant) -> Self {
        Self {
            record_id: grant.record_id.clone(),
            context_id: grant.context_id.clone(),
            descriptor: (*grant.descriptor).clone(),
            authorization: (*grant.authorization).clone(),
            attestation: None,
            encryption: None,
            encoded_data: Some(grant.encoded_data.clone()),
            data_stream: None,
        }
    }
}

impl TryFrom<&Write> for DelegatedGrant {
    type Error = crate::Error;

    fn try_from(write: &Write) -> Result<Self> {
        let Some(encoded_data) = write.encoded_data.clone() else {
            return Err(unexpected!("grant record has no data"));
        };
        Ok(Self {
            record_id: write.record_id.clone(),
            context_id: write.context_id.clone(),
            descriptor: Box::new(write.descriptor.clone()),
            authorization: Box::new(write.authorization.clone()),
            encoded_data,
        })
    }
}

/// Compute a record's deterministic entry id: the CID of the initial write's
/// descriptor extended with the author's DID.
///
/// # Errors
///
/// Fails when the descriptor cannot be canonically encoded.
pub fn entry_id(descriptor: &WriteDescriptor, author: &str) -> Result<String> {
    let mut value = serde_json::to_value(descriptor)?;
    let Some(map) = value.as_object_mut() else {
        return Err(unexpected!("descriptor must serialize to an object"));
    };
    map.insert("author".to_string(), Value::String(author.to_string()));
    cid::from_value(&value)
}

impl Message for Write {
    type Reply = WriteReply;

    fn cid(&self) -> Result<String> {
        // the message CID is computed with inline data detached
        let mut detached = self.clone();
        detached.encoded_data = None;
        cid::from_value(&detached)
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor.base
    }

    fn authorization(&self) -> Option<&Authorization> {
        Some(&self.authorization)
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// [`WriteReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WriteReply;

impl TryFrom<Entry> for Write {
    type Error = crate::Error;

    fn try_from(entry: Entry) -> Result<Self> {
        entry.as_write().cloned().ok_or_else(|| unexpected!("expected `RecordsWrite` message"))
    }
}

impl TryFrom<&Entry> for Write {
    type Error = crate::Error;

    fn try_from(entry: &Entry) -> Result<Self> {
        entry.as_write().cloned().ok_or_else(|| unexpected!("expected `RecordsWrite` message"))
    }
}

impl Write {
    /// Whether this message is its record's initial write.
    ///
    /// # Errors
    ///
    /// Fails when the entry id cannot be computed.
    pub fn is_initial(&self) -> Result<bool> {
        let author = self.authorization.author()?;
        Ok(entry_id(&self.descriptor, &author)? == self.record_id)
    }

    /// Build the message's index properties.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, Value> {
        let mut indexes = HashMap::new();
        let descriptor = &self.descriptor;

        indexes.insert("interface".to_string(), Value::String(Interface::Records.to_string()));
        indexes.insert("method".to_string(), Value::String(Method::Write.to_string()));
        indexes.insert("recordId".to_string(), Value::String(self.record_id.clone()));
        indexes.insert(
            "messageTimestamp".to_string(),
            Value::String(utils::format_date(&descriptor.base.message_timestamp)),
        );
        indexes.insert(
            "dateCreated".to_string(),
            Value::String(utils::format_date(&descriptor.date_created)),
        );
        indexes.insert(
            "dateUpdated".to_string(),
            Value::String(utils::format_date(&descriptor.base.message_timestamp)),
        );
        indexes.insert(
            "author".to_string(),
            Value::String(self.authorization.author().unwrap_or_default()),
        );
        indexes.insert("dataCid".to_string(), Value::String(descriptor.data_cid.clone()));
        indexes.insert(
            "dataSize".to_string(),
            Value::Number(i64::try_from(descriptor.data_size).unwrap_or(i64::MAX).into()),
        );
        indexes.insert("dataFormat".to_string(), Value::String(descriptor.data_format.clone()));
        indexes
            .insert("published".to_string(), Value::Bool(descriptor.published.unwrap_or_default()));
        indexes.insert("initial".to_string(), Value::Bool(self.is_initial().unwrap_or_default()));

        if let Some(recipient) = &descriptor.recipient {
            indexes.insert("recipient".to_string(), Value::String(recipient.clone()));
        }
        if let Some(protocol) = &descriptor.protocol {
            indexes.insert("protocol".to_string(), Value::String(protocol.clone()));
        }
        if let Some(protocol_path) = &descriptor.protocol_path {
            indexes.insert("protocolPath".to_string(), Value::String(protocol_path.clone()));
        }
        if let Some(parent_id) = &descriptor.parent_id {
            indexes.insert("parentId".to_string(), Value::String(parent_id.clone()));
        }
        if let Some(context_id) = &self.context_id {
            indexes.insert("contextId".to_string(), Value::String(context_id.clone()));
        }
        if let Some(schema) = &descriptor.schema {
            indexes.insert("schema".to_string(), Value::String(schema.clone()));
        }
        if let Some(date_published) = &descriptor.date_published {
            indexes.insert(
                "datePublished".to_string(),
                Value::String(utils::format_date(date_published)),
            );
        }
        if let Some(attestation) = &self.attestation {
            indexes.insert(
                "attester".to_string(),
                Value::String(attestation.signer_did().unwrap_or_default()),
            );
        }

        indexes
    }

    /// Endorse a foreign author's write as the tenant, allowing it to be
    /// stored.
    ///
    /// # Errors
    ///
    /// Fails when signing fails.
    pub async fn sign_as_owner(&mut self, signer: &impl Signer) -> Result<()> {
        let payload = JwsPayload {
            descriptor_cid: cid::from_value(&serde_json::to_value(&self.descriptor)?)?,
            ..JwsPayload::default()
        };
        self.authorization.owner_signature = Some(Jws::create(&payload, signer).await?);
        Ok(())
    }

    // Structural checks over the signature payload and the descriptor's
    // co-requirements.
    fn validate_integrity(&self) -> Result<()> {
        let descriptor = &self.descriptor;

        if descriptor.protocol.is_some() != descriptor.protocol_path.is_some() {
            return Err(unexpected!("`protocol` and `protocolPath` are co-required"));
        }
        if descriptor.parent_id.is_some() && self.context_id.is_none() {
            return Err(unexpected!("`parentId` requires `contextId`"));
        }
        if descriptor.published.unwrap_or_default() && descriptor.date_published.is_none() {
            return Err(unexpected!("published records must carry `datePublished`"));
        }
        if let Some(protocol) = &descriptor.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &descriptor.schema {
            utils::uri::validate(schema)?;
        }

        let payload: SignaturePayload = self.authorization.signature.payload()?;
        if payload.record_id != self.record_id {
            return Err(unexpected!("signed `recordId` does not match message"));
        }
        if payload.context_id != self.context_id {
            return Err(unexpected!("signed `contextId` does not match message"));
        }

        match (&self.attestation, &payload.attestation_cid) {
            (None, None) => {}
            (Some(attestation), Some(attestation_cid)) => {
                if attestation_cid != &cid::from_value(attestation)? {
                    return Err(unexpected!("signed `attestationCid` does not match attestation"));
                }
                let attested: AttestationPayload = attestation.payload()?;
                if attested.descriptor_cid != payload.base.descriptor_cid {
                    return Err(unexpected!("attestation signs a different descriptor"));
                }
            }
            _ => return Err(unexpected!("attestation and signed `attestationCid` must agree")),
        }

        match (&self.encryption, &payload.encryption_cid) {
            (None, None) => {}
            (Some(encryption), Some(encryption_cid)) => {
                if encryption_cid != &cid::from_value(encryption)? {
                    return Err(unexpected!("signed `encryptionCid` does not match encryption"));
                }
            }
            _ => return Err(unexpected!("encryption and signed `encryptionCid` must agree")),
        }

        Ok(())
    }

    // Properties immutable across a record's writes must match the initial
    // write.
    fn verify_immutable(&self, initial: &Self) -> Result<()> {
        let descriptor = &self.descriptor;
        let first = &initial.descriptor;

        if descriptor.date_created != first.date_created
            || descriptor.schema != first.schema
            || descriptor.protocol != first.protocol
            || descriptor.protocol_path != first.protocol_path
            || descriptor.recipient != first.recipient
            || descriptor.parent_id != first.parent_id
        {
            return Err(unexpected!("immutable properties do not match initial write"));
        }
        if self.context_id != initial.context_id {
            return Err(unexpected!("`contextId` does not match initial write"));
        }
        Ok(())
    }

    // Authorize the write: tenant, tenant endorsement, permission grant, or
    // protocol rules.
    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        let authzn = &self.authorization;
        let author = authzn.author()?;

        // authorize the delegate who signed on the author's behalf
        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            let grant = delegated_grant.to_grant()?;
            grant
                .verify_delegation(
                    owner,
                    &author,
                    &authzn.signer()?,
                    &authzn.payload()?,
                    &self.descriptor.base,
                    provider,
                )
                .await?;
            grant.verify_records_scope(self)?;
        }

        if author == owner {
            return Ok(());
        }

        // a tenant endorsement admits a foreign author's write
        if let Some(owner_did) = authzn.owner()? {
            if owner_did == owner {
                return Ok(());
            }
            return Err(forbidden!("owner signature is not the tenant's"));
        }

        if let Some(grant_id) = &authzn.payload()?.permission_grant_id {
            let grant = grants::fetch_grant(owner, grant_id, provider).await?;
            grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;
            grant.verify_records_scope(self)?;
            grant.verify_conditions(self)?;
            return Ok(());
        }

        if self.descriptor.protocol.is_some() {
            return protocol::permit_write(owner, self, provider).await;
        }

        Err(forbidden!("write failed authorization"))
    }

    // Verify and persist the message's data: inline, streamed, or already
    // present from a prior write.
    async fn store_data(
        &self, owner: &str, existing: &[Entry], provider: &impl Provider,
    ) -> Result<()> {
        let descriptor = &self.descriptor;

        if let Some(encoded) = &self.encoded_data {
            let bytes = Base64UrlUnpadded::decode_vec(encoded)?;
            if bytes.len() > MAX_ENCODED_SIZE {
                return Err(unexpected!("inline data exceeds the encoding threshold"));
            }
            if cid::from_data(&bytes) != descriptor.data_cid {
                return Err(unexpected!("actual data CID does not match descriptor `dataCid`"));
            }
            if bytes.len() as u64 != descriptor.data_size {
                return Err(unexpected!("actual data size does not match descriptor `dataSize`"));
            }
            return Ok(());
        }

        if let Some(stream) = &self.data_stream {
            let result = DataStore::put(provider, owner, &self.record_id, stream.clone()).await?;
            if result.data_cid != descriptor.data_cid {
                // remove the blob stored under the recomputed CID
                DataStore::delete(provider, owner, &self.record_id, &result.data_cid).await?;
                return Err(unexpected!("actual data CID does not match descriptor `dataCid`"));
            }
            if result.data_size as u64 != descriptor.data_size {
                DataStore::delete(provider, owner, &self.record_id, &result.data_cid).await?;
                return Err(unexpected!("actual data size does not match descriptor `dataSize`"));
            }
            return Ok(());
        }

        // without a stream the data must already exist for this record
        let referenced = existing.iter().any(|entry| {
            entry.as_write().is_some_and(|write| write.descriptor.data_cid == descriptor.data_cid)
        });
        if !referenced {
            return Err(unexpected!("no data stream and no existing data for `dataCid`"));
        }
        if DataStore::get(provider, owner, &self.record_id, &descriptor.data_cid).await?.is_none() {
            return Err(unexpected!("data referenced by `dataCid` has been reclaimed"));
        }

        Ok(())
    }
}

/// Record data supplied to the [`WriteBuilder`].
#[derive(Clone, Debug)]
pub enum Data {
    /// A readable stream of bytes to be stored with the write.
    Stream(DataStream),

    /// A reference to data already stored for the record.
    Cid {
        /// The CID of the existing data.
        data_cid: String,

        /// The size of the existing data in bytes.
        data_size: u64,
    },
}

impl Default for Data {
    fn default() -> Self {
        Self::Stream(DataStream::default())
    }
}

impl From<Vec<u8>> for Data {
    fn from(data: Vec<u8>) -> Self {
        Self::Stream(DataStream::from(data))
    }
}

/// The protocol placement of a record being written.
#[derive(Clone, Debug, Default)]
pub struct WriteProtocol {
    /// The (normalized) protocol URL.
    pub protocol: String,

    /// The record's path within the protocol structure.
    pub protocol_path: String,
}

/// Builds a [`Write`] message.
#[derive(Clone, Debug, Default)]
pub struct WriteBuilder {
    message_timestamp: DateTime<Utc>,
    date_created: DateTime<Utc>,
    recipient: Option<String>,
    protocol: Option<WriteProtocol>,
    schema: Option<String>,
    parent_context_id: Option<String>,
    data: Data,
    data_format: Option<String>,
    published: Option<bool>,
    date_published: Option<DateTime<Utc>>,
    protocol_role: Option<String>,
    permission_grant_id: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    encryption: Option<Value>,
    existing: Option<Write>,
}

impl WriteBuilder {
    /// Returns a new [`WriteBuilder`] for a record's initial write.
    #[must_use]
    pub fn new() -> Self {
        let now = utils::now_micros();
        Self {
            message_timestamp: now,
            date_created: now,
            ..Self::default()
        }
    }

    /// Returns a [`WriteBuilder`] for updating an existing record: immutable
    /// properties carry over from the prior write, as does its data unless
    /// new data is supplied.
    #[must_use]
    pub fn from(existing: Write) -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            data: Data::Cid {
                data_cid: existing.descriptor.data_cid.clone(),
                data_size: existing.descriptor.data_size,
            },
            existing: Some(existing),
            ..Self::default()
        }
    }

    /// Override the message timestamp.
    #[must_use]
    pub fn message_timestamp(mut self, message_timestamp: DateTime<Utc>) -> Self {
        self.message_timestamp = message_timestamp;
        self
    }

    /// Set the record's recipient.
    #[must_use]
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Place the record under a protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: WriteProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the record's schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Nest the record under the parent with the given context.
    #[must_use]
    pub fn parent_context_id(mut self, parent_context_id: impl Into<String>) -> Self {
        self.parent_context_id = Some(parent_context_id.into());
        self
    }

    /// Set the record data.
    #[must_use]
    pub fn data(mut self, data: Data) -> Self {
        self.data = data;
        self
    }

    /// Set the data MIME type. Defaults to `application/json`.
    #[must_use]
    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
        self
    }

    /// Publish (or unpublish) the record.
    #[must_use]
    pub const fn published(mut self, published: bool) -> Self {
        self.published = Some(published);
        self
    }

    /// Override the publication date.
    #[must_use]
    pub const fn date_published(mut self, date_published: DateTime<Utc>) -> Self {
        self.date_published = Some(date_published);
        self
    }

    /// Invoke a protocol role for authorization.
    #[must_use]
    pub fn protocol_role(mut self, protocol_role: impl Into<String>) -> Self {
        self.protocol_role = Some(protocol_role.into());
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Sign using a delegated grant's authority.
    #[must_use]
    pub fn delegated_grant(mut self, delegated_grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(delegated_grant);
        self
    }

    /// Attach opaque encryption settings.
    #[must_use]
    pub fn encryption(mut self, encryption: Value) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Build and sign the write message.
    ///
    /// # Errors
    ///
    /// Fails when URLs are invalid or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Write> {
        self.assemble(None, signer).await
    }

    /// Build the write message with an attestation, then sign.
    ///
    /// # Errors
    ///
    /// Fails when URLs are invalid or signing fails.
    pub async fn build_attested(
        self, attester: &impl Signer, signer: &impl Signer,
    ) -> Result<Write> {
        let descriptor = self.to_descriptor()?;
        let payload = AttestationPayload {
            descriptor_cid: cid::from_value(&serde_json::to_value(&descriptor)?)?,
        };
        let attestation = Jws::create(&payload, attester).await?;
        self.assemble(Some(attestation), signer).await
    }

    fn to_descriptor(&self) -> Result<WriteDescriptor> {
        let (data_cid, data_size) = match &self.data {
            Data::Stream(stream) => {
                let (cid, size) = stream.compute_cid();
                (cid, size as u64)
            }
            Data::Cid { data_cid, data_size } => (data_cid.clone(), *data_size),
        };

        let mut descriptor = if let Some(existing) = &self.existing {
            let mut descriptor = existing.descriptor.clone();
            descriptor.base.message_timestamp = self.message_timestamp;
            descriptor
        } else {
            WriteDescriptor {
                base: Descriptor {
                    interface: Interface::Records,
                    method: Method::Write,
                    message_timestamp: self.message_timestamp,
                },
                recipient: self.recipient.clone(),
                protocol: None,
                protocol_path: None,
                schema: match &self.schema {
                    Some(schema) => Some(utils::uri::clean(schema)?),
                    None => None,
                },
                parent_id: self
                    .parent_context_id
                    .as_ref()
                    .map(|context| context.rsplit('/').next().unwrap_or(context).to_string()),
                data_cid: String::new(),
                data_size: 0,
                data_format: String::new(),
                date_created: self.date_created,
                published: None,
                date_published: None,
            }
        };

        if let Some(write_protocol) = &self.protocol {
            descriptor.protocol = Some(utils::uri::clean(&write_protocol.protocol)?);
            descriptor.protocol_path = Some(write_protocol.protocol_path.clone());
        }
        descriptor.data_cid = data_cid;
        descriptor.data_size = data_size;
        if let Some(data_format) = &self.data_format {
            descriptor.data_format = data_format.clone();
        } else if descriptor.data_format.is_empty() {
            descriptor.data_format = "application/json".to_string();
        }
        if let Some(published) = self.published {
            descriptor.published = Some(published);
        }
        if descriptor.published.unwrap_or_default() {
            if let Some(date_published) = self.date_published {
                descriptor.date_published = Some(date_published);
            } else if descriptor.date_published.is_none() {
                descriptor.date_published = Some(self.message_timestamp);
            }
        } else {
            descriptor.date_published = None;
        }

        Ok(descriptor)
    }

    async fn assemble(self, attestation: Option<Jws>, signer: &impl Signer) -> Result<Write> {
        let descriptor = self.to_descriptor()?;

        // the logical author: the delegated grantor, or the signer
        let author = if let Some(delegated_grant) = &self.delegated_grant {
            delegated_grant.authorization.signature.signer_did()?
        } else {
            let kid = signer
                .verification_method()
                .await
                .map_err(|e| unexpected!("issue getting verification method: {e}"))?;
            kid.split('#').next().unwrap_or(&kid).to_string()
        };

        let record_id = if let Some(existing) = &self.existing {
            existing.record_id.clone()
        } else {
            entry_id(&descriptor, &author)?
        };

        let context_id = if let Some(existing) = &self.existing {
            existing.context_id.clone()
        } else if descriptor.protocol.is_some() {
            match &self.parent_context_id {
                Some(parent_context) => Some(format!("{parent_context}/{record_id}")),
                None => Some(record_id.clone()),
            }
        } else {
            None
        };

        let attestation_cid = match &attestation {
            Some(attestation) => Some(cid::from_value(attestation)?),
            None => None,
        };
        let encryption = self.encryption.or_else(|| {
            self.existing.as_ref().and_then(|existing| existing.encryption.clone())
        });
        let encryption_cid = match &encryption {
            Some(encryption) => Some(cid::from_value(encryption)?),
            None => None,
        };

        let delegated_grant_id = match &self.delegated_grant {
            Some(grant) => Some(grant.cid()?),
            None => None,
        };

        let payload = SignaturePayload {
            base: JwsPayload {
                descriptor_cid: cid::from_value(&serde_json::to_value(&descriptor)?)?,
                permission_grant_id: self.permission_grant_id,
                delegated_grant_id,
                protocol_role: self.protocol_role,
            },
            record_id: record_id.clone(),
            context_id: context_id.clone(),
            attestation_cid,
            encryption_cid,
        };
        let signature = Jws::create(&payload, signer).await?;

        let authorization = Authorization {
            signature,
            owner_signature: None,
            author_delegated_grant: self.delegated_grant,
            owner_delegated_grant: None,
        };

        let (encoded_data, data_stream) = match self.data {
            Data::Stream(stream) => {
                if stream.len() <= MAX_ENCODED_SIZE {
                    (Some(Base64UrlUnpadded::encode_string(&stream.to_bytes())), None)
                } else {
                    (None, Some(stream))
                }
            }
            Data::Cid { .. } => (None, None),
        };

        Ok(Write {
            record_id,
            context_id,
            descriptor,
            authorization,
            attestation,
            encryption,
            encoded_data,
            data_stream,
        })
    }
}
