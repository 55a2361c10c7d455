//! # Records Read
//!
//! The records read endpoint handles `RecordsRead` messages — requests to
//! read a single record, returning its latest write and data stream.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::data::DataStream;
use crate::endpoint::{Message, Reply, Status};
use crate::grants;
use crate::jws::Signer;
use crate::provider::Provider;
use crate::records::{DelegatedGrant, Delete, RecordsFilter, Write, protocol, write};
use crate::store::{MessageStore, RecordsQueryBuilder};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Read`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or no
/// matching record exists.
pub async fn handle(owner: &str, read: Read, provider: &impl Provider) -> Result<Reply<ReadReply>> {
    read.validate()?;

    // the latest message for the record, tombstone included
    let query = RecordsQueryBuilder::new()
        .method(None)
        .add_filter(read.descriptor.filter.clone())
        .build();
    let (entries, _) = MessageStore::query(provider, owner, &query).await?;
    if entries.is_empty() {
        return Err(Error::NotFound("no matching record found".to_string()));
    }
    if entries.len() > 1 {
        return Err(unexpected!("multiple records match the read filter"));
    }

    if let Some(delete) = entries[0].as_delete() {
        // surface the tombstone only to readers authorized against the
        // retained initial write
        let Some(initial) =
            write::initial_write(owner, &delete.descriptor.record_id, provider).await?
        else {
            return Err(unexpected!("initial write not found for deleted record"));
        };
        read.authorize(owner, &initial, provider).await?;
        return Err(Error::NotFound("record is deleted".to_string()));
    }

    let mut latest = Write::try_from(&entries[0])?;
    read.authorize(owner, &latest, provider).await?;

    let data = if let Some(encoded) = latest.encoded_data.take() {
        let buffer = Base64UrlUnpadded::decode_vec(&encoded)?;
        Some(DataStream::from(buffer))
    } else {
        DataStream::from_store(owner, &latest.record_id, &latest.descriptor.data_cid, provider)
            .await?
    };

    // attach the initial write when the latest write is a subsequent one
    let initial_write = if latest.is_initial()? {
        None
    } else {
        let Some(mut initial) = write::initial_write(owner, &latest.record_id, provider).await?
        else {
            return Err(unexpected!("initial write not found"));
        };
        initial.encoded_data = None;
        Some(initial)
    };

    Ok(Reply {
        status: Status {
            code: StatusCode::OK.as_u16(),
            detail: None,
        },
        body: Some(ReadReply {
            entry: ReadReplyEntry {
                records_write: Some(latest),
                records_delete: None,
                initial_write,
                data,
            },
        }),
    })
}

/// The [`Read`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Read {
    /// The read descriptor.
    pub descriptor: ReadDescriptor,

    /// The message authorization; absent for anonymous reads of published
    /// records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

/// The [`Read`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The filter locating the record to read.
    pub filter: RecordsFilter,
}

impl Message for Read {
    type Reply = ReadReply;

    fn cid(&self) -> Result<String> {
        cid::from_value(self)
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor.base
    }

    fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// [`ReadReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReply {
    /// The read reply entry.
    pub entry: ReadReplyEntry,
}

/// The record matched by a read.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReplyEntry {
    /// The latest `RecordsWrite` message, when the record exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_write: Option<Write>,

    /// The `RecordsDelete` message, when the record is deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_delete: Option<Delete>,

    /// The initial write, when the returned write is not itself initial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_write: Option<Write>,

    /// The record's data.
    #[serde(skip)]
    pub data: Option<DataStream>,
}

impl Read {
    fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.descriptor.filter.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &self.descriptor.filter.schema {
            utils::uri::validate(schema)?;
        }
        Ok(())
    }

    async fn authorize(&self, owner: &str, write: &Write, provider: &impl Provider) -> Result<()> {
        // published data is readable by anyone
        if write.descriptor.published.unwrap_or_default() {
            return Ok(());
        }

        let Some(authzn) = &self.authorization else {
            return Err(forbidden!("read of unpublished record requires authorization"));
        };
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
            grant.verify_records_scope(write)?;
        }

        if author == owner {
            return Ok(());
        }
        if write.descriptor.recipient.as_deref() == Some(author.as_str()) {
            return Ok(());
        }
        if author == write.authorization.author()? {
            return Ok(());
        }

        if let Some(grant_id) = &authzn.payload()?.permission_grant_id {
            let grant = grants::fetch_grant(owner, grant_id, provider).await?;
            grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;
            grant.verify_records_scope(write)?;
            return Ok(());
        }

        if let Some(protocol) = &write.descriptor.protocol {
            let authorizer = protocol::Authorizer::new(protocol)
                .context_id(write.context_id.as_ref())
                .record_write(write);
            return authorizer.permit_read(owner, self, provider).await;
        }

        Err(forbidden!("read cannot be authorized"))
    }
}

/// Builds a [`Read`] message.
#[derive(Clone, Debug, Default)]
pub struct ReadBuilder {
    message_timestamp: DateTime<Utc>,
    filter: RecordsFilter,
    permission_grant_id: Option<String>,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    authorize: Option<bool>,
}

impl ReadBuilder {
    /// Returns a new [`ReadBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            ..Self::default()
        }
    }

    /// The filter locating the record to read.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filter = filter;
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

    /// Sign using a delegated grant's authority.
    #[must_use]
    pub fn delegated_grant(mut self, delegated_grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(delegated_grant);
        self
    }

    /// Build without an authorization envelope (anonymous read).
    #[must_use]
    pub const fn authorize(mut self, authorize: bool) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Build and sign the read message.
    ///
    /// # Errors
    ///
    /// Fails when filter URLs are invalid or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Read> {
        let descriptor = ReadDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Read,
                message_timestamp: self.message_timestamp,
            },
            filter: self.filter.normalize()?,
        };

        let authorization = if self.authorize.unwrap_or(true) {
            let mut builder = AuthorizationBuilder::new()
                .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
            if let Some(id) = self.permission_grant_id {
                builder = builder.permission_grant_id(id);
            }
            if let Some(role) = self.protocol_role {
                builder = builder.protocol_role(role);
            }
            if let Some(delegated_grant) = self.delegated_grant {
                builder = builder.delegated_grant(delegated_grant);
            }
            Some(builder.build(signer).await?)
        } else {
            None
        };

        Ok(Read {
            descriptor,
            authorization,
        })
    }
}
