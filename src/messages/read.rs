//! # Messages Read
//!
//! The messages read endpoint handles `MessagesRead` messages — requests to
//! fetch a single persisted message of any type by its CID.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::data::DataStream;
use crate::endpoint::{Message, Reply, Status};
use crate::grants::{self, Scope};
use crate::jws::Signer;
use crate::protocols::PROTOCOL_URI;
use crate::provider::Provider;
use crate::records::write;
use crate::store::{DataStore, Entry, EntryType, MessageStore};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Read`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or no
/// message with the requested CID exists.
pub async fn handle(owner: &str, read: Read, provider: &impl Provider) -> Result<Reply<ReadReply>> {
    cid::validate(&read.descriptor.message_cid)?;

    let Some(entry) = MessageStore::get(provider, owner, &read.descriptor.message_cid).await?
    else {
        return Err(Error::NotFound("message not found".to_string()));
    };

    read.authorize(owner, &entry, provider).await?;

    let mut message = entry.message;

    // attach record data to write messages
    let data = if let EntryType::Write(write) = &mut message {
        if let Some(encoded) = write.encoded_data.take() {
            use base64ct::Encoding;
            let bytes = base64ct::Base64UrlUnpadded::decode_vec(&encoded)?;
            Some(DataStream::from(bytes))
        } else {
            DataStore::get(provider, owner, &write.record_id, &write.descriptor.data_cid).await?
        }
    } else {
        None
    };

    Ok(Reply {
        status: Status {
            code: StatusCode::OK.as_u16(),
            detail: None,
        },
        body: Some(ReadReply {
            entry: Some(ReadReplyEntry {
                message_cid: read.descriptor.message_cid,
                message,
                data,
            }),
        }),
    })
}

/// The [`Read`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Read {
    /// The read descriptor.
    pub descriptor: ReadDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

/// The [`Read`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The CID of the message to read.
    pub message_cid: String,
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
        Some(&self.authorization)
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// [`ReadReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReply {
    /// The matched message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ReadReplyEntry>,
}

/// The message matched by a read.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReplyEntry {
    /// The CID of the message.
    pub message_cid: String,

    /// The message.
    pub message: EntryType,

    /// The record data, for write messages.
    #[serde(skip)]
    pub data: Option<DataStream>,
}

impl Read {
    async fn authorize(&self, owner: &str, entry: &Entry, provider: &impl Provider) -> Result<()> {
        let authzn = &self.authorization;

        let author = authzn.author()?;
        if author == owner {
            return Ok(());
        }

        let Some(grant_id) = &authzn.payload()?.permission_grant_id else {
            return Err(forbidden!("missing grant ID"));
        };
        let grant = grants::fetch_grant(owner, grant_id, provider).await?;
        grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;
        verify_scope(owner, entry, &grant.data.scope, provider).await?;

        Ok(())
    }
}

// A protocol-restricted grant only covers messages under that protocol.
async fn verify_scope(
    owner: &str, requested: &Entry, scope: &Scope, store: &impl MessageStore,
) -> Result<()> {
    let Some(protocol) = scope.protocol() else {
        return Ok(());
    };

    if requested.descriptor().interface == Interface::Protocols {
        let Some(configure) = requested.as_configure() else {
            return Err(forbidden!("message failed scope authorization"));
        };
        if configure.descriptor.definition.protocol == protocol {
            return Ok(());
        }
        return Err(forbidden!("message failed scope authorization"));
    }

    if requested.descriptor().interface == Interface::Records {
        let write = match &requested.message {
            EntryType::Write(write) => write.clone(),
            EntryType::Delete(delete) => {
                let Some(write) =
                    write::initial_write(owner, &delete.descriptor.record_id, store).await?
                else {
                    return Err(forbidden!("message failed scope authorization"));
                };
                write
            }
            EntryType::Configure(_) => {
                return Err(forbidden!("message failed scope authorization"));
            }
        };

        if write.descriptor.protocol.as_deref() == Some(protocol) {
            return Ok(());
        }

        // a permission record is in scope when the permission it conveys is
        if write.descriptor.protocol.as_deref() == Some(PROTOCOL_URI) {
            let permission_scope = grants::fetch_scope(&write)?;
            if permission_scope.protocol() == Some(protocol) {
                return Ok(());
            }
        }
    }

    Err(forbidden!("message failed scope authorization"))
}

/// Builds a [`Read`] message.
#[derive(Clone, Debug, Default)]
pub struct ReadBuilder {
    message_timestamp: DateTime<Utc>,
    message_cid: Option<String>,
    permission_grant_id: Option<String>,
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

    /// The CID of the message to read.
    #[must_use]
    pub fn message_cid(mut self, message_cid: impl Into<String>) -> Self {
        self.message_cid = Some(message_cid.into());
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Build and sign the read message.
    ///
    /// # Errors
    ///
    /// Fails when no message CID is set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Read> {
        let Some(message_cid) = self.message_cid else {
            return Err(unexpected!("`message_cid` is not set"));
        };

        let descriptor = ReadDescriptor {
            base: Descriptor {
                interface: Interface::Messages,
                method: Method::Read,
                message_timestamp: self.message_timestamp,
            },
            message_cid,
        };

        let mut builder = AuthorizationBuilder::new()
            .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
        if let Some(id) = self.permission_grant_id {
            builder = builder.permission_grant_id(id);
        }
        let authorization = builder.build(signer).await?;

        Ok(Read {
            descriptor,
            authorization,
        })
    }
}
