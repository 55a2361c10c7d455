//! # Records Delete
//!
//! The records delete endpoint handles `RecordsDelete` messages — requests
//! to tombstone a record. The record is not erased: a `Delete` message
//! becomes its latest state, prior writes are pruned down to the retained
//! initial write, and record data is reclaimed through the blob store's
//! reference counting.

use std::collections::HashMap;

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::jws::Signer;
use crate::provider::{EventStream, Provider};
use crate::records::{RecordsFilter, Write, protocol, write};
use crate::store::{DataStore, Entry, EventLog, MessageStore, RecordsQueryBuilder};
use crate::tasks::{self, Task, TaskType};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, sync, unexpected, utils};

/// Handle — or process — a [`Delete`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails, no
/// matching record exists, or a newer version of the record exists.
pub async fn handle(
    owner: &str, delete: Delete, provider: &impl Provider,
) -> Result<Reply<DeleteReply>> {
    let query = RecordsQueryBuilder::new()
        .method(None)
        .add_filter(RecordsFilter::new().record_id(&delete.descriptor.record_id))
        .build();
    let (entries, _) = MessageStore::query(provider, owner, &query).await?;
    let Some(latest) = entries.first() else {
        return Err(Error::NotFound("no matching record found".to_string()));
    };

    // a tombstoned record can only be re-deleted to prune its descendants
    if let Some(existing) = latest.as_delete() {
        if !delete.descriptor.prune {
            return Err(Error::NotFound("cannot delete a `RecordsDelete` record".to_string()));
        }
        if existing.descriptor.prune {
            return Err(Error::NotFound("record has already been pruned".to_string()));
        }
    }

    // authorize against the record's current (or retained initial) write
    let target = if let Some(write) = latest.as_write() {
        write.clone()
    } else {
        let Some(initial) =
            write::initial_write(owner, &delete.descriptor.record_id, provider).await?
        else {
            return Err(unexpected!("initial write not found for record"));
        };
        initial
    };
    delete.authorize(owner, &target, provider).await?;

    if delete.descriptor.base.message_timestamp < latest.descriptor().message_timestamp {
        return Err(Error::Conflict("a newer record version exists".to_string()));
    }

    // run as a resumable task so an interrupted delete can complete later
    tasks::run(owner, TaskType::RecordsDelete(delete), provider).await?;

    Ok(Reply {
        status: Status {
            code: StatusCode::ACCEPTED.as_u16(),
            detail: None,
        },
        body: None,
    })
}

/// The [`Delete`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delete {
    /// The delete descriptor.
    pub descriptor: DeleteDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

/// The [`Delete`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The id of the record to delete.
    pub record_id: String,

    /// Whether descendant records are purged as well.
    pub prune: bool,
}

impl Message for Delete {
    type Reply = DeleteReply;

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

/// [`DeleteReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DeleteReply;

impl TryFrom<&Entry> for Delete {
    type Error = crate::Error;

    fn try_from(entry: &Entry) -> Result<Self> {
        entry.as_delete().cloned().ok_or_else(|| unexpected!("expected `RecordsDelete` message"))
    }
}

impl Task for Delete {
    async fn run(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        delete(owner, self, provider).await
    }
}

impl Delete {
    /// Build the message's index properties.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, Value> {
        let mut indexes = HashMap::new();
        indexes.insert("interface".to_string(), Value::String(Interface::Records.to_string()));
        indexes.insert("method".to_string(), Value::String(Method::Delete.to_string()));
        indexes.insert("recordId".to_string(), Value::String(self.descriptor.record_id.clone()));
        indexes.insert(
            "messageTimestamp".to_string(),
            Value::String(utils::format_date(&self.descriptor.base.message_timestamp)),
        );
        indexes.insert(
            "dateUpdated".to_string(),
            Value::String(utils::format_date(&self.descriptor.base.message_timestamp)),
        );
        indexes.insert(
            "author".to_string(),
            Value::String(self.authorization.author().unwrap_or_default()),
        );
        indexes.insert("initial".to_string(), Value::Bool(false));
        indexes
    }

    async fn authorize(&self, owner: &str, write: &Write, provider: &impl Provider) -> Result<()> {
        let authzn = &self.authorization;
        let author = authzn.author()?;

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

        if let Some(protocol) = &write.descriptor.protocol {
            let authorizer = protocol::Authorizer::new(protocol)
                .context_id(write.context_id.as_ref())
                .record_write(write);
            return authorizer.permit_delete(owner, self, provider).await;
        }

        Err(forbidden!("delete request failed authorization"))
    }
}

// Tombstone the record: persist the delete as latest state, prune descendants
// when asked, and retire prior writes down to the initial one.
async fn delete(owner: &str, delete: &Delete, provider: &impl Provider) -> Result<()> {
    let _guard = sync::lock(owner, &delete.descriptor.record_id).await;

    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(true)
        .add_filter(RecordsFilter::new().record_id(&delete.descriptor.record_id))
        .build();
    let (existing, _) = MessageStore::query(provider, owner, &query).await?;
    if existing.is_empty() {
        return Err(Error::NotFound("no matching record found".to_string()));
    }

    let Some(initial) = existing.iter().find_map(|entry| {
        entry.as_write().filter(|write| write.is_initial().unwrap_or_default())
    }) else {
        return Err(unexpected!("initial write not found for record"));
    };

    // searchable like its record: the tombstone inherits the initial write's
    // lineage indexes under its own interface/method
    let mut entry = Entry::from(delete);
    for (key, value) in initial.build_indexes() {
        entry.indexes.entry(key).or_insert(value);
    }
    entry.add_index("latestBase", true);

    MessageStore::put(provider, owner, &entry).await?;
    EventLog::append(provider, owner, &entry).await?;

    // purge descendant records bottom-up
    if delete.descriptor.prune {
        delete_children(owner, &delete.descriptor.record_id, provider).await?;
    }

    let delete_cid = entry.cid()?;
    for prior in &existing {
        let prior_cid = prior.cid()?;
        if prior_cid == delete_cid {
            continue;
        }

        if let Some(prior_write) = prior.as_write() {
            // the tombstone references no data: every write's blob is
            // released through the reference count
            DataStore::delete(
                provider,
                owner,
                &prior_write.record_id,
                &prior_write.descriptor.data_cid,
            )
            .await?;

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

    Ok(())
}

// Purge a record's descendant records, their data, and their events.
#[async_recursion]
async fn delete_children<P: Provider>(owner: &str, record_id: &str, provider: &P) -> Result<()> {
    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(true)
        .add_filter(RecordsFilter::new().parent_id(record_id))
        .build();
    let (children, _) = MessageStore::query(provider, owner, &query).await?;

    let mut by_record: HashMap<String, Vec<Entry>> = HashMap::new();
    for entry in children {
        let child_id = match &entry.message {
            crate::store::EntryType::Write(write) => write.record_id.clone(),
            crate::store::EntryType::Delete(delete) => delete.descriptor.record_id.clone(),
            crate::store::EntryType::Configure(_) => {
                return Err(unexpected!("unexpected message type"));
            }
        };
        by_record.entry(child_id).or_default().push(entry);
    }

    for (child_id, entries) in by_record {
        delete_children(owner, &child_id, provider).await?;

        for entry in entries {
            if let Some(child_write) = entry.as_write() {
                DataStore::delete(
                    provider,
                    owner,
                    &child_write.record_id,
                    &child_write.descriptor.data_cid,
                )
                .await?;
            }
            let entry_cid = entry.cid()?;
            MessageStore::delete(provider, owner, &entry_cid).await?;
            EventLog::delete(provider, owner, &entry_cid).await?;
        }
    }

    Ok(())
}

/// Builds a [`Delete`] message.
#[derive(Clone, Debug, Default)]
pub struct DeleteBuilder {
    message_timestamp: DateTime<Utc>,
    record_id: Option<String>,
    prune: Option<bool>,
    protocol_role: Option<String>,
}

impl DeleteBuilder {
    /// Returns a new [`DeleteBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            ..Self::default()
        }
    }

    /// The id of the record to delete.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Purge descendant records as well.
    #[must_use]
    pub const fn prune(mut self, prune: bool) -> Self {
        self.prune = Some(prune);
        self
    }

    /// Invoke a protocol role.
    #[must_use]
    pub fn protocol_role(mut self, protocol_role: impl Into<String>) -> Self {
        self.protocol_role = Some(protocol_role.into());
        self
    }

    /// Build and sign the delete message.
    ///
    /// # Errors
    ///
    /// Fails when no record id is set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Delete> {
        let Some(record_id) = self.record_id else {
            return Err(unexpected!("`record_id` is not set"));
        };

        let descriptor = DeleteDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Delete,
                message_timestamp: self.message_timestamp,
            },
            record_id,
            prune: self.prune.unwrap_or_default(),
        };

        let mut builder = AuthorizationBuilder::new()
            .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
        if let Some(role) = self.protocol_role {
            builder = builder.protocol_role(role);
        }
        let authorization = builder.build(signer).await?;

        Ok(Delete {
            descriptor,
            authorization,
        })
    }
}
