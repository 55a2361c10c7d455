//! # Records Query
//!
//! The records query endpoint handles `RecordsQuery` messages — requests to
//! query the message store for matching `RecordsWrite` messages.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::grants;
use crate::jws::Signer;
use crate::provider::Provider;
use crate::records::{DelegatedGrant, RecordsFilter, Write, protocol, write};
use crate::store::{self, Cursor, MessageStore, Pagination, RecordsQueryBuilder, Sort};
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Query`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or when
/// an issue occurs querying the message store.
pub async fn handle(
    owner: &str, query: Query, provider: &impl Provider,
) -> Result<Reply<QueryReply>> {
    query.validate()?;

    let store_query = if query.only_published() {
        // unauthenticated (or published-only) queries see published records
        let mut published = query;
        published.descriptor.filter.published = Some(true);
        published.to_store_query()
    } else {
        query.authorize(owner, provider).await?;
        let Some(authzn) = &query.authorization else {
            return Err(forbidden!("missing authorization"));
        };

        if authzn.author()? == owner {
            query.to_store_query()
        } else {
            query.into_non_owner()?
        }
    };

    let (records, cursor) = MessageStore::query(provider, owner, &store_query).await?;
    if records.is_empty() {
        return Ok(Reply {
            status: Status {
                code: StatusCode::OK.as_u16(),
                detail: None,
            },
            body: None,
        });
    }

    let mut entries = vec![];
    for record in records {
        let write = Write::try_from(&record)?;

        // attach the initial write when the entry is a subsequent write
        let initial_write = if write.is_initial()? {
            None
        } else {
            let Some(mut initial) = write::initial_write(owner, &write.record_id, provider).await?
            else {
                return Err(unexpected!("initial write not found"));
            };
            initial.encoded_data = None;
            Some(initial)
        };

        entries.push(QueryReplyEntry::new(write, initial_write));
    }

    Ok(Reply {
        status: Status {
            code: StatusCode::OK.as_u16(),
            detail: None,
        },
        body: Some(QueryReply {
            entries: Some(entries),
            cursor,
        }),
    })
}

/// The [`Query`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// The query descriptor.
    pub descriptor: QueryDescriptor,

    /// The message authorization; absent for anonymous queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

/// The [`Query`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The records filter.
    pub filter: RecordsFilter,

    /// Result ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_sort: Option<Sort>,

    /// Limit/cursor to apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl Message for Query {
    type Reply = QueryReply;

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

/// [`QueryReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryReply {
    /// Query reply entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<QueryReplyEntry>>,

    /// Pagination cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// A record matched by the query. The author's authorization envelope is
/// stripped from reply entries.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryReplyEntry {
    /// The record's id.
    pub record_id: String,

    /// The record's context, for protocol records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// The latest write's descriptor.
    pub descriptor: crate::records::WriteDescriptor,

    /// Record data inlined when it fits the encoding threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<String>,

    /// The initial write, when the matched write is not itself initial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_write: Option<Write>,
}

impl QueryReplyEntry {
    fn new(write: Write, initial_write: Option<Write>) -> Self {
        Self {
            record_id: write.record_id,
            context_id: write.context_id,
            descriptor: write.descriptor,
            encoded_data: write.encoded_data,
            initial_write,
        }
    }
}

impl Query {
    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        let Some(authzn) = &self.authorization else {
            return Err(forbidden!("missing authorization"));
        };

        // authorize the delegate who signed on the author's behalf
        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            let grant = delegated_grant.to_grant()?;
            grant
                .verify_delegation(
                    owner,
                    &authzn.author()?,
                    &authzn.signer()?,
                    &authzn.payload()?,
                    &self.descriptor.base,
                    provider,
                )
                .await?;
            if let Some(protocol) = &self.descriptor.filter.protocol {
                if grant.data.scope.protocol() != Some(protocol.as_str()) {
                    return Err(forbidden!("grant scope protocol does not match query"));
                }
            }
        }

        // a non-owner query invoking a permission grant
        if authzn.author()? != owner {
            if let Some(grant_id) = &authzn.payload()?.permission_grant_id {
                let grant = grants::fetch_grant(owner, grant_id, provider).await?;
                grant
                    .verify(owner, owner, &authzn.author()?, &self.descriptor.base, provider)
                    .await?;
            }
        }

        // verify the invoked protocol role
        if authzn.payload()?.protocol_role.is_some() {
            let Some(protocol) = &self.descriptor.filter.protocol else {
                return Err(unexpected!("missing `protocol` for role-invoking query"));
            };
            let Some(protocol_path) = &self.descriptor.filter.protocol_path else {
                return Err(unexpected!("missing `protocolPath` for role-invoking query"));
            };
            if protocol_path.contains('/') && self.descriptor.filter.context_id.is_none() {
                return Err(unexpected!("missing `contextId` for deep role-invoking query"));
            }

            let authorizer = protocol::Authorizer::new(protocol)
                .context_id(self.descriptor.filter.context_id.as_ref());
            return authorizer.permit_query(owner, protocol_path, authzn, provider).await;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.descriptor.filter.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &self.descriptor.filter.schema {
            utils::uri::validate(schema)?;
        }

        // sorting unpublished records by publication date is unsatisfiable
        if self.descriptor.filter.published == Some(false)
            && matches!(
                self.descriptor.date_sort,
                Some(Sort::PublishedAsc | Sort::PublishedDesc)
            )
        {
            return Err(unexpected!(
                "cannot sort by `datePublished` when querying for unpublished records"
            ));
        }

        Ok(())
    }

    // Whether the query can only ever return published records.
    fn only_published(&self) -> bool {
        if let Some(published) = self.descriptor.filter.published {
            return published;
        }
        if self.descriptor.filter.date_published.is_some() {
            return true;
        }
        if matches!(self.descriptor.date_sort, Some(Sort::PublishedAsc | Sort::PublishedDesc)) {
            return true;
        }
        self.authorization.is_none()
    }

    fn to_store_query(&self) -> store::Query {
        let mut builder =
            RecordsQueryBuilder::new().add_filter(self.descriptor.filter.clone());
        if let Some(sort) = &self.descriptor.date_sort {
            builder = builder.sort(sort.clone());
        }
        if let Some(pagination) = &self.descriptor.pagination {
            builder = builder.pagination(pagination.clone());
        }
        builder.build()
    }

    // A non-owner sees the union of published records, unpublished records
    // they authored, and unpublished records addressed to them (plus, with a
    // verified role, the filtered set outright).
    fn into_non_owner(self) -> Result<store::Query> {
        let Some(authzn) = &self.authorization else {
            return Err(forbidden!("missing authorization"));
        };
        let author = authzn.author()?;
        let invokes_role = authzn.payload()?.protocol_role.is_some();

        let mut builder = RecordsQueryBuilder::new();
        if let Some(sort) = &self.descriptor.date_sort {
            builder = builder.sort(sort.clone());
        }
        if let Some(pagination) = &self.descriptor.pagination {
            builder = builder.pagination(pagination.clone());
        }

        if invokes_role {
            // role-authorized queries see the filtered set as-is
            builder = builder.add_filter(self.descriptor.filter);
        } else {
            if self.descriptor.filter.published.is_none() {
                builder = builder.add_filter(self.descriptor.filter.clone().published(true));
            }

            let mut authored = self.descriptor.filter.clone();
            authored.author = None;
            builder = builder.add_filter(authored.add_author(&author).published(false));

            let mut addressed = self.descriptor.filter.clone();
            addressed.recipient = None;
            builder = builder.add_filter(addressed.add_recipient(&author).published(false));
        }

        Ok(builder.build())
    }
}

/// Builds a [`Query`] message.
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    message_timestamp: DateTime<Utc>,
    filter: RecordsFilter,
    date_sort: Option<Sort>,
    pagination: Option<Pagination>,
    permission_grant_id: Option<String>,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    authorize: Option<bool>,
}

impl QueryBuilder {
    /// Returns a new [`QueryBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            ..Self::default()
        }
    }

    /// The records filter.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Result ordering.
    #[must_use]
    pub const fn date_sort(mut self, date_sort: Sort) -> Self {
        self.date_sort = Some(date_sort);
        self
    }

    /// Limit/cursor to apply.
    #[must_use]
    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
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

    /// Build without an authorization envelope (anonymous query).
    #[must_use]
    pub const fn authorize(mut self, authorize: bool) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Build and sign the query message.
    ///
    /// # Errors
    ///
    /// Fails when filter URLs are invalid or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Query> {
        let descriptor = QueryDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Query,
                message_timestamp: self.message_timestamp,
            },
            filter: self.filter.normalize()?,
            date_sort: self.date_sort,
            pagination: self.pagination,
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

        Ok(Query {
            descriptor,
            authorization,
        })
    }
}
