//! # Protocols Query
//!
//! The protocols query endpoint handles `ProtocolsQuery` messages — requests
//! for a tenant's installed protocol configurations. Anonymous and
//! unauthorized queriers see published definitions only.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::grants::{self, Scope};
use crate::jws::Signer;
use crate::provider::Provider;
use crate::store::MessageStore;
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, unexpected, utils};

/// Handle — or process — a [`Query`] message.
///
/// # Errors
///
/// The endpoint will return an error when an invoked grant fails
/// verification or the store query fails.
pub async fn handle(
    owner: &str, query: Query, provider: &impl Provider,
) -> Result<Reply<QueryReply>> {
    query.validate()?;

    // unrestricted visibility requires the tenant or a verified grant
    let published_only = !query.authorize(owner, provider).await?;

    let store_query = crate::store::Query::Protocols(crate::store::ProtocolsQuery {
        protocol: query.descriptor.filter.as_ref().map(|f| f.protocol.clone()),
        published: published_only.then_some(true),
    });
    let (entries, _) = MessageStore::query(provider, owner, &store_query).await?;

    let mut configurations = Vec::new();
    for entry in entries {
        let Some(configure) = entry.as_configure() else {
            return Err(unexpected!("unexpected message type"));
        };
        configurations.push(configure.clone());
    }

    Ok(Reply {
        status: Status {
            code: StatusCode::OK.as_u16(),
            detail: None,
        },
        body: Some(QueryReply {
            entries: (!configurations.is_empty()).then_some(configurations),
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

    /// Restrict results to one protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ProtocolsFilter>,
}

/// Filter for protocols queries.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolsFilter {
    /// The (normalized) protocol URL to match.
    pub protocol: String,
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
    /// The matching protocol configurations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<crate::protocols::Configure>>,
}

impl Query {
    fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.descriptor.filter {
            utils::uri::validate(&filter.protocol)?;
        }
        Ok(())
    }

    // Returns whether the querier has unrestricted visibility.
    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<bool> {
        let Some(authzn) = &self.authorization else {
            return Ok(false);
        };
        let author = authzn.author()?;
        if author == owner {
            return Ok(true);
        }

        let Some(grant_id) = &authzn.payload()?.permission_grant_id else {
            return Ok(false);
        };
        let grant = grants::fetch_grant(owner, grant_id, provider).await?;
        grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;

        // a protocol-restricted grant must match the query's filter
        let Scope::Protocols { protocol, .. } = &grant.data.scope else {
            return Err(crate::forbidden!("grant scope does not cover protocols"));
        };
        if let Some(protocol) = protocol {
            let Some(filter) = &self.descriptor.filter else {
                return Err(crate::forbidden!("grant requires the query to filter its protocol"));
            };
            if &filter.protocol != protocol {
                return Err(crate::forbidden!("query protocol does not match grant protocol"));
            }
        }

        Ok(true)
    }
}

/// Builds a [`Query`] message.
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    message_timestamp: DateTime<Utc>,
    filter: Option<ProtocolsFilter>,
    permission_grant_id: Option<String>,
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

    /// Restrict results to one protocol.
    #[must_use]
    pub fn filter(mut self, protocol: impl Into<String>) -> Self {
        self.filter = Some(ProtocolsFilter {
            protocol: protocol.into(),
        });
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
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
    /// Fails when the filter URL is invalid or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Query> {
        let filter = match self.filter {
            Some(mut filter) => {
                filter.protocol = utils::uri::clean(&filter.protocol)?;
                Some(filter)
            }
            None => None,
        };

        let descriptor = QueryDescriptor {
            base: Descriptor {
                interface: Interface::Protocols,
                method: Method::Query,
                message_timestamp: self.message_timestamp,
            },
            filter,
        };

        let authorization = if self.authorize.unwrap_or(true) {
            let mut builder = AuthorizationBuilder::new()
                .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
            if let Some(id) = self.permission_grant_id {
                builder = builder.permission_grant_id(id);
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
