//! # Messages Subscribe
//!
//! The messages subscribe endpoint handles `MessagesSubscribe` messages —
//! requests for a live, filtered stream of events for messages of any type.
//!
//! Events are emitted unfiltered by read authorization: a subscriber
//! authorized here receives every event matching its filters, and reading
//! the underlying message still goes through `MessagesRead` authorization.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::MessagesFilter;
use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::event::{SubscribeFilter, Subscriber};
use crate::grants;
use crate::jws::Signer;
use crate::provider::{EventStream, Provider};
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, forbidden, utils};

/// Handle — or process — a [`Subscribe`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or the
/// event stream rejects the subscription.
pub async fn handle(
    owner: &str, subscribe: Subscribe, provider: &impl Provider,
) -> Result<Reply<SubscribeReply>> {
    subscribe.authorize(owner, provider).await?;

    let filter = SubscribeFilter::Messages(subscribe.descriptor.filters.clone());
    let subscription = EventStream::subscribe(provider, owner, filter)
        .await
        .map_err(|e| crate::Error::Unimplemented(format!("event stream unavailable: {e}")))?;

    Ok(Reply {
        status: Status {
            code: StatusCode::OK.as_u16(),
            detail: None,
        },
        body: Some(SubscribeReply { subscription }),
    })
}

/// The [`Subscribe`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribe {
    /// The subscribe descriptor.
    pub descriptor: SubscribeDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

/// The [`Subscribe`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// OR-composed filters the subscription is narrowed to.
    pub filters: Vec<MessagesFilter>,
}

impl Message for Subscribe {
    type Reply = SubscribeReply;

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

/// [`SubscribeReply`] is returned by the handler in the [`Reply`] `body`
/// field.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SubscribeReply {
    /// The subscription's receiving end.
    #[serde(skip)]
    pub subscription: Subscriber,
}

impl Subscribe {
    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        let authzn = &self.authorization;

        let author = authzn.author()?;
        if author == owner {
            return Ok(());
        }

        let Some(grant_id) = &authzn.payload()?.permission_grant_id else {
            return Err(forbidden!("author has no grant"));
        };
        let grant = grants::fetch_grant(owner, grant_id, provider).await?;
        grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;

        // a protocol-restricted grant must match every filter
        let Some(protocol) = grant.data.scope.protocol() else {
            return Ok(());
        };
        for filter in &self.descriptor.filters {
            if filter.protocol.as_deref() != Some(protocol) {
                return Err(forbidden!("filter and grant protocols do not match"));
            }
        }

        Ok(())
    }
}

/// Builds a [`Subscribe`] message.
#[derive(Clone, Debug, Default)]
pub struct SubscribeBuilder {
    message_timestamp: DateTime<Utc>,
    filters: Vec<MessagesFilter>,
    permission_grant_id: Option<String>,
}

impl SubscribeBuilder {
    /// Returns a new [`SubscribeBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            ..Self::default()
        }
    }

    /// Add a filter to the OR set.
    #[must_use]
    pub fn add_filter(mut self, filter: MessagesFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Build and sign the subscribe message.
    ///
    /// # Errors
    ///
    /// Fails when signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Subscribe> {
        let descriptor = SubscribeDescriptor {
            base: Descriptor {
                interface: Interface::Messages,
                method: Method::Subscribe,
                message_timestamp: self.message_timestamp,
            },
            filters: self.filters,
        };

        let mut builder = AuthorizationBuilder::new()
            .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
        if let Some(id) = self.permission_grant_id {
            builder = builder.permission_grant_id(id);
        }
        let authorization = builder.build(signer).await?;

        Ok(Subscribe {
            descriptor,
            authorization,
        })
    }
}
