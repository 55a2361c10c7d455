//! # Records Subscribe
//!
//! The records subscribe endpoint handles `RecordsSubscribe` messages —
//! requests for a live, filtered stream of record events.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::event::{SubscribeFilter, Subscriber};
use crate::jws::Signer;
use crate::provider::{EventStream, Provider};
use crate::records::{DelegatedGrant, RecordsFilter, protocol};
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Subscribe`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or the
/// event stream rejects the subscription.
pub async fn handle(
    owner: &str, subscribe: Subscribe, provider: &impl Provider,
) -> Result<Reply<SubscribeReply>> {
    subscribe.validate()?;

    // the filters the subscription is narrowed to, mirroring query
    // visibility rules
    let filters = if let Some(authzn) = &subscribe.authorization {
        subscribe.authorize(owner, provider).await?;

        if authzn.author()? == owner || authzn.payload()?.protocol_role.is_some() {
            vec![subscribe.descriptor.filter.clone()]
        } else {
            let author = authzn.author()?;
            let mut filters = Vec::new();
            if subscribe.descriptor.filter.published.is_none() {
                filters.push(subscribe.descriptor.filter.clone().published(true));
            }
            let mut authored = subscribe.descriptor.filter.clone();
            authored.author = None;
            filters.push(authored.add_author(&author).published(false));
            let mut addressed = subscribe.descriptor.filter.clone();
            addressed.recipient = None;
            filters.push(addressed.add_recipient(&author).published(false));
            filters
        }
    } else {
        // anonymous subscribers see published records only
        vec![subscribe.descriptor.filter.clone().published(true)]
    };

    let subscription = EventStream::subscribe(provider, owner, SubscribeFilter::Records(filters))
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

    /// The message authorization; absent for anonymous subscriptions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

/// The [`Subscribe`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The records filter the subscription is narrowed to.
    pub filter: RecordsFilter,
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
        self.authorization.as_ref()
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
    fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.descriptor.filter.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &self.descriptor.filter.schema {
            utils::uri::validate(schema)?;
        }
        Ok(())
    }

    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        let Some(authzn) = &self.authorization else {
            return Err(forbidden!("missing authorization"));
        };

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
        }

        if authzn.payload()?.protocol_role.is_some() {
            let Some(protocol) = &self.descriptor.filter.protocol else {
                return Err(unexpected!("missing `protocol` for role-invoking subscription"));
            };
            let Some(protocol_path) = &self.descriptor.filter.protocol_path else {
                return Err(unexpected!("missing `protocolPath` for role-invoking subscription"));
            };
            if protocol_path.contains('/') && self.descriptor.filter.context_id.is_none() {
                return Err(unexpected!("missing `contextId` for deep role-invoking subscription"));
            }

            let authorizer = protocol::Authorizer::new(protocol)
                .context_id(self.descriptor.filter.context_id.as_ref());
            return authorizer.permit_subscribe(owner, protocol_path, authzn, provider).await;
        }

        Ok(())
    }
}

/// Builds a [`Subscribe`] message.
#[derive(Clone, Debug, Default)]
pub struct SubscribeBuilder {
    message_timestamp: DateTime<Utc>,
    filter: RecordsFilter,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    authorize: Option<bool>,
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

    /// The records filter the subscription is narrowed to.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filter = filter;
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

    /// Build without an authorization envelope (anonymous subscription).
    #[must_use]
    pub const fn authorize(mut self, authorize: bool) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Build and sign the subscribe message.
    ///
    /// # Errors
    ///
    /// Fails when filter URLs are invalid or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Subscribe> {
        let descriptor = SubscribeDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Subscribe,
                message_timestamp: self.message_timestamp,
            },
            filter: self.filter.normalize()?,
        };

        let authorization = if self.authorize.unwrap_or(true) {
            let mut builder = AuthorizationBuilder::new()
                .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
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

        Ok(Subscribe {
            descriptor,
            authorization,
        })
    }
}
