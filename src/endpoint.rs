//! # Endpoint
//!
//! The web node's message entrypoints: the typed [`handle`] used by clients
//! holding concrete message types, and the untyped [`process_message`]
//! dispatcher that routes a raw JSON message by `(interface, method)` and
//! translates the error taxonomy into reply statuses.

use std::fmt::Debug;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authorization::Authorization;
use crate::provider::Provider;
use crate::{Descriptor, Result, messages, protocols, records, schema, unexpected};

/// Handle an incoming message: validate the envelope, authenticate, then run
/// the method handler.
///
/// # Errors
///
/// Surfaces schema, authentication, authorization, and handler failures per
/// the error taxonomy.
pub async fn handle<T>(
    owner: &str, message: impl Message<Reply = T>, provider: &impl Provider,
) -> Result<Reply<T>> {
    message.validate(provider).await?;
    message.handle(owner, provider).await
}

/// Route a raw JSON message to its handler, translating failures into
/// HTTP-style reply statuses. Unknown failures surface as 500.
///
/// Subscription replies carry their receiving end out-of-band; callers that
/// need the subscription use [`handle`] with a typed message.
pub async fn process_message(owner: &str, message: Value, provider: &impl Provider) -> Reply<Value> {
    match route(owner, message, provider).await {
        Ok(reply) => reply,
        Err(error) => Reply {
            status: Status {
                code: error.code().as_u16(),
                detail: Some(error.detail()),
            },
            body: None,
        },
    }
}

async fn route(owner: &str, message: Value, provider: &impl Provider) -> Result<Reply<Value>> {
    let interface = message
        .pointer("/descriptor/interface")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected!("message has no `interface`"))?;
    let method = message
        .pointer("/descriptor/method")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected!("message has no `method`"))?;

    match (interface, method) {
        ("Records", "Write") => to_value(handle(owner, parse::<records::Write>(message)?, provider).await?),
        ("Records", "Read") => to_value(handle(owner, parse::<records::Read>(message)?, provider).await?),
        ("Records", "Query") => to_value(handle(owner, parse::<records::Query>(message)?, provider).await?),
        ("Records", "Subscribe") => {
            to_value(handle(owner, parse::<records::Subscribe>(message)?, provider).await?)
        }
        ("Records", "Delete") => to_value(handle(owner, parse::<records::Delete>(message)?, provider).await?),
        ("Protocols", "Configure") => {
            to_value(handle(owner, parse::<protocols::Configure>(message)?, provider).await?)
        }
        ("Protocols", "Query") => to_value(handle(owner, parse::<protocols::Query>(message)?, provider).await?),
        ("Messages", "Query") => to_value(handle(owner, parse::<messages::Query>(message)?, provider).await?),
        ("Messages", "Read") => to_value(handle(owner, parse::<messages::Read>(message)?, provider).await?),
        ("Messages", "Subscribe") => {
            to_value(handle(owner, parse::<messages::Subscribe>(message)?, provider).await?)
        }
        _ => Err(unexpected!("unsupported interface/method: {interface}/{method}")),
    }
}

fn parse<T: DeserializeOwned>(message: Value) -> Result<T> {
    serde_json::from_value(message).map_err(|e| unexpected!("invalid message: {e}"))
}

fn to_value<T: Serialize>(reply: Reply<T>) -> Result<Reply<Value>> {
    let body = match reply.body {
        Some(body) => Some(serde_json::to_value(body)?),
        None => None,
    };
    Ok(Reply {
        status: reply.status,
        body,
    })
}

/// Methods common to all messages.
pub trait Message: Serialize + Clone + Debug + Send + Sync {
    /// The message's handler-specific reply type.
    type Reply;

    /// Compute the CID of the message.
    ///
    /// # Errors
    ///
    /// Fails when the message cannot be canonically encoded.
    fn cid(&self) -> Result<String>;

    /// The message descriptor fields common to all messages.
    fn descriptor(&self) -> &Descriptor;

    /// The message's authorization, if it carries one.
    fn authorization(&self) -> Option<&Authorization>;

    /// Handle the message.
    fn handle(
        self, owner: &str, provider: &impl Provider,
    ) -> impl Future<Output = Result<Reply<Self::Reply>>> + Send;

    /// Validation common to all messages: envelope schema plus
    /// authentication of the signature chain. Message-specific validation is
    /// done in the handler.
    fn validate(&self, provider: &impl Provider) -> impl Future<Output = Result<()>> + Send {
        async {
            schema::validate(self)?;
            if let Some(authzn) = self.authorization() {
                authzn.authenticate(self, provider).await?;
            }
            Ok(())
        }
    }
}

/// Reply used by all endpoints.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Reply<T> {
    /// Status to accompany the reply.
    pub status: Status,

    /// Endpoint-specific reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(flatten)]
    pub body: Option<T>,
}

/// Reply status.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Status code.
    pub code: u16,

    /// Status detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            detail: None,
        }
    }
}
