//! # Protocols Configure
//!
//! The protocols configure endpoint handles `ProtocolsConfigure` messages —
//! requests to install (or overwrite) a protocol definition for a tenant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::grants::{self, Scope};
use crate::jws::Signer;
use crate::protocols::{Action, Actor, Definition, RuleSet};
use crate::provider::{EventStream, Provider};
use crate::records::DelegatedGrant;
use crate::store::{Entry, EventLog, MessageStore, ProtocolsQuery, Query as StoreQuery};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected, utils};

/// Handle — or process — a [`Configure`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails, the
/// definition is invalid, or a newer configuration exists for the protocol.
pub async fn handle(
    owner: &str, configure: Configure, provider: &impl Provider,
) -> Result<Reply<ConfigureReply>> {
    configure.validate()?;
    configure.authorize(owner, provider).await?;

    // fetch existing configurations of the same protocol
    let query = StoreQuery::Protocols(ProtocolsQuery {
        protocol: Some(configure.descriptor.definition.protocol.clone()),
        published: None,
    });
    let (existing, _) = MessageStore::query(provider, owner, &query).await?;

    // the newer (timestamp, cid) configuration wins
    let incoming_key =
        (configure.descriptor.base.message_timestamp, configure.cid()?);
    for entry in &existing {
        let key = (entry.descriptor().message_timestamp, entry.cid()?);
        if key > incoming_key {
            return Err(Error::Conflict("a newer configuration exists".to_string()));
        }
        if key == incoming_key {
            // replayed configuration: idempotent accept
            return Ok(accepted(&configure));
        }
    }

    let entry = Entry::from(&configure);
    MessageStore::put(provider, owner, &entry).await?;
    EventLog::append(provider, owner, &entry).await?;

    // remove the superseded configurations
    for entry in &existing {
        let entry_cid = entry.cid()?;
        MessageStore::delete(provider, owner, &entry_cid).await?;
        EventLog::delete(provider, owner, &entry_cid).await?;
    }

    EventStream::emit(provider, owner, &entry).await?;

    Ok(accepted(&configure))
}

fn accepted(configure: &Configure) -> Reply<ConfigureReply> {
    Reply {
        status: Status {
            code: StatusCode::ACCEPTED.as_u16(),
            detail: None,
        },
        body: Some(ConfigureReply {
            message: configure.clone(),
        }),
    }
}

/// The [`Configure`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configure {
    /// The configure descriptor.
    pub descriptor: ConfigureDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

/// The [`Configure`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// The protocol definition being installed.
    pub definition: Definition,
}

impl Message for Configure {
    type Reply = ConfigureReply;

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

/// [`ConfigureReply`] is returned by the handler in the [`Reply`] `body`
/// field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureReply {
    /// The installed configuration.
    pub message: Configure,
}

impl Configure {
    /// Build the message's index properties.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, Value> {
        let mut indexes = HashMap::new();
        indexes.insert("interface".to_string(), Value::String(Interface::Protocols.to_string()));
        indexes.insert("method".to_string(), Value::String(Method::Configure.to_string()));
        indexes.insert(
            "protocol".to_string(),
            Value::String(self.descriptor.definition.protocol.clone()),
        );
        indexes.insert("published".to_string(), Value::Bool(self.descriptor.definition.published));
        indexes.insert(
            "messageTimestamp".to_string(),
            Value::String(utils::format_date(&self.descriptor.base.message_timestamp)),
        );
        indexes.insert(
            "author".to_string(),
            Value::String(self.authorization.author().unwrap_or_default()),
        );
        indexes
    }

    fn validate(&self) -> Result<()> {
        utils::uri::validate(&self.descriptor.definition.protocol)?;
        for protocol_type in self.descriptor.definition.types.values() {
            if let Some(schema) = &protocol_type.schema {
                utils::uri::validate(schema)?;
            }
        }
        verify_structure(&self.descriptor.definition)
    }

    async fn authorize(&self, owner: &str, provider: &impl Provider) -> Result<()> {
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
            self.verify_scope(&grant.data.scope)?;
        }

        if author == owner {
            return Ok(());
        }

        let Some(grant_id) = &authzn.payload()?.permission_grant_id else {
            return Err(forbidden!("configure failed authorization"));
        };

        let grant = grants::fetch_grant(owner, grant_id, provider).await?;
        grant.verify(owner, owner, &author, &self.descriptor.base, provider).await?;
        self.verify_scope(&grant.data.scope)
    }

    // A protocol-restricted grant only covers configuring that protocol.
    fn verify_scope(&self, scope: &Scope) -> Result<()> {
        let Scope::Protocols { protocol, .. } = scope else {
            return Err(forbidden!("grant scope does not cover protocols"));
        };
        let Some(protocol) = protocol else {
            return Ok(());
        };
        if protocol != &self.descriptor.definition.protocol {
            return Err(forbidden!("message protocol does not match grant protocol"));
        }
        Ok(())
    }
}

// Validate a definition's rule-set tree.
fn verify_structure(definition: &Definition) -> Result<()> {
    let types: Vec<&String> = definition.types.keys().collect();
    let roles = role_paths("", &definition.structure)?;

    for (name, rule_set) in &definition.structure {
        if !types.contains(&name) {
            return Err(unexpected!("rule set {name} is not declared as a type"));
        }
        verify_rule_set(rule_set, name, &types, &roles)?;
    }

    Ok(())
}

// Validate one rule set, recursing into nested sets.
fn verify_rule_set(
    rule_set: &RuleSet, protocol_path: &str, types: &[&String], roles: &[String],
) -> Result<()> {
    let depth = protocol_path.split('/').count();
    if rule_set.global_role.unwrap_or_default() && depth != 1 {
        return Err(unexpected!("global role {protocol_path} must be top-level"));
    }
    if rule_set.context_role.unwrap_or_default() && depth < 2 {
        return Err(unexpected!("context role {protocol_path} must be nested"));
    }

    if let Some(size) = &rule_set.size {
        if size.min.unwrap_or_default() > size.max.unwrap_or(u64::MAX) {
            return Err(unexpected!("invalid size range at '{protocol_path}'"));
        }
    }

    let empty = Vec::new();
    let actions = rule_set.actions.as_ref().unwrap_or(&empty);
    let mut action_iter = actions.iter();

    while let Some(action) = action_iter.next() {
        if action.who.is_some() == action.role.is_some() {
            return Err(unexpected!(
                "exactly one of `who` and `role` must be set for {protocol_path}"
            ));
        }

        // the role must name a declared role record path
        if let Some(role) = &action.role {
            if !roles.contains(role) {
                return Err(unexpected!("missing role {role} in action for {protocol_path}"));
            }
        }

        // `of` must reference an ancestor of this path
        if let Some(of) = &action.of {
            if protocol_path != of && !protocol_path.starts_with(&format!("{of}/")) {
                return Err(unexpected!(
                    "`of` path {of} is not an ancestor of {protocol_path}"
                ));
            }
        }

        if action.who == Some(Actor::Anyone) && action.of.is_some() {
            return Err(unexpected!(
                "`of` must not be set when `who` is \"anyone\" for {protocol_path}"
            ));
        }
        if action.who == Some(Actor::Author) && action.of.is_none() {
            return Err(unexpected!("`of` must be set when `who` is \"author\""));
        }

        // `update` and `delete` only make sense alongside `create`
        if action.can.contains(&Action::Update) && !action.can.contains(&Action::Create) {
            return Err(unexpected!("action rule contains `update` but no `create`"));
        }
        if action.can.contains(&Action::Delete) && !action.can.contains(&Action::Create) {
            return Err(unexpected!("action rule contains `delete` but no `create`"));
        }

        // no two rules may share an actor+of pair or a role
        for other in action_iter.clone() {
            if action.who.is_some() {
                if action.who == other.who && action.of == other.of {
                    return Err(unexpected!(
                        "duplicate actor rule within the rule set at {protocol_path}"
                    ));
                }
            } else if action.role == other.role {
                return Err(unexpected!(
                    "duplicate role rule within the rule set at {protocol_path}"
                ));
            }
        }
    }

    for (name, nested) in &rule_set.structure {
        if !types.contains(&name) {
            return Err(unexpected!("rule set {name} is not declared as a type"));
        }
        verify_rule_set(nested, &format!("{protocol_path}/{name}"), types, roles)?;
    }

    Ok(())
}

// Collect every role record path declared in the structure tree.
fn role_paths(
    prefix: &str, structure: &std::collections::BTreeMap<String, RuleSet>,
) -> Result<Vec<String>> {
    // nesting depth is capped to keep paths (and chains) bounded
    if prefix.split('/').count() > 10 {
        return Err(unexpected!("record nesting depth exceeds 10 levels"));
    }

    let mut roles = Vec::new();
    for (name, rule_set) in structure {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}/{name}") };
        if rule_set.is_role() {
            roles.push(path.clone());
        }
        roles.extend(role_paths(&path, &rule_set.structure)?);
    }

    Ok(roles)
}

/// Builds a [`Configure`] message.
#[derive(Clone, Debug, Default)]
pub struct ConfigureBuilder {
    message_timestamp: DateTime<Utc>,
    definition: Option<Definition>,
    delegated_grant: Option<DelegatedGrant>,
    permission_grant_id: Option<String>,
}

impl ConfigureBuilder {
    /// Returns a new [`ConfigureBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            message_timestamp: utils::now_micros(),
            ..Self::default()
        }
    }

    /// The protocol definition to install.
    #[must_use]
    pub fn definition(mut self, definition: Definition) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Sign using a delegated grant's authority.
    #[must_use]
    pub fn delegated_grant(mut self, delegated_grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(delegated_grant);
        self
    }

    /// Invoke a permission grant by id.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Build and sign the configure message.
    ///
    /// # Errors
    ///
    /// Fails when the definition is missing or invalid, or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Configure> {
        let Some(mut definition) = self.definition else {
            return Err(unexpected!("protocol definition is not set"));
        };

        definition.protocol = utils::uri::clean(&definition.protocol)?;
        for protocol_type in definition.types.values_mut() {
            if let Some(schema) = &protocol_type.schema {
                protocol_type.schema = Some(utils::uri::clean(schema)?);
            }
        }
        verify_structure(&definition)?;

        let descriptor = ConfigureDescriptor {
            base: Descriptor {
                interface: Interface::Protocols,
                method: Method::Configure,
                message_timestamp: self.message_timestamp,
            },
            definition,
        };

        let mut builder = AuthorizationBuilder::new()
            .descriptor_cid(cid::from_value(&serde_json::to_value(&descriptor)?)?);
        if let Some(id) = self.permission_grant_id {
            builder = builder.permission_grant_id(id);
        }
        if let Some(delegated_grant) = self.delegated_grant {
            builder = builder.delegated_grant(delegated_grant);
        }
        let authorization = builder.build(signer).await?;

        Ok(Configure {
            descriptor,
            authorization,
        })
    }
}
