//! # Protocol Authorization
//!
//! Protocol-based authorization for `Records` messages: rule-set lookup,
//! invoked-role verification, ancestor-chain construction, and action-rule
//! evaluation.

use std::collections::BTreeMap;

use crate::authorization::Authorization;
use crate::protocols::{
    Action, ActionRule, Actor, Definition, PERMISSIONS_DEFINITION, PROTOCOL_URI, ProtocolType,
    RuleSet,
};
use crate::records::{Delete, Read, RecordsFilter, Write, write};
use crate::store::{MessageStore, ProtocolsQuery, Query, RecordsQueryBuilder};
use crate::{Result, forbidden, unexpected, utils};

/// Fetch the definition of the protocol named by `protocol_uri`, falling
/// back to the built-in permissions protocol.
pub(crate) async fn definition(
    owner: &str, protocol_uri: &str, store: &impl MessageStore,
) -> Result<Definition> {
    let protocol_uri = utils::uri::clean(protocol_uri)?;

    if protocol_uri == PROTOCOL_URI {
        return Ok(PERMISSIONS_DEFINITION.clone());
    }

    let query = Query::Protocols(ProtocolsQuery {
        protocol: Some(protocol_uri.clone()),
        published: None,
    });
    let (entries, _) = store.query(owner, &query).await?;
    let Some(entry) = entries.first() else {
        return Err(forbidden!("unable to find protocol definition for {protocol_uri}"));
    };
    let Some(configure) = entry.as_configure() else {
        return Err(unexpected!("unexpected message type"));
    };

    Ok(configure.descriptor.definition.clone())
}

/// Validate the structure of a protocol-bound `RecordsWrite` against its
/// protocol definition: declared type, path and context lineage, role-record
/// uniqueness, and size bounds.
pub(crate) async fn verify_integrity(
    owner: &str, write: &Write, store: &impl MessageStore,
) -> Result<()> {
    let Some(protocol) = &write.descriptor.protocol else {
        return Err(unexpected!("missing protocol"));
    };
    let definition = definition(owner, protocol, store).await?;

    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(rule_set) = definition.rule_set(protocol_path) else {
        return Err(forbidden!("no rule set defined for protocol path {protocol_path}"));
    };

    verify_type(write, &definition.types)?;
    verify_protocol_path(owner, write, store).await?;
    if rule_set.is_role() {
        verify_role_record(owner, write, rule_set, store).await?;
    }
    verify_size_limit(write.descriptor.data_size, rule_set)?;

    Ok(())
}

// Verify the write's `schema` and `dataFormat` against its declared type.
fn verify_type(write: &Write, types: &BTreeMap<String, ProtocolType>) -> Result<()> {
    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(type_name) = protocol_path.split('/').next_back() else {
        return Err(unexpected!("missing type name"));
    };
    let Some(protocol_type) = types.get(type_name) else {
        return Err(forbidden!("record with type {type_name} not allowed in protocol"));
    };

    if protocol_type.schema.is_some() && protocol_type.schema != write.descriptor.schema {
        return Err(forbidden!("invalid schema for type {type_name}"));
    }
    if let Some(data_formats) = &protocol_type.data_formats {
        if !data_formats.contains(&write.descriptor.data_format) {
            return Err(forbidden!("invalid data format for type {type_name}"));
        }
    }

    Ok(())
}

// Verify `protocolPath` and `contextId` match the record's actual lineage.
async fn verify_protocol_path(owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(type_name) = protocol_path.split('/').next_back() else {
        return Err(unexpected!("missing type name"));
    };

    let Some(parent_id) = &write.descriptor.parent_id else {
        if protocol_path != type_name {
            return Err(forbidden!("invalid protocol path for parentless record"));
        }
        if write.context_id.as_deref() != Some(write.record_id.as_str()) {
            return Err(unexpected!("invalid `contextId` for parentless record"));
        }
        return Ok(());
    };

    // the parent must exist, be latest, and share the protocol
    let query = RecordsQueryBuilder::new()
        .add_filter(
            RecordsFilter::new()
                .record_id(parent_id)
                .protocol(write.descriptor.protocol.clone().unwrap_or_default()),
        )
        .build();
    let (entries, _) = store.query(owner, &query).await?;
    let Some(parent) = entries.first().and_then(|entry| entry.as_write()) else {
        return Err(forbidden!("unable to find parent record {parent_id}"));
    };

    let Some(parent_path) = &parent.descriptor.protocol_path else {
        return Err(unexpected!("parent record has no protocol path"));
    };
    if &format!("{parent_path}/{type_name}") != protocol_path {
        return Err(forbidden!("invalid `protocolPath`"));
    }

    let Some(context_id) = &write.context_id else {
        return Err(unexpected!("missing `contextId`"));
    };
    let Some(parent_context_id) = &parent.context_id else {
        return Err(unexpected!("parent record has no `contextId`"));
    };
    if context_id != &format!("{parent_context_id}/{}", write.record_id) {
        return Err(unexpected!("invalid `contextId`"));
    }

    Ok(())
}

// Role records name a recipient, and at most one latest role record may
// exist per recipient — tenant-wide for global roles, per parent context for
// context roles.
async fn verify_role_record(
    owner: &str, write: &Write, rule_set: &RuleSet, store: &impl MessageStore,
) -> Result<()> {
    let Some(recipient) = &write.descriptor.recipient else {
        return Err(forbidden!("role record is missing recipient"));
    };

    let mut filter = RecordsFilter::new()
        .protocol(write.descriptor.protocol.clone().unwrap_or_default())
        .protocol_path(write.descriptor.protocol_path.clone().unwrap_or_default())
        .add_recipient(recipient);

    if rule_set.context_role.unwrap_or_default() {
        let parent_context = write
            .context_id
            .as_ref()
            .and_then(|context_id| context_id.rsplit_once('/').map(|(parent, _)| parent));
        if let Some(parent_context) = parent_context {
            filter = filter.context_id(parent_context);
        }
    }

    let query = RecordsQueryBuilder::new().add_filter(filter).build();
    let (entries, _) = store.query(owner, &query).await?;

    for entry in entries {
        if let Some(matched) = entry.as_write() {
            if matched.record_id != write.record_id {
                return Err(forbidden!(
                    "DID '{recipient}' is already recipient of a role record at this path"
                ));
            }
        }
    }

    Ok(())
}

// Verify the write's data size against the rule set's `$size` bounds.
fn verify_size_limit(data_size: u64, rule_set: &RuleSet) -> Result<()> {
    let Some(range) = &rule_set.size else {
        return Ok(());
    };

    if let Some(min) = range.min {
        if data_size < min {
            return Err(forbidden!("data size is less than allowed"));
        }
    }
    if let Some(max) = range.max {
        if data_size > max {
            return Err(forbidden!("data size is greater than allowed"));
        }
    }

    Ok(())
}

/// Protocol-based authorization for `RecordsWrite` messages.
pub(crate) async fn permit_write(owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
    let Some(protocol) = &write.descriptor.protocol else {
        return Err(unexpected!("missing protocol"));
    };
    let definition = definition(owner, protocol, store).await?;

    let Some(protocol_path) = &write.descriptor.protocol_path else {
        return Err(unexpected!("missing protocol path"));
    };
    let Some(rule_set) = definition.rule_set(protocol_path) else {
        return Err(forbidden!("no rule set defined for protocol path {protocol_path}"));
    };

    // the chain the write's action rules are evaluated against: the existing
    // record's chain, or the parent's chain for a brand new record
    let initial = write::initial_write(owner, &write.record_id, store).await?;
    let record_chain = if initial.is_some() {
        record_chain(owner, &write.record_id, store).await?
    } else if let Some(parent_id) = &write.descriptor.parent_id {
        record_chain(owner, parent_id, store).await?
    } else {
        vec![]
    };

    let candidates = if write.is_initial()? {
        vec![Action::Create]
    } else {
        let Some(initial) = &initial else {
            return Err(forbidden!("initial write not found for update"));
        };
        if write.authorization.author()? == initial.authorization.author()? {
            vec![Action::Create, Action::Update]
        } else {
            vec![Action::Update]
        }
    };

    let invoked_role = verify_invoked_role(
        owner,
        &write.authorization,
        protocol,
        write.context_id.as_deref(),
        &definition,
        store,
    )
    .await?;

    verify_actions(
        &write.authorization.author()?,
        invoked_role.as_deref(),
        &candidates,
        rule_set,
        &record_chain,
        write.descriptor.recipient.as_deref(),
    )
}

/// Authorizes non-write `Records` messages against a protocol's rule sets.
#[derive(Debug)]
pub struct Authorizer<'a> {
    protocol: &'a str,
    context_id: Option<&'a str>,
    record_write: Option<&'a Write>,
}

impl<'a> Authorizer<'a> {
    /// Create an authorizer for the given (normalized) protocol.
    #[must_use]
    pub const fn new(protocol: &'a str) -> Self {
        Self {
            protocol,
            context_id: None,
            record_write: None,
        }
    }

    /// The context the incoming message operates in.
    #[must_use]
    pub fn context_id(mut self, context_id: Option<&'a String>) -> Self {
        self.context_id = context_id.map(String::as_str);
        self
    }

    /// The target record's current write, for read/delete authorization.
    #[must_use]
    pub const fn record_write(mut self, write: &'a Write) -> Self {
        self.record_write = Some(write);
        self
    }

    /// Authorize a `RecordsRead` of the target record.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when no action rule admits the read.
    pub async fn permit_read(&self, owner: &str, read: &Read, store: &impl MessageStore) -> Result<()> {
        let Some(authzn) = &read.authorization else {
            return Err(forbidden!("read is not signed"));
        };
        let Some(write) = self.record_write else {
            return Err(unexpected!("no record to authorize against"));
        };
        let Some(protocol_path) = &write.descriptor.protocol_path else {
            return Err(unexpected!("record has no protocol path"));
        };

        let chain = record_chain(owner, &write.record_id, store).await?;
        self.permit(owner, authzn, protocol_path, &[Action::Read], &chain, write.descriptor.recipient.as_deref(), store)
            .await
    }

    /// Authorize a `RecordsDelete` of the target record.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when no action rule admits the delete.
    pub async fn permit_delete(
        &self, owner: &str, delete: &Delete, store: &impl MessageStore,
    ) -> Result<()> {
        let Some(write) = self.record_write else {
            return Err(unexpected!("no record to authorize against"));
        };
        let Some(protocol_path) = &write.descriptor.protocol_path else {
            return Err(unexpected!("record has no protocol path"));
        };

        let chain = record_chain(owner, &delete.descriptor.record_id, store).await?;
        self.permit(
            owner,
            &delete.authorization,
            protocol_path,
            &[Action::Delete],
            &chain,
            write.descriptor.recipient.as_deref(),
            store,
        )
        .await
    }

    /// Authorize a `RecordsQuery` filtered to a protocol path.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when no action rule admits the query.
    pub async fn permit_query(
        &self, owner: &str, protocol_path: &str, authzn: &Authorization, store: &impl MessageStore,
    ) -> Result<()> {
        self.permit(owner, authzn, protocol_path, &[Action::Query], &[], None, store).await
    }

    /// Authorize a `RecordsSubscribe` filtered to a protocol path.
    ///
    /// # Errors
    ///
    /// Fails with `Forbidden` when no action rule admits the subscription.
    pub async fn permit_subscribe(
        &self, owner: &str, protocol_path: &str, authzn: &Authorization, store: &impl MessageStore,
    ) -> Result<()> {
        self.permit(owner, authzn, protocol_path, &[Action::Subscribe], &[], None, store).await
    }

    async fn permit(
        &self, owner: &str, authzn: &Authorization, protocol_path: &str, candidates: &[Action],
        record_chain: &[Write], recipient: Option<&str>, store: &impl MessageStore,
    ) -> Result<()> {
        let definition = definition(owner, self.protocol, store).await?;
        let Some(rule_set) = definition.rule_set(protocol_path) else {
            return Err(forbidden!("no rule set defined for protocol path {protocol_path}"));
        };

        let invoked_role =
            verify_invoked_role(owner, authzn, self.protocol, self.context_id, &definition, store)
                .await?;

        verify_actions(
            &authzn.author()?,
            invoked_role.as_deref(),
            candidates,
            rule_set,
            record_chain,
            recipient,
        )
    }
}

// When the message invokes a protocol role, verify the role path exists, is
// marked as a role, and that a matching role record grants the author.
async fn verify_invoked_role(
    owner: &str, authzn: &Authorization, protocol: &str, context_id: Option<&str>,
    definition: &Definition, store: &impl MessageStore,
) -> Result<Option<String>> {
    let Some(protocol_role) = authzn.payload()?.protocol_role else {
        return Ok(None);
    };
    let author = authzn.author()?;

    let Some(rule_set) = definition.rule_set(&protocol_role) else {
        return Err(forbidden!("protocol path {protocol_role} does not exist"));
    };
    if !rule_set.is_role() {
        return Err(forbidden!("protocol path {protocol_role} is not a role"));
    }

    let mut filter = RecordsFilter::new()
        .protocol(protocol)
        .protocol_path(&protocol_role)
        .add_recipient(&author);

    // context roles are granted within the role record's parent context
    let segments = protocol_role.split('/').count();
    if segments > 1 {
        let Some(context_id) = context_id else {
            return Err(forbidden!("unable to verify role without `contextId`"));
        };
        let prefix =
            context_id.split('/').take(segments - 1).collect::<Vec<&str>>().join("/");
        filter = filter.context_id(prefix);
    }

    let query = RecordsQueryBuilder::new().add_filter(filter).build();
    let (entries, _) = store.query(owner, &query).await?;
    if entries.is_empty() {
        return Err(forbidden!("unable to find role record for {protocol_role}"));
    }

    Ok(Some(protocol_role))
}

// Walk the action rules; the message is authorized when some rule's actions
// overlap the candidates and its actor condition holds.
fn verify_actions(
    author: &str, invoked_role: Option<&str>, candidates: &[Action], rule_set: &RuleSet,
    record_chain: &[Write], recipient: Option<&str>,
) -> Result<()> {
    let Some(action_rules) = &rule_set.actions else {
        return Err(forbidden!("no action rule defined, {author} is unauthorized"));
    };

    for rule in action_rules {
        if !rule.can.iter().any(|action| candidates.contains(action)) {
            continue;
        }

        // a role rule matches only the invoked (and already verified) role
        if let Some(role) = &rule.role {
            if invoked_role == Some(role.as_str()) {
                return Ok(());
            }
            continue;
        }

        match &rule.who {
            Some(Actor::Anyone) => return Ok(()),
            Some(Actor::Recipient) if rule.of.is_none() => {
                if recipient == Some(author) {
                    return Ok(());
                }
            }
            Some(actor @ (Actor::Author | Actor::Recipient)) => {
                if check_actor(author, actor, rule, record_chain)? {
                    return Ok(());
                }
            }
            None => {}
        }
    }

    Err(forbidden!("action not allowed for {author}"))
}

// Match the rule's actor against the ancestor at the rule's `of` path.
fn check_actor(
    author: &str, actor: &Actor, rule: &ActionRule, record_chain: &[Write],
) -> Result<bool> {
    let Some(ancestor) =
        record_chain.iter().find(|write| write.descriptor.protocol_path == rule.of)
    else {
        return Ok(false);
    };

    if actor == &Actor::Recipient {
        return Ok(ancestor.descriptor.recipient.as_deref() == Some(author));
    }
    Ok(author == ancestor.authorization.author()?)
}

// Construct the chain of existing records from the protocol tree's root down
// to the given record, as initial writes.
async fn record_chain(
    owner: &str, record_id: &str, store: &impl MessageStore,
) -> Result<Vec<Write>> {
    let mut chain = vec![];
    let mut current_id = Some(record_id.to_owned());

    while let Some(record_id) = &current_id {
        let Some(initial) = write::initial_write(owner, record_id, store).await? else {
            return Err(forbidden!(
                "no parent found with ID {record_id} when constructing record chain"
            ));
        };

        current_id.clone_from(&initial.descriptor.parent_id);
        chain.push(initial);
    }

    // root record first
    chain.reverse();
    Ok(chain)
}
