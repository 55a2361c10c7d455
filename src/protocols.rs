//! # Protocols

mod configure;
mod query;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub use self::configure::{Configure, ConfigureBuilder, ConfigureDescriptor, ConfigureReply};
pub use self::query::{ProtocolsFilter, Query, QueryBuilder, QueryDescriptor, QueryReply};
use crate::SizeRange;

/// The URL of the built-in permissions protocol, under which permission
/// request, grant, and revocation records are written.
pub const PROTOCOL_URI: &str = "https://tbd.website/dwn/permissions";

/// The maximum size of a permission record's data payload.
const PERMISSION_SIZE: u64 = 10240;

/// A protocol definition: a named, recursive rule set governing which actors
/// may perform which actions at which paths.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// The protocol's (normalized) URL.
    pub protocol: String,

    /// Whether the definition can be returned to unauthorized queriers.
    pub published: bool,

    /// Declared record types, keyed by type name.
    pub types: BTreeMap<String, ProtocolType>,

    /// The rule-set tree, keyed by type name.
    pub structure: BTreeMap<String, RuleSet>,
}

impl Definition {
    /// Create a definition for the given protocol URL.
    #[must_use]
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    /// Mark the definition as published.
    #[must_use]
    pub const fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Declare a record type.
    #[must_use]
    pub fn add_type(mut self, name: impl Into<String>, protocol_type: ProtocolType) -> Self {
        self.types.insert(name.into(), protocol_type);
        self
    }

    /// Add a top-level rule set.
    #[must_use]
    pub fn add_rule(mut self, name: impl Into<String>, rule_set: RuleSet) -> Self {
        self.structure.insert(name.into(), rule_set);
        self
    }

    /// The rule set at a protocol path, descending the structure tree one
    /// type name per segment.
    #[must_use]
    pub fn rule_set(&self, protocol_path: &str) -> Option<&RuleSet> {
        rule_set(protocol_path, &self.structure)
    }
}

pub(crate) fn rule_set<'a>(
    protocol_path: &str, structure: &'a BTreeMap<String, RuleSet>,
) -> Option<&'a RuleSet> {
    let Some((type_name, rest)) = protocol_path.split_once('/') else {
        return structure.get(protocol_path);
    };
    rule_set(rest, &structure.get(type_name)?.structure)
}

/// A declared record type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolType {
    /// The schema records of this type must carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// The data formats records of this type may carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_formats: Option<Vec<String>>,
}

/// The rule-set node at one position of a protocol's structure tree.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RuleSet {
    /// Bounds on record data size at this path.
    #[serde(rename = "$size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeRange>,

    /// The action rules governing this path.
    #[serde(rename = "$actions")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionRule>>,

    /// Records at this path grant a role tenant-wide: at most one latest
    /// record per (path, recipient).
    #[serde(rename = "$globalRole")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_role: Option<bool>,

    /// Records at this path grant a role within their context: at most one
    /// latest record per (path, recipient, parent context).
    #[serde(rename = "$contextRole")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_role: Option<bool>,

    /// Nested rule sets, keyed by type name.
    #[serde(flatten)]
    pub structure: BTreeMap<String, RuleSet>,
}

impl RuleSet {
    /// Whether records at this path are role records.
    #[must_use]
    pub fn is_role(&self) -> bool {
        self.global_role.unwrap_or_default() || self.context_role.unwrap_or_default()
    }
}

/// An action rule: which actor may perform which actions.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRule {
    /// The actor the rule applies to. Mutually exclusive with `role`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub who: Option<Actor>,

    /// The ancestor path the actor is matched against. Required when `who`
    /// is `author`; optional for `recipient`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub of: Option<String>,

    /// The role path the rule applies to. Mutually exclusive with `who`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// The actions permitted by the rule.
    pub can: Vec<Action>,
}

/// Actor types named by action rules.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Actor {
    /// Anyone, authenticated or not.
    #[default]
    Anyone,

    /// The author of the record at the rule's `of` path.
    Author,

    /// The recipient of the record at the rule's `of` path (or of the
    /// target record, when `of` is absent).
    Recipient,
}

/// Actions named by action rules.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Create a record.
    Create,

    /// Update an existing record.
    Update,

    /// Delete a record.
    Delete,

    /// Query for records.
    Query,

    /// Subscribe to record events.
    Subscribe,

    /// Read a single record.
    #[default]
    Read,
}

/// The built-in permissions protocol definition.
pub(crate) static PERMISSIONS_DEFINITION: LazyLock<Definition> = LazyLock::new(|| {
    Definition::new(PROTOCOL_URI)
        .published(true)
        .add_type("request", ProtocolType {
            schema: None,
            data_formats: Some(vec!["application/json".to_string()]),
        })
        .add_type("grant", ProtocolType {
            schema: None,
            data_formats: Some(vec!["application/json".to_string()]),
        })
        .add_type("revocation", ProtocolType {
            schema: None,
            data_formats: Some(vec!["application/json".to_string()]),
        })
        .add_rule("request", RuleSet {
            size: Some(SizeRange {
                min: None,
                max: Some(PERMISSION_SIZE),
            }),
            actions: Some(vec![ActionRule {
                who: Some(Actor::Anyone),
                of: None,
                role: None,
                can: vec![Action::Create],
            }]),
            ..RuleSet::default()
        })
        .add_rule("grant", RuleSet {
            size: Some(SizeRange {
                min: None,
                max: Some(PERMISSION_SIZE),
            }),
            actions: Some(vec![ActionRule {
                who: Some(Actor::Recipient),
                of: Some("grant".to_string()),
                role: None,
                can: vec![Action::Read, Action::Query, Action::Subscribe],
            }]),
            structure: BTreeMap::from([("revocation".to_string(), RuleSet {
                size: Some(SizeRange {
                    min: None,
                    max: Some(PERMISSION_SIZE),
                }),
                actions: Some(vec![ActionRule {
                    who: Some(Actor::Anyone),
                    of: None,
                    role: None,
                    can: vec![Action::Read],
                }]),
                ..RuleSet::default()
            })]),
            ..RuleSet::default()
        })
});
