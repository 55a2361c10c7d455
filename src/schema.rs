//! # Schema
//!
//! JSON-schema validation of message envelopes. Schemas are embedded at
//! compile time and keyed by `{interface}-{method}`; they are self-contained
//! (no remote references).

use jsonschema::error::ValidationError;
use serde::Serialize;
use serde_json::Value;

use crate::endpoint::Message;
use crate::{Result, unexpected};

/// Validate a message against the JSON schema for its interface/method.
///
/// # Errors
///
/// Fails with `BadRequest` when the message does not match its schema.
pub fn validate(message: &impl Message) -> Result<()> {
    let descriptor = message.descriptor();
    let schema_name = format!("{}-{}", descriptor.interface, descriptor.method).to_lowercase();
    validate_value(&schema_name, message)
}

/// Validate a payload against the named schema.
///
/// # Errors
///
/// Fails with `BadRequest` when the payload does not match the schema.
pub fn validate_value<T: Serialize + ?Sized>(schema: &str, value: &T) -> Result<()> {
    let schema_json = precompiled(schema)?;
    let validator = jsonschema::validator_for(&schema_json)
        .map_err(|e| unexpected!("issue compiling schema {schema}: {e}"))?;
    let instance = serde_json::to_value(value)?;

    let errors: Vec<ValidationError> = validator.iter_errors(&instance).collect();
    if !errors.is_empty() {
        let mut error = String::new();
        for e in errors {
            error.push_str(&format!("\n - {e} at {}", e.instance_path));
        }
        return Err(unexpected!("validation failed for {schema}: {error}"));
    }

    Ok(())
}

// Precompiled JSON schemas.
fn precompiled(schema_name: &str) -> Result<Value> {
    match schema_name {
        "records-write" => {
            let schema = include_bytes!("../schemas/records-write.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "records-read" => {
            let schema = include_bytes!("../schemas/records-read.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "records-query" => {
            let schema = include_bytes!("../schemas/records-query.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "records-subscribe" => {
            let schema = include_bytes!("../schemas/records-subscribe.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "records-delete" => {
            let schema = include_bytes!("../schemas/records-delete.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "protocols-configure" => {
            let schema = include_bytes!("../schemas/protocols-configure.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "protocols-query" => {
            let schema = include_bytes!("../schemas/protocols-query.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "messages-query" => {
            let schema = include_bytes!("../schemas/messages-query.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "messages-read" => {
            let schema = include_bytes!("../schemas/messages-read.json");
            Ok(serde_json::from_slice(schema)?)
        }
        "messages-subscribe" => {
            let schema = include_bytes!("../schemas/messages-subscribe.json");
            Ok(serde_json::from_slice(schema)?)
        }

        _ => Err(unexpected!("schema not found: {schema_name}")),
    }
}
