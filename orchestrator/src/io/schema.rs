//! JSON Schema validation of structured agent output.

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

const CRITIC_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/critic.schema.json"
));
const MODERATOR_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/moderator.schema.json"
));
const VERIFIER_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/verifier.schema.json"
));
const RECOVERY_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/agents/recovery.schema.json"
));

/// Agent roles whose output has a fixed shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSchema {
    Critic,
    Moderator,
    Verifier,
    Recovery,
}

impl OutputSchema {
    pub fn name(self) -> &'static str {
        match self {
            Self::Critic => "critic",
            Self::Moderator => "moderator",
            Self::Verifier => "verifier",
            Self::Recovery => "recovery",
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Critic => CRITIC_SCHEMA,
            Self::Moderator => MODERATOR_SCHEMA,
            Self::Verifier => VERIFIER_SCHEMA,
            Self::Recovery => RECOVERY_SCHEMA,
        }
    }
}

/// Validate `value` against the schema for `schema`, joining every violation.
pub fn validate_output(schema: OutputSchema, value: &Value) -> Result<()> {
    let schema_value: Value = serde_json::from_str(schema.source())
        .map_err(|err| anyhow!("parse {} schema: {err}", schema.name()))?;
    let compiled = validator_for(&schema_value)
        .map_err(|err| anyhow!("invalid {} schema: {err}", schema.name()))?;
    if compiled.is_valid(value) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!(
        "{} output failed schema validation: {}",
        schema.name(),
        messages.join("; ")
    ))
}
