//! Inbound operation descriptor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the wrapped storage call does with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Payload is a filter or query document.
    Query,
    /// Payload is persisted; sensitive fields are encrypted first.
    Write,
    /// Payload identifies what to read.
    Read,
}

/// One call into a protected dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub principal_id: String,
    /// Name of the dependency, e.g. a collection or table.
    pub dependency: String,
    pub kind: OperationKind,
    pub payload: Value,
    /// Dot-separated paths of fields stored encrypted.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
}

impl Operation {
    pub fn new(
        principal_id: impl Into<String>,
        dependency: impl Into<String>,
        kind: OperationKind,
        payload: Value,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            dependency: dependency.into(),
            kind,
            payload,
            sensitive_fields: Vec::new(),
        }
    }

    pub fn query(principal_id: impl Into<String>, dependency: impl Into<String>, payload: Value) -> Self {
        Self::new(principal_id, dependency, OperationKind::Query, payload)
    }

    pub fn write(principal_id: impl Into<String>, dependency: impl Into<String>, payload: Value) -> Self {
        Self::new(principal_id, dependency, OperationKind::Write, payload)
    }

    pub fn read(principal_id: impl Into<String>, dependency: impl Into<String>, payload: Value) -> Self {
        Self::new(principal_id, dependency, OperationKind::Read, payload)
    }

    /// Mark fields to encrypt on write and decrypt in results.
    pub fn with_sensitive_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_fields.extend(fields.into_iter().map(Into::into));
        self
    }
}
