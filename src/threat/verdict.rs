//! Verdict types produced by the validator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::ThreatPolicyConfig;

/// Severity of a finding, ordered from harmless to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    Clean,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Clean => "CLEAN",
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of problem a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatFamily {
    Sql,
    NoSql,
    Ldap,
    Command,
    Script,
    PathTraversal,
    Encoding,
    PayloadSize,
    NestingDepth,
    CollectionSize,
    ControlCharacter,
}

impl ThreatFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatFamily::Sql => "sql",
            ThreatFamily::NoSql => "no_sql",
            ThreatFamily::Ldap => "ldap",
            ThreatFamily::Command => "command",
            ThreatFamily::Script => "script",
            ThreatFamily::PathTraversal => "path_traversal",
            ThreatFamily::Encoding => "encoding",
            ThreatFamily::PayloadSize => "payload_size",
            ThreatFamily::NestingDepth => "nesting_depth",
            ThreatFamily::CollectionSize => "collection_size",
            ThreatFamily::ControlCharacter => "control_character",
        }
    }

    /// Structural families are raised by limit checks, not by patterns.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ThreatFamily::PayloadSize
                | ThreatFamily::NestingDepth
                | ThreatFamily::CollectionSize
                | ThreatFamily::ControlCharacter
        )
    }
}

impl fmt::Display for ThreatFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reason a payload was flagged.
///
/// Never carries the matched text itself, only a truncated SHA-256 of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub family: ThreatFamily,
    pub level: ThreatLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment_hash: Option<String>,
    /// JSON pointer to the offending key or value ("" for the root).
    pub location: String,
    /// Byte offset of the match inside the inspected string.
    pub offset: usize,
}

impl Finding {
    pub fn pattern(
        family: ThreatFamily,
        level: ThreatLevel,
        fragment: &str,
        location: &str,
        offset: usize,
    ) -> Self {
        Self {
            family,
            level,
            fragment_hash: Some(fragment_hash(fragment)),
            location: location.to_string(),
            offset,
        }
    }

    pub fn structural(family: ThreatFamily, level: ThreatLevel, location: &str) -> Self {
        Self {
            family,
            level,
            fragment_hash: None,
            location: location.to_string(),
            offset: 0,
        }
    }
}

/// Hex SHA-256 of a fragment, truncated to 16 characters.
pub fn fragment_hash(fragment: &str) -> String {
    let digest = Sha256::digest(fragment.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(16);
    hex
}

/// Outcome of validating one payload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub threat_level: ThreatLevel,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_payload: Option<Value>,
}

impl ValidationVerdict {
    pub fn clean() -> Self {
        Self {
            threat_level: ThreatLevel::Clean,
            findings: Vec::new(),
            sanitized_payload: None,
        }
    }

    pub fn from_findings(findings: Vec<Finding>, sanitized_payload: Option<Value>) -> Self {
        let threat_level = findings
            .iter()
            .map(|f| f.level)
            .max()
            .unwrap_or(ThreatLevel::Clean);
        Self {
            threat_level,
            findings,
            sanitized_payload,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.threat_level == ThreatLevel::Clean
    }

    /// Whether the policy lets this verdict through.
    ///
    /// Only LOW can fail open. MEDIUM and above are rejected whatever the
    /// policy lists.
    pub fn is_allowed(&self, policy: &ThreatPolicyConfig) -> bool {
        match self.threat_level {
            ThreatLevel::Clean => true,
            ThreatLevel::Low => policy.fail_open_on.contains(&ThreatLevel::Low),
            ThreatLevel::Medium | ThreatLevel::High | ThreatLevel::Critical => false,
        }
    }

    /// Distinct families present in the findings, in first-seen order.
    pub fn families(&self) -> Vec<ThreatFamily> {
        let mut families = Vec::new();
        for finding in &self.findings {
            if !families.contains(&finding.family) {
                families.push(finding.family);
            }
        }
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert!(ThreatLevel::High > ThreatLevel::Medium);
        assert!(ThreatLevel::Low > ThreatLevel::Clean);
    }

    #[test]
    fn test_verdict_takes_max_level() {
        let findings = vec![
            Finding::pattern(ThreatFamily::Encoding, ThreatLevel::Low, "%27", "/a", 0),
            Finding::pattern(ThreatFamily::Sql, ThreatLevel::Critical, "; drop table", "/b", 3),
            Finding::pattern(ThreatFamily::PathTraversal, ThreatLevel::Medium, "../", "/c", 0),
        ];
        let verdict = ValidationVerdict::from_findings(findings, None);
        assert_eq!(verdict.threat_level, ThreatLevel::Critical);
        assert_eq!(verdict.families().len(), 3);
    }

    #[test]
    fn test_policy_fails_open_only_on_low() {
        let policy = ThreatPolicyConfig {
            fail_open_on: vec![ThreatLevel::Low, ThreatLevel::Medium, ThreatLevel::High],
        };
        let high = ValidationVerdict::from_findings(
            vec![Finding::structural(ThreatFamily::NestingDepth, ThreatLevel::High, "")],
            None,
        );
        assert!(!high.is_allowed(&policy));

        let traversal = ValidationVerdict::from_findings(
            vec![Finding::pattern(ThreatFamily::PathTraversal, ThreatLevel::Medium, "../", "", 0)],
            None,
        );
        assert!(!traversal.is_allowed(&policy));

        let low = ValidationVerdict::from_findings(
            vec![Finding::pattern(ThreatFamily::Encoding, ThreatLevel::Low, "%3c", "", 0)],
            None,
        );
        assert!(low.is_allowed(&policy));
        assert!(!low.is_allowed(&ThreatPolicyConfig { fail_open_on: vec![] }));
    }

    #[test]
    fn test_fragment_hash_is_stable_and_opaque() {
        let a = fragment_hash("' OR '1'='1");
        let b = fragment_hash("' OR '1'='1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(!a.contains("OR"));
    }

    #[test]
    fn test_level_serializes_uppercase() {
        let json = serde_json::to_string(&ThreatLevel::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
