//! Zero-trust payload validator.
//!
//! # Order of checks
//! 1. Structural limits (size, depth, collection length, control characters).
//!    The first violation ends validation; patterns never run on it.
//! 2. Allow-listed values skip pattern matching.
//! 3. Every detector runs on every remaining string leaf (and keys, for
//!    detectors that inspect keys).

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use crate::config::ValidationConfig;
use crate::threat::detector::Site;
use crate::threat::patterns::ThreatPatternMatcher;
use crate::threat::verdict::{Finding, ThreatFamily, ThreatLevel, ValidationVerdict};

/// Structural limits applied before any pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_payload_bytes: usize,
    pub max_depth: usize,
    pub max_collection_len: usize,
}

impl From<&ValidationConfig> for ValidationLimits {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            max_payload_bytes: config.max_payload_bytes,
            max_depth: config.max_depth,
            max_collection_len: config.max_collection_len,
        }
    }
}

/// Validates inbound payloads and produces a [`ValidationVerdict`].
#[derive(Debug)]
pub struct ZeroTrustValidator {
    matcher: ThreatPatternMatcher,
    limits: ValidationLimits,
    allow_lists: HashMap<String, HashSet<String>>,
}

impl ZeroTrustValidator {
    pub fn new(matcher: ThreatPatternMatcher, limits: ValidationLimits) -> Self {
        Self {
            matcher,
            limits,
            allow_lists: HashMap::new(),
        }
    }

    /// Build from configuration: built-in patterns plus configured extras.
    pub fn from_config(config: &ValidationConfig) -> Result<Self, regex::Error> {
        let extra: Vec<_> = config
            .custom_patterns
            .iter()
            .map(|p| (p.family, p.pattern.clone(), p.level))
            .collect();
        let matcher = ThreatPatternMatcher::builtin_with(&extra)?;

        let mut validator = Self::new(matcher, ValidationLimits::from(config));
        for (field, values) in &config.allow_lists {
            validator = validator.allow(field, values.iter().cloned());
        }
        Ok(validator)
    }

    /// Allow-list enumerated values for a field name.
    pub fn allow(mut self, field: &str, values: impl IntoIterator<Item = String>) -> Self {
        self.allow_lists
            .entry(field.to_string())
            .or_default()
            .extend(values);
        self
    }

    pub fn limits(&self) -> ValidationLimits {
        self.limits
    }

    /// Validate a structured payload.
    pub fn validate(&self, payload: &Value) -> ValidationVerdict {
        let mut budget = Budget::new(self.limits.max_payload_bytes);
        let mut path = String::new();
        if let Err(finding) = self.check_structure(payload, 0, &mut path, &mut budget) {
            return ValidationVerdict::from_findings(vec![finding], None);
        }

        let mut findings = Vec::new();
        self.scan_value(payload, None, &mut String::new(), &mut findings);
        if findings.is_empty() {
            return ValidationVerdict::clean();
        }

        let sanitized = sanitize(payload, &findings);
        ValidationVerdict::from_findings(findings, Some(sanitized))
    }

    /// Validate a bare string.
    pub fn validate_text(&self, text: &str) -> ValidationVerdict {
        if text.len() > self.limits.max_payload_bytes {
            return ValidationVerdict::from_findings(
                vec![Finding::structural(ThreatFamily::PayloadSize, ThreatLevel::Critical, "")],
                None,
            );
        }
        if let Some(offset) = find_control_char(text) {
            let mut finding = Finding::structural(ThreatFamily::ControlCharacter, ThreatLevel::High, "");
            finding.offset = offset;
            return ValidationVerdict::from_findings(vec![finding], None);
        }

        let mut findings = Vec::new();
        self.scan_text(text, Site::Value, "", &mut findings);
        if findings.is_empty() {
            return ValidationVerdict::clean();
        }
        let sanitized = Value::String(html_escape(text));
        ValidationVerdict::from_findings(findings, Some(sanitized))
    }

    fn check_structure(
        &self,
        value: &Value,
        depth: usize,
        path: &mut String,
        budget: &mut Budget,
    ) -> Result<(), Finding> {
        if depth > self.limits.max_depth {
            return Err(Finding::structural(ThreatFamily::NestingDepth, ThreatLevel::High, path));
        }

        match value {
            Value::Null => budget.spend(4, path),
            Value::Bool(_) => budget.spend(5, path),
            Value::Number(n) => budget.spend(n.to_string().len(), path),
            Value::String(s) => {
                budget.spend(s.len() + 2, path)?;
                control_char_check(s, path)
            }
            Value::Array(items) => {
                if items.len() > self.limits.max_collection_len {
                    return Err(Finding::structural(
                        ThreatFamily::CollectionSize,
                        ThreatLevel::High,
                        path,
                    ));
                }
                budget.spend(2 + items.len(), path)?;
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    push_index(path, i);
                    self.check_structure(item, depth + 1, path, budget)?;
                    path.truncate(len);
                }
                Ok(())
            }
            Value::Object(map) => {
                if map.len() > self.limits.max_collection_len {
                    return Err(Finding::structural(
                        ThreatFamily::CollectionSize,
                        ThreatLevel::High,
                        path,
                    ));
                }
                budget.spend(2 + map.len(), path)?;
                for (key, item) in map {
                    let len = path.len();
                    push_key(path, key);
                    budget.spend(key.len() + 3, path)?;
                    control_char_check(key, path)?;
                    self.check_structure(item, depth + 1, path, budget)?;
                    path.truncate(len);
                }
                Ok(())
            }
        }
    }

    fn scan_value(&self, value: &Value, field: Option<&str>, path: &mut String, findings: &mut Vec<Finding>) {
        match value {
            Value::String(s) => {
                if self.is_allow_listed(field, s) {
                    return;
                }
                self.scan_text(s, Site::Value, path, findings);
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    push_index(path, i);
                    // Array elements inherit the enclosing field name for allow-listing.
                    self.scan_value(item, field, path, findings);
                    path.truncate(len);
                }
            }
            Value::Object(map) => {
                for (key, item) in map {
                    let len = path.len();
                    push_key(path, key);
                    self.scan_text(key, Site::Key, path, findings);
                    self.scan_value(item, Some(key), path, findings);
                    path.truncate(len);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn scan_text(&self, text: &str, site: Site, location: &str, findings: &mut Vec<Finding>) {
        for hit in self.matcher.scan(text, site) {
            let fragment = text.get(hit.detection.start..hit.detection.end).unwrap_or_default();
            findings.push(Finding::pattern(
                hit.family,
                hit.detection.level,
                fragment,
                location,
                hit.detection.start,
            ));
        }
    }

    fn is_allow_listed(&self, field: Option<&str>, value: &str) -> bool {
        field
            .and_then(|f| self.allow_lists.get(f))
            .is_some_and(|values| values.contains(value))
    }
}

/// Running estimate of the serialized payload size.
struct Budget {
    remaining: usize,
}

impl Budget {
    fn new(max: usize) -> Self {
        Self { remaining: max }
    }

    fn spend(&mut self, bytes: usize, path: &str) -> Result<(), Finding> {
        match self.remaining.checked_sub(bytes) {
            Some(left) => {
                self.remaining = left;
                Ok(())
            }
            None => Err(Finding::structural(
                ThreatFamily::PayloadSize,
                ThreatLevel::Critical,
                path,
            )),
        }
    }
}

fn control_char_check(s: &str, path: &str) -> Result<(), Finding> {
    match find_control_char(s) {
        Some(offset) => {
            let mut finding = Finding::structural(ThreatFamily::ControlCharacter, ThreatLevel::High, path);
            finding.offset = offset;
            Err(finding)
        }
        None => Ok(()),
    }
}

/// Byte offset of the first disallowed control character.
///
/// TAB, LF and CR are permitted.
fn find_control_char(s: &str) -> Option<usize> {
    s.char_indices()
        .find(|(_, c)| c.is_ascii_control() && !matches!(c, '\t' | '\n' | '\r'))
        .map(|(i, _)| i)
}

/// Append an RFC 6901 reference token for an object key.
fn push_key(path: &mut String, key: &str) {
    path.push('/');
    for c in key.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            c => path.push(c),
        }
    }
}

fn push_index(path: &mut String, index: usize) {
    path.push('/');
    path.push_str(&index.to_string());
}

/// Copy of `payload` with every flagged string leaf HTML-escaped.
fn sanitize(payload: &Value, findings: &[Finding]) -> Value {
    let locations: BTreeSet<&str> = findings.iter().map(|f| f.location.as_str()).collect();
    let mut sanitized = payload.clone();
    for location in locations {
        if let Some(Value::String(s)) = sanitized.pointer_mut(location) {
            *s = html_escape(s);
        }
    }
    sanitized
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ZeroTrustValidator {
        ZeroTrustValidator::from_config(&ValidationConfig::default()).unwrap()
    }

    #[test]
    fn test_clean_document() {
        let verdict = validator().validate(&json!({
            "name": "Alice Johnson",
            "age": 34,
            "active": true,
            "tags": ["electronics", "books"],
        }));
        assert!(verdict.is_clean());
        assert!(verdict.sanitized_payload.is_none());
    }

    #[test]
    fn test_oversized_payload_short_circuits() {
        let config = ValidationConfig {
            max_payload_bytes: 64,
            ..ValidationConfig::default()
        };
        let validator = ZeroTrustValidator::from_config(&config).unwrap();
        let big = "a".repeat(100) + "' OR '1'='1";

        let verdict = validator.validate(&json!({ "q": big }));
        assert_eq!(verdict.threat_level, ThreatLevel::Critical);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].family, ThreatFamily::PayloadSize);
    }

    #[test]
    fn test_depth_limit() {
        let config = ValidationConfig {
            max_depth: 3,
            ..ValidationConfig::default()
        };
        let validator = ZeroTrustValidator::from_config(&config).unwrap();
        let verdict = validator.validate(&json!({"a": {"b": {"c": {"d": 1}}}}));
        assert_eq!(verdict.threat_level, ThreatLevel::High);
        assert_eq!(verdict.findings[0].family, ThreatFamily::NestingDepth);
        assert_eq!(verdict.findings[0].location, "/a/b/c/d");
    }

    #[test]
    fn test_collection_limit() {
        let config = ValidationConfig {
            max_collection_len: 4,
            ..ValidationConfig::default()
        };
        let validator = ZeroTrustValidator::from_config(&config).unwrap();
        let verdict = validator.validate(&json!({"ids": [1, 2, 3, 4, 5]}));
        assert_eq!(verdict.findings[0].family, ThreatFamily::CollectionSize);
        assert_eq!(verdict.findings[0].location, "/ids");
    }

    #[test]
    fn test_control_character_rejected() {
        let verdict = validator().validate(&json!({"note": "abc\u{0000}def"}));
        assert_eq!(verdict.threat_level, ThreatLevel::High);
        assert_eq!(verdict.findings[0].family, ThreatFamily::ControlCharacter);
        assert_eq!(verdict.findings[0].offset, 3);

        let ok = validator().validate(&json!({"note": "line one\nline two\tend"}));
        assert!(ok.is_clean());
    }

    #[test]
    fn test_allow_list_bypasses_patterns() {
        let validator = validator().allow("sort", vec!["name; drop table x".to_string()]);
        let allowed = validator.validate(&json!({"sort": "name; drop table x"}));
        assert!(allowed.is_clean());

        // Same value under a different field is still inspected.
        let other = validator.validate(&json!({"filter": "name; drop table x"}));
        assert_eq!(other.threat_level, ThreatLevel::Critical);
    }

    #[test]
    fn test_numbers_exempt_from_patterns() {
        let verdict = validator().validate(&json!({"or": 1, "and": 2.5, "flag": false}));
        assert!(verdict.is_clean());
    }

    #[test]
    fn test_operator_key_detected_with_location() {
        let verdict = validator().validate(&json!({"user": {"$ne": null}}));
        assert_eq!(verdict.threat_level, ThreatLevel::High);
        assert_eq!(verdict.findings[0].family, ThreatFamily::NoSql);
        assert_eq!(verdict.findings[0].location, "/user/$ne");
    }

    #[test]
    fn test_low_findings_get_sanitized_copy() {
        let verdict = validator().validate(&json!({"q": "search%3Cterm"}));
        assert_eq!(verdict.threat_level, ThreatLevel::Low);
        assert!(verdict.sanitized_payload.is_some());
    }

    #[test]
    fn test_sanitize_escapes_flagged_leaf_only() {
        let payload = json!({"a": "<b>", "b": "<i>"});
        let findings = vec![Finding::pattern(ThreatFamily::Script, ThreatLevel::Low, "<b>", "/a", 0)];
        let out = sanitize(&payload, &findings);
        assert_eq!(out["a"], "&lt;b&gt;");
        assert_eq!(out["b"], "<i>");
    }

    #[test]
    fn test_findings_never_contain_fragment() {
        let probe = "' OR '1'='1";
        let verdict = validator().validate_text(probe);
        let rendered = serde_json::to_string(&verdict.findings).unwrap();
        assert!(!rendered.contains("OR '1'"));
        assert!(verdict.findings.iter().all(|f| f.fragment_hash.is_some()));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let payload = json!({"b": "<script>", "a": "; rm -rf /", "c": ["$(id)"]});
        let v = validator();
        assert_eq!(v.validate(&payload), v.validate(&payload));
    }

    #[test]
    fn test_pointer_escaping() {
        let mut path = String::new();
        push_key(&mut path, "a/b~c");
        assert_eq!(path, "/a~1b~0c");
    }
}
