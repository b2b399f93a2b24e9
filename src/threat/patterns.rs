//! Built-in pattern library and the matcher that runs it.
//!
//! # Families
//! - SQL: stacked statements, UNION probes, tautologies, time-based probes
//! - NoSQL: operator keys (`$ne`, `$where`, ...) and operator objects in text
//! - LDAP: filter breakouts and wildcard filters
//! - Command: shell separators followed by a command, substitutions
//! - Script: script tags, event handlers, script URLs, DOM sinks
//! - Path traversal (MEDIUM) and suspicious percent-encoding (LOW)
//!
//! Patterns require injection *structure*, not keywords, so ordinary prose
//! ("select the best option", "Tom & Jerry") stays clean.

use crate::threat::detector::{Detection, Detector, PatternDetector, Site};
use crate::threat::verdict::{ThreatFamily, ThreatLevel};

use ThreatLevel::{Critical, High, Low, Medium};

const SQL: &[(&str, ThreatLevel)] = &[
    (r"(?i)\bunion\b(\s+all)?\s+select\b", Critical),
    (
        r"(?i);\s*(drop|truncate|alter|create)\s+(table|database|schema|index|view|user|procedure)\b",
        Critical,
    ),
    (
        r"(?i);\s*(delete\s+from|insert\s+into|update\s+\w+\s+set|exec(ute)?\s+\w+|shutdown\b)",
        Critical,
    ),
    (
        r"(?i)'\s*\)*\s*(or|and)\s+\(*\s*('[^']*'|\w+)\s*(=|<|>|\blike\b)",
        Critical,
    ),
    (r"(?i)\b(or|and)\s+(\d+)\s*=\s*\d+", High),
    (r"(?i)'\s*(--|/\*|;\s*--|#(\s|$))", High),
    (r"(?i)\b(sleep|benchmark|pg_sleep)\s*\(\s*\d", High),
    (r"(?i)\bwaitfor\s+delay\b", High),
    (r"(?i)\bxp_cmdshell\b", Critical),
    (r"(?i)\binformation_schema\b", High),
];

const NOSQL_VALUES: &[(&str, ThreatLevel)] = &[
    (r"(?i)\$where\b", Critical),
    (
        r#"\{\s*"?\$(ne|eq|gt|gte|lt|lte|in|nin|regex|exists|or|and|not|nor|expr)"?\s*:"#,
        High,
    ),
    (r"\[\$(ne|eq|gt|gte|lt|lte|in|nin|regex|exists)\]", High),
    (
        r"(?i)\bdb\.\w+\.(find|drop|remove|insert|update|delete|aggregate)\w*\s*\(",
        Critical,
    ),
    (r"\bthis\.\w+\s*(==|!=|>=|<=)", High),
];

const NOSQL_KEYS: &[(&str, ThreatLevel)] = &[
    (r"^\$(where|function|accumulator|expr)$", Critical),
    (
        r"^\$(ne|eq|gt|gte|lt|lte|in|nin|regex|exists|or|and|not|nor|elemMatch|all|size|type|mod|text)$",
        High,
    ),
];

const LDAP: &[(&str, ThreatLevel)] = &[
    (r"\*\)\s*\(", High),
    (r"\)\s*\(\s*[|&!]", High),
    (r"\(\s*[|&]\s*\(\s*\w+\s*[~<>]?=", High),
    (r"\(\s*\w+\s*=\s*\*\s*\)", High),
];

const COMMAND: &[(&str, ThreatLevel)] = &[
    // Statement separators and substitutions: any argument, or none.
    (
        r"(;|&&|\|\||`|\$\()\s*(rm|wget|curl|nc|ncat|netcat|bash|sh|zsh|chmod|chown|python[0-9.]*|perl|ruby|php|cat|ls|id|whoami|uname|kill|killall|shutdown|reboot|ping|nslookup|sleep|touch|env|powershell|cmd)\b(\s+[-/~.$\d]|\s+https?:|\s*$|\s*[;&|`)])",
        Critical,
    ),
    (r"(;|&&|\|\||`|\$\()\s*(echo|printf)\s+\S", Critical),
    // A lone pipe or ampersand reads like prose unless a flag or path follows.
    (
        r"[|&]\s*(rm|wget|curl|nc|ncat|netcat|bash|sh|zsh|chmod|chown|python[0-9.]*|perl|ruby|php|cat|ls|id|whoami|uname|kill|killall|ping|nslookup|sleep|touch|env)\b(\s+[-/~.$]|\s+https?:)",
        Critical,
    ),
    (r"\$\(\s*[a-z_][\w./-]*[^)]*\)", Critical),
    (r"`\s*(rm|wget|curl|cat|id|whoami|uname|ls|nc|bash|sh)\b[^`]*`", High),
    (r"/etc/(passwd|shadow|sudoers)\b", High),
    (r"(?i)\b(cmd(\.exe)?\s*/c|powershell(\.exe)?\s+-\w)", Critical),
];

const SCRIPT: &[(&str, ThreatLevel)] = &[
    (r"(?i)<\s*/?\s*script\b", Critical),
    (r"(?i)\b(java|vb)script:\S", High),
    (
        r"(?i)\bon(error|load|click|dblclick|mouseover|mouseout|mouseenter|focus|blur|submit|change|input|keydown|keyup|keypress|toggle|begin|animationstart|pageshow)\s*=",
        High,
    ),
    (r"(?i)<\s*(iframe|object|embed|applet|meta|base|svg|math)\b", High),
    (r"(?i)\bdata:text/html", High),
    (r"(?i)\bdocument\.(cookie|write|location|domain)\b", High),
    (
        r"(?i)\b(eval|alert|prompt|settimeout|setinterval|string\.fromcharcode)\(",
        High,
    ),
];

const PATH_TRAVERSAL: &[(&str, ThreatLevel)] = &[
    (r"\.\./|\.\.\\", Medium),
    (r"(?i)%2e%2e(%2f|%5c|/|\\)", Medium),
];

const ENCODING: &[(&str, ThreatLevel)] = &[
    (r"(?i)%00", Medium),
    (r"(?i)%(27|22|3c|3e|3b|60|7c)", Low),
    (r"(?i)\\x(27|22|3c|3e)", Low),
    (r"(?i)&#(x0*3c|0*60|x0*27|0*39);", Low),
];

/// A detection tagged with the family that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyDetection {
    pub family: ThreatFamily,
    pub detection: Detection,
}

/// Runs every registered detector over a string.
pub struct ThreatPatternMatcher {
    detectors: Vec<Box<dyn Detector>>,
}

impl ThreatPatternMatcher {
    /// A matcher with no detectors.
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// The built-in library, optionally extended with extra value patterns per family.
    pub fn builtin_with(extra: &[(ThreatFamily, String, ThreatLevel)]) -> Result<Self, regex::Error> {
        let mut detectors = vec![
            PatternDetector::new(ThreatFamily::Sql).with_value_rules(SQL)?,
            PatternDetector::new(ThreatFamily::NoSql)
                .with_value_rules(NOSQL_VALUES)?
                .with_key_rules(NOSQL_KEYS)?,
            PatternDetector::new(ThreatFamily::Ldap).with_value_rules(LDAP)?,
            PatternDetector::new(ThreatFamily::Command).with_value_rules(COMMAND)?,
            PatternDetector::new(ThreatFamily::Script).with_value_rules(SCRIPT)?,
            PatternDetector::new(ThreatFamily::PathTraversal).with_value_rules(PATH_TRAVERSAL)?,
            PatternDetector::new(ThreatFamily::Encoding).with_value_rules(ENCODING)?,
        ];

        for (family, pattern, level) in extra {
            match detectors.iter_mut().find(|d| d.family() == *family) {
                Some(detector) => detector.add_value_rule(pattern, *level)?,
                None => {
                    let mut detector = PatternDetector::new(*family);
                    detector.add_value_rule(pattern, *level)?;
                    detectors.push(detector);
                }
            }
        }

        let mut matcher = Self::empty();
        for detector in detectors {
            matcher = matcher.with_detector(Box::new(detector));
        }
        Ok(matcher)
    }

    pub fn builtin() -> Result<Self, regex::Error> {
        Self::builtin_with(&[])
    }

    /// Register an additional detector. Detectors run in registration order.
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Run every applicable detector over `text`.
    pub fn scan(&self, text: &str, site: Site) -> Vec<FamilyDetection> {
        let mut out = Vec::new();
        for detector in &self.detectors {
            if site == Site::Key && !detector.inspects_keys() {
                continue;
            }
            let family = detector.family();
            out.extend(
                detector
                    .scan(text, site)
                    .into_iter()
                    .map(|detection| FamilyDetection { family, detection }),
            );
        }
        out
    }
}

impl std::fmt::Debug for ThreatPatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatPatternMatcher")
            .field("detectors", &self.detectors.len())
            .finish()
    }
}
