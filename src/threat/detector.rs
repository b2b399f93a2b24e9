//! Detector abstraction and the regex-backed implementation.

use regex::Regex;

use crate::threat::verdict::{ThreatFamily, ThreatLevel};

/// Where in a document the inspected text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    /// A string leaf.
    Value,
    /// An object key.
    Key,
}

/// A single match reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub level: ThreatLevel,
    pub start: usize,
    pub end: usize,
}

/// One injection family's classifier.
///
/// Implementations must be pure: the same text always yields the same
/// detections.
pub trait Detector: Send + Sync {
    fn family(&self) -> ThreatFamily;

    /// Whether object keys should be passed to [`Detector::scan`].
    fn inspects_keys(&self) -> bool {
        false
    }

    fn scan(&self, text: &str, site: Site) -> Vec<Detection>;
}

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    level: ThreatLevel,
}

/// Detector driven by a table of regular expressions.
///
/// Each rule reports at most its first match per inspected string.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    family: ThreatFamily,
    value_rules: Vec<Rule>,
    key_rules: Vec<Rule>,
}

impl PatternDetector {
    pub fn new(family: ThreatFamily) -> Self {
        Self {
            family,
            value_rules: Vec::new(),
            key_rules: Vec::new(),
        }
    }

    /// Compile value rules from a pattern table.
    pub fn with_value_rules(mut self, rules: &[(&str, ThreatLevel)]) -> Result<Self, regex::Error> {
        for (pattern, level) in rules {
            self.add_value_rule(pattern, *level)?;
        }
        Ok(self)
    }

    /// Compile key rules from a pattern table.
    pub fn with_key_rules(mut self, rules: &[(&str, ThreatLevel)]) -> Result<Self, regex::Error> {
        for (pattern, level) in rules {
            self.key_rules.push(Rule {
                regex: Regex::new(pattern)?,
                level: *level,
            });
        }
        Ok(self)
    }

    pub fn add_value_rule(&mut self, pattern: &str, level: ThreatLevel) -> Result<(), regex::Error> {
        self.value_rules.push(Rule {
            regex: Regex::new(pattern)?,
            level,
        });
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.value_rules.len() + self.key_rules.len()
    }
}

impl Detector for PatternDetector {
    fn family(&self) -> ThreatFamily {
        self.family
    }

    fn inspects_keys(&self) -> bool {
        !self.key_rules.is_empty()
    }

    fn scan(&self, text: &str, site: Site) -> Vec<Detection> {
        let rules = match site {
            Site::Value => &self.value_rules,
            Site::Key => &self.key_rules,
        };
        rules
            .iter()
            .filter_map(|rule| {
                rule.regex.find(text).map(|m| Detection {
                    level: rule.level,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect()
    }
}
