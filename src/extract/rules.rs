//! Declarative pattern tables for classification and field extraction.
//!
//! Each field has an ordered list of rules, tried from the most structured
//! markup down to unstructured fallbacks. The first rule whose capture
//! survives cleanup and validation wins. Adding a format means adding a row
//! here; the evaluation loop never changes.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::extract::text::{is_present, is_valid_email, is_valid_phone, strip_html};
use crate::extract::types::{ExtractionTier, Field};

/// One capture pattern. Group 1 holds the candidate value.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub regex: Regex,
    pub tier: ExtractionTier,
}

impl PatternRule {
    fn new(pattern: &str, tier: ExtractionTier) -> Self {
        Self {
            regex: Regex::new(pattern).expect("extraction pattern must compile"),
            tier,
        }
    }
}

/// Ordered rules for one field plus the check a candidate must pass.
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub field: Field,
    pub rules: Vec<PatternRule>,
    pub accept: fn(&str) -> bool,
}

impl FieldRules {
    /// Run the rules in order and return the first accepted, cleaned capture.
    pub fn first_match(&self, haystack: &str) -> Option<(String, ExtractionTier)> {
        for rule in &self.rules {
            let Some(captured) = rule.regex.captures(haystack).and_then(|c| c.get(1)) else {
                continue;
            };
            let cleaned = strip_html(captured.as_str());
            if (self.accept)(&cleaned) {
                return Some((cleaned, rule.tier));
            }
            trace!(field = ?self.field, tier = ?rule.tier, "Rejected candidate, trying next rule");
        }
        None
    }
}

/// Every pattern the extractor knows about.
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub subject_classifiers: Vec<Regex>,
    pub body_classifiers: Vec<Regex>,
    pub subject_name: FieldRules,
    pub name: FieldRules,
    pub email: FieldRules,
    pub phone: FieldRules,
}

impl PatternSet {
    /// Patterns for job-board "application received" notifications.
    ///
    /// Body rules run with `(?s)` so labels may span lines; each stops at the
    /// next recognised label or at end of text.
    pub fn default_patterns() -> Self {
        use ExtractionTier::*;

        let classifier = |p: &str| Regex::new(p).expect("classifier pattern must compile");

        Self {
            subject_classifiers: vec![
                classifier(r"(?i)new job application received"),
                classifier(r"(?i)job application.*received"),
                classifier(r"(?i)application.*submitted"),
            ],
            body_classifiers: vec![
                classifier(r"(?i)new job application has.*been submitted"),
                classifier(r"(?i)job application.*submitted"),
                classifier(r"(?i)applicant.*details"),
            ],
            subject_name: FieldRules {
                field: Field::SubjectName,
                rules: vec![
                    PatternRule::new(r"–\s*(.+?)$", Subject),
                    PatternRule::new(r"-\s*(.+?)$", Subject),
                    PatternRule::new(r"(?i)received\s*[-–]\s*(.+?)$", Subject),
                    PatternRule::new(r"(?i)application.*from\s+(.+?)$", Subject),
                ],
                accept: is_present,
            },
            name: FieldRules {
                field: Field::Name,
                rules: vec![
                    PatternRule::new(r"(?s)\*\*Name:\*\*\s*(.+?)(?:\s*\*\*(?:Email|Phone)|$)", Markup),
                    PatternRule::new(
                        r"(?s)<strong>Name:</strong>\s*(.+?)(?:\s*<strong>(?:Email|Phone)|$)",
                        Markup,
                    ),
                    PatternRule::new(r"(?s)Name:\s*(.+?)(?:\s*(?:Email|Phone):|$)", Label),
                    PatternRule::new(r"(?s)Applicant.*Name:\s*(.+?)(?:\s*(?:Email|Phone)|$)", Label),
                ],
                accept: is_present,
            },
            email: FieldRules {
                field: Field::Email,
                rules: vec![
                    PatternRule::new(r"(?s)\*\*Email:\*\*\s*(.+?)(?:\s*\*\*(?:Phone|Name)|$)", Markup),
                    PatternRule::new(
                        r"(?s)<strong>Email:</strong>\s*(.+?)(?:\s*<strong>(?:Phone|Name)|$)",
                        Markup,
                    ),
                    PatternRule::new(r"(?s)Email:\s*(.+?)(?:\s*(?:Phone|Name):|$)", Label),
                    PatternRule::new(r"([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})", Fallback),
                ],
                accept: is_valid_email,
            },
            phone: FieldRules {
                field: Field::Phone,
                rules: vec![
                    PatternRule::new(r"(?s)\*\*Phone Number:\*\*\s*(.+?)\s*(?:\*\*|Please|$)", Markup),
                    PatternRule::new(
                        r"(?s)<strong>Phone.*?:</strong>\s*(.+?)\s*(?:<strong>|Please|$)",
                        Markup,
                    ),
                    PatternRule::new(r"(?s)Phone.*?:\s*(.+?)\s*(?:Please|$)", Label),
                    PatternRule::new(r"(\+?[\d\s\-\(\)\.]{10,})", Fallback),
                ],
                accept: is_valid_phone,
            },
        }
    }
}

static DEFAULT_PATTERNS: LazyLock<PatternSet> = LazyLock::new(PatternSet::default_patterns);

/// Shared compiled default patterns.
pub fn default_patterns() -> &'static PatternSet {
    &DEFAULT_PATTERNS
}
