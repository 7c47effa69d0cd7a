//! Extraction results and the applicant record sent downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mail::ParsedEmail;

/// Which field an extraction rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Name captured from the subject line (kept separately as a fallback).
    SubjectName,
    Name,
    Email,
    Phone,
}

/// Priority level at which a field was captured.
///
/// Rules are tried from the most structured to the least, so the tier says
/// how much the value can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// Bold markdown or `<strong>` labels.
    Markup,
    /// Plain `Label:` text.
    Label,
    /// Unstructured pattern anywhere in the body.
    Fallback,
    /// Taken from the subject line.
    Subject,
}

/// Tag recording how one field of an `ExtractionResult` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionMethod {
    pub field: Field,
    pub tier: ExtractionTier,
}

impl ExtractionMethod {
    pub fn new(field: Field, tier: ExtractionTier) -> Self {
        Self { field, tier }
    }

    /// Short tag for logs, e.g. `name-body` or `name-subject-fallback`.
    pub fn label(&self) -> &'static str {
        match (self.field, self.tier) {
            (Field::SubjectName, _) => "subject",
            (Field::Name, ExtractionTier::Subject) => "name-subject-fallback",
            (Field::Name, _) => "name-body",
            (Field::Email, _) => "email-body",
            (Field::Phone, _) => "phone-body",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tier = match self.tier {
            ExtractionTier::Markup => "markup",
            ExtractionTier::Label => "label",
            ExtractionTier::Fallback => "fallback",
            ExtractionTier::Subject => "subject",
        };
        write!(f, "{}:{tier}", self.label())
    }
}

/// Headers of the email a result was extracted from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailMetadata {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

impl From<&ParsedEmail> for EmailMetadata {
    fn from(email: &ParsedEmail) -> Self {
        Self {
            from: email.from.clone(),
            to: email.to.clone(),
            subject: email.subject.clone(),
            date: email.date,
            message_id: email.message_id.clone(),
        }
    }
}

/// Everything the extractor found in one email. Never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub applicant_name: Option<String>,
    pub applicant_email: Option<String>,
    pub applicant_phone: Option<String>,
    /// Name found in the subject, whether or not it was used.
    pub name_from_subject: Option<String>,
    /// Tags in the order the fields were captured.
    pub methods: Vec<ExtractionMethod>,
    pub metadata: EmailMetadata,
}

/// An applicant as delivered to subscriber endpoints.
///
/// Serializes to `{"name", "email", "phone", "receivedAt"}`; absent values
/// are sent as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantRecord {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}
