//! Pattern extractor: classifies "job application received" notifications
//! and pulls applicant fields out of their bodies.
//!
//! Pure functions over a `ParsedEmail`; no I/O and no state carried between
//! calls, so running it twice on the same email yields the same result.

pub mod rules;
pub mod text;
pub mod types;

use tracing::debug;

pub use rules::{FieldRules, PatternRule, PatternSet, default_patterns};
pub use types::{
    ApplicantRecord, EmailMetadata, ExtractionMethod, ExtractionResult, ExtractionTier, Field,
};

use crate::mail::ParsedEmail;

/// True if the subject or either body looks like an application notice.
///
/// A single match in any channel is enough; this favours recall.
pub fn classify(email: &ParsedEmail) -> bool {
    classify_with(default_patterns(), email)
}

pub fn classify_with(patterns: &PatternSet, email: &ParsedEmail) -> bool {
    let subject = email.subject.as_deref().unwrap_or("");
    let text = email.text.as_deref().unwrap_or("");
    let html = email.html.as_deref().unwrap_or("");

    let subject_match = patterns.subject_classifiers.iter().any(|r| r.is_match(subject));
    let body_match = patterns
        .body_classifiers
        .iter()
        .any(|r| r.is_match(text) || r.is_match(html));

    subject_match || body_match
}

/// Run the name, email and phone passes over the combined bodies.
pub fn extract(email: &ParsedEmail) -> ExtractionResult {
    extract_with(default_patterns(), email)
}

pub fn extract_with(patterns: &PatternSet, email: &ParsedEmail) -> ExtractionResult {
    let subject = email.subject.as_deref().unwrap_or("");
    let content = format!(
        "{}\n{}",
        email.text.as_deref().unwrap_or(""),
        email.html.as_deref().unwrap_or("")
    );

    let mut methods = Vec::new();
    let mut record = |field: Field, found: Option<(String, ExtractionTier)>| {
        found.map(|(value, tier)| {
            methods.push(ExtractionMethod::new(field, tier));
            value
        })
    };

    let name_from_subject = record(Field::SubjectName, patterns.subject_name.first_match(subject));
    let body_name = record(Field::Name, patterns.name.first_match(&content));
    let applicant_email = record(Field::Email, patterns.email.first_match(&content));
    let applicant_phone = record(Field::Phone, patterns.phone.first_match(&content));

    let applicant_name = match body_name {
        Some(name) => Some(name),
        None => record(
            Field::Name,
            name_from_subject
                .clone()
                .map(|name| (name, ExtractionTier::Subject)),
        ),
    };

    ExtractionResult {
        applicant_name,
        applicant_email,
        applicant_phone,
        name_from_subject,
        methods,
        metadata: EmailMetadata::from(email),
    }
}

/// Keep only results carrying both a name and an email.
pub fn to_applicant_record(result: &ExtractionResult) -> Option<ApplicantRecord> {
    match (&result.applicant_name, &result.applicant_email) {
        (Some(name), Some(email)) => Some(ApplicantRecord {
            name: name.clone(),
            email: email.clone(),
            phone: result.applicant_phone.clone(),
            received_at: result.metadata.date,
        }),
        _ => {
            debug!(
                message_id = result.metadata.message_id.as_deref().unwrap_or("-"),
                has_name = result.applicant_name.is_some(),
                has_email = result.applicant_email.is_some(),
                "Application notice without name and email, dropping"
            );
            None
        }
    }
}

/// Classify, extract and filter in one go.
pub fn applicant_from_email(email: &ParsedEmail) -> Option<ApplicantRecord> {
    if !classify(email) {
        return None;
    }
    to_applicant_record(&extract(email))
}
