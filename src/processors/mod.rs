//! Processor registry and the per-tag document-coercion contract.
//!
//! Processors are plain values registered in a map keyed by tag, not a
//! class hierarchy — adding a processor means adding an entry, not a
//! new subtype in a dispatch chain.

pub mod boe;
pub mod real_estate;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::envelope::NormalizedEnvelope;
use crate::notifications::NewNotification;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("unknown processor type: {0}")]
    UnknownProcessorType(String),

    #[error("subscription {subscription_id} is not owned by user {user_id}")]
    NotOwned { user_id: String, subscription_id: String },
}

/// Outcome of coercing one document from a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    Ok,
    Invalid,
}

/// Everything a processor produced from one envelope, ready for the
/// dedup gate and writer.
pub struct ProcessingResult {
    pub candidates: Vec<NewNotification>,
    pub outcomes: Vec<DocumentOutcome>,
}

/// Per-tag document validation/transformation/enrichment contract.
pub trait Processor: Send + Sync {
    fn processor_type(&self) -> &'static str;

    /// Whether this processor needs the database to be reachable to do
    /// useful work, for readiness reporting.
    fn requires_database(&self) -> bool {
        true
    }

    /// Build persisted-notification candidates from the envelope's
    /// matches. Ownership (`subscription.user_id == envelope.user_id`)
    /// is assumed already checked by the caller.
    fn process(&self, envelope: &NormalizedEnvelope) -> ProcessingResult;
}

/// Process-wide, populated once at start, read-only thereafter.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(boe::BoeProcessor));
        registry.register(Arc::new(real_estate::RealEstateProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.processor_type(), processor);
    }

    pub fn get(&self, tag: &str) -> Result<Arc<dyn Processor>, ProcessorError> {
        self.processors
            .get(tag)
            .cloned()
            .ok_or_else(|| ProcessorError::UnknownProcessorType(tag.to_string()))
    }

    pub fn registered_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.processors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

/// Truncate `s` to at most `max` visible characters, appending `"..."`
/// when truncated (the ellipsis counts toward the budget).
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let truncated: String = s.chars().take(keep).collect();
    format!("{truncated}...")
}

/// Whether a candidate title string is usable as-is: long enough, not
/// the literal placeholder `"string"`, and doesn't contain the
/// substring `"notification"`.
fn is_usable_title(candidate: &str) -> bool {
    candidate.chars().count() > 3 && candidate != "string" && !candidate.contains("notification")
}

/// The four-step title-selection algorithm shared by every processor.
pub fn select_title(
    notification_title: Option<&str>,
    title: Option<&str>,
    document_type: Option<&str>,
    issuing_body: Option<&str>,
    publication_date: Option<&str>,
    processor_type: &str,
    prompt: &str,
) -> String {
    if let Some(nt) = notification_title {
        if is_usable_title(nt) {
            return nt.to_string();
        }
    }

    if let Some(t) = title {
        if is_usable_title(t) {
            return truncate_with_ellipsis(t, 80);
        }
    }

    if let Some(document_type) = document_type {
        let mut parts = document_type.to_string();
        if let Some(issuing_body) = issuing_body {
            parts.push_str(" de ");
            parts.push_str(issuing_body);
        }
        if let Some(publication_date) = publication_date {
            parts.push_str(" (");
            parts.push_str(publication_date);
            parts.push(')');
        }
        return parts;
    }

    format!(
        "Alerta {processor_type}: \"{}\"",
        truncate_with_ellipsis(prompt.trim(), 30)
    )
}

/// `{processor_type}:{document_type.lower() if present else "document"}`.
pub fn entity_type(processor_type: &str, document_type: Option<&str>) -> String {
    format!(
        "{processor_type}:{}",
        document_type.map(str::to_lowercase).unwrap_or_else(|| "document".to_string())
    )
}

/// Fill `title`/`notification_title` from each other when one is
/// missing, and truncate `summary` to 200 characters.
pub fn coerce_common_fields(document: &mut Value) {
    let title = document.get("title").and_then(Value::as_str).map(str::to_string);
    let notification_title = document
        .get("notification_title")
        .and_then(Value::as_str)
        .map(str::to_string);

    if title.is_none() {
        if let Some(nt) = &notification_title {
            document["title"] = Value::String(nt.clone());
        }
    }
    if notification_title.is_none() {
        if let Some(t) = &title {
            document["notification_title"] = Value::String(t.clone());
        }
    }

    if let Some(summary) = document.get("summary").and_then(Value::as_str).map(str::to_string) {
        document["summary"] = Value::String(truncate_with_ellipsis(&summary, 200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_over_80_chars_truncates_with_ellipsis() {
        let long = "x".repeat(200);
        let title = select_title(None, Some(&long), None, None, None, "boe", "p");
        assert_eq!(title.chars().count(), 80);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn notification_title_containing_forbidden_substring_is_rejected() {
        let title = select_title(
            Some("notification"),
            Some("string"),
            Some("boe_document"),
            None,
            Some("2024-01-02"),
            "boe",
            "p",
        );
        assert_eq!(title, "boe_document (2024-01-02)");
    }

    #[test]
    fn falls_back_to_alerta_prefix_when_nothing_else_available() {
        let title = select_title(None, None, None, None, None, "boe", "  some long prompt text  ");
        assert!(title.starts_with("Alerta boe: \""));
    }

    #[test]
    fn entity_type_lowercases_document_type() {
        assert_eq!(entity_type("boe", Some("BOE_Document")), "boe:boe_document");
        assert_eq!(entity_type("boe", None), "boe:document");
    }

    #[test]
    fn registry_resolves_registered_tags() {
        let registry = ProcessorRegistry::new();
        assert!(registry.get("boe").is_ok());
        assert!(registry.get("real-estate").is_ok());
        assert!(matches!(
            registry.get("unknown").unwrap_err(),
            ProcessorError::UnknownProcessorType(_)
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// I4: truncation never produces more than `max` visible characters,
        /// and only appends the ellipsis when it actually cut something.
        #[test]
        fn truncate_never_exceeds_max(s in ".{0,300}", max in 3usize..120) {
            let truncated = truncate_with_ellipsis(&s, max);
            prop_assert!(truncated.chars().count() <= max);
            if s.chars().count() > max {
                prop_assert!(truncated.ends_with("..."));
            } else {
                prop_assert_eq!(truncated, s);
            }
        }

        /// I5: `entity_type` is always `{processor_type}:{lowercased document_type}`,
        /// falling back to "document" when no document type is given.
        #[test]
        fn entity_type_is_always_processor_and_lowercased_doctype(
            processor in "[a-z][a-z-]{0,15}",
            doc_type in proptest::option::of("[A-Za-z_]{1,20}"),
        ) {
            let result = entity_type(&processor, doc_type.as_deref());
            let expected_suffix = doc_type
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_else(|| "document".to_string());
            prop_assert_eq!(result, format!("{processor}:{expected_suffix}"));
        }
    }
}
