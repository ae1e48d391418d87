//! Real-estate listing processor.

use std::collections::HashMap;

use serde_json::Value;

use crate::envelope::NormalizedEnvelope;
use crate::notifications::NewNotification;
use crate::processors::{coerce_common_fields, entity_type, select_title, DocumentOutcome, ProcessingResult, Processor};

pub struct RealEstateProcessor;

impl Processor for RealEstateProcessor {
    fn processor_type(&self) -> &'static str {
        "real-estate"
    }

    fn process(&self, envelope: &NormalizedEnvelope) -> ProcessingResult {
        let mut candidates = Vec::new();
        let mut outcomes = Vec::new();

        for m in &envelope.matches {
            for document in &m.documents {
                let mut document = document.clone();
                coerce_common_fields(&mut document);

                let source_url = document
                    .pointer("/links/html")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let Some(source_url) = source_url else {
                    outcomes.push(DocumentOutcome::Invalid);
                    continue;
                };

                let document_type = document.get("document_type").and_then(Value::as_str);
                let title = select_title(
                    document.get("notification_title").and_then(Value::as_str),
                    document.get("title").and_then(Value::as_str),
                    document_type,
                    None,
                    None,
                    "real-estate",
                    &m.prompt,
                );

                let content = document
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                let mut metadata: HashMap<String, Value> = HashMap::new();
                metadata.insert("prompt".into(), Value::String(m.prompt.clone()));
                metadata.insert(
                    "relevance".into(),
                    document.get("relevance_score").cloned().unwrap_or(Value::Null),
                );
                metadata.insert(
                    "document_type".into(),
                    document_type.map(Value::from).unwrap_or(Value::Null),
                );
                metadata.insert(
                    "original_title".into(),
                    document.get("title").cloned().unwrap_or(Value::Null),
                );
                metadata.insert("processor_type".into(), Value::String("real-estate".to_string()));
                metadata.insert("trace_id".into(), Value::String(envelope.trace_id.clone()));
                metadata.insert("price".into(), document.get("price").cloned().unwrap_or(Value::Null));
                metadata.insert(
                    "location".into(),
                    document.get("location").cloned().unwrap_or(Value::Null),
                );
                metadata.insert(
                    "property_type".into(),
                    document.get("property_type").cloned().unwrap_or(Value::Null),
                );
                metadata.insert("size".into(), document.get("size").cloned().unwrap_or(Value::Null));
                metadata.insert("rooms".into(), document.get("rooms").cloned().unwrap_or(Value::Null));
                if let Some(document_id) = document.get("document_id").and_then(Value::as_str) {
                    metadata.insert("document_id".into(), Value::String(document_id.to_string()));
                }

                candidates.push(NewNotification {
                    user_id: envelope.user_id.clone(),
                    subscription_id: envelope.subscription_id.clone(),
                    title,
                    content,
                    source_url,
                    entity_type: entity_type("real-estate", document_type),
                    metadata,
                });
                outcomes.push(DocumentOutcome::Ok);
            }
        }

        ProcessingResult { candidates, outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::normalize;

    #[test]
    fn listing_without_link_is_invalid() {
        let raw = br#"{
            "processor_type": "real-estate",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{
                "document_type": "listing",
                "title": "Nice flat"
            }]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        let result = RealEstateProcessor.process(&envelope);
        assert!(result.candidates.is_empty());
        assert_eq!(result.outcomes, vec![DocumentOutcome::Invalid]);
    }

    #[test]
    fn listing_with_link_becomes_a_candidate() {
        let raw = br#"{
            "processor_type": "real-estate",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{
                "document_type": "listing",
                "title": "Nice flat",
                "links": {"html": "https://example.com/l/1"},
                "price": 250000,
                "rooms": 3
            }]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        let result = RealEstateProcessor.process(&envelope);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].entity_type, "real-estate:listing");
    }
}
