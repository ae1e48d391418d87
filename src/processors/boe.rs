//! BOE (Spanish official bulletin) processor.

use std::collections::HashMap;

use serde_json::Value;

use crate::envelope::NormalizedEnvelope;
use crate::notifications::NewNotification;
use crate::processors::{coerce_common_fields, entity_type, select_title, DocumentOutcome, ProcessingResult, Processor};

pub struct BoeProcessor;

const DEFAULT_SUMMARY: &str = "No hay resumen disponible.";
const DEFAULT_HTML_LINK: &str = "https://www.boe.es";

impl Processor for BoeProcessor {
    fn processor_type(&self) -> &'static str {
        "boe"
    }

    fn process(&self, envelope: &NormalizedEnvelope) -> ProcessingResult {
        let mut candidates = Vec::new();
        let mut outcomes = Vec::new();

        for m in &envelope.matches {
            for document in &m.documents {
                let mut document = document.clone();
                apply_defaults(&mut document);
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
                    document.get("issuing_body").and_then(Value::as_str),
                    document.get("publication_date").and_then(Value::as_str),
                    "boe",
                    &m.prompt,
                );

                let content = document
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_SUMMARY)
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
                metadata.insert("processor_type".into(), Value::String("boe".to_string()));
                metadata.insert(
                    "publication_date".into(),
                    document.get("publication_date").cloned().unwrap_or(Value::Null),
                );
                metadata.insert(
                    "issuing_body".into(),
                    document.get("issuing_body").cloned().unwrap_or(Value::Null),
                );
                metadata.insert("section".into(), document.get("section").cloned().unwrap_or(Value::Null));
                metadata.insert(
                    "department".into(),
                    document.get("department").cloned().unwrap_or(Value::Null),
                );
                metadata.insert("trace_id".into(), Value::String(envelope.trace_id.clone()));
                metadata.insert(
                    "bulletin_type".into(),
                    document.get("bulletin_type").cloned().unwrap_or(Value::Null),
                );
                if let Some(document_id) = document.get("document_id").and_then(Value::as_str) {
                    metadata.insert("document_id".into(), Value::String(document_id.to_string()));
                }

                candidates.push(NewNotification {
                    user_id: envelope.user_id.clone(),
                    subscription_id: envelope.subscription_id.clone(),
                    title,
                    content,
                    source_url,
                    entity_type: entity_type("boe", document_type),
                    metadata,
                });
                outcomes.push(DocumentOutcome::Ok);
            }
        }

        ProcessingResult { candidates, outcomes }
    }
}

fn apply_defaults(document: &mut Value) {
    if document.get("summary").and_then(Value::as_str).is_none() {
        document["summary"] = Value::String(DEFAULT_SUMMARY.to_string());
    }
    if document.pointer("/links/html").and_then(Value::as_str).is_none() {
        document["links"]["html"] = Value::String(DEFAULT_HTML_LINK.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::normalize;

    #[test]
    fn single_document_becomes_one_candidate() {
        let raw = br#"{
            "processor_type": "boe",
            "trace_id": "t1",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{
                "document_type": "boe_document",
                "title": "Resolución X",
                "summary": "S",
                "relevance_score": 0.9,
                "links": {"html": "https://boe.es/x"},
                "publication_date": "2024-01-02",
                "section": "I",
                "bulletin_type": "BOE"
            }]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        let result = BoeProcessor.process(&envelope);

        assert_eq!(result.candidates.len(), 1);
        let candidate = &result.candidates[0];
        assert_eq!(candidate.entity_type, "boe:boe_document");
        assert_eq!(candidate.title, "Resolución X");
        assert_eq!(candidate.source_url, "https://boe.es/x");
    }

    #[test]
    fn missing_summary_and_link_use_defaults() {
        let raw = br#"{
            "processor_type": "boe",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{
                "document_type": "boe_document",
                "title": "Title here"
            }]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        let result = BoeProcessor.process(&envelope);
        assert_eq!(result.candidates[0].content, DEFAULT_SUMMARY);
        assert_eq!(result.candidates[0].source_url, DEFAULT_HTML_LINK);
    }
}
