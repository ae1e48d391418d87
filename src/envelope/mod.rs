//! Envelope decoding and normalization: turns raw, partially-malformed
//! pub/sub bytes into a `NormalizedEnvelope` the processor registry can
//! dispatch on.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// A decoded, field-resolved envelope ready for processor dispatch.
#[derive(Debug, Clone)]
pub struct NormalizedEnvelope {
    pub raw: Value,
    pub processor_type: String,
    pub trace_id: String,
    pub user_id: String,
    pub subscription_id: String,
    pub prompts: Vec<String>,
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub prompt: String,
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    #[error("failed to parse envelope JSON: {0}")]
    Parse(String),

    #[error("envelope is missing required fields: {0}")]
    Validation(String),

    #[error("unknown processor type: {0}")]
    UnknownProcessorType(String),
}

/// Decode raw bytes into a `NormalizedEnvelope`, applying the legacy
/// shape recovery ladder for `matches` and synthesizing a `trace_id`
/// when absent.
pub fn normalize(raw: &[u8]) -> Result<NormalizedEnvelope, EnvelopeError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| EnvelopeError::Parse(e.to_string()))?;

    let trace_id = value
        .get("trace_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let synthesized = Uuid::new_v4().to_string();
            warn!(trace_id = %synthesized, "envelope missing trace_id, synthesized one");
            synthesized
        });

    let processor_type = value
        .get("processor_type")
        .and_then(Value::as_str)
        .or_else(|| value.get("source").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| EnvelopeError::Validation("processor_type/source missing".to_string()))?;

    let user_id = probe_field(&value, "user_id")
        .ok_or_else(|| EnvelopeError::Validation("user_id missing".to_string()))?;
    let subscription_id = probe_field(&value, "subscription_id")
        .ok_or_else(|| EnvelopeError::Validation("subscription_id missing".to_string()))?;

    let prompts = value
        .pointer("/request/prompts")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let matches = locate_matches(&value, &prompts);

    Ok(NormalizedEnvelope {
        raw: value,
        processor_type,
        trace_id,
        user_id,
        subscription_id,
        prompts,
        matches,
    })
}

/// Probe `envelope.request.<field>`, then `envelope.<field>`, then
/// `envelope.context.<field>`, in that order.
fn probe_field(value: &Value, field: &str) -> Option<String> {
    value
        .pointer(&format!("/request/{field}"))
        .and_then(Value::as_str)
        .or_else(|| value.get(field).and_then(Value::as_str))
        .or_else(|| value.pointer(&format!("/context/{field}")).and_then(Value::as_str))
        .map(str::to_string)
}

fn parse_matches_array(value: &Value) -> Vec<Match> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|m| Match {
                    prompt: m.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string(),
                    documents: m
                        .get("documents")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The five-step recovery ladder: applied in order until one yields a
/// non-empty array of matches.
fn locate_matches(value: &Value, prompts: &[String]) -> Vec<Match> {
    // (a) results.matches
    if let Some(matches) = value.pointer("/results/matches") {
        let parsed = parse_matches_array(matches);
        if !parsed.is_empty() {
            return parsed;
        }
    }

    // (b) results.results[0].matches
    if let Some(matches) = value.pointer("/results/results/0/matches") {
        let parsed = parse_matches_array(matches);
        if !parsed.is_empty() {
            warn!("matches recovered via legacy location: results.results[0].matches");
            return parsed;
        }
    }

    // (c) flatten every results.results[i].matches, copying the per-result
    // prompt (or the first configured prompt, or "Default prompt") onto each.
    if let Some(results) = value.pointer("/results/results").and_then(Value::as_array) {
        let mut flattened = Vec::new();
        for result in results {
            let prompt = result
                .get("prompt")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| prompts.first().cloned())
                .unwrap_or_else(|| "Default prompt".to_string());

            if let Some(matches) = result.get("matches").and_then(Value::as_array) {
                for m in matches {
                    flattened.push(Match {
                        prompt: prompt.clone(),
                        documents: m
                            .get("documents")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default(),
                    });
                }
            }
        }
        if !flattened.is_empty() {
            warn!("matches recovered via legacy location: flattened results.results[*].matches");
            return flattened;
        }
    }

    // (d) treat results.results itself as the matches array.
    if let Some(results) = value.pointer("/results/results") {
        let parsed = parse_matches_array(results);
        if !parsed.is_empty() {
            warn!("matches recovered via legacy location: results.results as matches");
            return parsed;
        }
    }

    // (e) synthesize a single match with the first prompt and no documents.
    warn!("matches recovered via legacy location: synthesized empty match");
    vec![Match {
        prompt: prompts.first().cloned().unwrap_or_default(),
        documents: Vec::new(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_current_shape() {
        let raw = br#"{
            "processor_type": "boe",
            "trace_id": "t1",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {"matches": [{"prompt": "p", "documents": [{"title": "x"}]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        assert_eq!(envelope.processor_type, "boe");
        assert_eq!(envelope.user_id, "u1");
        assert_eq!(envelope.matches.len(), 1);
        assert_eq!(envelope.matches[0].documents.len(), 1);
    }

    #[test]
    fn missing_trace_id_is_synthesized() {
        let raw = br#"{
            "processor_type": "boe",
            "request": {"user_id": "u1", "subscription_id": "s1"},
            "results": {"matches": []}
        }"#;
        let envelope = normalize(raw).unwrap();
        assert!(Uuid::parse_str(&envelope.trace_id).is_ok());
    }

    #[test]
    fn legacy_source_field_resolves_processor_type() {
        let raw = br#"{
            "source": "real-estate",
            "request": {"user_id": "u1", "subscription_id": "s1"},
            "results": {"matches": []}
        }"#;
        let envelope = normalize(raw).unwrap();
        assert_eq!(envelope.processor_type, "real-estate");
    }

    #[test]
    fn legacy_results_array_strategy_b() {
        let raw = br#"{
            "processor_type": "boe",
            "request": {"user_id": "u1", "subscription_id": "s1"},
            "results": {"results": [{"prompt": "p", "matches": [{"prompt": "p", "documents": []}]}]}
        }"#;
        let envelope = normalize(raw).unwrap();
        assert_eq!(envelope.matches.len(), 1);
    }

    #[test]
    fn missing_user_id_is_a_validation_error() {
        let raw = br#"{"processor_type": "boe", "results": {"matches": []}}"#;
        let err = normalize(raw).unwrap_err();
        assert!(matches!(err, EnvelopeError::Validation(_)));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = normalize(b"not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::Parse(_)));
    }

    #[test]
    fn empty_matches_synthesizes_single_empty_match() {
        let raw = br#"{
            "processor_type": "boe",
            "request": {"user_id": "u1", "subscription_id": "s1", "prompts": ["p"]},
            "results": {}
        }"#;
        let envelope = normalize(raw).unwrap();
        assert_eq!(envelope.matches.len(), 1);
        assert!(envelope.matches[0].documents.is_empty());
        assert_eq!(envelope.matches[0].prompt, "p");
    }
}
