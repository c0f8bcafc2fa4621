//! Normalization of raw provider responses into per-row results.
//!
//! Providers are asked for `{"data": {"sentiment": [...], "priority": [...], "topic": [...]}}`
//! but return many near-miss shapes. Normalization is total: every input yields
//! exactly `batch_size` results, and anything unusable degrades to neutral defaults.

use serde_json::Value;

use crate::domain::model::{fold_priority, EnrichmentResult, DEFAULT_SENTIMENT, DEFAULT_TOPIC};

/// Normalized results for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Exactly one entry per input row
    pub results: Vec<EnrichmentResult>,

    /// The response carried no usable values; `results` are all neutral
    pub malformed: bool,
}

/// Raw per-field values pulled out of a response
#[derive(Debug, Default)]
struct Fields {
    sentiment: Vec<Value>,
    priority: Vec<Value>,
    topic: Vec<Value>,
}

impl Fields {
    fn is_empty(&self) -> bool {
        self.sentiment.is_empty() && self.priority.is_empty() && self.topic.is_empty()
    }
}

/// Normalize a provider response for a batch of `batch_size` rows
pub fn normalize_response(response: &Value, batch_size: usize) -> Normalized {
    let fields = decode(response).map(|v| extract(&v)).unwrap_or_default();

    if fields.is_empty() {
        return Normalized {
            results: vec![EnrichmentResult::neutral(); batch_size],
            malformed: true,
        };
    }

    let results = (0..batch_size)
        .map(|i| EnrichmentResult {
            sentiment: label_at(&fields.sentiment, i, DEFAULT_SENTIMENT),
            priority: fields.priority.get(i).map(priority_of).unwrap_or(0),
            topic: label_at(&fields.topic, i, DEFAULT_TOPIC),
        })
        .collect();

    Normalized {
        results,
        malformed: false,
    }
}

/// Turn string responses into JSON, looking for an embedded object when needed
fn decode(response: &Value) -> Option<Value> {
    match response {
        Value::String(raw) => {
            let raw = raw.trim();
            if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                // a JSON string wrapping more JSON
                return match parsed {
                    Value::String(_) => decode(&parsed),
                    other => Some(other),
                };
            }
            let start = raw.find('{')?;
            let end = raw.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str(&raw[start..=end]).ok()
        }
        Value::Null => None,
        other => Some(other.clone()),
    }
}

fn extract(value: &Value) -> Fields {
    match value {
        Value::Array(items) => aggregate(items),
        Value::Object(map) => {
            let data = map.get("data").unwrap_or(value);
            match data {
                Value::Object(data) => Fields {
                    sentiment: values_of(data.get("sentiment").or_else(|| data.get("analysis"))),
                    priority: values_of(data.get("priority")),
                    topic: values_of(data.get("topic").or_else(|| data.get("topics"))),
                },
                Value::Array(items) => aggregate(items),
                _ => Fields::default(),
            }
        }
        _ => Fields::default(),
    }
}

/// Aggregate a list of per-row objects field by field
fn aggregate(items: &[Value]) -> Fields {
    let mut fields = Fields::default();
    for item in items {
        match item {
            Value::Object(obj) => {
                fields.sentiment.extend(values_of(obj.get("sentiment")));
                fields.priority.extend(values_of(obj.get("priority")));
                let topic = obj
                    .get("topic")
                    .filter(|v| !v.is_null())
                    .or_else(|| obj.get("topics"));
                fields.topic.extend(values_of(topic));
            }
            Value::Null => {}
            other => fields.sentiment.push(other.clone()),
        }
    }
    fields
}

/// Arrays are flattened one level; scalars count as a single value
fn values_of(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn label_at(values: &[Value], index: usize, default: &str) -> String {
    match values.get(index) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => default.to_string(),
    }
}

fn priority_of(value: &Value) -> u8 {
    match value {
        Value::String(s) => fold_priority(s),
        Value::Number(n) => n
            .as_f64()
            .map(|f| f.clamp(0.0, 2.0) as u8)
            .unwrap_or(1),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sentiments(n: &Normalized) -> Vec<&str> {
        n.results.iter().map(|r| r.sentiment.as_str()).collect()
    }

    #[test]
    fn test_short_response_is_padded() {
        let response = json!({"data": {"sentiment": ["positive", "negative"], "priority": ["high"], "topic": ["billing", "network"]}});
        let n = normalize_response(&response, 3);
        assert!(!n.malformed);
        assert_eq!(sentiments(&n), vec!["positive", "negative", "neutral"]);
        assert_eq!(n.results[0].priority, 2);
        assert_eq!(n.results[1].priority, 0);
        assert_eq!(n.results[2].topic, "general");
    }

    #[test]
    fn test_long_response_is_truncated() {
        let response = json!({"sentiment": ["a", "b", "c", "d"], "priority": ["low", "low", "low", "low"], "topic": ["x", "y", "z", "w"]});
        let n = normalize_response(&response, 2);
        assert_eq!(n.results.len(), 2);
        assert_eq!(sentiments(&n), vec!["a", "b"]);
    }

    #[test]
    fn test_aliases_are_accepted() {
        let response = json!({"data": {"analysis": ["negative"], "priority": ["m"], "topics": ["roaming"]}});
        let n = normalize_response(&response, 1);
        assert_eq!(
            n.results[0],
            EnrichmentResult {
                sentiment: "negative".into(),
                priority: 1,
                topic: "roaming".into()
            }
        );
    }

    #[test]
    fn test_list_of_row_objects() {
        let response = json!({"data": [
            {"sentiment": "positive", "priority": "low", "topic": "fiber"},
            {"sentiment": ["negative"], "priority": 7, "topics": "billing"}
        ]});
        let n = normalize_response(&response, 2);
        assert_eq!(sentiments(&n), vec!["positive", "negative"]);
        assert_eq!(n.results[1].priority, 2);
        assert_eq!(n.results[1].topic, "billing");
    }

    #[test]
    fn test_json_string_and_embedded_object() {
        let as_string = json!("{\"data\": {\"sentiment\": [\"positive\"], \"priority\": [\"h\"], \"topic\": [\"x\"]}}");
        assert_eq!(normalize_response(&as_string, 1).results[0].priority, 2);

        let wrapped = json!("Sure! Here you go: {\"sentiment\": [\"negative\"]} Hope it helps.");
        let n = normalize_response(&wrapped, 2);
        assert!(!n.malformed);
        assert_eq!(sentiments(&n), vec!["negative", "neutral"]);
    }

    #[test]
    fn test_malformed_shapes_degrade_to_neutral() {
        for response in [
            json!(null),
            json!("not json at all"),
            json!({"data": {}}),
            json!({"data": 42}),
            json!([]),
            json!(17),
        ] {
            let n = normalize_response(&response, 2);
            assert!(n.malformed, "{response}");
            assert_eq!(n.results, vec![EnrichmentResult::neutral(); 2]);
        }
    }

    #[test]
    fn test_blank_and_non_string_labels_take_defaults() {
        let response = json!({"sentiment": ["  ", 3], "priority": [null, "low"], "topic": [" spaced "]});
        let n = normalize_response(&response, 2);
        assert_eq!(sentiments(&n), vec!["neutral", "neutral"]);
        assert_eq!(n.results[0].priority, 1);
        assert_eq!(n.results[0].topic, "spaced");
        assert_eq!(n.results[1].topic, "general");
    }
}
