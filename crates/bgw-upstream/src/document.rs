use std::collections::HashMap;

use aws_smithy_types::{Document, Number};
use serde_json::Value as JsonValue;

/// Tool inputs and vendor passthrough fields cross the SDK boundary as
/// smithy documents; everything above it speaks serde_json.
pub(crate) fn json_to_document(value: &JsonValue) -> Document {
    match value {
        JsonValue::Null => Document::Null,
        JsonValue::Bool(value) => Document::Bool(*value),
        JsonValue::Number(number) => {
            if let Some(unsigned) = number.as_u64() {
                Document::Number(Number::PosInt(unsigned))
            } else if let Some(signed) = number.as_i64() {
                Document::Number(Number::NegInt(signed))
            } else {
                Document::Number(Number::Float(number.as_f64().unwrap_or(0.0)))
            }
        }
        JsonValue::String(value) => Document::String(value.clone()),
        JsonValue::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        JsonValue::Object(entries) => {
            let map: HashMap<String, Document> = entries
                .iter()
                .map(|(key, value)| (key.clone(), json_to_document(value)))
                .collect();
            Document::Object(map)
        }
    }
}

pub(crate) fn document_to_json(document: &Document) -> JsonValue {
    match document {
        Document::Null => JsonValue::Null,
        Document::Bool(value) => JsonValue::Bool(*value),
        Document::Number(number) => match number {
            Number::PosInt(value) => JsonValue::from(*value),
            Number::NegInt(value) => JsonValue::from(*value),
            Number::Float(value) => JsonValue::from(*value),
        },
        Document::String(value) => JsonValue::String(value.clone()),
        Document::Array(items) => JsonValue::Array(items.iter().map(document_to_json).collect()),
        Document::Object(entries) => {
            let map: serde_json::Map<String, JsonValue> = entries
                .iter()
                .map(|(key, value)| (key.clone(), document_to_json(value)))
                .collect();
            JsonValue::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_documents_round_trip() {
        let value = json!({
            "location": "Tokyo",
            "units": ["C", "F"],
            "precision": 2,
            "offset": -1,
            "ratio": 0.5,
            "nested": {"empty": null, "flag": true}
        });
        assert_eq!(document_to_json(&json_to_document(&value)), value);
    }
}
