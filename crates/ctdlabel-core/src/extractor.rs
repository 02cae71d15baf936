//! Parsing of batch output artifacts.
//!
//! Model output is untrusted. Every record yields exactly one `LabelResult`;
//! a record that cannot be read becomes an all-null triple tagged with the
//! failure kind, and the rest of the artifact is still processed.

use serde_json::{Map, Value};

use crate::models::{LabelResult, ParseFailureKind};

const CONTENT_POINTER: &str = "/response/body/choices/0/message/content";

/// One result per non-blank line of `raw`, in line order.
#[must_use]
pub fn extract_results(raw: &str) -> Vec<LabelResult> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            let result = parse_record(line);
            if let Some(kind) = result.failure {
                tracing::warn!(
                    record = index,
                    kind = kind.as_str(),
                    custom_id = result.custom_id.as_deref().unwrap_or(""),
                    "unparseable response record"
                );
            }
            result
        })
        .collect()
}

/// Parses a single NDJSON envelope line.
#[must_use]
pub fn parse_record(line: &str) -> LabelResult {
    let Ok(envelope) = serde_json::from_str::<Value>(line) else {
        return LabelResult::unparseable(None, ParseFailureKind::InvalidEnvelope);
    };
    let custom_id = envelope
        .get("custom_id")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let Some(content) = envelope.pointer(CONTENT_POINTER).and_then(Value::as_str) else {
        return LabelResult::unparseable(custom_id, ParseFailureKind::MissingContent);
    };
    let Some(parsed) = parse_content(content) else {
        return LabelResult::unparseable(custom_id, ParseFailureKind::InvalidContent);
    };
    let Value::Object(fields) = parsed else {
        return LabelResult::unparseable(custom_id, ParseFailureKind::NotAnObject);
    };

    LabelResult {
        cat_title: text_field(&fields, "cat_title"),
        cat_exp: text_field(&fields, "cat_exp"),
        piv_cat: text_field(&fields, "piv_cat"),
        custom_id,
        failure: None,
    }
}

/// Strict JSON first; then the outermost `{...}`/`[...]` span, for content wrapped in prose or fences.
fn parse_content(content: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        return Some(value);
    }
    extract_json_fragment(content).and_then(|fragment| serde_json::from_str(&fragment).ok())
}

fn extract_json_fragment(text: &str) -> Option<String> {
    let start = text
        .char_indices()
        .find(|(_, c)| *c == '{' || *c == '[')
        .map(|(idx, _)| idx)?;
    let sliced = &text[start..];
    let end = sliced
        .char_indices()
        .rev()
        .find(|(_, c)| *c == '}' || *c == ']')
        .map(|(idx, c)| idx + c.len_utf8())?;
    Some(sliced[..end].to_string())
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    let text = match fields.get(name)? {
        Value::Null => return None,
        Value::String(value) => value.trim().trim_matches('"').trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(custom_id: &str, content: &str) -> String {
        json!({
            "id": "req",
            "custom_id": custom_id,
            "response": {"status_code": 200, "body": {"choices": [{"message": {"content": content}}]}}
        })
        .to_string()
    }

    #[test]
    fn malformed_records_become_null_triples_in_place() {
        let lines = [
            envelope("a", r#"{"cat_title":"gender","cat_exp":"men","piv_cat":"male"}"#),
            json!({"custom_id": "b", "response": {"body": {"choices": []}}}).to_string(),
            envelope("c", r#"{"cat_title":"gender","cat_exp":"women","piv_cat":"female"}"#),
            envelope("d", "{not json"),
            envelope("e", r#"{"cat_title":"gender","cat_exp":"n/a","piv_cat":"unknown_g"}"#),
        ];
        let raw = format!("{}\n\n", lines.join("\n"));

        let results = extract_results(&raw);
        assert_eq!(results.len(), 5);
        assert_eq!(results[1].failure, Some(ParseFailureKind::MissingContent));
        assert_eq!(results[3].failure, Some(ParseFailureKind::InvalidContent));
        for index in [1, 3] {
            assert!(results[index].cat_title.is_none());
            assert!(results[index].cat_exp.is_none());
            assert!(results[index].piv_cat.is_none());
        }
        assert_eq!(results[0].piv_cat.as_deref(), Some("male"));
        assert_eq!(results[2].piv_cat.as_deref(), Some("female"));
        assert_eq!(results[4].piv_cat.as_deref(), Some("unknown_g"));
        assert_eq!(results[3].custom_id.as_deref(), Some("d"));
    }

    #[test]
    fn non_json_line_and_non_object_content_are_distinguished() {
        assert_eq!(
            parse_record("garbage").failure,
            Some(ParseFailureKind::InvalidEnvelope)
        );
        assert_eq!(
            parse_record(&envelope("x", "[1,2]")).failure,
            Some(ParseFailureKind::NotAnObject)
        );
        let error_only = json!({"custom_id": "y", "response": null, "error": {"message": "boom"}});
        let result = parse_record(&error_only.to_string());
        assert_eq!(result.failure, Some(ParseFailureKind::MissingContent));
        assert_eq!(result.custom_id.as_deref(), Some("y"));
    }

    #[test]
    fn fenced_content_and_loose_field_types_are_accepted() {
        let content = "```json\n{\"cat_title\": \"age\", \"cat_exp\": 18, \"piv_cat\": \" \\\"unknown_a\\\" \"}\n```";
        let result = parse_record(&envelope("z", content));
        assert!(!result.is_unparseable());
        assert_eq!(result.cat_exp.as_deref(), Some("18"));
        assert_eq!(result.piv_cat.as_deref(), Some("unknown_a"));
    }

    #[test]
    fn object_without_fields_parses_with_null_values() {
        let result = parse_record(&envelope("w", "{}"));
        assert!(!result.is_unparseable());
        assert_eq!(result.piv_cat, None);
    }
}
