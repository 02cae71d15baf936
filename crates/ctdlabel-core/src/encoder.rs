use serde_json::Value;

use crate::error::{LabelError, Result};
use crate::models::{
    BatchRequestLine, ChatMessage, ChatRequestBody, ExpressionKey, LabelTask, ResponseFormat,
};
use crate::service::CHAT_COMPLETIONS_ENDPOINT;
use crate::taxonomy::{Category, LabelSet};

const MAX_TOKENS: u32 = 200;
const JSON_SUFFIX: &str = " Please respond in JSON format.";
const CORRELATION_HEX_CHARS: usize = 16;

/// `task-<category>-<16 hex chars of blake3(category \0 expression)>`.
#[must_use]
pub fn correlation_id(category: Category, expression: &str) -> String {
    let key = ExpressionKey::new(category, expression);
    correlation_id_for(&key)
}

#[must_use]
pub fn correlation_id_for(key: &ExpressionKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.category.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(key.expression.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!(
        "task-{}-{}",
        key.category.as_str(),
        &hex[..CORRELATION_HEX_CHARS]
    )
}

pub fn build_prompt(category: Category, expression: &str, labels: &LabelSet) -> String {
    // JSON string literals, so the example object stays valid for any phrase.
    let title = Value::from(category.as_str());
    let phrase = Value::from(expression);
    let allowed = labels
        .labels()
        .iter()
        .map(|label| format!("\"{label}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let fallback = category
        .unknown_label()
        .filter(|label| labels.contains(label))
        .map(|label| {
            format!(
                "\nIf the phrase is ambiguous, contradictory or matches none of the labels, use \"{label}\"."
            )
        })
        .unwrap_or_default();
    format!(
        "Label one phrase from clinical trial eligibility data.\n\
         Phrase: {phrase}\n\
         Category: {title}\n\
         Allowed labels: [{allowed}]\n\
         Pick exactly one label from the allowed labels and nothing else.{fallback}\n\
         Answer with a single JSON object with exactly these fields and no commentary:\n\
         {{\"cat_title\": {title}, \"cat_exp\": {phrase}, \"piv_cat\": \"<one allowed label>\"}}"
    )
}

/// Turns expressions of one category into wire-format labeling requests.
#[derive(Debug, Clone)]
pub struct TaskEncoder {
    model: String,
}

impl TaskEncoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn encode<I, S>(&self, category: Category, labels: &LabelSet, expressions: I) -> Result<Vec<LabelTask>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if labels.labels().is_empty() {
            return Err(LabelError::Validation(format!(
                "label set for {category} is empty"
            )));
        }
        expressions
            .into_iter()
            .map(|expression| {
                let key = ExpressionKey::new(category, expression.as_ref());
                if key.expression.is_empty() {
                    return Err(LabelError::Validation(format!(
                        "blank expression in category {category}"
                    )));
                }
                Ok(self.encode_key(key, labels))
            })
            .collect()
    }

    pub fn encode_key(&self, key: ExpressionKey, labels: &LabelSet) -> LabelTask {
        let custom_id = correlation_id_for(&key);
        let mut content = build_prompt(key.category, &key.expression, labels);
        content.push_str(JSON_SUFFIX);
        let request = BatchRequestLine {
            custom_id: custom_id.clone(),
            method: "POST".to_string(),
            url: CHAT_COMPLETIONS_ENDPOINT.to_string(),
            body: ChatRequestBody {
                model: self.model.clone(),
                temperature: 0.0,
                max_tokens: MAX_TOKENS,
                top_p: 1.0,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
                response_format: ResponseFormat {
                    kind: "json_object".to_string(),
                },
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content,
                }],
            },
        };
        LabelTask {
            key,
            custom_id,
            request,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::taxonomy::Taxonomy;

    fn gender_labels() -> LabelSet {
        LabelSet::new(["male", "female", "other", "unknown_g"]).expect("labels")
    }

    #[test]
    fn correlation_ids_are_deterministic_and_normalized() {
        let a = correlation_id(Category::Gender, "n/a");
        let b = correlation_id(Category::Gender, "  n/a ");
        let c = correlation_id(Category::Age, "n/a");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("task-gender-"));
        assert_eq!(a.len(), "task-gender-".len() + 16);
    }

    #[test]
    fn request_line_has_fixed_sampling_parameters() {
        let tasks = TaskEncoder::new("gpt-4o-mini")
            .encode(Category::Gender, &gender_labels(), ["men"])
            .expect("encode");
        assert_eq!(tasks.len(), 1);

        let wire = serde_json::to_value(&tasks[0].request).expect("json");
        assert_eq!(wire["method"], "POST");
        assert_eq!(wire["url"], "/v1/chat/completions");
        assert_eq!(wire["body"]["model"], "gpt-4o-mini");
        assert_eq!(wire["body"]["temperature"], 0.0);
        assert_eq!(wire["body"]["max_tokens"], 200);
        assert_eq!(wire["body"]["top_p"], 1.0);
        assert_eq!(wire["body"]["response_format"]["type"], "json_object");
        let content = wire["body"]["messages"][0]["content"]
            .as_str()
            .expect("content");
        assert!(content.contains("\"men\""));
        assert!(content.contains("\"unknown_g\""));
        assert!(content.ends_with(" Please respond in JSON format."));
        assert_eq!(wire["body"]["messages"].as_array().map(Vec::len), Some(1));
        assert!(matches!(wire["custom_id"], Value::String(_)));
    }

    #[test]
    fn blank_expressions_are_rejected() {
        let err = TaskEncoder::new("m")
            .encode(Category::Gender, &gender_labels(), ["men", "   "])
            .expect_err("blank");
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn answer_template_stays_valid_json_for_quoted_phrases() {
        let expression = r#"women "of childbearing potential" \ lactating"#;
        let prompt = build_prompt(Category::Gender, expression, &gender_labels());

        let template = prompt
            .lines()
            .find(|line| line.starts_with("{\"cat_title\""))
            .expect("answer template line");
        let parsed: Value = serde_json::from_str(template).expect("template parses");
        assert_eq!(parsed["cat_title"], "gender");
        assert_eq!(parsed["cat_exp"], expression);
        assert!(prompt.contains(r#"Phrase: "women \"of childbearing potential\" \\ lactating""#));
    }

    #[test]
    fn builtin_race_prompt_names_every_label() {
        let taxonomy = Taxonomy::builtin();
        let labels = taxonomy.label_set(Category::Race).expect("race");
        let prompt = build_prompt(Category::Race, "Caucasian", labels);
        for label in labels.labels() {
            assert!(prompt.contains(label.as_str()), "missing {label}");
        }
        assert!(prompt.contains("use \"unknown_r\""));
    }
}
