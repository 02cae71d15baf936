use serde::{Deserialize, Serialize};

use super::identity::ExpressionKey;

/// One line of a batch request artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub response_format: ResponseFormat,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A single labeling request: one expression of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTask {
    pub key: ExpressionKey,
    pub custom_id: String,
    pub request: BatchRequestLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureKind {
    /// The line itself is not JSON.
    InvalidEnvelope,
    /// `response.body.choices[0].message.content` is absent or not a string.
    MissingContent,
    /// The content string is not valid JSON.
    InvalidContent,
    /// The content parsed, but not to an object.
    NotAnObject,
}

impl ParseFailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidEnvelope => "invalid_envelope",
            Self::MissingContent => "missing_content",
            Self::InvalidContent => "invalid_content",
            Self::NotAnObject => "not_an_object",
        }
    }
}

/// Parsed `(cat_title, cat_exp, piv_cat)` triple from one response record.
///
/// An unparseable record yields all three fields `None` and a `failure` kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LabelResult {
    pub cat_title: Option<String>,
    pub cat_exp: Option<String>,
    pub piv_cat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ParseFailureKind>,
}

impl LabelResult {
    #[must_use]
    pub fn unparseable(custom_id: Option<String>, kind: ParseFailureKind) -> Self {
        Self {
            custom_id,
            failure: Some(kind),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_unparseable(&self) -> bool {
        self.failure.is_some()
    }
}
