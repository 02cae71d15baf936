use std::fmt;

use serde::{Deserialize, Serialize};

use crate::taxonomy::Category;

/// Trims and collapses internal whitespace; case is preserved.
#[must_use]
pub fn normalize_expression(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity of one labeling unit: a category plus a normalized expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExpressionKey {
    pub category: Category,
    pub expression: String,
}

impl ExpressionKey {
    pub fn new(category: Category, expression: &str) -> Self {
        Self {
            category,
            expression: normalize_expression(expression),
        }
    }

    /// Builds a key from the loosely typed echo fields of a model response.
    #[must_use]
    pub fn from_echo(cat_title: Option<&str>, cat_exp: Option<&str>) -> Option<Self> {
        let category = Category::parse(cat_title?)?;
        let expression = normalize_expression(cat_exp?);
        if expression.is_empty() {
            return None;
        }
        Some(Self {
            category,
            expression,
        })
    }
}

impl fmt::Display for ExpressionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.expression)
    }
}
