use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Gender,
    Age,
    Race,
    Enrollment,
}

impl Category {
    pub const ALL: [Self; 4] = [Self::Gender, Self::Age, Self::Race, Self::Enrollment];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::Age => "age",
            Self::Race => "race",
            Self::Enrollment => "enrollment",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gender" => Some(Self::Gender),
            "age" => Some(Self::Age),
            "race" => Some(Self::Race),
            "enrollment" => Some(Self::Enrollment),
            _ => None,
        }
    }

    /// Fallback label for expressions that cannot be placed unambiguously.
    #[must_use]
    pub const fn unknown_label(self) -> Option<&'static str> {
        match self {
            Self::Gender => Some("unknown_g"),
            Self::Age => Some("unknown_a"),
            Self::Race => Some("unknown_r"),
            Self::Enrollment => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::<String>::new();
        for label in labels {
            let label = label.into().trim().to_string();
            if label.is_empty() {
                return Err(LabelError::Validation(
                    "label set contains an empty label".to_string(),
                ));
            }
            if !out.contains(&label) {
                out.push(label);
            }
        }
        if out.is_empty() {
            return Err(LabelError::Validation("label set is empty".to_string()));
        }
        Ok(Self(out))
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.0.iter().any(|item| item == label)
    }

    /// Case-insensitive lookup returning the label as spelled in the set.
    #[must_use]
    pub fn canonical(&self, raw: &str) -> Option<&str> {
        let needle = raw.trim();
        self.0
            .iter()
            .find(|item| item.eq_ignore_ascii_case(needle))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Taxonomy {
    categories: BTreeMap<Category, LabelSet>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaxonomyFile {
    categories: BTreeMap<String, Vec<String>>,
}

impl Taxonomy {
    pub fn new(categories: BTreeMap<Category, LabelSet>) -> Self {
        Self { categories }
    }

    #[must_use]
    pub fn builtin() -> Self {
        let mut categories = BTreeMap::new();
        for (category, labels) in [
            (
                Category::Gender,
                &["male", "female", "other", "unknown_g"][..],
            ),
            (
                Category::Age,
                &[
                    "<18 years",
                    "between 18 and 65 years",
                    ">65 years",
                    "unknown_a",
                ][..],
            ),
            (
                Category::Race,
                &[
                    "American Indian or Alaska Native",
                    "Asian",
                    "Black or African American",
                    "Hispanic or Latino",
                    "Native Hawaian or Other Pacific Islander",
                    "White",
                    "unknown_r",
                ][..],
            ),
        ] {
            categories.insert(
                category,
                LabelSet(labels.iter().map(|label| (*label).to_string()).collect()),
            );
        }
        Self { categories }
    }

    /// Categories from the file replace the built-in label set of the same name.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed = toml::from_str::<TaxonomyFile>(raw)?;
        let mut taxonomy = Self::builtin();
        for (name, labels) in parsed.categories {
            let category = Category::parse(&name).ok_or_else(|| {
                LabelError::Validation(format!("unknown category in taxonomy: {name}"))
            })?;
            let labels = LabelSet::new(labels).map_err(|err| {
                LabelError::Validation(format!("category {category}: {err}"))
            })?;
            taxonomy.categories.insert(category, labels);
        }
        Ok(taxonomy)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            LabelError::Validation(format!(
                "failed to read taxonomy {}: {err}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    #[must_use]
    pub fn label_set(&self, category: Category) -> Option<&LabelSet> {
        self.categories.get(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (Category, &LabelSet)> {
        self.categories.iter().map(|(category, set)| (*category, set))
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}
