//! Stratified, seeded selection of expressions for manual annotation.
//!
//! The requested total is split evenly across categories, with the remainder
//! going to the first categories in request order. Within a category the
//! expressions are ranked by `blake3(seed, category, expression)`, so the same
//! seed and universe always produce the same sheet.

use serde::Serialize;

use crate::error::{LabelError, Result};
use crate::input::ExpressionUniverse;
use crate::models::ExpressionKey;
use crate::taxonomy::Category;

/// Annotation sheet columns; `cat_label` holds the adjudicated label read back by `evaluate`.
pub const ANNOTATION_SHEET_HEADER: [&str; 5] =
    ["cat_title", "cat_exp", "cat_label", "annotator_1", "annotator_2"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySample {
    pub category: Category,
    pub available: usize,
    pub quota: usize,
    pub sampled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationSample {
    pub requested: usize,
    pub seed: u64,
    pub categories: Vec<CategorySample>,
    #[serde(skip)]
    pub keys: Vec<ExpressionKey>,
}

impl AnnotationSample {
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Blank annotation sheet, one row per sampled expression.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(ANNOTATION_SHEET_HEADER)?;
        for key in &self.keys {
            writer.write_record([key.category.as_str(), key.expression.as_str(), "", "", ""])?;
        }
        writer
            .into_inner()
            .map_err(|err| LabelError::Io(err.into_error()))
    }
}

pub fn sample_for_annotation(
    universe: &ExpressionUniverse,
    categories: &[Category],
    total: usize,
    seed: u64,
) -> Result<AnnotationSample> {
    if total == 0 {
        return Err(LabelError::Validation(
            "sample size must be >= 1".to_string(),
        ));
    }
    let mut requested = Vec::<Category>::with_capacity(categories.len());
    for category in categories {
        if !requested.contains(category) {
            requested.push(*category);
        }
    }
    if requested.is_empty() {
        return Err(LabelError::Validation(
            "at least one category must be sampled".to_string(),
        ));
    }

    let per_category = total / requested.len();
    let remainder = total % requested.len();
    let mut keys = Vec::with_capacity(total);
    let mut summaries = Vec::with_capacity(requested.len());
    for (position, category) in requested.into_iter().enumerate() {
        let quota = per_category + usize::from(position < remainder);
        let Some(expressions) = universe.get(category).filter(|set| !set.is_empty()) else {
            tracing::warn!(category = %category, "no expressions to sample");
            summaries.push(CategorySample {
                category,
                available: 0,
                quota,
                sampled: 0,
            });
            continue;
        };

        let mut ranked = expressions
            .iter()
            .map(|expression| (sample_rank(seed, category, expression), expression))
            .collect::<Vec<_>>();
        ranked.sort();
        let chosen = ranked.into_iter().take(quota).collect::<Vec<_>>();
        summaries.push(CategorySample {
            category,
            available: expressions.len(),
            quota,
            sampled: chosen.len(),
        });
        keys.extend(
            chosen
                .into_iter()
                .map(|(_, expression)| ExpressionKey::new(category, expression)),
        );
    }

    if keys.len() < total {
        tracing::warn!(
            requested = total,
            sampled = keys.len(),
            "sample is smaller than requested; some categories have too few expressions"
        );
    }
    Ok(AnnotationSample {
        requested: total,
        seed,
        categories: summaries,
        keys,
    })
}

fn sample_rank(seed: u64, category: Category, expression: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(category.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(expression.as_bytes());
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::parse_annotations;
    use crate::taxonomy::Taxonomy;

    fn universe(per_category: &[(Category, usize)]) -> ExpressionUniverse {
        let mut universe = ExpressionUniverse::default();
        for (category, count) in per_category {
            for index in 0..*count {
                universe.insert(*category, &format!("{category} expression {index}"));
            }
        }
        universe
    }

    #[test]
    fn quota_is_split_evenly_with_remainder_to_leading_categories() {
        let universe = universe(&[(Category::Age, 50), (Category::Gender, 50), (Category::Race, 50)]);

        let sample = sample_for_annotation(
            &universe,
            &[Category::Age, Category::Gender, Category::Race],
            20,
            42,
        )
        .expect("sample");

        let quotas = sample
            .categories
            .iter()
            .map(|entry| (entry.category, entry.quota, entry.sampled))
            .collect::<Vec<_>>();
        assert_eq!(
            quotas,
            vec![
                (Category::Age, 7, 7),
                (Category::Gender, 7, 7),
                (Category::Race, 6, 6)
            ]
        );
        assert_eq!(sample.len(), 20);
        assert!(sample.keys[..7].iter().all(|key| key.category == Category::Age));
    }

    #[test]
    fn small_categories_contribute_everything_they_have() {
        let universe = universe(&[(Category::Gender, 2), (Category::Race, 30)]);

        let sample = sample_for_annotation(
            &universe,
            &[Category::Gender, Category::Race, Category::Age],
            9,
            7,
        )
        .expect("sample");

        assert_eq!(sample.categories[0].sampled, 2);
        assert_eq!(sample.categories[1].sampled, 3);
        assert_eq!(sample.categories[2].available, 0);
        assert_eq!(sample.len(), 5);
    }

    #[test]
    fn same_seed_gives_same_sheet_and_other_seed_differs() {
        let universe = universe(&[(Category::Race, 40)]);

        let first = sample_for_annotation(&universe, &[Category::Race], 10, 42).expect("sample");
        let again = sample_for_annotation(&universe, &[Category::Race], 10, 42).expect("sample");
        let other = sample_for_annotation(&universe, &[Category::Race], 10, 43).expect("sample");

        assert_eq!(first.keys, again.keys);
        assert_ne!(first.keys, other.keys);
    }

    #[test]
    fn repeated_categories_and_zero_total_are_handled() {
        let universe = universe(&[(Category::Age, 5)]);

        let sample =
            sample_for_annotation(&universe, &[Category::Age, Category::Age], 4, 1).expect("sample");
        assert_eq!(sample.categories.len(), 1);
        assert_eq!(sample.len(), 4);

        let err = sample_for_annotation(&universe, &[Category::Age], 0, 1).expect_err("zero");
        assert_eq!(err.code(), "VALIDATION_FAILED");
        let err = sample_for_annotation(&universe, &[], 4, 1).expect_err("no categories");
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn sheet_is_readable_as_annotations_once_labels_are_filled() {
        let universe = universe(&[(Category::Gender, 3)]);
        let sample = sample_for_annotation(&universe, &[Category::Gender], 3, 42).expect("sample");
        let sheet = String::from_utf8(sample.to_csv().expect("csv")).expect("utf8");
        assert!(sheet.starts_with("cat_title,cat_exp,cat_label,annotator_1,annotator_2\n"));

        let taxonomy = Taxonomy::builtin();
        assert!(parse_annotations(sheet.as_bytes(), &taxonomy).expect("blank sheet").is_empty());

        let filled = sheet.replace(",,,\n", ",Male,male,male\n");
        let annotations = parse_annotations(filled.as_bytes(), &taxonomy).expect("filled sheet");
        assert_eq!(annotations.len(), 3);
        assert!(annotations.iter().all(|annotation| annotation.label == "male"));
    }
}
