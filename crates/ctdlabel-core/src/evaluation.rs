use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{LabelError, Result};
use crate::models::ExpressionKey;
use crate::table::ResultTable;
use crate::taxonomy::{Category, Taxonomy};

/// Placeholder prediction for annotated expressions the table has no label for.
pub const MISSING_PREDICTION: &str = "missing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub key: ExpressionKey,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMetrics {
    pub label: String,
    pub support: usize,
    pub predicted: usize,
    pub true_positive: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionEntry {
    pub expected: String,
    pub predicted: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryEvaluation {
    pub category: Category,
    pub evaluated: usize,
    pub correct: usize,
    pub missing_predictions: usize,
    pub accuracy: f64,
    pub labels: Vec<LabelMetrics>,
    pub confusion: Vec<ConfusionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub evaluated: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub skipped_annotations: usize,
    pub categories: Vec<CategoryEvaluation>,
}

pub fn load_annotations(path: &Path, taxonomy: &Taxonomy) -> Result<Vec<Annotation>> {
    let raw = fs::read(path)?;
    parse_annotations(&raw, taxonomy)
}

/// Accepts comma or semicolon separated files with
/// `cat_title`, `cat_exp` and `cat_label` columns.
///
/// Annotated labels are snapped to the canonical spelling of the label set when
/// they match case-insensitively; other labels are kept trimmed as written.
/// Rows of categories without a label set, or with a blank expression or label,
/// are dropped.
pub fn parse_annotations(raw: &[u8], taxonomy: &Taxonomy) -> Result<Vec<Annotation>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(raw))
        .flexible(true)
        .from_reader(raw);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| LabelError::Validation(format!("annotation table has no {name} column")))
    };
    let title_col = column("cat_title")?;
    let exp_col = column("cat_exp")?;
    let label_col = column("cat_label")?;

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(category) = record.get(title_col).and_then(Category::parse) else {
            continue;
        };
        let Some(labels) = taxonomy.label_set(category) else {
            continue;
        };
        let key = ExpressionKey::new(category, record.get(exp_col).unwrap_or_default());
        let label = record.get(label_col).unwrap_or_default().trim();
        if key.expression.is_empty() || label.is_empty() {
            continue;
        }
        let label = labels.canonical(label).unwrap_or(label).to_string();
        out.push(Annotation { key, label });
    }
    Ok(out)
}

fn sniff_delimiter(raw: &[u8]) -> u8 {
    let header = raw.split(|byte| *byte == b'\n').next().unwrap_or_default();
    let commas = header.iter().filter(|byte| **byte == b',').count();
    let semicolons = header.iter().filter(|byte| **byte == b';').count();
    if semicolons > commas { b';' } else { b',' }
}

/// Scores the table's predictions against annotations, one section per category.
///
/// Every annotation row counts, duplicates included. A missing or null
/// prediction is scored as the `missing` label.
#[must_use]
pub fn evaluate(table: &ResultTable, annotations: &[Annotation], taxonomy: &Taxonomy) -> EvaluationReport {
    let mut pairs = BTreeMap::<Category, Vec<(&str, &str)>>::new();
    let mut skipped = 0usize;
    for annotation in annotations {
        if taxonomy.label_set(annotation.key.category).is_none() {
            skipped += 1;
            continue;
        }
        let predicted = table
            .get(&annotation.key)
            .flatten()
            .unwrap_or(MISSING_PREDICTION);
        pairs
            .entry(annotation.key.category)
            .or_default()
            .push((annotation.label.as_str(), predicted));
    }

    let categories = pairs
        .into_iter()
        .map(|(category, pairs)| evaluate_category(category, &pairs, taxonomy))
        .collect::<Vec<_>>();
    let evaluated = categories.iter().map(|item| item.evaluated).sum();
    let correct = categories.iter().map(|item| item.correct).sum();
    EvaluationReport {
        evaluated,
        correct,
        accuracy: ratio(correct, evaluated),
        skipped_annotations: skipped,
        categories,
    }
}

fn evaluate_category(category: Category, pairs: &[(&str, &str)], taxonomy: &Taxonomy) -> CategoryEvaluation {
    let mut confusion = BTreeMap::<(&str, &str), usize>::new();
    for (expected, predicted) in pairs {
        *confusion.entry((*expected, *predicted)).or_default() += 1;
    }

    let mut labels = BTreeSet::<&str>::new();
    if let Some(set) = taxonomy.label_set(category) {
        labels.extend(set.labels().iter().map(String::as_str));
    }
    labels.extend(pairs.iter().map(|(expected, _)| *expected));
    labels.extend(
        pairs
            .iter()
            .map(|(_, predicted)| *predicted)
            .filter(|predicted| *predicted != MISSING_PREDICTION),
    );

    let label_metrics = labels
        .into_iter()
        .map(|label| {
            let support = pairs.iter().filter(|(expected, _)| *expected == label).count();
            let predicted = pairs.iter().filter(|(_, predicted)| *predicted == label).count();
            let true_positive = confusion.get(&(label, label)).copied().unwrap_or_default();
            let precision = ratio(true_positive, predicted);
            let recall = ratio(true_positive, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            LabelMetrics {
                label: label.to_string(),
                support,
                predicted,
                true_positive,
                precision,
                recall,
                f1,
            }
        })
        .collect();

    let correct = pairs.iter().filter(|(expected, predicted)| expected == predicted).count();
    let missing_predictions = pairs
        .iter()
        .filter(|(_, predicted)| *predicted == MISSING_PREDICTION)
        .count();
    CategoryEvaluation {
        category,
        evaluated: pairs.len(),
        correct,
        missing_predictions,
        accuracy: ratio(correct, pairs.len()),
        labels: label_metrics,
        confusion: confusion
            .into_iter()
            .filter(|((expected, predicted), _)| expected != predicted)
            .map(|((expected, predicted), count)| ConfusionEntry {
                expected: expected.to_string(),
                predicted: predicted.to_string(),
                count,
            })
            .collect(),
    }
}

#[allow(
    clippy::cast_precision_loss,
    reason = "evaluation counts stay far below f64 mantissa precision"
)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
