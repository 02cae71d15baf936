use std::collections::BTreeSet;

use crate::encoder::TaskEncoder;
use crate::models::{ExpressionKey, LabelTask};
use crate::table::ResultTable;
use crate::taxonomy::Taxonomy;

pub const CORRECTION_CHUNK: &str = "correction_chunk_1";

/// Submitted identities that have no label in `table`, in key order.
#[must_use]
pub fn missing_keys(submitted: &BTreeSet<ExpressionKey>, table: &ResultTable) -> Vec<ExpressionKey> {
    submitted
        .iter()
        .filter(|key| !table.is_labeled(key))
        .cloned()
        .collect()
}

/// One task per missing identity, each encoded with its own category's label set.
#[must_use]
pub fn correction_tasks(
    encoder: &TaskEncoder,
    taxonomy: &Taxonomy,
    missing: &[ExpressionKey],
) -> Vec<LabelTask> {
    missing
        .iter()
        .filter_map(|key| {
            let labels = taxonomy.label_set(key.category)?;
            Some(encoder.encode_key(key.clone(), labels))
        })
        .collect()
}

/// Inserts explicit null rows for identities the table never saw.
/// Returns every submitted identity that is still unlabeled.
pub fn close_gaps(submitted: &BTreeSet<ExpressionKey>, table: &mut ResultTable) -> Vec<ExpressionKey> {
    let mut unlabeled = Vec::new();
    for key in submitted {
        if !table.contains(key) {
            table.insert(key.clone(), None);
        }
        if !table.is_labeled(key) {
            unlabeled.push(key.clone());
        }
    }
    unlabeled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Category;

    fn keys(category: Category, items: &[&str]) -> BTreeSet<ExpressionKey> {
        items
            .iter()
            .map(|item| ExpressionKey::new(category, item))
            .collect()
    }

    #[test]
    fn null_and_absent_rows_are_both_missing() {
        let submitted = keys(Category::Gender, &["men", "women", "n/a"]);
        let mut table = ResultTable::new();
        table.insert(ExpressionKey::new(Category::Gender, "men"), Some("male".to_string()));
        table.insert(ExpressionKey::new(Category::Gender, "women"), None);

        let missing = missing_keys(&submitted, &table);
        assert_eq!(
            missing,
            vec![
                ExpressionKey::new(Category::Gender, "n/a"),
                ExpressionKey::new(Category::Gender, "women"),
            ]
        );
    }

    #[test]
    fn correction_chunk_may_span_categories() {
        let missing = vec![
            ExpressionKey::new(Category::Gender, "n/a"),
            ExpressionKey::new(Category::Age, "adults"),
            ExpressionKey::new(Category::Enrollment, "120"),
        ];
        let tasks = correction_tasks(&TaskEncoder::new("m"), &Taxonomy::builtin(), &missing);
        assert_eq!(tasks.len(), 2, "categories without a label set are not resubmitted");
        assert_eq!(tasks[0].key.category, Category::Gender);
        assert_eq!(tasks[1].key.category, Category::Age);
        assert!(tasks[1].request.body.messages[0].content.contains("unknown_a"));
    }

    #[test]
    fn gaps_are_closed_with_explicit_nulls() {
        let submitted = keys(Category::Race, &["Asian", "Caucasian"]);
        let mut table = ResultTable::new();
        table.insert(ExpressionKey::new(Category::Race, "Asian"), Some("Asian".to_string()));

        let unlabeled = close_gaps(&submitted, &mut table);
        assert_eq!(unlabeled, vec![ExpressionKey::new(Category::Race, "Caucasian")]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&ExpressionKey::new(Category::Race, "Caucasian")), Some(None));
    }
}
