use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{LabelError, Result};
use crate::models::normalize_expression;
use crate::taxonomy::{Category, Taxonomy};

/// Unique normalized expressions per labelable category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpressionUniverse {
    sets: BTreeMap<Category, BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InputStats {
    pub rows: usize,
    pub unknown_category_rows: usize,
    pub unlabeled_category_rows: usize,
    pub blank_expression_rows: usize,
}

impl ExpressionUniverse {
    pub fn insert(&mut self, category: Category, expression: &str) -> bool {
        let expression = normalize_expression(expression);
        if expression.is_empty() {
            return false;
        }
        self.sets.entry(category).or_default().insert(expression)
    }

    #[must_use]
    pub fn get(&self, category: Category) -> Option<&BTreeSet<String>> {
        self.sets.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &BTreeSet<String>)> {
        self.sets.iter().map(|(category, set)| (*category, set))
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.sets.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl<'a> FromIterator<(Category, &'a str)> for ExpressionUniverse {
    fn from_iter<T: IntoIterator<Item = (Category, &'a str)>>(iter: T) -> Self {
        let mut universe = Self::default();
        for (category, expression) in iter {
            universe.insert(category, expression);
        }
        universe
    }
}

pub fn load_expression_universe(path: &Path, taxonomy: &Taxonomy) -> Result<ExpressionUniverse> {
    let raw = fs::read(path)?;
    let (universe, stats) = parse_expression_table(&raw, taxonomy)?;
    tracing::info!(
        path = %path.display(),
        rows = stats.rows,
        expressions = universe.total(),
        unknown_category_rows = stats.unknown_category_rows,
        unlabeled_category_rows = stats.unlabeled_category_rows,
        blank_expression_rows = stats.blank_expression_rows,
        "expression table loaded"
    );
    Ok(universe)
}

/// Reads `cat_title`/`cat_exp` from an upstream table; other columns are ignored.
pub fn parse_expression_table(raw: &[u8], taxonomy: &Taxonomy) -> Result<(ExpressionUniverse, InputStats)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(raw);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| LabelError::Validation(format!("input table has no {name} column")))
    };
    let title_col = column("cat_title")?;
    let exp_col = column("cat_exp")?;

    let mut universe = ExpressionUniverse::default();
    let mut stats = InputStats::default();
    for record in reader.records() {
        let record = record?;
        stats.rows += 1;
        let Some(category) = record.get(title_col).and_then(Category::parse) else {
            stats.unknown_category_rows += 1;
            continue;
        };
        if taxonomy.label_set(category).is_none() {
            stats.unlabeled_category_rows += 1;
            continue;
        }
        let expression = record.get(exp_col).unwrap_or_default();
        if !universe.insert(category, expression) && normalize_expression(expression).is_empty() {
            stats.blank_expression_rows += 1;
        }
    }
    Ok((universe, stats))
}
