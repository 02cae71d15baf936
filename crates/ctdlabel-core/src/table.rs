use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{LabelError, Result};
use crate::models::{ExpressionKey, LabelResult, ParseFailureKind};
use crate::taxonomy::Category;

pub const TABLE_HEADER: [&str; 3] = ["cat_title", "cat_exp", "piv_cat"];
/// Audit columns appended to the per-chunk CSV.
pub const CHUNK_TABLE_HEADER: [&str; 5] = ["cat_title", "cat_exp", "piv_cat", "custom_id", "failure"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    pub cat_title: String,
    pub cat_exp: String,
    pub piv_cat: Option<String>,
}

/// Deduplicated labels keyed by (category, expression).
///
/// A labeled row is never replaced; a null row is upgraded by the first label seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    rows: BTreeMap<ExpressionKey, Option<String>>,
}

impl ResultTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &ExpressionKey) -> bool {
        self.rows.contains_key(key)
    }

    /// `None` when the key is absent, `Some(None)` for an explicit null label.
    #[must_use]
    pub fn get(&self, key: &ExpressionKey) -> Option<Option<&str>> {
        self.rows.get(key).map(Option::as_deref)
    }

    #[must_use]
    pub fn is_labeled(&self, key: &ExpressionKey) -> bool {
        matches!(self.rows.get(key), Some(Some(_)))
    }

    /// Returns `true` when the stored value changed.
    pub fn insert(&mut self, key: ExpressionKey, label: Option<String>) -> bool {
        match self.rows.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(label);
                true
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_none() && label.is_some() {
                    slot.insert(label);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn merge(&mut self, other: Self) {
        for (key, label) in other.rows {
            self.insert(key, label);
        }
    }

    #[must_use]
    pub fn labeled_count(&self) -> usize {
        self.rows.values().filter(|label| label.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExpressionKey, Option<&str>)> {
        self.rows.iter().map(|(key, label)| (key, label.as_deref()))
    }

    pub fn category_rows(&self, category: Category) -> impl Iterator<Item = (&ExpressionKey, Option<&str>)> {
        self.iter().filter(move |(key, _)| key.category == category)
    }

    #[must_use]
    pub fn rows(&self) -> Vec<ResultRow> {
        self.iter()
            .map(|(key, label)| ResultRow {
                cat_title: key.category.as_str().to_string(),
                cat_exp: key.expression.clone(),
                piv_cat: label.map(ToString::to_string),
            })
            .collect()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(TABLE_HEADER)?;
        for (key, label) in self.iter() {
            writer.write_record([key.category.as_str(), key.expression.as_str(), label.unwrap_or("")])?;
        }
        finish(writer)
    }

    pub fn from_csv(raw: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().from_reader(raw);
        ensure_header(reader.headers()?, "result table")?;
        let mut table = Self::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let cat_title = record.get(0).unwrap_or_default();
            let cat_exp = record.get(1).unwrap_or_default();
            let key = ExpressionKey::from_echo(Some(cat_title), Some(cat_exp)).ok_or_else(|| {
                LabelError::Validation(format!(
                    "result table row {} has an unknown category or blank expression",
                    index + 2
                ))
            })?;
            table.insert(key, non_blank(record.get(2)));
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_csv(&fs::read(path)?)
    }
}

/// Per-chunk audit CSV: the echoed triple plus the correlation id and parse failure kind,
/// so identity can be resolved again without the raw output artifact.
pub fn results_to_csv(results: &[LabelResult]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CHUNK_TABLE_HEADER)?;
    for result in results {
        writer.write_record([
            result.cat_title.as_deref().unwrap_or(""),
            result.cat_exp.as_deref().unwrap_or(""),
            result.piv_cat.as_deref().unwrap_or(""),
            result.custom_id.as_deref().unwrap_or(""),
            result.failure.map_or("", ParseFailureKind::as_str),
        ])?;
    }
    finish(writer)
}

/// Reads a per-chunk CSV; the three-column layout without audit columns is accepted too.
pub fn results_from_csv(raw: &[u8]) -> Result<Vec<LabelResult>> {
    let mut reader = csv::ReaderBuilder::new().from_reader(raw);
    let headers = reader.headers()?;
    let found = headers.iter().map(str::trim).collect::<Vec<_>>();
    if found != TABLE_HEADER && found != CHUNK_TABLE_HEADER {
        return Err(LabelError::Validation(format!(
            "chunk results header must be {}, found {}",
            CHUNK_TABLE_HEADER.join(","),
            found.join(",")
        )));
    }
    reader
        .records()
        .map(|record| {
            let record = record?;
            let failure = match non_blank(record.get(4)) {
                Some(raw) => Some(parse_failure_kind(&raw)?),
                None => None,
            };
            Ok(LabelResult {
                cat_title: non_blank(record.get(0)),
                cat_exp: non_blank(record.get(1)),
                piv_cat: non_blank(record.get(2)),
                custom_id: non_blank(record.get(3)),
                failure,
            })
        })
        .collect()
}

fn parse_failure_kind(raw: &str) -> Result<ParseFailureKind> {
    [
        ParseFailureKind::InvalidEnvelope,
        ParseFailureKind::MissingContent,
        ParseFailureKind::InvalidContent,
        ParseFailureKind::NotAnObject,
    ]
    .into_iter()
    .find(|kind| kind.as_str() == raw)
    .ok_or_else(|| LabelError::Validation(format!("unknown parse failure kind '{raw}'")))
}

fn ensure_header(headers: &csv::StringRecord, label: &str) -> Result<()> {
    let found = headers.iter().map(str::trim).collect::<Vec<_>>();
    if found != TABLE_HEADER {
        return Err(LabelError::Validation(format!(
            "{label} header must be {}, found {}",
            TABLE_HEADER.join(","),
            found.join(",")
        )));
    }
    Ok(())
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|err| LabelError::Io(err.into_error()))
}
