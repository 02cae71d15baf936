use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{LabelError, Result};
use crate::taxonomy::Category;

/// A contiguous group of expressions of one category; one chunk maps to one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub category: Category,
    /// 1-based position within the category.
    pub index: usize,
    pub expressions: Vec<String>,
}

impl Chunk {
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}_chunk_{}", self.category, self.index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

/// `max(1, n / target)`; callers validate `target >= 1`.
#[must_use]
pub fn chunk_size(items: usize, target: usize) -> usize {
    (items / target.max(1)).max(1)
}

/// Splits an ordered expression set into consecutive chunks of `chunk_size(n, target)`.
pub fn partition(
    category: Category,
    expressions: &BTreeSet<String>,
    target: usize,
) -> Result<Vec<Chunk>> {
    if target == 0 {
        return Err(LabelError::Validation(
            "chunk count must be at least 1".to_string(),
        ));
    }
    let ordered = expressions.iter().cloned().collect::<Vec<_>>();
    let size = chunk_size(ordered.len(), target);
    Ok(ordered
        .chunks(size)
        .enumerate()
        .map(|(offset, group)| Chunk {
            category,
            index: offset + 1,
            expressions: group.to_vec(),
        })
        .collect())
}
