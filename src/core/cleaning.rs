//! Clean step: sanitise the text column and drop duplicate rows.
//!
//! Cleaning is idempotent: a cleaned dataset passes through unchanged.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::dataset::{Dataset, TEXT_COLUMN};

/// Anything that is not a word character, whitespace, an `@` (mentions), or basic punctuation
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\w\s@.,!?'":;\-]"#).expect("valid disallowed-chars regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Outcome of cleaning a dataset
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub dataset: Dataset,

    /// Rows dropped as duplicates
    pub removed_rows: usize,
}

/// Strip emoji and symbols, keeping `@mention` tokens, then collapse whitespace
pub fn clean_text(text: &str) -> String {
    let stripped = DISALLOWED.replace_all(text, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Clean a dataset.
///
/// When the text column exists its cells are sanitised and rows are
/// de-duplicated on the cleaned text; otherwise whole rows are compared.
/// The first occurrence of a duplicate is kept.
pub fn clean_dataset(dataset: Dataset) -> CleanOutcome {
    let text_idx = dataset.column_index(TEXT_COLUMN);
    let before = dataset.len();

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut rows = Vec::with_capacity(before);

    for mut row in dataset.rows {
        let key = match text_idx {
            Some(idx) => {
                row[idx] = clean_text(&row[idx]);
                vec![row[idx].clone()]
            }
            None => row.clone(),
        };
        if seen.insert(key) {
            rows.push(row);
        }
    }

    let removed_rows = before - rows.len();
    CleanOutcome {
        dataset: Dataset {
            columns: dataset.columns,
            rows,
        },
        removed_rows,
    }
}
