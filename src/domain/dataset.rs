//! Tabular dataset flowing through the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column holding the text sent to the model providers
pub const TEXT_COLUMN: &str = "full_text";

/// Columns written by the enrichment step
pub const SENTIMENT_COLUMN: &str = "sentiment";
pub const PRIORITY_COLUMN: &str = "priority";
pub const TOPIC_COLUMN: &str = "main_topic";

/// Rows of string cells under named columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Create a dataset; rows shorter than the header are padded with blanks
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Write a column, replacing it if it already exists.
    ///
    /// `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
    }
}

/// Durable outputs written along the pipeline, one per task and stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStage {
    /// Output of the clean step
    Cleaned,

    /// Output of the enrich step
    Enriched,

    /// Output of the augment step
    Augmented,

    /// Final dataset written by the persist step
    Analysed,
}

impl ArtifactStage {
    /// Directory name under the storage root
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactStage::Cleaned => "cleaned",
            ArtifactStage::Enriched => "enriched",
            ArtifactStage::Augmented => "augmented",
            ArtifactStage::Analysed => "analysed",
        }
    }
}

impl fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
