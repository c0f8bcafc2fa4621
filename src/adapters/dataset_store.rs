//! File-backed dataset store.
//!
//! Datasets are JSON Lines (one object per row) or a JSON array of objects.
//! Artifacts land at `<root>/<stage>/<task_id>.jsonl` and are written
//! atomically: a temp file in the same directory, then a rename.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::{ArtifactStage, Dataset};

use super::DatasetStore;

/// Dataset store rooted at a storage directory
#[derive(Debug, Clone)]
pub struct FileDatasetStore {
    root: PathBuf,
}

impl FileDatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact of `stage` for `task_id` lives
    pub fn artifact_path(&self, task_id: &str, stage: ArtifactStage) -> PathBuf {
        self.root
            .join(stage.dir_name())
            .join(format!("{}.jsonl", task_id))
    }
}

/// Parse JSON Lines or a JSON array of row objects
pub fn parse_dataset(content: &str) -> Result<Dataset> {
    let trimmed = content.trim_start();
    let records: Vec<Map<String, Value>> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("Failed to parse JSON array dataset")?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Failed to parse dataset line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|col| record.get(col).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(Dataset::new(columns, rows))
}

/// Render a dataset as JSON Lines
pub fn render_dataset(dataset: &Dataset) -> Result<String> {
    let mut out = String::new();
    for row in &dataset.rows {
        let record: Map<String, Value> = dataset
            .columns
            .iter()
            .zip(row)
            .map(|(col, cell)| (col.clone(), Value::String(cell.clone())))
            .collect();
        out.push_str(&serde_json::to_string(&record).context("Failed to serialize row")?);
        out.push('\n');
    }
    Ok(out)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("Path has no parent directory: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content).context("Failed to write dataset")?;
    tmp.as_file().sync_all().context("Failed to sync dataset")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to move dataset into place: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl DatasetStore for FileDatasetStore {
    async fn load(&self, path: &Path) -> Result<Dataset> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        parse_dataset(&content).with_context(|| format!("Invalid dataset: {}", path.display()))
    }

    async fn save(&self, task_id: &str, dataset: &Dataset, stage: ArtifactStage) -> Result<PathBuf> {
        let path = self.artifact_path(task_id, stage);
        let content = render_dataset(dataset)?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, content.as_bytes()))
            .await
            .context("Dataset writer task panicked")??;

        debug!(task_id, %stage, path = %path.display(), rows = dataset.len(), "Stored artifact");
        Ok(path)
    }

    async fn load_artifact(&self, task_id: &str, stage: ArtifactStage) -> Result<Option<Dataset>> {
        let path = self.artifact_path(task_id, stage);
        if !path.exists() {
            return Ok(None);
        }
        self.load(&path).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_jsonl_keeps_first_seen_column_order() {
        let content = "{\"id\": 1, \"full_text\": \"hi\"}\n\n{\"id\": 2, \"full_text\": null, \"extra\": true}\n";
        let ds = parse_dataset(content).unwrap();
        assert_eq!(ds.columns, vec!["id", "full_text", "extra"]);
        assert_eq!(ds.rows[0], vec!["1", "hi", ""]);
        assert_eq!(ds.rows[1], vec!["2", "", "true"]);
    }

    #[test]
    fn test_parse_json_array() {
        let ds = parse_dataset("[{\"a\": \"x\"}, {\"a\": \"y\"}]").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.column("a").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let err = parse_dataset("{\"a\": 1}\nnot json\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[tokio::test]
    async fn test_save_and_load_artifact() {
        let temp = TempDir::new().unwrap();
        let store = FileDatasetStore::new(temp.path());
        let ds = Dataset::new(
            vec!["id".into(), "full_text".into()],
            vec![vec!["1".into(), "hello".into()]],
        );

        assert!(store.load_artifact("t1", ArtifactStage::Cleaned).await.unwrap().is_none());

        let path = store.save("t1", &ds, ArtifactStage::Cleaned).await.unwrap();
        assert_eq!(path, temp.path().join("cleaned").join("t1.jsonl"));

        let loaded = store.load_artifact("t1", ArtifactStage::Cleaned).await.unwrap().unwrap();
        assert_eq!(loaded, ds);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = FileDatasetStore::new(temp.path());
        let one = Dataset::new(vec!["a".into()], vec![vec!["1".into()]]);
        let two = Dataset::new(vec!["a".into()], vec![vec!["2".into()], vec!["3".into()]]);

        store.save("t", &one, ArtifactStage::Analysed).await.unwrap();
        store.save("t", &two, ArtifactStage::Analysed).await.unwrap();

        let loaded = store.load_artifact("t", ArtifactStage::Analysed).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_input_fails() {
        let temp = TempDir::new().unwrap();
        let store = FileDatasetStore::new(temp.path());
        assert!(store.load(&temp.path().join("nope.jsonl")).await.is_err());
    }
}
