use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{LabelError, Result};

pub const MANIFEST_FILE: &str = "jobs.json";

/// Run directory holding per-chunk audit artifacts, the job manifest and the cached table.
///
/// Layout for a chunk named `gender_chunk_1`:
/// `gender_chunk_1.jsonl` (requests), `output_gender_chunk_1.jsonl` (raw service output),
/// `gender_chunk_1.csv` (parsed results).
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
    batch_filename: String,
}

impl RunWorkspace {
    pub fn new(root: impl Into<PathBuf>, batch_filename: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            batch_filename: batch_filename.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.root.join(format!("{}.csv", self.batch_filename))
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(format!("{}.csv.lock", self.batch_filename))
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn request_path(&self, chunk_name: &str) -> PathBuf {
        self.root.join(format!("{chunk_name}.jsonl"))
    }

    #[must_use]
    pub fn output_path(&self, chunk_name: &str) -> PathBuf {
        self.root.join(format!("output_{chunk_name}.jsonl"))
    }

    #[must_use]
    pub fn chunk_table_path(&self, chunk_name: &str) -> PathBuf {
        self.root.join(format!("{chunk_name}.csv"))
    }

    pub fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes through a sibling temp file and rename, so readers never see a partial file.
    pub fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| LabelError::Validation(format!("target has no parent: {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .and_then(|x| x.to_str())
            .ok_or_else(|| {
                LabelError::Validation(format!("invalid target filename: {}", path.display()))
            })?;
        let tmp_path = parent.join(format!(
            ".{file_name}.ctdlabel.tmp.{}",
            uuid::Uuid::new_v4().simple()
        ));

        {
            let mut tmp = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            tmp.write_all(content)?;
            tmp.sync_all()?;
        }

        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(LabelError::from(err));
        }
        Ok(())
    }
}
