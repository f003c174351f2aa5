//! Layout of the exported artifacts of a training session
//!
//! Everything produced by one session lives under `export_dir/export_name`:
//! the fitted transformers as `transform_X.json` / `transform_Y.json`, every
//! network under `saved_<name>` and the epoch history as `history.json`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PidsimError, PidsimResult};
use crate::preprocessing::ColumnTransformer;
use crate::training::metrics::TrainingHistory;

pub const TRANSFORM_X: &str = "transform_X";
pub const TRANSFORM_Y: &str = "transform_Y";
pub const HISTORY_FILE: &str = "history.json";

/// Named directory holding the artifacts of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(export_dir: P, export_name: &str) -> Self {
        Self {
            dir: export_dir.as_ref().join(export_name),
        }
    }

    /// Store rooted at an existing session directory
    pub fn open<P: AsRef<Path>>(dir: P) -> PidsimResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(PidsimError::Io(format!("no artifact directory at {}", dir.display())));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn transformer_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Directory of the network saved as `saved_<name>`
    pub fn model_dir(&self, name: &str) -> PathBuf {
        self.dir.join(format!("saved_{}", name))
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn has_transformer(&self, name: &str) -> bool {
        self.transformer_path(name).is_file()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.model_dir(name).is_dir()
    }

    pub fn save_transformer(&self, name: &str, transformer: &ColumnTransformer) -> PidsimResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.transformer_path(name);
        transformer.save(&path)?;
        info!("Transformer correctly exported to {}", path.display());
        Ok(path)
    }

    pub fn load_transformer(&self, name: &str) -> PidsimResult<ColumnTransformer> {
        let path = self.transformer_path(name);
        let transformer = ColumnTransformer::load(&path)?;
        info!("Transformer correctly loaded from {}", path.display());
        Ok(transformer)
    }

    pub fn save_history(&self, history: &TrainingHistory) -> PidsimResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.history_path();
        history.save(&path)?;
        Ok(path)
    }

    /// Names of the entries of the session directory, sorted
    pub fn list(&self) -> PidsimResult<Vec<String>> {
        let mut names = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let store = ArtifactStore::new("/tmp/models", "gan_v1");
        assert_eq!(store.dir(), Path::new("/tmp/models/gan_v1"));
        assert_eq!(store.transformer_path(TRANSFORM_X), Path::new("/tmp/models/gan_v1/transform_X.json"));
        assert_eq!(store.model_dir("generator"), Path::new("/tmp/models/gan_v1/saved_generator"));
    }

    #[test]
    fn test_transformer_round_trip_and_listing() {
        let root = tempdir().unwrap();
        let store = ArtifactStore::new(root.path(), "run");
        assert!(store.list().unwrap().is_empty());
        assert!(ArtifactStore::open(store.dir()).is_err());

        store.save_transformer(TRANSFORM_Y, &ColumnTransformer::identity(2)).unwrap();
        store.save_history(&TrainingHistory::new()).unwrap();
        assert!(store.has_transformer(TRANSFORM_Y));
        assert!(!store.has_transformer(TRANSFORM_X));
        assert_eq!(store.load_transformer(TRANSFORM_Y).unwrap().n_features(), 2);
        assert_eq!(store.list().unwrap(), vec!["history.json", "transform_Y.json"]);
        assert!(ArtifactStore::open(store.dir()).is_ok());
    }
}
