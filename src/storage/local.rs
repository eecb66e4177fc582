use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::TreeStore;
use crate::error::TreeError;
use crate::tree::{validate_name, Tree};

/// Guest store: every tree in one JSON document on the local device
pub struct LocalTreeStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the document
    lock: Mutex<()>,
}

impl LocalTreeStore {
    pub fn open(path: &Path) -> Result<Self> {
        match path.extension() {
            Some(ext) if ext == "json" => {}
            _ => bail!("Local store path must have .json extension"),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing document is an empty store; so is a malformed one.
    fn read_all(&self) -> Result<Vec<Tree>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read '{}'", self.path.display()))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&raw) {
            Ok(trees) => Ok(trees),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "stored trees are unreadable, treating store as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Write to a sibling temp file, then rename over the document
    fn write_all(&self, trees: &[Tree]) -> Result<()> {
        let json = serde_json::to_string_pretty(trees).context("Failed to serialize trees")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write '{}'", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace '{}'", self.path.display()))?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TreeStore for LocalTreeStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn get_all_trees(&self) -> Result<Vec<Tree>> {
        let _guard = self.guard();
        self.read_all()
    }

    fn get_tree(&self, id: &str) -> Result<Tree> {
        let _guard = self.guard();
        self.read_all()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TreeError::TreeNotFound(id.to_string()).into())
    }

    fn create_tree(&self, name: &str, description: Option<&str>) -> Result<Tree> {
        let tree = Tree::new(name, description, Utc::now())?;

        let _guard = self.guard();
        let mut trees = self.read_all()?;
        trees.push(tree.clone());
        self.write_all(&trees)?;
        Ok(tree)
    }

    fn update_tree(&self, tree: &Tree) -> Result<Tree> {
        validate_name(&tree.name, "Tree name")?;

        let _guard = self.guard();
        let mut trees = self.read_all()?;
        let slot = trees
            .iter_mut()
            .find(|t| t.id == tree.id)
            .ok_or_else(|| TreeError::TreeNotFound(tree.id.clone()))?;

        let mut updated = tree.clone();
        updated.updated_at = Utc::now();
        *slot = updated.clone();
        self.write_all(&trees)?;
        Ok(updated)
    }

    fn delete_tree(&self, id: &str) -> Result<()> {
        let _guard = self.guard();
        let mut trees = self.read_all()?;
        let before = trees.len();
        trees.retain(|t| t.id != id);
        if trees.len() == before {
            return Err(TreeError::TreeNotFound(id.to_string()).into());
        }
        self.write_all(&trees)
    }

    fn import_tree(&self, tree: &Tree) -> Result<Tree> {
        validate_name(&tree.name, "Tree name")?;

        let _guard = self.guard();
        let mut trees = self.read_all()?;
        match trees.iter_mut().find(|t| t.id == tree.id) {
            Some(slot) => *slot = tree.clone(),
            None => trees.push(tree.clone()),
        }
        self.write_all(&trees)?;
        Ok(tree.clone())
    }
}
