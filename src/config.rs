use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::layout::LayoutConfig;

const DATA_DIR: &str = "character-trees";
const DEFAULT_DB_FILE: &str = "trees.db";
const DEFAULT_LOCAL_FILE: &str = "guest-trees.json";

/// Where trees are stored and how they are laid out
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// SQLite database used for authenticated sessions
    pub db_path: PathBuf,
    /// JSON document used for guest sessions
    pub local_path: PathBuf,
    pub layout: LayoutConfig,
}

impl StoreConfig {
    /// Resolve paths, falling back to the platform data directory
    pub fn resolve(db_path: Option<PathBuf>, local_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(path) => path,
            None => default_data_dir().join(DEFAULT_DB_FILE),
        };
        let local_path = match local_path {
            Some(path) => path,
            None => default_data_dir().join(DEFAULT_LOCAL_FILE),
        };

        Ok(Self {
            db_path: canonical_store_path(&db_path, "db")?,
            local_path: canonical_store_path(&local_path, "json")?,
            layout: LayoutConfig::default(),
        })
    }
}

fn default_data_dir() -> PathBuf {
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(DATA_DIR);
    path
}

/// Check the extension, create the parent directory and canonicalize.
///
/// Resolving `..` and symlinks keeps store files where the operator put them.
pub fn canonical_store_path(path: &Path, extension: &str) -> Result<PathBuf> {
    // Check file extension FIRST (before any filesystem operations)
    match path.extension() {
        Some(ext) if ext == extension => {}
        Some(_) => bail!("Invalid store file extension (must be .{})", extension),
        None => bail!("Store path must have .{} extension", extension),
    }

    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    // File doesn't exist yet: canonicalize parent and append filename
    let filename = path.file_name().context("Invalid path: no filename")?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
    let canonical_parent = parent
        .canonicalize()
        .with_context(|| format!("Failed to resolve directory '{}'", parent.display()))?;
    Ok(canonical_parent.join(filename))
}
