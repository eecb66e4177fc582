//! Tree persistence.
//!
//! One capability, two backends: a SQLite database for authenticated users
//! and a JSON document for guests. [`open_store`] picks one from the session.

use std::sync::Arc;

use anyhow::Result;

use crate::config::StoreConfig;
use crate::session::Session;
use crate::tree::Tree;

mod local;
mod sqlite;

pub use local::LocalTreeStore;
pub use sqlite::SqliteTreeStore;

/// Lossless round-trip of whole tree aggregates
pub trait TreeStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    fn get_all_trees(&self) -> Result<Vec<Tree>>;

    /// Fails with `TreeError::TreeNotFound` for unknown ids
    fn get_tree(&self, id: &str) -> Result<Tree>;

    /// Stamps a fresh id and timestamps
    fn create_tree(&self, name: &str, description: Option<&str>) -> Result<Tree>;

    /// Replaces the stored tree (refreshing `updated_at`) and returns the stored snapshot
    fn update_tree(&self, tree: &Tree) -> Result<Tree>;

    fn delete_tree(&self, id: &str) -> Result<()>;

    /// Insert or replace a tree keeping its ids and timestamps
    fn import_tree(&self, tree: &Tree) -> Result<Tree>;
}

/// Choose the store for a session
pub fn open_store(session: &Session, config: &StoreConfig) -> Result<Arc<dyn TreeStore>> {
    match session.user() {
        Some(user) => {
            tracing::info!(user = %user, path = %config.db_path.display(), "using database tree store");
            Ok(Arc::new(SqliteTreeStore::open(&config.db_path, user)?))
        }
        None => {
            let store = LocalTreeStore::open(&config.local_path)?;
            tracing::info!(path = %store.path().display(), "using local tree store");
            Ok(Arc::new(store))
        }
    }
}
