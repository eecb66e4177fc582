use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use super::TreeStore;
use crate::error::TreeError;
use crate::tree::{validate_name, Character, Position, Relationship, RelationshipType, Tree};

/// Validate database file path
fn validate_db_path(path: &Path) -> Result<()> {
    // Check file extension FIRST (before any filesystem operations)
    if let Some(ext) = path.extension() {
        if ext != "db" {
            bail!("Invalid database file extension (must be .db)");
        }
    } else {
        bail!("Database path must have .db extension");
    }
    Ok(())
}

// Fixed width so ORDER BY on the text column is chronological
fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Corrupted timestamp '{}' on {}", value, what))?;
    Ok(parsed.with_timezone(&Utc))
}

const SCHEMA: &str = r#"
-- Trees, scoped to the owning user
CREATE TABLE IF NOT EXISTS trees (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) STRICT;

-- Characters; ordinal keeps the tree's character order
CREATE TABLE IF NOT EXISTS characters (
    tree_id TEXT NOT NULL,
    id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    age INTEGER,
    occupation TEXT,
    traits TEXT NOT NULL,
    position_x REAL NOT NULL,
    position_y REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY(tree_id, id),
    FOREIGN KEY(tree_id) REFERENCES trees(id) ON DELETE CASCADE
) STRICT;

-- Outgoing relationships, owned by their source character
CREATE TABLE IF NOT EXISTS relationships (
    tree_id TEXT NOT NULL,
    id TEXT NOT NULL,
    character_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    related_to_id TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    description TEXT,
    PRIMARY KEY(tree_id, id),
    FOREIGN KEY(tree_id, character_id) REFERENCES characters(tree_id, id) ON DELETE CASCADE
) STRICT;

CREATE INDEX IF NOT EXISTS idx_trees_user ON trees(user_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_characters_tree ON characters(tree_id, ordinal);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(tree_id, character_id, ordinal);
"#;

/// Database-backed store for authenticated users
pub struct SqliteTreeStore {
    pool: Pool<SqliteConnectionManager>,
    user: String,
}

impl SqliteTreeStore {
    /// Open or create database with connection pool
    pub fn open(path: &Path, user: &str) -> Result<Self> {
        // Validate path first
        validate_db_path(path)?;
        if user.trim().is_empty() {
            bail!("Database store requires a user");
        }

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // FOREIGN KEY enforcement is per connection and off by default
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(15)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection from pool")?;

            // WAL mode for concurrent reads
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;

            conn.execute_batch(SCHEMA)?;
        }

        Ok(Self {
            pool,
            user: user.trim().to_string(),
        })
    }

    fn owns(&self, conn: &Connection, id: &str) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM trees WHERE id = ?1 AND user_id = ?2",
                params![id, &self.user],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Database error querying tree '{}'", id))?;
        Ok(found.is_some())
    }

    fn load_tree(&self, conn: &Connection, id: &str) -> Result<Option<Tree>> {
        let row = conn
            .query_row(
                "SELECT id, name, description, created_at, updated_at
                 FROM trees WHERE id = ?1 AND user_id = ?2",
                params![id, &self.user],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("Database error querying tree '{}'", id))?;

        let Some((id, name, description, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let characters = load_characters(conn, &id)?;

        Ok(Some(Tree {
            created_at: parse_timestamp(&created_at, &format!("tree '{}'", id))?,
            updated_at: parse_timestamp(&updated_at, &format!("tree '{}'", id))?,
            id,
            name,
            description,
            characters,
        }))
    }

    fn insert_tree_row(&self, conn: &Connection, tree: &Tree) -> Result<()> {
        conn.execute(
            "INSERT INTO trees (id, user_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &tree.id,
                &self.user,
                &tree.name,
                &tree.description,
                timestamp(&tree.created_at),
                timestamp(&tree.updated_at),
            ],
        )
        .with_context(|| format!("Failed to insert tree '{}'", tree.id))?;
        Ok(())
    }

    fn update_tree_row(&self, conn: &Connection, tree: &Tree) -> Result<()> {
        conn.execute(
            "UPDATE trees SET name = ?1, description = ?2, updated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![
                &tree.name,
                &tree.description,
                timestamp(&tree.updated_at),
                &tree.id,
                &self.user,
            ],
        )
        .with_context(|| format!("Failed to update tree '{}'", tree.id))?;
        Ok(())
    }
}

fn load_characters(conn: &Connection, tree_id: &str) -> Result<Vec<Character>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, description, age, occupation, traits, position_x, position_y,
                created_at, updated_at
         FROM characters WHERE tree_id = ?1 ORDER BY ordinal",
    )?;
    let rows = stmt.query_map(params![tree_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<u32>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, f64>(6)?,
            row.get::<_, f64>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
        ))
    })?;

    let mut characters = Vec::new();
    for row in rows {
        let (id, name, description, age, occupation, traits_json, x, y, created_at, updated_at) = row?;
        let traits: Vec<String> = serde_json::from_str(&traits_json)
            .with_context(|| format!("Corrupted traits data for character '{}'", id))?;
        let relationships = load_relationships(conn, tree_id, &id)?;
        let what = format!("character '{}'", id);
        characters.push(Character {
            created_at: parse_timestamp(&created_at, &what)?,
            updated_at: parse_timestamp(&updated_at, &what)?,
            id,
            name,
            description,
            age,
            occupation,
            traits,
            relationships,
            position: Position::new(x, y),
        });
    }
    Ok(characters)
}

fn load_relationships(conn: &Connection, tree_id: &str, character_id: &str) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, related_to_id, relationship_type, description
         FROM relationships WHERE tree_id = ?1 AND character_id = ?2 ORDER BY ordinal",
    )?;
    let rows = stmt.query_map(params![tree_id, character_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    let mut relationships = Vec::new();
    for row in rows {
        let (id, target_character_id, kind, description) = row?;
        let relationship_type: RelationshipType = kind
            .parse()
            .with_context(|| format!("Corrupted type for relationship '{}'", id))?;
        relationships.push(Relationship {
            id,
            target_character_id,
            relationship_type,
            description,
        });
    }
    Ok(relationships)
}

/// Replace all characters and relationships of a tree
fn write_characters(conn: &Connection, tree: &Tree) -> Result<()> {
    // FOREIGN KEY CASCADE clears the relationships too
    conn.execute("DELETE FROM characters WHERE tree_id = ?1", params![&tree.id])
        .with_context(|| format!("Failed to clear characters of tree '{}'", tree.id))?;

    let mut char_stmt = conn.prepare_cached(
        "INSERT INTO characters (tree_id, id, ordinal, name, description, age, occupation, traits,
                                 position_x, position_y, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    let mut rel_stmt = conn.prepare_cached(
        "INSERT INTO relationships (tree_id, id, character_id, ordinal, related_to_id,
                                    relationship_type, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for (ordinal, character) in tree.characters.iter().enumerate() {
        let traits_json = serde_json::to_string(&character.traits)
            .with_context(|| format!("Failed to serialize traits for character '{}'", character.id))?;
        char_stmt
            .execute(params![
                &tree.id,
                &character.id,
                ordinal as i64,
                &character.name,
                &character.description,
                character.age,
                &character.occupation,
                &traits_json,
                character.position.x,
                character.position.y,
                timestamp(&character.created_at),
                timestamp(&character.updated_at),
            ])
            .with_context(|| format!("Failed to insert character '{}'", character.id))?;

        for (rel_ordinal, rel) in character.relationships.iter().enumerate() {
            rel_stmt
                .execute(params![
                    &tree.id,
                    &rel.id,
                    &character.id,
                    rel_ordinal as i64,
                    &rel.target_character_id,
                    rel.relationship_type.as_str(),
                    &rel.description,
                ])
                .with_context(|| {
                    format!(
                        "Failed to insert relationship '{}' -> '{}'",
                        character.id, rel.target_character_id
                    )
                })?;
        }
    }
    Ok(())
}

impl TreeStore for SqliteTreeStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    /// Most recently updated first
    fn get_all_trees(&self) -> Result<Vec<Tree>> {
        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM trees WHERE user_id = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![&self.user], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut trees = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tree) = self.load_tree(&conn, &id)? {
                trees.push(tree);
            }
        }
        Ok(trees)
    }

    fn get_tree(&self, id: &str) -> Result<Tree> {
        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        match self.load_tree(&conn, id)? {
            Some(tree) => Ok(tree),
            None => Err(TreeError::TreeNotFound(id.to_string()).into()),
        }
    }

    fn create_tree(&self, name: &str, description: Option<&str>) -> Result<Tree> {
        let tree = Tree::new(name, description, Utc::now())?;
        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        self.insert_tree_row(&conn, &tree)?;
        Ok(tree)
    }

    /// Wrapped in transaction for atomicity
    fn update_tree(&self, tree: &Tree) -> Result<Tree> {
        validate_name(&tree.name, "Tree name")?;

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for updating tree")?;

        if !self.owns(&tx, &tree.id)? {
            return Err(TreeError::TreeNotFound(tree.id.clone()).into());
        }

        let mut stored = tree.clone();
        stored.updated_at = Utc::now();
        self.update_tree_row(&tx, &stored)?;
        write_characters(&tx, &stored)?;

        let saved = self
            .load_tree(&tx, &stored.id)?
            .with_context(|| format!("Tree '{}' vanished during update", stored.id))?;
        tx.commit()
            .context("Failed to commit transaction for updating tree")?;
        Ok(saved)
    }

    fn delete_tree(&self, id: &str) -> Result<()> {
        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let count = conn
            .execute(
                "DELETE FROM trees WHERE id = ?1 AND user_id = ?2",
                params![id, &self.user],
            )
            .with_context(|| format!("Failed to delete tree '{}'", id))?;

        // FOREIGN KEY CASCADE removes characters and relationships
        if count == 0 {
            return Err(TreeError::TreeNotFound(id.to_string()).into());
        }
        Ok(())
    }

    fn import_tree(&self, tree: &Tree) -> Result<Tree> {
        validate_name(&tree.name, "Tree name")?;

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for importing tree")?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM trees WHERE id = ?1",
                params![&tree.id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Database error querying tree '{}'", tree.id))?;

        match owner {
            Some(owner) if owner != self.user => {
                bail!("Cannot import tree '{}': it belongs to another user", tree.id)
            }
            Some(_) => self.update_tree_row(&tx, tree)?,
            None => self.insert_tree_row(&tx, tree)?,
        }
        write_characters(&tx, tree)?;

        let saved = self
            .load_tree(&tx, &tree.id)?
            .with_context(|| format!("Tree '{}' vanished during import", tree.id))?;
        tx.commit()
            .context("Failed to commit transaction for importing tree")?;
        Ok(saved)
    }
}
