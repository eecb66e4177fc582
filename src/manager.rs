use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{TreeError, TreeResult};
use crate::grouping::{CharacterGroup, GroupPatch};
use crate::layout::{auto_layout, LayoutConfig};
use crate::storage::TreeStore;
use crate::tree::{
    new_id, validate_name, Character, CharacterDraft, CharacterPatch, Position, Relationship,
    RelationshipType, Tree,
};

/// In-memory editing state for one client
#[derive(Default)]
struct EditorState {
    current: Option<Tree>,
    groups: Vec<CharacterGroup>,
    grouping_enabled: bool,
}

impl EditorState {
    fn group_mut(&mut self, group_id: &str) -> TreeResult<&mut CharacterGroup> {
        self.groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| TreeError::GroupNotFound(group_id.to_string()))
    }

    /// Drop group members that no longer resolve in the current tree
    fn prune_groups(&mut self) {
        let Some(tree) = self.current.as_ref() else {
            self.groups.clear();
            return;
        };
        for group in &mut self.groups {
            let before = group.character_ids.len();
            group.character_ids.retain(|id| tree.character(id).is_some());
            if group.character_ids.len() != before {
                group.refresh_label();
            }
        }
    }
}

/// Tree mutation service.
///
/// Holds the open tree snapshot and saves every mutation through the store.
/// A mutation is applied to a copy and only becomes the current snapshot
/// once the store accepted it, so a failed save leaves nothing to roll back.
/// The state lock is held across the save: one write at a time.
pub struct TreeManager {
    store: Arc<dyn TreeStore>,
    layout: LayoutConfig,
    state: Mutex<EditorState>,
}

impl TreeManager {
    pub fn new(store: Arc<dyn TreeStore>, layout: LayoutConfig) -> Self {
        Self {
            store,
            layout,
            state: Mutex::new(EditorState::default()),
        }
    }

    /// All trees visible to this session
    pub async fn list_trees(&self) -> Result<Vec<Tree>> {
        self.store.get_all_trees()
    }

    /// Load a tree and make it the current one
    pub async fn open_tree(&self, id: &str) -> Result<Tree> {
        let mut state = self.state.lock().await;
        let tree = self
            .store
            .get_tree(id)
            .with_context(|| format!("Failed to load tree '{}'", id))?;
        state.current = Some(tree.clone());
        state.groups.clear();
        state.grouping_enabled = false;
        tracing::info!(tree = %tree.id, characters = tree.characters.len(), "opened tree");
        Ok(tree)
    }

    pub async fn current_tree(&self) -> Option<Tree> {
        self.state.lock().await.current.clone()
    }

    /// Create a tree and make it the current one
    pub async fn create_tree(&self, name: &str, description: Option<&str>) -> Result<Tree> {
        // Reject bad names before the store sees them
        validate_name(name, "Tree name")?;

        let mut state = self.state.lock().await;
        let tree = self
            .store
            .create_tree(name, description)
            .with_context(|| format!("Failed to create tree '{}'", name.trim()))?;
        state.current = Some(tree.clone());
        state.groups.clear();
        state.grouping_enabled = false;
        tracing::info!(tree = %tree.id, backend = self.store.backend(), "created tree");
        Ok(tree)
    }

    /// Rename and/or re-describe the current tree
    pub async fn update_tree_details(&self, name: Option<&str>, description: Option<&str>) -> Result<Tree> {
        self.commit("update tree details", |tree, now| {
            tree.update_details(name, description, now)
        })
        .await?;
        self.current_tree()
            .await
            .ok_or_else(|| TreeError::NoCurrentTree.into())
    }

    /// Delete a tree; closes it if it was the current one
    pub async fn delete_tree(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store
            .delete_tree(id)
            .with_context(|| format!("Failed to delete tree '{}'", id))?;
        if state.current.as_ref().is_some_and(|t| t.id == id) {
            state.current = None;
            state.groups.clear();
            state.grouping_enabled = false;
        }
        tracing::info!(tree = id, "deleted tree");
        Ok(())
    }

    pub async fn get_character(&self, id: &str) -> Result<Character> {
        let state = self.state.lock().await;
        let tree = state.current.as_ref().ok_or(TreeError::NoCurrentTree)?;
        let character = tree
            .character(id)
            .ok_or_else(|| TreeError::CharacterNotFound(id.to_string()))?;
        Ok(character.clone())
    }

    pub async fn add_character(&self, draft: CharacterDraft) -> Result<Character> {
        self.commit("add character", |tree, now| {
            tree.add_character(draft, now).cloned()
        })
        .await
    }

    pub async fn update_character(&self, id: &str, patch: CharacterPatch) -> Result<Character> {
        self.commit("update character", |tree, now| {
            tree.update_character(id, patch, now).cloned()
        })
        .await
    }

    /// Delete a character together with every relationship targeting it
    pub async fn delete_character(&self, id: &str) -> Result<Character> {
        let mut state = self.state.lock().await;
        let removed = self.commit_locked(&mut state, "delete character", |tree, now| {
            tree.delete_character(id, now)
        })?;
        state.prune_groups();
        Ok(removed)
    }

    pub async fn add_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        description: Option<String>,
    ) -> Result<Relationship> {
        self.commit("add relationship", |tree, now| {
            tree.add_relationship(source_id, target_id, relationship_type, description, now)
                .cloned()
        })
        .await
    }

    pub async fn update_relationship(
        &self,
        source_id: &str,
        relationship_id: &str,
        relationship_type: RelationshipType,
        description: Option<String>,
    ) -> Result<Relationship> {
        self.commit("update relationship", |tree, now| {
            tree.update_relationship(source_id, relationship_id, relationship_type, description, now)
                .cloned()
        })
        .await
    }

    pub async fn delete_relationship(&self, source_id: &str, relationship_id: &str) -> Result<Relationship> {
        self.commit("delete relationship", |tree, now| {
            tree.delete_relationship(source_id, relationship_id, now)
        })
        .await
    }

    /// Group the current tree by relationship type, lay it out and save the positions
    pub async fn enable_grouping(&self) -> Result<Vec<CharacterGroup>> {
        let layout = self.layout;
        let mut computed = Vec::new();
        self.commit("apply grouping layout", |tree, now| {
            let (positioned, groups) = auto_layout(&tree.characters, &layout);
            let moved = tree.apply_positions(&positioned, now);
            tracing::debug!(tree = %tree.id, moved, "applied grouping layout");
            computed = groups;
            Ok(())
        })
        .await?;

        let mut state = self.state.lock().await;
        state.groups = computed.clone();
        state.grouping_enabled = true;
        tracing::info!(groups = computed.len(), "grouping enabled");
        Ok(computed)
    }

    /// Drop the current groups; character positions stay where they are
    pub async fn disable_grouping(&self) {
        let mut state = self.state.lock().await;
        state.groups.clear();
        state.grouping_enabled = false;
    }

    pub async fn is_grouping_enabled(&self) -> bool {
        self.state.lock().await.grouping_enabled
    }

    pub async fn groups(&self) -> Vec<CharacterGroup> {
        self.state.lock().await.groups.clone()
    }

    /// Create a group by hand. Members must belong to the current tree;
    /// the label defaults to the pluralized type and member count.
    pub async fn add_group(
        &self,
        relationship_type: RelationshipType,
        character_ids: Vec<String>,
        position: Position,
        label: Option<String>,
    ) -> Result<CharacterGroup> {
        let mut state = self.state.lock().await;
        let tree = state.current.as_ref().ok_or(TreeError::NoCurrentTree)?;

        let mut members: Vec<String> = Vec::with_capacity(character_ids.len());
        for id in character_ids {
            if tree.character(&id).is_none() {
                return Err(TreeError::CharacterNotFound(id).into());
            }
            if !members.contains(&id) {
                members.push(id);
            }
        }

        let mut group = CharacterGroup {
            id: new_id(),
            relationship_type,
            character_ids: members,
            position,
            label: String::new(),
        };
        match label {
            Some(label) => {
                validate_name(&label, "Group label")?;
                group.label = label.trim().to_string();
            }
            None => group.refresh_label(),
        }
        state.groups.push(group.clone());
        tracing::debug!(group = %group.id, members = group.character_ids.len(), "added group");
        Ok(group)
    }

    /// Change a group's label, position or type; membership is untouched
    pub async fn update_group(&self, group_id: &str, patch: GroupPatch) -> Result<CharacterGroup> {
        let label = patch
            .label
            .as_deref()
            .map(|label| validate_name(label, "Group label").map(|()| label.trim().to_string()))
            .transpose()?;

        let mut state = self.state.lock().await;
        let group = state.group_mut(group_id)?;
        if let Some(position) = patch.position {
            group.position = position;
        }
        let retyped = patch
            .relationship_type
            .is_some_and(|kind| kind != group.relationship_type);
        if let Some(kind) = patch.relationship_type {
            group.relationship_type = kind;
        }
        match label {
            Some(label) => group.label = label,
            None if retyped => group.refresh_label(),
            None => {}
        }
        Ok(group.clone())
    }

    pub async fn remove_group(&self, group_id: &str) -> Result<CharacterGroup> {
        let mut state = self.state.lock().await;
        let index = state
            .groups
            .iter()
            .position(|g| g.id == group_id)
            .ok_or_else(|| TreeError::GroupNotFound(group_id.to_string()))?;
        Ok(state.groups.remove(index))
    }

    /// Add a character of the current tree to a group (no-op if already a member)
    pub async fn add_character_to_group(&self, group_id: &str, character_id: &str) -> Result<CharacterGroup> {
        let mut state = self.state.lock().await;
        let known = state
            .current
            .as_ref()
            .ok_or(TreeError::NoCurrentTree)?
            .character(character_id)
            .is_some();
        if !known {
            return Err(TreeError::CharacterNotFound(character_id.to_string()).into());
        }

        let group = state.group_mut(group_id)?;
        if !group.contains(character_id) {
            group.character_ids.push(character_id.to_string());
            group.refresh_label();
        }
        Ok(group.clone())
    }

    pub async fn remove_character_from_group(&self, group_id: &str, character_id: &str) -> Result<CharacterGroup> {
        let mut state = self.state.lock().await;
        let group = state.group_mut(group_id)?;
        if !group.contains(character_id) {
            return Err(TreeError::CharacterNotFound(character_id.to_string()).into());
        }
        group.character_ids.retain(|id| id != character_id);
        group.refresh_label();
        Ok(group.clone())
    }

    pub async fn move_character_to_group(
        &self,
        character_id: &str,
        from_group_id: &str,
        to_group_id: &str,
    ) -> Result<Vec<CharacterGroup>> {
        let mut state = self.state.lock().await;
        // Check both ends before touching either group
        if !state.group_mut(from_group_id)?.contains(character_id) {
            return Err(TreeError::CharacterNotFound(character_id.to_string()).into());
        }
        state.group_mut(to_group_id)?;

        let from = state.group_mut(from_group_id)?;
        from.character_ids.retain(|id| id != character_id);
        from.refresh_label();
        let from = from.clone();

        let to = state.group_mut(to_group_id)?;
        if !to.contains(character_id) {
            to.character_ids.push(character_id.to_string());
            to.refresh_label();
        }
        Ok(vec![from, to.clone()])
    }

    /// Pretty JSON of every tree in the store
    pub async fn export_trees(&self) -> Result<String> {
        let trees = self.store.get_all_trees()?;
        serde_json::to_string_pretty(&trees).context("Failed to serialize trees")
    }

    /// Upsert every tree of an exported document. Returns how many were imported.
    pub async fn import_trees(&self, json: &str) -> Result<usize> {
        let trees: Vec<Tree> = serde_json::from_str(json).context("Invalid JSON format")?;

        let mut state = self.state.lock().await;
        let mut imported = 0;
        for mut tree in trees {
            let pruned = tree.prune_dangling_relationships();
            if pruned > 0 {
                tracing::warn!(tree = %tree.id, pruned, "dropped dangling relationships on import");
            }
            let saved = self
                .store
                .import_tree(&tree)
                .with_context(|| format!("Failed to import tree '{}'", tree.id))?;
            if state.current.as_ref().is_some_and(|t| t.id == saved.id) {
                state.current = Some(saved);
                state.prune_groups();
            }
            imported += 1;
        }
        tracing::info!(imported, "imported trees");
        Ok(imported)
    }

    /// Apply a mutation to a copy of the current tree, save it, then adopt the
    /// stored snapshot.
    async fn commit<T>(
        &self,
        op: &str,
        mutate: impl FnOnce(&mut Tree, DateTime<Utc>) -> TreeResult<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        self.commit_locked(&mut state, op, mutate)
    }

    fn commit_locked<T>(
        &self,
        state: &mut EditorState,
        op: &str,
        mutate: impl FnOnce(&mut Tree, DateTime<Utc>) -> TreeResult<T>,
    ) -> Result<T> {
        let mut draft = state.current.clone().ok_or(TreeError::NoCurrentTree)?;

        let now = Utc::now();
        let value = mutate(&mut draft, now)?;
        draft.updated_at = now;

        let saved = self
            .store
            .update_tree(&draft)
            .with_context(|| format!("Failed to save tree '{}' after {}", draft.id, op))?;
        tracing::debug!(tree = %saved.id, op, "saved tree");
        state.current = Some(saved);
        Ok(value)
    }
}
