use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TreeError, TreeResult};

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_TEXT_LENGTH: usize = 4096;

/// Validate a tree or character name (trimmed, bounded, printable)
pub fn validate_name(name: &str, field: &'static str) -> TreeResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TreeError::EmptyField { field });
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(TreeError::TooLong { field, max: MAX_NAME_LENGTH });
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(TreeError::InvalidCharacters { field });
    }
    Ok(())
}

/// Validate free text (descriptions, occupation, traits)
fn validate_text(text: &str, field: &'static str) -> TreeResult<()> {
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(TreeError::TooLong { field, max: MAX_TEXT_LENGTH });
    }
    if text.contains('\0') {
        return Err(TreeError::InvalidCharacters { field });
    }
    Ok(())
}

fn validate_optional_text(text: Option<&str>, field: &'static str) -> TreeResult<()> {
    match text {
        Some(text) => validate_text(text, field),
        None => Ok(()),
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of relationship between two characters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    Parent,
    Child,
    Sibling,
    Spouse,
    Friend,
    Enemy,
    Colleague,
    Mentor,
    Student,
    Other,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 10] = [
        RelationshipType::Parent,
        RelationshipType::Child,
        RelationshipType::Sibling,
        RelationshipType::Spouse,
        RelationshipType::Friend,
        RelationshipType::Enemy,
        RelationshipType::Colleague,
        RelationshipType::Mentor,
        RelationshipType::Student,
        RelationshipType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Parent => "parent",
            RelationshipType::Child => "child",
            RelationshipType::Sibling => "sibling",
            RelationshipType::Spouse => "spouse",
            RelationshipType::Friend => "friend",
            RelationshipType::Enemy => "enemy",
            RelationshipType::Colleague => "colleague",
            RelationshipType::Mentor => "mentor",
            RelationshipType::Student => "student",
            RelationshipType::Other => "other",
        }
    }

    /// Plural noun shown on a group label
    pub fn group_label(&self) -> &'static str {
        match self {
            RelationshipType::Parent => "Parents",
            RelationshipType::Child => "Children",
            RelationshipType::Sibling => "Siblings",
            RelationshipType::Spouse => "Spouses",
            RelationshipType::Friend => "Friends",
            RelationshipType::Enemy => "Enemies",
            RelationshipType::Colleague => "Colleagues",
            RelationshipType::Mentor => "Mentors",
            RelationshipType::Student => "Students",
            RelationshipType::Other => "Related",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TreeError::UnknownRelationshipType(s.to_string()))
    }
}

/// Point on the editor canvas
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Directed, typed edge owned by its source character
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: String,

    /// Character this edge points at (reference, not ownership)
    #[serde(rename = "targetCharacterId")]
    pub target_character_id: String,

    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Node of a character tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Outgoing edges only
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub position: Position,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Top-level persisted aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when adding a character (id and timestamps are generated)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct CharacterDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub position: Position,
}

impl CharacterDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> TreeResult<()> {
        validate_name(&self.name, "Character name")?;
        validate_text(&self.description, "Character description")?;
        validate_optional_text(self.occupation.as_deref(), "Occupation")?;
        for tr in &self.traits {
            validate_text(tr, "Trait")?;
        }
        Ok(())
    }
}

/// Partial character update; every `Some` field overwrites the stored value
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct CharacterPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub traits: Option<Vec<String>>,
    #[serde(default)]
    pub position: Option<Position>,
}

impl CharacterPatch {
    fn validate(&self) -> TreeResult<()> {
        if let Some(name) = &self.name {
            validate_name(name, "Character name")?;
        }
        validate_optional_text(self.description.as_deref(), "Character description")?;
        validate_optional_text(self.occupation.as_deref(), "Occupation")?;
        for tr in self.traits.iter().flatten() {
            validate_text(tr, "Trait")?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build an empty tree with a fresh id; the name is trimmed
    pub fn new(name: &str, description: Option<&str>, now: DateTime<Utc>) -> TreeResult<Self> {
        validate_name(name, "Tree name")?;
        validate_optional_text(description, "Tree description")?;
        Ok(Self {
            id: new_id(),
            name: name.trim().to_string(),
            description: description.map(str::to_string),
            characters: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn character(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    fn character_mut(&mut self, id: &str) -> TreeResult<&mut Character> {
        self.characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| TreeError::CharacterNotFound(id.to_string()))
    }

    /// Rename and/or re-describe the tree
    pub fn update_details(
        &mut self,
        name: Option<&str>,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> TreeResult<()> {
        if let Some(name) = name {
            validate_name(name, "Tree name")?;
        }
        validate_optional_text(description, "Tree description")?;

        if let Some(name) = name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = description {
            self.description = Some(description.to_string());
        }
        self.updated_at = now;
        Ok(())
    }

    /// Append a character with generated id and timestamps
    pub fn add_character(&mut self, draft: CharacterDraft, now: DateTime<Utc>) -> TreeResult<&Character> {
        draft.validate()?;
        self.characters.push(Character {
            id: new_id(),
            name: draft.name.trim().to_string(),
            description: draft.description,
            age: draft.age,
            occupation: draft.occupation,
            traits: draft.traits,
            relationships: Vec::new(),
            position: draft.position,
            created_at: now,
            updated_at: now,
        });
        self.updated_at = now;
        Ok(&self.characters[self.characters.len() - 1])
    }

    /// Merge `patch` into the matching character
    pub fn update_character(
        &mut self,
        id: &str,
        patch: CharacterPatch,
        now: DateTime<Utc>,
    ) -> TreeResult<&Character> {
        patch.validate()?;
        let character = self.character_mut(id)?;
        if let Some(name) = patch.name {
            character.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            character.description = description;
        }
        if patch.age.is_some() {
            character.age = patch.age;
        }
        if patch.occupation.is_some() {
            character.occupation = patch.occupation;
        }
        if let Some(traits) = patch.traits {
            character.traits = traits;
        }
        if let Some(position) = patch.position {
            character.position = position;
        }
        character.updated_at = now;
        self.updated_at = now;
        self.character(id).ok_or_else(|| TreeError::CharacterNotFound(id.to_string()))
    }

    /// Remove a character and every relationship that points at it
    pub fn delete_character(&mut self, id: &str, now: DateTime<Utc>) -> TreeResult<Character> {
        let index = self
            .characters
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| TreeError::CharacterNotFound(id.to_string()))?;
        let removed = self.characters.remove(index);

        let mut dropped = 0;
        for character in &mut self.characters {
            let before = character.relationships.len();
            character.relationships.retain(|rel| rel.target_character_id != id);
            if character.relationships.len() != before {
                dropped += before - character.relationships.len();
                character.updated_at = now;
            }
        }
        if dropped > 0 {
            tracing::debug!(character = id, dropped, "cascade removed relationships");
        }

        self.updated_at = now;
        Ok(removed)
    }

    /// Append a relationship to the source character; the target must exist
    pub fn add_relationship(
        &mut self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> TreeResult<&Relationship> {
        validate_optional_text(description.as_deref(), "Relationship description")?;
        if self.character(target_id).is_none() {
            return Err(TreeError::CharacterNotFound(target_id.to_string()));
        }
        let source = self.character_mut(source_id)?;
        source.relationships.push(Relationship {
            id: new_id(),
            target_character_id: target_id.to_string(),
            relationship_type,
            description,
        });
        source.updated_at = now;
        self.updated_at = now;

        let source = self
            .character(source_id)
            .ok_or_else(|| TreeError::CharacterNotFound(source_id.to_string()))?;
        Ok(&source.relationships[source.relationships.len() - 1])
    }

    /// Replace type and description of one relationship in place
    pub fn update_relationship(
        &mut self,
        source_id: &str,
        relationship_id: &str,
        relationship_type: RelationshipType,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> TreeResult<&Relationship> {
        validate_optional_text(description.as_deref(), "Relationship description")?;
        let source = self.character_mut(source_id)?;
        let index = source
            .relationships
            .iter()
            .position(|rel| rel.id == relationship_id)
            .ok_or_else(|| TreeError::RelationshipNotFound {
                character_id: source_id.to_string(),
                relationship_id: relationship_id.to_string(),
            })?;
        let rel = &mut source.relationships[index];
        rel.relationship_type = relationship_type;
        rel.description = description;
        source.updated_at = now;
        self.updated_at = now;

        let source = self
            .character(source_id)
            .ok_or_else(|| TreeError::CharacterNotFound(source_id.to_string()))?;
        Ok(&source.relationships[index])
    }

    /// Remove a single relationship entry
    pub fn delete_relationship(
        &mut self,
        source_id: &str,
        relationship_id: &str,
        now: DateTime<Utc>,
    ) -> TreeResult<Relationship> {
        let source = self.character_mut(source_id)?;
        let index = source
            .relationships
            .iter()
            .position(|rel| rel.id == relationship_id)
            .ok_or_else(|| TreeError::RelationshipNotFound {
                character_id: source_id.to_string(),
                relationship_id: relationship_id.to_string(),
            })?;
        let removed = source.relationships.remove(index);
        source.updated_at = now;
        self.updated_at = now;
        Ok(removed)
    }

    /// Copy positions from a laid-out character list, matched by id.
    /// Returns how many characters moved.
    pub fn apply_positions(&mut self, positioned: &[Character], now: DateTime<Utc>) -> usize {
        let mut moved = 0;
        for laid_out in positioned {
            if let Some(character) = self.characters.iter_mut().find(|c| c.id == laid_out.id) {
                if character.position != laid_out.position {
                    character.position = laid_out.position;
                    character.updated_at = now;
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            self.updated_at = now;
        }
        moved
    }

    /// Drop relationships whose target is not a character of this tree.
    /// Returns the number removed.
    pub fn prune_dangling_relationships(&mut self) -> usize {
        let ids: HashSet<String> = self.characters.iter().map(|c| c.id.clone()).collect();
        let mut removed = 0;
        for character in &mut self.characters {
            let before = character.relationships.len();
            character
                .relationships
                .retain(|rel| ids.contains(&rel.target_character_id));
            removed += before - character.relationships.len();
        }
        removed
    }

    /// Number of relationships across all characters
    pub fn relationship_count(&self) -> usize {
        self.characters.iter().map(|c| c.relationships.len()).sum()
    }
}
