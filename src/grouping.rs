use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::layout::{group_center, LayoutConfig};
use crate::tree::{new_id, Character, Position, RelationshipType};

/// Smallest number of distinct characters that forms a group
pub const MIN_GROUP_SIZE: usize = 2;

/// Derived cluster of characters sharing one relationship type.
///
/// Recomputed on every grouping pass; ids are not stable across passes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CharacterGroup {
    pub id: String,

    #[serde(rename = "relationshipType")]
    pub relationship_type: RelationshipType,

    /// Members in order of first appearance
    #[serde(rename = "characterIds")]
    pub character_ids: Vec<String>,

    /// Center of the group label
    pub position: Position,

    pub label: String,
}

impl CharacterGroup {
    pub fn contains(&self, character_id: &str) -> bool {
        self.character_ids.iter().any(|id| id == character_id)
    }

    /// Rebuild the label after a membership change
    pub fn refresh_label(&mut self) {
        self.label = group_label(self.relationship_type, self.character_ids.len());
    }
}

/// Fields of a group that can be edited by hand
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GroupPatch {
    pub label: Option<String>,
    pub position: Option<Position>,
    #[serde(rename = "relationshipType")]
    pub relationship_type: Option<RelationshipType>,
}

/// Output of a grouping pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupingResult {
    pub groups: Vec<CharacterGroup>,
    #[serde(rename = "ungroupedCharacters")]
    pub ungrouped_characters: Vec<Character>,
}

pub fn group_label(relationship_type: RelationshipType, member_count: usize) -> String {
    format!("{} ({})", relationship_type.group_label(), member_count)
}

/// Insertion-ordered set of character ids for one relationship type
#[derive(Default)]
struct Participants {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl Participants {
    fn insert(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.order.push(id.to_string());
        }
    }
}

/// Cluster characters by the relationship types they take part in.
///
/// Being the source or the target of a relationship of type T makes a
/// character a participant of T. Every type with at least
/// [`MIN_GROUP_SIZE`] participants that resolve to real characters becomes a
/// group; groups take grid slots in the order their type was first seen.
/// Membership is inclusive: a character joins every qualifying group and is
/// ungrouped only if it joined none.
pub fn analyze_and_group(characters: &[Character], config: &LayoutConfig) -> GroupingResult {
    let known: HashSet<&str> = characters.iter().map(|c| c.id.as_str()).collect();

    let mut type_order: Vec<RelationshipType> = Vec::new();
    let mut participants: HashMap<RelationshipType, Participants> = HashMap::new();

    for character in characters {
        for rel in &character.relationships {
            let entry = participants.entry(rel.relationship_type).or_insert_with(|| {
                type_order.push(rel.relationship_type);
                Participants::default()
            });
            entry.insert(&character.id);
            entry.insert(&rel.target_character_id);
        }
    }

    let mut groups = Vec::new();
    let mut grouped: HashSet<String> = HashSet::new();

    for relationship_type in type_order {
        let Some(members) = participants.remove(&relationship_type) else {
            continue;
        };
        if members.order.len() < MIN_GROUP_SIZE {
            continue;
        }

        // Stale targets may point at characters that no longer exist
        let valid: Vec<String> = members
            .order
            .into_iter()
            .filter(|id| known.contains(id.as_str()))
            .collect();
        if valid.len() < MIN_GROUP_SIZE {
            continue;
        }

        let index = groups.len();
        grouped.extend(valid.iter().cloned());
        groups.push(CharacterGroup {
            id: format!("group-{}-{}", relationship_type, new_id()),
            relationship_type,
            label: group_label(relationship_type, valid.len()),
            character_ids: valid,
            position: group_center(index, config),
        });
    }

    let ungrouped_characters = characters
        .iter()
        .filter(|c| !grouped.contains(&c.id))
        .cloned()
        .collect();

    GroupingResult {
        groups,
        ungrouped_characters,
    }
}
