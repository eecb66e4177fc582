use character_tree_mcp_rs::error::TreeError;
use character_tree_mcp_rs::tree::{CharacterDraft, CharacterPatch, Position, RelationshipType, Tree};
use chrono::{Duration, Utc};

fn tree_with(names: &[&str]) -> (Tree, Vec<String>) {
    let now = Utc::now();
    let mut tree = Tree::new("Saga", None, now).unwrap();
    let ids = names
        .iter()
        .map(|name| tree.add_character(CharacterDraft::named(*name), now).unwrap().id.clone())
        .collect();
    (tree, ids)
}

#[test]
fn test_create_tree_requires_a_name() {
    let now = Utc::now();

    assert_eq!(
        Tree::new("", None, now).unwrap_err(),
        TreeError::EmptyField { field: "Tree name" }
    );
    assert!(Tree::new("   ", None, now).is_err());

    let tree = Tree::new("  Saga ", Some("Norse families"), now).unwrap();
    assert_eq!(tree.name, "Saga");
    assert_eq!(tree.description.as_deref(), Some("Norse families"));
    assert!(!tree.id.is_empty());
    assert!(tree.characters.is_empty());
    assert_eq!(tree.created_at, tree.updated_at);
}

#[test]
fn test_tree_ids_are_unique() {
    let now = Utc::now();
    let a = Tree::new("Saga", None, now).unwrap();
    let b = Tree::new("Saga", None, now).unwrap();
    assert_ne!(a.id, b.id);
}

#[test]
fn test_name_validation() {
    let now = Utc::now();
    let long = "x".repeat(300);
    assert!(matches!(
        Tree::new(&long, None, now),
        Err(TreeError::TooLong { max: 256, .. })
    ));
    assert!(matches!(
        Tree::new("bad\u{7}name", None, now),
        Err(TreeError::InvalidCharacters { .. })
    ));
}

#[test]
fn test_add_character_stamps_id_and_timestamps() {
    let created = Utc::now();
    let mut tree = Tree::new("Saga", None, created).unwrap();
    let later = created + Duration::seconds(5);

    let draft = CharacterDraft {
        name: "Sigrid".to_string(),
        description: "Shield-maiden".to_string(),
        age: Some(31),
        occupation: Some("Jarl".to_string()),
        traits: vec!["brave".to_string(), "stubborn".to_string()],
        position: Position::new(10.0, 20.0),
    };
    let character = tree.add_character(draft, later).unwrap().clone();

    assert!(!character.id.is_empty());
    assert_eq!(character.created_at, later);
    assert_eq!(character.updated_at, later);
    assert_eq!(character.traits, vec!["brave", "stubborn"]);
    assert!(character.relationships.is_empty());
    assert_eq!(tree.updated_at, later);
    assert_eq!(tree.characters.len(), 1);
}

#[test]
fn test_add_character_rejects_blank_name() {
    let (mut tree, _) = tree_with(&[]);
    let result = tree.add_character(CharacterDraft::named(" "), Utc::now());
    assert_eq!(result.unwrap_err(), TreeError::EmptyField { field: "Character name" });
    assert!(tree.characters.is_empty());
}

#[test]
fn test_update_character_merges_fields() {
    let (mut tree, ids) = tree_with(&["Sigrid"]);
    let later = Utc::now() + Duration::seconds(1);

    let patch = CharacterPatch {
        occupation: Some("Queen".to_string()),
        position: Some(Position::new(5.0, 5.0)),
        ..CharacterPatch::default()
    };
    let updated = tree.update_character(&ids[0], patch, later).unwrap().clone();

    assert_eq!(updated.name, "Sigrid");
    assert_eq!(updated.occupation.as_deref(), Some("Queen"));
    assert_eq!(updated.position, Position::new(5.0, 5.0));
    assert_eq!(updated.updated_at, later);
    assert!(updated.created_at < later);
}

#[test]
fn test_update_unknown_character_is_not_found() {
    let (mut tree, _) = tree_with(&["Sigrid"]);
    let err = tree
        .update_character("nobody", CharacterPatch::default(), Utc::now())
        .unwrap_err();
    assert_eq!(err, TreeError::CharacterNotFound("nobody".to_string()));
    assert!(err.is_not_found());
}

#[test]
fn test_delete_character_removes_incoming_relationships() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    let now = Utc::now();
    tree.add_relationship(&ids[0], &ids[1], RelationshipType::Friend, None, now)
        .unwrap();

    let removed = tree.delete_character(&ids[1], now).unwrap();

    assert_eq!(removed.name, "B");
    assert_eq!(tree.characters.len(), 1);
    assert_eq!(tree.characters[0].id, ids[0]);
    assert!(tree.characters[0].relationships.is_empty());
}

#[test]
fn test_delete_character_leaves_no_dangling_references() {
    let (mut tree, ids) = tree_with(&["A", "B", "C", "D"]);
    let now = Utc::now();
    tree.add_relationship(&ids[0], &ids[2], RelationshipType::Parent, None, now).unwrap();
    tree.add_relationship(&ids[1], &ids[2], RelationshipType::Enemy, None, now).unwrap();
    tree.add_relationship(&ids[1], &ids[3], RelationshipType::Friend, None, now).unwrap();
    tree.add_relationship(&ids[2], &ids[3], RelationshipType::Mentor, None, now).unwrap();

    tree.delete_character(&ids[2], now).unwrap();

    assert_eq!(tree.relationship_count(), 1);
    for character in &tree.characters {
        for rel in &character.relationships {
            assert_ne!(rel.target_character_id, ids[2]);
            assert!(tree.character(&rel.target_character_id).is_some());
        }
    }
}

#[test]
fn test_delete_unknown_character_is_not_found() {
    let (mut tree, _) = tree_with(&["A"]);
    assert!(matches!(
        tree.delete_character("ghost", Utc::now()),
        Err(TreeError::CharacterNotFound(_))
    ));
    assert_eq!(tree.characters.len(), 1);
}

#[test]
fn test_add_relationship_requires_both_ends() {
    let (mut tree, ids) = tree_with(&["A"]);
    let now = Utc::now();

    assert_eq!(
        tree.add_relationship("ghost", &ids[0], RelationshipType::Friend, None, now)
            .unwrap_err(),
        TreeError::CharacterNotFound("ghost".to_string())
    );
    assert_eq!(
        tree.add_relationship(&ids[0], "ghost", RelationshipType::Friend, None, now)
            .unwrap_err(),
        TreeError::CharacterNotFound("ghost".to_string())
    );
    assert_eq!(tree.relationship_count(), 0);
}

#[test]
fn test_relationships_are_not_mirrored() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    tree.add_relationship(&ids[0], &ids[1], RelationshipType::Spouse, Some("married".into()), Utc::now())
        .unwrap();

    assert_eq!(tree.character(&ids[0]).unwrap().relationships.len(), 1);
    assert!(tree.character(&ids[1]).unwrap().relationships.is_empty());
}

#[test]
fn test_update_and_delete_relationship() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    let now = Utc::now();
    let rel_id = tree
        .add_relationship(&ids[0], &ids[1], RelationshipType::Friend, None, now)
        .unwrap()
        .id
        .clone();

    let updated = tree
        .update_relationship(&ids[0], &rel_id, RelationshipType::Enemy, Some("betrayal".into()), now)
        .unwrap()
        .clone();
    assert_eq!(updated.id, rel_id);
    assert_eq!(updated.relationship_type, RelationshipType::Enemy);
    assert_eq!(updated.description.as_deref(), Some("betrayal"));
    assert_eq!(updated.target_character_id, ids[1]);

    let removed = tree.delete_relationship(&ids[0], &rel_id, now).unwrap();
    assert_eq!(removed.id, rel_id);
    assert_eq!(tree.relationship_count(), 0);

    let err = tree.delete_relationship(&ids[0], &rel_id, now).unwrap_err();
    assert!(matches!(err, TreeError::RelationshipNotFound { .. }));
}

#[test]
fn test_apply_positions_only_counts_moves() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    let mut laid_out = tree.characters.clone();
    laid_out[1].position = Position::new(42.0, 7.0);

    let moved = tree.apply_positions(&laid_out, Utc::now());

    assert_eq!(moved, 1);
    assert_eq!(tree.character(&ids[1]).unwrap().position, Position::new(42.0, 7.0));
    assert_eq!(tree.character(&ids[0]).unwrap().position, Position::default());
}

#[test]
fn test_prune_dangling_relationships() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    let now = Utc::now();
    tree.add_relationship(&ids[0], &ids[1], RelationshipType::Friend, None, now).unwrap();
    tree.characters[0].relationships.push(character_tree_mcp_rs::tree::Relationship {
        id: "stale".to_string(),
        target_character_id: "gone".to_string(),
        relationship_type: RelationshipType::Other,
        description: None,
    });

    assert_eq!(tree.prune_dangling_relationships(), 1);
    assert_eq!(tree.relationship_count(), 1);
}

#[test]
fn test_tree_json_uses_camel_case() {
    let (mut tree, ids) = tree_with(&["A", "B"]);
    tree.add_relationship(&ids[0], &ids[1], RelationshipType::Mentor, None, Utc::now())
        .unwrap();

    let value = serde_json::to_value(&tree).unwrap();
    let rel = &value["characters"][0]["relationships"][0];
    assert_eq!(rel["targetCharacterId"], ids[1].as_str());
    assert_eq!(rel["type"], "mentor");
    assert!(rel.get("description").is_none());
    assert!(value.get("createdAt").is_some());

    let back: Tree = serde_json::from_value(value).unwrap();
    assert_eq!(back, tree);
}
