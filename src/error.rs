use thiserror::Error;

/// Domain errors raised by tree mutations and the grouping editor.
///
/// Storage and transport failures travel as `anyhow::Error`; these variants
/// can be recovered from them with `downcast_ref::<TreeError>()`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("{field} too long (max {max} chars)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid characters")]
    InvalidCharacters { field: &'static str },

    #[error("no tree is currently open")]
    NoCurrentTree,

    #[error("tree '{0}' does not exist")]
    TreeNotFound(String),

    #[error("character '{0}' does not exist")]
    CharacterNotFound(String),

    #[error("relationship '{relationship_id}' does not exist on character '{character_id}'")]
    RelationshipNotFound {
        character_id: String,
        relationship_id: String,
    },

    #[error("group '{0}' does not exist")]
    GroupNotFound(String),

    #[error("unknown relationship type '{0}'")]
    UnknownRelationshipType(String),
}

impl TreeError {
    /// True for the "nothing matched that id" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TreeError::TreeNotFound(_)
                | TreeError::CharacterNotFound(_)
                | TreeError::RelationshipNotFound { .. }
                | TreeError::GroupNotFound(_)
        )
    }
}

pub type TreeResult<T> = Result<T, TreeError>;
