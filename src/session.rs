/// Who is editing: decides which tree store backs the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Signed-in user; trees live in the shared database, scoped to `user`
    Authenticated { user: String },
    /// No identity; trees live in a local JSON document
    Guest,
}

impl Session {
    /// Build from an optional user identifier (blank counts as guest)
    pub fn from_user(user: Option<&str>) -> Self {
        match user.map(str::trim) {
            Some(user) if !user.is_empty() => Session::Authenticated {
                user: user.to_string(),
            },
            _ => Session::Guest,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated { .. })
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Session::Authenticated { user } => Some(user),
            Session::Guest => None,
        }
    }
}
