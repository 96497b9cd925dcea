//! Token validation hook for proving player identity.
//!
//! Tavern doesn't issue or verify tokens itself; that belongs to whatever
//! login service the table uses (JWT, opaque session tokens, …). It only
//! needs one capability: turn a token string into a [`Subject`] or refuse.
//! That capability is the [`TokenValidator`] trait.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tavern_protocol::UserId;

use crate::AuthError;

/// What a player is allowed to be at the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Player,
    GameMaster,
    Spectator,
}

/// The authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub role: Role,
}

impl Subject {
    /// Builds a subject with the default [`Role::Player`].
    pub fn player(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            username: username.into(),
            role: Role::Player,
        }
    }
}

/// Validates a client's token and returns its identity.
///
/// Called once per connection, from that connection's own task, so a slow
/// validator delays only the socket being authenticated. Implementations
/// must be side-effect free from the hub's point of view.
///
/// # Example
///
/// ```rust
/// use tavern_session::{AuthError, Subject, TokenValidator};
///
/// /// Accepts `dev-<name>` tokens. Development only!
/// struct DevValidator;
///
/// impl TokenValidator for DevValidator {
///     fn validate(&self, token: &str) -> Result<Subject, AuthError> {
///         let name = token.strip_prefix("dev-").ok_or(AuthError::InvalidToken)?;
///         Ok(Subject::player(name, name))
///     }
/// }
///
/// assert!(DevValidator.validate("dev-ana").is_ok());
/// assert_eq!(DevValidator.validate("ana"), Err(AuthError::InvalidToken));
/// ```
pub trait TokenValidator: Send + Sync + 'static {
    /// Validates `token`.
    ///
    /// # Errors
    /// [`AuthError::InvalidToken`] or [`AuthError::Expired`].
    fn validate(&self, token: &str) -> Result<Subject, AuthError>;
}

/// A fixed token → subject table.
///
/// Handy for local play-testing and integration tests; load it from a JSON
/// object such as `{"secret-1": {"id": "u1", "username": "Ana"}}`.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Subject>,
}

impl StaticTokens {
    /// Creates an empty table (every token is rejected).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a token.
    pub fn with_token(mut self, token: impl Into<String>, subject: Subject) -> Self {
        self.tokens.insert(token.into(), subject);
        self
    }

    /// Parses a JSON object mapping tokens to subjects.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let tokens = serde_json::from_str(json)?;
        Ok(Self { tokens })
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for StaticTokens {
    fn validate(&self, token: &str) -> Result<Subject, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
