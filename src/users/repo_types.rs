use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // assigned by storage
    pub name: String,
    pub email: String,                // normalized (lowercase)
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row handed to storage on creation.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// Row handed to storage on update. `password_hash: None` keeps the stored digest.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
}

/// In-memory candidate, checked by the validator before anything is persisted.
#[derive(Debug, Clone, Default)]
pub struct UserCandidate {
    /// Set when the candidate describes an update of a stored record.
    pub id: Option<Uuid>,
    pub name: String,
    pub email: String,
    /// Plaintext. `None` on an update means the password is unchanged.
    pub password: Option<String>,
}

impl UserCandidate {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
            password: Some(password.into()),
        }
    }

    /// Candidate for updating `user`, password untouched.
    pub fn from_stored(user: &User) -> Self {
        Self {
            id: Some(user.id),
            name: user.name.clone(),
            email: user.email.clone(),
            password: None,
        }
    }
}
