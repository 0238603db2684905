use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    password::hash_password,
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User, UserCandidate, UserChanges},
    validation::{normalize_email, validate, Field, Violation, ViolationKind, Violations},
};

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("invalid user: {0}")]
    Invalid(Violations),
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error("user store: {0}")]
    Store(anyhow::Error),
    #[error("password hashing: {0}")]
    Hash(anyhow::Error),
}

impl From<StoreError> for UserError {
    fn from(e: StoreError) -> Self {
        match e {
            // the unique index caught a duplicate the in-process check missed
            StoreError::DuplicateEmail => UserError::Invalid(Violations::from(Violation::new(
                Field::Email,
                ViolationKind::NotUnique,
            ))),
            StoreError::Other(e) => UserError::Store(e),
        }
    }
}

impl UserError {
    pub fn violations(&self) -> Option<&Violations> {
        match self {
            UserError::Invalid(v) => Some(v),
            _ => None,
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: Option<String>,
}

/// Fields to change on a stored user; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

async fn snapshot(store: &dyn UserStore, email: &str) -> Result<Vec<User>, UserError> {
    Ok(store.find_by_email(email).await?.into_iter().collect())
}

/// Validate and persist a new user. The password is stored as an Argon2 digest.
#[instrument(skip(store, reg), fields(email = %reg.email))]
pub async fn register(store: &dyn UserStore, reg: Registration) -> Result<User, UserError> {
    let candidate = UserCandidate {
        id: None,
        name: reg.name,
        email: normalize_email(&reg.email),
        password: Some(reg.password),
    };

    let existing = snapshot(store, &candidate.email).await?;
    if let Err(violations) =
        validate(&candidate, reg.password_confirmation.as_deref(), &existing).into_result()
    {
        warn!(%violations, "registration rejected");
        return Err(UserError::Invalid(violations));
    }

    let plain = candidate.password.unwrap_or_default();
    let password_hash = hash_password(&plain).map_err(|e| {
        error!(error = %e, "hash_password failed");
        UserError::Hash(e)
    })?;

    let user = store
        .create(NewUser {
            name: candidate.name,
            email: candidate.email,
            password_hash,
        })
        .await
        .map_err(|e| {
            if matches!(e, StoreError::DuplicateEmail) {
                warn!("email taken by a concurrent registration");
            }
            UserError::from(e)
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Apply `changes` to a stored user, re-validating the merged record.
#[instrument(skip(store, changes))]
pub async fn update_user(
    store: &dyn UserStore,
    id: Uuid,
    changes: UserUpdate,
) -> Result<User, UserError> {
    let current = store.find_by_id(id).await?.ok_or(UserError::NotFound(id))?;

    let mut candidate = UserCandidate::from_stored(&current);
    if let Some(name) = changes.name {
        candidate.name = name;
    }
    if let Some(email) = changes.email {
        candidate.email = normalize_email(&email);
    }
    candidate.password = changes.password;

    let existing = snapshot(store, &candidate.email).await?;
    if let Err(violations) =
        validate(&candidate, changes.password_confirmation.as_deref(), &existing).into_result()
    {
        warn!(user_id = %id, %violations, "update rejected");
        return Err(UserError::Invalid(violations));
    }

    let password_hash = match candidate.password.as_deref() {
        Some(plain) => Some(hash_password(plain).map_err(|e| {
            error!(error = %e, "hash_password failed");
            UserError::Hash(e)
        })?),
        None => None,
    };

    let user = store
        .update(
            id,
            UserChanges {
                name: candidate.name,
                email: candidate.email,
                password_hash,
            },
        )
        .await?
        .ok_or(UserError::NotFound(id))?;

    info!(user_id = %user.id, "user updated");
    Ok(user)
}

#[instrument(skip(store))]
pub async fn delete_user(store: &dyn UserStore, id: Uuid) -> Result<(), UserError> {
    if !store.delete(id).await? {
        return Err(UserError::NotFound(id));
    }
    info!(user_id = %id, "user deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{memory::MemoryUserStore, password::verify_password};
    use async_trait::async_trait;

    fn registration() -> Registration {
        Registration {
            name: "Example".into(),
            email: "user@example.com".into(),
            password: "foobar".into(),
            password_confirmation: Some("foobar".into()),
        }
    }

    #[tokio::test]
    async fn register_then_read_back() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration()).await.expect("valid registration");

        let found = store.find_by_id(user.id).await.unwrap().expect("persisted");
        assert_eq!(found.name, "Example");
        assert_eq!(found.email, "user@example.com");
        assert_ne!(found.password_hash, "foobar");
        assert!(verify_password("foobar", &found.password_hash).unwrap());
    }

    #[tokio::test]
    async fn register_stores_normalized_email() {
        let store = MemoryUserStore::new();
        let mut reg = registration();
        reg.email = "USER@foo.COM".into();
        let user = register(&store, reg).await.unwrap();
        assert_eq!(user.email, "user@foo.com");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_in_other_case() {
        let store = MemoryUserStore::new();
        register(&store, registration()).await.unwrap();

        let mut dup = registration();
        dup.email = "USER@EXAMPLE.COM".into();
        let err = register(&store, dup).await.unwrap_err();
        let v = err.violations().expect("validation error");
        assert!(v.contains(Field::Email, ViolationKind::NotUnique));
    }

    #[tokio::test]
    async fn register_returns_every_violation_and_persists_nothing() {
        let store = MemoryUserStore::new();
        let reg = Registration {
            name: "quigley malcolm".into(),
            email: "user@example,com".into(),
            password: "aaaaa".into(),
            password_confirmation: Some("aaaab".into()),
        };
        let err = register(&store, reg).await.unwrap_err();
        let v = err.violations().unwrap();
        assert!(v.contains(Field::Name, ViolationKind::InvalidFormat));
        assert!(v.contains(Field::Email, ViolationKind::InvalidFormat));
        assert!(v.contains(Field::Password, ViolationKind::TooShort));
        assert!(v.contains(Field::PasswordConfirmation, ViolationKind::ConfirmationMismatch));
        assert!(store.find_by_email("user@example,com").await.unwrap().is_none());
    }

    /// Misses every lookup, as if a concurrent writer inserted between the
    /// check and the insert.
    struct RacyStore(MemoryUserStore);

    #[async_trait]
    impl UserStore for RacyStore {
        async fn create(&self, new: NewUser) -> Result<User, StoreError> {
            self.0.create(new).await
        }
        async fn update(&self, id: Uuid, c: UserChanges) -> Result<Option<User>, StoreError> {
            self.0.update(id, c).await
        }
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.0.find_by_id(id).await
        }
        async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn storage_duplicate_becomes_not_unique() {
        let store = RacyStore(MemoryUserStore::new());
        register(&store, registration()).await.unwrap();

        let err = register(&store, registration()).await.unwrap_err();
        let v = err.violations().expect("translated to a violation");
        assert_eq!(
            v,
            &Violations::from(Violation::new(Field::Email, ViolationKind::NotUnique))
        );
    }

    #[tokio::test]
    async fn update_keeps_own_email_and_password() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration()).await.unwrap();

        let changes = UserUpdate {
            name: Some("Renamed".into()),
            email: Some("User@Example.com".into()),
            ..Default::default()
        };
        let updated = update_user(&store, user.id, changes).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.email, "user@example.com");
        assert_eq!(updated.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn update_revalidates() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration()).await.unwrap();
        let mut other = registration();
        other.email = "other@example.com".into();
        register(&store, other).await.unwrap();

        let changes = UserUpdate {
            email: Some("OTHER@example.com".into()),
            password: Some("      ".into()),
            ..Default::default()
        };
        let err = update_user(&store, user.id, changes).await.unwrap_err();
        let v = err.violations().unwrap();
        assert!(v.contains(Field::Email, ViolationKind::NotUnique));
        assert!(v.contains(Field::Password, ViolationKind::Blank));
    }

    #[tokio::test]
    async fn update_changes_password() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration()).await.unwrap();
        let changes = UserUpdate {
            password: Some("barbaz".into()),
            password_confirmation: Some("barbaz".into()),
            ..Default::default()
        };
        let updated = update_user(&store, user.id, changes).await.unwrap();
        assert!(verify_password("barbaz", &updated.password_hash).unwrap());
        assert!(!verify_password("foobar", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn update_and_delete_missing_user() {
        let store = MemoryUserStore::new();
        let id = Uuid::new_v4();
        let err = update_user(&store, id, UserUpdate::default()).await.unwrap_err();
        assert!(matches!(err, UserError::NotFound(got) if got == id));
        let err = delete_user(&store, id).await.unwrap_err();
        assert!(matches!(err, UserError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_existing_user() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration()).await.unwrap();
        delete_user(&store, user.id).await.unwrap();
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }
}
