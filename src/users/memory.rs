use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User, UserChanges},
    validation::normalize_email,
};

/// Process-local store with the same uniqueness guarantee as the `users`
/// table: no two rows share a lowercased email.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, HashMap<Uuid, User>>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Other(anyhow::anyhow!("user store mutex poisoned")))
    }
}

fn email_taken(rows: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
    let email = normalize_email(email);
    rows.values()
        .any(|u| Some(u.id) != except && normalize_email(&u.email) == email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut rows = self.rows()?;
        if email_taken(&rows, &new.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut rows = self.rows()?;
        if !rows.contains_key(&id) {
            return Ok(None);
        }
        if email_taken(&rows, &changes.email, Some(id)) {
            return Err(StoreError::DuplicateEmail);
        }
        let Some(user) = rows.get_mut(&id) else {
            return Ok(None);
        };
        user.name = changes.name;
        user.email = changes.email;
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        let rows = self.rows()?;
        Ok(rows
            .values()
            .find(|u| normalize_email(&u.email) == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.rows()?.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rows()?.remove(&id).is_some())
    }
}
