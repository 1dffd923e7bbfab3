use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::document::{User, UserStatus};
use crate::error::{RecordError, Result, ValidationError};
use crate::password::PasswordHasher;
use crate::store::DocumentStore;

/// Registration request. `password` is plaintext and is hashed before storage.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub ip: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserListOptions {
    pub status_filter: Option<UserStatus>,
    pub limit: Option<usize>,
}

pub struct UserManager {
    store: Arc<DocumentStore>,
    hasher: PasswordHasher,
}

impl UserManager {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            hasher: PasswordHasher::new(),
        }
    }

    pub fn get_user(&self, id: &str) -> Result<User> {
        self.store
            .snapshot()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| RecordError::UserNotFound(id.to_string()))
    }

    /// Users ordered by creation time, oldest first. Users without a creation
    /// time sort first, ties break on id.
    pub fn list_users(&self, options: Option<UserListOptions>) -> Vec<(String, User)> {
        let options = options.unwrap_or_default();
        let doc = self.store.snapshot();

        let mut users: Vec<(String, User)> = doc
            .users
            .iter()
            .filter(|(_, u)| {
                options
                    .status_filter
                    .as_ref()
                    .map_or(true, |status| &u.status == status)
            })
            .map(|(id, u)| (id.clone(), u.clone()))
            .collect();

        users.sort_by(|(a_id, a), (b_id, b)| {
            a.created_at.cmp(&b.created_at).then_with(|| a_id.cmp(b_id))
        });

        if let Some(limit) = options.limit {
            users.truncate(limit);
        }
        users
    }

    pub fn get_user_count(&self) -> usize {
        self.store.snapshot().users.len()
    }

    pub fn accounts_for_ip(&self, ip: &str) -> usize {
        self.store
            .snapshot()
            .users
            .values()
            .filter(|u| u.ip == ip)
            .count()
    }

    pub async fn register(&self, new_user: NewUser) -> Result<User> {
        if new_user.id.trim().is_empty() {
            return Err(ValidationError::new("id", "must not be empty").into());
        }
        if new_user.name.trim().is_empty() {
            return Err(ValidationError::new("name", "must not be empty").into());
        }
        if new_user.password.is_empty() {
            return Err(ValidationError::new("password", "must not be empty").into());
        }
        // the per-IP limit needs an address to count against
        if new_user.ip.trim().is_empty() {
            return Err(ValidationError::new("ip", "must not be empty").into());
        }

        // Hash before taking the writer lock; Argon2 is deliberately slow.
        let password_hash = self.hasher.hash_password(&new_user.password)?;
        let NewUser {
            id,
            name,
            email,
            ip,
            ..
        } = new_user;

        let user = self
            .store
            .transaction(|doc| {
                if doc.users.contains_key(&id) {
                    return Err(RecordError::UserAlreadyExists(id.clone()));
                }
                if !email.is_empty()
                    && doc
                        .users
                        .values()
                        .any(|u| u.email.eq_ignore_ascii_case(&email))
                {
                    return Err(RecordError::UserAlreadyExists(email.clone()));
                }

                let limit = doc.settings.max_accounts_per_ip;
                let existing = doc.users.values().filter(|u| u.ip == ip).count();
                if existing >= limit as usize {
                    return Err(RecordError::AccountLimitExceeded {
                        ip: ip.clone(),
                        limit,
                    });
                }

                let user = User::new(name, email, password_hash, ip.clone());
                doc.insert_user(id.clone(), user.clone());
                doc.statistics.total_users += 1;
                doc.statistics.total_accounts += 1;
                Ok(user)
            })
            .await?;

        info!(user_id = %id, ip = %user.ip, "user registered");
        Ok(user)
    }

    /// Removes a user. `total_users` is decremented, and `blocked_users` too when
    /// the user was blocked; neither goes below zero.
    pub async fn delete_user(&self, id: &str) -> Result<User> {
        let removed = self
            .store
            .transaction(|doc| {
                let user = doc
                    .users
                    .shift_remove(id)
                    .ok_or_else(|| RecordError::UserNotFound(id.to_string()))?;
                doc.statistics.record_user_removed();
                if user.is_blocked() {
                    doc.statistics.record_user_unblocked();
                }
                Ok(user)
            })
            .await?;

        info!(user_id = %id, "user deleted");
        Ok(removed)
    }

    /// Marks a user blocked. `blocked_users` only moves on an actual transition.
    pub async fn block_user(&self, id: &str) -> Result<User> {
        let user = self
            .store
            .transaction(|doc| {
                let user = doc
                    .users
                    .get_mut(id)
                    .ok_or_else(|| RecordError::UserNotFound(id.to_string()))?;
                if !user.is_blocked() {
                    user.status = UserStatus::Blocked;
                    doc.statistics.record_user_blocked();
                }
                Ok(user.clone())
            })
            .await?;

        info!(user_id = %id, "user blocked");
        Ok(user)
    }

    pub async fn unblock_user(&self, id: &str) -> Result<User> {
        let user = self
            .store
            .transaction(|doc| {
                let user = doc
                    .users
                    .get_mut(id)
                    .ok_or_else(|| RecordError::UserNotFound(id.to_string()))?;
                if user.is_blocked() {
                    user.status = UserStatus::Active;
                    doc.statistics.record_user_unblocked();
                }
                Ok(user.clone())
            })
            .await?;

        info!(user_id = %id, "user unblocked");
        Ok(user)
    }

    /// Checks an email/password pair. Only active users can authenticate.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<(String, User)> {
        let doc = self.store.snapshot();
        let (id, user) = doc
            .users
            .iter()
            .find(|(_, u)| !u.email.is_empty() && u.email.eq_ignore_ascii_case(email))
            .ok_or(RecordError::InvalidCredentials)?;

        if !self.hasher.verify_password(password, &user.password) {
            debug!(user_id = %id, "password mismatch");
            return Err(RecordError::InvalidCredentials);
        }
        if !user.is_active() {
            debug!(user_id = %id, status = %user.status, "inactive user tried to authenticate");
            return Err(RecordError::InvalidCredentials);
        }
        Ok((id.clone(), user.clone()))
    }

    /// Rehashes every stored password that is still plaintext. Returns how many
    /// were converted.
    pub async fn migrate_plaintext_passwords(&self) -> Result<usize> {
        let pending: Vec<(String, String)> = self
            .store
            .snapshot()
            .users
            .iter()
            .filter(|(_, u)| !u.password.is_empty() && !PasswordHasher::is_hashed(&u.password))
            .map(|(id, u)| (id.clone(), u.password.clone()))
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        let mut hashed = HashMap::with_capacity(pending.len());
        for (id, plaintext) in &pending {
            hashed.insert(id.clone(), (plaintext.clone(), self.hasher.hash_password(plaintext)?));
        }

        let converted = self
            .store
            .transaction(move |doc| {
                let mut converted = 0;
                for (id, (plaintext, hash)) in hashed {
                    // skip users whose password changed since the snapshot
                    if let Some(user) = doc.users.get_mut(&id) {
                        if user.password == plaintext {
                            user.password = hash;
                            converted += 1;
                        }
                    }
                }
                Ok(converted)
            })
            .await?;

        info!(converted, "plaintext passwords rehashed");
        Ok(converted)
    }
}
