//! The persisted record document.
//!
//! Maps keep the key order of the file they were loaded from and timestamps
//! are written in `toISOString` form, so writing back a loaded document
//! reproduces the same bytes. Fields this crate does not know about are
//! carried in the flattened `extra` maps and written back unchanged.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::{deserialize_max_accounts, DEFAULT_MAX_ACCOUNTS_PER_IP};

pub type UserMap = IndexMap<String, User>;
pub type BlockedIps = IndexMap<String, BlockedIp>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub users: UserMap,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub statistics: Statistics,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Argon2 PHC string. Legacy plaintext values are rehashed at startup.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "iso_millis::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserStatus {
    #[default]
    Active,
    Blocked,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub force_join: Vec<ForceJoinChannel>,
    #[serde(
        default = "default_max_accounts",
        deserialize_with = "deserialize_max_accounts"
    )]
    pub max_accounts_per_ip: u32,
    #[serde(default)]
    pub blocked_ips: BlockedIps,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceJoinChannel {
    pub name: String,
    pub id: String,
    pub invite_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIp {
    pub reason: String,
    #[serde(with = "iso_millis")]
    pub blocked_at: DateTime<Utc>,
}

/// Aggregate counters. Maintained by the operations that change them, never
/// derived from `users` unless [`Statistics::recount`] is called explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub total_accounts: u64,
    #[serde(default)]
    pub blocked_users: u64,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn default_max_accounts() -> u32 {
    DEFAULT_MAX_ACCOUNTS_PER_IP
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            force_join: Vec::new(),
            max_accounts_per_ip: DEFAULT_MAX_ACCOUNTS_PER_IP,
            blocked_ips: IndexMap::new(),
            extra: IndexMap::new(),
        }
    }
}

impl Document {
    /// Inserts or replaces a user. New ids land where a JavaScript object
    /// would enumerate them: array-index ids in ascending numeric order ahead
    /// of every other id, the rest in insertion order.
    pub fn insert_user(&mut self, id: String, user: User) {
        if let Some(existing) = self.users.get_mut(&id) {
            *existing = user;
            return;
        }
        match array_index(&id) {
            Some(n) => {
                let position = self
                    .users
                    .keys()
                    .position(|key| array_index(key).map_or(true, |m| m > n))
                    .unwrap_or(self.users.len());
                self.users.shift_insert(position, id, user);
            }
            None => {
                self.users.insert(id, user);
            }
        }
    }
}

/// `Some(n)` when `key` is the canonical decimal form of an array index
/// (0 ..= 2^32 - 2).
fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|n| *n != u32::MAX)
}

/// RFC 3339 in UTC with millisecond precision, `2024-01-15T10:30:00.000Z`.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(deserializer)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match at {
                Some(at) => serializer.serialize_some(&at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<DateTime<Utc>>::deserialize(deserializer)
        }
    }
}

impl User {
    pub fn new(name: String, email: String, password_hash: String, ip: String) -> Self {
        Self {
            name,
            email,
            password: password_hash,
            ip,
            status: UserStatus::Active,
            created_at: Some(Utc::now()),
            extra: IndexMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, UserStatus::Active)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.status, UserStatus::Blocked)
    }
}

impl UserStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
            UserStatus::Other(s) => s,
        }
    }
}

impl From<String> for UserStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "active" => UserStatus::Active,
            "blocked" => UserStatus::Blocked,
            _ => UserStatus::Other(value),
        }
    }
}

impl From<UserStatus> for String {
    fn from(status: UserStatus) -> Self {
        match status {
            UserStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(UserStatus::from(s.to_string()))
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Statistics {
    /// Rebuilds the user counters from the user table. `total_accounts` is left
    /// alone because accounts are counted by the bot, not by this table.
    pub fn recount(&mut self, users: &UserMap) {
        self.total_users = users.len() as u64;
        self.blocked_users = users.values().filter(|u| u.is_blocked()).count() as u64;
    }

    pub fn record_user_removed(&mut self) {
        self.total_users = self.total_users.saturating_sub(1);
    }

    pub fn record_user_blocked(&mut self) {
        self.blocked_users += 1;
    }

    pub fn record_user_unblocked(&mut self) {
        self.blocked_users = self.blocked_users.saturating_sub(1);
    }
}
