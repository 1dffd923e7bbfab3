//! Record store for the joinwall admin panel.
//!
//! A single JSON document holds users, settings and statistics. Every mutation
//! goes through [`DocumentStore::transaction`].

pub mod document;
pub mod error;
pub mod password;
pub mod settings;
pub mod store;
pub mod users;

#[cfg(test)]
pub mod proptest;

pub use document::{
    BlockedIp, BlockedIps, Document, ForceJoinChannel, Settings, Statistics, User, UserMap,
    UserStatus,
};
pub use error::{RecordError, Result, StoreError, ValidationError};
pub use password::PasswordHasher;
pub use settings::{
    coerce_max_accounts, CoercionPolicy, SettingsManager, SettingsUpdate,
    DEFAULT_MAX_ACCOUNTS_PER_IP,
};
pub use store::{load_document, save_document, DocumentStore, StoreOptions};
pub use users::{NewUser, UserListOptions, UserManager};
