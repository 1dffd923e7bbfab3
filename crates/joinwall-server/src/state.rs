use anyhow::Context;
use joinwall_gate::{ClientIpResolver, IpGate};
use joinwall_store::{DocumentStore, SettingsManager, UserManager};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PanelConfig;

/// Shared handles for the router and the offline CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub users: Arc<UserManager>,
    pub settings: Arc<SettingsManager>,
    pub gate: Arc<IpGate>,
    pub resolver: Arc<ClientIpResolver>,
}

impl AppState {
    /// Opens the record file, upgrades any plaintext passwords and hydrates the gate.
    pub async fn initialize(config: &PanelConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            DocumentStore::open(&config.store.path, config.store_options())
                .await
                .with_context(|| format!("Failed to open record file {}", config.store.path.display()))?,
        );

        let users = Arc::new(UserManager::new(store.clone()));
        let migrated = users
            .migrate_plaintext_passwords()
            .await
            .context("Failed to migrate stored passwords")?;
        if migrated > 0 {
            info!(count = migrated, "Rehashed plaintext passwords");
        }

        let settings = Arc::new(SettingsManager::new(store.clone(), config.store.coercion));
        let gate = Arc::new(IpGate::hydrate(store.clone(), config.gate_options()));

        let resolver = Arc::new(ClientIpResolver::new(config.forwarded_policy()));
        if resolver.policy().trusts_any_client() {
            warn!(
                "gate.forwarded_for = \"always\": X-Forwarded-For is taken from any client and can be spoofed"
            );
        }

        info!(
            path = %config.store.path.display(),
            users = users.get_user_count(),
            blocked_ips = gate.len(),
            "Record store ready"
        );

        Ok(Self {
            store,
            users,
            settings,
            gate,
            resolver,
        })
    }

    /// Re-reads the record file and rebuilds the gate from it, picking up
    /// edits made while the server runs.
    pub async fn reload(&self) -> anyhow::Result<()> {
        self.store
            .reload()
            .await
            .with_context(|| format!("Failed to reload record file {}", self.store.path().display()))?;
        self.gate.resync().await;

        info!(
            users = self.users.get_user_count(),
            blocked_ips = self.gate.len(),
            "Record store reloaded"
        );
        Ok(())
    }
}
