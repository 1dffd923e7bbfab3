//! In-memory blocked-IP set mirrored into the record document.

use chrono::Utc;
use dashmap::DashMap;
use joinwall_store::{BlockedIp, BlockedIps, DocumentStore};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{GateError, Result};

pub const DEFAULT_BLOCK_REASON: &str = "Blocked by admin";

#[derive(Debug, Clone)]
pub struct GateOptions {
    /// Reason recorded when `block` is called without one.
    pub default_reason: String,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            default_reason: DEFAULT_BLOCK_REASON.to_string(),
        }
    }
}

/// Canonical key for an IP string. Parseable addresses are normalized
/// (IPv4-mapped IPv6 collapses to IPv4); anything else is only trimmed.
pub fn normalize_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => addr.to_canonical().to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Request admission by blocked IP.
///
/// The in-memory map is authoritative for the life of the process. Each
/// mutation writes the whole set into `settings.blocked_ips` through the
/// store's transaction, so an entry whose earlier write failed reaches disk
/// with the next successful one. Mutations are serialized so memory and disk
/// always reflect the same order of block/unblock calls.
pub struct IpGate {
    store: Arc<DocumentStore>,
    entries: DashMap<String, BlockedIp>,
    options: GateOptions,
    mutation: Mutex<()>,
}

impl IpGate {
    /// Builds the gate from the store's committed blocklist.
    pub fn hydrate(store: Arc<DocumentStore>, options: GateOptions) -> Self {
        let gate = Self {
            store,
            entries: DashMap::new(),
            options,
            mutation: Mutex::new(()),
        };
        gate.load_entries();
        info!(blocked = gate.entries.len(), "IP gate hydrated");
        gate
    }

    fn load_entries(&self) {
        let doc = self.store.snapshot();
        self.entries.clear();
        for (ip, entry) in &doc.settings.blocked_ips {
            self.entries.insert(normalize_ip(ip), entry.clone());
        }
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.entries.contains_key(&normalize_ip(ip))
    }

    pub fn is_blocked_addr(&self, addr: IpAddr) -> bool {
        self.entries.contains_key(&addr.to_canonical().to_string())
    }

    pub fn get(&self, ip: &str) -> Option<BlockedIp> {
        self.entries.get(&normalize_ip(ip)).map(|e| e.value().clone())
    }

    /// Blocked IPs sorted by address string.
    pub fn list(&self) -> Vec<(String, BlockedIp)> {
        let mut list: Vec<(String, BlockedIp)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Blocks `ip`, recording `reason` (or the configured default) and the
    /// current time. Re-blocking an address replaces its reason and timestamp.
    pub async fn block(&self, ip: &str, reason: Option<String>) -> Result<()> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| GateError::InvalidIp(ip.to_string()))?;
        let key = addr.to_canonical().to_string();
        let entry = BlockedIp {
            reason: reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| self.options.default_reason.clone()),
            blocked_at: Utc::now(),
        };

        let _mutation = self.mutation.lock().await;
        info!(ip = %key, reason = %entry.reason, "IP blocked");
        self.entries.insert(key.clone(), entry);

        let persisted = self
            .store
            .transaction(|doc| {
                self.mirror_into(&mut doc.settings.blocked_ips);
                Ok(())
            })
            .await;

        persisted.map_err(|source| {
            warn!(ip = %key, error = %source, "blocked IP not persisted");
            GateError::Persist { ip: key, source }
        })
    }

    /// Unblocks `ip`. Returns whether it was blocked.
    pub async fn unblock(&self, ip: &str) -> Result<bool> {
        let key = normalize_ip(ip);

        let _mutation = self.mutation.lock().await;
        if self.entries.remove(&key).is_none() {
            debug!(ip = %key, "unblock requested for IP that is not blocked");
            return Ok(false);
        }
        info!(ip = %key, "IP unblocked");

        let persisted = self
            .store
            .transaction(|doc| {
                self.mirror_into(&mut doc.settings.blocked_ips);
                Ok(())
            })
            .await;

        match persisted {
            Ok(()) => Ok(true),
            Err(source) => {
                warn!(ip = %key, error = %source, "unblocked IP not persisted");
                Err(GateError::Persist { ip: key, source })
            }
        }
    }

    /// Makes `blocked` hold exactly the in-memory entries. Keys already on
    /// disk keep their spelling and position; new ones are appended oldest
    /// first.
    fn mirror_into(&self, blocked: &mut BlockedIps) {
        let mut seen = HashSet::new();
        blocked.retain(|ip, entry| {
            let key = normalize_ip(ip);
            let Some(current) = self.entries.get(&key) else {
                return false;
            };
            // a second spelling of the same address is dropped
            if !seen.insert(key) {
                return false;
            }
            *entry = current.value().clone();
            true
        });

        let mut missing: Vec<(String, BlockedIp)> = self
            .entries
            .iter()
            .filter(|e| !seen.contains(e.key()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        missing.sort_by(|a, b| a.1.blocked_at.cmp(&b.1.blocked_at).then_with(|| a.0.cmp(&b.0)));
        blocked.extend(missing);
    }

    /// Rebuilds the in-memory map from the store, e.g. after
    /// [`DocumentStore::reload`].
    pub async fn resync(&self) {
        let _mutation = self.mutation.lock().await;
        self.load_entries();
        info!(blocked = self.entries.len(), "IP gate resynced from store");
    }
}
