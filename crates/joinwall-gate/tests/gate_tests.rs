//! Integration tests for the IP gate against a real record file

use std::sync::Arc;
use tempfile::tempdir;
use joinwall_gate::{GateError, GateOptions, IpGate, DEFAULT_BLOCK_REASON};
use joinwall_store::{load_document, save_document, DocumentStore, StoreOptions};

const SEEDED: &str = r#"{
  "users": {},
  "settings": {
    "force_join": [],
    "max_accounts_per_ip": 3,
    "blocked_ips": {
      "203.0.113.5": {"reason": "spam wave", "blocked_at": "2024-02-01T12:00:00Z"},
      "198.51.100.9": {"reason": "chargeback", "blocked_at": "2024-02-03T08:30:00Z"}
    }
  },
  "statistics": {"total_users": 0, "total_accounts": 0, "blocked_users": 0}
}"#;

async fn seeded_store(dir: &std::path::Path) -> Result<Arc<DocumentStore>, Box<dyn std::error::Error>> {
    let path = dir.join("database.json");
    std::fs::write(&path, SEEDED)?;
    Ok(Arc::new(DocumentStore::open(&path, StoreOptions::default()).await?))
}

#[tokio::test]
async fn test_hydrates_from_record_file() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(store, GateOptions::default());

    assert_eq!(gate.len(), 2);
    assert!(gate.is_blocked("203.0.113.5"));
    assert!(gate.is_blocked("::ffff:203.0.113.5"));
    assert!(!gate.is_blocked("203.0.113.6"));
    assert_eq!(gate.get("198.51.100.9").map(|e| e.reason), Some("chargeback".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_block_keeps_other_entries_metadata() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let before = store.snapshot().settings.blocked_ips.clone();
    let gate = IpGate::hydrate(store.clone(), GateOptions::default());

    gate.block("192.0.2.44", None).await?;
    assert!(gate.unblock("198.51.100.9").await?);

    let on_disk = load_document(store.path()).await?;
    let blocked = &on_disk.settings.blocked_ips;
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked["203.0.113.5"], before["203.0.113.5"]);
    assert_eq!(blocked["192.0.2.44"].reason, DEFAULT_BLOCK_REASON);

    Ok(())
}

#[tokio::test]
async fn test_custom_reason_and_default_reason() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(
        store,
        GateOptions {
            default_reason: "panel".to_string(),
        },
    );

    gate.block("192.0.2.1", Some("brute force".to_string())).await?;
    gate.block("192.0.2.2", Some("   ".to_string())).await?;

    assert_eq!(gate.get("192.0.2.1").map(|e| e.reason), Some("brute force".to_string()));
    assert_eq!(gate.get("192.0.2.2").map(|e| e.reason), Some("panel".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_invalid_ip_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(store.clone(), GateOptions::default());

    let result = gate.block("999.1.1.1", None).await;
    assert!(matches!(result, Err(GateError::InvalidIp(_))));
    assert_eq!(gate.len(), 2);
    assert_eq!(store.snapshot().settings.blocked_ips.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_block_and_unblock_stay_consistent() -> Result<(), Box<dyn std::error::Error>> {
    for _ in 0..10 {
        let temp_dir = tempdir()?;
        let store = seeded_store(temp_dir.path()).await?;
        let gate = Arc::new(IpGate::hydrate(store.clone(), GateOptions::default()));

        let g1 = gate.clone();
        let g2 = gate.clone();
        let (blocked, unblocked) = tokio::join!(
            tokio::spawn(async move { g1.block("1.2.3.4", None).await }),
            tokio::spawn(async move { g2.unblock("1.2.3.4").await }),
        );
        blocked??;
        let removed = unblocked??;

        let on_disk = load_document(store.path()).await?;
        let in_memory = gate.is_blocked("1.2.3.4");
        assert_eq!(in_memory, on_disk.settings.blocked_ips.contains_key("1.2.3.4"));
        // unblock first: nothing removed and the IP ends blocked;
        // block first: unblock removed it
        assert_eq!(removed, !in_memory);
    }

    Ok(())
}

#[tokio::test]
async fn test_persist_failure_keeps_memory_state() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(store.clone(), GateOptions::default());

    std::fs::remove_file(store.path())?;
    std::fs::create_dir(store.path())?;

    let result = gate.block("192.0.2.10", None).await;
    assert!(matches!(result, Err(GateError::Persist { .. })));
    assert!(gate.is_blocked("192.0.2.10"));
    assert!(gate.is_blocked("203.0.113.5"));

    let result = gate.unblock("203.0.113.5").await;
    assert!(matches!(result, Err(GateError::Persist { .. })));
    assert!(!gate.is_blocked("203.0.113.5"));

    Ok(())
}

#[tokio::test]
async fn test_next_write_catches_up_after_persist_failure() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(store.clone(), GateOptions::default());

    // a directory at the temp path fails the write but leaves the file intact
    let tmp = temp_dir.path().join("database.json.tmp");
    std::fs::create_dir(&tmp)?;
    assert!(matches!(
        gate.block("192.0.2.10", Some("first".to_string())).await,
        Err(GateError::Persist { .. })
    ));
    assert!(matches!(
        gate.unblock("198.51.100.9").await,
        Err(GateError::Persist { .. })
    ));
    std::fs::remove_dir(&tmp)?;

    gate.block("192.0.2.11", None).await?;

    let on_disk = load_document(store.path()).await?;
    let mut disk_keys: Vec<String> = on_disk.settings.blocked_ips.keys().cloned().collect();
    disk_keys.sort();
    let memory_keys: Vec<String> = gate.list().into_iter().map(|(ip, _)| ip).collect();
    assert_eq!(disk_keys, memory_keys);
    assert_eq!(on_disk.settings.blocked_ips["192.0.2.10"].reason, "first");

    // a restart sees what the running gate saw
    let reopened = Arc::new(DocumentStore::open(store.path(), StoreOptions::default()).await?);
    let restarted = IpGate::hydrate(reopened, GateOptions::default());
    assert!(restarted.is_blocked("192.0.2.10"));
    assert!(restarted.is_blocked("192.0.2.11"));
    assert!(restarted.is_blocked("203.0.113.5"));
    assert!(!restarted.is_blocked("198.51.100.9"));

    Ok(())
}

#[tokio::test]
async fn test_resync_after_reload() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let store = seeded_store(temp_dir.path()).await?;
    let gate = IpGate::hydrate(store.clone(), GateOptions::default());

    let mut doc = load_document(store.path()).await?;
    doc.settings.blocked_ips.clear();
    save_document(store.path(), &doc).await?;

    store.reload().await?;
    assert!(gate.is_blocked("203.0.113.5"));
    gate.resync().await;
    assert!(gate.is_empty());

    Ok(())
}
