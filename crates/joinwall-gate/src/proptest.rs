//! Property-based tests for the IP gate

use crate::gate::{normalize_ip, GateOptions, IpGate};
use joinwall_store::{DocumentStore, StoreOptions};
use proptest::prelude::*;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Strategy for generating IPv4 and IPv6 addresses
pub fn ip_strategy() -> impl Strategy<Value = IpAddr> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        any::<[u16; 8]>().prop_map(|s| IpAddr::V6(Ipv6Addr::new(
            s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]
        ))),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn block_then_unblock(ip in ip_strategy(), other in ip_strategy()) {
        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();

        rt.block_on(async {
            let store = Arc::new(
                DocumentStore::open(dir.path().join("db.json"), StoreOptions::default())
                    .await
                    .unwrap(),
            );
            let gate = IpGate::hydrate(store.clone(), GateOptions::default());
            let ip = ip.to_string();
            let other = other.to_string();

            gate.block(&ip, None).await.unwrap();
            prop_assert!(gate.is_blocked(&ip));
            prop_assert!(store.snapshot().settings.blocked_ips.contains_key(&normalize_ip(&ip)));

            if normalize_ip(&other) != normalize_ip(&ip) {
                prop_assert!(!gate.unblock(&other).await.unwrap());
            }

            prop_assert!(gate.unblock(&ip).await.unwrap());
            prop_assert!(!gate.is_blocked(&ip));
            prop_assert!(!gate.unblock(&ip).await.unwrap());
            prop_assert!(store.snapshot().settings.blocked_ips.is_empty());
            Ok(())
        })?;
    }

    #[test]
    fn normalize_is_idempotent(ip in ip_strategy()) {
        let once = normalize_ip(&ip.to_string());
        prop_assert_eq!(normalize_ip(&once), once.clone());
    }
}
