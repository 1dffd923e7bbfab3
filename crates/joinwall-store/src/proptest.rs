//! Property-based tests for the record document and settings coercion

use crate::document::*;
use crate::settings::{coerce_max_accounts, CoercionPolicy, SettingsUpdate};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use proptest::collection::vec;
use proptest::option;
use proptest::prelude::*;
use serde_json::{json, Value};

pub fn user_status_strategy() -> impl Strategy<Value = UserStatus> {
    prop_oneof![
        Just(UserStatus::Active),
        Just(UserStatus::Blocked),
        "[a-z]{3,10}"
            .prop_filter("known statuses", |s| s != "active" && s != "blocked")
            .prop_map(UserStatus::Other),
    ]
}

pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        "[a-zA-Z][a-zA-Z0-9_]{0,15}",
        "[a-z0-9]{1,12}@[a-z]{2,8}\\.[a-z]{2,4}",
        "\\$argon2id\\$v=19\\$[a-zA-Z0-9/+$=]{10,40}",
        "(1?[0-9]{1,2}\\.){3}1?[0-9]{1,2}",
        user_status_strategy(),
        option::of(timestamp_strategy()),
    )
        .prop_map(|(name, email, password, ip, status, created_at)| User {
            name,
            email,
            password,
            ip,
            status,
            created_at,
            extra: Default::default(),
        })
}

pub fn blocked_ip_strategy() -> impl Strategy<Value = BlockedIp> {
    ("[a-zA-Z ]{0,24}", timestamp_strategy())
        .prop_map(|(reason, blocked_at)| BlockedIp { reason, blocked_at })
}

pub fn document_strategy() -> impl Strategy<Value = Document> {
    (
        vec(("[0-9]{1,10}", user_strategy()), 0..8)
            .prop_map(|users| users.into_iter().collect::<IndexMap<_, _>>()),
        vec(
            ("[A-Za-z ]{1,12}", "-100[0-9]{4,10}", "https://t\\.me/\\+[a-zA-Z0-9]{6,12}").prop_map(
                |(name, id, invite_link)| ForceJoinChannel {
                    name,
                    id,
                    invite_link,
                },
            ),
            0..4,
        ),
        1u32..50,
        vec(("(1?[0-9]{1,2}\\.){3}1?[0-9]{1,2}", blocked_ip_strategy()), 0..6)
            .prop_map(|blocked| blocked.into_iter().collect::<IndexMap<_, _>>()),
        (0u64..10_000, 0u64..10_000, 0u64..10_000),
    )
        .prop_map(
            |(users, force_join, max_accounts_per_ip, blocked_ips, (total_users, total_accounts, blocked_users))| {
                Document {
                    users,
                    settings: Settings {
                        force_join,
                        max_accounts_per_ip,
                        blocked_ips,
                        extra: Default::default(),
                    },
                    statistics: Statistics {
                        total_users,
                        total_accounts,
                        blocked_users,
                        extra: Default::default(),
                    },
                    extra: Default::default(),
                }
            },
        )
}

fn update_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(|n| json!(n)),
        any::<f64>().prop_map(|f| json!(f)),
        ".{0,8}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
    ]
}

proptest! {
    #[test]
    fn document_serialization_is_stable(doc in document_strategy()) {
        let first = serde_json::to_string_pretty(&doc).unwrap();
        let parsed: Document = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&parsed).unwrap();

        prop_assert_eq!(&parsed, &doc);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn positive_integers_coerce_to_themselves(n in 1u32..=u32::MAX) {
        prop_assert_eq!(coerce_max_accounts(&json!(n)), Some(n));
        prop_assert_eq!(coerce_max_accounts(&json!(n.to_string())), Some(n));
    }

    #[test]
    fn lenient_update_always_leaves_a_positive_limit(
        value in option::of(update_value_strategy()),
        start in 1u32..100,
    ) {
        let mut settings = Settings { max_accounts_per_ip: start, ..Settings::default() };
        let present = value.is_some();
        let update = SettingsUpdate { max_accounts_per_ip: value, force_join: None };

        prop_assert!(settings.apply_update(update, CoercionPolicy::Lenient).is_ok());
        prop_assert!(settings.max_accounts_per_ip >= 1);
        if !present {
            prop_assert_eq!(settings.max_accounts_per_ip, start);
        }
    }
}
