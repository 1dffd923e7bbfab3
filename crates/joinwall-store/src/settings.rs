//! Partial settings updates and the `max_accounts_per_ip` coercion rules.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::document::{ForceJoinChannel, Settings};
use crate::error::{Result, ValidationError};
use crate::store::DocumentStore;

pub const DEFAULT_MAX_ACCOUNTS_PER_IP: u32 = 3;

/// How a present but non-numeric `max_accounts_per_ip` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionPolicy {
    /// Fall back to the default of 3.
    #[default]
    Lenient,
    /// Reject the update with a [`ValidationError`].
    Strict,
}

/// Incoming settings payload. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, deserialize_with = "present_value")]
    pub max_accounts_per_ip: Option<Value>,
    #[serde(default)]
    pub force_join: Option<Vec<ForceJoinChannel>>,
}

/// Distinguishes an explicit `null` (`Some(Value::Null)`) from an absent field (`None`).
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Coerces a JSON value to a positive account limit.
///
/// Integers and numeric strings are accepted the way a lenient form parser
/// would: fractional numbers truncate and a string contributes its leading
/// digits ("5 accounts" is 5). Anything that does not yield at least 1 is `None`.
pub fn coerce_max_accounts(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                v
            } else {
                let f = n.as_f64()?;
                if !f.is_finite() || f < 1.0 {
                    return None;
                }
                f.trunc() as u64
            }
        }
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()?
        }
        _ => return None,
    };

    if n == 0 {
        return None;
    }
    u32::try_from(n).ok()
}

pub(crate) fn deserialize_max_accounts<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_max_accounts(&value).unwrap_or(DEFAULT_MAX_ACCOUNTS_PER_IP))
}

impl Settings {
    /// Applies only the fields present in `update`. `force_join` is replaced as a
    /// whole. Nothing is modified when validation fails.
    pub fn apply_update(
        &mut self,
        update: SettingsUpdate,
        policy: CoercionPolicy,
    ) -> std::result::Result<(), ValidationError> {
        let max_accounts = match update.max_accounts_per_ip {
            None => None,
            Some(raw) => match (coerce_max_accounts(&raw), policy) {
                (Some(n), _) => Some(n),
                (None, CoercionPolicy::Lenient) => {
                    debug!(value = %raw, "max_accounts_per_ip not numeric, using default");
                    Some(DEFAULT_MAX_ACCOUNTS_PER_IP)
                }
                (None, CoercionPolicy::Strict) => {
                    return Err(ValidationError::new(
                        "max_accounts_per_ip",
                        format!("expected a positive integer, got {}", raw),
                    ));
                }
            },
        };

        if let Some(channels) = &update.force_join {
            if let Some(pos) = channels.iter().position(|c| c.id.trim().is_empty()) {
                return Err(ValidationError::new(
                    "force_join",
                    format!("channel at position {} has an empty id", pos),
                ));
            }
        }

        if let Some(n) = max_accounts {
            self.max_accounts_per_ip = n;
        }
        if let Some(channels) = update.force_join {
            self.force_join = channels;
        }
        Ok(())
    }
}

/// Settings operations routed through the store's transaction boundary.
pub struct SettingsManager {
    store: Arc<DocumentStore>,
    policy: CoercionPolicy,
}

impl SettingsManager {
    pub fn new(store: Arc<DocumentStore>, policy: CoercionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn current(&self) -> Settings {
        self.store.snapshot().settings.clone()
    }

    pub async fn update(&self, update: SettingsUpdate) -> Result<Settings> {
        let policy = self.policy;
        let result = self
            .store
            .transaction(move |doc| {
                doc.settings.apply_update(update, policy)?;
                Ok(doc.settings.clone())
            })
            .await;

        if let Err(e) = &result {
            warn!(error = %e, "settings update rejected");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel(name: &str, id: &str) -> ForceJoinChannel {
        ForceJoinChannel {
            name: name.to_string(),
            id: id.to_string(),
            invite_link: format!("https://t.me/{}", name.to_lowercase()),
        }
    }

    #[test]
    fn test_coerce_accepts_integers_and_numeric_strings() {
        assert_eq!(coerce_max_accounts(&json!(5)), Some(5));
        assert_eq!(coerce_max_accounts(&json!("7")), Some(7));
        assert_eq!(coerce_max_accounts(&json!(" 12 ")), Some(12));
        assert_eq!(coerce_max_accounts(&json!("4 accounts")), Some(4));
        assert_eq!(coerce_max_accounts(&json!(2.9)), Some(2));
    }

    #[test]
    fn test_coerce_rejects_everything_else() {
        assert_eq!(coerce_max_accounts(&json!("oops")), None);
        assert_eq!(coerce_max_accounts(&json!(0)), None);
        assert_eq!(coerce_max_accounts(&json!(-2)), None);
        assert_eq!(coerce_max_accounts(&json!(0.5)), None);
        assert_eq!(coerce_max_accounts(&json!(null)), None);
        assert_eq!(coerce_max_accounts(&json!(true)), None);
        assert_eq!(coerce_max_accounts(&json!([3])), None);
        assert_eq!(coerce_max_accounts(&json!(u64::MAX)), None);
    }

    #[test]
    fn test_force_join_only_update_keeps_limit() {
        let mut settings = Settings::default();
        let update: SettingsUpdate = serde_json::from_value(json!({
            "force_join": [{"name": "A", "id": "-100", "invite_link": "https://t.me/a"}]
        }))
        .unwrap();

        settings.apply_update(update, CoercionPolicy::Lenient).unwrap();
        assert_eq!(settings.max_accounts_per_ip, 3);
        assert_eq!(
            settings.force_join,
            vec![ForceJoinChannel {
                name: "A".to_string(),
                id: "-100".to_string(),
                invite_link: "https://t.me/a".to_string(),
            }]
        );
    }

    #[test]
    fn test_non_numeric_limit_falls_back_when_lenient() {
        let mut settings = Settings {
            max_accounts_per_ip: 8,
            ..Settings::default()
        };
        let update: SettingsUpdate =
            serde_json::from_value(json!({ "max_accounts_per_ip": "oops" })).unwrap();

        settings.apply_update(update, CoercionPolicy::Lenient).unwrap();
        assert_eq!(settings.max_accounts_per_ip, 3);
    }

    #[test]
    fn test_non_numeric_limit_rejected_when_strict() {
        let mut settings = Settings {
            max_accounts_per_ip: 8,
            force_join: vec![channel("Old", "-1")],
            ..Settings::default()
        };
        let update: SettingsUpdate = serde_json::from_value(json!({
            "max_accounts_per_ip": "oops",
            "force_join": []
        }))
        .unwrap();

        let err = settings.apply_update(update, CoercionPolicy::Strict).unwrap_err();
        assert_eq!(err.field, "max_accounts_per_ip");
        assert_eq!(settings.max_accounts_per_ip, 8);
        assert_eq!(settings.force_join.len(), 1);
    }

    #[test]
    fn test_explicit_null_counts_as_present() {
        let update: SettingsUpdate =
            serde_json::from_value(json!({ "max_accounts_per_ip": null })).unwrap();
        assert_eq!(update.max_accounts_per_ip, Some(Value::Null));

        let absent: SettingsUpdate = serde_json::from_value(json!({})).unwrap();
        assert!(absent.max_accounts_per_ip.is_none());
    }

    #[test]
    fn test_unknown_update_fields_ignored() {
        let mut settings = Settings::default();
        let before = settings.clone();
        let update: SettingsUpdate = serde_json::from_value(json!({
            "blocked_ips": {"1.2.3.4": {"reason": "x", "blocked_at": "2024-01-01T00:00:00Z"}},
            "admin_password": "hunter2"
        }))
        .unwrap();

        settings.apply_update(update, CoercionPolicy::Strict).unwrap();
        assert_eq!(settings, before);
    }

    #[test]
    fn test_empty_channel_id_rejected() {
        let mut settings = Settings::default();
        let update = SettingsUpdate {
            max_accounts_per_ip: None,
            force_join: Some(vec![channel("A", "-100"), channel("B", " ")]),
        };

        let err = settings.apply_update(update, CoercionPolicy::Lenient).unwrap_err();
        assert_eq!(err.field, "force_join");
        assert!(settings.force_join.is_empty());
    }

    #[test]
    fn test_load_coerces_stored_limit() {
        let settings: Settings =
            serde_json::from_value(json!({ "max_accounts_per_ip": "banana" })).unwrap();
        assert_eq!(settings.max_accounts_per_ip, 3);

        let settings: Settings =
            serde_json::from_value(json!({ "max_accounts_per_ip": "6" })).unwrap();
        assert_eq!(settings.max_accounts_per_ip, 6);
    }
}
