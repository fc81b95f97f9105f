use std::sync::Arc;

use crate::transport::{HttpTransport, TransportError};
use crate::types::{AccessCredential, UsageSnapshot};

#[derive(Debug, Clone)]
pub struct UsageProbeConfig {
    pub endpoint: String,
    /// Observed values: `CREDIT` or `VIBE`. The source had a separate code
    /// path per value (spec §9); this makes it one configuration key
    /// instead.
    pub resource_type: String,
}

impl Default for UsageProbeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.example-backend.internal/usage".to_string(),
            resource_type: "CREDIT".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeFail {
    #[error("probe transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("probe returned non-2xx status {0}")]
    Status(u16),
    #[error("probe response was not valid JSON")]
    Malformed,
}

pub struct UsageProbe {
    transport: Arc<dyn HttpTransport>,
    config: UsageProbeConfig,
}

impl UsageProbe {
    pub fn new(transport: Arc<dyn HttpTransport>, config: UsageProbeConfig) -> Self {
        Self { transport, config }
    }

    pub async fn probe(
        &self,
        access: &AccessCredential,
        now: i64,
    ) -> Result<UsageSnapshot, ProbeFail> {
        let headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", access.access_secret),
        )];
        let query = vec![
            ("isEmailRequired".to_string(), "true".to_string()),
            ("origin".to_string(), "AI_EDITOR".to_string()),
            ("resourceType".to_string(), "AGENTIC_REQUEST".to_string()),
        ];
        let resp = self
            .transport
            .get(&self.config.endpoint, &headers, &query)
            .await?;
        if !resp.is_success() {
            return Err(ProbeFail::Status(resp.status));
        }
        let payload: serde_json::Value =
            serde_json::from_slice(&resp.body).map_err(|_| ProbeFail::Malformed)?;
        parse_usage_snapshot(&payload, &self.config.resource_type, now).ok_or(ProbeFail::Malformed)
    }

    /// Conservative placeholder used by callers when the probe fails:
    /// unknown-but-probably-positive, never zero (spec §4.2).
    pub fn unknown_snapshot(now: i64) -> UsageSnapshot {
        UsageSnapshot {
            available_budget: 0.0,
            checked_at: now,
            user_email: None,
            subscription_type: None,
            budget_unknown: true,
        }
    }
}

fn parse_usage_snapshot(
    payload: &serde_json::Value,
    resource_type: &str,
    now: i64,
) -> Option<UsageSnapshot> {
    let entries = payload.get("usageBreakdownList")?.as_array()?;
    let entry = entries
        .iter()
        .find(|e| e.get("resourceType").and_then(|v| v.as_str()) == Some(resource_type))?;

    let field = |precision_key: &str, plain_key: &str| -> f64 {
        entry
            .get(precision_key)
            .and_then(|v| v.as_f64())
            .or_else(|| entry.get(plain_key).and_then(|v| v.as_f64()))
            .unwrap_or(0.0)
    };

    let limit = field("limitWithPrecision", "limit");
    let used = field("usedWithPrecision", "used");
    let free_trial_active = entry
        .get("freeTrialStatus")
        .and_then(|v| v.as_str())
        .map(|s| s.eq_ignore_ascii_case("active"))
        .unwrap_or(false);
    let (free_trial_limit, free_trial_used) = if free_trial_active {
        (
            field("freeTrialLimitWithPrecision", "freeTrialLimit"),
            field("freeTrialUsedWithPrecision", "freeTrialUsed"),
        )
    } else {
        (0.0, 0.0)
    };

    let available_budget = (limit + free_trial_limit) - (used + free_trial_used);
    let user_email = payload
        .get("userEmail")
        .or_else(|| payload.get("email"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let subscription_type = payload
        .get("subscriptionType")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Some(UsageSnapshot {
        available_budget,
        checked_at: now,
        user_email,
        subscription_type,
        budget_unknown: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_available_budget_with_free_trial() {
        let payload = serde_json::json!({
            "usageBreakdownList": [
                {
                    "resourceType": "CREDIT",
                    "limitWithPrecision": 100.0,
                    "usedWithPrecision": 40.0,
                    "freeTrialStatus": "ACTIVE",
                    "freeTrialLimitWithPrecision": 20.0,
                    "freeTrialUsedWithPrecision": 5.0,
                },
                { "resourceType": "VIBE", "limit": 10, "used": 1 },
            ],
            "userEmail": "dev@example.com",
        });
        let snapshot = parse_usage_snapshot(&payload, "CREDIT", 1000).unwrap();
        assert_eq!(snapshot.available_budget, (100.0 + 20.0) - (40.0 + 5.0));
        assert_eq!(snapshot.user_email.as_deref(), Some("dev@example.com"));
        assert!(!snapshot.budget_unknown);
    }

    #[test]
    fn ignores_inactive_free_trial() {
        let payload = serde_json::json!({
            "usageBreakdownList": [
                {
                    "resourceType": "VIBE",
                    "limit": 50.0,
                    "used": 10.0,
                    "freeTrialStatus": "EXPIRED",
                    "freeTrialLimit": 20.0,
                },
            ],
        });
        let snapshot = parse_usage_snapshot(&payload, "VIBE", 0).unwrap();
        assert_eq!(snapshot.available_budget, 40.0);
    }

    #[test]
    fn missing_resource_type_is_malformed() {
        let payload = serde_json::json!({ "usageBreakdownList": [] });
        assert!(parse_usage_snapshot(&payload, "CREDIT", 0).is_none());
    }
}
