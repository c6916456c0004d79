//! Semantic configuration surface — spec §6. Grounded in
//! `spark-core/src/configuration`'s `serde`-backed value types; this
//! runtime's configuration is small enough to be one flat struct rather
//! than the teacher's full layered-source machinery, which is out of
//! scope (persistence/CLI/hosting are explicit Non-goals).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

fn millis_to_duration(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// All options from spec §6's configuration table. Durations are stored
/// as milliseconds on the wire/serde representation to keep the format
/// dependency-free, and converted to [`Duration`] through accessors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Granularity of the activation time-wheel.
    pub collection_quantum_ms: u64,
    /// Default idle-time-before-collection per activation.
    pub collection_age_default_ms: u64,
    /// Overrides per grain class, keyed by grain type name.
    pub collection_age_per_type_ms: BTreeMap<String, u64>,
    /// Maximum directory forwarding hops.
    pub hop_limit: u8,
    /// Default per-call deadline.
    pub response_timeout_ms: u64,
    /// How long to retain state for a disconnected client.
    pub client_drop_timeout_ms: u64,
    /// Max cache-invalidation retries on a single call.
    pub max_forward_count: u8,
    /// Bound on waiting for handoff at join.
    pub initial_stabilization_timeout_ms: u64,
    /// Per-grain-class reentrancy opt-in; default non-reentrant.
    pub reentrancy_default: bool,
    /// Backing membership provider identifier.
    pub membership_provider: String,
    /// Backoff schedule for retrying a transient directory/dispatch
    /// failure after refreshing membership (spec §4.3/§4.7 failure
    /// semantics; resolved Open Question #1).
    pub retry: RetryPolicy,
}

impl RuntimeConfig {
    pub fn collection_quantum(&self) -> Duration {
        millis_to_duration(self.collection_quantum_ms)
    }

    pub fn collection_age_default(&self) -> Duration {
        millis_to_duration(self.collection_age_default_ms)
    }

    pub fn collection_age_for(&self, grain_type: &str) -> Duration {
        self.collection_age_per_type_ms
            .get(grain_type)
            .copied()
            .map(millis_to_duration)
            .unwrap_or_else(|| self.collection_age_default())
    }

    pub fn response_timeout(&self) -> Duration {
        millis_to_duration(self.response_timeout_ms)
    }

    pub fn client_drop_timeout(&self) -> Duration {
        millis_to_duration(self.client_drop_timeout_ms)
    }

    pub fn initial_stabilization_timeout(&self) -> Duration {
        millis_to_duration(self.initial_stabilization_timeout_ms)
    }

    /// Parses a TOML document into a [`RuntimeConfig`], falling back to
    /// [`RuntimeConfig::default`] for keys it omits by first merging onto
    /// the default's serialized form.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            // 80 * 50ms from spec §4.3's initial-stabilization description.
            collection_quantum_ms: 60_000,
            collection_age_default_ms: 20 * 60_000,
            collection_age_per_type_ms: BTreeMap::new(),
            hop_limit: crate::protocol::HOP_LIMIT,
            response_timeout_ms: 30_000,
            client_drop_timeout_ms: 5 * 60_000,
            max_forward_count: 3,
            initial_stabilization_timeout_ms: 80 * 50,
            reentrancy_default: false,
            membership_provider: "static".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = RuntimeConfig::default();
        let toml_str = toml::to_string(&cfg).expect("serialize");
        let parsed = RuntimeConfig::from_toml_str(&toml_str).expect("parse");
        assert_eq!(parsed.hop_limit, cfg.hop_limit);
        assert_eq!(parsed.retry.max_attempts, cfg.retry.max_attempts);
    }

    #[test]
    fn config_also_round_trips_through_json() {
        let mut cfg = RuntimeConfig::default();
        cfg.collection_age_per_type_ms.insert("Thermostat".into(), 1_000);
        let json = serde_json::to_string(&cfg).expect("serialize");
        let parsed: RuntimeConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.collection_age_per_type_ms.get("Thermostat"), Some(&1_000));
        assert_eq!(parsed.membership_provider, cfg.membership_provider);
    }

    #[test]
    fn per_type_override_wins_over_default() {
        let mut cfg = RuntimeConfig::default();
        cfg.collection_age_per_type_ms.insert("Thermostat".into(), 1_000);
        assert_eq!(cfg.collection_age_for("Thermostat"), Duration::from_millis(1_000));
        assert_eq!(cfg.collection_age_for("Other"), cfg.collection_age_default());
    }
}
