//! Core configuration.
//!
//! One struct covers every tunable the core exposes. Callers typically load
//! it from JSON; `Default` gives the production values.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Standard fixed denominations, in base units.
pub const DEFAULT_DENOMINATIONS: [u64; 3] = [1, 10, 100];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// RSA modulus size for blind signatures. Enforced minimum 2048.
    pub rsa_bits: usize,

    /// Miller-Rabin rounds during prime search; confidence ~= 2^-2k.
    pub miller_rabin_iterations: usize,

    /// Merkle tree depth; pool capacity is 2^depth.
    pub merkle_depth: usize,

    /// Closed set of allowed note amounts.
    pub denominations: Vec<u64>,

    /// CoinJoin quorum bounds.
    pub min_participants: usize,
    pub max_participants: usize,

    /// Per-phase CoinJoin deadline, in seconds.
    pub session_timeout_secs: i64,

    /// Threshold parameters shared by threshold RSA and the verifier quorum.
    pub threshold_t: usize,
    pub threshold_n: usize,

    /// Maximum age of an attestation before consumers must reject it.
    pub attestation_validity_window_secs: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rsa_bits: 2048,
            miller_rabin_iterations: 64,
            merkle_depth: 20,
            denominations: DEFAULT_DENOMINATIONS.to_vec(),
            min_participants: 5,
            max_participants: 10,
            session_timeout_secs: 300,
            threshold_t: 2,
            threshold_n: 3,
            attestation_validity_window_secs: 300,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.rsa_bits < 2048 {
            return Err(CoreError::MalformedInput(format!(
                "rsaBits must be at least 2048, got {}",
                self.rsa_bits
            )));
        }
        if self.merkle_depth == 0 || self.merkle_depth > 32 {
            return Err(CoreError::MalformedInput(format!(
                "merkleDepth must be in 1..=32, got {}",
                self.merkle_depth
            )));
        }
        if self.denominations.is_empty() {
            return Err(CoreError::MalformedInput(
                "denominations must not be empty".into(),
            ));
        }
        if self.min_participants < 2 || self.min_participants > self.max_participants {
            return Err(CoreError::MalformedInput(format!(
                "participant bounds invalid: min={} max={}",
                self.min_participants, self.max_participants
            )));
        }
        if self.threshold_t < 2 || self.threshold_t > self.threshold_n {
            return Err(CoreError::MalformedInput(format!(
                "threshold invalid: t={} n={}",
                self.threshold_t, self.threshold_n
            )));
        }
        Ok(())
    }

    pub fn is_valid_denomination(&self, amount: u64) -> bool {
        self.denominations.contains(&amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_small_rsa_modulus() {
        let cfg = CoreConfig {
            rsa_bits: 1024,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = CoreConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rsa_bits, cfg.rsa_bits);
        assert_eq!(back.denominations, cfg.denominations);
        // Field names follow the documented configuration surface.
        assert!(json.contains("merkleDepth"));
        assert!(json.contains("attestationValidityWindowSecs"));
    }
}
