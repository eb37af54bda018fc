//! Error types for the privacy core.
//!
//! Primitive-level errors (field math, Merkle, hashing) indicate programming
//! bugs or out-of-range inputs; protocol-level errors (sessions, quorum) are
//! recoverable and carry enough context for a retry decision.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bad base58, wrong length, non-canonical JSON.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// An Ed25519/X25519 point that fails to decompress.
    #[error("point is not on the curve")]
    NonCanonicalPoint,

    /// Edwards point with y = 1 (the identity) cannot be mapped to Montgomery form.
    #[error("point is not convertible to Montgomery form")]
    NonConvertiblePoint,

    /// Modular inverse does not exist (gcd with the modulus is not 1).
    #[error("value is not invertible modulo the given modulus")]
    NotInvertible,

    /// Groth16 verification returned false.
    #[error("proof verification failed")]
    InvalidProof,

    /// RSA or Ed25519 signature check failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Nullifier hash already present in the spent set.
    #[error("nullifier has already been used")]
    DoubleSpend,

    /// The Merkle tree is at capacity.
    #[error("merkle tree is full")]
    TreeFull,

    /// The withdrawal references a root that is neither current nor in history.
    #[error("merkle root is not current or in history")]
    UnknownRoot,

    /// RSA key generation could not find suitable primes within budget.
    #[error("RSA key generation exhausted its attempt budget")]
    KeyGenExhausted,

    /// Verifier quorum collected fewer valid signatures than the threshold.
    #[error("insufficient attestation signatures: {collected} of {required}")]
    InsufficientSignatures { required: usize, collected: usize },

    /// Attestation timestamp is outside the validity window.
    #[error("attestation has expired")]
    AttestationExpired,

    /// The signing key does not belong to the published quorum.
    #[error("verifier is not in the trusted quorum")]
    UntrustedVerifier,

    /// Amount is not one of the configured denominations.
    #[error("invalid denomination: {0}")]
    InvalidDenomination(u64),

    #[error("session is full")]
    SessionFull,

    #[error("session has expired")]
    SessionExpired,

    #[error("session aborted: {0}")]
    SessionAborted(String),

    /// A message arrived in a phase that does not accept it.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Deadline exceeded for an externally-originated operation.
    #[error("operation timed out")]
    Timeout,

    /// Operation was cancelled before completion.
    #[error("operation was cancelled")]
    Cancelled,

    /// Generic withdrawal rejection presented to external observers.
    #[error("withdrawal rejected")]
    WithdrawalRejected,
}

impl CoreError {
    /// Collapse withdrawal failure causes into a single generic rejection.
    ///
    /// External observers must not be able to distinguish an already-spent
    /// note from a never-deposited one, so `DoubleSpend`, `InvalidProof` and
    /// `UnknownRoot` all surface as `WithdrawalRejected`.
    pub fn redacted(self) -> CoreError {
        match self {
            CoreError::DoubleSpend | CoreError::InvalidProof | CoreError::UnknownRoot => {
                CoreError::WithdrawalRejected
            }
            other => other,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawal_failures_are_indistinguishable() {
        assert_eq!(CoreError::DoubleSpend.redacted(), CoreError::WithdrawalRejected);
        assert_eq!(CoreError::InvalidProof.redacted(), CoreError::WithdrawalRejected);
        assert_eq!(CoreError::UnknownRoot.redacted(), CoreError::WithdrawalRejected);
        // Unrelated errors pass through untouched.
        assert_eq!(CoreError::TreeFull.redacted(), CoreError::TreeFull);
    }
}
