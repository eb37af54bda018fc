//! CoinJoin wire messages.
//!
//! Discriminated JSON unions with a `type` tag, one enum per direction.
//! Unknown tags fail deserialization; there is no catch-all variant.
//!
//! Encodings: public keys are base58, Ed25519 signatures base64, nonces hex,
//! and RSA-sized integers (commitments, blind signatures) decimal strings.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Client -> coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN")]
    Join {
        denomination: u64,
        #[serde(rename = "publicKey")]
        public_key: String,
        timestamp: i64,
        nonce: String,
        signature: String,
    },
    #[serde(rename = "SUBMIT_BLINDED")]
    SubmitBlinded {
        #[serde(rename = "blindedCommitment")]
        blinded_commitment: String,
    },
    #[serde(rename = "SUBMIT_UNBLINDED")]
    SubmitUnblinded {
        commitment: String,
        #[serde(rename = "blindSignature")]
        blind_signature: String,
    },
    #[serde(rename = "SUBMIT_INPUT")]
    SubmitInput { address: String },
    #[serde(rename = "SUBMIT_SIGNATURE")]
    SubmitSignature { signature: String },
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "ABORT")]
    Abort,
}

/// Coordinator -> client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoordinatorMessage {
    #[serde(rename = "JOINED")]
    Joined {
        #[serde(rename = "participantId")]
        participant_id: String,
    },
    #[serde(rename = "PARTICIPANT_COUNT")]
    ParticipantCount { count: usize },
    #[serde(rename = "SESSION_STARTING")]
    SessionStarting,
    #[serde(rename = "REQUEST_BLINDED_COMMITMENT")]
    RequestBlindedCommitment,
    #[serde(rename = "BLIND_SIGNATURE")]
    BlindSignature { signature: String },
    #[serde(rename = "REQUEST_UNBLINDED_COMMITMENT")]
    RequestUnblindedCommitment,
    #[serde(rename = "COMMITMENTS_COLLECTED")]
    CommitmentsCollected { count: usize },
    #[serde(rename = "REQUEST_INPUT_ADDRESS")]
    RequestInputAddress,
    #[serde(rename = "TRANSACTION_READY")]
    TransactionReady { transaction: WireTransaction },
    #[serde(rename = "REQUEST_SIGNATURE")]
    RequestSignature,
    #[serde(rename = "TRANSACTION_COMPLETE")]
    TransactionComplete,
    #[serde(rename = "SESSION_ABORTED")]
    SessionAborted { reason: String },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

/// The assembled joint transaction as clients see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTransaction {
    pub session_id: u64,
    pub denomination: u64,
    /// Funding addresses, in join order.
    pub inputs: Vec<String>,
    /// Output commitments as decimal strings, uniformly shuffled.
    pub outputs: Vec<String>,
}

/// Parse a decimal-string field into a big integer.
pub fn parse_biguint(s: &str) -> CoreResult<BigUint> {
    BigUint::parse_bytes(s.as_bytes(), 10)
        .ok_or_else(|| CoreError::MalformedInput(format!("not a decimal integer: {s:?}")))
}
