//! Chain-agnostic cryptographic core for a stealth-payment and mixing
//! system.
//!
//! Four coupled subsystems, sharing Poseidon and BN254 field arithmetic at
//! the bottom of the stack:
//!
//! - **stealth**: dual-key stealth addresses (DKSAP) with X25519 derivation,
//!   meta-address encoding and announcement scanning.
//! - **pool** / **note**: a fixed-denomination shielded-note pool whose
//!   membership is an incremental Poseidon Merkle tree, spending gated by a
//!   withdrawal proof plus a nullifier set.
//! - **blindsig** / **threshold** / **coinjoin**: RSA blind signatures, a
//!   Shamir-shared coordinator key and the session state machine that lets a
//!   coordinator sign commitments it cannot read.
//! - **quorum**: Groth16 verification behind a capability trait, with
//!   t-of-n Ed25519 attestation aggregation across verifier nodes.
//!
//! Chain integration (transaction building, RPC, accounts, fees) is
//! deliberately absent; callers inject stores and transports behind the
//! narrow traits in each module.

pub mod blindsig;
pub mod coinjoin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod note;
pub mod pedersen;
pub mod pool;
pub mod quorum;
pub mod stealth;
pub mod threshold;

pub use config::CoreConfig;
pub use crypto::{Fr, MerkleProof, MerkleTree};
pub use error::{CoreError, CoreResult};
