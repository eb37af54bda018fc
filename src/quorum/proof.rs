//! Proof-system capability interface and the Groth16 backend.
//!
//! The pool and the verifier quorum only ever see `ProofVerifier`; circuit
//! selection stays behind this seam so test doubles and future proof systems
//! plug in without touching callers.

use ark_bn254::{Bn254, Fr as CircuitField};
use ark_ff::PrimeField;
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Which circuit a proof claims to satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitKind {
    Deposit,
    Withdraw,
}

/// Public inputs, canonicalized per circuit.
///
/// The byte layout is part of the verifier contract: the same tuple must
/// always hash to the same 32 bytes, across nodes and restarts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "circuit", rename_all = "camelCase")]
pub enum PublicInputs {
    #[serde(rename_all = "camelCase")]
    Deposit {
        #[serde(with = "hex_bytes32")]
        commitment: [u8; 32],
    },
    #[serde(rename_all = "camelCase")]
    Withdraw {
        #[serde(with = "hex_bytes32")]
        merkle_root: [u8; 32],
        #[serde(with = "hex_bytes32")]
        nullifier_hash: [u8; 32],
        #[serde(with = "hex_bytes32")]
        recipient: [u8; 32],
        amount: u64,
    },
}

impl PublicInputs {
    pub fn circuit(&self) -> CircuitKind {
        match self {
            PublicInputs::Deposit { .. } => CircuitKind::Deposit,
            PublicInputs::Withdraw { .. } => CircuitKind::Withdraw,
        }
    }

    /// Fixed-layout encoding fed to hashing and field-element conversion.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            PublicInputs::Deposit { commitment } => commitment.to_vec(),
            PublicInputs::Withdraw {
                merkle_root,
                nullifier_hash,
                recipient,
                amount,
            } => {
                let mut bytes = Vec::with_capacity(32 * 3 + 8);
                bytes.extend_from_slice(merkle_root);
                bytes.extend_from_slice(nullifier_hash);
                bytes.extend_from_slice(recipient);
                bytes.extend_from_slice(&amount.to_le_bytes());
                bytes
            }
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_bytes()).into()
    }

    /// The inputs as BN254 scalars, in circuit order.
    pub fn to_field_elements(&self) -> Vec<CircuitField> {
        match self {
            PublicInputs::Deposit { commitment } => {
                vec![CircuitField::from_le_bytes_mod_order(commitment)]
            }
            PublicInputs::Withdraw {
                merkle_root,
                nullifier_hash,
                recipient,
                amount,
            } => vec![
                CircuitField::from_le_bytes_mod_order(merkle_root),
                CircuitField::from_le_bytes_mod_order(nullifier_hash),
                CircuitField::from_le_bytes_mod_order(recipient),
                CircuitField::from(*amount),
            ],
        }
    }
}

/// Minimal capability a proof system must offer.
pub trait ProofVerifier: Send + Sync {
    /// `Ok(true)` iff `proof_bytes` verifies for `public_inputs` under the
    /// circuit's verification key. Malformed proofs are an error, not false.
    fn verify(&self, proof_bytes: &[u8], public_inputs: &PublicInputs) -> CoreResult<bool>;
}

/// Groth16 over BN254, one verification key per circuit.
pub struct Groth16Verifier {
    deposit_vk: PreparedVerifyingKey<Bn254>,
    withdraw_vk: PreparedVerifyingKey<Bn254>,
}

impl Groth16Verifier {
    /// Build from compressed arkworks-serialized verification keys.
    pub fn from_vk_bytes(deposit_vk: &[u8], withdraw_vk: &[u8]) -> CoreResult<Self> {
        let parse = |bytes: &[u8]| -> CoreResult<PreparedVerifyingKey<Bn254>> {
            let vk = VerifyingKey::<Bn254>::deserialize_compressed(bytes)
                .map_err(|e| CoreError::MalformedInput(format!("bad verification key: {e}")))?;
            Ok(prepare_verifying_key(&vk))
        };
        Ok(Self {
            deposit_vk: parse(deposit_vk)?,
            withdraw_vk: parse(withdraw_vk)?,
        })
    }

    pub fn from_prepared(
        deposit_vk: PreparedVerifyingKey<Bn254>,
        withdraw_vk: PreparedVerifyingKey<Bn254>,
    ) -> Self {
        Self {
            deposit_vk,
            withdraw_vk,
        }
    }
}

impl ProofVerifier for Groth16Verifier {
    fn verify(&self, proof_bytes: &[u8], public_inputs: &PublicInputs) -> CoreResult<bool> {
        let proof = Proof::<Bn254>::deserialize_compressed(proof_bytes)
            .map_err(|e| CoreError::MalformedInput(format!("bad proof encoding: {e}")))?;
        let vk = match public_inputs.circuit() {
            CircuitKind::Deposit => &self.deposit_vk,
            CircuitKind::Withdraw => &self.withdraw_vk,
        };
        Groth16::<Bn254>::verify_proof(vk, &proof, &public_inputs.to_field_elements())
            .map_err(|_| CoreError::InvalidProof)
    }
}

/// Verifier that accepts a registered set of (proof, inputs) digests.
///
/// Stands in for a real circuit in tests and development, the way the
/// source's dev mode skipped pairing checks; never deploy it.
#[derive(Default)]
pub struct AllowlistVerifier {
    accepted: Vec<([u8; 32], [u8; 32])>,
}

impl AllowlistVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, proof_bytes: &[u8], public_inputs: &PublicInputs) {
        self.accepted
            .push((Sha256::digest(proof_bytes).into(), public_inputs.hash()));
    }
}

impl ProofVerifier for AllowlistVerifier {
    fn verify(&self, proof_bytes: &[u8], public_inputs: &PublicInputs) -> CoreResult<bool> {
        if proof_bytes.is_empty() {
            return Err(CoreError::MalformedInput("empty proof".into()));
        }
        let digest: [u8; 32] = Sha256::digest(proof_bytes).into();
        let inputs = public_inputs.hash();
        Ok(self
            .accepted
            .iter()
            .any(|(p, i)| *p == digest && *i == inputs))
    }
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes of hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn withdraw_inputs() -> PublicInputs {
        PublicInputs::Withdraw {
            merkle_root: [1u8; 32],
            nullifier_hash: [2u8; 32],
            recipient: [3u8; 32],
            amount: 10,
        }
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let inputs = withdraw_inputs();
        assert_eq!(inputs.canonical_bytes(), inputs.canonical_bytes());
        assert_eq!(inputs.canonical_bytes().len(), 104);
        assert_eq!(inputs.hash(), inputs.hash());
    }

    #[test]
    fn canonical_bytes_bind_every_field() {
        let base = withdraw_inputs();
        let variants = [
            PublicInputs::Withdraw {
                merkle_root: [9u8; 32],
                nullifier_hash: [2u8; 32],
                recipient: [3u8; 32],
                amount: 10,
            },
            PublicInputs::Withdraw {
                merkle_root: [1u8; 32],
                nullifier_hash: [9u8; 32],
                recipient: [3u8; 32],
                amount: 10,
            },
            PublicInputs::Withdraw {
                merkle_root: [1u8; 32],
                nullifier_hash: [2u8; 32],
                recipient: [3u8; 32],
                amount: 11,
            },
        ];
        for variant in variants {
            assert_ne!(base.hash(), variant.hash());
        }
    }

    #[test]
    fn public_inputs_json_round_trip() {
        let inputs = withdraw_inputs();
        let json = serde_json::to_string(&inputs).unwrap();
        assert!(json.contains("\"circuit\":\"withdraw\""));
        assert!(json.contains("merkleRoot"));
        let back: PublicInputs = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inputs);
    }

    #[test]
    fn unknown_circuit_tags_are_rejected() {
        let json = r#"{"circuit":"mint","commitment":"00"}"#;
        assert!(serde_json::from_str::<PublicInputs>(json).is_err());
    }

    #[test]
    fn allowlist_verifier_distinguishes_proofs() {
        let mut verifier = AllowlistVerifier::new();
        let inputs = withdraw_inputs();
        verifier.allow(b"good proof", &inputs);

        assert!(verifier.verify(b"good proof", &inputs).unwrap());
        assert!(!verifier.verify(b"bad proof", &inputs).unwrap());
        assert!(!verifier
            .verify(
                b"good proof",
                &PublicInputs::Deposit {
                    commitment: [7u8; 32]
                }
            )
            .unwrap());
        assert!(verifier.verify(b"", &inputs).is_err());
    }
}
