//! Threshold attestations over verified proofs.
//!
//! Every verifier signs the same canonical 72-byte message
//! `proof_hash(32) || public_inputs_hash(32) || timestamp_le(8)` with its
//! Ed25519 key; an attestation is valid once `t` distinct quorum members
//! have signed it and it is younger than the validity window.

use ed25519_dalek::{PublicKey, Signature, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Canonical signing message length.
pub const ATTESTATION_MESSAGE_LEN: usize = 72;

/// Build the canonical signing message.
pub fn attestation_message(
    proof_hash: &[u8; 32],
    public_inputs_hash: &[u8; 32],
    timestamp: i64,
) -> [u8; ATTESTATION_MESSAGE_LEN] {
    let mut message = [0u8; ATTESTATION_MESSAGE_LEN];
    message[..32].copy_from_slice(proof_hash);
    message[32..64].copy_from_slice(public_inputs_hash);
    message[64..].copy_from_slice(&timestamp.to_le_bytes());
    message
}

pub fn proof_hash(proof_bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(proof_bytes).into()
}

/// One verifier's signature over the canonical message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationSignature {
    pub verifier_pubkey: [u8; 32],
    pub signature: [u8; 64],
}

/// A proof-validity statement carrying t-of-n verifier signatures.
#[derive(Clone, Debug)]
pub struct Attestation {
    pub proof_hash: [u8; 32],
    pub public_inputs_hash: [u8; 32],
    pub verified_at: i64,
    pub signatures: Vec<AttestationSignature>,
}

impl Attestation {
    pub fn message(&self) -> [u8; ATTESTATION_MESSAGE_LEN] {
        attestation_message(&self.proof_hash, &self.public_inputs_hash, self.verified_at)
    }

    /// Count the signatures that verify under distinct quorum keys.
    pub fn valid_signature_count(&self, quorum: &[[u8; 32]]) -> usize {
        let message = self.message();
        let mut seen: Vec<[u8; 32]> = Vec::new();
        self.signatures
            .iter()
            .filter(|sig| {
                if !quorum.contains(&sig.verifier_pubkey) || seen.contains(&sig.verifier_pubkey) {
                    return false;
                }
                let Ok(key) = PublicKey::from_bytes(&sig.verifier_pubkey) else {
                    return false;
                };
                let Ok(signature) = Signature::from_bytes(&sig.signature) else {
                    return false;
                };
                if key.verify(&message, &signature).is_ok() {
                    seen.push(sig.verifier_pubkey);
                    true
                } else {
                    false
                }
            })
            .count()
    }

    /// Consumer-side validation: threshold, quorum membership and freshness.
    pub fn verify(
        &self,
        quorum: &[[u8; 32]],
        threshold: usize,
        now: i64,
        validity_window_secs: i64,
    ) -> CoreResult<()> {
        if (now - self.verified_at).abs() > validity_window_secs {
            return Err(CoreError::AttestationExpired);
        }
        if self
            .signatures
            .iter()
            .any(|sig| !quorum.contains(&sig.verifier_pubkey))
        {
            return Err(CoreError::UntrustedVerifier);
        }
        let collected = self.valid_signature_count(quorum);
        if collected < threshold {
            return Err(CoreError::InsufficientSignatures {
                required: threshold,
                collected,
            });
        }
        Ok(())
    }
}

// Wire envelope, matching the documented verifier response shape.

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdInfo {
    pub required: usize,
    pub collected: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSignature {
    pub node_id: String,
    /// Base64 Ed25519 signature.
    pub signature: String,
    /// Base58 verifier public key.
    pub verifier_pubkey: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttestation {
    pub proof_hash: String,
    pub public_inputs_hash: String,
    pub verified_at: i64,
    pub threshold: ThresholdInfo,
    pub signatures: Vec<WireSignature>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<WireAttestation>,
    pub primary_verifier: String,
}

impl Attestation {
    pub fn to_wire(
        &self,
        required: usize,
        node_ids: &[(String, [u8; 32])],
    ) -> WireAttestation {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;
        WireAttestation {
            proof_hash: hex::encode(self.proof_hash),
            public_inputs_hash: hex::encode(self.public_inputs_hash),
            verified_at: self.verified_at,
            threshold: ThresholdInfo {
                required,
                collected: self.signatures.len(),
            },
            signatures: self
                .signatures
                .iter()
                .map(|sig| WireSignature {
                    node_id: node_ids
                        .iter()
                        .find(|(_, key)| *key == sig.verifier_pubkey)
                        .map(|(id, _)| id.clone())
                        .unwrap_or_default(),
                    signature: engine.encode(sig.signature),
                    verifier_pubkey: bs58::encode(&sig.verifier_pubkey).into_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::keys::keypair_from_seed;
    use ed25519_dalek::Signer;

    fn signed_attestation(seeds: &[[u8; 32]]) -> (Attestation, Vec<[u8; 32]>) {
        let proof_hash = [0x11u8; 32];
        let inputs_hash = [0x22u8; 32];
        let verified_at = 1_700_000_000;
        let message = attestation_message(&proof_hash, &inputs_hash, verified_at);

        let mut quorum = Vec::new();
        let signatures = seeds
            .iter()
            .map(|seed| {
                let pair = keypair_from_seed(seed).unwrap();
                quorum.push(pair.public.to_bytes());
                AttestationSignature {
                    verifier_pubkey: pair.public.to_bytes(),
                    signature: pair.sign(&message).to_bytes(),
                }
            })
            .collect();
        (
            Attestation {
                proof_hash,
                public_inputs_hash: inputs_hash,
                verified_at,
                signatures,
            },
            quorum,
        )
    }

    #[test]
    fn message_layout_is_72_bytes() {
        let message = attestation_message(&[1u8; 32], &[2u8; 32], 0x0102030405060708);
        assert_eq!(message.len(), 72);
        assert_eq!(&message[..32], &[1u8; 32]);
        assert_eq!(&message[32..64], &[2u8; 32]);
        // Little-endian timestamp.
        assert_eq!(&message[64..], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn threshold_attestation_verifies() {
        let (attestation, quorum) = signed_attestation(&[[1u8; 32], [2u8; 32]]);
        attestation
            .verify(&quorum, 2, attestation.verified_at + 10, 300)
            .unwrap();
    }

    #[test]
    fn stale_attestations_are_rejected() {
        let (attestation, quorum) = signed_attestation(&[[1u8; 32], [2u8; 32]]);
        assert_eq!(
            attestation.verify(&quorum, 2, attestation.verified_at + 301, 300),
            Err(CoreError::AttestationExpired)
        );
    }

    #[test]
    fn signatures_outside_the_quorum_fail() {
        let (attestation, _) = signed_attestation(&[[1u8; 32], [2u8; 32]]);
        let stranger_quorum = vec![[9u8; 32], [8u8; 32]];
        assert_eq!(
            attestation.verify(&stranger_quorum, 2, attestation.verified_at, 300),
            Err(CoreError::UntrustedVerifier)
        );
    }

    #[test]
    fn duplicate_signers_only_count_once() {
        let (mut attestation, quorum) = signed_attestation(&[[1u8; 32], [2u8; 32]]);
        let dup = attestation.signatures[0].clone();
        attestation.signatures.push(dup);
        assert_eq!(attestation.valid_signature_count(&quorum), 2);
    }

    #[test]
    fn tampered_signature_does_not_count() {
        let (mut attestation, quorum) = signed_attestation(&[[1u8; 32], [2u8; 32]]);
        attestation.signatures[1].signature[0] ^= 0xff;
        assert_eq!(attestation.valid_signature_count(&quorum), 1);
        assert_eq!(
            attestation.verify(&quorum, 2, attestation.verified_at, 300),
            Err(CoreError::InsufficientSignatures {
                required: 2,
                collected: 1
            })
        );
    }
}
