//! Verifier nodes and threshold aggregation.
//!
//! A node checks a proof locally, signs the canonical attestation message,
//! then fans out to its peers in parallel. Peers re-verify independently and
//! sign the same message; only signatures that verify under quorum keys are
//! aggregated. Partial responses merge in any order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Keypair, Signer};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::attestation::{
    attestation_message, proof_hash, Attestation, AttestationSignature, VerifyResponse,
};
use super::proof::{ProofVerifier, PublicInputs};
use crate::error::{CoreError, CoreResult};
use crate::stealth::keys::keypair_from_seed;

/// A proof-verification request as it travels between nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(with = "base64_bytes")]
    pub proof: Vec<u8>,
    pub public_inputs: PublicInputs,
    /// Timestamp every signer commits to, chosen by the primary.
    pub requested_at: i64,
}

/// A peer's signature over the canonical message for one request.
#[derive(Clone, Debug)]
pub struct PartialAttestation {
    pub node_id: String,
    pub verifier_pubkey: [u8; 32],
    pub signature: [u8; 64],
}

/// Transport-agnostic handle to a remote verifier.
#[async_trait]
pub trait PeerVerifier: Send + Sync {
    fn node_id(&self) -> String;
    async fn request_attestation(&self, request: &VerifyRequest) -> CoreResult<PartialAttestation>;
}

pub struct VerifierNode {
    node_id: String,
    keypair: Keypair,
    quorum: Vec<[u8; 32]>,
    threshold: usize,
    validity_window_secs: i64,
    peer_timeout: Duration,
    proof_verifier: Arc<dyn ProofVerifier>,
    peers: Vec<Arc<dyn PeerVerifier>>,
}

impl VerifierNode {
    pub fn new(
        node_id: impl Into<String>,
        signing_seed: &[u8; 32],
        quorum: Vec<[u8; 32]>,
        threshold: usize,
        validity_window_secs: i64,
        proof_verifier: Arc<dyn ProofVerifier>,
    ) -> CoreResult<Self> {
        if threshold == 0 || threshold > quorum.len() {
            return Err(CoreError::MalformedInput(format!(
                "threshold {threshold} out of range for quorum of {}",
                quorum.len()
            )));
        }
        Ok(Self {
            node_id: node_id.into(),
            keypair: keypair_from_seed(signing_seed)?,
            quorum,
            threshold,
            validity_window_secs,
            peer_timeout: Duration::from_secs(10),
            proof_verifier,
            peers: Vec::new(),
        })
    }

    pub fn with_peers(mut self, peers: Vec<Arc<dyn PeerVerifier>>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    fn sign_request(&self, request: &VerifyRequest) -> PartialAttestation {
        let message = attestation_message(
            &proof_hash(&request.proof),
            &request.public_inputs.hash(),
            request.requested_at,
        );
        PartialAttestation {
            node_id: self.node_id.clone(),
            verifier_pubkey: self.public_key(),
            signature: self.keypair.sign(&message).to_bytes(),
        }
    }

    /// What this node runs when a *peer* asks it to co-sign: an independent
    /// re-verification of the proof, then a signature over the peer's message.
    pub fn handle_peer_request(&self, request: &VerifyRequest) -> CoreResult<PartialAttestation> {
        let now = chrono::Utc::now().timestamp();
        if (now - request.requested_at).abs() > self.validity_window_secs {
            return Err(CoreError::Timeout);
        }
        if !self
            .proof_verifier
            .verify(&request.proof, &request.public_inputs)?
        {
            return Err(CoreError::InvalidProof);
        }
        debug!(node = %self.node_id, "co-signing peer attestation request");
        Ok(self.sign_request(request))
    }

    /// Primary flow: verify locally, sign, gather peer signatures, aggregate.
    pub async fn verify_and_attest(
        &self,
        proof: Vec<u8>,
        public_inputs: PublicInputs,
    ) -> CoreResult<Attestation> {
        self.attest_with_ids(proof, public_inputs)
            .await
            .map(|(attestation, _)| attestation)
    }

    async fn attest_with_ids(
        &self,
        proof: Vec<u8>,
        public_inputs: PublicInputs,
    ) -> CoreResult<(Attestation, Vec<(String, [u8; 32])>)> {
        if !self.proof_verifier.verify(&proof, &public_inputs)? {
            return Err(CoreError::InvalidProof);
        }

        let request = VerifyRequest {
            proof,
            public_inputs,
            requested_at: chrono::Utc::now().timestamp(),
        };
        let local = self.sign_request(&request);

        let responses = join_all(self.peers.iter().map(|peer| {
            let request = &request;
            async move {
                match tokio::time::timeout(self.peer_timeout, peer.request_attestation(request))
                    .await
                {
                    Ok(result) => (peer.node_id(), result),
                    Err(_) => (peer.node_id(), Err(CoreError::Timeout)),
                }
            }
        }))
        .await;

        let mut attestation = Attestation {
            proof_hash: proof_hash(&request.proof),
            public_inputs_hash: request.public_inputs.hash(),
            verified_at: request.requested_at,
            signatures: vec![AttestationSignature {
                verifier_pubkey: local.verifier_pubkey,
                signature: local.signature,
            }],
        };
        let mut node_ids = vec![(self.node_id.clone(), local.verifier_pubkey)];

        for (peer_id, response) in responses {
            match response {
                Ok(partial) => {
                    attestation.signatures.push(AttestationSignature {
                        verifier_pubkey: partial.verifier_pubkey,
                        signature: partial.signature,
                    });
                    node_ids.push((partial.node_id, partial.verifier_pubkey));
                }
                Err(err) => {
                    warn!(peer = %peer_id, %err, "peer attestation unavailable");
                }
            }
        }

        // Keep only signatures that actually verify under quorum keys.
        let collected = attestation.valid_signature_count(&self.quorum);
        if collected < self.threshold {
            return Err(CoreError::InsufficientSignatures {
                required: self.threshold,
                collected,
            });
        }
        let message = attestation.message();
        attestation
            .signatures
            .retain(|sig| verifies(sig, &message) && self.quorum.contains(&sig.verifier_pubkey));
        node_ids.retain(|(_, key)| attestation.signatures.iter().any(|s| s.verifier_pubkey == *key));

        info!(
            node = %self.node_id,
            collected,
            required = self.threshold,
            "threshold attestation assembled"
        );
        Ok((attestation, node_ids))
    }

    /// The JSON envelope handed back to clients.
    pub async fn respond(&self, proof: Vec<u8>, public_inputs: PublicInputs) -> VerifyResponse {
        match self.attest_with_ids(proof, public_inputs).await {
            Ok((attestation, node_ids)) => VerifyResponse {
                valid: true,
                attestation: Some(attestation.to_wire(self.threshold, &node_ids)),
                primary_verifier: self.node_id.clone(),
            },
            Err(err) => {
                warn!(node = %self.node_id, %err, "verification request rejected");
                VerifyResponse {
                    valid: false,
                    attestation: None,
                    primary_verifier: self.node_id.clone(),
                }
            }
        }
    }
}

fn verifies(sig: &AttestationSignature, message: &[u8]) -> bool {
    use ed25519_dalek::{PublicKey, Signature, Verifier};
    let Ok(key) = PublicKey::from_bytes(&sig.verifier_pubkey) else {
        return false;
    };
    let Ok(signature) = Signature::from_bytes(&sig.signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

/// A quorum member reachable in-process; useful for local deployments and
/// tests. Real deployments put an HTTP/RPC client behind `PeerVerifier`.
pub struct InProcessPeer {
    node: Arc<VerifierNode>,
}

impl InProcessPeer {
    pub fn new(node: Arc<VerifierNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl PeerVerifier for InProcessPeer {
    fn node_id(&self) -> String {
        self.node.node_id().to_string()
    }

    async fn request_attestation(&self, request: &VerifyRequest) -> CoreResult<PartialAttestation> {
        self.node.handle_peer_request(request)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}
