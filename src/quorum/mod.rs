pub mod attestation;
pub mod node;
pub mod proof;

pub use attestation::{
    attestation_message, proof_hash, Attestation, AttestationSignature, VerifyResponse,
    WireAttestation, ATTESTATION_MESSAGE_LEN,
};
pub use node::{InProcessPeer, PartialAttestation, PeerVerifier, VerifierNode, VerifyRequest};
pub use proof::{AllowlistVerifier, CircuitKind, Groth16Verifier, ProofVerifier, PublicInputs};
