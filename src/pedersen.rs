//! Pedersen commitments on secp256k1, with the range-proof placeholder.
//!
//! C = v*G + r*H, where H is a deterministic second generator obtained by
//! hashing a fixed label to a scalar and multiplying the base point. Nobody
//! knows log_G(H)'s preimage relation beyond the label, which is all the
//! binding this construction claims.
//!
//! The "range proof" here is a SHA-256-tagged 128-byte blob carried over
//! from the source design. It binds the blob to the commitment and nothing
//! more; it does NOT prove a range. Replace with a real Bulletproof before
//! relying on amount hiding (recorded in DESIGN.md).

use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::Field;
use k256::{EncodedPoint, ProjectivePoint, Scalar, U256};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

const H_GENERATOR_LABEL: &[u8] = b"stealth_pedersen_h_v1";
const RANGE_PROOF_LABEL: &[u8] = b"stealth_range_v1";

/// Serialized compressed-SEC1 length.
pub const COMMITMENT_LEN: usize = 33;

/// Placeholder range-proof blob length.
pub const RANGE_PROOF_LEN: usize = 128;

lazy_static! {
    static ref H_GENERATOR: ProjectivePoint = {
        let digest = Sha256::digest(H_GENERATOR_LABEL);
        let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&digest);
        ProjectivePoint::GENERATOR * scalar
    };
}

/// A compressed Pedersen commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PedersenCommitment(pub [u8; COMMITMENT_LEN]);

impl PedersenCommitment {
    fn from_point(point: &ProjectivePoint) -> Self {
        let encoded = point.to_affine().to_encoded_point(true);
        let mut bytes = [0u8; COMMITMENT_LEN];
        bytes.copy_from_slice(encoded.as_bytes());
        Self(bytes)
    }

    fn to_point(self) -> CoreResult<ProjectivePoint> {
        let encoded = EncodedPoint::from_bytes(self.0)
            .map_err(|_| CoreError::MalformedInput("bad SEC1 encoding".into()))?;
        Option::<ProjectivePoint>::from(ProjectivePoint::from_encoded_point(&encoded))
            .ok_or(CoreError::NonCanonicalPoint)
    }
}

/// Fresh uniform blinding factor.
pub fn random_blinding() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// C = value*G + blinding*H.
pub fn commit(value: u64, blinding: &Scalar) -> PedersenCommitment {
    let point = ProjectivePoint::GENERATOR * Scalar::from(value) + *H_GENERATOR * blinding;
    PedersenCommitment::from_point(&point)
}

/// Check an opening (value, blinding) against a commitment.
pub fn verify(commitment: &PedersenCommitment, value: u64, blinding: &Scalar) -> bool {
    commit(value, blinding) == *commitment
}

/// Homomorphic addition: commit(a, r) + commit(b, s) = commit(a + b, r + s).
pub fn add(
    left: &PedersenCommitment,
    right: &PedersenCommitment,
) -> CoreResult<PedersenCommitment> {
    let sum = left.to_point()? + right.to_point()?;
    Ok(PedersenCommitment::from_point(&sum))
}

/// The placeholder range proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeProof(pub [u8; RANGE_PROOF_LEN]);

/// Produce the tagged blob for (value, blinding).
///
/// Layout: nonce(32) || padding(64) || tag(32), where the tag commits to the
/// commitment, the nonce and the padding.
pub fn prove_range(value: u64, blinding: &Scalar) -> RangeProof {
    let commitment = commit(value, blinding);

    let mut hasher = Sha256::new();
    hasher.update(RANGE_PROOF_LABEL);
    hasher.update(b"nonce");
    hasher.update(value.to_le_bytes());
    hasher.update(blinding.to_bytes());
    let nonce: [u8; 32] = hasher.finalize().into();

    let mut padding = [0u8; 64];
    let pad_lo: [u8; 32] = Sha256::new()
        .chain_update(RANGE_PROOF_LABEL)
        .chain_update(b"pad0")
        .chain_update(nonce)
        .finalize()
        .into();
    let pad_hi: [u8; 32] = Sha256::new()
        .chain_update(RANGE_PROOF_LABEL)
        .chain_update(b"pad1")
        .chain_update(nonce)
        .finalize()
        .into();
    padding[..32].copy_from_slice(&pad_lo);
    padding[32..].copy_from_slice(&pad_hi);

    let tag = range_tag(&commitment, &nonce, &padding);

    let mut blob = [0u8; RANGE_PROOF_LEN];
    blob[..32].copy_from_slice(&nonce);
    blob[32..96].copy_from_slice(&padding);
    blob[96..].copy_from_slice(&tag);
    RangeProof(blob)
}

/// Recompute the internal tag; reject anything that does not match.
pub fn verify_range(commitment: &PedersenCommitment, proof: &RangeProof) -> bool {
    let nonce: [u8; 32] = proof.0[..32].try_into().expect("fixed layout");
    let padding: [u8; 64] = proof.0[32..96].try_into().expect("fixed layout");
    let tag: [u8; 32] = proof.0[96..].try_into().expect("fixed layout");
    range_tag(commitment, &nonce, &padding) == tag
}

fn range_tag(commitment: &PedersenCommitment, nonce: &[u8; 32], padding: &[u8; 64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(RANGE_PROOF_LABEL);
    hasher.update(b"tag");
    hasher.update(commitment.0);
    hasher.update(nonce);
    hasher.update(padding);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_opens_only_with_its_blinding() {
        let r = random_blinding();
        let c = commit(10, &r);
        assert!(verify(&c, 10, &r));
        assert!(!verify(&c, 11, &r));
        assert!(!verify(&c, 10, &random_blinding()));
    }

    #[test]
    fn h_is_not_the_base_point() {
        let r = Scalar::ONE;
        // commit(0, 1) = H, commit(1, 0) = G; they must differ.
        assert_ne!(commit(0, &r), commit(1, &Scalar::ZERO));
    }

    #[test]
    fn commitments_are_homomorphic() {
        let r1 = random_blinding();
        let r2 = random_blinding();
        let c1 = commit(3, &r1);
        let c2 = commit(4, &r2);
        let sum = add(&c1, &c2).unwrap();
        assert!(verify(&sum, 7, &(r1 + r2)));
    }

    #[test]
    fn commitments_hide_the_value() {
        // Same value, different blinding: unequal commitments.
        assert_ne!(
            commit(5, &random_blinding()),
            commit(5, &random_blinding())
        );
    }

    #[test]
    fn range_proof_round_trip_and_tamper_detection() {
        let r = random_blinding();
        let c = commit(42, &r);
        let proof = prove_range(42, &r);
        assert!(verify_range(&c, &proof));

        let mut tampered = proof.clone();
        tampered.0[0] ^= 1;
        assert!(!verify_range(&c, &tampered));

        // Proof does not transfer to a different commitment.
        let other = commit(43, &r);
        assert!(!verify_range(&other, &proof));
    }

    #[test]
    fn malformed_commitments_fail_to_decode() {
        let garbage = PedersenCommitment([0xAB; COMMITMENT_LEN]);
        assert!(add(&garbage, &garbage).is_err());
    }
}
