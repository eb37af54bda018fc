//! Shamir secret sharing of an RSA private exponent, with partial
//! signatures and Lagrange recombination.
//!
//! Sharing runs over a fixed 256-bit prime field P (the secp256k1 group
//! order). Note that P is smaller than the private exponent of a 2048-bit
//! key, and partial-signature combination treats Lagrange coefficients as
//! plain integers over the RSA modulus rather than residues mod lambda(n);
//! both are carried over from the source design as placeholders and recorded
//! in DESIGN.md. The splitting itself is a trusted-dealer step, not DKG.

use lazy_static::lazy_static;
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::Zero;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::blindsig::RsaPublicKey;
use crate::crypto::field::{mod_inverse, mod_signed};
use crate::error::{CoreError, CoreResult};

lazy_static! {
    /// The sharing field modulus: the secp256k1 group order.
    pub static ref SHARE_MODULUS: BigUint = BigUint::parse_bytes(
        b"fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
        16,
    )
    .expect("modulus literal");
}

/// One shareholder's piece of the private exponent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyShare {
    /// Evaluation point, 1-based.
    pub index: u32,
    share: BigUint,
    /// The RSA public key the shared exponent belongs to.
    pub public_key: RsaPublicKey,
    /// SHA256(index_be || share_be), for share integrity checks.
    pub share_hash: [u8; 32],
}

impl KeyShare {
    /// Partial signature over the RSA modulus: m^{s_i} mod n.
    pub fn partial_sign(&self, message: &BigUint) -> CoreResult<PartialSignature> {
        if message >= &self.public_key.n {
            return Err(CoreError::MalformedInput(
                "message must be reduced mod n".into(),
            ));
        }
        Ok(PartialSignature {
            index: self.index,
            value: message.modpow(&self.share, &self.public_key.n),
        })
    }

    pub fn verify_integrity(&self) -> bool {
        self.share_hash == share_hash(self.index, &self.share)
    }

    pub(crate) fn share_value(&self) -> &BigUint {
        &self.share
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialSignature {
    pub index: u32,
    pub value: BigUint,
}

fn share_hash(index: u32, share: &BigUint) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(index.to_be_bytes());
    hasher.update(share.to_bytes_be());
    hasher.finalize().into()
}

fn check_threshold(t: usize, n: usize) -> CoreResult<()> {
    if t < 2 || t > n {
        return Err(CoreError::MalformedInput(format!(
            "threshold must satisfy 2 <= t <= n, got t={t} n={n}"
        )));
    }
    Ok(())
}

/// Split `secret` into n shares with threshold t.
///
/// Draws t-1 uniform coefficients, sets f(0) = secret and hands out
/// (i, f(i) mod P) for i in 1..=n. Secrets at or above P are reduced; any
/// t shares then reconstruct `secret mod P`.
pub fn split_secret(
    secret: &BigUint,
    t: usize,
    n: usize,
    public_key: &RsaPublicKey,
) -> CoreResult<Vec<KeyShare>> {
    check_threshold(t, n)?;
    let mut rng = OsRng;
    let mut coefficients = Vec::with_capacity(t);
    coefficients.push(secret % &*SHARE_MODULUS);
    for _ in 1..t {
        coefficients.push(rng.gen_biguint_below(&SHARE_MODULUS));
    }

    let shares = (1..=n as u32)
        .map(|index| {
            // Horner evaluation of f at `index`, mod P.
            let x = BigUint::from(index);
            let mut acc = BigUint::zero();
            for coefficient in coefficients.iter().rev() {
                acc = (acc * &x + coefficient) % &*SHARE_MODULUS;
            }
            KeyShare {
                index,
                share_hash: share_hash(index, &acc),
                share: acc,
                public_key: public_key.clone(),
            }
        })
        .collect();
    Ok(shares)
}

/// Lagrange basis polynomial L_i evaluated at zero, over the sharing field.
fn lagrange_at_zero(indices: &[u32], i: u32) -> CoreResult<BigUint> {
    let mut numerator = BigInt::from(1);
    let mut denominator = BigInt::from(1);
    for &j in indices {
        if j == i {
            continue;
        }
        numerator *= -BigInt::from(j);
        denominator *= BigInt::from(i as i64) - BigInt::from(j as i64);
    }
    let numerator = mod_signed(&numerator, &SHARE_MODULUS);
    let denominator = mod_signed(&denominator, &SHARE_MODULUS);
    let inv = mod_inverse(&denominator, &SHARE_MODULUS)?;
    Ok((numerator * inv) % &*SHARE_MODULUS)
}

/// Reconstruct the secret (mod P) from at least `t` distinct shares.
pub fn reconstruct_secret(shares: &[KeyShare], t: usize) -> CoreResult<BigUint> {
    if shares.len() < t {
        return Err(CoreError::MalformedInput(format!(
            "need {t} shares, got {}",
            shares.len()
        )));
    }
    let subset = &shares[..t];
    let indices: Vec<u32> = subset.iter().map(|s| s.index).collect();
    {
        let mut seen = indices.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != indices.len() {
            return Err(CoreError::MalformedInput("duplicate share indices".into()));
        }
    }

    let mut secret = BigUint::zero();
    for share in subset {
        let coefficient = lagrange_at_zero(&indices, share.index)?;
        secret = (secret + share.share_value() * coefficient) % &*SHARE_MODULUS;
    }
    Ok(secret)
}

/// Combine partial signatures: product of sigma_i^{L_i(0)} over the RSA
/// modulus, with Lagrange coefficients taken as integers.
///
/// Exponents would need to combine mod lambda(n) for this to be a complete
/// threshold-RSA scheme; the result is the source's approximation and is
/// validated against the equivalent integer exponent, not against RSA
/// verification.
pub fn combine_partial_signatures(
    partials: &[PartialSignature],
    t: usize,
    rsa_n: &BigUint,
) -> CoreResult<BigUint> {
    if partials.len() < t {
        return Err(CoreError::InsufficientSignatures {
            required: t,
            collected: partials.len(),
        });
    }
    let subset = &partials[..t];
    let indices: Vec<u32> = subset.iter().map(|p| p.index).collect();

    let mut combined = BigUint::from(1u8);
    for partial in subset {
        let coefficient = lagrange_at_zero(&indices, partial.index)?;
        combined = (combined * partial.value.modpow(&coefficient, rsa_n)) % rsa_n;
    }
    Ok(combined)
}
