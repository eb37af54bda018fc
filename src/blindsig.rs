//! RSA blind signatures for CoinJoin coordination.
//!
//! The coordinator signs blinded commitments it cannot read: a participant
//! blinds `m` with `m * r^e mod n`, the coordinator raises to `d`, and the
//! participant strips `r`. Message preparation is `SHA256(msg) mod n` with no
//! full-domain padding; see DESIGN.md for the recorded weakness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::crypto::field::{gcd, mod_inverse};

/// Public exponent, fixed at 65537.
pub const RSA_PUBLIC_EXPONENT: u64 = 65537;

/// Minimum modulus size accepted by key generation.
pub const RSA_MIN_BITS: usize = 2048;

/// Prime-pair attempts before keygen gives up.
const KEYGEN_MAX_ATTEMPTS: usize = 100;

/// Candidate draws inside a single prime search.
const PRIME_MAX_CANDIDATES: usize = 100_000;

/// Trial-division table: the first 60 primes.
const SMALL_PRIMES: [u32; 60] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251, 257, 263, 269, 271, 277, 281,
];

/// Cooperative cancellation for long-running key generation.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub n: BigUint,
    pub e: BigUint,
}

#[derive(Serialize, Deserialize)]
struct RsaPublicKeyWire {
    n: String,
    e: String,
}

impl Serialize for RsaPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RsaPublicKeyWire {
            n: self.n.to_str_radix(10),
            e: self.e.to_str_radix(10),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RsaPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = RsaPublicKeyWire::deserialize(deserializer)?;
        let parse = |s: &str| {
            BigUint::parse_bytes(s.as_bytes(), 10)
                .ok_or_else(|| serde::de::Error::custom("expected a decimal integer"))
        };
        Ok(RsaPublicKey {
            n: parse(&wire.n)?,
            e: parse(&wire.e)?,
        })
    }
}

/// Full RSA key. Prime factors and the private exponent never leave the
/// owning process; the type deliberately offers no serialization.
pub struct RsaPrivateKey {
    public: RsaPublicKey,
    d: BigUint,
    p: BigUint,
    q: BigUint,
}

impl RsaPrivateKey {
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The private exponent, exposed for trusted-dealer secret sharing.
    pub fn private_exponent(&self) -> &BigUint {
        &self.d
    }

    /// m^d mod n via Garner's CRT recombination over the prime factors.
    fn sign_raw(&self, m: &BigUint) -> CoreResult<BigUint> {
        let dp = &self.d % (&self.p - 1u32);
        let dq = &self.d % (&self.q - 1u32);
        let m1 = m.modpow(&dp, &self.p);
        let m2 = m.modpow(&dq, &self.q);
        let q_inv = mod_inverse(&(&self.q % &self.p), &self.p)?;
        let h = ((&m1 + &self.p - (&m2 % &self.p)) * q_inv) % &self.p;
        Ok(&m2 + &self.q * h)
    }
}

/// Generate an RSA keypair with default Miller-Rabin confidence.
pub fn generate_keypair(bits: usize) -> CoreResult<RsaPrivateKey> {
    generate_keypair_with(bits, 64, &CancelToken::new())
}

/// Generate an RSA keypair.
///
/// Primes are drawn at `bits/2` with top and bottom bits forced, screened by
/// trial division and `mr_iterations` rounds of Miller-Rabin. Pairs with
/// p = q, |p - q| < 2^(bits/2 - 100) or a too-small product are rejected.
/// Checks `cancel` between candidates and holds no locks while searching.
pub fn generate_keypair_with(
    bits: usize,
    mr_iterations: usize,
    cancel: &CancelToken,
) -> CoreResult<RsaPrivateKey> {
    if bits < RSA_MIN_BITS {
        return Err(CoreError::MalformedInput(format!(
            "RSA modulus must be at least {RSA_MIN_BITS} bits, got {bits}"
        )));
    }
    let half = bits / 2;
    let e = BigUint::from(RSA_PUBLIC_EXPONENT);
    let min_prime_distance = BigUint::one() << (half - 100);

    for attempt in 0..KEYGEN_MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let p = random_prime(half, mr_iterations, cancel)?;
        let q = random_prime(half, mr_iterations, cancel)?;
        if p == q {
            continue;
        }
        let distance = if p > q { &p - &q } else { &q - &p };
        if distance < min_prime_distance {
            continue;
        }
        let (p, q) = if p > q { (p, q) } else { (q, p) };

        let n = &p * &q;
        if (n.bits() as usize) < bits {
            continue;
        }

        let p1 = &p - 1u32;
        let q1 = &q - 1u32;
        let lambda = (&p1 * &q1) / p1.gcd(&q1);
        if !gcd(&e, &lambda).is_one() {
            continue;
        }
        let d = mod_inverse(&e, &lambda)?;
        if !((&e * &d) % &lambda).is_one() {
            continue;
        }

        debug!(attempt, bits = n.bits(), "RSA keypair generated");
        return Ok(RsaPrivateKey {
            public: RsaPublicKey { n, e },
            d,
            p,
            q,
        });
    }
    Err(CoreError::KeyGenExhausted)
}

fn random_prime(bits: usize, mr_iterations: usize, cancel: &CancelToken) -> CoreResult<BigUint> {
    let mut rng = OsRng;
    for _ in 0..PRIME_MAX_CANDIDATES {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let mut candidate = rng.gen_biguint(bits as u64);
        candidate.set_bit(bits as u64 - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, mr_iterations) {
            return Ok(candidate);
        }
    }
    Err(CoreError::KeyGenExhausted)
}

/// Trial division against the first 60 primes, then Miller-Rabin.
pub fn is_probable_prime(n: &BigUint, iterations: usize) -> bool {
    for &small in SMALL_PRIMES.iter() {
        let small = BigUint::from(small);
        if n == &small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }
    if n < &BigUint::from(2u8) {
        return false;
    }

    // n - 1 = d * 2^s with d odd.
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = OsRng;
    let two = BigUint::from(2u8);
    'witness: for _ in 0..iterations {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Reduce an arbitrary message to a signable residue: SHA256(msg) mod n.
pub fn hash_to_rsa(message: &[u8], n: &BigUint) -> BigUint {
    let digest = Sha256::digest(message);
    BigUint::from_bytes_be(&digest) % n
}

/// Blind `message` with a fresh random factor; returns (blinded, r).
pub fn blind(message: &BigUint, public_key: &RsaPublicKey) -> CoreResult<(BigUint, BigUint)> {
    let two = BigUint::from(2u8);
    let mut rng = OsRng;
    for _ in 0..128 {
        let r = rng.gen_biguint_range(&two, &public_key.n);
        if gcd(&r, &public_key.n).is_one() {
            let blinded = blind_with(message, public_key, &r)?;
            return Ok((blinded, r));
        }
    }
    // Only reachable if n is riddled with small factors.
    Err(CoreError::NotInvertible)
}

/// Blind with a caller-supplied factor: message * r^e mod n.
pub fn blind_with(
    message: &BigUint,
    public_key: &RsaPublicKey,
    r: &BigUint,
) -> CoreResult<BigUint> {
    if message >= &public_key.n {
        return Err(CoreError::MalformedInput(
            "message must be reduced mod n".into(),
        ));
    }
    if !gcd(r, &public_key.n).is_one() {
        return Err(CoreError::NotInvertible);
    }
    Ok((message * r.modpow(&public_key.e, &public_key.n)) % &public_key.n)
}

/// Coordinator side: blinded^d mod n.
pub fn sign_blinded(blinded: &BigUint, key: &RsaPrivateKey) -> CoreResult<BigUint> {
    if blinded.is_zero() || blinded >= &key.public.n {
        return Err(CoreError::MalformedInput(
            "blinded message out of range".into(),
        ));
    }
    key.sign_raw(blinded)
}

/// Strip the blinding factor: blinded_sig * r^-1 mod n.
pub fn unblind(blinded_sig: &BigUint, r: &BigUint, n: &BigUint) -> CoreResult<BigUint> {
    let r_inv = mod_inverse(r, n)?;
    Ok((blinded_sig * r_inv) % n)
}

/// Check `signature^e mod n == message`, in constant time over the hex form.
pub fn verify(message: &BigUint, signature: &BigUint, public_key: &RsaPublicKey) -> bool {
    if signature.is_zero() || signature >= &public_key.n {
        return false;
    }
    let recovered = signature.modpow(&public_key.e, &public_key.n);
    let width = (public_key.n.bits() as usize + 3) / 4;
    let lhs = format!("{:0>width$}", recovered.to_str_radix(16));
    let rhs = format!("{:0>width$}", message.to_str_radix(16));
    lhs.as_bytes().ct_eq(rhs.as_bytes()).into()
}

#[cfg(test)]
pub(crate) fn keypair_from_primes(p: u64, q: u64) -> RsaPrivateKey {
    let p = BigUint::from(p);
    let q = BigUint::from(q);
    let n = &p * &q;
    let e = BigUint::from(RSA_PUBLIC_EXPONENT);
    let p1 = &p - 1u32;
    let q1 = &q - 1u32;
    let lambda = (&p1 * &q1) / p1.gcd(&q1);
    let d = mod_inverse(&e, &lambda).expect("e coprime to lambda");
    RsaPrivateKey {
        public: RsaPublicKey { n, e },
        d,
        p,
        q,
    }
}
