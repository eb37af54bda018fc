//! Scalar-field arithmetic for BN254 plus the integer helpers RSA needs.
//!
//! All big-number work in the crate routes through `num-bigint`; hash inputs,
//! Merkle nodes and note material are `Fr` values that stay fully reduced
//! modulo the BN254 scalar prime.

use lazy_static::lazy_static;
use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

lazy_static! {
    /// BN254 scalar field modulus:
    /// 21888242871839275222246405745257275088548364400416034343698204186575808495617
    pub static ref FR_MODULUS: BigUint = BigUint::parse_bytes(
        b"30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001",
        16,
    )
    .expect("modulus literal");
}

/// A fully-reduced element of the BN254 scalar field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fr(BigUint);

impl Fr {
    pub fn zero() -> Self {
        Fr(BigUint::zero())
    }

    pub fn one() -> Self {
        Fr(BigUint::one())
    }

    pub fn from_u64(value: u64) -> Self {
        Fr(BigUint::from(value))
    }

    /// Reduce an arbitrary integer into the field.
    pub fn from_biguint(value: BigUint) -> Self {
        Fr(value % &*FR_MODULUS)
    }

    /// Interpret 32 little-endian bytes, reducing mod p.
    pub fn from_bytes_le(bytes: &[u8; 32]) -> Self {
        Self::from_biguint(BigUint::from_bytes_le(bytes))
    }

    /// Interpret four little-endian u64 limbs, reducing mod p.
    pub fn from_limbs(limbs: &[u64; 4]) -> Self {
        let mut bytes = [0u8; 32];
        for (i, limb) in limbs.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }
        Self::from_bytes_le(&bytes)
    }

    /// Fixed-width little-endian encoding.
    pub fn to_bytes_le(&self) -> [u8; 32] {
        let raw = self.0.to_bytes_le();
        let mut bytes = [0u8; 32];
        bytes[..raw.len()].copy_from_slice(&raw);
        bytes
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Uniform field element from OS entropy.
    pub fn random() -> Self {
        Fr(OsRng.gen_biguint_below(&FR_MODULUS))
    }

    /// Field element from 31 random bytes (248 bits, always below p).
    pub fn random_note_scalar() -> Self {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut OsRng, &mut bytes[..31]);
        Self::from_bytes_le(&bytes)
    }

    pub fn add(&self, other: &Fr) -> Fr {
        Fr((&self.0 + &other.0) % &*FR_MODULUS)
    }

    pub fn sub(&self, other: &Fr) -> Fr {
        Fr((&self.0 + &*FR_MODULUS - &other.0) % &*FR_MODULUS)
    }

    pub fn mul(&self, other: &Fr) -> Fr {
        Fr((&self.0 * &other.0) % &*FR_MODULUS)
    }

    pub fn pow(&self, exponent: &BigUint) -> Fr {
        Fr(self.0.modpow(exponent, &FR_MODULUS))
    }

    /// x^5, the Poseidon S-box.
    pub fn pow5(&self) -> Fr {
        let x2 = self.mul(self);
        let x4 = x2.mul(&x2);
        x4.mul(self)
    }

    pub fn inv(&self) -> CoreResult<Fr> {
        mod_inverse(&self.0, &FR_MODULUS).map(Fr)
    }

    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }

    pub fn from_decimal(s: &str) -> CoreResult<Fr> {
        let value = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| CoreError::MalformedInput(format!("not a decimal integer: {s:?}")))?;
        Ok(Self::from_biguint(value))
    }
}

impl Serialize for Fr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Fr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fr::from_decimal(&s).map_err(de::Error::custom)
    }
}

/// Greatest common divisor over arbitrary non-negative integers.
pub fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
    a.gcd(b)
}

/// Extended Euclid: returns (g, x, y) with a*x + b*y = g.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let result = a.extended_gcd(b);
    (result.gcd, result.x, result.y)
}

/// Modular inverse of `a` mod `modulus`, or `NotInvertible`.
pub fn mod_inverse(a: &BigUint, modulus: &BigUint) -> CoreResult<BigUint> {
    if a.is_zero() {
        return Err(CoreError::NotInvertible);
    }
    let a_int = BigInt::from_biguint(Sign::Plus, a.clone());
    let m_int = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let (g, x, _) = extended_gcd(&a_int, &m_int);
    if !g.is_one() {
        return Err(CoreError::NotInvertible);
    }
    let reduced = ((x % &m_int) + &m_int) % &m_int;
    Ok(reduced.to_biguint().expect("non-negative after reduction"))
}

/// `value mod modulus` for signed values, result in [0, modulus).
pub fn mod_signed(value: &BigInt, modulus: &BigUint) -> BigUint {
    let m = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let mut r = value % &m;
    if r.is_negative() {
        r += &m;
    }
    r.to_biguint().expect("non-negative after reduction")
}
