//! Poseidon hash over the BN254 scalar field.
//!
//! Width t = 3 (rate 2 + capacity 1), 8 full rounds, 57 partial rounds,
//! S-box x^5. Parameters are the circom-compatible set, so digests agree
//! with circuits built against the same tables.
//!
//! Reference: https://eprint.iacr.org/2019/458.pdf

use lazy_static::lazy_static;

use super::field::Fr;
use super::poseidon_constants::{MDS_MATRIX, ROUND_CONSTANTS};

pub const POSEIDON_T: usize = 3;
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_RF: usize = 8;
pub const POSEIDON_RP: usize = 57;
pub const POSEIDON_ROUNDS: usize = POSEIDON_RF + POSEIDON_RP;

lazy_static! {
    static ref CONSTANTS: Vec<Fr> = ROUND_CONSTANTS.iter().map(Fr::from_limbs).collect();
    static ref MDS: [[Fr; 3]; 3] = {
        let row = |i: usize| -> [Fr; 3] {
            [
                Fr::from_limbs(&MDS_MATRIX[i][0]),
                Fr::from_limbs(&MDS_MATRIX[i][1]),
                Fr::from_limbs(&MDS_MATRIX[i][2]),
            ]
        };
        [row(0), row(1), row(2)]
    };
}

/// Transient permutation state; never observable to callers.
struct PoseidonState {
    state: [Fr; 3],
    round: usize,
}

impl PoseidonState {
    fn new(a: Fr, b: Fr) -> Self {
        Self {
            // Zero capacity element first, then the rate.
            state: [Fr::zero(), a, b],
            round: 0,
        }
    }

    fn add_round_constants(&mut self) {
        let base = self.round * POSEIDON_T;
        for (i, lane) in self.state.iter_mut().enumerate() {
            *lane = lane.add(&CONSTANTS[base + i]);
        }
        self.round += 1;
    }

    fn full_sbox(&mut self) {
        for lane in self.state.iter_mut() {
            *lane = lane.pow5();
        }
    }

    fn partial_sbox(&mut self) {
        self.state[0] = self.state[0].pow5();
    }

    fn mds_mix(&mut self) {
        let old = self.state.clone();
        for (i, row) in MDS.iter().enumerate() {
            let mut acc = Fr::zero();
            for (j, coeff) in row.iter().enumerate() {
                acc = acc.add(&old[j].mul(coeff));
            }
            self.state[i] = acc;
        }
    }

    fn permute(&mut self) {
        for _ in 0..POSEIDON_RF / 2 {
            self.add_round_constants();
            self.full_sbox();
            self.mds_mix();
        }
        for _ in 0..POSEIDON_RP {
            self.add_round_constants();
            self.partial_sbox();
            self.mds_mix();
        }
        for _ in 0..POSEIDON_RF / 2 {
            self.add_round_constants();
            self.full_sbox();
            self.mds_mix();
        }
        debug_assert_eq!(self.round, POSEIDON_ROUNDS);
    }
}

/// Hash up to two field elements: state = [0, inputs..] padded with zeros.
pub fn hash(inputs: &[Fr]) -> Fr {
    assert!(
        inputs.len() <= POSEIDON_RATE,
        "poseidon rate is {POSEIDON_RATE}"
    );
    let a = inputs.first().cloned().unwrap_or_else(Fr::zero);
    let b = inputs.get(1).cloned().unwrap_or_else(Fr::zero);
    let mut p = PoseidonState::new(a, b);
    p.permute();
    p.state[0].clone()
}

pub fn hash2(a: &Fr, b: &Fr) -> Fr {
    hash(&[a.clone(), b.clone()])
}

/// Four inputs as a two-level tree of `hash2`.
pub fn hash4(a: &Fr, b: &Fr, c: &Fr, d: &Fr) -> Fr {
    hash2(&hash2(a, b), &hash2(c, d))
}

/// Note commitment: Poseidon(nullifier, secret, amount, recipient).
pub fn commitment(nullifier: &Fr, secret: &Fr, amount: u64, recipient: &Fr) -> Fr {
    hash4(nullifier, secret, &Fr::from_u64(amount), recipient)
}

/// Nullifier hash: Poseidon(nullifier, 0).
pub fn nullifier_hash(nullifier: &Fr) -> Fr {
    hash2(nullifier, &Fr::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash2_matches_the_circom_reference_vector() {
        // poseidon([1, 2]) from circomlib.
        let h = hash2(&Fr::from_u64(1), &Fr::from_u64(2));
        let expected = Fr::from_decimal(
            "7853200120776062878684798364095072458815029376092732009249414926327459813530",
        )
        .unwrap();
        assert_eq!(h, expected);
    }

    #[test]
    fn hash2_is_deterministic() {
        let a = Fr::from_u64(1);
        let b = Fr::from_u64(2);
        assert_eq!(hash2(&a, &b), hash2(&a, &b));
    }

    #[test]
    fn hash2_is_order_sensitive() {
        let a = Fr::from_u64(1);
        let b = Fr::from_u64(2);
        assert_ne!(hash2(&a, &b), hash2(&b, &a));
    }

    #[test]
    fn hash_pads_missing_inputs_with_zero() {
        let a = Fr::from_u64(42);
        assert_eq!(hash(&[a.clone()]), hash2(&a, &Fr::zero()));
    }

    #[test]
    fn commitment_binds_every_field() {
        let n = Fr::from_u64(7);
        let s = Fr::from_u64(11);
        let r = Fr::zero();
        let c = commitment(&n, &s, 1, &r);
        assert_ne!(c, commitment(&n, &s, 2, &r));
        assert_ne!(c, commitment(&n, &s, 1, &Fr::one()));
        assert_ne!(c, commitment(&s, &n, 1, &r));
    }

    #[test]
    fn nullifier_hash_matches_hash2_form() {
        let n = Fr::from_u64(7);
        assert_eq!(nullifier_hash(&n), hash2(&n, &Fr::zero()));
    }

    #[test]
    fn digest_is_a_reduced_field_element() {
        let h = hash2(&Fr::random(), &Fr::random());
        assert!(h.as_biguint() < &*crate::crypto::field::FR_MODULUS);
    }
}
