pub mod field;
pub mod merkle;
pub mod poseidon;
mod poseidon_constants;

pub use field::Fr;
pub use merkle::{MerkleProof, MerkleTree};
