//! The shielded-note pool: commitment tree, nullifier set and the
//! withdrawal gate.
//!
//! Fixed denomination design: every deposit and withdrawal is one of the
//! configured amounts, so amounts themselves leak nothing. Spending is gated
//! by a withdrawal proof plus the nullifier set; accepting a withdrawal
//! atomically records its nullifier hash.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::crypto::field::Fr;
use crate::crypto::merkle::{MerkleProof, MerkleTree};
use crate::error::{CoreError, CoreResult};
use crate::quorum::{ProofVerifier, PublicInputs};

/// Append-only set of spent nullifier hashes.
#[derive(Default)]
pub struct NullifierSet {
    spent: HashSet<[u8; 32]>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, nullifier_hash: &Fr) -> bool {
        self.spent.contains(&nullifier_hash.to_bytes_le())
    }

    /// Insert, failing on duplicates. Callers must only acknowledge the
    /// dependent withdrawal after this returns Ok.
    pub fn insert(&mut self, nullifier_hash: &Fr) -> CoreResult<()> {
        if !self.spent.insert(nullifier_hash.to_bytes_le()) {
            return Err(CoreError::DoubleSpend);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }
}

/// Everything a withdrawal must present.
#[derive(Clone, Debug)]
pub struct WithdrawalRequest {
    pub proof: Vec<u8>,
    pub merkle_root: Fr,
    pub nullifier_hash: Fr,
    pub recipient: [u8; 32],
    pub amount: u64,
}

pub struct ShieldedPool {
    denominations: Vec<u64>,
    tree: MerkleTree,
    nullifiers: NullifierSet,
    total_deposits: u64,
    total_withdrawals: u64,
}

impl ShieldedPool {
    pub fn new(config: &CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            denominations: config.denominations.clone(),
            tree: MerkleTree::new(config.merkle_depth)?,
            nullifiers: NullifierSet::new(),
            total_deposits: 0,
            total_withdrawals: 0,
        })
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn root(&self) -> Fr {
        self.tree.root()
    }

    pub fn deposit_count(&self) -> u64 {
        self.total_deposits
    }

    pub fn withdrawal_count(&self) -> u64 {
        self.total_withdrawals
    }

    /// Accept a commitment into the tree; returns its leaf index.
    pub fn deposit(&mut self, commitment: Fr, amount: u64) -> CoreResult<u64> {
        if !self.denominations.contains(&amount) {
            return Err(CoreError::InvalidDenomination(amount));
        }
        let index = self.tree.insert(commitment)?;
        self.total_deposits += 1;
        info!(index, amount, "pool deposit accepted");
        Ok(index)
    }

    /// Membership proof for a deposited commitment.
    pub fn membership_proof(&self, leaf_index: u64) -> CoreResult<MerkleProof> {
        self.tree.proof(leaf_index)
    }

    /// Validate and execute a withdrawal.
    ///
    /// Order matters: the root and nullifier checks are cheap and local, the
    /// proof check may be expensive; the nullifier is only recorded once the
    /// proof has passed, and recording happens-before this returns.
    ///
    /// Errors from this function are internal diagnostics. Anything shown to
    /// an external observer must go through [`CoreError::redacted`] so spent
    /// and never-deposited notes are indistinguishable.
    pub fn withdraw(
        &mut self,
        request: &WithdrawalRequest,
        verifier: &dyn ProofVerifier,
    ) -> CoreResult<()> {
        if !self.denominations.contains(&request.amount) {
            return Err(CoreError::InvalidDenomination(request.amount));
        }
        if !self.tree.is_known_root(&request.merkle_root) {
            warn!("withdrawal against unknown root");
            return Err(CoreError::UnknownRoot);
        }
        if self.nullifiers.contains(&request.nullifier_hash) {
            warn!("withdrawal with spent nullifier");
            return Err(CoreError::DoubleSpend);
        }

        let public_inputs = PublicInputs::Withdraw {
            merkle_root: request.merkle_root.to_bytes_le(),
            nullifier_hash: request.nullifier_hash.to_bytes_le(),
            recipient: request.recipient,
            amount: request.amount,
        };
        match verifier.verify(&request.proof, &public_inputs) {
            Ok(true) => {}
            Ok(false) => return Err(CoreError::InvalidProof),
            Err(err) => return Err(err),
        }

        self.nullifiers.insert(&request.nullifier_hash)?;
        self.total_withdrawals += 1;
        info!(amount = request.amount, "pool withdrawal accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::poseidon;
    use crate::quorum::AllowlistVerifier;

    fn config() -> CoreConfig {
        CoreConfig {
            merkle_depth: 8,
            ..CoreConfig::default()
        }
    }

    fn request_for(pool: &ShieldedPool, nullifier: &Fr, amount: u64) -> WithdrawalRequest {
        WithdrawalRequest {
            proof: b"withdrawal-proof".to_vec(),
            merkle_root: pool.root(),
            nullifier_hash: poseidon::nullifier_hash(nullifier),
            recipient: [7u8; 32],
            amount,
        }
    }

    fn verifier_for(request: &WithdrawalRequest) -> AllowlistVerifier {
        let mut verifier = AllowlistVerifier::new();
        verifier.allow(
            &request.proof,
            &PublicInputs::Withdraw {
                merkle_root: request.merkle_root.to_bytes_le(),
                nullifier_hash: request.nullifier_hash.to_bytes_le(),
                recipient: request.recipient,
                amount: request.amount,
            },
        );
        verifier
    }

    #[test]
    fn deposit_assigns_sequential_indices() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        for i in 0..3 {
            let index = pool.deposit(Fr::from_u64(100 + i), 1).unwrap();
            assert_eq!(index, i);
        }
        assert_eq!(pool.deposit_count(), 3);
    }

    #[test]
    fn deposit_rejects_off_denomination_amounts() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        assert_eq!(
            pool.deposit(Fr::from_u64(1), 7).unwrap_err(),
            CoreError::InvalidDenomination(7)
        );
    }

    #[test]
    fn withdrawal_succeeds_once_then_double_spends() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        let nullifier = Fr::from_u64(7);
        let secret = Fr::from_u64(11);
        let commitment = poseidon::commitment(&nullifier, &secret, 1, &Fr::zero());
        pool.deposit(commitment, 1).unwrap();

        let request = request_for(&pool, &nullifier, 1);
        let verifier = verifier_for(&request);

        pool.withdraw(&request, &verifier).unwrap();
        assert_eq!(pool.withdrawal_count(), 1);

        let second = pool.withdraw(&request, &verifier).unwrap_err();
        assert_eq!(second, CoreError::DoubleSpend);
        assert_eq!(second.redacted(), CoreError::WithdrawalRejected);
        assert_eq!(pool.withdrawal_count(), 1);
    }

    #[test]
    fn withdrawal_against_unknown_root_fails() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        pool.deposit(Fr::from_u64(1), 1).unwrap();

        let mut request = request_for(&pool, &Fr::from_u64(7), 1);
        request.merkle_root = Fr::from_u64(424_242);
        let verifier = verifier_for(&request);
        assert_eq!(
            pool.withdraw(&request, &verifier).unwrap_err(),
            CoreError::UnknownRoot
        );
    }

    #[test]
    fn withdrawal_with_bad_proof_fails_and_keeps_nullifier_unspent() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        pool.deposit(Fr::from_u64(1), 1).unwrap();

        let request = request_for(&pool, &Fr::from_u64(7), 1);
        // Verifier that accepts a different proof only.
        let mut verifier = AllowlistVerifier::new();
        verifier.allow(b"some other proof", &PublicInputs::Deposit { commitment: [0u8; 32] });

        assert_eq!(
            pool.withdraw(&request, &verifier).unwrap_err(),
            CoreError::InvalidProof
        );
        // The failed attempt must not burn the nullifier.
        let verifier = verifier_for(&request);
        pool.withdraw(&request, &verifier).unwrap();
    }

    #[test]
    fn historical_root_remains_withdrawable() {
        let mut pool = ShieldedPool::new(&config()).unwrap();
        let nullifier = Fr::from_u64(7);
        let commitment = poseidon::commitment(&nullifier, &Fr::from_u64(11), 1, &Fr::zero());
        pool.deposit(commitment, 1).unwrap();

        let request = request_for(&pool, &nullifier, 1);
        let verifier = verifier_for(&request);

        // More deposits supersede the root the prover bound to.
        for i in 0..5 {
            pool.deposit(Fr::from_u64(1000 + i), 1).unwrap();
        }
        assert_ne!(pool.root(), request.merkle_root);
        pool.withdraw(&request, &verifier).unwrap();
    }
}
