//! Shielded notes and the local note set.
//!
//! A note is (nullifier, secret, amount, recipient); its commitment is what
//! enters the pool's Merkle tree. Persistence is injected: the core only
//! talks to a `NoteStore`, never to module-level state.

use std::collections::HashMap;

use tracing::info;

use crate::crypto::field::Fr;
use crate::crypto::merkle::MerkleProof;
use crate::crypto::poseidon;
use crate::error::{CoreError, CoreResult};

/// Sentinel for a note whose commitment is not yet in the tree.
pub const LEAF_UNCONFIRMED: i64 = -1;

#[derive(Clone, Debug)]
pub struct Note {
    pub nullifier: Fr,
    pub secret: Fr,
    pub amount: u64,
    pub recipient: Fr,
    pub commitment: Fr,
    /// Position in the pool tree once accepted; -1 until confirmed.
    pub leaf_index: i64,
    /// Root and path captured at insertion time, for later proving.
    pub merkle_root: Option<Fr>,
    pub merkle_path: Option<MerkleProof>,
}

impl Note {
    /// The public value that spends this note: Poseidon(nullifier, 0).
    pub fn nullifier_hash(&self) -> Fr {
        poseidon::nullifier_hash(&self.nullifier)
    }
}

/// Injected persistence for locally-held notes, keyed by commitment.
///
/// `insert` upserts: re-inserting a commitment replaces the stored note,
/// which is how confirmation metadata gets written back.
pub trait NoteStore {
    fn insert(&mut self, note: Note) -> CoreResult<()>;
    fn by_commitment(&self, commitment: &Fr) -> Option<Note>;
    fn mark_spent(&mut self, commitment: &Fr) -> CoreResult<()>;
    fn iter_unspent(&self) -> Vec<Note>;
}

/// HashMap-backed store for tests and single-process use.
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: HashMap<[u8; 32], (Note, bool)>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NoteStore for MemoryNoteStore {
    fn insert(&mut self, note: Note) -> CoreResult<()> {
        let key = note.commitment.to_bytes_le();
        let spent = self.notes.get(&key).map(|(_, s)| *s).unwrap_or(false);
        self.notes.insert(key, (note, spent));
        Ok(())
    }

    fn by_commitment(&self, commitment: &Fr) -> Option<Note> {
        self.notes
            .get(&commitment.to_bytes_le())
            .map(|(note, _)| note.clone())
    }

    fn mark_spent(&mut self, commitment: &Fr) -> CoreResult<()> {
        match self.notes.get_mut(&commitment.to_bytes_le()) {
            Some((_, spent)) => {
                *spent = true;
                Ok(())
            }
            None => Err(CoreError::MalformedInput("unknown commitment".into())),
        }
    }

    fn iter_unspent(&self) -> Vec<Note> {
        let mut unspent: Vec<Note> = self
            .notes
            .values()
            .filter(|(_, spent)| !spent)
            .map(|(note, _)| note.clone())
            .collect();
        unspent.sort_by_key(|n| n.leaf_index);
        unspent
    }
}

/// Mints notes and tracks the unspent set through an injected store.
pub struct NoteManager<S: NoteStore> {
    store: S,
    denominations: Vec<u64>,
}

impl<S: NoteStore> NoteManager<S> {
    pub fn new(store: S, denominations: Vec<u64>) -> Self {
        Self {
            store,
            denominations,
        }
    }

    /// Create a fresh note with random nullifier and secret.
    ///
    /// `recipient` defaults to zero when it will only be fixed at withdrawal.
    pub fn mint_note(&mut self, amount: u64, recipient: Option<Fr>) -> CoreResult<Note> {
        if !self.denominations.contains(&amount) {
            return Err(CoreError::InvalidDenomination(amount));
        }
        let nullifier = Fr::random_note_scalar();
        let secret = Fr::random_note_scalar();
        let recipient = recipient.unwrap_or_else(Fr::zero);
        self.mint_note_with(nullifier, secret, amount, recipient)
    }

    /// Deterministic variant used by tests and recovery flows.
    pub fn mint_note_with(
        &mut self,
        nullifier: Fr,
        secret: Fr,
        amount: u64,
        recipient: Fr,
    ) -> CoreResult<Note> {
        let commitment = poseidon::commitment(&nullifier, &secret, amount, &recipient);
        let note = Note {
            nullifier,
            secret,
            amount,
            recipient,
            commitment: commitment.clone(),
            leaf_index: LEAF_UNCONFIRMED,
            merkle_root: None,
            merkle_path: None,
        };
        self.store.insert(note.clone())?;
        info!(commitment = %commitment.to_decimal(), amount, "note minted");
        Ok(note)
    }

    /// Record that the pool accepted the commitment at `leaf_index`, caching
    /// the root and path in effect at insertion time.
    pub fn mark_confirmed(
        &mut self,
        commitment: &Fr,
        leaf_index: u64,
        root: Fr,
        path: MerkleProof,
    ) -> CoreResult<()> {
        let mut note = self
            .store
            .by_commitment(commitment)
            .ok_or_else(|| CoreError::MalformedInput("unknown commitment".into()))?;
        note.leaf_index = leaf_index as i64;
        note.merkle_root = Some(root);
        note.merkle_path = Some(path);
        self.store.insert(note)
    }

    /// The nullifier hash that spends the note. The note is only consumed
    /// once the spending transaction is externally confirmed; call
    /// `mark_spent` at that point.
    pub fn spend(&self, commitment: &Fr) -> CoreResult<Fr> {
        let note = self
            .store
            .by_commitment(commitment)
            .ok_or_else(|| CoreError::MalformedInput("unknown commitment".into()))?;
        Ok(note.nullifier_hash())
    }

    pub fn mark_spent(&mut self, commitment: &Fr) -> CoreResult<()> {
        self.store.mark_spent(commitment)
    }

    pub fn unspent(&self) -> Vec<Note> {
        self.store.iter_unspent()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> NoteManager<MemoryNoteStore> {
        NoteManager::new(MemoryNoteStore::new(), vec![1, 10, 100])
    }

    #[test]
    fn minted_note_commitment_matches_hash4() {
        let mut mgr = manager();
        let note = mgr
            .mint_note_with(Fr::from_u64(7), Fr::from_u64(11), 1, Fr::zero())
            .unwrap();
        let expected = poseidon::hash4(
            &Fr::from_u64(7),
            &Fr::from_u64(11),
            &Fr::from_u64(1),
            &Fr::zero(),
        );
        assert_eq!(note.commitment, expected);
        assert_eq!(note.leaf_index, LEAF_UNCONFIRMED);
    }

    #[test]
    fn mint_rejects_unknown_denomination() {
        let mut mgr = manager();
        assert_eq!(
            mgr.mint_note(7, None).unwrap_err(),
            CoreError::InvalidDenomination(7)
        );
    }

    #[test]
    fn note_secrets_have_full_width_entropy() {
        // 31 random bytes leave the top byte clear and stay below p.
        let fr = Fr::random_note_scalar();
        assert!(fr.as_biguint() < &*crate::crypto::field::FR_MODULUS);
        assert_eq!(fr.to_bytes_le()[31], 0);
    }

    #[test]
    fn spend_returns_nullifier_hash() {
        let mut mgr = manager();
        let note = mgr
            .mint_note_with(Fr::from_u64(7), Fr::from_u64(11), 1, Fr::zero())
            .unwrap();
        let hash = mgr.spend(&note.commitment).unwrap();
        assert_eq!(hash, poseidon::nullifier_hash(&Fr::from_u64(7)));
    }

    #[test]
    fn spent_notes_leave_the_unspent_set() {
        let mut mgr = manager();
        let a = mgr.mint_note(1, None).unwrap();
        let _b = mgr.mint_note(10, None).unwrap();
        assert_eq!(mgr.unspent().len(), 2);

        mgr.mark_spent(&a.commitment).unwrap();
        let unspent = mgr.unspent();
        assert_eq!(unspent.len(), 1);
        assert_ne!(unspent[0].commitment, a.commitment);
    }

    #[test]
    fn confirmation_metadata_is_written_back() {
        use crate::crypto::merkle::MerkleTree;

        let mut mgr = manager();
        let note = mgr
            .mint_note_with(Fr::from_u64(7), Fr::from_u64(11), 1, Fr::zero())
            .unwrap();

        let mut tree = MerkleTree::new(8).unwrap();
        let index = tree.insert(note.commitment.clone()).unwrap();
        let proof = tree.proof(index).unwrap();
        mgr.mark_confirmed(&note.commitment, index, tree.root(), proof)
            .unwrap();

        let stored = mgr.store().by_commitment(&note.commitment).unwrap();
        assert_eq!(stored.leaf_index, index as i64);
        assert_eq!(stored.merkle_root, Some(tree.root()));
        assert!(stored.merkle_path.is_some());
    }
}
