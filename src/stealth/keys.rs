//! Stealth key material and meta-address encoding.
//!
//! A recipient holds two independent Ed25519 key pairs derived from one
//! 32-byte seed by tagged hashing: the scan pair detects incoming payments,
//! the spend pair anchors the one-time address derivation. The public halves
//! together form the meta-address that gets published.

use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{CoreError, CoreResult};

/// ASCII tag prefixing an encoded meta-address.
pub const META_ADDRESS_TAG: &str = "stealth:";

const SCAN_DERIVATION_TAG: &[u8] = b"scan:";
const SPEND_DERIVATION_TAG: &[u8] = b"spend:";

/// A 32-byte secret that zeroizes its contents on drop.
#[derive(Clone)]
pub struct SecretBytes {
    bytes: [u8; 32],
}

impl SecretBytes {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(..)")
    }
}

/// Build an Ed25519 keypair from a 32-byte seed.
pub(crate) fn keypair_from_seed(seed: &[u8; 32]) -> CoreResult<Keypair> {
    let secret = SecretKey::from_bytes(seed)
        .map_err(|_| CoreError::MalformedInput("invalid ed25519 seed".into()))?;
    let public = PublicKey::from(&secret);
    Ok(Keypair { secret, public })
}

/// Scan and spend key pairs for one recipient.
///
/// Secret seeds are zeroized on drop; `Clone` is intentionally not derived.
pub struct StealthKeys {
    scan_seed: SecretBytes,
    spend_seed: SecretBytes,
    pub scan_pubkey: [u8; 32],
    pub spend_pubkey: [u8; 32],
}

impl StealthKeys {
    /// Deterministic derivation from a master seed:
    /// scan_seed = SHA256("scan:" || seed), spend_seed = SHA256("spend:" || seed).
    pub fn from_seed(seed: &[u8; 32]) -> CoreResult<Self> {
        let scan_seed = tagged_hash(SCAN_DERIVATION_TAG, seed);
        let spend_seed = tagged_hash(SPEND_DERIVATION_TAG, seed);

        let scan_pair = keypair_from_seed(&scan_seed)?;
        let spend_pair = keypair_from_seed(&spend_seed)?;

        Ok(Self {
            scan_seed: SecretBytes::from_bytes(scan_seed),
            spend_seed: SecretBytes::from_bytes(spend_seed),
            scan_pubkey: scan_pair.public.to_bytes(),
            spend_pubkey: spend_pair.public.to_bytes(),
        })
    }

    /// Fresh keys from OS entropy.
    pub fn generate() -> CoreResult<Self> {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
        let keys = Self::from_seed(&seed);
        seed.zeroize();
        keys
    }

    pub fn meta_address(&self) -> MetaAddress {
        MetaAddress {
            scan_pubkey: self.scan_pubkey,
            spend_pubkey: self.spend_pubkey,
        }
    }

    /// Rebuild keys from previously exported seeds.
    pub fn from_derived_seeds(scan_seed: [u8; 32], spend_seed: [u8; 32]) -> CoreResult<Self> {
        let scan_pair = keypair_from_seed(&scan_seed)?;
        let spend_pair = keypair_from_seed(&spend_seed)?;
        Ok(Self {
            scan_seed: SecretBytes::from_bytes(scan_seed),
            spend_seed: SecretBytes::from_bytes(spend_seed),
            scan_pubkey: scan_pair.public.to_bytes(),
            spend_pubkey: spend_pair.public.to_bytes(),
        })
    }

    /// Export the derived seeds for encrypted storage. Handle with care.
    pub fn export_seeds(&self) -> ([u8; 32], [u8; 32]) {
        (*self.scan_seed.as_bytes(), *self.spend_seed.as_bytes())
    }

    pub(crate) fn scan_seed(&self) -> &[u8; 32] {
        self.scan_seed.as_bytes()
    }
}

/// The published pair (scan_pub, spend_pub).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaAddress {
    pub scan_pubkey: [u8; 32],
    pub spend_pubkey: [u8; 32],
}

impl MetaAddress {
    /// `stealth:` + base58(scan_pub || spend_pub).
    pub fn encode(&self) -> String {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&self.scan_pubkey);
        combined[32..].copy_from_slice(&self.spend_pubkey);
        format!("{}{}", META_ADDRESS_TAG, bs58::encode(&combined).into_string())
    }

    pub fn decode(input: &str) -> CoreResult<Self> {
        let encoded = input.strip_prefix(META_ADDRESS_TAG).ok_or_else(|| {
            CoreError::MalformedInput("meta-address is missing the stealth: tag".into())
        })?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| CoreError::MalformedInput(format!("invalid base58: {e}")))?;
        if bytes.len() != 64 {
            return Err(CoreError::MalformedInput(format!(
                "meta-address must decode to 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut scan_pubkey = [0u8; 32];
        let mut spend_pubkey = [0u8; 32];
        scan_pubkey.copy_from_slice(&bytes[..32]);
        spend_pubkey.copy_from_slice(&bytes[32..]);
        Ok(Self {
            scan_pubkey,
            spend_pubkey,
        })
    }
}

fn tagged_hash(tag: &[u8], seed: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tag);
    hasher.update(seed);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let seed = [7u8; 32];
        let a = StealthKeys::from_seed(&seed).unwrap();
        let b = StealthKeys::from_seed(&seed).unwrap();
        assert_eq!(a.scan_pubkey, b.scan_pubkey);
        assert_eq!(a.spend_pubkey, b.spend_pubkey);
    }

    #[test]
    fn scan_and_spend_keys_are_independent() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        assert_ne!(keys.scan_pubkey, keys.spend_pubkey);
    }

    #[test]
    fn exported_seeds_rebuild_the_same_keys() {
        let keys = StealthKeys::generate().unwrap();
        let (scan_seed, spend_seed) = keys.export_seeds();
        let rebuilt = StealthKeys::from_derived_seeds(scan_seed, spend_seed).unwrap();
        assert_eq!(keys.scan_pubkey, rebuilt.scan_pubkey);
        assert_eq!(keys.spend_pubkey, rebuilt.spend_pubkey);
    }

    #[test]
    fn meta_address_round_trip() {
        let keys = StealthKeys::generate().unwrap();
        let meta = keys.meta_address();
        let decoded = MetaAddress::decode(&meta.encode()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn meta_address_rejects_missing_tag() {
        let keys = StealthKeys::generate().unwrap();
        let encoded = keys.meta_address().encode();
        let stripped = encoded.strip_prefix(META_ADDRESS_TAG).unwrap();
        assert!(matches!(
            MetaAddress::decode(stripped),
            Err(CoreError::MalformedInput(_))
        ));
    }

    #[test]
    fn meta_address_rejects_bad_alphabet_and_length() {
        assert!(MetaAddress::decode("stealth:0OIl").is_err());
        assert!(MetaAddress::decode("stealth:abc").is_err());
    }
}
