//! Dual-key stealth address derivation (DKSAP).
//!
//! The sender makes an ephemeral Ed25519 keypair, runs X25519 against the
//! recipient's scan key, and derives a one-time Ed25519 address from the
//! shared secret and the recipient's spend key:
//!
//! ```text
//! ecdh         = X25519(eph_priv_x, scan_pub_x)        sender side
//!              = X25519(scan_priv_x, eph_pub_x)        recipient side
//! shared       = SHA256("stealthsol_v1" || ecdh)
//! stealth_seed = SHA256(shared || spend_pub)
//! address      = Ed25519 public key of keypair(stealth_seed)
//! ```
//!
//! Ed25519 keys cross to X25519 by the standard maps: secrets take the first
//! 32 bytes of SHA-512 with clamping; publics map edwards-y to montgomery-u
//! via u = (1+y)/(1-y).

use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use ed25519_dalek::Keypair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroize;

use super::keys::{keypair_from_seed, MetaAddress, SecretBytes, StealthKeys};
use crate::error::{CoreError, CoreResult};

/// Domain separator for the shared-secret derivation.
pub const DOMAIN_SEPARATOR: &[u8] = b"stealthsol_v1";

/// What a sender publishes after paying a stealth address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    #[serde(with = "serde_bytes32")]
    pub ephemeral_pubkey: [u8; 32],
    #[serde(with = "serde_bytes32")]
    pub stealth_address: [u8; 32],
    pub timestamp: i64,
}

/// Sender-side derivation result.
///
/// Note that the sender can recompute the one-time seed from its own
/// ephemeral key: this construction provides unlinkability to observers,
/// not sender-exclusion.
pub struct StealthDerivation {
    pub announcement: Announcement,
}

impl StealthDerivation {
    pub fn stealth_address(&self) -> [u8; 32] {
        self.announcement.stealth_address
    }
}

/// A payment detected while scanning.
#[derive(Debug)]
pub struct IncomingPayment {
    pub stealth_address: [u8; 32],
    pub announcement_index: usize,
    stealth_seed: SecretBytes,
}

impl IncomingPayment {
    /// The keypair controlling the one-time address.
    pub fn spending_keypair(&self) -> CoreResult<Keypair> {
        keypair_from_seed(self.stealth_seed.as_bytes())
    }
}

/// Convert an Ed25519 seed to a clamped X25519 scalar.
fn x25519_scalar(seed: &[u8; 32]) -> Scalar {
    let digest = Sha512::digest(seed);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest[..32]);
    bytes[0] &= 248;
    bytes[31] &= 127;
    bytes[31] |= 64;
    let scalar = Scalar::from_bits(bytes);
    bytes.zeroize();
    scalar
}

/// Convert a compressed Ed25519 public key to its Montgomery u-coordinate.
fn x25519_public(ed_pubkey: &[u8; 32]) -> CoreResult<MontgomeryPoint> {
    let point = CompressedEdwardsY::from_slice(ed_pubkey)
        .decompress()
        .ok_or(CoreError::NonCanonicalPoint)?;
    // y = 1 is the identity; u = (1+y)/(1-y) is undefined there.
    if point.is_identity() {
        return Err(CoreError::NonConvertiblePoint);
    }
    Ok(point.to_montgomery())
}

fn shared_secret(scalar: &Scalar, public: &MontgomeryPoint) -> CoreResult<[u8; 32]> {
    let ecdh = scalar * public;
    let bytes = ecdh.to_bytes();
    if bytes.iter().all(|&b| b == 0) {
        // Low-order peer key; a zero shared secret must never be used.
        return Err(CoreError::NonCanonicalPoint);
    }
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_SEPARATOR);
    hasher.update(bytes);
    Ok(hasher.finalize().into())
}

fn stealth_seed_from(shared: &[u8; 32], spend_pubkey: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(spend_pubkey);
    hasher.finalize().into()
}

/// Derive a one-time address for a recipient, using a fresh ephemeral key.
pub fn derive_stealth_payment(meta: &MetaAddress, timestamp: i64) -> CoreResult<StealthDerivation> {
    let mut eph_seed = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut eph_seed);
    let result = derive_stealth_payment_with_ephemeral(meta, &eph_seed, timestamp);
    eph_seed.zeroize();
    result
}

/// Deterministic variant taking the ephemeral seed explicitly.
pub fn derive_stealth_payment_with_ephemeral(
    meta: &MetaAddress,
    ephemeral_seed: &[u8; 32],
    timestamp: i64,
) -> CoreResult<StealthDerivation> {
    let ephemeral = keypair_from_seed(ephemeral_seed)?;
    let eph_scalar = x25519_scalar(ephemeral_seed);
    let scan_point = x25519_public(&meta.scan_pubkey)?;

    let shared = shared_secret(&eph_scalar, &scan_point)?;
    let mut stealth_seed = stealth_seed_from(&shared, &meta.spend_pubkey);
    let one_time = keypair_from_seed(&stealth_seed)?;
    stealth_seed.zeroize();

    Ok(StealthDerivation {
        announcement: Announcement {
            ephemeral_pubkey: ephemeral.public.to_bytes(),
            stealth_address: one_time.public.to_bytes(),
            timestamp,
        },
    })
}

/// Recipient-side scan of a single announcement.
///
/// Returns `Ok(None)` when the announcement is addressed to someone else,
/// an error when the ephemeral key is not a canonical curve point.
pub fn scan_announcement(
    keys: &StealthKeys,
    announcement: &Announcement,
    announcement_index: usize,
) -> CoreResult<Option<IncomingPayment>> {
    let scan_scalar = x25519_scalar(keys.scan_seed());
    let eph_point = x25519_public(&announcement.ephemeral_pubkey)?;

    let shared = shared_secret(&scan_scalar, &eph_point)?;
    let stealth_seed = stealth_seed_from(&shared, &keys.spend_pubkey);
    let expected = keypair_from_seed(&stealth_seed)?.public.to_bytes();

    if bool::from(expected.ct_eq(&announcement.stealth_address)) {
        Ok(Some(IncomingPayment {
            stealth_address: announcement.stealth_address,
            announcement_index,
            stealth_seed: SecretBytes::from_bytes(stealth_seed),
        }))
    } else {
        Ok(None)
    }
}

/// Detection with the scan key only; no spending material is derived.
pub fn check_announcement(keys: &StealthKeys, announcement: &Announcement) -> bool {
    matches!(scan_announcement(keys, announcement, 0), Ok(Some(_)))
}

/// An injected, append-only source of announcements.
pub trait AnnouncementStream {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Announcements in `[from, from + max)`, in publication order.
    fn batch(&self, from: usize, max: usize) -> Vec<Announcement>;
}

/// In-memory announcement log, mainly for tests and local scanning.
#[derive(Default)]
pub struct MemoryAnnouncementLog {
    entries: Vec<Announcement>,
}

impl MemoryAnnouncementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, announcement: Announcement) {
        self.entries.push(announcement);
    }
}

impl AnnouncementStream for MemoryAnnouncementLog {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn batch(&self, from: usize, max: usize) -> Vec<Announcement> {
        self.entries.iter().skip(from).take(max).cloned().collect()
    }
}

/// Restartable cursor scan: processes at most `max` announcements starting at
/// `cursor`, returning detected payments and the new cursor position.
/// Malformed announcements are skipped, not fatal.
pub fn scan_batch(
    keys: &StealthKeys,
    stream: &dyn AnnouncementStream,
    cursor: usize,
    max: usize,
) -> (Vec<IncomingPayment>, usize) {
    let entries = stream.batch(cursor, max);
    let mut found = Vec::new();
    for (offset, announcement) in entries.iter().enumerate() {
        match scan_announcement(keys, announcement, cursor + offset) {
            Ok(Some(payment)) => found.push(payment),
            Ok(None) => {}
            Err(err) => {
                debug!(index = cursor + offset, %err, "skipping malformed announcement");
            }
        }
    }
    let advanced = entries.len();
    (found, cursor + advanced)
}

mod serde_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bs58::encode(bytes).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = bs58::decode(&s)
            .into_vec()
            .map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_and_recipient_agree_on_the_address() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        let derivation =
            derive_stealth_payment_with_ephemeral(&keys.meta_address(), &[2u8; 32], 0).unwrap();

        let payment = scan_announcement(&keys, &derivation.announcement, 0)
            .unwrap()
            .expect("payment should be detected");
        assert_eq!(payment.stealth_address, derivation.stealth_address());

        // The derived spending keypair controls exactly that address.
        let signer = payment.spending_keypair().unwrap();
        assert_eq!(signer.public.to_bytes(), derivation.stealth_address());
    }

    #[test]
    fn other_seeds_do_not_detect_the_payment() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        let other = StealthKeys::from_seed(&[3u8; 32]).unwrap();
        let derivation =
            derive_stealth_payment_with_ephemeral(&keys.meta_address(), &[2u8; 32], 0).unwrap();

        assert!(scan_announcement(&other, &derivation.announcement, 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn distinct_ephemerals_give_unlinkable_addresses() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        let a = derive_stealth_payment_with_ephemeral(&keys.meta_address(), &[2u8; 32], 0).unwrap();
        let b = derive_stealth_payment_with_ephemeral(&keys.meta_address(), &[4u8; 32], 0).unwrap();
        assert_ne!(a.stealth_address(), b.stealth_address());
    }

    #[test]
    fn off_curve_ephemeral_is_rejected() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        // Not a valid compressed edwards point.
        let announcement = Announcement {
            ephemeral_pubkey: [0xffu8; 32],
            stealth_address: [0u8; 32],
            timestamp: 0,
        };
        assert_eq!(
            scan_announcement(&keys, &announcement, 0).unwrap_err(),
            CoreError::NonCanonicalPoint
        );
    }

    #[test]
    fn identity_point_is_not_convertible() {
        // Compressed encoding of the identity: y = 1.
        let mut identity = [0u8; 32];
        identity[0] = 1;
        assert_eq!(
            x25519_public(&identity).unwrap_err(),
            CoreError::NonConvertiblePoint
        );
    }

    #[test]
    fn ed25519_public_conversion_matches_scalar_mult() {
        // X25519(a, ed_to_x(B)) must equal ed_to_x(a*B) for the DH symmetry
        // the scan protocol relies on.
        let seed_a = [5u8; 32];
        let seed_b = [6u8; 32];
        let pair_a = keypair_from_seed(&seed_a).unwrap();
        let pair_b = keypair_from_seed(&seed_b).unwrap();

        let lhs = shared_secret(
            &x25519_scalar(&seed_a),
            &x25519_public(&pair_b.public.to_bytes()).unwrap(),
        )
        .unwrap();
        let rhs = shared_secret(
            &x25519_scalar(&seed_b),
            &x25519_public(&pair_a.public.to_bytes()).unwrap(),
        )
        .unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn cursor_scan_finds_only_our_payments() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        let other = StealthKeys::from_seed(&[9u8; 32]).unwrap();
        let mut log = MemoryAnnouncementLog::new();

        for i in 0..4u8 {
            let meta = if i % 2 == 0 {
                keys.meta_address()
            } else {
                other.meta_address()
            };
            let derivation =
                derive_stealth_payment_with_ephemeral(&meta, &[i + 10; 32], i as i64).unwrap();
            log.publish(derivation.announcement);
        }

        let (found, cursor) = scan_batch(&keys, &log, 0, 100);
        assert_eq!(cursor, 4);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].announcement_index, 0);
        assert_eq!(found[1].announcement_index, 2);

        // Restarting from the cursor finds nothing new.
        let (found, cursor) = scan_batch(&keys, &log, cursor, 100);
        assert!(found.is_empty());
        assert_eq!(cursor, 4);
    }

    #[test]
    fn announcement_json_round_trip() {
        let keys = StealthKeys::from_seed(&[1u8; 32]).unwrap();
        let derivation =
            derive_stealth_payment_with_ephemeral(&keys.meta_address(), &[2u8; 32], 1234).unwrap();
        let json = serde_json::to_string(&derivation.announcement).unwrap();
        let back: Announcement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, derivation.announcement);
    }
}
