pub mod dksap;
pub mod keys;

pub use dksap::{
    derive_stealth_payment, derive_stealth_payment_with_ephemeral, scan_announcement, scan_batch,
    Announcement, AnnouncementStream, IncomingPayment, MemoryAnnouncementLog, StealthDerivation,
};
pub use keys::{MetaAddress, SecretBytes, StealthKeys, META_ADDRESS_TAG};
