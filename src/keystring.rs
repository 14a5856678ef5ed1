//! Keystring manager (spec.md §4.3) — C3.
//!
//! A keystring is the AES key used to wrap one role's copy of a private
//! key's DEK: one length byte (the original passphrase length, 0-127)
//! followed by the 20-byte SHA-1 of the passphrase. `Keystring` zeroizes
//! its digest on drop, since it is derived key material held for longer
//! than one operation.

use zeroize::Zeroize;

use crate::collab::Platform;
use crate::config::{INITIAL_PW1, KEYSTRING_RECORD_SIZE};

/// The three roles that can unlock a private key's DEK.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    ResetCode,
    Admin,
}

impl Role {
    /// Index into a private-key record's three `dek_enc_*` slots
    /// (spec.md §3: user, reset, admin, in that order).
    pub(crate) fn dek_index(self) -> usize {
        match self {
            Role::User => 0,
            Role::ResetCode => 1,
            Role::Admin => 2,
        }
    }
}

/// A 21-byte keystring record: length byte plus SHA-1 digest.
#[derive(Clone)]
pub struct Keystring {
    len: u8,
    digest: [u8; 20],
}

impl Drop for Keystring {
    fn drop(&mut self) {
        self.digest.zeroize();
    }
}

impl Keystring {
    /// Derives a keystring from a passphrase using the platform's SHA-1
    /// collaborator (spec.md §6).
    pub fn derive<P: Platform>(platform: &P, passphrase: &[u8]) -> Keystring {
        Keystring { len: passphrase.len() as u8, digest: platform.sha1(passphrase) }
    }

    /// The hard-coded initial User PIN's keystring (spec.md §4.4 step 8).
    pub fn initial_pw1<P: Platform>(platform: &P) -> Keystring {
        Keystring::derive(platform, INITIAL_PW1)
    }

    /// The 16 bytes actually used as the AES-128 key for DEK wrapping.
    pub fn aes_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(&self.digest[..16]);
        key
    }

    /// Serializes the full 21-byte record (length byte + digest).
    pub fn to_record(&self) -> [u8; KEYSTRING_RECORD_SIZE] {
        let mut out = [0u8; KEYSTRING_RECORD_SIZE];
        out[0] = self.len;
        out[1..].copy_from_slice(&self.digest);
        out
    }

    /// Parses a full 21-byte record.
    pub fn from_record(bytes: &[u8; KEYSTRING_RECORD_SIZE]) -> Keystring {
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&bytes[1..]);
        Keystring { len: bytes[0], digest }
    }

    /// Just the recorded passphrase length, with the digest discarded —
    /// what remains in the PW1/RC keystring DOs once all three private
    /// keys are present (spec.md §4.3).
    pub fn len_only(&self) -> u8 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPlatform;

    #[test]
    fn derive_is_deterministic_and_passphrase_sensitive() {
        let platform = MemoryPlatform::new();
        let a = Keystring::derive(&platform, b"correct horse");
        let b = Keystring::derive(&platform, b"correct horse");
        let c = Keystring::derive(&platform, b"wrong horse");
        assert_eq!(a.to_record(), b.to_record());
        assert_ne!(a.to_record(), c.to_record());
        assert_eq!(a.len_only(), "correct horse".len() as u8);
    }

    #[test]
    fn record_roundtrips() {
        let platform = MemoryPlatform::new();
        let ks = Keystring::derive(&platform, b"hunter2");
        let record = ks.to_record();
        let parsed = Keystring::from_record(&record);
        assert_eq!(parsed.to_record(), record);
        assert_eq!(parsed.aes_key(), ks.aes_key());
    }

    #[test]
    fn initial_pw1_matches_the_hard_coded_passphrase() {
        let platform = MemoryPlatform::new();
        let a = Keystring::initial_pw1(&platform);
        let b = Keystring::derive(&platform, crate::config::INITIAL_PW1);
        assert_eq!(a.to_record(), b.to_record());
    }
}
