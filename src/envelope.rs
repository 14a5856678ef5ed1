//! Private-key envelope protocol (spec.md §3, §4.4) — C4.
//!
//! Each private key is sealed under a random 16-byte data-encryption key
//! (DEK); the DEK itself is kept as three separately-wrapped copies, one
//! per PIN role, so any of the three PINs can unlock the same key without
//! ever storing more than one plaintext copy of the key material at a
//! time (in the working [`KeyData`] buffer, for the duration of one
//! operation).

use arrayref::array_ref;
use byteorder::{BigEndian, ByteOrder};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::collab::{KeySlotRef, Platform};
use crate::config::{DEK_SIZE, KEY_CONTENT_LEN, KEY_MAGIC, MODULUS_LEN};
use crate::error::{EngineError, EngineResult};
use crate::keystring::{Keystring, Role};

/// The three private-key roles a card issues (spec.md §3, "one per key
/// role"). Distinct from [`Role`], which names the *PIN* that can unlock a
/// DEK copy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Signing,
    Decryption,
    Authentication,
}

/// The working decrypted key, `kd` in spec.md §3. Holds plaintext key
/// material for the duration of exactly one seal/unseal/use and is
/// zeroized on drop (spec.md §5, "Resource policy").
pub struct KeyData {
    pub data: [u8; KEY_CONTENT_LEN],
    pub check: u32,
    pub random: u32,
    pub magic: [u8; 8],
}

impl Drop for KeyData {
    fn drop(&mut self) {
        self.data.zeroize();
        self.check.zeroize();
        self.random.zeroize();
        self.magic.zeroize();
    }
}

const KEY_DATA_LEN: usize = KEY_CONTENT_LEN + 4 + 4 + 8;

impl KeyData {
    fn to_bytes(&self) -> [u8; KEY_DATA_LEN] {
        let mut out = [0u8; KEY_DATA_LEN];
        out[..KEY_CONTENT_LEN].copy_from_slice(&self.data);
        BigEndian::write_u32(&mut out[KEY_CONTENT_LEN..KEY_CONTENT_LEN + 4], self.check);
        BigEndian::write_u32(&mut out[KEY_CONTENT_LEN + 4..KEY_CONTENT_LEN + 8], self.random);
        out[KEY_CONTENT_LEN + 8..].copy_from_slice(&self.magic);
        out
    }

    fn from_bytes(bytes: &[u8; KEY_DATA_LEN]) -> KeyData {
        let mut data = [0u8; KEY_CONTENT_LEN];
        data.copy_from_slice(&bytes[..KEY_CONTENT_LEN]);
        let check = BigEndian::read_u32(&bytes[KEY_CONTENT_LEN..KEY_CONTENT_LEN + 4]);
        let random = BigEndian::read_u32(&bytes[KEY_CONTENT_LEN + 4..KEY_CONTENT_LEN + 8]);
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[KEY_CONTENT_LEN + 8..]);
        KeyData { data, check, random, magic }
    }

    fn checksum(data: &[u8; KEY_CONTENT_LEN]) -> u32 {
        data.chunks_exact(4)
            .fold(0u32, |acc, word| acc.wrapping_add(u32::from_le_bytes([word[0], word[1], word[2], word[3]])))
    }
}

/// Serialized private-key record, stored as one DO payload (spec.md §3).
#[derive(Clone)]
pub struct PrvKeyRecord {
    pub key_slot: KeySlotRef,
    pub crm_encrypted: [u8; 16],
    /// Indexed by [`Role::dek_index`]: user, reset, admin.
    pub dek_enc: [[u8; DEK_SIZE]; 3],
}

const RECORD_LEN: usize = 4 + 16 + DEK_SIZE * 3;

impl PrvKeyRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        BigEndian::write_u32(&mut out[0..4], self.key_slot as u32);
        out[4..20].copy_from_slice(&self.crm_encrypted);
        out[20..36].copy_from_slice(&self.dek_enc[0]);
        out[36..52].copy_from_slice(&self.dek_enc[1]);
        out[52..68].copy_from_slice(&self.dek_enc[2]);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<PrvKeyRecord> {
        if bytes.len() != RECORD_LEN {
            return None;
        }
        let key_slot = BigEndian::read_u32(&bytes[0..4]) as KeySlotRef;
        let crm_encrypted = *array_ref![bytes, 4, 16];
        let dek_enc = [*array_ref![bytes, 20, DEK_SIZE], *array_ref![bytes, 36, DEK_SIZE], *array_ref![bytes, 52, DEK_SIZE]];
        Some(PrvKeyRecord { key_slot, crm_encrypted, dek_enc })
    }
}

/// What the caller (the engine's `import_key` entry point) must still do
/// to the DO catalog after [`seal`] returns: release the old cells and
/// decide whether PW1/RC keystrings must be wiped.
pub struct SealOutcome {
    pub record: PrvKeyRecord,
    pub old_slot_to_release: Option<KeySlotRef>,
    /// Set when a previous key existed for this role: PW1 and RC
    /// keystrings must be cleared (spec.md §4.4 step 4).
    pub clear_pw1_rc: bool,
}

fn encrypt_in_place<P: Platform>(platform: &P, key: &[u8; DEK_SIZE], buf: &mut [u8]) {
    platform.aes128_cfb128_encrypt(key, buf);
}

fn decrypt_in_place<P: Platform>(platform: &P, key: &[u8; DEK_SIZE], buf: &mut [u8]) {
    platform.aes128_cfb128_decrypt(key, buf);
}

/// Seals `key_data` for `kind`, per spec.md §4.4.
///
/// `previous` is the existing private-key record for this role, if any.
/// `ks_pw1`/`ks_rc` are the current PW1/RC keystrings (read from their DOs
/// by the caller) — `None` when no user PIN / reset code has been set.
pub fn seal<P: Platform>(
    platform: &mut P,
    key_data: &[u8; KEY_CONTENT_LEN],
    admin_ks: &Keystring,
    previous: Option<&PrvKeyRecord>,
    ks_pw1: Option<&Keystring>,
    ks_rc: Option<&Keystring>,
) -> EngineResult<SealOutcome> {
    let modulus = platform.modulus_calc(key_data).ok_or(EngineError::Memory)?;
    let new_slot = platform.key_slot_alloc().ok_or(EngineError::Memory)?;

    let mut kd = KeyData {
        data: *key_data,
        check: KeyData::checksum(key_data),
        random: u32::from_be_bytes(platform.rng_bytes16()[..4].try_into().unwrap()),
        magic: KEY_MAGIC,
    };

    let (mut dek_enc, clear_pw1_rc) = match previous {
        Some(old) => {
            // Recover the shared DEK through the admin copy, then carry it
            // forward as the new user copy; the reset-code copy is wiped.
            let mut dek = old.dek_enc[Role::Admin.dek_index()];
            decrypt_in_place(platform, &admin_ks.aes_key(), &mut dek);
            let mut dek_enc = [[0u8; DEK_SIZE]; 3];
            dek_enc[Role::User.dek_index()] = dek;
            dek_enc[Role::ResetCode.dek_index()] = [0u8; DEK_SIZE];
            dek_enc[Role::Admin.dek_index()] = dek;
            (dek_enc, true)
        }
        None => {
            let dek = platform.rng_bytes16();
            ([dek, dek, dek], false)
        }
    };

    let mut kd_bytes = kd.to_bytes();
    // The DEK used to encrypt `kd` itself is the *current* shared DEK: for
    // a fresh key it's the freshly generated one (dek_enc currently holds
    // it in plaintext in all three slots); for a replacement it's the one
    // just recovered from the admin copy.
    let working_dek = dek_enc[Role::User.dek_index()];
    encrypt_in_place(platform, &working_dek, &mut kd_bytes);
    kd.data.zeroize();

    let mut encrypted_key = [0u8; KEY_CONTENT_LEN];
    encrypted_key.copy_from_slice(&kd_bytes[..KEY_CONTENT_LEN]);
    let mut crm_encrypted = [0u8; 16];
    crm_encrypted.copy_from_slice(&kd_bytes[KEY_CONTENT_LEN..]);
    let mut modulus_be = [0u8; MODULUS_LEN];
    modulus_be.copy_from_slice(&modulus);

    platform.key_slot_write(new_slot, &encrypted_key, &modulus_be);

    platform.ac_reset_pso_cds();

    // Rewrap each DEK copy under its destination keystring. For a
    // replacement, `dek_enc` currently holds the *plaintext* shared DEK in
    // the user/admin slots (copied straight from the decrypted admin
    // copy) and zero in the reset slot; for a fresh key all three slots
    // hold the plaintext fresh DEK.
    let user_source = if clear_pw1_rc { None } else { ks_pw1 };
    let user_key = match user_source {
        Some(ks) => ks.aes_key(),
        None => Keystring::initial_pw1(platform).aes_key(),
    };
    encrypt_in_place(platform, &user_key, &mut dek_enc[Role::User.dek_index()]);

    if clear_pw1_rc {
        // Reset-code copy stays zero; nothing to encrypt.
    } else if let Some(ks) = ks_rc {
        encrypt_in_place(platform, &ks.aes_key(), &mut dek_enc[Role::ResetCode.dek_index()]);
    } else {
        dek_enc[Role::ResetCode.dek_index()] = [0u8; DEK_SIZE];
    }

    encrypt_in_place(platform, &admin_ks.aes_key(), &mut dek_enc[Role::Admin.dek_index()]);

    let record = PrvKeyRecord { key_slot: new_slot, crm_encrypted, dek_enc };
    Ok(SealOutcome {
        record,
        old_slot_to_release: previous.map(|p| p.key_slot),
        clear_pw1_rc,
    })
}

/// Unseals the private key for `role`'s copy of the DEK, per spec.md §4.4.
/// The caller is responsible for locating `record` (returns
/// `Err(RecordNotFound)` at the catalog layer if none exists);
/// `Err(Security)` here means the magic check failed (wrong keystring).
pub fn unseal<P: Platform>(
    platform: &P,
    record: &PrvKeyRecord,
    role: Role,
    keystring: &Keystring,
) -> EngineResult<KeyData> {
    let mut dek = record.dek_enc[role.dek_index()];
    decrypt_in_place(platform, &keystring.aes_key(), &mut dek);

    let mut combined = [0u8; KEY_DATA_LEN];
    combined[..KEY_CONTENT_LEN].copy_from_slice(&platform.key_slot_read_encrypted(record.key_slot));
    combined[KEY_CONTENT_LEN..].copy_from_slice(&record.crm_encrypted);
    decrypt_in_place(platform, &dek, &mut combined);
    dek.zeroize();

    let kd = KeyData::from_bytes(&combined);
    // Constant-time: this is the wrong-PIN detector, so its timing must not
    // leak how many magic bytes matched.
    if kd.magic.ct_eq(&KEY_MAGIC).unwrap_u8() == 0 {
        log::warn!("key unseal magic mismatch for role {:?}: wrong keystring", role);
        return Err(EngineError::Security);
    }
    Ok(kd)
}

/// Re-wraps one private key's DEK copy from `old_ks`/`who_old` to
/// `new_ks`/`who_new`, without touching the key material itself
/// (spec.md §4.4, "PIN change without key re-import").
pub fn change_dek_wrap<P: Platform>(
    platform: &P,
    record: &mut PrvKeyRecord,
    who_old: Role,
    old_ks: &Keystring,
    who_new: Role,
    new_ks: &Keystring,
) {
    let mut dek = record.dek_enc[who_old.dek_index()];
    decrypt_in_place(platform, &old_ks.aes_key(), &mut dek);
    encrypt_in_place(platform, &new_ks.aes_key(), &mut dek);
    record.dek_enc[who_new.dek_index()] = dek;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPlatform;

    fn sample_key(fill: u8) -> [u8; KEY_CONTENT_LEN] {
        [fill; KEY_CONTENT_LEN]
    }

    #[test]
    fn seal_then_unseal_with_admin_keystring_recovers_the_key() {
        let mut platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let key = sample_key(0x42);

        let outcome = seal(&mut platform, &key, &admin_ks, None, None, None).unwrap();
        assert!(outcome.old_slot_to_release.is_none());
        assert!(!outcome.clear_pw1_rc);

        let kd = unseal(&platform, &outcome.record, Role::Admin, &admin_ks).unwrap();
        assert_eq!(kd.data, key);
        assert_eq!(kd.magic, KEY_MAGIC);
    }

    #[test]
    fn fresh_key_unseals_under_the_initial_pw1_when_no_user_pin_was_set() {
        let mut platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let key = sample_key(0x7);

        let outcome = seal(&mut platform, &key, &admin_ks, None, None, None).unwrap();
        let initial = Keystring::initial_pw1(&platform);
        let kd = unseal(&platform, &outcome.record, Role::User, &initial).unwrap();
        assert_eq!(kd.data, key);
    }

    #[test]
    fn unsealing_with_the_wrong_keystring_fails_the_magic_check() {
        let mut platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let wrong_ks = Keystring::derive(&platform, b"not-the-pin");
        let key = sample_key(0x99);

        let outcome = seal(&mut platform, &key, &admin_ks, None, None, None).unwrap();
        let result = unseal(&platform, &outcome.record, Role::Admin, &wrong_ks);
        assert_eq!(result.err(), Some(EngineError::Security));
    }

    #[test]
    fn replacing_a_key_carries_the_dek_forward_through_the_admin_copy() {
        let mut platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let user_ks = Keystring::derive(&platform, b"user-pin");
        let key1 = sample_key(0x11);
        let key2 = sample_key(0x22);

        let first = seal(&mut platform, &key1, &admin_ks, None, Some(&user_ks), None).unwrap();
        let second =
            seal(&mut platform, &key2, &admin_ks, Some(&first.record), Some(&user_ks), None).unwrap();
        assert!(second.clear_pw1_rc);
        assert_eq!(second.old_slot_to_release, Some(first.record.key_slot));

        // The replacement key unseals under the *same* admin keystring as
        // the original, and its PW1 copy reverts to the initial PIN per
        // spec.md §4.4 step 4 (PW1/RC are cleared on replacement).
        let kd = unseal(&platform, &second.record, Role::Admin, &admin_ks).unwrap();
        assert_eq!(kd.data, key2);
        let initial = Keystring::initial_pw1(&platform);
        let kd_user = unseal(&platform, &second.record, Role::User, &initial).unwrap();
        assert_eq!(kd_user.data, key2);
    }

    #[test]
    fn change_dek_wrap_moves_a_copy_to_a_different_role_slot() {
        let mut platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let reset_ks = Keystring::derive(&platform, b"reset-code");
        let key = sample_key(0x33);

        let outcome = seal(&mut platform, &key, &admin_ks, None, None, None).unwrap();
        let mut record = outcome.record;
        change_dek_wrap(&platform, &mut record, Role::Admin, &admin_ks, Role::ResetCode, &reset_ks);

        // Reset-code can now unseal the same key; admin still can too.
        let kd_reset = unseal(&platform, &record, Role::ResetCode, &reset_ks).unwrap();
        assert_eq!(kd_reset.data, key);
        let kd_admin = unseal(&platform, &record, Role::Admin, &admin_ks).unwrap();
        assert_eq!(kd_admin.data, key);
    }
}
