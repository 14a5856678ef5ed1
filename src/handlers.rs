//! Procedural Data Object handlers (spec.md §3, §4.8) — the `ProcRead`,
//! `ProcWrite`, and `ProcReadWrite` entries of the catalog that don't map
//! onto a single stored DO cell.

use crate::cell;
use crate::collab::Platform;
use crate::config::{PASSWORD_ERRORS_MAX, PW_ERR_PW1, PW_ERR_PW3, PW_ERR_RC, PW_LEN_MAX, SIZE_FINGERPRINT, SIZE_KEYGEN_TIME, SIZE_PW_STATUS_BYTES};
use crate::catalog::{NR_CAFP_1, NR_CAFP_2, NR_CAFP_3, NR_FP_AUT, NR_FP_DEC, NR_FP_SIG, NR_KGTIME_AUT, NR_KGTIME_DEC, NR_KGTIME_SIG};
use crate::envelope::{self, KeyKind, PrvKeyRecord};
use crate::error::{EngineError, EngineResult};
use crate::keystring::{Keystring, Role};
use crate::scan::CardState;

/// Reads a fixed-size `Var` DO's payload, or an all-zero buffer of the
/// same size if it was never written (spec.md §4.8: the `*_ALL`
/// aggregates always report the full width for every key role).
fn read_fixed<const N: usize, P: Platform>(platform: &P, state: &CardState, nr: u8) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some((offset, len)) = state.get_do(nr) {
        let bytes = platform.nv_scan_bytes(0);
        let payload = cell::do_payload(bytes, offset, len);
        let n = payload.len().min(N);
        out[..n].copy_from_slice(&payload[..n]);
    }
    out
}

/// `GET DATA 00 C5` — all three fingerprints concatenated.
pub fn fp_all<P: Platform>(platform: &P, state: &CardState) -> [u8; SIZE_FINGERPRINT * 3] {
    let mut out = [0u8; SIZE_FINGERPRINT * 3];
    out[0..20].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_FP_SIG));
    out[20..40].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_FP_DEC));
    out[40..60].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_FP_AUT));
    out
}

/// `GET DATA 00 C6` — all three CA fingerprints concatenated, reading
/// CAFP_1/2/3 in order (the upstream firmware reads CAFP_2 twice instead
/// of CAFP_3; fixed here so all three slots are independently readable).
pub fn cafp_all<P: Platform>(platform: &P, state: &CardState) -> [u8; SIZE_FINGERPRINT * 3] {
    let mut out = [0u8; SIZE_FINGERPRINT * 3];
    out[0..20].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_CAFP_1));
    out[20..40].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_CAFP_2));
    out[40..60].copy_from_slice(&read_fixed::<20, _>(platform, state, NR_CAFP_3));
    out
}

/// `GET DATA 00 CD` — all three key-generation timestamps concatenated.
pub fn kgtime_all<P: Platform>(platform: &P, state: &CardState) -> [u8; SIZE_KEYGEN_TIME * 3] {
    let mut out = [0u8; SIZE_KEYGEN_TIME * 3];
    out[0..4].copy_from_slice(&read_fixed::<4, _>(platform, state, NR_KGTIME_SIG));
    out[4..8].copy_from_slice(&read_fixed::<4, _>(platform, state, NR_KGTIME_DEC));
    out[8..12].copy_from_slice(&read_fixed::<4, _>(platform, state, NR_KGTIME_AUT));
    out
}

/// `GET DATA 00 93` — the 24-bit digital signature counter, big-endian.
pub fn ds_count(state: &CardState) -> [u8; 3] {
    let v = state.dsc.value;
    [((v >> 16) & 0xff) as u8, ((v >> 8) & 0xff) as u8, (v & 0xff) as u8]
}

/// `GET DATA 00 C4` — password status bytes (spec.md §4.8).
pub fn pw_status_read(state: &CardState) -> [u8; SIZE_PW_STATUS_BYTES] {
    [
        state.pw1_lifetime() as u8,
        PW_LEN_MAX,
        PW_LEN_MAX,
        PW_LEN_MAX,
        PASSWORD_ERRORS_MAX.saturating_sub(state.pw_counter(PW_ERR_PW1).get()),
        PASSWORD_ERRORS_MAX.saturating_sub(state.pw_counter(PW_ERR_RC).get()),
        PASSWORD_ERRORS_MAX.saturating_sub(state.pw_counter(PW_ERR_PW3).get()),
    ]
}

/// `PUT DATA 00 C4` — only the first byte matters: nonzero sets the
/// PW1-validity-for-lifetime-of-session flag, zero clears it.
pub fn pw_status_write<P: Platform>(platform: &mut P, state: &mut CardState, first_byte: u8) -> EngineResult<()> {
    state.set_pw1_lifetime(platform, first_byte != 0)
}

/// One entry of a PUT DATA 3FFF (Key Import) request, parsed from the
/// Extended Header List (spec.md §4.8).
pub enum KeyImportAction<'a> {
    Delete,
    Import(&'a [u8]),
}

pub struct KeyImportRequest<'a> {
    pub kind: KeyKind,
    pub action: KeyImportAction<'a>,
}

/// Offset of the key-content bytes within a non-deletion import payload:
/// past the Extended Header List wrapper, the private-key template tag,
/// and the 4-byte public exponent.
const KEY_IMPORT_HEADER_LEN: usize = 26;

/// Parses a `PUT DATA 3FFF` payload. A payload of 22 bytes or fewer
/// requests deletion of the named key (spec.md §4.8); `data[4]` is the
/// control-reference-template tag selecting which of the three keys.
pub fn parse_key_import(data: &[u8]) -> EngineResult<KeyImportRequest<'_>> {
    let control = *data.get(4).ok_or(EngineError::Security)?;
    let kind = match control {
        0xb6 => KeyKind::Signing,
        0xb8 => KeyKind::Decryption,
        0xa4 => KeyKind::Authentication,
        _ => return Err(EngineError::Security),
    };
    if data.len() <= 22 {
        return Ok(KeyImportRequest { kind, action: KeyImportAction::Delete });
    }
    let key_bytes = data.get(KEY_IMPORT_HEADER_LEN..).ok_or(EngineError::Security)?;
    Ok(KeyImportRequest { kind, action: KeyImportAction::Import(key_bytes) })
}

/// Result of changing the resetting code (spec.md §4.8, `PUT DATA 00 D3`).
pub struct ResettingCodeOutcome {
    pub new_rc_keystring: Keystring,
    /// Every existing private key's record, re-wrapped under the new
    /// reset-code keystring. Empty if no private key exists yet.
    pub updated_records: Vec<(KeyKind, PrvKeyRecord)>,
}

impl ResettingCodeOutcome {
    /// When no private key existed, the full keystring (length + digest)
    /// must be retained so a later key import can wrap its DEK under it;
    /// once at least one key exists, the per-key DEK copies already carry
    /// the wrapping, so only the length byte is kept (spec.md §4.3).
    pub fn store_full_keystring(&self) -> bool {
        self.updated_records.is_empty()
    }
}

/// Re-wraps the reset-code DEK copy of every existing private key under a
/// freshly derived keystring for `new_passphrase`, per spec.md §4.8.
pub fn change_resetting_code<P: Platform>(
    platform: &P,
    admin_ks: &Keystring,
    new_passphrase: &[u8],
    existing_records: &[(KeyKind, PrvKeyRecord)],
) -> ResettingCodeOutcome {
    let new_ks = Keystring::derive(platform, new_passphrase);
    let mut updated_records = Vec::with_capacity(existing_records.len());
    for (kind, record) in existing_records {
        let mut record = record.clone();
        envelope::change_dek_wrap(platform, &mut record, Role::Admin, admin_ks, Role::ResetCode, &new_ks);
        updated_records.push((*kind, record));
    }
    ResettingCodeOutcome { new_rc_keystring: new_ks, updated_records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPlatform;

    #[test]
    fn parse_key_import_selects_role_by_control_reference() {
        let mut payload = vec![0u8; 30];
        payload[4] = 0xb8; // decryption
        let req = parse_key_import(&payload).unwrap();
        assert_eq!(req.kind, KeyKind::Decryption);
        assert!(matches!(req.action, KeyImportAction::Import(_)));
    }

    #[test]
    fn short_payload_requests_deletion() {
        let mut payload = vec![0u8; 20];
        payload[4] = 0xb6; // signing
        let req = parse_key_import(&payload).unwrap();
        assert_eq!(req.kind, KeyKind::Signing);
        assert!(matches!(req.action, KeyImportAction::Delete));
    }

    #[test]
    fn unknown_control_reference_is_rejected() {
        let mut payload = vec![0u8; 30];
        payload[4] = 0xff;
        assert_eq!(parse_key_import(&payload).err(), Some(EngineError::Security));
    }

    #[test]
    fn ds_count_reports_the_24_bit_value_big_endian() {
        let mut platform = MemoryPlatform::new();
        let mut state = crate::scan::scan(&mut platform);
        for _ in 0..0x102 {
            state.dsc.increment(&mut platform).unwrap();
        }
        assert_eq!(ds_count(&state), [0x00, 0x01, 0x02]);
    }

    #[test]
    fn fp_all_reports_zero_for_unset_fingerprints() {
        let mut platform = MemoryPlatform::new();
        let state = crate::scan::scan(&mut platform);
        assert_eq!(fp_all(&platform, &state), [0u8; 60]);
    }

    #[test]
    fn pw_status_read_does_not_underflow_past_the_error_max() {
        let mut platform = MemoryPlatform::new();
        let mut state = crate::scan::scan(&mut platform);
        for _ in 0..20 {
            state.pw_counter_mut(PW_ERR_PW1).increment(&mut platform, 0).unwrap();
        }
        assert_eq!(pw_status_read(&state)[4], 0);
    }

    #[test]
    fn change_resetting_code_with_no_keys_keeps_the_full_keystring() {
        let platform = MemoryPlatform::new();
        let admin_ks = Keystring::derive(&platform, b"admin-pin");
        let outcome = change_resetting_code(&platform, &admin_ks, b"new-reset-code", &[]);
        assert!(outcome.store_full_keystring());
        assert!(outcome.updated_records.is_empty());
    }
}
