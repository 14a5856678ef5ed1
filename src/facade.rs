//! GET DATA / PUT DATA façade (spec.md §3, §4.5, §4.7) — C7.
//!
//! This is the engine's single entry point: it resolves a tag through
//! [`crate::catalog`], checks access, and either assembles a BER-TLV
//! response or dispatches a write to the right storage path or
//! procedural handler.

use crate::cell;
use crate::catalog::{self, DoEntry, DoKind};
use crate::collab::Platform;
use crate::config::MODULUS_LEN;
use crate::envelope::{KeyKind, PrvKeyRecord};
use crate::error::{EngineError, EngineResult, StatusWord};
use crate::handlers;
use crate::scan::CardState;

/// Appends a tag in its 1- or 2-byte BER encoding.
fn push_tag(out: &mut Vec<u8>, tag: u16) {
    if tag < 0x0100 {
        out.push(tag as u8);
    } else {
        out.push((tag >> 8) as u8);
        out.push((tag & 0xff) as u8);
    }
}

/// Appends a BER-TLV length: single byte under 128, else `0x81` + one
/// length byte (response payloads here never reach the two-length-byte
/// range).
fn push_len(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
    } else {
        out.push(0x81);
        out.push(len as u8);
    }
}

fn push_do(out: &mut Vec<u8>, tag: u16, payload: &[u8], with_tag: bool) {
    if with_tag {
        push_tag(out, tag);
        push_len(out, payload.len());
    }
    out.extend_from_slice(payload);
}

fn nr_for_kind(kind: KeyKind) -> u8 {
    match kind {
        KeyKind::Signing => catalog::NR_PRVKEY_SIG,
        KeyKind::Decryption => catalog::NR_PRVKEY_DEC,
        KeyKind::Authentication => catalog::NR_PRVKEY_AUT,
    }
}

/// Assembles one entry's BER-TLV encoding (with or without its own tag
/// header — compound objects recurse with `with_tag = true` on every
/// child, spec.md §4.5). `fixed_blob` resolves a `DoKind::Fixed` entry's
/// bytes from [`crate::config::CardConfig`] via [`crate::blobs`]; it's
/// threaded through compound-object recursion since Application Data
/// nests several fixed entries (AID, Extended Capabilities, algorithm
/// attributes).
fn copy_do<P: Platform>(
    platform: &P,
    state: &CardState,
    entry: &DoEntry,
    with_tag: bool,
    out: &mut Vec<u8>,
    fixed_blob: &dyn Fn(u16) -> Option<Vec<u8>>,
) -> EngineResult<bool> {
    if !platform.ac_check_status(entry.read_access) {
        log::debug!("GET DATA denied by access control for tag {:#06x}", entry.tag);
        return Err(EngineError::Security);
    }
    match entry.kind {
        DoKind::Fixed => match fixed_blob(entry.tag) {
            Some(payload) => {
                push_do(out, entry.tag, &payload, with_tag);
                Ok(true)
            }
            None => Ok(false),
        },
        DoKind::Var => match state.get_do(entry.nr) {
            None => Ok(false),
            Some((offset, len)) => {
                let bytes = platform.nv_scan_bytes(0);
                let payload = cell::do_payload(bytes, offset, len);
                push_do(out, entry.tag, payload, with_tag);
                Ok(true)
            }
        },
        DoKind::CmpRead => {
            let children = match entry.tag {
                catalog::TAG_CH_DATA => catalog::CMP_CH_DATA,
                catalog::TAG_APP_DATA => catalog::CMP_APP_DATA,
                catalog::TAG_SS_TEMP => catalog::CMP_SS_TEMP,
                _ => return Ok(false),
            };
            push_tag(out, entry.tag);
            let len_pos = out.len();
            out.push(0x81);
            out.push(0); // patched below
            for &child_tag in children {
                if let Some(child) = catalog::lookup(child_tag) {
                    copy_do(platform, state, child, true, out, fixed_blob)?;
                }
            }
            let body_len = out.len() - (len_pos + 2);
            out[len_pos + 1] = body_len as u8;
            Ok(true)
        }
        DoKind::ProcRead | DoKind::ProcReadWrite => {
            let payload = proc_read_payload(platform, state, entry.tag);
            push_do(out, entry.tag, &payload, with_tag);
            Ok(true)
        }
        DoKind::ProcWrite => Ok(false),
    }
}

fn proc_read_payload<P: Platform>(platform: &P, state: &CardState, tag: u16) -> Vec<u8> {
    match tag {
        catalog::TAG_HIST_BYTES => crate::blobs::HIST_BYTES.to_vec(),
        catalog::TAG_FP_ALL => handlers::fp_all(platform, state).to_vec(),
        catalog::TAG_CAFP_ALL => handlers::cafp_all(platform, state).to_vec(),
        catalog::TAG_KGTIME_ALL => handlers::kgtime_all(platform, state).to_vec(),
        catalog::TAG_DS_COUNT => handlers::ds_count(state).to_vec(),
        catalog::TAG_PW_STATUS => handlers::pw_status_read(state).to_vec(),
        _ => Vec::new(),
    }
}

/// `GET DATA`, per spec.md §4.7. `fixed_blob` supplies a `DoKind::Fixed`
/// entry's bytes (assembled by the caller from [`crate::config::CardConfig`]
/// via [`crate::blobs`]); ignored for all other kinds.
pub fn get_data<P: Platform>(
    platform: &P,
    state: &CardState,
    tag: u16,
    fixed_blob: impl Fn(u16) -> Option<Vec<u8>>,
) -> (StatusWord, Vec<u8>) {
    let entry = match catalog::lookup(tag) {
        Some(e) => e,
        None => return (StatusWord::RECORD_NOT_FOUND, Vec::new()),
    };

    // Unlike the upstream firmware (which omits the tag/length prefix for
    // a top-level single-tag GET DATA, relying on the reader already
    // knowing what it asked for), this port always returns a self-describing
    // `tag || len || value` per spec.md §8's round-trip law; compound
    // entries already emit their own tag unconditionally either way.
    let mut out = Vec::new();
    match copy_do(platform, state, entry, true, &mut out, &fixed_blob) {
        Ok(_) => (StatusWord::SUCCESS, out),
        Err(e) => (StatusWord::from(e), Vec::new()),
    }
}

/// `PUT DATA` for a plain `Var` entry: write, or release-and-clear on a
/// zero-length payload (spec.md §4.7).
pub fn put_var<P: Platform>(platform: &mut P, state: &mut CardState, entry: &DoEntry, data: &[u8]) -> EngineResult<()> {
    if !platform.ac_check_status(entry.write_access) {
        return Err(EngineError::Security);
    }
    let old = state.get_do(entry.nr);
    if data.is_empty() {
        if let Some((offset, _)) = old {
            platform.nv_release(offset);
        }
        state.clear_do(entry.nr);
        return Ok(());
    }
    if data.len() > 255 {
        return Err(EngineError::Memory);
    }
    let new_cell = cell::append_do(platform, entry.nr, data, old.map(|(o, _)| o))?;
    state.set_do(entry.nr, new_cell, data.len() as u8);
    Ok(())
}

/// Looks up `tag` for a write. The caller inspects `entry.kind` to decide
/// between [`put_var`] and its own procedural dispatch (key import,
/// resetting code, PW status, or a forbidden kind).
pub fn lookup_for_write(tag: u16) -> EngineResult<&'static DoEntry> {
    catalog::lookup(tag).ok_or(EngineError::RecordNotFound)
}

/// `GET PUBLIC KEY`-equivalent (PSO or explicit public-key read,
/// spec.md §4.7): BER-TLV `7F49 { 81 <256-byte modulus> 82 <3-byte E> }`.
pub fn public_key<P: Platform>(platform: &P, state: &CardState, kind: KeyKind) -> EngineResult<Vec<u8>> {
    let nr = nr_for_kind(kind);
    let (offset, len) = state.get_do(nr).ok_or(EngineError::RecordNotFound)?;
    let bytes = platform.nv_scan_bytes(0);
    let record_bytes = cell::do_payload(bytes, offset, len);
    let record = PrvKeyRecord::from_bytes(record_bytes).ok_or(EngineError::Memory)?;
    let modulus = platform.key_slot_read_modulus(record.key_slot);

    let mut out = Vec::with_capacity(2 + 3 + 2 + 2 + MODULUS_LEN + 2 + 3);
    out.push(0x7f);
    out.push(0x49);
    push_len_3byte(&mut out, 9 + MODULUS_LEN);
    out.push(0x81);
    push_len_3byte(&mut out, MODULUS_LEN);
    out.extend_from_slice(&modulus);
    out.push(0x82);
    out.push(3);
    out.extend_from_slice(&[0x01, 0x00, 0x01]);
    Ok(out)
}

/// The public-key response's outer length never fits a one-byte encoding
/// (265 bytes), so it always uses the `0x82` (two-length-byte) form.
fn push_len_3byte(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
    } else if len < 256 {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push((len & 0xff) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan;
    use crate::testing::MemoryPlatform;

    fn no_fixed_blob(_tag: u16) -> Option<Vec<u8>> {
        None
    }

    #[test]
    fn login_data_roundtrips_with_the_exact_wire_bytes() {
        // spec.md §8, crash safety scenario 2.
        let mut platform = MemoryPlatform::new();
        platform.set_admin_authorized(true);
        let mut state = scan::scan(&mut platform);
        let entry = catalog::lookup(catalog::TAG_LOGIN_DATA).unwrap();

        put_var(&mut platform, &mut state, entry, b"alice@example.test").unwrap();
        let (sw, body) = get_data(&platform, &state, catalog::TAG_LOGIN_DATA, no_fixed_blob);

        assert_eq!(sw, StatusWord::SUCCESS);
        let mut expected = vec![0x5e, 18];
        expected.extend_from_slice(b"alice@example.test");
        assert_eq!(body, expected);
    }

    #[test]
    fn put_empty_payload_clears_a_var_do() {
        let mut platform = MemoryPlatform::new();
        platform.set_admin_authorized(true);
        let mut state = scan::scan(&mut platform);
        let entry = catalog::lookup(catalog::TAG_URL).unwrap();

        put_var(&mut platform, &mut state, entry, b"https://example.test").unwrap();
        put_var(&mut platform, &mut state, entry, b"").unwrap();
        let (sw, body) = get_data(&platform, &state, catalog::TAG_URL, no_fixed_blob);

        assert_eq!(sw, StatusWord::SUCCESS);
        assert!(body.is_empty());
    }

    #[test]
    fn pw_status_read_reflects_lifetime_flag_and_fresh_counters() {
        // spec.md §8, crash safety scenarios 3 and 4.
        let mut platform = MemoryPlatform::new();
        let mut state = scan::scan(&mut platform);

        crate::handlers::pw_status_write(&mut platform, &mut state, 0).unwrap();
        let (_, off_body) = get_data(&platform, &state, catalog::TAG_PW_STATUS, no_fixed_blob);
        assert_eq!(off_body, vec![0xc4, 7, 0x00, 0x7f, 0x7f, 0x7f, 0x03, 0x03, 0x03]);

        crate::handlers::pw_status_write(&mut platform, &mut state, 1).unwrap();
        let (_, on_body) = get_data(&platform, &state, catalog::TAG_PW_STATUS, no_fixed_blob);
        assert_eq!(on_body, vec![0xc4, 7, 0x01, 0x7f, 0x7f, 0x7f, 0x03, 0x03, 0x03]);
    }

    #[test]
    fn unknown_tag_is_record_not_found() {
        let platform = MemoryPlatform::new();
        let state = scan::scan(&mut MemoryPlatform::new());
        let (sw, body) = get_data(&platform, &state, 0xbeef, no_fixed_blob);
        assert_eq!(sw, StatusWord::RECORD_NOT_FOUND);
        assert!(body.is_empty());
    }

    #[test]
    fn never_readable_entry_always_fails_closed() {
        let platform = MemoryPlatform::new();
        let state = scan::scan(&mut MemoryPlatform::new());
        let (sw, _) = get_data(&platform, &state, catalog::TAG_CH_CERTIFICATE, no_fixed_blob);
        assert_eq!(sw, StatusWord::SECURITY_FAILURE);
    }

    #[test]
    fn admin_gated_write_fails_until_authorized() {
        let mut platform = MemoryPlatform::new();
        let mut state = scan::scan(&mut platform);
        let entry = catalog::lookup(catalog::TAG_URL).unwrap();

        assert_eq!(put_var(&mut platform, &mut state, entry, b"x"), Err(EngineError::Security));
        platform.set_admin_authorized(true);
        assert_eq!(put_var(&mut platform, &mut state, entry, b"x"), Ok(()));
    }
}
