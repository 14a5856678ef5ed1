//! Tag-addressed Data Object engine for an OpenPGP-card applet.
//!
//! [`Engine`] is the crate's single entry point: construct one over a
//! [`Platform`] implementation and a [`CardConfig`], then drive it with
//! [`Engine::get_data`] / [`Engine::put_data`] / [`Engine::public_key`].
//! Everything else in this crate — the NV pool cell format, the crash-safe
//! counter encoders, the keystring and key-envelope protocols, the DO
//! catalog, and the boot-time scanner — exists to make those three calls
//! correct and crash-safe.

pub mod blobs;
pub mod catalog;
pub mod cell;
pub mod collab;
pub mod config;
pub mod counters;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod keystring;
pub mod scan;

#[cfg(test)]
pub mod testing;

use catalog::DoKind;
use collab::Platform;
use config::{CardConfig, KEY_CONTENT_LEN, PW_ERR_RC};
use envelope::{KeyData, KeyKind, PrvKeyRecord};
use error::{EngineError, EngineResult, StatusWord};
use handlers::KeyImportAction;
use keystring::{Keystring, Role};
use scan::CardState;

fn nr_for_kind(kind: KeyKind) -> u8 {
    match kind {
        KeyKind::Signing => catalog::NR_PRVKEY_SIG,
        KeyKind::Decryption => catalog::NR_PRVKEY_DEC,
        KeyKind::Authentication => catalog::NR_PRVKEY_AUT,
    }
}

fn nr_keystring(role: Role) -> u8 {
    match role {
        Role::User => catalog::NR_KEYSTRING_PW1,
        Role::ResetCode => catalog::NR_KEYSTRING_RC,
        Role::Admin => catalog::NR_KEYSTRING_PW3,
    }
}

/// The card engine, generic over its surrounding firmware's collaborator
/// surface. One instance owns the volatile index rebuilt at boot and the
/// platform handle it was built over.
pub struct Engine<P: Platform> {
    platform: P,
    config: CardConfig,
    state: CardState,
}

impl<P: Platform> Engine<P> {
    /// Boots the engine: scans the NV pool once to rebuild the volatile
    /// index (spec.md §4.6).
    pub fn new(mut platform: P, config: CardConfig) -> Engine<P> {
        let state = scan::scan(&mut platform);
        Engine { platform, config, state }
    }

    fn fixed_blob(&self, tag: u16) -> Option<Vec<u8>> {
        match tag {
            catalog::TAG_AID => Some(blobs::aid(&self.config).to_vec()),
            catalog::TAG_EXTCAP => Some(blobs::extended_capabilities(&self.config).to_vec()),
            catalog::TAG_ALG_SIG | catalog::TAG_ALG_DEC | catalog::TAG_ALG_AUT => {
                Some(blobs::ALGORITHM_ATTRIBUTES.to_vec())
            }
            _ => None,
        }
    }

    /// `GET DATA`, spec.md §4.7.
    pub fn get_data(&self, tag: u16) -> (StatusWord, Vec<u8>) {
        facade::get_data(&self.platform, &self.state, tag, |t| self.fixed_blob(t))
    }

    /// `PUT DATA`, spec.md §4.7. `admin_keystring` must be supplied (and
    /// derived by the caller from an already-verified PW3) for key import
    /// and resetting-code changes; ignored otherwise.
    pub fn put_data(&mut self, tag: u16, data: &[u8], admin_keystring: Option<&Keystring>) -> StatusWord {
        let entry = match facade::lookup_for_write(tag) {
            Ok(e) => e,
            Err(e) => return StatusWord::from(e),
        };
        let result = match entry.kind {
            DoKind::Fixed | DoKind::CmpRead | DoKind::ProcRead => Err(EngineError::Security),
            DoKind::Var => facade::put_var(&mut self.platform, &mut self.state, entry, data),
            DoKind::ProcReadWrite => {
                if !self.platform.ac_check_status(entry.write_access) {
                    Err(EngineError::Security)
                } else if let Some(&first) = data.first() {
                    handlers::pw_status_write(&mut self.platform, &mut self.state, first)
                } else {
                    Err(EngineError::Security)
                }
            }
            DoKind::ProcWrite => {
                if !self.platform.ac_check_status(entry.write_access) {
                    Err(EngineError::Security)
                } else {
                    match tag {
                        catalog::TAG_KEY_IMPORT => match admin_keystring {
                            Some(ks) => self.import_key(ks, data),
                            None => Err(EngineError::Security),
                        },
                        catalog::TAG_RESETTING_CODE => match admin_keystring {
                            Some(ks) => self.change_resetting_code(ks, data),
                            None => Err(EngineError::Security),
                        },
                        _ => Err(EngineError::Security),
                    }
                }
            }
        };
        StatusWord::from_result(result)
    }

    /// Public-key read (PSO / explicit GET PUBLIC KEY, spec.md §4.7).
    pub fn public_key(&self, kind: KeyKind) -> (StatusWord, Vec<u8>) {
        match facade::public_key(&self.platform, &self.state, kind) {
            Ok(bytes) => (StatusWord::SUCCESS, bytes),
            Err(e) => (StatusWord::from(e), Vec::new()),
        }
    }

    /// Unseals a private key under `role`'s PIN/keystring (spec.md §4.4).
    /// `kk_keystring` must be the keystring for the role that's currently
    /// authorized to use this key (usually [`Role::User`]).
    pub fn unseal_private_key(&self, kind: KeyKind, role: Role, keystring: &Keystring) -> EngineResult<KeyData> {
        let record = self.read_prvkey_record(kind).ok_or(EngineError::RecordNotFound)?;
        envelope::unseal(&self.platform, &record, role, keystring)
    }

    /// Increments the digital signature counter after a PSO: COMPUTE
    /// DIGITAL SIGNATURE operation (spec.md §4.2).
    pub fn note_signature(&mut self) -> EngineResult<()> {
        self.state.dsc.increment(&mut self.platform)
    }

    pub fn digital_signature_count(&self) -> u32 {
        self.state.dsc.value
    }

    /// Records a failed PIN attempt for `which` (one of
    /// [`config::PW_ERR_PW1`]/[`config::PW_ERR_RC`]/[`config::PW_ERR_PW3`]).
    pub fn note_pin_failure(&mut self, which: usize) -> EngineResult<()> {
        self.state.pw_counter_mut(which).increment(&mut self.platform, which as u8)
    }

    /// Clears `which`'s error counter after a successful verification.
    pub fn note_pin_success(&mut self, which: usize) {
        self.state.pw_counter_mut(which).reset(&mut self.platform)
    }

    pub fn pin_error_count(&self, which: usize) -> u8 {
        self.state.pw_counter(which).get()
    }

    pub fn pin_locked(&self, which: usize) -> bool {
        self.state.pw_counter(which).is_locked()
    }

    /// Compacts the NV pool, per spec.md §4.6/§8: rewrites every live
    /// cell into a freshly erased region, preserving exact values.
    pub fn compact(&mut self) -> EngineResult<()> {
        let snapshot = scan::snapshot_live_dos(&self.platform, &self.state);
        self.state = scan::compact(&mut self.platform, &self.state, &snapshot)?;
        Ok(())
    }

    fn read_prvkey_record(&self, kind: KeyKind) -> Option<PrvKeyRecord> {
        let (offset, len) = self.state.get_do(nr_for_kind(kind))?;
        let bytes = self.platform.nv_scan_bytes(0);
        PrvKeyRecord::from_bytes(cell::do_payload(bytes, offset, len))
    }

    fn read_keystring(&self, role: Role) -> Option<Keystring> {
        let (offset, len) = self.state.get_do(nr_keystring(role))?;
        if len as usize != config::KEYSTRING_RECORD_SIZE {
            return None;
        }
        let bytes = self.platform.nv_scan_bytes(0);
        let payload = cell::do_payload(bytes, offset, len);
        let mut record = [0u8; config::KEYSTRING_RECORD_SIZE];
        record.copy_from_slice(payload);
        Some(Keystring::from_record(&record))
    }

    fn write_prvkey_do(&mut self, kind: KeyKind, record: &PrvKeyRecord) -> EngineResult<()> {
        let nr = nr_for_kind(kind);
        let old = self.state.get_do(nr);
        let bytes = record.to_bytes();
        let new_cell = cell::append_do(&mut self.platform, nr, &bytes, old.map(|(o, _)| o))?;
        self.state.set_do(nr, new_cell, bytes.len() as u8);
        Ok(())
    }

    fn clear_keystring(&mut self, role: Role) {
        let nr = nr_keystring(role);
        if let Some((offset, _)) = self.state.get_do(nr) {
            self.platform.nv_release(offset);
        }
        self.state.clear_do(nr);
    }

    fn write_keystring_full(&mut self, role: Role, keystring: &Keystring) -> EngineResult<()> {
        let nr = nr_keystring(role);
        let old = self.state.get_do(nr);
        let record = keystring.to_record();
        let new_cell = cell::append_do(&mut self.platform, nr, &record, old.map(|(o, _)| o))?;
        self.state.set_do(nr, new_cell, record.len() as u8);
        Ok(())
    }

    fn write_keystring_len_only(&mut self, role: Role, len: u8) -> EngineResult<()> {
        let nr = nr_keystring(role);
        let old = self.state.get_do(nr);
        let new_cell = cell::append_do(&mut self.platform, nr, &[len], old.map(|(o, _)| o))?;
        self.state.set_do(nr, new_cell, 1);
        Ok(())
    }

    /// Handles `PUT DATA 3FFF` (spec.md §4.8): imports or deletes the
    /// named key.
    fn import_key(&mut self, admin_keystring: &Keystring, payload: &[u8]) -> EngineResult<()> {
        let request = handlers::parse_key_import(payload)?;
        match request.action {
            KeyImportAction::Delete => {
                log::debug!("deleting private key {:?}", request.kind);
                let nr = nr_for_kind(request.kind);
                if let Some((offset, len)) = self.state.get_do(nr) {
                    let bytes = self.platform.nv_scan_bytes(0);
                    if let Some(record) = PrvKeyRecord::from_bytes(cell::do_payload(bytes, offset, len)) {
                        self.platform.key_slot_release(record.key_slot);
                    }
                    self.platform.nv_release(offset);
                    self.state.clear_do(nr);
                }
                if self.state.num_prv_keys == 0 {
                    self.clear_keystring(Role::User);
                    self.clear_keystring(Role::ResetCode);
                }
                Ok(())
            }
            KeyImportAction::Import(key_bytes) => {
                if key_bytes.len() < KEY_CONTENT_LEN {
                    log::warn!("key import payload too short for {:?}: {} bytes", request.kind, key_bytes.len());
                    return Err(EngineError::Security);
                }
                log::info!("importing private key {:?}", request.kind);
                let mut key_data = [0u8; KEY_CONTENT_LEN];
                key_data.copy_from_slice(&key_bytes[..KEY_CONTENT_LEN]);

                let previous = self.read_prvkey_record(request.kind);
                let ks_pw1 = if previous.is_some() { None } else { self.read_keystring(Role::User) };
                let ks_rc = if previous.is_some() { None } else { self.read_keystring(Role::ResetCode) };

                let outcome = envelope::seal(
                    &mut self.platform,
                    &key_data,
                    admin_keystring,
                    previous.as_ref(),
                    ks_pw1.as_ref(),
                    ks_rc.as_ref(),
                )?;

                if let Some(old_slot) = outcome.old_slot_to_release {
                    self.platform.key_slot_release(old_slot);
                }
                self.write_prvkey_do(request.kind, &outcome.record)?;

                if outcome.clear_pw1_rc {
                    self.clear_keystring(Role::User);
                    self.clear_keystring(Role::ResetCode);
                } else if previous.is_none() && self.state.num_prv_keys == 3 {
                    // All three keys now present: retain only the
                    // passphrase lengths (spec.md §4.3).
                    if let Some(ks) = ks_pw1 {
                        self.write_keystring_len_only(Role::User, ks.len_only())?;
                    }
                    if let Some(ks) = ks_rc {
                        self.write_keystring_len_only(Role::ResetCode, ks.len_only())?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Handles `PUT DATA 00 D3` (spec.md §4.8): re-wraps every existing
    /// key's reset-code DEK copy under a freshly derived keystring.
    fn change_resetting_code(&mut self, admin_keystring: &Keystring, new_passphrase: &[u8]) -> EngineResult<()> {
        let mut existing = Vec::new();
        for kind in [KeyKind::Signing, KeyKind::Decryption, KeyKind::Authentication] {
            if let Some(record) = self.read_prvkey_record(kind) {
                existing.push((kind, record));
            }
        }

        let outcome = handlers::change_resetting_code(&self.platform, admin_keystring, new_passphrase, &existing);

        for (kind, record) in &outcome.updated_records {
            self.write_prvkey_do(*kind, record)?;
        }

        if outcome.store_full_keystring() {
            self.write_keystring_full(Role::ResetCode, &outcome.new_rc_keystring)?;
        } else {
            self.write_keystring_len_only(Role::ResetCode, outcome.new_rc_keystring.len_only())?;
        }

        self.state.pw_counter_mut(PW_ERR_RC).reset(&mut self.platform);
        Ok(())
    }
}
