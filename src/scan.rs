//! Boot-time scan and compaction (spec.md §3, §4.6) — C6.
//!
//! [`scan`] walks the pool once, front to back, and rebuilds the volatile
//! index every other module consults: a pointer table for each live DO
//! cell, the digital signature counter, the three PIN-error counters, and
//! the PW1-lifetime flag. [`compact`] rewrites all of that into a freshly
//! erased pool, dropping every released cell's dead space.

use crate::cell::{self, Cell, NR_DO_MIN};
use crate::collab::{self, CellRef, Platform};
use crate::catalog::{NR_PRVKEY_AUT, NR_PRVKEY_DEC, NR_PRVKEY_SIG};
use crate::config::{NUM_PW_ROLES, PW_ERR_PW1, PW_ERR_PW3, PW_ERR_RC};
use crate::counters::{DscState, PwErrorCounter};
use crate::error::EngineResult;

const DO_SLOTS: usize = (cell::NR_DO_MAX - cell::NR_DO_MIN + 1) as usize;

/// The fully reconstructed volatile index, rebuilt by [`scan`] on every
/// boot and replaced wholesale by [`compact`].
pub struct CardState {
    do_ptr: [Option<(CellRef, u8)>; DO_SLOTS],
    pub dsc: DscState,
    pw_counters: [PwErrorCounter; NUM_PW_ROLES],
    pw1_lifetime_cell: Option<CellRef>,
    pub num_prv_keys: u8,
    pub data_objects_number_of_bytes: u32,
    tail: CellRef,
}

fn pw_which_to_index(which: u8) -> Option<usize> {
    match which {
        0 => Some(PW_ERR_PW1),
        1 => Some(PW_ERR_RC),
        2 => Some(PW_ERR_PW3),
        _ => None,
    }
}

impl CardState {
    pub fn get_do(&self, nr: u8) -> Option<(CellRef, u8)> {
        self.do_ptr[(nr - NR_DO_MIN) as usize]
    }

    pub fn set_do(&mut self, nr: u8, cell: CellRef, len: u8) {
        self.do_ptr[(nr - NR_DO_MIN) as usize] = Some((cell, len));
        self.recompute_num_prv_keys();
    }

    pub fn clear_do(&mut self, nr: u8) {
        self.do_ptr[(nr - NR_DO_MIN) as usize] = None;
        self.recompute_num_prv_keys();
    }

    fn recompute_num_prv_keys(&mut self) {
        let mut n = 0;
        if self.get_do(NR_PRVKEY_SIG).is_some() {
            n += 1;
        }
        if self.get_do(NR_PRVKEY_DEC).is_some() {
            n += 1;
        }
        if self.get_do(NR_PRVKEY_AUT).is_some() {
            n += 1;
        }
        self.num_prv_keys = n;
    }

    pub fn pw_counter(&self, which: usize) -> &PwErrorCounter {
        &self.pw_counters[which]
    }

    pub fn pw_counter_mut(&mut self, which: usize) -> &mut PwErrorCounter {
        &mut self.pw_counters[which]
    }

    pub fn pw1_lifetime(&self) -> bool {
        self.pw1_lifetime_cell.is_some()
    }

    pub fn set_pw1_lifetime<P: Platform>(&mut self, platform: &mut P, value: bool) -> EngineResult<()> {
        match (self.pw1_lifetime_cell, value) {
            (Some(_), true) | (None, false) => Ok(()),
            (None, true) => {
                let framed = cell::frame_bool_pw1_lifetime();
                self.pw1_lifetime_cell = Some(collab::require(platform.nv_append(&framed))?);
                Ok(())
            }
            (Some(old), false) => {
                platform.nv_release(old);
                self.pw1_lifetime_cell = None;
                Ok(())
            }
        }
    }

    pub fn tail(&self) -> CellRef {
        self.tail
    }
}

/// Rebuilds the volatile index from the raw pool, per spec.md §4.6.
/// Anchors the platform's tail pointer at the end of the scan.
pub fn scan<P: Platform>(platform: &mut P) -> CardState {
    let mut do_ptr: [Option<(CellRef, u8)>; DO_SLOTS] = [None; DO_SLOTS];
    let mut high: Option<(u16, CellRef)> = None;
    let mut low: Option<(u16, CellRef)> = None;
    let mut pw_found: [Option<(u8, CellRef)>; NUM_PW_ROLES] = [None; NUM_PW_ROLES];
    let mut pw1_lifetime_cell: Option<CellRef> = None;
    let mut data_objects_number_of_bytes: u32 = 0;

    let bytes = platform.nv_scan_bytes(0);
    let mut offset = 0usize;
    loop {
        let decoded = match cell::decode_at(bytes, offset) {
            Some(d) => d,
            None => break,
        };
        match decoded.cell {
            Cell::Do { nr, offset: off, payload_len } => {
                do_ptr[(nr - NR_DO_MIN) as usize] = Some((off, payload_len));
                data_objects_number_of_bytes += payload_len as u32;
            }
            Cell::DscHigh { h14, offset: off } => high = Some((h14, off)),
            Cell::DscLow { l10, offset: off } => low = Some((l10, off)),
            Cell::BoolPw1Lifetime { offset: off } => pw1_lifetime_cell = Some(off),
            Cell::PwCounter { which, value, offset: off } => {
                if let Some(idx) = pw_which_to_index(which) {
                    pw_found[idx] = Some((value, off));
                }
            }
            Cell::Released => {}
        }
        match decoded.next {
            Some(next) => offset = next,
            None => break,
        }
    }

    let tail = offset;
    platform.nv_set_tail(tail);
    log::debug!("pool scan reached tail at {}, {} live DO bytes", tail, data_objects_number_of_bytes);

    let mut state = CardState {
        do_ptr,
        dsc: DscState::from_scan(high, low),
        pw_counters: [
            PwErrorCounter::from_scan(pw_found[0]),
            PwErrorCounter::from_scan(pw_found[1]),
            PwErrorCounter::from_scan(pw_found[2]),
        ],
        pw1_lifetime_cell,
        num_prv_keys: 0,
        data_objects_number_of_bytes,
        tail,
    };
    state.recompute_num_prv_keys();
    state
}

/// Rewrites the live contents of `state` into a freshly erased pool, per
/// spec.md §4.6/§8 ("compact then scan reproduces the pre-compact
/// state"). `snapshot` must be a copy of the payload bytes for every live
/// DO, taken from the pool *before* this call erases it.
pub fn compact<P: Platform>(
    platform: &mut P,
    state: &CardState,
    snapshot: &[(u8, Vec<u8>)],
) -> EngineResult<CardState> {
    log::info!("compacting pool: {} live DOs", snapshot.len());
    platform.nv_erase();

    let mut do_ptr: [Option<(CellRef, u8)>; DO_SLOTS] = [None; DO_SLOTS];
    for (nr, payload) in snapshot {
        let cell = cell::append_do(platform, *nr, payload, None)?;
        do_ptr[(*nr - NR_DO_MIN) as usize] = Some((cell, payload.len() as u8));
    }

    let mut dsc = state.dsc;
    dsc.compact_write(platform)?;

    let mut pw_counters = state.pw_counters;
    for (idx, counter) in pw_counters.iter_mut().enumerate() {
        let which = match idx {
            PW_ERR_PW1 => 0,
            PW_ERR_RC => 1,
            PW_ERR_PW3 => 2,
            _ => unreachable!(),
        };
        counter.compact_write(platform, which)?;
    }

    let pw1_lifetime_cell = if state.pw1_lifetime() {
        let framed = cell::frame_bool_pw1_lifetime();
        Some(collab::require(platform.nv_append(&framed))?)
    } else {
        None
    };

    // Walk the freshly written log to find the true end, rather than
    // assuming the pool's raw byte length: `nv_set_tail` re-anchors the
    // allocator's write position, so handing it anything past the last
    // appended cell would make every subsequent `nv_append` think the pool
    // is full.
    let bytes = platform.nv_scan_bytes(0);
    let mut tail = 0usize;
    while let Some(decoded) = cell::decode_at(bytes, tail) {
        match decoded.next {
            Some(next) => tail = next,
            None => break,
        }
    }
    platform.nv_set_tail(tail);

    let data_objects_number_of_bytes = snapshot.iter().map(|(_, p)| p.len() as u32).sum();

    let mut new_state = CardState {
        do_ptr,
        dsc,
        pw_counters,
        pw1_lifetime_cell,
        num_prv_keys: 0,
        data_objects_number_of_bytes,
        tail,
    };
    new_state.recompute_num_prv_keys();
    Ok(new_state)
}

/// Snapshots every live DO's payload bytes, for use with [`compact`].
pub fn snapshot_live_dos<P: Platform>(platform: &P, state: &CardState) -> Vec<(u8, Vec<u8>)> {
    let bytes = platform.nv_scan_bytes(0);
    let mut out = Vec::new();
    for nr in cell::NR_DO_MIN..=cell::NR_DO_MAX {
        if let Some((offset, len)) = state.get_do(nr) {
            out.push((nr, cell::do_payload(bytes, offset, len).to_vec()));
        }
    }
    out
}
