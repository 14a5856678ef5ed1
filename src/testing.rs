//! In-memory [`Platform`] test double.
//!
//! Stands in for the real NV driver, key-slot arena, RNG, and the two
//! crypto primitives the envelope protocol wraps (SHA-1, AES-128-CFB128) —
//! a software-simulated backing store rather than real flash. Because this
//! module is only ever compiled under `#[cfg(test)]`, it can reach for the
//! real `sha1`/`aes`/`cfb-mode` dev-dependencies directly instead of faking
//! them, exercising the envelope and keystring logic end-to-end with the
//! actual primitives a deployed card would use.

use aes::Aes128;
use cfb_mode::cipher::{KeyIvInit, StreamCipher};
use sha1::{Digest, Sha1};

use crate::collab::{AccessLevel, CellRef, KeySlotRef, Platform};

type CfbEnc = cfb_mode::Encryptor<Aes128>;
type CfbDec = cfb_mode::Decryptor<Aes128>;

const POOL_CAPACITY: usize = 16 * 1024;
const NUM_KEY_SLOTS: usize = 8;

/// A single splitmix64-style counter standing in for the hardware RNG
/// collaborator; deterministic across a test run (seeded per instance) but
/// not suitable for anything beyond exercising the envelope protocol.
struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> TestRng {
        TestRng { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }
}

/// The append-only NV pool plus the fixed-size key-slot arena, fronting a
/// [`Platform`] impl the engine can boot and operate over without any real
/// hardware.
pub struct MemoryPlatform {
    pool: Vec<u8>,
    write_pos: usize,
    key_slots: [Option<([u8; 128], [u8; 256])>; NUM_KEY_SLOTS],
    admin_authorized: bool,
    pso_cds_reset: bool,
    rng: TestRng,
}

impl MemoryPlatform {
    /// A freshly erased card: the pool reads as all-`0xFF` (matching real
    /// NAND/EEPROM erased state) and no key slots are occupied.
    pub fn new() -> MemoryPlatform {
        MemoryPlatform {
            pool: vec![0xff; POOL_CAPACITY],
            write_pos: 0,
            key_slots: Default::default(),
            admin_authorized: false,
            pso_cds_reset: false,
            rng: TestRng::new(0x5eed_5eed_5eed_5eedu64),
        }
    }

    /// Flips the simulated PW3 (admin) verification state, consumed by
    /// [`Platform::ac_check_status`] for [`AccessLevel::AdminAuthorized`].
    pub fn set_admin_authorized(&mut self, authorized: bool) {
        self.admin_authorized = authorized;
    }

    pub fn pso_cds_was_reset(&self) -> bool {
        self.pso_cds_reset
    }

    pub fn clear_pso_cds_reset_flag(&mut self) {
        self.pso_cds_reset = false;
    }
}

impl Default for MemoryPlatform {
    fn default() -> MemoryPlatform {
        MemoryPlatform::new()
    }
}

impl Platform for MemoryPlatform {
    fn nv_append(&mut self, framed_cell: &[u8]) -> Option<CellRef> {
        if self.write_pos + framed_cell.len() > self.pool.len() {
            return None;
        }
        let at = self.write_pos;
        self.pool[at..at + framed_cell.len()].copy_from_slice(framed_cell);
        self.write_pos += framed_cell.len();
        Some(at)
    }

    fn nv_release(&mut self, cell: CellRef) {
        self.pool[cell] = 0x00;
        self.pool[cell + 1] = 0x00;
    }

    fn nv_scan_bytes(&self, start: CellRef) -> &[u8] {
        &self.pool[start..]
    }

    fn nv_set_tail(&mut self, tail: CellRef) {
        self.write_pos = tail;
    }

    fn nv_erase(&mut self) {
        self.pool.iter_mut().for_each(|b| *b = 0xff);
        self.write_pos = 0;
    }

    fn nv_clear_counter_bits(&mut self, counter_cell: CellRef, new_bytes: [u8; 2]) {
        self.pool[counter_cell + 2] = new_bytes[0];
        self.pool[counter_cell + 3] = new_bytes[1];
    }

    fn key_slot_alloc(&mut self) -> Option<KeySlotRef> {
        let idx = self.key_slots.iter().position(|s| s.is_none())?;
        self.key_slots[idx] = Some(([0u8; 128], [0u8; 256]));
        Some(idx)
    }

    fn key_slot_release(&mut self, slot: KeySlotRef) {
        self.key_slots[slot] = None;
    }

    fn key_slot_write(&mut self, slot: KeySlotRef, encrypted: &[u8; 128], modulus: &[u8; 256]) {
        self.key_slots[slot] = Some((*encrypted, *modulus));
    }

    fn key_slot_read_encrypted(&self, slot: KeySlotRef) -> [u8; 128] {
        self.key_slots[slot].expect("read of unallocated key slot").0
    }

    fn key_slot_read_modulus(&self, slot: KeySlotRef) -> [u8; 256] {
        self.key_slots[slot].expect("read of unallocated key slot").1
    }

    fn ac_check_status(&self, level: AccessLevel) -> bool {
        match level {
            AccessLevel::Always => true,
            AccessLevel::Never => false,
            AccessLevel::AdminAuthorized => self.admin_authorized,
        }
    }

    fn ac_reset_pso_cds(&mut self) {
        self.pso_cds_reset = true;
    }

    fn rng_bytes16(&mut self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.rng.next_u64().to_be_bytes());
        out[8..].copy_from_slice(&self.rng.next_u64().to_be_bytes());
        out
    }

    fn rng_u32(&mut self) -> u32 {
        (self.rng.next_u64() & 0xffff_ffff) as u32
    }

    fn sha1(&self, msg: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(msg);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    fn aes128_cfb128_encrypt(&self, key: &[u8; 16], data: &mut [u8]) {
        let iv = [0u8; 16];
        let mut cipher = CfbEnc::new(key.into(), &iv.into());
        cipher.apply_keystream(data);
    }

    fn aes128_cfb128_decrypt(&self, key: &[u8; 16], data: &mut [u8]) {
        let iv = [0u8; 16];
        let mut cipher = CfbDec::new(key.into(), &iv.into());
        cipher.apply_keystream(data);
    }

    fn modulus_calc(&self, key_data: &[u8; 128]) -> Option<[u8; 256]> {
        // RSA modulus computation is an out-of-scope collaborator
        // (spec.md §1); this test double derives a deterministic 256-byte
        // stand-in from the key content so tests can assert round-trips
        // without a real keygen.
        let mut out = [0u8; 256];
        for (i, chunk) in out.chunks_mut(20).enumerate() {
            let mut hasher = Sha1::new();
            hasher.update(key_data);
            hasher.update([i as u8]);
            let digest = hasher.finalize();
            let n = chunk.len();
            chunk.copy_from_slice(&digest[..n]);
        }
        Some(out)
    }
}
