//! External collaborator interface.
//!
//! Everything the engine needs from the surrounding firmware — the NV
//! programming driver, the key-slot arena, the authentication subsystem's
//! access-control state, the RNG, and the two crypto primitives the
//! envelope protocol wraps around (SHA-1, AES-128-CFB128) — is gathered
//! into a single [`Platform`] trait, one generic collaborator rather than
//! wiring each concern through a separate type parameter.
//!
//! None of these methods are implemented by this crate for production use;
//! `crate::testing` provides an in-memory `Platform` for tests.

use crate::error::EngineError;

/// One of the three access-control gates the DO catalog consults.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    /// No check; always readable/writable.
    Always,
    /// Always denied (used for write-only or not-yet-supported DOs).
    Never,
    /// Requires PW3 (admin) to have been verified this session.
    AdminAuthorized,
}

/// Opaque reference to an appended cell, as returned by [`Platform::nv_append`].
///
/// Mirrors `nv_append_cell(...) -> ptr | null`: the engine never interprets
/// the value, only stores it back for a later [`Platform::nv_release`].
pub type CellRef = usize;

/// Opaque reference to a key-slot-arena allocation.
pub type KeySlotRef = usize;

/// The collaborator surface the engine is generic over.
pub trait Platform {
    // --- NV pool allocator -------------------------------------------------
    /// Appends one fully-framed cell (header byte `nr`, then
    /// `len_or_byte`, then any payload/pad bytes — whatever
    /// [`crate::cell`]'s `frame_*` helpers produced) to the tail of the NV
    /// pool. Returns `None` on exhaustion (mapped by the engine to
    /// [`EngineError::Memory`]).
    fn nv_append(&mut self, framed_cell: &[u8]) -> Option<CellRef>;

    /// Overwrites a cell's two-byte header with `0x0000`, releasing it.
    fn nv_release(&mut self, cell: CellRef);

    /// Returns the raw pool bytes from `start` to the current tail, used by
    /// the scanner. The byte at the returned tail is `NR_EMPTY` (`0xFF`).
    fn nv_scan_bytes(&self, start: CellRef) -> &[u8];

    /// Re-anchors the allocator's notion of the tail, used after a boot
    /// scan or a compaction has determined where the live log ends.
    fn nv_set_tail(&mut self, tail: CellRef);

    /// Erases the whole pool and begins writing at offset 0. Used by
    /// compaction, which always rewrites into a freshly erased region.
    fn nv_erase(&mut self);

    /// Clears bits in place within an already-appended PIN-error-counter
    /// cell's two count bytes, without appending a new cell. `new_bytes`
    /// must only clear bits relative to what is currently stored (the
    /// only NV transition legal without an erase) — callers derive it via
    /// [`crate::cell::unary_increment`].
    fn nv_clear_counter_bits(&mut self, counter_cell: CellRef, new_bytes: [u8; 2]);

    // --- key-slot arena ----------------------------------------------------
    /// Allocates one 384-byte key slot (128 encrypted + 256 modulus).
    fn key_slot_alloc(&mut self) -> Option<KeySlotRef>;
    fn key_slot_release(&mut self, slot: KeySlotRef);
    fn key_slot_write(&mut self, slot: KeySlotRef, encrypted: &[u8; 128], modulus: &[u8; 256]);
    fn key_slot_read_encrypted(&self, slot: KeySlotRef) -> [u8; 128];
    fn key_slot_read_modulus(&self, slot: KeySlotRef) -> [u8; 256];

    // --- access control ------------------------------------------------------
    fn ac_check_status(&self, level: AccessLevel) -> bool;
    fn ac_reset_pso_cds(&mut self);

    // --- randomness ------------------------------------------------------------
    fn rng_bytes16(&mut self) -> [u8; 16];
    fn rng_u32(&mut self) -> u32;

    // --- crypto primitives (implemented by the surrounding firmware, invoked only here) ---
    fn sha1(&self, msg: &[u8]) -> [u8; 20];

    /// AES-128-CFB128 with an all-zero IV, encrypting `data` in place.
    /// The fixed IV is inherent to the envelope protocol.
    fn aes128_cfb128_encrypt(&self, key: &[u8; 16], data: &mut [u8]);
    /// Inverse of [`Platform::aes128_cfb128_encrypt`].
    fn aes128_cfb128_decrypt(&self, key: &[u8; 16], data: &mut [u8]);

    /// Computes the 256-byte big-endian modulus for a 128-byte private key
    /// blob, or `None` on failure. RSA keygen itself is a collaborator
    /// concern the engine never performs.
    fn modulus_calc(&self, key_data: &[u8; 128]) -> Option<[u8; 256]>;
}

/// Helper converting an `Option` from a collaborator allocation into the
/// engine's memory-failure error.
pub(crate) fn require<T>(x: Option<T>) -> Result<T, EngineError> {
    x.ok_or_else(|| {
        log::error!("pool/key-slot allocation exhausted");
        EngineError::Memory
    })
}
