//! Compile-time-ish configuration (ambient stack, SPEC_FULL.md §4).
//!
//! The original firmware hard-codes these as C `#define`s in `config.h`.
//! A port should not resurrect global `#define`s for things that vary per
//! card, so manufacturer/serial and the APDU size budgets live in a
//! [`CardConfig`] value passed into [`crate::Engine::new`]; only the sizes
//! that are part of the wire format itself (fingerprint length, key sizes)
//! stay as `pub const`s.

/// Card identity and APDU budget, supplied by the integrator.
#[derive(Clone, Copy, Debug)]
pub struct CardConfig {
    /// 2-byte manufacturer id placed in the AID.
    pub manufacturer: [u8; 2],
    /// 4-byte serial number placed in the AID.
    pub serial: [u8; 4],
    /// Maximum command APDU data length, reported in Extended Capabilities.
    pub max_cmd_apdu_size: u16,
    /// Maximum response APDU data length, reported in Extended Capabilities.
    pub max_res_apdu_size: u16,
}

impl Default for CardConfig {
    fn default() -> CardConfig {
        CardConfig {
            manufacturer: [0x00, 0x00],
            serial: [0, 0, 0, 1],
            max_cmd_apdu_size: 2048,
            max_res_apdu_size: 2048,
        }
    }
}

/// Number of PIN roles with individually tracked error counters.
pub const NUM_PW_ROLES: usize = 3;
pub const PW_ERR_PW1: usize = 0;
pub const PW_ERR_RC: usize = 1;
pub const PW_ERR_PW3: usize = 2;

/// `>=` this many consecutive errors, the PIN is locked.
pub const PASSWORD_ERRORS_MAX: u8 = 3;

/// Maximum reported PW length (spec.md §9, "Open question — PW1 max
/// length byte"): the original reports 127 for all three PWs; we keep the
/// simpler uniform value as the spec allows.
pub const PW_LEN_MAX: u8 = 127;

pub const SIZE_FINGERPRINT: usize = 20;
pub const SIZE_KEYGEN_TIME: usize = 4;
pub const SIZE_PW_STATUS_BYTES: usize = 7;

/// Size of one keystring record on the wire: one length byte plus a
/// 20-byte SHA-1 digest.
pub const KEYSTRING_RECORD_SIZE: usize = 21;

/// Size of a data-encryption key / AES-128 key.
pub const DEK_SIZE: usize = 16;

/// Key content length sealed inside `kd` (RSA-2048 CRT-ish private
/// material, as produced by the out-of-scope keygen collaborator).
pub const KEY_CONTENT_LEN: usize = 128;
/// Modulus length stored alongside the encrypted key material.
pub const MODULUS_LEN: usize = 256;
/// Fixed 8-byte magic stamped into every sealed key, used as the
/// wrong-PIN detector on unseal.
pub const KEY_MAGIC: [u8; 8] = [0x4d, 0x41, 0x47, 0x49, 0x43, 0x30, 0x30, 0x31]; // "MAGIC001"

/// The hard-coded initial User PIN (PW1) a freshly imported key is sealed
/// under when no user PIN has ever been set (spec.md §4.4 step 8).
pub const INITIAL_PW1: &[u8] = b"123456";
