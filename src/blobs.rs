//! Fixed compile-time Data Objects (`DoKind::Fixed`).
//!
//! These never touch the NV pool; they're assembled from [`CardConfig`]
//! and static templates every time they're read.

use crate::config::CardConfig;

/// OpenPGP application identifier, RID `D2 76 00 01 24` + app `01 02` +
/// version `00` + 2-byte manufacturer + 4-byte serial + `00 00`.
pub fn aid(config: &CardConfig) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..6].copy_from_slice(&[0xd2, 0x76, 0x00, 0x01, 0x24, 0x01]);
    out[6] = 0x02;
    out[7] = 0x00;
    out[8..10].copy_from_slice(&config.manufacturer);
    out[10..14].copy_from_slice(&config.serial);
    out[14] = 0x00;
    out[15] = 0x00;
    out
}

/// Historical bytes template, category indicator `00` + compact-TLV
/// card-service-data `31 80` + card-capabilities `73 80 01 40` + status `00 90 00`.
pub const HIST_BYTES: [u8; 10] = [0x00, 0x31, 0x80, 0x73, 0x80, 0x01, 0x40, 0x00, 0x90, 0x00];

/// Extended Capabilities: no SM/no get-challenge/no key-import support
/// flags off, followed by the max command and response APDU sizes.
pub fn extended_capabilities(config: &CardConfig) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0] = 0x30; // key-import + pw-status-change supported, no SM, no GET CHALLENGE
    out[1] = 0x00;
    out[2] = 0x00;
    out[3] = 0x00;
    out[4] = 0x00;
    out[5] = 0x00;
    out[6..8].copy_from_slice(&config.max_cmd_apdu_size.to_be_bytes());
    out[8..10].copy_from_slice(&config.max_res_apdu_size.to_be_bytes());
    out
}

/// Algorithm attributes shared by all three key roles: RSA, 2048-bit
/// modulus, 32-bit public exponent, "standard" key format.
pub const ALGORITHM_ATTRIBUTES: [u8; 6] = [0x01, 0x08, 0x00, 0x00, 0x20, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aid_places_the_manufacturer_and_serial_bit_exactly() {
        // spec.md §6: `D2 76 00 01 24 01 02 00 <mfr> <serial×4> 00 00`,
        // with `<mfr>` two bytes wide so the 4-byte serial lands at
        // offsets 10-13.
        let config = CardConfig { manufacturer: [0xab, 0xcd], serial: [1, 2, 3, 4], ..CardConfig::default() };
        assert_eq!(
            aid(&config),
            [0xd2, 0x76, 0x00, 0x01, 0x24, 0x01, 0x02, 0x00, 0xab, 0xcd, 1, 2, 3, 4, 0x00, 0x00]
        );
    }
}
