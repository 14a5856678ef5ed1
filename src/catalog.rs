//! Data Object catalog and access dispatch.
//!
//! Every GET/PUT DATA request is resolved to one [`DoEntry`] by its tag.
//! The entry says which of six shapes the object has, and which
//! [`AccessLevel`] gates a read or a write of it; [`crate::facade`] is the
//! only module that consults this table.

use crate::collab::AccessLevel;

/// The six DO shapes the catalog can describe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DoKind {
    /// A compile-time constant blob (AID, extended capabilities, ...).
    Fixed,
    /// A stored variable-length value, read and written verbatim.
    Var,
    /// A compound object assembled by concatenating other tags' BER-TLV
    /// framings (Cardholder Data, Application Data, Security Support
    /// Template).
    CmpRead,
    /// Computed on read from other storage (no DO cell of its own).
    ProcRead,
    /// Consumed on write by a procedural handler (no DO cell of its own).
    ProcWrite,
    /// Both computed on read and consumed on write by procedural handlers.
    ProcReadWrite,
}

/// One catalog entry.
#[derive(Copy, Clone, Debug)]
pub struct DoEntry {
    pub tag: u16,
    pub kind: DoKind,
    pub read_access: AccessLevel,
    pub write_access: AccessLevel,
    /// The storage cell number for `Var`-kind entries; unused otherwise.
    pub nr: u8,
}

macro_rules! do_entry {
    ($tag:expr, $kind:expr, $read:expr, $write:expr, $nr:expr) => {
        DoEntry { tag: $tag, kind: $kind, read_access: $read, write_access: $write, nr: $nr }
    };
}

pub const TAG_NAME: u16 = 0x005b;
pub const TAG_LOGIN_DATA: u16 = 0x005e;
pub const TAG_LANGUAGE: u16 = 0x5f2d;
pub const TAG_SEX: u16 = 0x5f35;
pub const TAG_URL: u16 = 0x5f50;
pub const TAG_HIST_BYTES: u16 = 0x5f52;
pub const TAG_CH_DATA: u16 = 0x0065;
pub const TAG_APP_DATA: u16 = 0x006e;
pub const TAG_SS_TEMP: u16 = 0x007a;
pub const TAG_AID: u16 = 0x004f;
pub const TAG_DS_COUNT: u16 = 0x0093;
pub const TAG_EXTCAP: u16 = 0x00c0;
pub const TAG_ALG_SIG: u16 = 0x00c1;
pub const TAG_ALG_DEC: u16 = 0x00c2;
pub const TAG_ALG_AUT: u16 = 0x00c3;
pub const TAG_PW_STATUS: u16 = 0x00c4;
pub const TAG_FP_ALL: u16 = 0x00c5;
pub const TAG_CAFP_ALL: u16 = 0x00c6;
pub const TAG_FP_SIG: u16 = 0x00c7;
pub const TAG_FP_DEC: u16 = 0x00c8;
pub const TAG_FP_AUT: u16 = 0x00c9;
pub const TAG_CAFP_1: u16 = 0x00ca;
pub const TAG_CAFP_2: u16 = 0x00cb;
pub const TAG_CAFP_3: u16 = 0x00cc;
pub const TAG_KGTIME_ALL: u16 = 0x00cd;
pub const TAG_KGTIME_SIG: u16 = 0x00ce;
pub const TAG_KGTIME_DEC: u16 = 0x00cf;
pub const TAG_KGTIME_AUT: u16 = 0x00d0;
pub const TAG_RESETTING_CODE: u16 = 0x00d3;
pub const TAG_KEY_IMPORT: u16 = 0x3fff;
pub const TAG_CH_CERTIFICATE: u16 = 0x7f21;

/// Storage cell numbers for the `Var`-kind DOs. Distinct from the DSC and
/// PIN-counter `nr` ranges reserved in [`crate::cell`].
pub const NR_SEX: u8 = 0x01;
pub const NR_FP_SIG: u8 = 0x02;
pub const NR_FP_DEC: u8 = 0x03;
pub const NR_FP_AUT: u8 = 0x04;
pub const NR_CAFP_1: u8 = 0x05;
pub const NR_CAFP_2: u8 = 0x06;
pub const NR_CAFP_3: u8 = 0x07;
pub const NR_KGTIME_SIG: u8 = 0x08;
pub const NR_KGTIME_DEC: u8 = 0x09;
pub const NR_KGTIME_AUT: u8 = 0x0a;
pub const NR_LOGIN_DATA: u8 = 0x0b;
pub const NR_URL: u8 = 0x0c;
pub const NR_NAME: u8 = 0x0d;
pub const NR_LANGUAGE: u8 = 0x0e;
pub const NR_KEYSTRING_PW1: u8 = 0x0f;
pub const NR_KEYSTRING_RC: u8 = 0x10;
pub const NR_KEYSTRING_PW3: u8 = 0x11;
pub const NR_PRVKEY_SIG: u8 = 0x12;
pub const NR_PRVKEY_DEC: u8 = 0x13;
pub const NR_PRVKEY_AUT: u8 = 0x14;

const N: u8 = 0; // placeholder `nr` for entries with no storage cell

/// The full dispatch table, mirroring the original firmware's
/// `gpg_do_table[]` order.
pub const DO_TABLE: &[DoEntry] = &[
    do_entry!(TAG_SEX, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_SEX),
    do_entry!(TAG_FP_SIG, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_FP_SIG),
    do_entry!(TAG_FP_DEC, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_FP_DEC),
    do_entry!(TAG_FP_AUT, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_FP_AUT),
    do_entry!(TAG_CAFP_1, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_CAFP_1),
    do_entry!(TAG_CAFP_2, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_CAFP_2),
    do_entry!(TAG_CAFP_3, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_CAFP_3),
    do_entry!(TAG_KGTIME_SIG, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_KGTIME_SIG),
    do_entry!(TAG_KGTIME_DEC, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_KGTIME_DEC),
    do_entry!(TAG_KGTIME_AUT, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_KGTIME_AUT),
    do_entry!(TAG_LOGIN_DATA, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_LOGIN_DATA),
    do_entry!(TAG_URL, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_URL),
    do_entry!(TAG_NAME, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_NAME),
    do_entry!(TAG_LANGUAGE, DoKind::Var, AccessLevel::Always, AccessLevel::AdminAuthorized, NR_LANGUAGE),
    do_entry!(TAG_HIST_BYTES, DoKind::ProcRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_FP_ALL, DoKind::ProcRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_CAFP_ALL, DoKind::ProcRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_KGTIME_ALL, DoKind::ProcRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_DS_COUNT, DoKind::ProcRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_PW_STATUS, DoKind::ProcReadWrite, AccessLevel::Always, AccessLevel::AdminAuthorized, N),
    do_entry!(TAG_AID, DoKind::Fixed, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_EXTCAP, DoKind::Fixed, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_ALG_SIG, DoKind::Fixed, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_ALG_DEC, DoKind::Fixed, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_ALG_AUT, DoKind::Fixed, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_CH_DATA, DoKind::CmpRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_APP_DATA, DoKind::CmpRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_SS_TEMP, DoKind::CmpRead, AccessLevel::Always, AccessLevel::Never, N),
    do_entry!(TAG_RESETTING_CODE, DoKind::ProcWrite, AccessLevel::Never, AccessLevel::AdminAuthorized, N),
    do_entry!(TAG_KEY_IMPORT, DoKind::ProcWrite, AccessLevel::Never, AccessLevel::AdminAuthorized, N),
    // Stubbed: the original firmware never implemented X.509 cardholder
    // certificate storage; both directions fail closed.
    do_entry!(TAG_CH_CERTIFICATE, DoKind::Var, AccessLevel::Never, AccessLevel::Never, N),
];

/// Constituent tags of the Cardholder Data compound object, in emission
/// order.
pub const CMP_CH_DATA: &[u16] = &[TAG_NAME, TAG_LANGUAGE, TAG_SEX];

/// Constituent tags of the Application Data compound object.
pub const CMP_APP_DATA: &[u16] =
    &[TAG_AID, TAG_HIST_BYTES, TAG_EXTCAP, TAG_ALG_SIG, TAG_ALG_DEC, TAG_ALG_AUT, TAG_PW_STATUS, TAG_FP_ALL, TAG_CAFP_ALL, TAG_KGTIME_ALL];

/// Constituent tags of the Security Support Template compound object.
pub const CMP_SS_TEMP: &[u16] = &[TAG_DS_COUNT];

pub fn lookup(tag: u16) -> Option<&'static DoEntry> {
    DO_TABLE.iter().find(|e| e.tag == tag)
}
