//! Error and status-word types.
//!
//! A small hand-rolled enum, no `thiserror`, with a doc comment on each
//! variant stating the consequence for the caller.

/// Errors the engine surfaces internally; every public entry point maps
/// these down to a [`StatusWord`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EngineError {
    /// NV append returned null, a payload exceeded 255 bytes, or key-slot
    /// allocation failed. Fatal for the operation, not for the card.
    Memory,

    /// Read/write ACL denied, unknown keystring on rewrap, integrity-magic
    /// mismatch on key unseal, or an attempt to invoke a read-only DO via
    /// PUT. Any partial response buffer is discarded.
    Security,

    /// The tag is absent from the catalog.
    RecordNotFound,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// APDU status word (`SW1 SW2`), as returned by the GET/PUT façade.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    pub const MEMORY_FAILURE: StatusWord = StatusWord(0x6a84);
    pub const SECURITY_FAILURE: StatusWord = StatusWord(0x6982);
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord(0x6a88);

    pub fn from_result(result: EngineResult<()>) -> StatusWord {
        match result {
            Ok(()) => StatusWord::SUCCESS,
            Err(EngineError::Memory) => StatusWord::MEMORY_FAILURE,
            Err(EngineError::Security) => StatusWord::SECURITY_FAILURE,
            Err(EngineError::RecordNotFound) => StatusWord::RECORD_NOT_FOUND,
        }
    }
}

impl From<EngineError> for StatusWord {
    fn from(error: EngineError) -> StatusWord {
        StatusWord::from_result(Err(error))
    }
}
