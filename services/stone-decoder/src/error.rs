use thiserror::Error;

/// Failure to decode a single event whose `action` attribute names a
/// recognized operation. Per `spec.md` §4.2, the caller treats every
/// variant here as non-fatal: log a warning, drop the event, keep going.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{action} event missing required attribute '{field}'")]
    MissingAttribute { action: String, field: String },

    #[error("{action} event attribute '{field}' is not a valid decimal: '{value}'")]
    InvalidDecimal {
        action: String,
        field: String,
        value: String,
    },

    #[error("{action} event attribute '{field}' is not a valid boolean: '{value}'")]
    InvalidBool {
        action: String,
        field: String,
        value: String,
    },
}
