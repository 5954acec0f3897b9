//! # zhc-msgpack — streaming msgpack reader for device-object metadata
//!
//! Device objects carry their kernel metadata as msgpack-encoded notes; this
//! crate reads that wire format without copying. The [`Reader`] tokenizes a
//! contiguous byte range (string and binary tokens are slices into it, so the
//! source must outlive and not be mutated before the parsed values are used),
//! and the `schema` module layers field-tracked map parsing, length-checked
//! arrays, range-checked scalars, optionals, and string-keyed enums on top.
//!
//! A matching [`Writer`] emits the same wire format; tooling and tests use it
//! to synthesise metadata blobs.

pub mod reader;
pub mod schema;
pub mod writer;

pub use reader::{Reader, Token};
pub use schema::{FieldTracker, MapReader};
pub use writer::Writer;

/// Result type for msgpack operations.
pub type Result<T> = std::result::Result<T, MsgpackError>;

/// Errors raised by the tokenizer and the schema layer.
///
/// The distinctions matter to tests and diagnostics; callers at the step
/// boundary typically collapse all of them into a single "malformed object"
/// error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MsgpackError {
    #[error("invalid msgpack format: {0}")]
    InvalidFormat(String),

    #[error("unexpected end of input at byte {0}")]
    UnexpectedEnd(usize),

    #[error("duplicate map key `{0}`")]
    DuplicateField(String),

    #[error("unknown map key `{0}`")]
    UnknownField(String),

    #[error("missing required map key `{0}`")]
    MissingField(String),

    #[error("mismatched array length: expected {expected}, got {actual}")]
    MismatchedArrayLength { expected: u32, actual: u32 },

    #[error("integer {value} overflows the target range")]
    Overflow { value: i128 },

    #[error("`{0}` is not a known enumeration value")]
    InvalidEnumKey(String),
}
