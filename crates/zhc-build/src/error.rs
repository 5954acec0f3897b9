//! Driver error surface
//!
//! Every step failure funnels into [`DriverError`]. Lower layers keep their
//! own granular errors; at the step boundary they collapse into the kinds a
//! user acts on. A malformed msgpack note and a truncated section header are
//! both "this object is bad", so both arrive as [`DriverError::InvalidElf`]
//! with the offending path attached.

use std::io;
use std::path::PathBuf;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Structural error in a host or device object.
    #[error("invalid object {path}: {detail}")]
    InvalidElf { path: PathBuf, detail: String },

    /// A launch-site or definition symbol does not demangle.
    #[error("invalid mangled name in symbol `{symbol}`")]
    InvalidMangledName { symbol: String },

    /// A device object declared a kernel whose configuration the host never
    /// launches. Surfaced as a warning at the step level; this error kind
    /// exists for callers that opt into strict checking.
    #[error("unknown kernel configuration `{0}`")]
    UnknownConfig(String),

    /// The host requires overloads no device kernel exports; one
    /// source-syntax line per missing overload.
    #[error("device code declares no kernel for:\n{}", .0.join("\n"))]
    MissingKernelDeclaration(Vec<String>),

    /// No bundle entry id can be synthesised for the target.
    #[error("unsupported offload target: {0}")]
    UnsupportedTarget(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A host or device compiler subprocess failed.
    #[error("{program} exited with {status}: {stderr}")]
    CompilerFailed {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    /// A step referenced an output its dependencies never produced.
    #[error("step `{step}` is missing a dependency output")]
    MissingDependency { step: String },

    #[error("build graph contains a dependency cycle")]
    DependencyCycle,

    /// The outer framework requested cancellation; partial outputs stay in
    /// the scratch directory.
    #[error("build cancelled")]
    Cancelled,
}

impl DriverError {
    /// Process exit code reported for this error. Zero is reserved for
    /// success.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::InvalidElf { .. } => 2,
            DriverError::InvalidMangledName { .. } => 3,
            DriverError::UnknownConfig(_) => 4,
            DriverError::MissingKernelDeclaration(_) => 5,
            DriverError::UnsupportedTarget(_) => 6,
            DriverError::Io { .. } => 10,
            DriverError::CompilerFailed { .. } => 11,
            DriverError::MissingDependency { .. } | DriverError::DependencyCycle => 12,
            DriverError::Cancelled => 130,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DriverError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_elf(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        DriverError::InvalidElf {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
