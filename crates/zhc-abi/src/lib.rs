//! # zhc-abi — kernel-argument value model and symbol mangling
//!
//! The ABI-level glue between a host binary and its device kernels. A launch
//! site describes its arguments as a tree of [`AbiValue`]s; the tree is
//! encoded into the launch symbol (`__zhc_ka_…`) by the `mangle` module,
//! recovered by the build driver from the host binary's symbol table, and
//! matched against device-side definition symbols (`__zhc_kd_…`).
//!
//! Layering:
//! - `value` — the `AbiValue` union and the `Overload`/`KernelConfig` types
//! - `mangle` — the bidirectional symbol encoding
//! - `native` — entry-point signature synthesis (slice splitting, constant
//!   elision)
//! - `set` — the deduplicated, grouped `OverloadSet`

pub mod mangle;
pub mod native;
pub mod set;
pub mod value;

pub use mangle::{
    demangle_config, demangle_value, define_symbol, launch_symbol, mangle_config, mangle_value, MangleError,
    DEFINE_SYMBOL_PREFIX, LAUNCH_SYMBOL_PREFIX,
};
pub use native::{entry_point_params, NativeType};
pub use set::OverloadSet;
pub use value::{
    AbiValue, ArrayType, ConstInt, FloatType, IntType, Kernel, KernelConfig, Overload, PointerSize, PointerType,
    Signedness, MAX_OVERLOAD_ARGS,
};

/// Result type for value-model operations.
pub type Result<T> = std::result::Result<T, AbiError>;

/// Errors raised while constructing or converting ABI values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("invalid integer width: {0} (must be in 1..=65535)")]
    InvalidIntWidth(u32),

    #[error("invalid float width: {0} (must be 16, 32, or 64)")]
    InvalidFloatWidth(u32),

    #[error("runtime value wrapper requires a type, got `{0}`")]
    NotAType(String),

    #[error("overload has {0} arguments (max {MAX_OVERLOAD_ARGS})")]
    TooManyArguments(usize),

    #[error("unsupported abi value: {0}")]
    UnsupportedAbiValue(String),
}
