//! Kernel-argument value model
//!
//! This module defines the fundamental vocabulary of the launch protocol:
//! - `AbiValue`, a recursive tagged union of runtime type descriptors and
//!   compile-time values
//! - `Overload`, an ordered argument list for one launch instance
//! - `Kernel` and `KernelConfig`, the launch identity types
//!
//! Every value that crosses the host/device boundary is described by exactly
//! one `AbiValue` tree. Trees survive a round trip through an ELF symbol name
//! (see the `mangle` module) and compare structurally by value.

use num_bigint::BigUint;
use std::fmt;

use crate::{AbiError, Result};

/// Maximum number of arguments in a single overload.
pub const MAX_OVERLOAD_ARGS: usize = 32;

// ================================================================================================
// Leaf payloads
// ================================================================================================

/// Signedness of a runtime integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// Runtime integer type of arbitrary bit width (1..=65535).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IntType {
    pub signedness: Signedness,
    pub bits: u16,
}

impl IntType {
    /// Create an integer type descriptor. Zero-width integers are rejected.
    pub fn new(signedness: Signedness, bits: u16) -> Result<Self> {
        if bits == 0 {
            return Err(AbiError::InvalidIntWidth(bits as u32));
        }
        Ok(IntType { signedness, bits })
    }

    pub const fn is_signed(self) -> bool {
        matches!(self.signedness, Signedness::Signed)
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signedness {
            Signedness::Signed => write!(f, "i{}", self.bits),
            Signedness::Unsigned => write!(f, "u{}", self.bits),
        }
    }
}

/// Runtime floating-point type. Only 16-, 32- and 64-bit floats exist on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FloatType {
    pub bits: u16,
}

impl FloatType {
    pub fn new(bits: u16) -> Result<Self> {
        match bits {
            16 | 32 | 64 => Ok(FloatType { bits }),
            other => Err(AbiError::InvalidFloatWidth(other as u32)),
        }
    }
}

impl fmt::Display for FloatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.bits)
    }
}

/// Addressing shape of a pointer argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PointerSize {
    /// Pointer to exactly one element.
    One,
    /// Pointer to an unknown number of elements.
    Many,
    /// Pointer plus element count; split into `(many, usize)` at entry-point
    /// synthesis.
    Slice,
}

/// Fixed-length array type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ArrayType {
    pub len: u64,
    pub child: Box<AbiValue>,
}

/// Pointer type. Never ABI-safe: host and device pointer representations may
/// differ, so pointers are always rewritten at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PointerType {
    pub size: PointerSize,
    pub is_const: bool,
    /// Alignment carried by the launch site, in bytes.
    pub alignment: u32,
    pub child: Box<AbiValue>,
}

/// Compile-time integer of unbounded magnitude.
///
/// Stored as sign plus magnitude and kept normalised: zero is never negative
/// and the magnitude carries no leading zero limbs (delegated to [`BigUint`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ConstInt {
    negative: bool,
    magnitude: BigUint,
}

impl ConstInt {
    /// Build a constant from sign and magnitude, normalising negative zero.
    pub fn new(negative: bool, magnitude: BigUint) -> Self {
        let negative = negative && magnitude.bits() != 0;
        ConstInt { negative, magnitude }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> &BigUint {
        &self.magnitude
    }
}

impl From<u64> for ConstInt {
    fn from(v: u64) -> Self {
        ConstInt::new(false, BigUint::from(v))
    }
}

impl From<i64> for ConstInt {
    fn from(v: i64) -> Self {
        ConstInt::new(v < 0, BigUint::from(v.unsigned_abs()))
    }
}

impl From<i128> for ConstInt {
    fn from(v: i128) -> Self {
        ConstInt::new(v < 0, BigUint::from(v.unsigned_abs()))
    }
}

impl fmt::Display for ConstInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

// ================================================================================================
// AbiValue
// ================================================================================================

/// One kernel argument descriptor.
///
/// The type variants (`Int`, `Float`, `Bool`, `Array`, `Pointer`) describe a
/// runtime type; the value variants (`ConstInt`, `ConstBool`) describe a
/// compile-time value materialised at the call site; `RuntimeValue` marks an
/// argument position where a runtime value of the wrapped type is passed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AbiValue {
    Int(IntType),
    Float(FloatType),
    Bool,
    Array(ArrayType),
    Pointer(PointerType),
    ConstInt(ConstInt),
    ConstBool(bool),
    RuntimeValue(Box<AbiValue>),
}

impl AbiValue {
    /// Unsigned runtime integer type of the given width.
    pub fn uint(bits: u16) -> Result<Self> {
        Ok(AbiValue::Int(IntType::new(Signedness::Unsigned, bits)?))
    }

    /// Signed runtime integer type of the given width.
    pub fn sint(bits: u16) -> Result<Self> {
        Ok(AbiValue::Int(IntType::new(Signedness::Signed, bits)?))
    }

    /// Runtime float type of the given width.
    pub fn float(bits: u16) -> Result<Self> {
        Ok(AbiValue::Float(FloatType::new(bits)?))
    }

    /// Fixed-length array of `child`.
    pub fn array(len: u64, child: AbiValue) -> Self {
        AbiValue::Array(ArrayType {
            len,
            child: Box::new(child),
        })
    }

    /// Pointer of the given shape to `child`.
    pub fn pointer(size: PointerSize, is_const: bool, alignment: u32, child: AbiValue) -> Self {
        AbiValue::Pointer(PointerType {
            size,
            is_const,
            alignment,
            child: Box::new(child),
        })
    }

    /// Compile-time integer constant.
    pub fn const_int(value: impl Into<ConstInt>) -> Self {
        AbiValue::ConstInt(value.into())
    }

    /// Marker for a runtime value of the given type. The child must satisfy
    /// [`AbiValue::is_type`].
    pub fn runtime(child: AbiValue) -> Result<Self> {
        if !child.is_type() {
            return Err(AbiError::NotAType(child.to_string()));
        }
        Ok(AbiValue::RuntimeValue(Box::new(child)))
    }

    /// Does this variant describe a runtime type (as opposed to a
    /// compile-time value or a runtime-value marker)?
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            AbiValue::Int(_) | AbiValue::Float(_) | AbiValue::Bool | AbiValue::Array(_) | AbiValue::Pointer(_)
        )
    }

    /// Is this type safe to pass across the host/device boundary by memory
    /// layout alone?
    ///
    /// Pointers are never safe (pointer width may differ between sides);
    /// arrays inherit safety from their element type. Value variants and
    /// runtime-value markers are not types and report `false`.
    pub fn is_abi_safe(&self) -> bool {
        match self {
            AbiValue::Int(_) | AbiValue::Float(_) | AbiValue::Bool => true,
            AbiValue::Array(a) => a.child.is_abi_safe(),
            AbiValue::Pointer(_) => false,
            AbiValue::ConstInt(_) | AbiValue::ConstBool(_) | AbiValue::RuntimeValue(_) => false,
        }
    }
}

impl fmt::Display for AbiValue {
    /// Source-syntax rendering used in user-facing diagnostics. Pointer
    /// alignment is intentionally elided here; it is preserved in `Debug`
    /// output and in the mangled form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiValue::Int(t) => write!(f, "{t}"),
            AbiValue::Float(t) => write!(f, "{t}"),
            AbiValue::Bool => write!(f, "bool"),
            AbiValue::Array(a) => write!(f, "[{}; {}]", a.child, a.len),
            AbiValue::Pointer(p) => match (p.size, p.is_const) {
                (PointerSize::One, true) => write!(f, "&{}", p.child),
                (PointerSize::One, false) => write!(f, "&mut {}", p.child),
                (PointerSize::Many, true) => write!(f, "*const {}", p.child),
                (PointerSize::Many, false) => write!(f, "*mut {}", p.child),
                (PointerSize::Slice, true) => write!(f, "&[{}]", p.child),
                (PointerSize::Slice, false) => write!(f, "&mut [{}]", p.child),
            },
            AbiValue::ConstInt(v) => write!(f, "{v}"),
            AbiValue::ConstBool(v) => write!(f, "{v}"),
            AbiValue::RuntimeValue(child) => write!(f, "{child}"),
        }
    }
}

// ================================================================================================
// Overload / Kernel / KernelConfig
// ================================================================================================

/// One concrete choice of argument descriptors for a kernel launch.
///
/// Positional: index corresponds to argument position in the kernel's source
/// signature. Limited to [`MAX_OVERLOAD_ARGS`] entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Overload {
    args: Vec<AbiValue>,
}

impl Overload {
    pub fn new(args: Vec<AbiValue>) -> Result<Self> {
        if args.len() > MAX_OVERLOAD_ARGS {
            return Err(AbiError::TooManyArguments(args.len()));
        }
        Ok(Overload { args })
    }

    /// The empty overload (a zero-argument launch).
    pub fn empty() -> Self {
        Overload { args: Vec::new() }
    }

    pub fn args(&self) -> &[AbiValue] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// A named device kernel. The name is an opaque identifier chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Kernel {
    pub name: String,
}

impl Kernel {
    pub fn new(name: impl Into<String>) -> Self {
        Kernel { name: name.into() }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One concrete launch instance: a kernel plus one overload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct KernelConfig {
    pub kernel: Kernel,
    pub overload: Overload,
}

impl KernelConfig {
    pub fn new(kernel: Kernel, overload: Overload) -> Self {
        KernelConfig { kernel, overload }
    }
}

impl fmt::Display for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kernel, self.overload)
    }
}

// ================================================================================================
// Tests
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_width_validation() {
        assert!(IntType::new(Signedness::Unsigned, 0).is_err());
        assert!(IntType::new(Signedness::Unsigned, 1).is_ok());
        assert!(IntType::new(Signedness::Signed, u16::MAX).is_ok());
    }

    #[test]
    fn test_float_width_validation() {
        for bits in [16, 32, 64] {
            assert!(FloatType::new(bits).is_ok());
        }
        assert!(FloatType::new(8).is_err());
        assert!(FloatType::new(128).is_err());
    }

    #[test]
    fn test_runtime_value_requires_type() {
        assert!(AbiValue::runtime(AbiValue::uint(32).unwrap()).is_ok());
        assert!(AbiValue::runtime(AbiValue::ConstBool(true)).is_err());
        assert!(AbiValue::runtime(AbiValue::const_int(7i64)).is_err());
    }

    #[test]
    fn test_const_int_normalisation() {
        let zero = ConstInt::new(true, BigUint::from(0u32));
        assert!(!zero.is_negative());
        let neg: ConstInt = (-3i64).into();
        assert!(neg.is_negative());
        assert_eq!(neg.to_string(), "-3");
    }

    #[test]
    fn test_abi_safety() {
        let u32t = AbiValue::uint(32).unwrap();
        assert!(u32t.is_abi_safe());
        assert!(AbiValue::Bool.is_abi_safe());
        assert!(AbiValue::array(4, u32t.clone()).is_abi_safe());

        let ptr = AbiValue::pointer(PointerSize::Many, false, 4, u32t.clone());
        assert!(!ptr.is_abi_safe());
        // Array of pointers inherits the pointer's unsafety.
        assert!(!AbiValue::array(2, ptr).is_abi_safe());
    }

    #[test]
    fn test_structural_equality_deep() {
        let mk = || {
            AbiValue::pointer(
                PointerSize::One,
                true,
                8,
                AbiValue::array(3, AbiValue::sint(64).unwrap()),
            )
        };
        let a = mk();
        let b = mk();
        // Reflexive, symmetric; distinct heap children compare by value.
        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);

        let c = AbiValue::pointer(
            PointerSize::One,
            true,
            8,
            AbiValue::array(3, AbiValue::sint(32).unwrap()),
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_equality_wide_const_int() {
        let big = BigUint::parse_bytes(b"111122223333444455556666777", 16).unwrap();
        let a = AbiValue::ConstInt(ConstInt::new(true, big.clone()));
        let b = AbiValue::ConstInt(ConstInt::new(true, big));
        assert_eq!(a, b);
    }

    #[test]
    fn test_overload_limit() {
        let arg = AbiValue::runtime(AbiValue::uint(8).unwrap()).unwrap();
        assert!(Overload::new(vec![arg.clone(); MAX_OVERLOAD_ARGS]).is_ok());
        assert!(Overload::new(vec![arg; MAX_OVERLOAD_ARGS + 1]).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        // The serde derives back the driver's JSON diagnostics dumps.
        let value = AbiValue::runtime(AbiValue::pointer(
            PointerSize::Slice,
            true,
            8,
            AbiValue::array(4, AbiValue::sint(64).unwrap()),
        ))
        .unwrap();
        let json = serde_json::to_string(&value).unwrap();
        let back: AbiValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_display_source_syntax() {
        let u64t = AbiValue::uint(64).unwrap();
        let slice = AbiValue::pointer(PointerSize::Slice, true, 4, AbiValue::float(32).unwrap());
        let many = AbiValue::pointer(PointerSize::Many, false, 1, u64t.clone());
        let cfg = KernelConfig::new(
            Kernel::new("vadd"),
            Overload::new(vec![
                AbiValue::runtime(many).unwrap(),
                AbiValue::runtime(slice).unwrap(),
                AbiValue::const_int(-5i64),
            ])
            .unwrap(),
        );
        assert_eq!(cfg.to_string(), "vadd(*mut u64, &[f32], -5)");
    }
}
