//! Native type descriptors and entry-point signature synthesis
//!
//! Device entry points are plain native functions; this module converts the
//! argument descriptors of an [`Overload`] into the parameter list of the
//! exported function. Each argument contributes zero, one, or two native
//! parameters:
//!
//! - a runtime value of a non-slice type contributes one parameter,
//! - a runtime slice contributes two (a many-pointer then an element count),
//! - compile-time constants and bare type arguments contribute nothing; they
//!   are materialised at the call site inside the synthesised body.

use std::fmt;

use crate::value::{AbiValue, Overload, PointerSize};
use crate::{AbiError, Result};

/// A native (machine-level) type used in a synthesised entry-point signature.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NativeType {
    Int { signed: bool, bits: u16 },
    Float { bits: u16 },
    Bool,
    Array { len: u64, elem: Box<NativeType> },
    Ptr { is_const: bool, alignment: u32, pointee: Box<NativeType> },
    /// Pointer-width element count accompanying a split slice.
    Usize,
}

impl NativeType {
    /// Convert a type-variant [`AbiValue`] into its native descriptor.
    ///
    /// Slice pointers have no single native form (they are split into two
    /// parameters by [`entry_point_params`]) and are rejected here, as is any
    /// non-type variant.
    pub fn from_abi(value: &AbiValue) -> Result<Self> {
        match value {
            AbiValue::Int(t) => Ok(NativeType::Int {
                signed: t.is_signed(),
                bits: t.bits,
            }),
            AbiValue::Float(t) => Ok(NativeType::Float { bits: t.bits }),
            AbiValue::Bool => Ok(NativeType::Bool),
            AbiValue::Array(a) => Ok(NativeType::Array {
                len: a.len,
                elem: Box::new(NativeType::from_abi(&a.child)?),
            }),
            AbiValue::Pointer(p) => match p.size {
                PointerSize::Slice => Err(AbiError::UnsupportedAbiValue(value.to_string())),
                PointerSize::One | PointerSize::Many => Ok(NativeType::Ptr {
                    is_const: p.is_const,
                    alignment: p.alignment,
                    pointee: Box::new(NativeType::from_abi(&p.child)?),
                }),
            },
            AbiValue::ConstInt(_) | AbiValue::ConstBool(_) | AbiValue::RuntimeValue(_) => {
                Err(AbiError::UnsupportedAbiValue(value.to_string()))
            }
        }
    }

    /// Convert a native descriptor back to the corresponding type-variant
    /// [`AbiValue`]. One-pointers and many-pointers both come back as
    /// many-pointers; the distinction does not survive the native boundary.
    pub fn to_abi(&self) -> Result<AbiValue> {
        match self {
            NativeType::Int { signed: true, bits } => AbiValue::sint(*bits),
            NativeType::Int { signed: false, bits } => AbiValue::uint(*bits),
            NativeType::Float { bits } => AbiValue::float(*bits),
            NativeType::Bool => Ok(AbiValue::Bool),
            NativeType::Array { len, elem } => Ok(AbiValue::array(*len, elem.to_abi()?)),
            NativeType::Ptr {
                is_const,
                alignment,
                pointee,
            } => Ok(AbiValue::pointer(PointerSize::Many, *is_const, *alignment, pointee.to_abi()?)),
            NativeType::Usize => Err(AbiError::UnsupportedAbiValue("usize".into())),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Int { signed: true, bits } => write!(f, "i{bits}"),
            NativeType::Int { signed: false, bits } => write!(f, "u{bits}"),
            NativeType::Float { bits } => write!(f, "f{bits}"),
            NativeType::Bool => write!(f, "bool"),
            NativeType::Array { len, elem } => write!(f, "[{elem}; {len}]"),
            NativeType::Ptr {
                is_const: true,
                pointee,
                ..
            } => write!(f, "*const {pointee}"),
            NativeType::Ptr {
                is_const: false,
                pointee,
                ..
            } => write!(f, "*mut {pointee}"),
            NativeType::Usize => write!(f, "usize"),
        }
    }
}

/// Derive the native parameter list of the entry point synthesised for one
/// overload.
///
/// Walks the arguments in order. Runtime slices expand to a
/// `(many-pointer, usize)` pair preserving constness and alignment; constants
/// and bare type arguments are elided. A runtime argument whose type cannot
/// be expressed natively is an error.
pub fn entry_point_params(overload: &Overload) -> Result<Vec<NativeType>> {
    let mut params = Vec::with_capacity(overload.len());
    for arg in overload.args() {
        match arg {
            AbiValue::RuntimeValue(child) => match child.as_ref() {
                AbiValue::Pointer(p) if p.size == PointerSize::Slice => {
                    params.push(NativeType::Ptr {
                        is_const: p.is_const,
                        alignment: p.alignment,
                        pointee: Box::new(NativeType::from_abi(&p.child)?),
                    });
                    params.push(NativeType::Usize);
                }
                other => params.push(NativeType::from_abi(other)?),
            },
            AbiValue::ConstInt(_) | AbiValue::ConstBool(_) => {}
            // A bare type argument is compile-time too.
            ty if ty.is_type() => {}
            other => return Err(AbiError::UnsupportedAbiValue(other.to_string())),
        }
    }
    Ok(params)
}

// ================================================================================================
// Tests
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{IntType, Signedness};

    fn rt(v: AbiValue) -> AbiValue {
        AbiValue::runtime(v).unwrap()
    }

    #[test]
    fn test_scalar_params() {
        let overload = Overload::new(vec![
            rt(AbiValue::uint(32).unwrap()),
            rt(AbiValue::float(64).unwrap()),
            rt(AbiValue::Bool),
        ])
        .unwrap();
        let params = entry_point_params(&overload).unwrap();
        assert_eq!(
            params,
            vec![
                NativeType::Int { signed: false, bits: 32 },
                NativeType::Float { bits: 64 },
                NativeType::Bool,
            ]
        );
    }

    #[test]
    fn test_slice_splits_into_pointer_and_len() {
        let slice = AbiValue::pointer(PointerSize::Slice, true, 4, AbiValue::float(32).unwrap());
        let params = entry_point_params(&Overload::new(vec![rt(slice)]).unwrap()).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(
            params[0],
            NativeType::Ptr {
                is_const: true,
                alignment: 4,
                pointee: Box::new(NativeType::Float { bits: 32 }),
            }
        );
        assert_eq!(params[1], NativeType::Usize);
    }

    #[test]
    fn test_constants_and_types_contribute_nothing() {
        let overload = Overload::new(vec![
            AbiValue::sint(64).unwrap(),
            AbiValue::const_int(42u64),
            AbiValue::ConstBool(false),
            rt(AbiValue::uint(8).unwrap()),
        ])
        .unwrap();
        let params = entry_point_params(&overload).unwrap();
        assert_eq!(params, vec![NativeType::Int { signed: false, bits: 8 }]);
    }

    #[test]
    fn test_display_rust_types() {
        let p = NativeType::Ptr {
            is_const: false,
            alignment: 8,
            pointee: Box::new(NativeType::Int { signed: true, bits: 64 }),
        };
        assert_eq!(p.to_string(), "*mut i64");
        assert_eq!(NativeType::Usize.to_string(), "usize");
        assert_eq!(
            NativeType::Array {
                len: 4,
                elem: Box::new(NativeType::Bool)
            }
            .to_string(),
            "[bool; 4]"
        );
    }

    #[test]
    fn test_abi_native_roundtrip() {
        let abi = AbiValue::pointer(
            PointerSize::Many,
            true,
            8,
            AbiValue::array(2, AbiValue::Int(IntType::new(Signedness::Unsigned, 16).unwrap())),
        );
        let native = NativeType::from_abi(&abi).unwrap();
        assert_eq!(native.to_abi().unwrap(), abi);
    }

    #[test]
    fn test_rejects_exotic_shapes() {
        // A slice has no single native form.
        let slice = AbiValue::pointer(PointerSize::Slice, false, 1, AbiValue::Bool);
        assert!(NativeType::from_abi(&slice).is_err());
        // Value variants are not types.
        assert!(NativeType::from_abi(&AbiValue::const_int(1u64)).is_err());
    }
}
