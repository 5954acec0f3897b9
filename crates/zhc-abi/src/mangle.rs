//! Symbol-name mangling and demangling
//!
//! Encodes an [`AbiValue`] tree, and by extension a [`KernelConfig`], into a
//! compact printable suffix that survives a round trip through an ELF symbol
//! name. One tag byte per node, no separators inside a value, decimal numbers
//! unless noted:
//!
//! ```text
//! value  := int | uint | float | bool | array | ptr | const_int | const_bool | rtv
//! int    := 'i' bits            bits := 1..65535
//! uint   := 'u' bits
//! float  := 'f' bits
//! bool   := 'b'
//! array  := 'a' len value
//! ptr    := ('p'|'P'|'S') ('c'|'m') align value    p=one P=many S=slice; c=const m=mut
//! const_int  := 'I' hexdigits ('p'|'n')            magnitude then sign terminator
//! const_bool := 'T' | 'F'
//! rtv        := 'r' value                          value must be a type variant
//! ```
//!
//! A `KernelConfig` mangles as `<n>_<name><k><arg1>…<argk>` where `<n>` is
//! the decimal kernel-name length and `<k>` the decimal argument count. Full
//! symbols carry [`LAUNCH_SYMBOL_PREFIX`] at each launch site and
//! [`DEFINE_SYMBOL_PREFIX`] at each device-side definition.
//!
//! The encoding is prefix-free at the value level, so the demangler never
//! needs look-ahead beyond the current tag, and `demangle(mangle(x)) == x`
//! with the demangler consuming its input exactly.

use num_bigint::BigUint;
use std::fmt::Write as _;

use crate::value::{AbiValue, ConstInt, IntType, Kernel, KernelConfig, Overload, PointerSize, Signedness};

/// Prefix of the weak undefined reference emitted at every launch site.
pub const LAUNCH_SYMBOL_PREFIX: &str = "__zhc_ka_";

/// Prefix of the exported symbol at every device-side kernel definition.
pub const DEFINE_SYMBOL_PREFIX: &str = "__zhc_kd_";

/// The single error kind surfaced by demangling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MangleError {
    #[error("invalid mangled name: {0}")]
    InvalidMangledName(String),
}

pub type Result<T> = std::result::Result<T, MangleError>;

// ================================================================================================
// Mangling
// ================================================================================================

/// Append the mangled form of one value to `out`.
pub fn mangle_value(value: &AbiValue, out: &mut String) {
    match value {
        AbiValue::Int(IntType { signedness, bits }) => {
            let tag = match signedness {
                Signedness::Signed => 'i',
                Signedness::Unsigned => 'u',
            };
            let _ = write!(out, "{tag}{bits}");
        }
        AbiValue::Float(t) => {
            let _ = write!(out, "f{}", t.bits);
        }
        AbiValue::Bool => out.push('b'),
        AbiValue::Array(a) => {
            let _ = write!(out, "a{}", a.len);
            mangle_value(&a.child, out);
        }
        AbiValue::Pointer(p) => {
            out.push(match p.size {
                PointerSize::One => 'p',
                PointerSize::Many => 'P',
                PointerSize::Slice => 'S',
            });
            out.push(if p.is_const { 'c' } else { 'm' });
            let _ = write!(out, "{}", p.alignment);
            mangle_value(&p.child, out);
        }
        AbiValue::ConstInt(v) => {
            let _ = write!(out, "I{:x}", v.magnitude());
            out.push(if v.is_negative() { 'n' } else { 'p' });
        }
        AbiValue::ConstBool(true) => out.push('T'),
        AbiValue::ConstBool(false) => out.push('F'),
        AbiValue::RuntimeValue(child) => {
            out.push('r');
            mangle_value(child, out);
        }
    }
}

/// Mangle a full kernel configuration (without any symbol prefix).
pub fn mangle_config(config: &KernelConfig) -> String {
    let name = &config.kernel.name;
    let mut out = String::with_capacity(name.len() + 16);
    let _ = write!(out, "{}_{}{}", name.len(), name, config.overload.len());
    for arg in config.overload.args() {
        mangle_value(arg, &mut out);
    }
    out
}

/// Full launch-site symbol name for a configuration.
pub fn launch_symbol(config: &KernelConfig) -> String {
    format!("{LAUNCH_SYMBOL_PREFIX}{}", mangle_config(config))
}

/// Full device-definition symbol name for a configuration.
pub fn define_symbol(config: &KernelConfig) -> String {
    format!("{DEFINE_SYMBOL_PREFIX}{}", mangle_config(config))
}

// ================================================================================================
// Demangling
// ================================================================================================

/// Demangle a single value. The whole input must be consumed.
pub fn demangle_value(input: &str) -> Result<AbiValue> {
    let mut d = Demangler::new(input);
    let value = d.value()?;
    d.finish()?;
    Ok(value)
}

/// Demangle a kernel configuration suffix (no symbol prefix). The whole
/// input must be consumed.
pub fn demangle_config(input: &str) -> Result<KernelConfig> {
    let mut d = Demangler::new(input);
    let config = d.config()?;
    d.finish()?;
    Ok(config)
}

/// Cursor over a mangled byte string.
///
/// Each method consumes exactly the bytes of the construct it parses, so the
/// caller can verify full consumption with [`Demangler::finish`].
pub struct Demangler<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Demangler<'a> {
    pub fn new(input: &'a str) -> Self {
        Demangler { input, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn error(&self, detail: &str) -> MangleError {
        MangleError::InvalidMangledName(format!("{detail} at byte {} of `{}`", self.pos, self.input))
    }

    fn rest(&self) -> &'a [u8] {
        &self.input.as_bytes()[self.pos..]
    }

    fn bump(&mut self) -> Result<u8> {
        let byte = *self.rest().first().ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a decimal run into `u64`, then narrow. A decimal that overflows
    /// its target width is invalid.
    fn decimal<T: TryFrom<u64>>(&mut self) -> Result<T> {
        let digits = self.rest().iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(self.error("expected decimal digits"));
        }
        let mut acc: u64 = 0;
        for &b in &self.rest()[..digits] {
            acc = acc
                .checked_mul(10)
                .and_then(|acc| acc.checked_add((b - b'0') as u64))
                .ok_or_else(|| self.error("decimal overflows u64"))?;
        }
        self.pos += digits;
        T::try_from(acc).map_err(|_| self.error("decimal overflows target width"))
    }

    /// Parse one value.
    pub fn value(&mut self) -> Result<AbiValue> {
        match self.bump()? {
            b'i' => self.int(Signedness::Signed),
            b'u' => self.int(Signedness::Unsigned),
            b'f' => {
                let bits: u16 = self.decimal()?;
                AbiValue::float(bits).map_err(|_| self.error("invalid float width"))
            }
            b'b' => Ok(AbiValue::Bool),
            b'a' => {
                let len: u64 = self.decimal()?;
                let child = self.value()?;
                Ok(AbiValue::array(len, child))
            }
            tag @ (b'p' | b'P' | b'S') => self.pointer(tag),
            b'I' => self.const_int(),
            b'T' => Ok(AbiValue::ConstBool(true)),
            b'F' => Ok(AbiValue::ConstBool(false)),
            b'r' => {
                let child = self.value()?;
                AbiValue::runtime(child).map_err(|_| self.error("runtime value wraps a non-type"))
            }
            _ => Err(self.error("invalid tag byte")),
        }
    }

    fn int(&mut self, signedness: Signedness) -> Result<AbiValue> {
        let bits: u16 = self.decimal()?;
        IntType::new(signedness, bits)
            .map(AbiValue::Int)
            .map_err(|_| self.error("invalid integer width"))
    }

    fn pointer(&mut self, tag: u8) -> Result<AbiValue> {
        let size = match tag {
            b'p' => PointerSize::One,
            b'P' => PointerSize::Many,
            _ => PointerSize::Slice,
        };
        let is_const = match self.bump()? {
            b'c' => true,
            b'm' => false,
            _ => return Err(self.error("expected constness tag")),
        };
        let alignment: u32 = self.decimal()?;
        let child = self.value()?;
        Ok(AbiValue::pointer(size, is_const, alignment, child))
    }

    fn const_int(&mut self) -> Result<AbiValue> {
        let digits = self.rest().iter().take_while(|b| b.is_ascii_hexdigit()).count();
        if digits == 0 {
            return Err(self.error("expected hex digits"));
        }
        let hex = &self.rest()[..digits];
        let magnitude = BigUint::parse_bytes(hex, 16).ok_or_else(|| self.error("invalid hex magnitude"))?;
        self.pos += digits;
        let negative = match self.bump().map_err(|_| self.error("unterminated constant"))? {
            b'p' => false,
            b'n' => true,
            _ => return Err(self.error("expected sign terminator")),
        };
        // ConstInt::new renormalises `I0n` should a foreign mangler emit it.
        Ok(AbiValue::ConstInt(ConstInt::new(negative, magnitude)))
    }

    /// Parse a kernel configuration: `<n>_<name><k><args…>`.
    pub fn config(&mut self) -> Result<KernelConfig> {
        let name_len: usize = self.decimal()?;
        if self.bump()? != b'_' {
            return Err(self.error("expected `_` after name length"));
        }
        if self.rest().len() < name_len {
            return Err(self.error("kernel name runs past end of input"));
        }
        let name = &self.input[self.pos..self.pos + name_len];
        self.pos += name_len;

        let arg_count: usize = self.decimal()?;
        let mut args = Vec::with_capacity(arg_count.min(crate::value::MAX_OVERLOAD_ARGS));
        for _ in 0..arg_count {
            args.push(self.value()?);
        }
        let overload = Overload::new(args).map_err(|_| self.error("too many overload arguments"))?;
        Ok(KernelConfig::new(Kernel::new(name), overload))
    }

    /// Verify the demangler consumed its input exactly to the end.
    pub fn finish(&self) -> Result<()> {
        if self.pos != self.input.len() {
            return Err(self.error("trailing bytes after mangled value"));
        }
        Ok(())
    }
}

// ================================================================================================
// Tests
// ================================================================================================
