//! Decoded values handed out by `get` and accepted by `set`.

use crate::error::{Error, Result};
use crate::field::NumKind;
use indexmap::IndexMap;
use std::fmt;

/// A single decoded value (scalar, string, or compound).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    /// Struct record in declaration order.
    Struct(IndexMap<String, Value>),
    List(Vec<Value>),
    /// Inactive conditional, unselected switch, or uninstantiated lazy field.
    None,
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|x| u64::try_from(x).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|x| i64::try_from(x).ok())
    }

    /// Any integer variant, widened without loss.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::U8(x) => Some(*x as i128),
            Value::U16(x) => Some(*x as i128),
            Value::U32(x) => Some(*x as i128),
            Value::U64(x) => Some(*x as i128),
            Value::I8(x) => Some(*x as i128),
            Value::I16(x) => Some(*x as i128),
            Value::I32(x) => Some(*x as i128),
            Value::I64(x) => Some(*x as i128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            other => other.as_i128().map(|x| x as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Float(_) => "f32",
            Value::Double(_) => "f64",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Struct(_) => "struct",
            Value::List(_) => "list",
            Value::None => "none",
        }
    }

    /// Equality across numeric widths: `U32(5)` matches `I64(5)`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Float(_) | Value::Double(_), _) | (_, Value::Float(_) | Value::Double(_)) => {
                    self.as_f64() == other.as_f64()
                }
                _ => self == other,
            },
        }
    }

    /// Convert a numeric value into the exact variant of `kind`, failing when it does not fit.
    pub fn coerce(&self, kind: NumKind) -> Result<Value> {
        let converted = match (kind, self) {
            (NumKind::F32, Value::Float(_)) | (NumKind::F64, Value::Double(_)) => Some(self.clone()),
            (NumKind::F32, _) => self.as_f64().map(|x| Value::Float(x as f32)),
            (NumKind::F64, _) => self.as_f64().map(Value::Double),
            _ => self.as_i128().and_then(|x| fit(x, kind)),
        };
        converted.ok_or_else(|| Error::Format(format!("{self} does not fit in {kind}")))
    }

    /// Text form used by the XML projection: `Display`, except that a NaN is
    /// written as its bit pattern (`nan:0x7FC00000`) so the payload survives.
    pub fn to_text(&self) -> String {
        match *self {
            Value::Float(x) if x.is_nan() => format!("nan:0x{:08X}", x.to_bits()),
            Value::Double(x) if x.is_nan() => format!("nan:0x{:016X}", x.to_bits()),
            _ => self.to_string(),
        }
    }

    /// Parse the text produced by [`Value::to_text`] back into a number of `kind`.
    pub fn parse_number(text: &str, kind: NumKind) -> Result<Value> {
        let text = text.trim();
        let bits = text
            .strip_prefix("nan:0x")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok());
        let parsed = match (kind, bits) {
            (NumKind::F32, Some(bits)) => u32::try_from(bits)
                .ok()
                .map(f32::from_bits)
                .filter(|x| x.is_nan())
                .map(Value::Float),
            (NumKind::F64, Some(bits)) => Some(f64::from_bits(bits)).filter(|x| x.is_nan()).map(Value::Double),
            (NumKind::F32, None) => text.parse::<f32>().ok().map(Value::Float),
            (NumKind::F64, None) => text.parse::<f64>().ok().map(Value::Double),
            (_, _) => text.parse::<i128>().ok().and_then(|x| fit(x, kind)),
        };
        parsed.ok_or_else(|| Error::Format(format!("'{text}' is not a valid {kind}")))
    }

    /// The zero value of a number kind.
    pub fn zero(kind: NumKind) -> Value {
        match kind {
            NumKind::U8 => Value::U8(0),
            NumKind::U16 => Value::U16(0),
            NumKind::U32 => Value::U32(0),
            NumKind::U64 => Value::U64(0),
            NumKind::I8 => Value::I8(0),
            NumKind::I16 => Value::I16(0),
            NumKind::I32 => Value::I32(0),
            NumKind::I64 => Value::I64(0),
            NumKind::F32 => Value::Float(0.0),
            NumKind::F64 => Value::Double(0.0),
        }
    }
}

fn fit(x: i128, kind: NumKind) -> Option<Value> {
    Some(match kind {
        NumKind::U8 => Value::U8(u8::try_from(x).ok()?),
        NumKind::U16 => Value::U16(u16::try_from(x).ok()?),
        NumKind::U32 => Value::U32(u32::try_from(x).ok()?),
        NumKind::U64 => Value::U64(u64::try_from(x).ok()?),
        NumKind::I8 => Value::I8(i8::try_from(x).ok()?),
        NumKind::I16 => Value::I16(i16::try_from(x).ok()?),
        NumKind::I32 => Value::I32(i32::try_from(x).ok()?),
        NumKind::I64 => Value::I64(i64::try_from(x).ok()?),
        NumKind::F32 => Value::Float(x as f32),
        NumKind::F64 => Value::Double(x as f64),
    })
}

/// Uppercase hex, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(x) => write!(f, "{x}"),
            Value::U16(x) => write!(f, "{x}"),
            Value::U32(x) => write!(f, "{x}"),
            Value::U64(x) => write!(f, "{x}"),
            Value::I8(x) => write!(f, "{x}"),
            Value::I16(x) => write!(f, "{x}"),
            Value::I32(x) => write!(f, "{x}"),
            Value::I64(x) => write!(f, "{x}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Bytes(b) => f.write_str(&to_hex(b)),
            Value::String(s) => f.write_str(s),
            Value::Struct(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::List(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::None => f.write_str("none"),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(x: $t) -> Self {
                Value::$variant(x)
            }
        })*
    };
}

value_from!(
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    f32 => Float, f64 => Double,
    Vec<u8> => Bytes, String => String,
);

impl From<usize> for Value {
    fn from(x: usize) -> Self {
        Value::U64(x as u64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}
