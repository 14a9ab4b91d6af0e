//! Grammar definitions: the declarative description a [`Tree`](crate::Tree) is instantiated from.
//!
//! | Field | Wire layout |
//! |-------|-------------|
//! | `Number` | fixed-width integer or float in the declared byte order |
//! | `Const` / `BytesConst` | a number or byte pattern that must match on parse |
//! | `Bytes` | raw bytes, fixed or computed length |
//! | `Enum` | a number with symbolic names for the XML projection |
//! | `CString` / `PaddedString` / `PascalString` | character data, 1/2/4-byte units |
//! | `Struct` | named fields in declaration order |
//! | `Array` / `RepeatUntil` | homogeneous repetition by count or predicate |
//! | `IfThenElse` / `Switch` | branch on a predicate or discriminant |
//! | `Pointer` / `Area` | content at a computed absolute offset; zero bytes in place |
//! | `Lazy` | a named template resolved at parse time (recursive grammars) |
//! | `Rebuild` | child value recomputed at build time |
//! | `Aligned` | child followed by zero padding to an alignment boundary |
//!
//! Closures receive a [`Context`] positioned at the nearest enclosing struct.

use crate::error::Result;
use crate::text::Encoding;
use crate::tree::Context;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Width and signedness of a number field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl NumKind {
    /// Encoded width in bytes.
    pub fn width(self) -> u64 {
        match self {
            NumKind::U8 | NumKind::I8 => 1,
            NumKind::U16 | NumKind::I16 => 2,
            NumKind::U32 | NumKind::I32 | NumKind::F32 => 4,
            NumKind::U64 | NumKind::I64 | NumKind::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumKind::F32 | NumKind::F64)
    }
}

impl fmt::Display for NumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NumKind::U8 => "u8",
            NumKind::U16 => "u16",
            NumKind::U32 => "u32",
            NumKind::U64 => "u64",
            NumKind::I8 => "i8",
            NumKind::I16 => "i16",
            NumKind::I32 => "i32",
            NumKind::I64 => "i64",
            NumKind::F32 => "f32",
            NumKind::F64 => "f64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberType {
    pub kind: NumKind,
    pub endianness: Endianness,
}

macro_rules! number_types {
    ($($name:ident => $kind:ident, $end:ident;)*) => {
        impl NumberType {
            $(pub const $name: NumberType = NumberType { kind: NumKind::$kind, endianness: Endianness::$end };)*
        }
    };
}

number_types! {
    U8 => U8, Little;
    I8 => I8, Little;
    U16_LE => U16, Little;
    U16_BE => U16, Big;
    U32_LE => U32, Little;
    U32_BE => U32, Big;
    U64_LE => U64, Little;
    U64_BE => U64, Big;
    I16_LE => I16, Little;
    I16_BE => I16, Big;
    I32_LE => I32, Little;
    I32_BE => I32, Big;
    I64_LE => I64, Little;
    I64_BE => I64, Big;
    F32_LE => F32, Little;
    F32_BE => F32, Big;
    F64_LE => F64, Little;
    F64_BE => F64, Big;
}

impl NumberType {
    pub fn new(kind: NumKind, endianness: Endianness) -> Self {
        NumberType { kind, endianness }
    }
}

pub type ValueFn = Rc<dyn Fn(&Context<'_>) -> Result<Value>>;
pub type SizeFn = Rc<dyn Fn(&Context<'_>) -> Result<u64>>;
pub type PredicateFn = Rc<dyn Fn(&Context<'_>) -> Result<bool>>;
/// Called with the element just parsed and the repetition's scope.
pub type UntilFn = Rc<dyn Fn(&Context<'_>, &Context<'_>) -> Result<bool>>;

fn value_fn(f: impl Fn(&Context<'_>) -> Result<Value> + 'static) -> ValueFn {
    Rc::new(f)
}

/// A byte length, element count, or alignment: fixed in the grammar or computed from context.
#[derive(Clone)]
pub enum Len {
    Fixed(u64),
    Dynamic(SizeFn),
}

impl Len {
    pub fn dynamic(f: impl Fn(&Context<'_>) -> Result<u64> + 'static) -> Len {
        Len::Dynamic(Rc::new(f))
    }
}

impl From<u64> for Len {
    fn from(n: u64) -> Self {
        Len::Fixed(n)
    }
}

impl fmt::Debug for Len {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Len::Fixed(n) => write!(f, "Fixed({n})"),
            Len::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// One alternative of a `Switch`.
#[derive(Debug, Clone)]
pub struct Case {
    pub value: Value,
    pub name: String,
    pub field: Field,
}

impl Case {
    pub fn new(value: impl Into<Value>, name: impl Into<String>, field: Field) -> Self {
        Case {
            value: value.into(),
            name: name.into(),
            field,
        }
    }
}

/// A named branch of an `IfThenElse`.
pub type Branch = (String, Rc<Field>);

#[derive(Clone)]
pub enum Field {
    Number(NumberType),
    Const {
        ty: NumberType,
        value: Value,
    },
    BytesConst(Vec<u8>),
    Bytes(Len),
    Enum {
        ty: NumberType,
        variants: Rc<Vec<(String, i128)>>,
    },
    CString(Encoding),
    PaddedString {
        encoding: Encoding,
        len: Len,
    },
    PascalString {
        encoding: Encoding,
        length: NumberType,
    },
    Struct(Vec<(String, Field)>),
    Array {
        count: Len,
        element: Rc<Field>,
    },
    RepeatUntil {
        until: UntilFn,
        element: Rc<Field>,
        budget: Option<SizeFn>,
    },
    IfThenElse {
        condition: PredicateFn,
        then: Option<Branch>,
        otherwise: Option<Branch>,
    },
    Switch {
        discriminant: ValueFn,
        cases: Rc<Vec<Case>>,
    },
    Pointer {
        offset: SizeFn,
        target: Rc<Field>,
    },
    Area {
        offset: SizeFn,
        size: SizeFn,
        element: Rc<Field>,
    },
    /// Reference to a template registered on the [`Grammar`].
    Lazy(String),
    Rebuild {
        compute: ValueFn,
        child: Rc<Field>,
    },
    Aligned {
        alignment: Len,
        child: Rc<Field>,
    },
}

macro_rules! number_fields {
    ($($name:ident => $ty:ident;)*) => {
        $(pub fn $name() -> Field {
            Field::Number(NumberType::$ty)
        })*
    };
}

impl Field {
    number_fields! {
        u8 => U8;
        i8 => I8;
        u16_le => U16_LE;
        u16_be => U16_BE;
        u32_le => U32_LE;
        u32_be => U32_BE;
        u64_le => U64_LE;
        u64_be => U64_BE;
        i16_le => I16_LE;
        i16_be => I16_BE;
        i32_le => I32_LE;
        i32_be => I32_BE;
        i64_le => I64_LE;
        i64_be => I64_BE;
        f32_le => F32_LE;
        f32_be => F32_BE;
        f64_le => F64_LE;
        f64_be => F64_BE;
    }

    pub fn number(ty: NumberType) -> Field {
        Field::Number(ty)
    }

    /// A number that must equal `value` when parsed; always written as `value`.
    pub fn constant(ty: NumberType, value: impl Into<Value>) -> Field {
        let value = value.into();
        let value = value.coerce(ty.kind).unwrap_or(value);
        Field::Const { ty, value }
    }

    /// A magic byte pattern.
    pub fn bytes_const(expected: impl Into<Vec<u8>>) -> Field {
        Field::BytesConst(expected.into())
    }

    pub fn bytes(len: u64) -> Field {
        Field::Bytes(Len::Fixed(len))
    }

    pub fn bytes_with(len: impl Fn(&Context<'_>) -> Result<u64> + 'static) -> Field {
        Field::Bytes(Len::dynamic(len))
    }

    pub fn enumeration<S: Into<String>>(ty: NumberType, variants: impl IntoIterator<Item = (S, i64)>) -> Field {
        let variants = variants
            .into_iter()
            .map(|(name, v)| (name.into(), v as i128))
            .collect();
        Field::Enum {
            ty,
            variants: Rc::new(variants),
        }
    }

    pub fn cstring(encoding: Encoding) -> Field {
        Field::CString(encoding)
    }

    /// Character data occupying exactly `len` bytes, zero padded on build.
    pub fn padded_string(encoding: Encoding, len: Len) -> Field {
        Field::PaddedString { encoding, len }
    }

    /// Character data preceded by its byte length encoded as `length`.
    pub fn pascal_string(encoding: Encoding, length: NumberType) -> Field {
        Field::PascalString { encoding, length }
    }

    pub fn structure<S: Into<String>>(fields: impl IntoIterator<Item = (S, Field)>) -> Field {
        Field::Struct(fields.into_iter().map(|(k, f)| (k.into(), f)).collect())
    }

    pub fn array(count: Len, element: Field) -> Field {
        Field::Array {
            count,
            element: Rc::new(element),
        }
    }

    /// Repeat `element` until `until(element, scope)` returns true.
    pub fn repeat_until(
        until: impl Fn(&Context<'_>, &Context<'_>) -> Result<bool> + 'static,
        element: Field,
    ) -> Field {
        Field::RepeatUntil {
            until: Rc::new(until),
            element: Rc::new(element),
            budget: None,
        }
    }

    /// Like [`Field::repeat_until`], but never consuming more than `budget` bytes.
    pub fn repeat_until_budget(
        until: impl Fn(&Context<'_>, &Context<'_>) -> Result<bool> + 'static,
        budget: impl Fn(&Context<'_>) -> Result<u64> + 'static,
        element: Field,
    ) -> Field {
        Field::RepeatUntil {
            until: Rc::new(until),
            element: Rc::new(element),
            budget: Some(Rc::new(budget)),
        }
    }

    pub fn if_then(
        condition: impl Fn(&Context<'_>) -> Result<bool> + 'static,
        name: impl Into<String>,
        then: Field,
    ) -> Field {
        Field::IfThenElse {
            condition: Rc::new(condition),
            then: Some((name.into(), Rc::new(then))),
            otherwise: None,
        }
    }

    pub fn if_then_else(
        condition: impl Fn(&Context<'_>) -> Result<bool> + 'static,
        then: (impl Into<String>, Field),
        otherwise: (impl Into<String>, Field),
    ) -> Field {
        Field::IfThenElse {
            condition: Rc::new(condition),
            then: Some((then.0.into(), Rc::new(then.1))),
            otherwise: Some((otherwise.0.into(), Rc::new(otherwise.1))),
        }
    }

    pub fn switch<V: Into<Value>>(
        discriminant: impl Fn(&Context<'_>) -> Result<V> + 'static,
        cases: impl IntoIterator<Item = Case>,
    ) -> Field {
        Field::Switch {
            discriminant: value_fn(move |c| discriminant(c).map(Into::into)),
            cases: Rc::new(cases.into_iter().collect()),
        }
    }

    pub fn pointer(offset: impl Fn(&Context<'_>) -> Result<u64> + 'static, target: Field) -> Field {
        Field::Pointer {
            offset: Rc::new(offset),
            target: Rc::new(target),
        }
    }

    /// Elements filling the window `[offset, offset + size)`.
    pub fn area(
        offset: impl Fn(&Context<'_>) -> Result<u64> + 'static,
        size: impl Fn(&Context<'_>) -> Result<u64> + 'static,
        element: Field,
    ) -> Field {
        Field::Area {
            offset: Rc::new(offset),
            size: Rc::new(size),
            element: Rc::new(element),
        }
    }

    pub fn lazy(template: impl Into<String>) -> Field {
        Field::Lazy(template.into())
    }

    pub fn rebuild<V: Into<Value>>(compute: impl Fn(&Context<'_>) -> Result<V> + 'static, child: Field) -> Field {
        Field::Rebuild {
            compute: value_fn(move |c| compute(c).map(Into::into)),
            child: Rc::new(child),
        }
    }

    pub fn aligned(alignment: Len, child: Field) -> Field {
        Field::Aligned {
            alignment,
            child: Rc::new(child),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Number(ty) => write!(f, "Number({ty:?})"),
            Field::Const { ty, value } => write!(f, "Const({ty:?}, {value})"),
            Field::BytesConst(b) => write!(f, "BytesConst({b:?})"),
            Field::Bytes(len) => write!(f, "Bytes({len:?})"),
            Field::Enum { ty, variants } => write!(f, "Enum({ty:?}, {variants:?})"),
            Field::CString(e) => write!(f, "CString({e:?})"),
            Field::PaddedString { encoding, len } => write!(f, "PaddedString({encoding:?}, {len:?})"),
            Field::PascalString { encoding, length } => write!(f, "PascalString({encoding:?}, {length:?})"),
            Field::Struct(fields) => f.debug_map().entries(fields.iter().map(|(k, v)| (k, v))).finish(),
            Field::Array { count, element } => write!(f, "Array({count:?}, {element:?})"),
            Field::RepeatUntil { element, budget, .. } => {
                write!(f, "RepeatUntil({element:?}, budget: {})", budget.is_some())
            }
            Field::IfThenElse { then, otherwise, .. } => write!(f, "IfThenElse({then:?}, {otherwise:?})"),
            Field::Switch { cases, .. } => {
                let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
                write!(f, "Switch({names:?})")
            }
            Field::Pointer { target, .. } => write!(f, "Pointer({target:?})"),
            Field::Area { element, .. } => write!(f, "Area({element:?})"),
            Field::Lazy(name) => write!(f, "Lazy({name})"),
            Field::Rebuild { child, .. } => write!(f, "Rebuild({child:?})"),
            Field::Aligned { alignment, child } => write!(f, "Aligned({alignment:?}, {child:?})"),
        }
    }
}

/// A root field plus the templates `Lazy` fields refer to.
///
/// Templates may refer to themselves; they are only instantiated when a parse,
/// build, or XML import reaches the `Lazy` node.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub(crate) root: Field,
    pub(crate) templates: HashMap<String, Rc<Field>>,
}

impl Grammar {
    pub fn new(root: Field) -> Self {
        Grammar {
            root,
            templates: HashMap::new(),
        }
    }

    /// A grammar whose root is the named template.
    pub fn template(name: impl Into<String>) -> Self {
        Grammar::new(Field::lazy(name))
    }

    pub fn define(mut self, name: impl Into<String>, field: Field) -> Self {
        self.templates.insert(name.into(), Rc::new(field));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.templates.get(name).map(|f| f.as_ref())
    }
}

impl From<Field> for Grammar {
    fn from(root: Field) -> Self {
        Grammar::new(root)
    }
}
