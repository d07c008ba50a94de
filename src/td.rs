//! The type descriptor (TD): the frozen, immutable declaration shared by
//! every concrete type kind (spec §3 "Type descriptor").

use std::fmt;
use std::sync::Arc;

use crate::bitfield::BitfieldTd;
use crate::enum_td::EnumTd;
use crate::error::Result;
use crate::helpers::DarrayTd;
use crate::primitive::{ArrayLen, ArrayTd, IntTd};
use crate::struct_def::StructTd;
use crate::value::{BitSlot, StructValue, Value};

/// The tagged union of every type descriptor kind the engine supports. Only
/// ever reached through a [`TypeRef`]; never constructed directly by users.
#[derive(Debug)]
pub enum TypeDef {
    Int(IntTd),
    Char,
    Raw,
    Array(ArrayTd),
    Darray(DarrayTd),
    Bitfield(BitfieldTd),
    Enum(EnumTd),
    Struct(StructTd),
}

/// A shared handle to a frozen type descriptor.
///
/// `TypeRef` is cheap to clone (an `Arc` bump) and `Send + Sync`, so the
/// same declaration can be used to parse or pack from multiple threads
/// concurrently as long as each call works on its own buffer and value tree
/// (spec §5). Two `TypeRef`s are equal iff they point at the very same
/// declaration (identity, not structural equality) — see spec §9's
/// `classifyby`/registry lookups, which need this.
#[derive(Clone)]
pub struct TypeRef(pub(crate) Arc<TypeDef>);

impl TypeRef {
    pub(crate) fn new(def: TypeDef) -> Self {
        TypeRef(Arc::new(def))
    }

    pub fn name(&self) -> &str {
        match &*self.0 {
            TypeDef::Int(i) => {
                if i.signed {
                    "int"
                } else {
                    "uint"
                }
            }
            TypeDef::Char => "char",
            TypeDef::Raw => "raw",
            TypeDef::Array(_) => "array",
            TypeDef::Darray(_) => "darray",
            TypeDef::Bitfield(b) => &b.name,
            TypeDef::Enum(e) => &e.name,
            TypeDef::Struct(s) => &s.name,
        }
    }

    pub fn as_struct(&self) -> Option<&StructTd> {
        match &*self.0 {
            TypeDef::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bitfield(&self) -> Option<&BitfieldTd> {
        match &*self.0 {
            TypeDef::Bitfield(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumTd> {
        match &*self.0 {
            TypeDef::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayTd> {
        match &*self.0 {
            TypeDef::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_darray(&self) -> Option<&DarrayTd> {
        match &*self.0 {
            TypeDef::Darray(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&IntTd> {
        match &*self.0 {
            TypeDef::Int(i) => Some(i),
            _ => None,
        }
    }

    /// The statically known on-wire width in bytes, or `None` if it depends
    /// on a value (a `size` callback, an open trailer, `raw`, or `darray`).
    pub fn fixed_size(&self) -> Option<usize> {
        match &*self.0 {
            TypeDef::Int(i) => Some(i.width_bytes as usize),
            TypeDef::Char => Some(1),
            TypeDef::Raw => None,
            TypeDef::Array(a) => match a.len {
                ArrayLen::Fixed(n) => a.element.fixed_size().map(|w| w * n),
                ArrayLen::Open => None,
            },
            TypeDef::Darray(_) => None,
            TypeDef::Bitfield(b) => Some(b.backing.width_bytes as usize),
            TypeDef::Enum(e) => e.backing.fixed_size(),
            TypeDef::Struct(s) => s.static_fixed_size,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    pub(crate) fn default_value(&self) -> Value {
        match &*self.0 {
            TypeDef::Int(_) => Value::Int(0),
            TypeDef::Char => Value::Int(0),
            TypeDef::Raw => Value::Bytes(Vec::new()),
            TypeDef::Array(a) => match (a.element.0.as_ref(), a.len) {
                (TypeDef::Char, ArrayLen::Fixed(n)) => Value::Bytes(vec![0; n]),
                (TypeDef::Char, ArrayLen::Open) => Value::Bytes(Vec::new()),
                (_, ArrayLen::Fixed(n)) => {
                    Value::List(std::iter::repeat_with(|| a.element.default_value()).take(n).collect())
                }
                (_, ArrayLen::Open) => Value::List(Vec::new()),
            },
            TypeDef::Darray(_) => Value::List(Vec::new()),
            TypeDef::Bitfield(b) => Value::Bitfield(Box::new(crate::value::BitfieldValue {
                td: self.clone(),
                slots: b
                    .sub_fields
                    .iter()
                    .map(|f| match f.array_len {
                        Some(n) => BitSlot::Array(vec![0; n]),
                        None => BitSlot::Scalar(0),
                    })
                    .collect(),
            })),
            TypeDef::Enum(_) => Value::Int(0),
            TypeDef::Struct(_) => Value::Struct(Box::new(StructValue::new_defaulted(self.clone()))),
        }
    }

    /// Instantiates this struct type with named initializers, per spec
    /// §4.4's instantiation contract. Returns `UnknownField` if an
    /// initializer name doesn't resolve.
    pub fn new(&self, initializers: &[(&str, Value)]) -> Result<StructValue> {
        crate::struct_def::instantiate(self, initializers)
    }

    /// Parses bytes through this struct type starting at `offset`. Returns
    /// the parsed value and the number of bytes consumed.
    pub fn parse(&self, bytes: &[u8], offset: usize) -> Result<(StructValue, usize)> {
        crate::parse::parse_struct(self, bytes, offset, bytes.len())
    }

    /// Convenience: parses `bytes` from the start and, if the effective
    /// type's final field is a variable-length trailer, expands it to
    /// consume every remaining byte rather than stopping at the window a
    /// `size` callback computed.
    pub fn create(&self, bytes: &[u8]) -> Result<StructValue> {
        crate::parse::create(self, bytes)
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.name())
    }
}
