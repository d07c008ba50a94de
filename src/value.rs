//! The runtime value tree produced by `new`/`parse` and consumed by
//! `to_bytes`/`dump` (spec component C8).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::td::TypeRef;

/// A single parsed/constructed field value.
///
/// `Value` is tree-shaped: there is no sharing and no cycles, matching the
/// lifecycle rules in the data model (a value's fields are owned outright by
/// it). Scalars are widened to `i128` so one representation covers every
/// signed/unsigned width from 8 to 64 bits; range is enforced at pack time
/// against the field's declared width, not at assignment time.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i128),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Struct(Box<StructValue>),
    Bitfield(Box<BitfieldValue>),
}

impl Value {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bitfield(&self) -> Option<&BitfieldValue> {
        match self {
            Value::Bitfield(b) => Some(b),
            _ => None,
        }
    }

    /// Builds a fixed-length, zero-padded byte value from a string, as used
    /// for `char[N]` fields (spec S1's `mystr`). Truncates if `s` is longer
    /// than `n`.
    pub fn fixed_str(s: &str, n: usize) -> Value {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(n, 0);
        bytes.truncate(n);
        Value::Bytes(bytes)
    }
}

impl PartialEq for Value {
    /// Structural equality, per the data model's "Equality is structural
    /// over fields" rule (spec §4.8). A `Struct`'s `effective_type` is part
    /// of the comparison (two differently-dispatched derived values are
    /// never equal even with coincidentally identical field bytes).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Bitfield(a), Value::Bitfield(b)) => a == b,
            _ => false,
        }
    }
}

/// One packed sub-field of a [`crate::bitfield`] value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitSlot {
    Scalar(u64),
    Array(Vec<u64>),
}

/// A parsed/constructed bitfield: the backing integer decomposed into its
/// named sub-fields (spec C2).
#[derive(Debug, Clone)]
pub struct BitfieldValue {
    pub(crate) td: TypeRef,
    pub(crate) slots: Vec<BitSlot>,
}

impl PartialEq for BitfieldValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.td.0, &other.td.0) && self.slots == other.slots
    }
}

impl BitfieldValue {
    pub fn get_type(&self) -> TypeRef {
        self.td.clone()
    }

    /// Looks up a named sub-field's scalar value. Returns `None` for
    /// anonymous (padding) sub-fields, array sub-fields, or unknown names.
    pub fn get(&self, name: &str) -> Option<u64> {
        let bf = self.td.as_bitfield()?;
        let idx = bf.sub_field_index(name)?;
        match &self.slots[idx] {
            BitSlot::Scalar(v) => Some(*v),
            BitSlot::Array(_) => None,
        }
    }

    pub fn get_array(&self, name: &str) -> Option<&[u64]> {
        let bf = self.td.as_bitfield()?;
        let idx = bf.sub_field_index(name)?;
        match &self.slots[idx] {
            BitSlot::Array(v) => Some(v),
            BitSlot::Scalar(_) => None,
        }
    }

    pub fn set(&mut self, name: &str, value: u64) -> Result<()> {
        let bf = self.td.as_bitfield().expect("bitfield value with non-bitfield type");
        let idx = bf.sub_field_index(name).ok_or_else(|| Error::UnknownField {
            type_name: bf.name.clone(),
            name: name.to_string(),
        })?;
        self.slots[idx] = BitSlot::Scalar(value);
        Ok(())
    }

    pub(crate) fn slots(&self) -> &[BitSlot] {
        &self.slots
    }
}

/// A parsed/constructed struct value (spec C8, the `nstruct` runtime
/// representation).
///
/// Field storage is a single flat `Vec<Value>` indexed by the *effective*
/// type's flattened field table (own fields, inherited base fields, and
/// fields promoted from embedded anonymous structs all share one namespace
/// and one slot array — see `crate::struct_def` for how that table is
/// frozen).
#[derive(Debug, Clone)]
pub struct StructValue {
    pub(crate) effective_type: TypeRef,
    /// `[base, ..., effective_type]`, the chain of types selected while
    /// parsing. For a value built with `new()` (no dispatch) this is just
    /// `[effective_type]`.
    pub(crate) variant_stack: Vec<TypeRef>,
    pub(crate) fields: Vec<Value>,
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.effective_type.0, &other.effective_type.0) && self.fields == other.fields
    }
}

impl StructValue {
    pub(crate) fn new_defaulted(ty: TypeRef) -> Self {
        let s = ty.as_struct().expect("StructValue requires a struct type");
        let fields = s.flat_fields.iter().map(|f| f.ty.default_value()).collect();
        StructValue {
            effective_type: ty.clone(),
            variant_stack: vec![ty],
            fields,
        }
    }

    /// The effective type of this value: the most-derived type selected
    /// during parse, or the type it was constructed/declared against if no
    /// dispatch occurred.
    pub fn get_type(&self) -> TypeRef {
        self.effective_type.clone()
    }

    /// The ordered chain of types (base to effective) that contributed
    /// fields to this value. Re-packing an already-parsed value always
    /// reproduces the same chain of extension layers.
    pub fn variant_stack(&self) -> &[TypeRef] {
        &self.variant_stack
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let idx = self.field_index(name)?;
        Ok(&self.fields[idx])
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let idx = self.field_index(name)?;
        self.fields[idx] = value;
        Ok(())
    }

    pub fn get_int(&self, name: &str) -> Result<i128> {
        Ok(self.get(name)?.as_int().unwrap_or_default())
    }

    pub fn set_int(&mut self, name: &str, value: i128) -> Result<()> {
        self.set(name, Value::Int(value))
    }

    fn field_index(&self, name: &str) -> Result<usize> {
        let s = self.effective_type.as_struct().expect("struct value with non-struct type");
        s.name_index.get(name).copied().ok_or_else(|| Error::UnknownField {
            type_name: s.name.clone(),
            name: name.to_string(),
        })
    }

    pub(crate) fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [Value] {
        &mut self.fields
    }

    /// Grows `fields` with default values up to `ty`'s flattened field
    /// count. Used while walking a classifier dispatch chain: each derived
    /// level adds fields beyond what the base/previous level declared.
    pub(crate) fn extend_to(&mut self, ty: &TypeRef) {
        let s = ty.as_struct().expect("extend_to requires a struct type");
        while self.fields.len() < s.flat_fields.len() {
            let idx = self.fields.len();
            self.fields.push(s.flat_fields[idx].ty.default_value());
        }
    }

    /// Records that `ty` was selected as the next step of the dispatch
    /// chain (spec §4.4's classifier/criteria dispatch).
    pub(crate) fn push_variant(&mut self, ty: TypeRef) {
        self.variant_stack.push(ty);
    }

    /// Sets the final, most-derived type reached by dispatch.
    pub(crate) fn set_effective_type(&mut self, ty: TypeRef) {
        self.effective_type = ty;
    }

    /// The padded on-wire length: `round_up(real_size(v), P)`.
    ///
    /// Like `to_bytes`, this runs `prepack` first (it is a dry run of the
    /// same pack arithmetic, per spec §4.4), so it takes `&mut self`.
    pub fn length(&mut self) -> Result<usize> {
        crate::pack::length(self)
    }

    /// The unpadded byte length before padding is applied. Runs `prepack`
    /// first, same as [`StructValue::length`].
    pub fn real_size(&mut self) -> Result<usize> {
        crate::pack::real_size(self)
    }

    /// Serializes this value to bytes, running `prepack` callbacks first so
    /// size/checksum fields derived from sibling fields are up to date.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        crate::pack::to_bytes(self)
    }
}
