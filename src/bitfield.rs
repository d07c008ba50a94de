//! Named bit-packed sub-fields over a backing integer (spec component C2).

use crate::error::{Error, Result};
use crate::primitive::IntTd;
use crate::td::{TypeDef, TypeRef};
use crate::value::{BitSlot, BitfieldValue, Value};

/// One sub-field of a [`BitfieldTd`]: a bit width, an optional name
/// (`None` for anonymous padding bits), and an optional array length (an
/// array sub-field occupies `bit_width * array_len` consecutive bits).
#[derive(Debug, Clone)]
pub struct BitSubField {
    pub name: Option<String>,
    pub bit_width: u32,
    pub array_len: Option<usize>,
}

impl BitSubField {
    fn total_bits(&self) -> u32 {
        self.bit_width * self.array_len.unwrap_or(1) as u32
    }
}

/// A bitfield type: a backing unsigned integer of width `W`, carved into
/// named sub-fields packed MSB-first regardless of the backing integer's
/// own endianness.
#[derive(Debug, Clone)]
pub struct BitfieldTd {
    pub name: String,
    pub backing: IntTd,
    pub sub_fields: Vec<BitSubField>,
}

impl BitfieldTd {
    pub(crate) fn sub_field_index(&self, name: &str) -> Option<usize> {
        self.sub_fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }
}

/// Declares a bitfield over `backing` (which must be an unsigned integer
/// type built with [`crate::primitive::int`]). `sub_fields` are given
/// MSB-first, in declaration order; pass `(width, None, None)` for padding
/// bits. Fails immediately if the sub-field widths don't sum to exactly the
/// backing integer's width (`BitfieldWidthMismatch`).
pub fn bitfield(name: &str, backing: TypeRef, sub_fields: Vec<BitSubField>) -> Result<TypeRef> {
    let int_td = backing
        .as_int()
        .copied()
        .expect("bitfield backing type must be built with primitive::int");
    assert!(!int_td.signed, "bitfield backing type must be unsigned");
    let declared_sum: u32 = sub_fields.iter().map(BitSubField::total_bits).sum();
    if declared_sum != int_td.width_bits() {
        return Err(Error::BitfieldWidthMismatch {
            type_name: name.to_string(),
            declared_sum,
            backing_width: int_td.width_bits(),
        });
    }
    Ok(TypeRef::new(TypeDef::Bitfield(BitfieldTd {
        name: name.to_string(),
        backing: int_td,
        sub_fields,
    })))
}

/// Extracts named sub-fields from a freshly-parsed backing integer.
pub(crate) fn decode(td: &TypeRef, backing_value: u128) -> BitfieldValue {
    let bf = td.as_bitfield().expect("decode called on non-bitfield type");
    let total_bits = bf.backing.width_bits();
    let mut shift = total_bits;
    let mut slots = Vec::with_capacity(bf.sub_fields.len());
    for field in &bf.sub_fields {
        match field.array_len {
            None => {
                shift -= field.bit_width;
                slots.push(BitSlot::Scalar(extract(backing_value, shift, field.bit_width)));
            }
            Some(n) => {
                let mut values = Vec::with_capacity(n);
                for _ in 0..n {
                    shift -= field.bit_width;
                    values.push(extract(backing_value, shift, field.bit_width));
                }
                slots.push(BitSlot::Array(values));
            }
        }
    }
    BitfieldValue {
        td: td.clone(),
        slots,
    }
}

fn extract(value: u128, shift: u32, width: u32) -> u64 {
    let mask: u128 = if width >= 128 { u128::MAX } else { (1u128 << width) - 1 };
    ((value >> shift) & mask) as u64
}

/// Packs named sub-field values back into the backing integer, MSB-first.
/// Fails with `FieldWidthOverflow` if a sub-field's value doesn't fit its
/// declared width.
pub(crate) fn encode(value: &BitfieldValue, field_path: &str) -> Result<u128> {
    let bf = value.td.as_bitfield().expect("encode called on non-bitfield value");
    let total_bits = bf.backing.width_bits();
    let mut shift = total_bits;
    let mut acc: u128 = 0;
    for (field, slot) in bf.sub_fields.iter().zip(value.slots()) {
        match (field.array_len, slot) {
            (None, BitSlot::Scalar(v)) => {
                shift -= field.bit_width;
                acc |= pack_one(*v, field.bit_width, shift, field_path)?;
            }
            (Some(_), BitSlot::Array(vs)) => {
                for v in vs {
                    shift -= field.bit_width;
                    acc |= pack_one(*v, field.bit_width, shift, field_path)?;
                }
            }
            _ => unreachable!("bitfield slot shape must match its sub-field declaration"),
        }
    }
    Ok(acc)
}

fn pack_one(v: u64, width: u32, shift: u32, field_path: &str) -> Result<u128> {
    let mask: u128 = if width >= 128 { u128::MAX } else { (1u128 << width) - 1 };
    if (v as u128) > mask {
        return Err(Error::FieldWidthOverflow {
            field_path: field_path.to_string(),
            value: v as i128,
            width_bits: width,
        });
    }
    Ok(((v as u128) & mask) << shift)
}

/// A one-field builder for constructing a bitfield value with a subset of
/// its named sub-fields set, defaulting the rest (padding included) to 0.
/// Mirrors the ergonomics of `StructTd::new`.
pub fn new_bitfield(td: &TypeRef, values: &[(&str, u64)]) -> Result<Value> {
    let mut v = td.default_value();
    if let Value::Bitfield(bf) = &mut v {
        for (name, val) in values {
            bf.set(name, *val)?;
        }
    }
    Ok(v)
}
