//! Fixed-width integers, raw byte strings, single bytes and arrays
//! (spec component C1).

use crate::endian::Endian;
use crate::error::{Error, Result};
use crate::td::{TypeDef, TypeRef};
use crate::value::Value;

/// A fixed-width integer type: one of {8,16,32,64} bits, signed or
/// unsigned, big- or little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntTd {
    pub width_bytes: u8,
    pub signed: bool,
    pub endian: Endian,
}

impl IntTd {
    pub const fn new(width_bytes: u8, signed: bool, endian: Endian) -> Self {
        assert!(
            width_bytes == 1 || width_bytes == 2 || width_bytes == 4 || width_bytes == 8,
            "integer width must be 1, 2, 4 or 8 bytes"
        );
        IntTd {
            width_bytes,
            signed,
            endian,
        }
    }

    pub fn width_bits(&self) -> u32 {
        self.width_bytes as u32 * 8
    }

    pub(crate) fn parse(&self, bytes: &[u8]) -> i128 {
        let w = self.width_bytes as usize;
        debug_assert_eq!(bytes.len(), w);
        let mut buf = [0u8; 16];
        match self.endian {
            Endian::Big => buf[16 - w..].copy_from_slice(bytes),
            Endian::Little => buf[..w].copy_from_slice(bytes),
        }
        let unsigned = match self.endian {
            Endian::Big => u128::from_be_bytes(buf),
            Endian::Little => u128::from_le_bytes(buf),
        };
        if self.signed && w < 16 {
            let shift = (16 - w) as u32 * 8;
            // Sign-extend from the field's own width.
            (((unsigned << shift) as i128) >> shift) as i128
        } else {
            unsigned as i128
        }
    }

    pub(crate) fn pack(&self, value: i128, field_path: &str) -> Result<Vec<u8>> {
        let w = self.width_bytes as usize;
        let (lo, hi): (i128, i128) = if self.signed {
            let bits = self.width_bits();
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << self.width_bits()) - 1)
        };
        if value < lo || value > hi {
            return Err(Error::FieldWidthOverflow {
                field_path: field_path.to_string(),
                value,
                width_bits: self.width_bits(),
            });
        }
        let mask = (1u128 << self.width_bits()) - 1;
        let unsigned = (value as u128) & mask;
        let full = unsigned.to_be_bytes();
        let be = &full[16 - w..];
        Ok(match self.endian {
            Endian::Big => be.to_vec(),
            Endian::Little => be.iter().rev().cloned().collect(),
        })
    }
}

/// How many elements an [`ArrayTd`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    /// A fixed `N >= 1` element count, `T[N]`.
    Fixed(usize),
    /// `T[0]`: an open trailer consuming the rest of the enclosing window,
    /// in units of `sizeof(T)`.
    Open,
}

/// `T[N]`: a fixed-length or open-trailer array of some element type.
#[derive(Debug, Clone)]
pub struct ArrayTd {
    pub element: TypeRef,
    pub len: ArrayLen,
}

/// Constructs the 8/16/32/64-bit signed/unsigned integer primitives.
pub fn int(width_bytes: u8, signed: bool, endian: Endian) -> TypeRef {
    TypeRef::new(TypeDef::Int(IntTd::new(width_bytes, signed, endian)))
}

pub fn u8_td() -> TypeRef {
    int(1, false, Endian::Big)
}
pub fn i8_td() -> TypeRef {
    int(1, true, Endian::Big)
}
pub fn u16(endian: Endian) -> TypeRef {
    int(2, false, endian)
}
pub fn i16(endian: Endian) -> TypeRef {
    int(2, true, endian)
}
pub fn u32(endian: Endian) -> TypeRef {
    int(4, false, endian)
}
pub fn i32(endian: Endian) -> TypeRef {
    int(4, true, endian)
}
pub fn u64(endian: Endian) -> TypeRef {
    int(8, false, endian)
}
pub fn i64(endian: Endian) -> TypeRef {
    int(8, true, endian)
}

/// A single raw byte, used as the element type of `char[N]` string fields.
pub fn char_td() -> TypeRef {
    TypeRef::new(TypeDef::Char)
}

/// A contiguous variable-length byte string. Its length is always dictated
/// by the enclosing size window; it never self-delimits.
pub fn raw() -> TypeRef {
    TypeRef::new(TypeDef::Raw)
}

/// `T[N]` for `N >= 1`, or `T[0]` for an open trailer (pass `n = 0`).
pub fn array(element: TypeRef, n: usize) -> TypeRef {
    let len = if n == 0 { ArrayLen::Open } else { ArrayLen::Fixed(n) };
    TypeRef::new(TypeDef::Array(ArrayTd { element, len }))
}

pub(crate) fn parse_array(
    array_td: &ArrayTd,
    bytes: &[u8],
) -> Result<Value> {
    if matches!(&*array_td.element.0, TypeDef::Char) {
        return Ok(Value::Bytes(bytes.to_vec()));
    }
    let elem_size = array_td
        .element
        .fixed_size()
        .expect("array element must be fixed-size");
    let n = bytes.len() / elem_size;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let chunk = &bytes[i * elem_size..(i + 1) * elem_size];
        out.push(crate::parse::parse_fixed_leaf(&array_td.element, chunk)?);
    }
    Ok(Value::List(out))
}

pub(crate) fn pack_array(array_td: &ArrayTd, value: &Value, field_path: &str) -> Result<Vec<u8>> {
    if matches!(&*array_td.element.0, TypeDef::Char) {
        let bytes = value.as_bytes().unwrap_or(&[]);
        let mut out = bytes.to_vec();
        if let ArrayLen::Fixed(n) = array_td.len {
            out.resize(n, 0);
        }
        return Ok(out);
    }
    let items = value.as_list().unwrap_or(&[]);
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let path = format!("{field_path}[{i}]");
        out.extend(crate::pack::pack_fixed_leaf(&array_td.element, item, &path)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_round_trips() {
        let td = IntTd::new(4, false, Endian::Big);
        let bytes = td.pack(0x01020304, "x").unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(td.parse(&bytes), 0x01020304);
    }

    #[test]
    fn little_endian_round_trips() {
        let td = IntTd::new(4, false, Endian::Little);
        let bytes = td.pack(0x01020304, "x").unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(td.parse(&bytes), 0x01020304);
    }

    #[test]
    fn signed_values_sign_extend_on_parse() {
        let td = IntTd::new(1, true, Endian::Big);
        assert_eq!(td.parse(&[0xff]), -1);
        assert_eq!(td.parse(&[0x7f]), 127);
    }

    #[test]
    fn pack_rejects_out_of_range_values() {
        let unsigned_u8 = IntTd::new(1, false, Endian::Big);
        assert!(unsigned_u8.pack(256, "x").is_err());
        assert!(unsigned_u8.pack(-1, "x").is_err());

        let signed_i8 = IntTd::new(1, true, Endian::Big);
        assert!(signed_i8.pack(128, "x").is_err());
        assert!(signed_i8.pack(-129, "x").is_err());
        assert!(signed_i8.pack(-128, "x").is_ok());
    }

    #[test]
    fn fixed_array_fixed_size_is_element_size_times_n() {
        let ty = array(u16(Endian::Big), 3);
        assert_eq!(ty.fixed_size(), Some(6));
    }

    #[test]
    fn open_array_has_no_fixed_size() {
        let ty = array(u8_td(), 0);
        assert_eq!(ty.fixed_size(), None);
        assert!(matches!(ty.as_array().unwrap().len, ArrayLen::Open));
    }

    #[test]
    fn char_array_parses_as_bytes_not_a_list() {
        let ty = array(char_td(), 3);
        let v = parse_array(ty.as_array().unwrap(), b"abc").unwrap();
        assert_eq!(v.as_bytes().unwrap(), b"abc");
    }
}
