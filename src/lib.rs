#![forbid(unsafe_code)]
//! A declarative binary-struct engine: describe a wire format once as a
//! tree of type descriptors, then `parse`, `to_bytes`, and `dump` values of
//! it. Modeled after `construct`-style libraries: declarations are frozen,
//! `Send + Sync` values built once at startup, not macros expanded at
//! compile time.

pub mod bitfield;
mod cursor;
pub mod dump;
pub mod endian;
pub mod enum_td;
pub mod error;
pub mod helpers;
mod pack;
mod parse;
pub mod primitive;
pub mod struct_def;
pub mod td;
pub mod value;

#[cfg(test)]
mod tests;

pub use bitfield::{bitfield, new_bitfield, BitSubField};
pub use dump::dump;
pub use endian::Endian;
pub use enum_td::enum_td;
pub use error::{CallbackError, CallbackKind, CallbackResult, Error, Result};
pub use helpers::{darray, optional, pack_expr, pack_real_size, pack_value};
pub use primitive::{array, char_td, i16, i32, i64, i8_td, int, raw, u16, u32, u64, u8_td};
pub use struct_def::StructBuilder;
pub use td::{TypeDef, TypeRef};
pub use value::{BitSlot, BitfieldValue, StructValue, Value};
