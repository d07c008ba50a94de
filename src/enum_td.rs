//! Symbolic names over a backing integer, with optional bitmask semantics
//! (spec component C3).
//!
//! An enum contributes only to introspection: parse/pack always delegate to
//! the backing integer type, unchanged. `dump` is the only place the symbol
//! table is consulted.

use std::collections::HashMap;

use crate::primitive::IntTd;
use crate::td::{TypeDef, TypeRef};

#[derive(Debug, Clone)]
pub struct EnumTd {
    pub name: String,
    pub backing: TypeRef,
    pub bitmask: bool,
    pub(crate) symbols: Vec<(String, i128)>,
    pub(crate) by_value: HashMap<i128, String>,
}

impl EnumTd {
    /// Exact-match symbol for a scalar (non-bitmask) enum value.
    pub fn symbol(&self, value: i128) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    /// For a bitmask enum, the list of `(symbol, bit_value)` flags set in
    /// `value`, in declaration order, plus any residual bits not covered by
    /// a known flag.
    pub fn flags(&self, value: i128) -> (Vec<&str>, i128) {
        let mut remaining = value;
        let mut set = Vec::new();
        for (name, bit) in &self.symbols {
            if *bit != 0 && (remaining & *bit) == *bit {
                set.push(name.as_str());
                remaining &= !*bit;
            }
        }
        (set, remaining)
    }

    pub(crate) fn backing_int(&self) -> IntTd {
        self.backing.as_int().copied().expect("enum backing must be an integer type")
    }
}

/// Declares an enum named `name` over `backing` (an integer type built with
/// [`crate::primitive::int`]). When `bitmask` is true, `dump` renders the
/// value as the space-joined list of set flag symbols instead of an exact
/// match.
pub fn enum_td(
    name: &str,
    backing: TypeRef,
    bitmask: bool,
    symbols: &[(&str, i128)],
) -> TypeRef {
    assert!(backing.as_int().is_some(), "enum backing type must be built with primitive::int");
    let symbols: Vec<(String, i128)> = symbols.iter().map(|(n, v)| (n.to_string(), *v)).collect();
    let by_value = symbols.iter().map(|(n, v)| (*v, n.clone())).collect();
    TypeRef::new(TypeDef::Enum(EnumTd {
        name: name.to_string(),
        backing,
        bitmask,
        symbols,
        by_value,
    }))
}
