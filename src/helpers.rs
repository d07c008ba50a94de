//! Variable-size helpers built from the core primitives (spec component
//! C5): `optional`, `darray`, and the canonical `prepack` helpers
//! `pack_value`, `pack_expr`, `pack_real_size`.

use std::sync::Arc;

use crate::error::CallbackResult;
use crate::struct_def::StructBuilder;
use crate::td::{TypeDef, TypeRef};
use crate::value::{StructValue, Value};

pub type CountFn = Arc<dyn Fn(&StructValue) -> CallbackResult<usize> + Send + Sync>;

/// `darray(T, name, count_fn)`: exactly `count_fn(parent)` elements of `T`
/// at parse time; packs as the sum of its elements' sizes.
#[derive(Clone)]
pub struct DarrayTd {
    pub element: TypeRef,
    pub count_fn: CountFn,
}

pub fn darray(
    element: TypeRef,
    count_fn: impl Fn(&StructValue) -> CallbackResult<usize> + Send + Sync + 'static,
) -> TypeRef {
    TypeRef::new(TypeDef::Darray(DarrayTd {
        element,
        count_fn: Arc::new(count_fn),
    }))
}

/// `optional(T, name, predicate)`: sugar for a one-field embedded struct
/// whose `size` callback returns `sizeof(T)` when `predicate(parent)` is
/// true, `0` otherwise. Embed the result with `StructBuilder::embed`.
pub fn optional(
    element: TypeRef,
    name: &str,
    predicate: impl Fn(&StructValue) -> CallbackResult<bool> + Send + Sync + 'static,
) -> TypeRef {
    let width = element
        .fixed_size()
        .expect("optional() requires a fixed-size element type");
    StructBuilder::new(format!("optional<{name}>"))
        .field(element, name)
        .size(move |v| Ok(if predicate(v)? { width } else { 0 }))
        .build()
        .expect("optional() struct is always well-formed")
}

/// A `prepack` callback that writes a constant integer into `name` every
/// time the struct is packed. Returns a concrete, `'static` closure rather
/// than a boxed/`Arc`'d one, so it can be passed straight to
/// `StructBuilder::prepack`.
pub fn pack_value(name: &str, value: i128) -> impl Fn(&mut StructValue) -> CallbackResult<()> + Send + Sync + 'static {
    let name = name.to_string();
    move |v: &mut StructValue| v.set(&name, Value::Int(value)).map_err(|e| Box::new(e) as _)
}

/// A `prepack` callback that writes `f(value)` into `name` every time the
/// struct is packed.
pub fn pack_expr(
    f: impl Fn(&StructValue) -> CallbackResult<i128> + Send + Sync + 'static,
    name: &str,
) -> impl Fn(&mut StructValue) -> CallbackResult<()> + Send + Sync + 'static {
    let name = name.to_string();
    move |v: &mut StructValue| {
        let value = f(v)?;
        v.set(&name, Value::Int(value)).map_err(|e| Box::new(e) as _)
    }
}

/// The canonical `prepack` callback: writes the real (pre-padding) byte
/// length of the entire value into `name`.
pub fn pack_real_size(name: &str) -> impl Fn(&mut StructValue) -> CallbackResult<()> + Send + Sync + 'static {
    let name = name.to_string();
    move |v: &mut StructValue| {
        let size = crate::pack::measure(v).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
        v.set(&name, Value::Int(size as i128)).map_err(|e| Box::new(e) as _)
    }
}
