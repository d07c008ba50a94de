//! Runs `prepack` callbacks bottom-up, then serializes a value tree to
//! bytes (spec component C7).

use crate::bitfield;
use crate::error::{CallbackKind, Error, Result};
use crate::struct_def::{self, ParseStep};
use crate::td::{TypeDef, TypeRef};
use crate::value::{StructValue, Value};

/// Runs every applicable `prepack` callback once, mutating `value` in
/// place. Nested named-composite struct fields are resolved first (their
/// own base-chain prepacks, bottom-up), then this value's own embedded
/// sub-structs (innermost first), then its own level, then its base chain
/// from derived to root — per spec §4.4's pack ordering.
pub(crate) fn run_prepack(value: &mut StructValue) -> Result<()> {
    for field in value.fields_mut() {
        run_prepack_nested(field)?;
    }
    for level in struct_def::base_chain_root_to_self(&value.get_type()).into_iter().rev() {
        run_prepack_level(&level, value)?;
    }
    Ok(())
}

fn run_prepack_nested(value: &mut Value) -> Result<()> {
    match value {
        Value::Struct(s) => run_prepack(s),
        Value::List(items) => {
            for item in items {
                run_prepack_nested(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn run_prepack_level(level_td: &TypeRef, value: &mut StructValue) -> Result<()> {
    let s = level_td.as_struct().expect("run_prepack_level requires a struct type");
    run_prepack_steps(&s.own_parse_plan, value)?;
    if let Some(p) = &s.prepack {
        p(value).map_err(|e| Error::callback_from_box(CallbackKind::Prepack, level_td.name().to_string(), e))?;
    }
    Ok(())
}

fn run_prepack_steps(steps: &[ParseStep], value: &mut StructValue) -> Result<()> {
    for step in steps {
        if let ParseStep::Embedded(plan) = step {
            run_prepack_steps(&plan.steps, value)?;
            let sub = plan.sub_td.as_struct().unwrap();
            if let Some(p) = &sub.prepack {
                p(value).map_err(|e| {
                    Error::callback_from_box(CallbackKind::Prepack, plan.sub_td.name().to_string(), e)
                })?;
            }
        }
    }
    Ok(())
}

/// The unpadded byte length of `value`, without running `prepack` first.
/// Used internally by [`crate::helpers::pack_real_size`], which itself
/// runs as a `prepack` callback and cannot re-trigger the prepack chain
/// without recursing forever.
pub(crate) fn measure(value: &StructValue) -> Result<usize> {
    Ok(raw_bytes(value)?.len())
}

/// Runs `prepack`, then the unpadded byte length of the result.
pub(crate) fn real_size(value: &mut StructValue) -> Result<usize> {
    run_prepack(value)?;
    measure(value)
}

/// Runs `prepack`, then `round_up(real_size, P)`.
pub(crate) fn length(value: &mut StructValue) -> Result<usize> {
    let rs = real_size(value)?;
    let padding = value.get_type().as_struct().unwrap().padding();
    Ok(struct_def::padded(rs, padding))
}

/// Runs `prepack`, then serializes to bytes, padded to `value`'s own
/// padding modulus.
pub(crate) fn to_bytes(value: &mut StructValue) -> Result<Vec<u8>> {
    run_prepack(value)?;
    pack_struct_value(value)
}

fn raw_bytes(value: &StructValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for level in struct_def::base_chain_root_to_self(&value.get_type()) {
        write_level(&level, value, &mut buf)?;
    }
    Ok(buf)
}

/// `raw_bytes` padded to `value`'s own padding modulus. Used both for the
/// top-level `to_bytes` result and for packing a named-composite nested
/// struct field (whose own prepack already ran as part of the enclosing
/// value's `run_prepack` pass).
fn pack_struct_value(value: &StructValue) -> Result<Vec<u8>> {
    let mut buf = raw_bytes(value)?;
    let padding = value.get_type().as_struct().unwrap().padding();
    let target = struct_def::padded(buf.len(), padding);
    buf.resize(target, 0);
    Ok(buf)
}

fn write_level(level_td: &TypeRef, value: &StructValue, buf: &mut Vec<u8>) -> Result<()> {
    write_steps(&level_td.as_struct().unwrap().own_parse_plan, value, buf, level_td)
}

fn write_steps(steps: &[ParseStep], value: &StructValue, buf: &mut Vec<u8>, level_td: &TypeRef) -> Result<()> {
    for step in steps {
        match step {
            ParseStep::Padding(w) => buf.resize(buf.len() + w, 0),
            ParseStep::Field { flat_index, ty } => {
                let field_name = level_td.as_struct().unwrap().flat_fields[*flat_index].name.as_str();
                let path = format!("{}.{}", level_td.name(), field_name);
                buf.extend(pack_field(ty, &value.fields()[*flat_index], &path)?);
            }
            ParseStep::Embedded(plan) => write_steps(&plan.steps, value, buf, &plan.sub_td)?,
        }
    }
    Ok(())
}

fn pack_field(ty: &TypeRef, value: &Value, path: &str) -> Result<Vec<u8>> {
    match &*ty.0 {
        TypeDef::Int(i) => i.pack(value.as_int().unwrap_or(0), path),
        TypeDef::Char => Ok(vec![value.as_int().unwrap_or(0) as u8]),
        TypeDef::Raw => Ok(value.as_bytes().unwrap_or(&[]).to_vec()),
        TypeDef::Array(a) => crate::primitive::pack_array(a, value, path),
        TypeDef::Darray(d) => {
            let items = value.as_list().unwrap_or(&[]);
            let mut out = Vec::new();
            for (i, item) in items.iter().enumerate() {
                out.extend(pack_fixed_leaf(&d.element, item, &format!("{path}[{i}]"))?);
            }
            Ok(out)
        }
        TypeDef::Bitfield(b) => {
            let bf = value
                .as_bitfield()
                .expect("bitfield field requires a Bitfield value");
            let raw = bitfield::encode(bf, path)?;
            b.backing.pack(raw as i128, path)
        }
        TypeDef::Enum(e) => pack_field(&e.backing, value, path),
        TypeDef::Struct(_) => {
            let nested = value.as_struct().expect("struct field requires a Struct value");
            pack_struct_value(nested)
        }
    }
}

/// Packs a fixed-size leaf value (array/darray element), mirroring
/// [`crate::parse::parse_fixed_leaf`]'s restricted type set.
pub(crate) fn pack_fixed_leaf(ty: &TypeRef, value: &Value, path: &str) -> Result<Vec<u8>> {
    match &*ty.0 {
        TypeDef::Int(i) => i.pack(value.as_int().unwrap_or(0), path),
        TypeDef::Char => Ok(vec![value.as_int().unwrap_or(0) as u8]),
        TypeDef::Bitfield(b) => {
            let bf = value
                .as_bitfield()
                .expect("bitfield element requires a Bitfield value");
            let raw = bitfield::encode(bf, path)?;
            b.backing.pack(raw as i128, path)
        }
        TypeDef::Enum(e) => pack_fixed_leaf(&e.backing, value, path),
        TypeDef::Struct(_) => {
            let nested = value.as_struct().expect("struct element requires a Struct value");
            pack_struct_value(nested)
        }
        TypeDef::Array(_) | TypeDef::Darray(_) | TypeDef::Raw => {
            unreachable!("a variable-size type cannot be a fixed-size array/darray element")
        }
    }
}
