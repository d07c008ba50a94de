//! Converts a value tree into a `serde_json::Value` tree for introspection
//! and debugging (spec component C9). Read-only: never mutates `value`,
//! and never affects `parse`/`to_bytes` (spec's "dump vs pack independence"
//! design note).

use std::collections::HashMap;

use crate::enum_td::EnumTd;
use crate::error::{CallbackKind, Error, Result};
use crate::struct_def;
use crate::td::{TypeDef, TypeRef};
use crate::value::{BitfieldValue, StructValue, Value};

/// `dump(value, human_readable, include_type)`: a mapping for a struct
/// value (recursively, for nested composite fields).
///
/// 1. Each field is recursively reduced to its unformatted JSON form.
/// 2. An enum-typed field is additionally symbolized when `human_readable`
///    is set (exact match, or space-joined bitmask flags with a residual
///    hex token).
/// 3. The `extend` override of any ancestor in the effective type's base
///    chain substitutes the field's declared type for steps 1 and 2,
///    without touching the underlying value.
/// 4. If the effective struct type declares its own `formatter`, it runs
///    last, over the whole mapping.
/// 5. If `include_type`, a reserved `_type` key is set to the effective
///    type's name.
pub fn dump(value: &StructValue, human_readable: bool, include_type: bool) -> Result<serde_json::Value> {
    dump_struct(value, human_readable, include_type)
}

fn dump_struct(value: &StructValue, human_readable: bool, include_type: bool) -> Result<serde_json::Value> {
    let eff = value.get_type();
    let s = eff.as_struct().expect("dump_struct requires a struct type");
    let overrides = collect_extend_overrides(&eff);

    let mut map = serde_json::Map::new();
    for (idx, meta) in s.flat_fields.iter().enumerate() {
        let declared_ty = overrides.get(&meta.name).unwrap_or(&meta.ty);
        let dumped = dump_value(&value.fields()[idx], declared_ty, human_readable, include_type)?;
        map.insert(meta.name.clone(), dumped);
    }

    let mut result = serde_json::Value::Object(map);
    if let Some(formatter) = &s.formatter {
        result = formatter(result)
            .map_err(|e| Error::callback_from_box(CallbackKind::Formatter, eff.name().to_string(), e))?;
    }
    if include_type {
        if let serde_json::Value::Object(m) = &mut result {
            m.insert("_type".to_string(), serde_json::Value::String(eff.name().to_string()));
        }
    }
    Ok(result)
}

/// Ancestor-to-descendant sweep over the effective type's base chain,
/// collecting `extend` overrides; a more-derived type's override wins.
fn collect_extend_overrides(eff: &TypeRef) -> HashMap<String, TypeRef> {
    let mut overrides = HashMap::new();
    for level in struct_def::base_chain_root_to_self(eff) {
        for (name, ty) in &level.as_struct().unwrap().extend {
            overrides.insert(name.clone(), ty.clone());
        }
    }
    overrides
}

fn dump_value(value: &Value, ty: &TypeRef, human_readable: bool, include_type: bool) -> Result<serde_json::Value> {
    match (&*ty.0, value) {
        (TypeDef::Int(_), Value::Int(v)) => Ok(json_int(*v)),
        (TypeDef::Char, Value::Int(v)) => Ok(json_int(*v)),
        (TypeDef::Raw, Value::Bytes(b)) => Ok(bytes_to_json(b)),
        (TypeDef::Array(a), Value::Bytes(b)) if matches!(&*a.element.0, TypeDef::Char) => Ok(bytes_to_json(b)),
        (TypeDef::Array(a), Value::List(items)) => {
            let out = items
                .iter()
                .map(|i| dump_value(i, &a.element, human_readable, include_type))
                .collect::<Result<Vec<_>>>()?;
            Ok(serde_json::Value::Array(out))
        }
        (TypeDef::Darray(d), Value::List(items)) => {
            let out = items
                .iter()
                .map(|i| dump_value(i, &d.element, human_readable, include_type))
                .collect::<Result<Vec<_>>>()?;
            Ok(serde_json::Value::Array(out))
        }
        (TypeDef::Bitfield(_), Value::Bitfield(bf)) => Ok(dump_bitfield(bf)),
        (TypeDef::Enum(e), Value::Int(v)) => Ok(dump_enum(e, *v, human_readable)),
        (TypeDef::Struct(_), Value::Struct(s)) => dump_struct(s, human_readable, include_type),
        _ => unreachable!("value shape must match its declared type"),
    }
}

fn json_int(v: i128) -> serde_json::Value {
    if v >= 0 {
        serde_json::Value::Number(serde_json::Number::from(v as u64))
    } else {
        serde_json::Value::Number(serde_json::Number::from(v as i64))
    }
}

fn bytes_to_json(b: &[u8]) -> serde_json::Value {
    serde_json::Value::String(String::from_utf8_lossy(b).into_owned())
}

fn dump_bitfield(bf: &BitfieldValue) -> serde_json::Value {
    let td = bf.get_type();
    let b = td.as_bitfield().expect("dump_bitfield requires a bitfield value");
    let mut map = serde_json::Map::new();
    for field in &b.sub_fields {
        let Some(name) = &field.name else { continue };
        let dumped = match field.array_len {
            None => json_int(bf.get(name).expect("named sub-field must resolve") as i128),
            Some(_) => serde_json::Value::Array(
                bf.get_array(name)
                    .expect("named array sub-field must resolve")
                    .iter()
                    .map(|v| json_int(*v as i128))
                    .collect(),
            ),
        };
        map.insert(name.clone(), dumped);
    }
    serde_json::Value::Object(map)
}

fn dump_enum(e: &EnumTd, v: i128, human_readable: bool) -> serde_json::Value {
    if !human_readable {
        return json_int(v);
    }
    if e.bitmask {
        let (flags, residual) = e.flags(v);
        let mut parts: Vec<String> = flags.into_iter().map(str::to_string).collect();
        if residual != 0 {
            parts.push(format!("{residual:#X}"));
        }
        serde_json::Value::String(parts.join(" "))
    } else if let Some(sym) = e.symbol(v) {
        serde_json::Value::String(sym.to_string())
    } else {
        json_int(v)
    }
}
