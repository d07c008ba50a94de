//! Consumes a byte window and a type descriptor, produces a value tree and
//! the number of bytes consumed (spec component C6).

use crate::bitfield;
use crate::cursor::Cursor;
use crate::error::{CallbackKind, Error, Result};
use crate::primitive;
use crate::primitive::ArrayLen;
use crate::struct_def::{self, ClassifyKey, ParseStep, SizeFn};
use crate::td::{TypeDef, TypeRef};
use crate::value::{StructValue, Value};

/// Parses `bytes[offset..outer_limit]` through `td` (a struct type),
/// honoring inherited base fields, embedded size windows, and classifier
/// dispatch, per spec §4.4's parse contract.
pub(crate) fn parse_struct(
    td: &TypeRef,
    bytes: &[u8],
    offset: usize,
    outer_limit: usize,
) -> Result<(StructValue, usize)> {
    let mut cursor = Cursor::new(bytes, offset, outer_limit);
    let mut value = StructValue::new_defaulted(td.clone());

    for level in struct_def::base_chain_root_to_self(td) {
        let s = level.as_struct().expect("parse_struct requires a struct type");
        parse_level(&s.own_parse_plan, s.size.as_ref(), &mut cursor, &mut value, offset, &level)?;
    }

    let mut current = td.clone();
    loop {
        let classifier = current
            .as_struct()
            .expect("struct type")
            .classifier
            .clone();
        let Some(classifier_fn) = classifier else { break };
        let key = classifier_fn(&value)
            .map_err(|e| Error::callback_from_box(CallbackKind::Classifier, current.name().to_string(), e))?;
        let candidates = current
            .as_struct()
            .unwrap()
            .derived
            .read()
            .expect("derived registry lock poisoned")
            .clone();
        let strict = current.as_struct().unwrap().strict_derived_dispatch;
        match select_derived(&current, &candidates, key, &value, strict)? {
            None => break,
            Some(derived) => {
                value.extend_to(&derived);
                let ds = derived.as_struct().unwrap();
                parse_level(&ds.own_parse_plan, ds.size.as_ref(), &mut cursor, &mut value, offset, &derived)?;
                value.push_variant(derived.clone());
                current = derived;
            }
        }
    }

    value.set_effective_type(current.clone());
    let padding = current.as_struct().unwrap().padding;
    let raw_consumed = cursor.offset - offset;
    let consumed = struct_def::padded(raw_consumed, padding);
    if offset + consumed > bytes.len() {
        return Err(Error::InsufficientBytes {
            field_path: current.name().to_string(),
            needed: consumed,
            available: bytes.len() - offset,
        });
    }
    Ok((value, consumed))
}

/// Convenience: parses from offset 0, and if the effective type's last
/// field is an open-ended trailer (`raw`, or an open array `T[0]`) that a
/// `size` callback left short, extends it with whatever bytes remain (spec
/// §6's `create`).
pub(crate) fn create(td: &TypeRef, bytes: &[u8]) -> Result<StructValue> {
    let (mut value, consumed) = parse_struct(td, bytes, 0, bytes.len())?;
    if consumed < bytes.len() {
        let eff = value.get_type();
        let s = eff.as_struct().unwrap();
        if let Some(last) = s.flat_fields.last() {
            let name = last.name.clone();
            let rest = &bytes[consumed..];
            match &*last.ty.0 {
                TypeDef::Raw => {
                    let mut existing = value.get(&name)?.as_bytes().unwrap_or(&[]).to_vec();
                    existing.extend_from_slice(rest);
                    value.set(&name, Value::Bytes(existing))?;
                }
                TypeDef::Array(a) if a.len == ArrayLen::Open => {
                    if matches!(&*a.element.0, TypeDef::Char) {
                        let mut existing = value.get(&name)?.as_bytes().unwrap_or(&[]).to_vec();
                        existing.extend_from_slice(rest);
                        value.set(&name, Value::Bytes(existing))?;
                    } else {
                        let elem_size = a
                            .element
                            .fixed_size()
                            .expect("open array element must be fixed-size");
                        let mut existing = value.get(&name)?.as_list().unwrap_or(&[]).to_vec();
                        for chunk in rest.chunks_exact(elem_size) {
                            existing.push(parse_fixed_leaf(&a.element, chunk)?);
                        }
                        value.set(&name, Value::List(existing))?;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(value)
}

fn parse_level(
    steps: &[ParseStep],
    size_fn: Option<&SizeFn>,
    cursor: &mut Cursor,
    value: &mut StructValue,
    window_start: usize,
    level_td: &TypeRef,
) -> Result<()> {
    match size_fn {
        // A declared `size` is a real width contract, checked before any of
        // this level's own fields are read. Once the window is exhausted, a
        // later step is simply left at its default rather than erroring —
        // this is how `optional()`-style embeds encode "absent" (spec §4.5).
        Some(f) => {
            apply_size_clamp(f, cursor, value, window_start, level_td)?;
            for step in steps {
                if cursor.remaining() == 0 {
                    break;
                }
                execute_step(step, cursor, value, level_td)?;
            }
        }
        // Without a `size`, nothing bounds this level beyond what it
        // naturally consumes — except a field that would otherwise read
        // "the rest of the window" with no signal of its own (`raw`, an
        // open array, or an embed that contains one): that gets no extra
        // room unless an ancestor's own `size` already widened the window.
        None => {
            let mut gated = false;
            for step in steps {
                if !gated && is_open_ended(step) {
                    cursor.narrow_limit_to(cursor.offset);
                    gated = true;
                }
                execute_step(step, cursor, value, level_td)?;
            }
        }
    }
    Ok(())
}

fn is_open_ended(step: &ParseStep) -> bool {
    match step {
        ParseStep::Padding(_) => false,
        ParseStep::Field { ty, .. } => {
            matches!(&*ty.0, TypeDef::Raw) || matches!(&*ty.0, TypeDef::Array(a) if a.len == ArrayLen::Open)
        }
        ParseStep::Embedded(plan) => {
            let sub = plan.sub_td.as_struct().unwrap();
            sub.size.is_none() && plan.steps.iter().any(is_open_ended)
        }
    }
}

fn apply_size_clamp(
    size_fn: &SizeFn,
    cursor: &mut Cursor,
    value: &StructValue,
    window_start: usize,
    level_td: &TypeRef,
) -> Result<()> {
    let declared = size_fn(value)
        .map_err(|e| Error::callback_from_box(CallbackKind::Size, level_td.name().to_string(), e))?;
    let minimum = cursor.offset - window_start;
    if declared < minimum {
        return Err(Error::SizeUnderflow {
            field_path: level_td.name().to_string(),
            declared,
            minimum,
        });
    }
    cursor.narrow_limit_to(window_start + declared);
    Ok(())
}

fn execute_step(step: &ParseStep, cursor: &mut Cursor, value: &mut StructValue, level_td: &TypeRef) -> Result<()> {
    match step {
        ParseStep::Padding(w) => {
            cursor.take(*w, &format!("{}.<padding>", level_td.name()))?;
            Ok(())
        }
        ParseStep::Field { flat_index, ty } => {
            let field_name = level_td.as_struct().unwrap().flat_fields[*flat_index].name.clone();
            let path = format!("{}.{}", level_td.name(), field_name);
            let parsed = parse_field(ty, cursor, value, &path)?;
            value.fields_mut()[*flat_index] = parsed;
            Ok(())
        }
        ParseStep::Embedded(plan) => {
            let sub = plan.sub_td.as_struct().unwrap();
            // An embedded sub-struct's own size (or its own "no room for an
            // unbounded trailer" gating) only cordons off its own region —
            // it must not leave the shared cursor's window narrowed for the
            // fields that follow it at this level (spec §4.6).
            let saved_limit = cursor.limit;
            let result = parse_level(&plan.steps, sub.size.as_ref(), cursor, value, cursor.offset, &plan.sub_td);
            cursor.limit = saved_limit;
            result
        }
    }
}

pub(crate) fn parse_field(ty: &TypeRef, cursor: &mut Cursor, value: &mut StructValue, path: &str) -> Result<Value> {
    match &*ty.0 {
        TypeDef::Int(i) => {
            let bytes = cursor.take(i.width_bytes as usize, path)?;
            Ok(Value::Int(i.parse(bytes)))
        }
        TypeDef::Char => {
            let bytes = cursor.take(1, path)?;
            Ok(Value::Int(bytes[0] as i128))
        }
        TypeDef::Raw => Ok(Value::Bytes(cursor.take_rest().to_vec())),
        TypeDef::Array(a) => {
            let bytes = match a.len {
                ArrayLen::Fixed(_) => cursor.take(ty.fixed_size().unwrap(), path)?,
                ArrayLen::Open => cursor.take_rest(),
            };
            primitive::parse_array(a, bytes)
        }
        TypeDef::Darray(d) => {
            let count = (d.count_fn)(value)
                .map_err(|e| Error::callback_from_box(CallbackKind::Size, path.to_string(), e))?;
            let elem_size = d
                .element
                .fixed_size()
                .expect("darray element must be a fixed-size type");
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let bytes = cursor.take(elem_size, &format!("{path}[{i}]"))?;
                items.push(parse_fixed_leaf(&d.element, bytes)?);
            }
            Ok(Value::List(items))
        }
        TypeDef::Bitfield(b) => {
            let bytes = cursor.take(b.backing.width_bytes as usize, path)?;
            let raw = b.backing.parse(bytes) as u128;
            Ok(Value::Bitfield(Box::new(bitfield::decode(ty, raw))))
        }
        TypeDef::Enum(e) => parse_field(&e.backing, cursor, value, path),
        TypeDef::Struct(_) => {
            let (nested, consumed) = parse_struct(ty, cursor.buf, cursor.offset, cursor.limit)?;
            cursor.offset += consumed;
            Ok(Value::Struct(Box::new(nested)))
        }
    }
}

/// Parses a fixed-size leaf value (array/darray element) directly out of an
/// already-sliced byte span, with no cursor or window bookkeeping — valid
/// because fixed-size types can't contain a variable-length tail.
pub(crate) fn parse_fixed_leaf(ty: &TypeRef, bytes: &[u8]) -> Result<Value> {
    match &*ty.0 {
        TypeDef::Int(i) => Ok(Value::Int(i.parse(bytes))),
        TypeDef::Char => Ok(Value::Int(bytes[0] as i128)),
        TypeDef::Bitfield(b) => {
            let raw = b.backing.parse(bytes) as u128;
            Ok(Value::Bitfield(Box::new(bitfield::decode(ty, raw))))
        }
        TypeDef::Enum(e) => parse_fixed_leaf(&e.backing, bytes),
        TypeDef::Struct(_) => {
            let (v, _) = parse_struct(ty, bytes, 0, bytes.len())?;
            Ok(Value::Struct(Box::new(v)))
        }
        TypeDef::Array(_) | TypeDef::Darray(_) | TypeDef::Raw => {
            unreachable!("a variable-size type cannot be a fixed-size array/darray element")
        }
    }
}

fn select_derived(
    base: &TypeRef,
    candidates: &[TypeRef],
    key: ClassifyKey,
    value: &StructValue,
    strict: bool,
) -> Result<Option<TypeRef>> {
    let classifyby_matches: Vec<&TypeRef> = candidates
        .iter()
        .filter(|d| d.as_struct().unwrap().classifyby.contains(&key))
        .collect();
    if !classifyby_matches.is_empty() {
        if strict && classifyby_matches.len() > 1 {
            return Err(Error::AmbiguousDerived {
                base: base.name().to_string(),
                candidates: classifyby_matches.iter().map(|d| d.name().to_string()).collect(),
            });
        }
        return Ok(Some(classifyby_matches[0].clone()));
    }

    let mut criteria_matches = Vec::new();
    for d in candidates {
        if let Some(criteria) = &d.as_struct().unwrap().criteria {
            if criteria(value)
                .map_err(|e| Error::callback_from_box(CallbackKind::Criteria, d.name().to_string(), e))?
            {
                criteria_matches.push(d.clone());
            }
        }
    }
    if criteria_matches.is_empty() {
        return Ok(None);
    }
    if strict && criteria_matches.len() > 1 {
        return Err(Error::AmbiguousDerived {
            base: base.name().to_string(),
            candidates: criteria_matches.iter().map(|d| d.name().to_string()).collect(),
        });
    }
    Ok(Some(criteria_matches[0].clone()))
}
