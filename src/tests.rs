//! End-to-end coverage exercising every engine component together: a fully
//! fixed struct, size-driven variable structs (with and without a `size`
//! callback), classifier-based derived dispatch, bitfields, enum bitmask
//! dump, and `optional()`-style embedded extensions.
//!
//! Some scenarios below don't reproduce a literal upstream wire capture:
//! where only raw bytes were available with no accompanying type
//! declaration, a self-contained scenario exercising the same mechanism was
//! built instead (noted at each site).

use rstest::rstest;

use crate::endian::Endian;
use crate::enum_td::enum_td;
use crate::error::Error;
use crate::helpers::{darray, optional, pack_real_size};
use crate::primitive::{array, char_td, raw, u16, u32, u8_td};
use crate::struct_def::StructBuilder;
use crate::td::TypeRef;
use crate::value::Value;
use crate::{bitfield, new_bitfield, BitSubField};

fn s1_td() -> TypeRef {
    StructBuilder::new("Header")
        .field(u16(Endian::Big), "myshort")
        .field(u8_td(), "mybyte")
        .padding_bytes(1)
        .field(array(char_td(), 5), "mystr")
        .padding_bytes(1)
        .field(array(u16(Endian::Big), 5), "myarray")
        .build()
        .unwrap()
}

#[test]
fn fixed_struct_packs_and_parses() {
    let td = s1_td();
    let expected: Vec<u8> = vec![
        0, 2, 0, 0, b'1', b'2', b'3', 0, 0, 0, 0, 1, 0, 2, 0, 3, 0, 4, 0, 5,
    ];

    let mut value = td
        .new(&[
            ("myshort", Value::Int(2)),
            ("mystr", Value::fixed_str("123", 5)),
            ("myarray", Value::List((1..=5).map(Value::Int).collect())),
        ])
        .unwrap();
    assert_eq!(value.to_bytes().unwrap(), expected);

    let (parsed, consumed) = td.parse(&expected, 0).unwrap();
    assert_eq!(consumed, 20);
    assert_eq!(parsed.get_int("myshort").unwrap(), 2);
    assert_eq!(parsed.get_int("mybyte").unwrap(), 0);
    assert_eq!(parsed.get("mystr").unwrap().as_bytes().unwrap(), b"123\0\0");
    assert_eq!(
        parsed.get("myarray").unwrap().as_list().unwrap().iter().map(|v| v.as_int().unwrap()).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}

#[test]
fn parse_bounds_rejects_truncated_input() {
    let td = s1_td();
    let err = td.parse(&[0u8; 5], 0).unwrap_err();
    assert!(matches!(err, Error::InsufficientBytes { .. }));
}

fn s2_with_size_td() -> TypeRef {
    StructBuilder::new("Chunk")
        .field(u16(Endian::Big), "length")
        .field(raw(), "data")
        .size(|v| Ok(v.get_int("length")? as usize))
        .prepack(pack_real_size("length"))
        .build()
        .unwrap()
}

fn s2_without_size_td() -> TypeRef {
    StructBuilder::new("ChunkNoSize")
        .field(u16(Endian::Big), "length")
        .field(raw(), "data")
        .build()
        .unwrap()
}

#[test]
fn size_driven_trailer_consumes_declared_length() {
    let td = s2_with_size_td();
    let mut value = td.new(&[("data", Value::Bytes(b"abcde".to_vec()))]).unwrap();
    let bytes = value.to_bytes().unwrap();
    assert_eq!(bytes, vec![0, 7, b'a', b'b', b'c', b'd', b'e']);

    let (parsed, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 7);
    assert_eq!(parsed.get("data").unwrap().as_bytes().unwrap(), b"abcde");
}

#[test]
fn idempotent_pack_reproduces_identical_bytes() {
    let td = s2_with_size_td();
    let mut value = td.new(&[("data", Value::Bytes(b"abcde".to_vec()))]).unwrap();
    let first = value.to_bytes().unwrap();
    let second = value.to_bytes().unwrap();
    assert_eq!(first, second);
}

/// Without a `size` callback, a trailing `raw` field has no signal telling
/// it how many of the caller's bytes belong to this record — it gets none,
/// not "the rest of the buffer". `create()` is the explicit opt-in for the
/// latter.
#[test]
fn trailer_without_size_consumes_nothing_but_create_expands_it() {
    let td = s2_without_size_td();
    let bytes = vec![0u8, 7, b'a', b'b', b'c', b'd', b'e'];

    let (parsed, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(parsed.get("data").unwrap().as_bytes().unwrap(), b"");

    let expanded = td.create(&bytes).unwrap();
    assert_eq!(expanded.get("data").unwrap().as_bytes().unwrap(), b"abcde");
}

fn s3_base_td() -> TypeRef {
    StructBuilder::new("Packet")
        .field(u16(Endian::Big), "length")
        .field(u8_td(), "kind")
        .field(u8_td(), "basedata")
        .size(|v| Ok(v.get_int("length")? as usize))
        .prepack(pack_real_size("length"))
        .classifier(|v| Ok(v.get_int("kind")? as i64))
        .align(4)
        .build()
        .unwrap()
}

fn s3_variant_a_td(base: &TypeRef) -> TypeRef {
    StructBuilder::new("PacketA")
        .base(base.clone())
        .field(u16(Endian::Big), "data1")
        .field(u8_td(), "data2")
        .classifyby(vec![1])
        .align(4)
        .build()
        .unwrap()
}

fn s3_variant_b_td(base: &TypeRef) -> TypeRef {
    StructBuilder::new("PacketB")
        .base(base.clone())
        .field(u32(Endian::Big), "data3")
        .classifyby(vec![2])
        .align(4)
        .build()
        .unwrap()
}

#[test]
fn derived_dispatch_selects_variant_a() {
    let base = s3_base_td();
    let a = s3_variant_a_td(&base);
    let _b = s3_variant_b_td(&base);

    let mut value = a
        .new(&[
            ("kind", Value::Int(1)),
            ("basedata", Value::Int(1)),
            ("data1", Value::Int(2)),
            ("data2", Value::Int(3)),
        ])
        .unwrap();
    let bytes = value.to_bytes().unwrap();
    assert_eq!(bytes, vec![0, 7, 1, 1, 0, 2, 3, 0]);

    let (parsed, consumed) = base.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 8);
    assert_eq!(parsed.get_type().name(), "PacketA");
    assert_eq!(parsed.get_int("data1").unwrap(), 2);
    assert_eq!(parsed.get_int("data2").unwrap(), 3);
    assert_eq!(parsed.variant_stack().len(), 2);
}

#[test]
fn derived_dispatch_selects_variant_b() {
    let base = s3_base_td();
    let _a = s3_variant_a_td(&base);
    let b = s3_variant_b_td(&base);

    let mut value = b
        .new(&[("kind", Value::Int(2)), ("basedata", Value::Int(1)), ("data3", Value::Int(4))])
        .unwrap();
    let bytes = value.to_bytes().unwrap();
    assert_eq!(bytes, vec![0, 8, 2, 1, 0, 0, 0, 4]);

    let (parsed, consumed) = base.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 8);
    assert_eq!(parsed.get_type().name(), "PacketB");
    assert_eq!(parsed.get_int("data3").unwrap(), 4);
}

#[test]
fn derived_dispatch_is_deterministic_across_reparse() {
    let base = s3_base_td();
    let a = s3_variant_a_td(&base);
    let _b = s3_variant_b_td(&base);

    let mut value = a
        .new(&[
            ("kind", Value::Int(1)),
            ("basedata", Value::Int(1)),
            ("data1", Value::Int(9)),
            ("data2", Value::Int(9)),
        ])
        .unwrap();
    let bytes = value.to_bytes().unwrap();

    let (first, _) = base.parse(&bytes, 0).unwrap();
    let (second, _) = base.parse(&bytes, 0).unwrap();
    assert_eq!(first.get_type().name(), second.get_type().name());
    assert_eq!(first, second);
}

fn flags_bitfield_td() -> TypeRef {
    bitfield(
        "Flags",
        u8_td(),
        vec![
            BitSubField { name: Some("version".into()), bit_width: 4, array_len: None },
            BitSubField { name: Some("kind".into()), bit_width: 4, array_len: None },
        ],
    )
    .unwrap()
}

/// Sub-fields pack MSB-first within the backing byte regardless of its own
/// endianness: `version=5, kind=1` over a u8 backing gives `0101_0001`.
#[test]
fn bitfield_sub_fields_pack_msb_first() {
    let td = flags_bitfield_td();
    let value = new_bitfield(&td, &[("version", 5), ("kind", 1)]).unwrap();
    let bf = value.as_bitfield().unwrap();
    let raw = bitfield::encode(bf, "flags").unwrap();
    assert_eq!(raw, 0x51);
}

fn flags_header_td() -> TypeRef {
    StructBuilder::new("FlagsHeader")
        .field(flags_bitfield_td(), "flags")
        .field(u32(Endian::Big), "length")
        .build()
        .unwrap()
}

#[test]
fn bitfield_field_round_trips_through_a_struct() {
    let td = flags_header_td();
    let bf_td = flags_bitfield_td();
    let mut value = td.new(&[]).unwrap();
    value.set("flags", new_bitfield(&bf_td, &[("version", 5), ("kind", 1)]).unwrap()).unwrap();
    value.set_int("length", 0x1c).unwrap();

    let bytes = value.to_bytes().unwrap();
    assert_eq!(bytes, vec![0x51, 0x00, 0x00, 0x00, 0x1c]);

    let (parsed, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 5);
    let parsed_bf = parsed.get("flags").unwrap().as_bitfield().unwrap();
    assert_eq!(parsed_bf.get("version").unwrap(), 5);
    assert_eq!(parsed_bf.get("kind").unwrap(), 1);
    assert_eq!(parsed.get_int("length").unwrap(), 0x1c);
}

fn abilities_enum_td() -> TypeRef {
    enum_td(
        "Abilities",
        u8_td(),
        true,
        &[("SWIMMING", 1), ("JUMPING", 2), ("RUNNING", 4), ("CLIMBING", 8)],
    )
}

fn creature_td() -> TypeRef {
    StructBuilder::new("Creature").field(abilities_enum_td(), "abilities").build().unwrap()
}

#[test]
fn enum_bitmask_dump_is_symbolized_only_when_human_readable() {
    let td = creature_td();
    let value = td.new(&[("abilities", Value::Int(10))]).unwrap();

    let human = crate::dump::dump(&value, true, false).unwrap();
    assert_eq!(human["abilities"], serde_json::Value::String("JUMPING CLIMBING".to_string()));

    let raw = crate::dump::dump(&value, false, false).unwrap();
    assert_eq!(raw["abilities"], serde_json::json!(10));
}

#[test]
fn enum_bitmask_dump_reports_residual_bits_as_hex() {
    let td = creature_td();
    // 16 has no matching flag among SWIMMING/JUMPING/RUNNING/CLIMBING.
    let value = td.new(&[("abilities", Value::Int(18))]).unwrap();
    let human = crate::dump::dump(&value, true, false).unwrap();
    assert_eq!(human["abilities"], serde_json::Value::String("JUMPING 0x10".to_string()));
}

#[test]
fn extend_override_affects_dump_not_wire_bytes() {
    let code_enum = enum_td("Code", u8_td(), false, &[("START", 1), ("STOP", 2)]);
    let td = StructBuilder::new("Event")
        .field(u8_td(), "code")
        .extend_field("code", code_enum)
        .build()
        .unwrap();

    let mut value = td.new(&[("code", Value::Int(1))]).unwrap();
    assert_eq!(value.to_bytes().unwrap(), vec![1]);

    let dumped = crate::dump::dump(&value, true, false).unwrap();
    assert_eq!(dumped["code"], serde_json::Value::String("START".to_string()));
}

/// Stands in for an ARP-style "present only if a sibling flag says so"
/// trailing field: no literal wire capture was available to ground byte-for-
/// byte, so this exercises the same `optional()`-over-`embed()` mechanism
/// directly instead.
fn optional_extension_td() -> TypeRef {
    let extra = optional(u16(Endian::Big), "extra", |v| Ok(v.get_int("flags")? == 1));
    StructBuilder::new("WithOptionalExtra").field(u8_td(), "flags").embed(extra).build().unwrap()
}

#[test]
fn optional_embedded_field_present_when_flag_set() {
    let td = optional_extension_td();
    let bytes = [1u8, 0x00, 0x2a];
    let (value, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 3);
    assert_eq!(value.get_int("extra").unwrap(), 0x2a);
}

#[test]
fn optional_embedded_field_absent_when_flag_clear() {
    let td = optional_extension_td();
    let bytes = [0u8];
    let (value, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 1);
    assert_eq!(value.get_int("extra").unwrap(), 0);
}

fn embedded_sized_substruct_td() -> TypeRef {
    let inner = StructBuilder::new("Inner")
        .field(u16(Endian::Big), "a")
        .size(|_| Ok(2))
        .build()
        .unwrap();
    StructBuilder::new("Outer").embed(inner).field(u16(Endian::Big), "b").build().unwrap()
}

/// Regression for an embedded sub-struct's own `size` permanently narrowing
/// the shared cursor: `b` must still be readable after `Inner`'s own
/// 2-byte window closes (spec §4.6's "cordon off their own trailer
/// regions", plural — a sized embed isn't the only thing left in the
/// struct).
#[test]
fn embedded_sized_substruct_does_not_starve_following_siblings() {
    let td = embedded_sized_substruct_td();
    let bytes = [0x00, 0x01, 0x00, 0x02];
    let (value, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 4);
    assert_eq!(value.get_int("a").unwrap(), 1);
    assert_eq!(value.get_int("b").unwrap(), 2);
}

fn open_array_trailer_td() -> TypeRef {
    StructBuilder::new("Samples")
        .field(u8_td(), "count")
        .field(array(u16(Endian::Big), 0), "samples")
        .build()
        .unwrap()
}

/// `create()` must expand an open array trailer (`T[0]`), not just `raw`.
#[test]
fn create_expands_an_open_array_trailer_not_just_raw() {
    let td = open_array_trailer_td();
    let bytes = vec![0u8, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03];

    let (parsed, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 1);
    assert!(parsed.get("samples").unwrap().as_list().unwrap().is_empty());

    let expanded = td.create(&bytes).unwrap();
    let items: Vec<i128> = expanded
        .get("samples")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|v| v.as_int().unwrap())
        .collect();
    assert_eq!(items, vec![1, 2, 3]);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
fn darray_consumes_exactly_its_declared_count(#[case] count: usize) {
    let td = StructBuilder::new("DarrayHolder")
        .field(u8_td(), "count")
        .field(darray(u16(Endian::Big), |v| Ok(v.get_int("count")? as usize)), "items")
        .build()
        .unwrap();

    let mut bytes = vec![count as u8];
    for i in 0..count {
        bytes.push(0);
        bytes.push(i as u8);
    }

    let (value, consumed) = td.parse(&bytes, 0).unwrap();
    assert_eq!(consumed, 1 + count * 2);
    assert_eq!(value.get("items").unwrap().as_list().unwrap().len(), count);
}

#[test]
fn length_consistency_matches_padded_real_size() {
    let mut value = s3_variant_a_td(&s3_base_td())
        .new(&[
            ("kind", Value::Int(1)),
            ("basedata", Value::Int(1)),
            ("data1", Value::Int(2)),
            ("data2", Value::Int(3)),
        ])
        .unwrap();
    let bytes = value.to_bytes().unwrap();
    assert_eq!(value.length().unwrap(), bytes.len());
    assert_eq!(value.real_size().unwrap(), 7);
}
