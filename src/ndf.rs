//! Grammar for uncompressed NDF binary files: the `EUG0`/`CNDF` header, the
//! `TOC0` table of contents, and the object table with its tagged property
//! values.
//!
//! Values are recursive (lists, maps, and pairs hold further values), so the
//! value layout is registered as the [`NDF_TYPE`] template and referenced
//! through `Field::lazy`.
//!
//! The header's `headerSize` is rebuilt as the end of the fixed header, where
//! the object area starts; the table of contents follows the object area.

use crate::field::{Case, Field, Grammar, Len, NumberType};
use crate::text::Encoding;

/// Template name of one tagged value.
pub const NDF_TYPE: &str = "NDFType";

/// Property index that closes an object's property list.
pub const END_OF_OBJECT: u32 = 0xABAB_ABAB;

/// Grammar whose root is a single tagged value.
pub fn value_grammar() -> Grammar {
    Grammar::template(NDF_TYPE).define(NDF_TYPE, ndf_type())
}

/// Grammar of a whole uncompressed file.
pub fn file_grammar() -> Grammar {
    let zeros = || Field::bytes_const([0u8; 4]);
    let root = Field::structure([
        ("magic", Field::bytes_const(*b"EUG0")),
        ("magic2", zeros()),
        ("magic3", Field::bytes_const(*b"CNDF")),
        ("compressed", Field::u32_le()),
        (
            "toc0offset",
            Field::rebuild(
                |c| Ok(c.offset("toc0header")? + c.ptr_size("toc0header.OBJE.objects")?),
                Field::u32_le(),
            ),
        ),
        ("unk0", zeros()),
        // Shipped NDF files store 40 here, the offset of `uncompressedSize`.
        // Those parse fine but build back with 44.
        ("headerSize", Field::rebuild(|c| c.offset("toc0header"), Field::u32_le())),
        ("unk2", zeros()),
        ("size", Field::u32_le()),
        ("unk4", zeros()),
        ("uncompressedSize", Field::u32_le()),
        ("toc0header", Field::pointer(|c| c.parsed_u64("toc0offset"), toc0_header())),
    ]);
    Grammar::new(root).define(NDF_TYPE, ndf_type())
}

fn toc0_header() -> Field {
    Field::structure([
        ("magic", Field::bytes_const(*b"TOC0")),
        ("tableCount", Field::constant(NumberType::U32_LE, 9u32)),
        ("OBJE", obje_table()),
    ])
}

fn obje_table() -> Field {
    let zeros = || Field::bytes_const([0u8; 4]);
    Field::structure([
        ("magic", Field::bytes_const(*b"OBJE")),
        ("pad0", zeros()),
        ("offset", Field::rebuild(|c| c.get("_._.headerSize"), Field::u32_le())),
        ("pad1", zeros()),
        ("size", Field::rebuild(|c| c.ptr_size("objects"), Field::u32_le())),
        ("pad2", zeros()),
        (
            "objects",
            Field::area(|c| c.parsed_u64("offset"), |c| c.parsed_u64("size"), ndf_object()),
        ),
    ])
}

fn ndf_object() -> Field {
    Field::structure([
        ("classIndex", Field::u32_le()),
        (
            "properties",
            Field::repeat_until(
                |property, _| Ok(property.u64("propertyIndex")? == END_OF_OBJECT as u64),
                ndf_property(),
            ),
        ),
    ])
}

fn ndf_property() -> Field {
    Field::structure([
        ("propertyIndex", Field::u32_le()),
        (
            "value",
            Field::if_then(
                |c| Ok(c.u64("propertyIndex")? != END_OF_OBJECT as u64),
                NDF_TYPE,
                Field::lazy(NDF_TYPE),
            ),
        ),
    ])
}

fn value_of(field: Field) -> Field {
    Field::structure([("value", field)])
}

fn components(names: &[&'static str], component: fn() -> Field) -> Field {
    Field::structure(names.iter().map(|name| (*name, component())))
}

fn ndf_type() -> Field {
    let reference = Field::structure([
        ("typeId", Field::rebuild(|c| c.discriminant("ref"), Field::u32_le())),
        (
            "ref",
            Field::switch(
                |c| c.get_parsed("typeId"),
                [
                    Case::new(
                        0xAAAA_AAAAu32,
                        "TranReference",
                        Field::structure([("tranIndex", Field::u32_le())]),
                    ),
                    Case::new(
                        0xBBBB_BBBBu32,
                        "ObjectReference",
                        Field::structure([("objectIndex", Field::u32_le()), ("classIndex", Field::u32_le())]),
                    ),
                ],
            ),
        ),
    ]);
    let list = Field::structure([
        ("length", Field::rebuild(|c| c.len("items"), Field::u32_le())),
        (
            "items",
            Field::array(Len::dynamic(|c| c.parsed_u64("length")), Field::lazy(NDF_TYPE)),
        ),
    ]);
    let map = Field::structure([
        ("count", Field::rebuild(|c| c.len("mapitems"), Field::u32_le())),
        (
            "mapitems",
            Field::array(
                Len::dynamic(|c| c.parsed_u64("count")),
                Field::structure([("key", Field::lazy(NDF_TYPE)), ("value", Field::lazy(NDF_TYPE))]),
            ),
        ),
    ]);
    let blob = Field::structure([
        ("size", Field::u32_le()),
        ("data", Field::bytes_with(|c| c.u64("size"))),
    ]);

    let cases = [
        Case::new(
            0x00u32,
            "Boolean",
            value_of(Field::enumeration(NumberType::U8, [("false", 0), ("true", 1)])),
        ),
        Case::new(0x01u32, "Int8", value_of(Field::u8())),
        Case::new(0x02u32, "Int32", value_of(Field::i32_le())),
        Case::new(0x03u32, "UInt32", value_of(Field::u32_le())),
        Case::new(0x04u32, "Unk0x4", value_of(Field::bytes(8))),
        Case::new(0x05u32, "Float32", value_of(Field::f32_le())),
        Case::new(0x06u32, "Float64", value_of(Field::f64_le())),
        Case::new(0x07u32, "StringReference", Field::structure([("stringIndex", Field::u32_le())])),
        Case::new(
            0x08u32,
            "WideString",
            Field::structure([("str", Field::pascal_string(Encoding::UTF16_LE, NumberType::U32_LE))]),
        ),
        Case::new(0x09u32, "Reference", reference),
        Case::new(0x0Bu32, "F32_vec3", components(&["x", "y", "z"], Field::f32_le)),
        Case::new(0x0Cu32, "F32_vec4", components(&["x", "y", "z", "w"], Field::f32_le)),
        Case::new(0x0Du32, "Color", components(&["r", "g", "b", "a"], Field::u8)),
        Case::new(0x0Eu32, "S32_vec3", components(&["x", "y", "z"], Field::i32_le)),
        Case::new(
            0x0Fu32,
            "Matrix",
            Field::structure([("Matrix", Field::array(Len::Fixed(16), Field::f32_le()))]),
        ),
        Case::new(0x11u32, "List", list),
        Case::new(0x12u32, "Map", map),
        Case::new(0x13u32, "Long", value_of(Field::u64_le())),
        Case::new(0x14u32, "Blob", blob),
        Case::new(0x18u32, "S16", value_of(Field::i16_le())),
        Case::new(0x19u32, "U16", value_of(Field::u16_le())),
        Case::new(0x1Au32, "GUID", Field::structure([("data", Field::bytes(16))])),
        Case::new(0x1Cu32, "PathReference", Field::structure([("stringIndex", Field::u32_le())])),
        Case::new(0x1Du32, "LocalisationHash", Field::structure([("data", Field::bytes(8))])),
        Case::new(0x1Fu32, "S32_vec2", components(&["x", "y"], Field::i32_le)),
        Case::new(0x21u32, "F32_vec2", components(&["x", "y"], Field::f32_le)),
        Case::new(
            0x22u32,
            "Pair",
            Field::structure([("first", Field::lazy(NDF_TYPE)), ("second", Field::lazy(NDF_TYPE))]),
        ),
        Case::new(0x25u32, "Hash", Field::structure([("hash", Field::bytes(16))])),
    ];

    Field::structure([
        ("typeId", Field::rebuild(|c| c.discriminant("data"), Field::u32_le())),
        ("data", Field::switch(|c| c.get_parsed("typeId"), cases)),
    ])
}
