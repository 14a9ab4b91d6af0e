//! Integration tests: numbers, structs, arrays, offsets, build round trips, and error paths.

use bingrammar::{Error, Field, FieldKind, Len, NumberType, Tree, Value};
use std::io::{Seek, SeekFrom};

fn pair() -> Field {
    Field::structure([("a", Field::u32_le()), ("b", Field::u32_le())])
}

#[test]
fn test_number_byte_order() {
    let mut le = Tree::new(Field::u32_le());
    let v = le.parse_bytes(&[0x78, 0x56, 0x34, 0x12]).expect("parse");
    assert_eq!(v, Value::U32(305419896));
    assert_eq!(le.size().expect("size"), 4);

    let mut be = Tree::new(Field::u32_be());
    be.parse_bytes(&[0x12, 0x34, 0x56, 0x78]).expect("parse");
    assert_eq!(be.get("").expect("get").as_u64(), Some(305419896));

    let mut signed = Tree::new(Field::i16_be());
    signed.parse_bytes(&[0xff, 0xfe]).expect("parse");
    assert_eq!(signed.get("").expect("get"), Value::I16(-2));
}

#[test]
fn test_struct_fields_and_offsets() {
    let mut tree = Tree::new(pair());
    tree.parse_bytes(&[0x78, 0x56, 0x34, 0x12, 0x21, 0x43, 0x65, 0x87])
        .expect("parse");
    assert_eq!(tree.get("a").expect("a"), Value::U32(0x12345678));
    assert_eq!(tree.get("b").expect("b"), Value::U32(0x87654321));
    assert_eq!(tree.offset("a").expect("offset"), 0);
    assert_eq!(tree.offset("b").expect("offset"), 4);
    assert_eq!(tree.size().expect("size"), 8);
    assert_eq!(tree.size_of("b").expect("size"), 4);
}

#[test]
fn test_nested_struct_parent_scope() {
    let grammar = Field::structure([
        ("a", Field::u32_le()),
        (
            "b",
            Field::structure([
                ("c", Field::u8()),
                ("d", Field::bytes_with(|c| c.u64("_.a"))),
            ]),
        ),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[2, 0, 0, 0, 9, 0xaa, 0xbb]).expect("parse");
    assert_eq!(tree.get("b.c").expect("c"), Value::U8(9));
    assert_eq!(tree.get("b.d").expect("d"), Value::Bytes(vec![0xaa, 0xbb]));
    assert_eq!(tree.offset("b.d").expect("offset"), 5);
    assert_eq!(tree.size().expect("size"), 7);

    let d = tree.node("b.d").expect("node");
    assert_eq!(tree.path_of(d).expect("path"), "b.d");
    let b = tree.node("b").expect("node");
    assert_eq!(tree.context(b).get("_.a").expect("scope"), Value::U32(2));
    assert_eq!(tree.context(d).get("_._.a").expect("root").as_u64(), Some(2));
}

#[test]
fn test_dynamic_array() {
    let grammar = Field::structure([
        ("n", Field::u8()),
        ("items", Field::array(Len::dynamic(|c| c.u64("n")), Field::u16_le())),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[3, 1, 0, 2, 0, 3, 0]).expect("parse");
    assert_eq!(
        tree.get("items").expect("items"),
        Value::List(vec![Value::U16(1), Value::U16(2), Value::U16(3)])
    );
    assert_eq!(tree.len("items").expect("len"), 3);
    assert_eq!(tree.offset("items.2").expect("offset"), 5);
    let items = tree.node("items").expect("node");
    assert_eq!(tree.kind(items).expect("kind"), FieldKind::Array);
    assert!(FieldKind::Array.is_array());
}

#[test]
fn test_nested_fixed_arrays() {
    let grammar = Field::array(Len::Fixed(2), Field::array(Len::Fixed(3), Field::u8()));
    let mut tree = Tree::new(grammar);
    // fixed arrays have a layout before anything is parsed
    assert_eq!(tree.size().expect("size"), 6);
    tree.parse_bytes(&[1, 2, 3, 4, 5, 6]).expect("parse");
    assert_eq!(tree.get("1.2").expect("get"), Value::U8(6));
    assert_eq!(tree.offset("1.0").expect("offset"), 3);
    assert_eq!(tree.build_bytes().expect("build"), [1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_set_and_build() {
    let grammar = Field::structure([
        ("a", Field::i16_be()),
        ("b", Field::f32_le()),
        ("c", Field::u64_le()),
    ]);
    let mut tree = Tree::new(grammar);
    tree.set("a", -2i16).expect("set a");
    tree.set("b", 1.5f32).expect("set b");
    tree.set("c", 7u8).expect("set c");
    assert_eq!(tree.get("c").expect("c"), Value::U64(7));
    let bytes = tree.build_bytes().expect("build");
    assert_eq!(bytes, [0xff, 0xfe, 0x00, 0x00, 0xc0, 0x3f, 7, 0, 0, 0, 0, 0, 0, 0]);

    let mut back = Tree::new(Field::structure([
        ("a", Field::i16_be()),
        ("b", Field::f32_le()),
        ("c", Field::u64_le()),
    ]));
    back.parse_bytes(&bytes).expect("parse");
    assert_eq!(back.get("b").expect("b"), Value::Float(1.5));
}

#[test]
fn test_set_rejects_bad_values() {
    let mut tree = Tree::new(Field::structure([("a", Field::u8()), ("s", Field::bytes(2))]));
    assert!(matches!(tree.set("a", 300u32), Err(Error::Format(_))));
    assert!(matches!(tree.set("a", "x"), Err(Error::Format(_))));
    assert!(matches!(tree.set("missing", 1u8), Err(Error::Navigation(_))));
    tree.set("s", vec![1u8, 2, 3]).expect("bytes accept any length");
    let err = tree.build_bytes().unwrap_err();
    assert!(matches!(err.root_cause(), Error::Format(_)));
    assert_eq!(err.path(), Some("s"));
}

#[test]
fn test_navigation_errors() {
    let mut tree = Tree::new(Field::structure([("n", Field::u8()), ("items", Field::array(Len::Fixed(2), Field::u8()))]));
    tree.parse_bytes(&[1, 2, 3]).expect("parse");
    assert!(matches!(tree.get("nope"), Err(Error::Navigation(_))));
    assert!(matches!(tree.get("items.5"), Err(Error::Navigation(_))));
    assert!(matches!(tree.get("_"), Err(Error::Navigation(_))));
    assert!(matches!(tree.get("n.x"), Err(Error::Navigation(_))));
}

#[test]
fn test_error_path_annotation() {
    let grammar = Field::structure([(
        "outer",
        Field::structure([(
            "middle",
            Field::array(Len::Fixed(5), Field::structure([("inner", Field::u32_le())])),
        )]),
    )]);
    let mut tree = Tree::new(grammar);
    let err = tree.parse_bytes(&[0u8; 12]).unwrap_err();
    assert_eq!(err.path(), Some("outer->middle[3]->inner"));
    assert!(matches!(err.root_cause(), Error::Stream(_)));
    assert!(err.to_string().starts_with("outer->middle[3]->inner: Stream"));
}

#[test]
fn test_constants() {
    let grammar = Field::structure([
        ("magic", Field::bytes_const(*b"OBJE")),
        ("version", Field::constant(NumberType::U16_LE, 0xCAFEu16)),
    ]);
    let mut tree = Tree::new(grammar.clone());
    tree.parse_bytes(b"OBJE\xfe\xca").expect("parse");
    assert_eq!(tree.get("version").expect("version").as_u64(), Some(0xCAFE));
    assert_eq!(tree.build_bytes().expect("build"), b"OBJE\xfe\xca");

    let err = Tree::new(grammar.clone()).parse_bytes(b"OBJE\0\0").unwrap_err();
    assert_eq!(err.path(), Some("version"));
    assert_eq!(err.root_cause().to_string(), "Format: expected 51966, got 0");

    let err = Tree::new(grammar).parse_bytes(b"TOC0\xfe\xca").unwrap_err();
    assert_eq!(err.root_cause().to_string(), "Format: expected 4F424A45, got 544F4330");
}

#[test]
fn test_enum_values() {
    let grammar = Field::structure([(
        "flag",
        Field::enumeration(NumberType::U8, [("false", 0), ("true", 1)]),
    )]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[1]).expect("parse");
    assert_eq!(tree.get("flag").expect("flag"), Value::U8(1));
    tree.set("flag", "false").expect("set by name");
    assert_eq!(tree.build_bytes().expect("build"), [0]);
    assert!(matches!(tree.set("flag", "maybe"), Err(Error::Format(_))));
}

#[test]
fn test_init_items_build_from_scratch() {
    let grammar = Field::structure([
        ("count", Field::rebuild(|c| c.len("items"), Field::u8())),
        ("items", Field::array(Len::dynamic(|c| c.parsed_u64("count")), Field::u16_be())),
    ]);
    let mut tree = Tree::new(grammar);
    tree.init_items("items", 2).expect("init");
    tree.set("items.0", 0x0102u16).expect("set");
    tree.set("items.1", 0x0304u16).expect("set");
    assert_eq!(tree.get("count").expect("count"), Value::U8(2));
    assert_eq!(tree.build_bytes().expect("build"), [2, 1, 2, 3, 4]);
}

#[test]
fn test_reparse_reuses_arena() {
    let grammar = Field::structure([
        ("n", Field::u8()),
        ("items", Field::array(Len::dynamic(|c| c.u64("n")), Field::u8())),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[4, 1, 2, 3, 4]).expect("parse");
    let live = tree.node_count();
    tree.parse_bytes(&[4, 5, 6, 7, 8]).expect("parse");
    assert_eq!(tree.node_count(), live);
    tree.parse_bytes(&[1, 9]).expect("parse");
    assert_eq!(tree.node_count(), live - 3);
}

#[test]
fn test_file_round_trip() {
    let grammar = pair();
    let mut tree = Tree::new(grammar.clone());
    tree.set("a", 0xdeadbeefu32).expect("set");
    tree.set("b", 17u32).expect("set");

    let mut file = tempfile::tempfile().expect("tempfile");
    tree.build(&mut file).expect("build");
    file.seek(SeekFrom::Start(0)).expect("rewind");

    let mut back = Tree::new(grammar);
    let value = back.parse(&mut file).expect("parse");
    assert_eq!(value.as_struct().expect("struct")["a"], Value::U32(0xdeadbeef));
    assert_eq!(back.get("b").expect("b"), Value::U32(17));
}
