//! NDF grammar tests: tagged values and a small complete file.

use bingrammar::ndf::{self, END_OF_OBJECT};
use bingrammar::{Tree, Value, XmlElement};

fn le(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn list_value() -> Vec<u8> {
    let mut bytes = le(&[0x11, 3]);
    bytes.extend_from_slice(&le(&[0x02]));
    bytes.extend_from_slice(&(-1i32).to_le_bytes());
    bytes.extend_from_slice(&le(&[0x08, 4]));
    bytes.extend_from_slice(&[b'h', 0, b'i', 0]);
    bytes.extend_from_slice(&le(&[0x00]));
    bytes.push(1);
    bytes
}

/// Header, one object with a single UInt32 property, then the table of contents.
fn small_file() -> Vec<u8> {
    let mut bytes = b"EUG0\0\0\0\0CNDF".to_vec();
    bytes.extend_from_slice(&le(&[0, 64, 0, 44, 0, 96, 0, 96]));
    assert_eq!(bytes.len(), 44);
    bytes.extend_from_slice(&le(&[7, 1, 3, 5, END_OF_OBJECT]));
    bytes.extend_from_slice(b"TOC0");
    bytes.extend_from_slice(&le(&[9]));
    bytes.extend_from_slice(b"OBJE");
    bytes.extend_from_slice(&le(&[0, 44, 0, 20, 0]));
    bytes
}

#[test]
fn test_list_value() {
    let bytes = list_value();
    let mut tree = Tree::new(ndf::value_grammar());
    tree.parse_bytes(&bytes).expect("parse");
    assert_eq!(tree.get("typeId").expect("type"), Value::U32(0x11));
    assert_eq!(tree.len("data.items").expect("len"), 3);
    assert_eq!(tree.get("data.items.0.data.value").expect("int"), Value::I32(-1));
    assert_eq!(tree.get("data.items.1.data.str").expect("str"), Value::from("hi"));
    assert_eq!(tree.get("data.items.2.data.value").expect("bool"), Value::U8(1));
    assert_eq!(tree.build_bytes().expect("build"), bytes);
}

#[test]
fn test_value_through_xml() {
    let bytes = list_value();
    let mut tree = Tree::new(ndf::value_grammar());
    tree.parse_bytes(&bytes).expect("parse");
    let text = tree.build_xml(ndf::NDF_TYPE).expect("export").to_xml_string().expect("write");
    assert!(text.contains(r#"<WideString str="hi"/>"#));
    assert!(text.contains(r#"<Boolean value="true"/>"#));

    let mut back = Tree::new(ndf::value_grammar());
    back.parse_xml(&XmlElement::parse(&text).expect("read")).expect("import");
    assert_eq!(back.build_bytes().expect("build"), bytes);
}

#[test]
fn test_edited_list_rebuilds_length() {
    let doc = r#"<NDFType><List><items><UInt32 value="10"/></items></List></NDFType>"#;
    let mut tree = Tree::new(ndf::value_grammar());
    tree.parse_xml(&XmlElement::parse(doc).expect("xml")).expect("import");
    assert_eq!(tree.build_bytes().expect("build"), le(&[0x11, 1, 0x03, 10]));
}

#[test]
fn test_file_layout() {
    let bytes = small_file();
    let mut tree = Tree::new(ndf::file_grammar());
    tree.parse_bytes(&bytes).expect("parse");
    assert_eq!(tree.len("toc0header.OBJE.objects").expect("objects"), 1);
    assert_eq!(tree.len("toc0header.OBJE.objects.0.properties").expect("properties"), 2);
    assert_eq!(
        tree.get("toc0header.OBJE.objects.0.properties.0.value.data.value").expect("value"),
        Value::U32(5)
    );
    assert!(tree
        .get("toc0header.OBJE.objects.0.properties.1.value")
        .expect("terminator")
        .is_none());
    assert_eq!(tree.ptr_offset("toc0header").expect("toc"), 64);
    assert_eq!(tree.get("headerSize").expect("header"), Value::U32(44));
    assert_eq!(tree.build_bytes().expect("build"), bytes);
}

#[test]
fn test_file_through_xml() {
    let bytes = small_file();
    let mut tree = Tree::new(ndf::file_grammar());
    tree.parse_bytes(&bytes).expect("parse");
    let root = tree.build_xml("NdfBin").expect("export");
    assert_eq!(root.attribute("size"), Some("96"));
    assert_eq!(root.attribute("toc0offset"), None);

    let mut back = Tree::new(ndf::file_grammar());
    back.parse_xml(&root).expect("import");
    assert_eq!(back.get("toc0offset").expect("offset"), Value::U32(64));
    assert_eq!(back.build_bytes().expect("build"), bytes);
}

#[test]
fn test_object_area_must_be_filled() {
    let mut bytes = small_file();
    // the object runs past a 16 byte area
    bytes[88] = 16;
    let err = Tree::new(ndf::file_grammar()).parse_bytes(&bytes).unwrap_err();
    assert_eq!(err.path(), Some("toc0header->OBJE->objects"));
}

#[test]
fn test_stored_header_size_of_forty() {
    let mut bytes = small_file();
    bytes[24] = 40;
    let mut tree = Tree::new(ndf::file_grammar());
    tree.parse_bytes(&bytes).expect("parse");
    assert_eq!(tree.get_parsed("headerSize").expect("stored"), Value::U32(40));
    assert_eq!(tree.build_bytes().expect("build"), small_file());
}
