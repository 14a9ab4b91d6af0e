//! Conditional and switch dispatch tests.

use bingrammar::{Case, Encoding, Error, Field, Tree, Value};

fn tagged() -> Field {
    Field::structure([
        ("kind", Field::rebuild(|c| c.discriminant("payload"), Field::u8())),
        (
            "payload",
            Field::switch(
                |c| c.get_parsed("kind"),
                [
                    Case::new(1u8, "A", Field::u8()),
                    Case::new(2u8, "B", Field::u16_le()),
                    Case::new(
                        3u8,
                        "C",
                        Field::structure([("x", Field::u8()), ("y", Field::u8())]),
                    ),
                ],
            ),
        ),
    ])
}

#[test]
fn test_if_then_else_branches() {
    let grammar = Field::structure([
        ("flag", Field::u8()),
        (
            "body",
            Field::if_then_else(
                |c| Ok(c.u64("flag")? == 1),
                ("num", Field::u32_le()),
                ("text", Field::cstring(Encoding::UTF8)),
            ),
        ),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[1, 5, 0, 0, 0]).expect("parse then");
    assert_eq!(tree.get("body").expect("body"), Value::U32(5));
    assert_eq!(tree.size().expect("size"), 5);

    tree.parse_bytes(&[0, b'h', b'i', 0]).expect("parse else");
    assert_eq!(tree.get("body").expect("body"), Value::from("hi"));
    assert_eq!(tree.size().expect("size"), 4);
}

#[test]
fn test_if_without_else() {
    let grammar = Field::structure([
        ("flag", Field::u8()),
        ("extra", Field::if_then(|c| Ok(c.u64("flag")? == 1), "extra", Field::u16_le())),
        ("tail", Field::u8()),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[0, 9]).expect("parse");
    assert!(tree.get("extra").expect("extra").is_none());
    assert_eq!(tree.offset("tail").expect("offset"), 1);

    tree.parse_bytes(&[1, 2, 0, 9]).expect("parse");
    assert_eq!(tree.get("extra").expect("extra"), Value::U16(2));
    assert_eq!(tree.offset("tail").expect("offset"), 3);
    assert_eq!(tree.get("tail").expect("tail"), Value::U8(9));
}

#[test]
fn test_condition_follows_edits() {
    let grammar = Field::structure([
        ("flag", Field::u8()),
        ("extra", Field::if_then(|c| Ok(c.u64("flag")? == 1), "extra", Field::u16_le())),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[0]).expect("parse");
    tree.set("flag", 1u8).expect("set");
    tree.set("extra", 0x0304u16).expect("set");
    assert_eq!(tree.build_bytes().expect("build"), [1, 4, 3]);
}

#[test]
fn test_switch_selects_registered_branch() {
    let mut tree = Tree::new(tagged());
    tree.parse_bytes(&[1, 7]).expect("parse A");
    assert_eq!(tree.get("payload").expect("payload"), Value::U8(7));

    tree.parse_bytes(&[2, 1, 1]).expect("parse B");
    assert_eq!(tree.get("payload").expect("payload"), Value::U16(257));
    assert_eq!(tree.size().expect("size"), 3);

    tree.parse_bytes(&[3, 4, 5]).expect("parse C");
    assert_eq!(tree.get("payload.y").expect("y"), Value::U8(5));
    assert_eq!(tree.offset("payload.y").expect("offset"), 2);
    assert_eq!(tree.context(tree.root()).discriminant("payload").expect("disc"), Value::U8(3));
    assert_eq!(tree.build_bytes().expect("build"), [3, 4, 5]);
}

#[test]
fn test_switch_branch_replaced_on_reparse() {
    let mut tree = Tree::new(tagged());
    tree.parse_bytes(&[3, 4, 5]).expect("parse C");
    let with_struct = tree.node_count();
    tree.parse_bytes(&[1, 7]).expect("parse A");
    assert_eq!(tree.node_count(), with_struct - 2);
    assert!(matches!(tree.get("payload.y"), Err(Error::Navigation(_))));
}

#[test]
fn test_unregistered_discriminant() {
    let mut tree = Tree::new(tagged());
    let err = tree.parse_bytes(&[9, 0]).unwrap_err();
    assert_eq!(err.path(), Some("payload"));
    assert_eq!(
        err.root_cause().to_string(),
        "Format: unregistered switch discriminant 9"
    );
}

#[test]
fn test_select_then_build() {
    let mut tree = Tree::new(tagged());
    tree.select("payload", 2u8).expect("select");
    tree.set("payload", 0x0102u16).expect("set");
    assert_eq!(tree.get("kind").expect("kind"), Value::U8(2));
    assert_eq!(tree.build_bytes().expect("build"), [2, 2, 1]);
    assert!(matches!(tree.select("payload", 4u8), Err(Error::Format(_))));
}

#[test]
fn test_switch_on_parent_field() {
    let grammar = Field::structure([
        ("version", Field::u8()),
        (
            "body",
            Field::structure([(
                "value",
                Field::switch(
                    |c| c.get("_.version"),
                    [Case::new(1u8, "v1", Field::u8()), Case::new(2u8, "v2", Field::u32_be())],
                ),
            )]),
        ),
    ]);
    let mut tree = Tree::new(grammar);
    tree.parse_bytes(&[2, 0, 0, 1, 0]).expect("parse");
    assert_eq!(tree.get("body.value").expect("value"), Value::U32(256));
}
