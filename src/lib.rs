//! # bingrammar: declarative binary grammars
//!
//! Describe a binary layout once as a tree of [`Field`]s, instantiate it into a
//! [`Tree`], and use the same tree to parse a byte stream, inspect and edit the
//! decoded values, build the bytes back, and convert to and from XML.
//!
//! ## Building blocks
//!
//! - Numbers of every width in either byte order, constants, raw and magic bytes, enums
//! - C, padded, and length-prefixed strings in UTF-8, UTF-16, or UTF-32
//! - Structs, counted arrays, and predicate-terminated repetitions
//! - Conditionals and discriminant switches
//! - Pointers and areas at computed absolute offsets, alignment padding
//! - Lazily bound templates for recursive layouts, and rebuild fields whose
//!   value is recomputed from the rest of the tree at build time
//!
//! Lengths, counts, offsets, and predicates are closures over a [`Context`]
//! positioned at the enclosing struct, so fields can refer to each other by path.
//!
//! ## Example
//!
//! ```
//! use bingrammar::{Field, Len, Tree};
//!
//! let record = Field::structure([
//!     ("count", Field::rebuild(|c| c.len("items"), Field::u16_le())),
//!     ("items", Field::array(Len::dynamic(|c| c.parsed_u64("count")), Field::u8())),
//! ]);
//! let mut tree = Tree::new(record);
//! tree.parse_bytes(&[2, 0, 7, 9]).unwrap();
//! assert_eq!(tree.get("items.1").unwrap().as_u64(), Some(9));
//! assert_eq!(tree.build_bytes().unwrap(), [2, 0, 7, 9]);
//! ```
//!
//! See `tests/` for conditionals, pointers, recursion, and the XML projection.

pub mod codec;
pub mod error;
pub mod field;
pub mod ndf;
pub mod observe;
pub mod projection;
pub mod text;
pub mod tree;
pub mod value;
pub mod xml;

pub use codec::SeekGuard;
pub use error::{Error, Result};
pub use field::{Case, Endianness, Field, Grammar, Len, NumKind, NumberType};
pub use observe::{Event, NoopObserver, Observer, Phase, Recorder, TracingObserver};
pub use text::{CharWidth, Encoding};
pub use tree::{Context, FieldKind, Key, NodeId, Tree};
pub use value::Value;
pub use xml::XmlElement;
