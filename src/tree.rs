//! Instantiated grammar: an arena of nodes addressed by [`NodeId`].
//!
//! Every node records its key within its parent and the parent's id, both set
//! once when the node is created. Offsets and sizes are never stored. They are
//! recomputed from the current content by summing sibling sizes up to the root,
//! so editing a string before `build` shifts everything after it.
//!
//! ## Paths
//!
//! Navigation takes dotted paths relative to a node: `"header.count"`,
//! `"items.3.name"`, `"_.size"`. A segment of decimal digits indexes a
//! sequence; `_` steps to the enclosing struct. Wrappers (pointers, rebuilds,
//! alignment, lazy references, conditionals, and switches) are transparent, so
//! `"c.c.a"` reaches through an `IfThenElse` holding a `Lazy` struct.

use crate::error::{Error, Result};
use crate::field::{Case, Field, Grammar, Len, NumberType, PredicateFn, SizeFn, UntilFn, ValueFn};
use crate::text::{self, Encoding};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Stable handle to a node. A handle to a discarded node is stale and may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A node's key within its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Root,
    Name(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Root => f.write_str("<root>"),
            Key::Name(name) => f.write_str(name),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

/// The tag of a node, for callers that need to interpret a child generically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Const,
    BytesConst,
    Bytes,
    Enum,
    CString,
    PaddedString,
    PascalString,
    Struct,
    Array,
    RepeatUntil,
    IfThenElse,
    Switch,
    Pointer,
    Area,
    Lazy,
    Rebuild,
    Aligned,
}

impl FieldKind {
    pub fn is_struct(self) -> bool {
        self == FieldKind::Struct
    }

    pub fn is_array(self) -> bool {
        matches!(self, FieldKind::Array | FieldKind::RepeatUntil | FieldKind::Area)
    }

    /// Leaves: numbers, byte blobs, constants, and strings.
    pub fn is_simple_type(self) -> bool {
        matches!(
            self,
            FieldKind::Number
                | FieldKind::Const
                | FieldKind::BytesConst
                | FieldKind::Bytes
                | FieldKind::Enum
                | FieldKind::CString
                | FieldKind::PaddedString
                | FieldKind::PascalString
        )
    }

    pub fn is_pointer_type(self) -> bool {
        matches!(self, FieldKind::Pointer | FieldKind::Area)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) struct Node {
    pub(crate) key: Key,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: Kind,
}

/// Runtime state of a node; mirrors [`Field`] plus decoded content.
pub(crate) enum Kind {
    Number {
        ty: NumberType,
        value: Value,
    },
    Const {
        ty: NumberType,
        expected: Value,
    },
    BytesConst {
        expected: Vec<u8>,
    },
    Bytes {
        len: Len,
        value: Vec<u8>,
    },
    Enum {
        ty: NumberType,
        variants: Rc<Vec<(String, i128)>>,
        value: Value,
    },
    CString {
        encoding: Encoding,
        value: String,
    },
    PaddedString {
        encoding: Encoding,
        len: Len,
        value: String,
    },
    PascalString {
        encoding: Encoding,
        length: NumberType,
        value: String,
    },
    Struct {
        fields: IndexMap<String, NodeId>,
    },
    Array {
        count: Len,
        element: Rc<Field>,
        items: Vec<NodeId>,
    },
    RepeatUntil {
        until: UntilFn,
        budget: Option<SizeFn>,
        element: Rc<Field>,
        items: Vec<NodeId>,
    },
    IfThenElse {
        condition: PredicateFn,
        then: Option<(String, NodeId)>,
        otherwise: Option<(String, NodeId)>,
    },
    Switch {
        discriminant: ValueFn,
        cases: Rc<Vec<Case>>,
        selected: Option<(usize, NodeId)>,
    },
    Pointer {
        offset: SizeFn,
        target: NodeId,
    },
    Area {
        offset: SizeFn,
        size: SizeFn,
        element: Rc<Field>,
        items: Vec<NodeId>,
    },
    Lazy {
        template: String,
        child: Option<NodeId>,
    },
    Rebuild {
        compute: ValueFn,
        child: NodeId,
    },
    Aligned {
        alignment: Len,
        child: NodeId,
    },
}

impl Kind {
    pub(crate) fn tag(&self) -> FieldKind {
        match self {
            Kind::Number { .. } => FieldKind::Number,
            Kind::Const { .. } => FieldKind::Const,
            Kind::BytesConst { .. } => FieldKind::BytesConst,
            Kind::Bytes { .. } => FieldKind::Bytes,
            Kind::Enum { .. } => FieldKind::Enum,
            Kind::CString { .. } => FieldKind::CString,
            Kind::PaddedString { .. } => FieldKind::PaddedString,
            Kind::PascalString { .. } => FieldKind::PascalString,
            Kind::Struct { .. } => FieldKind::Struct,
            Kind::Array { .. } => FieldKind::Array,
            Kind::RepeatUntil { .. } => FieldKind::RepeatUntil,
            Kind::IfThenElse { .. } => FieldKind::IfThenElse,
            Kind::Switch { .. } => FieldKind::Switch,
            Kind::Pointer { .. } => FieldKind::Pointer,
            Kind::Area { .. } => FieldKind::Area,
            Kind::Lazy { .. } => FieldKind::Lazy,
            Kind::Rebuild { .. } => FieldKind::Rebuild,
            Kind::Aligned { .. } => FieldKind::Aligned,
        }
    }

    /// Wrappers whose children share their key.
    fn is_wrapper(&self) -> bool {
        matches!(
            self,
            Kind::Pointer { .. } | Kind::Lazy { .. } | Kind::Rebuild { .. } | Kind::Aligned { .. }
        )
    }

    pub(crate) fn items(&self) -> Option<&Vec<NodeId>> {
        match self {
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } | Kind::Area { items, .. } => Some(items),
            _ => None,
        }
    }

    pub(crate) fn items_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } | Kind::Area { items, .. } => Some(items),
            _ => None,
        }
    }

    pub(crate) fn element(&self) -> Option<&Rc<Field>> {
        match self {
            Kind::Array { element, .. } | Kind::RepeatUntil { element, .. } | Kind::Area { element, .. } => {
                Some(element)
            }
            _ => None,
        }
    }
}

/// Read-only view of a tree positioned at one node, handed to every grammar closure.
///
/// All paths resolve relative to that node; see the module docs for path syntax.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    tree: &'a Tree,
    node: NodeId,
}

impl<'a> Context<'a> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    /// A context positioned at `path`.
    pub fn field(&self, path: &str) -> Result<Context<'a>> {
        Ok(Context {
            tree: self.tree,
            node: self.tree.resolve(self.node, path)?,
        })
    }

    /// The enclosing struct (`"_"`).
    pub fn parent(&self) -> Result<Context<'a>> {
        self.field("_")
    }

    /// Current value at `path`, with rebuilds recomputed.
    pub fn get(&self, path: &str) -> Result<Value> {
        self.tree.value_of(self.tree.resolve(self.node, path)?, false)
    }

    /// Value at `path` as last parsed or assigned, ignoring rebuild functions.
    pub fn get_parsed(&self, path: &str) -> Result<Value> {
        self.tree.value_of(self.tree.resolve(self.node, path)?, true)
    }

    /// Value of this node itself.
    pub fn value(&self) -> Result<Value> {
        self.tree.value_of(self.node, false)
    }

    pub fn u64(&self, path: &str) -> Result<u64> {
        let v = self.get(path)?;
        v.as_u64()
            .ok_or_else(|| Error::Format(format!("'{path}' holds {v}, expected an unsigned integer")))
    }

    pub fn i64(&self, path: &str) -> Result<i64> {
        let v = self.get(path)?;
        v.as_i64()
            .ok_or_else(|| Error::Format(format!("'{path}' holds {v}, expected an integer")))
    }

    pub fn parsed_u64(&self, path: &str) -> Result<u64> {
        let v = self.get_parsed(path)?;
        v.as_u64()
            .ok_or_else(|| Error::Format(format!("'{path}' holds {v}, expected an unsigned integer")))
    }

    /// Absolute byte offset of `path` in the encoded stream.
    pub fn offset(&self, path: &str) -> Result<u64> {
        self.tree.offset_of(self.tree.resolve(self.node, path)?)
    }

    /// Encoded size of `path` from its current content.
    pub fn size(&self, path: &str) -> Result<u64> {
        self.tree.size_of_node(self.tree.resolve(self.node, path)?)
    }

    /// Number of items in the sequence at `path`.
    pub fn len(&self, path: &str) -> Result<usize> {
        self.tree.len_of(self.tree.resolve(self.node, path)?)
    }

    pub fn ptr_offset(&self, path: &str) -> Result<u64> {
        self.tree.ptr_offset_of(self.tree.resolve(self.node, path)?)
    }

    pub fn ptr_size(&self, path: &str) -> Result<u64> {
        self.tree.ptr_size_of(self.tree.resolve(self.node, path)?)
    }

    /// Discriminant of the branch currently selected by the switch at `path`.
    pub fn discriminant(&self, path: &str) -> Result<Value> {
        self.tree.discriminant_of(self.tree.resolve(self.node, path)?)
    }
}

/// A grammar instantiated into nodes, ready to parse, build, or project.
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
    templates: HashMap<String, Rc<Field>>,
}

impl Tree {
    pub fn new(grammar: impl Into<Grammar>) -> Tree {
        let grammar = grammar.into();
        let mut tree = Tree {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            templates: grammar.templates,
        };
        tree.root = tree.instantiate(&grammar.root, None, Key::Root);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    // ---------------------------------------------------------------------
    // Path-based accessors from the root.

    pub fn node(&self, path: &str) -> Result<NodeId> {
        self.resolve(self.root, path)
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        self.value_of(self.node(path)?, false)
    }

    pub fn get_parsed(&self, path: &str) -> Result<Value> {
        self.value_of(self.node(path)?, true)
    }

    /// Assign a value, converting numbers to the field's declared width.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let id = self.node(path)?;
        self.assign(id, value.into())
    }

    /// Encoded size of the whole tree.
    pub fn size(&self) -> Result<u64> {
        self.size_of_node(self.root)
    }

    pub fn size_of(&self, path: &str) -> Result<u64> {
        self.size_of_node(self.node(path)?)
    }

    pub fn offset(&self, path: &str) -> Result<u64> {
        self.offset_of(self.node(path)?)
    }

    pub fn len(&self, path: &str) -> Result<usize> {
        self.len_of(self.node(path)?)
    }

    pub fn ptr_offset(&self, path: &str) -> Result<u64> {
        self.ptr_offset_of(self.node(path)?)
    }

    pub fn ptr_size(&self, path: &str) -> Result<u64> {
        self.ptr_size_of(self.node(path)?)
    }

    /// Replace the items of a sequence with `n` default elements.
    pub fn init_items(&mut self, path: &str, n: usize) -> Result<()> {
        let id = self.node(path)?;
        self.init_items_at(id, n).map(|_| ())
    }

    /// Instantiate the switch branch registered for `discriminant`, without parsing.
    pub fn select(&mut self, path: &str, discriminant: impl Into<Value>) -> Result<()> {
        let id = self.node(path)?;
        let discriminant = discriminant.into();
        let case = self.find_case(id, &discriminant)?;
        self.select_case(id, case).map(|_| ())
    }

    /// A context positioned at `id`.
    pub fn context(&self, id: NodeId) -> Context<'_> {
        Context { tree: self, node: id }
    }

    pub fn kind(&self, id: NodeId) -> Result<FieldKind> {
        Ok(self.slot(id)?.kind.tag())
    }

    pub fn key(&self, id: NodeId) -> Result<&Key> {
        Ok(&self.slot(id)?.key)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.slot(id)?.parent)
    }

    /// Dotted path from the root that resolves back to `id`.
    pub fn path_of(&self, id: NodeId) -> Result<String> {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(parent) = self.slot(current)?.parent {
            let parent_kind = &self.slot(parent)?.kind;
            let transparent = parent_kind.is_wrapper()
                || matches!(parent_kind, Kind::IfThenElse { .. } | Kind::Switch { .. });
            if !transparent {
                segments.push(self.slot(current)?.key.to_string());
            }
            current = parent;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    // ---------------------------------------------------------------------
    // Arena management.

    pub(crate) fn slot(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Navigation(format!("stale node id {}", id.0)))
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Navigation(format!("stale node id {}", id.0)))
    }

    fn reserve(&mut self) -> NodeId {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.nodes.push(None);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Create the node for `field` under `parent`. Fixed-count arrays get default
    /// elements; dynamic sequences, switches, and lazy references start empty.
    pub(crate) fn instantiate(&mut self, field: &Field, parent: Option<NodeId>, key: Key) -> NodeId {
        let id = self.reserve();
        let kind = match field {
            Field::Number(ty) => Kind::Number {
                ty: *ty,
                value: Value::zero(ty.kind),
            },
            Field::Const { ty, value } => Kind::Const {
                ty: *ty,
                expected: value.clone(),
            },
            Field::BytesConst(expected) => Kind::BytesConst {
                expected: expected.clone(),
            },
            Field::Bytes(len) => Kind::Bytes {
                value: match len {
                    Len::Fixed(n) => vec![0; *n as usize],
                    Len::Dynamic(_) => Vec::new(),
                },
                len: len.clone(),
            },
            Field::Enum { ty, variants } => Kind::Enum {
                ty: *ty,
                variants: variants.clone(),
                value: Value::zero(ty.kind),
            },
            Field::CString(encoding) => Kind::CString {
                encoding: *encoding,
                value: String::new(),
            },
            Field::PaddedString { encoding, len } => Kind::PaddedString {
                encoding: *encoding,
                len: len.clone(),
                value: String::new(),
            },
            Field::PascalString { encoding, length } => Kind::PascalString {
                encoding: *encoding,
                length: *length,
                value: String::new(),
            },
            Field::Struct(fields) => {
                let mut map = IndexMap::with_capacity(fields.len());
                for (name, child) in fields {
                    let child_id = self.instantiate(child, Some(id), Key::Name(name.clone()));
                    map.insert(name.clone(), child_id);
                }
                Kind::Struct { fields: map }
            }
            Field::Array { count, element } => {
                let items = match count {
                    Len::Fixed(n) => (0..*n as usize)
                        .map(|i| self.instantiate(element, Some(id), Key::Index(i)))
                        .collect(),
                    Len::Dynamic(_) => Vec::new(),
                };
                Kind::Array {
                    count: count.clone(),
                    element: element.clone(),
                    items,
                }
            }
            Field::RepeatUntil { until, element, budget } => Kind::RepeatUntil {
                until: until.clone(),
                budget: budget.clone(),
                element: element.clone(),
                items: Vec::new(),
            },
            Field::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                let then = then
                    .as_ref()
                    .map(|(name, f)| (name.clone(), self.instantiate(f, Some(id), Key::Name(name.clone()))));
                let otherwise = otherwise
                    .as_ref()
                    .map(|(name, f)| (name.clone(), self.instantiate(f, Some(id), Key::Name(name.clone()))));
                Kind::IfThenElse {
                    condition: condition.clone(),
                    then,
                    otherwise,
                }
            }
            Field::Switch { discriminant, cases } => Kind::Switch {
                discriminant: discriminant.clone(),
                cases: cases.clone(),
                selected: None,
            },
            Field::Pointer { offset, target } => Kind::Pointer {
                offset: offset.clone(),
                target: self.instantiate(target, Some(id), key.clone()),
            },
            Field::Area { offset, size, element } => Kind::Area {
                offset: offset.clone(),
                size: size.clone(),
                element: element.clone(),
                items: Vec::new(),
            },
            Field::Lazy(template) => Kind::Lazy {
                template: template.clone(),
                child: None,
            },
            Field::Rebuild { compute, child } => Kind::Rebuild {
                compute: compute.clone(),
                child: self.instantiate(child, Some(id), key.clone()),
            },
            Field::Aligned { alignment, child } => Kind::Aligned {
                alignment: alignment.clone(),
                child: self.instantiate(child, Some(id), key.clone()),
            },
        };
        self.nodes[id.0] = Some(Node { key, parent, kind });
        id
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        let Ok(node) = self.slot(id) else {
            return Vec::new();
        };
        match &node.kind {
            Kind::Struct { fields } => fields.values().copied().collect(),
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } | Kind::Area { items, .. } => items.clone(),
            Kind::IfThenElse { then, otherwise, .. } => {
                then.iter().chain(otherwise.iter()).map(|(_, c)| *c).collect()
            }
            Kind::Switch { selected, .. } => selected.iter().map(|(_, c)| *c).collect(),
            Kind::Lazy { child, .. } => child.iter().copied().collect(),
            Kind::Pointer { target: child, .. } | Kind::Rebuild { child, .. } | Kind::Aligned { child, .. } => {
                vec![*child]
            }
            _ => Vec::new(),
        }
    }

    /// Free `id` and its whole subtree.
    pub(crate) fn discard(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            pending.extend(self.children(next));
            if let Some(slot) = self.nodes.get_mut(next.0) {
                if slot.take().is_some() {
                    self.free.push(next);
                }
            }
        }
    }

    /// Drop every item of a sequence.
    pub(crate) fn clear_items(&mut self, id: NodeId) -> Result<()> {
        let old = match self.slot_mut(id)?.kind.items_mut() {
            Some(items) => std::mem::take(items),
            None => return Err(self.not_a(id, "sequence")),
        };
        for item in old {
            self.discard(item);
        }
        Ok(())
    }

    /// Append one default element to a sequence and return it.
    pub(crate) fn push_item(&mut self, id: NodeId) -> Result<NodeId> {
        let node = self.slot(id)?;
        let (element, index) = match (node.kind.element(), node.kind.items()) {
            (Some(element), Some(items)) => (element.clone(), items.len()),
            _ => return Err(self.not_a(id, "sequence")),
        };
        let item = self.instantiate(&element, Some(id), Key::Index(index));
        if let Some(items) = self.slot_mut(id)?.kind.items_mut() {
            items.push(item);
        }
        Ok(item)
    }

    pub(crate) fn init_items_at(&mut self, id: NodeId, n: usize) -> Result<Vec<NodeId>> {
        self.clear_items(id)?;
        (0..n).map(|_| self.push_item(id)).collect()
    }

    pub(crate) fn find_case(&self, id: NodeId, discriminant: &Value) -> Result<usize> {
        match &self.slot(id)?.kind {
            Kind::Switch { cases, .. } => cases
                .iter()
                .position(|c| c.value.same_as(discriminant))
                .ok_or_else(|| Error::Format(format!("unregistered switch discriminant {discriminant}"))),
            _ => Err(self.not_a(id, "switch")),
        }
    }

    /// Instantiate case `index` of a switch, discarding any previous branch.
    pub(crate) fn select_case(&mut self, id: NodeId, index: usize) -> Result<NodeId> {
        let (case, previous) = match &self.slot(id)?.kind {
            Kind::Switch { cases, selected, .. } => match cases.get(index) {
                Some(case) => (case.clone(), *selected),
                None => return Err(Error::Navigation(format!("switch has no case {index}"))),
            },
            _ => return Err(self.not_a(id, "switch")),
        };
        if let Some((_, old)) = previous {
            self.discard(old);
        }
        let branch = self.instantiate(&case.field, Some(id), Key::Name(case.name));
        if let Kind::Switch { selected, .. } = &mut self.slot_mut(id)?.kind {
            *selected = Some((index, branch));
        }
        Ok(branch)
    }

    /// Replace a lazy node's child with a fresh instance of its template.
    pub(crate) fn refresh_lazy(&mut self, id: NodeId) -> Result<NodeId> {
        let node = self.slot(id)?;
        let (template, previous, key) = match &node.kind {
            Kind::Lazy { template, child } => (template.clone(), *child, node.key.clone()),
            _ => return Err(self.not_a(id, "lazy reference")),
        };
        let field = self
            .templates
            .get(&template)
            .cloned()
            .ok_or_else(|| Error::Navigation(format!("unknown template '{template}'")))?;
        if let Some(old) = previous {
            self.discard(old);
        }
        let child = self.instantiate(&field, Some(id), key);
        if let Kind::Lazy { child: slot, .. } = &mut self.slot_mut(id)?.kind {
            *slot = Some(child);
        }
        Ok(child)
    }

    /// The lazy node's child, instantiating the template if it has none yet.
    pub(crate) fn ensure_lazy(&mut self, id: NodeId) -> Result<NodeId> {
        match &self.slot(id)?.kind {
            Kind::Lazy { child: Some(child), .. } => Ok(*child),
            _ => self.refresh_lazy(id),
        }
    }

    fn not_a(&self, id: NodeId, what: &str) -> Error {
        let path = self.path_of(id).unwrap_or_default();
        let kind = self.kind(id).map(|k| k.to_string()).unwrap_or_default();
        Error::Navigation(format!("'{path}' is a {kind}, not a {what}"))
    }

    // ---------------------------------------------------------------------
    // Scope and navigation.

    /// The struct a closure attached to `id` is evaluated against.
    pub(crate) fn scope_of(&self, id: NodeId) -> NodeId {
        self.struct_above(id).unwrap_or(self.root)
    }

    /// A context positioned at the scope of `id`.
    pub(crate) fn scope_context(&self, id: NodeId) -> Context<'_> {
        self.context(self.scope_of(id))
    }

    fn struct_above(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.slot(id).ok()?.parent;
        while let Some(p) = current {
            let node = self.slot(p).ok()?;
            if matches!(node.kind, Kind::Struct { .. }) {
                return Some(p);
            }
            current = node.parent;
        }
        None
    }

    pub(crate) fn resolve(&self, from: NodeId, path: &str) -> Result<NodeId> {
        let mut current = from;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = if segment == "_" {
                self.struct_above(current)
                    .ok_or_else(|| Error::Navigation(format!("'_' in '{path}' walks past the root")))?
            } else if let Ok(index) = segment.parse::<usize>() {
                let container = self.descend(current)?;
                let items = self.slot(container)?.kind.items().ok_or_else(|| self.not_a(container, "sequence"))?;
                *items
                    .get(index)
                    .ok_or_else(|| Error::Navigation(format!("index {index} out of range in '{path}'")))?
            } else {
                let container = self.descend(current)?;
                match &self.slot(container)?.kind {
                    Kind::Struct { fields } => *fields
                        .get(segment)
                        .ok_or_else(|| Error::Navigation(format!("no field '{segment}' in '{path}'")))?,
                    _ => return Err(self.not_a(container, "struct")),
                }
            };
        }
        Ok(current)
    }

    /// Follow transparent wrappers down to the node that holds content.
    pub(crate) fn descend(&self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        loop {
            current = match &self.slot(current)?.kind {
                Kind::Rebuild { child, .. } | Kind::Aligned { child, .. } => *child,
                Kind::Pointer { target, .. } => *target,
                Kind::Lazy { child: Some(child), .. } => *child,
                Kind::Lazy { template, child: None } => {
                    return Err(Error::Navigation(format!("lazy '{template}' has not been instantiated")))
                }
                Kind::IfThenElse { .. } => self
                    .active_branch(current)?
                    .ok_or_else(|| Error::Navigation("conditional has no active branch".into()))?,
                Kind::Switch { selected, .. } => selected
                    .map(|(_, child)| child)
                    .ok_or_else(|| Error::Navigation("switch has no selected branch".into()))?,
                _ => return Ok(current),
            };
        }
    }

    /// The branch an `IfThenElse` currently stands for, by evaluating its condition.
    pub(crate) fn active_branch(&self, id: NodeId) -> Result<Option<NodeId>> {
        match &self.slot(id)?.kind {
            Kind::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                let branch = if condition(&self.scope_context(id))? { then } else { otherwise };
                Ok(branch.as_ref().map(|(_, child)| *child))
            }
            _ => Err(self.not_a(id, "conditional")),
        }
    }

    pub(crate) fn eval_len(&self, id: NodeId, len: &Len) -> Result<u64> {
        match len {
            Len::Fixed(n) => Ok(*n),
            Len::Dynamic(f) => f(&self.scope_context(id)),
        }
    }

    // ---------------------------------------------------------------------
    // Values.

    pub(crate) fn value_of(&self, id: NodeId, parsed: bool) -> Result<Value> {
        let node = self.slot(id)?;
        Ok(match &node.kind {
            Kind::Number { value, .. } | Kind::Enum { value, .. } => value.clone(),
            Kind::Const { expected, .. } => expected.clone(),
            Kind::BytesConst { expected } => Value::Bytes(expected.clone()),
            Kind::Bytes { value, .. } => Value::Bytes(value.clone()),
            Kind::CString { value, .. } | Kind::PaddedString { value, .. } | Kind::PascalString { value, .. } => {
                Value::String(value.clone())
            }
            Kind::Struct { fields } => {
                let mut record = IndexMap::with_capacity(fields.len());
                for (name, child) in fields {
                    record.insert(name.clone(), self.value_of(*child, parsed)?);
                }
                Value::Struct(record)
            }
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } | Kind::Area { items, .. } => {
                Value::List(items.iter().map(|c| self.value_of(*c, parsed)).collect::<Result<_>>()?)
            }
            Kind::IfThenElse { .. } => match self.active_branch(id)? {
                Some(child) => self.value_of(child, parsed)?,
                None => Value::None,
            },
            Kind::Switch { selected, .. } => match selected {
                Some((_, child)) => self.value_of(*child, parsed)?,
                None => Value::None,
            },
            Kind::Lazy { child, .. } => match child {
                Some(child) => self.value_of(*child, parsed)?,
                None => Value::None,
            },
            Kind::Pointer { target: child, .. } | Kind::Aligned { child, .. } => self.value_of(*child, parsed)?,
            Kind::Rebuild { compute, child } => {
                if parsed {
                    self.value_of(*child, parsed)?
                } else {
                    let value = compute(&self.scope_context(id))?;
                    self.conform(*child, value)?
                }
            }
        })
    }

    /// Convert a computed value to the numeric width of the node it will be stored in.
    fn conform(&self, id: NodeId, value: Value) -> Result<Value> {
        match &self.slot(self.descend(id)?)?.kind {
            Kind::Number { ty, .. } | Kind::Enum { ty, .. } | Kind::Const { ty, .. } => value.coerce(ty.kind),
            _ => Ok(value),
        }
    }

    pub(crate) fn assign(&mut self, id: NodeId, value: Value) -> Result<()> {
        match &self.slot(id)?.kind {
            Kind::Struct { fields } => {
                let Value::Struct(record) = value else {
                    return Err(self.mismatch(id, &value));
                };
                let mut targets = Vec::with_capacity(record.len());
                for (name, v) in record {
                    let child = *fields
                        .get(&name)
                        .ok_or_else(|| Error::Navigation(format!("no field '{name}'")))?;
                    targets.push((name, child, v));
                }
                for (name, child, v) in targets {
                    self.assign(child, v).map_err(|e| e.at(&name))?;
                }
                return Ok(());
            }
            Kind::Array { .. } | Kind::RepeatUntil { .. } | Kind::Area { .. } => {
                let Value::List(values) = value else {
                    return Err(self.mismatch(id, &value));
                };
                let items = self.init_items_at(id, values.len())?;
                for (i, (item, v)) in items.into_iter().zip(values).enumerate() {
                    self.assign(item, v).map_err(|e| e.at_index(i))?;
                }
                return Ok(());
            }
            Kind::Rebuild { child, .. } | Kind::Aligned { child, .. } | Kind::Pointer { target: child, .. } => {
                let child = *child;
                return self.assign(child, value);
            }
            Kind::Lazy { .. } => {
                let child = self.ensure_lazy(id)?;
                return self.assign(child, value);
            }
            Kind::IfThenElse { .. } => {
                let branch = self
                    .active_branch(id)?
                    .ok_or_else(|| Error::Navigation("conditional has no active branch".into()))?;
                return self.assign(branch, value);
            }
            Kind::Switch { selected, .. } => {
                let (_, branch) = selected.ok_or_else(|| Error::Navigation("switch has no selected branch".into()))?;
                return self.assign(branch, value);
            }
            Kind::Const { expected, .. } => {
                return if expected.same_as(&value) {
                    Ok(())
                } else {
                    Err(Error::Format(format!("constant is {expected}, cannot assign {value}")))
                };
            }
            Kind::BytesConst { expected } => {
                return match value.as_bytes() {
                    Some(b) if b == expected.as_slice() => Ok(()),
                    _ => Err(Error::Format(format!(
                        "constant is {}, cannot assign {value}",
                        crate::value::to_hex(expected)
                    ))),
                };
            }
            _ => {}
        }
        let mismatch = self.mismatch(id, &value);
        match (&mut self.slot_mut(id)?.kind, value) {
            (Kind::Number { ty, value: slot }, v) => *slot = v.coerce(ty.kind)?,
            (Kind::Enum { ty, variants, value: slot }, Value::String(name)) => {
                let (_, number) = variants
                    .iter()
                    .find(|(n, _)| *n == name)
                    .ok_or_else(|| Error::Format(format!("unknown enumerator '{name}'")))?;
                *slot = Value::I64(*number as i64).coerce(ty.kind)?;
            }
            (Kind::Enum { ty, value: slot, .. }, v) => *slot = v.coerce(ty.kind)?,
            (Kind::Bytes { value: slot, .. }, Value::Bytes(b)) => *slot = b,
            (
                Kind::CString { value: slot, .. }
                | Kind::PaddedString { value: slot, .. }
                | Kind::PascalString { value: slot, .. },
                Value::String(s),
            ) => *slot = s,
            _ => return Err(mismatch),
        }
        Ok(())
    }

    fn mismatch(&self, id: NodeId, value: &Value) -> Error {
        let kind = self.kind(id).map(|k| k.to_string()).unwrap_or_default();
        Error::Format(format!("cannot assign a {} to a {kind} field", value.type_name()))
    }

    pub(crate) fn discriminant_of(&self, id: NodeId) -> Result<Value> {
        let mut current = id;
        loop {
            current = match &self.slot(current)?.kind {
                Kind::Switch { cases, selected, .. } => {
                    let (index, _) = selected.ok_or_else(|| Error::Navigation("switch has no selected branch".into()))?;
                    return cases
                        .get(index)
                        .map(|c| c.value.clone())
                        .ok_or_else(|| Error::Navigation(format!("switch has no case {index}")));
                }
                Kind::Rebuild { child, .. } | Kind::Aligned { child, .. } | Kind::Pointer { target: child, .. } => {
                    *child
                }
                Kind::Lazy { child: Some(child), .. } => *child,
                _ => return Err(self.not_a(current, "switch")),
            };
        }
    }

    // ---------------------------------------------------------------------
    // Sizes and offsets.

    pub(crate) fn size_of_node(&self, id: NodeId) -> Result<u64> {
        let node = self.slot(id)?;
        Ok(match &node.kind {
            Kind::Number { ty, .. } | Kind::Const { ty, .. } | Kind::Enum { ty, .. } => ty.kind.width(),
            Kind::BytesConst { expected } => expected.len() as u64,
            Kind::Bytes { value, .. } => value.len() as u64,
            Kind::CString { encoding, value } => text::encoded_len(value, *encoding) + encoding.unit() as u64,
            Kind::PaddedString { len, .. } => self.eval_len(id, len)?,
            Kind::PascalString { encoding, length, value } => {
                length.kind.width() + text::encoded_len(value, *encoding)
            }
            Kind::Struct { fields } => self.sum_sizes(fields.values())?,
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } => self.sum_sizes(items.iter())?,
            Kind::Pointer { .. } | Kind::Area { .. } => 0,
            Kind::IfThenElse { .. } => match self.active_branch(id)? {
                Some(child) => self.size_of_node(child)?,
                None => 0,
            },
            Kind::Switch { selected, .. } => match selected {
                Some((_, child)) => self.size_of_node(*child)?,
                None => 0,
            },
            Kind::Lazy { child, .. } => match child {
                Some(child) => self.size_of_node(*child)?,
                None => 0,
            },
            Kind::Rebuild { child, .. } => self.size_of_node(*child)?,
            Kind::Aligned { alignment, child } => {
                let size = self.size_of_node(*child)?;
                size + padding(size, self.alignment_of(id, alignment)?)
            }
        })
    }

    fn sum_sizes<'n>(&self, ids: impl Iterator<Item = &'n NodeId>) -> Result<u64> {
        ids.map(|c| self.size_of_node(*c)).sum()
    }

    pub(crate) fn alignment_of(&self, id: NodeId, alignment: &Len) -> Result<u64> {
        let a = self.eval_len(id, alignment)?;
        if a < 2 {
            return Err(Error::Format(format!("alignment must be at least 2, got {a}")));
        }
        Ok(a)
    }

    pub(crate) fn offset_of(&self, id: NodeId) -> Result<u64> {
        let Some(parent) = self.slot(id)?.parent else {
            return Ok(0);
        };
        match &self.slot(parent)?.kind {
            Kind::Struct { fields } => {
                let before = fields.values().take_while(|c| **c != id);
                Ok(self.offset_of(parent)? + self.sum_sizes(before)?)
            }
            Kind::Array { items, .. } | Kind::RepeatUntil { items, .. } => {
                let before = items.iter().take_while(|c| **c != id);
                Ok(self.offset_of(parent)? + self.sum_sizes(before)?)
            }
            Kind::Area { items, .. } => {
                let before = items.iter().take_while(|c| **c != id);
                Ok(self.ptr_offset_of(parent)? + self.sum_sizes(before)?)
            }
            Kind::Pointer { .. } => self.ptr_offset_of(parent),
            _ => self.offset_of(parent),
        }
    }

    /// Absolute offset a pointer or area refers to.
    pub(crate) fn ptr_offset_of(&self, id: NodeId) -> Result<u64> {
        match &self.slot(id)?.kind {
            Kind::Pointer { offset, .. } | Kind::Area { offset, .. } => offset(&self.scope_context(id)),
            _ => Err(self.not_a(id, "pointer")),
        }
    }

    /// Size of the content a pointer or area refers to, from current content.
    pub(crate) fn ptr_size_of(&self, id: NodeId) -> Result<u64> {
        match &self.slot(id)?.kind {
            Kind::Pointer { target, .. } => self.size_of_node(*target),
            Kind::Area { items, .. } => self.sum_sizes(items.iter()),
            _ => Err(self.not_a(id, "pointer")),
        }
    }

    pub(crate) fn len_of(&self, id: NodeId) -> Result<usize> {
        let container = self.descend(id)?;
        match self.slot(container)?.kind.items() {
            Some(items) => Ok(items.len()),
            None => Err(self.not_a(container, "sequence")),
        }
    }
}

/// Zero bytes needed after `size` bytes to reach a multiple of `alignment`.
pub(crate) fn padding(size: u64, alignment: u64) -> u64 {
    (alignment - size % alignment) % alignment
}

