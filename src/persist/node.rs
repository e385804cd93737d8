//! Self-describing tree that persisted entities are flattened into.

use crate::error::{DbError, DbResult};
use serde::de::{self, DeserializeSeed, EnumAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Closed set of entity kinds that may appear in a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Table,
    Metadata,
    Index,
    PageRange,
    Page,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Table => "table",
            Tag::Metadata => "metadata",
            Tag::Index => "index",
            Tag::PageRange => "page range",
            Tag::Page => "page",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Node {
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Text(String),
    Bytes(Vec<u8>),
    Seq(Vec<Node>),
    /// Ordered key/value pairs. Entity state uses `Text` field names as keys.
    Map(Vec<(Node, Node)>),
    Tagged { tag: Tag, state: Box<Node> },
    /// Stands in for an entity that was already on the active walk path.
    Placeholder(Tag),
}

/// Deepest `Seq`/`Map`/`Tagged` nesting accepted when decoding. Entity
/// blobs stay far below this; anything deeper is treated as corrupt
/// instead of recursing until the stack runs out.
pub const MAX_DEPTH: usize = 64;

const VARIANTS: &[&str] = &[
    "Unit",
    "Bool",
    "Int",
    "UInt",
    "Text",
    "Bytes",
    "Seq",
    "Map",
    "Tagged",
    "Placeholder",
];

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        NodeSeed { depth: 0 }.deserialize(deserializer)
    }
}

#[derive(Clone, Copy)]
struct NodeSeed {
    depth: usize,
}

impl NodeSeed {
    fn child(self) -> Self {
        NodeSeed {
            depth: self.depth + 1,
        }
    }
}

impl<'de> DeserializeSeed<'de> for NodeSeed {
    type Value = Node;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        if self.depth > MAX_DEPTH {
            return Err(de::Error::custom(format_args!(
                "node nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        deserializer.deserialize_enum("Node", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for NodeSeed {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a node")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Node, A::Error> {
        let (index, variant): (u32, _) = data.variant()?;
        let node = match index {
            0 => {
                variant.unit_variant()?;
                Node::Unit
            }
            1 => Node::Bool(variant.newtype_variant()?),
            2 => Node::Int(variant.newtype_variant()?),
            3 => Node::UInt(variant.newtype_variant()?),
            4 => Node::Text(variant.newtype_variant()?),
            5 => Node::Bytes(variant.newtype_variant()?),
            6 => Node::Seq(variant.newtype_variant_seed(SeqSeed(self.child()))?),
            7 => Node::Map(variant.newtype_variant_seed(MapSeed(self.child()))?),
            8 => variant.struct_variant(&["tag", "state"], TaggedVisitor(self.child()))?,
            9 => Node::Placeholder(variant.newtype_variant()?),
            other => {
                return Err(de::Error::invalid_value(
                    de::Unexpected::Unsigned(other as u64),
                    &"a node variant index below 10",
                ))
            }
        };
        Ok(node)
    }
}

// Cap preallocation so a forged length cannot reserve huge buffers.
fn capacity(hint: Option<usize>) -> usize {
    hint.unwrap_or(0).min(4096)
}

struct SeqSeed(NodeSeed);

impl<'de> DeserializeSeed<'de> for SeqSeed {
    type Value = Vec<Node>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Node>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for SeqSeed {
    type Value = Vec<Node>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of nodes")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Node>, A::Error> {
        let mut items = Vec::with_capacity(capacity(seq.size_hint()));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

struct MapSeed(NodeSeed);

impl<'de> DeserializeSeed<'de> for MapSeed {
    type Value = Vec<(Node, Node)>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Vec<(Node, Node)>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for MapSeed {
    type Value = Vec<(Node, Node)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of node pairs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<(Node, Node)>, A::Error> {
        let mut pairs = Vec::with_capacity(capacity(seq.size_hint()));
        while let Some(pair) = seq.next_element_seed(PairSeed(self.0))? {
            pairs.push(pair);
        }
        Ok(pairs)
    }
}

struct PairSeed(NodeSeed);

impl<'de> DeserializeSeed<'de> for PairSeed {
    type Value = (Node, Node);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(Node, Node), D::Error> {
        deserializer.deserialize_tuple(2, self)
    }
}

impl<'de> Visitor<'de> for PairSeed {
    type Value = (Node, Node);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a key/value pair")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(Node, Node), A::Error> {
        let key = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let value = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok((key, value))
    }
}

struct TaggedVisitor(NodeSeed);

impl<'de> Visitor<'de> for TaggedVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a tagged entity")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let tag: Tag = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let state = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok(Node::Tagged {
            tag,
            state: Box::new(state),
        })
    }
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Unit => "unit",
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::UInt(_) => "uint",
            Node::Text(_) => "text",
            Node::Bytes(_) => "bytes",
            Node::Seq(_) => "sequence",
            Node::Map(_) => "map",
            Node::Tagged { .. } => "tagged entity",
            Node::Placeholder(_) => "placeholder",
        }
    }

    fn unexpected(&self, wanted: &str) -> DbError {
        DbError::corrupt(format!("expected {}, found {}", wanted, self.kind()))
    }

    pub fn into_bool(self) -> DbResult<bool> {
        match self {
            Node::Bool(b) => Ok(b),
            other => Err(other.unexpected("bool")),
        }
    }

    pub fn into_int(self) -> DbResult<i64> {
        match self {
            Node::Int(i) => Ok(i),
            other => Err(other.unexpected("int")),
        }
    }

    pub fn into_u64(self) -> DbResult<u64> {
        match self {
            Node::UInt(u) => Ok(u),
            other => Err(other.unexpected("uint")),
        }
    }

    pub fn into_u32(self) -> DbResult<u32> {
        let value = self.into_u64()?;
        u32::try_from(value).map_err(|_| DbError::corrupt(format!("{} overflows u32", value)))
    }

    pub fn into_usize(self) -> DbResult<usize> {
        let value = self.into_u64()?;
        usize::try_from(value).map_err(|_| DbError::corrupt(format!("{} overflows usize", value)))
    }

    /// `Unit` reads as `None`.
    pub fn into_opt_u64(self) -> DbResult<Option<u64>> {
        match self {
            Node::Unit => Ok(None),
            Node::UInt(u) => Ok(Some(u)),
            other => Err(other.unexpected("optional uint")),
        }
    }

    pub fn into_text(self) -> DbResult<String> {
        match self {
            Node::Text(s) => Ok(s),
            other => Err(other.unexpected("text")),
        }
    }

    pub fn into_bytes(self) -> DbResult<Vec<u8>> {
        match self {
            Node::Bytes(b) => Ok(b),
            other => Err(other.unexpected("bytes")),
        }
    }

    pub fn into_seq(self) -> DbResult<Vec<Node>> {
        match self {
            Node::Seq(items) => Ok(items),
            other => Err(other.unexpected("sequence")),
        }
    }

    pub fn into_map(self) -> DbResult<Vec<(Node, Node)>> {
        match self {
            Node::Map(pairs) => Ok(pairs),
            other => Err(other.unexpected("map")),
        }
    }

    /// Split a tagged node into its tag and state.
    pub fn into_tagged(self) -> DbResult<(Tag, Node)> {
        match self {
            Node::Tagged { tag, state } => Ok((tag, *state)),
            Node::Placeholder(tag) => Err(DbError::corrupt(format!(
                "unresolved back-reference to a {}",
                tag
            ))),
            other => Err(other.unexpected("tagged entity")),
        }
    }

    /// Fixed-length sequence, e.g. a tuple.
    pub fn into_tuple<const N: usize>(self) -> DbResult<[Node; N]> {
        let items = self.into_seq()?;
        let len = items.len();
        items
            .try_into()
            .map_err(|_| DbError::corrupt(format!("expected {} fields, found {}", N, len)))
    }
}

impl From<u64> for Node {
    fn from(v: u64) -> Self {
        Node::UInt(v)
    }
}

impl From<u32> for Node {
    fn from(v: u32) -> Self {
        Node::UInt(v as u64)
    }
}

impl From<usize> for Node {
    fn from(v: usize) -> Self {
        Node::UInt(v as u64)
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Bool(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::Text(v.to_string())
    }
}

impl From<Option<u64>> for Node {
    fn from(v: Option<u64>) -> Self {
        v.map_or(Node::Unit, Node::UInt)
    }
}

/// Builds the state map of one entity, field by field.
#[derive(Default)]
pub struct FieldsBuilder {
    pairs: Vec<(Node, Node)>,
}

impl FieldsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<Node>) -> Self {
        self.pairs.push((Node::from(name), value.into()));
        self
    }

    pub fn build(self) -> Node {
        Node::Map(self.pairs)
    }
}

/// Named fields of a state map, consumed as they are read.
pub struct Fields {
    pairs: Vec<(String, Node)>,
}

impl Fields {
    pub fn from_node(node: Node) -> DbResult<Self> {
        let mut pairs = Vec::new();
        for (key, value) in node.into_map()? {
            pairs.push((key.into_text()?, value));
        }
        Ok(Self { pairs })
    }

    pub fn take(&mut self, name: &str) -> DbResult<Node> {
        let pos = self
            .pairs
            .iter()
            .position(|(key, _)| key == name)
            .ok_or_else(|| DbError::corrupt(format!("missing field '{}'", name)))?;
        Ok(self.pairs.swap_remove(pos).1)
    }
}

/// Serializable entity with a fixed tag.
pub trait Persist: Sized {
    const TAG: Tag;

    /// Flatten owned state. Nested entities go through `walk.visit`.
    fn to_state(&self, walk: &mut Walk) -> Node;

    fn from_state(state: Node) -> DbResult<Self>;

    fn to_node(&self) -> Node {
        Walk::new().visit(self)
    }

    /// Rehydrate from a node carrying this type's tag.
    fn from_node(node: Node) -> DbResult<Self> {
        let (tag, state) = node.into_tagged()?;
        if tag != Self::TAG {
            return Err(DbError::corrupt(format!(
                "expected a {}, found a {}",
                Self::TAG,
                tag
            )));
        }
        Self::from_state(state)
    }
}

/// Depth-first flattening pass.
///
/// Remembers which entities are on the active path by address and tag.
/// Reaching one of them again emits a `Placeholder` instead of recursing.
#[derive(Default)]
pub struct Walk {
    active: HashSet<(usize, Tag)>,
}

impl Walk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit<T: Persist>(&mut self, entity: &T) -> Node {
        let identity = (entity as *const T as usize, T::TAG);
        if !self.active.insert(identity) {
            return Node::Placeholder(T::TAG);
        }
        let state = entity.to_state(self);
        self.active.remove(&identity);
        Node::Tagged {
            tag: T::TAG,
            state: Box::new(state),
        }
    }

    /// Visit each entity into a `Seq`.
    pub fn visit_all<'a, T, I>(&mut self, entities: I) -> Node
    where
        T: Persist + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        Node::Seq(entities.into_iter().map(|e| self.visit(e)).collect())
    }
}
