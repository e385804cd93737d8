//! How each persisted entity maps onto a `Node` tree.
//!
//! Only owned state is written. A table image holds its metadata, indexes
//! and page ranges; a range holds its pages. Nothing points back at the table
//! or at the bufferpool, so loading needs no second pass.

use crate::access::{
    BaseSlot, Index, PageImage, PageRange, RangeImage, Rid, TableImage, TableMeta, TailEntry,
    Value,
};
use crate::error::{DbError, DbResult};
use crate::persist::node::{Fields, FieldsBuilder, Node, Persist, Tag, Walk};
use crate::storage::page::{PageId, PageKind, TableId};
use std::collections::BTreeSet;

fn value_node(value: &Value) -> Node {
    match value {
        Value::Int(i) => Node::Int(*i),
        Value::Text(s) => Node::Text(s.clone()),
    }
}

fn node_value(node: Node) -> DbResult<Value> {
    match node {
        Node::Int(i) => Ok(Value::Int(i)),
        Node::Text(s) => {
            let value = Value::Text(s);
            value.check_width().map_err(|e| DbError::corrupt(e.to_string()))?;
            Ok(value)
        }
        other => Err(DbError::corrupt(format!(
            "expected a column value, found {}",
            other.kind()
        ))),
    }
}

impl Persist for TableMeta {
    const TAG: Tag = Tag::Metadata;

    fn to_state(&self, _walk: &mut Walk) -> Node {
        FieldsBuilder::new()
            .field("name", self.name.as_str())
            .field("table_id", self.table_id.0)
            .field("num_columns", self.num_columns)
            .field("key_column", self.key_column)
            .field("next_rid", self.next_rid.0)
            .build()
    }

    fn from_state(state: Node) -> DbResult<Self> {
        let mut fields = Fields::from_node(state)?;
        Ok(TableMeta {
            name: fields.take("name")?.into_text()?,
            table_id: TableId(fields.take("table_id")?.into_u32()?),
            num_columns: fields.take("num_columns")?.into_usize()?,
            key_column: fields.take("key_column")?.into_usize()?,
            next_rid: Rid(fields.take("next_rid")?.into_u64()?),
        })
    }
}

impl Persist for Index {
    const TAG: Tag = Tag::Index;

    fn to_state(&self, _walk: &mut Walk) -> Node {
        let entries = self
            .groups()
            .map(|(key, rids)| {
                let rids = rids.iter().map(|rid| Node::UInt(rid.0)).collect();
                (value_node(key), Node::Seq(rids))
            })
            .collect();
        FieldsBuilder::new()
            .field("column", self.column())
            .field("unique", self.is_unique())
            .field("entries", Node::Map(entries))
            .build()
    }

    fn from_state(state: Node) -> DbResult<Self> {
        let mut fields = Fields::from_node(state)?;
        let column = fields.take("column")?.into_usize()?;
        let unique = fields.take("unique")?.into_bool()?;

        let mut groups = Vec::new();
        for (key, rids) in fields.take("entries")?.into_map()? {
            let rids = rids
                .into_seq()?
                .into_iter()
                .map(|rid| rid.into_u64().map(Rid))
                .collect::<DbResult<BTreeSet<_>>>()?;
            groups.push((node_value(key)?, rids));
        }
        Index::from_groups(column, unique, groups)
    }
}

impl Persist for PageImage {
    const TAG: Tag = Tag::Page;

    fn to_state(&self, _walk: &mut Walk) -> Node {
        let id = self.page_id;
        FieldsBuilder::new()
            .field("table", id.table.0)
            .field("column", id.column as u32)
            .field("range", id.range)
            .field("kind", id.kind as u8 as u32)
            .field("seq", id.seq)
            .field("bytes", Node::Bytes(self.bytes.clone()))
            .build()
    }

    fn from_state(state: Node) -> DbResult<Self> {
        let mut fields = Fields::from_node(state)?;
        let table = TableId(fields.take("table")?.into_u32()?);
        let column = fields.take("column")?.into_u32()?;
        let column = u16::try_from(column)
            .map_err(|_| DbError::corrupt(format!("column {} overflows u16", column)))?;
        let range = fields.take("range")?.into_u32()?;
        let kind = fields.take("kind")?.into_u32()?;
        let kind = u8::try_from(kind)
            .ok()
            .and_then(PageKind::from_u8)
            .ok_or_else(|| DbError::corrupt(format!("unknown page kind {}", kind)))?;
        let seq = fields.take("seq")?.into_u32()?;
        let page_id = match kind {
            PageKind::Base => PageId::base(table, column, range, seq),
            PageKind::Tail => PageId::tail(table, column, range, seq),
        };
        Ok(PageImage {
            page_id,
            bytes: fields.take("bytes")?.into_bytes()?,
        })
    }
}

impl Persist for RangeImage {
    const TAG: Tag = Tag::PageRange;

    fn to_state(&self, walk: &mut Walk) -> Node {
        let range = &self.range;
        let base = range
            .base
            .iter()
            .map(|slot| {
                Node::Seq(vec![
                    Node::UInt(slot.rid.0),
                    slot.latest.into(),
                    Node::Bool(slot.deleted),
                ])
            })
            .collect();
        let tails = range
            .tails
            .iter()
            .map(|entry| {
                Node::Seq(vec![
                    Node::UInt(entry.rid.0),
                    entry.prev.into(),
                    Node::UInt(entry.schema),
                ])
            })
            .collect();

        FieldsBuilder::new()
            .field("id", range.id)
            .field("generation", range.generation)
            .field("tail_offset", range.tail_offset)
            .field("base", Node::Seq(base))
            .field("tails", Node::Seq(tails))
            .field("pages", walk.visit_all(&self.pages))
            .build()
    }

    fn from_state(state: Node) -> DbResult<Self> {
        let mut fields = Fields::from_node(state)?;
        let mut range = PageRange::new(fields.take("id")?.into_u32()?);
        range.generation = fields.take("generation")?.into_u32()?;
        range.tail_offset = fields.take("tail_offset")?.into_u64()?;

        for slot in fields.take("base")?.into_seq()? {
            let [rid, latest, deleted] = slot.into_tuple()?;
            range.base.push(BaseSlot {
                rid: Rid(rid.into_u64()?),
                latest: latest.into_opt_u64()?,
                deleted: deleted.into_bool()?,
            });
        }
        for entry in fields.take("tails")?.into_seq()? {
            let [rid, prev, schema] = entry.into_tuple()?;
            range.tails.push(TailEntry {
                rid: Rid(rid.into_u64()?),
                prev: prev.into_opt_u64()?,
                schema: schema.into_u64()?,
            });
        }

        let pages = fields
            .take("pages")?
            .into_seq()?
            .into_iter()
            .map(PageImage::from_node)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(RangeImage { range, pages })
    }
}

impl Persist for TableImage {
    const TAG: Tag = Tag::Table;

    fn to_state(&self, walk: &mut Walk) -> Node {
        FieldsBuilder::new()
            .field("meta", walk.visit(&self.meta))
            .field("primary", walk.visit(&self.primary))
            .field("secondary", walk.visit_all(&self.secondary))
            .field("ranges", walk.visit_all(&self.ranges))
            .build()
    }

    fn from_state(state: Node) -> DbResult<Self> {
        let mut fields = Fields::from_node(state)?;
        let meta = TableMeta::from_node(fields.take("meta")?)?;
        let primary = Index::from_node(fields.take("primary")?)?;
        let secondary = fields
            .take("secondary")?
            .into_seq()?
            .into_iter()
            .map(Index::from_node)
            .collect::<DbResult<Vec<_>>>()?;
        let ranges = fields
            .take("ranges")?
            .into_seq()?
            .into_iter()
            .map(RangeImage::from_node)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(TableImage {
            meta,
            primary,
            secondary,
            ranges,
        })
    }
}

/// Any entity a blob can hold at its root, selected by its tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Table(TableImage),
    Metadata(TableMeta),
    Index(Index),
    PageRange(RangeImage),
    Page(PageImage),
}

impl Entity {
    pub fn tag(&self) -> Tag {
        match self {
            Entity::Table(_) => Tag::Table,
            Entity::Metadata(_) => Tag::Metadata,
            Entity::Index(_) => Tag::Index,
            Entity::PageRange(_) => Tag::PageRange,
            Entity::Page(_) => Tag::Page,
        }
    }

    pub fn from_node(node: Node) -> DbResult<Self> {
        let (tag, state) = node.into_tagged()?;
        Ok(match tag {
            Tag::Table => Entity::Table(TableImage::from_state(state)?),
            Tag::Metadata => Entity::Metadata(TableMeta::from_state(state)?),
            Tag::Index => Entity::Index(Index::from_state(state)?),
            Tag::PageRange => Entity::PageRange(RangeImage::from_state(state)?),
            Tag::Page => Entity::Page(PageImage::from_state(state)?),
        })
    }
}
