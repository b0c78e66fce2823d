use crate::models::block::{BlockBody, ContentBlock};
use crate::models::event::BlockEvent;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Separator marking a nested field path such as `items.0`
const NESTED_PATH_SEPARATOR: char = '.';

/// Accumulated value of one block field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Rows(Vec<Vec<String>>),
}

/// Split a pipe-delimited row into trimmed cells.
///
/// Cells cannot contain a literal `|`; producers have no escape for it.
pub fn split_row(value: &str) -> Vec<String> {
    value.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Whether each delta on `path` is one whole list element rather than a text piece
pub fn is_element_path(path: &str) -> bool {
    matches!(path, "rows" | "headers" | "items" | "steps") || path.contains(NESTED_PATH_SEPARATOR)
}

impl FieldValue {
    fn append_text(&mut self, value: &str) {
        match self {
            FieldValue::Text(text) => text.push_str(value),
            FieldValue::List(items) => items.push(value.to_string()),
            FieldValue::Rows(rows) => rows.push(split_row(value)),
        }
    }

    fn push_item(&mut self, value: &str) {
        match self {
            FieldValue::Text(text) => {
                let existing = std::mem::take(text);
                let mut items = Vec::with_capacity(2);
                if !existing.is_empty() {
                    items.push(existing);
                }
                items.push(value.to_string());
                *self = FieldValue::List(items);
            }
            FieldValue::List(items) => items.push(value.to_string()),
            FieldValue::Rows(rows) => rows.push(vec![value.to_string()]),
        }
    }

    fn push_row(&mut self, row: Vec<String>) {
        match self {
            FieldValue::Rows(rows) => rows.push(row),
            FieldValue::List(items) => {
                let mut rows: Vec<Vec<String>> =
                    std::mem::take(items).into_iter().map(|item| vec![item]).collect();
                rows.push(row);
                *self = FieldValue::Rows(rows);
            }
            FieldValue::Text(text) => {
                let mut rows = Vec::with_capacity(2);
                if !text.is_empty() {
                    rows.push(split_row(text));
                }
                rows.push(row);
                *self = FieldValue::Rows(rows);
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FieldValue::Text(text) => Value::String(text.clone()),
            FieldValue::List(items) => Value::from(items.clone()),
            FieldValue::Rows(rows) => Value::Array(rows.iter().map(|row| Value::from(row.clone())).collect()),
        }
    }
}

/// A block between its start and end events
#[derive(Debug, Clone, PartialEq)]
pub struct OpenBlock {
    pub id: String,
    pub block_type: String,
    /// Fields in first-delta order
    fields: Vec<(String, FieldValue)>,
}

impl OpenBlock {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn field_entry(&mut self, name: &str, init: impl FnOnce() -> FieldValue) -> &mut FieldValue {
        let pos = match self.fields.iter().position(|(k, _)| k == name) {
            Some(pos) => pos,
            None => {
                self.fields.push((name.to_string(), init()));
                self.fields.len() - 1
            }
        };
        &mut self.fields[pos].1
    }

    /// Accumulate one delta according to the path's semantics
    pub fn apply(&mut self, path: &str, value: &str) {
        match path {
            "rows" => self
                .field_entry("rows", || FieldValue::Rows(Vec::new()))
                .push_row(split_row(value)),
            "headers" => {
                *self.field_entry("headers", || FieldValue::List(Vec::new())) =
                    FieldValue::List(split_row(value));
            }
            "items" | "steps" => self
                .field_entry(path, || FieldValue::List(Vec::new()))
                .push_item(value),
            _ if path.contains(NESTED_PATH_SEPARATOR) => {
                let field = path.split(NESTED_PATH_SEPARATOR).next().unwrap_or(path);
                self.field_entry(field, || FieldValue::List(Vec::new()))
                    .push_item(value);
            }
            _ => self
                .field_entry(path, || FieldValue::Text(String::new()))
                .append_text(value),
        }
    }

    fn into_fields(self) -> Map<String, Value> {
        self.fields
            .into_iter()
            .map(|(name, value)| (name, value.to_value()))
            .collect()
    }
}

/// What applying one event did to the assembler
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerUpdate {
    Started { block_id: String, block_type: String },
    Updated { block_id: String, path: String },
    Completed(ContentBlock),
    /// The event referenced a block that is not open
    Ignored { block_id: String },
}

/// Tracks in-progress blocks by id and turns them into validated blocks.
///
/// Lifecycle per id: absent, open, closed. A closed id is never reopened.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    open: Vec<OpenBlock>,
    closed: HashSet<String>,
    completed: Vec<ContentBlock>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new block. Returns false if the id is already open or closed.
    pub fn start(&mut self, block_id: &str, block_type: &str) -> bool {
        if self.closed.contains(block_id) || self.get_open(block_id).is_some() {
            tracing::warn!(block_id = %block_id, "Ignoring start for a block id already in use");
            return false;
        }

        self.open.push(OpenBlock::new(block_id, block_type));
        tracing::debug!(block_id = %block_id, block_type = %block_type, "Block started");
        true
    }

    /// Apply a delta to an open block. Returns false if the block is not open.
    pub fn delta(&mut self, block_id: &str, path: &str, value: &str) -> bool {
        match self.open.iter_mut().find(|b| b.id == block_id) {
            Some(block) => {
                block.apply(path, value);
                true
            }
            None => {
                tracing::debug!(block_id = %block_id, path = %path, "Delta for a block that is not open");
                false
            }
        }
    }

    /// Close a block and validate it into a [`ContentBlock`]
    pub fn end(&mut self, block_id: &str, partial: bool) -> Option<ContentBlock> {
        let pos = match self.open.iter().position(|b| b.id == block_id) {
            Some(pos) => pos,
            None => {
                tracing::debug!(block_id = %block_id, "End for a block that is not open");
                return None;
            }
        };

        let open = self.open.remove(pos);
        let id = open.id.clone();
        let block_type = open.block_type.clone();
        let body = BlockBody::validate(&block_type, open.into_fields());
        let block = ContentBlock::new(id.clone(), body, partial);

        if partial {
            tracing::debug!(block_id = %id, "Block closed as partial");
        }

        self.closed.insert(id);
        self.completed.push(block.clone());
        Some(block)
    }

    /// Apply a normalized event
    pub fn apply(&mut self, event: BlockEvent) -> AssemblerUpdate {
        match event {
            BlockEvent::Start {
                block_id,
                block_type,
            } => {
                if self.start(&block_id, &block_type) {
                    AssemblerUpdate::Started {
                        block_id,
                        block_type,
                    }
                } else {
                    AssemblerUpdate::Ignored { block_id }
                }
            }
            BlockEvent::Delta {
                block_id,
                path,
                value,
            } => {
                if self.delta(&block_id, &path, &value) {
                    AssemblerUpdate::Updated { block_id, path }
                } else {
                    AssemblerUpdate::Ignored { block_id }
                }
            }
            BlockEvent::End { block_id, partial } => match self.end(&block_id, partial) {
                Some(block) => AssemblerUpdate::Completed(block),
                None => AssemblerUpdate::Ignored { block_id },
            },
        }
    }

    /// Force-close every open block as partial, in start order
    pub fn close_all_partial(&mut self) -> Vec<ContentBlock> {
        self.open_ids()
            .iter()
            .filter_map(|id| self.end(id, true))
            .collect()
    }

    pub fn has_open_blocks(&self) -> bool {
        !self.open.is_empty()
    }

    /// Ids of open blocks in start order
    pub fn open_ids(&self) -> Vec<String> {
        self.open.iter().map(|b| b.id.clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Peek at an in-progress block
    pub fn get_open(&self, block_id: &str) -> Option<&OpenBlock> {
        self.open.iter().find(|b| b.id == block_id)
    }

    pub fn is_closed(&self, block_id: &str) -> bool {
        self.closed.contains(block_id)
    }

    /// Completed blocks in completion order, without copying
    pub fn completed(&self) -> &[ContentBlock] {
        &self.completed
    }

    /// Snapshot of completed blocks in completion order
    pub fn get_completed(&self) -> Vec<ContentBlock> {
        self.completed.clone()
    }

    /// Reset for a new stream
    pub fn reset(&mut self) {
        self.open.clear();
        self.closed.clear();
        self.completed.clear();
    }
}
