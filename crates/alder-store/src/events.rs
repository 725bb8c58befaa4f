//! Row-level change events.
//!
//! The shared store reports committed row changes as
//! [`RowChangeEvent`]s: the kind of change, the subscription it matched,
//! and column-addressable before/after images. Delivery is at-least-once;
//! changes to the same row arrive in commit order.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

/// The kind of row change a delivery describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One column's value in a row image.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

/// Column-addressable view of a row at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowImage {
    columns: BTreeMap<String, ColumnValue>,
}

impl RowImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: ColumnValue) -> Self {
        self.columns.insert(column.to_string(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    /// Read a column as an integer.
    pub fn int(&self, column: &str) -> Option<i64> {
        match self.columns.get(column)? {
            ColumnValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Read a column as a boolean.
    pub fn flag(&self, column: &str) -> Option<bool> {
        match self.columns.get(column)? {
            ColumnValue::Bool(value) => Some(*value),
            ColumnValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Read a column as text.
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.columns.get(column)? {
            ColumnValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// One committed row change, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct RowChangeEvent {
    pub kind: ChangeKind,
    /// Name of the subscription this delivery matched.
    pub event: String,
    /// Table the row lives in.
    pub table: String,
    /// Row values after the change. For deletes, the values the row had.
    pub post: RowImage,
    /// Row values before the change; present for updates and deletes.
    pub pre: Option<RowImage>,
}

/// Receiving half of one open event operation.
#[derive(Debug)]
pub struct EventStream {
    pub(crate) rx: mpsc::UnboundedReceiver<RowChangeEvent>,
}

impl EventStream {
    /// Next change, or `None` once the stream has been closed by the
    /// store.
    pub async fn recv(&mut self) -> Option<RowChangeEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_image_typed_accessors() {
        let image = RowImage::new()
            .with("op_id", ColumnValue::Int(42))
            .with("acknowledged", ColumnValue::Bool(true))
            .with("name", ColumnValue::Text("nn1".to_string()));

        assert_eq!(image.int("op_id"), Some(42));
        assert_eq!(image.flag("acknowledged"), Some(true));
        assert_eq!(image.text("name"), Some("nn1"));
        assert_eq!(image.int("missing"), None);
        assert_eq!(image.int("name"), None);
    }

    #[test]
    fn integer_columns_read_as_flags() {
        // Stores that model booleans as tinyints still answer flag reads.
        let image = RowImage::new().with("acknowledged", ColumnValue::Int(1));
        assert_eq!(image.flag("acknowledged"), Some(true));

        let image = RowImage::new().with("acknowledged", ColumnValue::Int(0));
        assert_eq!(image.flag("acknowledged"), Some(false));
    }
}
