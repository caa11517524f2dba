//! Record types shared by the integration tests.
#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::Row;
use tempfile::TempDir;
use txbatch::{ColumnDef, ConnectionHandle, Persistable, RecordShape, SqlType};

pub const ORDERS: RecordShape = RecordShape {
    table: "orders",
    columns: &[
        ColumnDef::new("id", SqlType::Integer),
        ColumnDef::new("reference", SqlType::Text).not_null().unique(),
        ColumnDef::new("status", SqlType::Text).not_null(),
        ColumnDef::new("total", SqlType::Real),
    ],
    primary_key: &["id"],
    relations: &[],
};

pub const AUDIT: RecordShape = RecordShape {
    table: "audit_log",
    columns: &[
        ColumnDef::new("order_id", SqlType::Integer).not_null(),
        ColumnDef::new("seq", SqlType::Integer).not_null(),
        ColumnDef::new("note", SqlType::Text),
    ],
    primary_key: &["order_id", "seq"],
    relations: &[],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Option<i64>,
    pub reference: String,
    pub status: String,
    pub total: Option<f64>,
}

impl Order {
    pub fn new(id: i64, reference: &str, status: &str) -> Self {
        Order {
            id: Some(id),
            reference: reference.to_string(),
            status: status.to_string(),
            total: None,
        }
    }
}

impl Persistable for Order {
    const SHAPE: &'static RecordShape = &ORDERS;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("reference", self.reference.clone().into()),
            ("status", self.status.clone().into()),
            ("total", self.total.into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get("id")?,
            reference: row.get("reference")?,
            status: row.get("status")?,
            total: row.get("total")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub order_id: i64,
    pub seq: i64,
    pub note: Option<String>,
}

impl Persistable for AuditEntry {
    const SHAPE: &'static RecordShape = &AUDIT;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("order_id", self.order_id.into()),
            ("seq", self.seq.into()),
            ("note", self.note.clone().into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AuditEntry {
            order_id: row.get("order_id")?,
            seq: row.get("seq")?,
            note: row.get("note")?,
        })
    }
}

/// A file-backed store in a fresh temporary directory
pub fn file_store() -> (TempDir, ConnectionHandle) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orders.db");
    let handle = ConnectionHandle::new(path.to_string_lossy());
    handle.open().unwrap();
    handle.ensure_schema(&[&ORDERS, &AUDIT]).unwrap();
    (dir, handle)
}

pub fn memory_store() -> ConnectionHandle {
    let handle = ConnectionHandle::new(":memory:");
    handle.open().unwrap();
    handle.ensure_schema(&[&ORDERS, &AUDIT]).unwrap();
    handle
}
