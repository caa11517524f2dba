/// Record Shape Module
///
/// Static table descriptions and the `Persistable` capability. The executor
/// and the query engine only ever see a record through its shape and its
/// row representation; they never know the concrete type's fields.

use crate::core::{Result, StoreError};
use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::Row;
use std::collections::BTreeMap;

/// An untyped row keyed by column name.
pub type RowMap = BTreeMap<String, Value>;

/// Column affinity used when generating DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Timestamp,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "DATETIME",
        }
    }
}

/// Target of a foreign-key column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignRef {
    pub table: &'static str,
    pub column: &'static str,
}

/// A declared column of a record shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub unique: bool,
    pub references: Option<ForeignRef>,
}

impl ColumnDef {
    /// A nullable, non-unique column
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        ColumnDef {
            name,
            sql_type,
            nullable: true,
            unique: false,
            references: None,
        }
    }

    pub const fn not_null(self) -> Self {
        ColumnDef {
            nullable: false,
            ..self
        }
    }

    pub const fn unique(self) -> Self {
        ColumnDef {
            unique: true,
            ..self
        }
    }

    pub const fn references(self, table: &'static str, column: &'static str) -> Self {
        ColumnDef {
            references: Some(ForeignRef { table, column }),
            ..self
        }
    }
}

/// A named one-to-many relation that can be preloaded by the query engine.
///
/// Rows of `table` whose `foreign_key` equals the parent's `local_key`
/// value belong to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub local_key: &'static str,
}

/// Static description of one table-shaped entity
#[derive(Debug, PartialEq, Eq)]
pub struct RecordShape {
    pub table: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static [&'static str],
    pub relations: &'static [Relation],
}

impl RecordShape {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.primary_key.contains(&column)
    }

    /// Quoted, comma separated column names in declaration order
    pub(crate) fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A type whose values can be stored as rows of `SHAPE`.
///
/// `to_row` must produce a value for every primary key column; a `Null`
/// key lets the store assign one on insert.
pub trait Persistable: Sized {
    const SHAPE: &'static RecordShape;

    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Decodes one row selected with `SHAPE`'s column list.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Receives the rows of a preloaded relation.
    fn attach_related(&mut self, relation: &str, _rows: Vec<RowMap>) -> Result<()> {
        Err(StoreError::Query(format!(
            "`{}` does not accept related rows for `{}`",
            Self::SHAPE.table,
            relation
        )))
    }
}

/// Object-safe view of a persistable value, so one batch can mix types.
pub trait Record {
    fn shape(&self) -> &'static RecordShape;

    fn row(&self) -> Vec<(&'static str, Value)>;

    /// Primary key columns paired with this record's values
    fn identity(&self) -> Vec<(&'static str, Value)> {
        let shape = self.shape();
        let row = self.row();
        shape
            .primary_key
            .iter()
            .map(|key| {
                let value = row
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                (*key, value)
            })
            .collect()
    }
}

impl<T: Persistable> Record for T {
    fn shape(&self) -> &'static RecordShape {
        T::SHAPE
    }

    fn row(&self) -> Vec<(&'static str, Value)> {
        self.to_row()
    }
}

/// Decodes one column of an untyped row.
pub fn decode<T: FromSql>(row: &RowMap, column: &str) -> Result<T> {
    let value = row
        .get(column)
        .ok_or_else(|| StoreError::Query(format!("column `{}` missing from row", column)))?;
    T::column_result(ValueRef::from(value))
        .map_err(|e| StoreError::Query(format!("cannot decode column `{}`: {}", column, e)))
}

/// Quotes an identifier for SQLite, doubling embedded quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
