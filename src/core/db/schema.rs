/// Schema Module
///
/// Introspection of the live database structure and reconciliation of
/// declared record shapes against it. Reconciliation is additive: missing
/// tables are created and missing columns are appended, nothing is dropped
/// or altered in place.

use crate::core::db::record::{quote_ident, ColumnDef, RecordShape};
use crate::core::{Result, StoreError};
use rusqlite::{Connection, Row};
use std::collections::HashMap;
use tracing::{debug, info};

/// Represents a foreign key relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// The table this foreign key references
    pub referenced_table: String,
    /// The column in this table that is the foreign key
    pub from_column: String,
    /// The referenced column in the foreign table
    pub to_column: String,
}

/// A column as reported by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declared type name (e.g., "INTEGER", "TEXT")
    pub type_name: String,
    pub notnull: bool,
    pub pk: bool,
    pub dflt_value: Option<String>,
}

impl Column {
    fn from_table_info(row: &Row) -> rusqlite::Result<Self> {
        Ok(Column {
            name: row.get(0)?,
            type_name: row.get(1)?,
            notnull: row.get(2)?,
            dflt_value: row.get(3)?,
            pk: row.get::<_, i64>(4)? > 0,
        })
    }
}

/// Represents a database index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    /// Column names that make up this index
    pub columns: Vec<String>,
}

/// A table with its columns, indexes and foreign keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    fn from_database(conn: &Connection, table_name: &str) -> Result<Self> {
        Ok(Table {
            name: table_name.to_string(),
            columns: table_columns(conn, table_name)?,
            indexes: table_indexes(conn, table_name)?,
            foreign_keys: table_foreign_keys(conn, table_name)?,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Snapshot of every user table in a database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub tables: HashMap<String, Table>,
}

impl Schema {
    pub fn from_connection(conn: &Connection) -> Result<Self> {
        let mut tables = HashMap::new();

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for name in names {
            let table = Table::from_database(conn, &name)?;
            tables.insert(name, table);
        }

        Ok(Schema { tables })
    }
}

fn table_columns(conn: &Connection, table_name: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1)"#,
    )?;
    let columns = stmt
        .query_map([table_name], |row| Column::from_table_info(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn table_indexes(conn: &Connection, table_name: &str) -> Result<Vec<Index>> {
    let mut stmt = conn.prepare(r#"SELECT name, "unique" FROM pragma_index_list(?1)"#)?;
    let listed = stmt
        .query_map([table_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::with_capacity(listed.len());
    for (name, unique) in listed {
        let columns = info
            .query_map([&name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        indexes.push(Index {
            name,
            unique,
            columns,
        });
    }

    Ok(indexes)
}

fn table_foreign_keys(conn: &Connection, table_name: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?1)"#,
    )?;
    let keys = stmt
        .query_map([table_name], |row| {
            Ok(ForeignKey {
                referenced_table: row.get(0)?,
                from_column: row.get(1)?,
                to_column: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

fn column_sql(column: &ColumnDef, with_constraints: bool) -> String {
    let mut sql = format!("{} {}", quote_ident(column.name), column.sql_type.as_sql());
    if with_constraints {
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
    }
    if let Some(target) = column.references {
        sql.push_str(&format!(
            " REFERENCES {}({})",
            quote_ident(target.table),
            quote_ident(target.column)
        ));
    }
    sql
}

/// `CREATE TABLE IF NOT EXISTS` statement for a shape
pub fn create_table_sql(shape: &RecordShape) -> String {
    let mut parts: Vec<String> = shape.columns.iter().map(|c| column_sql(c, true)).collect();
    if !shape.primary_key.is_empty() {
        let keys: Vec<String> = shape.primary_key.iter().map(|k| quote_ident(k)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(shape.table),
        parts.join(", ")
    )
}

/// Creates missing tables and appends missing columns for every shape.
///
/// Runs inside one transaction so a failure leaves the schema untouched.
/// Appended columns carry their type and foreign reference only: SQLite
/// cannot add UNIQUE columns, or NOT NULL columns without a default, to a
/// populated table.
pub fn ensure_tables(conn: &mut Connection, shapes: &[&RecordShape]) -> Result<()> {
    let tables = || shapes.iter().map(|s| s.table).collect::<Vec<_>>().join(",");
    let tx = conn.transaction().map_err(|source| StoreError::Schema {
        table: tables(),
        source,
    })?;

    for shape in shapes {
        let schema_error = |source: rusqlite::Error| StoreError::Schema {
            table: shape.table.to_string(),
            source,
        };

        tx.execute(&create_table_sql(shape), [])
            .map_err(schema_error)?;
        debug!(table = shape.table, "Ensured table");

        let existing = table_columns(&tx, shape.table).map_err(|e| match e {
            StoreError::Database(source) => schema_error(source),
            other => other,
        })?;

        for column in shape.columns {
            if existing.iter().any(|c| c.name == column.name) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                quote_ident(shape.table),
                column_sql(column, false)
            );
            tx.execute(&sql, []).map_err(schema_error)?;
            info!(table = shape.table, column = column.name, "Added missing column");
        }
    }

    tx.commit().map_err(|source| StoreError::Schema {
        table: tables(),
        source,
    })
}
