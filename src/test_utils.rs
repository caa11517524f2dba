/// # Test Utilities Module
///
/// Shared fixtures for the unit tests: two related record types and an
/// opened in-memory store with their tables in place.

use crate::core::db::{
    decode, ColumnDef, ConnectionHandle, Persistable, RecordShape, Relation, RowMap, SqlType,
};
use crate::core::{Result, StoreError};
use rusqlite::types::Value;
use rusqlite::Row;

pub const ACCOUNTS: RecordShape = RecordShape {
    table: "accounts",
    columns: &[
        ColumnDef::new("id", SqlType::Integer),
        ColumnDef::new("email", SqlType::Text).not_null().unique(),
        ColumnDef::new("name", SqlType::Text).not_null(),
        ColumnDef::new("status", SqlType::Text).not_null(),
    ],
    primary_key: &["id"],
    relations: &[Relation {
        name: "posts",
        table: "posts",
        foreign_key: "account_id",
        local_key: "id",
    }],
};

pub const POSTS: RecordShape = RecordShape {
    table: "posts",
    columns: &[
        ColumnDef::new("id", SqlType::Integer),
        ColumnDef::new("account_id", SqlType::Integer)
            .not_null()
            .references("accounts", "id"),
        ColumnDef::new("title", SqlType::Text).not_null(),
    ],
    primary_key: &["id"],
    relations: &[],
};

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Option<i64>,
    pub email: String,
    pub name: String,
    pub status: String,
    pub posts: Vec<Post>,
}

impl Account {
    pub fn new(id: Option<i64>, email: &str, name: &str, status: &str) -> Self {
        Account {
            id,
            email: email.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            posts: Vec::new(),
        }
    }
}

impl Persistable for Account {
    const SHAPE: &'static RecordShape = &ACCOUNTS;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("email", self.email.clone().into()),
            ("name", self.name.clone().into()),
            ("status", self.status.clone().into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Account {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            status: row.get("status")?,
            posts: Vec::new(),
        })
    }

    fn attach_related(&mut self, relation: &str, rows: Vec<RowMap>) -> Result<()> {
        match relation {
            "posts" => {
                self.posts = rows.iter().map(Post::from_row_map).collect::<Result<_>>()?;
                Ok(())
            }
            other => Err(StoreError::Query(format!("unknown relation `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: Option<i64>,
    pub account_id: i64,
    pub title: String,
}

impl Post {
    pub fn new(id: Option<i64>, account_id: i64, title: &str) -> Self {
        Post {
            id,
            account_id,
            title: title.to_string(),
        }
    }

    fn from_row_map(row: &RowMap) -> Result<Self> {
        Ok(Post {
            id: decode(row, "id")?,
            account_id: decode(row, "account_id")?,
            title: decode(row, "title")?,
        })
    }
}

impl Persistable for Post {
    const SHAPE: &'static RecordShape = &POSTS;

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("account_id", self.account_id.into()),
            ("title", self.title.clone().into()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            title: row.get("title")?,
        })
    }
}

/// An opened in-memory store with the fixture tables created
pub fn open_store() -> ConnectionHandle {
    let handle = ConnectionHandle::new(":memory:");
    handle.open().unwrap();
    handle.ensure_schema(&[&ACCOUNTS, &POSTS]).unwrap();
    handle
}
