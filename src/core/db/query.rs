/// Query Engine Module
///
/// Condition-driven retrieval over any `Persistable` shape: unconditional
/// full-table reads, equality filters, and eager loading of named relations.
/// Rows come back in the store's native order.

use crate::core::db::connection::ConnectionHandle;
use crate::core::db::operation::ConditionMap;
use crate::core::db::record::{quote_ident, Persistable, RecordShape, Relation, RowMap};
use crate::core::{Result, StoreError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

/// Read-side service over a connection handle
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'h> {
    handle: &'h ConnectionHandle,
}

impl<'h> QueryEngine<'h> {
    pub fn new(handle: &'h ConnectionHandle) -> Self {
        QueryEngine { handle }
    }

    /// Retrieves every row of `T`'s table.
    ///
    /// An empty table yields an empty vector, not an error.
    pub fn find_all<T: Persistable>(&self) -> Result<Vec<T>> {
        self.find_where(&ConditionMap::new(), &[])
    }

    /// Retrieves the rows of `T`'s table matching every entry of `condition`.
    ///
    /// For each name in `preload`, the relation of that name declared on
    /// `T::SHAPE` is loaded for every matched row and handed to
    /// `Persistable::attach_related`.
    ///
    /// # Errors
    ///
    /// `StoreError::Query` for an unknown relation name (before any SQL runs),
    /// a malformed condition, or a row that cannot be decoded.
    pub fn find_where<T: Persistable>(
        &self,
        condition: &ConditionMap,
        preload: &[&str],
    ) -> Result<Vec<T>> {
        let shape = T::SHAPE;
        let relations = preload
            .iter()
            .map(|name| {
                shape.relation(name).ok_or_else(|| {
                    StoreError::Query(format!(
                        "`{}` has no relation named `{}`",
                        shape.table, name
                    ))
                })
            })
            .collect::<Result<Vec<&Relation>>>()?;

        self.handle.with_session(|conn| {
            let (sql, params) = select_sql(shape, condition);
            debug!(table = shape.table, %sql, "Running typed query");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::query("Failed to prepare statement", e))?;
            let mut records = stmt
                .query_map(params_from_iter(params.iter()), |row| T::from_row(row))
                .map_err(|e| StoreError::query("Query execution failed", e))?
                .collect::<rusqlite::Result<Vec<T>>>()
                .map_err(|e| StoreError::query("Result processing failed", e))?;

            for record in records.iter_mut() {
                if relations.is_empty() {
                    break;
                }
                let row = record.to_row();
                for relation in &relations {
                    let local = row
                        .iter()
                        .find(|(name, _)| *name == relation.local_key)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| {
                            StoreError::Query(format!(
                                "relation `{}` needs column `{}` on `{}`",
                                relation.name, relation.local_key, shape.table
                            ))
                        })?;
                    let related = load_related(conn, relation, local)?;
                    record.attach_related(relation.name, related)?;
                }
            }

            Ok(records)
        })
    }

    /// Untyped variant of `find_where` returning raw rows of `shape`.
    pub fn find_rows(&self, shape: &RecordShape, condition: &ConditionMap) -> Result<Vec<RowMap>> {
        self.handle.with_session(|conn| {
            let (sql, params) = select_sql(shape, condition);
            select_rows(conn, &sql, &params)
        })
    }
}

fn select_sql(shape: &RecordShape, condition: &ConditionMap) -> (String, Vec<Value>) {
    let mut sql = format!(
        "SELECT {} FROM {}",
        shape.column_list(),
        quote_ident(shape.table)
    );
    let (clause, params) = condition.to_where_clause();
    if !clause.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    (sql, params)
}

fn load_related(conn: &Connection, relation: &Relation, local: Value) -> Result<Vec<RowMap>> {
    // NULL never equals a foreign key
    if local == Value::Null {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?",
        quote_ident(relation.table),
        quote_ident(relation.foreign_key)
    );
    select_rows(conn, &sql, &[local])
}

/// Runs a SELECT and collects every row keyed by column name.
fn select_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<RowMap>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::query("Failed to prepare statement", e))?;

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut values = RowMap::new();
            for (i, name) in columns.iter().enumerate() {
                values.insert(name.clone(), row.get::<_, Value>(i)?);
            }
            Ok(values)
        })
        .map_err(|e| StoreError::query("Query execution failed", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| StoreError::query("Result processing failed", e))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::operation::AtomicBatch;
    use crate::core::db::transaction::TransactionExecutor;
    use crate::test_utils::{open_store, Account, Post, ACCOUNTS};

    fn seed(handle: &ConnectionHandle) {
        let accounts = [
            Account::new(Some(1), "alice@example.com", "alice", "active"),
            Account::new(Some(2), "bob@example.com", "bob", "idle"),
            Account::new(Some(3), "carol@example.com", "carol", "active"),
        ];
        let posts = [
            Post::new(Some(1), 1, "Welcome to Rust"),
            Post::new(Some(2), 3, "My Trip to Paris"),
            Post::new(Some(3), 1, "Building Terminal UIs"),
        ];

        let mut batch = AtomicBatch::new();
        for account in &accounts {
            batch = batch.create(account);
        }
        for post in &posts {
            batch = batch.create(post);
        }
        TransactionExecutor::new(handle).execute(batch).unwrap();
    }

    #[test]
    fn test_find_all() {
        let handle = open_store();
        let engine = QueryEngine::new(&handle);
        assert!(engine.find_all::<Account>().unwrap().is_empty());

        seed(&handle);
        let all = engine.find_all::<Account>().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "alice");
    }

    #[test]
    fn test_find_where_equality() {
        let handle = open_store();
        seed(&handle);
        let engine = QueryEngine::new(&handle);

        let active = engine
            .find_where::<Account>(&ConditionMap::new().with("status", "active".to_string()), &[])
            .unwrap();
        let names: Vec<&str> = active.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);

        let both = engine
            .find_where::<Account>(
                &ConditionMap::new()
                    .with("status", "active".to_string())
                    .with("name", "carol".to_string()),
                &[],
            )
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].id, Some(3));

        let none = engine
            .find_where::<Account>(&ConditionMap::new().with("status", "closed".to_string()), &[])
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_empty_condition_matches_find_all() {
        let handle = open_store();
        seed(&handle);
        let engine = QueryEngine::new(&handle);

        let all = engine.find_all::<Account>().unwrap();
        let unfiltered = engine.find_where::<Account>(&ConditionMap::new(), &[]).unwrap();
        assert_eq!(all, unfiltered);
    }

    #[test]
    fn test_preload_relation() {
        let handle = open_store();
        seed(&handle);
        let engine = QueryEngine::new(&handle);

        let accounts = engine
            .find_where::<Account>(&ConditionMap::new(), &["posts"])
            .unwrap();

        assert_eq!(accounts[0].posts.len(), 2);
        assert_eq!(accounts[0].posts[1].title, "Building Terminal UIs");
        assert!(accounts[1].posts.is_empty());
        assert_eq!(accounts[2].posts.len(), 1);
    }

    #[test]
    fn test_unknown_preload_is_rejected() {
        let handle = open_store();
        let engine = QueryEngine::new(&handle);

        match engine.find_where::<Account>(&ConditionMap::new(), &["comments"]) {
            Err(StoreError::Query(msg)) => assert!(msg.contains("comments")),
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_condition_column() {
        let handle = open_store();
        let engine = QueryEngine::new(&handle);

        match engine.find_where::<Account>(&ConditionMap::new().with("nope", 1i64), &[]) {
            Err(StoreError::Query(msg)) => assert!(msg.contains("no such column"), "{}", msg),
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[test]
    fn test_find_rows_untyped() {
        let handle = open_store();
        seed(&handle);
        let engine = QueryEngine::new(&handle);

        let rows = engine
            .find_rows(&ACCOUNTS, &ConditionMap::new().with("id", 2i64))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email"), Some(&Value::Text("bob@example.com".to_string())));
    }

    #[test]
    fn test_unopened_handle() {
        let handle = ConnectionHandle::new(":memory:");
        let engine = QueryEngine::new(&handle);
        assert!(matches!(engine.find_all::<Account>(), Err(StoreError::NotOpen)));
    }
}
