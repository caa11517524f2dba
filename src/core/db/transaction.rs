/// Transaction Executor Module
///
/// Applies an `AtomicBatch` as one SQLite transaction. Operations run in
/// batch order, each one sees the effects of those before it, and the first
/// failure rolls the whole batch back.

use crate::core::db::connection::ConnectionHandle;
use crate::core::db::operation::{AtomicBatch, Command, ConditionMap, Expression};
use crate::core::db::record::{quote_ident, Record, RecordShape};
use crate::core::{Result, StoreError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Transaction, TransactionBehavior};
use tracing::{debug, error, warn};

/// Executes batches against one connection handle
#[derive(Debug, Clone, Copy)]
pub struct TransactionExecutor<'h> {
    handle: &'h ConnectionHandle,
}

impl<'h> TransactionExecutor<'h> {
    pub fn new(handle: &'h ConnectionHandle) -> Self {
        TransactionExecutor { handle }
    }

    /// Applies every operation of `batch` atomically.
    ///
    /// The transaction is started with `BEGIN IMMEDIATE`, so the write lock is
    /// taken before the first operation runs.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotOpen` if the handle has no session
    /// - `StoreError::Transaction` if the transaction cannot be started
    /// - `StoreError::Operation` carrying the index and command of the first
    ///   failing operation; nothing from the batch is persisted
    /// - `StoreError::CommitIndeterminate` if every operation succeeded but
    ///   COMMIT failed
    pub fn execute(&self, batch: AtomicBatch<'_>) -> Result<()> {
        let size = batch.len();
        self.handle.with_session(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| StoreError::Transaction(format!("failed to begin transaction: {}", e)))?;

            for (index, operation) in batch.into_iter().enumerate() {
                let (command, target, filter, expression) = operation.into_parts();
                let table = target.shape().table;

                let outcome = match command {
                    Command::Create => create(&tx, target),
                    Command::Upsert => upsert(&tx, target),
                    Command::Update => update(&tx, target.shape(), filter, expression),
                    Command::Delete => delete(&tx, target, filter),
                };

                match outcome {
                    Ok(affected) => {
                        debug!(index, %command, table, affected, "Applied operation");
                    }
                    Err(source) => {
                        error!(index, %command, table, error = %source, "Failed to perform operation");
                        if let Err(e) = tx.rollback() {
                            warn!(error = %e, "Rollback after failed operation reported an error");
                        }
                        return Err(StoreError::Operation {
                            index,
                            command,
                            source: Box::new(source),
                        });
                    }
                }
            }

            tx.commit().map_err(|e| {
                error!(error = %e, operations = size, "Commit failed after all operations succeeded");
                StoreError::CommitIndeterminate(e)
            })?;
            debug!(operations = size, "Committed batch");
            Ok(())
        })
    }
}

fn run(tx: &Transaction<'_>, sql: &str, params: &[Value]) -> Result<usize> {
    tx.execute(sql, params_from_iter(params.iter()))
        .map_err(StoreError::from_driver)
}

/// Columns and values of an INSERT. Primary key columns holding `Null` are
/// left out so SQLite assigns them.
fn insert_parts(shape: &RecordShape, row: Vec<(&'static str, Value)>) -> (Vec<&'static str>, Vec<Value>) {
    row.into_iter()
        .filter(|(name, value)| !(shape.is_key(name) && *value == Value::Null))
        .unzip()
}

fn insert_sql(shape: &RecordShape, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(shape.table));
    }
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let slots = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(shape.table),
        names.join(", "),
        slots
    )
}

fn create(tx: &Transaction<'_>, target: &dyn Record) -> Result<usize> {
    let shape = target.shape();
    let (columns, values) = insert_parts(shape, target.row());
    run(tx, &insert_sql(shape, &columns), &values)
}

fn upsert(tx: &Transaction<'_>, target: &dyn Record) -> Result<usize> {
    let shape = target.shape();
    if shape.primary_key.is_empty() {
        return Err(StoreError::Query(format!(
            "upsert into `{}` requires a primary key",
            shape.table
        )));
    }
    // Without a full key there is nothing to conflict on.
    if target.identity().iter().any(|(_, v)| *v == Value::Null) {
        return create(tx, target);
    }

    let (columns, values) = insert_parts(shape, target.row());
    let keys: Vec<String> = shape.primary_key.iter().map(|k| quote_ident(k)).collect();
    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| !shape.is_key(c))
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect();

    let action = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };
    let sql = format!(
        "{} ON CONFLICT ({}) {}",
        insert_sql(shape, &columns),
        keys.join(", "),
        action
    );
    run(tx, &sql, &values)
}

fn update(
    tx: &Transaction<'_>,
    shape: &RecordShape,
    filter: Option<ConditionMap>,
    expression: Option<Expression>,
) -> Result<usize> {
    let expression = expression.ok_or_else(|| {
        StoreError::Query(format!("update of `{}` requires an expression", shape.table))
    })?;
    let filter = filter.filter(|f| !f.is_empty()).ok_or_else(|| {
        StoreError::Query(format!(
            "update of `{}` requires a non-empty filter",
            shape.table
        ))
    })?;

    let (column, value) = expression.into_parts();
    let (clause, filter_params) = filter.to_where_clause();
    let sql = format!(
        "UPDATE {} SET {} = ? WHERE {}",
        quote_ident(shape.table),
        quote_ident(&column),
        clause
    );

    let mut params = Vec::with_capacity(filter_params.len() + 1);
    params.push(value);
    params.extend(filter_params);
    run(tx, &sql, &params)
}

fn delete(tx: &Transaction<'_>, target: &dyn Record, filter: Option<ConditionMap>) -> Result<usize> {
    let shape = target.shape();
    let filter = match filter {
        Some(filter) if filter.is_empty() => {
            return Err(StoreError::Query(format!(
                "delete from `{}` requires a non-empty filter",
                shape.table
            )));
        }
        Some(filter) => filter,
        None => {
            let identity = target.identity();
            if identity.is_empty() || identity.iter().any(|(_, v)| *v == Value::Null) {
                return Err(StoreError::Query(format!(
                    "delete from `{}` requires a target with a primary key value",
                    shape.table
                )));
            }
            identity.into_iter().collect()
        }
    };

    let (clause, params) = filter.to_where_clause();
    let sql = format!("DELETE FROM {} WHERE {}", quote_ident(shape.table), clause);
    run(tx, &sql, &params)
}
