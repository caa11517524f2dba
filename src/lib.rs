// Core infrastructure modules
pub mod core;

// Ambient services
pub mod config;
pub mod logging;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{
    expr, AtomicBatch, ColumnDef, Command, ConditionMap, ConnectionHandle, Expression, Operation,
    Persistable, QueryCanceller, QueryEngine, Record, RecordShape, Relation, RowMap, SqlType,
    TransactionExecutor,
};
pub use crate::core::{Result, StoreError};
