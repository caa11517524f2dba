/// Database Module
///
/// The persistence engine, organized into focused submodules.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): owns the session, opens/closes it, syncs schema
/// - **Record Shapes** (`record.rs`): static table descriptions and the `Persistable` capability
/// - **Operations** (`operation.rs`): commands, condition maps, expressions and batches
/// - **Transaction Execution** (`transaction.rs`): applies a batch atomically
/// - **Query Execution** (`query.rs`): condition-driven retrieval with relation preloading
/// - **Schema Introspection** (`schema.rs`): table metadata and additive reconciliation
///
/// ## Error Handling
///
/// All operations return the standardized `StoreError` type.
pub mod connection;
pub mod operation;
pub mod query;
pub mod record;
pub mod schema;
pub mod transaction;

pub use connection::*;
pub use operation::*;
pub use query::*;
pub use record::*;
pub use schema::*;
pub use transaction::*;
