/// Operation Module
///
/// The unit-of-work types consumed by the transaction executor: command
/// kinds, equality condition maps, single-column update expressions and the
/// ordered batch that carries them.

use crate::core::db::record::{quote_ident, Record};
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The persistence action an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Insert the target as a new row
    Create,
    /// Insert the target, or replace the row with the same primary key
    Upsert,
    /// Assign one column on the rows matching a filter
    Update,
    /// Remove the target's row, or the rows matching a filter
    Delete,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Upsert => "upsert",
            Command::Update => "update",
            Command::Delete => "delete",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column name to equality value. All entries must match (implicit AND).
///
/// A `Null` value matches SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionMap(BTreeMap<String, Value>);

impl ConditionMap {
    pub fn new() -> Self {
        ConditionMap(BTreeMap::new())
    }

    /// Builder form of `insert`
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Sets the value for `column`, replacing any previous one.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Renders the conditions as a WHERE body with positional parameters.
    ///
    /// Returns an empty clause for an empty map.
    pub(crate) fn to_where_clause(&self) -> (String, Vec<Value>) {
        let mut terms = Vec::with_capacity(self.0.len());
        let mut params = Vec::with_capacity(self.0.len());

        for (column, value) in &self.0 {
            if let Value::Null = value {
                terms.push(format!("{} IS NULL", quote_ident(column)));
            } else {
                terms.push(format!("{} = ?", quote_ident(column)));
                params.push(value.clone());
            }
        }

        (terms.join(" AND "), params)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConditionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ConditionMap::new();
        for (column, value) in iter {
            map.insert(column, value);
        }
        map
    }
}

/// A single column assignment used by update operations
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    column: String,
    value: Value,
}

impl Expression {
    /// Builds an assignment of `value` to `column`.
    ///
    /// The column is not checked against any schema here; an unknown column
    /// fails when the update runs.
    pub fn build(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Expression {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_parts(self) -> (String, Value) {
        (self.column, self.value)
    }
}

/// Shorthand for `Expression::build`
pub fn expr(column: impl Into<String>, value: impl Into<Value>) -> Expression {
    Expression::build(column, value)
}

/// One persistence action against a caller-owned record
pub struct Operation<'a> {
    command: Command,
    target: &'a dyn Record,
    filter: Option<ConditionMap>,
    expression: Option<Expression>,
}

impl<'a> Operation<'a> {
    pub fn new(command: Command, target: &'a dyn Record) -> Self {
        Operation {
            command,
            target,
            filter: None,
            expression: None,
        }
    }

    pub fn create(target: &'a dyn Record) -> Self {
        Operation::new(Command::Create, target)
    }

    pub fn upsert(target: &'a dyn Record) -> Self {
        Operation::new(Command::Upsert, target)
    }

    /// Sets `expression` on every row of the target's table matching `filter`.
    pub fn update(target: &'a dyn Record, filter: ConditionMap, expression: Expression) -> Self {
        Operation::new(Command::Update, target)
            .with_filter(filter)
            .with_expression(expression)
    }

    /// Deletes the row identified by the target's primary key.
    pub fn delete(target: &'a dyn Record) -> Self {
        Operation::new(Command::Delete, target)
    }

    /// Deletes every row of the target's table matching `filter`.
    pub fn delete_where(target: &'a dyn Record, filter: ConditionMap) -> Self {
        Operation::new(Command::Delete, target).with_filter(filter)
    }

    pub fn with_filter(mut self, filter: ConditionMap) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn target(&self) -> &'a dyn Record {
        self.target
    }

    pub fn filter(&self) -> Option<&ConditionMap> {
        self.filter.as_ref()
    }

    pub fn expression(&self) -> Option<&Expression> {
        self.expression.as_ref()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Command, &'a dyn Record, Option<ConditionMap>, Option<Expression>) {
        (self.command, self.target, self.filter, self.expression)
    }
}

impl fmt::Debug for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("command", &self.command)
            .field("table", &self.target.shape().table)
            .field("filter", &self.filter)
            .field("expression", &self.expression)
            .finish()
    }
}

/// An ordered list of operations applied as one transaction
#[derive(Debug, Default)]
pub struct AtomicBatch<'a> {
    operations: Vec<Operation<'a>>,
}

impl<'a> AtomicBatch<'a> {
    pub fn new() -> Self {
        AtomicBatch {
            operations: Vec::new(),
        }
    }

    pub fn push(&mut self, operation: Operation<'a>) {
        self.operations.push(operation);
    }

    pub fn create(mut self, target: &'a dyn Record) -> Self {
        self.push(Operation::create(target));
        self
    }

    pub fn upsert(mut self, target: &'a dyn Record) -> Self {
        self.push(Operation::upsert(target));
        self
    }

    pub fn update(
        mut self,
        target: &'a dyn Record,
        filter: ConditionMap,
        expression: Expression,
    ) -> Self {
        self.push(Operation::update(target, filter, expression));
        self
    }

    pub fn delete(mut self, target: &'a dyn Record) -> Self {
        self.push(Operation::delete(target));
        self
    }

    pub fn delete_where(mut self, target: &'a dyn Record, filter: ConditionMap) -> Self {
        self.push(Operation::delete_where(target, filter));
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation<'a>> {
        self.operations.iter()
    }
}

impl<'a> From<Vec<Operation<'a>>> for AtomicBatch<'a> {
    fn from(operations: Vec<Operation<'a>>) -> Self {
        AtomicBatch { operations }
    }
}

impl<'a> IntoIterator for AtomicBatch<'a> {
    type Item = Operation<'a>;
    type IntoIter = std::vec::IntoIter<Operation<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}
