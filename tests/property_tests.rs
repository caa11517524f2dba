//! Property-based tests for batch atomicity, condition filtering and
//! additive schema reconciliation.

mod common;

#[cfg(test)]
mod tests {
    use super::common::{memory_store, Order, ORDERS};
    use proptest::prelude::*;
    use txbatch::{AtomicBatch, ConditionMap, QueryEngine, RecordShape, TransactionExecutor};

    fn arb_status() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("active".to_string()),
            Just("idle".to_string()),
            Just("closed".to_string())
        ]
    }

    fn seed_orders(statuses: &[String]) -> Vec<Order> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| Order::new(i as i64 + 1, &format!("ref-{}", i), status))
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// A filter returns exactly the stored rows whose column equals the value
        #[test]
        fn prop_condition_matches_exactly(
            statuses in prop::collection::vec(arb_status(), 0..20),
            wanted in arb_status(),
        ) {
            let handle = memory_store();
            let rows = seed_orders(&statuses);

            let mut batch = AtomicBatch::new();
            for row in &rows {
                batch = batch.create(row);
            }
            TransactionExecutor::new(&handle).execute(batch).unwrap();

            let found = QueryEngine::new(&handle)
                .find_where::<Order>(&ConditionMap::new().with("status", wanted.clone()), &[])
                .unwrap();

            let expected: Vec<Order> = rows.into_iter().filter(|o| o.status == wanted).collect();
            prop_assert_eq!(found, expected);
        }

        /// One failing operation anywhere in a batch discards the whole batch
        /// and is reported at its own position.
        #[test]
        fn prop_failed_batch_leaves_store_untouched(n in 1usize..12, pick in any::<prop::sample::Index>()) {
            let handle = memory_store();
            let rows = seed_orders(&vec!["active".to_string(); n]);

            // same primary key as the first row, fresh reference
            let clash = Order::new(1, "clash", "active");
            let k = pick.index(n) + 1;

            let mut batch = AtomicBatch::new();
            for (i, row) in rows.iter().enumerate() {
                if i == k {
                    batch = batch.create(&clash);
                }
                batch = batch.create(row);
            }
            if k == n {
                batch = batch.create(&clash);
            }

            let err = TransactionExecutor::new(&handle).execute(batch).unwrap_err();
            prop_assert!(err.is_constraint());
            prop_assert_eq!(err.operation_index(), Some(k));
            prop_assert!(QueryEngine::new(&handle).find_all::<Order>().unwrap().is_empty());
        }

        /// Reconciling a table created from a prefix of the columns appends
        /// the rest, in declaration order.
        #[test]
        fn prop_missing_columns_are_appended(width in 1usize..=4) {
            let handle = txbatch::ConnectionHandle::new(":memory:");
            handle.open().unwrap();

            let narrow = RecordShape {
                columns: &ORDERS.columns[..width],
                ..ORDERS
            };
            handle.ensure_schema(&[&narrow]).unwrap();
            handle.ensure_schema(&[&ORDERS]).unwrap();

            let schema = handle.schema().unwrap();
            let table = schema.tables.get("orders").unwrap();
            let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
            let declared: Vec<&str> = ORDERS.columns.iter().map(|c| c.name).collect();
            prop_assert_eq!(names, declared);
        }
    }
}
