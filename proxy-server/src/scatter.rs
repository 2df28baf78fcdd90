// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Scatter execution and result reduction
//!
//! Commands fan out concurrently; the first backend failure cancels the
//! rest and surfaces alone. The reducer merges shard result sets in
//! shard-index order, or by k-way merge on the statement's ORDER BY
//! columns, then applies the proxy-side offset drop for rewritten limits.

use crate::dispatcher::{BackendDispatcher, CancelFlag};
use futures::future::join_all;
use proxy_common::Result;
use proxy_explain::LimitLookup;
use proxy_gen::ScatterCommand;
use proxy_mysql::resultset::{QueryResult, ResultSet};
use proxy_mysql::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Runs every command concurrently. Results come back in command order; a
/// failure cancels outstanding work and returns the first error in that
/// order.
pub async fn execute_scatter(
    dispatcher: Arc<dyn BackendDispatcher>,
    commands: &[ScatterCommand],
    cancel: &CancelFlag,
) -> Result<Vec<QueryResult>> {
    cancel.check()?;
    debug!(targets = commands.len(), "scattering command");

    let futures = commands.iter().map(|command| {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move {
            dispatcher
                .dispatch(&command.data_source, &command.sql, &command.bind_vars, &cancel)
                .await
        }
    });

    let outcomes = join_all(futures).await;
    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        }
    }
    Ok(results)
}

/// Merges per-shard results into one client response.
pub fn reduce_results(
    results: Vec<QueryResult>,
    order_by: &[(String, bool)],
    limit: LimitLookup,
) -> Result<QueryResult> {
    let mut affected_rows = 0u64;
    let mut last_insert_id = 0u64;
    let mut result_sets: Vec<ResultSet> = Vec::new();

    for result in results {
        match result {
            QueryResult::Ok {
                affected_rows: rows,
                last_insert_id: id,
            } => {
                affected_rows += rows;
                last_insert_id = last_insert_id.max(id);
            }
            QueryResult::ResultSet(rs) => result_sets.push(rs),
        }
    }

    if result_sets.is_empty() {
        return Ok(QueryResult::Ok {
            affected_rows,
            last_insert_id,
        });
    }

    let fields = result_sets[0].fields.clone();
    let mut merged = if order_by.is_empty() {
        let mut merged = ResultSet::new(fields);
        for rs in result_sets {
            merged.rows.extend(rs.rows);
        }
        merged
    } else {
        k_way_merge(result_sets, order_by)?
    };

    // The per-shard SQL carried LIMIT 0, offset+count; the merged stream
    // drops the offset here.
    if limit.has_limit && limit.has_offset {
        let offset = limit.offset.min(merged.rows.len() as u64) as usize;
        merged.rows.drain(..offset);
        merged.rows.truncate(limit.count as usize);
    }
    Ok(QueryResult::ResultSet(merged))
}

/// Merges shard-locally sorted result sets on the ORDER BY key columns.
fn k_way_merge(result_sets: Vec<ResultSet>, order_by: &[(String, bool)]) -> Result<ResultSet> {
    let fields = result_sets[0].fields.clone();
    let keys: Vec<(usize, bool)> = order_by
        .iter()
        .filter_map(|(column, asc)| {
            fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(column))
                .map(|index| (index, *asc))
        })
        .collect();
    if keys.is_empty() {
        let mut merged = ResultSet::new(fields);
        for rs in result_sets {
            merged.rows.extend(rs.rows);
        }
        return Ok(merged);
    }

    let mut sources: Vec<std::vec::IntoIter<Vec<Value>>> = result_sets
        .into_iter()
        .map(|rs| rs.rows.into_iter())
        .collect();
    let mut heads: Vec<Option<Vec<Value>>> = sources.iter_mut().map(|s| s.next()).collect();

    let mut merged = ResultSet::new(fields);
    loop {
        let mut best: Option<usize> = None;
        for (i, head) in heads.iter().enumerate() {
            let Some(row) = head else { continue };
            match best {
                None => best = Some(i),
                Some(b) => {
                    let current = heads[b].as_ref().expect("best head present");
                    if compare_rows(row, current, &keys) == Ordering::Less {
                        best = Some(i);
                    }
                }
            }
        }
        let Some(best) = best else { break };
        let row = heads[best].take().expect("selected head present");
        merged.rows.push(row);
        heads[best] = sources[best].next();
    }
    Ok(merged)
}

fn compare_rows(a: &[Value], b: &[Value], keys: &[(usize, bool)]) -> Ordering {
    for &(index, asc) in keys {
        let ordering = compare_values(&a[index], &b[index]);
        let ordering = if asc { ordering } else { ordering.reverse() };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Numeric comparison when both sides are numbers, byte comparison
/// otherwise. NULL sorts first, the MySQL way.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    if let (Ok(x), Ok(y)) = (a.to_f64(), b.to_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.raw().cmp(b.raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::MockDispatcher;
    use proxy_common::ProxyError;
    use proxy_mysql::resultset::Field;
    use proxy_mysql::MySqlType;

    fn command(ds: &str, sql: &str) -> ScatterCommand {
        ScatterCommand {
            data_source: ds.to_string(),
            sql: sql.to_string(),
            bind_vars: Vec::new(),
        }
    }

    fn int_rows(fields: &[&str], rows: &[&[i64]]) -> ResultSet {
        let mut rs = ResultSet::new(
            fields
                .iter()
                .map(|f| Field::new(f.to_string(), MySqlType::Int64))
                .collect(),
        );
        for row in rows {
            rs.add_row(row.iter().map(|&v| Value::new_int64(v)).collect());
        }
        rs
    }

    #[tokio::test]
    async fn test_scatter_collects_in_command_order() {
        let mock = Arc::new(MockDispatcher::new());
        mock.respond("ds0", QueryResult::ResultSet(int_rows(&["id"], &[&[1]])));
        mock.respond("ds1", QueryResult::ResultSet(int_rows(&["id"], &[&[2]])));

        let commands = vec![command("ds0", "a"), command("ds1", "b")];
        let results = execute_scatter(mock.clone(), &commands, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0],
            QueryResult::ResultSet(int_rows(&["id"], &[&[1]]))
        );
    }

    #[tokio::test]
    async fn test_scatter_failure_cancels_and_surfaces() {
        let mock = Arc::new(MockDispatcher::new());
        mock.fail("ds1", 1146, "table gone");
        let cancel = CancelFlag::new();
        let commands = vec![command("ds0", "a"), command("ds1", "b")];
        let err = execute_scatter(mock, &commands, &cancel).await.unwrap_err();
        assert!(matches!(err, ProxyError::BackendFailure { code: 1146, .. }));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_reduce_ok_sums_affected_rows() {
        let merged = reduce_results(
            vec![
                QueryResult::Ok {
                    affected_rows: 2,
                    last_insert_id: 5,
                },
                QueryResult::Ok {
                    affected_rows: 3,
                    last_insert_id: 9,
                },
            ],
            &[],
            LimitLookup::default(),
        )
        .unwrap();
        assert_eq!(
            merged,
            QueryResult::Ok {
                affected_rows: 5,
                last_insert_id: 9
            }
        );
    }

    #[test]
    fn test_reduce_concatenates_in_shard_order() {
        let merged = reduce_results(
            vec![
                QueryResult::ResultSet(int_rows(&["id"], &[&[3], &[1]])),
                QueryResult::ResultSet(int_rows(&["id"], &[&[2]])),
            ],
            &[],
            LimitLookup::default(),
        )
        .unwrap();
        let QueryResult::ResultSet(rs) = merged else {
            panic!("expected result set");
        };
        let ids: Vec<i64> = rs.rows.iter().map(|r| r[0].to_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_reduce_orders_with_k_way_merge() {
        let merged = reduce_results(
            vec![
                QueryResult::ResultSet(int_rows(&["id"], &[&[1], &[4], &[9]])),
                QueryResult::ResultSet(int_rows(&["id"], &[&[2], &[3], &[10]])),
            ],
            &[("id".to_string(), true)],
            LimitLookup::default(),
        )
        .unwrap();
        let QueryResult::ResultSet(rs) = merged else {
            panic!("expected result set");
        };
        let ids: Vec<i64> = rs.rows.iter().map(|r| r[0].to_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn test_reduce_descending_merge() {
        let merged = reduce_results(
            vec![
                QueryResult::ResultSet(int_rows(&["id"], &[&[9], &[4]])),
                QueryResult::ResultSet(int_rows(&["id"], &[&[10], &[2]])),
            ],
            &[("id".to_string(), false)],
            LimitLookup::default(),
        )
        .unwrap();
        let QueryResult::ResultSet(rs) = merged else {
            panic!("expected result set");
        };
        let ids: Vec<i64> = rs.rows.iter().map(|r| r[0].to_i64().unwrap()).collect();
        assert_eq!(ids, vec![10, 9, 4, 2]);
    }

    #[test]
    fn test_reduce_drops_offset_of_merged_stream() {
        let merged = reduce_results(
            vec![
                QueryResult::ResultSet(int_rows(&["id"], &[&[1], &[3], &[5], &[7]])),
                QueryResult::ResultSet(int_rows(&["id"], &[&[2], &[4], &[6], &[8]])),
            ],
            &[("id".to_string(), true)],
            LimitLookup {
                has_limit: true,
                has_offset: true,
                offset: 3,
                count: 2,
            },
        )
        .unwrap();
        let QueryResult::ResultSet(rs) = merged else {
            panic!("expected result set");
        };
        let ids: Vec<i64> = rs.rows.iter().map(|r| r[0].to_i64().unwrap()).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(
            compare_values(&Value::NULL, &Value::new_int64(1)),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::new_varchar("a"), &Value::new_varchar("b")),
            Ordering::Less
        );
        assert_eq!(
            compare_values(&Value::new_int64(10), &Value::new_int64(9)),
            Ordering::Greater
        );
    }
}
