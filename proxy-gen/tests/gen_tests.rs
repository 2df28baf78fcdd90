// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! End-to-end explain + generate scenarios against a mod-4 catalog:
//! `orders` sharded by `user_id % 4` over {ds0, ds1}, physical tables
//! orders_0..orders_3 (even tables on ds0, odd on ds1).

use proxy_analysis::SqlParser;
use proxy_catalog::Catalog;
use proxy_common::config::{Config, ShardingRuleConfig, StrategyKind, TableRuleConfig};
use proxy_explain::SqlExplain;
use proxy_gen::{generate_sql, SqlGenUsage};
use proxy_mysql::{BindVariable, Value};

fn shop_catalog() -> Catalog {
    let mut config = Config::default();
    config.schemas.push(ShardingRuleConfig {
        schema: "shop".to_string(),
        data_nodes: vec!["ds0".to_string(), "ds1".to_string()],
        tables: vec![
            TableRuleConfig {
                name: "orders".to_string(),
                shard_columns: vec!["user_id".to_string()],
                shard_count: 4,
                strategy: StrategyKind::Mod,
                range_bounds: Vec::new(),
            },
            TableRuleConfig {
                name: "events".to_string(),
                shard_columns: vec!["id".to_string()],
                shard_count: 3,
                strategy: StrategyKind::Range,
                range_bounds: vec![100, 200],
            },
        ],
    });
    Catalog::from_config(&config).unwrap()
}

fn explain(sql: &str) -> SqlExplain {
    let catalog = shop_catalog();
    let stmt = SqlParser::parse_one(sql).unwrap();
    SqlExplain::new(stmt, &catalog.snapshot(), Some("shop")).unwrap()
}

fn commands(sql: &str, binds: &[BindVariable]) -> Vec<(String, String)> {
    let explain = explain(sql);
    let result = generate_sql("ds0", &explain, binds).unwrap();
    assert_eq!(result.usage, SqlGenUsage::Shard);
    result
        .commands
        .into_iter()
        .map(|c| (c.data_source, c.sql))
        .collect()
}

#[test]
fn test_single_shard_equality() {
    let commands = commands("SELECT * FROM orders WHERE user_id = 7", &[]);
    assert_eq!(
        commands,
        vec![(
            "ds1".to_string(),
            "SELECT * FROM ds1.orders_3 WHERE user_id = 7".to_string()
        )]
    );
}

#[test]
fn test_single_shard_on_default_source_has_no_qualifier() {
    let commands = commands("SELECT * FROM orders WHERE user_id = 2", &[]);
    assert_eq!(
        commands,
        vec![(
            "ds0".to_string(),
            "SELECT * FROM orders_2 WHERE user_id = 2".to_string()
        )]
    );
}

#[test]
fn test_in_expansion_partitions_per_shard() {
    let commands = commands("SELECT * FROM orders WHERE user_id IN (1, 2, 5)", &[]);
    assert_eq!(
        commands,
        vec![
            (
                "ds0".to_string(),
                "SELECT * FROM orders_2 WHERE user_id IN (2)".to_string()
            ),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.orders_1 WHERE user_id IN (1, 5)".to_string()
            ),
        ]
    );
}

#[test]
fn test_broadcast_covers_all_shards_in_order() {
    let commands = commands("SELECT * FROM orders", &[]);
    assert_eq!(
        commands,
        vec![
            ("ds0".to_string(), "SELECT * FROM orders_0".to_string()),
            ("ds0".to_string(), "SELECT * FROM orders_2".to_string()),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.orders_1".to_string()
            ),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.orders_3".to_string()
            ),
        ]
    );
}

#[test]
fn test_limit_offset_rewrites_per_shard() {
    let commands = commands(
        "SELECT * FROM orders WHERE user_id IN (1, 2) LIMIT 10, 5",
        &[],
    );
    assert_eq!(
        commands,
        vec![
            (
                "ds0".to_string(),
                "SELECT * FROM orders_2 WHERE user_id IN (2) LIMIT 0, 15".to_string()
            ),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.orders_1 WHERE user_id IN (1) LIMIT 0, 15".to_string()
            ),
        ]
    );
}

#[test]
fn test_limit_without_offset_passes_through() {
    let commands = commands("SELECT * FROM orders WHERE user_id = 2 LIMIT 5", &[]);
    assert_eq!(commands[0].1, "SELECT * FROM orders_2 WHERE user_id = 2 LIMIT 5");
}

#[test]
fn test_raw_usage_for_unsharded_table() {
    let explain = explain("SELECT * FROM customers WHERE id = 1");
    let result = generate_sql("ds0", &explain, &[]).unwrap();
    assert_eq!(result.usage, SqlGenUsage::Raw);
    assert!(result.commands.is_empty());
}

#[test]
fn test_deferred_bind_variable_routes_at_generation() {
    let explain = explain("SELECT * FROM orders WHERE user_id = ?");
    assert!(explain.has_expressions());

    let binds = vec![BindVariable::from_value(Value::new_int64(7))];
    let result = generate_sql("ds0", &explain, &binds).unwrap();
    assert_eq!(result.commands.len(), 1);
    assert_eq!(result.commands[0].data_source, "ds1");
    assert_eq!(
        result.commands[0].sql,
        "SELECT * FROM ds1.orders_3 WHERE user_id = ?"
    );
    // The scalar bind is still needed by the shard SQL.
    assert_eq!(result.commands[0].bind_vars.len(), 1);
}

#[test]
fn test_list_bind_is_materialised_and_dropped() {
    let explain = explain("SELECT * FROM orders WHERE user_id IN (?)");
    let binds = vec![BindVariable::list(vec![
        Value::new_int64(1),
        Value::new_int64(2),
        Value::new_int64(5),
    ])];
    let result = generate_sql("ds0", &explain, &binds).unwrap();
    let rendered: Vec<(String, String)> = result
        .commands
        .iter()
        .map(|c| (c.data_source.clone(), c.sql.clone()))
        .collect();
    assert_eq!(
        rendered,
        vec![
            (
                "ds0".to_string(),
                "SELECT * FROM orders_2 WHERE user_id IN (2)".to_string()
            ),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.orders_1 WHERE user_id IN (1, 5)".to_string()
            ),
        ]
    );
    // The expanded bind was consumed by the partition.
    assert!(result.commands.iter().all(|c| c.bind_vars.is_empty()));
}

#[test]
fn test_or_of_equalities_unions_shards() {
    let commands = commands(
        "SELECT * FROM orders WHERE user_id = 1 OR user_id = 2",
        &[],
    );
    let sources: Vec<String> = commands.iter().map(|(ds, _)| ds.clone()).collect();
    assert_eq!(sources, vec!["ds0", "ds1"]);
}

#[test]
fn test_and_intersection_narrows_to_one_shard() {
    let commands = commands(
        "SELECT * FROM orders WHERE user_id IN (1, 2) AND user_id = 2",
        &[],
    );
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].0, "ds0");
}

#[test]
fn test_not_forces_full_fanout() {
    let commands = commands("SELECT * FROM orders WHERE NOT user_id = 7", &[]);
    assert_eq!(commands.len(), 4);
}

#[test]
fn test_between_on_range_table_clamps_bounds() {
    let commands = commands("SELECT * FROM events WHERE id BETWEEN 50 AND 150", &[]);
    assert_eq!(
        commands,
        vec![
            (
                "ds0".to_string(),
                "SELECT * FROM events_0 WHERE id BETWEEN 50 AND 99".to_string()
            ),
            (
                "ds1".to_string(),
                "SELECT * FROM ds1.events_1 WHERE id BETWEEN 100 AND 150".to_string()
            ),
        ]
    );
}

#[test]
fn test_between_on_mod_table_is_fanout_with_original_bounds() {
    let commands = commands("SELECT * FROM orders WHERE user_id BETWEEN 1 AND 3", &[]);
    assert_eq!(commands.len(), 4);
    assert!(commands[0].1.contains("BETWEEN 1 AND 3"));
}

#[test]
fn test_generation_determinism() {
    let first = commands("SELECT * FROM orders WHERE user_id IN (1, 2, 5, 7)", &[]);
    for _ in 0..3 {
        let again = commands("SELECT * FROM orders WHERE user_id IN (1, 2, 5, 7)", &[]);
        assert_eq!(again, first);
    }
    // Non-decreasing data source order.
    let sources: Vec<&String> = first.iter().map(|(ds, _)| ds).collect();
    let mut sorted = sources.clone();
    sorted.sort();
    assert_eq!(sources, sorted);
}

#[test]
fn test_update_and_delete_route_like_select() {
    let update_commands = commands("UPDATE orders SET amount = 5 WHERE user_id = 7", &[]);
    assert_eq!(
        update_commands,
        vec![(
            "ds1".to_string(),
            "UPDATE ds1.orders_3 SET amount = 5 WHERE user_id = 7".to_string()
        )]
    );

    let delete_commands = commands("DELETE FROM orders WHERE user_id = 2", &[]);
    assert_eq!(
        delete_commands,
        vec![(
            "ds0".to_string(),
            "DELETE FROM orders_2 WHERE user_id = 2".to_string()
        )]
    );
}

#[test]
fn test_single_row_insert_routes_to_one_shard() {
    let commands = commands("INSERT INTO orders (id, user_id) VALUES (9, 7)", &[]);
    assert_eq!(
        commands,
        vec![(
            "ds1".to_string(),
            "INSERT INTO ds1.orders_3 (id, user_id) VALUES (9, 7)".to_string()
        )]
    );
}

#[test]
fn test_multi_row_insert_into_sharded_table_is_rejected() {
    let catalog = shop_catalog();
    let stmt =
        SqlParser::parse_one("INSERT INTO orders (id, user_id) VALUES (1, 1), (2, 2)").unwrap();
    assert!(SqlExplain::new(stmt, &catalog.snapshot(), Some("shop")).is_err());
}

#[test]
fn test_qualified_column_rewrites_with_table() {
    let commands = commands(
        "SELECT orders.id FROM orders WHERE orders.user_id = 7",
        &[],
    );
    assert_eq!(
        commands[0].1,
        "SELECT orders_3.id FROM ds1.orders_3 WHERE orders_3.user_id = 7"
    );
}

#[test]
fn test_alias_qualifier_is_preserved() {
    let commands = commands("SELECT o.id FROM orders o WHERE o.user_id = 7", &[]);
    assert_eq!(
        commands[0].1,
        "SELECT o.id FROM ds1.orders_3 o WHERE o.user_id = 7"
    );
}

#[test]
fn test_runtime_next_is_idempotent_after_completion() {
    let explain = explain("SELECT * FROM orders WHERE user_id = 7");
    let values = explain.restore_sharding_values(&[]).unwrap();
    let mut runtime = proxy_gen::GenRuntime::new("ds0", &explain, &values, &[]);
    assert!(runtime.next());
    assert!(!runtime.next());
    assert!(!runtime.next());
}
