//! End-to-end windowed aggregation through running flows.
//!
//! Ticks are disabled so the emitted rows depend only on event time.

use rivulet_core::{BinOp, Expr, FieldDescriptor, Schema, SchemaRef, Type, Value};
use rivulet_runtime::{
    AggregateSpec, FilterNode, FlowBuilder, MemoryBuffers, MemoryOutputNode, MemorySession,
    MemorySource, OutputNode, ProjectNode, Projection, Record, RuntimeConfig, SinkBindings,
    SymbolTable, WindowedAggregateNode, WindowedAggregator, WindowedQuery,
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> RuntimeConfig {
    RuntimeConfig {
        tick_interval_ms: 0,
        ..Default::default()
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        FieldDescriptor::new("a", Type::Int),
        FieldDescriptor::new("b", Type::Int),
    ]))
}

fn one_second() -> WindowedQuery {
    WindowedQuery::new(Duration::from_secs(1))
}

/// Run `query` over `rows` (`"a,b"` text) and collect its output.
async fn run_query(query: WindowedQuery, rows: &[(i64, &str)]) -> Vec<Record> {
    let config = config();
    let source = MemorySource::from_text_rows("input", schema(), ',', rows.iter().copied())
        .expect("source");
    let aggregator =
        WindowedAggregator::new("agg", &schema(), query, config.aggregator_settings())
            .expect("aggregator");

    let buffers = MemoryBuffers::new();
    let mut flow = FlowBuilder::new(&config);
    let src = flow.add_source(source);
    let agg = flow.add_node(WindowedAggregateNode::new(aggregator, config.tick_interval()));
    let out = flow.add_node(MemoryOutputNode::new("out", &buffers, "results"));
    flow.chain(&[src, agg, out]);
    flow.start().expect("start").join().await.expect("join");

    buffers.buffer("results").records()
}

fn column(rows: &[Record], name: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}

fn longs(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Long(v)).collect()
}

fn count_b() -> WindowedQuery {
    one_second().aggregate(AggregateSpec::count(Expr::field("b"), "c"))
}

// =============================================================================
// Window boundaries
// =============================================================================

#[tokio::test]
async fn test_close_arrivals_coalesce() {
    let rows = run_query(count_b(), &[(35, "0,10"), (36, "0,11"), (200, "0,12")]).await;
    assert_eq!(column(&rows, "c"), longs(&[2, 3]));
    assert_eq!(rows[0].timestamp(), 36);
    assert_eq!(rows[1].timestamp(), 200);
}

#[tokio::test]
async fn test_eviction_at_one_second() {
    let rows = run_query(count_b(), &[(0, "0,1"), (999, "0,1"), (2000, "0,1")]).await;
    assert_eq!(column(&rows, "c"), longs(&[1, 2, 1]));
}

#[tokio::test]
async fn test_lower_bound_is_exclusive() {
    let rows = run_query(count_b(), &[(0, "0,1"), (990, "0,1"), (1990, "0,1")]).await;
    assert_eq!(column(&rows, "c"), longs(&[1, 2, 1]));

    let rows = run_query(count_b(), &[(0, "0,1"), (990, "0,1"), (1989, "0,1")]).await;
    assert_eq!(column(&rows, "c"), longs(&[1, 2, 2]));
}

#[tokio::test]
async fn test_boundary_sets() {
    let cases: [(&[i64], &[i64]); 3] = [
        (&[0, 1000, 2000], &[1, 1, 1]),
        (&[0, 500, 1500], &[1, 2, 1]),
        (&[0, 500, 1499], &[1, 2, 2]),
    ];
    for (timestamps, expected) in cases {
        let input: Vec<(i64, &str)> = timestamps.iter().map(|&ts| (ts, "0,1")).collect();
        let rows = run_query(count_b(), &input).await;
        assert_eq!(column(&rows, "c"), longs(expected), "timestamps {:?}", timestamps);
    }
}

#[tokio::test]
async fn test_late_event_is_ignored() {
    let rows = run_query(count_b(), &[(0, "0,1"), (2000, "0,1"), (500, "0,1")]).await;
    assert_eq!(column(&rows, "c"), longs(&[1, 1]));
}

// =============================================================================
// Grouping and HAVING
// =============================================================================

#[tokio::test]
async fn test_group_rows_in_first_seen_order() {
    let query = one_second()
        .group_by(Projection::field("a"))
        .aggregate(AggregateSpec::sum(Expr::field("b"), "c"));
    let rows = run_query(
        query,
        &[(35, "0,10"), (36, "1,11"), (37, "1,9"), (200, "0,12")],
    )
    .await;

    let seen: Vec<Vec<Value>> = rows.iter().map(Record::values).collect();
    assert_eq!(
        seen,
        vec![
            vec![Value::Int(0), Value::Long(10)],
            vec![Value::Int(1), Value::Long(20)],
            vec![Value::Int(0), Value::Long(22)],
        ]
    );
}

#[tokio::test]
async fn test_having_on_aggregate_alias() {
    let query = one_second()
        .group_by(Projection::field("a"))
        .aggregate(AggregateSpec::count_star("c"))
        .having(Expr::field("c").gt(Expr::lit(1)));
    let rows = run_query(
        query,
        &[
            (1, "0,"),
            (2, "1,"),
            (3, "1,"),
            (597, "2,"),
            (598, "2,"),
            (599, "2,"),
        ],
    )
    .await;

    assert_eq!(column(&rows, "a"), vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(column(&rows, "c"), longs(&[2, 3]));
}

#[tokio::test]
async fn test_computed_group_key() {
    let query = one_second()
        .group_by(Projection::new(
            "parity",
            Expr::binary(BinOp::Mod, Expr::field("a"), Expr::lit(2)),
        ))
        .aggregate(AggregateSpec::count_star("n"));
    let rows = run_query(query, &[(0, "1,0"), (1, "3,0"), (2, "4,0")]).await;

    assert_eq!(column(&rows, "parity"), vec![Value::Int(1), Value::Int(0)]);
    assert_eq!(column(&rows, "n"), longs(&[2, 1]));
}

// =============================================================================
// Aggregate functions
// =============================================================================

#[tokio::test]
async fn test_count_skips_nulls_count_star_does_not() {
    let query = one_second()
        .aggregate(AggregateSpec::count(Expr::field("b"), "c"))
        .aggregate(AggregateSpec::count_star("n"));
    let rows = run_query(query, &[(0, "0,"), (500, "0,5")]).await;

    assert_eq!(column(&rows, "c"), longs(&[0, 1]));
    assert_eq!(column(&rows, "n"), longs(&[1, 2]));
}

#[tokio::test]
async fn test_sum_follows_eviction() {
    let query = one_second().aggregate(AggregateSpec::sum(Expr::field("b"), "c"));
    let rows = run_query(query, &[(0, "0,21"), (500, "0,12"), (1200, "0,13")]).await;
    assert_eq!(column(&rows, "c"), longs(&[21, 33, 25]));
}

#[tokio::test]
async fn test_min_recomputed_when_extreme_leaves() {
    let query = one_second().aggregate(AggregateSpec::min(Expr::field("b"), "c"));
    let rows = run_query(query, &[(0, "0,10"), (500, "0,12"), (1200, "0,13")]).await;
    assert_eq!(
        column(&rows, "c"),
        vec![Value::Int(10), Value::Int(10), Value::Int(12)]
    );
}

#[tokio::test]
async fn test_max_tracks_newest_peak() {
    let query = one_second().aggregate(AggregateSpec::max(Expr::field("b"), "c"));
    let rows = run_query(query, &[(0, "0,11"), (500, "0,12"), (1200, "0,13")]).await;
    assert_eq!(
        column(&rows, "c"),
        vec![Value::Int(11), Value::Int(12), Value::Int(13)]
    );
}

#[tokio::test]
async fn test_avg_of_window() {
    let query = one_second().aggregate(AggregateSpec::avg(Expr::field("b"), "c"));
    let rows = run_query(query, &[(0, "0,1"), (500, "0,2"), (1200, "0,6")]).await;
    assert_eq!(
        column(&rows, "c"),
        vec![Value::Double(1.0), Value::Double(1.5), Value::Double(4.0)]
    );
}

#[tokio::test]
async fn test_only_touched_groups_are_evaluated() {
    let query = one_second()
        .group_by(Projection::field("a"))
        .aggregate(AggregateSpec::count_star("c"));
    // group 0 is not touched after its first slot
    let rows = run_query(query, &[(0, "0,1"), (300, "1,1"), (600, "1,1")]).await;
    assert_eq!(column(&rows, "a"), vec![Value::Int(0), Value::Int(1), Value::Int(1)]);
    assert_eq!(column(&rows, "c"), longs(&[1, 1, 2]));
}

// =============================================================================
// Per-row HAVING and session output
// =============================================================================

#[tokio::test]
async fn test_scalar_having_over_projection() {
    let config = config();
    let source = MemorySource::from_text_rows(
        "input",
        schema(),
        ',',
        [(1, "1,10"), (2, "2,20"), (3, "3,")],
    )
    .unwrap();
    let project = ProjectNode::new(
        "select",
        &schema(),
        vec![
            Projection::new("x", Expr::field("a")),
            Projection::new("y", Expr::binary(BinOp::Mul, Expr::field("b"), Expr::lit(2))),
        ],
    )
    .unwrap();
    let having = FilterNode::new("having", Expr::field("x").gt(Expr::lit(1)));

    let buffers = MemoryBuffers::new();
    let mut flow = FlowBuilder::new(&config);
    let src = flow.add_source(source);
    let select = flow.add_node(project);
    let filter = flow.add_node(having);
    let out = flow.add_node(MemoryOutputNode::new("out", &buffers, "rows"));
    flow.chain(&[src, select, filter, out]);
    flow.start().unwrap().join().await.unwrap();

    let rows = buffers.buffer("rows").records();
    assert_eq!(column(&rows, "x"), vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(column(&rows, "y"), vec![Value::Int(40), Value::Null]);
}

#[tokio::test]
async fn test_session_sees_header_and_rows() {
    let config = config();
    let query = one_second()
        .group_by(Projection::field("a"))
        .aggregate(AggregateSpec::max(Expr::field("b"), "m"));
    let aggregator =
        WindowedAggregator::new("agg", &schema(), query, config.aggregator_settings()).unwrap();
    let output_schema = Arc::clone(aggregator.output_schema());
    let source =
        MemorySource::from_text_rows("input", schema(), ',', [(10, "0,"), (500, "1,7")]).unwrap();
    let (output, connector) = OutputNode::new(
        "out",
        output_schema,
        SymbolTable::new(),
        SinkBindings::new(),
    );
    let session = MemorySession::new("s1");
    connector.attach(session.clone());

    let mut flow = FlowBuilder::new(&config);
    let src = flow.add_source(source);
    let agg = flow.add_node(WindowedAggregateNode::new(aggregator, config.tick_interval()));
    let out = flow.add_node(output);
    flow.chain(&[src, agg, out]);
    flow.start().unwrap().join().await.unwrap();

    assert_eq!(
        session.lines(),
        vec![
            "timestamp\ta\tm".to_string(),
            "10\t0\tnull".to_string(),
            "500\t1\t7".to_string(),
        ]
    );
}
