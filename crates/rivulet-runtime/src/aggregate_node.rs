//! Grouped aggregation over `RANGE` windows
//!
//! `GROUP BY <keys> OVER (RANGE INTERVAL <range> PRECEDING) [HAVING <pred>]`
//!
//! [`WindowedAggregator`] is the synchronous state machine: one window buffer
//! and one set of accumulators per group key, a set of groups due for
//! evaluation and the reference clock. [`WindowedAggregateNode`] wraps it as a
//! processing node and drives its tick producer.
//!
//! The reference clock is the event-time high-water mark: the newest
//! timestamp seen. Lateness and data-driven eviction are judged against it.
//! Ticks evict at a later tick time without moving the clock.
//!
//! Time is cut into emission slots of `emit_granularity_ms`. Due groups are
//! evaluated when an event or a tick enters another slot, and once more when
//! the node closes.
//! A group emits a row only when its tuple (row timestamp, key values,
//! aggregate values) differs from the last row it emitted.

use crate::aggregation::{Accumulator, AggregateSpec};
use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::Record;
use crate::metrics::NodeMetrics;
use crate::node::{ProcessingNode, Projection};
use crate::queue::Intake;
use crate::timer::spawn_ticker;
use crate::window::{Contributions, TimeWindow, WindowEntry};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use rivulet_core::{Expr, FieldDescriptor, Schema, SchemaRef, Type, Value};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Values of the `GROUP BY` expressions for one event.
pub type GroupKey = SmallVec<[Value; 2]>;

/// Default width of an emission slot.
pub const DEFAULT_EMIT_GRANULARITY_MS: i64 = 100;

/// The windowed part of a query.
#[derive(Debug, Clone)]
pub struct WindowedQuery {
    pub keys: Vec<Projection>,
    pub aggregates: Vec<AggregateSpec>,
    pub range_ms: i64,
    pub having: Option<Expr>,
}

impl WindowedQuery {
    pub fn new(range: Duration) -> Self {
        Self {
            keys: Vec::new(),
            aggregates: Vec::new(),
            range_ms: i64::try_from(range.as_millis()).unwrap_or(i64::MAX),
            having: None,
        }
    }

    pub fn group_by(mut self, key: Projection) -> Self {
        self.keys.push(key);
        self
    }

    pub fn aggregate(mut self, spec: AggregateSpec) -> Self {
        self.aggregates.push(spec);
        self
    }

    /// Predicate over the output row: key aliases and aggregate aliases.
    pub fn having(mut self, predicate: Expr) -> Self {
        self.having = Some(predicate);
        self
    }
}

/// Emission and reclamation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub emit_granularity_ms: i64,
    pub reclaim_idle_groups: bool,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            emit_granularity_ms: DEFAULT_EMIT_GRANULARITY_MS,
            reclaim_idle_groups: false,
        }
    }
}

#[derive(Debug)]
struct GroupState {
    window: TimeWindow,
    accumulators: Vec<Box<dyn Accumulator>>,
    last_emitted: Option<(i64, Vec<Value>)>,
}

impl GroupState {
    fn new(range_ms: i64, specs: &[AggregateSpec], types: &[Type]) -> Self {
        Self {
            window: TimeWindow::new(range_ms),
            accumulators: specs
                .iter()
                .zip(types)
                .map(|(spec, ty)| spec.accumulator(*ty))
                .collect(),
            last_emitted: None,
        }
    }

    fn insert(&mut self, entry: WindowEntry, metrics: &NodeMetrics) {
        for (acc, value) in self.accumulators.iter_mut().zip(&entry.contributions) {
            if let Err(e) = acc.insert(value) {
                debug!("Aggregate input {} not accumulated: {}", value, e);
                metrics.eval_errors.inc();
            }
        }
        self.window.insert(entry);
    }

    /// Returns true if any entry left the window.
    fn evict(&mut self, reference: i64) -> bool {
        let mut stale: SmallVec<[usize; 4]> = SmallVec::new();
        let mut evicted = false;
        for entry in self.window.evict(reference) {
            evicted = true;
            for (slot, acc) in self.accumulators.iter_mut().enumerate() {
                if stale.contains(&slot) {
                    continue;
                }
                match entry.contributions.get(slot).map(|v| acc.retract(v)) {
                    Some(Ok(true)) | None => {}
                    Some(Ok(false)) | Some(Err(_)) => stale.push(slot),
                }
            }
        }
        for slot in stale {
            self.accumulators[slot].rebuild(&mut self.window.contributions(slot));
        }
        evicted
    }
}

/// Per-group window state for one windowed query.
pub struct WindowedAggregator {
    name: String,
    query: WindowedQuery,
    result_types: Vec<Type>,
    output: SchemaRef,
    groups: IndexMap<GroupKey, GroupState, FxBuildHasher>,
    due: IndexSet<GroupKey, FxBuildHasher>,
    pending_slot: Option<i64>,
    reference: Option<i64>,
    settings: AggregatorSettings,
    metrics: NodeMetrics,
}

impl WindowedAggregator {
    /// Types the keys and aggregates against `input` and derives the output
    /// schema: key columns, then aggregate columns.
    pub fn new(
        name: impl Into<String>,
        input: &Schema,
        query: WindowedQuery,
        settings: AggregatorSettings,
    ) -> Result<Self, FlowError> {
        let mut fields = Vec::with_capacity(query.keys.len() + query.aggregates.len());
        for key in &query.keys {
            let ty = key.expr.result_type(input)?;
            fields.push(FieldDescriptor::new(key.alias.clone(), ty));
        }
        let mut result_types = Vec::with_capacity(query.aggregates.len());
        for spec in &query.aggregates {
            let ty = spec.result_type(input)?;
            result_types.push(ty);
            fields.push(if spec.nullable() {
                FieldDescriptor::new(spec.alias.clone(), ty)
            } else {
                FieldDescriptor::not_null(spec.alias.clone(), ty)
            });
        }
        let output = Arc::new(Schema::new(fields));
        if let Some(having) = &query.having {
            having.result_type(&output)?;
        }

        Ok(Self {
            name: name.into(),
            query,
            result_types,
            output,
            groups: IndexMap::with_hasher(FxBuildHasher),
            due: IndexSet::with_hasher(FxBuildHasher),
            pending_slot: None,
            reference: None,
            settings: AggregatorSettings {
                emit_granularity_ms: settings.emit_granularity_ms.max(1),
                ..settings
            },
            metrics: NodeMetrics::detached(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output
    }

    /// Report into `metrics` from now on.
    pub fn attach_metrics(&mut self, metrics: NodeMetrics) {
        self.metrics = metrics;
    }

    /// Event-time high-water mark, once any event has been seen.
    pub fn reference(&self) -> Option<i64> {
        self.reference
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn slot(&self, reference: i64) -> i64 {
        reference.div_euclid(self.settings.emit_granularity_ms)
    }

    fn is_late(&self, timestamp: i64) -> bool {
        self.reference
            .is_some_and(|r| timestamp <= r.saturating_sub(self.query.range_ms))
    }

    fn key_of(&self, record: &Record) -> GroupKey {
        self.query
            .keys
            .iter()
            .map(|key| {
                key.expr.eval(record).unwrap_or_else(|e| {
                    warn!("Group key '{}' in '{}' yields null: {}", key.alias, self.name, e);
                    self.metrics.eval_errors.inc();
                    Value::Null
                })
            })
            .collect()
    }

    fn contributions_of(&self, record: &Record) -> Contributions {
        self.query
            .aggregates
            .iter()
            .map(|spec| {
                spec.contribution(record).unwrap_or_else(|e| {
                    warn!("Aggregate '{}' in '{}' yields null: {}", spec.alias, self.name, e);
                    self.metrics.eval_errors.inc();
                    Value::Null
                })
            })
            .collect()
    }

    /// Take one event. Returns the rows of any slot the event closed.
    pub fn ingest(&mut self, record: &Record) -> Vec<Record> {
        let timestamp = record.timestamp();
        if self.is_late(timestamp) {
            warn!(
                "Aggregation '{}' dropping late event at {} (reference {:?})",
                self.name, timestamp, self.reference
            );
            self.metrics.late_drops.inc();
            return Vec::new();
        }

        let mut rows = Vec::new();
        let reference = self.reference.map_or(timestamp, |r| r.max(timestamp));
        let slot = self.slot(reference);
        match (self.pending_slot, self.reference) {
            // a tick may have left the pending slot ahead of event time
            (Some(pending), Some(previous)) if slot != pending => {
                self.evaluate_due(previous, &mut rows);
                self.pending_slot = Some(slot);
            }
            (None, _) => self.pending_slot = Some(slot),
            _ => {}
        }
        self.reference = Some(reference);

        let key = self.key_of(record);
        let entry = WindowEntry::new(timestamp, self.contributions_of(record));
        let range_ms = self.query.range_ms;
        let aggregates = &self.query.aggregates;
        let types = &self.result_types;
        let state = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| GroupState::new(range_ms, aggregates, types));
        state.evict(reference);
        state.insert(entry, &self.metrics);
        self.due.insert(key);
        rows
    }

    /// Evict every group at tick time `now` without data.
    ///
    /// When `now` enters a later slot, groups already due are evaluated at
    /// the reference clock first, then every group that lost entries is
    /// evaluated at `now`. The reference clock itself is left alone.
    pub fn tick(&mut self, now: i64) -> Vec<Record> {
        let Some(reference) = self.reference else {
            return Vec::new();
        };
        let now = reference.max(now);
        let slot = self.slot(now);
        let enters_slot = self.pending_slot.map_or(true, |pending| slot > pending);

        let mut rows = Vec::new();
        if enters_slot {
            self.evaluate_due(reference, &mut rows);
        }

        let reclaim = self.settings.reclaim_idle_groups;
        let due = &mut self.due;
        self.groups.retain(|key, state| {
            if state.evict(now) {
                if reclaim && state.window.is_empty() {
                    due.shift_remove(key);
                    return false;
                }
                due.insert(key.clone());
            }
            true
        });

        if enters_slot {
            self.evaluate_due(now, &mut rows);
            self.pending_slot = Some(slot);
        }
        rows
    }

    /// Evaluate every due group at the current reference time.
    pub fn flush(&mut self) -> Vec<Record> {
        let mut rows = Vec::new();
        if let Some(reference) = self.reference {
            self.evaluate_due(reference, &mut rows);
        }
        rows
    }

    fn evaluate_due(&mut self, reference: i64, rows: &mut Vec<Record>) {
        let due = std::mem::take(&mut self.due);
        for key in &due {
            if let Some(row) = self.evaluate(key, reference) {
                rows.push(row);
            }
        }
    }

    fn evaluate(&mut self, key: &GroupKey, reference: i64) -> Option<Record> {
        let state = self.groups.get_mut(key)?;
        state.evict(reference);
        let row_timestamp = state.window.newest_timestamp()?;

        let mut values: Vec<Value> = key.iter().cloned().collect();
        values.extend(state.accumulators.iter().map(|acc| acc.finish()));
        if let Some((ts, last)) = &state.last_emitted {
            if *ts == row_timestamp && *last == values {
                return None;
            }
        }

        let row = Record::materialized(row_timestamp, Arc::clone(&self.output), values.clone());
        if let Some(having) = &self.query.having {
            match having.eval(&row) {
                Ok(v) if v.is_true() => {}
                Ok(_) => return None,
                Err(e) => {
                    warn!("HAVING in '{}' rejects row: {}", self.name, e);
                    self.metrics.eval_errors.inc();
                    return None;
                }
            }
        }
        state.last_emitted = Some((row_timestamp, values));
        Some(row)
    }
}

/// Processing node running a [`WindowedAggregator`].
///
/// With a non-zero tick interval the node asks for a timer-augmented context
/// and starts a tick producer on open. A tick's time is the event-time
/// high-water mark advanced by the wall-clock time elapsed since that mark
/// was observed.
pub struct WindowedAggregateNode {
    aggregator: WindowedAggregator,
    tick_interval: Duration,
    high_water: Option<(i64, Instant)>,
    ticker: Option<JoinHandle<()>>,
}

impl WindowedAggregateNode {
    pub fn new(aggregator: WindowedAggregator, tick_interval: Duration) -> Self {
        Self {
            aggregator,
            tick_interval,
            high_water: None,
            ticker: None,
        }
    }

    pub fn output_schema(&self) -> &SchemaRef {
        self.aggregator.output_schema()
    }

    fn tick_time(&self) -> Option<i64> {
        self.high_water.map(|(timestamp, seen)| {
            let elapsed = i64::try_from(seen.elapsed().as_millis()).unwrap_or(i64::MAX);
            timestamp.saturating_add(elapsed)
        })
    }

    async fn emit_all(&self, rows: Vec<Record>, ctx: &mut NodeContext) -> Result<(), FlowError> {
        ctx.metrics()
            .active_groups
            .set(i64::try_from(self.aggregator.group_count()).unwrap_or(i64::MAX));
        for row in rows {
            ctx.emit(row).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingNode for WindowedAggregateNode {
    fn name(&self) -> &str {
        self.aggregator.name()
    }

    fn wants_timer(&self) -> bool {
        !self.tick_interval.is_zero()
    }

    async fn open(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError> {
        self.aggregator.attach_metrics(ctx.metrics().clone());
        if !self.wants_timer() {
            return Ok(());
        }
        let timer = ctx.timer_sender().ok_or_else(|| {
            FlowError::GraphProtocol(format!(
                "aggregation '{}' needs a timer queue",
                self.aggregator.name()
            ))
        })?;
        self.ticker = Some(spawn_ticker(
            self.aggregator.name().to_string(),
            self.tick_interval,
            timer,
        ));
        info!(
            "Aggregation '{}' ticking every {:?}",
            self.aggregator.name(),
            self.tick_interval
        );
        Ok(())
    }

    async fn take_event(&mut self, intake: Intake, ctx: &mut NodeContext) -> Result<(), FlowError> {
        let rows = match intake {
            Intake::Data(record) => {
                let timestamp = record.timestamp();
                if self.high_water.map_or(true, |(hw, _)| timestamp > hw) {
                    self.high_water = Some((timestamp, Instant::now()));
                }
                self.aggregator.ingest(&record)
            }
            Intake::Tick => match self.tick_time() {
                Some(now) => self.aggregator.tick(now),
                None => Vec::new(),
            },
        };
        self.emit_all(rows, ctx).await
    }

    async fn close(&mut self, ctx: &mut NodeContext) -> Result<(), FlowError> {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let rows = self.aggregator.flush();
        debug!(
            "Aggregation '{}' flushing {} rows on close",
            self.aggregator.name(),
            rows.len()
        );
        self.emit_all(rows, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use crate::queue::{queue, Cancellation};
    use rivulet_core::Type;
    use rust_decimal::Decimal;

    fn input() -> SchemaRef {
        Arc::new(Schema::new(vec![
            FieldDescriptor::new("a", Type::Int),
            FieldDescriptor::new("b", Type::Int),
        ]))
    }

    fn row(ts: i64, a: i32, b: Option<i32>) -> Record {
        Record::materialized(ts, input(), vec![Value::Int(a), Value::from(b)])
    }

    fn count_b() -> WindowedQuery {
        WindowedQuery::new(Duration::from_secs(1))
            .aggregate(AggregateSpec::count(Expr::field("b"), "c"))
    }

    fn aggregator(query: WindowedQuery) -> WindowedAggregator {
        WindowedAggregator::new("agg", &input(), query, AggregatorSettings::default()).unwrap()
    }

    /// Feed rows in order, then flush; returns the emitted `c` column.
    fn run(agg: &mut WindowedAggregator, rows: Vec<Record>) -> Vec<Value> {
        let mut out = Vec::new();
        for r in &rows {
            out.extend(agg.ingest(r));
        }
        out.extend(agg.flush());
        out.iter().map(|r| r.get("c").cloned().unwrap()).collect()
    }

    #[test]
    fn test_output_schema() {
        let agg = aggregator(
            WindowedQuery::new(Duration::from_secs(1))
                .group_by(Projection::field("a"))
                .aggregate(AggregateSpec::count(Expr::field("b"), "c"))
                .aggregate(AggregateSpec::sum(Expr::field("b"), "s")),
        );
        let schema = agg.output_schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "s"]);
        assert!(!schema.field(1).unwrap().nullable);
        assert_eq!(schema.field(2).unwrap().ty, Type::Long);
    }

    #[test]
    fn test_having_must_type_check() {
        let query = count_b().having(Expr::field("missing").gt(Expr::lit(1)));
        assert!(WindowedAggregator::new("agg", &input(), query, AggregatorSettings::default())
            .is_err());
    }

    #[test]
    fn test_arrivals_in_one_slot_coalesce() {
        let mut agg = aggregator(count_b());
        let out = run(
            &mut agg,
            vec![row(35, 0, Some(10)), row(36, 1, Some(11)), row(200, 2, Some(12))],
        );
        assert_eq!(out, vec![Value::Long(2), Value::Long(3)]);
    }

    #[test]
    fn test_eviction_at_window_edge() {
        let mut agg = aggregator(count_b());
        let out = run(
            &mut agg,
            vec![row(0, 0, Some(1)), row(999, 0, Some(1)), row(2000, 0, Some(1))],
        );
        assert_eq!(out, vec![Value::Long(1), Value::Long(2), Value::Long(1)]);
    }

    #[test]
    fn test_row_timestamp_distinguishes_equal_counts() {
        let mut agg = aggregator(count_b());
        let mut rows = Vec::new();
        for r in [row(0, 0, Some(1)), row(990, 0, Some(1)), row(1989, 0, Some(1))] {
            rows.extend(agg.ingest(&r));
        }
        rows.extend(agg.flush());
        let seen: Vec<_> = rows
            .iter()
            .map(|r| (r.timestamp(), r.get("c").cloned().unwrap()))
            .collect();
        assert_eq!(
            seen,
            vec![(0, Value::Long(1)), (990, Value::Long(2)), (1989, Value::Long(2))]
        );
    }

    #[test]
    fn test_unchanged_group_is_not_reemitted() {
        let mut agg = aggregator(count_b());
        assert!(agg.ingest(&row(10, 0, Some(1))).is_empty());
        assert_eq!(agg.flush().len(), 1);
        assert!(agg.flush().is_empty());
        // a tick in a later slot that evicts nothing changes nothing
        assert!(agg.tick(500).is_empty());
    }

    #[test]
    fn test_late_event_dropped() {
        let mut agg = aggregator(count_b());
        agg.ingest(&row(5000, 0, Some(1)));
        assert!(agg.ingest(&row(4000, 0, Some(1))).is_empty());
        assert_eq!(agg.metrics.late_drops.get(), 1);
        let out: Vec<_> = agg.flush().iter().map(|r| r.get("c").cloned()).collect();
        assert_eq!(out, vec![Some(Value::Long(1))]);
    }

    #[test]
    fn test_tick_evicts_and_emits() {
        let mut agg = aggregator(count_b());
        agg.ingest(&row(0, 0, Some(1)));
        agg.ingest(&row(500, 0, Some(1)));
        let first = agg.tick(600);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].get("c"), Some(&Value::Long(2)));

        let second = agg.tick(1200);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].get("c"), Some(&Value::Long(1)));
        assert_eq!(second[0].timestamp(), 500);

        // window now empty: nothing to emit
        assert!(agg.tick(1600).is_empty());
        // ticks do not move the event-time clock
        assert_eq!(agg.reference(), Some(500));
    }

    #[test]
    fn test_tick_emits_due_rows_before_evicting() {
        let mut agg = aggregator(count_b());
        assert!(agg.ingest(&row(0, 0, Some(1))).is_empty());
        let rows = agg.tick(2000);
        let seen: Vec<_> = rows
            .iter()
            .map(|r| (r.timestamp(), r.get("c").cloned().unwrap()))
            .collect();
        assert_eq!(seen, vec![(0, Value::Long(1))]);
    }

    #[test]
    fn test_event_after_tick_is_not_late() {
        let mut agg = aggregator(count_b());
        agg.ingest(&row(0, 0, Some(1)));
        agg.tick(2000);
        assert!(agg.ingest(&row(500, 0, Some(1))).is_empty());
        assert_eq!(agg.metrics.late_drops.get(), 0);
        assert_eq!(agg.reference(), Some(500));

        let rows = agg.flush();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp(), 500);
        assert_eq!(rows[0].get("c"), Some(&Value::Long(1)));
    }

    #[test]
    fn test_event_after_tick_reopens_slot() {
        let mut agg = aggregator(count_b());
        agg.ingest(&row(0, 0, Some(1)));
        agg.tick(2000);
        agg.ingest(&row(500, 0, Some(1)));
        // a later slot in event time evaluates the group again
        let rows = agg.ingest(&row(650, 0, Some(1)));
        let seen: Vec<_> = rows
            .iter()
            .map(|r| (r.timestamp(), r.get("c").cloned().unwrap()))
            .collect();
        assert_eq!(seen, vec![(500, Value::Long(1))]);
    }

    #[test]
    fn test_tick_never_moves_reference_backwards() {
        let mut agg = aggregator(count_b());
        assert!(agg.tick(100).is_empty());
        assert_eq!(agg.reference(), None);
        agg.ingest(&row(900, 0, Some(1)));
        agg.tick(10);
        assert_eq!(agg.reference(), Some(900));
    }

    #[test]
    fn test_idle_groups_reclaimed_when_enabled() {
        let settings = AggregatorSettings {
            reclaim_idle_groups: true,
            ..AggregatorSettings::default()
        };
        let query = count_b().group_by(Projection::field("a"));
        let mut agg = WindowedAggregator::new("agg", &input(), query, settings).unwrap();
        agg.ingest(&row(0, 0, Some(1)));
        agg.ingest(&row(10, 1, Some(1)));
        assert_eq!(agg.group_count(), 2);
        agg.flush();
        agg.tick(5000);
        assert_eq!(agg.group_count(), 0);
    }

    #[test]
    fn test_groups_evaluated_in_first_seen_order() {
        let query = WindowedQuery::new(Duration::from_secs(1))
            .group_by(Projection::field("a"))
            .aggregate(AggregateSpec::sum(Expr::field("b"), "c"));
        let mut agg = aggregator(query);
        let mut out = Vec::new();
        for r in [
            row(35, 0, Some(10)),
            row(36, 1, Some(11)),
            row(37, 1, Some(9)),
            row(200, 0, Some(12)),
        ] {
            out.extend(agg.ingest(&r));
        }
        out.extend(agg.flush());
        let seen: Vec<_> = out.iter().map(|r| r.values()).collect();
        assert_eq!(
            seen,
            vec![
                vec![Value::Int(0), Value::Long(10)],
                vec![Value::Int(1), Value::Long(20)],
                vec![Value::Int(0), Value::Long(22)],
            ]
        );
    }

    #[test]
    fn test_failed_having_keeps_group_eligible() {
        let query = WindowedQuery::new(Duration::from_secs(1))
            .group_by(Projection::field("a"))
            .aggregate(AggregateSpec::count_star("c"))
            .having(Expr::field("c").gt(Expr::lit(1i64)));
        let mut agg = aggregator(query);
        let mut out = Vec::new();
        for (ts, a) in [(1, 0), (2, 1), (3, 1), (597, 2), (598, 2), (599, 2)] {
            out.extend(agg.ingest(&row(ts, a, None)));
        }
        out.extend(agg.flush());
        let seen: Vec<_> = out.iter().map(|r| r.values()).collect();
        assert_eq!(
            seen,
            vec![
                vec![Value::Int(1), Value::Long(2)],
                vec![Value::Int(2), Value::Long(3)],
            ]
        );
    }

    /// Ingest single-column rows of type `ty` in order; returns every row's
    /// timestamp and `SUM`.
    fn sums(ty: Type, values: Vec<(i64, Value)>) -> Vec<(i64, Value)> {
        let schema: SchemaRef = Arc::new(Schema::new(vec![FieldDescriptor::new("b", ty)]));
        let query = WindowedQuery::new(Duration::from_secs(1))
            .aggregate(AggregateSpec::sum(Expr::field("b"), "s"));
        let mut agg =
            WindowedAggregator::new("agg", &schema, query, AggregatorSettings::default()).unwrap();
        let mut out = Vec::new();
        for (ts, value) in values {
            out.extend(agg.ingest(&Record::materialized(ts, Arc::clone(&schema), vec![value])));
        }
        out.extend(agg.flush());
        out.iter()
            .map(|r| (r.timestamp(), r.get("s").cloned().unwrap()))
            .collect()
    }

    #[test]
    fn test_sum_recovers_once_infinity_leaves() {
        let out = sums(
            Type::Double,
            vec![
                (0, Value::Double(f64::INFINITY)),
                (500, Value::Double(1.0)),
                (1200, Value::Double(2.0)),
            ],
        );
        assert_eq!(out.last(), Some(&(1200, Value::Double(3.0))));
    }

    #[test]
    fn test_sum_ignores_overflowed_value_on_eviction() {
        let out = sums(
            Type::Precise,
            vec![
                (0, Value::Precise(Decimal::MAX - Decimal::from(10))),
                (100, Value::Precise(Decimal::from(20))),
                (1050, Value::Precise(Decimal::from(5))),
                (1150, Value::Precise(Decimal::from(1))),
            ],
        );
        assert_eq!(out.last(), Some(&(1150, Value::Precise(Decimal::from(6)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_ticks_advance_from_high_water() {
        let cancel = Cancellation::new();
        let (tx, mut rx) = queue("out", 8, &cancel);
        let (timer, _timer_rx) = queue("timer", 8, &cancel);
        let mut ctx = NodeContext::new(
            "agg",
            ContextKind::TimerAugmented {
                downstream: tx,
                timer,
            },
            cancel,
            NodeMetrics::detached(),
        );
        let mut node = WindowedAggregateNode::new(aggregator(count_b()), Duration::from_millis(100));
        assert!(node.wants_timer());
        node.open(&mut ctx).await.unwrap();

        node.take_event(Intake::Data(row(0, 0, Some(1))), &mut ctx)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        node.take_event(Intake::Tick, &mut ctx).await.unwrap();
        let first = rx.take().await.unwrap().unwrap();
        assert_eq!(first.timestamp(), 0);
        assert_eq!(first.get("c"), Some(&Value::Long(1)));

        tokio::time::advance(Duration::from_millis(1350)).await;
        node.take_event(Intake::Tick, &mut ctx).await.unwrap();
        assert_eq!(node.aggregator.reference(), Some(0));

        // in order, even though ticks ran ahead of it
        node.take_event(Intake::Data(row(500, 0, Some(1))), &mut ctx)
            .await
            .unwrap();
        node.close(&mut ctx).await.unwrap();
        drop(ctx);
        let last = rx.take().await.unwrap().unwrap();
        assert_eq!(last.timestamp(), 500);
        assert_eq!(last.get("c"), Some(&Value::Long(1)));
        assert!(rx.take().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_node_without_timer_queue_fails_open() {
        let cancel = Cancellation::new();
        let mut ctx = NodeContext::terminal("agg", cancel);
        let mut node = WindowedAggregateNode::new(aggregator(count_b()), Duration::from_millis(100));
        assert!(matches!(
            node.open(&mut ctx).await,
            Err(FlowError::GraphProtocol(_))
        ));
    }
}
