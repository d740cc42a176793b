//! Aggregation runtime
//!
//! Owns one aggregation: its per-granularity tables, the executor chain
//! behind a single `RwLock`, the initialiser and the retention purger.
//! Ingestion takes the write lock for a whole batch. Lookups hold the read
//! lock while reading open buckets and tables, so each sees a consistent
//! cut of sealed and open state.

use crate::config::RuntimeConfig;
use crate::error::{EngineError, Result};
use crate::scope::{ReadScope, SnapshotCoordinator};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use strata_aggregation::{
    AggregationLayout, ChainSnapshot, ExecutorChain, ExecutorsInitialiser, IngestReport, InitReport, TimeColumn,
};
use strata_core::{Clock, Event, Granularity, PerGranularity, Row, Schema, Timestamp, Value};
use strata_query::{CompiledPlan, LookupQuery, QueryCompiler};
use strata_retention::{PurgeReport, RetentionPurger};
use strata_storage::{ExecutionContext, Table, TableFactory};
use tracing::{debug, info};

/// Where event time is read from, resolved against the stream schema
#[derive(Debug, Clone, Copy)]
enum EventTimeSource {
    Processing,
    Event,
    Attribute(usize),
}

/// Incremental aggregation over one input stream
pub struct AggregationRuntime {
    config: RuntimeConfig,
    layout: Arc<AggregationLayout>,
    tables: PerGranularity<Arc<dyn Table>>,
    chain: RwLock<ExecutorChain>,
    initialiser: ExecutorsInitialiser,
    purger: RetentionPurger,
    time_source: EventTimeSource,
    clock: Arc<dyn Clock>,
    coordinator: Option<Arc<SnapshotCoordinator>>,
}

impl fmt::Debug for AggregationRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationRuntime")
            .field("name", &self.layout.name())
            .field("granularities", &self.config.definition.granularities)
            .field("shard_id", &self.config.shard_id)
            .finish()
    }
}

impl AggregationRuntime {
    /// Validate the configuration and create one table per granularity
    pub fn new(config: RuntimeConfig, factory: &dyn TableFactory, clock: Arc<dyn Clock>) -> Result<Self> {
        let policy = config.validate()?;
        let definition = &config.definition;
        let layout = Arc::new(AggregationLayout::new(definition, config.is_distributed())?);

        let tables = PerGranularity::from_fn(&definition.granularities, |granularity| {
            factory.create_table(&definition.table_name(granularity), layout.table_schema())
        })?;

        let chain = ExecutorChain::new(Arc::clone(&layout), &tables, &config.ingest)?;
        let initialiser = ExecutorsInitialiser::new(&chain, config.shard_id.clone())?;
        let purger = RetentionPurger::new(policy, &tables)?;

        let time_source = match &definition.time {
            TimeColumn::ProcessingTime => EventTimeSource::Processing,
            TimeColumn::EventTime => EventTimeSource::Event,
            TimeColumn::Attribute(name) => {
                let index = layout
                    .stream_schema()
                    .index_of(name)
                    .ok_or_else(|| EngineError::Config(format!("Unknown time attribute: {}", name)))?;
                EventTimeSource::Attribute(index)
            }
        };

        info!(
            aggregation = layout.name(),
            granularities = ?definition.granularities,
            distributed = layout.is_distributed(),
            optimised_lookup = config.lookup.optimised,
            "Created aggregation runtime"
        );

        Ok(Self {
            config,
            layout,
            tables,
            chain: RwLock::new(chain),
            initialiser,
            purger,
            time_source,
            clock,
            coordinator: None,
        })
    }

    /// Register lookups with an external snapshot service
    pub fn with_snapshot_coordinator(mut self, coordinator: Arc<SnapshotCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn layout(&self) -> &Arc<AggregationLayout> {
        &self.layout
    }

    /// Schema of looked-up rows: AGG_TIMESTAMP, group-by, attributes, outputs
    pub fn output_schema(&self) -> &Schema {
        self.layout.output_schema()
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.config.definition.granularities
    }

    /// Backing table of a granularity
    pub fn table(&self, granularity: Granularity) -> Option<&Arc<dyn Table>> {
        self.tables.get(granularity)
    }

    /// Highest event time seen or advanced to
    pub fn watermark(&self) -> Option<Timestamp> {
        self.chain.read().watermark()
    }

    pub fn is_initialised(&self) -> bool {
        self.chain.read().is_initialised()
    }

    /// Whether rows carry this runtime's shard id
    pub fn is_distributed(&self) -> bool {
        self.layout.is_distributed()
    }

    /// Late events dropped since construction
    pub fn dropped_late(&self) -> u64 {
        self.chain.read().dropped_late()
    }

    /// Aggregate a batch of events. The chain is initialised from the
    /// tables first if this is the first use.
    pub fn ingest(&self, events: &[Event]) -> Result<IngestReport> {
        let now = self.clock.now_millis();
        let shard = self.config.shard_id.as_deref();
        let width = self.layout.stream_schema().len();
        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            if event.values.len() != width {
                return Err(EngineError::InvalidEvent(format!(
                    "expected {} attributes, got {}",
                    width,
                    event.values.len()
                )));
            }
            let time = self.event_time(event, now)?;
            rows.push(self.layout.base_row(time, &event.values, shard));
        }

        let mut chain = self.chain.write();
        self.initialiser.initialise(&mut chain, &ExecutionContext::default())?;
        let report = chain.ingest(rows)?;
        debug!(
            aggregation = self.layout.name(),
            accepted = report.accepted,
            dropped_late = report.dropped_late,
            "Ingested events"
        );
        Ok(report)
    }

    fn event_time(&self, event: &Event, now: Timestamp) -> Result<Timestamp> {
        match self.time_source {
            EventTimeSource::Processing => Ok(now),
            EventTimeSource::Event => Ok(event.timestamp),
            EventTimeSource::Attribute(index) => match event.get(index) {
                Some(Value::Int(time)) => Ok(*time),
                other => Err(EngineError::InvalidEvent(format!(
                    "time attribute must be an int, got {:?}",
                    other
                ))),
            },
        }
    }

    /// Seal every bucket ending at or before `watermark`
    pub fn advance_watermark(&self, watermark: Timestamp) -> Result<()> {
        let mut chain = self.chain.write();
        self.initialiser.initialise(&mut chain, &ExecutionContext::default())?;
        chain.advance_watermark(watermark)?;
        Ok(())
    }

    /// Compile a lookup against this aggregation
    pub fn compile(&self, query: &LookupQuery) -> Result<CompiledPlan> {
        let plan = QueryCompiler::new(&self.layout, &self.tables)
            .with_optimised(self.config.lookup.optimised)
            .with_parallel(self.config.parallel.clone())
            .compile(query)?;
        Ok(plan)
    }

    /// Run a compiled lookup for one triggering event. A local aggregation
    /// is initialised first if needed; distributed lookups read only tables.
    pub fn lookup(&self, trigger: &[Value], plan: &CompiledPlan) -> Result<Vec<Row>> {
        let scope = ReadScope::enter(self.coordinator.as_deref());
        let ctx = scope.context();
        if !self.is_distributed() && !self.is_initialised() {
            self.initialise_with(&ctx)?;
        }
        let chain = self.chain.read();
        let rows = plan.execute(trigger, &*chain, self.clock.now_millis(), &ctx)?;
        Ok(rows)
    }

    /// Delete buckets past their retention relative to the watermark
    pub fn purge_now(&self) -> PurgeReport {
        let Some(watermark) = self.watermark() else {
            debug!(aggregation = self.layout.name(), "Nothing ingested yet, skipping purge");
            return PurgeReport::default();
        };
        let report = self.purger.purge(watermark);
        info!(
            aggregation = self.layout.name(),
            watermark,
            removed = report.total_removed(),
            failures = report.failures.len(),
            "Purge completed"
        );
        report
    }

    /// Rebuild open state from the tables unless already done
    pub fn initialise(&self) -> Result<InitReport> {
        self.initialise_with(&ExecutionContext::default())
    }

    fn initialise_with(&self, ctx: &ExecutionContext) -> Result<InitReport> {
        let mut chain = self.chain.write();
        Ok(self.initialiser.initialise(&mut chain, ctx)?)
    }

    /// Rebuild open state from the tables unconditionally
    pub fn reinitialise(&self) -> Result<InitReport> {
        let mut chain = self.chain.write();
        Ok(self.initialiser.reinitialise(&mut chain, &ExecutionContext::default())?)
    }

    /// Encode the open state of every executor
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = self.chain.read().snapshot();
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Replace the open state with a previously taken snapshot
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        let snapshot: ChainSnapshot = bincode::deserialize(bytes)?;
        let mut chain = self.chain.write();
        chain.restore(snapshot)?;
        info!(
            aggregation = self.layout.name(),
            watermark = ?chain.watermark(),
            "Restored aggregation state"
        );
        Ok(())
    }
}
