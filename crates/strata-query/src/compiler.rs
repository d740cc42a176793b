//! Lookup compiler
//!
//! Turns a [`LookupQuery`] into a [`CompiledPlan`]: binds `within` and
//! `per`, splits the join condition, builds the re-aggregating selector and
//! compiles one storage read per table. Push-down is all-or-nothing: if any
//! table cannot compile its selection, every read of the plan falls back to
//! a filtered scan.

use crate::error::{QueryError, Result};
use crate::plan::{BoundPer, CompiledPlan, LevelPlan, TableRead};
use crate::rewriter::split_condition;
use crate::selector::Selector;
use crate::within::Within;
use std::sync::Arc;
use strata_aggregation::AggregationLayout;
use strata_core::{
    columns, Attribute, AttributeType, BindScope, BoundExpr, Expr, Granularity, ParallelConfig, PerGranularity,
    Schema,
};
use strata_storage::Table;
use tracing::debug;

/// A lookup joining a triggering stream with an aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
    /// Schema of the triggering stream
    pub stream: Schema,
    /// Join condition over `Source::Stream` and aggregation output columns
    pub on: Expr,
    pub within: Option<Within>,
    /// String expression naming the requested granularity
    pub per: Option<Expr>,
    /// The lookup's own group-by
    pub group_by: Vec<String>,
}

impl LookupQuery {
    pub fn new(stream: Schema) -> Self {
        Self {
            stream,
            on: Expr::truth(),
            within: None,
            per: None,
            group_by: Vec::new(),
        }
    }

    pub fn on(mut self, condition: Expr) -> Self {
        self.on = condition;
        self
    }

    pub fn within(mut self, within: Within) -> Self {
        self.within = Some(within);
        self
    }

    pub fn per(mut self, per: Expr) -> Self {
        self.per = Some(per);
        self
    }

    /// Constant `per`
    pub fn per_granularity(self, granularity: Granularity) -> Self {
        self.per(Expr::constant(granularity.name()))
    }

    pub fn group_by(mut self, attributes: &[&str]) -> Self {
        self.group_by = attributes.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// Compiles lookups against one aggregation's layout and tables
pub struct QueryCompiler<'a> {
    layout: &'a Arc<AggregationLayout>,
    tables: &'a PerGranularity<Arc<dyn Table>>,
    optimised: bool,
    parallel: ParallelConfig,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(layout: &'a Arc<AggregationLayout>, tables: &'a PerGranularity<Arc<dyn Table>>) -> Self {
        Self {
            layout,
            tables,
            optimised: true,
            parallel: ParallelConfig::default(),
        }
    }

    /// Allow push-down to the tables (default on)
    pub fn with_optimised(mut self, optimised: bool) -> Self {
        self.optimised = optimised;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn compile(&self, query: &LookupQuery) -> Result<CompiledPlan> {
        let granularities = self.tables.granularities();
        let within = query.within.as_ref().ok_or(QueryError::MissingWithin)?.bind(&query.stream)?;
        let per = self.bind_per(query, &granularities)?;

        let params = self.params_schema(granularities.len())?;
        let table_schema = self.layout.table_schema();
        let split = split_condition(&query.on, self.layout);
        let storage_condition = split.storage_condition();

        let in_memory = bind_condition(
            &storage_condition,
            BindScope::new().with_aggregate(table_schema).with_params(&params),
        )?;
        let post_filter = split
            .post_filter()
            .map(|filter| {
                bind_condition(
                    &filter,
                    BindScope::new()
                        .with_stream(&query.stream)
                        .with_aggregate(self.layout.output_schema()),
                )
            })
            .transpose()?;
        let selector = Selector::new(self.layout, &query.group_by);

        let distributed = self.layout.is_distributed();
        let coarsest = granularities.len().saturating_sub(1);
        let mut levels = Vec::with_capacity(granularities.len());
        for (level, (_, table)) in self.tables.iter().enumerate() {
            let segment = TableRead {
                condition: table.compile_condition(&storage_condition, &params)?,
                selection: None,
            };
            let pending = if distributed && level < coarsest {
                let condition = storage_condition
                    .clone()
                    .and(Expr::aggregate(columns::AGG_TIMESTAMP).ge(Expr::param(columns::timestamp_filter(level))));
                Some(TableRead {
                    condition: table.compile_condition(&condition, &params)?,
                    selection: None,
                })
            } else {
                None
            };
            levels.push(LevelPlan {
                table: Arc::clone(table),
                segment,
                pending,
            });
        }

        let optimised = self.optimised && self.push_down(&mut levels, &storage_condition, &selector, &params);

        debug!(
            aggregation = self.layout.name(),
            optimised,
            regrouped = selector.is_regrouped(),
            pushed = split.pushable.len(),
            deferred = split.deferred.len(),
            "Compiled lookup"
        );
        Ok(CompiledPlan {
            layout: Arc::clone(self.layout),
            granularities,
            levels,
            within,
            per,
            in_memory,
            post_filter,
            selector,
            optimised,
            parallel: self.parallel.clone(),
        })
    }

    /// `_START`, `_END`, then one forwarding filter per non-coarsest level
    /// in distributed mode
    fn params_schema(&self, level_count: usize) -> Result<Schema> {
        let mut params = vec![
            Attribute::new(columns::START, AttributeType::Int),
            Attribute::new(columns::END, AttributeType::Int),
        ];
        if self.layout.is_distributed() {
            for level in 0..level_count.saturating_sub(1) {
                params.push(Attribute::new(columns::timestamp_filter(level), AttributeType::Int));
            }
        }
        Ok(Schema::new(params)?)
    }

    fn bind_per(&self, query: &LookupQuery, granularities: &[Granularity]) -> Result<BoundPer> {
        let per = query.per.as_ref().ok_or(QueryError::MissingPer)?;
        let bound = per
            .bind(&BindScope::new().with_stream(&query.stream))
            .map_err(|e| QueryError::InvalidPer(e.to_string()))?;
        if bound.return_type() != AttributeType::String {
            return Err(QueryError::InvalidPer(format!(
                "per must be a string, got {}",
                bound.return_type()
            )));
        }
        let Some(constant) = bound.as_constant() else {
            return Ok(BoundPer::Dynamic(bound));
        };
        let name = constant.as_str().unwrap_or_default();
        let granularity: Granularity = name.parse().map_err(|_| QueryError::InvalidPer(name.to_string()))?;
        if !granularities.contains(&granularity) {
            return Err(QueryError::InvalidPer(format!("{} is not aggregated", granularity)));
        }
        Ok(BoundPer::Fixed(granularity))
    }

    /// Compile every selection or none; returns whether the plan is pushed down
    fn push_down(&self, levels: &mut [LevelPlan], storage_condition: &Expr, selector: &Selector, params: &Schema) -> bool {
        let mut selections = Vec::with_capacity(levels.len());
        for (level, plan) in levels.iter().enumerate() {
            let Some(queryable) = plan.table.as_queryable() else {
                debug!(table = plan.table.name(), "Table cannot push down, scanning instead");
                return false;
            };
            let segment = queryable.compile_selection(&selector.selection_spec(storage_condition.clone()), params);
            let pending = plan.pending.as_ref().map(|_| {
                let condition = storage_condition
                    .clone()
                    .and(Expr::aggregate(columns::AGG_TIMESTAMP).ge(Expr::param(columns::timestamp_filter(level))));
                queryable.compile_selection(&selector.selection_spec(condition), params)
            });
            match (segment, pending.transpose()) {
                (Ok(segment), Ok(pending)) => selections.push((segment, pending)),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(table = plan.table.name(), error = %e, "Push-down failed, scanning instead");
                    return false;
                }
            }
        }
        for (plan, (segment, pending)) in levels.iter_mut().zip(selections) {
            plan.segment.selection = Some(segment);
            if let (Some(read), Some(selection)) = (plan.pending.as_mut(), pending) {
                read.selection = Some(selection);
            }
        }
        true
    }
}

fn bind_condition(condition: &Expr, scope: BindScope<'_>) -> Result<BoundExpr> {
    let bound = condition
        .bind(&scope)
        .map_err(|e| QueryError::InvalidCondition(format!("{}: {}", condition, e)))?;
    if bound.return_type() != AttributeType::Bool {
        return Err(QueryError::InvalidCondition(format!(
            "{} must be boolean, got {}",
            condition,
            bound.return_type()
        )));
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_aggregation::{AggregateFunction, AggregationDefinition};
    use strata_storage::{InMemoryStore, InMemoryTable, TableFactory};

    fn layout() -> Arc<AggregationLayout> {
        let definition = AggregationDefinition::new(
            "trades",
            vec![
                Attribute::new("symbol", AttributeType::String),
                Attribute::new("price", AttributeType::Float),
            ],
        )
        .group_by(&["symbol"])
        .aggregate(AggregateFunction::Avg, Some("price"), "avgPrice")
        .every(Granularity::Seconds, Granularity::Hours);
        Arc::new(AggregationLayout::new(&definition, false).unwrap())
    }

    fn make_tables(layout: &AggregationLayout, store: &InMemoryStore) -> PerGranularity<Arc<dyn Table>> {
        PerGranularity::from_fn(&[Granularity::Seconds, Granularity::Minutes, Granularity::Hours], |g| {
            store.create_table(&format!("trades_{}", g), layout.table_schema())
        })
        .unwrap()
    }

    fn stream() -> Schema {
        Schema::new(vec![
            Attribute::new("symbol", AttributeType::String),
            Attribute::new("per", AttributeType::String),
        ])
        .unwrap()
    }

    fn query() -> LookupQuery {
        LookupQuery::new(stream())
            .within(Within::millis(0, 60_000))
            .per_granularity(Granularity::Seconds)
    }

    #[test]
    fn test_missing_per_or_within_is_rejected() {
        let layout = layout();
        let store = InMemoryStore::new();
        let tables = make_tables(&layout, &store);
        let compiler = QueryCompiler::new(&layout, &tables);

        let mut missing_within = query();
        missing_within.within = None;
        assert!(matches!(compiler.compile(&missing_within), Err(QueryError::MissingWithin)));

        let mut missing_per = query();
        missing_per.per = None;
        assert!(matches!(compiler.compile(&missing_per), Err(QueryError::MissingPer)));
    }

    #[test]
    fn test_per_validation() {
        let layout = layout();
        let store = InMemoryStore::new();
        let tables = make_tables(&layout, &store);
        let compiler = QueryCompiler::new(&layout, &tables);

        for per in [
            Expr::constant("days"),
            Expr::constant("weeks"),
            Expr::constant(5i64),
            Expr::stream("unknown"),
        ] {
            let result = compiler.compile(&query().per(per));
            assert!(matches!(result, Err(QueryError::InvalidPer(_))));
        }
        assert!(compiler.compile(&query().per(Expr::constant("min"))).is_ok());
        assert!(compiler.compile(&query().per(Expr::stream("per"))).is_ok());
    }

    #[test]
    fn test_condition_validation() {
        let layout = layout();
        let store = InMemoryStore::new();
        let tables = make_tables(&layout, &store);
        let compiler = QueryCompiler::new(&layout, &tables);

        let unknown = query().on(Expr::aggregate("exchange").equal(Expr::constant("NYSE")));
        assert!(matches!(compiler.compile(&unknown), Err(QueryError::InvalidCondition(_))));

        let not_boolean = query().on(Expr::aggregate("symbol"));
        assert!(matches!(compiler.compile(&not_boolean), Err(QueryError::InvalidCondition(_))));

        let plan = compiler
            .compile(&query().on(Expr::aggregate("avgPrice").gt(Expr::constant(1.0))))
            .unwrap();
        assert!(plan.has_post_filter());
    }

    #[test]
    fn test_push_down_is_all_or_nothing() {
        let layout = layout();

        let store = InMemoryStore::new();
        let tables = make_tables(&layout, &store);
        assert!(QueryCompiler::new(&layout, &tables).compile(&query()).unwrap().is_optimised());
        let disabled = QueryCompiler::new(&layout, &tables).with_optimised(false);
        assert!(!disabled.compile(&query()).unwrap().is_optimised());

        let plain = InMemoryStore::without_push_down();
        let tables = make_tables(&layout, &plain);
        assert!(!QueryCompiler::new(&layout, &tables).compile(&query()).unwrap().is_optimised());

        // one plain table among queryable ones disables push-down for the plan
        let store = InMemoryStore::new();
        let mut mixed = make_tables(&layout, &store);
        mixed.insert(
            Granularity::Hours,
            Arc::new(InMemoryTable::plain("trades_HOURS", layout.table_schema().clone())),
        );
        assert!(!QueryCompiler::new(&layout, &mixed).compile(&query()).unwrap().is_optimised());
    }

    #[test]
    fn test_regrouping_is_detected() {
        let layout = layout();
        let store = InMemoryStore::new();
        let tables = make_tables(&layout, &store);
        let compiler = QueryCompiler::new(&layout, &tables);
        assert!(!compiler.compile(&query().group_by(&["symbol"])).unwrap().is_regrouped());
        assert!(!compiler.compile(&query().group_by(&["price"])).unwrap().is_regrouped());
    }
}
