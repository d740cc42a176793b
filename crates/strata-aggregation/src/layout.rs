//! Stored and output row layouts derived from a definition
//!
//! Stored rows (one per bucket and group) are laid out as
//!
//! ```text
//! AGG_TIMESTAMP, [SHARD_ID], group-by..., attributes..., AGG_LAST_TIMESTAMP, base...
//! ```
//!
//! where the base columns hold mergeable partial aggregates (`AGG_SUM_x`,
//! `AGG_COUNT`, `AGG_MIN_x`, `AGG_MAX_x`) shared by every output that needs
//! them. Output rows replace the base columns with the aggregate outputs,
//! computed from the bases by a final expression (`avg = AGG_SUM_x / AGG_COUNT`)
//! and drop the shard and last-timestamp columns.

use crate::definition::{AggregateFunction, AggregationDefinition};
use crate::error::{AggregationError, Result};
use strata_core::{
    columns, ArithOp, Attribute, AttributeType, BindScope, BoundExpr, Expr, Frame, MergeFunction, Row,
    RowMerger, Schema, Timestamp, Value,
};

/// Partial aggregate kept per bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseFunction {
    Sum,
    Count,
    Min,
    Max,
}

impl BaseFunction {
    fn merge_function(&self) -> MergeFunction {
        match self {
            BaseFunction::Sum | BaseFunction::Count => MergeFunction::Sum,
            BaseFunction::Min => MergeFunction::Min,
            BaseFunction::Max => MergeFunction::Max,
        }
    }
}

/// A base column of the stored layout
#[derive(Debug, Clone, PartialEq)]
pub struct BaseColumn {
    pub name: String,
    pub function: BaseFunction,
    /// Stream attribute feeding the base; None for counts
    pub source: Option<usize>,
}

/// Aggregate output computed from base columns
#[derive(Debug, Clone)]
struct OutputColumn {
    expr: BoundExpr,
}

/// Positional metadata shared by executors, the initializer and lookups
#[derive(Debug, Clone)]
pub struct AggregationLayout {
    name: String,
    stream: Schema,
    table: Schema,
    output: Schema,
    shard_column: Option<usize>,
    group_by: Vec<usize>,
    attributes: Vec<usize>,
    group_sources: Vec<usize>,
    attribute_sources: Vec<usize>,
    last_timestamp: usize,
    bases: Vec<BaseColumn>,
    outputs: Vec<OutputColumn>,
}

impl AggregationLayout {
    /// Derive layouts; `distributed` adds the `SHARD_ID` column
    pub fn new(definition: &AggregationDefinition, distributed: bool) -> Result<Self> {
        definition.validate()?;
        let stream = definition.stream_schema()?;
        let mut table = Schema::default();
        let mut output = Schema::default();

        table.push(Attribute::new(columns::AGG_TIMESTAMP, AttributeType::Int))?;
        output.push(Attribute::new(columns::AGG_TIMESTAMP, AttributeType::Int))?;

        let shard_column = if distributed {
            table.push(Attribute::new(columns::SHARD_ID, AttributeType::String))?;
            Some(table.len() - 1)
        } else {
            None
        };

        let place = |names: &[String], table: &mut Schema, output: &mut Schema| -> Result<(Vec<usize>, Vec<usize>)> {
            let mut positions = Vec::new();
            let mut sources = Vec::new();
            for name in names {
                let source = stream
                    .index_of(name)
                    .ok_or_else(|| AggregationError::InvalidDefinition(format!("Unknown attribute: {}", name)))?;
                let attribute = stream.attributes()[source].clone();
                table.push(attribute.clone())?;
                output.push(attribute)?;
                positions.push(table.len() - 1);
                sources.push(source);
            }
            Ok((positions, sources))
        };
        let (group_by, group_sources) = place(&definition.group_by, &mut table, &mut output)?;
        let (attributes, attribute_sources) = place(&definition.attributes, &mut table, &mut output)?;

        table.push(Attribute::new(columns::AGG_LAST_TIMESTAMP, AttributeType::Int))?;
        let last_timestamp = table.len() - 1;

        let mut bases: Vec<BaseColumn> = Vec::new();
        let mut base = |function: BaseFunction, attribute: Option<&str>, table: &mut Schema| -> Result<String> {
            let name = match (function, attribute) {
                (BaseFunction::Count, _) | (_, None) => "AGG_COUNT".to_string(),
                (BaseFunction::Sum, Some(a)) => format!("AGG_SUM_{}", a),
                (BaseFunction::Min, Some(a)) => format!("AGG_MIN_{}", a),
                (BaseFunction::Max, Some(a)) => format!("AGG_MAX_{}", a),
            };
            if bases.iter().any(|b| b.name == name) {
                return Ok(name);
            }
            let source = match function {
                BaseFunction::Count => None,
                _ => attribute.and_then(|a| stream.index_of(a)),
            };
            let attr_type = match source {
                Some(index) => stream.attributes()[index].attr_type,
                None => AttributeType::Int,
            };
            table.push(Attribute::new(name.clone(), attr_type))?;
            bases.push(BaseColumn {
                name: name.clone(),
                function,
                source,
            });
            Ok(name)
        };

        let mut final_exprs = Vec::new();
        for spec in &definition.aggregates {
            let attribute = spec.attribute.as_deref();
            let expr = match spec.function {
                AggregateFunction::Sum => Expr::aggregate(base(BaseFunction::Sum, attribute, &mut table)?),
                AggregateFunction::Count => Expr::aggregate(base(BaseFunction::Count, None, &mut table)?),
                AggregateFunction::Min => Expr::aggregate(base(BaseFunction::Min, attribute, &mut table)?),
                AggregateFunction::Max => Expr::aggregate(base(BaseFunction::Max, attribute, &mut table)?),
                AggregateFunction::Avg => Expr::arithmetic(
                    Expr::aggregate(base(BaseFunction::Sum, attribute, &mut table)?),
                    ArithOp::Divide,
                    Expr::aggregate(base(BaseFunction::Count, None, &mut table)?),
                ),
            };
            final_exprs.push((spec.alias.clone(), expr));
        }

        let scope = BindScope::new().with_aggregate(&table);
        let mut outputs = Vec::new();
        for (alias, expr) in final_exprs {
            let expr = expr.bind(&scope)?;
            output.push(Attribute::new(alias, expr.return_type()))?;
            outputs.push(OutputColumn { expr });
        }

        Ok(Self {
            name: definition.name.clone(),
            stream,
            table,
            output,
            shard_column,
            group_by,
            attributes,
            group_sources,
            attribute_sources,
            last_timestamp,
            bases,
            outputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_schema(&self) -> &Schema {
        &self.stream
    }

    /// Layout of rows persisted in the per-granularity tables
    pub fn table_schema(&self) -> &Schema {
        &self.table
    }

    /// Layout of rows returned by lookups
    pub fn output_schema(&self) -> &Schema {
        &self.output
    }

    pub fn is_distributed(&self) -> bool {
        self.shard_column.is_some()
    }

    pub fn timestamp_column(&self) -> usize {
        0
    }

    pub fn shard_column(&self) -> Option<usize> {
        self.shard_column
    }

    /// Stored positions of the group-by attributes
    pub fn group_by_columns(&self) -> &[usize] {
        &self.group_by
    }

    /// Stored positions of the non-aggregated attributes
    pub fn attribute_columns(&self) -> &[usize] {
        &self.attributes
    }

    pub fn last_timestamp_column(&self) -> usize {
        self.last_timestamp
    }

    pub fn bases(&self) -> &[BaseColumn] {
        &self.bases
    }

    /// Stored position of the first base column
    pub fn first_base_column(&self) -> usize {
        self.last_timestamp + 1
    }

    /// Names of the stored group-by attributes
    pub fn group_by_names(&self) -> Vec<&str> {
        self.group_by
            .iter()
            .filter_map(|&column| self.table.attribute(column))
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Stored columns that identify a bucket's group (shard first, then group-by)
    pub fn key_columns(&self) -> Vec<usize> {
        self.shard_column.into_iter().chain(self.group_by.iter().copied()).collect()
    }

    /// Merge rule of every stored column; None marks key columns
    pub fn merge_functions(&self) -> Vec<Option<MergeFunction>> {
        let mut functions = vec![None; self.table.len()];
        for &column in &self.attributes {
            functions[column] = Some(MergeFunction::Last);
        }
        functions[self.last_timestamp] = Some(MergeFunction::Max);
        for (offset, base) in self.bases.iter().enumerate() {
            functions[self.first_base_column() + offset] = Some(base.function.merge_function());
        }
        functions
    }

    /// Merger folding stored rows of the same bucket and group
    pub fn bucket_merger(&self) -> RowMerger {
        RowMerger::identity(&self.merge_functions(), Some(self.last_timestamp))
    }

    /// Pre-aggregate one raw event into a stored-layout row. The timestamp
    /// column holds the event time until an executor buckets it.
    pub fn base_row(&self, event_time: Timestamp, values: &[Value], shard: Option<&str>) -> Row {
        let value = |index: usize| values.get(index).cloned().unwrap_or(Value::Null);
        let mut row = Vec::with_capacity(self.table.len());
        row.push(Value::Int(event_time));
        if self.shard_column.is_some() {
            row.push(shard.map(Value::from).unwrap_or(Value::Null));
        }
        row.extend(self.group_sources.iter().map(|&i| value(i)));
        row.extend(self.attribute_sources.iter().map(|&i| value(i)));
        row.push(Value::Int(event_time));
        for base in &self.bases {
            row.push(match (base.function, base.source) {
                (BaseFunction::Count, _) => Value::Int(1),
                (_, Some(source)) => value(source),
                (_, None) => Value::Null,
            });
        }
        row
    }

    /// Compute an output row from a stored-layout row
    pub fn finalize(&self, stored: &[Value]) -> Row {
        let frame = Frame::new().with_aggregate(stored);
        let value = |index: usize| stored.get(index).cloned().unwrap_or(Value::Null);
        let mut row = Vec::with_capacity(self.output.len());
        row.push(value(0));
        row.extend(self.group_by.iter().map(|&i| value(i)));
        row.extend(self.attributes.iter().map(|&i| value(i)));
        row.extend(self.outputs.iter().map(|output| output.expr.evaluate(&frame)));
        row
    }

    /// Stored column of a dimension (group-by or selected attribute) by name
    pub fn dimension_column(&self, name: &str) -> Option<usize> {
        let index = self.table.index_of(name)?;
        (self.group_by.contains(&index) || self.attributes.contains(&index)).then_some(index)
    }
}
