//! Aggregation definitions

use crate::error::{AggregationError, Result};
use serde::{Deserialize, Serialize};
use strata_core::{columns, Attribute, AttributeType, Granularity, Schema};

/// Aggregate function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    /// Whether the function reads an input attribute
    pub fn needs_attribute(&self) -> bool {
        !matches!(self, AggregateFunction::Count)
    }
}

/// Where the event time of an incoming event comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeColumn {
    /// Arrival time from the runtime clock
    ProcessingTime,
    /// The event's own timestamp
    #[default]
    EventTime,
    /// A named integer attribute of the event (milliseconds)
    Attribute(String),
}

/// One aggregate output, e.g. `avg(price) as avgPrice`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    /// Input attribute; absent for `count`
    #[serde(default)]
    pub attribute: Option<String>,
    /// Output attribute name
    #[serde(rename = "as")]
    pub alias: String,
}

/// Aggregation definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationDefinition {
    /// Unique name, also the prefix of the backing table names
    pub name: String,
    /// Schema of the aggregated input stream
    pub stream: Vec<Attribute>,
    /// Dimension attributes
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Non-aggregated selected attributes (last value per bucket)
    #[serde(default)]
    pub attributes: Vec<String>,
    /// Aggregate outputs
    pub aggregates: Vec<AggregateSpec>,
    /// Event time source
    #[serde(default)]
    pub time: TimeColumn,
    /// Aggregated granularities, finest first
    pub granularities: Vec<Granularity>,
}

impl AggregationDefinition {
    /// Create a new definition aggregating every granularity
    pub fn new(name: impl Into<String>, stream: Vec<Attribute>) -> Self {
        Self {
            name: name.into(),
            stream,
            group_by: Vec::new(),
            attributes: Vec::new(),
            aggregates: Vec::new(),
            time: TimeColumn::default(),
            granularities: Granularity::ALL.to_vec(),
        }
    }

    /// Set group by attributes
    pub fn group_by(mut self, attributes: &[&str]) -> Self {
        self.group_by = attributes.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Select an attribute without aggregating it
    pub fn select(mut self, attribute: &str) -> Self {
        self.attributes.push(attribute.to_string());
        self
    }

    /// Add an aggregate output
    pub fn aggregate(mut self, function: AggregateFunction, attribute: Option<&str>, alias: &str) -> Self {
        self.aggregates.push(AggregateSpec {
            function,
            attribute: attribute.map(|a| a.to_string()),
            alias: alias.to_string(),
        });
        self
    }

    /// Set the event time source
    pub fn time(mut self, time: TimeColumn) -> Self {
        self.time = time;
        self
    }

    /// Aggregate every granularity from `finest` to `coarsest` inclusive
    pub fn every(mut self, finest: Granularity, coarsest: Granularity) -> Self {
        self.granularities = Granularity::ALL
            .iter()
            .copied()
            .filter(|g| *g >= finest && *g <= coarsest)
            .collect();
        self
    }

    /// Aggregate exactly the given granularities
    pub fn granularities(mut self, granularities: &[Granularity]) -> Self {
        self.granularities = granularities.to_vec();
        self
    }

    /// Schema of the input stream
    pub fn stream_schema(&self) -> Result<Schema> {
        Schema::new(self.stream.clone()).map_err(|e| invalid(format!("stream schema: {}", e)))
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("Empty name"));
        }
        let stream = self.stream_schema()?;

        if self.granularities.is_empty() {
            return Err(invalid("No granularities defined"));
        }
        if self.granularities.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid("Granularities must be strictly increasing"));
        }

        let mut names: Vec<&str> = vec![columns::AGG_TIMESTAMP];
        for attribute in self.group_by.iter().chain(&self.attributes) {
            if !stream.contains(attribute) {
                return Err(invalid(format!("Unknown attribute: {}", attribute)));
            }
            if names.contains(&attribute.as_str()) {
                return Err(invalid(format!("Attribute selected twice: {}", attribute)));
            }
            names.push(attribute);
        }

        if self.aggregates.is_empty() {
            return Err(invalid("No aggregations defined"));
        }
        for spec in &self.aggregates {
            if spec.alias.is_empty() {
                return Err(invalid(format!("Missing output name for {}", spec.function.name())));
            }
            if names.contains(&spec.alias.as_str()) || is_reserved(&spec.alias) {
                return Err(invalid(format!("Output name already in use: {}", spec.alias)));
            }
            names.push(&spec.alias);

            match (&spec.attribute, spec.function.needs_attribute()) {
                (Some(attribute), true) => {
                    let attr = stream
                        .get(attribute)
                        .ok_or_else(|| invalid(format!("Unknown attribute: {}", attribute)))?;
                    if !attr.attr_type.is_numeric() {
                        return Err(invalid(format!(
                            "{}({}) requires a numeric attribute, got {}",
                            spec.function.name(),
                            attribute,
                            attr.attr_type
                        )));
                    }
                }
                (None, true) => {
                    return Err(invalid(format!("{} requires an attribute", spec.function.name())));
                }
                (Some(attribute), false) => {
                    if !stream.contains(attribute) {
                        return Err(invalid(format!("Unknown attribute: {}", attribute)));
                    }
                }
                (None, false) => {}
            }
        }

        if let TimeColumn::Attribute(attribute) = &self.time {
            match stream.get(attribute) {
                Some(attr) if attr.attr_type == AttributeType::Int => {}
                Some(attr) => {
                    return Err(invalid(format!(
                        "Time attribute {} must be int, got {}",
                        attribute, attr.attr_type
                    )))
                }
                None => return Err(invalid(format!("Unknown time attribute: {}", attribute))),
            }
        }
        Ok(())
    }

    /// Coarsest aggregated granularity
    pub fn coarsest(&self) -> Option<Granularity> {
        self.granularities.last().copied()
    }

    /// Backing table name for a granularity
    pub fn table_name(&self, granularity: Granularity) -> String {
        format!("{}_{}", self.name, granularity)
    }
}

fn is_reserved(name: &str) -> bool {
    name.starts_with("AGG_") || name == columns::SHARD_ID || name.starts_with('_')
}

fn invalid(message: impl Into<String>) -> AggregationError {
    AggregationError::InvalidDefinition(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Vec<Attribute> {
        vec![
            Attribute::new("symbol", AttributeType::String),
            Attribute::new("price", AttributeType::Float),
            Attribute::new("volume", AttributeType::Int),
            Attribute::new("ts", AttributeType::Int),
        ]
    }

    fn trades() -> AggregationDefinition {
        AggregationDefinition::new("trades", stream())
            .group_by(&["symbol"])
            .aggregate(AggregateFunction::Avg, Some("price"), "avgPrice")
            .aggregate(AggregateFunction::Sum, Some("volume"), "totalVolume")
            .every(Granularity::Seconds, Granularity::Years)
    }

    #[test]
    fn test_aggregation_definition() {
        let definition = trades().time(TimeColumn::Attribute("ts".to_string()));
        assert!(definition.validate().is_ok());
        assert_eq!(definition.granularities.len(), 6);
        assert_eq!(definition.coarsest(), Some(Granularity::Years));
        assert_eq!(definition.table_name(Granularity::Minutes), "trades_MINUTES");
    }

    #[test]
    fn test_every_selects_range() {
        let definition = trades().every(Granularity::Minutes, Granularity::Days);
        assert_eq!(
            definition.granularities,
            vec![Granularity::Minutes, Granularity::Hours, Granularity::Days]
        );
    }

    #[test]
    fn test_aggregate_validation() {
        let definition = AggregationDefinition::new("", stream());
        assert!(definition.validate().is_err());

        // No aggregations
        let definition = AggregationDefinition::new("trades", stream()).group_by(&["symbol"]);
        assert!(matches!(
            definition.validate(),
            Err(AggregationError::InvalidDefinition(_))
        ));

        // Unknown group by attribute
        assert!(trades().group_by(&["exchange"]).validate().is_err());

        // Non-numeric aggregate input
        let definition = trades().aggregate(AggregateFunction::Sum, Some("symbol"), "bad");
        assert!(definition.validate().is_err());

        // Missing attribute for sum, none needed for count
        assert!(trades().aggregate(AggregateFunction::Sum, None, "bad").validate().is_err());
        assert!(trades().aggregate(AggregateFunction::Count, None, "n").validate().is_ok());

        // Duplicate and reserved output names
        assert!(trades().aggregate(AggregateFunction::Max, Some("price"), "avgPrice").validate().is_err());
        assert!(trades().aggregate(AggregateFunction::Max, Some("price"), "AGG_X").validate().is_err());
        assert!(trades().aggregate(AggregateFunction::Max, Some("price"), "symbol").validate().is_err());
    }

    #[test]
    fn test_granularity_and_time_validation() {
        let unordered = trades().granularities(&[Granularity::Hours, Granularity::Minutes]);
        assert!(unordered.validate().is_err());
        assert!(trades().granularities(&[]).validate().is_err());

        let bad_time = trades().time(TimeColumn::Attribute("price".to_string()));
        assert!(bad_time.validate().is_err());
        let missing_time = trades().time(TimeColumn::Attribute("when".to_string()));
        assert!(missing_time.validate().is_err());
    }

    #[test]
    fn test_definition_from_yaml() {
        let yaml = r#"
name: trades
stream:
  - { name: symbol, type: string }
  - { name: price, type: float }
group_by: [symbol]
aggregates:
  - { function: avg, attribute: price, as: avgPrice }
  - { function: count, as: trades }
time: processing_time
granularities: [SECONDS, MINUTES]
"#;
        let definition: AggregationDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(definition.validate().is_ok());
        assert_eq!(definition.time, TimeColumn::ProcessingTime);
        assert_eq!(definition.aggregates[1].function, AggregateFunction::Count);
        assert_eq!(definition.aggregates[1].attribute, None);
    }
}
