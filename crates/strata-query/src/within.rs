//! `within` clause resolution
//!
//! A lookup range is either two bounds or a single wildcard pattern:
//!
//! ```text
//! within 1496275200000, 1498867200000
//! within "2017-06-01 00:00:00", "2017-07-01 00:00:00 +05:30"
//! within "2017-06-** **:**:**"
//! ```
//!
//! Bounds are integer milliseconds or `yyyy-MM-dd HH:mm:ss` strings with an
//! optional `±HH:MM` offset (UTC otherwise). A pattern fixes a prefix of
//! the date-time fields and wildcards the rest with `**`; it selects the
//! whole unit named by its last fixed field.

use crate::error::{QueryError, Result};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use strata_core::{AttributeType, BindScope, BoundExpr, Expr, Frame, Schema, TimeRange, Timestamp, Value};

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const WILDCARD: &str = "**";

/// Unresolved `within` clause
#[derive(Debug, Clone, PartialEq)]
pub enum Within {
    /// `[start, end)` bounds
    Range { start: Expr, end: Expr },
    /// Wildcard pattern such as `2017-06-** **:**:**`
    Pattern(Expr),
}

impl Within {
    pub fn between(start: Expr, end: Expr) -> Self {
        Within::Range { start, end }
    }

    /// Constant millisecond bounds
    pub fn millis(start: Timestamp, end: Timestamp) -> Self {
        Within::between(Expr::constant(start), Expr::constant(end))
    }

    pub fn pattern(pattern: Expr) -> Self {
        Within::Pattern(pattern)
    }

    /// Bind bound expressions against the triggering stream. Constant
    /// clauses are resolved and validated here.
    pub fn bind(&self, stream: &Schema) -> Result<BoundWithin> {
        let scope = BindScope::new().with_stream(stream);
        let bound = match self {
            Within::Range { start, end } => BoundWithin::Range {
                start: bind_bound(start, &scope)?,
                end: bind_bound(end, &scope)?,
            },
            Within::Pattern(pattern) => {
                let pattern = pattern
                    .bind(&scope)
                    .map_err(|e| QueryError::InvalidWithin(e.to_string()))?;
                if pattern.return_type() != AttributeType::String {
                    return Err(QueryError::InvalidWithin(format!(
                        "pattern must be a string, got {}",
                        pattern.return_type()
                    )));
                }
                BoundWithin::Pattern(pattern)
            }
        };
        if bound.is_constant() {
            return Ok(BoundWithin::Fixed(bound.resolve(&[])?));
        }
        Ok(bound)
    }
}

fn bind_bound(expr: &Expr, scope: &BindScope<'_>) -> Result<BoundExpr> {
    let bound = expr
        .bind(scope)
        .map_err(|e| QueryError::InvalidWithin(e.to_string()))?;
    match bound.return_type() {
        AttributeType::Int | AttributeType::String => Ok(bound),
        other => Err(QueryError::InvalidWithin(format!(
            "bound must be an int or a string, got {}",
            other
        ))),
    }
}

/// `within` clause ready to resolve per triggering event
#[derive(Debug, Clone)]
pub enum BoundWithin {
    Fixed(TimeRange),
    Range { start: BoundExpr, end: BoundExpr },
    Pattern(BoundExpr),
}

impl BoundWithin {
    fn is_constant(&self) -> bool {
        match self {
            BoundWithin::Fixed(_) => true,
            BoundWithin::Range { start, end } => start.as_constant().is_some() && end.as_constant().is_some(),
            BoundWithin::Pattern(pattern) => pattern.as_constant().is_some(),
        }
    }

    /// Resolve `[start, end)` for one triggering event
    pub fn resolve(&self, trigger: &[Value]) -> Result<TimeRange> {
        let frame = Frame::new().with_stream(trigger);
        let (start, end) = match self {
            BoundWithin::Fixed(range) => return Ok(*range),
            BoundWithin::Range { start, end } => (
                to_timestamp(&start.evaluate(&frame))?,
                to_timestamp(&end.evaluate(&frame))?,
            ),
            BoundWithin::Pattern(pattern) => match pattern.evaluate(&frame) {
                Value::String(text) => {
                    let range = parse_pattern(&text)?;
                    (range.start, range.end)
                }
                other => {
                    return Err(QueryError::InvalidWithin(format!("pattern evaluated to {}", other)));
                }
            },
        };
        if start >= end {
            return Err(QueryError::InvalidTimeRange { start, end });
        }
        Ok(TimeRange::new(start, end))
    }
}

fn to_timestamp(value: &Value) -> Result<Timestamp> {
    match value {
        Value::Int(millis) => Ok(*millis),
        Value::String(text) => parse_timestamp(text),
        other => Err(QueryError::InvalidWithin(format!("bound evaluated to {}", other))),
    }
}

/// Parse `yyyy-MM-dd HH:mm:ss [±HH:MM]` into epoch milliseconds
pub fn parse_timestamp(text: &str) -> Result<Timestamp> {
    let (date_time, offset) = split_offset(text)?;
    let naive = NaiveDateTime::parse_from_str(date_time, DATE_TIME_FORMAT)
        .map_err(|e| QueryError::InvalidWithin(format!("{}: {}", text, e)))?;
    localize(&naive, offset, text)
}

/// Parse a `**` wildcard pattern into the range it selects
pub fn parse_pattern(text: &str) -> Result<TimeRange> {
    let invalid = |reason: &str| QueryError::InvalidWithin(format!("{}: {}", text, reason));
    let (date_time, offset) = split_offset(text)?;
    let (date, time) = date_time
        .split_once(' ')
        .ok_or_else(|| invalid("expected yyyy-MM-dd HH:mm:ss"))?;
    let fields: Vec<&str> = date.split('-').chain(time.split(':')).collect();
    if fields.len() != 6 {
        return Err(invalid("expected yyyy-MM-dd HH:mm:ss"));
    }

    let fixed = fields.iter().take_while(|field| **field != WILDCARD).count();
    if fixed == 0 {
        return Err(invalid("year cannot be a wildcard"));
    }
    if fields[fixed..].iter().any(|field| *field != WILDCARD) {
        return Err(invalid("wildcards must be trailing"));
    }

    let mut values = [0u32, 1, 1, 0, 0, 0];
    for (slot, field) in values.iter_mut().zip(&fields[..fixed]) {
        *slot = field.parse().map_err(|_| invalid("non-numeric field"))?;
    }
    let year = values[0] as i32;
    let start_date = NaiveDate::from_ymd_opt(year, values[1], values[2]).ok_or_else(|| invalid("no such date"))?;
    let start = start_date
        .and_hms_opt(values[3], values[4], values[5])
        .ok_or_else(|| invalid("no such time"))?;

    let end = match fixed {
        1 => NaiveDate::from_ymd_opt(year + 1, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
        2 => {
            let (y, m) = if values[1] == 12 { (year + 1, 1) } else { (year, values[1] + 1) };
            NaiveDate::from_ymd_opt(y, m, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        _ => {
            let unit: i64 = match fixed {
                3 => 86_400_000,
                4 => 3_600_000,
                5 => 60_000,
                _ => 1_000,
            };
            let start = localize(&start, offset, text)?;
            return Ok(TimeRange::new(start, start + unit));
        }
    }
    .ok_or_else(|| invalid("range overflows"))?;

    Ok(TimeRange::new(localize(&start, offset, text)?, localize(&end, offset, text)?))
}

/// Split off a trailing `±HH:MM` offset
fn split_offset(text: &str) -> Result<(&str, Option<FixedOffset>)> {
    let text = text.trim();
    let Some((head, tail)) = text.rsplit_once(' ') else {
        return Ok((text, None));
    };
    let Some(sign) = tail.chars().next().filter(|c| *c == '+' || *c == '-') else {
        return Ok((text, None));
    };
    let invalid = || QueryError::InvalidWithin(format!("{}: bad offset {}", text, tail));
    let (hours, minutes) = tail[1..].split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    let seconds = (hours * 3600 + minutes * 60) * if sign == '-' { -1 } else { 1 };
    let offset = FixedOffset::east_opt(seconds).ok_or_else(invalid)?;
    Ok((head.trim_end(), Some(offset)))
}

fn localize(naive: &NaiveDateTime, offset: Option<FixedOffset>, text: &str) -> Result<Timestamp> {
    offset
        .unwrap_or_else(|| Utc.fix())
        .from_local_datetime(naive)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| QueryError::InvalidWithin(format!("{}: ambiguous local time", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Attribute;

    const JUNE_2017: i64 = 1_496_275_200_000;
    const JULY_2017: i64 = 1_498_867_200_000;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("2017-06-01 00:00:00").unwrap(), JUNE_2017);
        assert_eq!(
            parse_timestamp("2017-06-01 05:30:00 +05:30").unwrap(),
            JUNE_2017
        );
        assert_eq!(
            parse_timestamp("2017-05-31 22:00:00 -02:00").unwrap(),
            JUNE_2017
        );
        assert!(parse_timestamp("2017-06-01").is_err());
        assert!(parse_timestamp("2017-06-01 00:00:00 +5").is_err());
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(
            parse_pattern("2017-06-** **:**:**").unwrap(),
            TimeRange::new(JUNE_2017, JULY_2017)
        );
        let day = parse_pattern("2017-06-01 **:**:**").unwrap();
        assert_eq!(day, TimeRange::new(JUNE_2017, JUNE_2017 + 86_400_000));
        let minute = parse_pattern("2017-06-01 00:01:**").unwrap();
        assert_eq!(minute, TimeRange::new(JUNE_2017 + 60_000, JUNE_2017 + 120_000));

        let december = parse_pattern("2017-12-** **:**:**").unwrap();
        assert_eq!(december.end, parse_timestamp("2018-01-01 00:00:00").unwrap());
        let year = parse_pattern("2017-**-** **:**:**").unwrap();
        assert_eq!(year.end, parse_timestamp("2018-01-01 00:00:00").unwrap());

        let shifted = parse_pattern("2017-06-** **:**:** +05:30").unwrap();
        assert_eq!(shifted.start, JUNE_2017 - 19_800_000);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(parse_pattern("****-06-** **:**:**").is_err());
        assert!(parse_pattern("2017-**-01 **:**:**").is_err());
        assert!(parse_pattern("2017-13-** **:**:**").is_err());
        assert!(parse_pattern("2017-06").is_err());
    }

    #[test]
    fn test_constant_within_is_resolved_at_bind() {
        let stream = Schema::default();
        let bound = Within::millis(0, 1_000).bind(&stream).unwrap();
        assert!(matches!(bound, BoundWithin::Fixed(range) if range == TimeRange::new(0, 1_000)));

        let reversed = Within::millis(1_000, 1_000).bind(&stream);
        assert!(matches!(reversed, Err(QueryError::InvalidTimeRange { .. })));

        let float = Within::between(Expr::constant(1.5), Expr::constant(2_000i64)).bind(&stream);
        assert!(matches!(float, Err(QueryError::InvalidWithin(_))));
    }

    #[test]
    fn test_within_from_stream_attributes() {
        let stream = Schema::new(vec![
            Attribute::new("from", AttributeType::Int),
            Attribute::new("month", AttributeType::String),
        ])
        .unwrap();
        let range = Within::between(Expr::stream("from"), Expr::constant("2017-07-01 00:00:00"))
            .bind(&stream)
            .unwrap();
        let trigger = vec![Value::Int(JUNE_2017), Value::from("2017-06-** **:**:**")];
        assert_eq!(range.resolve(&trigger).unwrap(), TimeRange::new(JUNE_2017, JULY_2017));

        let pattern = Within::pattern(Expr::stream("month")).bind(&stream).unwrap();
        assert_eq!(pattern.resolve(&trigger).unwrap(), TimeRange::new(JUNE_2017, JULY_2017));

        let late = vec![Value::Int(JULY_2017), Value::Null];
        assert!(matches!(range.resolve(&late), Err(QueryError::InvalidTimeRange { .. })));
    }
}
