//! Reserved column names of aggregation tables and execution parameters

/// Bucket start of a stored or output row
pub const AGG_TIMESTAMP: &str = "AGG_TIMESTAMP";

/// Event time of the most recent contribution to a bucket
pub const AGG_LAST_TIMESTAMP: &str = "AGG_LAST_TIMESTAMP";

/// Shard that produced a row (distributed mode only)
pub const SHARD_ID: &str = "SHARD_ID";

/// Inclusive lower bound of a lookup range
pub const START: &str = "_START";

/// Exclusive upper bound of a lookup range
pub const END: &str = "_END";

/// Shard parameter of distributed reads
pub const SHARD: &str = "_SHARD_ID";

/// Purge cutoff parameter
pub const PURGE_CUTOFF: &str = "_PURGE_CUTOFF";

/// Lower bound of not-yet-forwarded rows in a finer table
pub fn timestamp_filter(level: usize) -> String {
    format!("_AGG_TIMESTAMP_FILTER_{}", level)
}
