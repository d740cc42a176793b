//! Granularity decomposition of a lookup range
//!
//! `[start, end)` is covered by the coarsest configured granularity not
//! coarser than the requested one for its aligned bulk; the unaligned
//! slivers on either side are covered recursively by finer granularities.
//! The finest granularity takes whatever remains.

use strata_core::{Granularity, TimeRange};

/// One piece of a decomposed range, read from a single granularity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position in the configured granularities, finest first
    pub level: usize,
    pub granularity: Granularity,
    pub range: TimeRange,
}

/// Split `range` into gap-free, non-overlapping segments in time order.
/// `granularities` are the configured ones, finest first.
pub fn decompose(range: TimeRange, per: Granularity, granularities: &[Granularity]) -> Vec<Segment> {
    let mut segments = Vec::new();
    if let Some(top) = granularities.iter().rposition(|g| *g <= per) {
        split(range, top, granularities, &mut segments);
    }
    segments
}

fn split(range: TimeRange, level: usize, granularities: &[Granularity], out: &mut Vec<Segment>) {
    if range.is_empty() {
        return;
    }
    let granularity = granularities[level];
    if level == 0 {
        out.push(Segment {
            level,
            granularity,
            range,
        });
        return;
    }

    let low = granularity.ceil(range.start);
    let high = granularity.bucket_start(range.end);
    if low >= high {
        split(range, level - 1, granularities, out);
        return;
    }
    split(TimeRange::new(range.start, low), level - 1, granularities, out);
    out.push(Segment {
        level,
        granularity,
        range: TimeRange::new(low, high),
    });
    split(TimeRange::new(high, range.end), level - 1, granularities, out);
}
