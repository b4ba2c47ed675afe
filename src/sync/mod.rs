// Sync module - Timestamp alignment across sources

use crate::error::{LogSyncError, Result};
use crate::source::{LogSource, SourceId};
use crate::timestamp::Instant;
use std::collections::BTreeMap;

/// Reference point for a sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncAnchor {
    pub source: SourceId,
    pub sequence_index: u64,
    pub timestamp: Instant,
}

impl SyncAnchor {
    /// Build an anchor from a line of `source`
    ///
    /// Lines without a timestamp borrow the nearest timestamped neighbor's,
    /// preferring earlier lines.
    pub fn from_line(source: &LogSource, sequence_index: u64) -> Result<Self> {
        let position = source
            .position_of(sequence_index)
            .ok_or(LogSyncError::LineNotFound {
                source_id: source.id(),
                sequence_index,
            })?;
        let timestamp =
            source
                .effective_timestamp(position)
                .ok_or(LogSyncError::NoAnchorTimestamp {
                    source_id: source.id(),
                    sequence_index,
                })?;
        Ok(Self {
            source: source.id(),
            sequence_index,
            timestamp,
        })
    }
}

/// Why a sync result had to be clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRange {
    /// The source has no timestamped lines; clamped to the first line
    NoTimestamps,
    /// Every timestamp is after the anchor; clamped to the first line
    BeforeStart,
    /// Every timestamp is before the anchor; clamped to the last line
    AfterEnd,
}

/// Where a source should scroll to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTarget {
    pub sequence_index: u64,
    pub out_of_range: Option<OutOfRange>,
}

impl SyncTarget {
    fn exact(sequence_index: u64) -> Self {
        Self {
            sequence_index,
            out_of_range: None,
        }
    }

    fn clamped(sequence_index: u64, reason: OutOfRange) -> Self {
        Self {
            sequence_index,
            out_of_range: Some(reason),
        }
    }

    pub fn is_out_of_range(&self) -> bool {
        self.out_of_range.is_some()
    }
}

/// Compute the matching line of every non-anchor source
///
/// For each source the result is the latest line whose timestamp is at or
/// before the anchor; among lines sharing that timestamp the earliest wins.
/// Empty sources are left out of the mapping.
pub fn sync_targets<'a, I>(anchor: &SyncAnchor, sources: I) -> BTreeMap<SourceId, SyncTarget>
where
    I: IntoIterator<Item = &'a LogSource>,
{
    sources
        .into_iter()
        .filter(|source| source.id() != anchor.source)
        .filter_map(|source| target_for(source, anchor.timestamp).map(|t| (source.id(), t)))
        .collect()
}

/// Nearest-before match of `timestamp` in one source
///
/// Timestamps are assumed to be roughly non-decreasing; when they are not,
/// the binary search still returns a defined line near the anchor.
pub fn target_for(source: &LogSource, timestamp: Instant) -> Option<SyncTarget> {
    let lines = source.lines();
    let first = lines.first()?.sequence_index;
    let last = lines.last()?.sequence_index;
    let stamped = source.timestamped_positions();
    let ts_at = |pos: usize| lines[pos].timestamp;

    if stamped.is_empty() {
        return Some(SyncTarget::clamped(first, OutOfRange::NoTimestamps));
    }

    let k = stamped.partition_point(|&pos| ts_at(pos).map_or(false, |ts| ts <= timestamp));
    if k == 0 {
        return Some(SyncTarget::clamped(first, OutOfRange::BeforeStart));
    }

    let best = ts_at(stamped[k - 1])?;
    if k == stamped.len() && best < timestamp {
        return Some(SyncTarget::clamped(last, OutOfRange::AfterEnd));
    }

    // Earliest line carrying the winning timestamp
    let first_equal = stamped[..k].partition_point(|&pos| ts_at(pos).map_or(false, |ts| ts < best));
    Some(SyncTarget::exact(lines[stamped[first_equal]].sequence_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PendingLine;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn source_with(id: u8, stamps: &[Option<i64>]) -> LogSource {
        let mut source = LogSource::new(SourceId::new(id), 1, vec![PathBuf::from("/tmp/t.log")]);
        let origin: Arc<Path> = Arc::from(Path::new("/tmp/t.log"));
        source.append(
            stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| PendingLine {
                    raw_text: format!("line {}", i),
                    timestamp: ts.map(|ms| Instant::from_millis(ms, true)),
                    origin_file: Arc::clone(&origin),
                    origin_line_number: i as u64 + 1,
                })
                .collect(),
        );
        source
    }

    fn anchor(source: u8, ms: i64) -> SyncAnchor {
        SyncAnchor {
            source: SourceId::new(source),
            sequence_index: 0,
            timestamp: Instant::from_millis(ms, true),
        }
    }

    #[test]
    fn test_exact_and_preceding_match() {
        let b = source_with(2, &[Some(1000), Some(2000), Some(3000)]);
        assert_eq!(target_for(&b, Instant::from_millis(2000, true)).unwrap(), SyncTarget::exact(1));
        assert_eq!(target_for(&b, Instant::from_millis(2999, true)).unwrap(), SyncTarget::exact(1));
    }

    #[test]
    fn test_equal_timestamps_prefer_earliest() {
        let b = source_with(2, &[Some(1000), Some(2000), Some(2000), Some(2000), Some(4000)]);
        assert_eq!(target_for(&b, Instant::from_millis(2500, true)).unwrap(), SyncTarget::exact(1));
    }

    #[test]
    fn test_untimestamped_lines_skipped() {
        let b = source_with(2, &[None, Some(1000), None, None, Some(5000), None]);
        assert_eq!(target_for(&b, Instant::from_millis(4000, true)).unwrap(), SyncTarget::exact(1));
        assert_eq!(target_for(&b, Instant::from_millis(5000, true)).unwrap(), SyncTarget::exact(4));
    }

    #[test]
    fn test_clamp_before_start() {
        let b = source_with(2, &[None, Some(5000), Some(6000)]);
        let target = target_for(&b, Instant::from_millis(1000, true)).unwrap();
        assert_eq!(target, SyncTarget::clamped(0, OutOfRange::BeforeStart));
        assert!(target.is_out_of_range());
    }

    #[test]
    fn test_clamp_after_end() {
        let b = source_with(2, &[Some(1000), Some(2000), None]);
        let target = target_for(&b, Instant::from_millis(9000, true)).unwrap();
        assert_eq!(target, SyncTarget::clamped(2, OutOfRange::AfterEnd));
    }

    #[test]
    fn test_last_line_equal_is_in_range() {
        let b = source_with(2, &[Some(1000), Some(2000)]);
        let target = target_for(&b, Instant::from_millis(2000, true)).unwrap();
        assert_eq!(target, SyncTarget::exact(1));
    }

    #[test]
    fn test_no_timestamps() {
        let b = source_with(2, &[None, None]);
        let target = target_for(&b, Instant::from_millis(1000, true)).unwrap();
        assert_eq!(target, SyncTarget::clamped(0, OutOfRange::NoTimestamps));
    }

    #[test]
    fn test_empty_source_omitted() {
        let a = source_with(1, &[Some(1000)]);
        let b = source_with(2, &[]);
        let result = sync_targets(&anchor(1, 1000), [&a, &b]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_anchor_source_excluded() {
        let a = source_with(1, &[Some(1000), Some(2000)]);
        let b = source_with(2, &[Some(1500)]);
        let result = sync_targets(&anchor(1, 2000), [&a, &b]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[&SourceId::new(2)], SyncTarget::exact(0));
    }

    #[test]
    fn test_non_monotonic_is_defined() {
        let b = source_with(2, &[Some(3000), Some(1000), Some(2000), Some(5000)]);
        let target = target_for(&b, Instant::from_millis(2500, true));
        assert!(target.is_some());
    }

    #[test]
    fn test_anchor_from_untimestamped_line() {
        let a = source_with(1, &[Some(1000), None, Some(3000)]);
        let anchor = SyncAnchor::from_line(&a, 1).unwrap();
        assert_eq!(anchor.timestamp.millis(), 1000);

        let bare = source_with(3, &[None]);
        assert!(matches!(
            SyncAnchor::from_line(&bare, 0),
            Err(LogSyncError::NoAnchorTimestamp { .. })
        ));
        assert!(matches!(
            SyncAnchor::from_line(&a, 99),
            Err(LogSyncError::LineNotFound { .. })
        ));
    }
}
