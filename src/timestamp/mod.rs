// Timestamp module - Detection and normalization of log line timestamps

mod formats;

pub use formats::TimestampFormat;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};
use formats::ParseContext;

/// A normalized point in time: milliseconds since the Unix epoch (UTC)
///
/// Ordering and equality only look at the millisecond value; `has_date`
/// records whether the source text carried a calendar date or whether the
/// date was inferred.
#[derive(Debug, Clone, Copy)]
pub struct Instant {
    millis: i64,
    has_date: bool,
}

impl Instant {
    pub fn from_millis(millis: i64, has_date: bool) -> Self {
        Self { millis, has_date }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn has_date(&self) -> bool {
        self.has_date
    }

    /// Absolute distance to another instant in milliseconds
    pub fn distance(&self, other: &Instant) -> u64 {
        self.millis.abs_diff(other.millis)
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.millis)
    }
}

impl PartialEq for Instant {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Instant {}

impl PartialOrd for Instant {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instant {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl std::hash::Hash for Instant {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.millis.hash(state);
    }
}

/// Turns raw log lines into comparable instants
///
/// Formats are tried in [`TimestampFormat::PRIORITY`] order and the first one
/// that yields a valid instant wins. Stamps without a zone are read in the
/// normalizer's offset; stamps without a year take it from the reference date.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: FixedOffset,
    today: NaiveDate,
}

impl Normalizer {
    /// Create a normalizer anchored at the current date
    ///
    /// # Arguments
    /// * `assume_utc` - Read zone-less stamps as UTC instead of the local offset
    pub fn new(assume_utc: bool) -> Self {
        let now = Local::now();
        let offset = if assume_utc {
            Utc.fix()
        } else {
            now.offset().fix()
        };
        Self {
            offset,
            today: now.with_timezone(&offset).date_naive(),
        }
    }

    /// Create a normalizer with an explicit reference date and zone offset
    pub fn with_reference(today: NaiveDate, offset: FixedOffset) -> Self {
        Self { offset, today }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Parse the timestamp of a line, if it has one
    ///
    /// # Arguments
    /// * `line` - Raw line text
    /// * `previous` - Instant of the preceding timestamped line in the same stream
    pub fn parse(&self, line: &str, previous: Option<Instant>) -> Option<Instant> {
        self.detect(line, previous).map(|(_, instant)| instant)
    }

    /// Like [`Normalizer::parse`] but also reports which format matched
    pub fn detect(
        &self,
        line: &str,
        previous: Option<Instant>,
    ) -> Option<(TimestampFormat, Instant)> {
        let ctx = ParseContext {
            offset: self.offset,
            today: self.today,
            previous,
        };
        TimestampFormat::PRIORITY
            .iter()
            .find_map(|format| format.parse(line, &ctx).map(|instant| (*format, instant)))
    }

    /// Format an instant as a wall-clock time in this normalizer's offset
    pub fn display_time(&self, instant: Instant) -> String {
        TimestampFormat::TimeOnly.render(instant, self.offset)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(false)
    }
}
