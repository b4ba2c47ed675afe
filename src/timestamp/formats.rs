use super::Instant;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Epoch values must land within this many years of today to be accepted
const EPOCH_PLAUSIBLE_YEARS: i32 = 20;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Supported timestamp layouts, listed in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampFormat {
    /// `2024-03-01T12:00:00.123`, space separator, comma fraction and offset allowed
    Iso8601,
    /// `Mar  1 12:00:00`
    Syslog,
    /// `03-01 12:00:00.123`
    Logcat,
    /// `01/Mar/2024:12:00:00 +0100`
    Apache,
    /// `1709294400123` or `1709294400`
    Epoch,
    /// `12:00:00.123`
    TimeOnly,
}

impl TimestampFormat {
    /// Fixed detection order; the first format that yields a valid instant wins
    pub const PRIORITY: [TimestampFormat; 6] = [
        TimestampFormat::Iso8601,
        TimestampFormat::Syslog,
        TimestampFormat::Logcat,
        TimestampFormat::Apache,
        TimestampFormat::Epoch,
        TimestampFormat::TimeOnly,
    ];

    fn index(self) -> usize {
        match self {
            TimestampFormat::Iso8601 => 0,
            TimestampFormat::Syslog => 1,
            TimestampFormat::Logcat => 2,
            TimestampFormat::Apache => 3,
            TimestampFormat::Epoch => 4,
            TimestampFormat::TimeOnly => 5,
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            TimestampFormat::Iso8601 => {
                r"\b(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?(Z|[+-]\d{2}:?\d{2})?"
            }
            TimestampFormat::Syslog => {
                r"\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) +(\d{1,2}) (\d{2}):(\d{2}):(\d{2})(?:\.(\d{1,9}))?"
            }
            TimestampFormat::Logcat => {
                r"\b(\d{2})-(\d{2}) (\d{2}):(\d{2}):(\d{2})(?:\.(\d{1,9}))?"
            }
            TimestampFormat::Apache => {
                r"\b(\d{2})/(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)/(\d{4}):(\d{2}):(\d{2}):(\d{2})(?: ([+-]\d{4}))?"
            }
            TimestampFormat::Epoch => r"\b(\d{13}|\d{10})\b",
            TimestampFormat::TimeOnly => r"\b(\d{2}):(\d{2}):(\d{2})(?:[.,](\d{1,9}))?",
        }
    }

    fn regex(self) -> &'static Regex {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            TimestampFormat::PRIORITY
                .iter()
                .map(|format| Regex::new(format.pattern()).expect("timestamp pattern is valid"))
                .collect()
        });
        &patterns[self.index()]
    }

    /// Whether stamps in this layout carry a calendar date
    pub fn has_date(self) -> bool {
        !matches!(self, TimestampFormat::TimeOnly)
    }

    /// Try to read a timestamp of this layout from the first place it occurs in `line`
    pub(crate) fn parse(self, line: &str, ctx: &ParseContext) -> Option<Instant> {
        let caps = self.regex().captures(line)?;
        match self {
            TimestampFormat::Iso8601 => parse_iso(&caps, ctx),
            TimestampFormat::Syslog => parse_syslog(&caps, ctx),
            TimestampFormat::Logcat => parse_logcat(&caps, ctx),
            TimestampFormat::Apache => parse_apache(&caps, ctx),
            TimestampFormat::Epoch => parse_epoch(&caps, ctx),
            TimestampFormat::TimeOnly => parse_time_only(&caps, ctx),
        }
    }

    /// Format an instant back into this layout, reading zone-less fields in `offset`
    pub fn render(self, instant: Instant, offset: FixedOffset) -> String {
        let Some(utc) = DateTime::from_timestamp_millis(instant.millis()) else {
            return instant.millis().to_string();
        };
        let local = utc.with_timezone(&offset);
        match self {
            TimestampFormat::Iso8601 => local.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            TimestampFormat::Syslog => local.format("%b %e %H:%M:%S").to_string(),
            TimestampFormat::Logcat => local.format("%m-%d %H:%M:%S%.3f").to_string(),
            TimestampFormat::Apache => local.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            TimestampFormat::Epoch => instant.millis().to_string(),
            TimestampFormat::TimeOnly => local.format("%H:%M:%S%.3f").to_string(),
        }
    }
}

impl std::fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimestampFormat::Iso8601 => write!(f, "iso8601"),
            TimestampFormat::Syslog => write!(f, "syslog"),
            TimestampFormat::Logcat => write!(f, "logcat"),
            TimestampFormat::Apache => write!(f, "apache"),
            TimestampFormat::Epoch => write!(f, "epoch"),
            TimestampFormat::TimeOnly => write!(f, "time-only"),
        }
    }
}

/// Inputs a format needs besides the line itself
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParseContext {
    /// Offset applied to stamps that carry no zone
    pub offset: FixedOffset,
    /// Date used for year inference and for time-only stamps without history
    pub today: NaiveDate,
    /// Instant of the previous timestamped line in the same stream
    pub previous: Option<Instant>,
}

fn num<T: std::str::FromStr>(caps: &Captures<'_>, group: usize) -> Option<T> {
    caps.get(group)?.as_str().parse().ok()
}

/// Fractional seconds as milliseconds; digits beyond the third are dropped
fn fraction_millis(caps: &Captures<'_>, group: usize) -> u32 {
    let Some(digits) = caps.get(group).map(|m| m.as_str()) else {
        return 0;
    };
    let mut millis = 0;
    for (i, c) in digits.chars().take(3).enumerate() {
        let digit = c.to_digit(10).unwrap_or(0);
        millis += digit * 10u32.pow(2 - i as u32);
    }
    millis
}

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u32 + 1)
}

/// Parse `Z`, `+HH:MM` or `+HHMM`
fn parse_offset(text: &str) -> Option<FixedOffset> {
    if text == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = match text.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = text[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn build_naive(
    year: i32,
    month: u32,
    day: u32,
    caps: &Captures<'_>,
    time_group: usize,
    fraction_group: usize,
) -> Option<NaiveDateTime> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(
        num(caps, time_group)?,
        num(caps, time_group + 1)?,
        num(caps, time_group + 2)?,
        fraction_millis(caps, fraction_group),
    )?;
    Some(date.and_time(time))
}

fn instant_at(naive: NaiveDateTime, offset: FixedOffset, has_date: bool) -> Option<Instant> {
    let dt = offset.from_local_datetime(&naive).single()?;
    Some(Instant::from_millis(dt.timestamp_millis(), has_date))
}

fn parse_iso(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let naive = build_naive(num(caps, 1)?, num(caps, 2)?, num(caps, 3)?, caps, 4, 7)?;
    let offset = match caps.get(8) {
        Some(m) => parse_offset(m.as_str())?,
        None => ctx.offset,
    };
    instant_at(naive, offset, true)
}

fn parse_syslog(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let month = month_number(caps.get(1)?.as_str())?;
    let mut year = ctx.today.year();
    // A December line read in January belongs to last year
    if month > ctx.today.month() + 6 {
        year -= 1;
    }
    let naive = build_naive(year, month, num(caps, 2)?, caps, 3, 6)?;
    instant_at(naive, ctx.offset, true)
}

fn parse_logcat(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let naive = build_naive(
        ctx.today.year(),
        num(caps, 1)?,
        num(caps, 2)?,
        caps,
        3,
        6,
    )?;
    instant_at(naive, ctx.offset, true)
}

fn parse_apache(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let month = month_number(caps.get(2)?.as_str())?;
    let naive = build_naive(num(caps, 3)?, month, num(caps, 1)?, caps, 4, usize::MAX)?;
    let offset = match caps.get(7) {
        Some(m) => parse_offset(m.as_str())?,
        None => ctx.offset,
    };
    instant_at(naive, offset, true)
}

fn parse_epoch(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let digits = caps.get(1)?.as_str();
    let value: i64 = digits.parse().ok()?;
    let millis = match digits.len() {
        13 => value,
        10 => value.checked_mul(1000)?,
        _ => return None,
    };
    let year = DateTime::from_timestamp_millis(millis)?.year();
    let current = ctx.today.year();
    if (year - current).abs() > EPOCH_PLAUSIBLE_YEARS {
        return None;
    }
    Some(Instant::from_millis(millis, true))
}

fn parse_time_only(caps: &Captures<'_>, ctx: &ParseContext) -> Option<Instant> {
    let base_date = ctx
        .previous
        .and_then(|prev| DateTime::from_timestamp_millis(prev.millis()))
        .map(|utc| utc.with_timezone(&ctx.offset).date_naive())
        .unwrap_or(ctx.today);
    let time = NaiveTime::from_hms_milli_opt(
        num(caps, 1)?,
        num(caps, 2)?,
        num(caps, 3)?,
        fraction_millis(caps, 4),
    )?;
    let mut instant = instant_at(base_date.and_time(time), ctx.offset, false)?;

    // Any step back from the previous stamp is a midnight crossing
    if let Some(prev) = ctx.previous {
        if instant < prev {
            let next_day = base_date.checked_add_signed(Duration::days(1))?;
            instant = instant_at(next_day.and_time(time), ctx.offset, false)?;
        }
    }

    Some(instant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_millis_pads_and_truncates() {
        let re = Regex::new(r"\.(\d+)").unwrap();
        let caps = re.captures(".5").unwrap();
        assert_eq!(fraction_millis(&caps, 1), 500);
        let caps = re.captures(".12").unwrap();
        assert_eq!(fraction_millis(&caps, 1), 120);
        let caps = re.captures(".123456").unwrap();
        assert_eq!(fraction_millis(&caps, 1), 123);
    }

    #[test]
    fn test_parse_offset_variants() {
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_offset("-0530").unwrap().local_minus_utc(), -19800);
        assert!(parse_offset("+2500").is_none());
    }

    #[test]
    fn test_month_number() {
        assert_eq!(month_number("Jan"), Some(1));
        assert_eq!(month_number("Dec"), Some(12));
        assert_eq!(month_number("Foo"), None);
    }

    #[test]
    fn test_all_patterns_compile() {
        for format in TimestampFormat::PRIORITY {
            assert!(!format.regex().as_str().is_empty());
        }
    }
}
