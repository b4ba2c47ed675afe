use chrono::{FixedOffset, NaiveDate, TimeZone};
use logsync::timestamp::{Instant, Normalizer, TimestampFormat};

fn normalizer(offset_secs: i32) -> Normalizer {
    Normalizer::with_reference(
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        FixedOffset::east_opt(offset_secs).unwrap(),
    )
}

fn instant_at(offset: FixedOffset, h: u32, m: u32, s: u32, ms: u32) -> Instant {
    let local = offset
        .with_ymd_and_hms(2024, 3, 15, h, m, s)
        .unwrap();
    Instant::from_millis(local.timestamp_millis() + ms as i64, true)
}

#[test]
fn test_every_format_round_trips() {
    for offset_secs in [0, 5 * 3600 + 1800, -7 * 3600] {
        let n = normalizer(offset_secs);
        let offset = n.offset();

        for format in TimestampFormat::PRIORITY {
            // Syslog and Apache carry whole seconds only
            let ms = match format {
                TimestampFormat::Syslog | TimestampFormat::Apache => 0,
                _ => 250,
            };
            for (h, m, s) in [(0, 0, 1), (9, 41, 7), (23, 59, 58)] {
                let instant = instant_at(offset, h, m, s, ms);
                let rendered = format.render(instant, offset);
                let line = format!("{} worker-3 heartbeat", rendered);

                let (detected, parsed) = n
                    .detect(&line, None)
                    .unwrap_or_else(|| panic!("{} not detected in {:?}", format, line));
                assert_eq!(detected, format, "line {:?}", line);
                assert_eq!(parsed, instant, "line {:?}", line);
                assert_eq!(parsed.has_date(), format.has_date());
            }
        }
    }
}

#[test]
fn test_time_only_midnight_advances_day() {
    let n = normalizer(0);
    let before = n.parse("23:59:58 tick", None).unwrap();
    let after = n.parse("00:00:01 tock", Some(before)).unwrap();

    assert!(after > before);
    assert_eq!(after.millis() - before.millis(), 3_000);
}

#[test]
fn test_unparseable_line_yields_none() {
    let n = normalizer(0);
    assert!(n.parse("no time here", None).is_none());
    assert!(n.parse("", None).is_none());
}
