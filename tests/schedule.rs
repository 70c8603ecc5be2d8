//! tests/schedule.rs
//! Schedule grammar (optional seconds, descriptors, @every) and
//! timezone-anchored occurrence computation.

use chime::schedule::resolve_timezone;
use chime::{ScheduleError, ScheduleSpec};

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use std::time::Duration;

#[test]
fn five_field_expressions_get_zero_seconds() {
  // Minute-resolution cron, the classic form.
  let spec = ScheduleSpec::parse("*/5 * * * *").unwrap();
  let t0 = Utc::now();
  let next = spec.next_fire(t0, chrono_tz::UTC).unwrap();
  assert_eq!(next.second(), 0, "implicit seconds field is zero");
  assert_eq!(next.minute() % 5, 0);
}

#[test]
fn six_and_seven_field_expressions_parse() {
  assert!(ScheduleSpec::parse("*/10 * * * * *").is_ok());
  assert!(ScheduleSpec::parse("0 30 9 * * Mon 2099").is_ok());
}

#[test]
fn descriptors_parse() {
  for descriptor in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
    assert!(
      ScheduleSpec::parse(descriptor).is_ok(),
      "descriptor {descriptor} must parse"
    );
  }
}

#[test]
fn every_shorthand_parses_compound_durations() {
  for (expr, secs) in [
    ("@every 10s", 10),
    ("@every 2m", 120),
    ("@every 1h30m", 5400),
    ("@every 90s", 90),
  ] {
    let spec = ScheduleSpec::parse(expr).unwrap();
    match spec {
      ScheduleSpec::Every(interval) => assert_eq!(interval, Duration::from_secs(secs)),
      other => panic!("{expr} parsed as {other:?}"),
    }
  }
}

#[test]
fn bad_expressions_are_rejected() {
  for expr in [
    "",
    "not a cron",
    "* * *",
    "@every",
    "@every s",
    "@every 5",
    "@every 0s",
    "@every 5d",
  ] {
    assert!(
      matches!(
        ScheduleSpec::parse(expr),
        Err(ScheduleError::InvalidExpression { .. })
      ),
      "{expr:?} must be rejected"
    );
  }
}

#[test]
fn every_interval_advances_from_the_previous_fire() {
  let spec = ScheduleSpec::parse("@every 10s").unwrap();
  let t0 = Utc::now();
  let t1 = spec.next_fire(t0, chrono_tz::UTC).unwrap();
  let t2 = spec.next_fire(t1, chrono_tz::UTC).unwrap();
  assert_eq!(t1 - t0, ChronoDuration::seconds(10));
  assert_eq!(t2 - t1, ChronoDuration::seconds(10));
}

#[test]
fn five_second_cron_fires_on_boundaries_in_its_zone() {
  let spec = ScheduleSpec::parse("*/5 * * * * *").unwrap();
  let shanghai: Tz = "Asia/Shanghai".parse().unwrap();

  let t0 = Utc::now();
  let first = spec.next_fire(t0, shanghai).unwrap();
  let second = spec.next_fire(first, shanghai).unwrap();

  assert!(first > t0);
  assert_eq!(first.timestamp() % 5, 0, "5-second boundary");
  assert_eq!(
    second - first,
    ChronoDuration::seconds(5),
    "consecutive fires 5s apart regardless of process timezone"
  );
}

#[test]
fn daily_noon_follows_the_jobs_timezone() {
  let spec = ScheduleSpec::parse("0 0 12 * * *").unwrap();
  let shanghai: Tz = "Asia/Shanghai".parse().unwrap();

  let t0 = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
    .unwrap()
    .with_timezone(&Utc);
  let next = spec.next_fire(t0, shanghai).unwrap();
  // Noon in Shanghai (UTC+8, no DST) is 04:00 UTC.
  assert_eq!(next.hour(), 4);
  assert_eq!(next.minute(), 0);

  let next_utc = spec.next_fire(t0, chrono_tz::UTC).unwrap();
  assert_eq!(next_utc.hour(), 12, "same expression, different zone");
}

#[test]
fn timezone_resolution() {
  assert!(resolve_timezone("Asia/Shanghai").is_ok());
  assert!(resolve_timezone("UTC").is_ok());
  assert!(matches!(
    resolve_timezone("Middle/Nowhere"),
    Err(ScheduleError::UnknownTimezone(_))
  ));
}
