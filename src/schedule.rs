use crate::error::ScheduleError;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use tracing::warn;

/// A parsed schedule expression.
///
/// The accepted grammar is cron with an *optional* seconds field (5, 6 or
/// 7 whitespace-separated fields), the usual descriptors (`@hourly`,
/// `@daily`, `@weekly`, `@monthly`, `@yearly`), and the `@every <dur>`
/// shorthand where `<dur>` is a compound of hours/minutes/seconds such as
/// `90s` or `1h30m`.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
  /// A cron expression, evaluated field-by-field in the job's timezone.
  Cron(Box<CronSchedule>),
  /// A fixed interval anchored to the previous fire time.
  Every(Duration),
}

impl ScheduleSpec {
  pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
      return Err(ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: "empty expression".to_string(),
      });
    }

    if let Some(rest) = trimmed.strip_prefix("@every") {
      let interval =
        parse_every(rest.trim()).map_err(|reason| ScheduleError::InvalidExpression {
          expression: expression.to_string(),
          reason,
        })?;
      return Ok(ScheduleSpec::Every(interval));
    }

    // The cron crate requires a seconds field; a plain 5-field expression
    // gets seconds pinned to 0. Descriptors pass through untouched.
    let normalized = if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
      format!("0 {trimmed}")
    } else {
      trimmed.to_string()
    };

    CronSchedule::from_str(&normalized)
      .map(|schedule| ScheduleSpec::Cron(Box::new(schedule)))
      .map_err(|e| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
      })
  }

  /// Computes the next occurrence strictly after `after`, evaluated in
  /// `tz`. Returns `None` when the schedule has no future occurrence (a
  /// cron expression whose dates ran out) or the arithmetic overflows.
  pub fn next_fire(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    match self {
      ScheduleSpec::Cron(schedule) => schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc)),
      ScheduleSpec::Every(interval) => match ChronoDuration::from_std(*interval) {
        Ok(step) => after.checked_add_signed(step),
        Err(e) => {
          warn!(?interval, error = %e, "interval too large to schedule");
          None
        }
      },
    }
  }
}

/// Parses the `@every` duration body: one or more `<digits><unit>` segments
/// with units `h`, `m`, `s` (e.g. `10s`, `1h30m`).
fn parse_every(input: &str) -> Result<Duration, String> {
  if input.is_empty() {
    return Err("missing duration after @every".to_string());
  }

  let mut total = Duration::ZERO;
  let mut digits = String::new();
  for ch in input.chars() {
    if ch.is_ascii_digit() {
      digits.push(ch);
      continue;
    }
    if digits.is_empty() {
      return Err(format!("expected a number before '{ch}'"));
    }
    let value: u64 = digits
      .parse()
      .map_err(|_| format!("number '{digits}' out of range"))?;
    digits.clear();
    let unit_secs = match ch {
      'h' => 3600,
      'm' => 60,
      's' => 1,
      other => return Err(format!("unsupported duration unit '{other}'")),
    };
    total += Duration::from_secs(value * unit_secs);
  }
  if !digits.is_empty() {
    return Err(format!("trailing number '{digits}' without a unit"));
  }
  if total.is_zero() {
    return Err("interval must be greater than zero".to_string());
  }
  Ok(total)
}

/// Resolves an IANA zone name.
pub fn resolve_timezone(name: &str) -> Result<Tz, ScheduleError> {
  name
    .parse::<Tz>()
    .map_err(|_| ScheduleError::UnknownTimezone(name.to_string()))
}
