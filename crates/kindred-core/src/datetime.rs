use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "kindred-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "KINDRED_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "KINDRED_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";
const DAY_START_SEARCH_MINUTES: i64 =
  24 * 60;

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone that decides which calendar day an instant belongs to.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn to_date_in(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  dt.with_timezone(tz).date_naive()
}

/// First day (Sunday) of the week containing `date`.
#[must_use]
pub fn week_start_sunday(
  date: NaiveDate
) -> NaiveDate {
  let offset = date
    .weekday()
    .num_days_from_sunday();
  date
    .checked_sub_signed(Duration::days(
      i64::from(offset)
    ))
    .unwrap_or(date)
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Resolves a wall-clock time in `tz` to an instant. Ambiguous times
/// (DST fall-back) pick the earlier instant; skipped times have none.
#[must_use]
pub fn local_to_utc(
  local_naive: NaiveDateTime,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => None
  }
}

/// First instant of `date` in `tz`. That is local midnight, or the end
/// of the DST gap when the clocks skip midnight.
#[must_use]
pub fn start_of_day(
  date: NaiveDate,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let midnight =
    date.and_time(NaiveTime::MIN);
  (0..DAY_START_SEARCH_MINUTES)
    .step_by(15)
    .find_map(|minutes| {
      local_to_utc(
        midnight
          + Duration::minutes(minutes),
        tz
      )
    })
}

/// Parses a date field as sent by the backend. Never fails: anything
/// unrecognised is `None` and callers treat the field as absent.
#[must_use]
pub fn parse_task_instant(
  raw: &str,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(ndt, tz);
    }
  }

  if let Some(date) =
    parse_plain_date(token)
  {
    return start_of_day(date, tz);
  }

  tracing::trace!(
    raw = token,
    "unparseable task date treated as absent"
  );
  None
}

/// Calendar day of a backend date field in `tz`. A plain `YYYY-MM-DD`
/// names its day directly; anything with a clock goes through
/// [`parse_task_instant`].
#[must_use]
pub fn parse_task_day(
  raw: &str,
  tz: &Tz
) -> Option<NaiveDate> {
  if let Some(date) =
    parse_plain_date(raw.trim())
  {
    return Some(date);
  }
  parse_task_instant(raw, tz)
    .map(|dt| to_date_in(dt, tz))
}

fn parse_plain_date(
  token: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
}

/// Parses a user-supplied day expression into the first instant of the
/// day it names (or the exact instant, for RFC 3339 input).
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr_in(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = to_date_in(now, tz);

  let day = match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => Some(today),
    | "tomorrow" => {
      today.checked_add_signed(
        Duration::days(1)
      )
    }
    | "yesterday" => {
      today.checked_sub_signed(
        Duration::days(1)
      )
    }
    | _ => None
  };
  if let Some(day) = day {
    return day_start_or_err(
      day, tz, token
    );
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      today,
      target_weekday
    );
    return day_start_or_err(
      target_date,
      tz,
      token
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)d$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    let delta = Duration::days(
      if negative { -num } else { num }
    );
    let target = today
      .checked_add_signed(delta)
      .ok_or_else(|| {
        anyhow!(
          "relative date out of \
           range: {input}"
        )
      })?;
    return day_start_or_err(
      target, tz, token
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return day_start_or_err(
      date, tz, token
    );
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/-Nd, RFC3339, YYYY-MM-DD"
  })
}

fn day_start_or_err(
  date: NaiveDate,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  start_of_day(date, tz).ok_or_else(
    || {
      anyhow!(
        "day has no valid start in \
         configured timezone: \
         {context}"
      )
    }
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

/// Parses `15:23`, `9:05` or `3:23pm` into hour and minute.
#[must_use]
pub fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})(?::\d{2})?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    let pm = ampm_match
      .as_str()
      .eq_ignore_ascii_case("pm");
    match (pm, raw_hour) {
      | (false, 12) => 0,
      | (false, h) => h,
      | (true, 12) => 12,
      | (true, h) => h + 12
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

/// Serde adapter for backend date fields: keeps string values and turns
/// anything else (numbers, objects, null) into `None` instead of failing
/// the whole record.
pub mod lenient_text {
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };
  use serde_json::Value;

  pub fn serialize<S>(
    raw: &Option<String>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match raw {
      | Some(value) => {
        serializer.serialize_str(value)
      }
      | None => {
        serializer.serialize_none()
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<String>, D::Error>
  where
    D: Deserializer<'de>
  {
    let value =
      Option::<Value>::deserialize(
        deserializer
      )?;
    Ok(match value {
      | Some(Value::String(raw)) => {
        Some(raw)
      }
      | Some(other) => {
        tracing::debug!(
          value = %other,
          "non-string date field dropped"
        );
        None
      }
      | None => None
    })
  }
}
