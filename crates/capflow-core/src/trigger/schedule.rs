//! Timer trigger schedules: cron normalization, timezones, next fire time.
//!
//! Accepted schedule forms (case-insensitive for the human-readable ones):
//! - 5-field cron ("*/5 * * * *"), seconds are prepended as "0"
//! - 6-field cron with seconds ("30 0 9 * * MON-FRI")
//! - "every N seconds|minutes|hours", "every minute", "every hour"
//! - "hourly", "daily", "every day", "every day at HH:MM", "weekdays at HH:MM"
//!
//! Timezones are IANA names ("Asia/Shanghai", "America/New_York"), which
//! follow daylight-saving rules, "UTC" (also "GMT", "Z"), or fixed offsets:
//! "+08:00", "-0530", "UTC+8", "UTC-03:30".

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;

/// Errors from schedule parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule '{0}'")]
    InvalidSchedule(String),

    #[error("invalid timezone '{0}' (use an IANA name such as Europe/Berlin or an offset such as +08:00)")]
    InvalidTimezone(String),
}

/// Normalize a schedule string to a 6-field cron expression.
pub fn normalize_schedule(input: &str) -> Result<String, ScheduleError> {
    let trimmed = input.trim();
    let invalid = || ScheduleError::InvalidSchedule(input.to_string());

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 if looks_like_cron(&fields) => return Ok(format!("0 {}", fields.join(" "))),
        6 if looks_like_cron(&fields) => return Ok(fields.join(" ")),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    if let Some(at) = lower.strip_prefix("every day at ") {
        let (hour, minute) = parse_clock(at).ok_or_else(invalid)?;
        return Ok(format!("0 {minute} {hour} * * *"));
    }
    if let Some(at) = lower.strip_prefix("weekdays at ") {
        let (hour, minute) = parse_clock(at).ok_or_else(invalid)?;
        return Ok(format!("0 {minute} {hour} * * MON-FRI"));
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        let words: Vec<&str> = rest.split_whitespace().collect();
        if let [count, unit] = words.as_slice() {
            let n: u32 = count.parse().map_err(|_| invalid())?;
            if n == 0 {
                return Err(invalid());
            }
            return match unit.trim_end_matches('s') {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(invalid()),
            };
        }
    }

    Err(invalid())
}

/// Cron fields only contain digits, names and `* , - / ? L W #`.
fn looks_like_cron(fields: &[&str]) -> bool {
    fields.iter().all(|f| {
        f.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?' | '#'))
    }) && fields
        .iter()
        .any(|f| f.chars().any(|c| c.is_ascii_digit() || c == '*'))
}

fn parse_clock(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Normalize and parse a schedule into a `croner::Cron`.
pub fn parse_schedule(input: &str) -> Result<croner::Cron, ScheduleError> {
    let expr = normalize_schedule(input)?;
    expr.parse::<croner::Cron>()
        .map_err(|_| ScheduleError::InvalidSchedule(input.to_string()))
}

/// Zone a timer's cron expression is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerZone {
    /// IANA zone with its daylight-saving transitions.
    Named(Tz),
    Fixed(FixedOffset),
}

/// Parse an IANA zone name, falling back to UTC aliases and fixed offsets.
pub fn parse_timezone(input: &str) -> Result<TimerZone, ScheduleError> {
    let invalid = || ScheduleError::InvalidTimezone(input.to_string());
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();

    if matches!(upper.as_str(), "" | "UTC" | "GMT" | "Z" | "ETC/UTC") {
        return FixedOffset::east_opt(0).map(TimerZone::Fixed).ok_or_else(invalid);
    }
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Ok(TimerZone::Named(tz));
    }

    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let (sign, digits) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(TimerZone::Fixed)
        .ok_or_else(invalid)
}

/// A parsed timer: cron expression evaluated in a timezone.
#[derive(Debug, Clone)]
pub struct TimerSchedule {
    cron: croner::Cron,
    zone: TimerZone,
    expression: String,
}

impl TimerSchedule {
    pub fn parse(schedule: &str, timezone: &str) -> Result<Self, ScheduleError> {
        Ok(Self {
            cron: parse_schedule(schedule)?,
            zone: parse_timezone(timezone)?,
            expression: normalize_schedule(schedule)?,
        })
    }

    /// Normalized 6-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.fires_after(after).next()
    }

    /// Fire times in `(from, until)` that were missed.
    pub fn missed_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.fires_after(from).take_while(|t| *t < until).collect()
    }

    fn fires_after(&self, after: DateTime<Utc>) -> Box<dyn Iterator<Item = DateTime<Utc>>> {
        match self.zone {
            TimerZone::Named(tz) => Box::new(
                self.cron
                    .iter_after(after.with_timezone(&tz))
                    .map(|t| t.with_timezone(&Utc)),
            ),
            TimerZone::Fixed(offset) => Box::new(
                self.cron
                    .iter_after(after.with_timezone(&offset))
                    .map(|t| t.with_timezone(&Utc)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn test_normalize_five_field_cron() {
        assert_eq!(normalize_schedule("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_normalize_six_field_passthrough() {
        assert_eq!(
            normalize_schedule("30 0 9 * * MON-FRI").unwrap(),
            "30 0 9 * * MON-FRI"
        );
    }

    #[test]
    fn test_normalize_human_readable() {
        assert_eq!(normalize_schedule("every 5 minutes").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_schedule("every 10 seconds").unwrap(), "*/10 * * * * *");
        assert_eq!(normalize_schedule("every 2 hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_schedule("Hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_schedule("daily").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_schedule("every day at 09:30").unwrap(), "0 30 9 * * *");
        assert_eq!(
            normalize_schedule("weekdays at 8:05").unwrap(),
            "0 5 8 * * MON-FRI"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_schedule("whenever").is_err());
        assert!(normalize_schedule("every 0 minutes").is_err());
        assert!(normalize_schedule("every day at 25:00").is_err());
        assert!(normalize_schedule("every 3 fortnights").is_err());
        assert!(normalize_schedule("call me maybe at noon").is_err());
    }

    fn offset_secs(input: &str) -> i32 {
        match parse_timezone(input).unwrap() {
            TimerZone::Fixed(offset) => offset.local_minus_utc(),
            other => panic!("expected a fixed offset for {input}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(offset_secs("UTC"), 0);
        assert_eq!(offset_secs("+08:00"), 8 * 3600);
        assert_eq!(offset_secs("-0530"), -(5 * 3600 + 1800));
        assert_eq!(offset_secs("UTC+8"), 8 * 3600);
        assert_eq!(offset_secs("utc-03:30"), -(3 * 3600 + 1800));
        assert_eq!(
            parse_timezone("America/New_York").unwrap(),
            TimerZone::Named(chrono_tz::America::New_York)
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert!(parse_timezone("+25:00").is_err());
    }

    #[test]
    fn test_named_zone_without_dst() {
        let schedule = TimerSchedule::parse("0 9 * * *", "Asia/Shanghai").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        assert_eq!(
            schedule.next_after(after).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_named_zone_follows_dst_change() {
        // New York moves from UTC-5 to UTC-4 on 2026-03-08.
        let schedule = TimerSchedule::parse("0 9 * * *", "America/New_York").unwrap();
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let fires = schedule.missed_between(saturday, saturday + Duration::days(2));
        assert_eq!(
            fires,
            vec![
                Utc.with_ymd_and_hms(2026, 3, 7, 14, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 3, 8, 13, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_next_after_respects_timezone() {
        let schedule = TimerSchedule::parse("0 9 * * *", "+08:00").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        // 09:00 at +08:00 is 01:00 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let schedule = TimerSchedule::parse("every minute", "UTC").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now).unwrap();
        assert!(next > now);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_missed_between() {
        let schedule = TimerSchedule::parse("every 10 minutes", "UTC").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let missed = schedule.missed_between(from, from + Duration::minutes(35));
        assert_eq!(missed.len(), 3);
        assert!(missed.iter().all(|t| *t > from));
    }
}
