//! Parsing of the free-form values that arrive from HTML forms: money amounts in
//! either decimal convention, separate date and time fields, optional text.

use std::str::FromStr;

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeZone,
    Utc,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Trims the value and drops it when nothing is left.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses an amount written as `150,00`, `150.00`, `1.234,56`, `1,234.56` or
/// `R$ 150`. The rightmost separator is the decimal one when both appear.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) => cleaned,
        (_, 0) if commas == 1 => cleaned.replace(',', "."),
        (_, 0) => cleaned.replace(',', ""),
        (0, _) if dots == 1 => cleaned,
        (0, _) => cleaned.replace('.', ""),
        _ => {
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
    };

    Decimal::from_str(&normalized).ok().map(|value| value.round_dp(2))
}

/// Money amount in cents, present only when strictly positive.
pub fn parse_positive_cents(raw: &str) -> Option<i64> {
    let value = parse_money(raw)?;
    let cents = (value * Decimal::ONE_HUNDRED).trunc().to_i64()?;
    (cents > 0).then_some(cents)
}

pub fn parse_year(raw: &str) -> Option<i64> {
    let year = raw.trim().parse::<i64>().ok()?;
    (1900..=2100).contains(&year).then_some(year)
}

pub fn shop_offset(offset_minutes: i64) -> FixedOffset {
    i32::try_from(offset_minutes * 60)
        .ok()
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

/// Combines a `YYYY-MM-DD` (or `DD/MM/YYYY`) date and an `HH:MM` time, read in the
/// shop's local offset, into one instant.
pub fn combine_date_time(date: &str, time: &str, offset_minutes: i64) -> Option<DateTime<Utc>> {
    let date = date.trim();
    let time = time.trim();
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%d/%m/%Y"))
        .ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .ok()?;
    let local = NaiveDateTime::new(date, time);
    shop_offset(offset_minutes)
        .from_local_datetime(&local)
        .single()
        .map(|value| value.with_timezone(&Utc))
}

/// Start and end (exclusive) of the shop-local day containing `instant`.
pub fn local_day_bounds(instant: DateTime<Utc>, offset_minutes: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = shop_offset(offset_minutes);
    let midnight = instant
        .with_timezone(&offset)
        .date_naive()
        .and_time(NaiveTime::MIN);
    let start = offset
        .from_local_datetime(&midnight)
        .single()
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(instant);
    (start, start + Duration::days(1))
}

/// Canonical text form for timestamps stored in the database. Every stored
/// timestamp uses this form so that text comparison orders them by time.
pub fn to_db_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn from_db_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

/// Splits a stored timestamp into local `(YYYY-MM-DD, HH:MM)` form fields.
pub fn local_fields(stored: &str, offset_minutes: i64) -> (String, String) {
    match from_db_time(stored) {
        Some(value) => {
            let local = value.with_timezone(&shop_offset(offset_minutes));
            (
                local.format("%Y-%m-%d").to_string(),
                local.format("%H:%M").to_string(),
            )
        }
        None => (String::new(), String::new()),
    }
}

/// Human form (`19/10/2026 10:00`) of a stored timestamp in shop time.
pub fn local_display(stored: &str, offset_minutes: i64) -> String {
    match from_db_time(stored) {
        Some(value) => value
            .with_timezone(&shop_offset(offset_minutes))
            .format("%d/%m/%Y %H:%M")
            .to_string(),
        None => stored.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn money_accepts_both_separator_conventions() {
        assert_eq!(parse_positive_cents("150,00"), Some(15000));
        assert_eq!(parse_positive_cents("150.00"), Some(15000));
        assert_eq!(parse_positive_cents("1.234,56"), Some(123456));
        assert_eq!(parse_positive_cents("1,234.56"), Some(123456));
        assert_eq!(parse_positive_cents("R$ 99,9"), Some(9990));
        assert_eq!(parse_positive_cents("80"), Some(8000));
    }

    #[test]
    fn money_rejects_zero_negative_and_garbage() {
        assert_eq!(parse_positive_cents("0"), None);
        assert_eq!(parse_positive_cents("0,00"), None);
        assert_eq!(parse_positive_cents("0,001"), None);
        assert_eq!(parse_positive_cents("-10,00"), None);
        assert_eq!(parse_positive_cents("abc"), None);
        assert_eq!(parse_positive_cents(""), None);
    }

    #[test]
    fn date_and_time_are_combined_in_shop_offset() {
        let value = combine_date_time("2026-10-19", "10:00", -180).unwrap();
        assert_eq!(to_db_time(value), "2026-10-19T13:00:00Z");
        assert_eq!(value.hour(), 13);

        let brazilian = combine_date_time("19/10/2026", "10:00", -180).unwrap();
        assert_eq!(brazilian, value);
    }

    #[test]
    fn malformed_date_or_time_is_rejected() {
        assert!(combine_date_time("data_invalida", "10:00", 0).is_none());
        assert!(combine_date_time("2026-10-19", "hora_invalida", 0).is_none());
        assert!(combine_date_time("2026-02-30", "10:00", 0).is_none());
        assert!(combine_date_time("2026-10-19", "25:00", 0).is_none());
    }

    #[test]
    fn stored_time_splits_back_into_local_fields() {
        let (date, time) = local_fields("2026-10-19T13:00:00Z", -180);
        assert_eq!(date, "2026-10-19");
        assert_eq!(time, "10:00");
        assert_eq!(local_display("2026-10-19T13:00:00Z", -180), "19/10/2026 10:00");
    }

    #[test]
    fn local_day_follows_shop_offset() {
        let late_evening = combine_date_time("2026-10-19", "23:30", -180).unwrap();
        let (start, end) = local_day_bounds(late_evening, -180);
        assert_eq!(to_db_time(start), "2026-10-19T03:00:00Z");
        assert_eq!(to_db_time(end), "2026-10-20T03:00:00Z");
    }

    #[test]
    fn year_must_be_plausible() {
        assert_eq!(parse_year(" 2020 "), Some(2020));
        assert_eq!(parse_year("20"), None);
        assert_eq!(parse_year("two thousand"), None);
    }

    #[test]
    fn blank_text_becomes_none() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" Honda ")), Some("Honda".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
