//! Carrier timestamp formats, all parsed into `NaiveDateTime` wall-clock time.

use super::types::CarrierError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// UPS: `Date` as `YYYYMMDD`, optional `Time` as `HHMMSS`.
pub fn parse_ups(date: &str, time: Option<&str>) -> Result<NaiveDateTime, CarrierError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y%m%d")
        .map_err(|e| CarrierError::bad_response(format!("Invalid UPS date '{}': {}", date, e)))?;
    let time = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => NaiveTime::parse_from_str(t, "%H%M%S")
            .map_err(|e| CarrierError::bad_response(format!("Invalid UPS time '{}': {}", t, e)))?,
        None => NaiveTime::MIN,
    };
    Ok(day.and_time(time))
}

/// FedEx: ISO-8601 with a trailing UTC offset that is dropped, keeping the local wall-clock.
pub fn parse_fedex(timestamp: &str) -> Result<NaiveDateTime, CarrierError> {
    let timestamp = timestamp.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(timestamp) {
        return Ok(with_offset.naive_local());
    }
    let truncated = timestamp.get(..19).unwrap_or(timestamp);
    NaiveDateTime::parse_from_str(truncated, "%Y-%m-%dT%H:%M:%S").map_err(|e| {
        CarrierError::bad_response(format!("Invalid FedEx timestamp '{}': {}", timestamp, e))
    })
}

/// DHL: separate `date` (`%Y-%m-%d`) and `time` (`%H:%M:%S`, sometimes `%H:%M`) fields.
pub fn parse_dhl(date: &str, time: &str) -> Result<NaiveDateTime, CarrierError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| CarrierError::bad_response(format!("Invalid DHL date '{}': {}", date, e)))?;
    let time = time.trim();
    let time = if time.is_empty() {
        NaiveTime::MIN
    } else {
        NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .map_err(|e| CarrierError::bad_response(format!("Invalid DHL time '{}': {}", time, e)))?
    };
    Ok(day.and_time(time))
}

/// USPS: recover the event time from the prose of a tracking message.
///
/// Handles both orders seen in TrackV2 summaries:
/// `... at 12:55 pm on March 3, 2020 in AUSTIN, TX 78701.` and
/// `... on March 3, 2020 at 4:10 am.` / `... as of March 3, 2020, 4:10 am.`
/// Returns `None` when the message carries no clock time or no full date.
pub fn parse_usps_message(message: &str) -> Option<NaiveDateTime> {
    if !message.contains(':') {
        return None;
    }
    let words: Vec<&str> = message.split_whitespace().collect();
    let time = find_clock_time(&words)?;
    let date = find_month_date(&words)?;
    Some(date.and_time(time))
}

fn strip_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, ',' | '.' | ';' | '(' | ')'))
}

fn find_clock_time(words: &[&str]) -> Option<NaiveTime> {
    words.windows(2).find_map(|pair| {
        let clock = strip_punctuation(pair[0]);
        let meridiem = strip_punctuation(pair[1]).replace('.', "").to_ascii_lowercase();
        if !clock.contains(':') || !(meridiem == "am" || meridiem == "pm") {
            return None;
        }
        NaiveTime::parse_from_str(&format!("{} {}", clock, meridiem), "%I:%M %p").ok()
    })
}

fn find_month_date(words: &[&str]) -> Option<NaiveDate> {
    words.windows(3).find_map(|triple| {
        let month = strip_punctuation(triple[0]).to_ascii_lowercase();
        let month = MONTHS.iter().position(|m| *m == month)? as u32 + 1;
        let day: u32 = strip_punctuation(triple[1]).parse().ok()?;
        let year: i32 = strip_punctuation(triple[2]).parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}
