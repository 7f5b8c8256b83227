//! Date parsing for spreadsheet cells
//!
//! Schemas declare formats in PHP `date()` notation (`d.m.Y`, `Y-m-d`, ...),
//! which is what spreadsheet authors are handed. Parsing is strict: a value
//! matches a format only if formatting the parsed date with the same format
//! gives back the input unchanged.

use chrono::{NaiveDate, NaiveDateTime};

use crate::defaults::{DISPLAY_DATE_FORMAT, STORAGE_DATE_FORMAT};

/// Formats tried, in order, when a date field has no `date_format` rule
pub const DETECTABLE_FORMATS: &[&str] = &[
    "d.m.Y",
    "d/m/Y",
    "Y-m-d",
    "m/d/Y",
    "d-m-Y",
    "Y/m/d",
    "m.d.Y",
    "d M Y",
    "M d, Y",
    "D, d M Y",
    "l, d M Y",
    "d F Y",
    "F d, Y",
    "D, d F Y",
    "l, d F Y",
    "d-m-y",
    "d/m/y",
    "m-d-Y",
    "m/d/y",
    "Y.m.d",
    "Y-m-d H:i:s",
    "d.m.Y H:i:s",
    "d/m/Y H:i:s",
    "m/d/Y H:i:s",
];

/// Translate a PHP date format into a chrono format string.
///
/// Returns `None` for format characters chrono cannot round-trip.
pub fn php_to_chrono(format: &str) -> Option<String> {
    let mut out = String::with_capacity(format.len() * 2);
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        let spec = match c {
            'd' => "%d",
            'j' => "%-d",
            'm' => "%m",
            'n' => "%-m",
            'Y' => "%Y",
            'y' => "%y",
            'H' => "%H",
            'G' => "%-H",
            'h' => "%I",
            'g' => "%-I",
            'i' => "%M",
            's' => "%S",
            'M' => "%b",
            'F' => "%B",
            'D' => "%a",
            'l' => "%A",
            'A' => "%p",
            'a' => "%P",
            '\\' => {
                push_literal(&mut out, chars.next()?);
                continue;
            }
            c if c.is_ascii_alphabetic() => return None,
            c => {
                push_literal(&mut out, c);
                continue;
            }
        };
        out.push_str(spec);
    }

    Some(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

fn has_time_part(chrono_format: &str) -> bool {
    ["%H", "%-H", "%I", "%-I", "%M", "%S"]
        .iter()
        .any(|spec| chrono_format.contains(spec))
}

/// Strictly parse `value` with a PHP date format
pub fn parse_with_format(value: &str, php_format: &str) -> Option<NaiveDate> {
    let format = php_to_chrono(php_format)?;

    if has_time_part(&format) {
        let parsed = NaiveDateTime::parse_from_str(value, &format).ok()?;
        (parsed.format(&format).to_string() == value).then(|| parsed.date())
    } else {
        let parsed = NaiveDate::parse_from_str(value, &format).ok()?;
        (parsed.format(&format).to_string() == value).then_some(parsed)
    }
}

pub fn matches_format(value: &str, php_format: &str) -> bool {
    parse_with_format(value, php_format).is_some()
}

/// First format in [`DETECTABLE_FORMATS`] the value matches exactly
pub fn detect_format(value: &str) -> Option<&'static str> {
    DETECTABLE_FORMATS
        .iter()
        .copied()
        .find(|format| matches_format(value, format))
}

/// Parse with the declared format, or by detection when there is none
pub fn parse_date(value: &str, php_format: Option<&str>) -> Option<NaiveDate> {
    let value = value.trim();
    match php_format {
        Some(format) => parse_with_format(value, format),
        None => detect_format(value).and_then(|format| parse_with_format(value, format)),
    }
}

/// `d/m/Y`, the form dates are shown and compared in
pub fn to_display(date: NaiveDate) -> String {
    date.format(DISPLAY_DATE_FORMAT).to_string()
}

/// `Y-m-d`, the form bound to SQL `date` columns
pub fn to_storage(date: NaiveDate) -> String {
    date.format(STORAGE_DATE_FORMAT).to_string()
}
