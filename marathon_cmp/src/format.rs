//! Number and date labels shared by the axes, the tooltip and the summary table.

use chrono::{DateTime, FixedOffset, Utc};

use crate::DisplayMode;

/// Placeholder for an empty bucket in axis and legend labels.
pub const MISSING: &str = "--";
/// Placeholder used by the tooltip for falsy lookups.
pub const NOT_AVAILABLE: &str = "N/A";

/// Zero, NaN and absent values count as falsy.
pub fn is_truthy(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v != 0.0 && !v.is_nan())
}

/// Thousands-separated number with at most three fraction digits (`1234.5` → `1,234.5`).
pub fn fmt_num(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "∞".into() } else { "-∞".into() };
    }
    let rounded = (value * 1000.0).round() / 1000.0;
    let text = format!("{:.3}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut out = String::with_capacity(text.len() + text.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    let digits = int_part.len();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}

/// Axis/legend label for a value in the given mode.
///
/// Donations carry a `$` prefix unless the value is falsy, in which case the bare value is
/// shown (`0`, not `$0`).
pub fn format_value(mode: DisplayMode, value: Option<f64>) -> String {
    match (mode, value) {
        (_, None) => MISSING.to_string(),
        (DisplayMode::Donations, Some(v)) if is_truthy(Some(v)) => format!("${}", fmt_num(v)),
        (_, Some(v)) => fmt_num(v),
    }
}

/// Tooltip label: `N/A` for falsy values, otherwise the mode's formatting.
pub fn tooltip_value(mode: DisplayMode, value: Option<f64>) -> String {
    if is_truthy(value) {
        format_value(mode, value)
    } else {
        NOT_AVAILABLE.to_string()
    }
}

fn to_local(ts: i64, utc_offset_s: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_s)?;
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.with_timezone(&offset))
}

/// Short weekday, 24h time and am/pm marker, e.g. `Sun 14:05 pm`.
pub fn format_timestamp(ts: i64, utc_offset_s: i32) -> String {
    to_local(ts, utc_offset_s)
        .map(|dt| dt.format("%a %H:%M %P").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Full calendar date and time, used for summary rows.
pub fn format_datetime(ts: i64, utc_offset_s: i32) -> String {
    to_local(ts, utc_offset_s)
        .map(|dt| dt.format("%a %b %-d %Y %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_thousands() {
        assert_eq!(fmt_num(0.0), "0");
        assert_eq!(fmt_num(999.0), "999");
        assert_eq!(fmt_num(1000.0), "1,000");
        assert_eq!(fmt_num(1234567.891), "1,234,567.891");
        assert_eq!(fmt_num(2_500_000.5), "2,500,000.5");
        assert_eq!(fmt_num(-12345.0), "-12,345");
        assert_eq!(fmt_num(0.12345), "0.123");
    }

    #[test]
    fn donation_labels() {
        assert_eq!(format_value(DisplayMode::Donations, Some(1500.0)), "$1,500");
        assert_eq!(format_value(DisplayMode::Donations, Some(0.0)), "0");
        assert_eq!(format_value(DisplayMode::Donations, None), MISSING);
        assert_eq!(format_value(DisplayMode::Viewers, Some(250_000.0)), "250,000");
        assert_eq!(format_value(DisplayMode::Viewers, Some(0.0)), "0");
    }

    #[test]
    fn tooltip_falls_back_to_placeholder() {
        assert_eq!(tooltip_value(DisplayMode::Donations, Some(0.0)), "N/A");
        assert_eq!(tooltip_value(DisplayMode::Viewers, None), "N/A");
        assert_eq!(tooltip_value(DisplayMode::Viewers, Some(f64::NAN)), "N/A");
        assert_eq!(tooltip_value(DisplayMode::Donations, Some(42.0)), "$42");
    }

    #[test]
    fn timestamps_use_weekday_and_offset() {
        // 2021-07-04 12:00 UTC was a Sunday.
        let ts = 1_625_400_000;
        assert_eq!(format_timestamp(ts, 0), "Sun 12:00 pm");
        assert_eq!(format_timestamp(ts, -5 * 3600), "Sun 07:00 am");
        assert_eq!(format_datetime(ts, 0), "Sun Jul 4 2021 12:00");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }
}
