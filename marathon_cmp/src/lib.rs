//! Core marathon comparison library: weekly bucket alignment, chart and tooltip models.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chart;
pub mod color;
pub mod dashboard;
pub mod feed;
pub mod format;
pub mod resample;
pub mod summary;
pub mod tooltip;

pub use chart::{
    AxisKind, AxisStyle, ChartOptions, ChartRenderer, ChartSurface, SeriesStyle, Viewport,
};
pub use color::{ColorAllocator, PALETTE};
pub use dashboard::{Dashboard, RenderPayload};
pub use feed::{CombinedDataset, MarathonEntry, MarathonFeed, MarathonIndex, OtherStats};
pub use format::{format_timestamp, format_value, fmt_num};
pub use resample::{build_bundle, resample_marathon, AlignedSeries, BucketGrid, SeriesBundle};
pub use summary::{build_summary, SummaryRow, SummaryTable};
pub use tooltip::{CursorTooltip, TooltipContent, TooltipLine};

/// Minutes covered by the comparison grid.
pub const WEEK_MINUTES: usize = 7 * 24 * 60;
pub const WEEK_SECONDS: i64 = WEEK_MINUTES as i64 * 60;

#[derive(Error, Debug)]
pub enum McError {
    #[error("invalid marathon feed: {0}")]
    InvalidFeed(String),
    #[error("invalid marathon index: {0}")]
    InvalidIndex(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("series {index} has {actual} buckets, expected {expected}")]
    SeriesLength {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("chart has {expected} series but the data has {actual}")]
    SeriesCount { expected: usize, actual: usize },
    #[error("chart surface error: {0}")]
    Surface(String),
}

/// Which quantity the chart is currently showing.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Donations,
    Viewers,
}

impl DisplayMode {
    /// Bucket width in minutes.
    pub fn bucket_minutes(self) -> usize {
        match self {
            DisplayMode::Donations => 5,
            DisplayMode::Viewers => 15,
        }
    }

    pub fn bucket_count(self) -> usize {
        WEEK_MINUTES / self.bucket_minutes()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Donations => "donations",
            DisplayMode::Viewers => "viewers",
        }
    }

    /// Parse the value of a `dorv` radio input.
    pub fn from_input(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "donations" => Some(DisplayMode::Donations),
            "viewers" => Some(DisplayMode::Viewers),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One minute of source telemetry. Missing cells are `None`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub ts: i64,
    pub viewers: Option<f64>,
    pub donations: Option<f64>,
}

impl RawSample {
    pub fn new(ts: i64, viewers: Option<f64>, donations: Option<f64>) -> Self {
        Self {
            ts,
            viewers,
            donations,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarathonMeta {
    pub name: String,
    pub start_ts: i64,
    pub highlight: bool,
}

/// A marathon together with whatever samples could be loaded for it. Unreadable rows keep
/// their minute slot as `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadedMarathon {
    pub meta: MarathonMeta,
    pub samples: Vec<Option<RawSample>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// First timestamp of the shared grid.
    pub root_timestamp: i64,
    /// Clock used to decide whether a marathon has finished. `None` reads the wall clock.
    pub now: Option<i64>,
    /// Relative change from the previous viewer count above which a value is dropped.
    pub noise_ratio: f64,
    /// Offset applied to timestamps before formatting labels.
    pub utc_offset_s: i32,
    pub viewport: Viewport,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            root_timestamp: default_root_timestamp(),
            now: None,
            noise_ratio: 0.5,
            utc_offset_s: 0,
            viewport: Viewport::default(),
        }
    }
}

impl Params {
    pub fn now_ts(&self) -> i64 {
        self.now.unwrap_or_else(|| Utc::now().timestamp())
    }
}

fn default_root_timestamp() -> i64 {
    Utc.with_ymd_and_hms(2021, 7, 4, 12, 0, 0)
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or(1_625_400_000)
}

/// Parse a marathon start time: RFC 3339, a naive `YYYY-MM-DDTHH:MM[:SS]` taken as UTC,
/// or integer epoch seconds.
pub fn parse_start_time(text: &str) -> Result<i64, McError> {
    let trimmed = text.trim();
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc().timestamp());
        }
    }
    Err(McError::InvalidTimestamp(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_counts_cover_one_week() {
        assert_eq!(DisplayMode::Donations.bucket_count(), 2016);
        assert_eq!(DisplayMode::Viewers.bucket_count(), 672);
        for mode in [DisplayMode::Donations, DisplayMode::Viewers] {
            assert_eq!(mode.bucket_count() * mode.bucket_minutes(), WEEK_MINUTES);
        }
    }

    #[test]
    fn mode_parses_radio_values() {
        assert_eq!(DisplayMode::from_input("viewers"), Some(DisplayMode::Viewers));
        assert_eq!(DisplayMode::from_input(" Donations "), Some(DisplayMode::Donations));
        assert_eq!(DisplayMode::from_input("both"), None);
    }

    #[test]
    fn start_time_formats() {
        assert_eq!(parse_start_time("1625400000").unwrap(), 1_625_400_000);
        assert_eq!(
            parse_start_time("2021-07-04T12:00:00Z").unwrap(),
            default_root_timestamp()
        );
        assert_eq!(
            parse_start_time("2021-07-04T12:00").unwrap(),
            default_root_timestamp()
        );
        assert!(parse_start_time("next tuesday").is_err());
    }
}
