//! Weekly bucket alignment of per-minute marathon telemetry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::feed::CombinedDataset;
use crate::{DisplayMode, LoadedMarathon, McError, Params, RawSample, WEEK_MINUTES, WEEK_SECONDS};

/// One slot per bucket; `None` means no data for that bucket.
pub type AlignedSeries = Vec<Option<f64>>;

/// The shared time axis: `bucket_count` timestamps starting at the root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketGrid {
    pub mode: DisplayMode,
    pub root_ts: i64,
    pub timestamps: Vec<i64>,
}

impl BucketGrid {
    pub fn new(mode: DisplayMode, root_ts: i64) -> Self {
        let step = bucket_seconds(mode);
        let timestamps = (0..mode.bucket_count())
            .map(|i| root_ts + i as i64 * step)
            .collect();
        Self {
            mode,
            root_ts,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Bucket containing `ts`, if it falls inside the week.
    pub fn index_of(&self, ts: i64) -> Option<usize> {
        let offset = ts - self.root_ts;
        if offset < 0 {
            return None;
        }
        let idx = (offset / bucket_seconds(self.mode)) as usize;
        (idx < self.len()).then_some(idx)
    }
}

fn bucket_seconds(mode: DisplayMode) -> i64 {
    mode.bucket_minutes() as i64 * 60
}

/// Timestamp axis plus one aligned series per marathon, in marathon order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SeriesBundle {
    pub mode: DisplayMode,
    pub timestamps: Vec<i64>,
    pub series: Vec<AlignedSeries>,
}

impl SeriesBundle {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn value(&self, series: usize, idx: usize) -> Option<f64> {
        self.series.get(series).and_then(|s| s.get(idx).copied().flatten())
    }

    pub fn validate(&self) -> Result<(), McError> {
        for (index, series) in self.series.iter().enumerate() {
            if series.len() != self.timestamps.len() {
                return Err(McError::SeriesLength {
                    index,
                    expected: self.timestamps.len(),
                    actual: series.len(),
                });
            }
        }
        Ok(())
    }

    /// Column layout expected by the chart library: timestamps first, then each series.
    pub fn to_columns(&self) -> Vec<Vec<Option<f64>>> {
        let mut columns = Vec::with_capacity(self.series.len() + 1);
        columns.push(self.timestamps.iter().map(|&t| Some(t as f64)).collect());
        columns.extend(self.series.iter().cloned());
        columns
    }

    /// Smallest and largest present value across every series.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.series
            .iter()
            .flatten()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Use a combined dataset whose series are already bucketed. Every series is padded
    /// or truncated to the length of the dataset's timestamp axis.
    pub fn from_combined(dataset: &CombinedDataset, mode: DisplayMode) -> Self {
        let source = match mode {
            DisplayMode::Donations => &dataset.donations,
            DisplayMode::Viewers => &dataset.viewers,
        };
        let len = dataset.ts.len();
        let series = (0..dataset.marathons.len())
            .map(|i| {
                let mut values: AlignedSeries = source.get(i).cloned().unwrap_or_default();
                values.resize(len, None);
                values
            })
            .collect();
        Self {
            mode,
            timestamps: dataset.ts.clone(),
            series,
        }
    }
}

/// True when `value` moved more than `ratio` of `previous` away from it.
pub fn is_noise(previous: f64, value: f64, ratio: f64) -> bool {
    (previous - value).abs() > previous * ratio
}

fn target_bucket(sample_ts: i64, start_ts: i64, width_minutes: usize, count: usize) -> Option<usize> {
    let idx = (sample_ts - start_ts).div_euclid(width_minutes as i64 * 60);
    (idx >= 0 && (idx as usize) < count).then_some(idx as usize)
}

/// Resample one marathon's per-minute samples onto the weekly grid for `mode`.
///
/// Each sample is placed by its elapsed time since `start_ts`, so marathons that began on
/// different dates line up. Only the trailing week of samples is considered. Viewer counts
/// pass through a jump filter: a count that differs from the previous sampled count by more
/// than `params.noise_ratio` of it is dropped (the previous count still advances). A marathon
/// that finished more than a week before `params.now_ts()` is forward-filled from its last
/// value to the end of the grid; a running one is left blank past its last sample.
pub fn resample_marathon(
    samples: &[Option<RawSample>],
    start_ts: i64,
    mode: DisplayMode,
    params: &Params,
) -> AlignedSeries {
    let width = mode.bucket_minutes();
    let count = mode.bucket_count();
    let mut out: AlignedSeries = vec![None; count];
    // Only a feed longer than a week loses its leading samples.
    let offset = samples.len().saturating_sub(WEEK_MINUTES);

    let mut previous = 0.0_f64;
    let mut last: Option<(usize, f64)> = None;

    for i in 0..count {
        let Some(sample) = samples.get(i * width + offset).copied().flatten() else {
            continue;
        };
        let target = target_bucket(sample.ts, start_ts, width, count);

        match mode {
            DisplayMode::Donations => {
                if let Some(t) = target {
                    out[t] = sample.donations;
                    if let Some(v) = sample.donations {
                        last = Some((t, v));
                    }
                }
            }
            DisplayMode::Viewers => {
                // A null count compares (and is remembered) as zero.
                let value = sample.viewers.unwrap_or(0.0);
                let noisy = is_noise(previous, value, params.noise_ratio);
                if let Some(t) = target {
                    if noisy {
                        out[t] = None;
                    } else {
                        out[t] = sample.viewers;
                        if let Some(v) = sample.viewers {
                            last = Some((t, v));
                        }
                    }
                }
                previous = value;
            }
        }
    }

    if params.now_ts() - start_ts > WEEK_SECONDS {
        if let Some((idx, value)) = last {
            for slot in &mut out[idx..] {
                *slot = Some(value);
            }
        }
    }

    out
}

/// Resample every marathon for `mode` and attach the shared timestamp axis.
pub fn build_bundle(marathons: &[LoadedMarathon], mode: DisplayMode, params: &Params) -> SeriesBundle {
    let grid = BucketGrid::new(mode, params.root_timestamp);
    let series = marathons
        .iter()
        .map(|m| {
            let aligned = resample_marathon(&m.samples, m.meta.start_ts, mode, params);
            debug!(
                marathon = %m.meta.name,
                samples = m.samples.len(),
                filled = aligned.iter().filter(|v| v.is_some()).count(),
                "resampled"
            );
            aligned
        })
        .collect();
    SeriesBundle {
        mode,
        timestamps: grid.timestamps,
        series,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MarathonMeta;

    const START: i64 = 1_600_000_000;

    fn params_at(now: i64) -> Params {
        Params {
            now: Some(now),
            ..Params::default()
        }
    }

    fn week_of_samples(start: i64, minutes: usize) -> Vec<Option<RawSample>> {
        (0..minutes)
            .map(|m| {
                Some(RawSample::new(
                    start + m as i64 * 60,
                    Some(1000.0),
                    Some(m as f64 * 10.0),
                ))
            })
            .collect()
    }

    fn donations_at(samples: &[Option<RawSample>], idx: usize) -> Option<f64> {
        samples[idx].and_then(|s| s.donations)
    }

    #[test]
    fn grid_length_matches_mode() {
        for mode in [DisplayMode::Donations, DisplayMode::Viewers] {
            let grid = BucketGrid::new(mode, START);
            assert_eq!(grid.len(), WEEK_MINUTES / mode.bucket_minutes());
            let series = resample_marathon(&[], START, mode, &params_at(START));
            assert_eq!(series.len(), grid.len());
        }
        let grid = BucketGrid::new(DisplayMode::Viewers, START);
        assert_eq!(grid.timestamps[1] - grid.timestamps[0], 15 * 60);
        assert_eq!(grid.index_of(START + 15 * 60 * 3 + 10), Some(3));
        assert_eq!(grid.index_of(START - 1), None);
        assert_eq!(grid.index_of(START + WEEK_SECONDS), None);
    }

    #[test]
    fn clean_week_maps_source_minutes_to_buckets() {
        let samples = week_of_samples(START, WEEK_MINUTES);
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(START));
        for (i, value) in series.iter().enumerate() {
            assert_eq!(*value, donations_at(&samples, i * 5));
        }
    }

    #[test]
    fn leading_samples_beyond_a_week_are_skipped() {
        let extra = 100;
        let samples = week_of_samples(START - extra as i64 * 60, WEEK_MINUTES + extra);
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(START));
        assert_eq!(series[0], donations_at(&samples, extra));
        assert_eq!(series[1], donations_at(&samples, extra + 5));
    }

    #[test]
    fn short_marathon_is_anchored_by_elapsed_time() {
        let samples = week_of_samples(START, 3 * 24 * 60);
        let now = START + 2 * WEEK_SECONDS;
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(now));
        assert_eq!(series[0], Some(0.0));
        assert_eq!(series[10], Some(500.0));
        let last_idx = 3 * 24 * 12 - 1;
        assert_eq!(series[last_idx], donations_at(&samples, last_idx * 5));
    }

    #[test]
    fn partial_bucket_shortfall_keeps_minute_alignment() {
        // 3 days and 2 minutes: the gap to a full week is not a multiple of either width.
        let minutes = 3 * 24 * 60 + 2;
        let samples: Vec<Option<RawSample>> = (0..minutes)
            .map(|m| Some(RawSample::new(START + m as i64 * 60, Some(1000.0), Some(m as f64))))
            .collect();
        let now = START + minutes as i64 * 60;
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(now));
        assert_eq!(series[0], Some(0.0));
        assert_eq!(series[863], Some(4315.0));
        assert_eq!(series[864], Some(4320.0));
        assert!(series[865..].iter().all(Option::is_none));

        let viewers = resample_marathon(&samples, START, DisplayMode::Viewers, &params_at(now));
        assert_eq!(viewers[1], Some(1000.0));
        assert_eq!(viewers[288], Some(1000.0));
        assert!(viewers[289..].iter().all(Option::is_none));
    }

    #[test]
    fn viewer_jumps_over_half_are_dropped() {
        assert!(is_noise(100.0, 200.0, 0.5));
        assert!(!is_noise(100.0, 140.0, 0.5));
        assert!(!is_noise(100.0, 50.0, 0.5));

        let counts = [100.0, 100.0, 200.0, 140.0, 150.0];
        let samples: Vec<Option<RawSample>> = (0..WEEK_MINUTES)
            .map(|m| {
                let bucket = m / 15;
                let viewers = counts.get(bucket).copied().unwrap_or(150.0);
                Some(RawSample::new(START + m as i64 * 60, Some(viewers), None))
            })
            .collect();
        let series = resample_marathon(&samples, START, DisplayMode::Viewers, &params_at(START));
        // first count is compared against zero
        assert_eq!(series[0], None);
        assert_eq!(series[1], Some(100.0));
        assert_eq!(series[2], None);
        // compared against the dropped 200, not the last accepted 100
        assert_eq!(series[3], Some(140.0));
        assert_eq!(series[4], Some(150.0));
    }

    #[test]
    fn spike_followed_by_drop_nulls_both() {
        let counts = [0.0, 1000.0, 1000.0, 3000.0, 1000.0];
        let samples: Vec<Option<RawSample>> = (0..WEEK_MINUTES)
            .map(|m| {
                let viewers = counts.get(m / 15).copied().unwrap_or(1000.0);
                Some(RawSample::new(START + m as i64 * 60, Some(viewers), None))
            })
            .collect();
        let series = resample_marathon(&samples, START, DisplayMode::Viewers, &params_at(START));
        assert_eq!(series[0], Some(0.0));
        assert_eq!(series[1], None);
        assert_eq!(series[2], Some(1000.0));
        assert_eq!(series[3], None);
        assert_eq!(series[4], None);
        assert_eq!(series[5], Some(1000.0));
    }

    #[test]
    fn null_viewer_count_resets_previous_to_zero() {
        let counts = [Some(100.0), Some(100.0), None, Some(100.0), Some(100.0)];
        let padded: Vec<Option<RawSample>> = (0..WEEK_MINUTES)
            .map(|m| {
                let viewers = counts.get(m / 15).copied().unwrap_or(Some(100.0));
                Some(RawSample::new(START + m as i64 * 60, viewers, None))
            })
            .collect();
        let series = resample_marathon(&padded, START, DisplayMode::Viewers, &params_at(START));
        assert_eq!(series[1], Some(100.0));
        assert_eq!(series[2], None);
        assert_eq!(series[3], None);
        assert_eq!(series[4], Some(100.0));
    }

    #[test]
    fn finished_marathon_is_forward_filled() {
        let samples = week_of_samples(START, 2 * 24 * 60);
        let now = START + WEEK_SECONDS + 1;
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(now));
        let k = 2 * 24 * 12 - 1;
        let last = series[k].unwrap();
        assert!(series[k..].iter().all(|v| *v == Some(last)));
        assert_eq!(series.len(), DisplayMode::Donations.bucket_count());
    }

    #[test]
    fn running_marathon_keeps_trailing_buckets_empty() {
        let samples = week_of_samples(START, 2 * 24 * 60);
        let now = START + 2 * 24 * 3600;
        let series = resample_marathon(&samples, START, DisplayMode::Donations, &params_at(now));
        let k = 2 * 24 * 12 - 1;
        assert!(series[k].is_some());
        assert!(series[k + 1..].iter().all(Option::is_none));
    }

    #[test]
    fn zero_donation_is_a_value() {
        let mut padded = vec![None; WEEK_MINUTES];
        padded[0] = Some(RawSample::new(START, Some(10.0), Some(0.0)));
        let series = resample_marathon(&padded, START, DisplayMode::Donations, &params_at(START));
        assert_eq!(series[0], Some(0.0));
    }

    #[test]
    fn bundle_has_axis_and_equal_lengths() {
        let marathons = vec![
            LoadedMarathon {
                meta: MarathonMeta {
                    name: "A".into(),
                    start_ts: START,
                    highlight: false,
                },
                samples: week_of_samples(START, 600),
            },
            LoadedMarathon {
                meta: MarathonMeta {
                    name: "B".into(),
                    start_ts: START,
                    highlight: true,
                },
                samples: Vec::new(),
            },
        ];
        let params = params_at(START);
        let bundle = build_bundle(&marathons, DisplayMode::Viewers, &params);
        assert!(bundle.validate().is_ok());
        assert_eq!(bundle.series.len(), 2);
        assert_eq!(bundle.timestamps[0], params.root_timestamp);
        assert!(bundle.series[1].iter().all(Option::is_none));
        assert_eq!(bundle.to_columns().len(), 3);
    }

    #[test]
    fn combined_dataset_is_padded_to_axis() {
        let dataset = CombinedDataset {
            marathons: vec!["A".into(), "B".into()],
            ts: vec![0, 300, 600],
            donations: vec![vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)], vec![Some(5.0)]],
            viewers: vec![],
            other_stats: vec![],
        };
        let bundle = SeriesBundle::from_combined(&dataset, DisplayMode::Donations);
        assert_eq!(bundle.series[0], vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(bundle.series[1], vec![Some(5.0), None, None]);
        let viewers = SeriesBundle::from_combined(&dataset, DisplayMode::Viewers);
        assert!(viewers.validate().is_ok());
        assert_eq!(viewers.value_range(), None);
        assert_eq!(bundle.value_range(), Some((1.0, 5.0)));
    }
}
