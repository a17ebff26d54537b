//! Mode dispatch: turns a display mode into the data the chart should show.

use serde::{Deserialize, Serialize};

use crate::chart::ChartOptions;
use crate::feed::{CombinedDataset, OtherStats};
use crate::resample::build_bundle;
use crate::summary::{build_summary, SummaryTable};
use crate::{DisplayMode, LoadedMarathon, MarathonMeta, Params, SeriesBundle};

/// What a renderer needs after a mode change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RenderPayload {
    pub mode: DisplayMode,
    pub bundle: SeriesBundle,
}

#[derive(Clone, Debug)]
enum Source {
    Feeds(Vec<LoadedMarathon>),
    Combined(CombinedDataset),
}

/// Loaded data plus configuration. Holds no display state of its own: the mode is passed
/// into every query.
#[derive(Clone, Debug)]
pub struct Dashboard {
    source: Source,
    metas: Vec<MarathonMeta>,
    stats: Vec<OtherStats>,
    params: Params,
}

impl Dashboard {
    pub fn from_marathons(marathons: Vec<LoadedMarathon>, params: Params) -> Self {
        let metas = marathons.iter().map(|m| m.meta.clone()).collect();
        Self {
            source: Source::Feeds(marathons),
            metas,
            stats: Vec::new(),
            params,
        }
    }

    /// The combined dataset lists marathons oldest first; the newest one is highlighted.
    pub fn from_combined(dataset: CombinedDataset, params: Params) -> Self {
        let count = dataset.marathons.len();
        let metas = dataset
            .marathons
            .iter()
            .enumerate()
            .map(|(i, name)| MarathonMeta {
                name: name.clone(),
                start_ts: params.root_timestamp,
                highlight: i + 1 == count,
            })
            .collect();
        let stats = dataset.other_stats.clone();
        Self {
            source: Source::Combined(dataset),
            metas,
            stats,
            params,
        }
    }

    pub fn with_stats(mut self, stats: Vec<OtherStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn metas(&self) -> &[MarathonMeta] {
        &self.metas
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn stats(&self) -> &[OtherStats] {
        &self.stats
    }

    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions::build(&self.metas, self.params.viewport, self.params.utc_offset_s)
    }

    /// Recompute the series for `mode`. Calling it twice with the same mode yields equal
    /// payloads.
    pub fn payload(&self, mode: DisplayMode) -> RenderPayload {
        let bundle = match &self.source {
            Source::Feeds(marathons) => build_bundle(marathons, mode, &self.params),
            Source::Combined(dataset) => SeriesBundle::from_combined(dataset, mode),
        };
        RenderPayload { mode, bundle }
    }

    pub fn summary(&self) -> SummaryTable {
        let emphasized = self
            .metas
            .iter()
            .find(|m| m.highlight)
            .map(|m| m.name.as_str());
        build_summary(&self.stats, emphasized, self.params.utc_offset_s)
    }
}
