//! Chart configuration and the renderer that drives a [`ChartSurface`].

use serde::{Deserialize, Serialize};

use crate::color::ColorAllocator;
use crate::dashboard::RenderPayload;
use crate::format::{format_timestamp, format_value};
use crate::{DisplayMode, MarathonMeta, McError, SeriesBundle};

pub const EMPHASIS_STROKE: &str = "white";
pub const EMPHASIS_WIDTH: f64 = 2.5;
pub const SERIES_WIDTH: f64 = 1.5;
pub const AXIS_STROKE: &str = "white";
pub const GRID_STROKE: &str = "#333333";
pub const TICK_STROKE: &str = "#bbbbbb";
/// Date pattern in the chart library's token syntax; matches [`format_timestamp`].
pub const TIME_PATTERN: &str = "{WWW} {HH}:{mm} {aa}";

/// Space available to the chart. The chart itself leaves side and header margins.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1310,
            height: 870,
        }
    }
}

impl Viewport {
    pub fn chart_size(&self) -> (u32, u32) {
        (
            self.width.saturating_sub(30).max(1),
            self.height.saturating_sub(110).max(1),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SeriesStyle {
    pub label: String,
    pub stroke: String,
    pub width: f64,
    pub emphasized: bool,
    /// Cleared when the user toggles the series off.
    pub show: bool,
    pub spline: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AxisKind {
    Time,
    Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisStyle {
    pub kind: AxisKind,
    pub stroke: String,
    pub grid_stroke: String,
    pub tick_stroke: String,
    /// Minimum pixel spacing between ticks.
    pub space: Option<u32>,
    /// Pixel size reserved for tick labels.
    pub size: Option<u32>,
}

impl AxisStyle {
    fn new(kind: AxisKind) -> Self {
        let (space, size) = match kind {
            AxisKind::Time => (Some(100), None),
            AxisKind::Value => (None, Some(80)),
        };
        Self {
            kind,
            stroke: AXIS_STROKE.to_string(),
            grid_stroke: GRID_STROKE.to_string(),
            tick_stroke: TICK_STROKE.to_string(),
            space,
            size,
        }
    }

    pub fn tick_label(&self, mode: DisplayMode, utc_offset_s: i32, value: f64) -> String {
        match self.kind {
            AxisKind::Time => format_timestamp(value as i64, utc_offset_s),
            AxisKind::Value => format_value(mode, Some(value)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartOptions {
    pub id: String,
    pub class: String,
    pub width: u32,
    pub height: u32,
    pub show_legend: bool,
    pub utc_offset_s: i32,
    /// One entry per marathon; the timestamp axis is not listed.
    pub series: Vec<SeriesStyle>,
    pub x_axis: AxisStyle,
    pub y_axis: AxisStyle,
}

impl ChartOptions {
    /// Style every marathon in order. The highlighted marathon is drawn wide and white and
    /// does not consume a palette color.
    pub fn build(marathons: &[MarathonMeta], viewport: Viewport, utc_offset_s: i32) -> Self {
        let mut colors = ColorAllocator::new();
        let series = marathons
            .iter()
            .map(|m| {
                let (stroke, width) = if m.highlight {
                    (EMPHASIS_STROKE.to_string(), EMPHASIS_WIDTH)
                } else {
                    (colors.next_color().to_string(), SERIES_WIDTH)
                };
                SeriesStyle {
                    label: m.name.clone(),
                    stroke,
                    width,
                    emphasized: m.highlight,
                    show: true,
                    spline: true,
                }
            })
            .collect();
        let (width, height) = viewport.chart_size();
        Self {
            id: "chart1".to_string(),
            class: "marathon-comparison".to_string(),
            width,
            height,
            show_legend: false,
            utc_offset_s,
            series,
            x_axis: AxisStyle::new(AxisKind::Time),
            y_axis: AxisStyle::new(AxisKind::Value),
        }
    }

    pub fn emphasized_index(&self) -> Option<usize> {
        self.series.iter().position(|s| s.emphasized)
    }

    pub fn set_visible(&mut self, series: usize, show: bool) -> bool {
        match self.series.get_mut(series) {
            Some(style) => {
                style.show = show;
                true
            }
            None => false,
        }
    }

    pub fn set_visible_by_label(&mut self, label: &str, show: bool) -> bool {
        match self.series.iter().position(|s| s.label == label) {
            Some(idx) => self.set_visible(idx, show),
            None => false,
        }
    }
}

/// Boundary to whatever actually draws the chart (uPlot in the browser, plotters natively).
pub trait ChartSurface {
    /// Build the chart once with its full configuration and initial data.
    fn create(&mut self, options: &ChartOptions, data: &SeriesBundle) -> Result<(), McError>;
    /// Swap the data buffer, keeping configuration.
    fn set_data(&mut self, data: &SeriesBundle) -> Result<(), McError>;
    fn redraw(&mut self) -> Result<(), McError>;
}

/// Owns one surface and feeds it render payloads. The first payload creates the chart,
/// later ones only replace its data.
pub struct ChartRenderer<S: ChartSurface> {
    surface: S,
    options: ChartOptions,
    mode: Option<DisplayMode>,
    created: bool,
}

impl<S: ChartSurface> ChartRenderer<S> {
    pub fn new(surface: S, options: ChartOptions) -> Self {
        Self {
            surface,
            options,
            mode: None,
            created: false,
        }
    }

    pub fn render(&mut self, payload: &RenderPayload) -> Result<(), McError> {
        let bundle = &payload.bundle;
        bundle.validate()?;
        if bundle.series.len() != self.options.series.len() {
            return Err(McError::SeriesCount {
                expected: self.options.series.len(),
                actual: bundle.series.len(),
            });
        }
        if self.created {
            self.surface.set_data(bundle)?;
            self.surface.redraw()?;
        } else {
            self.surface.create(&self.options, bundle)?;
            self.created = true;
        }
        self.mode = Some(payload.mode);
        Ok(())
    }

    pub fn mode(&self) -> Option<DisplayMode> {
        self.mode
    }

    pub fn options(&self) -> &ChartOptions {
        &self.options
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}
