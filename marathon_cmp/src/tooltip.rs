//! Cursor tooltip: which series to list at the hovered bucket, in what order, and how.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::chart::ChartOptions;
use crate::format::{escape_html, format_timestamp, tooltip_value};
use crate::SeriesBundle;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TooltipLine {
    pub label: String,
    pub value: String,
    pub raw: Option<f64>,
    pub color: String,
    pub bold: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TooltipContent {
    pub heading: String,
    pub lines: Vec<TooltipLine>,
}

impl TooltipContent {
    /// Build the tooltip for bucket `idx`: every visible series, largest value first.
    /// Missing values sort as zero. Returns `None` past the end of the data.
    pub fn collect(idx: usize, options: &ChartOptions, bundle: &SeriesBundle) -> Option<Self> {
        let ts = *bundle.timestamps.get(idx)?;
        let mut lines: Vec<TooltipLine> = options
            .series
            .iter()
            .enumerate()
            .filter(|(_, style)| style.show)
            .map(|(i, style)| {
                let raw = bundle.value(i, idx);
                TooltipLine {
                    label: style.label.clone(),
                    value: tooltip_value(bundle.mode, raw),
                    raw,
                    color: style.stroke.clone(),
                    bold: style.emphasized,
                }
            })
            .collect();
        lines.sort_by_key(|line| Reverse(OrderedFloat(line.raw.unwrap_or(0.0))));
        Some(Self {
            heading: format_timestamp(ts, options.utc_offset_s),
            lines,
        })
    }

    pub fn to_html(&self) -> String {
        let mut parts = Vec::with_capacity(self.lines.len() + 1);
        parts.push(escape_html(&self.heading));
        for line in &self.lines {
            let weight = if line.bold { "font-weight: bold" } else { "" };
            parts.push(format!(
                "<span style=\"color: {};{}\">{}: {}</span>",
                line.color,
                weight,
                escape_html(&line.label),
                escape_html(&line.value)
            ));
        }
        parts.join("<br />")
    }

    pub fn to_text(&self) -> String {
        let mut out = self.heading.clone();
        for line in &self.lines {
            out.push('\n');
            out.push_str(if line.bold { "* " } else { "  " });
            out.push_str(&line.label);
            out.push_str(": ");
            out.push_str(&line.value);
        }
        out
    }
}

/// Tooltip overlay state tied to one chart instance.
#[derive(Clone, Debug, Default)]
pub struct CursorTooltip {
    initialized: bool,
    visible: bool,
    locked: bool,
    content: Option<TooltipContent>,
}

impl CursorTooltip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chart init hook: the overlay exists but stays hidden until the pointer enters.
    pub fn on_init(&mut self) {
        self.initialized = true;
        self.visible = false;
        self.content = None;
    }

    pub fn pointer_enter(&mut self) {
        if self.initialized {
            self.visible = true;
        }
    }

    pub fn pointer_leave(&mut self) {
        if !self.locked {
            self.visible = false;
        }
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn content(&self) -> Option<&TooltipContent> {
        self.content.as_ref()
    }

    /// Cursor hook. `idx` is `None` when the cursor is not over any bucket.
    pub fn on_cursor(
        &mut self,
        idx: Option<usize>,
        options: &ChartOptions,
        bundle: &SeriesBundle,
    ) -> Option<&TooltipContent> {
        self.content = idx.and_then(|i| TooltipContent::collect(i, options, bundle));
        self.content.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Viewport;
    use crate::{DisplayMode, MarathonMeta};

    fn options() -> ChartOptions {
        let metas: Vec<MarathonMeta> = ["Low", "High", "Mid", "Empty"]
            .iter()
            .map(|name| MarathonMeta {
                name: name.to_string(),
                start_ts: 0,
                highlight: *name == "Mid",
            })
            .collect();
        ChartOptions::build(&metas, Viewport::default(), 0)
    }

    fn bundle(mode: DisplayMode) -> SeriesBundle {
        SeriesBundle {
            mode,
            timestamps: vec![1_625_400_000, 1_625_400_300],
            series: vec![
                vec![Some(10.0), Some(1.0)],
                vec![Some(50.0), Some(2.0)],
                vec![Some(30.0), Some(3.0)],
                vec![None, Some(0.0)],
            ],
        }
    }

    #[test]
    fn values_sort_descending() {
        let content = TooltipContent::collect(0, &options(), &bundle(DisplayMode::Viewers)).unwrap();
        let labels: Vec<&str> = content.lines.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["High", "Mid", "Low", "Empty"]);
        let values: Vec<&str> = content.lines.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, vec!["50", "30", "10", "N/A"]);
        assert_eq!(content.heading, "Sun 12:00 pm");
    }

    #[test]
    fn hidden_series_are_skipped() {
        let mut opts = options();
        opts.set_visible_by_label("High", false);
        let content = TooltipContent::collect(0, &opts, &bundle(DisplayMode::Donations)).unwrap();
        assert_eq!(content.lines.len(), 3);
        assert_eq!(content.lines[0].label, "Mid");
        assert_eq!(content.lines[0].value, "$30");
    }

    #[test]
    fn zero_donations_show_placeholder() {
        let content = TooltipContent::collect(1, &options(), &bundle(DisplayMode::Donations)).unwrap();
        let empty = content.lines.iter().find(|l| l.label == "Empty").unwrap();
        assert_eq!(empty.value, "N/A");
    }

    #[test]
    fn html_colors_and_bolds() {
        let opts = options();
        let content = TooltipContent::collect(0, &opts, &bundle(DisplayMode::Viewers)).unwrap();
        let html = content.to_html();
        let parts: Vec<&str> = html.split("<br />").collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "Sun 12:00 pm");
        assert_eq!(
            parts[2],
            "<span style=\"color: white;font-weight: bold\">Mid: 30</span>"
        );
        assert_eq!(
            parts[1],
            format!("<span style=\"color: {};\">High: 50</span>", opts.series[1].stroke)
        );
    }

    #[test]
    fn overlay_visibility_follows_pointer_and_lock() {
        let opts = options();
        let data = bundle(DisplayMode::Viewers);
        let mut tip = CursorTooltip::new();
        tip.pointer_enter();
        assert!(!tip.is_visible());

        tip.on_init();
        assert!(!tip.is_visible());
        tip.pointer_enter();
        assert!(tip.is_visible());
        tip.pointer_leave();
        assert!(!tip.is_visible());

        tip.pointer_enter();
        tip.set_locked(true);
        tip.pointer_leave();
        assert!(tip.is_visible());

        assert!(tip.on_cursor(Some(1), &opts, &data).is_some());
        assert!(tip.on_cursor(Some(9), &opts, &data).is_none());
        assert!(tip.on_cursor(None, &opts, &data).is_none());
        assert!(tip.content().is_none());
    }
}
