//! Summary table of per-marathon totals and viewer peaks.

use serde::{Deserialize, Serialize};

use crate::feed::OtherStats;
use crate::format::{escape_html, fmt_num, format_datetime, format_value};
use crate::DisplayMode;

/// Name color for the emphasized marathon's row.
pub const HIGHLIGHT_COLOR: &str = "#ffcc00";
pub const HEADERS: [&str; 5] = [
    "Marathon",
    "Total donations",
    "Peak viewers",
    "Peak at",
    "Game at peak",
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub emphasized: bool,
    pub total_donations: String,
    pub peak_viewers: String,
    pub peak_at: String,
    pub peak_game: String,
}

impl SummaryRow {
    fn cells(&self) -> [&str; 5] {
        [
            self.name.as_str(),
            self.total_donations.as_str(),
            self.peak_viewers.as_str(),
            self.peak_at.as_str(),
            self.peak_game.as_str(),
        ]
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SummaryTable {
    pub rows: Vec<SummaryRow>,
}

/// Format the generator's aggregates. `emphasized` names the highlighted marathon; without
/// one the first (newest) row is emphasized.
pub fn build_summary(
    stats: &[OtherStats],
    emphasized: Option<&str>,
    utc_offset_s: i32,
) -> SummaryTable {
    let rows = stats
        .iter()
        .enumerate()
        .map(|(i, s)| SummaryRow {
            name: s.name.clone(),
            emphasized: match emphasized {
                Some(name) => s.name == name,
                None => i == 0,
            },
            total_donations: s
                .max_donations
                .map(|v| format_value(DisplayMode::Donations, Some(v)))
                .unwrap_or_default(),
            peak_viewers: s.max_viewers.map(fmt_num).unwrap_or_default(),
            peak_at: s
                .max_viewers_ts
                .map(|ts| format_datetime(ts, utc_offset_s))
                .unwrap_or_default(),
            peak_game: s.max_viewers_game.clone().unwrap_or_default(),
        })
        .collect();
    SummaryTable { rows }
}

impl SummaryTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_html(&self) -> String {
        let mut html = String::from("<table class=\"summary\">\n<thead><tr>");
        for header in HEADERS {
            html.push_str(&format!("<th>{header}</th>"));
        }
        html.push_str("</tr></thead>\n<tbody>\n");
        for row in &self.rows {
            html.push_str("<tr>");
            for (i, cell) in row.cells().iter().enumerate() {
                let text = escape_html(cell);
                if i == 0 && row.emphasized {
                    html.push_str(&format!(
                        "<td><span style=\"color: {HIGHLIGHT_COLOR}\">{text}</span></td>"
                    ));
                } else {
                    html.push_str(&format!("<td>{text}</td>"));
                }
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>\n");
        html
    }

    /// Plain-text rendering with padded columns; the emphasized row is marked with `*`.
    pub fn to_text(&self) -> String {
        let mut widths = HEADERS.map(|h| h.chars().count());
        for row in &self.rows {
            for (i, cell) in row.cells().iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let mut out = String::new();
        let mut push_line = |marker: char, cells: [&str; 5]| {
            out.push(marker);
            out.push(' ');
            let padded: Vec<String> = cells
                .iter()
                .zip(widths.iter())
                .map(|(cell, &width)| format!("{cell:<width$}"))
                .collect();
            out.push_str(padded.join("  ").trim_end());
            out.push('\n');
        };
        push_line(' ', HEADERS);
        for row in &self.rows {
            push_line(if row.emphasized { '*' } else { ' ' }, row.cells());
        }
        out
    }
}
