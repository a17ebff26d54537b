//! JSON data contract: the marathon index, per-marathon feeds and the combined dataset.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{parse_start_time, LoadedMarathon, MarathonMeta, McError, RawSample};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StartField {
    Seconds(i64),
    Text(String),
}

/// One entry of `marathons.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarathonEntry {
    pub name: String,
    pub url: String,
    pub start: StartField,
    #[serde(default)]
    pub highlight: bool,
}

impl MarathonEntry {
    pub fn meta(&self) -> Result<MarathonMeta, McError> {
        let start_ts = match &self.start {
            StartField::Seconds(secs) => *secs,
            StartField::Text(text) => parse_start_time(text)?,
        };
        Ok(MarathonMeta {
            name: self.name.clone(),
            start_ts,
            highlight: self.highlight,
        })
    }
}

/// Marathons in display order, oldest first.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct MarathonIndex {
    pub entries: Vec<MarathonEntry>,
}

impl MarathonIndex {
    pub fn from_json(text: &str) -> Result<Self, McError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| McError::InvalidIndex(e.to_string()))?;
        if !value.is_array() {
            return Err(McError::InvalidIndex(
                "expected an array of marathons in display order".into(),
            ));
        }
        let entries: Vec<MarathonEntry> =
            serde_json::from_value(value).map_err(|e| McError::InvalidIndex(e.to_string()))?;
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|other| other.name == entry.name) {
                return Err(McError::InvalidIndex(format!(
                    "duplicate marathon name '{}'",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pair each entry with its fetched body (`None` when the fetch failed). A missing or
    /// unreadable body gives that marathon no samples; it never fails the whole load.
    pub fn assemble(&self, bodies: Vec<Option<String>>) -> Result<Vec<LoadedMarathon>, McError> {
        let mut bodies = bodies.into_iter();
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let meta = entry.meta()?;
            let samples = match bodies.next().flatten() {
                Some(body) => match MarathonFeed::from_json(&body) {
                    Ok(feed) => feed.rows,
                    Err(err) => {
                        warn!(marathon = %entry.name, "unreadable feed: {err}");
                        Vec::new()
                    }
                },
                None => {
                    warn!(marathon = %entry.name, url = %entry.url, "no data, charting as empty");
                    Vec::new()
                }
            };
            out.push(LoadedMarathon { meta, samples });
        }
        Ok(out)
    }
}

pub fn read_index_file(path: &std::path::Path) -> Result<MarathonIndex, McError> {
    #[cfg(feature = "wasm")]
    {
        Err(McError::InvalidIndex(format!(
            "{}: no filesystem in the browser build",
            path.display()
        )))
    }
    #[cfg(not(feature = "wasm"))]
    {
        let text = std::fs::read_to_string(path)
            .map_err(|e| McError::InvalidIndex(format!("{}: {e}", path.display())))?;
        MarathonIndex::from_json(&text)
    }
}

/// A single marathon's `{ "viewers": [[ts, viewers, donations], ...] }` document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarathonFeed {
    pub rows: Vec<Option<RawSample>>,
}

impl MarathonFeed {
    pub fn from_json(text: &str) -> Result<Self, McError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| McError::InvalidFeed(e.to_string()))?;
        let rows = value
            .get("viewers")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| McError::InvalidFeed("missing 'viewers' array".into()))?;
        let parsed: Vec<Option<RawSample>> = rows.iter().map(parse_row).collect();
        let dropped = parsed.iter().filter(|r| r.is_none()).count();
        if dropped > 0 {
            debug!(rows = parsed.len(), dropped, "feed rows without a usable timestamp");
        }
        Ok(Self { rows: parsed })
    }
}

fn parse_row(row: &JsonValue) -> Option<RawSample> {
    let cells = row.as_array()?;
    let ts = cells.first().and_then(json_timestamp)?;
    let viewers = cells.get(1).and_then(JsonValue::as_f64);
    let donations = cells.get(2).and_then(JsonValue::as_f64);
    Some(RawSample::new(ts, viewers, donations))
}

fn json_timestamp(value: &JsonValue) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v.floor() as i64))
}

/// Pre-bucketed dataset with every marathon on one 5-minute axis.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CombinedDataset {
    pub marathons: Vec<String>,
    #[serde(deserialize_with = "de_timestamps")]
    pub ts: Vec<i64>,
    #[serde(default)]
    pub donations: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    pub viewers: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    pub other_stats: Vec<OtherStats>,
}

impl CombinedDataset {
    pub fn from_json(text: &str) -> Result<Self, McError> {
        serde_json::from_str(text).map_err(|e| McError::InvalidFeed(e.to_string()))
    }
}

/// Aggregates for the summary table, as produced by the data generator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OtherStats {
    pub name: String,
    #[serde(default)]
    pub max_donations: Option<f64>,
    #[serde(default)]
    pub max_viewers: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub max_viewers_ts: Option<i64>,
    #[serde(default)]
    pub max_viewers_game: Option<String>,
}

/// Standalone `stats.json`: an array of summary rows, newest marathon first.
pub fn parse_stats(text: &str) -> Result<Vec<OtherStats>, McError> {
    serde_json::from_str(text).map_err(|e| McError::InvalidFeed(e.to_string()))
}

fn de_timestamps<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<f64> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|v| v.floor() as i64).collect())
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<f64> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|v| v.is_finite()).map(|v| v.floor() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"[
        {"name": "AGDQ 2021", "url": "agdq2021.json", "start": "2021-01-03T16:30:00Z"},
        {"name": "SGDQ 2021", "url": "sgdq2021.json", "start": 1625400000, "highlight": true}
    ]"#;

    #[test]
    fn index_keeps_declared_order() {
        let index = MarathonIndex::from_json(INDEX).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries[0].name, "AGDQ 2021");
        let meta = index.entries[1].meta().unwrap();
        assert_eq!(meta.start_ts, 1_625_400_000);
        assert!(meta.highlight);
        assert!(!index.entries[0].highlight);
    }

    #[test]
    fn keyed_index_is_rejected() {
        let err = MarathonIndex::from_json(r#"{"A": {"url": "a.json", "start": 0}}"#).unwrap_err();
        assert!(matches!(err, McError::InvalidIndex(_)));
        let dup = r#"[{"name": "A", "url": "a", "start": 0}, {"name": "A", "url": "b", "start": 0}]"#;
        assert!(MarathonIndex::from_json(dup).is_err());
    }

    #[test]
    fn malformed_rows_become_empty_slots() {
        let feed = MarathonFeed::from_json(
            r#"{"viewers": [[100, 5000, 12.5], null, ["x", 1, 2], [160, null, "n/a"], [220.9, 7]]}"#,
        )
        .unwrap();
        assert_eq!(feed.rows.len(), 5);
        assert_eq!(feed.rows[0], Some(RawSample::new(100, Some(5000.0), Some(12.5))));
        assert_eq!(feed.rows[1], None);
        assert_eq!(feed.rows[2], None);
        assert_eq!(feed.rows[3], Some(RawSample::new(160, None, None)));
        assert_eq!(feed.rows[4], Some(RawSample::new(220, Some(7.0), None)));
        assert!(MarathonFeed::from_json(r#"{"games": []}"#).is_err());
    }

    #[test]
    fn failed_fetch_only_empties_that_marathon() {
        let index = MarathonIndex::from_json(INDEX).unwrap();
        let loaded = index
            .assemble(vec![None, Some(r#"{"viewers": [[1625400000, 10, 0]]}"#.into())])
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].samples.is_empty());
        assert_eq!(loaded[1].samples.len(), 1);

        let garbage = index
            .assemble(vec![Some("not json".into())])
            .unwrap();
        assert!(garbage.iter().all(|m| m.samples.is_empty()));
    }

    #[test]
    fn combined_dataset_parses() {
        let text = r#"{
            "marathons": ["A", "B"],
            "ts": [1625400000.0, 1625400300],
            "donations": [[0, 10.5], [null, 3]],
            "viewers": [[100, 200], [300, null]],
            "other_stats": [{"name": "B", "max_donations": 0, "max_viewers": 300,
                             "max_viewers_ts": 1625400000, "max_viewers_game": "Celeste"}]
        }"#;
        let dataset = CombinedDataset::from_json(text).unwrap();
        assert_eq!(dataset.ts, vec![1_625_400_000, 1_625_400_300]);
        assert_eq!(dataset.donations[1], vec![None, Some(3.0)]);
        assert_eq!(dataset.other_stats[0].max_donations, Some(0.0));
        assert_eq!(dataset.other_stats[0].max_viewers_game.as_deref(), Some("Celeste"));
        let stats = parse_stats(r#"[{"name": "A"}]"#).unwrap();
        assert_eq!(stats[0].max_viewers, None);
    }
}
