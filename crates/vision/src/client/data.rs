use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use video_ingest::FacingMode;

/// Label shown when a processed frame contained nothing.
pub const NO_OBJECTS_LABEL: &str = "No objects detected";

/// Label → count mapping carried by the `X-Detections` response header.
/// Keeps the order in which the server listed the labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionCounts(IndexMap<String, u64>);

impl DetectionCounts {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Parse an optional header value. Absent headers yield an empty mapping;
    /// malformed ones are logged and also yield an empty mapping.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Self::default();
        };
        match Self::parse(raw) {
            Ok(counts) => counts,
            Err(err) => {
                warn!(header = raw, "Error parsing detections: {err}");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(label, count)| (label.as_str(), *count))
    }

    /// Mapping displayed for a frame: the counts themselves, or the
    /// placeholder row when the frame had no detections.
    pub fn or_placeholder(self) -> Self {
        if self.is_empty() {
            Self::from_iter([(NO_OBJECTS_LABEL.to_string(), 0)])
        } else {
            self
        }
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

impl FromIterator<(String, u64)> for DetectionCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionRow {
    pub label: String,
    pub count: u64,
}

/// Displayed detection list. Every render replaces the previous rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DetectionList {
    rows: Vec<DetectionRow>,
}

impl DetectionList {
    pub fn render(&mut self, counts: &DetectionCounts) {
        self.rows.clear();
        self.rows.extend(counts.iter().map(|(label, count)| DetectionRow {
            label: label.to_string(),
            count,
        }));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn rows(&self) -> &[DetectionRow] {
        &self.rows
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ModelStatus {
    #[default]
    #[serde(rename = "Loading…")]
    Loading,
    Ready,
}

/// Enabled state of the page controls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub start: bool,
    pub stop: bool,
    pub flip: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FullscreenIcon {
    #[default]
    Expand,
    Compress,
}

/// Everything the page shows apart from the render surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PageState {
    pub model_status: ModelStatus,
    pub controls: Controls,
    pub streaming: bool,
    pub facing_mode: FacingMode,
    pub fps: Option<String>,
    pub detections: DetectionList,
    pub fullscreen_icon: FullscreenIcon,
    pub alert: Option<String>,
}

pub type SharedPage = Arc<Mutex<PageState>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(list: &DetectionList) -> Vec<(&str, u64)> {
        list.rows()
            .iter()
            .map(|row| (row.label.as_str(), row.count))
            .collect()
    }

    #[test]
    fn counts_keep_server_order() {
        let counts = DetectionCounts::parse(r#"{"person": 2, "cup": 1, "chair": 4}"#).unwrap();
        let order: Vec<_> = counts.iter().collect();
        assert_eq!(order, vec![("person", 2), ("cup", 1), ("chair", 4)]);
        assert_eq!(counts.total(), 7);
    }

    #[test]
    fn malformed_header_yields_empty_counts() {
        assert!(DetectionCounts::from_header(Some("{not json")).is_empty());
        assert!(DetectionCounts::from_header(Some(r#"{"person": "two"}"#)).is_empty());
        assert!(DetectionCounts::from_header(Some(r#"["person"]"#)).is_empty());
        assert!(DetectionCounts::from_header(None).is_empty());
    }

    #[test]
    fn two_labels_render_two_rows_in_order() {
        let mut list = DetectionList::default();
        let counts = DetectionCounts::from_header(Some(r#"{"person": 2, "cup": 1}"#));
        list.render(&counts.or_placeholder());
        assert_eq!(labels(&list), vec![("person", 2), ("cup", 1)]);
    }

    #[test]
    fn empty_mapping_renders_placeholder() {
        let mut list = DetectionList::default();
        list.render(&DetectionCounts::from_header(Some("{}")).or_placeholder());
        assert_eq!(labels(&list), vec![(NO_OBJECTS_LABEL, 0)]);
    }

    #[test]
    fn render_replaces_previous_rows() {
        let mut list = DetectionList::default();
        list.render(&DetectionCounts::parse(r#"{"dog": 1, "cat": 3}"#).unwrap());
        list.render(&DetectionCounts::parse(r#"{"cup": 5}"#).unwrap());
        assert_eq!(labels(&list), vec![("cup", 5)]);
    }

    #[test]
    fn render_is_idempotent() {
        let counts = DetectionCounts::parse(r#"{"person": 2, "cup": 1}"#).unwrap();
        let mut list = DetectionList::default();
        list.render(&counts);
        let first = list.clone();
        list.render(&counts);
        assert_eq!(list, first);
    }

    #[test]
    fn page_state_serializes_for_the_control_page() {
        let mut page = PageState::default();
        page.detections
            .render(&DetectionCounts::from_iter([("person".to_string(), 2)]));
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["model_status"], "Loading…");
        assert_eq!(json["facing_mode"], "environment");
        assert_eq!(json["fullscreen_icon"], "expand");
        assert_eq!(json["detections"][0]["label"], "person");
        assert_eq!(json["controls"]["start"], false);
    }
}
