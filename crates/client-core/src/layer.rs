//! Simulcast/SVC layers, projection requests and remote sources

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::track::{Mid, TrackKind};

/// Temporal id reported for codecs without temporal layers (H.264)
pub const NO_TEMPORAL_LAYERS: i32 = 255;

/// One simulcast encoding or SVC rung
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerData {
    pub encoding_id: String,
    pub spatial_layer_id: i32,
    pub temporal_layer_id: i32,
}

impl LayerData {
    pub fn new(encoding_id: impl Into<String>, spatial_layer_id: i32, temporal_layer_id: i32) -> Self {
        Self {
            encoding_id: encoding_id.into(),
            spatial_layer_id,
            temporal_layer_id,
        }
    }

    /// Base temporal layer of its encoding, the one quality ladders are built from
    pub fn is_base_temporal_layer(&self) -> bool {
        self.temporal_layer_id == 0 || self.temporal_layer_id == NO_TEMPORAL_LAYERS
    }
}

/// Request to carry one track of a remote source on a local transceiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionData {
    pub track_id: String,
    pub media: TrackKind,
    pub mid: Mid,
    pub layer: Option<LayerData>,
}

impl ProjectionData {
    pub fn new(track_id: impl Into<String>, media: TrackKind, mid: impl Into<Mid>) -> Self {
        Self {
            track_id: track_id.into(),
            media,
            mid: mid.into(),
            layer: None,
        }
    }

    pub fn with_layer(mut self, layer: LayerData) -> Self {
        self.layer = Some(layer);
        self
    }
}

/// A remote source announced active by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub source_id: Option<String>,
    pub stream_id: String,
    pub active_track_ids: BTreeSet<String>,
}

impl SourceEntry {
    pub fn new(stream_id: impl Into<String>, track_ids: &[String], source_id: Option<String>) -> Self {
        Self {
            source_id,
            stream_id: stream_id.into(),
            active_track_ids: track_ids.iter().cloned().collect(),
        }
    }

    /// Parse the `"{media}/{trackId}"` entries announced for this source.
    ///
    /// Entries without a separator or with an unknown media kind are skipped.
    pub fn track_items(&self) -> Vec<(TrackKind, String)> {
        self.active_track_ids
            .iter()
            .filter_map(|entry| {
                let (media, id) = entry.split_once('/')?;
                let kind = media.parse::<TrackKind>().ok()?;
                Some((kind, id.to_string()))
            })
            .collect()
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.active_track_ids.contains(track_id)
            || self.track_items().iter().any(|(_, id)| id == track_id)
    }
}

/// Latest layer announcement for one mid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSnapshot {
    pub active: Vec<LayerData>,
    pub inactive: Vec<LayerData>,
}

/// Selectable video quality derived from the active layers of a mid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoQuality {
    Auto,
    High(LayerData),
    Medium(LayerData),
    Low(LayerData),
}

impl VideoQuality {
    /// Build the quality ladder from the active layers, in the server's order.
    ///
    /// Two base layers yield high/low, three yield high/medium/low, and any
    /// other count only offers automatic selection.
    pub fn ladder(active: &[LayerData]) -> Vec<VideoQuality> {
        let base: Vec<&LayerData> = active.iter().filter(|l| l.is_base_temporal_layer()).collect();

        match base.as_slice() {
            [high, low] => vec![
                VideoQuality::Auto,
                VideoQuality::High((*high).clone()),
                VideoQuality::Low((*low).clone()),
            ],
            [high, medium, low] => vec![
                VideoQuality::Auto,
                VideoQuality::High((*high).clone()),
                VideoQuality::Medium((*medium).clone()),
                VideoQuality::Low((*low).clone()),
            ],
            _ => vec![VideoQuality::Auto],
        }
    }

    /// Layer to pin for this quality; `None` means automatic
    pub fn layer(&self) -> Option<&LayerData> {
        match self {
            VideoQuality::Auto => None,
            VideoQuality::High(layer) | VideoQuality::Medium(layer) | VideoQuality::Low(layer) => Some(layer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(encoding: &str, temporal: i32) -> LayerData {
        LayerData::new(encoding, 0, temporal)
    }

    #[test]
    fn test_layer_equality_uses_all_fields() {
        assert_eq!(LayerData::new("h", 1, 0), LayerData::new("h", 1, 0));
        assert_ne!(LayerData::new("h", 1, 0), LayerData::new("h", 1, 1));
        assert_ne!(LayerData::new("h", 1, 0), LayerData::new("l", 1, 0));
    }

    #[test]
    fn test_ladder_for_three_simulcast_encodings() {
        let active = vec![
            layer("h", 0),
            layer("h", 1),
            layer("m", 0),
            layer("m", 1),
            layer("l", 0),
        ];
        let ladder = VideoQuality::ladder(&active);
        assert_eq!(ladder.len(), 4);
        assert_eq!(ladder[0], VideoQuality::Auto);
        assert_eq!(ladder[1], VideoQuality::High(layer("h", 0)));
        assert_eq!(ladder[2], VideoQuality::Medium(layer("m", 0)));
        assert_eq!(ladder[3], VideoQuality::Low(layer("l", 0)));
    }

    #[test]
    fn test_ladder_treats_255_as_base_layer() {
        let active = vec![layer("h", NO_TEMPORAL_LAYERS), layer("l", NO_TEMPORAL_LAYERS)];
        let ladder = VideoQuality::ladder(&active);
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[2].layer(), Some(&layer("l", NO_TEMPORAL_LAYERS)));
    }

    #[test]
    fn test_ladder_falls_back_to_auto() {
        assert_eq!(VideoQuality::ladder(&[]), vec![VideoQuality::Auto]);
        assert_eq!(VideoQuality::ladder(&[layer("h", 0)]), vec![VideoQuality::Auto]);
        assert_eq!(VideoQuality::Auto.layer(), None);
    }

    #[test]
    fn test_source_track_items() {
        let entry = SourceEntry::new(
            "stream1",
            &["video/cam".to_string(), "audio/mic".to_string(), "garbage".to_string()],
            Some("camA".to_string()),
        );
        let items = entry.track_items();
        assert_eq!(items.len(), 2);
        assert!(items.contains(&(TrackKind::Video, "cam".to_string())));
        assert!(items.contains(&(TrackKind::Audio, "mic".to_string())));
        assert!(entry.has_track("cam"));
        assert!(entry.has_track("video/cam"));
        assert!(!entry.has_track("screen"));
    }
}
