//! RTC statistics reports and delivery gating
//!
//! The transport samples raw RTC statistics into a [`StatsReport`]. Reports
//! reach the listener only while stats are enabled and the session is
//! connected, throttled to the configured interval. Each admitted report is
//! stamped with the gate epoch it was admitted under, and the dispatcher drops
//! it if the gate has moved on by the time it would be delivered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::track::TrackKind;

/// Default reporting interval
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundRtpStats {
    pub id: String,
    pub kind: String,
    pub mid: String,
    pub decoder_implementation: Option<String>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frames_per_second: f64,
    pub audio_level: f64,
    pub total_audio_energy: f64,
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub nack_count: u64,
    pub bytes_received: u64,
    pub total_samples_duration: f64,
    pub codec_id: Option<String>,
    pub jitter: f64,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInboundRtpStats {
    pub id: String,
    pub kind: String,
    pub round_trip_time: f64,
    pub fraction_lost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundRtpStats {
    pub id: String,
    pub kind: String,
    pub mid: String,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frames_per_second: f64,
    pub target_bitrate: f64,
    pub quality_limitation_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecStats {
    pub id: String,
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
}

/// One entry of a raw statistics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStats {
    InboundRtp(InboundRtpStats),
    RemoteInboundRtp(RemoteInboundRtpStats),
    OutboundRtp(OutboundRtpStats),
    Codec(CodecStats),
}

/// Raw statistics sample taken by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<RtcStats>,
}

impl StatsReport {
    pub fn new(entries: Vec<RtcStats>) -> Self {
        Self { timestamp: Utc::now(), entries }
    }

    pub fn inbound_rtp(&self) -> impl Iterator<Item = &InboundRtpStats> {
        self.entries.iter().filter_map(|e| match e {
            RtcStats::InboundRtp(s) => Some(s),
            _ => None,
        })
    }

    pub fn remote_inbound_rtp(&self) -> impl Iterator<Item = &RemoteInboundRtpStats> {
        self.entries.iter().filter_map(|e| match e {
            RtcStats::RemoteInboundRtp(s) => Some(s),
            _ => None,
        })
    }

    pub fn outbound_rtp(&self) -> impl Iterator<Item = &OutboundRtpStats> {
        self.entries.iter().filter_map(|e| match e {
            RtcStats::OutboundRtp(s) => Some(s),
            _ => None,
        })
    }

    pub fn codec(&self, codec_id: &str) -> Option<&CodecStats> {
        self.entries.iter().find_map(|e| match e {
            RtcStats::Codec(c) if c.id == codec_id => Some(c),
            _ => None,
        })
    }
}

/// Inbound RTP entry with its codec resolved
#[derive(Debug, Clone, PartialEq)]
pub struct InboundStreamStatistics {
    pub stats: InboundRtpStats,
    pub codec_name: Option<String>,
}

impl InboundStreamStatistics {
    pub fn video_resolution(&self) -> String {
        format!("{} x {}", self.stats.frame_width, self.stats.frame_height)
    }
}

/// Receive-side summary of a statistics report
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingStatistics {
    pub round_trip_time: Option<f64>,
    pub video: Vec<InboundStreamStatistics>,
    pub audio: Vec<InboundStreamStatistics>,
}

impl StreamingStatistics {
    /// Summarize a report. Returns `None` when the report carries neither
    /// remote-inbound nor inbound RTP entries.
    pub fn from_report(report: &StatsReport) -> Option<Self> {
        let has_remote = report.remote_inbound_rtp().next().is_some();
        let has_inbound = report.inbound_rtp().next().is_some();
        if !has_remote && !has_inbound {
            return None;
        }

        let round_trip_time = report.remote_inbound_rtp().next().map(|s| s.round_trip_time);
        let resolve = |kind: TrackKind| -> Vec<InboundStreamStatistics> {
            report
                .inbound_rtp()
                .filter(|s| s.kind == kind.as_str())
                .map(|s| InboundStreamStatistics {
                    stats: s.clone(),
                    codec_name: s
                        .codec_id
                        .as_deref()
                        .and_then(|id| report.codec(id))
                        .map(|c| c.mime_type.clone()),
                })
                .collect()
        };

        Some(Self {
            round_trip_time,
            video: resolve(TrackKind::Video),
            audio: resolve(TrackKind::Audio),
        })
    }
}

/// Admission control for stats reports
#[derive(Debug)]
pub(crate) struct StatsGate {
    enabled: AtomicBool,
    epoch: AtomicU64,
    interval: Mutex<Duration>,
    last_admitted: Mutex<Option<Instant>>,
}

impl StatsGate {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            interval: Mutex::new(DEFAULT_STATS_INTERVAL),
            last_admitted: Mutex::new(None),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.invalidate();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
    }

    /// Drop every report admitted so far
    pub(crate) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.last_admitted.lock() = None;
    }

    /// Admit a sample taken at `now`, returning its delivery ticket
    pub(crate) fn admit(&self, now: Instant) -> Option<u64> {
        if !self.is_enabled() {
            return None;
        }
        let interval = *self.interval.lock();
        let mut last = self.last_admitted.lock();
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < interval {
                return None;
            }
        }
        *last = Some(now);
        Some(self.epoch.load(Ordering::SeqCst))
    }

    pub(crate) fn is_current(&self, ticket: u64) -> bool {
        self.is_enabled() && self.epoch.load(Ordering::SeqCst) == ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(kind: &str, mid: &str, codec: Option<&str>) -> RtcStats {
        RtcStats::InboundRtp(InboundRtpStats {
            id: format!("in-{}", mid),
            kind: kind.to_string(),
            mid: mid.to_string(),
            codec_id: codec.map(str::to_string),
            bytes_received: 1200,
            ..Default::default()
        })
    }

    #[test]
    fn test_streaming_statistics_resolves_codecs() {
        let report = StatsReport::new(vec![
            RtcStats::RemoteInboundRtp(RemoteInboundRtpStats {
                id: "ri".to_string(),
                kind: "video".to_string(),
                round_trip_time: 0.042,
                fraction_lost: 0.0,
            }),
            inbound("video", "0", Some("c1")),
            inbound("audio", "1", Some("c2")),
            inbound("audio", "2", None),
            RtcStats::Codec(CodecStats {
                id: "c1".to_string(),
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
            }),
        ]);

        let stats = StreamingStatistics::from_report(&report).unwrap();
        assert_eq!(stats.round_trip_time, Some(0.042));
        assert_eq!(stats.video.len(), 1);
        assert_eq!(stats.video[0].codec_name.as_deref(), Some("video/VP8"));
        assert_eq!(stats.audio.len(), 2);
        assert_eq!(stats.audio[0].codec_name, None);
    }

    #[test]
    fn test_streaming_statistics_requires_receive_entries() {
        let report = StatsReport::new(vec![RtcStats::OutboundRtp(OutboundRtpStats::default())]);
        assert!(StreamingStatistics::from_report(&report).is_none());
    }

    #[test]
    fn test_report_json_shape() {
        let entry = RtcStats::Codec(CodecStats { id: "c".into(), mime_type: "audio/opus".into(), payload_type: 111, clock_rate: 48000 });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "codec");
        assert_eq!(json["mime_type"], "audio/opus");
    }

    #[test]
    fn test_gate_throttles_and_invalidates() {
        let gate = StatsGate::new();
        let start = Instant::now();
        assert!(gate.admit(start).is_none());

        gate.set_enabled(true);
        gate.set_interval(Duration::from_millis(500));
        let ticket = gate.admit(start).unwrap();
        assert!(gate.is_current(ticket));
        assert!(gate.admit(start + Duration::from_millis(100)).is_none());
        assert!(gate.admit(start + Duration::from_millis(600)).is_some());

        gate.set_enabled(false);
        assert!(!gate.is_current(ticket));
    }

    #[test]
    fn test_gate_tickets_do_not_survive_reenable() {
        let gate = StatsGate::new();
        gate.set_enabled(true);
        let ticket = gate.admit(Instant::now()).unwrap();
        gate.set_enabled(false);
        gate.set_enabled(true);
        assert!(!gate.is_current(ticket));
    }
}
