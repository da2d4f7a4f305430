//! Client configuration structures
//!
//! [`ClientOptions`] is the single canonical bundle of publish and subscribe
//! options. Each option belongs to a scope ([`OptionScope`]); options outside
//! the scope of the client's role are dropped by
//! [`ClientOptions::effective_for`] with a debug log rather than rejected.
//!
//! # Usage Examples
//!
//! ```rust
//! use rtstream_client_core::client::config::{ClientOptions, ClientConfig, BitrateSettings};
//! use rtstream_client_core::ClientRole;
//!
//! let options = ClientOptions::new()
//!     .with_video_codec("VP8")
//!     .with_simulcast(true)
//!     .with_bitrate(BitrateSettings { max_kbps: Some(2500), ..Default::default() });
//!
//! let config = ClientConfig::publisher().with_options(options);
//! assert_eq!(config.role, ClientRole::Publisher);
//! assert!(config.options.validate().is_ok());
//! ```
//!
//! ## Role scoping
//!
//! ```rust
//! use rtstream_client_core::client::config::ClientOptions;
//! use rtstream_client_core::ClientRole;
//!
//! let options = ClientOptions::new()
//!     .with_pinned_source_id("camA")
//!     .with_stereo(true);
//!
//! // Subscribers keep the pin but drop the publish-only stereo flag
//! let effective = options.effective_for(ClientRole::Subscriber);
//! assert_eq!(effective.pinned_source_id.as_deref(), Some("camA"));
//! assert!(!effective.stereo);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::recovery::RetryConfig;
use crate::client::types::ClientRole;
use crate::error::{ClientError, ClientResult};

/// Which role an option applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionScope {
    Publish,
    Subscribe,
    General,
}

impl OptionScope {
    pub fn applies_to(&self, role: ClientRole) -> bool {
        match self {
            OptionScope::General => true,
            OptionScope::Publish => role == ClientRole::Publisher,
            OptionScope::Subscribe => role == ClientRole::Subscriber,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationPreference {
    Disabled,
    MaintainResolution,
    MaintainFramerate,
    Balanced,
}

/// Scalability modes as named by the WebRTC SVC extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalabilityMode {
    L1T2,
    L1T2h,
    L1T3,
    L1T3h,
    L2T1,
    L2T1h,
    #[serde(rename = "L2T1_KEY")]
    L2T1Key,
    L2T2,
    L2T3,
    L2T2h,
    #[serde(rename = "L2T2_KEY")]
    L2T2Key,
    #[serde(rename = "L2T2_KEY_SHIFT")]
    L2T2KeyShift,
    L2T3h,
    L3T1,
    L3T2,
    L3T3,
    #[serde(rename = "L3T3_KEY")]
    L3T3Key,
    S2T1,
    S2T2,
    S2T3,
    S3T1,
    S3T2,
    S3T3,
    S2T1h,
    S2T2h,
    S2T3h,
    S3T1h,
    S3T2h,
    S3T3h,
}

/// Publisher bitrate bounds, in kilobits per second
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateSettings {
    pub disable_bandwidth_estimation: bool,
    pub min_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
    pub start_kbps: Option<u32>,
}

/// Scope of every option, keyed by field name
pub const OPTION_SCOPES: &[(&str, OptionScope)] = &[
    ("source_id", OptionScope::Publish),
    ("pinned_source_id", OptionScope::Subscribe),
    ("excluded_source_ids", OptionScope::Subscribe),
    ("dtx", OptionScope::Publish),
    ("multiplexed_audio_track_count", OptionScope::Subscribe),
    ("video_codec", OptionScope::Publish),
    ("audio_codec", OptionScope::Publish),
    ("degradation_preference", OptionScope::General),
    ("bitrate", OptionScope::Publish),
    ("stereo", OptionScope::Publish),
    ("stats_interval_ms", OptionScope::General),
    ("video_jitter_minimum_delay_ms", OptionScope::Subscribe),
    ("force_playout_delay_zero", OptionScope::Subscribe),
    ("disable_audio", OptionScope::Subscribe),
    ("scalability_mode", OptionScope::Publish),
    ("simulcast", OptionScope::Publish),
    ("event_log_path", OptionScope::General),
    ("record_on_publish", OptionScope::Publish),
    ("priority", OptionScope::Publish),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Source id to publish under
    pub source_id: Option<String>,
    /// Source to pin the main projection to
    pub pinned_source_id: Option<String>,
    /// Sources the server should not forward
    pub excluded_source_ids: Vec<String>,
    /// Discontinuous audio transmission
    pub dtx: bool,
    /// Extra inbound audio transceivers for multiplexed sources
    pub multiplexed_audio_track_count: u32,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub degradation_preference: Option<DegradationPreference>,
    pub bitrate: BitrateSettings,
    pub stereo: bool,
    /// Minimum spacing between stats reports
    pub stats_interval_ms: u64,
    pub video_jitter_minimum_delay_ms: u32,
    /// Ask the media server to remove playout delay
    pub force_playout_delay_zero: bool,
    /// Do not receive audio at all
    pub disable_audio: bool,
    pub scalability_mode: Option<ScalabilityMode>,
    pub simulcast: bool,
    /// RTC event log output file
    pub event_log_path: Option<PathBuf>,
    /// Start server-side recording as soon as publishing begins
    pub record_on_publish: bool,
    pub priority: Option<i32>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            source_id: None,
            pinned_source_id: None,
            excluded_source_ids: Vec::new(),
            dtx: false,
            multiplexed_audio_track_count: 0,
            video_codec: None,
            audio_codec: None,
            degradation_preference: None,
            bitrate: BitrateSettings::default(),
            stereo: false,
            stats_interval_ms: 1000,
            video_jitter_minimum_delay_ms: 0,
            force_playout_delay_zero: false,
            disable_audio: false,
            scalability_mode: None,
            simulcast: false,
            event_log_path: None,
            record_on_publish: false,
            priority: None,
        }
    }
}

fn reset_field<T: PartialEq>(field: &mut T, default: T, name: &'static str, ignored: &mut Vec<&'static str>) {
    if *field != default {
        *field = default;
        ignored.push(name);
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope of a named option
    pub fn scope(name: &str) -> Option<OptionScope> {
        OPTION_SCOPES.iter().find(|(n, _)| *n == name).map(|(_, s)| *s)
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_pinned_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.pinned_source_id = Some(source_id.into());
        self
    }

    pub fn with_excluded_source_ids(mut self, source_ids: Vec<String>) -> Self {
        self.excluded_source_ids = source_ids;
        self
    }

    pub fn with_dtx(mut self, dtx: bool) -> Self {
        self.dtx = dtx;
        self
    }

    pub fn with_multiplexed_audio_tracks(mut self, count: u32) -> Self {
        self.multiplexed_audio_track_count = count;
        self
    }

    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = Some(codec.into());
        self
    }

    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    pub fn with_degradation_preference(mut self, preference: DegradationPreference) -> Self {
        self.degradation_preference = Some(preference);
        self
    }

    pub fn with_bitrate(mut self, bitrate: BitrateSettings) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_video_jitter_minimum_delay_ms(mut self, delay_ms: u32) -> Self {
        self.video_jitter_minimum_delay_ms = delay_ms;
        self
    }

    pub fn with_force_playout_delay_zero(mut self, force: bool) -> Self {
        self.force_playout_delay_zero = force;
        self
    }

    pub fn with_disable_audio(mut self, disable: bool) -> Self {
        self.disable_audio = disable;
        self
    }

    pub fn with_scalability_mode(mut self, mode: ScalabilityMode) -> Self {
        self.scalability_mode = Some(mode);
        self
    }

    pub fn with_simulcast(mut self, simulcast: bool) -> Self {
        self.simulcast = simulcast;
        self
    }

    pub fn with_event_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log_path = Some(path.into());
        self
    }

    pub fn with_record_on_publish(mut self, record: bool) -> Self {
        self.record_on_publish = record;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Reject option combinations no session could honor
    pub fn validate(&self) -> ClientResult<()> {
        let bitrate = &self.bitrate;
        if let (Some(min), Some(max)) = (bitrate.min_kbps, bitrate.max_kbps) {
            if min > max {
                return Err(ClientError::invalid_configuration(
                    "bitrate",
                    format!("min {} kbps exceeds max {} kbps", min, max),
                ));
            }
        }
        if let Some(start) = bitrate.start_kbps {
            let below = bitrate.min_kbps.map_or(false, |min| start < min);
            let above = bitrate.max_kbps.map_or(false, |max| start > max);
            if below || above {
                return Err(ClientError::invalid_configuration(
                    "bitrate",
                    format!("start {} kbps outside [min, max]", start),
                ));
            }
        }
        if self.stats_interval_ms == 0 {
            return Err(ClientError::invalid_configuration("stats_interval_ms", "must be greater than zero"));
        }
        if let Some(path) = &self.event_log_path {
            if path.as_os_str().is_empty() {
                return Err(ClientError::invalid_configuration("event_log_path", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Options with everything outside `role`'s scope reset to defaults
    pub fn effective_for(&self, role: ClientRole) -> ClientOptions {
        let (effective, ignored) = self.split_for(role);
        for option in ignored {
            debug!(option, role = %role, "Ignoring option that does not apply to this role");
        }
        effective
    }

    /// Names of the set options that `role` ignores
    pub fn ignored_for(&self, role: ClientRole) -> Vec<&'static str> {
        self.split_for(role).1
    }

    fn split_for(&self, role: ClientRole) -> (ClientOptions, Vec<&'static str>) {
        let mut out = self.clone();
        let d = ClientOptions::default();
        let mut ignored = Vec::new();

        match role {
            ClientRole::Publisher => {
                reset_field(&mut out.pinned_source_id, d.pinned_source_id, "pinned_source_id", &mut ignored);
                reset_field(&mut out.excluded_source_ids, d.excluded_source_ids, "excluded_source_ids", &mut ignored);
                reset_field(&mut out.multiplexed_audio_track_count, d.multiplexed_audio_track_count, "multiplexed_audio_track_count", &mut ignored);
                reset_field(&mut out.video_jitter_minimum_delay_ms, d.video_jitter_minimum_delay_ms, "video_jitter_minimum_delay_ms", &mut ignored);
                reset_field(&mut out.force_playout_delay_zero, d.force_playout_delay_zero, "force_playout_delay_zero", &mut ignored);
                reset_field(&mut out.disable_audio, d.disable_audio, "disable_audio", &mut ignored);
            }
            ClientRole::Subscriber => {
                reset_field(&mut out.source_id, d.source_id, "source_id", &mut ignored);
                reset_field(&mut out.dtx, d.dtx, "dtx", &mut ignored);
                reset_field(&mut out.video_codec, d.video_codec, "video_codec", &mut ignored);
                reset_field(&mut out.audio_codec, d.audio_codec, "audio_codec", &mut ignored);
                reset_field(&mut out.bitrate, d.bitrate, "bitrate", &mut ignored);
                reset_field(&mut out.stereo, d.stereo, "stereo", &mut ignored);
                reset_field(&mut out.scalability_mode, d.scalability_mode, "scalability_mode", &mut ignored);
                reset_field(&mut out.simulcast, d.simulcast, "simulcast", &mut ignored);
                reset_field(&mut out.record_on_publish, d.record_on_publish, "record_on_publish", &mut ignored);
                reset_field(&mut out.priority, d.priority, "priority", &mut ignored);
            }
        }

        (out, ignored)
    }

    /// Names of the options whose values differ between two bundles
    pub fn differing_fields(&self, other: &ClientOptions) -> Vec<String> {
        let (Ok(serde_json::Value::Object(a)), Ok(serde_json::Value::Object(b))) =
            (serde_json::to_value(self), serde_json::to_value(other))
        else {
            return Vec::new();
        };
        a.iter()
            .filter(|(key, value)| b.get(key.as_str()) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Pick the options for one publish/subscribe call.
///
/// `stored` holds whatever the legacy setters configured. A per-call bundle
/// wins; if both were customized and disagree the conflict is logged.
pub(crate) fn resolve_options(stored: &ClientOptions, per_call: Option<ClientOptions>) -> ClientOptions {
    match per_call {
        None => stored.clone(),
        Some(options) => {
            if *stored != ClientOptions::default() && options != *stored {
                let fields = stored.differing_fields(&options);
                warn!(
                    fields = ?fields,
                    "Per-call options conflict with options set through legacy setters; using per-call options"
                );
            }
            options
        }
    }
}

/// Options fixed for one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Reconnect in the background after a network drop
    pub auto_reconnect: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self { auto_reconnect: true }
    }
}

impl ConnectionOptions {
    pub fn without_reconnect() -> Self {
        Self { auto_reconnect: false }
    }
}

/// Everything needed to build a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub role: ClientRole,
    /// Defaults for publish/subscribe when no per-call options are given
    #[serde(default)]
    pub options: ClientOptions,
    /// Used by `connect()` when no connection options are passed
    #[serde(default)]
    pub connection: ConnectionOptions,
    /// Backoff between reconnect attempts
    #[serde(default = "RetryConfig::reconnect")]
    pub reconnect: RetryConfig,
    /// Upper bound on closing the transport during teardown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl ClientConfig {
    pub fn new(role: ClientRole) -> Self {
        Self {
            role,
            options: ClientOptions::default(),
            connection: ConnectionOptions::default(),
            reconnect: RetryConfig::reconnect(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }

    pub fn publisher() -> Self {
        Self::new(ClientRole::Publisher)
    }

    pub fn subscriber() -> Self {
        Self::new(ClientRole::Subscriber)
    }

    /// Load a configuration from JSON, filling omitted sections with defaults
    pub fn from_json(json: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| ClientError::invalid_configuration("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_connection_options(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: RetryConfig) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        self.options.validate()?;
        if self.reconnect.max_attempts == 0 {
            return Err(ClientError::invalid_configuration("reconnect.max_attempts", "must be at least 1"));
        }
        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(ClientError::invalid_configuration("reconnect.backoff_multiplier", "must be at least 1.0"));
        }
        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(ClientError::invalid_configuration("reconnect.initial_delay", "exceeds max_delay"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_every_option_has_a_scope() {
        let json = serde_json::to_value(ClientOptions::default()).unwrap();
        for key in json.as_object().unwrap().keys() {
            assert!(ClientOptions::scope(key).is_some(), "option {} has no scope", key);
        }
        assert_eq!(ClientOptions::scope("simulcast"), Some(OptionScope::Publish));
        assert_eq!(ClientOptions::scope("disable_audio"), Some(OptionScope::Subscribe));
        assert_eq!(ClientOptions::scope("stats_interval_ms"), Some(OptionScope::General));
    }

    #[test]
    fn test_role_mismatched_options_are_dropped() {
        let options = ClientOptions::new()
            .with_simulcast(true)
            .with_record_on_publish(true)
            .with_multiplexed_audio_tracks(3)
            .with_stats_interval(Duration::from_millis(250));

        let publish = options.effective_for(ClientRole::Publisher);
        assert!(publish.simulcast);
        assert!(publish.record_on_publish);
        assert_eq!(publish.multiplexed_audio_track_count, 0);
        assert_eq!(publish.stats_interval_ms, 250);

        let subscribe = options.effective_for(ClientRole::Subscriber);
        assert!(!subscribe.simulcast);
        assert_eq!(subscribe.multiplexed_audio_track_count, 3);
        assert_eq!(subscribe.stats_interval_ms, 250);

        let mut ignored = options.ignored_for(ClientRole::Subscriber);
        ignored.sort();
        assert_eq!(ignored, vec!["record_on_publish", "simulcast"]);
    }

    #[test]
    #[traced_test]
    fn test_ignored_options_are_logged() {
        let _ = ClientOptions::new().with_dtx(true).effective_for(ClientRole::Subscriber);
        assert!(logs_contain("Ignoring option that does not apply to this role"));
    }

    #[test]
    fn test_bitrate_validation() {
        let bad = ClientOptions::new().with_bitrate(BitrateSettings {
            min_kbps: Some(2000),
            max_kbps: Some(1000),
            ..Default::default()
        });
        assert!(bad.validate().is_err());

        let bad_start = ClientOptions::new().with_bitrate(BitrateSettings {
            min_kbps: Some(300),
            max_kbps: Some(1000),
            start_kbps: Some(1500),
            ..Default::default()
        });
        assert!(bad_start.validate().is_err());

        let good = ClientOptions::new().with_bitrate(BitrateSettings {
            min_kbps: Some(300),
            max_kbps: Some(1000),
            start_kbps: Some(600),
            disable_bandwidth_estimation: true,
        });
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_zero_stats_interval_rejected() {
        let options = ClientOptions { stats_interval_ms: 0, ..Default::default() };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_per_call_options_win_over_legacy() {
        let stored = ClientOptions::new().with_simulcast(true);
        let per_call = ClientOptions::new().with_video_codec("H264");

        let resolved = resolve_options(&stored, Some(per_call.clone()));
        assert_eq!(resolved, per_call);
        assert_eq!(resolve_options(&stored, None), stored);

        let mut diff = stored.differing_fields(&per_call);
        diff.sort();
        assert_eq!(diff, vec!["simulcast".to_string(), "video_codec".to_string()]);
    }

    #[test]
    fn test_config_from_json_with_defaults() {
        let config = ClientConfig::from_json(
            r#"{ "role": "subscriber", "options": { "multiplexed_audio_track_count": 2 }, "connection": { "auto_reconnect": false } }"#,
        )
        .unwrap();
        assert_eq!(config.role, ClientRole::Subscriber);
        assert_eq!(config.options.multiplexed_audio_track_count, 2);
        assert_eq!(config.options.stats_interval_ms, 1000);
        assert!(!config.connection.auto_reconnect);
        assert_eq!(config.reconnect.max_attempts, RetryConfig::reconnect().max_attempts);
    }

    #[test]
    fn test_config_from_json_rejects_bad_values() {
        assert!(ClientConfig::from_json("{ \"role\": \"broadcaster\" }").is_err());
        assert!(ClientConfig::from_json(r#"{ "role": "publisher", "options": { "stats_interval_ms": 0 } }"#).is_err());
    }

    #[test]
    fn test_scalability_mode_names() {
        let json = serde_json::to_string(&ScalabilityMode::L2T2KeyShift).unwrap();
        assert_eq!(json, "\"L2T2_KEY_SHIFT\"");
        let mode: ScalabilityMode = serde_json::from_str("\"S3T3h\"").unwrap();
        assert_eq!(mode, ScalabilityMode::S3T3h);
    }

    #[test]
    fn test_connection_options_default_to_reconnect() {
        assert!(ConnectionOptions::default().auto_reconnect);
        assert!(!ConnectionOptions::without_reconnect().auto_reconnect);
    }
}
