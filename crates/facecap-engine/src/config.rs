use facecap_core::quality::{DEFAULT_ANALYSIS_SIZE, DEFAULT_BLUR_THRESHOLD, DEFAULT_BRIGHTNESS_THRESHOLD};
use facecap_core::pose::{DEFAULT_SMILE_THRESHOLD, DEFAULT_TOLERANCE_DEG};
use facecap_core::{PoseTemplate, QualityThresholds, TemplateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// What a failed quality check does to pose correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    /// Low light or blur makes the pose incorrect; no hold can start.
    #[default]
    Block,
    /// Quality is reported but never withholds correctness.
    Advisory,
}

impl FromStr for QualityGate {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(QualityGate::Block),
            "advisory" => Ok(QualityGate::Advisory),
            _ => Err(()),
        }
    }
}

/// Parameters adjustable while the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    pub brightness_threshold: u8,
    pub blur_threshold: u64,
    pub hold_ms: u64,
    pub poll_ms: u64,
    pub transition_ms: u64,
    pub tolerance_deg: f32,
    pub smile_threshold: f32,
    pub quality_gate: QualityGate,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            brightness_threshold: DEFAULT_BRIGHTNESS_THRESHOLD,
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            hold_ms: 2000,
            poll_ms: 500,
            transition_ms: 1000,
            tolerance_deg: DEFAULT_TOLERANCE_DEG,
            smile_threshold: DEFAULT_SMILE_THRESHOLD,
            quality_gate: QualityGate::Block,
        }
    }
}

impl Tuning {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    /// Quality poll period; never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            brightness: self.brightness_threshold,
            blur: self.blur_threshold,
        }
    }
}

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tuning: Tuning,
    /// Progress tick period while a hold is running (default 16 ms).
    pub tick_interval: Duration,
    /// Crop committed stills to the face.
    pub crop_enabled: bool,
    /// Frames are scored at this size; `None` scores at native resolution.
    pub analysis_size: Option<(u32, u32)>,
    /// Pose template file; the embedded six-pose template when unset.
    pub template_path: Option<PathBuf>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tuning: Tuning::default(),
            tick_interval: Duration::from_millis(16),
            crop_enabled: true,
            analysis_size: Some(DEFAULT_ANALYSIS_SIZE),
            template_path: None,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `FACECAP_*` environment variables with defaults.
    ///
    /// A value that does not parse is logged and replaced by its default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let d = defaults.tuning;

        Self {
            tuning: Tuning {
                brightness_threshold: env_parse("FACECAP_BRIGHTNESS_THRESHOLD", d.brightness_threshold),
                blur_threshold: env_parse("FACECAP_BLUR_THRESHOLD", d.blur_threshold),
                hold_ms: env_parse("FACECAP_HOLD_MS", d.hold_ms),
                poll_ms: env_parse("FACECAP_POLL_MS", d.poll_ms),
                transition_ms: env_parse("FACECAP_TRANSITION_MS", d.transition_ms),
                tolerance_deg: env_parse("FACECAP_TOLERANCE_DEG", d.tolerance_deg),
                smile_threshold: env_parse("FACECAP_SMILE_THRESHOLD", d.smile_threshold),
                quality_gate: env_parse("FACECAP_QUALITY_GATE", d.quality_gate),
            },
            tick_interval: Duration::from_millis(env_parse("FACECAP_TICK_MS", 16u64).max(1)),
            crop_enabled: std::env::var("FACECAP_CROP")
                .map(|v| v != "0")
                .unwrap_or(defaults.crop_enabled),
            analysis_size: env_parse::<AnalysisSize>("FACECAP_ANALYSIS_SIZE", AnalysisSize(defaults.analysis_size)).0,
            template_path: std::env::var("FACECAP_TEMPLATE").ok().map(PathBuf::from),
            event_capacity: env_parse("FACECAP_EVENT_CAPACITY", defaults.event_capacity).max(1),
        }
    }

    /// The configured pose template, or the embedded default.
    pub fn template(&self) -> Result<PoseTemplate, ConfigError> {
        Ok(match &self.template_path {
            Some(path) => PoseTemplate::load(path)?,
            None => PoseTemplate::builtin()?,
        })
    }
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// `"native"` or `"WxH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AnalysisSize(Option<(u32, u32)>);

impl FromStr for AnalysisSize {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "native" {
            return Ok(AnalysisSize(None));
        }
        parse_size(s).map(|size| AnalysisSize(Some(size))).ok_or(())
    }
}

fn env_parse<T: FromStr + fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, ?default, "unparsable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.tuning.brightness_threshold, 130);
        assert_eq!(c.tuning.blur_threshold, 500);
        assert_eq!(c.tuning.hold(), Duration::from_millis(2000));
        assert_eq!(c.tuning.poll_interval(), Duration::from_millis(500));
        assert_eq!(c.tuning.transition(), Duration::from_millis(1000));
        assert_eq!(c.tick_interval, Duration::from_millis(16));
        assert_eq!(c.tuning.quality_gate, QualityGate::Block);
        assert!(c.crop_enabled);
        assert_eq!(c.analysis_size, Some((100, 100)));
    }

    #[test]
    fn test_quality_gate_parse() {
        assert_eq!("block".parse(), Ok(QualityGate::Block));
        assert_eq!(" Advisory ".parse(), Ok(QualityGate::Advisory));
        assert!("maybe".parse::<QualityGate>().is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100x100"), Some((100, 100)));
        assert_eq!(parse_size("64 x 48"), Some((64, 48)));
        assert_eq!(parse_size("0x10"), None);
        assert_eq!(parse_size("wide"), None);
    }

    #[test]
    fn test_env_parse_falls_back() {
        // Unlikely to be set in any test environment.
        assert_eq!(env_parse("FACECAP_TEST_UNSET_U64", 7u64), 7);
        assert_eq!(env_parse("FACECAP_TEST_UNSET_F32", 0.5f32), 0.5);
    }

    #[test]
    fn test_malformed_values_use_defaults() {
        std::env::set_var("FACECAP_TEST_BAD_HOLD", "abc");
        std::env::set_var("FACECAP_TEST_BAD_GATE", "maybe");
        std::env::set_var("FACECAP_TEST_BAD_SIZE", "wide");
        assert_eq!(env_parse("FACECAP_TEST_BAD_HOLD", 2000u64), 2000);
        assert_eq!(
            env_parse("FACECAP_TEST_BAD_GATE", QualityGate::Block),
            QualityGate::Block
        );
        assert_eq!(
            env_parse("FACECAP_TEST_BAD_SIZE", AnalysisSize(Some((100, 100)))),
            AnalysisSize(Some((100, 100)))
        );

        std::env::set_var("FACECAP_TEST_GOOD_GATE", "advisory");
        std::env::set_var("FACECAP_TEST_GOOD_SIZE", "native");
        assert_eq!(
            env_parse("FACECAP_TEST_GOOD_GATE", QualityGate::Block),
            QualityGate::Advisory
        );
        assert_eq!(
            env_parse("FACECAP_TEST_GOOD_SIZE", AnalysisSize(Some((100, 100)))),
            AnalysisSize(None)
        );
    }

    #[test]
    fn test_default_template_is_builtin() {
        let t = EngineConfig::default().template().unwrap();
        assert_eq!(t.len(), 6);
    }
}
