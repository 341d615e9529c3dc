use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{DetectorBackend, ReplayBackend};
use crate::locate::LocatorSettings;
use crate::tracker::TrackerConfig;

const DEFAULT_FRAMES_DIR: &str = "data/frames";
const DEFAULT_OUTPUT_DIR: &str = "data";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    video_path: Option<PathBuf>,
    frames_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    locator: Option<LocatorSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    replay_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    sampling_rate: Option<f64>,
    stride: Option<u64>,
    confidence_threshold: Option<f32>,
    max_region_misses: Option<u32>,
    max_empty_predictions: Option<u32>,
    call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Replay,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}' (expected replay|tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub replay_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            DetectorKind::Replay if self.replay_path.is_none() => {
                Err(anyhow!("replay backend requires a recorded predictions path"))
            }
            DetectorKind::Tract if self.model_path.is_none() => {
                Err(anyhow!("tract backend requires a model path"))
            }
            DetectorKind::Tract if self.input_size == 0 => {
                Err(anyhow!("detector input_size must be greater than zero"))
            }
            _ => Ok(()),
        }
    }

    /// Instantiate the configured backend.
    pub fn build(&self) -> Result<Arc<dyn DetectorBackend>> {
        self.validate()?;
        match self.backend {
            DetectorKind::Replay => {
                let path = self
                    .replay_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("replay backend requires a recorded predictions path"))?;
                Ok(Arc::new(ReplayBackend::from_path(path)?))
            }
            DetectorKind::Tract => self.build_tract(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<Arc<dyn DetectorBackend>> {
        let model = self
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
        let mut backend = crate::detect::TractBackend::new(model, self.input_size)?;
        if let Some(labels) = &self.labels_path {
            backend = backend.with_labels_file(labels)?;
        }
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<Arc<dyn DetectorBackend>> {
        Err(anyhow!(
            "tract backend requested but this build lacks the backend-tract feature"
        ))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub video_path: Option<PathBuf>,
    pub frames_dir: PathBuf,
    pub output_dir: PathBuf,
    pub detector: DetectorSettings,
    pub tracker: TrackerConfig,
    pub locator: LocatorSettings,
}

impl PipelineConfig {
    /// Read the file named by `MINIMAP_CONFIG` (if any), apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MINIMAP_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as [`PipelineConfig::load`] with an explicit config file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let detector = file.detector.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let defaults = TrackerConfig::default();
        let backend = match detector.backend.as_deref() {
            Some(name) => name.parse()?,
            None => DetectorKind::Replay,
        };
        Ok(Self {
            video_path: file.video_path,
            frames_dir: file
                .frames_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMES_DIR)),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            detector: DetectorSettings {
                backend,
                replay_path: detector.replay_path,
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            tracker: TrackerConfig {
                sampling_rate: tracker.sampling_rate.unwrap_or(defaults.sampling_rate),
                stride: tracker.stride.unwrap_or(defaults.stride),
                confidence_threshold: tracker
                    .confidence_threshold
                    .unwrap_or(defaults.confidence_threshold),
                max_region_misses: tracker
                    .max_region_misses
                    .unwrap_or(defaults.max_region_misses),
                max_empty_predictions: tracker
                    .max_empty_predictions
                    .unwrap_or(defaults.max_empty_predictions),
                call_timeout: tracker
                    .call_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.call_timeout),
            },
            locator: file.locator.unwrap_or_default(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("MINIMAP_FRAMES_DIR") {
            if !dir.trim().is_empty() {
                self.frames_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("MINIMAP_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("MINIMAP_VIDEO_PATH") {
            if !path.trim().is_empty() {
                self.video_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(rate) = std::env::var("MINIMAP_SAMPLING_RATE") {
            self.tracker.sampling_rate = rate
                .parse()
                .map_err(|_| anyhow!("MINIMAP_SAMPLING_RATE must be a number of frames per second"))?;
        }
        if let Ok(stride) = std::env::var("MINIMAP_STRIDE") {
            self.tracker.stride = stride
                .parse()
                .map_err(|_| anyhow!("MINIMAP_STRIDE must be a positive integer"))?;
        }
        if let Ok(confidence) = std::env::var("MINIMAP_CONFIDENCE") {
            self.tracker.confidence_threshold = confidence
                .parse()
                .map_err(|_| anyhow!("MINIMAP_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(timeout) = std::env::var("MINIMAP_CALL_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("MINIMAP_CALL_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.tracker.call_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.locator.validate()?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
