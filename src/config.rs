use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geo::validate_coordinates;
use crate::severity::RecordabilityFilter;
use crate::store::LogMode;

const DEFAULT_SOURCE_URI: &str = "stub://road";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_IMAGE_DIR: &str = "pothole_coordinates";
const DEFAULT_LOG_PATH: &str = "pothole_data.json";
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyAMA0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_IP_URL: &str = crate::geo::DEFAULT_IP_GEOLOCATION_URL;
const DEFAULT_STATIC_LAT: f64 = 19.0760;
const DEFAULT_STATIC_LON: f64 = 72.8777;

#[derive(Debug, Deserialize, Default)]
struct TaggerConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    output: Option<OutputConfigFile>,
    filter: Option<FilterConfigFile>,
    geo: Option<GeoConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    replay_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    image_dir: Option<PathBuf>,
    log_path: Option<PathBuf>,
    log_mode: Option<LogMode>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterConfigFile {
    min_confidence: Option<f32>,
    max_area_ratio: Option<f64>,
    exclusion_band_y: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct GeoConfigFile {
    provider: Option<ProviderChoice>,
    device: Option<DeviceConfigFile>,
    serial: Option<SerialConfigFile>,
    http: Option<HttpConfigFile>,
    #[serde(rename = "static")]
    fixed: Option<StaticConfigFile>,
    cache: Option<CacheConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    command: Option<Vec<String>>,
    poll_interval_ms: Option<u64>,
    desired_accuracy_m: Option<f64>,
    relax_factor: Option<f64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
    max_lines: Option<usize>,
    timeout_ms: Option<u64>,
    fallback_to_http: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StaticConfigFile {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CacheConfigFile {
    refresh_interval_ms: Option<u64>,
    max_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderChoice {
    Device,
    Serial,
    Http,
    Static,
}

impl std::str::FromStr for ProviderChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "serial" => Ok(Self::Serial),
            "http" => Ok(Self::Http),
            "static" => Ok(Self::Static),
            other => Err(anyhow!(
                "unknown geo provider '{}'; expected device, serial, http or static",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaggerConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub output: OutputSettings,
    pub filter: RecordabilityFilter,
    pub geo: GeoSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://<name>` for synthetic frames, otherwise a directory of images.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Frame limit for synthetic sources.
    pub frames: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorSettings {
    pub replay_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub image_dir: PathBuf,
    pub log_path: PathBuf,
    pub log_mode: LogMode,
}

#[derive(Debug, Clone)]
pub struct GeoSettings {
    pub provider: ProviderChoice,
    pub device: DeviceSettings,
    pub serial: SerialSettings,
    pub http: HttpSettings,
    pub fixed: StaticSettings,
    pub cache: Option<CacheSettings>,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Helper program and arguments bridging to the platform location service.
    pub command: Vec<String>,
    pub poll_interval: Duration,
    pub desired_accuracy_m: f64,
    pub relax_factor: f64,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub max_lines: usize,
    pub timeout: Duration,
    pub fallback_to_http: bool,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub refresh_interval: Duration,
    pub max_age: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct DisplaySettings {
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frames: None,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_mode: LogMode::FullRewrite,
        }
    }
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Http,
            device: DeviceSettings::default(),
            serial: SerialSettings::default(),
            http: HttpSettings::default(),
            fixed: StaticSettings::default(),
            cache: None,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            poll_interval: Duration::from_millis(100),
            desired_accuracy_m: 3.0,
            relax_factor: 1.5,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(1),
            max_lines: 20,
            timeout: Duration::from_secs(2),
            fallback_to_http: true,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_IP_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_STATIC_LAT,
            longitude: DEFAULT_STATIC_LON,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(2),
            max_age: Duration::from_secs(30),
        }
    }
}

impl TaggerConfig {
    /// File named by `POTHOLE_CONFIG` (if any), then env overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POTHOLE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TaggerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TaggerConfigFile) -> Self {
        let mut cfg = Self::default();

        if let Some(source) = file.source {
            if let Some(uri) = source.uri {
                cfg.source.uri = uri;
            }
            cfg.source.width = source.width.unwrap_or(cfg.source.width);
            cfg.source.height = source.height.unwrap_or(cfg.source.height);
            cfg.source.frames = source.frames.or(cfg.source.frames);
        }
        if let Some(detector) = file.detector {
            cfg.detector.replay_path = detector.replay_path;
            cfg.detector.labels_path = detector.labels_path;
        }
        if let Some(output) = file.output {
            if let Some(dir) = output.image_dir {
                cfg.output.image_dir = dir;
            }
            if let Some(path) = output.log_path {
                cfg.output.log_path = path;
            }
            cfg.output.log_mode = output.log_mode.unwrap_or(cfg.output.log_mode);
        }
        if let Some(filter) = file.filter {
            cfg.filter.min_confidence = filter.min_confidence.unwrap_or(cfg.filter.min_confidence);
            cfg.filter.max_area_ratio = filter.max_area_ratio.unwrap_or(cfg.filter.max_area_ratio);
            cfg.filter.exclusion_band_y = filter
                .exclusion_band_y
                .unwrap_or(cfg.filter.exclusion_band_y);
        }
        if let Some(geo) = file.geo {
            cfg.geo.apply_file(geo);
        }
        if let Some(display) = file.display {
            cfg.display.snapshot_path = display.snapshot_path;
            cfg.display.snapshot_every = display.snapshot_every.unwrap_or(cfg.display.snapshot_every);
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(uri) = non_empty_env("POTHOLE_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(dir) = non_empty_env("POTHOLE_OUTPUT_DIR") {
            self.output.image_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty_env("POTHOLE_LOG_PATH") {
            self.output.log_path = PathBuf::from(path);
        }
        if let Some(provider) = non_empty_env("POTHOLE_GEO_PROVIDER") {
            self.geo.provider = provider.parse()?;
        }
        if let Some(port) = non_empty_env("POTHOLE_SERIAL_PORT") {
            self.geo.serial.port = port;
        }
        if let Some(url) = non_empty_env("POTHOLE_GEO_URL") {
            self.geo.http.url = url;
        }
        if let Some(conf) = non_empty_env("POTHOLE_MIN_CONFIDENCE") {
            self.filter.min_confidence = conf
                .parse()
                .map_err(|_| anyhow!("POTHOLE_MIN_CONFIDENCE must be a number in [0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.filter.min_confidence) {
            return Err(anyhow!("filter.min_confidence must be within [0, 1]"));
        }
        if !(self.filter.max_area_ratio > 0.0 && self.filter.max_area_ratio <= 1.0) {
            return Err(anyhow!("filter.max_area_ratio must be within (0, 1]"));
        }
        if self.filter.exclusion_band_y <= 0.0 {
            return Err(anyhow!("filter.exclusion_band_y must be positive"));
        }
        self.geo.validate()
    }
}

impl GeoSettings {
    fn apply_file(&mut self, file: GeoConfigFile) {
        self.provider = file.provider.unwrap_or(self.provider);
        if let Some(device) = file.device {
            if let Some(command) = device.command {
                self.device.command = command;
            }
            if let Some(ms) = device.poll_interval_ms {
                self.device.poll_interval = Duration::from_millis(ms);
            }
            self.device.desired_accuracy_m = device
                .desired_accuracy_m
                .unwrap_or(self.device.desired_accuracy_m);
            self.device.relax_factor = device.relax_factor.unwrap_or(self.device.relax_factor);
            if let Some(ms) = device.timeout_ms {
                self.device.timeout = Duration::from_millis(ms);
            }
        }
        if let Some(serial) = file.serial {
            if let Some(port) = serial.port {
                self.serial.port = port;
            }
            self.serial.baud_rate = serial.baud_rate.unwrap_or(self.serial.baud_rate);
            if let Some(ms) = serial.read_timeout_ms {
                self.serial.read_timeout = Duration::from_millis(ms);
            }
            self.serial.max_lines = serial.max_lines.unwrap_or(self.serial.max_lines);
            if let Some(ms) = serial.timeout_ms {
                self.serial.timeout = Duration::from_millis(ms);
            }
            self.serial.fallback_to_http = serial
                .fallback_to_http
                .unwrap_or(self.serial.fallback_to_http);
        }
        if let Some(http) = file.http {
            if let Some(url) = http.url {
                self.http.url = url;
            }
            if let Some(ms) = http.timeout_ms {
                self.http.timeout = Duration::from_millis(ms);
            }
        }
        if let Some(fixed) = file.fixed {
            self.fixed.latitude = fixed.latitude.unwrap_or(self.fixed.latitude);
            self.fixed.longitude = fixed.longitude.unwrap_or(self.fixed.longitude);
        }
        if let Some(cache) = file.cache {
            let defaults = CacheSettings::default();
            self.cache = Some(CacheSettings {
                refresh_interval: cache
                    .refresh_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.refresh_interval),
                max_age: cache
                    .max_age_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_age),
            });
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device.relax_factor <= 1.0 {
            return Err(anyhow!("geo.device.relax_factor must be greater than 1"));
        }
        if self.device.desired_accuracy_m <= 0.0 {
            return Err(anyhow!("geo.device.desired_accuracy_m must be positive"));
        }
        if self.device.timeout.is_zero() {
            return Err(anyhow!("geo.device.timeout_ms must be greater than zero"));
        }
        if self.serial.max_lines == 0 {
            return Err(anyhow!("geo.serial.max_lines must be greater than zero"));
        }
        if self.http.timeout.is_zero() {
            return Err(anyhow!("geo.http.timeout_ms must be greater than zero"));
        }
        validate_coordinates(self.fixed.latitude, self.fixed.longitude)
            .map_err(|e| anyhow!("geo.static: {}", e))?;
        if let Some(cache) = &self.cache {
            if cache.refresh_interval.is_zero() {
                return Err(anyhow!("geo.cache.refresh_interval_ms must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TaggerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
