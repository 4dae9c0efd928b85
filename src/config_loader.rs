use config::{Config, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Used when the voice sidecar is missing or unusable.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_host: String,
    pub port: u16,
    pub allow_origin: String,
    pub piper_bin: String,
    pub piper_model: String,
    pub synth_timeout_secs: u64,
    pub max_concurrent_synth: usize, // 0 = unlimited
}

fn default_model_path() -> String {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("piper-voices/zh_CN/zh_CN-huayan-medium.onnx")
        .to_string_lossy()
        .into_owned()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            port: 8089,
            allow_origin: "http://localhost:5173".to_string(),
            piper_bin: "piper-tts".to_string(),
            piper_model: default_model_path(),
            synth_timeout_secs: 30,
            max_concurrent_synth: 0,
        }
    }
}

impl Settings {
    /// Layers defaults, optional `Bridge.*` files and the environment.
    ///
    /// Environment keys are unprefixed (`PORT`, `PIPER_MODEL`, ...) so an
    /// existing `.env` for the bridge keeps working.
    pub fn load(extra_file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("bind_host", defaults.bind_host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("allow_origin", defaults.allow_origin)?
            .set_default("piper_bin", defaults.piper_bin)?
            .set_default("piper_model", defaults.piper_model)?
            .set_default("synth_timeout_secs", defaults.synth_timeout_secs as i64)?
            .set_default("max_concurrent_synth", defaults.max_concurrent_synth as i64)?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Bridge").required(false));

        if let Some(path) = user_config_file() {
            builder = builder.add_source(File::with_name(&path.to_string_lossy()).required(false));
        }
        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but any failure falls back to the defaults.
    pub fn load_or_default(extra_file: Option<&Path>) -> Self {
        Self::load(extra_file).unwrap_or_else(|e| {
            warn!(error = %e, "Could not load settings, using defaults");
            Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.port == 0 {
            return Err(config::ConfigError::Message(
                "port must be greater than 0".to_string(),
            ));
        }
        if self.synth_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "synth_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.piper_bin.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "piper_bin must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `~/.config/piper-bridge/Bridge` (any supported extension), when the
/// platform has a config directory.
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("piper-bridge").join("Bridge"))
}

/// Everything a request needs, fixed at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub piper_bin: String,
    pub model_path: PathBuf,
    pub sample_rate: u32,
    pub allow_origin: String,
    pub host: String,
    pub port: u16,
    pub synth_timeout: Duration,
    pub max_concurrent_synth: usize,
}

impl BridgeConfig {
    /// Loads settings and probes the voice sidecar. Never fails.
    pub fn resolve(extra_file: Option<&Path>) -> Self {
        Self::from_settings(Settings::load_or_default(extra_file))
    }

    pub fn from_settings(settings: Settings) -> Self {
        let model_path = PathBuf::from(settings.piper_model);
        let sample_rate = detect_sample_rate(&model_path);
        Self {
            piper_bin: settings.piper_bin,
            model_path,
            sample_rate,
            allow_origin: settings.allow_origin,
            host: settings.bind_host,
            port: settings.port,
            synth_timeout: Duration::from_secs(settings.synth_timeout_secs),
            max_concurrent_synth: settings.max_concurrent_synth,
        }
    }

    pub fn model_exists(&self) -> bool {
        self.model_path.exists()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `<model>.onnx` -> `<model>.onnx.json`
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    let mut path = model_path.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Reads the sample rate from the model's JSON sidecar, or returns
/// [`DEFAULT_SAMPLE_RATE`].
pub fn detect_sample_rate(model_path: &Path) -> u32 {
    let sidecar = sidecar_path(model_path);
    match read_sample_rate(&sidecar) {
        Some(rate) => rate,
        None => {
            debug!(
                path = %sidecar.display(),
                rate = DEFAULT_SAMPLE_RATE,
                "No usable sample rate in voice metadata, using default"
            );
            DEFAULT_SAMPLE_RATE
        }
    }
}

fn read_sample_rate(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;

    // Flat `sample_rate` first; real Piper voices nest it under `audio`.
    let value = json
        .get("sample_rate")
        .or_else(|| json.get("audio").and_then(|a| a.get("sample_rate")))?;

    let rate = value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))?;

    u32::try_from(rate).ok().filter(|r| *r > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_KEYS: [&str; 7] = [
        "BIND_HOST",
        "PORT",
        "ALLOW_ORIGIN",
        "PIPER_BIN",
        "PIPER_MODEL",
        "SYNTH_TIMEOUT_SECS",
        "MAX_CONCURRENT_SYNTH",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn model_with_sidecar(dir: &TempDir, sidecar: &str) -> PathBuf {
        let model = dir.path().join("voice.onnx");
        std::fs::write(sidecar_path(&model), sidecar).unwrap();
        model
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/v/zh_CN-huayan-medium.onnx")),
            PathBuf::from("/v/zh_CN-huayan-medium.onnx.json")
        );
    }

    #[test]
    fn test_user_config_file() {
        if let Some(path) = user_config_file() {
            assert!(path.is_absolute());
            assert!(path.ends_with("piper-bridge/Bridge"));
        }
    }

    #[test]
    fn test_flat_sample_rate() {
        let dir = TempDir::new().unwrap();
        let model = model_with_sidecar(&dir, r#"{"sample_rate": 16000}"#);
        assert_eq!(detect_sample_rate(&model), 16000);
    }

    #[test]
    fn test_nested_piper_sample_rate() {
        let dir = TempDir::new().unwrap();
        let model = model_with_sidecar(&dir, r#"{"audio": {"sample_rate": 24000, "quality": "medium"}}"#);
        assert_eq!(detect_sample_rate(&model), 24000);
    }

    #[test]
    fn test_string_sample_rate() {
        let dir = TempDir::new().unwrap();
        let model = model_with_sidecar(&dir, r#"{"sample_rate": "44100"}"#);
        assert_eq!(detect_sample_rate(&model), 44100);
    }

    #[test]
    fn test_fallbacks() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_sample_rate(&dir.path().join("missing.onnx")), DEFAULT_SAMPLE_RATE);

        for bad in ["not json", "{}", r#"{"sample_rate": "fast"}"#, r#"{"sample_rate": 0}"#, r#"{"sample_rate": -5}"#, "[1,2]"] {
            let model = model_with_sidecar(&dir, bad);
            assert_eq!(detect_sample_rate(&model), DEFAULT_SAMPLE_RATE, "sidecar: {}", bad);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::load(None).expect("Failed to load settings");
        assert_eq!(settings.port, 8089);
        assert_eq!(settings.allow_origin, "http://localhost:5173");
        assert_eq!(settings.piper_bin, "piper-tts");
        assert!(settings.piper_model.ends_with("zh_CN-huayan-medium.onnx"));
        assert_eq!(settings.synth_timeout_secs, 30);
        assert_eq!(settings.max_concurrent_synth, 0);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear_env();
        std::env::set_var("PORT", "9000");
        std::env::set_var("ALLOW_ORIGIN", "https://example.org");
        std::env::set_var("PIPER_BIN", "/opt/piper/piper");

        let settings = Settings::load(None).expect("Failed to load settings");
        clear_env();

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.allow_origin, "https://example.org");
        assert_eq!(settings.piper_bin, "/opt/piper/piper");
    }

    #[test]
    #[serial]
    fn test_extra_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("bridge.toml");
        std::fs::write(&file, "port = 7000\nsynth_timeout_secs = 5\n").unwrap();

        let settings = Settings::load(Some(&file)).expect("Failed to load settings");
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.synth_timeout_secs, 5);
    }

    #[test]
    #[serial]
    fn test_invalid_settings_fall_back() {
        clear_env();
        std::env::set_var("SYNTH_TIMEOUT_SECS", "0");
        assert!(Settings::load(None).is_err());

        let settings = Settings::load_or_default(None);
        clear_env();
        assert_eq!(settings.synth_timeout_secs, 30);
    }

    #[test]
    fn test_resolve_reads_sidecar() {
        let dir = TempDir::new().unwrap();
        let model = model_with_sidecar(&dir, r#"{"sample_rate": 16000}"#);
        let settings = Settings {
            piper_model: model.to_string_lossy().into_owned(),
            ..Settings::default()
        };

        let config = BridgeConfig::from_settings(settings);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.synth_timeout, Duration::from_secs(30));
        assert!(!config.model_exists());
        assert_eq!(config.bind_addr(), "127.0.0.1:8089");
    }
}
