//! Engine configuration.
//!
//! Settings come from an optional `lantern.toml`. Every field has a default, so
//! a partial file (or none at all) is valid.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [render]
//! frames_in_flight = 2
//! wait_timeout_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logging::DEFAULT_LOG_FILTER;

/// File name looked up in the working directory by [`EngineConfig::load_or_default`].
pub const CONFIG_FILE_NAME: &str = "lantern.toml";

/// Upper bound on the frame ring size.
const MAX_FRAMES_IN_FLIGHT: u32 = 3;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub assets: AssetConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 900,
            title: "Lantern".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Size of the frame ring.
    pub frames_in_flight: u32,
    /// Bound applied to every blocking GPU wait.
    pub wait_timeout_ms: u64,
    /// Capacity of render targets and the GBuffer. The drawn area is resized
    /// inside this without reallocating.
    pub max_extent: [u32; 2],
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            wait_timeout_ms: 1000,
            max_extent: [3840, 2160],
            validation: cfg!(debug_assertions),
        }
    }
}

impl RenderConfig {
    /// Wait timeout as a [`Duration`].
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding the compiled SPIR-V stages.
    pub shader_dir: PathBuf,
    /// glTF file to display. A built-in cube is used when unset.
    pub model: Option<PathBuf>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders/spirv"),
            model: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directives. `RUST_LOG` overrides this.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Loads [`CONFIG_FILE_NAME`] from the working directory when it exists.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_or_default() -> Result<Self> {
        let path = Path::new(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Rejects values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        let render = &self.render;
        if render.frames_in_flight == 0 || render.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "render.frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, render.frames_in_flight
            )));
        }
        if render.wait_timeout_ms == 0 {
            return Err(Error::Config(
                "render.wait_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if render.max_extent.contains(&0) {
            return Err(Error::Config(format!(
                "render.max_extent must be non-zero, got {:?}",
                render.max_extent
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.frames_in_flight, 2);
        assert_eq!(config.render.wait_timeout(), Duration::from_secs(1));
        assert_eq!(config.assets.shader_dir, PathBuf::from("shaders/spirv"));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            width = 1280

            [assets]
            model = "assets/helmet.glb"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.window.title, "Lantern");
        assert_eq!(
            config.assets.model.as_deref(),
            Some(Path::new("assets/helmet.glb"))
        );
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn test_rejects_bad_ring_size() {
        let err = EngineConfig::from_toml_str("[render]\nframes_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = EngineConfig::from_toml_str("[render]\nframes_in_flight = 4\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeout_and_extent() {
        assert!(EngineConfig::from_toml_str("[render]\nwait_timeout_ms = 0\n").is_err());
        assert!(EngineConfig::from_toml_str("[render]\nmax_extent = [0, 1080]\n").is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[render\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_serialized_config_parses_back() {
        let mut config = EngineConfig::default();
        config.render.frames_in_flight = 3;
        config.log.filter = "warn".to_string();

        let text = config.to_toml_string().unwrap();
        let parsed = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
