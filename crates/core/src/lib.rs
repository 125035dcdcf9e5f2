//! Core utilities shared by every Lantern crate.
//!
//! - Error types and result aliases
//! - An explicitly owned logging context
//! - Frame timing
//! - Engine configuration loaded from TOML

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    AssetConfig, CONFIG_FILE_NAME, EngineConfig, LogConfig, RenderConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, LoggingContext};
pub use timer::Timer;
