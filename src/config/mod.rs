// Configuration management module
// TOML settings for the embedding service, segmentation, search and index retention

pub mod settings;


pub use settings::{
    Config, ConfigError, EmbeddingConfig, EmbeddingProvider, IndexConfig, SearchConfig,
    SegmenterConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Render the effective configuration as TOML for display
#[inline]
pub fn render_config(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
