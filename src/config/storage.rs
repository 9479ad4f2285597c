use crate::config::schema::HarnessConfig;
use crate::config::validation::{validate_browser_settings, validate_chat_settings};
use crate::error::{E2eError, Result};
use std::fs;
use std::path::PathBuf;

/// Get the configuration file path. `H5_E2E_CONFIG` wins over the platform config dir.
pub fn get_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("H5_E2E_CONFIG") {
        return PathBuf::from(p);
    }

    dirs::config_dir()
        .map(|p| p.join("h5-agent-e2e"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}

/// Load and validate configuration from file; a missing file yields the defaults.
pub fn load_config() -> Result<HarnessConfig> {
    let config_path = get_config_path();

    if !config_path.exists() {
        tracing::info!(
            "Config file not found at {:?}, using defaults",
            config_path
        );
        return Ok(HarnessConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        E2eError::Config(format!(
            "Failed to read config from {:?}: {}",
            config_path, e
        ))
    })?;

    let config: HarnessConfig = toml::from_str(&content)?;
    validate_browser_settings(&config.browser)?;
    validate_chat_settings(&config.chat)?;

    tracing::info!("Loaded config from {:?}", config_path);
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &HarnessConfig) -> Result<()> {
    let config_path = get_config_path();

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            E2eError::Config(format!(
                "Failed to create config directory {:?}: {}",
                parent, e
            ))
        })?;
    }

    let content = toml::to_string_pretty(config)?;

    fs::write(&config_path, content).map_err(|e| {
        E2eError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::info!("Saved config to {:?}", config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let path = get_config_path();
        assert!(path.to_string_lossy().ends_with(".toml"));
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert!(config.chrome_path.is_none());
        assert!(config.browser.headless);
        assert_eq!(config.browser.command_timeout_ms, 30_000);
        assert_eq!(config.chat.input_selectors.len(), 5);
        assert_eq!(config.chat.wait_after_send_ms, 500);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            chrome_path = "/opt/chrome/chrome"

            [browser]
            headless = false
            "#,
        )
        .unwrap();
        assert_eq!(config.chrome_path, Some(PathBuf::from("/opt/chrome/chrome")));
        assert!(!config.browser.headless);
        assert_eq!(config.browser.lang, "zh-CN");
        assert_eq!(config.chat.history_marker, "historyWrapper");
    }
}
