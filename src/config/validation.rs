use crate::config::schema::{BrowserSettings, ChatSettings};
use crate::error::{E2eError, Result};
use std::path::Path;

/// Validate Chrome executable path
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(E2eError::Validation(format!(
            "Chrome executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(E2eError::Validation(format!(
            "Chrome path {:?} is not a file",
            path
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path.metadata().map_err(|e| {
            E2eError::Validation(format!("Cannot read Chrome file metadata: {}", e))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(E2eError::Validation(format!(
                "Chrome executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

/// Validate browser launch settings
pub fn validate_browser_settings(settings: &BrowserSettings) -> Result<()> {
    if let Some(proxy) = &settings.proxy_server {
        if !proxy.starts_with("http://")
            && !proxy.starts_with("https://")
            && !proxy.starts_with("socks4://")
            && !proxy.starts_with("socks5://")
        {
            return Err(E2eError::Validation(format!(
                "Invalid proxy server format: {}. Must start with http://, https://, socks4://, or socks5://",
                proxy
            )));
        }
    }

    if settings.lang.is_empty() {
        return Err(E2eError::Validation(
            "Language code cannot be empty".to_string(),
        ));
    }

    if settings.command_timeout_ms == 0 {
        return Err(E2eError::Validation(
            "Command timeout must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validate chat helper settings
pub fn validate_chat_settings(settings: &ChatSettings) -> Result<()> {
    if settings.input_selectors.is_empty() {
        return Err(E2eError::Validation(
            "At least one input selector is required".to_string(),
        ));
    }

    if settings.input_selectors.iter().any(|s| s.trim().is_empty()) {
        return Err(E2eError::Validation(
            "Input selectors cannot be blank".to_string(),
        ));
    }

    if settings.history_marker.is_empty() || settings.preload_marker.is_empty() {
        return Err(E2eError::Validation(
            "Container markers cannot be empty".to_string(),
        ));
    }

    Ok(())
}
