use std::{path::PathBuf, time::Duration};

use parley_core::MAX_NAME_LEN;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(12);
/// How long the disconnect spinner stays up after the socket closes.
pub const DEFAULT_LOADING_CLEAR_DELAY: Duration = Duration::from_secs(3);

const MAX_SERVER_URL_LEN: usize = 2048;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// Where received media is written. `None` keeps media in the feed only.
    pub media_dir: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub loading_clear_delay: Duration,
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Result<Self, String> {
        validate_server_url(server_url)?;
        Ok(Self {
            server_url: server_url.trim().to_owned(),
            media_dir: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            loading_clear_delay: DEFAULT_LOADING_CLEAR_DELAY,
        })
    }

    #[must_use]
    pub fn with_media_dir(mut self, dir: PathBuf) -> Self {
        self.media_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_loading_clear_delay(mut self, delay: Duration) -> Self {
        self.loading_clear_delay = delay;
        self
    }
}

pub fn validate_server_url(server_url: &str) -> Result<(), String> {
    let server_url = server_url.trim();
    if server_url.is_empty() {
        return Err("Server URL is required.".to_string());
    }
    if server_url.len() > MAX_SERVER_URL_LEN {
        return Err(format!(
            "Server URL is too long ({} > {} chars).",
            server_url.len(),
            MAX_SERVER_URL_LEN
        ));
    }

    let url = Url::parse(server_url).map_err(|err| format!("Server URL is invalid: {err}"))?;
    let scheme = url.scheme();
    if scheme != "ws" && scheme != "wss" {
        return Err("Server URL must start with ws:// or wss:// (WebSocket).".to_string());
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Display name must not be blank.".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "Display name is too long ({} > {} chars).",
            name.chars().count(),
            MAX_NAME_LEN
        ));
    }
    Ok(())
}

/// Client state directory; `PARLEY_DATA_DIR` overrides the platform default.
pub fn parley_data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PARLEY_DATA_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = std::env::var_os("XDG_STATE_HOME")
        .or_else(|| std::env::var_os("LOCALAPPDATA"))
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("parley")
}

pub fn default_log_path() -> PathBuf {
    parley_data_dir().join("parley-client.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_websocket_urls() {
        assert!(ClientConfig::new("ws://127.0.0.1:8080/ws").is_ok());
        assert!(ClientConfig::new(" wss://chat.example.com/production/ ").is_ok());
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let err = ClientConfig::new("https://chat.example.com").unwrap_err();
        assert!(err.contains("ws://"), "unexpected error: {err}");

        assert!(ClientConfig::new("").is_err());
        assert!(ClientConfig::new("not a url").is_err());

        let long = format!("ws://example.com/{}", "a".repeat(MAX_SERVER_URL_LEN));
        assert!(ClientConfig::new(&long).unwrap_err().contains("too long"));
    }

    #[test]
    fn trims_stored_server_url() {
        let config = ClientConfig::new("  ws://localhost:9000/ws ").unwrap();
        assert_eq!(config.server_url, "ws://localhost:9000/ws");
        assert_eq!(config.loading_clear_delay, DEFAULT_LOADING_CLEAR_DELAY);
    }

    #[test]
    fn display_name_rules() {
        assert!(validate_display_name("alice").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
