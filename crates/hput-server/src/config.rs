//! Server configuration.

use crate::resource_limits::ResourceLimits;

/// Base URL written into exports when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost";

/// How the HTTP server treats callers and uploads.
///
/// # Example
///
/// ```
/// use hput_server::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_nonlocal(true)
///     .with_base_url("http://example.com:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Accept requests from non-loopback peers
    pub allow_nonlocal: bool,
    /// Treat `PUT` like any other read; nothing can be stored
    pub locked: bool,
    /// Scheme and authority used in replay scripts
    pub base_url: String,
    pub limits: ResourceLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_nonlocal: false,
            locked: false,
            base_url: DEFAULT_BASE_URL.to_string(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nonlocal(mut self, allow: bool) -> Self {
        self.allow_nonlocal = allow;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an absolute http(s) URL or
    /// the resource limits are invalid.
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid base url '{}': {e}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("base url must be http or https (got {})", url.scheme()));
        }
        self.limits.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert!(!config.allow_nonlocal);
        assert!(!config.locked);
        assert_eq!(config.base_url, "http://localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_nonlocal(true)
            .with_locked(true)
            .with_base_url("https://hput.example")
            .with_limits(ResourceLimits::new().with_execution_timeout(Duration::from_secs(2)));
        assert!(config.allow_nonlocal);
        assert!(config.locked);
        assert_eq!(config.limits.execution_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ServerConfig::new().with_base_url("not a url").validate().is_err());
        assert!(ServerConfig::new().with_base_url("ftp://host").validate().is_err());
    }

    #[test]
    fn test_invalid_limits() {
        let config = ServerConfig::new()
            .with_limits(ResourceLimits::new().with_execution_timeout(Duration::ZERO));
        assert!(config.validate().is_err());
    }
}
