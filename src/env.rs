//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `SENSORLINK_ENV` environment
//! variable.
//!
//! # Usage
//!
//! ```rust
//! use sensorlink::env::Environment;
//!
//! if Environment::current().is_test() {
//!     // Keep config and logs out of the user's home directory
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `SENSORLINK_ENV` to one of:
//! - `test` - Test mode (config under the system temp dir)
//! - `development` or `dev` - Development mode (verbose logging)
//! - (anything else or unset) - Production mode

/// Runtime environment for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `SENSORLINK_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("SENSORLINK_ENV").ok().as_deref())
    }

    /// Map a `SENSORLINK_ENV` value onto an environment.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Relay URL used when neither config nor environment names one.
    ///
    /// Production assumes the relay runs on this machine; development and
    /// test use the dev server address.
    #[must_use]
    pub fn default_server_url(self) -> &'static str {
        match self {
            Self::Production => "ws://127.0.0.1:8000",
            Self::Development | Self::Test => crate::constants::DEFAULT_SERVER_URL,
        }
    }

    /// Log filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Test => "info",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function to check if running in test mode.
///
/// Equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("dev")), Environment::Development);
        assert_eq!(Environment::parse(Some("development")), Environment::Development);
        assert_eq!(Environment::parse(Some("staging")), Environment::Production);
        assert_eq!(Environment::parse(None), Environment::Production);
    }

    #[test]
    fn test_environment_is_methods() {
        assert!(Environment::Test.is_test());
        assert!(!Environment::Test.is_production());
        assert!(Environment::Production.is_production());
        assert!(Environment::Development.is_development());
        assert!(!Environment::Development.is_test());
    }

    #[test]
    fn test_development_uses_dev_server() {
        assert_eq!(
            Environment::Development.default_server_url(),
            "ws://localhost:8000"
        );
        assert_eq!(Environment::Development.default_log_filter(), "debug");
    }
}
