//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `PEERCHAT_ENV` environment variable.
//!
//! Set `PEERCHAT_ENV` to one of:
//! - `test` - Test mode (config lives in a temp directory, never the user's)
//! - `development` or `dev` - Development mode (verbose default log filter)
//! - (anything else or unset) - Production mode

/// Runtime environment for peerchat.
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
    /// Detect current environment from `PEERCHAT_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("PEERCHAT_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
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

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Default `env_logger` filter for this environment.
    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Development | Self::Test => "debug",
            Self::Production => "warn",
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

/// Convenience check for `PEERCHAT_ENV=test`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
