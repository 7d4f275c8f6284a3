//! # Handler Configuration
//!
//! Environment-derived knobs for the rotation handler. Everything has a
//! sensible default; the environment only overrides.
//!
//! Supported variables:
//!
//! - `EXCLUDE_CHARACTERS`, `PASSWORD_LENGTH`, `EXCLUDE_NUMBERS`,
//!   `EXCLUDE_PUNCTUATION`, `EXCLUDE_UPPERCASE`, `EXCLUDE_LOWERCASE`,
//!   `REQUIRE_EACH_INCLUDED_TYPE` - password generation policy
//! - `TEST_CONNECTION_ATTEMPTS` - bounded reconnect attempts during
//!   `testSecret`

use std::env;

use crate::store::PasswordPolicy;

const DEFAULT_TEST_CONNECTION_ATTEMPTS: u32 = 2;

/// Runtime configuration for the rotation coordinator.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub password_policy: PasswordPolicy,
    /// How many times `testSecret` may attempt to connect before failing
    /// the step. Kept small: each step runs under an external wall-clock
    /// limit.
    pub test_connection_attempts: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            password_policy: PasswordPolicy::default(),
            test_connection_attempts: DEFAULT_TEST_CONNECTION_ATTEMPTS,
        }
    }
}

impl HandlerConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = PasswordPolicy::default();
        let password_policy = PasswordPolicy {
            length: env_parse("PASSWORD_LENGTH", defaults.length),
            exclude_characters: env::var("EXCLUDE_CHARACTERS")
                .unwrap_or(defaults.exclude_characters),
            exclude_numbers: env_bool("EXCLUDE_NUMBERS", defaults.exclude_numbers),
            exclude_punctuation: env_bool("EXCLUDE_PUNCTUATION", defaults.exclude_punctuation),
            exclude_uppercase: env_bool("EXCLUDE_UPPERCASE", defaults.exclude_uppercase),
            exclude_lowercase: env_bool("EXCLUDE_LOWERCASE", defaults.exclude_lowercase),
            require_each_included_type: env_bool(
                "REQUIRE_EACH_INCLUDED_TYPE",
                defaults.require_each_included_type,
            ),
        };

        Self {
            password_policy,
            test_connection_attempts: env_parse(
                "TEST_CONNECTION_ATTEMPTS",
                DEFAULT_TEST_CONNECTION_ATTEMPTS,
            )
            .max(1),
        }
    }
}

/// True when the value reads as true/1/y/yes, ignoring case.
fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "y" | "yes")
}

fn env_bool(name: &str, default_value: bool) -> bool {
    env::var(name).map_or(default_value, |value| parse_bool(&value))
}

fn env_parse<T: std::str::FromStr>(name: &str, default_value: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default_value)
}
