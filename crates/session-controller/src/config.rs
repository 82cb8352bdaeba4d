//! Session controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults. Settings that belong to a single meeting (title, capacity,
//! locks) come from the directory service instead; this struct only carries
//! process-level tuning knobs.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Default disconnect grace period in seconds.
pub const DEFAULT_DISCONNECT_GRACE_SECONDS: u64 = 30;

/// Default delay before announcing presenter absence, in seconds.
pub const DEFAULT_PRESENTER_PROBE_SECONDS: u64 = 3;

/// Default no-presenter watchdog timeout in seconds.
pub const DEFAULT_PRESENTER_WATCHDOG_SECONDS: u64 = 300;

/// Default bounded attempt count for room content exports.
pub const DEFAULT_EXPORT_ATTEMPTS: u32 = 3;

/// Default backoff between export attempts, in seconds.
pub const DEFAULT_EXPORT_BACKOFF_SECONDS: u64 = 2;

/// Default session actor mailbox buffer size.
pub const DEFAULT_MAILBOX_BUFFER: usize = 500;

/// Session controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long a disconnected attendee is retained before finalization.
    pub disconnect_grace: Duration,
    /// Confirmation delay before `hasAnyPresenter=false` is announced.
    pub presenter_probe_delay: Duration,
    /// How long the session tolerates presenter absence before
    /// force-disconnecting every client.
    pub presenter_watchdog: Duration,
    /// Bounded attempt count for room content exports.
    pub export_attempts: u32,
    /// Backoff between export attempts.
    pub export_backoff: Duration,
    /// Session actor mailbox buffer size.
    pub mailbox_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(DEFAULT_DISCONNECT_GRACE_SECONDS),
            presenter_probe_delay: Duration::from_secs(DEFAULT_PRESENTER_PROBE_SECONDS),
            presenter_watchdog: Duration::from_secs(DEFAULT_PRESENTER_WATCHDOG_SECONDS),
            export_attempts: DEFAULT_EXPORT_ATTEMPTS,
            export_backoff: Duration::from_secs(DEFAULT_EXPORT_BACKOFF_SECONDS),
            mailbox_buffer: DEFAULT_MAILBOX_BUFFER,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// Unparseable values fall back to their defaults; a misconfigured
    /// tuning knob must not keep a session from starting.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let secs = |key: &str, default: u64| -> u64 {
            vars.get(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let disconnect_grace = Duration::from_secs(secs(
            "SC_DISCONNECT_GRACE_SECONDS",
            DEFAULT_DISCONNECT_GRACE_SECONDS,
        ));
        let presenter_probe_delay = Duration::from_secs(secs(
            "SC_PRESENTER_PROBE_SECONDS",
            DEFAULT_PRESENTER_PROBE_SECONDS,
        ));
        let presenter_watchdog = Duration::from_secs(secs(
            "SC_PRESENTER_WATCHDOG_SECONDS",
            DEFAULT_PRESENTER_WATCHDOG_SECONDS,
        ));
        let export_backoff = Duration::from_secs(secs(
            "SC_EXPORT_BACKOFF_SECONDS",
            DEFAULT_EXPORT_BACKOFF_SECONDS,
        ));

        let export_attempts = vars
            .get("SC_EXPORT_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EXPORT_ATTEMPTS)
            .max(1);

        let mailbox_buffer = vars
            .get("SC_MAILBOX_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAILBOX_BUFFER)
            .max(1);

        Self {
            disconnect_grace,
            presenter_probe_delay,
            presenter_watchdog,
            export_attempts,
            export_backoff,
            mailbox_buffer,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new());
        assert_eq!(
            config.disconnect_grace,
            Duration::from_secs(DEFAULT_DISCONNECT_GRACE_SECONDS)
        );
        assert_eq!(
            config.presenter_watchdog,
            Duration::from_secs(DEFAULT_PRESENTER_WATCHDOG_SECONDS)
        );
        assert_eq!(config.export_attempts, DEFAULT_EXPORT_ATTEMPTS);
        assert_eq!(config.mailbox_buffer, DEFAULT_MAILBOX_BUFFER);
    }

    #[test]
    fn test_custom_values() {
        let vars = HashMap::from([
            ("SC_DISCONNECT_GRACE_SECONDS".to_string(), "45".to_string()),
            ("SC_PRESENTER_PROBE_SECONDS".to_string(), "1".to_string()),
            ("SC_PRESENTER_WATCHDOG_SECONDS".to_string(), "60".to_string()),
            ("SC_EXPORT_ATTEMPTS".to_string(), "5".to_string()),
            ("SC_MAILBOX_BUFFER".to_string(), "64".to_string()),
        ]);

        let config = Config::from_vars(&vars);
        assert_eq!(config.disconnect_grace, Duration::from_secs(45));
        assert_eq!(config.presenter_probe_delay, Duration::from_secs(1));
        assert_eq!(config.presenter_watchdog, Duration::from_secs(60));
        assert_eq!(config.export_attempts, 5);
        assert_eq!(config.mailbox_buffer, 64);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let vars = HashMap::from([
            (
                "SC_DISCONNECT_GRACE_SECONDS".to_string(),
                "soon-ish".to_string(),
            ),
            ("SC_EXPORT_ATTEMPTS".to_string(), "0".to_string()),
        ]);

        let config = Config::from_vars(&vars);
        assert_eq!(
            config.disconnect_grace,
            Duration::from_secs(DEFAULT_DISCONNECT_GRACE_SECONDS)
        );
        // attempt count is clamped to at least one
        assert_eq!(config.export_attempts, 1);
    }
}
