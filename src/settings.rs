//! Runtime configuration for valkeyctl.
//!
//! Settings are resolved exactly once at startup: defaults, then environment
//! variables, then CLI flags. The resulting value is immutable and threaded
//! by reference into the connection pool and command entrypoints; there is no
//! process-wide mutable state.

use std::env;
use std::time::Duration;

use crate::error::AdminError;

/// Environment variable names recognized by valkeyctl. All optional.
pub const ENV_USER: &str = "VALKEYCTL_USER";
pub const ENV_PASSWORD: &str = "VALKEYCTL_PASSWORD";
pub const ENV_CONNECT_TIMEOUT: &str = "VALKEYCTL_CONNECT_TIMEOUT";
pub const ENV_COMMAND_TIMEOUT: &str = "VALKEYCTL_COMMAND_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "VALKEYCTL_MAX_RETRIES";
pub const ENV_POOL_SIZE: &str = "VALKEYCTL_POOL_SIZE";
pub const ENV_DEBUG: &str = "VALKEYCTL_DEBUG";

/// Resolved configuration shared by every command.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Username for ACL authentication. Optional.
    pub username: Option<String>,
    /// Password. Required by every command that touches the cluster.
    pub password: Option<String>,
    /// TCP connect timeout for new clients.
    pub connect_timeout: Duration,
    /// Default per-command timeout.
    pub command_timeout: Duration,
    /// Retry budget for retryable data-path errors.
    pub max_retries: u32,
    /// Connection pool size for the bulk loader's clustered client.
    pub pool_size: usize,
    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
            max_retries: 3,
            pool_size: 10,
            debug: false,
        }
    }
}

/// Inline authentication form for the server-side MIGRATE command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrateAuth {
    /// No credentials configured.
    None,
    /// `AUTH password`
    Password(String),
    /// `AUTH2 username password`
    UserPassword(String, String),
}

impl Settings {
    /// Build settings from the environment. Unparseable values fall back to
    /// defaults rather than failing startup.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(user) = env::var(ENV_USER) {
            if !user.is_empty() {
                settings.username = Some(user);
            }
        }
        if let Ok(password) = env::var(ENV_PASSWORD) {
            if !password.is_empty() {
                settings.password = Some(password);
            }
        }
        if let Some(timeout) = parse_env_duration(ENV_CONNECT_TIMEOUT) {
            settings.connect_timeout = timeout;
        }
        if let Some(timeout) = parse_env_duration(ENV_COMMAND_TIMEOUT) {
            settings.command_timeout = timeout;
        }
        if let Ok(retries) = env::var(ENV_MAX_RETRIES) {
            if let Ok(value) = retries.trim().parse::<u32>() {
                if value > 0 {
                    settings.max_retries = value;
                }
            }
        }
        if let Ok(pool) = env::var(ENV_POOL_SIZE) {
            if let Ok(value) = pool.trim().parse::<usize>() {
                if value > 0 {
                    settings.pool_size = value;
                }
            }
        }
        if let Ok(debug) = env::var(ENV_DEBUG) {
            let debug = debug.trim();
            if debug == "true" || debug == "1" {
                settings.debug = true;
            }
        }

        settings
    }

    /// Apply CLI flag overrides. Flags win over environment values.
    pub fn apply_cli(&mut self, username: Option<String>, password: Option<String>) {
        if let Some(user) = username {
            if !user.is_empty() {
                self.username = Some(user);
            }
        }
        if let Some(pass) = password {
            if !pass.is_empty() {
                self.password = Some(pass);
            }
        }
    }

    /// Every cluster-touching command requires a password.
    pub fn require_password(&self) -> Result<(), AdminError> {
        match &self.password {
            Some(p) if !p.is_empty() => Ok(()),
            _ => Err(AdminError::Input(
                "a password is required; pass --password or set VALKEYCTL_PASSWORD".to_string(),
            )),
        }
    }

    /// Inline auth arguments for MIGRATE: two-credential form when a username
    /// is set, password-only otherwise, absent when neither is set.
    pub fn migrate_auth(&self) -> MigrateAuth {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => MigrateAuth::UserPassword(user.clone(), pass.clone()),
            (None, Some(pass)) => MigrateAuth::Password(pass.clone()),
            _ => MigrateAuth::None,
        }
    }

    /// Human-readable summary with secrets masked, for the `config` command.
    pub fn summary(&self) -> String {
        format!(
            "username: {}\npassword: {}\nconnect timeout: {:?}\ncommand timeout: {:?}\nmax retries: {}\npool size: {}\ndebug: {}",
            self.username.as_deref().map(mask).unwrap_or_else(|| "<not set>".to_string()),
            self.password.as_deref().map(mask).unwrap_or_else(|| "<not set>".to_string()),
            self.connect_timeout,
            self.command_timeout,
            self.max_retries,
            self.pool_size,
            self.debug,
        )
    }
}

fn parse_env_duration(name: &str) -> Option<Duration> {
    let raw = env::var(name).ok()?;
    humantime::parse_duration(raw.trim()).ok()
}

/// Mask a secret for display: keep the first two characters.
fn mask(value: &str) -> String {
    if value.chars().count() <= 2 {
        "***".to_string()
    } else {
        let head: String = value.chars().take(2).collect();
        format!("{}***", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert!(settings.username.is_none());
        assert!(settings.password.is_none());
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.command_timeout, Duration::from_secs(60));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.pool_size, 10);
        assert!(!settings.debug);
    }

    #[test]
    fn cli_overrides_env_values() {
        let mut settings = Settings {
            username: Some("env-user".to_string()),
            password: Some("env-pass".to_string()),
            ..Default::default()
        };
        settings.apply_cli(Some("cli-user".to_string()), None);
        assert_eq!(settings.username.as_deref(), Some("cli-user"));
        assert_eq!(settings.password.as_deref(), Some("env-pass"));
    }

    #[test]
    fn empty_cli_flags_do_not_clear_env() {
        let mut settings = Settings {
            password: Some("env-pass".to_string()),
            ..Default::default()
        };
        settings.apply_cli(None, Some(String::new()));
        assert_eq!(settings.password.as_deref(), Some("env-pass"));
    }

    #[test]
    fn require_password_rejects_missing() {
        let settings = Settings::default();
        assert!(settings.require_password().is_err());

        let settings = Settings {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(settings.require_password().is_ok());
    }

    #[test]
    fn migrate_auth_forms() {
        let mut settings = Settings::default();
        assert_eq!(settings.migrate_auth(), MigrateAuth::None);

        settings.password = Some("pw".to_string());
        assert_eq!(settings.migrate_auth(), MigrateAuth::Password("pw".to_string()));

        settings.username = Some("admin".to_string());
        assert_eq!(
            settings.migrate_auth(),
            MigrateAuth::UserPassword("admin".to_string(), "pw".to_string())
        );
    }

    #[test]
    fn summary_masks_secrets() {
        let settings = Settings {
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let summary = settings.summary();
        assert!(summary.contains("ad***"));
        assert!(summary.contains("hu***"));
        assert!(!summary.contains("hunter2"));
    }

    #[test]
    fn mask_short_values_entirely() {
        assert_eq!(mask("ab"), "***");
        assert_eq!(mask(""), "***");
        assert_eq!(mask("abc"), "ab***");
    }
}
