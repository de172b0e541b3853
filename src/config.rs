use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Global Config stored in `OnceLock`
static CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000/";
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 7;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Absent means the in-memory store is used.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub production: bool,
    pub auth_disabled: bool,
    pub google: Option<GoogleOAuthConfig>,
    pub frontend_url: String,
    pub admin_emails: Vec<String>,
    pub session_ttl: Duration,
    /// `None` disables the background expiry sweep.
    pub sweep_interval: Option<Duration>,
    pub reject_duplicate_requests: bool,
    pub cors_origin: Option<String>,
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            production: false,
            auth_disabled: false,
            google: None,
            frontend_url: DEFAULT_FRONTEND_URL.to_string(),
            admin_emails: Vec::new(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)),
            reject_duplicate_requests: false,
            cors_origin: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Load environment variables and set defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = match non_empty("BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "BIND_ADDR", value: raw })?,
            None => defaults.bind_addr,
        };

        let google = match (
            non_empty("GOOGLE_CLIENT_ID"),
            non_empty("GOOGLE_CLIENT_SECRET"),
            non_empty("GOOGLE_REDIRECT_URI"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(GoogleOAuthConfig {
                client_id,
                client_secret,
                redirect_uri,
            }),
            _ => None,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            bind_addr,
            production: non_empty("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            auth_disabled: flag("AUTH_DISABLED"),
            google,
            frontend_url: non_empty("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            admin_emails: non_empty("ADMIN_EMAILS")
                .map(|raw| parse_email_list(&raw))
                .unwrap_or_default(),
            session_ttl: Duration::from_secs(seconds("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?),
            sweep_interval: match seconds("EXPIRY_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            reject_duplicate_requests: flag("REJECT_DUPLICATE_REQUESTS"),
            cors_origin: non_empty("CORS_ORIGIN"),
            log_dir: non_empty("LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
        })
    }

    /// Initialize the global config
    pub fn init(config: Config) {
        if CONFIG.set(Arc::new(config)).is_err() {
            tracing::warn!("Config already initialized; keeping the first value");
        }
    }

    /// Global config, or the defaults when `init` was never called (tests)
    pub fn get() -> Arc<Config> {
        CONFIG
            .get_or_init(|| Arc::new(Config::default()))
            .clone()
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email.trim()))
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(name: &str) -> bool {
    non_empty(name).is_some_and(|v| v == "true" || v == "1")
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match non_empty(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_emails_are_trimmed_and_case_insensitive() {
        let config = Config {
            admin_emails: parse_email_list(" Admin@Example.com, ,ops@example.com "),
            ..Config::default()
        };
        assert_eq!(config.admin_emails, vec!["admin@example.com", "ops@example.com"]);
        assert!(config.is_admin_email("ADMIN@example.com"));
        assert!(!config.is_admin_email("someone@example.com"));
    }

    #[test]
    fn defaults_keep_sweeper_enabled() {
        let config = Config::default();
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.bind_addr.port(), 5000);
        assert!(!config.production);
    }
}
