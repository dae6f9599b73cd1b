use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

// Defaults
const DEFAULT_DATA_DIR: &str = "database";
const DEFAULT_BUCKET: &str = "medicine-images";
const DEFAULT_TABLE: &str = "entries";
const DEFAULT_NOTICE_SECS: u64 = 3;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Which collaborator implementation backs the application
#[derive(Clone, Debug, PartialEq)]
pub enum BackendConfig {
    /// Users, entries and blobs kept under a local directory
    Local { data_dir: PathBuf },

    /// Hosted backend-as-a-service reached over HTTPS
    Remote { url: String, api_key: String },
}

/// Runtime configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,

    /// Object storage bucket holding uploaded images
    pub bucket: String,

    /// Table holding entry records
    pub table: String,

    /// How long a notification stays visible
    pub notice_ttl: Duration,

    /// Maximum uploads or fetches in flight at once; 1 keeps them sequential
    pub concurrency: usize,

    /// Address the web server listens on
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig::Local {
                data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            },
            bucket: DEFAULT_BUCKET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            notice_ttl: Duration::from_secs(DEFAULT_NOTICE_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            bind_addr: DEFAULT_BIND.to_string(),
        }
    }
}

impl Config {
    /// Read configuration from `MEDLOG_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a variable name, or `None` if unset
    ///
    /// # Errors
    /// * `ConfigError::Invalid` for unknown backends or malformed numbers
    /// * `ConfigError::Missing` when the remote backend lacks its URL or key
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let backend = match lookup("MEDLOG_BACKEND").as_deref() {
            None | Some("local") => BackendConfig::Local {
                data_dir: lookup("MEDLOG_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            },
            Some("remote") => BackendConfig::Remote {
                url: lookup("MEDLOG_REMOTE_URL")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::Missing("MEDLOG_REMOTE_URL"))?
                    .trim_end_matches('/')
                    .to_string(),
                api_key: lookup("MEDLOG_REMOTE_KEY")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::Missing("MEDLOG_REMOTE_KEY"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "MEDLOG_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let notice_ttl = match lookup("MEDLOG_NOTICE_SECS") {
            Some(raw) => Duration::from_secs(parse_number("MEDLOG_NOTICE_SECS", &raw)?),
            None => defaults.notice_ttl,
        };

        let concurrency = match lookup("MEDLOG_CONCURRENCY") {
            Some(raw) => {
                let n: usize = parse_number("MEDLOG_CONCURRENCY", &raw)?;
                if n == 0 {
                    return Err(ConfigError::Invalid {
                        key: "MEDLOG_CONCURRENCY",
                        value: raw,
                    });
                }
                n
            }
            None => defaults.concurrency,
        };

        Ok(Config {
            backend,
            bucket: lookup("MEDLOG_BUCKET").unwrap_or(defaults.bucket),
            table: lookup("MEDLOG_TABLE").unwrap_or(defaults.table),
            notice_ttl,
            concurrency,
            bind_addr: lookup("MEDLOG_BIND").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}
