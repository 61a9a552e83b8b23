//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Upper bound on concurrent diff downloads.
pub const MAX_WORKERS: usize = 1024;

/// Upper bound on the pause between pages (one day).
pub const MAX_SLEEP_BETWEEN_PAGES_SECS: f64 = 86_400.0;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gerrit server and HTTP settings
    #[serde(default)]
    pub gerrit: GerritConfig,

    /// Query, pagination and concurrency settings
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Sinks receiving assembled changes, in fan-out order
    #[serde(default)]
    pub stores: Vec<StoreConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.gerrit.base_url.trim().is_empty() {
            return Err(AppError::validation("gerrit.base_url is empty"));
        }
        url::Url::parse(&self.gerrit.base_url)
            .map_err(|e| AppError::validation(format!("gerrit.base_url is invalid: {e}")))?;
        if self.gerrit.user_agent.trim().is_empty() {
            return Err(AppError::validation("gerrit.user_agent is empty"));
        }
        if self.gerrit.timeout_secs == 0 {
            return Err(AppError::validation("gerrit.timeout_secs must be > 0"));
        }
        if self.gerrit.username.is_some() != self.gerrit.password.is_some() {
            return Err(AppError::validation(
                "gerrit.username and gerrit.password must be set together",
            ));
        }
        if self.crawl.query.trim().is_empty() {
            return Err(AppError::validation("crawl.query is empty"));
        }
        if self.crawl.page_size == 0 {
            return Err(AppError::validation("crawl.page_size must be > 0"));
        }
        if self.crawl.max_pages == 0 {
            return Err(AppError::validation("crawl.max_pages must be > 0"));
        }
        if self.crawl.workers == 0 || self.crawl.workers > MAX_WORKERS {
            return Err(AppError::validation(format!(
                "crawl.workers must be between 1 and {MAX_WORKERS}"
            )));
        }
        let sleep = self.crawl.sleep_between_pages_secs;
        if !sleep.is_finite() || !(0.0..=MAX_SLEEP_BETWEEN_PAGES_SECS).contains(&sleep) {
            return Err(AppError::validation(format!(
                "crawl.sleep_between_pages_secs must be between 0 and {MAX_SLEEP_BETWEEN_PAGES_SECS}"
            )));
        }
        if self.stores.is_empty() {
            return Err(AppError::validation("No stores defined"));
        }
        for store in &self.stores {
            store.validate()?;
        }
        Ok(())
    }
}

/// Gerrit server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GerritConfig {
    /// Base URL of the Gerrit instance (e.g. `https://review.opendev.org`)
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// HTTP basic auth user; enables the authenticated `/a/` namespace
    #[serde(default)]
    pub username: Option<String>,

    /// HTTP password generated in the Gerrit settings page
    #[serde(default)]
    pub password: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for GerritConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            username: None,
            password: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Crawl behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Change search predicate (`q` parameter)
    #[serde(default = "defaults::query")]
    pub query: String,

    /// `o` options embedding files, revisions, labels, accounts and messages
    #[serde(default = "defaults::options")]
    pub options: Vec<String>,

    /// Changes per page (`n` parameter)
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Upper bound on page requests
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Download diffs of the latest patch set only
    #[serde(default = "defaults::last_revision_only")]
    pub last_revision_only: bool,

    /// Concurrent diff downloads
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Pause between two page requests in seconds
    #[serde(default)]
    pub sleep_between_pages_secs: f64,

    /// Attempts per page after a transport failure
    #[serde(default = "defaults::max_page_retries")]
    pub max_page_retries: usize,

    /// Store only changes with at least one non-zero Code-Review vote
    #[serde(default)]
    pub only_with_votes: bool,
}

impl CrawlConfig {
    /// Pause between pages; negative or NaN values mean no pause.
    pub fn sleep_between_pages(&self) -> Duration {
        let secs = self.sleep_between_pages_secs;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            query: defaults::query(),
            options: defaults::options(),
            page_size: defaults::page_size(),
            max_pages: defaults::max_pages(),
            last_revision_only: defaults::last_revision_only(),
            workers: defaults::workers(),
            sleep_between_pages_secs: 0.0,
            max_page_retries: defaults::max_page_retries(),
            only_with_votes: false,
        }
    }
}

/// Store binding: a sink plus its dedup policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub kind: StoreKind,

    /// Wipe the sink once before the crawl starts
    #[serde(default)]
    pub clear_before: bool,

    /// Do not overwrite changes already present in the sink
    #[serde(default)]
    pub skip_existing: bool,
}

/// Concrete sink selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreKind {
    /// One JSON document per line appended to a file
    JsonFile { path: PathBuf },

    /// Documents upserted into a named collection of a SQLite database
    Sqlite {
        path: PathBuf,
        #[serde(default = "defaults::collection")]
        collection: String,
    },
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        match &self.kind {
            StoreKind::JsonFile { path } if path.as_os_str().is_empty() => {
                Err(AppError::validation("json_file store path is empty"))
            }
            StoreKind::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err(AppError::validation("sqlite store path is empty"))
            }
            StoreKind::Sqlite { collection, .. } if !is_identifier(collection) => {
                Err(AppError::validation(format!(
                    "sqlite collection '{collection}' must be alphanumeric or '_'"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Collection names end up as table names.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Gerrit defaults
    pub fn base_url() -> String {
        "https://review.opendev.org".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; gerrit-crawler/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Crawl defaults
    pub fn query() -> String {
        "status:open OR status:merged OR status:abandoned".into()
    }
    pub fn options() -> Vec<String> {
        [
            "ALL_FILES",
            "ALL_REVISIONS",
            "LABELS",
            "DETAILED_LABELS",
            "DETAILED_ACCOUNTS",
            "MESSAGES",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn page_size() -> usize {
        100
    }
    pub fn max_pages() -> usize {
        10
    }
    pub fn last_revision_only() -> bool {
        true
    }
    pub fn workers() -> usize {
        5
    }
    pub fn max_page_retries() -> usize {
        3
    }

    // Store defaults
    pub fn collection() -> String {
        "reviews".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_store() -> Config {
        let mut config = Config::default();
        config.stores.push(StoreConfig {
            kind: StoreKind::JsonFile {
                path: "changes.jsonl".into(),
            },
            clear_before: true,
            skip_existing: false,
        });
        config
    }

    #[test]
    fn validate_default_config_with_store_ok() {
        assert!(config_with_store().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_stores() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let mut config = config_with_store();
        config.crawl.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = config_with_store();
        config.crawl.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_too_many_workers() {
        let mut config = config_with_store();
        config.crawl.workers = MAX_WORKERS + 1;
        assert!(config.validate().is_err());
        config.crawl.workers = MAX_WORKERS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unusable_sleep() {
        for secs in [f64::INFINITY, f64::NAN, -1.0, MAX_SLEEP_BETWEEN_PAGES_SECS * 2.0] {
            let mut config = config_with_store();
            config.crawl.sleep_between_pages_secs = secs;
            assert!(config.validate().is_err(), "accepted {secs}");
        }
    }

    #[test]
    fn infinite_sleep_from_toml_is_rejected_without_panic() {
        let config: Config = toml::from_str(
            r#"
            [crawl]
            sleep_between_pages_secs = inf

            [[stores]]
            kind = "json_file"
            path = "changes.jsonl"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
        assert_eq!(config.crawl.sleep_between_pages(), Duration::MAX);
    }

    #[test]
    fn sleep_between_pages_handles_out_of_range_values() {
        let mut crawl = CrawlConfig::default();
        crawl.sleep_between_pages_secs = f64::NAN;
        assert_eq!(crawl.sleep_between_pages(), Duration::ZERO);
        crawl.sleep_between_pages_secs = -3.0;
        assert_eq!(crawl.sleep_between_pages(), Duration::ZERO);
        crawl.sleep_between_pages_secs = 1e300;
        assert_eq!(crawl.sleep_between_pages(), Duration::MAX);
    }

    #[test]
    fn validate_rejects_half_credentials() {
        let mut config = config_with_store();
        config.gerrit.username = Some("bot".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_collection() {
        let mut config = config_with_store();
        config.stores.push(StoreConfig {
            kind: StoreKind::Sqlite {
                path: "gerrit.db".into(),
                collection: "reviews; DROP TABLE x".to_string(),
            },
            clear_before: false,
            skip_existing: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_toml_with_stores() {
        let config: Config = toml::from_str(
            r#"
            [gerrit]
            base_url = "https://gerrit.wikimedia.org/r"

            [crawl]
            query = "status:merged"
            page_size = 50
            max_pages = 2
            sleep_between_pages_secs = 1.5

            [[stores]]
            kind = "json_file"
            path = "out/changes.jsonl"
            clear_before = true

            [[stores]]
            kind = "sqlite"
            path = "out/gerrit.db"
            skip_existing = true
            "#,
        )
        .unwrap();

        assert_eq!(config.gerrit.base_url, "https://gerrit.wikimedia.org/r");
        assert_eq!(config.crawl.page_size, 50);
        assert_eq!(config.crawl.workers, 5);
        assert_eq!(config.crawl.options.len(), 6);
        assert_eq!(
            config.crawl.sleep_between_pages(),
            Duration::from_millis(1500)
        );
        assert_eq!(config.stores.len(), 2);
        assert!(config.stores[0].clear_before);
        assert_eq!(
            config.stores[1].kind,
            StoreKind::Sqlite {
                path: "out/gerrit.db".into(),
                collection: "reviews".to_string(),
            }
        );
        assert!(config.stores[1].skip_existing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("reviews"));
        assert!(is_identifier("android_2024"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1reviews"));
        assert!(!is_identifier("re-views"));
    }
}
