use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Bandwidth profile the client is operating under.
///
/// The constrained profile mirrors mobile-grade connectivity: looser poll
/// cadence, longer receipt timeout, larger retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkProfile {
    Standard,
    Constrained,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self::Standard
    }
}

impl NetworkProfile {
    /// Cadence between receipt checks
    pub fn poll_interval(&self) -> Duration {
        match self {
            NetworkProfile::Standard => Duration::from_millis(400),
            NetworkProfile::Constrained => Duration::from_millis(1000),
        }
    }

    /// Wall-clock budget before observation gives up with a timeout
    pub fn poll_timeout(&self) -> Duration {
        match self {
            NetworkProfile::Standard => Duration::from_secs(30),
            NetworkProfile::Constrained => Duration::from_secs(60),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub profile: NetworkProfile,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub journal: JournalSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: NetworkProfile::Standard,
            queue: QueueSettings::default(),
            poller: PollerSettings::default(),
            cache: CacheSettings::default(),
            refresh: RefreshSettings::default(),
            journal: JournalSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Minimum spacing between read dispatches (milliseconds)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    200
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PollerSettings {
    /// Receipt-check cadence override (milliseconds); profile default if unset
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Receipt timeout override (seconds); profile default if unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Delay between confirmation and the first refresh (milliseconds)
    #[serde(default = "default_propagation_delay_ms")]
    pub propagation_delay_ms: u64,
    /// Delay before the extra refresh for queue/withdraw kinds (milliseconds)
    #[serde(default = "default_second_refresh_delay_ms")]
    pub second_refresh_delay_ms: u64,
}

fn default_propagation_delay_ms() -> u64 {
    1500
}

fn default_second_refresh_delay_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Read memoization window (milliseconds)
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_cache_ttl_ms() -> u64 {
    5000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    /// Delays for the bounded follow-up refreshes after a terminal outcome
    /// (milliseconds, in order)
    #[serde(default = "default_follow_up_delays_ms")]
    pub follow_up_delays_ms: Vec<u64>,
}

fn default_follow_up_delays_ms() -> Vec<u64> {
    vec![3000]
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            follow_up_delays_ms: default_follow_up_delays_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalSettings {
    /// Path of the recent-operation log file
    #[serde(default = "default_journal_path")]
    pub path: String,
    /// Entries older than this are pruned (seconds)
    #[serde(default = "default_journal_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_journal_path() -> String {
    "sluice-journal.json".to_string()
}

fn default_journal_max_age_secs() -> u64 {
    86_400
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
            max_age_secs: default_journal_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("profile", "standard")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SLUICE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SLUICE_QUEUE__MIN_INTERVAL_MS, etc.)
            .add_source(
                Environment::with_prefix("SLUICE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Default configuration tuned for a bandwidth profile
    pub fn for_profile(profile: NetworkProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Effective receipt-check cadence
    pub fn poll_interval(&self) -> Duration {
        self.poller
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.profile.poll_interval())
    }

    /// Effective receipt timeout
    pub fn poll_timeout(&self) -> Duration {
        self.poller
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.profile.poll_timeout())
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.poller.propagation_delay_ms)
    }

    pub fn second_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.poller.second_refresh_delay_ms)
    }

    pub fn queue_min_interval(&self) -> Duration {
        Duration::from_millis(self.queue.min_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }

    pub fn follow_up_delays(&self) -> Vec<Duration> {
        self.refresh
            .follow_up_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.poll_interval() == Duration::ZERO {
            errors.push("poller.interval_ms must be positive".to_string());
        }

        if self.poll_timeout() <= self.poll_interval() {
            errors.push("poller timeout must exceed the poll interval".to_string());
        }

        if self.cache.ttl_ms == 0 {
            errors.push("cache.ttl_ms must be positive".to_string());
        }

        // Follow-ups exist to absorb propagation lag; an unbounded chain of
        // them would defeat the refresh loop-breaking policy.
        if self.refresh.follow_up_delays_ms.len() > 4 {
            errors.push("refresh.follow_up_delays_ms allows at most 4 follow-ups".to_string());
        }

        if self.journal.max_age_secs == 0 {
            errors.push("journal.max_age_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let standard = EngineConfig::for_profile(NetworkProfile::Standard);
        assert_eq!(standard.poll_interval(), Duration::from_millis(400));
        assert_eq!(standard.poll_timeout(), Duration::from_secs(30));

        let constrained = EngineConfig::for_profile(NetworkProfile::Constrained);
        assert_eq!(constrained.poll_interval(), Duration::from_millis(1000));
        assert_eq!(constrained.poll_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_beat_profile() {
        let mut cfg = EngineConfig::for_profile(NetworkProfile::Standard);
        cfg.poller.interval_ms = Some(250);
        cfg.poller.timeout_secs = Some(10);
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.poll_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = EngineConfig::default();
        cfg.poller.interval_ms = Some(0);
        cfg.refresh.follow_up_delays_ms = vec![100; 5];
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2); // zero interval, too many follow-ups
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_logging_matches_serde_defaults() {
        // Constructing outside serde must yield the same usable level, not
        // an empty filter directive
        let logging = EngineConfig::default().logging;
        assert_eq!(logging.level, "info");
        assert!(!logging.json);
    }
}
