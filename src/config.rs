use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://darkblue-mink-249537.hostingersite.com";

/// Knobs that shape how a single studio session behaves.
#[derive(Debug, Clone)]
pub struct StudioSettings {
    pub poll_interval: Duration,
    /// Consecutive failed status lookups before a task is marked failed.
    pub poll_max_failures: u32,
    pub filter_delay: Duration,
    pub upload_max_bytes: usize,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_max_failures: 3,
            filter_delay: Duration::from_millis(500),
            upload_max_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub port: u16,
    pub http_timeout: Duration,
    pub studio: StudioSettings,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = StudioSettings::default();

        let api_base = lookup("STUDIO_API_BASE")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self {
            api_base,
            port: lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            http_timeout: Duration::from_secs(parsed("STUDIO_HTTP_TIMEOUT_SECS").unwrap_or(60)),
            studio: StudioSettings {
                poll_interval: parsed("STUDIO_POLL_INTERVAL_SECS")
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.poll_interval),
                poll_max_failures: parsed("STUDIO_POLL_MAX_FAILURES")
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.poll_max_failures),
                filter_delay: parsed("STUDIO_FILTER_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.filter_delay),
                upload_max_bytes: parsed("STUDIO_UPLOAD_MAX_BYTES")
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(defaults.upload_max_bytes),
            },
        }
    }
}
