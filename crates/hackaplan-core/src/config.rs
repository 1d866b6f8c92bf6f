use std::time::Duration;

use crate::error::AppError;
use crate::job::WorkerConfig;
use crate::pipeline::PipelineConfig;
use crate::rate_limit::{RateLimitRule, RateLimiter};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "HackaplanBot/1.0 (+https://github.com/)";

/// Admission settings for `POST /lookups`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub hourly_limit: u32,
    pub daily_limit: u32,
    /// Salt mixed into caller fingerprints.
    pub ip_hash_salt: String,
    /// Take the caller address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hourly_limit: 3,
            daily_limit: 10,
            ip_hash_salt: "change-me".into(),
            trust_forwarded_for: true,
        }
    }
}

impl RateLimitConfig {
    pub fn rules(&self) -> Vec<RateLimitRule> {
        vec![
            RateLimitRule::per_hour(self.hourly_limit),
            RateLimitRule::per_day(self.daily_limit),
        ]
    }

    pub fn build_limiter(&self) -> RateLimiter {
        if self.enabled {
            RateLimiter::new(self.rules())
        } else {
            RateLimiter::disabled()
        }
    }
}

/// Everything that tunes a lookup, from fetch policy to admission.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupConfig {
    pub request_timeout: Duration,
    /// Attempts per listing or gallery page, first one included.
    pub max_retries: u32,
    pub backoff: Duration,
    pub project_timeout: Duration,
    pub project_retries: u32,
    pub project_backoff: Duration,
    pub max_backoff: Duration,
    /// Longest server-requested `Retry-After` the fetchers will honour.
    pub max_retry_after: Duration,
    pub retry_jitter: bool,
    pub max_gallery_pages: u32,
    pub detail_concurrency: usize,
    pub job_timeout: Duration,
    /// How long a completed lookup answers repeat requests. Zero disables reuse.
    pub cache_ttl: Duration,
    pub user_agent: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            max_retries: 3,
            backoff: Duration::from_millis(600),
            project_timeout: Duration::from_secs(8),
            project_retries: 2,
            project_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            max_retry_after: Duration::from_secs(60),
            retry_jitter: false,
            max_gallery_pages: 40,
            detail_concurrency: 6,
            job_timeout: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(1800),
            user_agent: DEFAULT_USER_AGENT.into(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl LookupConfig {
    /// Read configuration from `HACKAPLAN_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but invalid ones are an error.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`LookupConfig::from_env`], reading through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let d = Self::default();
        let vars = Vars(&var);
        Ok(Self {
            request_timeout: vars.seconds("HACKAPLAN_REQUEST_TIMEOUT_SECONDS", d.request_timeout)?,
            max_retries: vars.count("HACKAPLAN_MAX_RETRIES", d.max_retries)?,
            backoff: vars.seconds("HACKAPLAN_BACKOFF_SECONDS", d.backoff)?,
            project_timeout: vars.seconds("HACKAPLAN_PROJECT_TIMEOUT_SECONDS", d.project_timeout)?,
            project_retries: vars.count("HACKAPLAN_PROJECT_RETRIES", d.project_retries)?,
            project_backoff: vars.seconds("HACKAPLAN_PROJECT_BACKOFF_SECONDS", d.project_backoff)?,
            max_backoff: vars.seconds("HACKAPLAN_MAX_BACKOFF_SECONDS", d.max_backoff)?,
            max_retry_after: vars.ttl("HACKAPLAN_MAX_RETRY_AFTER_SECONDS", d.max_retry_after)?,
            retry_jitter: vars.flag("HACKAPLAN_RETRY_JITTER", d.retry_jitter)?,
            max_gallery_pages: vars.count("HACKAPLAN_MAX_GALLERY_PAGES", d.max_gallery_pages)?,
            detail_concurrency: vars.count("HACKAPLAN_DETAIL_CONCURRENCY", d.detail_concurrency as u32)?
                as usize,
            job_timeout: vars.seconds("HACKAPLAN_JOB_TIMEOUT_SECONDS", d.job_timeout)?,
            cache_ttl: vars.ttl("HACKAPLAN_CACHE_TTL_SECONDS", d.cache_ttl)?,
            user_agent: var("HACKAPLAN_USER_AGENT")
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or(d.user_agent),
            rate_limit: RateLimitConfig {
                enabled: vars.flag("HACKAPLAN_RATE_LIMIT_ENABLED", d.rate_limit.enabled)?,
                hourly_limit: vars.count("HACKAPLAN_RATE_LIMIT_HOURLY", d.rate_limit.hourly_limit)?,
                daily_limit: vars.count("HACKAPLAN_RATE_LIMIT_DAILY", d.rate_limit.daily_limit)?,
                ip_hash_salt: var("HACKAPLAN_IP_HASH_SALT").unwrap_or(d.rate_limit.ip_hash_salt),
                trust_forwarded_for: vars.flag(
                    "HACKAPLAN_TRUST_FORWARDED_FOR",
                    d.rate_limit.trust_forwarded_for,
                )?,
            },
        })
    }

    pub fn listing_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff, self.request_timeout)
            .with_max_delay(self.max_backoff)
            .with_max_retry_after(self.max_retry_after)
            .with_jitter(self.retry_jitter)
    }

    pub fn detail_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.project_retries, self.project_backoff, self.project_timeout)
            .with_max_delay(self.max_backoff)
            .with_max_retry_after(self.max_retry_after)
            .with_jitter(self.retry_jitter)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            listing_policy: self.listing_policy(),
            detail_policy: self.detail_policy(),
            max_gallery_pages: self.max_gallery_pages,
            detail_concurrency: self.detail_concurrency,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default().with_job_timeout(self.job_timeout)
    }
}

struct Vars<'a, V: Fn(&str) -> Option<String>>(&'a V);

impl<V: Fn(&str) -> Option<String>> Vars<'_, V> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn count(&self, key: &str, default: u32) -> Result<u32, AppError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        let parsed: u32 = raw.parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a positive integer"))
        })?;
        if parsed == 0 {
            return Err(AppError::ConfigError(format!("{key} must be at least 1")));
        }
        Ok(parsed)
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, AppError> {
        match self.raw_seconds(key)? {
            None => Ok(default),
            Some(secs) if secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
            Some(_) => Err(AppError::ConfigError(format!("{key} must be greater than 0"))),
        }
    }

    fn ttl(&self, key: &str, default: Duration) -> Result<Duration, AppError> {
        match self.raw_seconds(key)? {
            None => Ok(default),
            Some(secs) if secs >= 0.0 => Ok(Duration::from_secs_f64(secs)),
            Some(_) => Err(AppError::ConfigError(format!("{key} must not be negative"))),
        }
    }

    fn raw_seconds(&self, key: &str) -> Result<Option<f64>, AppError> {
        let Some(raw) = self.raw(key) else {
            return Ok(None);
        };
        let secs: f64 = raw.parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a number of seconds"))
        })?;
        if !secs.is_finite() || secs > 31_536_000.0 {
            return Err(AppError::ConfigError(format!("{key} is out of range")));
        }
        Ok(Some(secs))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, AppError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::ConfigError(format!(
                "Invalid {key} '{raw}': expected true or false"
            ))),
        }
    }
}
