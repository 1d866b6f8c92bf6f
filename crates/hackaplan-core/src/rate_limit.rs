//! Admission control keyed by a hashed caller identity.
//!
//! Each identity keeps a sliding log of admitted-request instants. A request
//! is admitted only if every configured rule (for example 3/hour and
//! 10/day) still has room in its trailing window. Logs live in a `moka`
//! cache that evicts an identity once it has been idle for the longest
//! window, so expired state is reclaimed without a sweeper task. With an
//! [`AdmissionLedger`] the logs are restored from durable storage, so a
//! restart does not hand out a fresh budget.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::future::Cache;
use tokio::time::Instant;

use crate::error::AppError;
use crate::models::compute_hash;
use crate::traits::AdmissionLedger;

/// At most `ceiling` admissions per trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Duration,
    pub ceiling: u32,
}

impl RateLimitRule {
    pub fn new(window: Duration, ceiling: u32) -> Self {
        Self { window, ceiling }
    }

    pub fn per_hour(ceiling: u32) -> Self {
        Self::new(Duration::from_secs(3600), ceiling)
    }

    pub fn per_day(ceiling: u32) -> Self {
        Self::new(Duration::from_secs(86_400), ceiling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected; the caller may try again after `retry_after`.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

type AdmissionLog = Arc<Mutex<VecDeque<Instant>>>;

#[derive(Clone)]
pub struct RateLimiter {
    rules: Arc<[RateLimitRule]>,
    logs: Cache<String, AdmissionLog>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(rules: Vec<RateLimitRule>) -> Self {
        let longest = rules
            .iter()
            .map(|rule| rule.window)
            .max()
            .unwrap_or(Duration::from_secs(60));
        let logs = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(longest)
            .build();
        Self {
            rules: rules.into(),
            logs,
            enabled: true,
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        let mut limiter = Self::new(Vec::new());
        limiter.enabled = false;
        limiter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide on one request from `identity` and record it if admitted.
    ///
    /// Calls for different identities never contend; calls for the same
    /// identity serialize on that identity's log only.
    pub async fn admit(&self, identity: &str) -> Admission {
        if !self.is_active() {
            return Admission::Allowed;
        }

        let log = self
            .logs
            .get_with(identity.to_string(), async {
                Arc::new(Mutex::new(VecDeque::new()))
            })
            .await;
        self.decide(&log)
    }

    /// Like [`RateLimiter::admit`], but backed by `ledger`: an identity
    /// this process has not seen yet starts from the admissions the ledger
    /// still holds for the longest window, and every admission is written
    /// back to it.
    ///
    /// A failure to read the ledger is an error; a failure to record an
    /// admission is only logged.
    pub async fn admit_recorded<L: AdmissionLedger>(
        &self,
        identity: &str,
        ledger: &L,
    ) -> Result<Admission, AppError> {
        if !self.is_active() {
            return Ok(Admission::Allowed);
        }

        let log = self
            .logs
            .try_get_with(identity.to_string(), async {
                let stamps = self.seed(identity, ledger).await?;
                Ok::<_, AppError>(Arc::new(Mutex::new(stamps)))
            })
            .await
            .map_err(|e| AppError::Internal(format!("Rate limit state unavailable: {e}")))?;

        let admission = self.decide(&log);
        if admission.is_allowed()
            && let Err(err) = ledger.record(identity, crate::util::now()).await
        {
            tracing::warn!(error = %err, "Failed to record admission");
        }
        Ok(admission)
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }

    fn decide(&self, log: &AdmissionLog) -> Admission {
        let now = Instant::now();
        let mut stamps = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.evict_expired(&mut stamps, now);

        let mut wait: Option<Duration> = None;
        for rule in self.rules.iter() {
            if let Some(retry_after) = Self::violation(rule, &stamps, now) {
                wait = Some(wait.map_or(retry_after, |w| w.max(retry_after)));
            }
        }

        match wait {
            Some(retry_after) => Admission::Denied { retry_after },
            None => {
                stamps.push_back(now);
                Admission::Allowed
            }
        }
    }

    /// Rebuild an identity's log from the ledger. Each tally becomes
    /// `count` stamps at its latest possible instant, so a restored window
    /// never frees up earlier than the original one would have.
    async fn seed<L: AdmissionLedger>(
        &self,
        identity: &str,
        ledger: &L,
    ) -> Result<VecDeque<Instant>, AppError> {
        let now = Instant::now();
        let wall_now = crate::util::now();
        let since = TimeDelta::from_std(self.longest_window())
            .ok()
            .and_then(|window| wall_now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut tallies = ledger.admissions_since(identity, since).await?;
        tallies.sort_by_key(|(at, _)| *at);

        let mut stamps = VecDeque::new();
        for (at, count) in tallies {
            let age = (wall_now - at.min(wall_now)).to_std().unwrap_or_default();
            let stamp = now.checked_sub(age).unwrap_or(now);
            stamps.extend(std::iter::repeat_n(stamp, count as usize));
        }
        if !stamps.is_empty() {
            tracing::debug!(restored = stamps.len(), "Restored admission log");
        }
        Ok(stamps)
    }

    fn longest_window(&self) -> Duration {
        self.rules
            .iter()
            .map(|rule| rule.window)
            .max()
            .unwrap_or_default()
    }

    /// Salted one-way fingerprint of a caller address.
    pub fn fingerprint(ip: &str, salt: &str) -> String {
        compute_hash(&format!("{salt}:{ip}"))
    }

    fn evict_expired(&self, stamps: &mut VecDeque<Instant>, now: Instant) {
        let longest = self.longest_window();
        while stamps
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= longest)
        {
            stamps.pop_front();
        }
    }

    /// Time until `rule` has room again, or `None` if it has room now.
    fn violation(rule: &RateLimitRule, stamps: &VecDeque<Instant>, now: Instant) -> Option<Duration> {
        if rule.ceiling == 0 {
            return Some(rule.window);
        }
        let in_window = stamps
            .iter()
            .filter(|stamp| now.duration_since(**stamp) < rule.window)
            .count();
        if in_window < rule.ceiling as usize {
            return None;
        }
        // Stamps are ascending, so the in-window ones are a suffix. The slot
        // frees up when the `ceiling`-th newest one ages out.
        let key = stamps[stamps.len() - rule.ceiling as usize];
        Some(rule.window - now.duration_since(key))
    }
}
