//! Provider call metrics, health and soft rate limits.
//!
//! Every provider invocation appends one [`CallMetric`] to a bounded ring
//! buffer. Health is derived on demand from the buffer, so a provider's
//! status is always a pure function of its recent calls. Rate windows are
//! per provider, aligned to the wall-clock minute.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" for windowed calculations.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let delta = ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
        *self.now.lock() += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub capacity: usize,
    pub health_window: Duration,
    pub slow_call: Duration,
    pub rate_limits: HashMap<String, u32>,
    pub default_rate_limit: u32,
    pub warn_ratio: f64,
    /// Skip providers over their ceiling instead of only warning
    pub enforce_rate_limits: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let rate_limits = [("groq", 30), ("huggingface", 1000), ("supabase", 1000)]
            .into_iter()
            .map(|(name, limit)| (name.to_string(), limit))
            .collect();

        Self {
            capacity: 10_000,
            health_window: Duration::from_secs(60 * 60),
            slow_call: Duration::from_secs(10),
            rate_limits,
            default_rate_limit: 1000,
            warn_ratio: 0.8,
            enforce_rate_limits: false,
        }
    }
}

impl MetricsConfig {
    pub fn ceiling(&self, provider: &str) -> u32 {
        self.rate_limits
            .get(provider)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Success,
    Error,
    Timeout,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Error => "error",
            CallOutcome::Timeout => "timeout",
        }
    }
}

/// One recorded provider invocation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMetric {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub operation: String,
    pub outcome: CallOutcome,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub request_size: u64,
    pub response_size: u64,
    pub error: Option<String>,
}

/// Unvalidated measurement handed to [`MetricRecorder::record`].
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub provider: String,
    pub operation: String,
    pub outcome: CallOutcome,
    pub status_code: Option<u16>,
    pub latency_secs: f64,
    pub request_size: i64,
    pub response_size: i64,
    pub error: Option<String>,
}

impl MetricSample {
    pub fn new(
        provider: impl Into<String>,
        operation: impl Into<String>,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            outcome,
            status_code: None,
            latency_secs: 0.0,
            request_size: 0,
            response_size: 0,
            error: None,
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency_secs = latency.as_secs_f64();
        self
    }

    pub fn latency_secs(mut self, secs: f64) -> Self {
        self.latency_secs = secs;
        self
    }

    pub fn sizes(mut self, request: i64, response: i64) -> Self {
        self.request_size = request;
        self.response_size = response;
        self
    }

    pub fn status(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Unknown,
}

impl HealthStatus {
    const HEALTHY_RATE: f64 = 0.95;
    const DOWN_RATE: f64 = 0.5;
    const SLOW_AVG_MS: f64 = 30_000.0;

    pub fn classify(total_calls: u64, success_rate: f64, avg_latency_ms: f64) -> Self {
        if total_calls == 0 {
            HealthStatus::Unknown
        } else if success_rate < Self::DOWN_RATE {
            HealthStatus::Down
        } else if success_rate < Self::HEALTHY_RATE || avg_latency_ms > Self::SLOW_AVG_MS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn is_impaired(&self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Down)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateWindow {
    pub provider: String,
    pub requests_this_minute: u32,
    pub window_reset_at: DateTime<Utc>,
    pub ceiling: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWarning {
    Approaching,
    Exceeded,
}

/// Result of counting one call attempt against a provider's window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateCheck {
    pub provider: String,
    pub allowed: bool,
    pub count: u32,
    pub ceiling: u32,
    pub warning: Option<RateWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsDashboard {
    pub generated_at: DateTime<Utc>,
    pub overall: HealthStatus,
    pub providers: Vec<ProviderHealth>,
    pub rate_windows: Vec<RateWindow>,
    pub total_calls: usize,
    pub total_errors: usize,
    pub recent: Vec<CallMetric>,
}

/// Snapshot written by [`MetricRecorder::export`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsExport {
    pub exported_at: DateTime<Utc>,
    pub dashboard: MetricsDashboard,
}

const EXPORT_MINUTES: i64 = 24 * 60;

fn next_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    let start = secs - secs.rem_euclid(60);
    DateTime::from_timestamp(start + 60, 0).unwrap_or(now + ChronoDuration::seconds(60))
}

fn clamp_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct MetricRecorder {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    metrics: Mutex<VecDeque<CallMetric>>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl Default for MetricRecorder {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricRecorder {
    pub fn new(config: MetricsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: MetricsConfig { capacity, ..config },
            clock,
            metrics: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Append a metric. Never fails; negative or non-finite values become zero.
    pub fn record(&self, sample: MetricSample) {
        let latency_secs = clamp_non_negative(sample.latency_secs);
        let metric = CallMetric {
            timestamp: self.clock.now(),
            provider: sample.provider,
            operation: sample.operation,
            outcome: sample.outcome,
            status_code: sample.status_code,
            latency_ms: latency_secs * 1000.0,
            request_size: sample.request_size.max(0) as u64,
            response_size: sample.response_size.max(0) as u64,
            error: sample.error,
        };

        if latency_secs > self.config.slow_call.as_secs_f64() {
            tracing::warn!(
                provider = %metric.provider,
                operation = %metric.operation,
                latency_ms = metric.latency_ms,
                "Slow provider call"
            );
        }
        if metric.outcome != CallOutcome::Success {
            tracing::error!(
                provider = %metric.provider,
                operation = %metric.operation,
                outcome = metric.outcome.as_str(),
                error = metric.error.as_deref().unwrap_or(""),
                "Provider call failed"
            );
        }

        let mut metrics = self.metrics.lock();
        while metrics.len() >= self.config.capacity {
            metrics.pop_front();
        }
        metrics.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// Health over the configured window.
    pub fn health(&self, provider: &str) -> ProviderHealth {
        let since = self.window_start();
        let metrics = self.metrics.lock();
        Self::compute_health(
            provider,
            metrics
                .iter()
                .filter(|m| m.provider == provider && m.timestamp >= since),
        )
    }

    /// Health for every provider seen in the buffer or given a rate limit.
    pub fn health_all(&self) -> Vec<ProviderHealth> {
        let mut providers: BTreeSet<String> = self.config.rate_limits.keys().cloned().collect();
        providers.extend(self.metrics.lock().iter().map(|m| m.provider.clone()));
        providers.iter().map(|p| self.health(p)).collect()
    }

    fn compute_health<'a>(
        provider: &str,
        metrics: impl Iterator<Item = &'a CallMetric>,
    ) -> ProviderHealth {
        let mut total = 0u64;
        let mut errors = 0u64;
        let mut latency_sum = 0.0;
        let mut last_success_at = None;
        let mut last_failure_at = None;

        for metric in metrics {
            total += 1;
            latency_sum += metric.latency_ms;
            if metric.outcome == CallOutcome::Success {
                last_success_at = last_success_at.max(Some(metric.timestamp));
            } else {
                errors += 1;
                last_failure_at = last_failure_at.max(Some(metric.timestamp));
            }
        }

        let (success_rate, avg_latency_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                (total - errors) as f64 / total as f64,
                latency_sum / total as f64,
            )
        };

        ProviderHealth {
            provider: provider.to_string(),
            status: HealthStatus::classify(total, success_rate, avg_latency_ms),
            success_rate,
            avg_latency_ms,
            last_success_at,
            last_failure_at,
            total_calls: total,
            total_errors: errors,
        }
    }

    /// Count one call attempt against the provider's current minute.
    pub fn check_rate(&self, provider: &str) -> RateCheck {
        let now = self.clock.now();
        let ceiling = self.config.ceiling(provider);
        let mut windows = self.windows.lock();
        let window = windows
            .entry(provider.to_string())
            .or_insert_with(|| RateWindow {
                provider: provider.to_string(),
                requests_this_minute: 0,
                window_reset_at: next_minute(now),
                ceiling,
            });

        if now >= window.window_reset_at {
            window.requests_this_minute = 0;
            window.window_reset_at = next_minute(now);
        }

        let over = window.requests_this_minute >= ceiling;
        let allowed = !(over && self.config.enforce_rate_limits);
        if allowed {
            window.requests_this_minute = window.requests_this_minute.saturating_add(1);
        }
        let count = window.requests_this_minute;
        drop(windows);

        let warning = if count > ceiling || !allowed {
            tracing::warn!(provider, count, ceiling, "Rate limit exceeded");
            Some(RateWarning::Exceeded)
        } else if f64::from(count) >= f64::from(ceiling) * self.config.warn_ratio {
            tracing::warn!(provider, count, ceiling, "Approaching rate limit");
            Some(RateWarning::Approaching)
        } else {
            None
        };

        RateCheck {
            provider: provider.to_string(),
            allowed,
            count,
            ceiling,
            warning,
        }
    }

    pub fn allow(&self, provider: &str) -> bool {
        self.check_rate(provider).allowed
    }

    /// Current windows; expired ones are reported as empty.
    pub fn rate_windows(&self) -> Vec<RateWindow> {
        let now = self.clock.now();
        let mut windows: Vec<RateWindow> = self
            .windows
            .lock()
            .values()
            .map(|w| {
                if now >= w.window_reset_at {
                    RateWindow {
                        requests_this_minute: 0,
                        window_reset_at: next_minute(now),
                        ..w.clone()
                    }
                } else {
                    w.clone()
                }
            })
            .collect();
        windows.sort_by(|a, b| a.provider.cmp(&b.provider));
        windows
    }

    /// Metrics recorded in the last `minutes` minutes, oldest first.
    pub fn recent(&self, minutes: i64) -> Vec<CallMetric> {
        let since = self.clock.now() - ChronoDuration::minutes(minutes.max(0));
        self.metrics
            .lock()
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn dashboard(&self, recent_minutes: i64) -> MetricsDashboard {
        let providers = self.health_all();
        let impaired = providers.iter().filter(|p| p.status.is_impaired()).count();
        let overall = match impaired {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Down,
        };

        let (total_calls, total_errors) = {
            let metrics = self.metrics.lock();
            let errors = metrics
                .iter()
                .filter(|m| m.outcome != CallOutcome::Success)
                .count();
            (metrics.len(), errors)
        };

        MetricsDashboard {
            generated_at: self.clock.now(),
            overall,
            providers,
            rate_windows: self.rate_windows(),
            total_calls,
            total_errors,
            recent: self.recent(recent_minutes),
        }
    }

    /// Write the dashboard, with the last 24 hours of calls, as pretty JSON.
    pub async fn export(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        let export = MetricsExport {
            exported_at: self.clock.now(),
            dashboard: self.dashboard(EXPORT_MINUTES),
        };
        let body = serde_json::to_vec_pretty(&export)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, body).await?;
        tracing::info!(
            path = %path.display(),
            calls = export.dashboard.recent.len(),
            "Exported metrics"
        );
        Ok(())
    }

    fn window_start(&self) -> DateTime<Utc> {
        let window = ChronoDuration::from_std(self.config.health_window)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        self.clock.now() - window
    }
}
