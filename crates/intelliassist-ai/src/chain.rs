use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::metrics::{CallOutcome, MetricRecorder, MetricSample};
use crate::provider::{Outcome, Provider, ProviderInput, ProviderOutput};
use crate::ProviderError;

pub type DynProvider<I, O> = Arc<dyn Provider<Input = I, Output = O>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Failed(String),
    TimedOut,
    /// Skipped because the provider's rate window is full
    RateLimited,
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub result: AttemptResult,
    pub latency_ms: f64,
}

#[derive(Debug)]
pub enum ChainOutcome<O> {
    Success {
        output: O,
        provider: String,
        attempts: Vec<AttemptRecord>,
    },
    Exhausted {
        attempts: Vec<AttemptRecord>,
        /// Set when a provider rejected the input outright
        fatal: Option<ProviderError>,
    },
}

impl<O> ChainOutcome<O> {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            ChainOutcome::Success { attempts, .. } | ChainOutcome::Exhausted { attempts, .. } => {
                attempts
            }
        }
    }
}

/// Ordered providers tried one after another until one succeeds.
pub struct FallbackChain<I, O> {
    name: String,
    providers: Vec<DynProvider<I, O>>,
    metrics: Arc<MetricRecorder>,
    attempt_timeout: Duration,
}

impl<I, O> FallbackChain<I, O>
where
    I: ProviderInput,
    O: ProviderOutput,
{
    pub fn new(name: impl Into<String>, metrics: Arc<MetricRecorder>, attempt_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            metrics,
            attempt_timeout,
        }
    }

    pub fn with_provider(mut self, provider: DynProvider<I, O>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn push(&mut self, provider: DynProvider<I, O>) {
        self.providers.push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Try each provider once, in order. Records exactly one metric per invocation.
    #[instrument(skip(self, input), fields(chain = %self.name, providers = self.providers.len()))]
    pub async fn run(&self, input: &I) -> ChainOutcome<O> {
        let mut attempts = Vec::with_capacity(self.providers.len());
        let request_size = input.size() as i64;

        for provider in &self.providers {
            let name = provider.name().to_string();
            let operation = provider.operation().to_string();

            if !self.metrics.allow(&name) {
                info!(provider = %name, "Skipping rate-limited provider");
                attempts.push(AttemptRecord {
                    provider: name,
                    result: AttemptResult::RateLimited,
                    latency_ms: 0.0,
                });
                continue;
            }

            debug!(provider = %name, operation = %operation, "Trying provider");
            let started = Instant::now();
            let result = tokio::time::timeout(self.attempt_timeout, provider.invoke(input)).await;
            let latency = started.elapsed();
            let latency_ms = latency.as_secs_f64() * 1000.0;
            let sample = MetricSample::new(&name, &operation, CallOutcome::Success).latency(latency);

            let outcome = match result {
                Ok(Outcome::Success(output)) if output.text().trim().is_empty() => {
                    Outcome::Retryable(ProviderError::EmptyOutput)
                }
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(provider = %name, timeout = ?self.attempt_timeout, "Provider attempt timed out");
                    self.metrics.record(MetricSample {
                        outcome: CallOutcome::Timeout,
                        ..sample
                    }
                    .sizes(request_size, 0)
                    .error(ProviderError::Timeout(self.attempt_timeout).to_string()));
                    attempts.push(AttemptRecord {
                        provider: name,
                        result: AttemptResult::TimedOut,
                        latency_ms,
                    });
                    continue;
                }
            };

            match outcome {
                Outcome::Success(output) => {
                    self.metrics
                        .record(sample.sizes(request_size, output.size() as i64));
                    info!(provider = %name, latency_ms, "Provider succeeded");
                    attempts.push(AttemptRecord {
                        provider: name.clone(),
                        result: AttemptResult::Success,
                        latency_ms,
                    });
                    return ChainOutcome::Success {
                        output,
                        provider: name,
                        attempts,
                    };
                }
                Outcome::Retryable(e) => {
                    warn!(provider = %name, error = %e, "Provider failed, trying next");
                    self.record_failure(sample, request_size, &e);
                    attempts.push(AttemptRecord {
                        provider: name,
                        result: AttemptResult::Failed(e.to_string()),
                        latency_ms,
                    });
                }
                Outcome::Fatal(e) => {
                    warn!(provider = %name, error = %e, "Provider rejected input");
                    self.record_failure(sample, request_size, &e);
                    attempts.push(AttemptRecord {
                        provider: name,
                        result: AttemptResult::Fatal(e.to_string()),
                        latency_ms,
                    });
                    return ChainOutcome::Exhausted {
                        attempts,
                        fatal: Some(e),
                    };
                }
            }
        }

        warn!(chain = %self.name, attempts = attempts.len(), "All providers exhausted");
        ChainOutcome::Exhausted {
            attempts,
            fatal: None,
        }
    }

    fn record_failure(&self, sample: MetricSample, request_size: i64, error: &ProviderError) {
        self.metrics.record(
            MetricSample {
                outcome: CallOutcome::Error,
                ..sample
            }
            .sizes(request_size, 0)
            .status(error.status_code())
            .error(error.to_string()),
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metrics::MetricsConfig;
    use crate::provider::{Caption, ImageInput};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider with a scripted behaviour, shared with the pipeline tests.
    pub(crate) struct ScriptedCaptioner {
        pub name: String,
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
    }

    #[derive(Clone)]
    pub(crate) enum Behaviour {
        Succeed(&'static str),
        Fail,
        Reject,
        Hang,
    }

    impl ScriptedCaptioner {
        pub(crate) fn arc(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedCaptioner {
        type Input = ImageInput;
        type Output = Caption;

        fn name(&self) -> &str {
            &self.name
        }

        fn operation(&self) -> &str {
            "caption"
        }

        async fn invoke(&self, _input: &ImageInput) -> Outcome<Caption> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Succeed(text) => Outcome::Success(Caption {
                    text: text.to_string(),
                    confidence: 0.9,
                }),
                Behaviour::Fail => Outcome::Retryable(ProviderError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
                Behaviour::Reject => {
                    Outcome::Fatal(ProviderError::InvalidInput("unsupported".into()))
                }
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Outcome::Retryable(ProviderError::EmptyOutput)
                }
            }
        }
    }

    fn image() -> ImageInput {
        ImageInput::new(vec![1, 2, 3, 4], "photo.png")
    }

    fn chain_of(
        metrics: &Arc<MetricRecorder>,
        providers: Vec<Arc<ScriptedCaptioner>>,
    ) -> FallbackChain<ImageInput, Caption> {
        providers.into_iter().fold(
            FallbackChain::new("image", metrics.clone(), Duration::from_millis(100)),
            |chain, p| chain.with_provider(p),
        )
    }

    #[tokio::test]
    async fn test_last_provider_succeeds() {
        let metrics = Arc::new(MetricRecorder::default());
        let chain = chain_of(
            &metrics,
            vec![
                ScriptedCaptioner::arc("first", Behaviour::Fail),
                ScriptedCaptioner::arc("second", Behaviour::Fail),
                ScriptedCaptioner::arc("third", Behaviour::Succeed("a desk")),
            ],
        );

        match chain.run(&image()).await {
            ChainOutcome::Success {
                output,
                provider,
                attempts,
            } => {
                assert_eq!(provider, "third");
                assert_eq!(output.text, "a desk");
                assert_eq!(attempts.len(), 3);
            }
            other => panic!("unexpected outcome: {:?}", other.attempts()),
        }

        let recorded = metrics.recent(1);
        assert_eq!(recorded.len(), 3);
        assert_eq!(
            recorded.iter().filter(|m| m.outcome == CallOutcome::Error).count(),
            2
        );
        assert_eq!(recorded[2].outcome, CallOutcome::Success);
        assert_eq!(recorded[2].request_size, 4);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let metrics = Arc::new(MetricRecorder::default());
        let second = ScriptedCaptioner::arc("second", Behaviour::Fail);
        let chain = chain_of(
            &metrics,
            vec![
                ScriptedCaptioner::arc("first", Behaviour::Succeed("ok")),
                second.clone(),
            ],
        );

        assert!(matches!(chain.run(&image()).await, ChainOutcome::Success { .. }));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_all_fail_is_exhausted() {
        let metrics = Arc::new(MetricRecorder::default());
        let chain = chain_of(
            &metrics,
            vec![
                ScriptedCaptioner::arc("first", Behaviour::Fail),
                ScriptedCaptioner::arc("second", Behaviour::Succeed("   ")),
            ],
        );

        match chain.run(&image()).await {
            ChainOutcome::Exhausted { attempts, fatal } => {
                assert!(fatal.is_none());
                assert_eq!(attempts.len(), 2);
                assert!(matches!(attempts[1].result, AttemptResult::Failed(_)));
            }
            _ => panic!("expected exhaustion"),
        }
        assert_eq!(metrics.health("second").total_errors, 1);
    }

    #[tokio::test]
    async fn test_fatal_stops_the_chain() {
        let metrics = Arc::new(MetricRecorder::default());
        let after = ScriptedCaptioner::arc("after", Behaviour::Succeed("never"));
        let chain = chain_of(
            &metrics,
            vec![ScriptedCaptioner::arc("strict", Behaviour::Reject), after.clone()],
        );

        match chain.run(&image()).await {
            ChainOutcome::Exhausted { fatal, .. } => {
                assert!(matches!(fatal, Some(ProviderError::InvalidInput(_))))
            }
            _ => panic!("expected exhaustion"),
        }
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_and_skipped() {
        let metrics = Arc::new(MetricRecorder::default());
        let chain = chain_of(
            &metrics,
            vec![
                ScriptedCaptioner::arc("slow", Behaviour::Hang),
                ScriptedCaptioner::arc("fast", Behaviour::Succeed("a chart")),
            ],
        );

        let outcome = chain.run(&image()).await;
        assert_eq!(outcome.attempts()[0].result, AttemptResult::TimedOut);
        assert!(matches!(outcome, ChainOutcome::Success { .. }));
        assert_eq!(metrics.recent(1)[0].outcome, CallOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_enforced_rate_limit_skips_without_metric() {
        let mut limits = HashMap::new();
        limits.insert("busy".to_string(), 0);
        let metrics = Arc::new(MetricRecorder::new(MetricsConfig {
            rate_limits: limits,
            enforce_rate_limits: true,
            ..Default::default()
        }));
        let busy = ScriptedCaptioner::arc("busy", Behaviour::Succeed("x"));
        let chain = chain_of(
            &metrics,
            vec![busy.clone(), ScriptedCaptioner::arc("spare", Behaviour::Succeed("y"))],
        );

        match chain.run(&image()).await {
            ChainOutcome::Success { provider, attempts, .. } => {
                assert_eq!(provider, "spare");
                assert_eq!(attempts[0].result, AttemptResult::RateLimited);
            }
            _ => panic!("expected success"),
        }
        assert_eq!(busy.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let metrics = Arc::new(MetricRecorder::default());
        let chain: FallbackChain<ImageInput, Caption> =
            FallbackChain::new("image", metrics.clone(), Duration::from_secs(1));
        assert!(chain.is_empty());
        assert!(matches!(
            chain.run(&image()).await,
            ChainOutcome::Exhausted { fatal: None, .. }
        ));
        assert!(metrics.is_empty());
    }
}
