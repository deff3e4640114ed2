//! Fallback chain: fresh cache → primary → failover → stale cache → not found.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    Config,
    breaker::{CircuitBreaker, Counts, State},
    cache::DualTierCache,
    error::{BreakerError, FetchError},
    model::{LookupOutcome, Reading, Upstream},
    provider::{ProviderId, WeatherProvider, provider_from_config},
};

/// A provider together with the breaker and deadline that guard it.
#[derive(Debug)]
pub struct UpstreamClient {
    role: Upstream,
    provider: Box<dyn WeatherProvider>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        role: Upstream,
        provider: Box<dyn WeatherProvider>,
        breaker: CircuitBreaker,
        timeout: Duration,
    ) -> Self {
        Self {
            role,
            provider,
            breaker,
            timeout,
        }
    }

    pub fn role(&self) -> Upstream {
        self.role
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One attempt, bounded by the deadline. Dropping the fetch future on
    /// timeout cancels the in-flight request.
    async fn fetch(&self, location: &str) -> Result<Reading, BreakerError<FetchError>> {
        let deadline = self.timeout;
        let provider = self.provider.id();

        self.breaker
            .execute(|| async {
                tokio::time::timeout(deadline, self.provider.fetch(location, deadline))
                    .await
                    .unwrap_or(Err(FetchError::Timeout { provider, deadline }))
            })
            .await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamHealth {
    pub role: Upstream,
    pub provider: String,
    pub breaker: String,
    pub state: State,
    pub counts: Counts,
}

/// Answers lookups from the cache and two guarded upstreams.
#[derive(Debug)]
pub struct WeatherLookup {
    cache: Arc<DualTierCache>,
    primary: UpstreamClient,
    failover: UpstreamClient,
}

impl WeatherLookup {
    pub fn new(cache: Arc<DualTierCache>, primary: UpstreamClient, failover: UpstreamClient) -> Self {
        Self {
            cache,
            primary,
            failover,
        }
    }

    /// Build providers, breakers and cache from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let cache = Arc::new(DualTierCache::new(config.cache.ttl()));

        let client = |role: Upstream| -> anyhow::Result<UpstreamClient> {
            let upstream = config.upstreams.get(role);
            let id: ProviderId = upstream.provider_id()?;
            let provider = provider_from_config(id, config)
                .with_context(|| format!("Failed to set up the {role} upstream"))?;
            let breaker = CircuitBreaker::new(upstream.breaker_settings(format!("{id} ({role})")));

            Ok(UpstreamClient::new(role, provider, breaker, upstream.timeout()))
        };

        Ok(Self::new(cache, client(Upstream::Primary)?, client(Upstream::Failover)?))
    }

    pub fn cache(&self) -> &DualTierCache {
        &self.cache
    }

    pub fn upstreams(&self) -> [&UpstreamClient; 2] {
        [&self.primary, &self.failover]
    }

    #[instrument(skip(self))]
    pub async fn lookup(&self, location: &str) -> LookupOutcome {
        if let Some(reading) = self.cache.get(location) {
            debug!("fresh cache hit");
            return LookupOutcome::FreshCacheHit(reading);
        }

        for upstream in self.upstreams() {
            match upstream.fetch(location).await {
                Ok(reading) => {
                    self.cache.set(location, reading);
                    return LookupOutcome::LiveSuccess {
                        reading,
                        source: upstream.role,
                    };
                }
                Err(BreakerError::Open { name }) => {
                    debug!(upstream = %upstream.role, breaker = %name, "circuit open, skipping");
                }
                Err(BreakerError::Inner(err)) => {
                    warn!(upstream = %upstream.role, error = %err, "failed to fetch weather");
                }
            }
        }

        match self.cache.get_stale(location) {
            Some(reading) => {
                warn!("all upstreams failed, serving stale value");
                LookupOutcome::StaleFallback(reading)
            }
            None => {
                info!("all upstreams failed and nothing is cached");
                LookupOutcome::NotFound
            }
        }
    }

    pub fn health(&self) -> Vec<UpstreamHealth> {
        self.upstreams()
            .into_iter()
            .map(|upstream| UpstreamHealth {
                role: upstream.role,
                provider: upstream.provider.id().to_string(),
                breaker: upstream.breaker.name().to_string(),
                state: upstream.breaker.state(),
                counts: upstream.breaker.counts(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::breaker::Settings;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Succeed(Reading),
        Fail,
        Hang,
    }

    /// Provider stub that plays back queued behaviours, repeating the last one.
    #[derive(Debug)]
    struct Scripted {
        id: ProviderId,
        script: Mutex<Vec<Script>>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(id: ProviderId, script: &[Script]) -> (Box<dyn WeatherProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                id,
                script: Mutex::new(script.iter().rev().copied().collect()),
                calls: Arc::clone(&calls),
            };
            (Box::new(provider), calls)
        }
    }

    #[async_trait]
    impl WeatherProvider for Scripted {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn fetch(&self, _location: &str, _deadline: Duration) -> Result<Reading, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop()
                } else {
                    script.last().copied()
                }
            };

            match step {
                Some(Script::Succeed(reading)) => Ok(reading),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Fail) | None => Err(FetchError::Status {
                    provider: self.id,
                    status: 503,
                    body: "Server is down!".into(),
                }),
            }
        }
    }

    struct Harness {
        lookup: WeatherLookup,
        primary_calls: Arc<AtomicUsize>,
        failover_calls: Arc<AtomicUsize>,
    }

    fn harness(primary: &[Script], failover: &[Script]) -> Harness {
        harness_with(primary, failover, Settings::new("primary"))
    }

    fn harness_with(primary: &[Script], failover: &[Script], primary_settings: Settings) -> Harness {
        let (primary, primary_calls) = Scripted::new(ProviderId::WeatherStack, primary);
        let (failover, failover_calls) = Scripted::new(ProviderId::OpenWeather, failover);
        let timeout = Duration::from_secs(3);

        let lookup = WeatherLookup::new(
            Arc::new(DualTierCache::new(Duration::from_secs(1))),
            UpstreamClient::new(
                Upstream::Primary,
                primary,
                CircuitBreaker::new(primary_settings),
                timeout,
            ),
            UpstreamClient::new(
                Upstream::Failover,
                failover,
                CircuitBreaker::new(Settings::new("failover")),
                timeout,
            ),
        );

        Harness {
            lookup,
            primary_calls,
            failover_calls,
        }
    }

    const READING: Reading = Reading {
        temperature_c: 10,
        wind_speed_kmh: 15,
    };

    #[tokio::test(start_paused = true)]
    async fn primary_success_populates_both_tiers() {
        let h = harness(&[Script::Succeed(READING)], &[Script::Fail]);

        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(
            outcome,
            LookupOutcome::LiveSuccess {
                reading: READING,
                source: Upstream::Primary
            }
        );
        assert_eq!(h.lookup.cache().get("Melbourne"), Some(READING));
        assert_eq!(h.lookup.cache().get_stale("Melbourne"), Some(READING));
        assert_eq!(h.failover_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_lookup_is_served_from_cache() {
        let h = harness(&[Script::Succeed(READING)], &[Script::Fail]);

        h.lookup.lookup("Melbourne").await;
        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(outcome, LookupOutcome::FreshCacheHit(READING));
        assert_eq!(h.primary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_answers_when_primary_fails() {
        let failover_reading = Reading::new(11, 20);
        let h = harness(&[Script::Fail], &[Script::Succeed(failover_reading)]);

        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(
            outcome,
            LookupOutcome::LiveSuccess {
                reading: failover_reading,
                source: Upstream::Failover
            }
        );
        assert_eq!(h.lookup.cache().get("Melbourne"), Some(failover_reading));
        assert_eq!(h.primary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_without_history_is_not_found() {
        let h = harness(&[Script::Fail], &[Script::Fail]);

        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(outcome, LookupOutcome::NotFound);
        assert_eq!(h.primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.failover_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_serves_last_known_value() {
        let h = harness(&[Script::Succeed(READING), Script::Fail], &[Script::Fail]);

        h.lookup.lookup("Melbourne").await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(outcome, LookupOutcome::StaleFallback(READING));
        assert!(outcome.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure_and_advances() {
        let settings = Settings {
            min_requests: 1,
            failure_ratio: 1.0,
            ..Settings::new("primary")
        };
        let h = harness_with(&[Script::Hang], &[Script::Succeed(READING)], settings);

        let outcome = h.lookup.lookup("Melbourne").await;

        assert_eq!(
            outcome,
            LookupOutcome::LiveSuccess {
                reading: READING,
                source: Upstream::Failover
            }
        );
        assert_eq!(h.lookup.upstreams()[0].breaker().state(), State::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_primary_without_dispatch() {
        let settings = Settings {
            min_requests: 3,
            failure_ratio: 0.6,
            ..Settings::new("primary")
        };
        let h = harness_with(
            &[Script::Fail, Script::Fail, Script::Succeed(READING)],
            &[Script::Succeed(READING)],
            settings,
        );

        // distinct keys so every lookup misses the cache
        h.lookup.lookup("Sydney").await;
        h.lookup.lookup("Perth").await;
        h.lookup.lookup("Hobart").await;
        assert_eq!(h.lookup.upstreams()[0].breaker().state(), State::Open);

        let outcome = h.lookup.lookup("Darwin").await;

        assert_eq!(h.primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            outcome,
            LookupOutcome::LiveSuccess {
                reading: READING,
                source: Upstream::Failover
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_each_upstream() {
        let h = harness(&[Script::Fail], &[Script::Succeed(READING)]);
        h.lookup.lookup("Melbourne").await;

        let health = h.lookup.health();

        assert_eq!(health.len(), 2);
        assert_eq!(health[0].role, Upstream::Primary);
        assert_eq!(health[0].provider, "weatherstack");
        assert_eq!(health[0].counts.failures, 1);
        assert_eq!(health[1].state, State::Closed);
        assert_eq!(health[1].counts.successes, 1);
    }

    #[test]
    fn from_config_requires_api_keys() {
        let err = WeatherLookup::from_config(&Config::default()).unwrap_err();
        assert!(format!("{err:#}").contains("No API key configured"));
    }

    #[test]
    fn from_config_wires_configured_providers() {
        let mut config = Config::default();
        config.upsert_provider_api_key(ProviderId::WeatherStack, "A".into());
        config.upsert_provider_api_key(ProviderId::OpenWeather, "B".into());

        let lookup = WeatherLookup::from_config(&config).unwrap();

        let [primary, failover] = lookup.upstreams();
        assert_eq!(primary.breaker().name(), "weatherstack (primary)");
        assert_eq!(failover.breaker().name(), "openweather (failover)");
        assert_eq!(lookup.cache().ttl(), Duration::from_secs(3));
    }
}
