//! Ordered provider fallback guarded by per-provider circuit breakers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use atlas_core::{AtlasError, LlmRequest, LlmResponse};

use crate::circuit_breaker::{BreakerBoard, BreakerSnapshot};
use crate::providers::ProviderRegistry;

/// Default upper bound for a single provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Routes completion requests to the first healthy provider.
///
/// Providers are tried in `order`. A provider whose breaker is open is
/// skipped without being called; failures and timeouts feed its breaker.
pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    order: Vec<String>,
    breakers: BreakerBoard,
    timeout: Duration,
}

impl ProviderRouter {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let order = registry.list();
        Self {
            registry,
            order,
            breakers: BreakerBoard::new(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Explicit provider order; an empty list keeps registration order.
    pub fn with_order(mut self, order: Vec<String>) -> Self {
        if !order.is_empty() {
            self.order = order;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Breaker state of every routed provider, including never-called ones.
    pub async fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        for name in &self.order {
            self.breakers.register(name).await;
        }
        self.breakers.snapshot().await
    }

    pub async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, AtlasError> {
        let providers = self.registry.get_providers(&self.order);
        if providers.is_empty() {
            return Err(AtlasError::ProviderUnavailable(
                "no providers configured".to_string(),
            ));
        }

        let mut skipped = Vec::new();
        let mut last_error: Option<(String, String)> = None;

        for (name, provider) in providers {
            if !self.breakers.allows(&name).await {
                debug!(provider = %name, "Circuit open, skipping provider");
                skipped.push(name);
                continue;
            }

            let start = Instant::now();
            match tokio::time::timeout(self.timeout, provider.complete(request)).await {
                Ok(Ok(response)) => {
                    self.breakers.record_success(&name).await;
                    info!(
                        provider = %name,
                        tokens = response.tokens_used,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Provider responded"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, error = %e, "Provider failed");
                    self.breakers.record_failure(&name).await;
                    last_error = Some((name, e.to_string()));
                }
                Err(_) => {
                    warn!(
                        provider = %name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Provider timed out"
                    );
                    self.breakers.record_failure(&name).await;
                    let message = format!("timed out after {}ms", self.timeout.as_millis());
                    last_error = Some((name, message));
                }
            }
        }

        match last_error {
            Some((provider, message)) => Err(AtlasError::Llm { provider, message }),
            None => Err(AtlasError::ProviderUnavailable(format!(
                "circuit open for {}",
                skipped.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use async_trait::async_trait;
    use atlas_core::LlmProvider;

    fn router_with(providers: Vec<Arc<MockProvider>>) -> ProviderRouter {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p.name().to_string(), p);
        }
        ProviderRouter::new(Arc::new(registry))
    }

    fn req() -> LlmRequest {
        LlmRequest::new("system", "user")
    }

    #[tokio::test]
    async fn falls_back_to_next_provider() {
        let primary = Arc::new(MockProvider::failing("primary"));
        let fallback = Arc::new(MockProvider::new("fallback").with_response("ok"));
        let router = router_with(vec![primary.clone(), fallback.clone()]);

        let resp = router.complete(&req()).await.unwrap();
        assert_eq!(resp.provider, "fallback");
        assert_eq!(primary.calls(), 1);

        let snap = router.snapshot().await;
        assert_eq!(snap["primary"].consecutive_failures, 1);
        assert_eq!(snap["fallback"].failures_total, 0);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_provider() {
        let primary = Arc::new(MockProvider::failing("primary"));
        let fallback = Arc::new(MockProvider::new("fallback"));
        let router = router_with(vec![primary.clone(), fallback.clone()]);

        for _ in 0..3 {
            router.complete(&req()).await.unwrap();
        }
        assert_eq!(primary.calls(), 3);

        // Fourth call must not touch the tripped provider.
        router.complete(&req()).await.unwrap();
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 4);
        assert!(router.snapshot().await["primary"].is_open);
    }

    #[tokio::test]
    async fn all_circuits_open_is_provider_unavailable() {
        let only = Arc::new(MockProvider::failing("only"));
        let router = router_with(vec![only.clone()]);

        for _ in 0..3 {
            let err = router.complete(&req()).await.unwrap_err();
            assert!(matches!(err, AtlasError::Llm { .. }));
        }
        let err = router.complete(&req()).await.unwrap_err();
        assert!(matches!(err, AtlasError::ProviderUnavailable(_)));
        assert_eq!(only.calls(), 3);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let flaky = Arc::new(
            MockProvider::new("flaky")
                .then_fail("503")
                .then_fail("503")
                .then_reply("fine"),
        );
        let router = router_with(vec![flaky.clone()]);
        assert!(router.complete(&req()).await.is_err());
        assert!(router.complete(&req()).await.is_err());
        router.complete(&req()).await.unwrap();

        let snap = router.snapshot().await;
        assert_eq!(snap["flaky"].consecutive_failures, 0);
        assert_eq!(snap["flaky"].failures_total, 2);
    }

    #[tokio::test]
    async fn empty_registry_is_unavailable() {
        let router = ProviderRouter::new(Arc::new(ProviderRegistry::new()));
        let err = router.complete(&req()).await.unwrap_err();
        assert!(matches!(err, AtlasError::ProviderUnavailable(_)));
    }

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _req: &LlmRequest) -> anyhow::Result<LlmResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::bail!("unreachable")
        }
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let mut registry = ProviderRegistry::new();
        registry.register("slow", Arc::new(SlowProvider));
        let router = ProviderRouter::new(Arc::new(registry))
            .with_timeout(Duration::from_millis(20));

        let err = router.complete(&req()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(router.snapshot().await["slow"].consecutive_failures, 1);
    }
}
