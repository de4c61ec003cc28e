use anyhow::Result;
use async_trait::async_trait;

use super::DomainEventBus;
use crate::event_sourcing::core::EventEnvelope;
use crate::utils::{
    retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryConfig, RetryResult,
};

// ============================================================================
// Resilient Event Bus
// ============================================================================
//
// Decorates a bus with:
// - retry with exponential backoff for each publish
// - a circuit breaker that short-circuits publishes while the broker is down
//
// ============================================================================

pub struct ResilientEventBus<B> {
    inner: B,
    circuit_breaker: CircuitBreaker,
    retry: RetryConfig,
}

impl<B> ResilientEventBus<B> {
    pub fn new(inner: B, circuit_breaker: CircuitBreakerConfig, retry: RetryConfig) -> Self {
        Self {
            inner,
            circuit_breaker: CircuitBreaker::new(circuit_breaker),
            retry,
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }

    pub async fn reset_circuit_breaker(&self) {
        self.circuit_breaker.reset().await;
    }
}

#[async_trait]
impl<E, B> DomainEventBus<E> for ResilientEventBus<B>
where
    E: Send + Sync + 'static,
    B: DomainEventBus<E>,
{
    async fn publish(&self, envelope: &EventEnvelope<E>) -> Result<()> {
        let inner = &self.inner;

        let result = self
            .circuit_breaker
            .call(async {
                match retry_with_backoff(self.retry.clone(), |_attempt| inner.publish(envelope)).await {
                    RetryResult::Success(()) => Ok(()),
                    RetryResult::Failed(e) => Err(e),
                }
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    aggregate_id = %envelope.aggregate_id,
                    event_type = %envelope.event_type,
                    "Circuit breaker open - event bus unavailable"
                );
                Err(anyhow::anyhow!("Circuit breaker open for event bus"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}
