//! Resilience shell - validation, rate limiting, caching, timeouts and retry
//!
//! Every backend call goes through [`ResilienceContext::execute`]. The context
//! is explicit state: the process owns one and hands it to each backend, and
//! tests build isolated instances.

pub mod cache;
pub mod rate_limit;
pub mod retry;
pub mod validation;

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::traits::{GenerationResult, Operation};
use crate::config::ResilienceConfig;
use crate::error::{AppError, Result};

pub use cache::{fingerprint, ResponseCache};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// Describes one guarded backend call
#[derive(Debug, Clone)]
pub struct CallSpec<'a> {
    pub backend: &'a str,
    pub operation: Operation,
    pub prompt: &'a str,
    /// Fingerprint from [`cache::fingerprint`]
    pub cache_key: String,
    /// Bound on a single attempt, including any job polling inside it
    pub timeout: Duration,
}

/// Shared rate-limit table, response cache and retry policy
pub struct ResilienceContext {
    config: ResilienceConfig,
    limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryPolicy,
}

impl ResilienceContext {
    pub fn new(config: ResilienceConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_window(), config.rate_limit_max_requests);
        let cache = ResponseCache::new(config.cache_ttl(), config.cache_max_entries);
        let retry = RetryPolicy {
            max_attempts: config.max_retries,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        };

        Self {
            config,
            limiter,
            cache,
            retry,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Run a backend operation inside the shell.
    ///
    /// Order: prompt check, rate limit, cache lookup, then attempts under the
    /// retry policy. Each attempt receives the deadline it must finish by; the
    /// timer is dropped with the attempt on every exit path. Only complete,
    /// validated results reach the cache.
    pub async fn execute<F, Fut>(&self, call: CallSpec<'_>, op: F) -> Result<GenerationResult>
    where
        F: Fn(Instant) -> Fut,
        Fut: Future<Output = Result<GenerationResult>>,
    {
        let CallSpec {
            backend,
            operation,
            prompt,
            cache_key,
            timeout,
        } = call;

        validation::validate_prompt(backend, prompt, self.config.max_prompt_length)?;
        self.limiter.check(backend)?;

        if let Some(hit) = self.cache.get(&cache_key) {
            debug!(backend = %backend, operation = %operation, "Cache hit");
            return Ok(hit);
        }

        let max_bytes = self.config.max_payload_bytes;
        let op = &op;
        let result = self
            .retry
            .run(backend, move || {
                let deadline = Instant::now() + timeout;
                let attempt = op(deadline);
                async move {
                    let result = with_deadline(backend, operation, deadline, timeout, attempt).await?;
                    check_output(backend, &result, max_bytes)?;
                    Ok(result)
                }
            })
            .await?;

        self.cache.insert(cache_key, result.clone());
        Ok(result)
    }
}

async fn with_deadline<Fut>(
    backend: &str,
    operation: Operation,
    deadline: Instant,
    timeout: Duration,
    attempt: Fut,
) -> Result<GenerationResult>
where
    Fut: Future<Output = Result<GenerationResult>>,
{
    match tokio::time::timeout_at(deadline, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => Err(AppError::transient(
            backend,
            format!("{} timed out after {}s", operation, timeout.as_secs()),
        )),
    }
}

fn check_output(backend: &str, result: &GenerationResult, max_bytes: usize) -> Result<()> {
    if result.images.is_empty() {
        return Err(AppError::transient(backend, "backend returned no images"));
    }
    for (index, image) in result.images.iter().enumerate() {
        validation::validate_payload(
            backend,
            &format!("output image {}", index + 1),
            image.data.len(),
            max_bytes,
        )?;
    }
    Ok(())
}
