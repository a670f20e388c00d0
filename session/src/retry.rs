//! Backoff between attempts and bounded retries for idempotent GETs.
//!
//! - Delay: `initial_backoff * 2^step`, capped at `max_backoff`
//! - Jitter: down-jitter up to `jitter_factor` (multiplier in `[1 - j, 1.0]`)
//! - Only transport failures are retried; every other error is returned at once

use std::time::Duration;

use casgate_types::{HttpExchange, HttpRequest, RetryPolicy, SsoError, Transport, Url};

/// Calculate the delay before the next attempt.
///
/// `step` is 0 before the first retry, 1 before the second, and so on.
#[must_use]
pub fn backoff_delay(step: u32, policy: &RetryPolicy) -> Duration {
    let exponent = i32::try_from(step.min(16)).unwrap_or(16);
    let base = policy.initial_backoff.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(policy.max_backoff.as_secs_f64());

    let jitter = 1.0 - rand::random::<f64>() * policy.jitter_factor.clamp(0.0, 1.0);
    Duration::from_secs_f64(capped * jitter)
}

/// GET with up to `transport_retries` extra tries on transport failures.
pub async fn get_with_retry(
    transport: &dyn Transport,
    url: &Url,
    policy: &RetryPolicy,
) -> Result<HttpExchange, SsoError> {
    let mut retry_count = 0u32;
    loop {
        match transport.send(HttpRequest::get(url.clone())).await {
            Ok(exchange) => return Ok(exchange),
            Err(err) if err.is_retryable() && retry_count < policy.transport_retries => {
                let delay = backoff_delay(retry_count, policy);
                tracing::debug!(
                    error = %err,
                    retry_count = retry_count + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying GET after transport error"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
