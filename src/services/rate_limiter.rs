//! Token bucket with a burst of one: callers are spaced evenly at the
//! configured rate.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{CoreError, CoreResult};

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn per_minute(requests: u32) -> Self {
        Self::with_interval(Duration::from_secs(60) / requests.max(1))
    }

    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserves the next slot and returns how long to wait for it, or
    /// `None` when the wait would exceed `max_wait`.
    async fn reserve(&self, max_wait: Option<Duration>) -> Option<Duration> {
        let mut next = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = (*next).max(now);
        let wait = slot - now;
        if max_wait.is_some_and(|max| wait > max) {
            return None;
        }
        *next = slot + self.interval;
        Some(wait)
    }

    /// Waits for a token. Cancellation of `ctx` aborts the wait; the
    /// reserved slot is not returned.
    pub async fn acquire(&self, ctx: &Context) -> CoreResult<()> {
        let wait = self.reserve(None).await.unwrap_or_default();
        if !wait.is_zero() {
            ctx.sleep(wait).await?;
        }
        Ok(())
    }

    /// Like [`RateLimiter::acquire`] but fails with `RateLimited` instead of
    /// waiting longer than `max_wait`.
    pub async fn acquire_within(&self, ctx: &Context, max_wait: Duration) -> CoreResult<()> {
        let wait = self
            .reserve(Some(max_wait))
            .await
            .ok_or(CoreError::RateLimited)?;
        if !wait.is_zero() {
            ctx.sleep(wait).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_by_interval() {
        let limiter = RateLimiter::per_minute(60);
        let ctx = Context::background();
        let start = Instant::now();

        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();
        limiter.acquire(&ctx).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_reports_rate_limited() {
        let limiter = RateLimiter::with_interval(Duration::from_secs(30));
        let ctx = Context::background();

        limiter.acquire(&ctx).await.unwrap();
        let res = limiter
            .acquire_within(&ctx, Duration::from_secs(10))
            .await;
        assert!(matches!(res, Err(CoreError::RateLimited)));
        assert!(CoreError::RateLimited.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_wait() {
        let limiter = RateLimiter::with_interval(Duration::from_secs(60));
        let ctx = Context::background();
        limiter.acquire(&ctx).await.unwrap();

        ctx.cancel();
        let res = limiter.acquire(&ctx).await;
        assert!(matches!(res, Err(CoreError::Cancelled)));
    }
}
