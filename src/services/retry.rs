use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::context::Context;
use crate::error::{CoreError, CoreResult};

/// Runs `op` up to `attempts` times with a fixed `delay` between tries and
/// returns the last error. Cancellation stops the loop between attempts.
pub async fn with_retry<T, F, Fut>(
    ctx: &Context,
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(attempt, error = %e, "Attempt failed, retrying");
                ctx.sleep(delay).await?;
                attempt += 1;
            }
        }
    }
}
