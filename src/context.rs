//! Cancellable operation context with a small type-indexed value store.
//!
//! A [`Context`] is cheap to clone. Values are keyed by their static type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Span used as the operation's logger.
#[derive(Clone, Debug)]
pub struct Logger(pub tracing::Span);

/// Caller that passed authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    Admin,
    User(String),
}

#[derive(Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    values: Arc<Values>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("values", &self.values.len())
            .finish()
    }
}

impl Context {
    /// Root context that is never cancelled unless `cancel` is called.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            values: Arc::default(),
        }
    }

    /// Derived context: cancelled when the parent is, values inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            values: Arc::clone(&self.values),
        }
    }

    /// Returns a copy carrying `value`, replacing any previous value of the
    /// same type.
    #[must_use]
    pub fn with<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut values: Values = (*self.values).clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            cancel: self.cancel.clone(),
            values: Arc::new(values),
        }
    }

    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    #[must_use]
    pub fn span(&self) -> tracing::Span {
        self.get::<Logger>()
            .map_or_else(tracing::Span::current, |l| l.0.clone())
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.get::<Principal>()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Runs `fut` until it completes or the context is cancelled.
    pub async fn run<T, F>(&self, fut: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CoreError::Cancelled),
            res = fut => res,
        }
    }

    /// Like [`Context::run`] with a deadline. A timeout is reported as a
    /// transport failure of `service`.
    pub async fn run_with_timeout<T, F>(
        &self,
        service: &'static str,
        deadline: Duration,
        fut: F,
    ) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        self.run(async {
            tokio::time::timeout(deadline, fut)
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::UpstreamTransport {
                        service,
                        cause: format!("deadline of {deadline:?} exceeded"),
                    })
                })
        })
        .await
    }

    /// Sleeps unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> CoreResult<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
