use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use tokio_util::sync::CancellationToken;

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

// Stage name used when none is given.
const DEFAULT_STAGE: &str = "status";

/// A fixed-interval status poller.
///
/// The first fetch happens right away, the following ones are spaced by a
/// fixed interval. By default, polling goes on indefinitely; attempts,
/// elapsed time and cancellation can each bound it.
///
/// ```no_run
/// use std::time::Duration;
///
/// use corellium_client::poller::Poller;
///
/// # async fn run() -> corellium_client::error::Result<()> {
/// let poller = Poller::new(Duration::from_secs(5))
///     .stage("device boot")
///     .deadline(Duration::from_secs(600));
///
/// let state = poller
///     .wait(
///         || async { Ok("on") },
///         |state| *state == "on",
///         |state| *state == "error",
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    stage: Cow<'static, str>,
    max_attempts: Option<u32>,
    deadline: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl Poller {
    /// Creates a [`Poller`] fetching values at the given interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            stage: Cow::Borrowed(DEFAULT_STAGE),
            max_attempts: None,
            deadline: None,
            cancellation: None,
        }
    }

    /// Sets the name of what is awaited, used in error messages.
    #[must_use]
    pub fn stage(mut self, stage: impl Into<Cow<'static, str>>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Sets the maximum number of fetches.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the maximum time spent polling.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a token to stop polling from the outside.
    #[must_use]
    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Fetches values until one matches either predicate.
    ///
    /// The failure predicate is checked first, so a value matching both
    /// is a failure.
    ///
    /// # Errors
    ///
    /// - any error returned by `fetch`, which stops polling immediately
    /// - [`ErrorKind::Workflow`] when a value matches `is_failed`
    /// - [`ErrorKind::Timeout`] when attempts or time run out
    /// - [`ErrorKind::Cancelled`] when the cancellation token fires
    pub async fn wait<T, F, Fut, D, X>(&self, mut fetch: F, is_done: D, is_failed: X) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        D: Fn(&T) -> bool,
        X: Fn(&T) -> bool,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            self.check_cancelled()?;

            let value = fetch().await?;
            attempts = attempts.saturating_add(1);

            if is_failed(&value) {
                return Err(Error::new(
                    ErrorKind::Workflow,
                    format!("{}: failure status observed", self.stage),
                ));
            }

            if is_done(&value) {
                debug!("{}: reached after {attempts} attempts", self.stage);
                return Ok(value);
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(Error::new(
                    ErrorKind::Timeout,
                    format!("{}: not reached after {attempts} attempts", self.stage),
                ));
            }

            if let Some(deadline) = self.deadline
                && started.elapsed().saturating_add(self.interval) > deadline
            {
                return Err(Error::new(
                    ErrorKind::Timeout,
                    format!("{}: not reached within {deadline:?}", self.stage),
                ));
            }

            self.sleep().await?;
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(self.cancelled());
        }
        Ok(())
    }

    fn cancelled(&self) -> Error {
        Error::new(ErrorKind::Cancelled, format!("{}: cancelled", self.stage))
    }

    async fn sleep(&self) -> Result<()> {
        match &self.cancellation {
            Some(cancellation) => tokio::select! {
                () = tokio::time::sleep(self.interval) => Ok(()),
                () = cancellation.cancelled() => Err(self.cancelled()),
            },
            None => {
                tokio::time::sleep(self.interval).await;
                Ok(())
            }
        }
    }
}

/// Fetches values at a fixed interval until one matches `is_done`, failing
/// as soon as one matches `is_failed`.
///
/// Polling is unbounded, use a [`Poller`] to set limits.
///
/// # Errors
///
/// See [`Poller::wait`].
pub async fn wait_until<T, F, Fut, D, X>(
    fetch: F,
    is_done: D,
    is_failed: X,
    interval: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: Fn(&T) -> bool,
    X: Fn(&T) -> bool,
{
    Poller::new(interval).wait(fetch, is_done, is_failed).await
}
