//! Bounded retry executor shared by the mail fetcher, the challenge resolver,
//! the session token extractor and the temp-mail cleanup.

use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::error::VerifyError;

/// Pause between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Fixed(Duration),
    /// Uniformly random in `[min, max]`, so retries don't fire on a fixed beat.
    Jittered { min: Duration, max: Duration },
}

impl Delay {
    pub fn fixed_secs(secs: u64) -> Self {
        Delay::Fixed(Duration::from_secs(secs))
    }

    /// Fixed pause from fractional seconds. Negative, NaN and overflowing
    /// values are config errors.
    pub fn fixed_secs_f64(secs: f64) -> Result<Self, VerifyError> {
        Ok(Delay::Fixed(secs_f64(secs)?))
    }

    pub fn jittered_secs(min: f64, max: f64) -> Result<Self, VerifyError> {
        Ok(Delay::Jittered {
            min: secs_f64(min)?,
            max: secs_f64(max)?,
        })
    }

    /// Draw the next pause.
    pub fn sample(&self) -> Duration {
        match *self {
            Delay::Fixed(d) => d,
            Delay::Jittered { min, max } => {
                if max <= min {
                    return min;
                }
                rand::thread_rng().gen_range(min..=max)
            }
        }
    }

    pub async fn wait(&self) {
        let pause = self.sample();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

fn secs_f64(secs: f64) -> Result<Duration, VerifyError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| VerifyError::Config(format!("invalid delay {}s: {}", secs, e)))
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted {
        attempts: u32,
        last_error: Option<VerifyError>,
    },
    Fatal(VerifyError),
}

impl<T> RetryOutcome<T> {
    /// Collapse into a `Result`, turning exhaustion into `RetryExhausted`.
    pub fn into_result(self) -> Result<T, VerifyError> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { attempts, last_error } => Err(VerifyError::RetryExhausted {
                attempts,
                last_error: last_error.map(Box::new),
            }),
            RetryOutcome::Fatal(err) => Err(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    delay: Delay,
    fail_fast: bool,
    label: &'static str,
}

impl RetryPolicy {
    /// `max_attempts` must be at least 1.
    pub fn new(max_attempts: u32, delay: Delay) -> Result<Self, VerifyError> {
        let max_attempts = NonZeroU32::new(max_attempts)
            .ok_or_else(|| VerifyError::Config("retry attempts must be at least 1".into()))?;
        Ok(Self {
            max_attempts,
            delay,
            fail_fast: false,
            label: "operation",
        })
    }

    /// Non-transient errors end the loop with `Fatal` instead of being counted.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Name used in log lines.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    pub fn delay(&self) -> Delay {
        self.delay
    }

    /// Run `operation` until it yields a value or attempts run out.
    ///
    /// The closure receives the 1-based attempt number. `Ok(None)` means
    /// "nothing yet" and is retried, `Err` is classified with
    /// [`VerifyError::is_transient`].
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, VerifyError>>,
    {
        let max = self.max_attempts.get();
        let mut last_error = None;

        for attempt in 1..=max {
            let remaining = max - attempt;

            match operation(attempt).await {
                Ok(Some(value)) => return RetryOutcome::Success(value),
                Ok(None) => {
                    debug!(label = self.label, attempt, remaining, "attempt produced nothing");
                }
                Err(err) if self.fail_fast && !err.is_transient() => {
                    warn!(label = self.label, attempt, error = %err, "unrecoverable error, giving up");
                    return RetryOutcome::Fatal(err);
                }
                Err(err) => {
                    if err.is_transport_failure() {
                        error!(label = self.label, attempt, remaining, error = %err, "attempt failed");
                    } else {
                        warn!(label = self.label, attempt, remaining, error = %err, "attempt failed");
                    }
                    last_error = Some(err);
                }
            }

            if remaining > 0 {
                self.delay.wait().await;
            }
        }

        RetryOutcome::Exhausted {
            attempts: max,
            last_error,
        }
    }
}
