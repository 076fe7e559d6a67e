//! Retry driver with exponential backoff.
//!
//! Every API call goes through [`send_with_retry`]. Responses are classified
//! by status:
//!
//! - `< 400`: success, the decoded body is returned
//! - `400..500`: a [`ClientError`] is raised at once, never retried
//! - `>= 500`: sleep for the current delay, grow it, send the same request again
//!
//! A [`TransportError::ConnectionReset`] reconnects the transport and re-sends
//! immediately, without sleeping or growing the delay.
//!
//! The default [`BackoffPolicy`] starts at one second, doubles, and never gives
//! up: a request against a server stuck on 5xx blocks forever. Callers that
//! need a bound set `max_attempts`, `max_elapsed`, or a [`Growth::Custom`]
//! function that returns `None`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{AppOpticsError, ClientError, Result, TransportError};
use crate::request::{Body, decode_body};
use crate::transport::{HttpRequest, Transport};

/// How the delay grows after each server error.
#[derive(Clone, Default)]
pub enum Growth {
    /// Double the delay (default).
    #[default]
    Doubling,
    /// Keep the delay constant.
    Constant,
    /// Compute the next delay from the current one; `None` gives up.
    Custom(Arc<dyn Fn(Duration) -> Option<Duration> + Send + Sync>),
}

impl Growth {
    /// Wraps a custom growth function.
    pub fn custom(f: impl Fn(Duration) -> Option<Duration> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn next(&self, current: Duration) -> Option<Duration> {
        match self {
            Self::Doubling => Some(current.saturating_mul(2)),
            Self::Constant => Some(current),
            Self::Custom(f) => f(current),
        }
    }
}

impl fmt::Debug for Growth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doubling => f.write_str("Doubling"),
            Self::Constant => f.write_str("Constant"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Retry policy for transient server errors.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// How the delay grows between retries.
    pub growth: Growth,
    /// Maximum number of requests sent, including the first. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Give up once the next sleep would pass this much total time.
    pub max_elapsed: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            growth: Growth::Doubling,
            max_attempts: None,
            max_elapsed: None,
        }
    }
}

impl BackoffPolicy {
    /// Sets the first retry delay.
    #[must_use]
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Sets the growth function.
    #[must_use]
    pub fn with_growth(mut self, growth: Growth) -> Self {
        self.growth = growth;
        self
    }

    /// Caps the number of requests per call.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Caps the total time spent retrying per call.
    #[must_use]
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Whether this policy can ever give up.
    pub fn is_bounded(&self) -> bool {
        self.max_attempts.is_some()
            || self.max_elapsed.is_some()
            || matches!(self.growth, Growth::Custom(_))
    }
}

/// Backoff state for a single call. Discarded when the call completes.
#[derive(Debug)]
pub struct Backoff<'p> {
    policy: &'p BackoffPolicy,
    delay: Duration,
    attempts: u32,
    started: Instant,
    slept: Duration,
}

impl<'p> Backoff<'p> {
    /// Starts a fresh backoff sequence.
    pub fn new(policy: &'p BackoffPolicy) -> Self {
        Self {
            policy,
            delay: policy.initial,
            attempts: 0,
            started: Instant::now(),
            slept: Duration::ZERO,
        }
    }

    /// Records that a request is about to be sent.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Requests sent so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the attempt cap has been reached.
    pub fn attempts_exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }

    /// Time spent on this call so far: wall clock, but never less than the
    /// total of the delays already handed out.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed().max(self.slept)
    }

    /// Returns the delay to sleep before the next retry and grows the
    /// stored delay, or `None` if the policy gives up.
    ///
    /// With `max_elapsed` set, gives up when sleeping for the next delay
    /// would take the call past the cap.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts_exhausted() {
            return None;
        }
        let current = self.delay;
        if let Some(max_elapsed) = self.policy.max_elapsed
            && self.elapsed().saturating_add(current) > max_elapsed
        {
            return None;
        }
        self.delay = self.policy.growth.next(current)?;
        self.slept = self.slept.saturating_add(current);
        Some(current)
    }
}

/// Blocks the calling thread between retries.
pub trait Sleeper {
    /// Sleeps for `delay`.
    fn sleep(&mut self, delay: Duration);
}

/// [`Sleeper`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Sends `request`, retrying server errors and connection resets according
/// to `policy`, and returns the decoded body of the first successful response.
///
/// # Errors
///
/// Returns `Client` for 4xx responses, `RetriesExhausted` when a bounded
/// policy gives up, `Transport` for non-reset transport failures and
/// `Decode` when a successful response body cannot be decoded.
pub fn send_with_retry(
    transport: &mut dyn Transport,
    request: &HttpRequest,
    policy: &BackoffPolicy,
    sleeper: &mut dyn Sleeper,
) -> Result<Option<Body>> {
    let mut backoff = Backoff::new(policy);

    loop {
        backoff.record_attempt();

        let response = match transport.send(request) {
            Ok(response) => response,
            Err(TransportError::ConnectionReset { reason }) => {
                warn!(uri = %request.uri, %reason, "connection reset, reconnecting");
                transport.reconnect();
                if backoff.attempts_exhausted() {
                    return Err(AppOpticsError::RetriesExhausted {
                        attempts: backoff.attempts(),
                        last_status: None,
                    });
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        info!("status code(<-): {}", response.status);

        if response.status < 400 {
            return Ok(decode_body(&response)?);
        }

        if response.status < 500 {
            let payload = decode_body(&response)
                .unwrap_or_else(|_| {
                    Some(Body::Text(
                        String::from_utf8_lossy(&response.body).into_owned(),
                    ))
                })
                .map(Body::into_value);
            return Err(ClientError::new(response.status, payload).into());
        }

        let Some(delay) = backoff.next_delay() else {
            return Err(AppOpticsError::RetriesExhausted {
                attempts: backoff.attempts(),
                last_status: Some(response.status),
            });
        };
        warn!(
            "{}: waiting {:?} before re-trying",
            response.status, delay
        );
        sleeper.sleep(delay);
    }
}
