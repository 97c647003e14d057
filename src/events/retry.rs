//! Bounded retry of a single listener delivery
//!
//! [`RetryBackOffDeliver`] invokes one listener with one event. A failed
//! attempt is retried after an exponentially growing delay, jittered so that
//! many listeners failing together (a backend outage) do not retry in
//! lockstep. Once `max_retries` retries are exhausted the delivery is
//! abandoned: the failure is reported and nothing is returned to the
//! dispatcher as an error.
//!
//! Every retry and every abandonment goes to a [`DeliveryReporter`]. The
//! default [`LogReporter`] writes them to the log.

use futures::FutureExt;
use log::{debug, error, warn};
use rand::Rng;
use serde::Deserialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::listener::MailboxListener;
use crate::events::{Event, EventId, EventKind};
use crate::types::MailboxId;

pub const DEFAULT_MAX_RETRIES: usize = 8;
pub const DEFAULT_FIRST_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_JITTER_FACTOR: f64 = 0.5;

/// Retry policy of listener deliveries
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryBackoffConfiguration {
    pub max_retries: usize,
    pub first_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryBackoffConfiguration {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            first_backoff_ms: DEFAULT_FIRST_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryBackoffConfiguration {
    pub fn new(max_retries: usize, first_backoff: Duration, max_backoff: Duration, jitter_factor: f64) -> Result<Self> {
        let configuration = Self {
            max_retries,
            first_backoff_ms: first_backoff.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
            jitter_factor,
        };
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(Error::Config(format!(
                "jitter_factor must be between 0 and 1, got {}",
                self.jitter_factor
            )));
        }
        if self.first_backoff_ms > self.max_backoff_ms {
            return Err(Error::Config(format!(
                "first_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.first_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn first_backoff(&self) -> Duration {
        Duration::from_millis(self.first_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay before the given retry (1 for the first retry)
    ///
    /// The base delay doubles on each retry from `first_backoff`, capped at
    /// `max_backoff`. Jitter moves it by at most `jitter_factor` of itself
    /// while keeping it within `[first_backoff, max_backoff]`.
    pub fn backoff_for<R: Rng + ?Sized>(&self, retry: usize, rng: &mut R) -> Duration {
        let first = self.first_backoff_ms as f64;
        let max = self.max_backoff_ms as f64;
        let exponent = retry.saturating_sub(1).min(62) as i32;
        let base = (first * 2f64.powi(exponent)).min(max);

        let offset = base * self.jitter_factor;
        let low = (first - base).max(-offset);
        let high = (max - base).min(offset);
        let jitter = if high > low { rng.gen_range(low..=high) } else { 0.0 };

        Duration::from_millis((base + jitter).max(0.0).round() as u64)
    }
}

/// Context of a failed delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub listener: String,
    pub event_id: EventId,
    pub event_kind: EventKind,
    pub mailbox_id: MailboxId,
    pub cause: String,
}

impl DeliveryFailure {
    fn new(listener: &dyn MailboxListener, event: &Event, cause: &Error) -> Self {
        Self {
            listener: listener.identity(),
            event_id: event.id,
            event_kind: event.kind(),
            mailbox_id: event.mailbox.id,
            cause: cause.to_string(),
        }
    }
}

/// Sink for retry and abandonment notices
pub trait DeliveryReporter: Send + Sync {
    fn retrying(&self, failure: &DeliveryFailure, retry: usize, delay: Duration);

    fn abandoned(&self, failure: &DeliveryFailure, attempts: usize);
}

/// Reports delivery failures to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl DeliveryReporter for LogReporter {
    fn retrying(&self, failure: &DeliveryFailure, retry: usize, delay: Duration) {
        warn!(
            "Delivery failed, retry {} in {:?}: listener={} event={} kind={} mailbox={} cause={}",
            retry, delay, failure.listener, failure.event_id, failure.event_kind, failure.mailbox_id, failure.cause
        );
    }

    fn abandoned(&self, failure: &DeliveryFailure, attempts: usize) {
        error!(
            "Delivery abandoned after {} attempts: listener={} event={} kind={} mailbox={} cause={}",
            attempts, failure.listener, failure.event_id, failure.event_kind, failure.mailbox_id, failure.cause
        );
    }
}

/// Result of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    Abandoned { attempts: usize, cause: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Delivers one event to one listener, retrying with backoff
#[derive(Clone)]
pub struct RetryBackOffDeliver {
    configuration: RetryBackoffConfiguration,
    reporter: Arc<dyn DeliveryReporter>,
}

impl RetryBackOffDeliver {
    pub fn new(configuration: RetryBackoffConfiguration) -> Self {
        Self::with_reporter(configuration, Arc::new(LogReporter))
    }

    pub fn with_reporter(configuration: RetryBackoffConfiguration, reporter: Arc<dyn DeliveryReporter>) -> Self {
        Self {
            configuration,
            reporter,
        }
    }

    pub fn configuration(&self) -> &RetryBackoffConfiguration {
        &self.configuration
    }

    /// Invoke the listener at most `max_retries + 1` times
    pub async fn deliver(&self, listener: &dyn MailboxListener, event: &Event) -> DeliveryOutcome {
        let mut retry = 0;
        loop {
            match attempt(listener, event).await {
                Ok(()) => {
                    if retry > 0 {
                        debug!(
                            "Delivered event {} to {} after {} retries",
                            event.id,
                            listener.identity(),
                            retry
                        );
                    }
                    return DeliveryOutcome::Delivered { attempts: retry + 1 };
                }
                Err(e) => {
                    let failure = DeliveryFailure::new(listener, event, &e);
                    if retry >= self.configuration.max_retries {
                        self.reporter.abandoned(&failure, retry + 1);
                        return DeliveryOutcome::Abandoned {
                            attempts: retry + 1,
                            cause: failure.cause,
                        };
                    }

                    retry += 1;
                    let delay = {
                        let mut rng = rand::thread_rng();
                        self.configuration.backoff_for(retry, &mut rng)
                    };
                    self.reporter.retrying(&failure, retry, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// One invocation of the listener. A panic counts as a failed attempt.
async fn attempt(listener: &dyn MailboxListener, event: &Event) -> Result<()> {
    match AssertUnwindSafe(listener.event(event)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Listener(format!("listener panicked: {}", panic_message(&*panic)))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
