//! Status-code driven retry policy.
//!
//! Only response status codes trigger a retry. Transport and middleware
//! failures end the call.

use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra sends after the first; zero disables retrying.
    pub max_attempts: usize,
    pub wait: Duration,
    pub status_codes: BTreeSet<u16>,
}

impl RetryPolicy {
    pub fn new<I>(max_attempts: usize, wait: Duration, status_codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        Self {
            max_attempts,
            wait,
            status_codes: status_codes.into_iter().collect(),
        }
    }

    /// No retries.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0 && !self.status_codes.is_empty()
    }

    /// Whether a response with `status` warrants another send, given the
    /// number of retries already made.
    pub fn should_retry(&self, attempts: usize, status: u16) -> bool {
        self.is_enabled() && attempts < self.max_attempts && self.status_codes.contains(&status)
    }
}
