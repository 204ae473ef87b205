//! Timeout configuration for HTTP requests.
//!
//! # Timeout Types
//!
//! - **connect**: TCP connect, including any proxy tunnel setup
//! - **handshake**: TLS or QUIC handshake
//! - **total**: absolute deadline for one call, redirects and retries included
//! - **idle**: how long an unused connection may sit in a sub-transport
//!
//! # Usage
//!
//! ```rust,ignore
//! use guise::{Client, Timeouts};
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .timeouts(Timeouts::default().connect(Duration::from_secs(5)))
//!     .build()?;
//! ```

use std::time::Duration;

/// Timeout configuration for HTTP requests.
///
/// When a value is `None`, no timeout is applied for that phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for establishing the TCP connection (and proxy tunnel).
    pub connect: Option<Duration>,

    /// Deadline for the TLS or QUIC handshake.
    pub handshake: Option<Duration>,

    /// Absolute deadline for a call.
    ///
    /// Covers middleware, every retry attempt with its wait, and redirects.
    pub total: Option<Duration>,

    /// Idle connections older than this are not reused.
    pub idle: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(30)),
            handshake: Some(Duration::from_secs(10)),
            total: Some(Duration::from_secs(30)),
            idle: Some(Duration::from_secs(20)),
        }
    }
}

impl Timeouts {
    /// No timeouts at all.
    pub fn none() -> Self {
        Self {
            connect: None,
            handshake: None,
            total: None,
            idle: None,
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set handshake timeout.
    pub fn handshake(mut self, timeout: Duration) -> Self {
        self.handshake = Some(timeout);
        self
    }

    /// Set total request deadline.
    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    /// Set idle connection lifetime.
    pub fn idle(mut self, timeout: Duration) -> Self {
        self.idle = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.connect, Some(Duration::from_secs(30)));
        assert_eq!(t.handshake, Some(Duration::from_secs(10)));
        assert_eq!(t.total, Some(Duration::from_secs(30)));
        assert_eq!(t.idle, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_builder_chain() {
        let t = Timeouts::none()
            .connect(Duration::from_secs(1))
            .total(Duration::from_secs(2));
        assert_eq!(t.connect, Some(Duration::from_secs(1)));
        assert_eq!(t.handshake, None);
        assert_eq!(t.total, Some(Duration::from_secs(2)));
        assert_eq!(t.idle, None);
    }
}
