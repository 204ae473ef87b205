//! Redirect policy.
//!
//! 301/302/303 become a body-less GET (HEAD stays HEAD); 307/308 replay
//! the method and body. Credentials do not follow a redirect to another
//! host unless the policy forwards headers.

use http::Method;
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    max_redirects: usize,
    same_host_only: bool,
    forward_headers: bool,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::limited(DEFAULT_MAX_REDIRECTS)
    }
}

/// Next hop of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub method: Method,
    pub url: Url,
    /// Replay the request body.
    pub keep_body: bool,
    /// The host changed.
    pub cross_host: bool,
    /// `Authorization` and `Cookie` must be dropped before this hop.
    pub strip_credentials: bool,
}

impl RedirectPolicy {
    pub fn limited(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            same_host_only: false,
            forward_headers: false,
        }
    }

    /// Return redirect responses as they are.
    pub fn none() -> Self {
        Self::limited(0)
    }

    /// Stop at a redirect that leaves the current host.
    pub fn same_host_only(mut self) -> Self {
        self.same_host_only = true;
        self
    }

    /// Keep `Authorization` and `Cookie` when a redirect changes host.
    pub fn forward_headers(mut self) -> Self {
        self.forward_headers = true;
        self
    }

    /// Same policy with a different hop limit.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn forwards_headers(&self) -> bool {
        self.forward_headers
    }

    /// Decide what to do with a response.
    ///
    /// `Ok(None)` means the response is final. `hops` is the number of
    /// redirects already followed.
    pub fn next_hop(
        &self,
        status: u16,
        method: &Method,
        current: &Url,
        location: Option<&str>,
        hops: usize,
    ) -> Result<Option<Hop>> {
        if !matches!(status, 301 | 302 | 303 | 307 | 308) || self.max_redirects == 0 {
            return Ok(None);
        }
        let Some(location) = location else {
            return Ok(None);
        };

        let url = current
            .join(location)
            .map_err(|e| Error::InvalidRedirectUrl(format!("{}: {}", location, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRedirectUrl(url.to_string()));
        }

        let cross_host = url.host_str() != current.host_str();
        if cross_host && self.same_host_only {
            tracing::debug!("not following redirect from {} to {}", current, url);
            return Ok(None);
        }
        if hops >= self.max_redirects {
            return Err(Error::RedirectLimit { count: hops });
        }

        let (method, keep_body) = match status {
            307 | 308 => (method.clone(), true),
            _ if method == Method::HEAD => (Method::HEAD, false),
            _ => (Method::GET, false),
        };
        Ok(Some(Hop {
            method,
            url,
            keep_body,
            cross_host,
            strip_credentials: cross_host && !self.forward_headers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/a/b").unwrap()
    }

    #[test]
    fn test_see_other_becomes_get() {
        let hop = RedirectPolicy::default()
            .next_hop(303, &Method::POST, &base(), Some("/done"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(hop.method, Method::GET);
        assert_eq!(hop.url.as_str(), "https://example.com/done");
        assert!(!hop.keep_body);
        assert!(!hop.cross_host);
    }

    #[test]
    fn test_head_stays_head() {
        let hop = RedirectPolicy::default()
            .next_hop(302, &Method::HEAD, &base(), Some("c"), 0)
            .unwrap()
            .unwrap();
        assert_eq!(hop.method, Method::HEAD);
        assert_eq!(hop.url.as_str(), "https://example.com/a/c");
    }

    #[test]
    fn test_temporary_redirect_keeps_method_and_body() {
        let hop = RedirectPolicy::default()
            .next_hop(307, &Method::PUT, &base(), Some("https://other.org/x"), 3)
            .unwrap()
            .unwrap();
        assert_eq!(hop.method, Method::PUT);
        assert!(hop.keep_body);
        assert!(hop.cross_host);
        assert!(hop.strip_credentials);
    }

    #[test]
    fn test_forward_headers_keeps_credentials() {
        let policy = RedirectPolicy::default().forward_headers();
        assert!(policy.forwards_headers());
        let hop = policy
            .next_hop(302, &Method::GET, &base(), Some("https://other.org/x"), 0)
            .unwrap()
            .unwrap();
        assert!(hop.cross_host);
        assert!(!hop.strip_credentials);

        let same = RedirectPolicy::default()
            .next_hop(302, &Method::GET, &base(), Some("/x"), 0)
            .unwrap()
            .unwrap();
        assert!(!same.strip_credentials);
    }

    #[test]
    fn test_with_max_redirects_keeps_flags() {
        let policy = RedirectPolicy::default()
            .forward_headers()
            .same_host_only()
            .with_max_redirects(3);
        assert_eq!(policy.max_redirects(), 3);
        assert!(policy.forwards_headers());
        assert!(policy
            .next_hop(302, &Method::GET, &base(), Some("https://other.org/"), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_limit() {
        let err = RedirectPolicy::limited(2)
            .next_hop(302, &Method::GET, &base(), Some("/x"), 2)
            .unwrap_err();
        assert!(matches!(err, Error::RedirectLimit { count: 2 }));
    }

    #[test]
    fn test_not_followed() {
        let policy = RedirectPolicy::default();
        assert!(policy
            .next_hop(200, &Method::GET, &base(), Some("/x"), 0)
            .unwrap()
            .is_none());
        assert!(policy
            .next_hop(302, &Method::GET, &base(), None, 0)
            .unwrap()
            .is_none());
        assert!(RedirectPolicy::none()
            .next_hop(302, &Method::GET, &base(), Some("/x"), 0)
            .unwrap()
            .is_none());
        assert!(RedirectPolicy::default()
            .same_host_only()
            .next_hop(302, &Method::GET, &base(), Some("https://other.org/"), 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_non_http_target_rejected() {
        let err = RedirectPolicy::default()
            .next_hop(302, &Method::GET, &base(), Some("ftp://example.com/"), 0)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRedirectUrl(_)));
    }
}
