//! RFC 6265 cookies and the cookie store used by the client.
//!
//! The store is optional: without one, the cookie middlewares do nothing.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;
use url::Url;

use crate::error::{Error, Result};

/// RFC 6265 cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// No `Domain` attribute: only the exact origin host matches.
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: normalize_domain(&domain.into()),
            path: "/".to_string(),
            host_only: true,
            secure: false,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    /// Parse one `Set-Cookie` value received from `url`.
    pub fn parse(header: &str, url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::CookieParse("No host in URL".to_string()))?;

        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts
            .next()
            .and_then(|pair| pair.split_once('='))
            .ok_or_else(|| Error::CookieParse("No = in cookie".to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::CookieParse("Empty cookie name".to_string()));
        }

        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'), host);
        cookie.path = default_path(url);
        let mut max_age = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
                None => (attr.to_ascii_lowercase(), ""),
            };
            match key.as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "domain" if !val.is_empty() => {
                    let domain = normalize_domain(val);
                    if !domain_matches(&host.to_ascii_lowercase(), &domain) {
                        return Err(Error::CookieParse(format!(
                            "domain {} does not cover {}",
                            domain, host
                        )));
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.starts_with('/') => cookie.path = val.to_string(),
                "expires" => cookie.expires = parse_cookie_date(val),
                "max-age" => max_age = val.parse::<i64>().ok(),
                "samesite" => cookie.same_site = Some(val.to_string()),
                _ => {}
            }
        }
        // Max-Age wins over Expires.
        if let Some(seconds) = max_age {
            cookie.expires = Some(if seconds <= 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                Utc::now() + ChronoDuration::seconds(seconds.min(i64::from(u32::MAX)))
            });
        }
        Ok(cookie)
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= Utc::now())
    }

    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        if self.is_expired() {
            return false;
        }
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok && path_matches(url.path(), &self.path)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Storage the client consults for every request and response.
pub trait CookieStore: Send + Sync {
    /// Value for the `Cookie` header, if any cookie applies.
    fn get(&self, url: &Url) -> Option<String>;

    /// Store the `Set-Cookie` values received from `url`.
    fn set(&self, url: &Url, set_cookies: &[String]);
}

/// In-memory cookie jar, shared between clones of a client.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<HashMap<(String, String, String), Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cookie: Cookie) {
        let key = (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone());
        if cookie.is_expired() {
            self.cookies.write().remove(&key);
        } else {
            self.cookies.write().insert(key, cookie);
        }
    }

    /// Cookies that apply to `url`, longest path first.
    pub fn matching(&self, url: &Url) -> Vec<Cookie> {
        let mut found: Vec<Cookie> = self
            .cookies
            .read()
            .values()
            .filter(|c| c.matches(url))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        found
    }

    pub fn all(&self) -> Vec<Cookie> {
        self.cookies.read().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }
}

impl CookieStore for CookieJar {
    fn get(&self, url: &Url) -> Option<String> {
        let cookies = self.matching(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(Cookie::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn set(&self, url: &Url, set_cookies: &[String]) {
        for raw in set_cookies {
            match Cookie::parse(raw, url) {
                Ok(cookie) => self.insert(cookie),
                Err(e) => tracing::debug!("ignoring Set-Cookie from {}: {}", url, e),
            }
        }
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.strip_prefix('.').unwrap_or(domain).to_ascii_lowercase()
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')))
}

/// Directory of the request path (RFC 6265 5.1.4).
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn parse_cookie_date(date_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d-%b-%y %H:%M:%S GMT"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}
