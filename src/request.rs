//! Requests and their execution.
//!
//! `send` drives one call: request middleware, body buffering, the send
//! loop with redirects and status-code retries, then response middleware.
//! A request that failed to build returns its error before any of that.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
    LOCATION, SET_COOKIE, USER_AGENT,
};
use http::{Method, Uri};
use url::Url;

use crate::body::Body;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::{TransportRequest, TransportResponse};

pub struct Request {
    client: Client,
    method: Method,
    /// Absent only when the URL failed to parse.
    url: Option<Url>,
    headers: HeaderMap,
    body: Option<Body>,
    /// First build error; reported by `send` before anything runs.
    error: Option<Error>,
}

impl Request {
    pub(crate) fn new(client: Client, method: Method, url: &str) -> Self {
        let headers = client.config().default_headers.clone();
        let (url, error) = match Url::parse(url) {
            Ok(url) => (Some(url), None),
            Err(e) => (None, Some(Error::UrlParse(e))),
        };
        Self {
            client,
            method,
            url,
            headers,
            body: None,
            error,
        }
    }

    pub(crate) fn failed(client: Client, error: Error) -> Self {
        Self {
            client,
            method: Method::GET,
            url: None,
            headers: HeaderMap::new(),
            body: None,
            error: Some(error),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn url_mut(&mut self) -> Option<&mut Url> {
        self.url.as_mut()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_mut(&mut self) -> &mut Option<Body> {
        &mut self.body
    }

    /// Set a header, replacing any previous value.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: std::fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: std::fmt::Display,
    {
        if self.error.is_some() {
            return self;
        }
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(Error::invalid_request(format!("header name: {}", e))),
            (_, Err(e)) => {
                self.error = Some(Error::invalid_request(format!("header value: {}", e)))
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        self.header(AUTHORIZATION, crate::auth::bearer_auth(token))
    }

    pub fn basic_auth(self, username: &str, password: &str) -> Self {
        self.header(AUTHORIZATION, crate::auth::basic_auth(username, password))
    }

    /// Execute the request.
    pub async fn send(mut self) -> Result<Response> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let total = self.client.config().timeouts.total;
        let call = self.execute();
        match total {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| Error::TotalTimeout(limit))?,
            None => call.await,
        }
    }

    async fn execute(mut self) -> Result<Response> {
        let started = Instant::now();
        let client = self.client.clone();
        let config = client.config();

        config.request_middleware.apply(&mut self)?;
        let url = self
            .url
            .clone()
            .ok_or_else(|| Error::invalid_request("request has no URL"))?;

        let body = match self.body.take() {
            Some(_) if self.method == Method::HEAD => Bytes::new(),
            Some(body) => body.into_bytes().await?,
            None => Bytes::new(),
        };

        let mut attempts = 0;
        let (response, url) = loop {
            let (response, final_url) = self.send_once(&url, &body).await?;
            if !config.retry.should_retry(attempts, response.status) {
                break (response, final_url);
            }
            attempts += 1;
            tracing::debug!(
                "retrying {} {} after status {} (attempt {}/{})",
                self.method,
                url,
                response.status,
                attempts,
                config.retry.max_attempts
            );
            sleep(config.retry.wait).await;
        };

        let user_agent = self
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let remote_addr = if config.capture_remote_address {
            response.remote_addr
        } else {
            None
        };

        let mut response = Response::new(
            client.clone(),
            response,
            url,
            attempts,
            started.elapsed(),
            user_agent,
            remote_addr,
        );
        config.response_middleware.apply(&mut response)?;
        Ok(response)
    }

    /// One send, following redirects as the policy allows.
    async fn send_once(&self, url: &Url, body: &Bytes) -> Result<(TransportResponse, Url)> {
        let config = self.client.config();
        let cookies = config.cookie_store.as_ref();

        let mut method = self.method.clone();
        let mut url = url.clone();
        let mut headers = self.headers.clone();
        let mut body = body.clone();
        let mut hops = 0;
        let mut explicit = cookies
            .map(|store| explicit_cookies(&headers, store.get(&url).as_deref()))
            .unwrap_or_default();

        loop {
            let req = TransportRequest {
                method: method.clone(),
                uri: to_uri(&url)?,
                headers: headers.clone(),
                body: body.clone(),
            };
            let response = self.client.transport().round_trip(req).await?;

            let location = response
                .headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok());
            let Some(hop) = config
                .redirect
                .next_hop(response.status, &method, &url, location, hops)?
            else {
                return Ok((response, url));
            };

            if let Some(store) = cookies {
                store.set(&url, &set_cookie_values(&response.headers));
            }
            tracing::debug!("following {} redirect {} -> {}", response.status, url, hop.url);

            if hop.cross_host {
                headers.remove(HOST);
            }
            if hop.strip_credentials {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
                explicit.clear();
            }
            if let Some(store) = cookies {
                headers.remove(COOKIE);
                if let Some(value) = merge_cookies(&explicit, store.get(&hop.url))
                    .and_then(|v| HeaderValue::from_str(&v).ok())
                {
                    headers.insert(COOKIE, value);
                }
            }
            if !hop.keep_body {
                body = Bytes::new();
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            method = hop.method;
            url = hop.url;
            hops += 1;
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

async fn sleep(wait: Duration) {
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}

pub(crate) fn set_cookie_values(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn cookie_pairs(header: &str) -> impl Iterator<Item = &str> {
    header.split(';').map(str::trim).filter(|pair| !pair.is_empty())
}

/// Cookie pairs on the request that did not come from the store.
fn explicit_cookies(headers: &HeaderMap, stored: Option<&str>) -> Vec<String> {
    let Some(sent) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    let mut stored: Vec<&str> = stored.map(|s| cookie_pairs(s).collect()).unwrap_or_default();
    cookie_pairs(sent)
        .filter(|pair| match stored.iter().position(|s| s == pair) {
            Some(i) => {
                stored.swap_remove(i);
                false
            }
            None => true,
        })
        .map(str::to_string)
        .collect()
}

/// `Cookie` value for a redirect hop: explicit pairs first, then the store's.
fn merge_cookies(explicit: &[String], stored: Option<String>) -> Option<String> {
    let mut pairs = explicit.to_vec();
    if let Some(stored) = stored {
        pairs.extend(cookie_pairs(&stored).map(str::to_string));
    }
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

fn to_uri(url: &Url) -> Result<Uri> {
    let mut url = url.clone();
    url.set_fragment(None);
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| Error::invalid_request(format!("invalid URI {}: {}", url, e)))
}

/// Parse a raw HTTP/1.1 request. Malformed input is a build error.
pub(crate) fn parse_raw(raw: &str, scheme: &str) -> Result<(Method, String, HeaderMap, Bytes)> {
    let raw = raw.trim_start();
    let mut header_buf = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_buf);
    let head_len = match parsed.parse(raw.as_bytes()) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err(Error::invalid_request("raw request is missing the blank line after its headers"))
        }
        Err(e) => return Err(Error::invalid_request(format!("malformed raw request: {}", e))),
    };

    let method = parsed
        .method
        .ok_or_else(|| Error::invalid_request("raw request has no method"))
        .and_then(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|e| Error::invalid_request(format!("bad method: {}", e)))
        })?;
    let path = parsed
        .path
        .ok_or_else(|| Error::invalid_request("raw request has no path"))?;

    let mut headers = HeaderMap::new();
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| Error::invalid_request(format!("header name: {}", e)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| Error::invalid_request(format!("header value: {}", e)))?;
        headers.append(name, value);
    }

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::invalid_request("raw request has no Host header"))?
        .to_string();
    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}://{}{}", scheme, host, path)
    };

    let mut body = Bytes::copy_from_slice(&raw.as_bytes()[head_len..]);
    if let Some(len) = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        body.truncate(len);
    }
    headers.remove(CONTENT_LENGTH);
    headers.remove(HOST);
    Ok((method, url, headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_uri_drops_fragment() {
        let url = Url::parse("https://example.com/p?q=1#frag").unwrap();
        assert_eq!(to_uri(&url).unwrap().to_string(), "https://example.com/p?q=1");
    }

    #[test]
    fn test_explicit_cookies_exclude_stored_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("manual=1; sid=old; theme=dark"));
        let explicit = explicit_cookies(&headers, Some("sid=old; theme=dark"));
        assert_eq!(explicit, vec!["manual=1"]);

        assert_eq!(
            explicit_cookies(&headers, None),
            vec!["manual=1", "sid=old", "theme=dark"]
        );
        assert!(explicit_cookies(&HeaderMap::new(), Some("sid=old")).is_empty());
    }

    #[test]
    fn test_merge_cookies() {
        let explicit = vec!["manual=1".to_string()];
        assert_eq!(
            merge_cookies(&explicit, Some("sid=new".to_string())).as_deref(),
            Some("manual=1; sid=new")
        );
        assert_eq!(merge_cookies(&explicit, None).as_deref(), Some("manual=1"));
        assert_eq!(merge_cookies(&[], None), None);
    }

    #[test]
    fn test_parse_raw() {
        let raw = "POST /submit?x=1 HTTP/1.1\r\nHost: example.com\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello trailing";
        let (method, url, headers, body) = parse_raw(raw, "https").unwrap();
        assert_eq!(method, Method::POST);
        assert_eq!(url, "https://example.com/submit?x=1");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert!(headers.get(HOST).is_none());
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn test_parse_raw_malformed() {
        assert!(matches!(
            parse_raw("GET / HTTP/1.1\r\nHost: a\r\n", "http"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_raw("GET / HTTP/1.1\r\n\r\n", "http"),
            Err(Error::InvalidRequest(_))
        ));
        assert!(parse_raw("\u{1}\u{2} nonsense\r\n\r\n", "http").is_err());
    }

    #[test]
    fn test_set_cookie_values() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        assert_eq!(set_cookie_values(&headers), vec!["a=1", "b=2"]);
    }
}
