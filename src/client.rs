//! Client and builder.
//!
//! A [`Client`] is cheap to clone; clones share configuration, the cookie
//! store and the connection cache. `build` resolves the fingerprint and the
//! proxy once and picks exactly one transport.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;

use crate::cookie::{CookieJar, CookieStore};
use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintSpec, Http2Settings, Profile, QuicTemplate, TlsFingerprint};
use crate::middleware::{
    self, Chain, ClientMiddleware, RequestMiddleware, ResponseMiddleware, BUILTIN_PRIORITY,
};
use crate::proxy::{Proxy, ProxyEndpoint};
use crate::redirect::RedirectPolicy;
use crate::request::{self, Request};
use crate::retry::RetryPolicy;
use crate::timeouts::Timeouts;
use crate::transport::connector::{BoringConnector, Connector, TlsOptions};
use crate::transport::dialer::Dialer;
use crate::transport::h3::{QuicOptions, QuicTransport};
use crate::transport::resolver::{DnsResolver, Resolve, SystemResolver};
use crate::transport::roundtripper::{FingerprintRoundTripper, RoundTripperOptions};
use crate::transport::{PoolOptions, Transport, TransportKind};

/// How the `User-Agent` header is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgent {
    Fixed(String),
    /// A random pick for every request.
    Random(Vec<String>),
}

/// Everything a client is built from. Client-setup middleware receives it
/// mutably right before the transport is constructed.
#[derive(Clone)]
pub struct ClientConfig {
    pub fingerprint: FingerprintSpec,
    pub user_agent: Option<UserAgent>,
    pub force_http1: bool,
    pub http3: bool,
    pub h2c: bool,
    pub proxy: Proxy,
    pub dns_server: Option<SocketAddr>,
    pub resolver: Option<Arc<dyn Resolve>>,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub redirect: RedirectPolicy,
    pub cookie_store: Option<Arc<dyn CookieStore>>,
    pub tls_sessions: bool,
    pub pool: PoolOptions,
    pub compression: bool,
    pub local_address: Option<IpAddr>,
    pub root_certs: Vec<Vec<u8>>,
    pub verify_certs: bool,
    pub default_headers: HeaderMap,
    pub capture_remote_address: bool,
    pub client_middleware: Chain<ClientMiddleware>,
    pub request_middleware: Chain<RequestMiddleware>,
    pub response_middleware: Chain<ResponseMiddleware>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let profile = Profile::default();
        Self {
            fingerprint: profile.spec(),
            user_agent: Some(UserAgent::Fixed(profile.user_agent().to_string())),
            force_http1: false,
            http3: false,
            h2c: false,
            proxy: Proxy::None,
            dns_server: None,
            resolver: None,
            timeouts: Timeouts::default(),
            retry: RetryPolicy::disabled(),
            redirect: RedirectPolicy::default(),
            cookie_store: None,
            tls_sessions: false,
            pool: PoolOptions::default(),
            compression: true,
            local_address: None,
            root_certs: Vec::new(),
            verify_certs: true,
            default_headers: HeaderMap::new(),
            capture_remote_address: false,
            client_middleware: Chain::new(),
            request_middleware: Chain::new(),
            response_middleware: Chain::new(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("profile", &self.fingerprint.tls.profile())
            .field("user_agent", &self.user_agent)
            .field("force_http1", &self.force_http1)
            .field("http3", &self.http3)
            .field("h2c", &self.h2c)
            .field("proxy", &self.proxy)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .field("redirect", &self.redirect)
            .field("cookies", &self.cookie_store.is_some())
            .field("request_middleware", &self.request_middleware)
            .field("response_middleware", &self.response_middleware)
            .finish()
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Transport,
}

/// HTTP client presenting a browser fingerprint.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client with the default browser profile.
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Addresses with a negotiated, cached sub-transport.
    pub fn cached_connections(&self) -> usize {
        self.inner.transport.cached_connections()
    }

    /// TLS or QUIC handshakes completed so far.
    pub fn handshakes(&self) -> usize {
        self.inner.transport.handshakes()
    }

    /// Close idle connections and forget every negotiated address. Requests
    /// in flight keep their connections. Returns how many entries were dropped.
    pub fn close_idle_connections(&self) -> usize {
        self.inner.transport.close_idle_connections()
    }

    pub fn request(&self, method: Method, url: &str) -> Request {
        Request::new(self.clone(), method, url)
    }

    pub fn get(&self, url: &str) -> Request {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Request {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> Request {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> Request {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> Request {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> Request {
        self.request(Method::HEAD, url)
    }

    /// Request from raw HTTP/1.1 text, sent over `scheme`.
    pub fn raw(&self, raw: &str, scheme: &str) -> Request {
        match request::parse_raw(raw, scheme) {
            Ok((method, url, headers, body)) => {
                let mut req = Request::new(self.clone(), method, &url);
                req.headers_mut().extend(headers);
                req.body(body)
            }
            Err(e) => Request::failed(self.clone(), e),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport_kind())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`Client`].
#[must_use]
pub struct ClientBuilder {
    config: ClientConfig,
    error: Option<Error>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            error: None,
        }
    }

    /// Use a browser profile for TLS, HTTP/2, QUIC and User-Agent.
    pub fn impersonate(mut self, profile: Profile) -> Self {
        let verbatim = self.config.fingerprint.tls.verbatim_fingerprint().cloned();
        self.config.fingerprint = profile.spec();
        // A verbatim template set earlier still wins.
        if let Some(fp) = verbatim {
            self.config.fingerprint.tls.set_verbatim(fp);
        }
        self.config.user_agent = Some(UserAgent::Fixed(profile.user_agent().to_string()));
        self
    }

    /// Send this exact ClientHello template; takes precedence over any profile.
    pub fn tls_fingerprint(mut self, fingerprint: TlsFingerprint) -> Self {
        self.config.fingerprint.tls.set_verbatim(fingerprint);
        self
    }

    pub fn http2_settings(mut self, settings: Http2Settings) -> Self {
        self.config.fingerprint.http2 = Some(settings);
        self
    }

    pub fn quic_template(mut self, template: QuicTemplate) -> Self {
        self.config.fingerprint.quic = Some(template);
        self
    }

    /// Never offer HTTP/2 in ALPN.
    pub fn force_http1(mut self) -> Self {
        self.config.force_http1 = true;
        self
    }

    /// Use HTTP/3 when the proxy configuration allows it.
    pub fn http3(mut self) -> Self {
        self.config.http3 = true;
        self
    }

    /// HTTP/2 with prior knowledge for `http://` targets.
    pub fn h2c(mut self) -> Self {
        self.config.h2c = true;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.config.proxy = proxy;
        self
    }

    /// Resolve names through this DNS server.
    pub fn dns(mut self, server: SocketAddr) -> Self {
        self.config.dns_server = Some(server);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.config.resolver = Some(resolver);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Resend up to `max_attempts` more times while the status is in `codes`.
    pub fn retry<I>(mut self, max_attempts: usize, wait: Duration, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.config.retry = RetryPolicy::new(max_attempts, wait, codes);
        self
    }

    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.config.redirect = policy;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.redirect = self.config.redirect.with_max_redirects(max);
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.config.redirect = RedirectPolicy::none();
        self
    }

    pub fn follow_only_same_host(mut self) -> Self {
        self.config.redirect = self.config.redirect.same_host_only();
        self
    }

    /// Send `Authorization` and `Cookie` on to redirect targets on other hosts.
    pub fn forward_headers_on_redirect(mut self) -> Self {
        self.config.redirect = self.config.redirect.forward_headers();
        self
    }

    /// Keep cookies and TLS sessions across requests.
    pub fn session(mut self) -> Self {
        if self.config.cookie_store.is_none() {
            self.config.cookie_store = Some(Arc::new(CookieJar::new()));
        }
        self.config.tls_sessions = true;
        self
    }

    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.config.cookie_store = Some(store);
        self
    }

    pub fn disable_keep_alive(mut self) -> Self {
        self.config.pool.keep_alive = false;
        self
    }

    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool.max_idle_per_host = max;
        self
    }

    /// Leave response bodies encoded.
    pub fn disable_compression(mut self) -> Self {
        self.config.compression = false;
        self
    }

    pub fn local_address(mut self, addr: IpAddr) -> Self {
        self.config.local_address = Some(addr);
        self
    }

    /// Trust an extra root, PEM or DER.
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.config.root_certs.push(cert.into());
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.verify_certs = !accept;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = Some(UserAgent::Fixed(ua.into()));
        self
    }

    /// Pick a random User-Agent from `list` for each request.
    pub fn random_user_agent<I, S>(mut self, list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.user_agent = Some(UserAgent::Random(
            list.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.with_builtin_request(middleware::request::bearer_auth(token.into()))
    }

    pub fn basic_auth(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.with_builtin_request(middleware::request::basic_auth(
            username.into(),
            password.into(),
        ))
    }

    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        self.with_builtin_request(middleware::request::content_type(content_type.into()))
    }

    /// Header sent with every request unless the request sets it.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: fmt::Display,
        V: TryInto<HeaderValue>,
        V::Error: fmt::Display,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.config.default_headers.insert(name, value);
            }
            (Err(e), _) => self.fail(Error::invalid_request(format!("header name: {}", e))),
            (_, Err(e)) => self.fail(Error::invalid_request(format!("header value: {}", e))),
        }
        self
    }

    /// Record the peer address on every response.
    pub fn remote_address(mut self) -> Self {
        self.config.capture_remote_address = true;
        self
    }

    pub fn with_client_middleware<F>(self, priority: i32, f: F) -> Self
    where
        F: Fn(&mut ClientConfig) + Send + Sync + 'static,
    {
        self.register_client_middleware(priority, Arc::new(f))
    }

    pub fn with_request_middleware<F>(self, priority: i32, f: F) -> Self
    where
        F: Fn(&mut Request) -> Result<()> + Send + Sync + 'static,
    {
        self.register_request_middleware(priority, Arc::new(f))
    }

    pub fn with_response_middleware<F>(self, priority: i32, f: F) -> Self
    where
        F: Fn(&mut crate::Response) -> Result<()> + Send + Sync + 'static,
    {
        self.register_response_middleware(priority, Arc::new(f))
    }

    pub fn register_client_middleware(mut self, priority: i32, f: Arc<ClientMiddleware>) -> Self {
        self.config.client_middleware.register(priority, f);
        self
    }

    pub fn register_request_middleware(
        mut self,
        priority: i32,
        f: Arc<RequestMiddleware>,
    ) -> Self {
        self.config.request_middleware.register(priority, f);
        self
    }

    pub fn register_response_middleware(
        mut self,
        priority: i32,
        f: Arc<ResponseMiddleware>,
    ) -> Self {
        self.config.response_middleware.register(priority, f);
        self
    }

    fn with_builtin_request(mut self, f: Arc<RequestMiddleware>) -> Self {
        self.config.request_middleware.register(BUILTIN_PRIORITY, f);
        self
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn build(self) -> Result<Client> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut config = self.config;

        let setup = config.client_middleware.clone();
        setup.apply(&mut config);
        install_builtins(&mut config);
        config.pool.idle_timeout = config.timeouts.idle;

        let transport = build_transport(&config)?;
        tracing::debug!("built client with {:?} transport", transport.kind());
        Ok(Client {
            inner: Arc::new(ClientInner { config, transport }),
        })
    }
}

fn install_builtins(config: &mut ClientConfig) {
    let request = &mut config.request_middleware;
    request.register(BUILTIN_PRIORITY, Arc::new(middleware::request::user_agent));
    if config.cookie_store.is_some() {
        request.register(BUILTIN_PRIORITY, Arc::new(middleware::request::attach_cookies));
    }
    if config.compression {
        request.register(BUILTIN_PRIORITY, Arc::new(middleware::request::accept_encoding));
    }

    let response = &mut config.response_middleware;
    response.register(BUILTIN_PRIORITY, Arc::new(middleware::response::reject_upgrade));
    if config.cookie_store.is_some() {
        response.register(BUILTIN_PRIORITY, Arc::new(middleware::response::store_cookies));
    }
    if config.compression {
        response.register(BUILTIN_PRIORITY, Arc::new(middleware::response::decode_body));
    }
}

fn build_resolver(config: &ClientConfig) -> Arc<dyn Resolve> {
    match (&config.resolver, config.dns_server) {
        (Some(resolver), _) => resolver.clone(),
        (None, Some(server)) => Arc::new(DnsResolver::new(server)),
        (None, None) => Arc::new(SystemResolver),
    }
}

/// HTTP/3 needs a path for datagrams: no proxy, or a SOCKS5 one.
fn quic_allowed(config: &ClientConfig, proxy: Option<&ProxyEndpoint>) -> bool {
    if !config.http3 || config.force_http1 {
        return false;
    }
    match proxy {
        Some(proxy) if !proxy.carries_datagrams() => {
            tracing::debug!(
                "proxy {} cannot carry QUIC, using the TLS transport",
                proxy.address()
            );
            false
        }
        _ => true,
    }
}

fn build_transport(config: &ClientConfig) -> Result<Transport> {
    let resolver = build_resolver(config);
    let proxy = config.proxy.resolve()?;
    let mut tls = config.fingerprint.tls.resolve();

    if quic_allowed(config, proxy.as_ref()) {
        let options = QuicOptions {
            template: config.fingerprint.quic.clone().unwrap_or_default(),
            tls,
            root_certs: config.root_certs.clone(),
            verify: config.verify_certs,
            timeouts: config.timeouts.clone(),
            local_address: config.local_address,
        };
        return Ok(Transport::Quic(QuicTransport::new(options, resolver, proxy)?));
    }

    if config.force_http1 {
        tls = tls.without_h2();
    }
    let tls = BoringConnector::new(
        tls,
        &TlsOptions {
            root_certs: config.root_certs.clone(),
            verify: config.verify_certs,
            sessions: config.tls_sessions,
            handshake_timeout: config.timeouts.handshake,
        },
    )?;
    let dialer = Dialer::new(resolver)
        .with_proxy(proxy)
        .with_connect_timeout(config.timeouts.connect)
        .with_local_address(config.local_address);
    let options = RoundTripperOptions {
        http2: config.fingerprint.http2.clone(),
        pool: config.pool.clone(),
        h2c: config.h2c,
    };
    Ok(Transport::Tls(FingerprintRoundTripper::new(
        Connector::new(dialer, tls),
        options,
    )))
}
