//! Raw TCP dialing, optionally through an HTTP CONNECT or SOCKS5 proxy.
//!
//! Returns a plain stream positioned at the start of the target's byte
//! stream; TLS is layered on top by the connector.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{Error, Result};
use crate::proxy::{ProxyEndpoint, ProxyScheme};
use crate::transport::resolver::{first_addr, resolve_host, Resolve};
use crate::transport::socks5::{self, TargetAddr};

const KEEPALIVE: Duration = Duration::from_secs(30);
const MAX_CONNECT_REPLY: usize = 8 * 1024;

/// Opens TCP connections for the TLS path.
#[derive(Clone)]
pub struct Dialer {
    resolver: Arc<dyn Resolve>,
    proxy: Option<ProxyEndpoint>,
    connect_timeout: Option<Duration>,
    local_address: Option<IpAddr>,
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("proxy", &self.proxy)
            .field("connect_timeout", &self.connect_timeout)
            .field("local_address", &self.local_address)
            .finish()
    }
}

impl Dialer {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            proxy: None,
            connect_timeout: None,
            local_address: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyEndpoint>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_local_address(mut self, addr: Option<IpAddr>) -> Self {
        self.local_address = addr;
        self
    }

    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.resolver
    }

    pub fn proxy(&self) -> Option<&ProxyEndpoint> {
        self.proxy.as_ref()
    }

    /// Connect to `host:port`, tunneling through the proxy when one is set.
    ///
    /// The connect timeout covers the proxy handshake too.
    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let fut = self.dial_inner(host, port);
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::ConnectTimeout(limit))?,
            None => fut.await,
        }
    }

    async fn dial_inner(&self, host: &str, port: u16) -> Result<TcpStream> {
        let Some(proxy) = &self.proxy else {
            return self.connect_any(host, port).await;
        };

        let mut stream = self
            .connect_any(&proxy.host, proxy.port)
            .await
            .map_err(|e| Error::proxy(format!("failed to reach proxy {}: {}", proxy.address(), e)))?;

        match proxy.scheme {
            ProxyScheme::Http => http_connect(&mut stream, host, port, proxy.auth.as_ref()).await?,
            ProxyScheme::Socks5 => {
                let addrs = resolve_host(self.resolver.as_ref(), host, port).await?;
                let target = TargetAddr::Ip(first_addr(&addrs, host)?);
                socks5::connect(&mut stream, &target, proxy.auth.as_ref()).await?;
            }
            ProxyScheme::Socks5h => {
                let bare = host.trim_start_matches('[').trim_end_matches(']');
                let target = match bare.parse::<IpAddr>() {
                    Ok(ip) => TargetAddr::Ip(SocketAddr::new(ip, port)),
                    Err(_) => TargetAddr::Domain(bare.to_string(), port),
                };
                socks5::connect(&mut stream, &target, proxy.auth.as_ref()).await?;
            }
        }
        tracing::debug!("tunnel to {}:{} via {} established", host, port, proxy.address());
        Ok(stream)
    }

    async fn connect_any(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = resolve_host(self.resolver.as_ref(), host, port).await?;
        let mut last_err = None;
        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::connection(format!("no addresses for {}", host))))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> Result<TcpStream> {
        let socket = self.configure_socket(addr)?;
        let socket = TcpSocket::from_std_stream(socket.into());
        socket
            .connect(addr)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {}: {}", addr, e)))
    }

    fn configure_socket(&self, addr: SocketAddr) -> Result<Socket> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::connection(format!("failed to create socket: {}", e)))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE))?;
        if let Some(ip) = self.local_address {
            socket
                .bind(&SocketAddr::new(ip, 0).into())
                .map_err(|e| Error::connection(format!("failed to bind {}: {}", ip, e)))?;
        }
        Ok(socket)
    }
}

/// Establish an HTTP CONNECT tunnel.
pub(crate) async fn http_connect(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
    auth: Option<&(String, String)>,
) -> Result<()> {
    let authority = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    let mut req = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: Keep-Alive\r\n"
    );
    if let Some((user, pass)) = auth {
        req.push_str(&format!(
            "Proxy-Authorization: {}\r\n",
            crate::auth::basic_auth(user, pass)
        ));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    // Read byte-wise so nothing past the header block is consumed.
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() >= MAX_CONNECT_REPLY {
            return Err(Error::proxy("CONNECT reply too large"));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::proxy("proxy closed connection during CONNECT"));
        }
        buf.push(byte[0]);
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut res = httparse::Response::new(&mut headers);
    match res.parse(&buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(Error::proxy("incomplete CONNECT reply")),
        Err(e) => return Err(Error::proxy(format!("malformed CONNECT reply: {}", e))),
    }
    match res.code {
        Some(code) if (200..300).contains(&code) => Ok(()),
        Some(407) => Err(Error::proxy("proxy authentication required (407)")),
        Some(code) => Err(Error::proxy(format!(
            "CONNECT rejected: {} {}",
            code,
            res.reason.unwrap_or("")
        ))),
        None => Err(Error::proxy("CONNECT reply has no status")),
    }
}
