//! Hostname resolution.
//!
//! The dialer and the QUIC transport resolve through a [`Resolve`]
//! implementation before opening a socket. IP literals never reach it.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error::{Error, Result};

/// Resolves a hostname to socket addresses.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Dns(format!("{}: {}", host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Dns(format!("no addresses found for {}", host)));
        }
        Ok(addrs)
    }
}

/// Resolver that queries one DNS server directly (UDP with TCP fallback).
pub struct DnsResolver {
    server: SocketAddr,
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new(server: SocketAddr) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        Self {
            server,
            inner: TokioAsyncResolver::tokio(config, ResolverOpts::default()),
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

impl std::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolver")
            .field("server", &self.server)
            .finish()
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| Error::Dns(format!("{} via {}: {}", host, self.server, e)))?;
        let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect();
        if addrs.is_empty() {
            return Err(Error::Dns(format!("no addresses found for {}", host)));
        }
        Ok(addrs)
    }
}

/// Resolve `host`, short-circuiting IP literals. Never returns an empty list.
pub(crate) async fn resolve_host(
    resolver: &dyn Resolve,
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let addrs = resolver.resolve(bare, port).await?;
    if addrs.is_empty() {
        return Err(Error::Dns(format!("no addresses found for {}", bare)));
    }
    Ok(addrs)
}

pub(crate) fn first_addr(addrs: &[SocketAddr], host: &str) -> Result<SocketAddr> {
    addrs
        .first()
        .copied()
        .ok_or_else(|| Error::Dns(format!("no addresses found for {}", host)))
}
