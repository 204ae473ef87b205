//! Datagram socket for QUIC, direct or relayed through SOCKS5 UDP ASSOCIATE.
//!
//! The relayed variant is bound to one peer: writes always go to that peer
//! whatever destination is passed, and every read is attributed to it.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};

use crate::error::{Error, Result};
use crate::proxy::ProxyEndpoint;
use crate::transport::resolver::{first_addr, resolve_host, Resolve};
use crate::transport::socks5;

pub enum DatagramSocket {
    Udp(UdpSocket),
    Socks5 {
        socket: UdpSocket,
        relay: SocketAddr,
        peer: SocketAddr,
        /// The association lives as long as this stream stays open.
        _control: TcpStream,
    },
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp(socket) => f.debug_tuple("Udp").field(&socket.local_addr().ok()).finish(),
            Self::Socks5 { relay, peer, .. } => f
                .debug_struct("Socks5")
                .field("relay", relay)
                .field("peer", peer)
                .finish(),
        }
    }
}

fn unspecified_for(addr: &SocketAddr, local: Option<IpAddr>) -> SocketAddr {
    let ip = match (local, addr) {
        (Some(ip), _) => ip,
        (None, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (None, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

impl DatagramSocket {
    /// Plain UDP socket suitable for reaching `peer`.
    pub async fn bind(peer: SocketAddr, local: Option<IpAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(unspecified_for(&peer, local)).await?;
        Ok(Self::Udp(socket))
    }

    /// Associate a UDP relay on a SOCKS5 proxy, fixed to `peer`.
    pub async fn socks5(
        proxy: &ProxyEndpoint,
        peer: SocketAddr,
        resolver: &Arc<dyn Resolve>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let proxy_addrs = resolve_host(resolver.as_ref(), &proxy.host, proxy.port).await?;
        let proxy_addr = first_addr(&proxy_addrs, &proxy.host)?;

        let associate = async {
            let mut control = TcpStream::connect(proxy_addr).await.map_err(|e| {
                Error::proxy(format!("failed to reach proxy {}: {}", proxy.address(), e))
            })?;
            let relay = socks5::udp_associate(&mut control, proxy.auth.as_ref()).await?;
            Ok::<_, Error>((control, relay))
        };
        let (control, mut relay) = match connect_timeout {
            Some(limit) => tokio::time::timeout(limit, associate)
                .await
                .map_err(|_| Error::ConnectTimeout(limit))??,
            None => associate.await?,
        };
        if relay.ip().is_unspecified() {
            relay.set_ip(proxy_addr.ip());
        }

        let socket = UdpSocket::bind(unspecified_for(&relay, None)).await?;
        tracing::debug!("SOCKS5 UDP relay {} for {} via {}", relay, peer, proxy.address());
        Ok(Self::Socks5 {
            socket,
            relay,
            peer,
            _control: control,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Udp(socket) => socket.local_addr(),
            Self::Socks5 { socket, .. } => socket.local_addr(),
        }
    }

    pub async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        match self {
            Self::Udp(socket) => socket.send_to(buf, target).await,
            Self::Socks5 {
                socket,
                relay,
                peer,
                ..
            } => {
                let datagram = socks5::encode_udp(*peer, buf);
                socket.send_to(&datagram, *relay).await?;
                Ok(buf.len())
            }
        }
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self {
            Self::Udp(socket) => socket.recv_from(buf).await,
            Self::Socks5 { socket, peer, .. } => loop {
                let (len, _) = socket.recv_from(buf).await?;
                match socks5::udp_header_len(&buf[..len]) {
                    Ok(header) => {
                        buf.copy_within(header..len, 0);
                        return Ok((len - header, *peer));
                    }
                    Err(e) => tracing::warn!("dropping relayed datagram: {}", e),
                }
            },
        }
    }
}
