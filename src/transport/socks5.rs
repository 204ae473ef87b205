//! SOCKS5 client (RFC 1928) with username/password auth (RFC 1929).
//!
//! CONNECT carries the TLS path; UDP ASSOCIATE carries QUIC datagrams.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_UNACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Destination as sent to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                out.push(ATYP_V4);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                out.push(ATYP_V6);
                out.extend_from_slice(&addr.ip().octets());
                out.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(host, port) => {
                if host.is_empty() || host.len() > u8::MAX as usize {
                    return Err(Error::proxy(format!("invalid SOCKS5 domain: {:?}", host)));
                }
                out.push(ATYP_DOMAIN);
                out.push(host.len() as u8);
                out.extend_from_slice(host.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
        Ok(())
    }
}

async fn negotiate_auth<S>(stream: &mut S, auth: Option<&(String, String)>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = if auth.is_some() {
        &[VERSION, 2, AUTH_NONE, AUTH_PASSWORD]
    } else {
        &[VERSION, 1, AUTH_NONE]
    };
    stream.write_all(greeting).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION {
        return Err(Error::proxy(format!("unexpected SOCKS version {}", reply[0])));
    }
    match (reply[1], auth) {
        (AUTH_NONE, _) => Ok(()),
        (AUTH_PASSWORD, Some((user, pass))) => {
            if user.len() > u8::MAX as usize || pass.len() > u8::MAX as usize {
                return Err(Error::proxy("SOCKS5 credentials too long"));
            }
            let mut msg = Vec::with_capacity(3 + user.len() + pass.len());
            msg.push(0x01);
            msg.push(user.len() as u8);
            msg.extend_from_slice(user.as_bytes());
            msg.push(pass.len() as u8);
            msg.extend_from_slice(pass.as_bytes());
            stream.write_all(&msg).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(Error::proxy("SOCKS5 authentication rejected"));
            }
            Ok(())
        }
        (AUTH_UNACCEPTABLE, _) => Err(Error::proxy("SOCKS5 proxy accepted no auth method")),
        (method, _) => Err(Error::proxy(format!(
            "SOCKS5 proxy selected unsupported auth method {}",
            method
        ))),
    }
}

async fn read_bound_addr<S>(stream: &mut S) -> Result<SocketAddr>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(Error::proxy(format!(
            "SOCKS5 request failed: {}",
            reply_message(head[1])
        )));
    }
    let ip = match head[3] {
        ATYP_V4 => {
            let mut b = [0u8; 4];
            stream.read_exact(&mut b).await?;
            IpAddr::V4(Ipv4Addr::from(b))
        }
        ATYP_V6 => {
            let mut b = [0u8; 16];
            stream.read_exact(&mut b).await?;
            IpAddr::V6(Ipv6Addr::from(b))
        }
        ATYP_DOMAIN => {
            // Bound domains are not usable as a relay address; drain and report unspecified.
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
        other => return Err(Error::proxy(format!("SOCKS5 bad address type {}", other))),
    };
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(SocketAddr::new(ip, u16::from_be_bytes(port)))
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// Open a CONNECT tunnel to `target` over an established proxy stream.
pub(crate) async fn connect<S>(
    stream: &mut S,
    target: &TargetAddr,
    auth: Option<&(String, String)>,
) -> Result<SocketAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_auth(stream, auth).await?;
    let mut req = vec![VERSION, CMD_CONNECT, 0x00];
    target.encode(&mut req)?;
    stream.write_all(&req).await?;
    read_bound_addr(stream).await
}

/// Request a UDP relay. The returned address is where datagrams must be sent.
///
/// The control stream must stay open for as long as the relay is used.
pub(crate) async fn udp_associate<S>(
    stream: &mut S,
    auth: Option<&(String, String)>,
) -> Result<SocketAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_auth(stream, auth).await?;
    let mut req = vec![VERSION, CMD_UDP_ASSOCIATE, 0x00];
    TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).encode(&mut req)?;
    stream.write_all(&req).await?;
    read_bound_addr(stream).await
}

/// Prefix a datagram with the SOCKS5 UDP request header.
pub(crate) fn encode_udp(target: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 22);
    out.extend_from_slice(&[0x00, 0x00, 0x00]);
    // Encoding an IP target cannot fail.
    let _ = TargetAddr::Ip(target).encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Length of the SOCKS5 UDP header at the start of `datagram`.
pub(crate) fn udp_header_len(datagram: &[u8]) -> Result<usize> {
    if datagram.len() < 4 {
        return Err(Error::proxy("short SOCKS5 UDP datagram"));
    }
    if datagram[2] != 0x00 {
        return Err(Error::proxy("fragmented SOCKS5 UDP datagrams are not supported"));
    }
    let len = match datagram[3] {
        ATYP_V4 => 4 + 4 + 2,
        ATYP_V6 => 4 + 16 + 2,
        ATYP_DOMAIN if datagram.len() > 4 => 4 + 1 + datagram[4] as usize + 2,
        other => return Err(Error::proxy(format!("SOCKS5 bad address type {}", other))),
    };
    if datagram.len() < len {
        return Err(Error::proxy("truncated SOCKS5 UDP header"));
    }
    Ok(len)
}
