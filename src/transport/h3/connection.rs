//! QUIC handshake and driver start-up.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::h3::driver::H3Driver;
use crate::transport::h3::handle::H3Handle;
use crate::transport::h3::socket::DatagramSocket;
use crate::transport::tls_info::TlsInfo;

/// Everything needed to open one QUIC connection.
pub struct QuicDial<'a> {
    pub host: &'a str,
    pub peer: SocketAddr,
    pub socket: DatagramSocket,
    pub config: quiche::Config,
    pub h3_config: quiche::h3::Config,
    pub handshake_timeout: Option<Duration>,
}

/// Drive the handshake to completion, then hand the connection to a driver task.
///
/// Errors surface here, before any request is accepted.
pub async fn connect(dial: QuicDial<'_>) -> Result<(H3Handle, TlsInfo)> {
    let QuicDial {
        host,
        peer,
        socket,
        mut config,
        h3_config,
        handshake_timeout,
    } = dial;
    let local = socket.local_addr()?;

    let mut scid = [0u8; quiche::MAX_CONN_ID_LEN];
    getrandom::fill(&mut scid).map_err(|e| Error::quic(format!("RNG error: {}", e)))?;
    let scid = quiche::ConnectionId::from_ref(&scid);

    // No SNI for IP literals.
    let server_name = host.parse::<IpAddr>().is_err().then_some(host);
    let mut conn = quiche::connect(server_name, &scid, local, peer, &mut config)
        .map_err(|e| Error::quic(format!("Connect failed: {}", e)))?;

    let handshake = handshake(&mut conn, &socket, local, peer);
    match handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| Error::HandshakeTimeout(limit))??,
        None => handshake.await?,
    }

    // QUIC always runs TLS 1.3.
    let tls = TlsInfo::from_quic("TLSv1.3", conn.application_proto(), server_name, conn.peer_cert());

    let h3_conn = quiche::h3::Connection::with_transport(&mut conn, &h3_config)
        .map_err(|e| Error::quic(format!("H3 init error: {}", e)))?;

    let (tx, rx) = mpsc::channel(32);
    let driver = H3Driver::new(rx, conn, h3_conn, socket, local, peer);
    tokio::spawn(async move {
        if let Err(e) = driver.drive().await {
            tracing::error!("HTTP/3 driver crashed: {}", e);
        }
    });

    Ok((H3Handle::new(tx), tls))
}

async fn handshake(
    conn: &mut quiche::Connection,
    socket: &DatagramSocket,
    local: SocketAddr,
    peer: SocketAddr,
) -> Result<()> {
    let mut buf = vec![0u8; 65535];
    let mut out = vec![0u8; 1350];

    loop {
        loop {
            match conn.send(&mut out) {
                Ok((len, info)) => {
                    socket.send_to(&out[..len], info.to).await?;
                }
                Err(quiche::Error::Done) => break,
                Err(e) => return Err(Error::quic(format!("Send error: {}", e))),
            }
        }

        if conn.is_established() {
            return Ok(());
        }
        if conn.is_closed() {
            let reason = conn
                .peer_error()
                .or(conn.local_error())
                .map(|e| String::from_utf8_lossy(&e.reason).into_owned())
                .unwrap_or_default();
            return Err(Error::quic(format!(
                "Connection closed during handshake {}",
                reason
            )));
        }

        let wait = conn.timeout().unwrap_or(Duration::from_millis(100));
        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) if from == peer => {
                let info = quiche::RecvInfo { from, to: local };
                if let Err(e) = conn.recv(&mut buf[..len], info) {
                    if e != quiche::Error::Done {
                        tracing::warn!("QUIC recv error during handshake: {}", e);
                    }
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => conn.on_timeout(),
        }
    }
}
