//! HTTP/3 connection driver: background task that owns the QUIC connection
//! and its socket, and routes stream events back to waiting requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use quiche::h3::NameValue;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::transport::h3::socket::DatagramSocket;
use crate::transport::TransportRequest;

/// Command sent from a handle to the driver.
#[derive(Debug)]
pub enum DriverCommand {
    SendRequest {
        request: TransportRequest,
        response_tx: oneshot::Sender<Result<StreamResponse>>,
    },
}

#[derive(Debug)]
pub struct StreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

struct StreamState {
    response_tx: Option<oneshot::Sender<Result<StreamResponse>>>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: BytesMut,
    /// Request body bytes not yet accepted by flow control.
    pending_body: Bytes,
}

impl StreamState {
    fn new(response_tx: oneshot::Sender<Result<StreamResponse>>, body: Bytes) -> Self {
        Self {
            response_tx: Some(response_tx),
            status: None,
            headers: Vec::new(),
            body: BytesMut::new(),
            pending_body: body,
        }
    }

    fn fail(&mut self, error: Error) {
        if let Some(tx) = self.response_tx.take() {
            let _ = tx.send(Err(error));
        }
    }
}

/// Push queued request bodies as far as flow control allows. A stream whose
/// body cannot be sent is failed and forgotten.
fn flush_bodies<F>(streams: &mut HashMap<u64, StreamState>, mut send: F)
where
    F: FnMut(u64, &[u8]) -> std::result::Result<usize, quiche::h3::Error>,
{
    streams.retain(|stream_id, stream| {
        while !stream.pending_body.is_empty() {
            match send(*stream_id, &stream.pending_body) {
                Ok(0) | Err(quiche::h3::Error::Done) => break,
                Ok(written) => stream.pending_body.advance(written),
                Err(e) => {
                    tracing::debug!("HTTP/3 stream {} body failed: {}", stream_id, e);
                    stream.fail(Error::quic(format!("Send body failed: {}", e)));
                    return false;
                }
            }
        }
        true
    });
}

/// Headers that must not appear in an HTTP/3 request.
fn is_prohibited(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade" | "host"
    )
}

/// Pseudo-headers followed by the regular headers, in request order.
pub(crate) fn request_headers(request: &TransportRequest) -> Vec<quiche::h3::Header> {
    let path = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    let authority = request
        .uri
        .authority()
        .map(|a| a.as_str())
        .unwrap_or_default();
    let scheme = request.uri.scheme_str().unwrap_or("https");

    let mut headers = vec![
        quiche::h3::Header::new(b":method", request.method.as_str().as_bytes()),
        quiche::h3::Header::new(b":scheme", scheme.as_bytes()),
        quiche::h3::Header::new(b":authority", authority.as_bytes()),
        quiche::h3::Header::new(b":path", path.as_bytes()),
    ];
    for (name, value) in request.headers.iter() {
        if !is_prohibited(name.as_str()) {
            headers.push(quiche::h3::Header::new(name.as_str().as_bytes(), value.as_bytes()));
        }
    }
    headers
}

pub struct H3Driver {
    command_rx: mpsc::Receiver<DriverCommand>,
    conn: quiche::Connection,
    h3_conn: quiche::h3::Connection,
    socket: DatagramSocket,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    streams: HashMap<u64, StreamState>,
}

impl H3Driver {
    pub fn new(
        command_rx: mpsc::Receiver<DriverCommand>,
        conn: quiche::Connection,
        h3_conn: quiche::h3::Connection,
        socket: DatagramSocket,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            command_rx,
            conn,
            h3_conn,
            socket,
            local_addr,
            peer_addr,
            streams: HashMap::new(),
        }
    }

    pub async fn drive(mut self) -> Result<()> {
        let mut buf = vec![0u8; 65535];
        let mut out = vec![0u8; 1350];

        loop {
            self.flush_egress(&mut out).await?;

            if self.conn.is_closed() {
                let reason = format!("QUIC connection closed: {:?}", self.conn.peer_error());
                for (_, mut stream) in self.streams.drain() {
                    stream.fail(Error::quic(reason.clone()));
                }
                return Ok(());
            }

            let timeout = self.conn.timeout().unwrap_or(Duration::from_secs(60));

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            // Every handle is gone.
                            let _ = self.conn.close(true, 0x00, b"client shutdown");
                            self.flush_egress(&mut out).await?;
                            return Ok(());
                        }
                    }
                }

                res = self.socket.recv_from(&mut buf) => {
                    let (len, from) = res?;
                    if from == self.peer_addr {
                        let info = quiche::RecvInfo { from, to: self.local_addr };
                        match self.conn.recv(&mut buf[..len], info) {
                            Ok(_) | Err(quiche::Error::Done) => {
                                self.process_h3_events()?;
                                self.send_pending_bodies();
                            }
                            Err(e) => tracing::warn!("QUIC recv error: {}", e),
                        }
                    }
                }

                _ = sleep(timeout) => {
                    tracing::trace!("QUIC timer fired for {}", self.peer_addr);
                    self.conn.on_timeout();
                }
            }
        }
    }

    async fn flush_egress(&mut self, out: &mut [u8]) -> Result<()> {
        loop {
            match self.conn.send(out) {
                Ok((len, info)) => {
                    self.socket.send_to(&out[..len], info.to).await?;
                }
                Err(quiche::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::quic(format!("QUIC send error: {}", e))),
            }
        }
    }

    fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::SendRequest {
                request,
                response_tx,
            } => {
                let headers = request_headers(&request);
                let fin = request.body.is_empty();
                match self.h3_conn.send_request(&mut self.conn, &headers, fin) {
                    Ok(stream_id) => {
                        tracing::trace!("HTTP/3 request on stream {}", stream_id);
                        self.streams
                            .insert(stream_id, StreamState::new(response_tx, request.body));
                        self.send_pending_bodies();
                    }
                    Err(e) => {
                        let _ = response_tx
                            .send(Err(Error::quic(format!("Send request failed: {}", e))));
                    }
                }
            }
        }
    }

    fn send_pending_bodies(&mut self) {
        let (h3_conn, conn) = (&mut self.h3_conn, &mut self.conn);
        flush_bodies(&mut self.streams, |stream_id, body| {
            h3_conn.send_body(conn, stream_id, body, true)
        });
    }

    fn process_h3_events(&mut self) -> Result<()> {
        loop {
            match self.h3_conn.poll(&mut self.conn) {
                Ok((stream_id, quiche::h3::Event::Headers { list, .. })) => {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        for header in list {
                            let name = String::from_utf8_lossy(header.name());
                            let value = String::from_utf8_lossy(header.value());
                            if name == ":status" {
                                stream.status = value.parse().ok();
                            } else if !name.starts_with(':') {
                                stream.headers.push((name.into_owned(), value.into_owned()));
                            }
                        }
                    }
                }
                Ok((stream_id, quiche::h3::Event::Data)) => {
                    let mut chunk = vec![0u8; 65535];
                    while let Ok(len) = self.h3_conn.recv_body(&mut self.conn, stream_id, &mut chunk)
                    {
                        if let Some(stream) = self.streams.get_mut(&stream_id) {
                            stream.body.extend_from_slice(&chunk[..len]);
                        }
                    }
                }
                Ok((stream_id, quiche::h3::Event::Finished)) => {
                    if let Some(mut stream) = self.streams.remove(&stream_id) {
                        if let Some(tx) = stream.response_tx.take() {
                            let _ = tx.send(Ok(StreamResponse {
                                status: stream.status.unwrap_or(0),
                                headers: stream.headers,
                                body: stream.body.freeze(),
                            }));
                        }
                    }
                }
                Ok((stream_id, quiche::h3::Event::Reset(code))) => {
                    if let Some(mut stream) = self.streams.remove(&stream_id) {
                        stream.fail(Error::quic(format!("Stream reset: {}", code)));
                    }
                }
                Ok((_, quiche::h3::Event::GoAway)) => {
                    tracing::debug!("HTTP/3 GOAWAY from {}", self.peer_addr);
                }
                Ok(_) => {}
                Err(quiche::h3::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::quic(format!("H3 poll error: {}", e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_keep_query_and_authority() {
        let mut headers = http::HeaderMap::new();
        headers.insert("host", "ignored".parse().unwrap());
        headers.insert("user-agent", "ua".parse().unwrap());
        let request = TransportRequest {
            method: http::Method::GET,
            uri: "https://example.com:8443/search?q=1".parse().unwrap(),
            headers,
            body: Bytes::new(),
        };
        let list = request_headers(&request);
        let pairs: Vec<(String, String)> = list
            .iter()
            .map(|h| {
                (
                    String::from_utf8_lossy(h.name()).into_owned(),
                    String::from_utf8_lossy(h.value()).into_owned(),
                )
            })
            .collect();
        assert_eq!(pairs[0], (":method".into(), "GET".into()));
        assert_eq!(pairs[2], (":authority".into(), "example.com:8443".into()));
        assert_eq!(pairs[3], (":path".into(), "/search?q=1".into()));
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[4], ("user-agent".into(), "ua".into()));
    }

    #[test]
    fn test_failed_body_removes_stream() {
        let (broken_tx, mut broken_rx) = oneshot::channel();
        let (ok_tx, mut ok_rx) = oneshot::channel();
        let mut streams = HashMap::new();
        streams.insert(0, StreamState::new(broken_tx, Bytes::from_static(b"lost")));
        streams.insert(4, StreamState::new(ok_tx, Bytes::from_static(b"payload")));

        let mut sent = Vec::new();
        flush_bodies(&mut streams, |stream_id, body| {
            if stream_id == 0 {
                return Err(quiche::h3::Error::ClosedCriticalStream);
            }
            // Flow control lets three bytes through per call.
            let n = body.len().min(3);
            sent.extend_from_slice(&body[..n]);
            Ok(n)
        });

        assert!(!streams.contains_key(&0));
        assert!(matches!(broken_rx.try_recv(), Ok(Err(Error::Quic(_)))));

        let remaining = &streams[&4];
        assert!(remaining.pending_body.is_empty());
        assert_eq!(sent, b"payload");
        assert!(ok_rx.try_recv().is_err());
    }
}
