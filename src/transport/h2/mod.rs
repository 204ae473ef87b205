//! HTTP/2 sub-transport on the `h2` crate.
//!
//! One multiplexed connection per address. The engine is configured from
//! the template's [`Http2Settings`]; when the template carries priorities,
//! the socket is wrapped in a [`FrameShaper`].

pub mod shaper;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use h2::client::{Builder, SendRequest};
use http::header::{HeaderName, CONNECTION, HOST, TE, TRANSFER_ENCODING, UPGRADE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::transport::cache::CloseIdle;
use crate::transport::connector::{Connector, MaybeHttpsStream};
use crate::transport::tls_info::TlsInfo;
use crate::transport::{Target, TransportRequest, TransportResponse};
use crate::version::Protocol;

pub use shaper::FrameShaper;

struct H2Session {
    sender: SendRequest<Bytes>,
    peer: Peer,
    generation: u64,
}

/// What the response reports about the connection it came over.
#[derive(Clone)]
struct Peer {
    remote: Option<SocketAddr>,
    tls: Option<Arc<TlsInfo>>,
}

/// Multiplexed HTTP/2 sub-transport for one address.
pub struct Http2Transport {
    connector: Arc<Connector>,
    target: Target,
    settings: Option<Http2Settings>,
    session: Mutex<Option<H2Session>>,
    generation: std::sync::atomic::AtomicU64,
}

impl Http2Transport {
    pub fn new(connector: Arc<Connector>, target: Target, settings: Option<Http2Settings>) -> Self {
        Self {
            connector,
            target,
            settings,
            session: Mutex::new(None),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn builder(&self) -> Builder {
        let mut builder = Builder::new();
        let Some(settings) = &self.settings else {
            return builder;
        };
        if settings.header_table_size != 0 {
            builder.header_table_size(settings.header_table_size);
        }
        if let Some(enable) = settings.enable_push {
            builder.enable_push(enable);
        }
        if settings.max_concurrent_streams != 0 {
            builder.max_concurrent_streams(settings.max_concurrent_streams);
        }
        if settings.initial_window_size != 0 {
            builder.initial_window_size(settings.initial_window_size);
        }
        if let Some(size) = settings.valid_max_frame_size() {
            builder.max_frame_size(size);
        }
        if settings.max_header_list_size != 0 {
            builder.max_header_list_size(settings.max_header_list_size);
        }
        if let Some(window) = settings.connection_window() {
            builder.initial_connection_window_size(window);
        }
        builder
    }

    async fn handshake(&self, stream: MaybeHttpsStream) -> Result<H2Session> {
        let peer = Peer {
            remote: stream.peer_addr(),
            tls: stream.tls_info(),
        };
        let builder = self.builder();
        let sender = match self.settings.as_ref().filter(|s| s.shapes_frames()) {
            Some(settings) => {
                let io = FrameShaper::new(stream, settings.priority, settings.priority_frames.clone());
                start(&builder, io).await?
            }
            None => start(&builder, stream).await?,
        };
        let generation = self
            .generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        tracing::debug!("HTTP/2 session {} established to {}", generation, self.target.key);
        Ok(H2Session {
            sender,
            peer,
            generation,
        })
    }

    /// A sender with stream capacity, reconnecting if the session died.
    async fn ready_sender(&self) -> Result<(SendRequest<Bytes>, Peer)> {
        let existing = {
            let guard = self.session.lock().await;
            guard
                .as_ref()
                .map(|s| (s.sender.clone(), s.peer.clone(), s.generation))
        };

        let stale = match existing {
            Some((sender, peer, generation)) => match sender.ready().await {
                Ok(sender) => return Ok((sender, peer)),
                Err(e) => {
                    tracing::warn!("HTTP/2 session to {} unusable: {}", self.target.key, e);
                    Some(generation)
                }
            },
            None => None,
        };

        let mut guard = self.session.lock().await;
        let replace = match guard.as_ref() {
            None => true,
            Some(current) => Some(current.generation) == stale,
        };
        if replace {
            let stream = self.connector.connect(&self.target).await?;
            *guard = Some(self.handshake(stream).await?);
        }
        let session = guard
            .as_ref()
            .ok_or_else(|| Error::connection("HTTP/2 session missing"))?;
        let (sender, peer) = (session.sender.clone(), session.peer.clone());
        drop(guard);

        let sender = sender
            .ready()
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 not ready: {}", e)))?;
        Ok((sender, peer))
    }

    pub async fn round_trip(&self, req: TransportRequest) -> Result<TransportResponse> {
        let (mut sender, peer) = self.ready_sender().await?;

        let mut builder = http::Request::builder()
            .method(req.method)
            .uri(req.uri)
            .version(http::Version::HTTP_2);
        for (name, value) in req.headers.iter() {
            if !is_connection_specific(name) {
                builder = builder.header(name, value);
            }
        }
        let request = builder
            .body(())
            .map_err(|e| Error::http_protocol(format!("Failed to build request: {}", e)))?;

        let end_of_stream = req.body.is_empty();
        let (response_future, mut send_stream) = sender
            .send_request(request, end_of_stream)
            .map_err(|e| Error::http_protocol(format!("Failed to send HTTP/2 request: {}", e)))?;
        if !end_of_stream {
            send_stream
                .send_data(req.body, true)
                .map_err(|e| Error::http_protocol(format!("Failed to send request body: {}", e)))?;
        }

        let response = response_future
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 response error: {}", e)))?;
        let (parts, mut body) = response.into_parts();

        let mut collected = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk
                .map_err(|e| Error::http_protocol(format!("Failed to read response body: {}", e)))?;
            collected.extend_from_slice(&chunk);
            let _ = body.flow_control().release_capacity(chunk.len());
        }

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            version: Protocol::Http2,
            headers: parts.headers,
            body: Bytes::from(collected),
            remote_addr: peer.remote,
            tls: peer.tls,
        })
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true)
    }
}

impl CloseIdle for Http2Transport {
    fn close_idle(&self) {
        // Streams in flight hold their own sender clones and finish normally.
        if let Ok(mut guard) = self.session.try_lock() {
            if guard.take().is_some() {
                tracing::debug!("closed HTTP/2 session to {}", self.target.key);
            }
        }
    }
}

async fn start<T>(builder: &Builder, io: T) -> Result<SendRequest<Bytes>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = builder
        .handshake::<T, Bytes>(io)
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/2 handshake failed: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("HTTP/2 connection closed: {}", e);
        }
    });
    Ok(sender)
}

/// Headers HTTP/2 forbids (RFC 9113 8.2.2), plus `Host` which becomes `:authority`.
fn is_connection_specific(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TRANSFER_ENCODING
        || name == UPGRADE
        || name == HOST
        || name == TE
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_specific_headers() {
        assert!(is_connection_specific(&CONNECTION));
        assert!(is_connection_specific(&HOST));
        assert!(is_connection_specific(&HeaderName::from_static("keep-alive")));
        assert!(!is_connection_specific(&http::header::USER_AGENT));
        assert!(!is_connection_specific(&http::header::COOKIE));
    }
}
