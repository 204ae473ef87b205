use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::tls;

/// How the mock server speaks.
#[derive(Clone, Copy)]
#[allow(dead_code)]
pub enum Mode {
    /// Plain HTTP/1.1.
    Plain,
    /// HTTP/2 with prior knowledge over plain TCP.
    H2c,
    /// TLS; HTTP/2 or HTTP/1.1 depending on what ALPN selects.
    Tls(&'static [u8]),
}

/// A request as the server saw it.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Index of the connection it arrived on.
    pub connection: usize,
    pub version: &'static str,
}

#[allow(dead_code)]
impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the handler answers with.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn closes(&self) -> bool {
        self.headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

#[derive(Default)]
struct State {
    requests: Mutex<Vec<Recorded>>,
    connections: AtomicUsize,
}

impl State {
    fn record(&self, req: Recorded) {
        self.requests.lock().unwrap().push(req);
    }
}

/// Scripted HTTP server recording every request and connection.
pub struct MockServer {
    addr: SocketAddr,
    tls: bool,
    ca: Option<Vec<u8>>,
    state: Arc<State>,
    _task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl MockServer {
    pub async fn start<F>(mode: Mode, handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let state = Arc::new(State::default());

        let (acceptor, ca) = match mode {
            Mode::Tls(alpn) => {
                let (acceptor, ca) = tls::acceptor(alpn);
                (Some(Arc::new(acceptor)), Some(ca))
            }
            _ => (None, None),
        };

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn = task_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = task_state.clone();
                let handler = handler.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match (mode, acceptor) {
                        (Mode::Plain, _) => serve_http1(stream, conn, state, handler).await,
                        (Mode::H2c, _) => serve_h2(stream, conn, state, handler).await,
                        (Mode::Tls(_), Some(acceptor)) => {
                            let Ok(stream) = tokio_boring::accept(&acceptor, stream).await else {
                                tracing::debug!("mock TLS accept failed");
                                return;
                            };
                            let h2 = stream.ssl().selected_alpn_protocol() == Some(&b"h2"[..]);
                            if h2 {
                                serve_h2(stream, conn, state, handler).await
                            } else {
                                serve_http1(stream, conn, state, handler).await
                            }
                        }
                        (Mode::Tls(_), None) => {}
                    }
                });
            }
        });

        Self {
            addr,
            tls: ca.is_some(),
            ca,
            state,
            _task: task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.addr, path)
    }

    /// PEM certificate to trust; only for TLS servers.
    pub fn ca(&self) -> Vec<u8> {
        self.ca.clone().expect("not a TLS server")
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn parse_head(buf: &[u8]) -> Option<(Recorded, usize)> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    let consumed = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        _ => return None,
    };
    let recorded = Recorded {
        method: req.method.unwrap_or_default().to_string(),
        path: req.path.unwrap_or("/").to_string(),
        headers: req
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect(),
        body: Vec::new(),
        connection: 0,
        version: "HTTP/1.1",
    };
    Some((recorded, consumed))
}

async fn serve_http1<S>(mut stream: S, conn: usize, state: Arc<State>, handler: Handler)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8192);
    loop {
        let (mut req, head_len) = loop {
            if let Some(parsed) = parse_head(&buf) {
                break parsed;
            }
            match timeout(Duration::from_secs(5), stream.read_buf(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => {}
                _ => return,
            }
        };
        let body_len = req
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_len + body_len {
            match timeout(Duration::from_secs(5), stream.read_buf(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => {}
                _ => return,
            }
        }
        let message = buf.split_to(head_len + body_len);
        req.body = message[head_len..].to_vec();
        req.connection = conn;

        let reply = handler(&req);
        let head_only = req.method == "HEAD";
        state.record(req);

        let reason = http::StatusCode::from_u16(reply.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut out = format!("HTTP/1.1 {} {}\r\n", reply.status, reason);
        for (name, value) in &reply.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !reply
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        {
            out.push_str(&format!("content-length: {}\r\n", reply.body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        if !head_only {
            bytes.extend_from_slice(&reply.body);
        }
        if stream.write_all(&bytes).await.is_err() || stream.flush().await.is_err() {
            return;
        }
        if reply.closes() {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn serve_h2<S>(stream: S, conn: usize, state: Arc<State>, handler: Handler)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Ok(mut connection) = h2::server::handshake(stream).await else {
        return;
    };
    while let Some(result) = connection.accept().await {
        let Ok((request, mut respond)) = result else {
            break;
        };
        let state = state.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let (parts, mut body) = request.into_parts();
            let mut data = Vec::new();
            while let Some(chunk) = body.data().await {
                let Ok(chunk) = chunk else { return };
                let _ = body.flow_control().release_capacity(chunk.len());
                data.extend_from_slice(&chunk);
            }
            let mut headers: Vec<(String, String)> = parts
                .headers
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            if let Some(authority) = parts.uri.authority() {
                headers.push(("host".to_string(), authority.to_string()));
            }
            let req = Recorded {
                method: parts.method.to_string(),
                path: parts
                    .uri
                    .path_and_query()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "/".to_string()),
                headers,
                body: data,
                connection: conn,
                version: "HTTP/2",
            };
            let reply = handler(&req);
            let head_only = req.method == "HEAD";
            state.record(req);

            let mut builder = http::Response::builder().status(reply.status);
            for (name, value) in &reply.headers {
                if name.eq_ignore_ascii_case("connection") {
                    continue;
                }
                builder = builder.header(name.as_str(), value.as_str());
            }
            let response = builder.body(()).unwrap();
            let end = head_only || reply.body.is_empty();
            let Ok(mut send) = respond.send_response(response, end) else {
                return;
            };
            if !end {
                let _ = send.send_data(Bytes::from(reply.body), true);
            }
        });
    }
}
