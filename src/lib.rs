//! # Guise
//!
//! HTTP client that presents a browser's fingerprint end to end: the TLS
//! ClientHello, HTTP/2 SETTINGS and priority frames, and QUIC transport
//! parameters all follow one profile.
//!
//! Requests run through a priority-ordered middleware pipeline and a retry
//! and redirect executor on top of a transport that negotiates the protocol
//! once per address and caches the result.
//!
//! ```no_run
//! use guise::{Client, Profile};
//!
//! # async fn run() -> guise::Result<()> {
//! let client = Client::builder()
//!     .impersonate(Profile::Chrome131)
//!     .session()
//!     .build()?;
//! let resp = client.get("https://example.com").send().await?;
//! println!("{} over {}", resp.status(), resp.version());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod body;
pub mod client;
pub mod codec;
pub mod cookie;
pub mod error;
pub mod fingerprint;
pub mod middleware;
pub mod proxy;
pub mod redirect;
pub mod request;
pub mod response;
pub mod retry;
pub mod timeouts;
pub mod transport;
pub mod version;

pub use body::Body;
pub use client::{Client, ClientBuilder, ClientConfig, UserAgent};
pub use cookie::{Cookie, CookieJar, CookieStore};
pub use error::{Error, Result};
pub use fingerprint::{FingerprintSpec, Http2Settings, Profile, QuicTemplate, TlsFingerprint};
pub use middleware::BUILTIN_PRIORITY;
pub use proxy::Proxy;
pub use redirect::RedirectPolicy;
pub use request::Request;
pub use response::Response;
pub use retry::RetryPolicy;
pub use timeouts::Timeouts;
pub use transport::tls_info::TlsInfo;
pub use transport::TransportKind;
pub use version::Protocol;
