//! HTTP over Unix domain sockets for the Monoio runtime.
//!
//! A request URL carries the socket to talk to instead of a `host:port`
//! pair, e.g. `http+unix://%2Fvar%2Frun%2Fdocker.sock/info`. The
//! [`resolver`] module turns such URLs into a socket path plus the request
//! path to send, the [`pool`] module keeps connections per socket alive
//! between requests, and [`UnixAdapter`] ties both to an HTTP/1 client.
//!
//! ```no_run
//! use monoio_unixsocket::{http::collect_body, Session};
//!
//! #[monoio::main(enable_timer = true)]
//! async fn main() -> Result<(), monoio_unixsocket::Error> {
//!     let session = Session::new();
//!     let resp = session
//!         .get("http+unix://%2Fvar%2Frun%2Fdocker.sock/info")
//!         .send()
//!         .await?;
//!     let body = collect_body(resp.into_body()).await?;
//!     println!("{}", String::from_utf8_lossy(&body));
//!     Ok(())
//! }
//! ```
mod error;
pub use error::{ResolveError, Result, TransportError, TransportError as Error};

pub mod adapter;
pub mod connectors;
pub mod global;
pub mod http;
pub mod pool;
pub mod resolver;
pub mod session;

pub use adapter::{AdapterConfig, PreparedRequest, Proxies, Transport, UnixAdapter};
pub use global::{monkeypatch, MonkeyPatch};
pub use monoio_http::common::body::HttpBody;
pub use resolver::{
    DirectResolver, FragmentResolver, Probe, ResolvedTarget, Resolver, SocketPath, WalkResolver,
};
pub use session::{default_schemes, RequestBuilder, Session};
