//! The transport adapter a [`Session`](crate::Session) sends socket URLs to.
use std::{collections::HashMap, future::Future, rc::Rc, time::Duration};

use bytes::Bytes;
use http::{
    header::{CONTENT_LENGTH, HOST},
    HeaderMap, HeaderValue, Method, Request, Response, Uri,
};
use monoio_http::{
    common::body::HttpBody,
    h1::payload::{fixed_payload_pair, Payload},
};
use url::Url;

use crate::{
    connectors::{Connector, UnixConnector, UnixSocketConnection},
    http::{Http1Connection, HttpConnector},
    pool::{ConnectionPool, PooledConnector, SubPool},
    resolver::{DirectResolver, ResolvedTarget, Resolver, SocketPath, WalkResolver},
    TransportError,
};

/// Proxy URLs by scheme, as accepted by HTTP clients. Any non-empty entry
/// makes a socket request fail.
pub type Proxies = HashMap<String, String>;

pub type UnixHttpConnection = Http1Connection<UnixSocketConnection>;
pub type UnixPool = ConnectionPool<SocketPath, UnixHttpConnection>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const HOST_PLACEHOLDER: HeaderValue = HeaderValue::from_static("localhost");

/// Capability the session needs from a transport.
pub trait Transport {
    fn send(
        &self,
        request: PreparedRequest,
    ) -> impl Future<Output = crate::Result<Response<HttpBody>>>;

    /// Closes every pooled connection.
    fn close(&self);
}

#[derive(Clone, Debug)]
pub struct AdapterConfig {
    timeout: Option<Duration>,
    pool_connections: usize,
    max_idle_per_key: usize,
    idle_timeout: Option<Duration>,
}

impl AdapterConfig {
    /// Connect and request timeout, `None` waits forever.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of distinct sockets to keep connections for.
    pub fn pool_connections(mut self, pool_connections: usize) -> Self {
        self.pool_connections = pool_connections;
        self
    }

    pub fn max_idle_per_key(mut self, max_idle: usize) -> Self {
        self.max_idle_per_key = max_idle;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[inline]
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[inline]
    pub fn get_pool_connections(&self) -> usize {
        self.pool_connections
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            pool_connections: crate::pool::DEFAULT_POOL_CONNECTIONS,
            max_idle_per_key: crate::pool::DEFAULT_MAX_IDLE,
            idle_timeout: None,
        }
    }
}

/// A request as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub proxies: Proxies,
    /// Bounds connecting, sending and receiving for this request, on top of
    /// the adapter timeout.
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            proxies: Proxies::new(),
            timeout: None,
        }
    }
}

/// Sends HTTP/1 requests over pooled Unix socket connections.
///
/// The socket is found with the configured [`Resolver`] (path walking by
/// default). When it cannot place the socket, the URL authority is decoded
/// as the socket path instead, which covers `http+unix://%2Fpath%2Fto.sock/`
/// URLs.
pub struct UnixAdapter {
    config: AdapterConfig,
    resolver: Rc<dyn Resolver>,
    connector: PooledConnector<HttpConnector<UnixConnector>, SocketPath, UnixHttpConnection>,
}

impl std::fmt::Debug for UnixAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UnixAdapter, config: {:?}", self.config)
    }
}

impl Default for UnixAdapter {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl UnixAdapter {
    #[inline]
    pub fn new() -> Self {
        Self::with_config(AdapterConfig::default())
    }

    pub fn with_config(config: AdapterConfig) -> Self {
        let pool = ConnectionPool::new_with_idle_timeout(
            Some(config.pool_connections),
            Some(config.max_idle_per_key),
            config.idle_timeout,
        );
        let transport = HttpConnector::new(UnixConnector::new(config.timeout));
        Self {
            config,
            resolver: Rc::new(WalkResolver::default()),
            connector: PooledConnector::new(transport, pool),
        }
    }

    /// Replaces the resolution strategy.
    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Rc::new(resolver);
        self
    }

    #[inline]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &UnixPool {
        self.connector.pool()
    }

    /// Resolves `url`, falling back to the decoded authority.
    pub fn resolve(&self, url: &Url) -> crate::Result<ResolvedTarget> {
        match self.resolver.resolve(url) {
            Ok(target) => Ok(target),
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::debug!("resolver failed for {url}: {e}, decoding authority");
                DirectResolver.resolve(url).map_err(|_| e.into())
            }
        }
    }

    /// The path and query put on the wire for `url`.
    pub fn request_url(&self, url: &Url) -> crate::Result<String> {
        Ok(self.resolve(url)?.request_path)
    }

    /// Returns the pool entry `url` maps to, creating it if needed.
    pub fn get_connection(
        &self,
        url: &Url,
        proxies: &Proxies,
    ) -> crate::Result<Rc<SubPool<SocketPath, UnixHttpConnection>>> {
        reject_proxies(proxies)?;
        let target = self.resolve(url)?;
        Ok(self.pool().get_or_create(&target.socket_path))
    }

    pub async fn send_request(&self, request: PreparedRequest) -> crate::Result<Response<HttpBody>> {
        reject_proxies(&request.proxies)?;
        let target = self.resolve(&request.url)?;
        let wire = wire_request(&request, &target.request_path)?;

        let mut conn = match request.timeout {
            None => self.connector.connect(target.socket_path).await?,
            Some(timeout) => {
                let key = target.socket_path.clone();
                let connecting = self.connector.connect(target.socket_path);
                match monoio::time::timeout(timeout, connecting).await {
                    Ok(conn) => conn?,
                    Err(_) => {
                        // The abandoned connect never got to clean up after itself.
                        if let Some(pool) = self.pool().get(&key) {
                            self.pool().remove_unused(&key, &pool);
                        }
                        #[cfg(feature = "logging")]
                        tracing::error!("connect to {} timed out after {:?}", key, timeout);
                        return Err(TransportError::ConnectTimeout(timeout));
                    }
                }
            }
        };
        #[cfg(feature = "logging")]
        tracing::debug!(
            "{} {} (reused connection: {})",
            request.method,
            target.request_path,
            conn.is_reused()
        );

        let Some(timeout) = request.timeout.or(self.config.timeout) else {
            return Ok(conn.send_request(wire).await?);
        };
        let outcome = monoio::time::timeout(timeout, conn.send_request(wire)).await;
        match outcome {
            Ok(resp) => Ok(resp?),
            Err(_) => {
                // Half-read connections must not go back to the pool.
                conn.close();
                #[cfg(feature = "logging")]
                tracing::error!("request timed out after {:?}", timeout);
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

impl Transport for UnixAdapter {
    #[inline]
    async fn send(&self, request: PreparedRequest) -> crate::Result<Response<HttpBody>> {
        self.send_request(request).await
    }

    fn close(&self) {
        self.pool().clear();
    }
}

fn reject_proxies(proxies: &Proxies) -> crate::Result<()> {
    if proxies.values().any(|proxy| !proxy.is_empty()) {
        #[cfg(feature = "logging")]
        tracing::error!("rejecting request with proxies {:?}", proxies);
        return Err(TransportError::ProxyNotSupported("UnixAdapter"));
    }
    Ok(())
}

// The url authority is not a host, it never goes on the wire.
fn wire_request(request: &PreparedRequest, path: &str) -> crate::Result<Request<HttpBody>> {
    let uri: Uri = path.parse()?;
    let mut builder = Request::builder().method(request.method.clone()).uri(uri);
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    if !request.headers.contains_key(HOST) {
        builder = builder.header(HOST, HOST_PLACEHOLDER);
    }

    let body = match &request.body {
        None => HttpBody::H1(Payload::None),
        Some(data) => {
            if !request.headers.contains_key(CONTENT_LENGTH) {
                builder = builder.header(CONTENT_LENGTH, data.len());
            }
            let (payload, payload_sender) = fixed_payload_pair();
            payload_sender.feed(Ok(data.clone()));
            HttpBody::H1(Payload::Fixed(payload))
        }
    };
    Ok(builder.body(body)?)
}
