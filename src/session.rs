//! Routes requests to transport adapters by URL prefix.
use std::{cell::RefCell, env, rc::Rc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response};
use monoio_http::common::body::HttpBody;
use url::Url;

use crate::{
    adapter::{PreparedRequest, Proxies, Transport, UnixAdapter},
    TransportError,
};

/// Env var holding the comma separated URL prefixes a new session mounts.
pub const SCHEMES_ENV: &str = "MONOIO_UNIXSOCKET_URL_SCHEMES";
pub const DEFAULT_SCHEMES: &str = "http+unix://,http://sock.local/";

/// URL prefixes mounted by [`Session::new`].
pub fn default_schemes() -> Vec<String> {
    let schemes = env::var(SCHEMES_ENV).unwrap_or_else(|_| DEFAULT_SCHEMES.to_owned());
    schemes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A set of adapters keyed by URL prefix. Cloning shares the adapters.
///
/// The longest mounted prefix matching a URL wins. Dropping the last clone
/// drops the adapters and with them every pooled connection.
pub struct Session<A = UnixAdapter> {
    adapters: Rc<RefCell<Vec<(String, Rc<A>)>>>,
}

impl<A> Clone for Session<A> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            adapters: self.adapters.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Session<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefixes: Vec<String> = self
            .adapters
            .borrow()
            .iter()
            .map(|(prefix, _)| prefix.clone())
            .collect();
        write!(f, "Session, prefixes: {:?}", prefixes)
    }
}

impl Session<UnixAdapter> {
    /// Mounts a [`UnixAdapter`] on each of [`default_schemes`].
    #[inline]
    pub fn new() -> Self {
        Self::with_schemes(default_schemes())
    }

    pub fn with_schemes<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session = Self::empty();
        for scheme in schemes {
            session.mount(scheme, UnixAdapter::new());
        }
        session
    }
}

impl Default for Session<UnixAdapter> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Transport> Session<A> {
    /// A session without adapters, every request fails with
    /// [`TransportError::InvalidSchema`].
    pub fn empty() -> Self {
        Self {
            adapters: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Registers `adapter` for URLs starting with `prefix`, replacing any
    /// adapter already mounted there.
    pub fn mount(&self, prefix: impl Into<String>, adapter: A) {
        let prefix = prefix.into().to_lowercase();
        let mut adapters = self.adapters.borrow_mut();
        adapters.retain(|(p, _)| *p != prefix);
        adapters.push((prefix, Rc::new(adapter)));
        adapters.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
    }

    pub fn get_adapter(&self, url: &str) -> crate::Result<Rc<A>> {
        let lower = url.to_lowercase();
        self.adapters
            .borrow()
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix.as_str()))
            .map(|(_, adapter)| adapter.clone())
            .ok_or_else(|| TransportError::InvalidSchema(url.to_owned()))
    }

    pub async fn send(&self, request: PreparedRequest) -> crate::Result<Response<HttpBody>> {
        let adapter = self.get_adapter(request.url.as_str())?;
        adapter.send(request).await
    }

    /// Closes the pooled connections of every mounted adapter.
    pub fn close(&self) {
        for (_, adapter) in self.adapters.borrow().iter() {
            adapter.close();
        }
    }

    #[inline]
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<A> {
        RequestBuilder::new(self.clone(), method, url.into())
    }

    #[inline]
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::GET, url)
    }

    #[inline]
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::HEAD, url)
    }

    #[inline]
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::POST, url)
    }

    #[inline]
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::PUT, url)
    }

    #[inline]
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::PATCH, url)
    }

    #[inline]
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::DELETE, url)
    }

    #[inline]
    pub fn options(&self, url: impl Into<String>) -> RequestBuilder<A> {
        self.request(Method::OPTIONS, url)
    }
}

/// Request under construction, sent with [`send`](Self::send).
pub struct RequestBuilder<A = UnixAdapter> {
    session: Session<A>,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    proxies: Proxies,
    timeout: Option<Duration>,
}

impl<A: Transport> RequestBuilder<A> {
    fn new(session: Session<A>, method: Method, url: String) -> Self {
        Self {
            session,
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            proxies: Proxies::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn proxy(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.proxies.insert(scheme.into(), url.into());
        self
    }

    pub fn proxies(mut self, proxies: Proxies) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Parses the url and assembles the request without sending it.
    pub fn build(&self) -> crate::Result<PreparedRequest> {
        Ok(PreparedRequest {
            method: self.method.clone(),
            url: Url::parse(&self.url)?,
            headers: self.headers.clone(),
            body: self.body.clone(),
            proxies: self.proxies.clone(),
            timeout: self.timeout,
        })
    }

    pub async fn send(self) -> crate::Result<Response<HttpBody>> {
        let request = self.build()?;
        self.session.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use http::StatusCode;

    use super::*;

    #[derive(Default)]
    struct Recording {
        name: &'static str,
        sent: Rc<RefCell<Vec<PreparedRequest>>>,
        closed: Rc<Cell<usize>>,
    }

    impl Transport for Recording {
        async fn send(&self, request: PreparedRequest) -> crate::Result<Response<HttpBody>> {
            self.sent.borrow_mut().push(request);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("X-Adapter", self.name)
                .body(HttpBody::H1(monoio_http::h1::payload::Payload::None))?)
        }

        fn close(&self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    fn recording(name: &'static str) -> Recording {
        Recording {
            name,
            ..Default::default()
        }
    }

    #[test]
    fn scheme_list_parsing() {
        assert_eq!(
            DEFAULT_SCHEMES
                .split(',')
                .map(str::trim)
                .collect::<Vec<_>>(),
            vec!["http+unix://", "http://sock.local/"]
        );
        if env::var(SCHEMES_ENV).is_err() {
            assert_eq!(default_schemes(), vec!["http+unix://", "http://sock.local/"]);
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let session = Session::empty();
        session.mount("http://", recording("plain"));
        session.mount("http://sock.local/", recording("sock"));
        assert_eq!(
            session.get_adapter("http://sock.local/tmp/a.sock/x").unwrap().name,
            "sock"
        );
        assert_eq!(
            session.get_adapter("HTTP://example.com/").unwrap().name,
            "plain"
        );
        assert!(matches!(
            session.get_adapter("http+unix://%2Ftmp%2Fa.sock/"),
            Err(TransportError::InvalidSchema(_))
        ));
    }

    #[test]
    fn remount_replaces() {
        let session = Session::empty();
        session.mount("http+unix://", recording("first"));
        session.mount("http+unix://", recording("second"));
        assert_eq!(session.get_adapter("http+unix://x/").unwrap().name, "second");
    }

    #[monoio::test(enable_timer = true)]
    async fn builder_carries_everything() {
        let session = Session::empty();
        let adapter = recording("unix");
        let sent = adapter.sent.clone();
        session.mount("http+unix://", adapter);

        let resp = session
            .post("http+unix://%2Ftmp%2Fa.sock/items?x=1")
            .header(http::header::ACCEPT, HeaderValue::from_static("*/*"))
            .body("payload")
            .proxy("http", "")
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.headers()["X-Adapter"], "unix");

        let sent = sent.borrow();
        let request = &sent[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.path(), "/items");
        assert_eq!(request.headers[http::header::ACCEPT], "*/*");
        assert_eq!(request.body.as_deref(), Some(&b"payload"[..]));
        assert_eq!(request.proxies.get("http").map(String::as_str), Some(""));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
    }

    #[monoio::test(enable_timer = true)]
    async fn bad_url() {
        let session: Session<Recording> = Session::empty();
        session.mount("http+unix://", recording("unix"));
        let err = session.get("http+unix://[").send().await.unwrap_err();
        assert!(matches!(err, TransportError::Url(_)));
    }

    #[test]
    fn close_reaches_every_adapter() {
        let session = Session::empty();
        let a = recording("a");
        let b = recording("b");
        let (ca, cb) = (a.closed.clone(), b.closed.clone());
        session.mount("http+unix://", a);
        session.mount("http://sock.local/", b);
        session.close();
        assert_eq!((ca.get(), cb.get()), (1, 1));
    }
}
