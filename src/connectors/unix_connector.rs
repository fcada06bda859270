use std::{io, time::Duration};

use monoio::{
    buf::{IoBuf, IoBufMut, IoVecBuf, IoVecBufMut},
    io::{AsyncReadRent, AsyncWriteRent, Split},
    net::UnixStream,
    BufResult,
};

use super::Connector;
use crate::{resolver::SocketPath, TransportError};

/// One stream connection to a Unix domain socket.
///
/// Starts out unconnected; [`connect`](Self::connect) opens the OS socket
/// and [`close`](Self::close) or dropping the value releases it. The handle
/// lives in an `Option` so it can only ever be closed once.
#[derive(Debug)]
pub struct UnixSocketConnection {
    target: SocketPath,
    timeout: Option<Duration>,
    stream: Option<UnixStream>,
}

impl UnixSocketConnection {
    #[inline]
    pub const fn new(target: SocketPath, timeout: Option<Duration>) -> Self {
        Self {
            target,
            timeout,
            stream: None,
        }
    }

    #[inline]
    pub fn target(&self) -> &SocketPath {
        &self.target
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connects to the target socket. Does nothing if already connected.
    pub async fn connect(&mut self) -> crate::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let opened = match self.timeout {
            Some(timeout) => monoio::time::timeout(timeout, open(&self.target))
                .await
                .map_err(|_| TransportError::ConnectTimeout(timeout))?,
            None => open(&self.target).await,
        };
        match opened {
            Ok(stream) => {
                #[cfg(feature = "logging")]
                tracing::debug!("connected to unix socket {}", self.target);
                self.stream = Some(stream);
                Ok(())
            }
            Err(source) => {
                #[cfg(feature = "logging")]
                tracing::error!("connect to unix socket {} failed: {:?}", self.target, source);
                Err(TransportError::Connect {
                    path: self.target.clone(),
                    source,
                })
            }
        }
    }

    /// Closes the socket, returns whether there was one to close.
    pub fn close(&mut self) -> bool {
        self.stream.take().is_some()
    }
}

async fn open(target: &SocketPath) -> io::Result<UnixStream> {
    match target {
        SocketPath::Filesystem(path) => UnixStream::connect(path).await,
        SocketPath::Abstract(name) => connect_abstract(name).await,
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const CONNECT_RETRY_MAX: Duration = Duration::from_millis(50);

// Unix sockets report a full listen backlog as EAGAIN without starting the
// connect, so the connect is retried until it goes through. Every wait is a
// timer await, which keeps the caller's timeout in charge.
#[cfg(any(target_os = "linux", target_os = "android"))]
async fn connect_abstract(name: &[u8]) -> io::Result<UnixStream> {
    use std::{ffi::OsString, os::unix::ffi::OsStringExt, path::PathBuf};

    use socket2::{Domain, SockAddr, Socket, Type};

    let mut path = Vec::with_capacity(name.len() + 1);
    path.push(0);
    path.extend_from_slice(name);
    let addr = SockAddr::unix(PathBuf::from(OsString::from_vec(path)))?;

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    let mut backoff = Duration::from_millis(1);
    loop {
        match socket.connect(&addr) {
            Ok(()) => break,
            Err(e) if e.raw_os_error() == Some(libc::EISCONN) => break,
            Err(e) if connect_pending(&e) => {
                #[cfg(feature = "logging")]
                tracing::debug!("abstract socket busy ({}), retrying in {:?}", e, backoff);
                monoio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(CONNECT_RETRY_MAX);
            }
            Err(e) => return Err(e),
        }
    }
    UnixStream::from_std(socket.into())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn connect_pending(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || matches!(e.raw_os_error(), Some(libc::EINPROGRESS | libc::EALREADY))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
async fn connect_abstract(_name: &[u8]) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract namespace sockets are only available on Linux",
    ))
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "unix socket is not connected")
}

impl AsyncReadRent for UnixSocketConnection {
    #[inline]
    async fn read<T: IoBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf).await,
            None => (Err(not_connected()), buf),
        }
    }

    #[inline]
    async fn readv<T: IoVecBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self.stream.as_mut() {
            Some(stream) => stream.readv(buf).await,
            None => (Err(not_connected()), buf),
        }
    }
}

impl AsyncWriteRent for UnixSocketConnection {
    #[inline]
    async fn write<T: IoBuf>(&mut self, buf: T) -> BufResult<usize, T> {
        match self.stream.as_mut() {
            Some(stream) => stream.write(buf).await,
            None => (Err(not_connected()), buf),
        }
    }

    #[inline]
    async fn writev<T: IoVecBuf>(&mut self, buf_vec: T) -> BufResult<usize, T> {
        match self.stream.as_mut() {
            Some(stream) => stream.writev(buf_vec).await,
            None => (Err(not_connected()), buf_vec),
        }
    }

    #[inline]
    async fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.flush().await,
            None => Err(not_connected()),
        }
    }

    #[inline]
    async fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.shutdown().await,
            None => Err(not_connected()),
        }
    }
}

unsafe impl Split for UnixSocketConnection {}

/// Opens [`UnixSocketConnection`]s, optionally bounded by a connect timeout.
#[derive(Default, Clone, Copy, Debug)]
pub struct UnixConnector {
    timeout: Option<Duration>,
}

impl UnixConnector {
    #[inline]
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl<P: Into<SocketPath>> Connector<P> for UnixConnector {
    type Connection = UnixSocketConnection;
    type Error = crate::Error;

    async fn connect(&self, key: P) -> Result<Self::Connection, Self::Error> {
        let mut conn = UnixSocketConnection::new(key.into(), self.timeout);
        conn.connect().await?;
        Ok(conn)
    }
}
