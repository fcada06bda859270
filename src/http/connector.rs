use monoio::io::{AsyncReadRent, AsyncWriteRent, Split};
use monoio_http::h1::codec::ClientCodec;

use super::connection::Http1Connection;
use crate::connectors::Connector;

/// Wraps the streams of an inner connector in an HTTP/1 client codec.
#[derive(Default, Clone, Debug)]
pub struct HttpConnector<C> {
    inner_connector: C,
}

impl<C> HttpConnector<C> {
    #[inline]
    pub const fn new(inner_connector: C) -> Self {
        Self { inner_connector }
    }

    #[inline]
    pub fn inner_connector(&self) -> &C {
        &self.inner_connector
    }
}

impl<T, C> Connector<T> for HttpConnector<C>
where
    C: Connector<T>,
    C::Connection: AsyncReadRent + AsyncWriteRent + Split,
    C::Error: Into<crate::Error>,
{
    type Connection = Http1Connection<C::Connection>;
    type Error = crate::Error;

    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        let io = self
            .inner_connector
            .connect(key)
            .await
            .map_err(|e| e.into())?;
        Ok(Http1Connection::new(ClientCodec::new(io)))
    }
}
