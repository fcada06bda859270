use bytes::Bytes;
use http::{header::CONNECTION, HeaderMap, Method, Request, Response, StatusCode, Version};
use monoio::io::{
    sink::{Sink, SinkExt},
    stream::Stream,
    AsyncReadRent, AsyncWriteRent,
};
use monoio_http::{
    common::{
        body::{Body, HttpBody},
        error::HttpError,
    },
    h1::{
        codec::{
            decoder::{DecodeError, PayloadDecoder},
            ClientCodec,
        },
        payload::{fixed_payload_pair, stream_payload_pair, Payload},
    },
};

use crate::pool::Poolable;

/// An HTTP/1 client connection over any byte stream.
///
/// The response body is read off the stream before
/// [`send_request`](Self::send_request) returns, so the connection can go
/// back to the pool as soon as the caller drops it.
pub struct Http1Connection<IO: AsyncWriteRent> {
    framed: ClientCodec<IO>,
    open: bool,
}

impl<IO: AsyncWriteRent> Http1Connection<IO> {
    pub fn new(framed: ClientCodec<IO>) -> Self {
        Self { framed, open: true }
    }

    /// Marks the connection as unusable, it is dropped instead of pooled.
    #[inline]
    pub fn close(&mut self) {
        self.open = false;
    }
}

impl<IO: AsyncWriteRent> Poolable for Http1Connection<IO> {
    #[inline]
    fn is_open(&self) -> bool {
        self.open
    }
}

impl<IO: AsyncReadRent + AsyncWriteRent> Http1Connection<IO> {
    pub async fn send_request<B, E>(
        &mut self,
        request: Request<B>,
    ) -> Result<Response<HttpBody>, HttpError>
    where
        ClientCodec<IO>: Sink<Request<B>, Error = E>,
        E: std::fmt::Debug + Into<HttpError>,
    {
        let is_head = request.method() == Method::HEAD;
        let handle = &mut self.framed;

        if let Err(e) = handle.send_and_flush(request).await {
            #[cfg(feature = "logging")]
            tracing::error!("send upstream request error {:?}", e);
            self.open = false;
            return Err(e.into());
        }

        let resp = match handle.next().await {
            Some(Ok(resp)) => resp,
            Some(Err(e)) => {
                #[cfg(feature = "logging")]
                tracing::error!("decode upstream response error {:?}", e);
                self.open = false;
                return Err(e.into());
            }
            None => {
                #[cfg(feature = "logging")]
                tracing::error!("upstream return eof");
                self.open = false;
                return Err(DecodeError::UnexpectedEof.into());
            }
        };

        let (parts, payload_decoder) = resp.into_parts();
        if !keeps_alive(parts.version, &parts.headers) {
            self.open = false;
        }
        if is_head || !has_body(parts.status) {
            return Ok(Response::from_parts(parts, HttpBody::H1(Payload::None)));
        }
        let payload = match payload_decoder {
            PayloadDecoder::None => Payload::None,
            PayloadDecoder::Fixed(_) => {
                let mut framed_payload = payload_decoder.with_io(handle);
                let (payload, payload_sender) = fixed_payload_pair();
                match framed_payload.next_data().await {
                    Some(data) => {
                        if data.is_err() {
                            self.open = false;
                        }
                        payload_sender.feed(data)
                    }
                    None => {
                        self.open = false;
                        return Err(DecodeError::UnexpectedEof.into());
                    }
                }
                Payload::Fixed(payload)
            }
            PayloadDecoder::Streamed(_) => {
                let mut framed_payload = payload_decoder.with_io(handle);
                let (payload, mut payload_sender) = stream_payload_pair();
                loop {
                    match framed_payload.next_data().await {
                        Some(Ok(data)) => payload_sender.feed_data(Some(data)),
                        Some(Err(e)) => {
                            #[cfg(feature = "logging")]
                            tracing::error!("decode upstream response error {:?}", e);
                            self.open = false;
                            return Err(e);
                        }
                        None => {
                            payload_sender.feed_data(None);
                            break;
                        }
                    }
                }
                Payload::Stream(payload)
            }
        };
        Ok(Response::from_parts(parts, payload.into()))
    }
}

// The codec does not know the request method, the head decides.
fn has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

fn keeps_alive(version: Version, headers: &HeaderMap) -> bool {
    let close = headers
        .get(CONNECTION)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
        .unwrap_or(false);
    version != Version::HTTP_10 && !close
}

/// Reads a response body to the end.
pub async fn collect_body(mut body: HttpBody) -> Result<Bytes, HttpError> {
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = body.next_data().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}
