//! Normalized transfer payloads.
//!
//! Every backend hands data to the core as a [`StreamObject`]: a byte stream
//! plus the declared size and content type. Two constructors cover the two
//! directions a payload can arrive from:
//! - response side: a finished HTTP response whose body is still streaming
//! - request side: a request descriptor whose body a producer pushes in
//!   through a [`StreamWriter`] while the consumer drains it

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{stream, SinkExt, Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use conduit_common::{Error, Result};

/// Content type used when a backend does not report one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Number of chunks a [`StreamWriter`] may run ahead of its consumer.
const WRITER_BUFFER: usize = 8;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An in-flight transfer payload.
///
/// Owns its byte stream exclusively. Dropping it releases whatever sits
/// underneath (an HTTP body, a file handle, a channel).
pub struct StreamObject {
    /// The payload bytes.
    pub content: ByteStream,
    /// Declared size, when the producer reported one.
    pub size: Option<u64>,
    /// MIME type of the payload.
    pub content_type: String,
}

impl StreamObject {
    /// Wrap an arbitrary stream.
    pub fn new(content: ByteStream, size: Option<u64>, content_type: Option<String>) -> Self {
        Self {
            content,
            size,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        }
    }

    /// Wrap a complete in-memory buffer. The size is always known.
    pub fn from_bytes(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        let data: Bytes = data.into();
        let size = Some(data.len() as u64);
        let content = if data.is_empty() {
            Box::pin(stream::empty::<Result<Bytes>>()) as ByteStream
        } else {
            Box::pin(stream::once(async move { Ok::<_, Error>(data) }))
        };
        Self::new(content, size, content_type)
    }

    /// Response-side wrapper around a completed HTTP response.
    ///
    /// The body is not read here; it is exposed as-is as the content stream.
    pub fn from_response(response: reqwest::Response) -> Self {
        let headers = response.headers().clone();
        let content = response
            .bytes_stream()
            .map(|result| result.map_err(|e| Error::Transfer(format!("Stream read error: {}", e))));
        Self::from_response_parts(&headers, Box::pin(content))
    }

    /// Response-side wrapper from already separated headers and body.
    pub fn from_response_parts(headers: &HeaderMap, content: ByteStream) -> Self {
        Self::new(content, declared_size(headers), declared_content_type(headers))
    }

    /// Request-side wrapper.
    ///
    /// Size and content type come from the request descriptor. The returned
    /// writer is the push end; the stream object is the pull end. Writes
    /// suspend while the consumer is behind.
    pub fn for_request(headers: &HeaderMap) -> (Self, StreamWriter) {
        let (tx, rx) = mpsc::channel(WRITER_BUFFER);
        let obj = Self::new(
            Box::pin(rx),
            declared_size(headers),
            declared_content_type(headers),
        );
        (obj, StreamWriter { tx, written: 0 })
    }

    /// Request-side wrapper built from an outbound HTTP request.
    pub fn for_reqwest_request(request: &reqwest::Request) -> (Self, StreamWriter) {
        Self::for_request(request.headers())
    }

    /// Drain the stream into a single buffer.
    ///
    /// # Errors
    /// - Any error yielded by the stream
    /// - The stream ended with a different length than declared
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(self.size.unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = self.content.next().await {
            buf.extend_from_slice(&chunk?);
        }
        verify_size(self.size, buf.len() as u64)?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for StreamObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamObject")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Push end of a request-side [`StreamObject`].
pub struct StreamWriter {
    tx: mpsc::Sender<Result<Bytes>>,
    written: u64,
}

impl StreamWriter {
    /// Push one chunk. Suspends while the buffer is full.
    ///
    /// # Errors
    /// - The consuming side was dropped
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<()> {
        let chunk: Bytes = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| Error::Transfer("Stream consumer went away".to_string()))?;
        self.written += len;
        Ok(())
    }

    /// Pump an async reader into the stream until EOF, then close it.
    ///
    /// A read error is forwarded to the consumer as well as returned.
    pub async fn copy_from<R>(mut self, reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunks = ReaderStream::new(reader);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => self.write(bytes).await?,
                Err(e) => {
                    let message = format!("Source read error: {}", e);
                    self.fail(Error::Transfer(message.clone())).await;
                    return Err(Error::Transfer(message));
                }
            }
        }
        Ok(self.finish())
    }

    /// Deliver an error to the consumer and close the stream.
    pub async fn fail(mut self, err: Error) {
        // Consumer may already be gone; nothing left to report to.
        let _ = self.tx.send(Err(err)).await;
        self.tx.close_channel();
    }

    /// Close the stream. Returns the number of bytes written.
    pub fn finish(mut self) -> u64 {
        self.tx.close_channel();
        self.written
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

/// Check a finished transfer length against the declared size.
pub fn verify_size(declared: Option<u64>, actual: u64) -> Result<()> {
    match declared {
        Some(expected) if expected != actual => Err(Error::Transfer(format!(
            "Stream length mismatch: declared {} bytes, received {}",
            expected, actual
        ))),
        _ => Ok(()),
    }
}

fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn declared_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn empty_body() -> ByteStream {
        Box::pin(stream::empty::<Result<Bytes>>())
    }

    #[test]
    fn test_response_without_headers_uses_defaults() {
        let obj = StreamObject::from_response_parts(&HeaderMap::new(), empty_body());
        assert_eq!(obj.size, None);
        assert_eq!(obj.content_type, "application/octet-stream");
    }

    #[test]
    fn test_response_reads_declared_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let obj = StreamObject::from_response_parts(&headers, empty_body());
        assert_eq!(obj.size, Some(42));
        assert_eq!(obj.content_type, "text/plain");
    }

    #[test]
    fn test_unparsable_content_length_is_unset() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));

        let obj = StreamObject::from_response_parts(&headers, empty_body());
        assert_eq!(obj.size, None);
    }

    #[tokio::test]
    async fn test_from_bytes_collect() {
        let obj = StreamObject::from_bytes(&b"hello"[..], Some("text/plain".to_string()));
        assert_eq!(obj.size, Some(5));
        assert_eq!(obj.collect().await.unwrap(), Bytes::from_static(b"hello"));

        let empty = StreamObject::from_bytes(Bytes::new(), None);
        assert_eq!(empty.content_type, DEFAULT_CONTENT_TYPE);
        assert!(empty.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collect_rejects_short_stream() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        let body: ByteStream = Box::pin(stream::once(async { Ok::<_, Error>(Bytes::from_static(b"abc")) }));

        let obj = StreamObject::from_response_parts(&headers, body);
        assert!(matches!(obj.collect().await, Err(Error::Transfer(_))));
    }

    #[tokio::test]
    async fn test_request_stream_handoff() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("6"));
        let (obj, mut writer) = StreamObject::for_request(&headers);
        assert_eq!(obj.size, Some(6));
        assert_eq!(obj.content_type, DEFAULT_CONTENT_TYPE);

        let producer = tokio::spawn(async move {
            for _ in 0..3 {
                writer.write(&b"ab"[..]).await.unwrap();
            }
            writer.finish()
        });

        let data = obj.collect().await.unwrap();
        assert_eq!(&data[..], b"ababab");
        assert_eq!(producer.await.unwrap(), 6);
    }

    #[test]
    fn test_request_stream_from_outbound_request() {
        let url = reqwest::Url::parse("https://example.com/upload").unwrap();
        let mut request = reqwest::Request::new(reqwest::Method::PUT, url);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));

        let (obj, writer) = StreamObject::for_reqwest_request(&request);
        assert_eq!(obj.size, None);
        assert_eq!(obj.content_type, "image/png");
        assert_eq!(writer.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_request_stream_producer_failure_reaches_consumer() {
        let (obj, mut writer) = StreamObject::for_request(&HeaderMap::new());
        assert_eq!(obj.size, None);

        tokio::spawn(async move {
            writer.write(&b"partial"[..]).await.unwrap();
            writer.fail(Error::Transfer("source died".to_string())).await;
        });

        assert!(matches!(obj.collect().await, Err(Error::Transfer(_))));
    }

    #[tokio::test]
    async fn test_write_after_consumer_dropped_fails() {
        let (obj, mut writer) = StreamObject::for_request(&HeaderMap::new());
        drop(obj);
        assert!(matches!(
            writer.write(&b"x"[..]).await,
            Err(Error::Transfer(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_from_reader() {
        let (obj, writer) = StreamObject::for_request(&HeaderMap::new());
        let producer = tokio::spawn(writer.copy_from(&b"streamed payload"[..]));

        let data = obj.collect().await.unwrap();
        assert_eq!(&data[..], b"streamed payload");
        assert_eq!(producer.await.unwrap().unwrap(), 16);
    }
}
