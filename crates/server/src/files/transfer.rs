//! Range-aware streaming of file contents as HTTP responses.
//!
//! A response is planned from the file size and the optional requested range,
//! then its body is produced lazily from a [`ReadAt`] handle in bounded
//! chunks. The handle moves into the body stream and is dropped with it.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use protocol::RangeSpec;
use tracing::{debug, warn};

use super::error::FsError;
use super::provider::ReadAt;

/// Default chunk size for streamed bodies (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default `Cache-Control` max-age for whole-file responses, in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u64 = 43200;

/// What a file response will contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// No range requested: the whole file with status 200.
    Full {
        /// File size.
        size: u64,
    },
    /// The inclusive span `start..=end` with status 206.
    Partial {
        /// First byte.
        start: u64,
        /// Last byte, already clamped to the file.
        end: u64,
        /// File size.
        size: u64,
    },
    /// A range that selects nothing: an empty 206.
    Empty {
        /// First byte requested, at or past the end of the file.
        start: u64,
        /// File size.
        size: u64,
    },
}

impl TransferPlan {
    /// Decide the response shape for a file of `size` bytes.
    pub fn new(size: u64, range: Option<RangeSpec>) -> Self {
        let Some(range) = range else {
            return TransferPlan::Full { size };
        };

        if range.start >= size {
            return TransferPlan::Empty {
                start: range.start,
                size,
            };
        }

        let last = size - 1;
        let end = range.end.map_or(last, |end| end.min(last));
        if end < range.start {
            return TransferPlan::Empty {
                start: range.start,
                size,
            };
        }

        TransferPlan::Partial {
            start: range.start,
            end,
            size,
        }
    }

    /// HTTP status for this plan.
    pub fn status(&self) -> StatusCode {
        match self {
            TransferPlan::Full { .. } => StatusCode::OK,
            TransferPlan::Partial { .. } | TransferPlan::Empty { .. } => StatusCode::PARTIAL_CONTENT,
        }
    }

    /// Offset of the first body byte.
    pub fn start(&self) -> u64 {
        match self {
            TransferPlan::Partial { start, .. } => *start,
            _ => 0,
        }
    }

    /// Number of body bytes.
    pub fn len(&self) -> u64 {
        match self {
            TransferPlan::Full { size } => *size,
            TransferPlan::Partial { start, end, .. } => end - start + 1,
            TransferPlan::Empty { .. } => 0,
        }
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value, for partial responses.
    ///
    /// An empty plan reports the requested start followed by a last byte
    /// before it (`bytes 50-9/10`); a zero-length file has no last byte and
    /// uses `bytes */0`.
    pub fn content_range(&self) -> Option<String> {
        match self {
            TransferPlan::Full { .. } => None,
            TransferPlan::Partial { start, end, size } => Some(format!("bytes {}-{}/{}", start, end, size)),
            TransferPlan::Empty { size: 0, .. } => Some("bytes */0".to_string()),
            TransferPlan::Empty { start, size } => {
                let last = (size - 1).min(start.saturating_sub(1));
                Some(format!("bytes {}-{}/{}", start, last, size))
            }
        }
    }
}

/// Stream exactly `len` bytes from `handle` starting at `start`.
///
/// Each item is at most `chunk_size` bytes. A short read before `len` bytes
/// have been produced yields `FsError::Transfer` and ends the stream.
pub fn chunk_stream<H>(
    handle: H,
    start: u64,
    len: u64,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, FsError>> + Send + 'static
where
    H: ReadAt + 'static,
{
    let chunk_size = chunk_size.max(1) as u64;

    stream::try_unfold((handle, start, len), move |(mut handle, offset, remaining)| async move {
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(chunk_size);
        let chunk = handle.read_at(offset, want as usize).await?;
        let got = chunk.len() as u64;
        if got < want {
            warn!(offset, wanted = want, got, "Short read while streaming file");
            return Err(FsError::Transfer(format!(
                "short read at offset {}: wanted {} bytes, got {}",
                offset, want, got
            )));
        }

        Ok(Some((chunk, (handle, offset + got, remaining - got))))
    })
}

/// Escape a file name for use inside a quoted `Content-Disposition` parameter.
pub fn disposition_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

/// Builds streamed file responses.
#[derive(Debug, Clone, Copy)]
pub struct StreamingResponder {
    chunk_size: usize,
    cache_max_age: u64,
}

impl Default for StreamingResponder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CACHE_MAX_AGE)
    }
}

impl StreamingResponder {
    /// Create a responder with the given chunk size and cache lifetime.
    pub fn new(chunk_size: usize, cache_max_age: u64) -> Self {
        Self {
            chunk_size,
            cache_max_age,
        }
    }

    /// Build the response for a file of `size` bytes.
    ///
    /// Headers are final when this returns; the body reads from `handle`
    /// lazily, so a read failure surfaces as an aborted body.
    pub fn respond<H>(
        &self,
        handle: H,
        size: u64,
        range: Option<RangeSpec>,
        filename: Option<&str>,
        mime: &str,
    ) -> Result<Response, FsError>
    where
        H: ReadAt + 'static,
    {
        let plan = TransferPlan::new(size, range);
        debug!(?plan, mime, "Serving file");

        let mut builder = Response::builder()
            .status(plan.status())
            .header(header::CONTENT_TYPE, mime)
            .header(header::ACCEPT_RANGES, "bytes");

        // Length and caching headers belong to the whole-file response only.
        if let Some(content_range) = plan.content_range() {
            builder = builder.header(header::CONTENT_RANGE, content_range);
        } else {
            builder = builder
                .header(header::CONTENT_LENGTH, plan.len())
                .header(
                    header::CACHE_CONTROL,
                    format!("public, max-age={}", self.cache_max_age),
                );
        }

        if let Some(name) = filename {
            let value = format!("attachment; filename=\"{}\"", disposition_filename(name));
            let value = HeaderValue::from_str(&value)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
            builder = builder.header(header::CONTENT_DISPOSITION, value);
        }

        let body = if plan.is_empty() {
            Body::empty()
        } else {
            Body::from_stream(chunk_stream(handle, plan.start(), plan.len(), self.chunk_size))
        };

        builder
            .body(body)
            .map_err(|e| FsError::Transfer(format!("building response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    /// In-memory file with an optional point after which reads come up short.
    struct MemoryFile {
        data: Vec<u8>,
        truncate_at: Option<u64>,
    }

    impl MemoryFile {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                truncate_at: None,
            }
        }

        fn failing_after(data: Vec<u8>, at: u64) -> Self {
            Self {
                truncate_at: Some(at),
                ..Self::new(data)
            }
        }
    }

    impl ReadAt for MemoryFile {
        async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes, FsError> {
            let limit = self.truncate_at.unwrap_or(self.data.len() as u64).min(self.data.len() as u64);
            let start = offset.min(limit) as usize;
            let end = (offset + len as u64).min(limit) as usize;
            Ok(Bytes::copy_from_slice(&self.data[start..end]))
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn collect_body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_plan_full() {
        let plan = TransferPlan::new(100, None);
        assert_eq!(plan, TransferPlan::Full { size: 100 });
        assert_eq!(plan.status(), StatusCode::OK);
        assert_eq!(plan.len(), 100);
        assert_eq!(plan.content_range(), None);
    }

    #[test]
    fn test_plan_clamps_end() {
        let plan = TransferPlan::new(100, Some(RangeSpec::new(0, Some(999_999))));
        assert_eq!(plan.content_range().as_deref(), Some("bytes 0-99/100"));
        assert_eq!(plan.len(), 100);
    }

    #[test]
    fn test_plan_open_ended() {
        let plan = TransferPlan::new(100, Some(RangeSpec::new(90, None)));
        assert_eq!(plan.content_range().as_deref(), Some("bytes 90-99/100"));
        assert_eq!(plan.len(), 10);
        assert_eq!(plan.start(), 90);
    }

    #[test]
    fn test_plan_start_past_end() {
        let plan = TransferPlan::new(100, Some(RangeSpec::new(100, None)));
        assert_eq!(plan, TransferPlan::Empty { start: 100, size: 100 });
        assert_eq!(plan.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(plan.content_range().as_deref(), Some("bytes 100-99/100"));
        assert!(plan.is_empty());

        let plan = TransferPlan::new(100, Some(RangeSpec::new(250, Some(300))));
        assert_eq!(plan.content_range().as_deref(), Some("bytes 250-99/100"));

        let plan = TransferPlan::new(100, Some(RangeSpec::new(20, Some(10))));
        assert_eq!(plan.content_range().as_deref(), Some("bytes 20-19/100"));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_empty_file() {
        let plan = TransferPlan::new(0, Some(RangeSpec::full()));
        assert!(plan.is_empty());
        assert_eq!(plan.content_range().as_deref(), Some("bytes */0"));

        let plan = TransferPlan::new(0, None);
        assert_eq!(plan.len(), 0);
        assert_eq!(plan.status(), StatusCode::OK);
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(disposition_filename("report.pdf"), "report.pdf");
        assert_eq!(disposition_filename("a\"b\\c\nd"), "a_b_c_d");
    }

    #[tokio::test]
    async fn test_chunk_stream_bounded_chunks() {
        let data = sample(10_000);
        let stream = chunk_stream(MemoryFile::new(data.clone()), 0, 10_000, 4096);
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_chunk_stream_short_read_errors() {
        let data = sample(1000);
        let stream = chunk_stream(MemoryFile::failing_after(data, 600), 0, 1000, 256);
        let items: Vec<Result<Bytes, FsError>> = stream.collect().await;

        assert_eq!(items.len(), 2 + 1, "two full chunks then the error");
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(FsError::Transfer(_))));
    }

    #[tokio::test]
    async fn test_respond_full() {
        let data = sample(300);
        let responder = StreamingResponder::new(128, 60);
        let response = responder
            .respond(MemoryFile::new(data.clone()), 300, None, Some("a.bin"), "application/octet-stream")
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_LENGTH], "300");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=60");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"a.bin\"");
        assert!(headers.get(header::CONTENT_RANGE).is_none());
        assert_eq!(collect_body(response).await, data);
    }

    #[tokio::test]
    async fn test_respond_range_matches_slice() {
        let data = sample(5000);
        let responder = StreamingResponder::new(1000, DEFAULT_CACHE_MAX_AGE);

        for (start, end) in [(0u64, 0u64), (10, 20), (999, 1000), (4000, 4999)] {
            let response = responder
                .respond(
                    MemoryFile::new(data.clone()),
                    5000,
                    Some(RangeSpec::new(start, Some(end))),
                    None,
                    "text/plain",
                )
                .unwrap();

            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(
                response.headers()[header::CONTENT_RANGE],
                format!("bytes {}-{}/5000", start, end).as_str()
            );
            assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
            assert!(response.headers().get(header::CACHE_CONTROL).is_none());
            assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
            let body = collect_body(response).await;
            assert_eq!(body, &data[start as usize..=end as usize]);
        }
    }

    #[tokio::test]
    async fn test_respond_clamped_range() {
        let data = sample(100);
        let response = StreamingResponder::default()
            .respond(
                MemoryFile::new(data.clone()),
                100,
                Some(RangeSpec::new(0, Some(999_999))),
                None,
                "text/plain",
            )
            .unwrap();

        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/100");
        assert_eq!(collect_body(response).await, data);
    }

    #[tokio::test]
    async fn test_respond_unsatisfiable_is_empty() {
        let response = StreamingResponder::default()
            .respond(
                MemoryFile::new(sample(10)),
                10,
                Some(RangeSpec::new(50, None)),
                None,
                "text/plain",
            )
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 50-9/10");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(collect_body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_respond_failing_reader_aborts_body() {
        let response = StreamingResponder::new(64, DEFAULT_CACHE_MAX_AGE)
            .respond(
                MemoryFile::failing_after(sample(1000), 100),
                1000,
                None,
                None,
                "application/octet-stream",
            )
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let result = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(result.is_err());
    }
}
