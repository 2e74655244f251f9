//! Range-addressable streaming of stored artifacts.

use std::io::SeekFrom;
use std::sync::Arc;

use actix_web::http::header;
use actix_web::HttpResponse;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{MediaError, MediaResult};
use crate::media::content_type_for;
use crate::storage::{MediaStorage, OpenArtifact};

/// Inclusive byte window of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    pub start: u64,
    pub end: u64,
}

impl ByteWindow {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Parse a `Range` header against an artifact of `size` bytes.
///
/// Returns `None` when no range was requested. Only a single
/// `bytes=start-end`, `bytes=start-` or `bytes=-suffix` range is accepted; an
/// end past the artifact is clamped to its last byte.
pub fn parse_range(header: Option<&str>, size: u64) -> MediaResult<Option<ByteWindow>> {
    let Some(value) = header else {
        return Ok(None);
    };
    let malformed = || MediaError::MalformedRange(value.to_string());

    let ranges = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    if ranges.contains(',') {
        return Err(MediaError::MalformedRange(format!("multiple ranges are not supported: {}", value)));
    }
    let (start_part, end_part) = ranges.split_once('-').ok_or_else(malformed)?;
    let (start_part, end_part) = (start_part.trim(), end_part.trim());
    // Positions too large for u64 lie past any artifact; saturate so the
    // clamp and the unsatisfiable check below handle them.
    let parse = |part: &str| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        Ok(part.parse::<u64>().unwrap_or(u64::MAX))
    };

    let (start, end) = match (start_part.is_empty(), end_part.is_empty()) {
        (true, true) => return Err(malformed()),
        (true, false) => {
            let suffix = parse(end_part)?;
            if suffix == 0 {
                return Err(MediaError::RangeUnsatisfiable { size });
            }
            (size.saturating_sub(suffix), size.saturating_sub(1))
        }
        (false, true) => (parse(start_part)?, size.saturating_sub(1)),
        (false, false) => (parse(start_part)?, parse(end_part)?),
    };

    if size == 0 || start >= size || start > end {
        return Err(MediaError::RangeUnsatisfiable { size });
    }
    Ok(Some(ByteWindow {
        start,
        end: end.min(size - 1),
    }))
}

pub struct RangeServer {
    storage: Arc<dyn MediaStorage>,
}

impl RangeServer {
    pub fn new(storage: Arc<dyn MediaStorage>) -> Self {
        Self { storage }
    }

    /// Stream `folder/file_name`, whole or the window named by `range`.
    pub async fn serve(&self, folder: &str, file_name: &str, range: Option<&str>) -> MediaResult<HttpResponse> {
        let storage = Arc::clone(&self.storage);
        let (folder_owned, file_owned) = (folder.to_string(), file_name.to_string());
        let artifact =
            tokio::task::spawn_blocking(move || storage.open_artifact(&folder_owned, &file_owned)).await??;
        stream_artifact(artifact, folder, file_name, range).await
    }
}

/// Build the response for an opened artifact.
///
/// The body reads the source lazily; when the client goes away the body is
/// dropped and the source with it.
pub async fn stream_artifact(
    artifact: OpenArtifact,
    folder: &str,
    file_name: &str,
    range: Option<&str>,
) -> MediaResult<HttpResponse> {
    let OpenArtifact { mut source, size } = artifact;
    let content_type = content_type_for(file_name);
    match parse_range(range, size)? {
        None => {
            debug!("Serving {}/{} in full ({} bytes)", folder, file_name, size);
            Ok(HttpResponse::Ok()
                .content_type(content_type)
                .insert_header((header::ACCEPT_RANGES, "bytes"))
                .no_chunking(size)
                .streaming(ReaderStream::new(source)))
        }
        Some(window) => {
            info!(
                "Serving {}/{} range {}-{} of {}",
                folder, file_name, window.start, window.end, size
            );
            source
                .seek(SeekFrom::Start(window.start))
                .await
                .map_err(|e| MediaError::Internal(format!("seek failed: {}", e)))?;
            Ok(HttpResponse::PartialContent()
                .content_type(content_type)
                .insert_header((header::ACCEPT_RANGES, "bytes"))
                .insert_header((header::CONTENT_RANGE, window.content_range(size)))
                .no_chunking(window.len())
                .streaming(ReaderStream::new(source.take(window.len()))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock_store::MockMediaStore;
    use actix_web::body::{to_bytes, MessageBody};
    use actix_web::http::StatusCode;
    use std::io::{self, Cursor};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

    fn window(start: u64, end: u64) -> Option<ByteWindow> {
        Some(ByteWindow { start, end })
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range(None, 1000).unwrap(), None);
        assert_eq!(parse_range(Some("bytes=0-99"), 1000).unwrap(), window(0, 99));
        assert_eq!(parse_range(Some("bytes=500-"), 1000).unwrap(), window(500, 999));
        assert_eq!(parse_range(Some("bytes=-100"), 1000).unwrap(), window(900, 999));
        assert_eq!(parse_range(Some("bytes=-5000"), 1000).unwrap(), window(0, 999));
        assert_eq!(parse_range(Some("bytes=990-5000"), 1000).unwrap(), window(990, 999));
        assert_eq!(parse_range(Some("bytes=999-999"), 1000).unwrap(), window(999, 999));
        assert_eq!(
            parse_range(Some("bytes=0-99999999999999999999"), 1000).unwrap(),
            window(0, 999)
        );
        assert_eq!(
            parse_range(Some("bytes=-99999999999999999999"), 1000).unwrap(),
            window(0, 999)
        );
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        for value in [
            "bytes=2000-",
            "bytes=1000-1001",
            "bytes=50-10",
            "bytes=-0",
            "bytes=99999999999999999999-",
            "bytes=99999999999999999999-99999999999999999999",
        ] {
            assert!(
                matches!(parse_range(Some(value), 1000), Err(MediaError::RangeUnsatisfiable { size: 1000 })),
                "{} should be unsatisfiable",
                value
            );
        }
        assert!(matches!(
            parse_range(Some("bytes=0-"), 0),
            Err(MediaError::RangeUnsatisfiable { size: 0 })
        ));
    }

    #[test]
    fn test_parse_range_malformed() {
        for value in ["bytes=abc-10", "items=0-10", "bytes=-", "bytes=0-10,20-30", "bytes=5", "bytes=0-x", "bytes=+5-10"] {
            assert!(
                matches!(parse_range(Some(value), 1000), Err(MediaError::MalformedRange(_))),
                "{} should be malformed",
                value
            );
        }
    }

    fn server_with(data: Vec<u8>) -> RangeServer {
        let store = Arc::new(MockMediaStore::new());
        store.insert_artifact("videos", "clip.mp4", data);
        RangeServer::new(store)
    }

    #[actix_web::test]
    async fn test_serve_full_and_partial() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let server = server_with(data.clone());

        let resp = server.serve("videos", "clip.mp4", None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "1000");
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());

        let resp = server.serve("videos", "clip.mp4", Some("bytes=100-199")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 100-199/1000");
        assert_eq!(resp.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "100");
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), &data[100..200]);
    }

    #[actix_web::test]
    async fn test_serve_missing_artifact() {
        let server = server_with(vec![1, 2, 3]);
        assert!(matches!(
            server.serve("videos", "other.mp4", None).await,
            Err(MediaError::ArtifactNotFound(_))
        ));
    }

    /// Artifact source that counts bytes handed out and notes when it is dropped.
    struct TrackedSource {
        inner: Cursor<Vec<u8>>,
        bytes_read: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    impl AsyncRead for TrackedSource {
        fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            let before = buf.filled().len();
            let result = Pin::new(&mut self.inner).poll_read(cx, buf);
            let read = buf.filled().len() - before;
            self.bytes_read.fetch_add(read, Ordering::SeqCst);
            result
        }
    }

    impl AsyncSeek for TrackedSource {
        fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
            Pin::new(&mut self.inner).start_seek(position)
        }

        fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Pin::new(&mut self.inner).poll_complete(cx)
        }
    }

    impl Drop for TrackedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[actix_web::test]
    async fn test_dropped_body_releases_source_early() {
        let size = 256 * 1024;
        let bytes_read = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let artifact = OpenArtifact {
            source: Box::new(TrackedSource {
                inner: Cursor::new(vec![7u8; size]),
                bytes_read: Arc::clone(&bytes_read),
                dropped: Arc::clone(&dropped),
            }),
            size: size as u64,
        };

        let resp = stream_artifact(artifact, "videos", "clip.mp4", Some("bytes=1000-"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(bytes_read.load(Ordering::SeqCst), 0);

        let mut body = Box::pin(resp.into_body());
        let frame = std::future::poll_fn(|cx| body.as_mut().poll_next(cx))
            .await
            .unwrap()
            .unwrap();
        assert!(!frame.is_empty());
        assert!(!dropped.load(Ordering::SeqCst));

        // Client disconnects after the first frame
        drop(body);
        assert!(dropped.load(Ordering::SeqCst));
        assert!(bytes_read.load(Ordering::SeqCst) < size - 1000);
    }
}
