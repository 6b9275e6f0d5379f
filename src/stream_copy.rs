//! Chunked copy of a network byte stream into an async sink
//!
//! Used both to write already-correctly-encoded streams straight into an
//! in-memory buffer and to feed the transcoding engine's stdin. Detects
//! premature connection close by comparing the byte count against the
//! declared content length.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::progress::ProgressReporter;

/// Progress reporting granularity; also the reference chunk size for sources
/// that deliver data in larger pieces.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Copy a byte stream of declared total length into `sink`
///
/// Writes every chunk in order, reporting cumulative progress after each one.
/// On end of stream the sink is flushed and shut down (a no-op for in-memory
/// sinks), then the received byte count is verified against `declared_len`.
///
/// # Errors
///
/// Returns [`Error::TruncatedStream`] when the stream ends before
/// `declared_len` bytes arrived, or [`Error::Io`] on sink/source failures.
/// A failed copy never reports success, so a half-written sink is always
/// accompanied by an error.
pub async fn copy_stream<S, W>(
    mut stream: S,
    declared_len: u64,
    sink: &mut W,
    reporter: &ProgressReporter,
) -> Result<()>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        // Write in bounded pieces so progress stays at chunk granularity even
        // when the source hands us megabyte-sized frames.
        for piece in chunk.chunks(CHUNK_SIZE) {
            sink.write_all(piece).await?;
            received += piece.len() as u64;
            reporter.stream_progress(received, declared_len);
        }
    }

    sink.flush().await?;
    sink.shutdown().await?;

    if received != declared_len {
        debug!(received, declared_len, "stream ended early");
        return Err(Error::TruncatedStream {
            expected: declared_len,
            received,
        });
    }

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, TrackId};
    use tokio::sync::broadcast;

    fn reporter() -> (ProgressReporter, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(1024);
        (ProgressReporter::new(tx, TrackId::new(1), true), rx)
    }

    fn stream_of(chunks: Vec<&'static [u8]>) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
        futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn exact_length_copy_succeeds_with_bytes_in_order() {
        let (reporter, _rx) = reporter();
        let mut sink = Vec::new();
        let stream = stream_of(vec![b"hello ", b"world"]);

        copy_stream(stream, 11, &mut sink, &reporter).await.unwrap();

        assert_eq!(sink, b"hello world");
    }

    #[tokio::test]
    async fn short_stream_fails_with_truncation() {
        let (reporter, _rx) = reporter();
        let mut sink = Vec::new();
        let stream = stream_of(vec![b"hello"]);

        let err = copy_stream(stream, 100, &mut sink, &reporter)
            .await
            .unwrap_err();

        match err {
            Error::TruncatedStream { expected, received } => {
                assert_eq!(expected, 100);
                assert_eq!(received, 5);
            }
            other => panic!("expected TruncatedStream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn over_delivery_also_fails() {
        // A source delivering more than declared is just as suspect
        let (reporter, _rx) = reporter();
        let mut sink = Vec::new();
        let stream = stream_of(vec![b"hello world"]);

        assert!(copy_stream(stream, 5, &mut sink, &reporter).await.is_err());
    }

    #[tokio::test]
    async fn progress_is_cumulative_and_reaches_total() {
        let (reporter, mut rx) = reporter();
        let mut sink = Vec::new();
        let stream = stream_of(vec![b"aaaa", b"bbbb", b"cc"]);

        copy_stream(stream, 10, &mut sink, &reporter).await.unwrap();

        let mut last = 0;
        let mut events = 0;
        while let Ok(event) = rx.try_recv() {
            if let Event::StreamProgress {
                received, total, ..
            } = event
            {
                assert!(received > last, "progress must advance");
                assert_eq!(total, 10);
                last = received;
                events += 1;
            }
        }
        assert_eq!(last, 10);
        assert_eq!(events, 3);
    }

    #[tokio::test]
    async fn large_frames_are_split_at_chunk_granularity() {
        let (reporter, mut rx) = reporter();
        let mut sink = Vec::new();
        let big = vec![0xABu8; CHUNK_SIZE * 2 + 100];
        let len = big.len() as u64;
        let stream = futures::stream::iter(vec![Ok(Bytes::from(big.clone()))]);

        copy_stream(stream, len, &mut sink, &reporter).await.unwrap();

        assert_eq!(sink, big);
        let mut reports = 0;
        while rx.try_recv().is_ok() {
            reports += 1;
        }
        assert_eq!(reports, 3);
    }

    #[tokio::test]
    async fn source_error_propagates_as_io() {
        let (reporter, _rx) = reporter();
        let mut sink = Vec::new();
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("reset by peer")),
        ]);

        let err = copy_stream(stream, 6, &mut sink, &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
