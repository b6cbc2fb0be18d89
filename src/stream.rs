use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::try_stream;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::poll_fn;
use futures::stream::BoxStream;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::limiter::TokenBucket;
use crate::range::ByteRange;
use crate::AsyncSeekStart;

/// Copies byte ranges out of a source in fixed-size chunks, pacing every
/// chunk through a [`TokenBucket`] before it is released.
///
/// One copier serves one transfer. Its bucket is not shared, so the ceiling
/// applies per transfer rather than across all of them.
#[derive(Debug)]
pub struct RangeCopier {
    limiter: TokenBucket,
    buffer_size: usize,
}

impl RangeCopier {
    pub fn new(rate_limit: u64, buffer_size: usize) -> Self {
        RangeCopier {
            limiter: TokenBucket::new(rate_limit),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Start reading `length` bytes at `start` of a `resource_len` byte source.
    pub fn reader<'a, R>(&'a mut self, source: &'a mut R, resource_len: u64, start: u64, length: u64) -> RangeReader<'a, R>
    where
        R: AsyncRead + AsyncSeekStart + Unpin,
    {
        // a range spanning the whole resource reads to end-of-input
        let remaining = if length == resource_len { None } else { Some(length) };
        RangeReader {
            source,
            limiter: &mut self.limiter,
            buffer_size: self.buffer_size,
            start,
            positioned: false,
            remaining,
        }
    }

    /// Copy `length` bytes at `start` into `sink`, flushing after every chunk.
    ///
    /// A failing sink aborts the copy with its error. Whatever was flushed
    /// before the failure stays delivered.
    pub async fn copy<R, W>(
        &mut self,
        source: &mut R,
        sink: &mut W,
        resource_len: u64,
        start: u64,
        length: u64,
    ) -> io::Result<u64>
    where
        R: AsyncRead + AsyncSeekStart + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = self.reader(source, resource_len, start, length);
        let mut copied = 0;
        while let Some(chunk) = reader.next_chunk().await? {
            if let Err(e) = write_flushed(sink, &chunk).await {
                warn!(copied, error = %e, "transfer aborted by sink");
                return Err(e);
            }
            copied += chunk.len() as u64;
        }
        Ok(copied)
    }
}

async fn write_flushed<W: AsyncWrite + Unpin>(sink: &mut W, chunk: &[u8]) -> io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}

/// Pulls one range out of a source, one paced chunk at a time.
pub struct RangeReader<'a, R> {
    source: &'a mut R,
    limiter: &'a mut TokenBucket,
    buffer_size: usize,
    start: u64,
    positioned: bool,
    // `None` reads until the source is exhausted
    remaining: Option<u64>,
}

impl<R: AsyncRead + AsyncSeekStart + Unpin> RangeReader<'_, R> {
    /// The next chunk, after the rate limiter has admitted it. `None` once
    /// the range is complete.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if !self.positioned {
            Pin::new(&mut *self.source).start_seek(self.start)?;
            poll_fn(|cx| Pin::new(&mut *self.source).poll_complete(cx)).await?;
            self.positioned = true;
        }

        let want = match self.remaining {
            Some(0) => return Ok(None),
            Some(remaining) => usize::try_from(remaining).map_or(self.buffer_size, |r| r.min(self.buffer_size)),
            None => self.buffer_size,
        };

        let mut chunk = vec![0; want];
        let read = self.source.read(&mut chunk).await?;
        if read == 0 {
            return match self.remaining {
                None => Ok(None),
                Some(remaining) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {remaining} bytes short of the range"),
                )),
            };
        }
        chunk.truncate(read);

        self.limiter.acquire(read).await;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= read as u64;
        }
        Ok(Some(Bytes::from(chunk)))
    }
}

/// Response body stream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// The source is owned by the stream and closed when the stream is dropped,
/// whether the body completed or the peer went away mid-transfer.
#[pin_project]
pub struct RangedStream {
    length: u64,
    #[pin]
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl RangedStream {
    /// A stream of exactly `length` bytes.
    pub fn new(length: u64, inner: BoxStream<'static, io::Result<Bytes>>) -> Self {
        RangedStream { length, inner }
    }

    /// Stream a single range, or the full file.
    pub fn single<R>(source: R, copier: RangeCopier, range: ByteRange) -> Self
    where
        R: AsyncRead + AsyncSeekStart + Unpin + Send + 'static,
    {
        RangedStream::new(range.length, Box::pin(single_range(source, copier, range)))
    }

    /// Stream `multipart/byteranges` parts. Each part is its preamble
    /// followed by the bytes of its range; `closing` ends the body.
    pub fn multipart<R>(source: R, copier: RangeCopier, parts: Vec<(Bytes, ByteRange)>, closing: Bytes) -> Self
    where
        R: AsyncRead + AsyncSeekStart + Unpin + Send + 'static,
    {
        let length = parts
            .iter()
            .map(|(preamble, range)| preamble.len() as u64 + range.length)
            .sum::<u64>()
            + closing.len() as u64;
        RangedStream::new(length, Box::pin(multipart_ranges(source, copier, parts, closing)))
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

fn single_range<R>(mut source: R, mut copier: RangeCopier, range: ByteRange) -> impl Stream<Item = io::Result<Bytes>>
where
    R: AsyncRead + AsyncSeekStart + Unpin + Send + 'static,
{
    try_stream! {
        let mut reader = copier.reader(&mut source, range.total, range.start, range.length);
        while let Some(chunk) = reader.next_chunk().await? {
            yield chunk;
        }
        debug!(%range, "range delivered");
    }
}

fn multipart_ranges<R>(
    mut source: R,
    mut copier: RangeCopier,
    parts: Vec<(Bytes, ByteRange)>,
    closing: Bytes,
) -> impl Stream<Item = io::Result<Bytes>>
where
    R: AsyncRead + AsyncSeekStart + Unpin + Send + 'static,
{
    try_stream! {
        for (preamble, range) in parts {
            yield preamble;
            let mut reader = copier.reader(&mut source, range.total, range.start, range.length);
            while let Some(chunk) = reader.next_chunk().await? {
                yield chunk;
            }
            debug!(%range, "part delivered");
        }
        yield closing;
    }
}

impl IntoResponse for RangedStream {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl Body for RangedStream {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl Stream for RangedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<io::Result<Bytes>>> {
        self.project().inner.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    use futures::{pin_mut, StreamExt};
    use tokio::time::Instant;

    const FIXTURE: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    fn source() -> Cursor<Vec<u8>> {
        Cursor::new(FIXTURE.to_vec())
    }

    async fn collect_stream(stream: impl Stream<Item = io::Result<Bytes>>) -> Vec<u8> {
        let mut body = Vec::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await.transpose().unwrap() {
            body.extend_from_slice(&chunk);
        }
        body
    }

    /// Accepts `limit` bytes, then fails like a closed connection.
    struct BrokenPipe {
        written: Vec<u8>,
        limit: usize,
        flushes: usize,
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.written.len() >= self.limit {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            self.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_copy_full() {
        let mut copier = RangeCopier::new(u64::MAX, 16);
        let mut sink = Vec::new();
        let copied = copier.copy(&mut source(), &mut sink, 62, 0, 62).await.unwrap();
        assert_eq!(62, copied);
        assert_eq!(FIXTURE, &sink[..]);
    }

    #[tokio::test]
    async fn test_copy_every_range_exactly() {
        for (start, end) in [(0, 0), (0, 9), (10, 35), (15, 16), (61, 61), (1, 61), (0, 60)] {
            let range = ByteRange::new(start, end, 62);
            let mut copier = RangeCopier::new(u64::MAX, 7);
            let mut sink = Vec::new();
            let copied = copier
                .copy(&mut source(), &mut sink, 62, range.start, range.length)
                .await
                .unwrap();
            assert_eq!(range.length, copied, "{range}");
            assert_eq!(&FIXTURE[start as usize..=end as usize], &sink[..], "{range}");
        }
    }

    #[tokio::test]
    async fn test_flushes_every_chunk() {
        let mut copier = RangeCopier::new(u64::MAX, 10);
        let mut sink = BrokenPipe { written: Vec::new(), limit: usize::MAX, flushes: 0 };
        copier.copy(&mut source(), &mut sink, 62, 5, 25).await.unwrap();
        // 10 + 10 + 5
        assert_eq!(3, sink.flushes);
        assert_eq!(&FIXTURE[5..30], &sink.written[..]);
    }

    #[tokio::test]
    async fn test_sink_failure_aborts() {
        let mut copier = RangeCopier::new(u64::MAX, 10);
        let mut sink = BrokenPipe { written: Vec::new(), limit: 20, flushes: 0 };
        let err = copier.copy(&mut source(), &mut sink, 62, 0, 62).await.unwrap_err();
        assert_eq!(io::ErrorKind::BrokenPipe, err.kind());
        assert_eq!(&FIXTURE[..20], &sink.written[..]);
    }

    #[tokio::test]
    async fn test_short_source() {
        let mut copier = RangeCopier::new(u64::MAX, 10);
        let mut sink = Vec::new();
        // claims 100 bytes, only 62 exist
        let err = copier.copy(&mut source(), &mut sink, 100, 50, 30).await.unwrap_err();
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
        assert_eq!(&FIXTURE[50..], &sink[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_is_paced() {
        let data = vec![7u8; 10_000];
        let mut copier = RangeCopier::new(1_000, 1_000);
        let mut sink = Vec::new();
        let started = Instant::now();
        copier.copy(&mut Cursor::new(data), &mut sink, 10_000, 0, 10_000).await.unwrap();
        assert_eq!(10_000, sink.len());
        // every chunk but the first waits for the one before it
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_single_stream() {
        let range = ByteRange::new(10, 35, 62);
        let stream = RangedStream::single(source(), RangeCopier::new(u64::MAX, 4), range);
        assert_eq!(26, stream.len());
        assert_eq!(Some(26), Body::size_hint(&stream).exact());
        assert_eq!(&FIXTURE[10..=35], &collect_stream(stream).await[..]);
    }

    #[tokio::test]
    async fn test_multipart_stream_in_request_order() {
        let parts = vec![
            (Bytes::from_static(b"<a>"), ByteRange::new(20, 29, 62)),
            (Bytes::from_static(b"<b>"), ByteRange::new(0, 4, 62)),
            (Bytes::from_static(b"<c>"), ByteRange::new(2, 3, 62)),
        ];
        let stream = RangedStream::multipart(source(), RangeCopier::new(u64::MAX, 8), parts, Bytes::from_static(b"<end>"));
        let expected = b"<a>KLMNOPQRST<b>01234<c>23<end>";
        assert_eq!(expected.len() as u64, stream.len());
        assert_eq!(&expected[..], &collect_stream(stream).await[..]);
    }
}
