//! Byte range sources for outbound transfers.

use crate::error::{REASON_SOURCE_ENDED, TransferError, TransferResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Produces the next byte range of an object.
///
/// Every implementation yields exactly [`ChunkSource::total_size`] bytes in
/// total, then `None`.
#[async_trait]
pub trait ChunkSource: Send {
    /// Declared object size
    fn total_size(&self) -> u64;

    /// Next range of at most `max` bytes, or `None` once the declared size
    /// has been produced.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Source` if the underlying reader fails or ends
    /// before the declared size.
    async fn next_range(&mut self, max: usize) -> TransferResult<Option<Bytes>>;
}

/// Whole in-memory object, sliced without copying
#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Bytes,
    offset: usize,
}

impl BufferSource {
    /// Create a source over `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
        }
    }
}

#[async_trait]
impl ChunkSource for BufferSource {
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn next_range(&mut self, max: usize) -> TransferResult<Option<Bytes>> {
        if self.offset >= self.data.len() || max == 0 {
            return Ok(None);
        }
        let end = self.offset.saturating_add(max).min(self.data.len());
        let range = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(Some(range))
    }
}

/// Object read incrementally from an [`AsyncRead`]
pub struct StreamSource<R> {
    reader: R,
    total: u64,
    produced: u64,
}

impl<R> StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a source reading `total` bytes from `reader`
    pub fn new(reader: R, total: u64) -> Self {
        Self {
            reader,
            total,
            produced: 0,
        }
    }
}

impl<R> std::fmt::Debug for StreamSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("total", &self.total)
            .field("produced", &self.produced)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R> ChunkSource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn total_size(&self) -> u64 {
        self.total
    }

    async fn next_range(&mut self, max: usize) -> TransferResult<Option<Bytes>> {
        let remaining = self.total - self.produced;
        if remaining == 0 || max == 0 {
            return Ok(None);
        }

        let want = usize::try_from(remaining).map_or(max, |r| r.min(max));
        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;

        // Short reads are normal for streams; keep going until the range is full.
        while filled < want {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(|e| TransferError::Source(format!("read failed: {e}").into()))?;
            if n == 0 {
                return Err(TransferError::Source(REASON_SOURCE_ENDED.into()));
            }
            filled += n;
        }

        self.produced += want as u64;
        Ok(Some(buf.freeze()))
    }
}

/// File on disk, streamed in chunk-sized reads
pub type FileSource = StreamSource<tokio::fs::File>;

impl StreamSource<tokio::fs::File> {
    /// Open `path`; the declared size is the file's length at open time.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Source` if the file cannot be opened or is not
    /// a regular file.
    pub async fn open(path: impl AsRef<Path>) -> TransferResult<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TransferError::Source(format!("{}: {e}", path.display()).into()))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| TransferError::Source(format!("{}: {e}", path.display()).into()))?;
        if !metadata.is_file() {
            return Err(TransferError::Source(
                format!("{}: not a regular file", path.display()).into(),
            ));
        }
        Ok(Self::new(file, metadata.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn drain(source: &mut dyn ChunkSource, max: usize) -> TransferResult<Vec<Bytes>> {
        let mut ranges = Vec::new();
        while let Some(range) = source.next_range(max).await? {
            ranges.push(range);
        }
        Ok(ranges)
    }

    #[tokio::test]
    async fn test_buffer_source_chunks() {
        let mut source = BufferSource::new(vec![7u8; 40 * 1024]);
        assert_eq!(source.total_size(), 40960);

        let ranges = drain(&mut source, 16 * 1024).await.unwrap();
        let sizes: Vec<_> = ranges.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![16384, 16384, 8192]);
    }

    #[tokio::test]
    async fn test_buffer_source_empty() {
        let mut source = BufferSource::new(Bytes::new());
        assert_eq!(source.total_size(), 0);
        assert!(source.next_range(1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_source_fills_chunks_across_short_reads() {
        // Reader that hands out 3 bytes at a time
        let data: Vec<u8> = (0..100u8).collect();
        let reader = slow_reader(data.clone(), 3);
        let mut source = StreamSource::new(reader, 100);

        let ranges = drain(&mut source, 32).await.unwrap();
        let sizes: Vec<_> = ranges.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);

        let joined: Vec<u8> = ranges.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_stream_source_never_reads_past_total() {
        let reader = std::io::Cursor::new(vec![1u8; 64]);
        let mut source = StreamSource::new(reader, 10);

        let ranges = drain(&mut source, 16).await.unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].len(), 10);
    }

    #[tokio::test]
    async fn test_stream_source_ended_early() {
        let reader = std::io::Cursor::new(vec![1u8; 20]);
        let mut source = StreamSource::new(reader, 50);

        assert_eq!(source.next_range(16).await.unwrap().unwrap().len(), 16);
        let err = source.next_range(16).await.unwrap_err();
        assert_eq!(err.wire_reason(), "source ended early");
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 5000]).unwrap();
        file.flush().unwrap();

        let mut source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.total_size(), 5000);
        let ranges = drain(&mut source, 2048).await.unwrap();
        assert_eq!(ranges.iter().map(Bytes::len).sum::<usize>(), 5000);
        assert_eq!(ranges.len(), 3);
    }

    #[tokio::test]
    async fn test_file_source_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::Source(_)));
    }

    fn slow_reader(data: Vec<u8>, step: usize) -> impl AsyncRead + Unpin + Send {
        SlowReader { data, pos: 0, step }
    }

    struct SlowReader {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl AsyncRead for SlowReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let end = (self.pos + self.step).min(self.data.len()).min(self.pos + buf.remaining());
            let pos = self.pos;
            buf.put_slice(&self.data[pos..end]);
            self.pos = end;
            std::task::Poll::Ready(Ok(()))
        }
    }
}
