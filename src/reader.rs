/*!
 * Buffered random-access reader over a sequential remote stream
 *
 * The remote stream only reads forward and treats seek as expensive. The
 * reader keeps the bytes it has already pulled in a contiguous buffer
 * tagged with the absolute offset of its first byte, and tracks where the
 * remote cursor is expected to be (always the end of the buffer).
 *
 * For each request at `offset` it picks the cheapest way to get there:
 * - offset inside `[buffer_start, expected_pos]`: no repositioning
 * - offset ahead of `expected_pos` by at most `seek_threshold`: read
 *   through the gap ("catch up")
 * - anything else (large forward gap, or behind the buffer): one seek,
 *   buffer discarded
 *
 * It then reads forward until the requested range is covered or the stream
 * ends, serves the range from the buffer, and trims the buffer front down
 * to `max_retained_bytes`.
 */

use orbit_core_resilience::RetryPolicy;

use crate::config::ReaderConfig;
use crate::error::{MountError, Result};
use crate::remote::RemoteStream;

/// Remote call counters, mostly for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Successful remote read calls
    pub remote_reads: u64,

    /// Successful explicit seeks
    pub seeks: u64,

    /// Bytes received from the remote stream
    pub bytes_fetched: u64,
}

pub struct BufferedReader {
    path: String,
    stream: Box<dyn RemoteStream>,
    retry: RetryPolicy,
    config: ReaderConfig,

    /// Bytes fetched in file order since the last seek (or trim)
    buffer: Vec<u8>,
    /// Absolute offset of `buffer[0]`
    buffer_start: i64,
    /// Where the remote cursor sits; always `buffer_start + buffer.len()`
    expected_pos: i64,
    /// Remote reported end of stream at `expected_pos`
    eof: bool,
    /// False after a failed remote call; the remote cursor is then unknown
    in_sync: bool,

    stats: ReaderStats,
}

impl BufferedReader {
    /// Wrap a freshly opened stream positioned at offset 0
    pub fn new(
        path: impl Into<String>,
        stream: Box<dyn RemoteStream>,
        retry: RetryPolicy,
        config: ReaderConfig,
    ) -> Self {
        Self {
            path: path.into(),
            stream,
            retry,
            config,
            buffer: Vec::new(),
            buffer_start: 0,
            expected_pos: 0,
            eof: false,
            in_sync: true,
            stats: ReaderStats::default(),
        }
    }

    /// Return up to `size` bytes starting exactly at `offset`
    ///
    /// Fewer bytes are returned only at end of file. A read at or past the
    /// end of file returns an empty vector, not an error.
    pub fn read(&mut self, offset: i64, size: usize) -> Result<Vec<u8>> {
        if offset < 0 {
            return Err(MountError::InvalidOffset(offset));
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        self.position_for(offset)?;

        let target_end = offset.saturating_add(i64::try_from(size).unwrap_or(i64::MAX));
        self.fill_to(target_end)?;

        let data = self.slice(offset, target_end);
        self.trim();
        Ok(data)
    }

    /// Offset of the first retained byte
    pub fn buffer_start(&self) -> i64 {
        self.buffer_start
    }

    /// Number of retained bytes
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Where the remote cursor is expected to be
    pub fn expected_pos(&self) -> i64 {
        self.expected_pos
    }

    /// True once the remote stream reported end of stream
    pub fn at_eof(&self) -> bool {
        self.eof
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Close the remote stream; consumes the reader so it can only happen once
    pub fn close(mut self) -> Result<()> {
        tracing::debug!(
            path = %self.path,
            remote_reads = self.stats.remote_reads,
            seeks = self.stats.seeks,
            bytes_fetched = self.stats.bytes_fetched,
            "Closing remote reader"
        );
        self.stream.close()
    }

    /// Bring the remote cursor to a place from which `offset` can be served
    fn position_for(&mut self, offset: i64) -> Result<()> {
        if !self.in_sync {
            return self.seek_to(offset);
        }

        // Inside the buffer, or exactly continuing it
        if offset >= self.buffer_start && offset <= self.expected_pos {
            return Ok(());
        }

        if offset > self.expected_pos {
            // Past the known end of file: nothing to fetch
            if self.eof {
                return Ok(());
            }

            let gap = offset.abs_diff(self.expected_pos);
            if gap <= self.config.seek_threshold {
                tracing::trace!(
                    path = %self.path,
                    from = self.expected_pos,
                    to = offset,
                    "Catching up without seek"
                );
                return self.fill_to(offset);
            }
        }

        self.seek_to(offset)
    }

    /// Explicitly reposition the remote stream and drop the buffer
    fn seek_to(&mut self, offset: i64) -> Result<()> {
        tracing::debug!(
            path = %self.path,
            from = self.expected_pos,
            to = offset,
            "Seeking remote stream"
        );

        let stream = &mut self.stream;
        let result = self.retry.execute("seek", |_| stream.seek(offset));

        self.discard_buffer();
        self.eof = false;
        match result {
            Ok(()) => {
                self.buffer_start = offset;
                self.expected_pos = offset;
                self.in_sync = true;
                self.stats.seeks += 1;
                Ok(())
            }
            Err(e) => {
                self.in_sync = false;
                Err(e)
            }
        }
    }

    /// Read forward until `expected_pos >= target` or end of stream
    fn fill_to(&mut self, target: i64) -> Result<()> {
        let max_request = self.config.read_chunk_size.max(self.config.max_retained_bytes);

        while self.expected_pos < target && !self.eof {
            let remaining = usize::try_from(target - self.expected_pos).unwrap_or(usize::MAX);
            let request = remaining.clamp(self.config.read_chunk_size, max_request);

            let old_len = self.buffer.len();
            self.buffer.resize(old_len + request, 0);

            let resume_at = self.expected_pos;
            let stream = &mut self.stream;
            let chunk = &mut self.buffer[old_len..];
            let result = self.retry.execute("read", |attempt| {
                // A failed read leaves the remote cursor undefined
                if attempt > 1 {
                    stream.seek(resume_at)?;
                }
                stream.read(&mut chunk[..])
            });

            match result {
                Ok(outcome) => {
                    let n = outcome.bytes_read.min(request);
                    self.buffer.truncate(old_len + n);
                    self.expected_pos += n as i64;
                    self.stats.remote_reads += 1;
                    self.stats.bytes_fetched += n as u64;
                    if outcome.end_of_stream || n == 0 {
                        tracing::trace!(path = %self.path, at = self.expected_pos, "End of stream");
                        self.eof = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path,
                        at = resume_at,
                        error = %e,
                        "Remote read failed"
                    );
                    self.discard_buffer();
                    self.in_sync = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Copy `[offset, min(end, expected_pos))` out of the buffer
    fn slice(&self, offset: i64, end: i64) -> Vec<u8> {
        if offset < self.buffer_start || offset >= self.expected_pos {
            return Vec::new();
        }
        let from = (offset - self.buffer_start) as usize;
        let to = (end.min(self.expected_pos) - self.buffer_start) as usize;
        self.buffer[from..to].to_vec()
    }

    /// Drop every retained byte; the empty buffer starts at `expected_pos`
    fn discard_buffer(&mut self) {
        self.buffer.clear();
        self.buffer_start = self.expected_pos;
    }

    /// Keep at most `max_retained_bytes`, dropping the oldest
    fn trim(&mut self) {
        if self.buffer.len() > self.config.max_retained_bytes {
            let excess = self.buffer.len() - self.config.max_retained_bytes;
            self.buffer.drain(..excess);
            self.buffer_start += excess as i64;
        }
    }
}
