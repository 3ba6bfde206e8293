/*!
 * Capabilities consumed from the backing store
 *
 * The backing store is reached through three narrow traits so that the
 * filesystem core never depends on a particular client library:
 * - `RemoteStream`: one open file, read sequentially, repositioned by an
 *   explicit (and expensive) seek
 * - `FileWriter`: the write path of one open file
 * - `RemoteAccessor`: namespace operations (stat, open, chmod, chown)
 */

use std::time::SystemTime;

use crate::error::Result;

/// Result of a single remote read call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes placed at the front of the caller's buffer
    pub bytes_read: usize,

    /// The stream has no more data after these bytes
    pub end_of_stream: bool,
}

impl ReadOutcome {
    /// Some bytes, more may follow
    pub fn data(bytes_read: usize) -> Self {
        Self {
            bytes_read,
            end_of_stream: false,
        }
    }

    /// Nothing left
    pub fn eof() -> Self {
        Self {
            bytes_read: 0,
            end_of_stream: true,
        }
    }
}

/// Sequential reader over one open remote file
///
/// Short reads are normal and are not an error. End of stream is reported
/// through [`ReadOutcome::end_of_stream`] (a zero-byte read is treated the
/// same way by callers).
pub trait RemoteStream: Send {
    /// Read up to `buf.len()` bytes at the current remote position
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Move the remote position to the absolute `offset`
    fn seek(&mut self, offset: i64) -> Result<()>;

    /// Close the stream
    fn close(&mut self) -> Result<()>;
}

/// Write path of one open remote file
pub trait FileWriter: Send {
    /// Write `data` at `offset`, returning the number of bytes accepted
    fn write(&mut self, offset: i64, data: &[u8]) -> Result<usize>;

    /// Push buffered data to the backing store
    fn flush(&mut self) -> Result<()>;

    /// Flush and close
    fn close(&mut self) -> Result<()>;
}

/// Metadata of a file on the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attrs {
    /// Base name
    pub name: String,

    /// Size in bytes
    pub size: u64,

    /// Permission bits (e.g. 0o644)
    pub mode: u32,

    /// Owner uid
    pub uid: u32,

    /// Owner gid
    pub gid: u32,

    /// Last modification time
    pub mtime: SystemTime,
}

impl Attrs {
    /// Attributes of a regular file with default ownership
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: SystemTime::UNIX_EPOCH,
        }
    }

    /// Number of 512-byte blocks, as reported by stat(2)
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }
}

/// Namespace operations on the backing store
pub trait RemoteAccessor: Send + Sync {
    /// Fetch metadata for `path`
    fn stat(&self, path: &str) -> Result<Attrs>;

    /// Open `path` for sequential reading, positioned at offset 0
    fn open_read(&self, path: &str) -> Result<Box<dyn RemoteStream>>;

    /// Open `path` for writing; `truncate` starts a new, empty file
    fn open_write(&self, path: &str, truncate: bool) -> Result<Box<dyn FileWriter>>;

    /// Change permission bits
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    /// Change owner and group by name
    fn chown(&self, path: &str, user: &str, group: &str) -> Result<()>;
}
