/*!
 * Open sessions on a file
 *
 * A `FileHandle` owns at most one buffered reader and at most one remote
 * writer. Every operation on a handle runs under the handle's own lock, so
 * reads, writes, flushes and the final release never interleave for one
 * session. Different handles proceed in parallel, each with its own remote
 * cursor and buffer.
 *
 * ```text
 *                 enable_read                 enable_write
 *   NotOpened ───────────────▶ ReadOnly ─────────────────▶ ReadWrite
 *       │                                                      ▲
 *       │  enable_write                       enable_read      │
 *       └────────────────────▶ WriteOnly ──────────────────────┘
 *
 *   any state ── release ──▶ Closed
 * ```
 */

use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{MountError, Result};
use crate::file::File;
use crate::reader::BufferedReader;
use crate::remote::{Attrs, FileWriter};

/// Access mode requested at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Decoded POSIX open flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub access: AccessMode,

    /// Writes continue the existing file instead of starting a new one
    pub append: bool,
}

impl OpenFlags {
    /// Decode `O_RDONLY` / `O_WRONLY` / `O_RDWR` and `O_APPEND`
    pub fn from_raw(flags: i32) -> Self {
        let access = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => AccessMode::WriteOnly,
            libc::O_RDWR => AccessMode::ReadWrite,
            _ => AccessMode::ReadOnly,
        };
        Self {
            access,
            append: flags & libc::O_APPEND != 0,
        }
    }

    pub fn read_only() -> Self {
        Self {
            access: AccessMode::ReadOnly,
            append: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            access: AccessMode::WriteOnly,
            append: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            access: AccessMode::ReadWrite,
            append: false,
        }
    }

    pub fn with_append(mut self) -> Self {
        self.append = true;
        self
    }
}

/// Observable state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    NotOpened,
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Closed,
}

#[derive(Default)]
enum Mode {
    #[default]
    NotOpened,
    ReadOnly(BufferedReader),
    WriteOnly(Box<dyn FileWriter>),
    ReadWrite(BufferedReader, Box<dyn FileWriter>),
    Closed,
}

impl Mode {
    fn state(&self) -> HandleState {
        match self {
            Mode::NotOpened => HandleState::NotOpened,
            Mode::ReadOnly(_) => HandleState::ReadOnly,
            Mode::WriteOnly(_) => HandleState::WriteOnly,
            Mode::ReadWrite(..) => HandleState::ReadWrite,
            Mode::Closed => HandleState::Closed,
        }
    }

    fn reader_mut(&mut self) -> Option<&mut BufferedReader> {
        match self {
            Mode::ReadOnly(reader) | Mode::ReadWrite(reader, _) => Some(reader),
            _ => None,
        }
    }

    fn writer_mut(&mut self) -> Option<&mut Box<dyn FileWriter>> {
        match self {
            Mode::WriteOnly(writer) | Mode::ReadWrite(_, writer) => Some(writer),
            _ => None,
        }
    }

    fn into_parts(self) -> (Option<BufferedReader>, Option<Box<dyn FileWriter>>) {
        match self {
            Mode::ReadOnly(reader) => (Some(reader), None),
            Mode::WriteOnly(writer) => (None, Some(writer)),
            Mode::ReadWrite(reader, writer) => (Some(reader), Some(writer)),
            Mode::NotOpened | Mode::Closed => (None, None),
        }
    }
}

/// One open session on a [`File`]
pub struct FileHandle {
    id: u64,
    file: Arc<File>,
    mode: Mutex<Mode>,
}

impl FileHandle {
    pub(crate) fn new(id: u64, file: Arc<File>) -> Self {
        Self {
            id,
            file,
            mode: Mutex::new(Mode::NotOpened),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn state(&self) -> HandleState {
        self.mode.lock().state()
    }

    /// Attributes of the underlying file
    pub fn attr(&self) -> Result<Attrs> {
        self.file.attr()
    }

    /// Open the remote reader if this handle has none yet
    pub fn enable_read(&self) -> Result<()> {
        let mut mode = self.mode.lock();
        self.enable_read_locked(&mut mode)
    }

    /// Open the remote writer if this handle has none yet
    ///
    /// `truncate` only matters for the first successful call.
    pub fn enable_write(&self, truncate: bool) -> Result<()> {
        let mut mode = self.mode.lock();
        self.enable_write_locked(&mut mode, truncate)
    }

    /// Read up to `size` bytes at `offset`
    pub fn read(&self, offset: i64, size: usize) -> Result<Vec<u8>> {
        let mut mode = self.mode.lock();
        if matches!(*mode, Mode::WriteOnly(_)) {
            tracing::warn!(
                path = self.file.path(),
                handle = self.id,
                offset,
                "Reading from a handle opened for write"
            );
        }
        self.enable_read_locked(&mut mode)?;

        let reader = mode.reader_mut().ok_or(MountError::HandleClosed(self.id))?;
        reader.read(offset, size)
    }

    /// Write `data` at `offset`, returning the number of bytes accepted
    pub fn write(&self, offset: i64, data: &[u8]) -> Result<usize> {
        if offset < 0 {
            return Err(MountError::InvalidOffset(offset));
        }

        let mut mode = self.mode.lock();
        self.enable_write_locked(&mut mode, false)?;

        let writer = mode.writer_mut().ok_or(MountError::HandleClosed(self.id))?;
        writer.write(offset, data)
    }

    /// Flush the writer, if any
    pub fn flush(&self) -> Result<()> {
        match self.mode.lock().writer_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Same as [`flush`](Self::flush); the backing store has no separate
    /// durability barrier
    pub fn fsync(&self) -> Result<()> {
        self.flush()
    }

    /// Close the reader and writer, then detach from the file
    ///
    /// Cleanup always runs to completion; the first close error is
    /// returned. Releasing an already released handle does nothing.
    pub fn release(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.mode.lock(), Mode::Closed);
        if matches!(previous, Mode::Closed) {
            return Ok(());
        }

        let (reader, writer) = previous.into_parts();
        let mut first_error = None;

        if let Some(reader) = reader {
            if let Err(e) = reader.close() {
                tracing::warn!(path = self.file.path(), handle = self.id, error = %e, "Closing reader failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close() {
                tracing::warn!(path = self.file.path(), handle = self.id, error = %e, "Closing writer failed");
                first_error.get_or_insert(e);
            }
        }

        self.file.invalidate();
        self.file.remove_handle(self.id);
        tracing::info!(path = self.file.path(), handle = self.id, "Released");

        first_error.map_or(Ok(()), Err)
    }

    fn enable_read_locked(&self, mode: &mut Mode) -> Result<()> {
        match mode {
            Mode::Closed => Err(MountError::HandleClosed(self.id)),
            Mode::ReadOnly(_) | Mode::ReadWrite(..) => Ok(()),
            Mode::NotOpened | Mode::WriteOnly(_) => {
                let reader = self.open_reader()?;
                *mode = match std::mem::take(mode) {
                    Mode::WriteOnly(writer) => Mode::ReadWrite(reader, writer),
                    _ => Mode::ReadOnly(reader),
                };
                Ok(())
            }
        }
    }

    fn enable_write_locked(&self, mode: &mut Mode, truncate: bool) -> Result<()> {
        match mode {
            Mode::Closed => Err(MountError::HandleClosed(self.id)),
            Mode::WriteOnly(_) | Mode::ReadWrite(..) => Ok(()),
            Mode::NotOpened | Mode::ReadOnly(_) => {
                let writer = self
                    .file
                    .backend()
                    .accessor
                    .open_write(self.file.path(), truncate)?;
                tracing::debug!(path = self.file.path(), handle = self.id, truncate, "Writer enabled");
                *mode = match std::mem::take(mode) {
                    Mode::ReadOnly(reader) => Mode::ReadWrite(reader, writer),
                    _ => Mode::WriteOnly(writer),
                };
                Ok(())
            }
        }
    }

    fn open_reader(&self) -> Result<BufferedReader> {
        let backend = self.file.backend();
        let stream = backend.accessor.open_read(self.file.path())?;
        tracing::debug!(path = self.file.path(), handle = self.id, "Reader enabled");
        Ok(BufferedReader::new(
            self.file.path(),
            stream,
            backend.retry.clone(),
            backend.config.reader,
        ))
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("id", &self.id)
            .field("path", &self.file.path())
            .field("state", &self.state())
            .finish()
    }
}

/// Sequential `Read + Seek` view over a read-only handle
///
/// The handle is released by [`close`](Self::close) or on drop.
pub struct HandleCursor {
    handle: Arc<FileHandle>,
    pos: u64,
    released: bool,
}

impl HandleCursor {
    pub(crate) fn new(handle: Arc<FileHandle>) -> Self {
        Self {
            handle,
            pos: 0,
            released: false,
        }
    }

    pub fn handle(&self) -> &Arc<FileHandle> {
        &self.handle
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Release the handle, reporting close errors that drop would only log
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.handle.release()
    }
}

impl Read for HandleCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let offset = i64::try_from(self.pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position out of range"))?;

        let data = self.handle.read(offset, buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
}

impl Seek for HandleCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.handle.attr()?.size.checked_add_signed(delta),
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        Ok(self.pos)
    }
}

impl Drop for HandleCursor {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.handle.release() {
            tracing::warn!(handle = self.handle.id(), error = %e, "Release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use crate::mock::{Failure, MemoryAccessor, ScriptedStream, StaticIdentity, StreamCall};
    use crate::mount::MountedFs;
    use orbit_core_resilience::MockClock;

    fn mounted(accessor: &Arc<MemoryAccessor>) -> MountedFs {
        MountedFs::with_services(
            accessor.clone(),
            Arc::new(MockClock::new()),
            Arc::new(StaticIdentity::new()),
            MountConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_flags_from_raw() {
        assert_eq!(OpenFlags::from_raw(libc::O_RDONLY), OpenFlags::read_only());
        assert_eq!(OpenFlags::from_raw(libc::O_WRONLY), OpenFlags::write_only());
        assert_eq!(OpenFlags::from_raw(libc::O_RDWR), OpenFlags::read_write());
        assert_eq!(
            OpenFlags::from_raw(libc::O_WRONLY | libc::O_APPEND),
            OpenFlags::write_only().with_append()
        );
        assert!(!OpenFlags::from_raw(libc::O_RDONLY | libc::O_CREAT).append);
    }

    #[test]
    fn test_read_only_open_enables_reader_eagerly() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"hello");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDONLY).unwrap();
        assert_eq!(handle.state(), HandleState::ReadOnly);
        assert_eq!(accessor.log().open_reads, 1);
        assert_eq!(handle.read(1, 3).unwrap(), b"ell");
    }

    #[test]
    fn test_write_only_open_truncates_unless_append() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/new", b"old");
        accessor.add_file("/log", b"old");
        let fs = mounted(&accessor);

        let handle = fs.open("/new", libc::O_WRONLY).unwrap();
        assert_eq!(handle.state(), HandleState::WriteOnly);
        let appended = fs.open("/log", libc::O_WRONLY | libc::O_APPEND).unwrap();

        assert_eq!(
            accessor.log().open_writes,
            vec![("/new".to_string(), true), ("/log".to_string(), false)]
        );
        assert_eq!(accessor.content("/new").unwrap(), b"");
        assert_eq!(accessor.content("/log").unwrap(), b"old");
        handle.release().unwrap();
        appended.release().unwrap();
    }

    #[test]
    fn test_read_write_enables_writer_lazily() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDWR).unwrap();
        assert_eq!(handle.state(), HandleState::ReadOnly);
        assert!(accessor.log().open_writes.is_empty());

        assert_eq!(handle.write(3, b"def").unwrap(), 3);
        assert_eq!(handle.state(), HandleState::ReadWrite);
        assert_eq!(accessor.log().open_writes, vec![("/a".to_string(), false)]);
        assert_eq!(accessor.content("/a").unwrap(), b"abcdef");
    }

    #[test]
    fn test_read_on_write_only_handle_enables_reader() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_WRONLY).unwrap();
        handle.write(0, b"xyz").unwrap();
        assert_eq!(handle.read(0, 10).unwrap(), b"xyz");
        assert_eq!(handle.state(), HandleState::ReadWrite);
    }

    #[test]
    fn test_enable_is_idempotent() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDONLY).unwrap();
        handle.enable_read().unwrap();
        handle.enable_read().unwrap();
        handle.enable_write(false).unwrap();
        handle.enable_write(true).unwrap();

        let log = accessor.log();
        assert_eq!(log.open_reads, 1);
        assert_eq!(log.open_writes.len(), 1);
    }

    #[test]
    fn test_flush_without_writer_is_noop() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDONLY).unwrap();
        handle.flush().unwrap();
        handle.fsync().unwrap();
        assert_eq!(accessor.writer_log("/a").flushes, 0);

        handle.write(0, b"z").unwrap();
        handle.flush().unwrap();
        handle.fsync().unwrap();
        assert_eq!(accessor.writer_log("/a").flushes, 2);
    }

    #[test]
    fn test_release_closes_once_and_detaches() {
        let stream = ScriptedStream::new();
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_scripted_file("/s", &stream);
        let fs = mounted(&accessor);

        let file = fs.lookup("/s").unwrap();
        let handle = file.open(OpenFlags::read_only()).unwrap();
        assert_eq!(file.active_handles().len(), 1);

        handle.release().unwrap();
        handle.release().unwrap();

        assert_eq!(stream.calls(), vec![StreamCall::Close]);
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(file.active_handles().is_empty());
    }

    #[test]
    fn test_release_returns_first_close_error_and_still_cleans_up() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        accessor.fail_stream_close(Some(Failure::Remote));
        accessor.fail_writer_close(Some(Failure::PermissionDenied));
        let handle = fs.open("/a", libc::O_RDWR).unwrap();
        handle.write(3, b"d").unwrap();
        let file = handle.file().clone();
        let stats_before = accessor.log().stats;

        assert!(matches!(handle.release(), Err(MountError::Remote(_))));

        assert_eq!(accessor.writer_log("/a").closes, 1);
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(file.active_handles().is_empty());
        assert_eq!(file.attr().unwrap().size, 4);
        assert_eq!(accessor.log().stats, stats_before + 1);

        handle.release().unwrap();
        assert_eq!(accessor.writer_log("/a").closes, 1);
    }

    #[test]
    fn test_release_reports_writer_close_error() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        accessor.fail_writer_close(Some(Failure::Transient));
        let handle = fs.open("/a", libc::O_RDWR).unwrap();
        handle.write(0, b"A").unwrap();

        assert!(matches!(handle.release(), Err(MountError::Transient(_))));
        assert!(handle.file().active_handles().is_empty());
    }

    #[test]
    fn test_closed_handle_rejects_io() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDWR).unwrap();
        handle.release().unwrap();

        assert!(matches!(handle.read(0, 1), Err(MountError::HandleClosed(_))));
        assert!(matches!(handle.write(0, b"x"), Err(MountError::HandleClosed(_))));
        assert!(matches!(handle.enable_read(), Err(MountError::HandleClosed(_))));
        handle.flush().unwrap();
        handle.fsync().unwrap();
        assert_eq!(accessor.log().open_reads, 1);
    }

    #[test]
    fn test_negative_write_offset() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"abc");
        let fs = mounted(&accessor);

        let handle = fs.open("/a", libc::O_RDWR).unwrap();
        assert!(matches!(handle.write(-1, b"x"), Err(MountError::InvalidOffset(-1))));
        assert_eq!(handle.state(), HandleState::ReadOnly);
    }

    #[test]
    fn test_cursor_read_and_seek() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"0123456789");
        let fs = mounted(&accessor);
        let file = fs.lookup("/a").unwrap();

        let mut cursor = file.open_cursor().unwrap();
        let mut buf = [0u8; 4];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"0123");

        assert_eq!(cursor.seek(SeekFrom::End(-3)).unwrap(), 7);
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");

        assert_eq!(cursor.seek(SeekFrom::Current(-5)).unwrap(), 5);
        assert!(cursor.seek(SeekFrom::Current(-6)).is_err());
        assert_eq!(cursor.position(), 5);

        let handle = cursor.handle().clone();
        cursor.close().unwrap();
        assert_eq!(handle.state(), HandleState::Closed);
        assert!(file.active_handles().is_empty());
    }

    #[test]
    fn test_cursor_releases_on_drop() {
        let stream = ScriptedStream::new();
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_scripted_file("/s", &stream);
        let fs = mounted(&accessor);

        let cursor = fs.lookup("/s").unwrap().open_cursor().unwrap();
        drop(cursor);
        assert_eq!(stream.close_count(), 1);
    }
}
