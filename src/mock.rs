//! In-memory backends for testing
//!
//! These stand in for the backing store so the reader, handles and files
//! can be exercised without a cluster:
//! - `ScriptedStream`: replays a scripted sequence of read results and
//!   records every call, for exact assertions on seeks and reads
//! - `GeneratedStream`: a virtual file of any size whose byte at offset `o`
//!   is `byte_at(o)`, with deterministic short reads
//! - `MemoryAccessor`: a namespace of in-memory files with call logs and
//!   injectable failures
//! - `StaticIdentity`: fixed uid/gid name tables
//!
//! # Example
//!
//! ```rust
//! use orbit_mount::mock::ScriptedStream;
//! use orbit_mount::remote::RemoteStream;
//!
//! let stream = ScriptedStream::new();
//! stream.when_read_return(b"Hel");
//! stream.when_read_eof();
//!
//! let mut reader = stream.clone();
//! let mut buf = [0u8; 16];
//! assert_eq!(reader.read(&mut buf).unwrap().bytes_read, 3);
//! assert!(reader.read(&mut buf).unwrap().end_of_stream);
//! assert_eq!(stream.read_count(), 2);
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{MountError, Result};
use crate::identity::IdentityResolver;
use crate::remote::{Attrs, FileWriter, ReadOutcome, RemoteAccessor, RemoteStream};

/// A call observed by a [`ScriptedStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCall {
    Read,
    Seek(i64),
    Close,
}

#[derive(Debug)]
enum Step {
    Read { data: Vec<u8>, eof: bool },
    ReadFail(MountError),
    SeekFail(MountError),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    calls: Vec<StreamCall>,
}

/// Stream that replays scripted read results
///
/// Clones share the same script and call log, so a test can hand one clone
/// to the code under test and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStream {
    script: Arc<Mutex<Script>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next read returns `data` (more may follow)
    pub fn when_read_return(&self, data: &[u8]) {
        self.push(Step::Read {
            data: data.to_vec(),
            eof: false,
        });
    }

    /// Next read returns `data` together with end of stream
    pub fn when_read_return_final(&self, data: &[u8]) {
        self.push(Step::Read {
            data: data.to_vec(),
            eof: true,
        });
    }

    /// Next read reports end of stream with no data
    pub fn when_read_eof(&self) {
        self.when_read_return_final(&[]);
    }

    /// Next read fails with `error`
    pub fn when_read_fail(&self, error: MountError) {
        self.push(Step::ReadFail(error));
    }

    /// Next seek fails with `error`
    pub fn when_seek_fail(&self, error: MountError) {
        self.push(Step::SeekFail(error));
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<StreamCall> {
        self.script.lock().calls.clone()
    }

    /// Offsets of every seek, in order
    pub fn seeks(&self) -> Vec<i64> {
        self.script
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StreamCall::Seek(offset) => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.count(&StreamCall::Read)
    }

    pub fn close_count(&self) -> usize {
        self.count(&StreamCall::Close)
    }

    /// Scripted steps not consumed yet
    pub fn pending(&self) -> usize {
        self.script.lock().steps.len()
    }

    fn count(&self, call: &StreamCall) -> usize {
        self.script.lock().calls.iter().filter(|c| *c == call).count()
    }

    fn push(&self, step: Step) {
        self.script.lock().steps.push_back(step);
    }
}

impl RemoteStream for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let mut script = self.script.lock();
        script.calls.push(StreamCall::Read);

        match script.steps.pop_front() {
            Some(Step::Read { mut data, eof }) => {
                if data.len() > buf.len() {
                    // Hand out what fits; the remainder is the next read
                    let rest = data.split_off(buf.len());
                    script.steps.push_front(Step::Read { data: rest, eof });
                    buf.copy_from_slice(&data);
                    return Ok(ReadOutcome::data(data.len()));
                }
                buf[..data.len()].copy_from_slice(&data);
                Ok(ReadOutcome {
                    bytes_read: data.len(),
                    end_of_stream: eof,
                })
            }
            Some(Step::ReadFail(error)) => Err(error),
            Some(step @ Step::SeekFail(_)) => {
                script.steps.push_front(step);
                Err(MountError::Remote("unexpected read (seek failure scripted)".into()))
            }
            None => Err(MountError::Remote("unexpected read (script exhausted)".into())),
        }
    }

    fn seek(&mut self, offset: i64) -> Result<()> {
        let mut script = self.script.lock();
        script.calls.push(StreamCall::Seek(offset));

        if matches!(script.steps.front(), Some(Step::SeekFail(_))) {
            if let Some(Step::SeekFail(error)) = script.steps.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.script.lock().calls.push(StreamCall::Close);
        Ok(())
    }
}

/// Deterministic content of a generated virtual file at `offset`
pub fn byte_at(offset: i64) -> u8 {
    (offset ^ (offset >> 8) ^ (offset >> 19) ^ (offset >> 33)) as u8
}

#[derive(Debug, Default)]
struct GeneratedLog {
    reads: usize,
    seeks: usize,
    closes: usize,
}

/// Virtual file of `size` bytes whose content is [`byte_at`]
///
/// Read sizes vary with the position so callers see realistic short reads.
#[derive(Debug, Clone)]
pub struct GeneratedStream {
    size: i64,
    pos: i64,
    max_chunk: usize,
    log: Arc<Mutex<GeneratedLog>>,
}

impl GeneratedStream {
    pub fn new(size: i64) -> Self {
        Self {
            size,
            pos: 0,
            max_chunk: 48 * 1024,
            log: Arc::new(Mutex::new(GeneratedLog::default())),
        }
    }

    pub fn read_count(&self) -> usize {
        self.log.lock().reads
    }

    pub fn seek_count(&self) -> usize {
        self.log.lock().seeks
    }

    pub fn close_count(&self) -> usize {
        self.log.lock().closes
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Largest read this stream will return for the current position
    fn chunk_limit(&self) -> usize {
        let spread = (self.pos as u64).wrapping_mul(2_654_435_761) >> 7;
        1 + (spread % self.max_chunk as u64) as usize
    }
}

impl RemoteStream for GeneratedStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.log.lock().reads += 1;

        if self.pos >= self.size {
            return Ok(ReadOutcome::eof());
        }

        let left = usize::try_from(self.size - self.pos).unwrap_or(usize::MAX);
        let n = buf.len().min(left).min(self.chunk_limit());
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = byte_at(self.pos + i as i64);
        }
        self.pos += n as i64;
        Ok(ReadOutcome::data(n))
    }

    fn seek(&mut self, offset: i64) -> Result<()> {
        self.log.lock().seeks += 1;
        if offset < 0 {
            return Err(MountError::InvalidOffset(offset));
        }
        self.pos = offset;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().closes += 1;
        Ok(())
    }
}

/// Stream over shared in-memory content
#[derive(Debug)]
struct BytesStream {
    content: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl RemoteStream for BytesStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let content = self.content.lock();
        if self.pos >= content.len() {
            return Ok(ReadOutcome::eof());
        }
        let n = buf.len().min(content.len() - self.pos);
        buf[..n].copy_from_slice(&content[self.pos..self.pos + n]);
        self.pos += n;
        Ok(ReadOutcome::data(n))
    }

    fn seek(&mut self, offset: i64) -> Result<()> {
        self.pos = usize::try_from(offset).map_err(|_| MountError::InvalidOffset(offset))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Stream whose close fails after closing the wrapped stream
struct FailingClose {
    inner: Box<dyn RemoteStream>,
    error: Option<MountError>,
}

impl RemoteStream for FailingClose {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.inner.read(buf)
    }

    fn seek(&mut self, offset: i64) -> Result<()> {
        self.inner.seek(offset)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()?;
        self.error.take().map_or(Ok(()), Err)
    }
}

/// What a [`RecordingWriter`] has been asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterLog {
    pub writes: usize,
    pub bytes_written: usize,
    pub flushes: usize,
    pub closes: usize,
}

/// Writer that patches shared in-memory content and logs its calls
///
/// Failed flushes and closes are still counted in the log.
#[derive(Debug)]
pub struct RecordingWriter {
    path: String,
    content: Arc<Mutex<Vec<u8>>>,
    log: Arc<Mutex<WriterLog>>,
    flush_failure: Option<Failure>,
    close_failure: Option<Failure>,
}

impl FileWriter for RecordingWriter {
    fn write(&mut self, offset: i64, data: &[u8]) -> Result<usize> {
        let start = usize::try_from(offset).map_err(|_| MountError::InvalidOffset(offset))?;
        let mut content = self.content.lock();
        if content.len() < start + data.len() {
            content.resize(start + data.len(), 0);
        }
        content[start..start + data.len()].copy_from_slice(data);

        let mut log = self.log.lock();
        log.writes += 1;
        log.bytes_written += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.log.lock().flushes += 1;
        match self.flush_failure {
            Some(failure) => Err(failure.to_error(&self.path)),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().closes += 1;
        match self.close_failure {
            Some(failure) => Err(failure.to_error(&self.path)),
            None => Ok(()),
        }
    }
}

/// Kind of failure a [`MemoryAccessor`] can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    PermissionDenied,
    Transient,
    Remote,
}

impl Failure {
    fn to_error(self, what: &str) -> MountError {
        match self {
            Failure::PermissionDenied => MountError::PermissionDenied(what.to_string()),
            Failure::Transient => MountError::Transient(what.to_string()),
            Failure::Remote => MountError::Remote(what.to_string()),
        }
    }
}

/// Calls received by a [`MemoryAccessor`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessorLog {
    pub stats: usize,
    pub open_reads: usize,
    pub open_writes: Vec<(String, bool)>,
    pub chmods: Vec<(String, u32)>,
    pub chowns: Vec<(String, String, String)>,
}

#[derive(Debug, Clone)]
enum Content {
    Bytes(Arc<Mutex<Vec<u8>>>),
    Generated(GeneratedStream),
    Scripted(ScriptedStream),
}

#[derive(Debug, Clone)]
struct MemoryFile {
    attrs: Attrs,
    content: Content,
    writer_log: Arc<Mutex<WriterLog>>,
}

#[derive(Debug, Default)]
struct Failures {
    stat: Option<Failure>,
    open_read: Option<Failure>,
    chmod: Option<Failure>,
    chown: Option<Failure>,
    stream_close: Option<Failure>,
    writer_flush: Option<Failure>,
    writer_close: Option<Failure>,
}

/// In-memory backing store
#[derive(Debug, Default)]
pub struct MemoryAccessor {
    files: Mutex<HashMap<String, MemoryFile>>,
    log: Mutex<AccessorLog>,
    failures: Mutex<Failures>,
}

impl MemoryAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file with the given content
    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.insert(path, Content::Bytes(Arc::new(Mutex::new(data.to_vec()))), data.len() as u64);
    }

    /// Add a virtual file of `size` bytes with [`byte_at`] content
    ///
    /// The returned stream shares its call counters with every stream
    /// opened on `path`.
    pub fn add_generated_file(&self, path: &str, size: i64) -> GeneratedStream {
        let stream = GeneratedStream::new(size);
        self.insert(path, Content::Generated(stream.clone()), size.max(0) as u64);
        stream
    }

    /// Add a file whose reads replay `stream`'s script
    pub fn add_scripted_file(&self, path: &str, stream: &ScriptedStream) {
        self.insert(path, Content::Scripted(stream.clone()), 0);
    }

    /// Replace the stored attributes of `path` (content is untouched)
    pub fn set_attrs(&self, path: &str, attrs: Attrs) {
        if let Some(file) = self.files.lock().get_mut(path) {
            file.attrs = attrs;
        }
    }

    /// Current content of a byte-backed file
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match &self.files.lock().get(path)?.content {
            Content::Bytes(bytes) => Some(bytes.lock().clone()),
            _ => None,
        }
    }

    pub fn log(&self) -> AccessorLog {
        self.log.lock().clone()
    }

    /// Calls made on writers opened for `path`
    pub fn writer_log(&self, path: &str) -> WriterLog {
        self.files
            .lock()
            .get(path)
            .map(|f| f.writer_log.lock().clone())
            .unwrap_or_default()
    }

    pub fn fail_stat(&self, failure: Option<Failure>) {
        self.failures.lock().stat = failure;
    }

    pub fn fail_open_read(&self, failure: Option<Failure>) {
        self.failures.lock().open_read = failure;
    }

    pub fn fail_chmod(&self, failure: Option<Failure>) {
        self.failures.lock().chmod = failure;
    }

    pub fn fail_chown(&self, failure: Option<Failure>) {
        self.failures.lock().chown = failure;
    }

    /// Streams opened from now on fail their close (after closing)
    pub fn fail_stream_close(&self, failure: Option<Failure>) {
        self.failures.lock().stream_close = failure;
    }

    /// Writers opened from now on fail every flush
    pub fn fail_writer_flush(&self, failure: Option<Failure>) {
        self.failures.lock().writer_flush = failure;
    }

    /// Writers opened from now on fail their close
    pub fn fail_writer_close(&self, failure: Option<Failure>) {
        self.failures.lock().writer_close = failure;
    }

    fn insert(&self, path: &str, content: Content, size: u64) {
        let name = path.rsplit('/').next().unwrap_or(path);
        let file = MemoryFile {
            attrs: Attrs::file(name, size),
            content,
            writer_log: Arc::new(Mutex::new(WriterLog::default())),
        };
        self.files.lock().insert(path.to_string(), file);
    }

    fn file(&self, path: &str) -> Result<MemoryFile> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| MountError::NotFound(path.to_string()))
    }
}

impl RemoteAccessor for MemoryAccessor {
    fn stat(&self, path: &str) -> Result<Attrs> {
        self.log.lock().stats += 1;
        if let Some(failure) = self.failures.lock().stat {
            return Err(failure.to_error(path));
        }

        let file = self.file(path)?;
        let mut attrs = file.attrs;
        if let Content::Bytes(bytes) = &file.content {
            attrs.size = bytes.lock().len() as u64;
        }
        Ok(attrs)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn RemoteStream>> {
        self.log.lock().open_reads += 1;
        if let Some(failure) = self.failures.lock().open_read {
            return Err(failure.to_error(path));
        }

        let stream: Box<dyn RemoteStream> = match self.file(path)?.content {
            Content::Bytes(content) => Box::new(BytesStream { content, pos: 0 }),
            Content::Generated(stream) => Box::new(stream),
            Content::Scripted(stream) => Box::new(stream),
        };
        Ok(match self.failures.lock().stream_close {
            Some(failure) => Box::new(FailingClose {
                inner: stream,
                error: Some(failure.to_error(path)),
            }),
            None => stream,
        })
    }

    fn open_write(&self, path: &str, truncate: bool) -> Result<Box<dyn FileWriter>> {
        self.log.lock().open_writes.push((path.to_string(), truncate));

        let file = self.file(path)?;
        let Content::Bytes(content) = file.content else {
            return Err(MountError::PermissionDenied(format!("{} is read-only", path)));
        };
        if truncate {
            content.lock().clear();
        }
        let failures = self.failures.lock();
        Ok(Box::new(RecordingWriter {
            path: path.to_string(),
            content,
            log: file.writer_log,
            flush_failure: failures.writer_flush,
            close_failure: failures.writer_close,
        }))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.log.lock().chmods.push((path.to_string(), mode));
        if let Some(failure) = self.failures.lock().chmod {
            return Err(failure.to_error(path));
        }
        let mut files = self.files.lock();
        let file = files
            .get_mut(path)
            .ok_or_else(|| MountError::NotFound(path.to_string()))?;
        file.attrs.mode = mode;
        Ok(())
    }

    fn chown(&self, path: &str, user: &str, group: &str) -> Result<()> {
        self.log
            .lock()
            .chowns
            .push((path.to_string(), user.to_string(), group.to_string()));
        if let Some(failure) = self.failures.lock().chown {
            return Err(failure.to_error(path));
        }
        if !self.files.lock().contains_key(path) {
            return Err(MountError::NotFound(path.to_string()));
        }
        Ok(())
    }
}

/// Identity tables for tests
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    users: HashMap<u32, String>,
    groups: HashMap<u32, String>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, uid: u32, name: &str) -> Self {
        self.users.insert(uid, name.to_string());
        self
    }

    pub fn with_group(mut self, gid: u32, name: &str) -> Self {
        self.groups.insert(gid, name.to_string());
        self
    }
}

impl IdentityResolver for StaticIdentity {
    fn user_name(&self, uid: u32) -> Result<String> {
        self.users
            .get(&uid)
            .cloned()
            .ok_or_else(|| MountError::Identity(format!("unknown uid {}", uid)))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        self.groups
            .get(&gid)
            .cloned()
            .ok_or_else(|| MountError::Identity(format!("unknown gid {}", gid)))
    }
}
