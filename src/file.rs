/*!
 * File objects: attribute cache and active-handle registry
 *
 * All handles opened on one path share a single `File`. The file caches the
 * remote attributes for `attr_ttl` and keeps the list of currently open
 * handles so that file-wide operations (fsync) can reach every session.
 *
 * The registry lock is never held while a handle's own lock is taken:
 * broadcasts work on a snapshot of the list.
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::{MountError, Result};
use crate::handle::{AccessMode, FileHandle, HandleCursor, OpenFlags};
use crate::mount::Backend;
use crate::remote::Attrs;

/// Permission bits compared and sent by chmod
const PERMISSION_MASK: u32 = 0o7777;

/// Requested attribute changes; `None` leaves a property alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SetAttrRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

struct CachedAttrs {
    attrs: Attrs,
    expires: SystemTime,
}

pub struct File {
    backend: Arc<Backend>,
    path: String,
    cache: Mutex<CachedAttrs>,
    handles: Mutex<Vec<Arc<FileHandle>>>,
}

impl File {
    pub(crate) fn new(backend: Arc<Backend>, path: &str, attrs: Attrs) -> Arc<Self> {
        let expires = backend.clock.now() + backend.config.attr_ttl();
        Arc::new(Self {
            backend,
            path: path.to_string(),
            cache: Mutex::new(CachedAttrs { attrs, expires }),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Absolute path on the backing store
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Current attributes, re-fetched once the cached copy has expired
    pub fn attr(&self) -> Result<Attrs> {
        let now = self.backend.clock.now();
        let mut cache = self.cache.lock();
        if now >= cache.expires {
            cache.attrs = self.backend.accessor.stat(&self.path)?;
            cache.expires = now + self.backend.config.attr_ttl();
            tracing::trace!(path = %self.path, size = cache.attrs.size, "Attributes refreshed");
        }
        Ok(cache.attrs.clone())
    }

    /// Cached attributes without any expiry check
    pub fn cached_attr(&self) -> Attrs {
        self.cache.lock().attrs.clone()
    }

    /// Force the next [`attr`](Self::attr) to re-fetch
    pub fn invalidate(&self) {
        let now = self.backend.clock.now();
        self.cache.lock().expires = now
            .checked_sub(Duration::from_secs(1))
            .unwrap_or(SystemTime::UNIX_EPOCH);
    }

    /// Open a new session
    ///
    /// Read-only and read-write opens start the remote reader right away;
    /// write-only opens start the writer, on a new file unless appending.
    pub fn open(self: &Arc<Self>, flags: OpenFlags) -> Result<Arc<FileHandle>> {
        let handle = Arc::new(FileHandle::new(
            self.backend.allocate_handle_id(),
            Arc::clone(self),
        ));

        match flags.access {
            AccessMode::ReadOnly | AccessMode::ReadWrite => handle.enable_read()?,
            AccessMode::WriteOnly => handle.enable_write(!flags.append)?,
        }

        self.add_handle(handle.clone());
        tracing::info!(path = %self.path, handle = handle.id(), ?flags, "Opened");
        Ok(handle)
    }

    /// Open a read-only session wrapped as `std::io::Read + Seek`
    pub fn open_cursor(self: &Arc<Self>) -> Result<HandleCursor> {
        Ok(HandleCursor::new(self.open(OpenFlags::read_only())?))
    }

    pub fn add_handle(&self, handle: Arc<FileHandle>) {
        self.handles.lock().push(handle);
    }

    pub fn remove_handle(&self, id: u64) -> Option<Arc<FileHandle>> {
        let mut handles = self.handles.lock();
        let index = handles.iter().position(|h| h.id() == id)?;
        Some(handles.remove(index))
    }

    /// Snapshot of the open handles
    pub fn active_handles(&self) -> Vec<Arc<FileHandle>> {
        self.handles.lock().clone()
    }

    /// Fsync every open handle, returning the last error seen
    pub fn fsync_all(&self) -> Result<()> {
        let handles = self.active_handles();
        tracing::debug!(path = %self.path, handles = handles.len(), "Dispatching fsync");

        let mut last_error = None;
        for handle in handles {
            if let Err(e) = handle.fsync() {
                tracing::warn!(path = %self.path, handle = handle.id(), error = %e, "Fsync failed");
                last_error = Some(e);
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Apply mode and ownership changes
    ///
    /// Each property is changed independently and the cache is updated only
    /// for changes the backing store accepted. Nothing is rolled back; the
    /// first failure is returned.
    pub fn set_attr(&self, request: &SetAttrRequest) -> Result<Attrs> {
        let current = self.cached_attr();
        let mut first_error: Option<MountError> = None;

        if let Some(mode) = request.mode {
            let perm = mode & PERMISSION_MASK;
            if perm != current.mode & PERMISSION_MASK {
                tracing::info!(path = %self.path, mode = perm, "Chmod");
                match self.backend.accessor.chmod(&self.path, perm) {
                    Ok(()) => {
                        let mut cache = self.cache.lock();
                        cache.attrs.mode = (cache.attrs.mode & !PERMISSION_MASK) | perm;
                    }
                    Err(e) => {
                        tracing::warn!(path = %self.path, error = %e, "Chmod failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if request.uid.is_some() || request.gid.is_some() {
            let uid = request.uid.unwrap_or(current.uid);
            let gid = request.gid.unwrap_or(current.gid);
            if uid != current.uid || gid != current.gid {
                match self.chown(uid, gid) {
                    Ok(()) => {
                        let mut cache = self.cache.lock();
                        cache.attrs.uid = uid;
                        cache.attrs.gid = gid;
                    }
                    Err(e) => {
                        tracing::warn!(path = %self.path, uid, gid, error = %e, "Chown failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.cached_attr()),
        }
    }

    fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        let user = self.backend.identity.user_name(uid)?;
        let group = self.backend.identity.group_name(gid)?;
        tracing::info!(path = %self.path, %user, %group, "Chown");
        self.backend.accessor.chown(&self.path, &user, &group)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("handles", &self.handles.lock().len())
            .finish()
    }
}
