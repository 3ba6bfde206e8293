/*!
 * Mount-wide services and the path -> file table
 */

use dashmap::DashMap;
use orbit_core_resilience::{Clock, RetryConfig, RetryPolicy, SystemClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::MountConfig;
use crate::error::{MountError, Result};
use crate::file::File;
use crate::handle::{FileHandle, OpenFlags};
use crate::identity::{IdentityResolver, SystemIdentity};
use crate::remote::RemoteAccessor;

/// Services shared by every file and handle of one mount
pub struct Backend {
    pub(crate) accessor: Arc<dyn RemoteAccessor>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry: RetryPolicy,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) config: MountConfig,
    next_handle_id: AtomicU64,
}

impl Backend {
    pub fn new(
        accessor: Arc<dyn RemoteAccessor>,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityResolver>,
        config: MountConfig,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::new(RetryConfig::from(&config.retry), clock.clone());
        Ok(Self {
            accessor,
            clock,
            retry,
            identity,
            config,
            next_handle_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Allocate a handle id (0 is never used)
    pub(crate) fn allocate_handle_id(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// One mounted remote namespace
///
/// Looking up the same path twice yields the same [`File`], so all handles
/// on a path share one attribute cache and one active-handle registry.
pub struct MountedFs {
    backend: Arc<Backend>,
    files: DashMap<String, Arc<File>>,
}

impl MountedFs {
    /// Mount with the wall clock and the system user database
    pub fn new(accessor: Arc<dyn RemoteAccessor>, config: MountConfig) -> Result<Self> {
        Self::with_services(accessor, Arc::new(SystemClock), Arc::new(SystemIdentity), config)
    }

    /// Mount with explicit clock and identity services
    pub fn with_services(
        accessor: Arc<dyn RemoteAccessor>,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityResolver>,
        config: MountConfig,
    ) -> Result<Self> {
        let backend = Backend::new(accessor, clock, identity, config)?;
        Ok(Self {
            backend: Arc::new(backend),
            files: DashMap::new(),
        })
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Resolve `path` to its shared [`File`], fetching metadata on first use
    pub fn lookup(&self, path: &str) -> Result<Arc<File>> {
        if !path.starts_with('/') {
            return Err(MountError::NotFound(format!("{} (not absolute)", path)));
        }

        // Fast path: already known
        if let Some(file) = self.files.get(path) {
            return Ok(file.value().clone());
        }

        // Slow path: stat outside any map lock, first insert wins
        let attrs = self.backend.accessor.stat(path)?;
        let file = self
            .files
            .entry(path.to_string())
            .or_insert_with(|| File::new(self.backend.clone(), path, attrs))
            .value()
            .clone();

        tracing::debug!(path, "lookup");
        Ok(file)
    }

    /// Open `path` with raw POSIX open flags
    pub fn open(&self, path: &str, flags: i32) -> Result<Arc<FileHandle>> {
        self.lookup(path)?.open(OpenFlags::from_raw(flags))
    }

    /// Drop the table entry for `path`; open handles keep their file alive
    pub fn forget(&self, path: &str) -> Option<Arc<File>> {
        self.files.remove(path).map(|(_, file)| file)
    }

    /// Number of paths currently in the table
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Failure, MemoryAccessor, StaticIdentity};
    use orbit_core_resilience::MockClock;

    fn mounted(accessor: Arc<MemoryAccessor>) -> MountedFs {
        MountedFs::with_services(
            accessor,
            Arc::new(MockClock::new()),
            Arc::new(StaticIdentity::new()),
            MountConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_returns_shared_file() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/data/a.bin", b"abc");
        let fs = mounted(accessor.clone());

        let first = fs.lookup("/data/a.bin").unwrap();
        let second = fs.lookup("/data/a.bin").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(accessor.log().stats, 1);
        assert_eq!(fs.len(), 1);
    }

    #[test]
    fn test_lookup_missing_path() {
        let fs = mounted(Arc::new(MemoryAccessor::new()));
        assert!(matches!(fs.lookup("/nope"), Err(MountError::NotFound(_))));
        assert!(matches!(fs.lookup("relative"), Err(MountError::NotFound(_))));
        assert!(fs.is_empty());
    }

    #[test]
    fn test_lookup_surfaces_stat_failure_without_retry() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"");
        accessor.fail_stat(Some(Failure::Transient));
        let fs = mounted(accessor.clone());

        assert!(matches!(fs.lookup("/a"), Err(MountError::Transient(_))));
        assert_eq!(accessor.log().stats, 1);
    }

    #[test]
    fn test_forget_then_lookup_creates_new_file() {
        let accessor = Arc::new(MemoryAccessor::new());
        accessor.add_file("/a", b"x");
        let fs = mounted(accessor);

        let first = fs.lookup("/a").unwrap();
        assert!(fs.forget("/a").is_some());
        let second = fs.lookup("/a").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MountConfig::default();
        config.reader.read_chunk_size = 0;
        let result = MountedFs::with_services(
            Arc::new(MemoryAccessor::new()),
            Arc::new(MockClock::new()),
            Arc::new(StaticIdentity::new()),
            config,
        );
        assert!(matches!(result, Err(MountError::Config(_))));
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let fs = mounted(Arc::new(MemoryAccessor::new()));
        let a = fs.backend().allocate_handle_id();
        let b = fs.backend().allocate_handle_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
