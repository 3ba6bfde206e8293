/*!
 * Orbit Mount - random-access file sessions over a sequential remote store
 *
 * The filesystem core behind a mount of a remote, streaming-oriented file
 * store:
 * - Buffered random-access reads that seek only when reading through the
 *   gap would cost more
 * - Retries with backoff for transient remote failures
 * - Per-handle sessions with lazily enabled read and write paths
 * - Per-file attribute cache and active-handle registry
 *
 * The filesystem protocol binding, the write path and directory handling
 * are external collaborators, reached through the traits in [`remote`].
 */

pub mod config;
pub mod error;
pub mod file;
pub mod handle;
pub mod identity;
pub mod logging;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod mount;
pub mod reader;
pub mod remote;

// Re-export commonly used types
pub use config::{LogLevel, MountConfig, ReaderConfig, RetrySettings};
pub use error::{MountError, Result};
pub use file::{File, SetAttrRequest};
pub use handle::{AccessMode, FileHandle, HandleCursor, HandleState, OpenFlags};
pub use identity::{IdentityResolver, SystemIdentity};
pub use mount::{Backend, MountedFs};
pub use reader::{BufferedReader, ReaderStats};
pub use remote::{Attrs, FileWriter, ReadOutcome, RemoteAccessor, RemoteStream};

pub use orbit_core_resilience::{Clock, MockClock, RetryConfig, RetryPolicy, SystemClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
