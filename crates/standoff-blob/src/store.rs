//! Sharded blob store
//!
//! Blobs live at `<root>/<h0>/<h1>/<id>`, where `h0` and `h1` are the first
//! two bytes of the SHA-256 of the id in lowercase hex. Each of the 65536
//! buckets has one reader/writer lock; acquisition waits at most the
//! configured timeout.
//!
//! Writers go through a [`WriteOp`], which holds the bucket's write lock
//! from creation until it is committed or dropped. Content is written to a
//! temporary file in the bucket directory and renamed into place, so
//! readers never observe a partial blob.

use crate::ident::{require_valid, IdentifierError};
use parking_lot::{RwLock, RwLockWriteGuard};
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of buckets (and locks)
pub const BUCKET_COUNT: usize = 1 << 16;

/// Prefix of in-flight temporary files
pub const TEMP_PREFIX: &str = ".tmp_";

/// Default lock timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Blob store errors
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Id is not a valid identifier
    #[error(transparent)]
    InvalidId(#[from] IdentifierError),

    /// No blob stored for id
    #[error("no original stored for '{id}'")]
    NotFound { id: String },

    /// Create-only write found an existing blob
    #[error("original for '{id}' already exists")]
    AlreadyExists { id: String },

    /// Bucket lock not acquired in time
    #[error("could not lock bucket {bucket} within {timeout:?}")]
    Timeout { bucket: Bucket, timeout: Duration },

    /// Filesystem failure
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BlobError {
    /// Check if the operation may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the blob was absent
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One of the [`BUCKET_COUNT`] shards, from the first two bytes of the
/// id's SHA-256
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket(u16);

impl Bucket {
    /// Bucket for `id`
    #[must_use]
    pub fn of(id: &str) -> Self {
        let digest = Sha256::new().chain_update(id.as_bytes()).finalize();
        Self(u16::from_be_bytes([digest[0], digest[1]]))
    }

    /// Raw 16-bit value
    #[inline]
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Index into the lock table
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Relative directory, `h0/h1`
    #[must_use]
    pub fn relative_dir(self) -> PathBuf {
        let [hi, lo] = self.0.to_be_bytes();
        Path::new(&hex::encode([hi])).join(hex::encode([lo]))
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let [hi, lo] = self.0.to_be_bytes();
        write!(f, "{}/{}", hex::encode([hi]), hex::encode([lo]))
    }
}

/// Result of [`BlobStore::replace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Stored content already matched
    Unchanged,
    /// New content written
    Written,
}

/// Directory-backed store of verbatim originals
pub struct BlobStore {
    root: PathBuf,
    locks: Box<[RwLock<()>]>,
    timeout: Duration,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("root", &self.root)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BlobStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    /// Returns [`BlobError::Io`] if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, timeout: Duration) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BlobError::io(&root, e))?;
        let locks = (0..BUCKET_COUNT).map(|_| RwLock::new(())).collect();
        tracing::debug!(root = %root.display(), ?timeout, "opened blob store");
        Ok(Self {
            root,
            locks,
            timeout,
        })
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path where the blob for `id` is stored
    ///
    /// # Errors
    /// Returns [`BlobError::InvalidId`] for an invalid id.
    pub fn path_for(&self, id: &str) -> Result<PathBuf, BlobError> {
        require_valid(id)?;
        Ok(self.path_in(Bucket::of(id), id))
    }

    fn path_in(&self, bucket: Bucket, id: &str) -> PathBuf {
        self.root.join(bucket.relative_dir()).join(id)
    }

    /// Read the blob for `id`
    ///
    /// # Errors
    /// [`BlobError::NotFound`] if absent, [`BlobError::Timeout`] if the
    /// bucket stays write-locked past the timeout.
    pub fn get(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        require_valid(id)?;
        let bucket = Bucket::of(id);
        let path = self.path_in(bucket, id);
        let _guard = self.locks[bucket.index()]
            .try_read_for(self.timeout)
            .ok_or(BlobError::Timeout {
                bucket,
                timeout: self.timeout,
            })?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BlobError::NotFound { id: id.to_string() },
            _ => BlobError::io(&path, e),
        })
    }

    /// Whether a blob exists for `id`
    ///
    /// # Errors
    /// As [`BlobStore::get`], except absence is `Ok(false)`.
    pub fn exists(&self, id: &str) -> Result<bool, BlobError> {
        require_valid(id)?;
        let bucket = Bucket::of(id);
        let _guard = self.locks[bucket.index()]
            .try_read_for(self.timeout)
            .ok_or(BlobError::Timeout {
                bucket,
                timeout: self.timeout,
            })?;
        Ok(self.path_in(bucket, id).is_file())
    }

    /// Start a create-only write
    ///
    /// # Errors
    /// Invalid id or lock timeout.
    pub fn begin_put(&self, id: &str, content: impl Into<Vec<u8>>) -> Result<WriteOp<'_>, BlobError> {
        self.begin(
            id,
            WriteKind::Put {
                content: content.into(),
                overwrite: false,
            },
        )
    }

    /// Start an overwriting write
    ///
    /// # Errors
    /// Invalid id or lock timeout.
    pub fn begin_replace(
        &self,
        id: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<WriteOp<'_>, BlobError> {
        self.begin(
            id,
            WriteKind::Put {
                content: content.into(),
                overwrite: true,
            },
        )
    }

    /// Start a delete
    ///
    /// # Errors
    /// Invalid id or lock timeout.
    pub fn begin_delete(&self, id: &str) -> Result<WriteOp<'_>, BlobError> {
        self.begin(id, WriteKind::Delete)
    }

    fn begin(&self, id: &str, kind: WriteKind) -> Result<WriteOp<'_>, BlobError> {
        require_valid(id)?;
        let bucket = Bucket::of(id);
        let guard = self.locks[bucket.index()]
            .try_write_for(self.timeout)
            .ok_or_else(|| {
                tracing::warn!(%id, %bucket, "bucket lock timed out");
                BlobError::Timeout {
                    bucket,
                    timeout: self.timeout,
                }
            })?;
        Ok(WriteOp {
            id: id.to_string(),
            bucket,
            path: self.path_in(bucket, id),
            dir: self.root.join(bucket.relative_dir()),
            kind,
            _guard: guard,
        })
    }

    /// Store `content` under `id`; fails if a blob already exists
    ///
    /// # Errors
    /// [`BlobError::AlreadyExists`], lock timeout or I/O failure.
    pub fn put(&self, id: &str, content: impl Into<Vec<u8>>) -> Result<(), BlobError> {
        self.begin_put(id, content)?.commit()
    }

    /// Store `content` under `id`, skipping the write if unchanged
    ///
    /// # Errors
    /// Lock timeout or I/O failure.
    pub fn replace(
        &self,
        id: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<ReplaceOutcome, BlobError> {
        let op = self.begin_replace(id, content)?;
        if op.noop()? {
            return Ok(ReplaceOutcome::Unchanged);
        }
        op.commit()?;
        Ok(ReplaceOutcome::Written)
    }

    /// Remove the blob for `id`
    ///
    /// # Errors
    /// [`BlobError::NotFound`] if absent, lock timeout or I/O failure.
    pub fn delete(&self, id: &str) -> Result<(), BlobError> {
        self.begin_delete(id)?.commit()
    }
}

#[derive(Debug)]
enum WriteKind {
    Put { content: Vec<u8>, overwrite: bool },
    Delete,
}

/// A pending write holding its bucket's write lock
///
/// Nothing touches the filesystem until [`WriteOp::commit`]; dropping the
/// operation releases the lock without writing.
#[must_use = "a WriteOp does nothing until committed"]
pub struct WriteOp<'s> {
    id: String,
    bucket: Bucket,
    path: PathBuf,
    dir: PathBuf,
    kind: WriteKind,
    _guard: RwLockWriteGuard<'s, ()>,
}

impl std::fmt::Debug for WriteOp<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOp")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl WriteOp<'_> {
    /// Id being written
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bucket holding the id
    #[inline]
    #[must_use]
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    /// Destination path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether committing would change nothing: a delete of an absent blob,
    /// or a replace with identical content
    ///
    /// # Errors
    /// I/O failure reading the current blob.
    pub fn noop(&self) -> Result<bool, BlobError> {
        match &self.kind {
            WriteKind::Delete => Ok(!self.path.is_file()),
            WriteKind::Put {
                overwrite: false, ..
            } => Ok(false),
            WriteKind::Put {
                content,
                overwrite: true,
            } => match fs::read(&self.path) {
                Ok(current) => Ok(current == *content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(BlobError::io(&self.path, e)),
            },
        }
    }

    /// Perform the write and release the lock
    ///
    /// # Errors
    /// [`BlobError::AlreadyExists`] for a create-only put over an existing
    /// blob, [`BlobError::NotFound`] for a delete of an absent blob, or an
    /// I/O failure.
    pub fn commit(self) -> Result<(), BlobError> {
        match &self.kind {
            WriteKind::Delete => match fs::remove_file(&self.path) {
                Ok(()) => {
                    tracing::debug!(id = %self.id, bucket = %self.bucket, "deleted original");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound {
                    id: self.id.clone(),
                }),
                Err(e) => Err(BlobError::io(&self.path, e)),
            },
            WriteKind::Put { content, overwrite } => {
                if !overwrite && self.path.exists() {
                    return Err(BlobError::AlreadyExists {
                        id: self.id.clone(),
                    });
                }
                self.write_atomically(content, *overwrite)?;
                tracing::debug!(
                    id = %self.id,
                    bucket = %self.bucket,
                    bytes = content.len(),
                    "stored original"
                );
                Ok(())
            }
        }
    }

    fn write_atomically(&self, content: &[u8], overwrite: bool) -> Result<(), BlobError> {
        fs::create_dir_all(&self.dir).map_err(|e| BlobError::io(&self.dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| BlobError::io(&self.dir, e))?;
        tmp.write_all(content)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| BlobError::io(tmp.path(), e))?;

        // A failed persist drops the temporary file with the error
        let persisted = if overwrite {
            tmp.persist(&self.path)
        } else {
            tmp.persist_noclobber(&self.path)
        };
        match persisted {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(BlobError::AlreadyExists {
                    id: self.id.clone(),
                })
            }
            Err(e) => Err(BlobError::io(&self.path, e.error)),
        }
    }
}
