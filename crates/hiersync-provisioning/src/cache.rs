//! Snapshot cache file.
//!
//! The cache is a single JSON file holding the last persisted snapshot. It
//! is treated as a single-writer datastore: load, compare, and only on
//! change archive the current bytes next to it and atomically replace it.
//! Archives are write-once historical records and are never read back.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use fs2::FileExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::MembershipSnapshot;

/// `strftime` pattern of the archive name prefix.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const MAX_ARCHIVE_SUFFIX: u32 = 100;

/// What the cache file held before a reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorState {
    /// Zero-length file.
    Empty,
    /// Content that does not parse as a snapshot.
    Corrupt { reason: String },
    /// A valid snapshot.
    Valid(MembershipSnapshot),
}

/// Outcome of [`SnapshotCache::reconcile`].
#[derive(Debug, Clone)]
pub struct CacheReconcile {
    /// Whether the cache file was replaced.
    pub changed: bool,
    /// Archive written for the replaced content, if any.
    pub archived: Option<PathBuf>,
    /// The prior content was present but unparsable.
    pub prior_corrupt: bool,
    /// The snapshot now persisted in the cache file.
    pub snapshot: MembershipSnapshot,
}

/// The cache file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
    clock: fn() -> DateTime<Local>,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            clock: Local::now,
        }
    }

    /// Override the clock used to stamp archive names.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted snapshot. Unlike [`reconcile`](Self::reconcile),
    /// empty or unparsable content is an error here.
    pub fn load(&self) -> SyncResult<MembershipSnapshot> {
        self.ensure_regular_file()?;
        let bytes = self.read_current()?;
        match parse_prior(&bytes) {
            PriorState::Valid(snapshot) => Ok(snapshot),
            PriorState::Empty => Err(SyncError::cache(
                &self.path,
                "cache file is empty; run a snapshot first",
                None,
            )),
            PriorState::Corrupt { reason } => Err(SyncError::cache(
                &self.path,
                format!("cache file does not hold a valid snapshot: {reason}"),
                None,
            )),
        }
    }

    /// Compare `snapshot` with the persisted one and replace the file only
    /// if they differ structurally.
    ///
    /// The file must already exist as a regular file. Unparsable prior
    /// content counts as "no prior state": it is logged, archived verbatim
    /// (unless zero-length) and replaced.
    #[instrument(skip(self, snapshot), fields(path = %self.path.display()))]
    pub fn reconcile(&self, snapshot: &MembershipSnapshot) -> SyncResult<CacheReconcile> {
        self.ensure_regular_file()?;
        let _lock = self.lock()?;

        let bytes = self.read_current()?;
        let prior = parse_prior(&bytes);

        let prior_corrupt = match &prior {
            PriorState::Valid(old) if old == snapshot => {
                info!("Snapshot unchanged, cache left untouched");
                return Ok(CacheReconcile {
                    changed: false,
                    archived: None,
                    prior_corrupt: false,
                    snapshot: snapshot.clone(),
                });
            }
            PriorState::Corrupt { reason } => {
                warn!(
                    reason = %reason,
                    "Cache file is not a valid snapshot, treating prior state as empty"
                );
                true
            }
            PriorState::Empty => {
                debug!("Cache file is empty");
                false
            }
            PriorState::Valid(_) => false,
        };

        let archived = if bytes.is_empty() {
            None
        } else {
            Some(self.archive(&bytes)?)
        };

        self.replace(snapshot)?;

        info!(
            archived = ?archived,
            groups = snapshot.groups.len(),
            "Cache updated"
        );

        Ok(CacheReconcile {
            changed: true,
            archived,
            prior_corrupt,
            snapshot: snapshot.clone(),
        })
    }

    /// Fail unless the cache file exists as a regular file.
    pub fn ensure_regular_file(&self) -> SyncResult<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(SyncError::configuration(format!(
                "cache path {} is not a regular file",
                self.path.display()
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SyncError::configuration(format!(
                "cache file {} does not exist; create it (it may be empty) before the first run",
                self.path.display()
            ))),
            Err(e) => Err(SyncError::configuration(format!(
                "cannot stat cache file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn read_current(&self) -> SyncResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| {
            SyncError::configuration(format!(
                "cannot read cache file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn file_name(&self) -> SyncResult<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SyncError::configuration(format!(
                    "cache path {} has no file name",
                    self.path.display()
                ))
            })
    }

    /// Exclusive advisory lock on the cache's directory. Held across the
    /// rename that replaces the cache file, and creates nothing on disk.
    fn lock(&self) -> SyncResult<CacheLock> {
        let dir = self.parent_dir();

        let file = File::open(dir).map_err(|e| {
            SyncError::cache(dir, "cannot open cache directory for locking", Some(e))
        })?;

        file.try_lock_exclusive().map_err(|e| {
            SyncError::cache(&self.path, "cache is locked by another process", Some(e))
        })?;

        Ok(CacheLock { file })
    }

    /// Write `bytes` to a new `<timestamp>_<name>` file next to the cache.
    /// When that name is taken (two changes in the same second) the archive
    /// becomes `<timestamp>-<n>_<name>` with the first free `n` from 1, so
    /// archives match `<timestamp>*_<name>`. Existing archives are never
    /// overwritten.
    fn archive(&self, bytes: &[u8]) -> SyncResult<PathBuf> {
        let stamp = (self.clock)().format(ARCHIVE_TIMESTAMP_FORMAT).to_string();
        let file_name = self.file_name()?;
        let dir = self.parent_dir();
        let mode = current_mode(&self.path);

        for attempt in 0..MAX_ARCHIVE_SUFFIX {
            let name = if attempt == 0 {
                format!("{stamp}_{file_name}")
            } else {
                format!("{stamp}-{attempt}_{file_name}")
            };
            let archive_path = dir.join(name);

            let mut options = OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(mode);
            }

            let mut file = match options.open(&archive_path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(SyncError::cache(
                        &archive_path,
                        "cannot create archive",
                        Some(e),
                    ))
                }
            };

            file.write_all(bytes)
                .and_then(|()| file.sync_all())
                .map_err(|e| SyncError::cache(&archive_path, "cannot write archive", Some(e)))?;

            debug!(archive = %archive_path.display(), "Archived previous cache content");
            return Ok(archive_path);
        }

        Err(SyncError::cache(
            &self.path,
            format!("no free archive name for timestamp {stamp}"),
            None,
        ))
    }

    /// Atomically replace the cache file: temp file in the same directory,
    /// fsync, rename.
    fn replace(&self, snapshot: &MembershipSnapshot) -> SyncResult<()> {
        let dir = self.parent_dir();
        let bytes = snapshot.to_canonical_json()?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SyncError::cache(dir, "cannot create temp file", Some(e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(current_mode(&self.path));
            temp.as_file()
                .set_permissions(perms)
                .map_err(|e| SyncError::cache(temp.path(), "cannot set permissions", Some(e)))?;
        }

        temp.as_file_mut()
            .write_all(&bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| SyncError::cache(temp.path(), "cannot write temp file", Some(e)))?;

        temp.persist(&self.path)
            .map_err(|e| SyncError::cache(&self.path, "cannot replace cache file", Some(e.error)))?;

        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            warn!(error = %e, dir = %dir.display(), "Could not fsync cache directory");
        }

        Ok(())
    }
}

struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn parse_prior(bytes: &[u8]) -> PriorState {
    if bytes.is_empty() {
        return PriorState::Empty;
    }
    match MembershipSnapshot::from_json(bytes) {
        Ok(snapshot) => PriorState::Valid(snapshot),
        Err(e) => PriorState::Corrupt {
            reason: e.to_string(),
        },
    }
}

#[cfg(unix)]
fn current_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn current_mode(_path: &Path) -> u32 {
    0o644
}
