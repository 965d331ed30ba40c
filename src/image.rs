use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::decode::{DecodeError, DecodedImage};

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

/// Why a load failed. Captured on the entity, never propagated past the
/// loader boundary.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("file is not an image")]
    NotAnImage,
}

// ---------------------------------------------------------------------------
// Image entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// Mutable half of an image entity. Every read and write goes through the
/// entity mutex; keep critical sections short and never hold the guard
/// across a decode or any other blocking call.
pub struct ImageData {
    pub state: LoadState,
    pub pixels: Option<DecodedImage>,
    /// Set while Loading if the eventual result must be thrown away
    /// (the file changed on disk underneath the in-flight decode).
    pub deferred_unload: bool,
    pub error: Option<LoadError>,

    // Display-only transform state. Identity of the entity, but the cache
    // never touches it; the presentation layer owns these.
    pub flip_v: bool,
    pub flip_h: bool,
    /// Rotation in quadrants, 0..=3 (times 90 degrees).
    pub rotation: u8,
}

/// One image on disk (or the stdin pseudo-image, path == ""). Shared as
/// `Arc<Image>` between the store and at most one in-flight decode thread,
/// so dropping the store-side handle while a load is in flight just detaches
/// the thread; its final `commit` lands on an object only it still holds.
pub struct Image {
    path: PathBuf,
    data: Mutex<ImageData>,
}

/// Resolve to the canonical absolute form used as the uniqueness/ordering
/// key. Paths that no longer exist (delete notifications) fall back to a
/// plain absolute join, which is already canonical for files under a
/// canonicalized watch directory.
pub fn normalize_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        return PathBuf::new();
    }
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

impl Image {
    /// New Idle entity. An empty `path` denotes the standard-input source.
    pub fn new(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            path: normalize_path(path),
            data: Mutex::new(ImageData {
                state: LoadState::Idle,
                pixels: None,
                deferred_unload: false,
                error: None,
                flip_v: false,
                flip_h: false,
                rotation: 0,
            }),
        })
    }

    /// Normalized path; empty for the stdin pseudo-image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stdin(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Exclusive access for the per-tick reads the presentation layer does
    /// (state, pixels, error, transforms).
    pub fn lock(&self) -> MutexGuard<'_, ImageData> {
        self.data.lock().unwrap()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().state == LoadState::Loading
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().state == LoadState::Loaded
    }

    /// Human-readable failure reason, present only in the Failed state.
    pub fn last_error(&self) -> Option<String> {
        self.lock().error.as_ref().map(|e| e.to_string())
    }

    /// Transition into Loading. The only entry point into that state; the
    /// caller must have checked `!is_loading()` (one decode in flight per
    /// entity, ever).
    pub(crate) fn begin_load(&self) {
        let mut data = self.lock();
        assert!(data.state != LoadState::Loading, "load already in flight");
        if data.state == LoadState::Loaded {
            unload_locked(&mut data);
        }
        data.error = None;
        data.state = LoadState::Loading;
    }

    /// Deliver the decode result. Called exactly once per `begin_load`, from
    /// the decode thread. A success that raced a deferred unload is
    /// discarded on the spot rather than materialized.
    pub(crate) fn commit(&self, result: Result<DecodedImage, LoadError>) {
        let mut data = self.lock();
        match result {
            Ok(decoded) => {
                data.pixels = Some(decoded);
                data.state = LoadState::Loaded;
                if data.deferred_unload {
                    data.deferred_unload = false;
                    unload_locked(&mut data);
                }
            }
            Err(err) => {
                data.error = Some(err);
                data.state = LoadState::Failed;
            }
        }
    }

    /// Record a failure that happened before any thread was spawned
    /// (open error, classification miss). A Loaded entity whose file has
    /// vanished can reach this, so any stale buffer is released first:
    /// pixels exist only in the Loaded state.
    pub(crate) fn fail(&self, err: LoadError) {
        let mut data = self.lock();
        debug_assert!(data.state != LoadState::Loading);
        data.pixels = None;
        data.error = Some(err);
        data.state = LoadState::Failed;
    }

    /// Drop the decoded buffer and return to Idle. Precondition: Loaded.
    pub fn unload(&self) {
        let mut data = self.lock();
        assert!(data.state == LoadState::Loaded, "unload of an unloaded image");
        unload_locked(&mut data);
    }

    /// The file behind this entity changed on disk: any materialized or
    /// in-flight snapshot is stale. Loaded drops its buffer now; Loading
    /// marks the eventual result for immediate disposal; Idle and Failed
    /// have nothing to invalidate.
    pub(crate) fn invalidate(&self) {
        let mut data = self.lock();
        match data.state {
            LoadState::Loaded => unload_locked(&mut data),
            LoadState::Loading => data.deferred_unload = true,
            LoadState::Idle | LoadState::Failed => {}
        }
    }
}

fn unload_locked(data: &mut ImageData) {
    data.pixels = None;
    data.state = LoadState::Idle;
}
