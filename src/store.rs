use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::image::{Image, LoadState, normalize_path};
use crate::loader::is_image_file;
use crate::watch::{DirWatch, FsEvent};

// ---------------------------------------------------------------------------
// Path ordering
// ---------------------------------------------------------------------------

/// The display order of the collection. Three tiers:
/// case-insensitive compare first, shorter string on a prefix match,
/// and for case-insensitively equal strings the one that is lowercase at
/// the first raw difference. Deterministic for any pair of distinct paths.
pub fn cmp_paths(a: &Path, b: &Path) -> Ordering {
    let a = a.as_os_str().as_encoded_bytes();
    let b = b.as_os_str().as_encoded_bytes();

    for (&x, &y) in a.iter().zip(b) {
        let (fx, fy) = (x.to_ascii_lowercase(), y.to_ascii_lowercase());
        if fx != fy {
            return fx.cmp(&fy);
        }
    }
    if a.len() != b.len() {
        return a.len().cmp(&b.len());
    }
    // Equal ignoring case; a raw difference can only be a case difference.
    for (&x, &y) in a.iter().zip(b) {
        if x != y {
            return if x.is_ascii_lowercase() {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
    }
    Ordering::Equal
}

// ---------------------------------------------------------------------------
// Image store
// ---------------------------------------------------------------------------

/// Ordered collection of the images in one directory, unique by normalized
/// path. All structural mutation happens on the interactive thread; only
/// per-entity state crosses into the decode threads. Dropping the store
/// detaches any in-flight loads (each decode thread holds its own `Arc`).
pub struct ImageStore {
    dir: PathBuf,
    images: Vec<Arc<Image>>,
    watch: Option<DirWatch>,
}

impl ImageStore {
    /// Enumerate `dir`, classify, sort, and subscribe to change events.
    /// A failed subscription leaves the store fully usable, just without
    /// live invalidation.
    pub fn init(dir: &Path) -> io::Result<Self> {
        let dir = dir.canonicalize()?;

        let mut images = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let Ok(entry) = entry else { continue };
            // Keep regular files and entries whose type the filesystem
            // can't report; everything else can't be an image.
            if let Ok(ft) = entry.file_type() {
                if !ft.is_file() {
                    continue;
                }
            }
            let path = entry.path();
            if is_image_file(&path) {
                images.push(Image::new(&path));
            }
        }
        images.sort_by(|a, b| cmp_paths(a.path(), b.path()));
        log::info!("indexed {} images in {}", images.len(), dir.display());

        let watch = match DirWatch::open(&dir) {
            Ok(watch) => Some(watch),
            Err(err) => {
                log::warn!("no change notifications for {}: {}", dir.display(), err);
                None
            }
        };

        Ok(Self { dir, images, watch })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Arc<Image> {
        &self.images[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Image>> {
        self.images.iter()
    }

    /// Binary search by normalized path. `Err` carries the index at which
    /// the path would be inserted to keep the collection sorted.
    pub fn search(&self, path: &Path) -> Result<usize, usize> {
        self.search_normalized(&normalize_path(path))
    }

    fn search_normalized(&self, norm: &Path) -> Result<usize, usize> {
        self.images.binary_search_by(|img| cmp_paths(img.path(), norm))
    }

    /// Index of the entity for `path`, inserting a fresh Idle one at the
    /// sorted position if it isn't tracked yet.
    pub fn get_or_add(&mut self, path: &Path) -> usize {
        let norm = normalize_path(path);
        match self.search_normalized(&norm) {
            Ok(idx) => idx,
            Err(idx) => {
                self.images.insert(idx, Image::new(&norm));
                idx
            }
        }
    }

    /// Remove the entity at `idx`. Loading and Loaded entities must never
    /// be removed — the presentation layer may be viewing them.
    pub fn remove(&mut self, idx: usize) {
        let state = self.images[idx].lock().state;
        assert!(
            state != LoadState::Loading && state != LoadState::Loaded,
            "cannot remove an image in use"
        );
        self.images.remove(idx);
    }

    /// Drain pending filesystem notifications and fold them into the
    /// collection. Called once per tick from the interactive thread; a
    /// quiet queue (or a subscription that never opened) is a no-op.
    pub fn reconcile(&mut self) {
        let Some(watch) = &self.watch else { return };
        for event in watch.drain() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: FsEvent) {
        match event {
            // Creation and modification are the same action at this
            // granularity: any snapshot we hold is stale, and an untracked
            // path may have become an image worth tracking.
            FsEvent::Changed(path) => {
                if path.parent() != Some(self.dir.as_path()) {
                    return;
                }
                let norm = normalize_path(&path);
                match self.search_normalized(&norm) {
                    Ok(idx) => self.images[idx].invalidate(),
                    Err(idx) => {
                        if is_image_file(&norm) {
                            self.images.insert(idx, Image::new(&norm));
                        }
                    }
                }
            }
            FsEvent::Removed(path) => {
                if path.parent() != Some(self.dir.as_path()) {
                    return;
                }
                let Ok(idx) = self.search_normalized(&normalize_path(&path)) else {
                    return;
                };
                // A Loaded or Loading entity stays in the collection even
                // though its file is gone: the viewer might be on it right
                // now. If the file reappears, the write-close path treats
                // it as modified.
                let state = self.images[idx].lock().state;
                if state == LoadState::Loaded || state == LoadState::Loading {
                    return;
                }
                self.images.remove(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedImage;
    use crate::image::LoadError;
    use std::time::{Duration, Instant};

    fn png_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, crate::decode::tests::png_bytes(2, 2)).unwrap();
        path
    }

    fn fake_pixels() -> DecodedImage {
        DecodedImage {
            rgba: vec![0; 16],
            width: 2,
            height: 2,
            animated: false,
            frame_delays: Vec::new(),
            frame_count: 1,
        }
    }

    fn force_loaded(img: &Arc<Image>) {
        img.begin_load();
        img.commit(Ok(fake_pixels()));
    }

    fn assert_sorted(store: &ImageStore) {
        for pair in store.images.windows(2) {
            assert_eq!(
                cmp_paths(pair[0].path(), pair[1].path()),
                Ordering::Less,
                "store out of order: {:?} then {:?}",
                pair[0].path(),
                pair[1].path()
            );
        }
    }

    // ── comparator ──────────────────────────────────────────────────────

    #[test]
    fn cmp_first_tier_is_case_insensitive() {
        assert_eq!(cmp_paths(Path::new("alpha"), Path::new("Beta")), Ordering::Less);
        assert_eq!(cmp_paths(Path::new("Beta"), Path::new("alpha")), Ordering::Greater);
        assert_eq!(cmp_paths(Path::new("img10"), Path::new("img2")), Ordering::Less);
    }

    #[test]
    fn cmp_second_tier_prefers_shorter() {
        assert_eq!(cmp_paths(Path::new("ab"), Path::new("abc")), Ordering::Less);
        assert_eq!(cmp_paths(Path::new("ABC"), Path::new("ab")), Ordering::Greater);
    }

    #[test]
    fn cmp_third_tier_prefers_lowercase() {
        assert_eq!(cmp_paths(Path::new("abc"), Path::new("aBc")), Ordering::Less);
        assert_eq!(cmp_paths(Path::new("ABC"), Path::new("abc")), Ordering::Greater);
    }

    #[test]
    fn cmp_equal_only_for_identical() {
        assert_eq!(cmp_paths(Path::new("same.png"), Path::new("same.png")), Ordering::Equal);
    }

    // ── population and search ───────────────────────────────────────────

    #[test]
    fn init_keeps_only_images_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "zebra.png");
        png_file(dir.path(), "Apple.png");
        png_file(dir.path(), "mango.png");
        std::fs::write(dir.path().join("notes.txt"), "text").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let store = ImageStore::init(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
        assert_sorted(&store);
        let names: Vec<_> = store
            .iter()
            .map(|img| img.path().file_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["Apple.png", "mango.png", "zebra.png"]);
    }

    #[test]
    fn search_finds_what_get_or_add_inserted() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "b.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        let extra = png_file(dir.path(), "a.png");
        let idx = store.get_or_add(&extra);
        assert_eq!(idx, 0);
        assert_sorted(&store);

        let found = store.search(&extra).unwrap();
        assert_eq!(found, idx);
        assert_eq!(store.get(found).path(), normalize_path(&extra));

        // Adding again is a lookup, not a duplicate.
        assert_eq!(store.get_or_add(&extra), idx);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn search_miss_reports_insertion_point() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        png_file(dir.path(), "c.png");
        let store = ImageStore::init(dir.path()).unwrap();

        let missing = dir.path().join("b.png");
        assert_eq!(store.search(&missing), Err(1));
    }

    #[test]
    fn stdin_sentinel_sorts_first_and_is_findable() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        let idx = store.get_or_add(Path::new(""));
        assert_eq!(idx, 0);
        assert!(store.get(0).is_stdin());
        assert_eq!(store.search(Path::new("")), Ok(0));
    }

    #[test]
    fn store_stays_sorted_under_churn() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ImageStore::init(dir.path()).unwrap();
        for name in ["q.png", "B.png", "b.png", "aa.png", "a.png", "Z.png"] {
            store.get_or_add(&png_file(dir.path(), name));
            assert_sorted(&store);
        }
        store.remove(2);
        store.remove(0);
        assert_sorted(&store);
    }

    // ── removal preconditions ───────────────────────────────────────────

    #[test]
    #[should_panic(expected = "cannot remove an image in use")]
    fn remove_of_loaded_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        force_loaded(store.get(0));
        store.remove(0);
    }

    #[test]
    #[should_panic(expected = "cannot remove an image in use")]
    fn remove_of_loading_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        store.get(0).begin_load();
        store.remove(0);
    }

    #[test]
    fn remove_of_failed_image_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        store.get(0).begin_load();
        store.get(0).commit(Err(LoadError::NotAnImage));
        store.remove(0);
        assert!(store.is_empty());
    }

    // ── reconciliation protocol ─────────────────────────────────────────

    #[test]
    fn changed_unloads_a_loaded_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        force_loaded(store.get(0));

        store.apply(FsEvent::Changed(path.clone()));

        let img = store.get(0);
        assert_eq!(img.lock().state, LoadState::Idle);
        assert!(img.lock().pixels.is_none());
        // Still tracked; the next navigation re-loads it.
        assert_eq!(store.search(&path), Ok(0));
    }

    #[test]
    fn changed_defers_unload_of_a_loading_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        store.get(0).begin_load();

        store.apply(FsEvent::Changed(path));
        assert!(store.get(0).lock().deferred_unload);

        // The stale in-flight result gets dropped on arrival.
        store.get(0).commit(Ok(fake_pixels()));
        let data = store.get(0).lock();
        assert_eq!(data.state, LoadState::Idle);
        assert!(data.pixels.is_none());
    }

    #[test]
    fn changed_inserts_a_new_image_in_sorted_position() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        png_file(dir.path(), "c.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        let new = png_file(dir.path(), "b.png");
        store.apply(FsEvent::Changed(new.clone()));

        assert_eq!(store.len(), 3);
        assert_sorted(&store);
        assert_eq!(store.search(&new), Ok(1));
    }

    #[test]
    fn changed_ignores_non_image_files() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "text").unwrap();
        store.apply(FsEvent::Changed(text));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removed_keeps_loaded_and_loading_images() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = png_file(dir.path(), "a.png");
        let loading = png_file(dir.path(), "b.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        force_loaded(store.get(0));
        store.get(1).begin_load();

        store.apply(FsEvent::Removed(loaded.clone()));
        store.apply(FsEvent::Removed(loading));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).lock().state, LoadState::Loaded);
        assert_eq!(store.search(&loaded), Ok(0));
    }

    #[test]
    fn removed_drops_idle_images_and_ignores_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        store.apply(FsEvent::Removed(dir.path().join("never-seen.png")));
        assert_eq!(store.len(), 1);

        std::fs::remove_file(&path).unwrap();
        store.apply(FsEvent::Removed(path));
        assert!(store.is_empty());
    }

    #[test]
    fn events_outside_the_watched_directory_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let foreign = png_file(other.path(), "b.png");
        let mut store = ImageStore::init(dir.path()).unwrap();

        store.apply(FsEvent::Changed(foreign.clone()));
        store.apply(FsEvent::Removed(foreign));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reconcile_without_a_subscription_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        store.watch = None;
        store.reconcile();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reconcile_picks_up_files_created_after_init() {
        let dir = tempfile::tempdir().unwrap();
        png_file(dir.path(), "a.png");
        let mut store = ImageStore::init(dir.path()).unwrap();
        assert_eq!(store.len(), 1);

        png_file(dir.path(), "b.png");
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.len() < 2 {
            assert!(Instant::now() < deadline, "watcher never delivered the creation");
            std::thread::sleep(Duration::from_millis(20));
            store.reconcile();
        }
        assert_sorted(&store);
    }
}
