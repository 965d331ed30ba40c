use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::decode;
use crate::image::{Image, LoadError};

/// Initial buffer size for byte sources that can't report their length.
const STREAM_CHUNK: usize = 256 * 256;

/// How much of a file the classification probe reads. Magic sniffing needs
/// only the first handful of bytes.
const PROBE_LEN: u64 = 32;

// ---------------------------------------------------------------------------
// Byte-source reading
// ---------------------------------------------------------------------------

// Whole-file read: the size is known up front, so reserve once.
fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let size = f.metadata()?.len() as usize;
    let mut buf = Vec::with_capacity(size);
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

// Sequential read for sources of unknown length (pipes, stdin). The buffer
// grows by amortized doubling.
fn read_stream(mut src: impl Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(STREAM_CHUNK);
    src.read_to_end(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Background decode dispatch
// ---------------------------------------------------------------------------

/// Spawn one background decode for `img`. Caller must have checked
/// `!img.is_loading()`; `begin_load` enforces it. The thread is never
/// joined — the entity outlives the store-side handle through its own
/// `Arc`, and `commit` runs exactly once when the decode finishes.
pub fn start_load(img: &Arc<Image>, bytes: Vec<u8>) {
    img.begin_load();
    let img = Arc::clone(img);
    thread::Builder::new()
        .name("pixcache-decode".into())
        .spawn(move || {
            // Decode runs without the entity lock; only commit takes it.
            let result = decode::decode(&bytes).map_err(LoadError::from);
            img.commit(result);
        })
        .expect("failed to spawn decode thread");
}

/// Load a path-backed image: classify, read the whole file, dispatch.
/// Failures before dispatch land on the entity as Failed, never as a
/// spawned thread.
pub fn load(img: &Arc<Image>) {
    if !is_image_file(img.path()) {
        img.fail(LoadError::NotAnImage);
        return;
    }
    match read_file(img.path()) {
        Ok(bytes) => start_load(img, bytes),
        Err(err) => img.fail(err.into()),
    }
}

/// Load the stdin pseudo-image. Stdin can't be sized or rewound, so it is
/// drained sequentially before dispatch.
pub fn load_from_stdin(img: &Arc<Image>) {
    match read_stream(io::stdin().lock()) {
        Ok(bytes) => start_load(img, bytes),
        Err(err) => img.fail(err.into()),
    }
}

// ---------------------------------------------------------------------------
// File classification
// ---------------------------------------------------------------------------

/// Should directory enumeration treat `path` as an image? Regular files
/// with a recognized magic prefix only. Unreadable, truncated, or otherwise
/// broken files classify as "not an image" rather than erroring.
pub fn is_image_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    let Ok(f) = File::open(path) else {
        return false;
    };
    let mut prefix = Vec::with_capacity(PROBE_LEN as usize);
    if f.take(PROBE_LEN).read_to_end(&mut prefix).is_err() {
        return false;
    }
    decode::probe(&prefix)
}
