//! Concurrent image cache for an interactive viewer.
//!
//! The store tracks the images of one directory as a sorted, binary-
//! searchable collection of entities. Decoding runs on short-lived
//! background threads (one per in-flight load) and commits into the
//! entity under its mutex; the presentation layer polls entity state
//! each tick and drives navigation through store indices. `reconcile`
//! folds live filesystem changes back into the collection without ever
//! removing an entity the viewer may currently be displaying.

pub mod decode;
pub mod image;
pub mod loader;
pub mod store;
pub mod watch;

pub use decode::{DecodeError, DecodedImage};
pub use image::{Image, ImageData, LoadError, LoadState};
pub use store::{ImageStore, cmp_paths};
pub use watch::{DirWatch, FsEvent};
