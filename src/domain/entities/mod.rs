//! Domain entity definitions.

mod image;

pub use image::{
    CacheKey, CacheStatus, ImageHandle, ImageSource, LoadedImage, ObjectHandle, PersistentEntry,
};
