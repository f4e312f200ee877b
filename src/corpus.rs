//! Locating an optional external image corpus for tests and benchmarks.
//!
//! Nothing in the library depends on a corpus being present; callers fall
//! back to synthetic images when [`corpus_dir`] returns `None`.

use std::path::{Path, PathBuf};

#[cfg(feature = "png")]
use crate::types::{PixelLayout, RasterImage};

/// Returns the path to the corpus directory.
///
/// Checks in order:
/// 1. `JPEG_ARCHIVE_CORPUS_DIR` environment variable
/// 2. `CODEC_CORPUS_DIR` environment variable
/// 3. `./corpus/` relative to the project root
pub fn corpus_dir() -> Option<PathBuf> {
    for var in ["JPEG_ARCHIVE_CORPUS_DIR", "CODEC_CORPUS_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let path = PathBuf::from(dir);
            if path.is_dir() {
                return Some(path);
            }
        }
    }

    let corpus = project_root()?.join("corpus");
    corpus.is_dir().then_some(corpus)
}

/// JPEG files in the corpus and its immediate subdirectories, sorted.
pub fn corpus_jpegs() -> Vec<PathBuf> {
    let Some(root) = corpus_dir() else {
        return Vec::new();
    };
    let mut files = jpeg_files_in_dir(&root);
    if let Ok(entries) = std::fs::read_dir(&root) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                files.extend(jpeg_files_in_dir(&path));
            }
        }
    }
    files.sort();
    files
}

fn project_root() -> Option<PathBuf> {
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        return Some(PathBuf::from(manifest_dir));
    }
    std::env::current_dir().ok()
}

fn files_with_extension(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)));
            if matches && path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// Returns `.jpg`/`.jpeg` files from a directory, sorted by name.
pub fn jpeg_files_in_dir(dir: &Path) -> Vec<PathBuf> {
    files_with_extension(dir, &["jpg", "jpeg"])
}

/// Returns PNG files from a directory, sorted by name.
pub fn png_files_in_dir(dir: &Path) -> Vec<PathBuf> {
    files_with_extension(dir, &["png"])
}

/// Loads a PNG as an RGB raster. Returns `None` on error or unsupported format.
#[cfg(feature = "png")]
pub fn load_png_as_rgb(path: &Path) -> Option<RasterImage> {
    use std::fs::File;

    let file = File::open(path).ok()?;
    let decoder = png::Decoder::new(file);
    let mut reader = decoder.read_info().ok()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).ok()?;
    if info.bit_depth != png::BitDepth::Eight {
        return None;
    }
    let bytes = &buf[..info.buffer_size()];

    let rgb = match info.color_type {
        png::ColorType::Rgb => bytes.to_vec(),
        png::ColorType::Rgba => bytes
            .chunks(4)
            .flat_map(|c| [c[0], c[1], c[2]])
            .collect(),
        png::ColorType::Grayscale => bytes.iter().flat_map(|&g| [g, g, g]).collect(),
        png::ColorType::GrayscaleAlpha => bytes
            .chunks(2)
            .flat_map(|c| [c[0], c[0], c[0]])
            .collect(),
        _ => return None,
    };

    RasterImage::new(
        rgb,
        info.width as usize,
        info.height as usize,
        PixelLayout::Rgb,
    )
    .ok()
}
