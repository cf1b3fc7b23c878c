//! Pipeline stages for image acquisition, compression and upload.
//!
//! Each submodule implements exactly one step of a run.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ validate ──▶ compress ──▶ upload
//! (path/URL/prompt) (magic)  (resize+JPEG) (retry)
//! ```
//!
//! 1. [`acquire`]: turn a local path, URL, or prompt into a readable local
//!    file; remote and generated bytes land in an owned temp file
//! 2. [`generate`]: ask the generation provider for an image URL
//! 3. [`validate`]: classify against the raster allow-list
//! 4. [`compress`]: downscale and re-encode to meet the platform budget;
//!    CPU-bound, so the orchestrator runs it in `spawn_blocking`
//! 5. [`upload`]: push the final bytes to the media platform with bounded
//!    retry; the only stage besides acquisition with network I/O

pub mod acquire;
pub mod compress;
pub mod generate;
pub mod upload;
pub mod validate;

use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Create a uniquely named temp file, in `temp_dir` when given.
pub(crate) fn new_temp_file(temp_dir: Option<&Path>, suffix: &str) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("imgpost-").suffix(suffix);
    match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
}
