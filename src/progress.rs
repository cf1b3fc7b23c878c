//! Progress-callback trait for batch upload events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ProcessorConfigBuilder::progress_callback`] to receive
//! events as [`crate::ImageProcessor::process_batch`] works through its
//! sources. Single-image entry points do not emit events.
//!
//! # Example
//!
//! ```rust
//! use imgpost::{BatchProgressCallback, ProcessorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     uploaded: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, media_id: &str) {
//!         self.uploaded.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} → {}", index + 1, total, media_id);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { uploaded: AtomicUsize::new(0) });
//!
//! let config = ProcessorConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each image.
///
/// Images run concurrently, so `on_image_*` may be called from several
/// tasks at once. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any image is acquired.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a run starts.
    ///
    /// # Arguments
    /// * `index` : 0-based position of the source in the batch
    /// * `total` : batch size
    /// * `source`: display form of the source (path, URL, or prompt)
    fn on_image_start(&self, index: usize, total: usize, source: &str) {
        let _ = (index, total, source);
    }

    /// Called when an image has been uploaded.
    fn on_image_complete(&self, index: usize, total: usize, media_id: &str) {
        let _ = (index, total, media_id);
    }

    /// Called when a run fails.
    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every image has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessorConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
