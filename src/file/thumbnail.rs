//! Derived-asset generation for image uploads.
//!
//! The rendering itself lives outside the engine; this module defines the
//! contract the writer calls and the absorbing wrapper around it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::path::PathResolver;

/// Thumbnail sizes, largest first. Pipelines return paths in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSize {
    Large,
    Medium,
    Small,
}

impl ThumbnailSize {
    /// All sizes, in pipeline output order.
    pub const ALL: [ThumbnailSize; 3] = [Self::Large, Self::Medium, Self::Small];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Large => "large",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Small => "small",
        }
    }
}

/// Produces derived assets for a stored image.
///
/// Implementations run on the blocking thread pool. Returning `None`
/// means "no thumbnails"; the upload still succeeds.
pub trait ThumbnailPipeline: Send + Sync {
    /// Generate up to three derived assets (large, medium, small) for the
    /// image at `image_path`, returning their paths relative to the
    /// storage root.
    fn generate(&self, owner_id: i64, image_path: &Path) -> Option<Vec<String>>;
}

/// Pipeline that never produces thumbnails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThumbnails;

impl ThumbnailPipeline for NoThumbnails {
    fn generate(&self, _owner_id: i64, _image_path: &Path) -> Option<Vec<String>> {
        None
    }
}

/// Pipeline that stores a byte copy of the image per size in the owner's
/// thumbnail folder, for deployments without an image renderer.
#[derive(Debug, Clone)]
pub struct CopyThumbnails {
    paths: PathResolver,
}

impl CopyThumbnails {
    /// Create a pipeline writing below the resolver's storage root.
    pub fn new(paths: PathResolver) -> Self {
        Self { paths }
    }

    fn copy_all(&self, owner_id: i64, image_path: &Path) -> std::io::Result<Vec<String>> {
        let base_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");
        let folder = self.paths.thumbnails_folder(owner_id);
        fs::create_dir_all(self.paths.physical_path(&folder))?;

        let token = Uuid::new_v4().simple().to_string();
        let mut written: Vec<String> = Vec::with_capacity(ThumbnailSize::ALL.len());
        for size in ThumbnailSize::ALL {
            let relative = format!("{folder}/{}_{token}_{base_name}", size.as_str());
            if let Err(e) = fs::copy(image_path, self.paths.physical_path(&relative)) {
                for done in &written {
                    let _ = fs::remove_file(self.paths.physical_path(done.as_str()));
                }
                return Err(e);
            }
            written.push(relative);
        }
        Ok(written)
    }
}

impl ThumbnailPipeline for CopyThumbnails {
    fn generate(&self, owner_id: i64, image_path: &Path) -> Option<Vec<String>> {
        match self.copy_all(owner_id, image_path) {
            Ok(paths) => Some(paths),
            Err(e) => {
                debug!("thumbnail copy of {:?} failed: {}", image_path, e);
                None
            }
        }
    }
}

/// Whether a mime type is handed to the pipeline.
pub fn is_image(mime_type: Option<&str>) -> bool {
    mime_type.is_some_and(|m| m.starts_with("image/"))
}

/// Run the pipeline on the blocking pool and absorb every failure.
///
/// Returns the (large, medium, small) references; missing entries stay
/// `None`, extra entries are ignored.
pub async fn generate_absorbing(
    pipeline: Arc<dyn ThumbnailPipeline>,
    owner_id: i64,
    image_path: &Path,
) -> [Option<String>; 3] {
    let path = image_path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || pipeline.generate(owner_id, &path)).await;

    match result {
        Ok(Some(paths)) => {
            let mut refs = paths.into_iter();
            [refs.next(), refs.next(), refs.next()]
        }
        Ok(None) => {
            debug!("thumbnail generation produced nothing for {:?}", image_path);
            [None, None, None]
        }
        Err(e) => {
            warn!("thumbnail generation panicked for {:?}: {}", image_path, e);
            [None, None, None]
        }
    }
}

/// Delete derived assets from storage. Failures are logged and skipped.
pub async fn remove_assets<'r>(paths: &PathResolver, refs: impl IntoIterator<Item = &'r str>) {
    for relative in refs {
        match tokio::fs::remove_file(paths.physical_path(relative)).await {
            Ok(()) => debug!("removed thumbnail {}", relative),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove thumbnail {}: {}", relative, e),
        }
    }
}
