//! File-tree and storage engine for Stowage.
//!
//! This module keeps the metadata tree and the physical storage area in
//! step:
//! - Owner-scoped node metadata and the move journal
//! - Path derivation from the storage root
//! - Streaming uploads with incremental quota enforcement
//! - Rename/move of leaves and whole subtrees
//! - Trash, restore and permanent purge
//! - Thumbnail generation hooks and downloads

mod download;
mod journal;
mod lock;
mod node;
mod path;
mod rename;
mod service;
mod thumbnail;
mod trash;
mod writer;

pub use download::{Download, Downloader};
pub use journal::{JournalRepository, NewPendingMove, PendingMove};
pub use lock::{OwnerGuard, OwnerLocks};
pub use node::{FileNode, NewNode, NodeRepository, NodeUpdate};
pub use path::{
    is_descendant_path, validate_name, with_original_extension, PathResolver,
    MAX_NAME_LENGTH,
};
pub use rename::{ReconcileReport, RenameEngine};
pub use service::FileService;
pub use thumbnail::{
    generate_absorbing, is_image, CopyThumbnails, NoThumbnails, ThumbnailPipeline, ThumbnailSize,
};
pub use trash::{PurgeOutcome, TrashManager};
pub use writer::{guess_mime_type, reader_chunks, StorageWriter, UploadRequest};
