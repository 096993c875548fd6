//! Stowage - personal cloud-storage engine
//!
//! Keeps an owner-scoped metadata tree in step with a physical storage
//! area, with streaming quota enforcement, structural rename/move, and a
//! two-phase trash lifecycle.

pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;

pub use config::Config;
pub use db::{Account, AccountRepository, Database, NewAccount};
pub use error::{Result, StowageError};
pub use file::{
    Download, FileNode, FileService, PathResolver, PurgeOutcome, ReconcileReport,
    ThumbnailPipeline, ThumbnailSize, UploadRequest,
};
