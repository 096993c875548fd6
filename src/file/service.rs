//! File service for Stowage.
//!
//! Entry point for the transport layer. Every call takes a verified owner
//! id and delegates to the engine responsible for the operation.

use std::io;
use std::sync::Arc;

use futures::Stream;
use tokio::io::AsyncRead;
use tracing::info;

use super::download::{Download, Downloader};
use super::journal::JournalRepository;
use super::lock::OwnerLocks;
use super::node::{FileNode, NodeRepository};
use super::path::PathResolver;
use super::rename::{ReconcileReport, RenameEngine};
use super::thumbnail::{CopyThumbnails, NoThumbnails, ThumbnailPipeline, ThumbnailSize};
use super::trash::{PurgeOutcome, TrashManager};
use super::writer::{StorageWriter, UploadRequest};
use crate::config::Config;
use crate::db::{Account, AccountRepository, Database, NewAccount};
use crate::{Result, StowageError};

/// Shared handle to the storage engine.
#[derive(Clone)]
pub struct FileService {
    db: Arc<Database>,
    paths: PathResolver,
    locks: Arc<OwnerLocks>,
    thumbnails: Arc<dyn ThumbnailPipeline>,
    chunk_size: usize,
    default_quota_bytes: i64,
}

impl FileService {
    /// Create a service over `db` and `paths` with no thumbnail pipeline.
    pub fn new(db: Arc<Database>, paths: PathResolver) -> Self {
        Self {
            db,
            paths,
            locks: Arc::new(OwnerLocks::new()),
            thumbnails: Arc::new(NoThumbnails),
            chunk_size: 64 * 1024,
            default_quota_bytes: 1024 * 1024 * 1024,
        }
    }

    /// Create a service configured from `config`.
    pub fn from_config(db: Arc<Database>, config: &Config) -> Self {
        let paths = PathResolver::from_config(&config.storage);
        let thumbnails: Arc<dyn ThumbnailPipeline> = if config.thumbnails.enabled {
            Arc::new(CopyThumbnails::new(paths.clone()))
        } else {
            Arc::new(NoThumbnails)
        };

        Self {
            chunk_size: config.storage.chunk_size,
            default_quota_bytes: config.storage.default_quota_bytes,
            ..Self::new(db, paths)
        }
        .with_thumbnails(thumbnails)
    }

    /// Replace the thumbnail pipeline.
    pub fn with_thumbnails(mut self, thumbnails: Arc<dyn ThumbnailPipeline>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get a reference to the path resolver.
    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    fn writer(&self) -> StorageWriter<'_> {
        StorageWriter::new(&self.db, &self.paths, &self.locks, &self.thumbnails)
            .with_chunk_size(self.chunk_size)
    }

    fn renamer(&self) -> RenameEngine<'_> {
        RenameEngine::new(&self.db, &self.paths, &self.locks)
    }

    fn trash_manager(&self) -> TrashManager<'_> {
        TrashManager::new(&self.db, &self.paths, &self.locks)
    }

    fn downloader(&self) -> Downloader<'_> {
        Downloader::new(&self.db, &self.paths, &self.locks)
    }

    /// Create an account and its storage layout.
    ///
    /// `quota_bytes` defaults to the configured quota.
    pub async fn create_account(&self, name: &str, quota_bytes: Option<i64>) -> Result<Account> {
        let quota = quota_bytes.unwrap_or(self.default_quota_bytes);
        let account = AccountRepository::new(self.db.pool())
            .create(&NewAccount::new(name, quota))
            .await?;
        self.paths.ensure_owner_layout(account.id).await?;

        info!("Created account {} ({}) with {} bytes quota", account.name, account.id, quota);
        Ok(account)
    }

    /// Get an account.
    pub async fn account(&self, owner_id: i64) -> Result<Account> {
        AccountRepository::new(self.db.pool()).require(owner_id).await
    }

    /// Change an account's quota.
    pub async fn set_quota(&self, owner_id: i64, quota_bytes: i64) -> Result<Account> {
        AccountRepository::new(self.db.pool())
            .set_quota(owner_id, quota_bytes)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("account {owner_id}")))
    }

    /// Get a live node.
    pub async fn node(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        NodeRepository::find_live(self.db.pool(), owner_id, id).await
    }

    /// List the live children of a directory (None = the owner's root).
    pub async fn list(&self, owner_id: i64, parent_id: Option<i64>) -> Result<Vec<FileNode>> {
        NodeRepository::find_live_directory(self.db.pool(), owner_id, parent_id).await?;
        NodeRepository::list_children(self.db.pool(), owner_id, parent_id).await
    }

    /// List the owner's trashed nodes.
    pub async fn list_trash(&self, owner_id: i64) -> Result<Vec<FileNode>> {
        self.trash_manager().list_trash(owner_id).await
    }

    /// Create a directory.
    pub async fn mkdir(&self, owner_id: i64, parent_id: Option<i64>, name: &str) -> Result<FileNode> {
        self.writer().create_directory(owner_id, parent_id, name).await
    }

    /// Ingest a byte stream as a new leaf.
    pub async fn upload<S, B>(&self, owner_id: i64, request: &UploadRequest, body: S) -> Result<FileNode>
    where
        S: Stream<Item = io::Result<B>>,
        B: AsRef<[u8]>,
    {
        self.writer().upload(owner_id, request, body).await
    }

    /// Ingest everything a reader yields as a new leaf.
    pub async fn upload_reader<R>(&self, owner_id: i64, request: &UploadRequest, reader: R) -> Result<FileNode>
    where
        R: AsyncRead + Unpin,
    {
        self.writer().upload_reader(owner_id, request, reader).await
    }

    /// Open a node for download.
    pub async fn download(&self, owner_id: i64, id: i64) -> Result<Download> {
        self.downloader().download(owner_id, id).await
    }

    /// Physical location of a node's thumbnail.
    pub async fn thumbnail(&self, owner_id: i64, id: i64, size: ThumbnailSize) -> Result<std::path::PathBuf> {
        self.downloader().thumbnail(owner_id, id, size).await
    }

    /// Rename a node.
    pub async fn rename(&self, owner_id: i64, id: i64, new_name: &str) -> Result<FileNode> {
        self.renamer().rename(owner_id, id, new_name).await
    }

    /// Move a node under another directory (None = the owner's root).
    pub async fn move_node(&self, owner_id: i64, id: i64, destination: Option<i64>) -> Result<FileNode> {
        self.renamer().move_node(owner_id, id, destination).await
    }

    /// Move a node to the trash.
    pub async fn trash(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        self.trash_manager().move_to_trash(owner_id, id).await
    }

    /// Restore a trashed node.
    pub async fn restore(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        self.trash_manager().restore(owner_id, id).await
    }

    /// Permanently delete a trashed node.
    pub async fn purge(&self, owner_id: i64, id: i64) -> Result<PurgeOutcome> {
        self.trash_manager().purge(owner_id, id).await
    }

    /// Resolve an owner's unfinished moves.
    pub async fn reconcile(&self, owner_id: i64) -> Result<ReconcileReport> {
        self.renamer().reconcile(owner_id).await
    }

    /// Owners with unfinished moves.
    pub async fn owners_with_pending_moves(&self) -> Result<Vec<i64>> {
        JournalRepository::owners_with_entries(self.db.pool()).await
    }
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService")
            .field("paths", &self.paths)
            .field("chunk_size", &self.chunk_size)
            .field("default_quota_bytes", &self.default_quota_bytes)
            .finish_non_exhaustive()
    }
}
