//! Streaming ingestion and directory creation.
//!
//! Uploads are written to the owner's staging folder first and only moved
//! into the tree once the whole body arrived within quota. The node row and
//! the quota charge are committed together; until then the physical object
//! is owned by a guard that deletes it on every early exit.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock::OwnerLocks;
use super::node::{FileNode, NewNode, NodeRepository, NodeUpdate};
use super::path::{validate_name, PathResolver};
use super::thumbnail::{generate_absorbing, is_image, remove_assets, ThumbnailPipeline};
use crate::db::{AccountRepository, Database};
use crate::{Result, StowageError};

/// Target and naming of an upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target directory (None = the owner's root).
    pub parent_id: Option<i64>,
    /// Name of the new leaf.
    pub name: String,
    /// Declared content type; guessed from the name when absent.
    pub mime_type: Option<String>,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(parent_id: Option<i64>, name: impl Into<String>) -> Self {
        Self {
            parent_id,
            name: name.into(),
            mime_type: None,
        }
    }

    /// Set the declared content type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Guess a content type from a file name.
pub fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// A physical object not yet backed by a committed row.
///
/// Removed on drop unless [`PartialFile::keep`] was called.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn moved_to(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("discarded partial upload {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to discard partial upload {:?}: {}", self.path, e),
        }
    }
}

/// Splits a reader into owned chunks of at most `chunk_size` bytes.
pub fn reader_chunks<R>(reader: R, chunk_size: usize) -> impl Stream<Item = io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = chunk_size.max(1);
    futures::stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = vec![0u8; chunk_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, io::Error>(None);
        }
        buf.truncate(n);
        Ok::<_, io::Error>(Some((buf, reader)))
    })
}

/// Writes new leaves and directories into an owner's tree.
pub struct StorageWriter<'a> {
    db: &'a Database,
    paths: &'a PathResolver,
    locks: &'a OwnerLocks,
    thumbnails: &'a Arc<dyn ThumbnailPipeline>,
    chunk_size: usize,
}

impl<'a> StorageWriter<'a> {
    /// Create a new StorageWriter.
    pub fn new(
        db: &'a Database,
        paths: &'a PathResolver,
        locks: &'a OwnerLocks,
        thumbnails: &'a Arc<dyn ThumbnailPipeline>,
    ) -> Self {
        Self {
            db,
            paths,
            locks,
            thumbnails,
            chunk_size: 64 * 1024,
        }
    }

    /// Set the read buffer size used by [`StorageWriter::upload_reader`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Ingest a byte stream as a new leaf.
    ///
    /// The running total is checked against the quota remaining at the
    /// start of the transfer on every chunk. Any failure, including the
    /// caller dropping the returned future, removes the partial object.
    pub async fn upload<S, B>(&self, owner_id: i64, request: &UploadRequest, body: S) -> Result<FileNode>
    where
        S: Stream<Item = io::Result<B>>,
        B: AsRef<[u8]>,
    {
        validate_name(&request.name)?;

        let remaining = {
            let _scope = self.locks.acquire(owner_id).await;
            let account = AccountRepository::new(self.db.pool()).require(owner_id).await?;
            NodeRepository::find_live_directory(self.db.pool(), owner_id, request.parent_id).await?;
            NodeRepository::ensure_name_free(
                self.db.pool(),
                owner_id,
                request.parent_id,
                &request.name,
                None,
            )
            .await?;
            self.paths.ensure_owner_layout(owner_id).await?;
            account.remaining_bytes()
        };

        let (partial, size) = self.stage(owner_id, body, remaining).await?;
        let node = self.commit(owner_id, request, partial, size).await?;
        info!(
            "Stored '{}' ({} bytes) as node {} for owner {}",
            node.name, node.size_bytes, node.id, owner_id
        );

        Ok(self.attach_thumbnails(node).await)
    }

    /// Ingest everything `reader` yields as a new leaf.
    pub async fn upload_reader<R>(&self, owner_id: i64, request: &UploadRequest, reader: R) -> Result<FileNode>
    where
        R: AsyncRead + Unpin,
    {
        self.upload(owner_id, request, reader_chunks(reader, self.chunk_size))
            .await
    }

    /// Create an empty directory.
    pub async fn create_directory(
        &self,
        owner_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<FileNode> {
        validate_name(name)?;

        let _scope = self.locks.acquire(owner_id).await;
        AccountRepository::new(self.db.pool()).require(owner_id).await?;
        let parent = NodeRepository::find_live_directory(self.db.pool(), owner_id, parent_id).await?;
        NodeRepository::ensure_name_free(self.db.pool(), owner_id, parent_id, name, None).await?;
        self.paths.ensure_owner_layout(owner_id).await?;

        let relative_path = self.paths.new_relative_path(owner_id, parent.as_ref(), name);
        let physical = self.paths.physical_path(&relative_path);
        match tokio::fs::create_dir(&physical).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(occupied(name));
            }
            Err(e) => return Err(e.into()),
        }

        let new_node = NewNode::directory(owner_id, parent_id, name, relative_path);
        match NodeRepository::create(self.db.pool(), &new_node).await {
            Ok(node) => {
                info!("Created directory {} for owner {}", node.relative_path, owner_id);
                Ok(node)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir(&physical).await {
                    warn!("failed to remove {:?} after metadata error: {}", physical, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn stage<S, B>(&self, owner_id: i64, body: S, remaining: u64) -> Result<(PartialFile, u64)>
    where
        S: Stream<Item = io::Result<B>>,
        B: AsRef<[u8]>,
    {
        let staging = format!(
            "{}/{}.part",
            self.paths.staging_folder(owner_id),
            Uuid::new_v4().simple()
        );
        // declared before the handle so the handle closes first on unwind
        let partial = PartialFile::new(self.paths.physical_path(&staging));
        let mut sink = tokio::fs::File::create(partial.path()).await?;

        futures::pin_mut!(body);
        let mut total: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let bytes = chunk.as_ref();
            total += bytes.len() as u64;
            if total > remaining {
                debug!(
                    "upload for owner {} exceeded quota after {} bytes ({} remaining)",
                    owner_id, total, remaining
                );
                return Err(StowageError::QuotaExceeded {
                    requested: total,
                    remaining,
                });
            }
            sink.write_all(bytes).await?;
        }

        sink.flush().await?;
        sink.sync_all().await?;
        drop(sink);
        Ok((partial, total))
    }

    async fn commit(
        &self,
        owner_id: i64,
        request: &UploadRequest,
        mut partial: PartialFile,
        size: u64,
    ) -> Result<FileNode> {
        let _scope = self.locks.acquire(owner_id).await;

        // the tree may have changed while the body was streaming
        let parent =
            NodeRepository::find_live_directory(self.db.pool(), owner_id, request.parent_id).await?;
        NodeRepository::ensure_name_free(
            self.db.pool(),
            owner_id,
            request.parent_id,
            &request.name,
            None,
        )
        .await?;

        let relative_path = self
            .paths
            .new_relative_path(owner_id, parent.as_ref(), &request.name);
        let target = self.paths.physical_path(&relative_path);
        if tokio::fs::try_exists(&target).await? {
            return Err(occupied(&request.name));
        }
        tokio::fs::rename(partial.path(), &target).await?;
        partial.moved_to(target);

        let mime_type = request
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime_type(&request.name));
        let size_bytes = i64::try_from(size)
            .map_err(|_| StowageError::Validation(format!("upload of {size} bytes is too large")))?;
        let new_node = NewNode::file(owner_id, request.parent_id, &request.name, relative_path, size_bytes)
            .with_mime_type(mime_type);

        let mut tx = self.db.begin().await?;
        let node = NodeRepository::create(&mut *tx, &new_node).await?;
        if !AccountRepository::try_reserve(&mut *tx, owner_id, size_bytes).await? {
            drop(tx);
            let remaining = AccountRepository::new(self.db.pool())
                .require(owner_id)
                .await?
                .remaining_bytes();
            return Err(StowageError::QuotaExceeded {
                requested: size,
                remaining,
            });
        }
        tx.commit().await?;

        partial.keep();
        Ok(node)
    }

    async fn attach_thumbnails(&self, node: FileNode) -> FileNode {
        if !is_image(node.mime_type.as_deref()) {
            return node;
        }

        let image = self.paths.physical_node_path(&node);
        let refs = generate_absorbing(Arc::clone(self.thumbnails), node.owner_id, &image).await;
        if refs.iter().all(Option::is_none) {
            return node;
        }

        let update = NodeUpdate::new().thumbnails(refs.clone());
        match NodeRepository::update(self.db.pool(), node.owner_id, node.id, &update).await {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                debug!("node {} vanished before its thumbnails were recorded", node.id);
                remove_assets(self.paths, refs.iter().flatten().map(String::as_str)).await;
                node
            }
            Err(e) => {
                warn!("failed to record thumbnails for node {}: {}", node.id, e);
                remove_assets(self.paths, refs.iter().flatten().map(String::as_str)).await;
                node
            }
        }
    }
}

fn occupied(name: &str) -> StowageError {
    StowageError::BadName(format!("'{name}' is already present in storage"))
}
