//! Soft deletion, restore and permanent purge.
//!
//! Trashing flags only the addressed node. Its descendants keep their own
//! flags: they drop out of listings because their ancestor does, but stay
//! reachable by id.

use std::io;

use tracing::{info, warn};

use super::journal::JournalRepository;
use super::lock::OwnerLocks;
use super::node::{FileNode, NodeRepository, NodeUpdate};
use super::path::PathResolver;
use super::thumbnail::remove_assets;
use crate::db::{AccountRepository, Database};
use crate::{Result, StowageError};

/// Result of a purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Metadata rows removed (the node and its descendants).
    pub removed: u64,
    /// Quota returned to the account.
    pub freed_bytes: i64,
}

/// Manages the trash of an owner's tree.
pub struct TrashManager<'a> {
    db: &'a Database,
    paths: &'a PathResolver,
    locks: &'a OwnerLocks,
}

impl<'a> TrashManager<'a> {
    /// Create a new TrashManager.
    pub fn new(db: &'a Database, paths: &'a PathResolver, locks: &'a OwnerLocks) -> Self {
        Self { db, paths, locks }
    }

    /// Flag a live node as deleted. Nothing changes on storage.
    pub async fn move_to_trash(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        let _scope = self.locks.acquire(owner_id).await;
        let node = NodeRepository::find_live(self.db.pool(), owner_id, id).await?;

        let trashed = set_deleted(self.db, owner_id, node.id, true)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("node {id}")))?;
        info!("Moved {} to trash for owner {}", trashed.relative_path, owner_id);
        Ok(trashed)
    }

    /// The owner's trashed nodes.
    pub async fn list_trash(&self, owner_id: i64) -> Result<Vec<FileNode>> {
        NodeRepository::list_trash(self.db.pool(), owner_id).await
    }

    /// Clear the deleted flag. Fails with NotFound unless the node is
    /// currently trashed.
    pub async fn restore(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        let _scope = self.locks.acquire(owner_id).await;
        let node = self.find_trashed(owner_id, id).await?;

        let restored = set_deleted(self.db, owner_id, node.id, false)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("trashed node {id}")))?;
        info!("Restored {} for owner {}", restored.relative_path, owner_id);
        Ok(restored)
    }

    /// Permanently delete a trashed node and, for a directory, its whole
    /// subtree.
    ///
    /// The id set is collected before anything is touched. Storage is
    /// removed first; if that fails no metadata row is removed.
    pub async fn purge(&self, owner_id: i64, id: i64) -> Result<PurgeOutcome> {
        let _scope = self.locks.acquire(owner_id).await;
        let node = self.find_trashed(owner_id, id).await?;

        let subtree = if node.is_directory {
            NodeRepository::subtree(self.db.pool(), owner_id, node.id).await?
        } else {
            vec![node.clone()]
        };
        let ids: Vec<i64> = subtree.iter().map(|n| n.id).collect();
        let freed_bytes: i64 = subtree
            .iter()
            .filter(|n| !n.is_directory)
            .map(|n| n.size_bytes)
            .sum();

        let physical = self.paths.physical_node_path(&node);
        let removal = if node.is_directory {
            tokio::fs::remove_dir_all(&physical).await
        } else {
            tokio::fs::remove_file(&physical).await
        };
        match removal {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{:?} was already gone from storage; purging metadata", physical);
            }
            Err(e) => return Err(e.into()),
        }

        let mut tx = self.db.begin().await?;
        let removed = NodeRepository::delete_nodes(&mut *tx, owner_id, &ids).await?;
        AccountRepository::release(&mut *tx, owner_id, freed_bytes).await?;
        tx.commit().await?;

        remove_assets(self.paths, subtree.iter().flat_map(FileNode::thumbnail_refs)).await;

        info!(
            "Purged {} ({} nodes, {} bytes) for owner {}",
            node.relative_path, removed, freed_bytes, owner_id
        );
        Ok(PurgeOutcome {
            removed,
            freed_bytes,
        })
    }

    async fn find_trashed(&self, owner_id: i64, id: i64) -> Result<FileNode> {
        match NodeRepository::find(self.db.pool(), owner_id, id).await? {
            Some(node) if node.is_deleted => {
                JournalRepository::ensure_consistent(self.db.pool(), &node).await?;
                Ok(node)
            }
            _ => Err(StowageError::NotFound(format!("trashed node {id}"))),
        }
    }
}

async fn set_deleted(db: &Database, owner_id: i64, id: i64, is_deleted: bool) -> Result<Option<FileNode>> {
    let update = NodeUpdate::new().is_deleted(is_deleted);
    NodeRepository::update(db.pool(), owner_id, id, &update).await
}
