//! Rename and move of leaves and subtrees.
//!
//! A structural change is one physical move followed by one metadata
//! transaction (the node row, every descendant path, and the journal entry).
//! The journal entry is written before the physical move, so a failure
//! between the two steps leaves a record that [`RenameEngine::reconcile`]
//! can resolve against what is actually on disk.

use std::path::Path;

use tracing::{debug, error, info, warn};

use super::journal::{JournalRepository, NewPendingMove, PendingMove};
use super::lock::OwnerLocks;
use super::node::{FileNode, NodeRepository, NodeUpdate};
use super::path::{is_descendant_path, validate_name, with_original_extension, PathResolver};
use crate::db::Database;
use crate::{Result, StowageError};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Nodes whose metadata was brought in line with a completed move.
    pub rolled_forward: Vec<i64>,
    /// Nodes whose move never reached storage; their metadata was kept.
    pub discarded: Vec<i64>,
    /// Nodes whose storage state matches neither side of the move.
    pub unresolved: Vec<i64>,
}

impl ReconcileReport {
    /// Whether every pending move was resolved.
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Renames and moves nodes within an owner's tree.
pub struct RenameEngine<'a> {
    db: &'a Database,
    paths: &'a PathResolver,
    locks: &'a OwnerLocks,
}

impl<'a> RenameEngine<'a> {
    /// Create a new RenameEngine.
    pub fn new(db: &'a Database, paths: &'a PathResolver, locks: &'a OwnerLocks) -> Self {
        Self { db, paths, locks }
    }

    /// Rename a node in place.
    ///
    /// A leaf keeps its original extension: renaming `draft.pdf` to
    /// `report` yields `report.pdf`.
    pub async fn rename(&self, owner_id: i64, id: i64, new_name: &str) -> Result<FileNode> {
        validate_name(new_name)?;

        let _scope = self.locks.acquire(owner_id).await;
        let node = NodeRepository::find_live(self.db.pool(), owner_id, id).await?;

        let final_name = if node.is_directory {
            new_name.to_string()
        } else {
            with_original_extension(new_name, &node.name)
        };
        validate_name(&final_name)?;
        if final_name == node.name {
            return Ok(node);
        }

        NodeRepository::ensure_name_free(
            self.db.pool(),
            owner_id,
            node.parent_id,
            &final_name,
            Some(node.id),
        )
        .await?;

        let parent = match node.parent_id {
            Some(parent_id) => Some(
                NodeRepository::find(self.db.pool(), owner_id, parent_id)
                    .await?
                    .ok_or_else(|| StowageError::NotFound(format!("node {parent_id}")))?,
            ),
            None => None,
        };
        let new_path = self
            .paths
            .new_relative_path(owner_id, parent.as_ref(), &final_name);
        let parent_id = node.parent_id;

        self.relocate(node, &final_name, parent_id, new_path).await
    }

    /// Move a node under another directory (None = the owner's root).
    pub async fn move_node(&self, owner_id: i64, id: i64, destination: Option<i64>) -> Result<FileNode> {
        let _scope = self.locks.acquire(owner_id).await;
        let node = NodeRepository::find_live(self.db.pool(), owner_id, id).await?;
        let target = NodeRepository::find_live_directory(self.db.pool(), owner_id, destination).await?;

        if let Some(ref dir) = target {
            if dir.id == node.id || is_descendant_path(&dir.relative_path, &node.relative_path) {
                return Err(StowageError::InvalidTarget(format!(
                    "cannot move '{}' into itself",
                    node.name
                )));
            }
        }
        if node.parent_id == destination {
            return Ok(node);
        }

        NodeRepository::ensure_name_free(
            self.db.pool(),
            owner_id,
            destination,
            &node.name,
            Some(node.id),
        )
        .await?;

        let new_path = self
            .paths
            .new_relative_path(owner_id, target.as_ref(), &node.name);
        let name = node.name.clone();

        self.relocate(node, &name, destination, new_path).await
    }

    async fn relocate(
        &self,
        node: FileNode,
        new_name: &str,
        new_parent_id: Option<i64>,
        new_path: String,
    ) -> Result<FileNode> {
        let entry_id = JournalRepository::record(
            self.db.pool(),
            &NewPendingMove {
                node: &node,
                new_path: &new_path,
                new_name,
                new_parent_id,
            },
        )
        .await?;

        let from = self.paths.physical_node_path(&node);
        let to = self.paths.physical_path(&new_path);
        if let Err(e) = move_physical(&from, &to, new_name).await {
            if let Err(clear_err) = JournalRepository::clear(self.db.pool(), entry_id).await {
                warn!("failed to clear move journal entry {}: {}", entry_id, clear_err);
            }
            return Err(e);
        }

        let moved = self
            .apply_move(&node, &node.relative_path, new_name, new_parent_id, &new_path, entry_id)
            .await;
        match moved {
            Ok(updated) => {
                info!(
                    "Moved node {} from {} to {}",
                    node.id, node.relative_path, updated.relative_path
                );
                Ok(updated)
            }
            Err(e) => {
                error!(
                    "node {} is at {} on storage but its metadata still says {}: {}",
                    node.id, new_path, node.relative_path, e
                );
                Err(StowageError::Integrity(format!(
                    "move of node {} is pending reconciliation",
                    node.id
                )))
            }
        }
    }

    async fn apply_move(
        &self,
        node: &FileNode,
        old_path: &str,
        new_name: &str,
        new_parent_id: Option<i64>,
        new_path: &str,
        entry_id: i64,
    ) -> Result<FileNode> {
        let mut tx = self.db.begin().await?;

        let update = NodeUpdate::new()
            .name(new_name)
            .parent_id(new_parent_id)
            .relative_path(new_path);
        let updated = NodeRepository::update(&mut *tx, node.owner_id, node.id, &update)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("node {}", node.id)))?;

        if node.is_directory {
            let rebased =
                NodeRepository::rebase_descendants(&mut *tx, node.owner_id, node.id, old_path, new_path)
                    .await?;
            debug!("rebased {} descendants of node {}", rebased, node.id);
        }

        JournalRepository::clear(&mut *tx, entry_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Resolve every unfinished move of an owner against physical storage.
    ///
    /// A move whose destination exists and whose source is gone is applied
    /// to metadata; one whose source is still in place is dropped. Anything
    /// else is left pending and reported.
    pub async fn reconcile(&self, owner_id: i64) -> Result<ReconcileReport> {
        let _scope = self.locks.acquire(owner_id).await;
        let mut report = ReconcileReport::default();

        for entry in JournalRepository::list(self.db.pool(), owner_id).await? {
            let node_id = entry.node_id;
            match self.resolve_entry(owner_id, &entry).await {
                Ok(Resolution::RolledForward) => report.rolled_forward.push(node_id),
                Ok(Resolution::Discarded) => report.discarded.push(node_id),
                Ok(Resolution::Unresolved) => report.unresolved.push(node_id),
                Err(e) => {
                    warn!("could not reconcile move of node {}: {}", node_id, e);
                    report.unresolved.push(node_id);
                }
            }
        }

        if !report.rolled_forward.is_empty() || !report.discarded.is_empty() {
            info!(
                "Reconciled owner {}: {} rolled forward, {} discarded, {} unresolved",
                owner_id,
                report.rolled_forward.len(),
                report.discarded.len(),
                report.unresolved.len()
            );
        }
        Ok(report)
    }

    async fn resolve_entry(&self, owner_id: i64, entry: &PendingMove) -> Result<Resolution> {
        let old_exists = tokio::fs::try_exists(self.paths.physical_path(&entry.old_path)).await?;
        let new_exists = tokio::fs::try_exists(self.paths.physical_path(&entry.new_path)).await?;

        let Some(node) = NodeRepository::find(self.db.pool(), owner_id, entry.node_id).await? else {
            JournalRepository::clear(self.db.pool(), entry.id).await?;
            return Ok(Resolution::Discarded);
        };

        match (old_exists, new_exists) {
            (false, true) => {
                self.apply_move(
                    &node,
                    &entry.old_path,
                    &entry.new_name,
                    entry.new_parent_id,
                    &entry.new_path,
                    entry.id,
                )
                .await?;
                Ok(Resolution::RolledForward)
            }
            (true, false) => {
                JournalRepository::clear(self.db.pool(), entry.id).await?;
                Ok(Resolution::Discarded)
            }
            _ => Ok(Resolution::Unresolved),
        }
    }
}

enum Resolution {
    RolledForward,
    Discarded,
    Unresolved,
}

async fn move_physical(from: &Path, to: &Path, name: &str) -> Result<()> {
    if tokio::fs::try_exists(to).await? {
        return Err(StowageError::BadName(format!(
            "'{name}' is already present in storage"
        )));
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}
