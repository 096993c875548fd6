//! File node types and repository.
//!
//! Every query is scoped by owner: a node owned by another account is
//! indistinguishable from a missing one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, QueryBuilder, Sqlite};

use super::journal::JournalRepository;
use super::thumbnail::ThumbnailSize;
use crate::db::DbPool;
use crate::error::is_unique_violation;
use crate::{Result, StowageError};

/// A file or directory in an owner's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FileNode {
    /// Unique node ID.
    pub id: i64,
    /// Owning account.
    pub owner_id: i64,
    /// Parent directory (None for the owner's root).
    pub parent_id: Option<i64>,
    /// Node name, unique among its siblings.
    pub name: String,
    /// Whether this node is a directory.
    pub is_directory: bool,
    /// Path from the storage root, mirroring the ancestor chain.
    pub relative_path: String,
    /// Content size in bytes (0 for directories).
    pub size_bytes: i64,
    /// Content type of a leaf.
    pub mime_type: Option<String>,
    /// Large derived thumbnail, relative to the storage root.
    pub thumbnail_large: Option<String>,
    /// Medium derived thumbnail.
    pub thumbnail_medium: Option<String>,
    /// Small derived thumbnail.
    pub thumbnail_small: Option<String>,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
}

impl FileNode {
    /// Recorded derived asset for the given size.
    pub fn thumbnail(&self, size: ThumbnailSize) -> Option<&str> {
        match size {
            ThumbnailSize::Large => self.thumbnail_large.as_deref(),
            ThumbnailSize::Medium => self.thumbnail_medium.as_deref(),
            ThumbnailSize::Small => self.thumbnail_small.as_deref(),
        }
    }

    /// All recorded derived assets.
    pub fn thumbnail_refs(&self) -> impl Iterator<Item = &str> {
        [
            self.thumbnail_large.as_deref(),
            self.thumbnail_medium.as_deref(),
            self.thumbnail_small.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Data for creating a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub is_directory: bool,
    pub relative_path: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
}

impl NewNode {
    /// A directory node.
    pub fn directory(
        owner_id: i64,
        parent_id: Option<i64>,
        name: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            parent_id,
            name: name.into(),
            is_directory: true,
            relative_path: relative_path.into(),
            size_bytes: 0,
            mime_type: None,
        }
    }

    /// A leaf node.
    pub fn file(
        owner_id: i64,
        parent_id: Option<i64>,
        name: impl Into<String>,
        relative_path: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        Self {
            owner_id,
            parent_id,
            name: name.into(),
            is_directory: false,
            relative_path: relative_path.into(),
            size_bytes,
            mime_type: None,
        }
    }

    /// Set the mime type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Builder for updating a node in place.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub parent_id: Option<Option<i64>>,
    pub relative_path: Option<String>,
    pub is_deleted: Option<bool>,
    pub thumbnails: Option<[Option<String>; 3]>,
}

impl NodeUpdate {
    /// Create a new NodeUpdate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the parent directory.
    pub fn parent_id(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the relative path.
    pub fn relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    /// Set the soft-delete flag.
    pub fn is_deleted(mut self, is_deleted: bool) -> Self {
        self.is_deleted = Some(is_deleted);
        self
    }

    /// Set the derived asset references (large, medium, small).
    pub fn thumbnails(mut self, thumbnails: [Option<String>; 3]) -> Self {
        self.thumbnails = Some(thumbnails);
        self
    }

    /// Check if any fields are set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.parent_id.is_none()
            && self.relative_path.is_none()
            && self.is_deleted.is_none()
            && self.thumbnails.is_none()
    }
}

const NODE_COLUMNS: &str = "id, owner_id, parent_id, name, is_directory, relative_path, size_bytes, \
     mime_type, thumbnail_large, thumbnail_medium, thumbnail_small, is_deleted, created_at";

/// Repository for node metadata.
///
/// Functions take any sqlx executor so they run equally against the pool
/// or inside a transaction.
pub struct NodeRepository;

impl NodeRepository {
    /// Find a node by ID within the owner's tree, trashed or not.
    pub async fn find<'e, E>(executor: E, owner_id: i64, id: i64) -> Result<Option<FileNode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("SELECT {NODE_COLUMNS} FROM file_nodes WHERE id = ? AND owner_id = ?");
        let node = sqlx::query_as::<_, FileNode>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(executor)
            .await?;
        Ok(node)
    }

    /// Find a node that is not trashed and not affected by an unfinished
    /// move.
    pub async fn find_live(pool: &DbPool, owner_id: i64, id: i64) -> Result<FileNode> {
        match Self::find(pool, owner_id, id).await? {
            Some(node) if !node.is_deleted => {
                JournalRepository::ensure_consistent(pool, &node).await?;
                Ok(node)
            }
            _ => Err(StowageError::NotFound(format!("node {id}"))),
        }
    }

    /// Resolve a target directory; None stands for the owner's root.
    pub async fn find_live_directory(
        pool: &DbPool,
        owner_id: i64,
        dir_id: Option<i64>,
    ) -> Result<Option<FileNode>> {
        let Some(id) = dir_id else {
            return Ok(None);
        };
        let node = Self::find_live(pool, owner_id, id).await?;
        if !node.is_directory {
            return Err(StowageError::InvalidTarget(format!(
                "'{}' is not a directory",
                node.name
            )));
        }
        Ok(Some(node))
    }

    /// List the non-deleted children of a directory (None = root).
    ///
    /// Directories come first, then names in order.
    pub async fn list_children<'e, E>(
        executor: E,
        owner_id: i64,
        parent_id: Option<i64>,
    ) -> Result<Vec<FileNode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM file_nodes
             WHERE owner_id = ? AND COALESCE(parent_id, 0) = ? AND is_deleted = 0
             ORDER BY is_directory DESC, name"
        );
        let nodes = sqlx::query_as::<_, FileNode>(&sql)
            .bind(owner_id)
            .bind(parent_id.unwrap_or(0))
            .fetch_all(executor)
            .await?;
        Ok(nodes)
    }

    /// List the owner's trashed nodes.
    pub async fn list_trash<'e, E>(executor: E, owner_id: i64) -> Result<Vec<FileNode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM file_nodes
             WHERE owner_id = ? AND is_deleted = 1
             ORDER BY relative_path"
        );
        let nodes = sqlx::query_as::<_, FileNode>(&sql)
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        Ok(nodes)
    }

    /// Whether a sibling named `name` exists under `parent_id`.
    ///
    /// Trashed siblings count: they still occupy the physical location.
    pub async fn name_taken<'e, E>(
        executor: E,
        owner_id: i64,
        parent_id: Option<i64>,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM file_nodes
                WHERE owner_id = ? AND COALESCE(parent_id, 0) = ? AND name = ?
                  AND (? IS NULL OR id != ?)
            )",
        )
        .bind(owner_id)
        .bind(parent_id.unwrap_or(0))
        .bind(name)
        .bind(exclude_id)
        .bind(exclude_id)
        .fetch_one(executor)
        .await?;
        Ok(taken)
    }

    /// Fail with [`StowageError::BadName`] if `name` is taken under `parent_id`.
    pub async fn ensure_name_free<'e, E>(
        executor: E,
        owner_id: i64,
        parent_id: Option<i64>,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if Self::name_taken(executor, owner_id, parent_id, name, exclude_id).await? {
            return Err(StowageError::BadName(format!("'{name}' already exists")));
        }
        Ok(())
    }

    /// Create a node.
    ///
    /// A sibling-name collision caught by the unique index is reported as
    /// [`StowageError::BadName`].
    pub async fn create<'e, E>(executor: E, node: &NewNode) -> Result<FileNode>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "INSERT INTO file_nodes
                (owner_id, parent_id, name, is_directory, relative_path, size_bytes, mime_type)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {NODE_COLUMNS}"
        );
        sqlx::query_as::<_, FileNode>(&sql)
            .bind(node.owner_id)
            .bind(node.parent_id)
            .bind(&node.name)
            .bind(node.is_directory)
            .bind(&node.relative_path)
            .bind(node.size_bytes)
            .bind(&node.mime_type)
            .fetch_one(executor)
            .await
            .map_err(|e| name_conflict(e, &node.name))
    }

    /// Update a node in place.
    ///
    /// Returns the updated node, or None if it does not exist for this owner.
    pub async fn update<'e, E>(
        executor: E,
        owner_id: i64,
        id: i64,
        update: &NodeUpdate,
    ) -> Result<Option<FileNode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if update.is_empty() {
            return Self::find(executor, owner_id, id).await;
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE file_nodes SET ");
        let mut separated = query.separated(", ");

        if let Some(ref name) = update.name {
            separated.push("name = ");
            separated.push_bind_unseparated(name.clone());
        }
        if let Some(parent_id) = update.parent_id {
            separated.push("parent_id = ");
            separated.push_bind_unseparated(parent_id);
        }
        if let Some(ref relative_path) = update.relative_path {
            separated.push("relative_path = ");
            separated.push_bind_unseparated(relative_path.clone());
        }
        if let Some(is_deleted) = update.is_deleted {
            separated.push("is_deleted = ");
            separated.push_bind_unseparated(is_deleted);
        }
        if let Some([ref large, ref medium, ref small]) = update.thumbnails {
            separated.push("thumbnail_large = ");
            separated.push_bind_unseparated(large.clone());
            separated.push("thumbnail_medium = ");
            separated.push_bind_unseparated(medium.clone());
            separated.push("thumbnail_small = ");
            separated.push_bind_unseparated(small.clone());
        }

        query.push(" WHERE id = ");
        query.push_bind(id);
        query.push(" AND owner_id = ");
        query.push_bind(owner_id);
        query.push(" RETURNING ");
        query.push(NODE_COLUMNS);

        let name = update.name.clone().unwrap_or_default();
        query
            .build_query_as::<FileNode>()
            .fetch_optional(executor)
            .await
            .map_err(|e| name_conflict(e, &name))
    }

    /// Delete a set of nodes in one statement. Returns the number removed.
    pub async fn delete_nodes<'e, E>(executor: E, owner_id: i64, ids: &[i64]) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM file_nodes WHERE owner_id = ");
        query.push_bind(owner_id);
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(executor).await?;
        Ok(result.rows_affected())
    }

    /// A node and all of its descendants, walked over metadata.
    ///
    /// Trashed descendants are included.
    pub async fn subtree<'e, E>(executor: E, owner_id: i64, root_id: i64) -> Result<Vec<FileNode>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id FROM file_nodes WHERE id = ? AND owner_id = ?
                UNION ALL
                SELECT f.id FROM file_nodes f JOIN subtree s ON f.parent_id = s.id
             )
             SELECT {NODE_COLUMNS} FROM file_nodes
             WHERE id IN (SELECT id FROM subtree)
             ORDER BY relative_path"
        );
        let nodes = sqlx::query_as::<_, FileNode>(&sql)
            .bind(root_id)
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        Ok(nodes)
    }

    /// Replace `old_prefix` with `new_prefix` in the relative path of every
    /// descendant of `dir_id`, in a single statement.
    pub async fn rebase_descendants<'e, E>(
        executor: E,
        owner_id: i64,
        dir_id: i64,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        // substr() counts characters, not bytes
        let tail_start = old_prefix.chars().count() as i64 + 1;

        let result = sqlx::query(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id FROM file_nodes WHERE parent_id = ? AND owner_id = ?
                UNION ALL
                SELECT f.id FROM file_nodes f JOIN subtree s ON f.parent_id = s.id
             )
             UPDATE file_nodes
             SET relative_path = ? || substr(relative_path, ?)
             WHERE id IN (SELECT id FROM subtree)",
        )
        .bind(dir_id)
        .bind(owner_id)
        .bind(new_prefix)
        .bind(tail_start)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

fn name_conflict(e: sqlx::Error, name: &str) -> StowageError {
    if is_unique_violation(&e) {
        StowageError::BadName(format!("'{name}' already exists"))
    } else {
        e.into()
    }
}
