//! Journal of physical moves awaiting their metadata update.
//!
//! An entry is written before a node is moved on disk and removed in the
//! same transaction that rewrites its metadata. A surviving entry marks
//! the node (and everything that was below its old path) as untrusted
//! until reconciliation resolves it.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use super::node::FileNode;
use crate::{Result, StowageError};

/// A recorded move intent.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PendingMove {
    pub id: i64,
    pub owner_id: i64,
    pub node_id: i64,
    pub old_path: String,
    pub new_path: String,
    pub new_name: String,
    pub new_parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Data for recording a move intent.
#[derive(Debug, Clone)]
pub struct NewPendingMove<'a> {
    pub node: &'a FileNode,
    pub new_path: &'a str,
    pub new_name: &'a str,
    pub new_parent_id: Option<i64>,
}

const MOVE_COLUMNS: &str =
    "id, owner_id, node_id, old_path, new_path, new_name, new_parent_id, created_at";

/// Repository for the move journal.
pub struct JournalRepository;

impl JournalRepository {
    /// Record an intent; returns the entry ID.
    pub async fn record<'e, E>(executor: E, entry: &NewPendingMove<'_>) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pending_moves (owner_id, node_id, old_path, new_path, new_name, new_parent_id)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.node.owner_id)
        .bind(entry.node.id)
        .bind(&entry.node.relative_path)
        .bind(entry.new_path)
        .bind(entry.new_name)
        .bind(entry.new_parent_id)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }

    /// Remove an entry.
    pub async fn clear<'e, E>(executor: E, id: i64) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM pending_moves WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// All unresolved entries of an owner, oldest first.
    pub async fn list<'e, E>(executor: E, owner_id: i64) -> Result<Vec<PendingMove>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("SELECT {MOVE_COLUMNS} FROM pending_moves WHERE owner_id = ? ORDER BY id");
        let entries = sqlx::query_as::<_, PendingMove>(&sql)
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        Ok(entries)
    }

    /// Owners that have at least one unresolved entry.
    pub async fn owners_with_entries<'e, E>(executor: E) -> Result<Vec<i64>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let owners: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT owner_id FROM pending_moves ORDER BY owner_id")
                .fetch_all(executor)
                .await?;
        Ok(owners)
    }

    /// Whether an unresolved entry involves `node`: the node itself, an
    /// ancestor that was being moved, or (for a directory) a descendant.
    pub async fn affects<'e, E>(executor: E, node: &FileNode) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let affected: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM pending_moves
                WHERE owner_id = ?
                  AND (node_id = ?
                       OR substr(?, 1, length(old_path) + 1) = old_path || '/'
                       OR substr(old_path, 1, length(?) + 1) = ? || '/')
            )",
        )
        .bind(node.owner_id)
        .bind(node.id)
        .bind(&node.relative_path)
        .bind(&node.relative_path)
        .bind(&node.relative_path)
        .fetch_one(executor)
        .await?;
        Ok(affected)
    }

    /// Fail with [`StowageError::Integrity`] if `node` is affected by an
    /// unresolved entry.
    pub async fn ensure_consistent<'e, E>(executor: E, node: &FileNode) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if Self::affects(executor, node).await? {
            return Err(StowageError::Integrity(format!(
                "node {} has an unfinished move; reconcile before retrying",
                node.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AccountRepository, Database, NewAccount};
    use crate::file::node::{NewNode, NodeRepository};

    async fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let account = AccountRepository::new(db.pool())
            .create(&NewAccount::new("owner", 10_000))
            .await
            .unwrap();
        (db, account.id)
    }

    async fn node(db: &Database, owner: i64, parent: Option<&FileNode>, name: &str, dir: bool) -> FileNode {
        let path = match parent {
            Some(p) => format!("{}/{name}", p.relative_path),
            None => format!("{owner}/files/{name}"),
        };
        let new = if dir {
            NewNode::directory(owner, parent.map(|p| p.id), name, path)
        } else {
            NewNode::file(owner, parent.map(|p| p.id), name, path, 1)
        };
        NodeRepository::create(db.pool(), &new).await.unwrap()
    }

    #[tokio::test]
    async fn test_record_list_clear() {
        let (db, owner) = setup().await;
        let a = node(&db, owner, None, "A", true).await;

        let id = JournalRepository::record(
            db.pool(),
            &NewPendingMove {
                node: &a,
                new_path: "x/C",
                new_name: "C",
                new_parent_id: None,
            },
        )
        .await
        .unwrap();

        let entries = JournalRepository::list(db.pool(), owner).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].old_path, a.relative_path);
        assert_eq!(entries[0].new_name, "C");
        assert_eq!(
            JournalRepository::owners_with_entries(db.pool()).await.unwrap(),
            vec![owner]
        );

        JournalRepository::clear(db.pool(), id).await.unwrap();
        assert!(JournalRepository::list(db.pool(), owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_affects_node_descendants_and_ancestors() {
        let (db, owner) = setup().await;
        let a = node(&db, owner, None, "A", true).await;
        let b = node(&db, owner, Some(&a), "B", true).await;
        let leaf = node(&db, owner, Some(&b), "leaf.txt", false).await;
        let lookalike = node(&db, owner, None, "AB", true).await;

        JournalRepository::record(
            db.pool(),
            &NewPendingMove {
                node: &b,
                new_path: "elsewhere",
                new_name: "B2",
                new_parent_id: Some(a.id),
            },
        )
        .await
        .unwrap();

        assert!(JournalRepository::affects(db.pool(), &b).await.unwrap());
        assert!(JournalRepository::affects(db.pool(), &leaf).await.unwrap());
        assert!(JournalRepository::affects(db.pool(), &a).await.unwrap());
        assert!(!JournalRepository::affects(db.pool(), &lookalike).await.unwrap());

        let result = JournalRepository::ensure_consistent(db.pool(), &leaf).await;
        assert!(matches!(result, Err(StowageError::Integrity(_))));
        assert!(JournalRepository::ensure_consistent(db.pool(), &lookalike).await.is_ok());
    }
}
