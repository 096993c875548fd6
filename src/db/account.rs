//! Account repository for Stowage.
//!
//! Accounts own a file tree and carry the storage quota counters.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::DbPool;
use crate::{Result, StowageError};

/// A storage account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    /// Owner ID; every node carries it.
    pub id: i64,
    /// Unique account name.
    pub name: String,
    /// Maximum bytes of leaf content.
    pub storage_quota_bytes: i64,
    /// Bytes currently charged, trashed leaves included.
    pub used_quota_bytes: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Bytes the account may still ingest.
    pub fn remaining_bytes(&self) -> u64 {
        (self.storage_quota_bytes - self.used_quota_bytes).max(0) as u64
    }
}

/// Data for creating a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Unique account name.
    pub name: String,
    /// Maximum bytes of leaf content.
    pub storage_quota_bytes: i64,
}

impl NewAccount {
    /// Create a new NewAccount.
    pub fn new(name: impl Into<String>, storage_quota_bytes: i64) -> Self {
        Self {
            name: name.into(),
            storage_quota_bytes,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, storage_quota_bytes, used_quota_bytes, created_at";

/// Repository for account operations.
pub struct AccountRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> AccountRepository<'a> {
    /// Create a new AccountRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new account.
    pub async fn create(&self, account: &NewAccount) -> Result<Account> {
        if account.storage_quota_bytes < 0 {
            return Err(StowageError::Validation(
                "storage quota must not be negative".into(),
            ));
        }

        let sql = format!(
            "INSERT INTO accounts (name, storage_quota_bytes) VALUES (?, ?) RETURNING {ACCOUNT_COLUMNS}"
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(&account.name)
            .bind(account.storage_quota_bytes)
            .fetch_one(self.pool)
            .await
            .map_err(|e| {
                if crate::error::is_unique_violation(&e) {
                    StowageError::Validation(format!("account '{}' already exists", account.name))
                } else {
                    e.into()
                }
            })
    }

    /// Get an account by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(account)
    }

    /// Get an account by ID, failing with NotFound if it does not exist.
    pub async fn require(&self, id: i64) -> Result<Account> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("account {id}")))
    }

    /// List all accounts.
    pub async fn list_all(&self) -> Result<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id");
        let accounts = sqlx::query_as::<_, Account>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(accounts)
    }

    /// Change an account's quota.
    ///
    /// Lowering the quota below current usage is allowed; it only blocks
    /// further ingestion.
    pub async fn set_quota(&self, id: i64, storage_quota_bytes: i64) -> Result<Option<Account>> {
        if storage_quota_bytes < 0 {
            return Err(StowageError::Validation(
                "storage quota must not be negative".into(),
            ));
        }

        let sql = format!(
            "UPDATE accounts SET storage_quota_bytes = ? WHERE id = ? RETURNING {ACCOUNT_COLUMNS}"
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(storage_quota_bytes)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(account)
    }

    /// Charge `bytes` to the account if it stays within quota.
    ///
    /// The check and the increment are one statement. Returns false if the
    /// charge would exceed the quota or the account does not exist.
    pub async fn try_reserve(conn: &mut SqliteConnection, id: i64, bytes: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET used_quota_bytes = used_quota_bytes + ?
             WHERE id = ? AND used_quota_bytes + ? <= storage_quota_bytes",
        )
        .bind(bytes)
        .bind(id)
        .bind(bytes)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Return `bytes` to the account, never going below zero.
    pub async fn release(conn: &mut SqliteConnection, id: i64, bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET used_quota_bytes = MAX(used_quota_bytes - ?, 0) WHERE id = ?",
        )
        .bind(bytes)
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }
}
