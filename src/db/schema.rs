//! Database schema and migrations for Stowage.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded; the schema_version table tracks which have been applied.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: accounts and the file tree
    r#"
CREATE TABLE accounts (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    name                 TEXT NOT NULL UNIQUE,
    storage_quota_bytes  INTEGER NOT NULL CHECK (storage_quota_bytes >= 0),
    used_quota_bytes     INTEGER NOT NULL DEFAULT 0 CHECK (used_quota_bytes >= 0),
    created_at           TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE file_nodes (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id          INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    parent_id         INTEGER REFERENCES file_nodes(id),  -- NULL = owner's root
    name              TEXT NOT NULL,
    is_directory      INTEGER NOT NULL DEFAULT 0,
    relative_path     TEXT NOT NULL,
    size_bytes        INTEGER NOT NULL DEFAULT 0,          -- always 0 for directories
    mime_type         TEXT,
    thumbnail_large   TEXT,
    thumbnail_medium  TEXT,
    thumbnail_small   TEXT,
    is_deleted        INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Trashed nodes keep their physical location, so they still claim the name.
CREATE UNIQUE INDEX idx_file_nodes_sibling_name
    ON file_nodes(owner_id, COALESCE(parent_id, 0), name);
CREATE INDEX idx_file_nodes_parent ON file_nodes(owner_id, parent_id);
CREATE INDEX idx_file_nodes_deleted ON file_nodes(owner_id, is_deleted);
"#,
    // v2: journal of physical moves whose metadata update is not yet applied
    r#"
CREATE TABLE pending_moves (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id       INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    node_id        INTEGER NOT NULL REFERENCES file_nodes(id) ON DELETE CASCADE,
    old_path       TEXT NOT NULL,
    new_path       TEXT NOT NULL,
    new_name       TEXT NOT NULL,
    new_parent_id  INTEGER,
    created_at     TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_pending_moves_owner ON pending_moves(owner_id);
"#,
];
