//! Test helpers for storage engine integration tests.
//!
//! Provides TestEnv (a service over a temporary storage root and an
//! in-memory database) and body-stream helpers.

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use futures::Stream;
use tempfile::TempDir;

use stowage::file::NoThumbnails;
use stowage::{Database, FileNode, FileService, PathResolver, ThumbnailPipeline};

/// Chunk size used when splitting test bodies.
pub const CHUNK: usize = 16;

/// A service with one account over a throwaway storage root.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub service: FileService,
    pub owner: i64,
}

impl TestEnv {
    /// Environment with the given quota and no thumbnail pipeline.
    pub async fn new(quota: i64) -> Self {
        Self::with_pipeline(quota, Arc::new(NoThumbnails)).await
    }

    /// Environment with the given quota and thumbnail pipeline.
    pub async fn with_pipeline(quota: i64, pipeline: Arc<dyn ThumbnailPipeline>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let service =
            FileService::new(db, PathResolver::new(temp_dir.path())).with_thumbnails(pipeline);
        let owner = service.create_account("owner", Some(quota)).await.unwrap().id;
        Self {
            temp_dir,
            service,
            owner,
        }
    }

    /// Relative path of `path` below the owner's tree root.
    pub fn tree_path(&self, path: &str) -> String {
        format!("{}/files/{path}", self.owner)
    }

    /// Physical location of a node.
    pub fn physical(&self, node: &FileNode) -> PathBuf {
        self.service.paths().physical_node_path(node)
    }

    /// Bytes currently charged to the owner.
    pub async fn used(&self) -> i64 {
        self.service.account(self.owner).await.unwrap().used_quota_bytes
    }

    /// Entries left in the owner's staging folder.
    pub fn staging_entries(&self) -> usize {
        let paths = self.service.paths();
        std::fs::read_dir(paths.physical_path(&paths.staging_folder(self.owner)))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

/// A body stream delivering `content` in fixed-size chunks.
pub fn body(content: &[u8]) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    let chunks: Vec<io::Result<Vec<u8>>> = content.chunks(CHUNK).map(|c| Ok(c.to_vec())).collect();
    futures::stream::iter(chunks)
}

/// A body of `len` filler bytes.
pub fn filler(len: usize) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
    body(&vec![b'x'; len])
}
