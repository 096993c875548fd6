//! Content retrieval: a leaf as an open file, a directory as a zip archive.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::lock::OwnerLocks;
use super::node::{FileNode, NodeRepository};
use super::path::PathResolver;
use super::thumbnail::ThumbnailSize;
use crate::db::Database;
use crate::{Result, StowageError};

/// Content ready to be streamed to a client.
#[derive(Debug)]
pub enum Download {
    /// A leaf, opened in place.
    File {
        node: FileNode,
        file: tokio::fs::File,
        size: u64,
    },
    /// A directory, packed into an anonymous temporary file.
    Archive {
        node: FileNode,
        file: tokio::fs::File,
        file_name: String,
        size: u64,
    },
}

impl Download {
    /// The node being downloaded.
    pub fn node(&self) -> &FileNode {
        match self {
            Download::File { node, .. } | Download::Archive { node, .. } => node,
        }
    }

    /// Name to present to the client.
    pub fn file_name(&self) -> &str {
        match self {
            Download::File { node, .. } => &node.name,
            Download::Archive { file_name, .. } => file_name,
        }
    }

    /// Content length in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Download::File { size, .. } | Download::Archive { size, .. } => *size,
        }
    }

    /// Content type to present to the client.
    pub fn mime_type(&self) -> &str {
        match self {
            Download::File { node, .. } => node
                .mime_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
            Download::Archive { .. } => "application/zip",
        }
    }

    /// The readable content, positioned at the start.
    pub fn into_file(self) -> tokio::fs::File {
        match self {
            Download::File { file, .. } | Download::Archive { file, .. } => file,
        }
    }
}

/// Opens node content for reading.
pub struct Downloader<'a> {
    db: &'a Database,
    paths: &'a PathResolver,
    locks: &'a OwnerLocks,
}

impl<'a> Downloader<'a> {
    /// Create a new Downloader.
    pub fn new(db: &'a Database, paths: &'a PathResolver, locks: &'a OwnerLocks) -> Self {
        Self { db, paths, locks }
    }

    /// Open a live node. Directories are archived with their physical
    /// subtree under a top-level folder named after the directory.
    pub async fn download(&self, owner_id: i64, id: i64) -> Result<Download> {
        // the node is resolved under the scope so its path cannot go stale
        // before it is opened or walked
        let _scope = self.locks.acquire(owner_id).await;
        let node = NodeRepository::find_live(self.db.pool(), owner_id, id).await?;
        let physical = self.paths.physical_node_path(&node);

        if !node.is_directory {
            let file = tokio::fs::File::open(&physical).await?;
            let size = file.metadata().await?.len();
            debug!("Opened {} ({} bytes) for download", node.relative_path, size);
            return Ok(Download::File { node, file, size });
        }

        let top = node.name.clone();
        let archive = tokio::task::spawn_blocking(move || build_archive(&physical, &top))
            .await
            .map_err(io::Error::other)??;
        let size = archive.metadata()?.len();

        info!(
            "Archived {} ({} bytes) for owner {}",
            node.relative_path, size, owner_id
        );
        Ok(Download::Archive {
            file_name: format!("{}.zip", node.name),
            file: tokio::fs::File::from_std(archive),
            node,
            size,
        })
    }

    /// Physical location of a recorded thumbnail of a live node.
    pub async fn thumbnail(&self, owner_id: i64, id: i64, size: ThumbnailSize) -> Result<PathBuf> {
        let node = NodeRepository::find_live(self.db.pool(), owner_id, id).await?;
        let relative = node.thumbnail(size).ok_or_else(|| {
            StowageError::NotFound(format!("{} thumbnail of node {id}", size.as_str()))
        })?;
        Ok(self.paths.physical_path(relative))
    }
}

fn build_archive(root: &Path, top: &str) -> io::Result<File> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tempfile::tempfile()?);
    zip.add_directory(format!("{top}/"), options)
        .map_err(io::Error::other)?;

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        let name = format!("{top}/{}", segments.join("/"));

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(io::Error::other)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(io::Error::other)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    let mut file = zip.finish().map_err(io::Error::other)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}
