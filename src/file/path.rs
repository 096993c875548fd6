//! Mapping between the logical tree and physical storage paths.
//!
//! Relative paths are `/`-separated strings stored in metadata; a physical
//! path is always the storage root joined with a relative path. Nothing
//! else in the crate builds paths by hand.

use std::path::{Path, PathBuf};

use super::node::FileNode;
use crate::config::StorageConfig;
use crate::{Result, StowageError};

/// Maximum length of a node name, in bytes.
pub const MAX_NAME_LENGTH: usize = 255;

/// Stateless path derivation for one storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    files_dir: String,
    thumbnails_dir: String,
    staging_dir: String,
}

impl PathResolver {
    /// Create a resolver with the default per-owner layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config_with_root(root, &StorageConfig::default())
    }

    /// Create a resolver from storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::from_config_with_root(&config.root, config)
    }

    fn from_config_with_root(root: impl Into<PathBuf>, config: &StorageConfig) -> Self {
        Self {
            root: root.into(),
            files_dir: config.files_dir.clone(),
            thumbnails_dir: config.thumbnails_dir.clone(),
            staging_dir: config.staging_dir.clone(),
        }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path of the owner's tree root.
    pub fn root_files_folder(&self, owner_id: i64) -> String {
        format!("{owner_id}/{}", self.files_dir)
    }

    /// Relative path of the owner's derived-asset folder.
    pub fn thumbnails_folder(&self, owner_id: i64) -> String {
        format!("{owner_id}/{}", self.thumbnails_dir)
    }

    /// Relative path of the owner's in-flight upload folder.
    pub fn staging_folder(&self, owner_id: i64) -> String {
        format!("{owner_id}/{}", self.staging_dir)
    }

    /// The stored path of a node.
    pub fn resolve_path(node: &FileNode) -> &str {
        &node.relative_path
    }

    /// Relative path for a new child `name` of `parent` (None = root).
    pub fn new_relative_path(&self, owner_id: i64, parent: Option<&FileNode>, name: &str) -> String {
        match parent {
            Some(parent) => format!("{}/{name}", parent.relative_path),
            None => format!("{}/{name}", self.root_files_folder(owner_id)),
        }
    }

    /// Physical location of a relative path.
    pub fn physical_path(&self, relative_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(relative_path.split('/').filter(|s| !s.is_empty()));
        path
    }

    /// Physical location of a node.
    pub fn physical_node_path(&self, node: &FileNode) -> PathBuf {
        self.physical_path(Self::resolve_path(node))
    }

    /// Create the owner's tree, thumbnail and staging folders if missing.
    pub async fn ensure_owner_layout(&self, owner_id: i64) -> Result<()> {
        for folder in [
            self.root_files_folder(owner_id),
            self.thumbnails_folder(owner_id),
            self.staging_folder(owner_id),
        ] {
            tokio::fs::create_dir_all(self.physical_path(&folder)).await?;
        }
        Ok(())
    }
}

/// Whether `path` lies strictly below `ancestor`.
pub fn is_descendant_path(path: &str, ancestor: &str) -> bool {
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Append the extension of `original` to `new_name` unless it already
/// carries it.
pub fn with_original_extension(new_name: &str, original: &str) -> String {
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let suffix = format!(".{ext}");
            if new_name.ends_with(&suffix) {
                new_name.to_string()
            } else {
                format!("{new_name}{suffix}")
            }
        }
        None => new_name.to_string(),
    }
}

/// Check that `name` can be used as a single path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StowageError::BadName("name must not be empty".into()));
    }
    if name == "." || name == ".." {
        return Err(StowageError::BadName(format!("'{name}' is reserved")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(StowageError::BadName(format!(
            "name exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(StowageError::BadName(format!(
            "'{}' contains a path separator or NUL",
            name.escape_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_node(path: &str) -> FileNode {
        FileNode {
            id: 7,
            owner_id: 1,
            parent_id: None,
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            is_directory: true,
            relative_path: path.to_string(),
            size_bytes: 0,
            mime_type: None,
            thumbnail_large: None,
            thumbnail_medium: None,
            thumbnail_small: None,
            is_deleted: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_new_relative_path_root() {
        let paths = PathResolver::new("/srv/data");
        assert_eq!(paths.new_relative_path(3, None, "A"), "3/files/A");
    }

    #[test]
    fn test_new_relative_path_child() {
        let paths = PathResolver::new("/srv/data");
        let parent = dir_node("3/files/A");
        assert_eq!(paths.new_relative_path(3, Some(&parent), "B"), "3/files/A/B");
    }

    #[test]
    fn test_physical_path() {
        let paths = PathResolver::new("/srv/data");
        assert_eq!(
            paths.physical_path("3/files/A/b.txt"),
            PathBuf::from("/srv/data/3/files/A/b.txt")
        );
        assert_eq!(
            paths.physical_node_path(&dir_node("3/files/A")),
            PathBuf::from("/srv/data/3/files/A")
        );
    }

    #[test]
    fn test_layout_folders_follow_config() {
        let config = StorageConfig {
            root: "/r".into(),
            files_dir: "tree".into(),
            thumbnails_dir: "thumbs".into(),
            ..StorageConfig::default()
        };
        let paths = PathResolver::from_config(&config);
        assert_eq!(paths.root(), Path::new("/r"));
        assert_eq!(paths.root_files_folder(9), "9/tree");
        assert_eq!(paths.thumbnails_folder(9), "9/thumbs");
        assert_eq!(paths.staging_folder(9), "9/.staging");
    }

    #[test]
    fn test_is_descendant_path() {
        assert!(is_descendant_path("1/files/A/B", "1/files/A"));
        assert!(!is_descendant_path("1/files/A", "1/files/A"));
        assert!(!is_descendant_path("1/files/AB", "1/files/A"));
    }

    #[test]
    fn test_with_original_extension() {
        assert_eq!(with_original_extension("report", "draft.pdf"), "report.pdf");
        assert_eq!(with_original_extension("report.pdf", "draft.pdf"), "report.pdf");
        assert_eq!(with_original_extension("archive", "data.tar.gz"), "archive.gz");
        assert_eq!(with_original_extension("notes", "README"), "notes");
        assert_eq!(with_original_extension("env", ".hidden"), "env");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("photo.jpg").is_ok());
        assert!(validate_name("日本語ファイル.txt").is_ok());
        assert!(validate_name(".hidden").is_ok());

        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(
                matches!(validate_name(bad), Err(StowageError::BadName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_ensure_owner_layout() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let paths = PathResolver::new(temp_dir.path());

        paths.ensure_owner_layout(5).await.unwrap();
        paths.ensure_owner_layout(5).await.unwrap();

        assert!(temp_dir.path().join("5/files").is_dir());
        assert!(temp_dir.path().join("5/thumbnails").is_dir());
        assert!(temp_dir.path().join("5/.staging").is_dir());
    }
}
