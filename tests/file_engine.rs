//! End-to-end tests for the storage engine through FileService.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{body, filler, TestEnv};
use stowage::file::CopyThumbnails;
use stowage::{Download, StowageError, ThumbnailPipeline, ThumbnailSize, UploadRequest};

/// Counts invocations and never produces anything.
#[derive(Default)]
struct FailingPipeline {
    calls: AtomicUsize,
}

impl ThumbnailPipeline for FailingPipeline {
    fn generate(&self, _owner_id: i64, _image_path: &Path) -> Option<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

struct CrashingPipeline;

impl ThumbnailPipeline for CrashingPipeline {
    fn generate(&self, _owner_id: i64, _image_path: &Path) -> Option<Vec<String>> {
        panic!("renderer crashed");
    }
}

#[tokio::test]
async fn test_upload_over_quota_scenario() {
    let env = TestEnv::new(1000).await;
    env.service
        .upload(env.owner, &UploadRequest::new(None, "base.bin"), filler(900))
        .await
        .unwrap();
    assert_eq!(env.used().await, 900);

    let result = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "big.bin"), filler(150))
        .await;

    assert!(matches!(result, Err(StowageError::QuotaExceeded { .. })));
    assert_eq!(env.used().await, 900);
    assert!(!env
        .service
        .paths()
        .physical_path(&env.tree_path("big.bin"))
        .exists());
    assert_eq!(env.staging_entries(), 0);
    let names: Vec<String> = env
        .service
        .list(env.owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, vec!["base.bin"]);
}

#[tokio::test]
async fn test_upload_accounts_final_size() {
    let env = TestEnv::new(10_000).await;
    let docs = env.service.mkdir(env.owner, None, "docs").await.unwrap();

    let before = env.used().await;
    let node = env
        .service
        .upload(env.owner, &UploadRequest::new(Some(docs.id), "notes.txt"), body(b"some notes"))
        .await
        .unwrap();

    assert_eq!(node.size_bytes, 10);
    assert_eq!(node.parent_id, Some(docs.id));
    assert_eq!(node.relative_path, env.tree_path("docs/notes.txt"));
    assert_eq!(env.used().await, before + 10);
    assert_eq!(std::fs::read(env.physical(&node)).unwrap(), b"some notes");
}

#[tokio::test]
async fn test_upload_exactly_to_quota() {
    let env = TestEnv::new(100).await;
    env.service
        .upload(env.owner, &UploadRequest::new(None, "full.bin"), filler(100))
        .await
        .unwrap();
    assert_eq!(env.used().await, 100);

    let result = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "more.bin"), filler(1))
        .await;
    assert!(matches!(result, Err(StowageError::QuotaExceeded { .. })));
}

#[tokio::test]
async fn test_directory_rename_scenario() {
    let env = TestEnv::new(10_000).await;
    let a = env.service.mkdir(env.owner, None, "A").await.unwrap();
    let b = env.service.mkdir(env.owner, Some(a.id), "B").await.unwrap();
    let leaf = env
        .service
        .upload(env.owner, &UploadRequest::new(Some(b.id), "leaf.txt"), body(b"leaf"))
        .await
        .unwrap();

    let c = env.service.rename(env.owner, a.id, "C").await.unwrap();
    assert_eq!(c.name, "C");
    assert_eq!(c.relative_path, env.tree_path("C"));

    let b_after = env.service.node(env.owner, b.id).await.unwrap();
    assert_eq!(b_after.relative_path, env.tree_path("C/B"));
    let leaf_after = env.service.node(env.owner, leaf.id).await.unwrap();
    assert_eq!(leaf_after.relative_path, env.tree_path("C/B/leaf.txt"));
    assert_eq!(std::fs::read(env.physical(&leaf_after)).unwrap(), b"leaf");
    assert!(!env.physical(&a).exists());

    // renaming back restores every original path
    env.service.rename(env.owner, a.id, "A").await.unwrap();
    assert_eq!(env.service.node(env.owner, a.id).await.unwrap(), a);
    assert_eq!(env.service.node(env.owner, b.id).await.unwrap(), b);
    assert_eq!(
        env.service.node(env.owner, leaf.id).await.unwrap().relative_path,
        leaf.relative_path
    );
}

#[tokio::test]
async fn test_leaf_rename_keeps_extension_and_size() {
    let env = TestEnv::new(10_000).await;
    let node = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "draft.pdf"), filler(40))
        .await
        .unwrap();

    let renamed = env.service.rename(env.owner, node.id, "final").await.unwrap();
    assert_eq!(renamed.name, "final.pdf");
    assert_eq!(renamed.size_bytes, 40);
    assert_eq!(env.used().await, 40);
    assert!(env.physical(&renamed).is_file());
}

#[tokio::test]
async fn test_image_upload_with_failing_pipeline() {
    let pipeline = Arc::new(FailingPipeline::default());
    let env = TestEnv::with_pipeline(10_000, pipeline.clone()).await;

    let node = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "photo.jpg"), body(b"not really a jpeg"))
        .await
        .unwrap();

    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.size_bytes, 17);
    assert_eq!(node.mime_type.as_deref(), Some("image/jpeg"));
    assert!(node.thumbnail_large.is_none());
    assert!(node.thumbnail_medium.is_none());
    assert!(node.thumbnail_small.is_none());
}

#[tokio::test]
async fn test_image_upload_with_crashing_pipeline() {
    let env = TestEnv::with_pipeline(10_000, Arc::new(CrashingPipeline)).await;

    let node = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "photo.png"), body(b"png"))
        .await
        .unwrap();
    assert_eq!(node.thumbnail_refs().count(), 0);
    assert!(env.physical(&node).is_file());
}

#[tokio::test]
async fn test_non_image_skips_pipeline() {
    let pipeline = Arc::new(FailingPipeline::default());
    let env = TestEnv::with_pipeline(10_000, pipeline.clone()).await;

    env.service
        .upload(env.owner, &UploadRequest::new(None, "notes.txt"), body(b"text"))
        .await
        .unwrap();
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_thumbnails_recorded_and_purged() {
    let env = TestEnv::new(10_000).await;
    let pipeline = Arc::new(CopyThumbnails::new(env.service.paths().clone()));
    let service = env.service.clone().with_thumbnails(pipeline);

    let node = service
        .upload(env.owner, &UploadRequest::new(None, "photo.jpg"), body(b"jpeg bytes"))
        .await
        .unwrap();
    assert_eq!(node.thumbnail_refs().count(), 3);

    let small = service
        .thumbnail(env.owner, node.id, ThumbnailSize::Small)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&small).unwrap(), b"jpeg bytes");

    service.trash(env.owner, node.id).await.unwrap();
    service.purge(env.owner, node.id).await.unwrap();
    assert!(!small.exists());
    assert_eq!(env.used().await, 0);
}

#[tokio::test]
async fn test_trash_and_purge_directory_scenario() {
    let env = TestEnv::new(10_000).await;
    let dir = env.service.mkdir(env.owner, None, "old").await.unwrap();
    let file = env
        .service
        .upload(env.owner, &UploadRequest::new(Some(dir.id), "a.txt"), filler(25))
        .await
        .unwrap();

    let trashed = env.service.trash(env.owner, dir.id).await.unwrap();
    assert!(trashed.is_deleted);
    assert!(env.service.list(env.owner, None).await.unwrap().is_empty());
    assert_eq!(env.service.list_trash(env.owner).await.unwrap().len(), 1);
    // trashed content still occupies quota
    assert_eq!(env.used().await, 25);

    let outcome = env.service.purge(env.owner, dir.id).await.unwrap();
    assert_eq!(outcome.removed, 2);
    assert_eq!(outcome.freed_bytes, 25);

    assert!(matches!(
        env.service.node(env.owner, dir.id).await,
        Err(StowageError::NotFound(_))
    ));
    assert!(matches!(
        env.service.node(env.owner, file.id).await,
        Err(StowageError::NotFound(_))
    ));
    assert!(!env.physical(&dir).exists());
    assert!(env.service.list_trash(env.owner).await.unwrap().is_empty());
    assert_eq!(env.used().await, 0);
}

#[tokio::test]
async fn test_restore_and_purge_idempotence() {
    let env = TestEnv::new(10_000).await;
    let node = env
        .service
        .upload(env.owner, &UploadRequest::new(None, "a.txt"), body(b"abc"))
        .await
        .unwrap();

    let result = env.service.restore(env.owner, node.id).await;
    assert!(matches!(result, Err(StowageError::NotFound(_))));
    assert_eq!(env.service.node(env.owner, node.id).await.unwrap(), node);

    env.service.trash(env.owner, node.id).await.unwrap();
    env.service.purge(env.owner, node.id).await.unwrap();
    let again = env.service.purge(env.owner, node.id).await;
    assert!(matches!(again, Err(StowageError::NotFound(_))));
}

#[tokio::test]
async fn test_mkdir_sibling_names_unique() {
    let env = TestEnv::new(10_000).await;
    let docs = env.service.mkdir(env.owner, None, "docs").await.unwrap();
    env.service.mkdir(env.owner, Some(docs.id), "docs").await.unwrap();

    let result = env.service.mkdir(env.owner, None, "docs").await;
    assert!(matches!(result, Err(StowageError::BadName(_))));

    // a trashed sibling still holds its name until purged
    env.service.trash(env.owner, docs.id).await.unwrap();
    let result = env.service.mkdir(env.owner, None, "docs").await;
    assert!(matches!(result, Err(StowageError::BadName(_))));

    env.service.purge(env.owner, docs.id).await.unwrap();
    env.service.mkdir(env.owner, None, "docs").await.unwrap();

    let names: Vec<String> = env
        .service
        .list(env.owner, None)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, vec!["docs"]);
}

#[tokio::test]
async fn test_other_owner_sees_not_found() {
    let env = TestEnv::new(10_000).await;
    let intruder = env.service.create_account("intruder", Some(100)).await.unwrap().id;
    let dir = env.service.mkdir(env.owner, None, "private").await.unwrap();

    assert!(matches!(
        env.service.list(intruder, Some(dir.id)).await,
        Err(StowageError::NotFound(_))
    ));
    assert!(matches!(
        env.service.rename(intruder, dir.id, "mine").await,
        Err(StowageError::NotFound(_))
    ));
    assert!(matches!(
        env.service.trash(intruder, dir.id).await,
        Err(StowageError::NotFound(_))
    ));
    assert!(matches!(
        env.service.download(intruder, dir.id).await,
        Err(StowageError::NotFound(_))
    ));
    assert!(matches!(
        env.service
            .upload(intruder, &UploadRequest::new(Some(dir.id), "x.txt"), body(b"x"))
            .await,
        Err(StowageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_move_then_download_archive() {
    let env = TestEnv::new(10_000).await;
    let inbox = env.service.mkdir(env.owner, None, "inbox").await.unwrap();
    let archive = env.service.mkdir(env.owner, None, "archive").await.unwrap();
    let file = env
        .service
        .upload(env.owner, &UploadRequest::new(Some(inbox.id), "mail.txt"), body(b"hi"))
        .await
        .unwrap();

    let moved = env
        .service
        .move_node(env.owner, inbox.id, Some(archive.id))
        .await
        .unwrap();
    assert_eq!(moved.relative_path, env.tree_path("archive/inbox"));
    let file = env.service.node(env.owner, file.id).await.unwrap();
    assert_eq!(file.relative_path, env.tree_path("archive/inbox/mail.txt"));

    let download = env.service.download(env.owner, archive.id).await.unwrap();
    assert_eq!(download.file_name(), "archive.zip");
    assert!(matches!(download, Download::Archive { .. }));
    assert!(download.size() > 0);

    let download = env.service.download(env.owner, file.id).await.unwrap();
    assert_eq!(download.size(), 2);
}

#[tokio::test]
async fn test_upload_into_trashed_directory_is_not_found() {
    let env = TestEnv::new(10_000).await;
    let dir = env.service.mkdir(env.owner, None, "gone").await.unwrap();
    env.service.trash(env.owner, dir.id).await.unwrap();

    let result = env
        .service
        .upload(env.owner, &UploadRequest::new(Some(dir.id), "a.txt"), body(b"a"))
        .await;
    assert!(matches!(result, Err(StowageError::NotFound(_))));
    assert_eq!(env.used().await, 0);
}

/// Dropping an upload mid-transfer removes the staged bytes and records nothing.
#[tokio::test]
async fn test_cancelled_upload_leaves_nothing_behind() {
    use futures::StreamExt;
    use std::time::Duration;

    let env = TestEnv::new(1000).await;
    let stalled = futures::stream::iter(vec![Ok::<_, std::io::Error>(vec![b'x'; 64])])
        .chain(futures::stream::pending());
    let request = UploadRequest::new(None, "stalled.bin");

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        env.service.upload(env.owner, &request, stalled),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(env.staging_entries(), 0);
    assert!(env.service.list(env.owner, None).await.unwrap().is_empty());
    assert_eq!(env.used().await, 0);
    assert!(!env
        .service
        .paths()
        .physical_path(&env.tree_path("stalled.bin"))
        .exists());
}
